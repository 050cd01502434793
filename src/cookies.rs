use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::info;

use crate::atomic;
use crate::config::{Cookie, DEFAULT_TARGET};

static COOKIE_FLAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?:^|\s)(?:-b|--cookie)\s+(?:'([^']+)'|"([^"]+)")"#).unwrap());
static HEADER_FLAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:-H|--header)\s+(?:'([^':]+):\s*([^']*)'|"([^":]+):\s*([^"]*)")"#).unwrap()
});

/// Headers worth carrying over from a browser request.
pub const IMPORTANT_HEADERS: &[&str] = &[
    "user-agent",
    "x-s",
    "x-s-common",
    "x-t",
    "x-xray-traceid",
    "x-b3-traceid",
    "referer",
    "origin",
];

/// Session cookies the profile page actually needs.
pub const IMPORTANT_COOKIES: &[&str] = &[
    "web_session",
    "a1",
    "webId",
    "gid",
    "abRequestId",
    "customerClientId",
    "customer-sso-sid",
    "access-token-creator.xiaohongshu.com",
    "galaxy_creator_session_id",
    "galaxy.creator.beaker.session.id",
    "xsecappid",
    "acw_tc",
    "websectiga",
    "sec_poison_id",
];

#[derive(Debug, Error)]
pub enum CookieError {
    #[error("curl command is empty")]
    Empty,
    #[error("no cookies found; the command needs -b '...' or -H 'cookie: ...'")]
    NoCookies,
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("{path} is not a JSON object")]
    NotAnObject { path: PathBuf },
    #[error("{path} is not valid JSON: {source}")]
    Malformed {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("failed to encode config: {0}")]
    Encode(#[from] serde_json::Error),
}

/// What a curl command yielded after filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Imported {
    pub cookies: Vec<Cookie>,
    pub headers: BTreeMap<String, String>,
    /// Cookies seen before filtering.
    pub seen: usize,
}

pub fn parse_cookie_string(raw: &str) -> Vec<Cookie> {
    raw.split(';')
        .filter_map(|pair| pair.split_once('='))
        .map(|(name, value)| Cookie {
            name: name.trim().to_string(),
            value: value.trim().to_string(),
        })
        .filter(|c| !c.name.is_empty())
        .collect()
}

/// Cookies from `-b`/`--cookie`, falling back to a `cookie:` header.
pub fn extract_cookies(curl: &str) -> Vec<Cookie> {
    let from_flags: Vec<Cookie> = COOKIE_FLAG_RE
        .captures_iter(curl)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
        .flat_map(|m| parse_cookie_string(m.as_str()))
        .collect();
    if !from_flags.is_empty() {
        return from_flags;
    }

    header_pairs(curl)
        .filter(|(name, _)| name == "cookie")
        .flat_map(|(_, value)| parse_cookie_string(&value))
        .collect()
}

/// Whitelisted request headers, names lowercased.
pub fn extract_headers(curl: &str) -> BTreeMap<String, String> {
    header_pairs(curl)
        .filter(|(name, _)| IMPORTANT_HEADERS.contains(&name.as_str()))
        .collect()
}

fn header_pairs(curl: &str) -> impl Iterator<Item = (String, String)> + '_ {
    HEADER_FLAG_RE.captures_iter(curl).filter_map(|caps| {
        let (name, value) = match (caps.get(1), caps.get(2), caps.get(3), caps.get(4)) {
            (Some(n), Some(v), _, _) | (_, _, Some(n), Some(v)) => (n, v),
            _ => return None,
        };
        Some((name.as_str().trim().to_lowercase(), value.as_str().trim().to_string()))
    })
}

pub fn import(curl: &str) -> Result<Imported, CookieError> {
    let curl = curl.trim();
    if curl.is_empty() {
        return Err(CookieError::Empty);
    }
    let all = extract_cookies(curl);
    if all.is_empty() {
        return Err(CookieError::NoCookies);
    }
    let seen = all.len();
    let cookies = all
        .into_iter()
        .filter(|c| IMPORTANT_COOKIES.contains(&c.name.as_str()))
        .collect();
    Ok(Imported {
        cookies,
        headers: extract_headers(curl),
        seen,
    })
}

/// Writes the imported cookies (and headers, when any) into a JSON config file,
/// keeping every other key. A missing file is created with defaults.
pub fn update_config(path: &Path, imported: &Imported) -> Result<(), CookieError> {
    let mut config = match fs::read_to_string(path) {
        Ok(raw) if raw.trim().is_empty() => default_config(),
        Ok(raw) => serde_json::from_str(&raw).map_err(|source| CookieError::Malformed {
            path: path.to_path_buf(),
            source,
        })?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => default_config(),
        Err(source) => {
            return Err(CookieError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let Value::Object(map) = &mut config else {
        return Err(CookieError::NotAnObject {
            path: path.to_path_buf(),
        });
    };
    map.insert("cookies".into(), serde_json::to_value(&imported.cookies)?);
    if !imported.headers.is_empty() {
        map.insert("headers".into(), serde_json::to_value(&imported.headers)?);
    }

    atomic::write_json(path, &config).map_err(|source| CookieError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    info!(
        "Wrote {} cookies and {} headers to {}",
        imported.cookies.len(),
        imported.headers.len(),
        path.display()
    );
    Ok(())
}

fn default_config() -> Value {
    json!({
        "target_user_id": DEFAULT_TARGET,
        "interval_minutes": 5,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    const CURL: &str = r#"curl 'https://www.xiaohongshu.com/user/profile/58953dcb3460945280efcf7b' \
  -H 'accept: text/html' \
  -H 'referer: https://www.xiaohongshu.com/explore' \
  -H 'User-Agent: Mozilla/5.0 test' \
  -b 'a1=19a8f; webId=77cc; web_session=0400aa; xsecappid=xhs-pc-web; loadts=1757'"#;

    #[test]
    fn cookies_from_b_flag() {
        let cookies = extract_cookies(CURL);
        assert_eq!(cookies.len(), 5);
        assert_eq!(cookies[0], Cookie { name: "a1".into(), value: "19a8f".into() });
    }

    #[test]
    fn cookies_from_header_when_no_flag() {
        let curl = r#"curl "https://x" -H "Cookie: a1=1; gid=2""#;
        let names: Vec<_> = extract_cookies(curl).into_iter().map(|c| c.name).collect();
        assert_eq!(names, ["a1", "gid"]);
    }

    #[test]
    fn only_important_headers_kept() {
        let headers = extract_headers(CURL);
        assert_eq!(headers.len(), 2);
        assert_eq!(headers["referer"], "https://www.xiaohongshu.com/explore");
        assert_eq!(headers["user-agent"], "Mozilla/5.0 test");
    }

    #[test]
    fn import_filters_cookies() {
        let imported = import(CURL).unwrap();
        assert_eq!(imported.seen, 5);
        let names: Vec<_> = imported.cookies.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["a1", "webId", "web_session", "xsecappid"]);
    }

    #[test]
    fn import_errors() {
        assert!(matches!(import("   "), Err(CookieError::Empty)));
        assert!(matches!(import("curl https://x -H 'accept: */*'"), Err(CookieError::NoCookies)));
    }

    #[test]
    fn creates_config_that_settings_can_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        update_config(&path, &import(CURL).unwrap()).unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.target_user_id, DEFAULT_TARGET);
        assert_eq!(settings.cookies.len(), 4);
        assert_eq!(settings.headers.len(), 2);
    }

    #[test]
    fn keeps_existing_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"target_user_id": "abc", "cookies": [{"name": "old", "value": "1"}]}"#).unwrap();

        update_config(&path, &import(CURL).unwrap()).unwrap();
        let value: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["target_user_id"], "abc");
        assert_eq!(value["cookies"][0]["name"], "a1");
        assert_eq!(value["cookies"].as_array().unwrap().len(), 4);
    }

    #[test]
    fn refuses_to_clobber_bad_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "[1, 2]").unwrap();
        let err = update_config(&path, &import(CURL).unwrap()).unwrap_err();
        assert!(matches!(err, CookieError::NotAnObject { .. }));
        assert_eq!(fs::read_to_string(&path).unwrap(), "[1, 2]");
    }
}
