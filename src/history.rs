use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::atomic;
use crate::model::{Candidate, Source};

/// Chars of context folded into a fingerprint. Candidates that differ only past
/// this prefix share an identity.
pub const FINGERPRINT_CONTEXT: usize = 50;

pub fn fingerprint(content: &str, source: Source, context: &str) -> String {
    let prefix: String = context.chars().take(FINGERPRINT_CONTEXT).collect();
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hasher.update(b"_");
    hasher.update(source.as_str().as_bytes());
    hasher.update(b"_");
    hasher.update(prefix.as_bytes());
    let digest = hasher.finalize();

    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{byte:02x}");
    }
    out
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("failed to read history {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("history {path} is malformed: {source}")]
    Malformed {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to write history {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
}

/// How the startup load went. Every variant leaves a usable store behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded { records: usize },
    Missing,
    Corrupt { reason: String },
}

/// Full history as persisted, or `None` when there is no file yet.
pub fn read_records(path: &Path) -> Result<Option<Vec<Candidate>>, HistoryError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(HistoryError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    if raw.trim().is_empty() {
        return Ok(Some(Vec::new()));
    }
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|source| HistoryError::Malformed {
            path: path.to_path_buf(),
            source,
        })
}

/// Append-only ledger of reported candidates keyed by fingerprint. The set lives
/// in memory; the file holds the full records and is rewritten on every `record`.
#[derive(Debug)]
pub struct HistoryStore {
    path: PathBuf,
    known: HashSet<String>,
    outcome: LoadOutcome,
}

impl HistoryStore {
    /// Never fails: a missing file is an empty history, and a corrupt one is moved
    /// aside and treated as empty.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let (known, outcome) = match read_records(&path) {
            Ok(Some(records)) => {
                let n = records.len();
                let known: HashSet<_> = records.into_iter().flat_map(known_keys).collect();
                info!("Loaded {} history records ({} fingerprints) from {}", n, known.len(), path.display());
                (known, LoadOutcome::Loaded { records: n })
            }
            Ok(None) => {
                info!("No history at {}, starting empty", path.display());
                (HashSet::new(), LoadOutcome::Missing)
            }
            Err(e) => {
                error!("{}; starting with empty history", e);
                if matches!(e, HistoryError::Malformed { .. }) {
                    quarantine(&path);
                }
                (HashSet::new(), LoadOutcome::Corrupt { reason: e.to_string() })
            }
        };
        HistoryStore {
            path,
            known,
            outcome,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn outcome(&self) -> &LoadOutcome {
        &self.outcome
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    pub fn is_known(&self, fingerprint: &str) -> bool {
        self.known.contains(fingerprint)
    }

    /// Marks the candidate known and appends it to the file. Returns `Ok(false)` for
    /// a fingerprint that was already recorded. The in-memory set is updated even
    /// when the write fails, so the candidate is not re-reported by this process.
    pub fn record(&mut self, candidate: &Candidate) -> Result<bool, HistoryError> {
        if !self.known.insert(candidate.fingerprint.clone()) {
            return Ok(false);
        }

        let mut records = match read_records(&self.path) {
            Ok(records) => records.unwrap_or_default(),
            Err(e @ HistoryError::Malformed { .. }) => {
                error!("{}; rewriting history from scratch", e);
                quarantine(&self.path);
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        records.push(candidate.clone());

        atomic::write_json(&self.path, &records).map_err(|source| HistoryError::Write {
            path: self.path.clone(),
            source,
        })?;
        Ok(true)
    }

    pub fn records(&self) -> Result<Vec<Candidate>, HistoryError> {
        read_records(&self.path).map(Option::unwrap_or_default)
    }
}

/// The stored fingerprint plus one derived from the record itself, so records
/// keyed by an older hash still suppress the same code today.
fn known_keys(record: Candidate) -> [String; 2] {
    let derived = fingerprint(&record.content, record.source, &record.context);
    [record.fingerprint, derived]
}

fn quarantine(path: &Path) {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return;
    };
    let aside = path.with_file_name(format!("{name}.corrupt-{}", chrono::Utc::now().timestamp()));
    match fs::rename(path, &aside) {
        Ok(()) => warn!("Moved corrupt history to {}", aside.display()),
        Err(e) => warn!("Could not move corrupt history {}: {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BlockKind, MatchSpan, TextBlock};

    fn candidate(code: &str, context: &str) -> Candidate {
        let block = TextBlock::new("paragraph_0", "page paragraph 1", BlockKind::Paragraph, context, "https://example.com/u");
        Candidate::from_span(
            &block,
            MatchSpan {
                code: code.to_string(),
                start: 0,
                end: code.chars().count(),
                context: context.to_string(),
                rule: "six_upper",
            },
        )
    }

    #[test]
    fn fingerprint_is_stable() {
        let a = fingerprint("FUTURE", Source::Page, "新邀请码：FUTURE");
        let b = fingerprint("FUTURE", Source::Page, "新邀请码：FUTURE");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn fingerprint_differs_by_content_and_source() {
        let base = fingerprint("FUTURE", Source::Page, "ctx");
        assert_ne!(base, fingerprint("GROWUP", Source::Page, "ctx"));
        assert_ne!(base, fingerprint("FUTURE", Source::Script, "ctx"));
    }

    #[test]
    fn fingerprint_ignores_context_past_prefix() {
        let head = "x".repeat(FINGERPRINT_CONTEXT);
        let a = fingerprint("FUTURE", Source::Page, &format!("{head} tail one"));
        let b = fingerprint("FUTURE", Source::Page, &format!("{head} something else"));
        assert_eq!(a, b);
        assert_ne!(a, fingerprint("FUTURE", Source::Page, &format!("y{head}")));
    }

    #[test]
    fn missing_file_is_empty_history() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::load(dir.path().join("none.json"));
        assert!(store.is_empty());
        assert_eq!(store.outcome(), &LoadOutcome::Missing);
    }

    #[test]
    fn corrupt_file_is_empty_history_and_moved_aside() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        fs::write(&path, "{ not json").unwrap();

        let mut store = HistoryStore::load(&path);
        assert!(store.is_empty());
        assert!(matches!(store.outcome(), LoadOutcome::Corrupt { .. }));
        assert!(!path.exists());

        assert!(store.record(&candidate("FUTURE", "新邀请码：FUTURE")).unwrap());
        assert_eq!(store.records().unwrap().len(), 1);
    }

    #[test]
    fn recording_twice_persists_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = HistoryStore::load(dir.path().join("history.json"));
        let c = candidate("FUTURE", "新邀请码：FUTURE");

        assert!(store.record(&c).unwrap());
        assert!(store.is_known(&c.fingerprint));
        assert!(!store.record(&c).unwrap());
        assert_eq!(store.records().unwrap().len(), 1);
    }

    #[test]
    fn history_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        let c = candidate("GROWUP", "今日暗号 GROWUP");
        {
            let mut store = HistoryStore::load(&path);
            assert!(store.is_empty());
            store.record(&c).unwrap();
        }
        let reloaded = HistoryStore::load(&path);
        assert!(reloaded.is_known(&c.fingerprint));
        assert_eq!(reloaded.outcome(), &LoadOutcome::Loaded { records: 1 });
    }

    const LEGACY_HISTORY: &str = r#"[
  {
    "content": "FUTURE",
    "source": "page",
    "note_id": "paragraph_0",
    "note_title": "页面段落 1",
    "note_url": "https://www.xiaohongshu.com/user/profile/58953dcb3460945280efcf7b",
    "user_name": "页面内容",
    "timestamp": "2025-09-15T10:02:31.482913",
    "hash_id": "5f4dcc3b5aa765d61d8327deb882cf99",
    "context": "新邀请码：FUTURE，请使用"
  },
  {
    "content": "XMGOOD",
    "source": "note_content",
    "note_id": "68c50d76000000001b03d005",
    "note_title": "9.15 | 小美邀请码更新",
    "note_url": "https://www.xiaohongshu.com/explore/68c50d76000000001b03d005",
    "user_name": "小美",
    "timestamp": "2025-09-15T10:05:00",
    "hash_id": "e10adc3949ba59abbe56e057f20f883e",
    "context": "今日第二轮暗号：XMGOOD"
  }
]"#;

    #[test]
    fn loads_history_with_legacy_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("invite_codes_history.json");
        fs::write(&path, LEGACY_HISTORY).unwrap();

        let store = HistoryStore::load(&path);
        assert_eq!(store.outcome(), &LoadOutcome::Loaded { records: 2 });
        assert!(path.exists());
        assert!(store.is_known("5f4dcc3b5aa765d61d8327deb882cf99"));
        assert!(store.is_known("e10adc3949ba59abbe56e057f20f883e"));
        assert!(store.is_known(&fingerprint("FUTURE", Source::Page, "新邀请码：FUTURE，请使用")));
        assert!(store.is_known(&fingerprint("XMGOOD", Source::Content, "今日第二轮暗号：XMGOOD")));
    }

    #[test]
    fn recording_keeps_legacy_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        fs::write(&path, LEGACY_HISTORY).unwrap();

        let mut store = HistoryStore::load(&path);
        assert!(store.record(&candidate("GROWUP", "今日暗号 GROWUP")).unwrap());
        let records = store.records().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[1].fingerprint, "e10adc3949ba59abbe56e057f20f883e");
    }

    #[test]
    fn appends_to_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        let first = candidate("FUTURE", "a");
        let second = candidate("GROWUP", "b");

        HistoryStore::load(&path).record(&first).unwrap();
        HistoryStore::load(&path).record(&second).unwrap();

        let contents: Vec<_> = HistoryStore::load(&path)
            .records()
            .unwrap()
            .into_iter()
            .map(|c| c.content)
            .collect();
        assert_eq!(contents, ["FUTURE", "GROWUP"]);
    }
}
