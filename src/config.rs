use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::parser::filter::{AcceptPath, FilterPolicy, Gate, ValidityFilter};
use crate::parser::rules::RuleTable;
use crate::parser::scan::{Scanner, DEFAULT_CONTEXT_WINDOW};
use crate::parser::segment::{Segmenter, DEFAULT_SCRIPT_LIMIT, RELEVANCE_KEYWORDS};
use crate::parser::Detector;

pub const DEFAULT_CONFIG: &str = "config.json";
pub const DEFAULT_TARGET: &str = "58953dcb3460945280efcf7b";
pub const DEFAULT_PROFILE_BASE: &str = "https://www.xiaohongshu.com/user/profile/";
pub const DEFAULT_HISTORY: &str = "invite_codes_history.json";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/139.0.0.0 Safari/537.36";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub target_user_id: String,
    pub profile_base_url: String,
    #[serde(alias = "monitor_interval")]
    pub interval_minutes: u64,
    pub history_path: PathBuf,
    pub headers: BTreeMap<String, String>,
    pub cookies: Vec<Cookie>,
    pub fetch: FetchSettings,
    pub notify: NotifySettings,
    pub detection: DetectionSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            target_user_id: DEFAULT_TARGET.to_string(),
            profile_base_url: DEFAULT_PROFILE_BASE.to_string(),
            interval_minutes: 5,
            history_path: PathBuf::from(DEFAULT_HISTORY),
            headers: BTreeMap::new(),
            cookies: Vec::new(),
            fetch: FetchSettings::default(),
            notify: NotifySettings::default(),
            detection: DetectionSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub user_agent: String,
}

impl Default for FetchSettings {
    fn default() -> Self {
        FetchSettings {
            timeout_secs: 15,
            max_retries: 2,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NotifySettings {
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectionSettings {
    pub context_window: usize,
    pub script_limit: usize,
    pub extra_keywords: Vec<String>,
    pub extra_deny: Vec<String>,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        DetectionSettings {
            context_window: DEFAULT_CONTEXT_WINDOW,
            script_limit: DEFAULT_SCRIPT_LIMIT,
            extra_keywords: Vec::new(),
            extra_deny: Vec::new(),
        }
    }
}

impl DetectionSettings {
    pub fn detector(&self) -> Detector {
        let keywords = RELEVANCE_KEYWORDS
            .iter()
            .map(|k| k.to_string())
            .chain(self.extra_keywords.iter().cloned());
        let rules = RuleTable::default();
        let filter = ValidityFilter::new(FilterPolicy::default().with_extra_deny(&self.extra_deny));
        debug!(
            rules = ?rules.rules().iter().map(|r| r.name).collect::<Vec<_>>(),
            gates = ?filter.gates().iter().map(Gate::name).collect::<Vec<_>>(),
            accept = ?filter.accept_paths().iter().map(AcceptPath::name).collect::<Vec<_>>(),
            "detector configured"
        );
        Detector::new(
            Segmenter::new(keywords, self.script_limit.max(1)),
            Scanner::new(rules, self.context_window),
            filter,
        )
    }
}

impl Settings {
    /// Config file (optional, any format the `config` crate knows) overlaid with
    /// `MONITOR_*` environment variables. Missing keys keep their defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG));
        let settings: Settings = config::Config::builder()
            .add_source(config::File::from(file).required(false))
            .add_source(
                config::Environment::with_prefix("MONITOR")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .with_context(|| format!("Failed to read config {}", file.display()))?
            .try_deserialize()
            .with_context(|| format!("Invalid config {}", file.display()))?;
        Ok(settings.normalized())
    }

    fn normalized(mut self) -> Self {
        self.interval_minutes = self.interval_minutes.max(1);
        if self.target_user_id.trim().is_empty() {
            self.target_user_id = DEFAULT_TARGET.to_string();
        }
        self
    }

    pub fn target_url(&self) -> String {
        if self.target_user_id.starts_with("http") {
            return self.target_user_id.clone();
        }
        let base = self.profile_base_url.trim_end_matches('/');
        format!("{}/{}", base, self.target_user_id.trim())
    }
}
