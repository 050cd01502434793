use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use crate::config::NotifySettings;
use crate::model::Candidate;

/// Receives the new candidates of a pass. Delivery problems stay inside the
/// notifier; nothing is reported back to the pass.
#[async_trait]
pub trait Notify: Send + Sync {
    async fn deliver(&self, found: &[Candidate]);

    /// Channel name for status output.
    fn channel(&self) -> &'static str;
}

pub struct LogNotifier;

#[async_trait]
impl Notify for LogNotifier {
    fn channel(&self) -> &'static str {
        "log"
    }

    async fn deliver(&self, found: &[Candidate]) {
        for c in found {
            info!(
                code = %c.content,
                source = %c.source,
                note = %c.note_title,
                url = %c.note_url,
                "New invite code"
            );
        }
    }
}

pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(WebhookNotifier {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notify for WebhookNotifier {
    fn channel(&self) -> &'static str {
        "webhook"
    }

    async fn deliver(&self, found: &[Candidate]) {
        if found.is_empty() {
            return;
        }
        let (subject, text) = digest::render(found);
        let payload = json!({
            "subject": subject,
            "text": text,
            "candidates": found,
        });

        match self.client.post(&self.url).json(&payload).send().await {
            Ok(resp) if resp.status().is_success() => {
                info!("Webhook notified about {} new codes", found.len());
            }
            Ok(resp) => warn!("Webhook {} answered HTTP {}", self.url, resp.status()),
            Err(e) => warn!("Webhook {} failed: {}", self.url, e),
        }
    }
}

/// Webhook when one is configured, otherwise log lines.
pub fn from_settings(settings: &NotifySettings) -> Box<dyn Notify> {
    let Some(url) = settings.webhook_url.as_deref().filter(|u| !u.trim().is_empty()) else {
        return Box::new(LogNotifier);
    };
    match WebhookNotifier::new(url.trim()) {
        Ok(n) => Box::new(n),
        Err(e) => {
            warn!("Webhook client unavailable ({}), falling back to log notifications", e);
            Box::new(LogNotifier)
        }
    }
}

pub mod digest {
    use crate::model::Candidate;

    /// Subject line and plain-text body for a batch of new candidates.
    pub fn render(found: &[Candidate]) -> (String, String) {
        let subject = match found.len() {
            1 => "1 new invite code".to_string(),
            n => format!("{n} new invite codes"),
        };

        let mut body = String::new();
        for (i, c) in found.iter().enumerate() {
            if i > 0 {
                body.push('\n');
            }
            body.push_str(&format!("{}. {} [{}]\n", i + 1, c.content, c.source));
            body.push_str(&format!("   from:    {}\n", c.note_title));
            body.push_str(&format!("   context: {}\n", c.context));
            body.push_str(&format!("   found:   {}\n", c.discovered_at.format("%Y-%m-%d %H:%M:%S")));
            body.push_str(&format!("   link:    {}\n", c.note_url));
        }
        (subject, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BlockKind, MatchSpan, TextBlock};

    fn candidate(code: &str) -> Candidate {
        let block = TextBlock::new("note1", "9.15 | 邀请码更新", BlockKind::NoteTitle, "", "https://example.com/explore/note1");
        Candidate::from_span(
            &block,
            MatchSpan {
                code: code.into(),
                start: 0,
                end: code.len(),
                context: format!("暗号 {code}"),
                rule: "six_upper",
            },
        )
    }

    #[test]
    fn digest_lists_every_candidate() {
        let (subject, body) = digest::render(&[candidate("FUTURE"), candidate("GROWUP")]);
        assert_eq!(subject, "2 new invite codes");
        assert!(body.contains("1. FUTURE [title]"));
        assert!(body.contains("2. GROWUP [title]"));
        assert!(body.contains("https://example.com/explore/note1"));
        assert!(body.contains("context: 暗号 GROWUP"));
    }

    #[test]
    fn singular_subject() {
        let (subject, _) = digest::render(&[candidate("FUTURE")]);
        assert_eq!(subject, "1 new invite code");
    }

    #[test]
    fn blank_webhook_means_log_only() {
        let blank = NotifySettings {
            webhook_url: Some("  ".into()),
        };
        assert_eq!(from_settings(&blank).channel(), "log");
        assert_eq!(from_settings(&NotifySettings::default()).channel(), "log");
    }

    #[test]
    fn configured_webhook_is_used() {
        let settings = NotifySettings {
            webhook_url: Some(" https://hooks.example.com/x ".into()),
        };
        assert_eq!(from_settings(&settings).channel(), "webhook");
    }
}
