use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::model::{BlockKind, TextBlock};

static SCRIPT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script\b[^>]*>(.*?)</script\s*>").unwrap());
static STYLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<style\b[^>]*>.*?</style\s*>").unwrap());
static COMMENT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());
static BREAK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<br\s*/?>").unwrap());
static BLOCK_END_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)</(p|div|section|article|li|ul|ol|h[1-6]|tr|table|header|footer)\s*>").unwrap()
});
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());
static NUM_ENTITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&#([xX]?)([0-9a-fA-F]+);").unwrap());
static JSON_OBJECT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{[^{}]*(?:\{[^{}]*\}[^{}]*)*\}").unwrap());
static ANCHOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<a\b([^>]*)>(.*?)</a\s*>").unwrap());
static NOTE_HREF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)href\s*=\s*["']([^"']*/explore/([0-9a-f]+)[^"']*)["']"#).unwrap()
});
static TITLE_ATTR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)\btitle\s*=\s*["']([^"']*)["']"#).unwrap());
static ORIGIN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(https?://[^/]+)").unwrap());

/// Domain vocabulary that marks text as worth scanning.
pub const RELEVANCE_KEYWORDS: &[&str] = &[
    "邀请码", "激活码", "内测码", "体验码", "测试码", "兑换码",
    "暗号", "口令", "密码", "通关密语", "神秘代码", "专属码",
    "invite", "code", "activation", "beta", "test", "promo",
    "限时", "内测", "抢先", "专属", "独家",
];

pub const DEFAULT_SCRIPT_LIMIT: usize = 1000;
const NOTE_TITLE_LIMIT: usize = 50;

/// Cuts an HTML page into labelled blocks: relevant visible paragraphs, note link
/// titles and embedded script payloads. Never fails; unparseable markup just yields
/// fewer blocks.
#[derive(Debug, Clone)]
pub struct Segmenter {
    keywords: Vec<String>,
    script_limit: usize,
}

impl Segmenter {
    pub fn new<I, S>(keywords: I, script_limit: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keywords = keywords
            .into_iter()
            .map(|k| k.as_ref().trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        Segmenter {
            keywords,
            script_limit,
        }
    }

    pub fn is_relevant(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.keywords.iter().any(|k| lower.contains(k.as_str()))
    }

    pub fn segment<'a>(
        &'a self,
        html: &'a str,
        origin_url: &'a str,
    ) -> impl Iterator<Item = TextBlock> + 'a {
        let paragraphs = std::iter::once_with(move || self.paragraphs(html))
            .flatten()
            .enumerate()
            .map(move |(i, body)| {
                TextBlock::new(
                    format!("paragraph_{i}"),
                    format!("page paragraph {}", i + 1),
                    BlockKind::Paragraph,
                    body,
                    origin_url,
                )
            });

        let notes = std::iter::once_with(move || self.note_titles(html, origin_url)).flatten();

        let scripts = SCRIPT_RE
            .captures_iter(html)
            .enumerate()
            .flat_map(move |(i, caps)| self.script_blocks(i, &caps[1], origin_url));

        paragraphs.chain(notes).chain(scripts)
    }

    /// Visible text split on blank lines, keeping paragraphs that mention a keyword.
    fn paragraphs(&self, html: &str) -> Vec<String> {
        let text = visible_text(html);
        let mut out = Vec::new();
        let mut current: Vec<&str> = Vec::new();

        for line in text.lines().map(str::trim) {
            if line.is_empty() {
                self.flush_paragraph(&mut current, &mut out);
            } else {
                current.push(line);
            }
        }
        self.flush_paragraph(&mut current, &mut out);
        out
    }

    fn flush_paragraph(&self, current: &mut Vec<&str>, out: &mut Vec<String>) {
        if current.is_empty() {
            return;
        }
        let paragraph = current.join(" ");
        current.clear();
        if self.is_relevant(&paragraph) {
            out.push(paragraph);
        }
    }

    fn note_titles(&self, html: &str, origin_url: &str) -> Vec<TextBlock> {
        let site = ORIGIN_RE
            .captures(origin_url)
            .map(|c| c[1].to_string())
            .unwrap_or_default();
        let mut seen = HashSet::new();
        let mut blocks = Vec::new();

        for caps in ANCHOR_RE.captures_iter(html) {
            let attrs = &caps[1];
            let Some(href) = NOTE_HREF_RE.captures(attrs) else {
                continue;
            };
            let note_id = href[2].to_string();
            if !seen.insert(note_id.clone()) {
                continue;
            }

            let title = TITLE_ATTR_RE
                .captures(attrs)
                .map(|c| decode_entities(&c[1]))
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| collapse_whitespace(&decode_entities(&TAG_RE.replace_all(&caps[2], ""))));
            let title = truncate_chars(title.trim(), NOTE_TITLE_LIMIT);
            if title.is_empty() || !self.is_relevant(&title) {
                continue;
            }

            let link = &href[1];
            let url = if link.starts_with("http") {
                link.to_string()
            } else {
                format!("{site}{link}")
            };
            blocks.push(TextBlock::new(note_id, title.clone(), BlockKind::NoteTitle, title, url));
        }
        blocks
    }

    fn script_blocks(&self, index: usize, payload: &str, origin_url: &str) -> Vec<TextBlock> {
        if payload.trim().is_empty() || !self.is_relevant(payload) {
            return Vec::new();
        }

        let label = format!("script blob {}", index + 1);
        let mut bodies: Vec<String> = JSON_OBJECT_RE
            .find_iter(payload)
            .map(|m| m.as_str())
            .filter(|obj| self.is_relevant(obj))
            .map(|obj| truncate_chars(obj, self.script_limit))
            .collect();
        if bodies.is_empty() {
            bodies.push(truncate_chars(payload.trim(), self.script_limit));
        }

        bodies
            .into_iter()
            .enumerate()
            .map(|(j, body)| {
                TextBlock::new(
                    format!("script_{index}_{j}"),
                    label.clone(),
                    BlockKind::Script,
                    body,
                    origin_url,
                )
            })
            .collect()
    }
}

impl Default for Segmenter {
    fn default() -> Self {
        Segmenter::new(RELEVANCE_KEYWORDS, DEFAULT_SCRIPT_LIMIT)
    }
}

/// Page text with scripts, styles and tags removed. Block-level closing tags become
/// blank lines so they delimit paragraphs.
pub fn visible_text(html: &str) -> String {
    let text = SCRIPT_RE.replace_all(html, "\n");
    let text = STYLE_RE.replace_all(&text, "\n");
    let text = COMMENT_RE.replace_all(&text, "");
    let text = BREAK_RE.replace_all(&text, "\n");
    let text = BLOCK_END_RE.replace_all(&text, "\n\n");
    let text = TAG_RE.replace_all(&text, "");
    decode_entities(&text)
}

fn decode_entities(s: &str) -> String {
    let named = s
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&");
    NUM_ENTITY_RE
        .replace_all(&named, |caps: &regex::Captures| {
            let radix = if caps[1].is_empty() { 10 } else { 16 };
            u32::from_str_radix(&caps[2], radix)
                .ok()
                .and_then(char::from_u32)
                .map(String::from)
                .unwrap_or_default()
        })
        .into_owned()
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
