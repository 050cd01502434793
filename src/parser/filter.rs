use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::model::MatchSpan;

static EXCLUDE_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"^\d{4}$",         // years
        r"(?i)^(http|www)", // links
        r"^\d{10,}$",       // phone numbers, ids
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static SIX_UPPER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Z]{6}$").unwrap());
static ALNUM_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9]{4,12}$").unwrap());
static BRAND_DIGITS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^XIAOMEI[0-9]{2,6}$").unwrap());
static BRAND_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^XM[A-Z0-9]{4,8}$").unwrap());

/// Markup vocabulary and reserved words that keep turning up in scraped pages.
pub const DENY_WORDS: &[&str] = &[
    "true", "false", "null", "undefined", "function", "return", "var", "let", "const",
    "if", "else", "for", "while", "switch", "case", "break", "continue",
    "code", "message", "success", "error", "data", "info", "status", "result",
    "title", "name", "value", "key", "id", "type", "class", "style", "src",
    "href", "alt", "width", "height", "content", "text", "html", "body",
    "head", "meta", "link", "script", "div", "span", "img", "input",
    "button", "form", "table", "tr", "td", "th", "ul", "li", "ol",
    "userid", "username", "userinfo", "userdata", "usertoken", "useragent",
    "serverbanned", "showalert", "reason", "backend", "qrid", "image",
    "scanned", "portal", "system", "register", "login", "logout",
    "fportal", "fregistersys", "teminfo", "recordcode", "u002fwww",
    "layout", "header", "footer", "sidebar", "navbar", "menu", "container",
    "wrapper", "section", "article", "column", "row", "grid", "flex", "box",
    "panel", "card", "modal", "dialog", "popup", "tooltip", "dropdown",
    "slider", "carousel", "banner", "placeholder", "placeh", "loading",
    "widget", "module", "component", "element", "block", "item", "list",
];

/// Substrings that make a context look like source code rather than prose.
pub const CODE_INDICATORS: &[&str] = &[
    "function", "var ", "let ", "const ", "{", "}", "()", ";", "return", "= \"", "= '",
    "console.log", "document.", "window.", ".js", "script", "json",
];

/// Weak invite hints: enough to trust the canonical six-letter shape.
pub const INVITE_HINTS: &[&str] = &[
    "邀请码", "激活码", "暗号", "口令", "新邀请码", "专属邀请码", "今日", "第二轮", "限时",
];

/// Strong invite hints: enough to trust any recognised code shape.
pub const STRONG_HINTS: &[&str] = &[
    "邀请码", "激活码", "暗号", "口令", "新邀请码", "专属邀请码",
    "invite code", "invitation code", "activation code",
];

/// A match as the filter sees it, with lowercase context computed once.
pub struct Probe<'a> {
    pub code: &'a str,
    pub context: &'a str,
    context_lower: String,
    code_like: bool,
}

impl<'a> Probe<'a> {
    fn new(code: &'a str, context: &'a str) -> Self {
        let context_lower = context.to_lowercase();
        let code_like = CODE_INDICATORS.iter().any(|i| context_lower.contains(i));
        Probe {
            code,
            context,
            context_lower,
            code_like,
        }
    }

    fn mentions(&self, hints: &[String]) -> bool {
        hints.iter().any(|h| self.context_lower.contains(h.as_str()))
    }
}

/// Hard reject rules, evaluated first; the first that fires wins.
#[derive(Debug, Clone)]
pub enum Gate {
    MinLength(usize),
    ExcludedShape,
    DenyList(HashSet<String>),
    QuotedInCode,
}

impl Gate {
    pub fn name(&self) -> &'static str {
        match self {
            Gate::MinLength(_) => "min_length",
            Gate::ExcludedShape => "excluded_shape",
            Gate::DenyList(_) => "deny_list",
            Gate::QuotedInCode => "quoted_in_code",
        }
    }

    fn rejects(&self, p: &Probe) -> bool {
        match self {
            Gate::MinLength(min) => p.code.chars().count() < *min,
            Gate::ExcludedShape => EXCLUDE_RES.iter().any(|re| re.is_match(p.code)),
            Gate::DenyList(words) => words.contains(&p.code.to_lowercase()),
            Gate::QuotedInCode => p.code_like && is_quoted(p.code, p.context),
        }
    }
}

/// Accept rules, evaluated after every gate passed; the first that fires wins.
#[derive(Debug, Clone)]
pub enum AcceptPath {
    /// Exactly six uppercase letters, next to a hint or in clean prose.
    ShapePriority,
    /// Strong hint nearby and the code has a recognised shape.
    KeywordPriority,
    /// Uppercase letters mixed with digits in clean prose.
    MixedShape { min: usize, max: usize },
}

impl AcceptPath {
    pub fn name(&self) -> &'static str {
        match self {
            AcceptPath::ShapePriority => "shape_priority",
            AcceptPath::KeywordPriority => "keyword_priority",
            AcceptPath::MixedShape { .. } => "mixed_shape",
        }
    }

    fn accepts(&self, p: &Probe, policy: &FilterPolicy) -> bool {
        match self {
            AcceptPath::ShapePriority => {
                SIX_UPPER_RE.is_match(p.code)
                    && (p.mentions(&policy.invite_hints) || !p.code_like)
            }
            AcceptPath::KeywordPriority => {
                p.mentions(&policy.strong_hints)
                    && (ALNUM_RE.is_match(p.code)
                        || BRAND_DIGITS_RE.is_match(p.code)
                        || BRAND_PREFIX_RE.is_match(p.code))
            }
            AcceptPath::MixedShape { min, max } => {
                let len = p.code.chars().count();
                (*min..=*max).contains(&len)
                    && is_upper(p.code)
                    && p.code.chars().any(|c| c.is_alphabetic())
                    && p.code.chars().any(|c| c.is_ascii_digit())
                    && !p.code_like
            }
        }
    }
}

/// Decision plus the name of the rule that made it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accepted(&'static str),
    Rejected(&'static str),
}

impl Verdict {
    pub fn is_accepted(self) -> bool {
        matches!(self, Verdict::Accepted(_))
    }
}

/// Tunable inputs of the filter. Hints are stored lowercase.
#[derive(Debug, Clone)]
pub struct FilterPolicy {
    pub min_len: usize,
    pub deny: HashSet<String>,
    pub invite_hints: Vec<String>,
    pub strong_hints: Vec<String>,
}

impl Default for FilterPolicy {
    fn default() -> Self {
        FilterPolicy {
            min_len: 4,
            deny: DENY_WORDS.iter().map(|w| w.to_lowercase()).collect(),
            invite_hints: INVITE_HINTS.iter().map(|w| w.to_lowercase()).collect(),
            strong_hints: STRONG_HINTS.iter().map(|w| w.to_lowercase()).collect(),
        }
    }
}

impl FilterPolicy {
    pub fn with_extra_deny<I, S>(mut self, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.deny
            .extend(words.into_iter().map(|w| w.as_ref().trim().to_lowercase()));
        self
    }
}

#[derive(Debug, Clone)]
pub struct ValidityFilter {
    policy: FilterPolicy,
    gates: Vec<Gate>,
    accepts: Vec<AcceptPath>,
}

impl ValidityFilter {
    pub fn new(policy: FilterPolicy) -> Self {
        let gates = vec![
            Gate::MinLength(policy.min_len),
            Gate::ExcludedShape,
            Gate::DenyList(policy.deny.clone()),
            Gate::QuotedInCode,
        ];
        let accepts = vec![
            AcceptPath::ShapePriority,
            AcceptPath::KeywordPriority,
            AcceptPath::MixedShape { min: 5, max: 12 },
        ];
        ValidityFilter {
            policy,
            gates,
            accepts,
        }
    }

    pub fn judge(&self, span: &MatchSpan) -> Verdict {
        self.judge_code(&span.code, &span.context)
    }

    pub fn judge_code(&self, code: &str, context: &str) -> Verdict {
        let probe = Probe::new(code, context);
        if let Some(gate) = self.gates.iter().find(|g| g.rejects(&probe)) {
            return Verdict::Rejected(gate.name());
        }
        match self.accepts.iter().find(|a| a.accepts(&probe, &self.policy)) {
            Some(path) => Verdict::Accepted(path.name()),
            None => Verdict::Rejected("no_accept_path"),
        }
    }

    pub fn gates(&self) -> &[Gate] {
        &self.gates
    }

    pub fn accept_paths(&self) -> &[AcceptPath] {
        &self.accepts
    }
}

impl Default for ValidityFilter {
    fn default() -> Self {
        ValidityFilter::new(FilterPolicy::default())
    }
}

/// At least one cased char and no lowercase ones.
fn is_upper(s: &str) -> bool {
    s.chars().any(|c| c.is_uppercase()) && !s.chars().any(|c| c.is_lowercase())
}

/// `"CODE"`, `= 'CODE'`, `: "CODE"` and friends.
fn is_quoted(code: &str, context: &str) -> bool {
    let pattern = format!(r#"["']{}["']"#, regex::escape(code));
    Regex::new(&pattern)
        .map(|re| re.is_match(context))
        .unwrap_or(false)
}
