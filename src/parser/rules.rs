use std::sync::LazyLock;

use regex::Regex;

/// One entry of the scanner's priority table.
#[derive(Debug, Clone)]
pub struct PatternRule {
    pub name: &'static str,
    pub regex: Regex,
    /// Only accept matches not glued to another ASCII letter or digit.
    pub bounded: bool,
}

impl PatternRule {
    pub fn new(name: &'static str, pattern: &str) -> Result<Self, regex::Error> {
        Ok(PatternRule {
            name,
            regex: Regex::new(pattern)?,
            bounded: true,
        })
    }

    pub fn unbounded(mut self) -> Self {
        self.bounded = false;
        self
    }
}

// Most specific first. Brand formats, then the canonical six-letter shape, then
// progressively looser alphanumeric runs. Only the last two admit lowercase; the
// filter's deny list and keyword path decide whether such runs are codes.
const DEFAULT_RULES: &[(&str, &str)] = &[
    ("brand_digits", r"XIAOMEI[0-9]{2,6}"),
    ("brand_prefix", r"XM[A-Z0-9]{4,8}"),
    ("six_upper", r"[A-Z]{6}"),
    ("letters_digits_letters", r"[A-Z]{3,6}[0-9]{3,6}[A-Z]{1,3}"),
    ("letters_digits", r"[A-Z]{3,6}[0-9]{3,6}"),
    ("upper_run", r"[A-Z]{4,12}"),
    ("upper_alnum", r"[A-Z0-9]{6,12}"),
    ("mixed_alnum", r"[a-zA-Z0-9]{8,16}"),
    ("short_alnum", r"[a-zA-Z0-9]{4,12}"),
];

static DEFAULT_TABLE: LazyLock<Vec<PatternRule>> = LazyLock::new(|| {
    DEFAULT_RULES
        .iter()
        .map(|(name, pattern)| PatternRule::new(name, pattern).unwrap())
        .collect()
});

/// Ordered rule list; earlier rules claim text before later ones.
#[derive(Debug, Clone)]
pub struct RuleTable {
    rules: Vec<PatternRule>,
}

impl RuleTable {
    pub fn new(rules: Vec<PatternRule>) -> Self {
        RuleTable { rules }
    }

    pub fn rules(&self) -> &[PatternRule] {
        &self.rules
    }
}

impl Default for RuleTable {
    fn default() -> Self {
        RuleTable::new(DEFAULT_TABLE.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_order() {
        let table = RuleTable::default();
        let names: Vec<_> = table.rules().iter().map(|r| r.name).collect();
        assert_eq!(names.first(), Some(&"brand_digits"));
        assert_eq!(names.last(), Some(&"short_alnum"));
        let six = names.iter().position(|n| *n == "six_upper").unwrap();
        let run = names.iter().position(|n| *n == "upper_run").unwrap();
        assert!(six < run);
        assert_eq!(table.rules().len(), DEFAULT_RULES.len());
    }

    #[test]
    fn bad_pattern_is_an_error() {
        assert!(PatternRule::new("broken", "[A-Z").is_err());
    }

    #[test]
    fn unbounded_flag() {
        let r = PatternRule::new("x", "X+").unwrap();
        assert!(r.bounded);
        assert!(!r.unbounded().bounded);
    }
}
