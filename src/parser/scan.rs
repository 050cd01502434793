use crate::model::{MatchSpan, TextBlock};

use super::rules::RuleTable;

pub const DEFAULT_CONTEXT_WINDOW: usize = 50;

/// Runs the rule table over a block body, greedy by rule priority: once a region is
/// claimed, later rules cannot claim any part of it.
#[derive(Debug, Clone)]
pub struct Scanner {
    rules: RuleTable,
    window: usize,
}

impl Scanner {
    pub fn new(rules: RuleTable, window: usize) -> Self {
        Scanner { rules, window }
    }

    pub fn scan_block(&self, block: &TextBlock) -> Vec<MatchSpan> {
        self.scan(&block.body)
    }

    pub fn scan(&self, body: &str) -> Vec<MatchSpan> {
        let mut accepted: Vec<MatchSpan> = Vec::new();
        let char_len = body.chars().count();

        for rule in self.rules.rules() {
            for m in rule.regex.find_iter(body) {
                if m.is_empty() {
                    continue;
                }
                if rule.bounded && !is_isolated(body, m.start(), m.end()) {
                    continue;
                }

                let start = body[..m.start()].chars().count();
                let end = start + m.as_str().chars().count();
                if accepted.iter().any(|s| s.overlaps(start, end)) {
                    continue;
                }

                accepted.push(MatchSpan {
                    code: m.as_str().to_string(),
                    start,
                    end,
                    context: context_slice(body, start, end, self.window, char_len),
                    rule: rule.name,
                });
            }
        }

        accepted.sort_by_key(|s| s.start);
        accepted
    }
}

impl Default for Scanner {
    fn default() -> Self {
        Scanner::new(RuleTable::default(), DEFAULT_CONTEXT_WINDOW)
    }
}

/// True when neither neighbour of the byte range is an ASCII letter or digit.
fn is_isolated(body: &str, start: usize, end: usize) -> bool {
    let before = body[..start].chars().next_back();
    let after = body[end..].chars().next();
    !before.is_some_and(|c| c.is_ascii_alphanumeric())
        && !after.is_some_and(|c| c.is_ascii_alphanumeric())
}

fn context_slice(body: &str, start: usize, end: usize, window: usize, char_len: usize) -> String {
    let lo = start.saturating_sub(window);
    let hi = (end + window).min(char_len);
    let slice: String = body.chars().skip(lo).take(hi - lo).collect();
    slice.trim().to_string()
}
