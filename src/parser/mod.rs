pub mod filter;
pub mod rules;
pub mod scan;
pub mod segment;

use tracing::debug;

use crate::model::{Candidate, TextBlock};
use filter::{ValidityFilter, Verdict};
use scan::Scanner;
use segment::Segmenter;

/// Segmenter → Scanner → Filter, one block at a time.
#[derive(Debug, Clone, Default)]
pub struct Detector {
    pub segmenter: Segmenter,
    pub scanner: Scanner,
    pub filter: ValidityFilter,
}

impl Detector {
    pub fn new(segmenter: Segmenter, scanner: Scanner, filter: ValidityFilter) -> Self {
        Detector {
            segmenter,
            scanner,
            filter,
        }
    }

    pub fn blocks<'a>(
        &'a self,
        html: &'a str,
        origin_url: &'a str,
    ) -> impl Iterator<Item = TextBlock> + 'a {
        self.segmenter.segment(html, origin_url)
    }

    /// Candidates in one block, in order of occurrence.
    pub fn detect(&self, block: &TextBlock) -> Vec<Candidate> {
        self.scanner
            .scan_block(block)
            .into_iter()
            .filter(|span| match self.filter.judge(span) {
                Verdict::Accepted(by) => {
                    debug!(code = %span.code, rule = span.rule, accepted_by = by, block = %block.id, "match accepted");
                    true
                }
                Verdict::Rejected(by) => {
                    debug!(code = %span.code, rule = span.rule, rejected_by = by, block = %block.id, "match rejected");
                    false
                }
            })
            .map(|span| Candidate::from_span(block, span))
            .collect()
    }
}
