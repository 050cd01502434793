use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::fetch::Fetch;
use crate::history::HistoryStore;
use crate::model::{Candidate, TextBlock};
use crate::notify::Notify;
use crate::parser::Detector;

/// What one pass saw and produced.
#[derive(Debug, Default)]
pub struct PassReport {
    pub fetched: bool,
    pub blocks: usize,
    pub failed_blocks: usize,
    pub accepted: usize,
    pub new: Vec<Candidate>,
}

/// One fetch → segment → scan+filter → dedup → report cycle. The store is passed
/// in so tests and commands can use isolated histories.
pub async fn run_pass(
    url: &str,
    fetcher: &dyn Fetch,
    detector: &Detector,
    store: &mut HistoryStore,
    notifier: &dyn Notify,
) -> PassReport {
    let html = fetcher.fetch(url).await;
    if html.is_empty() {
        warn!("No page content for {}, skipping this pass", url);
        return PassReport::default();
    }

    let report = process_page(&html, url, detector, store);

    if report.new.is_empty() {
        info!("No new invite codes");
    } else {
        info!("Found {} new invite codes", report.new.len());
        notifier.deliver(&report.new).await;
    }
    report
}

/// Everything after the fetch, minus notification.
pub fn process_page(
    html: &str,
    url: &str,
    detector: &Detector,
    store: &mut HistoryStore,
) -> PassReport {
    let mut report = PassReport {
        fetched: true,
        ..PassReport::default()
    };

    let accepted = scan_blocks(detector.blocks(html, url), &mut report, |b| detector.detect(b));
    report.accepted = accepted.len();

    for candidate in accepted {
        if store.is_known(&candidate.fingerprint) {
            debug!(code = %candidate.content, "already reported");
            continue;
        }
        if let Err(e) = store.record(&candidate) {
            error!("Could not persist {}: {}", candidate.content, e);
        }
        info!(
            "New invite code: {} (source: {}, {})",
            candidate.content, candidate.source, candidate.note_title
        );
        report.new.push(candidate);
    }

    info!(
        "Pass scanned {} blocks ({} failed), {} accepted, {} new",
        report.blocks,
        report.failed_blocks,
        report.accepted,
        report.new.len()
    );
    report
}

/// Runs `detect` on each block; a panic inside one block is logged and skipped.
fn scan_blocks<I, F>(blocks: I, report: &mut PassReport, detect: F) -> Vec<Candidate>
where
    I: Iterator<Item = TextBlock>,
    F: Fn(&TextBlock) -> Vec<Candidate>,
{
    let mut out = Vec::new();
    for block in blocks {
        report.blocks += 1;
        match panic::catch_unwind(AssertUnwindSafe(|| detect(&block))) {
            Ok(found) => out.extend(found),
            Err(cause) => {
                report.failed_blocks += 1;
                error!("Scanning {} ({}) failed: {}", block.id, block.label, panic_message(&cause));
            }
        }
    }
    out
}

fn panic_message(cause: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = cause.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = cause.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

pub struct Monitor {
    pub target_url: String,
    pub detector: Detector,
    pub store: HistoryStore,
    pub fetcher: Box<dyn Fetch>,
    pub notifier: Box<dyn Notify>,
}

impl Monitor {
    pub async fn run_pass(&mut self) -> PassReport {
        let t0 = Instant::now();
        info!("Starting monitoring pass for {}", self.target_url);
        let report = run_pass(
            &self.target_url,
            self.fetcher.as_ref(),
            &self.detector,
            &mut self.store,
            self.notifier.as_ref(),
        )
        .await;
        info!("Pass finished in {:.1}s", t0.elapsed().as_secs_f64());
        report
    }

    /// One pass now, then one per `interval`, until Ctrl-C. A pass in progress
    /// always finishes before the interrupt is handled.
    pub async fn run_forever(&mut self, interval: Duration) {
        info!("Monitoring every {} min; Ctrl-C to stop", interval.as_secs() / 60);
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Interrupt received, stopping");
                    break;
                }
                _ = ticker.tick() => {
                    if AssertUnwindSafe(self.run_pass()).catch_unwind().await.is_err() {
                        error!("Monitoring pass aborted; retrying at the next interval");
                    }
                }
            }
        }
    }
}
