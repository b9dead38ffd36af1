//! Throttled download progress reporting.
//!
//! Raw collaborator updates can arrive per buffer; the reporter gates them so
//! the parent sees at most one `progress` line per five percentage points of
//! rise, plus an unconditional emit once progress first reaches 99%. A
//! request produces one `start` line, throttled `progress` lines, and exactly
//! one terminal line (`complete` or error), after which the reporter is
//! inert.

use std::io::Write;

use crate::backend::DownloadUpdate;
use crate::error::LateralError;
use crate::server::protocol::Response;
use crate::server::runloop::ResponseWriter;

/// Minimum percentage-point rise between consecutive progress lines.
const PROGRESS_STEP: f64 = 5.0;
/// Progress at or above this always emits once, so the parent sees the tail.
const TAIL_THRESHOLD: f64 = 99.0;

/// Per-request progress gate.
pub struct ProgressReporter {
    last_emitted: f64,
    started: bool,
    finished: bool,
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter {
    pub fn new() -> Self {
        // Starting from zero puts the first emit at the 5% mark; a full
        // monotonic run then fits 20 progress lines plus start and terminal.
        Self {
            last_emitted: 0.0,
            started: false,
            finished: false,
        }
    }

    /// Emit the single `start` line.
    pub fn start<W: Write>(
        &mut self,
        writer: &mut ResponseWriter<W>,
        repo_id: &str,
        local_dir: &str,
    ) -> Result<(), LateralError> {
        if self.started || self.finished {
            return Ok(());
        }
        self.started = true;
        writer.write(&Response::DownloadStarted {
            repo_id: repo_id.to_string(),
            local_dir: local_dir.to_string(),
        })
    }

    /// Offer one raw update; writes a `progress` line only when the gate
    /// opens.
    pub fn update<W: Write>(
        &mut self,
        writer: &mut ResponseWriter<W>,
        current_file: &str,
        update: DownloadUpdate,
    ) -> Result<(), LateralError> {
        if self.finished {
            return Ok(());
        }
        let percentage = if update.total == 0 {
            0.0
        } else {
            update.downloaded as f64 / update.total as f64 * 100.0
        };
        let step_due = percentage - self.last_emitted >= PROGRESS_STEP;
        let tail_due = percentage >= TAIL_THRESHOLD && self.last_emitted < TAIL_THRESHOLD;
        if !step_due && !tail_due {
            return Ok(());
        }
        self.last_emitted = percentage;
        writer.write(&Response::Progress {
            downloaded: update.downloaded,
            total: update.total,
            percentage,
            current_file: current_file.to_string(),
            downloaded_files: update.downloaded_files,
            total_files: update.total_files,
        })
    }

    /// Build the terminal success response and seal the reporter.
    pub fn complete(&mut self, repo_id: &str, local_path: &str, size: u64) -> Response {
        self.finished = true;
        Response::DownloadComplete {
            repo_id: repo_id.to_string(),
            local_path: local_path.to_string(),
            size,
        }
    }

    /// Build the terminal error response and seal the reporter.
    pub fn fail(&mut self, message: impl Into<String>) -> Response {
        self.finished = true;
        Response::error(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(downloaded: u64, total: u64) -> DownloadUpdate {
        DownloadUpdate {
            downloaded,
            total,
            downloaded_files: 0,
            total_files: 1,
        }
    }

    fn emitted(out: &[u8]) -> Vec<serde_json::Value> {
        String::from_utf8(out.to_vec())
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn test_total_event_count_stays_within_bound() {
        let mut out = Vec::new();
        let mut writer = ResponseWriter::new(&mut out);
        let mut reporter = ProgressReporter::new();
        reporter.start(&mut writer, "org/model", "/tmp/m").unwrap();
        // one raw update per byte: 1000 updates, few survivors
        for i in 1..=1000u64 {
            reporter
                .update(&mut writer, "weights.bin", update(i, 1000))
                .unwrap();
        }
        let terminal = reporter.complete("org/model", "/tmp/m", 1000);
        writer.write(&terminal).unwrap();
        drop(writer);

        // start + throttled progress + terminal: at most ceil(100/5) + 2 lines
        let lines = emitted(&out);
        assert!(lines.len() <= 22, "got {} events, bound is 22", lines.len());
        assert_eq!(lines[0]["type"], "start");
        assert_eq!(lines.last().unwrap()["type"], "complete");
        let progress: Vec<_> = lines.iter().filter(|l| l["type"] == "progress").collect();
        // tail emit: the last progress line is at >= 99%
        let last_pct = progress.last().unwrap()["percentage"].as_f64().unwrap();
        assert!(last_pct >= 99.0);
    }

    #[test]
    fn test_awkward_percentages_stay_within_bound() {
        // updates landing just past each 5% step drift the gate upward;
        // the total must still fit the budget
        let mut out = Vec::new();
        let mut writer = ResponseWriter::new(&mut out);
        let mut reporter = ProgressReporter::new();
        reporter.start(&mut writer, "org/model", "/tmp/m").unwrap();
        for i in 0..20u64 {
            let downloaded = i * 52; // 0%, 5.2%, 10.4%, ..., 98.8%
            reporter
                .update(&mut writer, "f", update(downloaded, 1000))
                .unwrap();
        }
        reporter.update(&mut writer, "f", update(990, 1000)).unwrap();
        let terminal = reporter.complete("org/model", "/tmp/m", 1000);
        writer.write(&terminal).unwrap();
        drop(writer);
        let lines = emitted(&out);
        assert!(lines.len() <= 22, "got {} events, bound is 22", lines.len());
    }

    #[test]
    fn test_updates_below_first_step_are_suppressed() {
        let mut out = Vec::new();
        let mut writer = ResponseWriter::new(&mut out);
        let mut reporter = ProgressReporter::new();
        reporter.update(&mut writer, "f", update(1, 1000)).unwrap();
        reporter.update(&mut writer, "f", update(49, 1000)).unwrap();
        reporter.update(&mut writer, "f", update(50, 1000)).unwrap();
        drop(writer);
        let lines = emitted(&out);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["percentage"].as_f64().unwrap(), 5.0);
    }

    #[test]
    fn test_small_rises_are_suppressed() {
        let mut out = Vec::new();
        let mut writer = ResponseWriter::new(&mut out);
        let mut reporter = ProgressReporter::new();
        reporter.update(&mut writer, "f", update(10, 100)).unwrap();
        reporter.update(&mut writer, "f", update(11, 100)).unwrap();
        reporter.update(&mut writer, "f", update(14, 100)).unwrap();
        reporter.update(&mut writer, "f", update(15, 100)).unwrap();
        drop(writer);
        let lines = emitted(&out);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["percentage"].as_f64().unwrap(), 15.0);
    }

    #[test]
    fn test_zero_total_does_not_divide_by_zero() {
        // unknown total reads as 0%: no panic, and the gate stays shut
        let mut out = Vec::new();
        let mut writer = ResponseWriter::new(&mut out);
        let mut reporter = ProgressReporter::new();
        reporter.update(&mut writer, "f", update(50, 0)).unwrap();
        drop(writer);
        assert!(out.is_empty());
    }

    #[test]
    fn test_sealed_reporter_emits_nothing() {
        let mut out = Vec::new();
        let mut writer = ResponseWriter::new(&mut out);
        let mut reporter = ProgressReporter::new();
        let terminal = reporter.complete("org/model", "/tmp/m", 42);
        assert!(matches!(terminal, Response::DownloadComplete { .. }));
        reporter.start(&mut writer, "org/model", "/tmp/m").unwrap();
        reporter.update(&mut writer, "f", update(99, 100)).unwrap();
        drop(writer);
        assert!(out.is_empty());
    }

    #[test]
    fn test_fail_produces_error_response() {
        let mut reporter = ProgressReporter::new();
        let terminal = reporter.fail("network unreachable");
        match terminal {
            Response::Error { error } => assert_eq!(error, "network unreachable"),
            other => panic!("unexpected terminal: {other:?}"),
        }
    }
}
