// File: stats.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::check::Verdict;

/// Accumulated results of a run. Only ever appended to.
#[derive(Debug, Clone, Serialize)]
pub struct RunStats {
    started_at: DateTime<Utc>,
    run: usize,
    success: Vec<String>,
    failed: Vec<String>,
    skipped: Vec<String>,
    ignored: Vec<String>,
    forced_pass: Vec<String>,
    forced_fail: Vec<String>,
    run_time: BTreeMap<String, Duration>,
    total_time: Duration,
}

impl Default for RunStats {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStats {
    pub fn new() -> Self {
        RunStats {
            started_at: Utc::now(),
            run: 0,
            success: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
            ignored: Vec::new(),
            forced_pass: Vec::new(),
            forced_fail: Vec::new(),
            run_time: BTreeMap::new(),
            total_time: Duration::ZERO,
        }
    }

    pub fn add_result(&mut self, verdict: Verdict, title: &str, elapsed: Duration) {
        let list = match verdict {
            Verdict::Success => &mut self.success,
            Verdict::Failed => &mut self.failed,
            Verdict::Skipped => &mut self.skipped,
            Verdict::Ignored => &mut self.ignored,
            Verdict::ForcePass => &mut self.forced_pass,
            Verdict::ForceFail => &mut self.forced_fail,
        };
        list.push(title.to_string());

        if matches!(verdict, Verdict::Success | Verdict::Failed) {
            self.run += 1;
            self.total_time += elapsed;
            *self.run_time.entry(title.to_string()).or_default() += elapsed;
        }
    }

    pub fn count(&self, verdict: Verdict) -> usize {
        match verdict {
            Verdict::Success => self.success.len(),
            Verdict::Failed => self.failed.len(),
            Verdict::Skipped => self.skipped.len(),
            Verdict::Ignored => self.ignored.len(),
            Verdict::ForcePass => self.forced_pass.len(),
            Verdict::ForceFail => self.forced_fail.len(),
        }
    }

    /// Failed stages, forced failures included.
    pub fn total_failed(&self) -> usize {
        self.failed.len() + self.forced_fail.len()
    }

    pub fn failed_titles(&self) -> impl Iterator<Item = &str> {
        self.failed
            .iter()
            .chain(self.forced_fail.iter())
            .map(String::as_str)
    }

    pub fn run(&self) -> usize {
        self.run
    }

    pub fn total_time(&self) -> Duration {
        self.total_time
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn time_for(&self, title: &str) -> Option<Duration> {
        self.run_time.get(title).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_executed_stages_count_towards_run_time() {
        let mut stats = RunStats::new();
        stats.add_result(Verdict::Success, "920100-1", Duration::from_millis(10));
        stats.add_result(Verdict::Failed, "920100-2", Duration::from_millis(5));
        stats.add_result(Verdict::Skipped, "920100-3", Duration::ZERO);
        stats.add_result(Verdict::ForcePass, "920100-4", Duration::ZERO);

        assert_eq!(stats.run(), 2);
        assert_eq!(stats.total_time(), Duration::from_millis(15));
        assert_eq!(stats.time_for("920100-1"), Some(Duration::from_millis(10)));
        assert_eq!(stats.time_for("920100-3"), None);
    }

    #[test]
    fn test_forced_failures_are_failures() {
        let mut stats = RunStats::new();
        stats.add_result(Verdict::Failed, "a", Duration::ZERO);
        stats.add_result(Verdict::ForceFail, "b", Duration::ZERO);
        stats.add_result(Verdict::Ignored, "c", Duration::ZERO);

        assert_eq!(stats.total_failed(), 2);
        assert_eq!(stats.failed_titles().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(stats.count(Verdict::Ignored), 1);
    }

    #[test]
    fn test_multi_stage_test_accumulates_time() {
        let mut stats = RunStats::new();
        stats.add_result(Verdict::Success, "multi", Duration::from_millis(3));
        stats.add_result(Verdict::Success, "multi", Duration::from_millis(4));

        assert_eq!(stats.count(Verdict::Success), 2);
        assert_eq!(stats.time_for("multi"), Some(Duration::from_millis(7)));
    }
}
