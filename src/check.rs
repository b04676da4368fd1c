// File: check.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use log::{debug, trace};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::{ForcedResult, Overrides};
use crate::definition::Expectation;
use crate::error::{FtwError, FtwResult, TransportError};
use crate::httpinner::Response;
use crate::waflog::WafLog;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verdict {
    Success,
    Failed,
    Skipped,
    Ignored,
    ForceFail,
    ForcePass,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Success => write!(f, "success"),
            Verdict::Failed => write!(f, "failed"),
            Verdict::Skipped => write!(f, "skipped"),
            Verdict::Ignored => write!(f, "ignored"),
            Verdict::ForceFail => write!(f, "forced fail"),
            Verdict::ForcePass => write!(f, "forced pass"),
        }
    }
}

impl From<ForcedResult> for Verdict {
    fn from(forced: ForcedResult) -> Self {
        match forced {
            ForcedResult::Ignore => Verdict::Ignored,
            ForcedResult::ForceFail => Verdict::ForceFail,
            ForcedResult::ForcePass => Verdict::ForcePass,
        }
    }
}

#[derive(Debug, Default)]
struct CompiledExpectation {
    status: Vec<u16>,
    response_contains: Option<Regex>,
    log_contains: Option<regex::bytes::Regex>,
    no_log_contains: Option<regex::bytes::Regex>,
    expect_error: bool,
}

fn compile<T>(
    field: &str,
    pattern: Option<&str>,
    build: impl Fn(&str) -> Result<T, regex::Error>,
) -> FtwResult<Option<T>> {
    pattern
        .filter(|p| !p.is_empty())
        .map(|p| {
            build(p).map_err(|e| {
                FtwError::Definition(format!("invalid {} pattern '{}': {}", field, p, e))
            })
        })
        .transpose()
}

/// Per-stage evidence checker: holds the expectation, the log markers and the
/// override tables.
pub struct Check<'a> {
    overrides: &'a Overrides,
    log: Option<&'a WafLog>,
    cloud_mode: bool,
    expected: CompiledExpectation,
    start_marker: Option<Vec<u8>>,
    end_marker: Option<Vec<u8>>,
}

impl<'a> Check<'a> {
    pub fn new(overrides: &'a Overrides, log: Option<&'a WafLog>, cloud_mode: bool) -> Self {
        Self {
            overrides,
            log,
            cloud_mode,
            expected: CompiledExpectation::default(),
            start_marker: None,
            end_marker: None,
        }
    }

    pub fn set_expect_test_output(&mut self, expectation: &Expectation) -> FtwResult<()> {
        self.expected = CompiledExpectation {
            status: expectation.status.clone(),
            response_contains: compile(
                "response_contains",
                expectation.response_contains.as_deref(),
                Regex::new,
            )?,
            log_contains: compile(
                "log_contains",
                expectation.log_contains.as_deref(),
                regex::bytes::Regex::new,
            )?,
            no_log_contains: compile(
                "no_log_contains",
                expectation.no_log_contains.as_deref(),
                regex::bytes::Regex::new,
            )?,
            expect_error: expectation.expect_error,
        };
        Ok(())
    }

    pub fn set_start_marker(&mut self, marker: Option<Vec<u8>>) {
        self.start_marker = marker;
    }

    pub fn set_end_marker(&mut self, marker: Option<Vec<u8>>) {
        self.end_marker = marker;
    }

    pub fn cloud_mode(&self) -> bool {
        self.cloud_mode
    }

    /// Without log access, log expectations become status expectations:
    /// a rule that should log is expected to block with 403, a rule that
    /// should stay silent is expected to let the request through.
    pub fn set_cloud_mode(&mut self) {
        if self.expected.log_contains.take().is_some() {
            self.expected.status.push(403);
            self.expected.no_log_contains = None;
        } else if self.expected.no_log_contains.take().is_some() {
            self.expected.status.extend([200, 404, 405]);
        }
    }

    pub fn forced_result(&self, title: &str) -> Option<Verdict> {
        self.overrides.lookup(title).map(|(forced, reason)| {
            debug!("Test '{}' overridden ({:?}): {}", title, forced, reason);
            Verdict::from(forced)
        })
    }

    pub fn assert_expect_error(&self) -> bool {
        self.expected.expect_error
    }

    pub fn assert_status(&self, status: u16) -> bool {
        self.expected.status.contains(&status)
    }

    pub fn assert_response_contains(&self, body: &str) -> bool {
        self.expected
            .response_contains
            .as_ref()
            .is_some_and(|re| re.is_match(body))
    }

    pub fn assert_log_contains(&self) -> bool {
        match (&self.expected.log_contains, self.marked_region()) {
            (Some(re), Some((log, start, end))) => log.contains(re, start, end),
            _ => false,
        }
    }

    /// Only meaningful with both markers present: an unbracketed region proves nothing.
    pub fn assert_no_log_contains(&self) -> bool {
        match (&self.expected.no_log_contains, self.marked_region()) {
            (Some(re), Some((log, start, end))) => !log.contains(re, start, end),
            _ => false,
        }
    }

    fn marked_region(&self) -> Option<(&WafLog, &[u8], &[u8])> {
        match (self.log, &self.start_marker, &self.end_marker) {
            (Some(log), Some(start), Some(end)) => Some((log, start.as_slice(), end.as_slice())),
            _ => None,
        }
    }
}

/// Resolves a stage that was actually executed. First matching rule wins.
pub fn check_result(
    check: &mut Check<'_>,
    response: Option<&Response>,
    error: Option<&TransportError>,
) -> Verdict {
    if let Some(e) = error {
        if check.assert_expect_error() {
            trace!("Expected error received: {}", e);
            return Verdict::Success;
        }
        return Verdict::Failed;
    }

    if check.cloud_mode() {
        check.set_cloud_mode();
    }

    if let Some(response) = response {
        if check.assert_status(response.status()) {
            return Verdict::Success;
        }
        if check.assert_response_contains(&response.body_as_string()) {
            return Verdict::Success;
        }
    }

    if check.assert_log_contains() {
        return Verdict::Success;
    }
    if check.assert_no_log_contains() {
        return Verdict::Success;
    }

    Verdict::Failed
}

#[cfg(test)]
#[path = "check_tests.rs"]
mod tests;
