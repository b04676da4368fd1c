// File: config.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use log::debug;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{FtwError, FtwResult};

pub const DEFAULT_LOG_MARKER_HEADER: &str = "X-CRS-Test";
pub const DEFAULT_MAX_MARKER_RETRIES: usize = 20;
pub const DEFAULT_MAX_MARKER_LOG_LINES: usize = 500;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    #[default]
    Default,
    /// No access to WAF logs; verdicts rely on responses only.
    Cloud,
}

/// Destination fields forced onto every stage input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputOverride {
    #[serde(default)]
    pub dest_addr: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub protocol: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestOverride {
    #[serde(default)]
    pub input: InputOverride,
    /// Test title regex -> reason.
    #[serde(default)]
    pub ignore: BTreeMap<String, String>,
    #[serde(default)]
    pub forcepass: BTreeMap<String, String>,
    #[serde(default)]
    pub forcefail: BTreeMap<String, String>,
}

/// Persisted configuration, normally read from a YAML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FtwConfig {
    #[serde(default)]
    pub logfile: Option<PathBuf>,
    #[serde(default = "default_marker_header")]
    pub logmarkerheadername: String,
    #[serde(default)]
    pub mode: RunMode,
    #[serde(default)]
    pub testoverride: TestOverride,
    #[serde(default)]
    pub maxmarkerretries: Option<usize>,
    #[serde(default)]
    pub maxmarkerloglines: Option<usize>,
}

fn default_marker_header() -> String {
    DEFAULT_LOG_MARKER_HEADER.to_string()
}

impl Default for FtwConfig {
    fn default() -> Self {
        Self {
            logfile: None,
            logmarkerheadername: default_marker_header(),
            mode: RunMode::Default,
            testoverride: TestOverride::default(),
            maxmarkerretries: None,
            maxmarkerloglines: None,
        }
    }
}

impl FtwConfig {
    pub fn from_yaml(source: &str) -> FtwResult<Self> {
        serde_yaml::from_str(source).map_err(|e| FtwError::Yaml {
            file: "<config>".to_string(),
            source: e,
        })
    }

    pub fn from_file(path: &Path) -> FtwResult<Self> {
        debug!("Loading configuration from {}", path.display());
        let source = fs::read_to_string(path)?;
        serde_yaml::from_str(&source).map_err(|e| FtwError::Yaml {
            file: path.display().to_string(),
            source: e,
        })
    }

    pub fn is_cloud_mode(&self) -> bool {
        self.mode == RunMode::Cloud
    }

    pub fn overrides(&self) -> FtwResult<Overrides> {
        Overrides::compile(&self.testoverride)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForcedResult {
    Ignore,
    ForceFail,
    ForcePass,
}

/// Compiled override tables, looked up by test title.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    ignore: Vec<(Regex, String)>,
    force_fail: Vec<(Regex, String)>,
    force_pass: Vec<(Regex, String)>,
}

impl Overrides {
    pub fn compile(table: &TestOverride) -> FtwResult<Self> {
        Ok(Self {
            ignore: compile_table("ignore", &table.ignore)?,
            force_fail: compile_table("forcefail", &table.forcefail)?,
            force_pass: compile_table("forcepass", &table.forcepass)?,
        })
    }

    /// Ignore wins over ForceFail, which wins over ForcePass.
    pub fn lookup(&self, title: &str) -> Option<(ForcedResult, &str)> {
        if let Some(reason) = find_reason(&self.ignore, title) {
            return Some((ForcedResult::Ignore, reason));
        }
        if let Some(reason) = find_reason(&self.force_fail, title) {
            return Some((ForcedResult::ForceFail, reason));
        }
        find_reason(&self.force_pass, title).map(|reason| (ForcedResult::ForcePass, reason))
    }

    pub fn is_empty(&self) -> bool {
        self.ignore.is_empty() && self.force_fail.is_empty() && self.force_pass.is_empty()
    }
}

fn find_reason<'a>(table: &'a [(Regex, String)], title: &str) -> Option<&'a str> {
    table
        .iter()
        .find(|(re, _)| re.is_match(title))
        .map(|(_, reason)| reason.as_str())
}

fn compile_table(
    name: &str,
    table: &BTreeMap<String, String>,
) -> FtwResult<Vec<(Regex, String)>> {
    table
        .iter()
        .map(|(pattern, reason)| {
            Regex::new(pattern)
                .map(|re| (re, reason.clone()))
                .map_err(|e| {
                    FtwError::Configuration(format!(
                        "invalid {} override '{}': {}",
                        name, pattern, e
                    ))
                })
        })
        .collect()
}

/// Per-run knobs supplied on the command line.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    include: Option<Regex>,
    exclude: Option<Regex>,
    show_time: bool,
    show_only_failed: bool,
    connect_timeout: Duration,
    read_timeout: Duration,
    max_marker_retries: usize,
    max_marker_log_lines: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl RunnerConfig {
    pub fn new() -> Self {
        Self {
            include: None,
            exclude: None,
            show_time: false,
            show_only_failed: false,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            max_marker_retries: DEFAULT_MAX_MARKER_RETRIES,
            max_marker_log_lines: DEFAULT_MAX_MARKER_LOG_LINES,
        }
    }

    /// Include and exclude patterns are mutually exclusive.
    pub fn validate(&self) -> FtwResult<()> {
        if let (Some(include), Some(exclude)) = (&self.include, &self.exclude) {
            return Err(FtwError::Configuration(format!(
                "you need to choose one: use include ({}) or exclude ({})",
                include, exclude
            )));
        }
        if self.max_marker_retries == 0 {
            return Err(FtwError::Configuration(
                "max marker retries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn set_include(&mut self, include: Option<Regex>) {
        self.include = include;
    }

    pub fn include(&self) -> Option<&Regex> {
        self.include.as_ref()
    }

    pub fn set_exclude(&mut self, exclude: Option<Regex>) {
        self.exclude = exclude;
    }

    pub fn exclude(&self) -> Option<&Regex> {
        self.exclude.as_ref()
    }

    pub fn set_show_time(&mut self, show_time: bool) {
        self.show_time = show_time;
    }

    pub fn show_time(&self) -> bool {
        self.show_time
    }

    pub fn set_show_only_failed(&mut self, show_only_failed: bool) {
        self.show_only_failed = show_only_failed;
    }

    pub fn show_only_failed(&self) -> bool {
        self.show_only_failed
    }

    pub fn set_connect_timeout(&mut self, connect_timeout: Duration) {
        self.connect_timeout = connect_timeout;
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn set_read_timeout(&mut self, read_timeout: Duration) {
        self.read_timeout = read_timeout;
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    pub fn set_max_marker_retries(&mut self, max_marker_retries: usize) {
        self.max_marker_retries = max_marker_retries;
    }

    pub fn max_marker_retries(&self) -> usize {
        self.max_marker_retries
    }

    pub fn set_max_marker_log_lines(&mut self, max_marker_log_lines: usize) {
        self.max_marker_log_lines = max_marker_log_lines;
    }

    pub fn max_marker_log_lines(&self) -> usize {
        self.max_marker_log_lines
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
