// File: cli.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use clap::{Args, Parser, Subcommand};
use regex::Regex;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{FtwConfig, RunMode, RunnerConfig};
use crate::error::{FtwError, FtwResult};
use crate::output::OutputMode;

#[derive(Parser, Debug)]
#[command(
    name = env!("CARGO_PKG_NAME"),
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS"),
    about = env!("CARGO_PKG_DESCRIPTION"),
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(
        long = "config",
        help = "YAML configuration file",
        global = true
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long = "log-file",
        help = "WAF log file, overrides the configured one",
        global = true
    )]
    pub log_file: Option<PathBuf>,

    #[arg(
        long = "cloud",
        help = "Judge by responses only, without reading WAF logs",
        global = true
    )]
    pub cloud: bool,

    #[arg(long = "log-level", default_value = "warn", global = true)]
    pub log_level: String,

    #[arg(long = "no-color", help = "Disable colored output", global = true)]
    pub no_color: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Replay test definitions against the WAF
    Run(RunArgs),
    /// Load and validate test definitions without sending traffic
    Check(CheckArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[arg(short = 'd', long = "dir", default_value = ".")]
    pub dir: PathBuf,

    #[arg(short = 'i', long = "include", help = "Only run tests whose title matches")]
    pub include: Option<String>,

    #[arg(short = 'e', long = "exclude", help = "Skip tests whose title matches")]
    pub exclude: Option<String>,

    #[arg(short = 't', long = "time", help = "Show time spent per stage")]
    pub show_time: bool,

    #[arg(long = "show-failures-only")]
    pub show_failures_only: bool,

    #[arg(
        long = "connect-timeout",
        default_value_t = 3000,
        help = "Connect timeout in milliseconds"
    )]
    pub connect_timeout: u64,

    #[arg(
        long = "read-timeout",
        default_value_t = 1000,
        help = "Read timeout in milliseconds"
    )]
    pub read_timeout: u64,

    #[arg(long = "max-marker-retries")]
    pub max_marker_retries: Option<usize>,

    #[arg(long = "max-marker-log-lines")]
    pub max_marker_log_lines: Option<usize>,

    #[arg(long = "output", value_enum, default_value_t = OutputMode::Normal)]
    pub output: OutputMode,
}

#[derive(Args, Debug)]
pub struct CheckArgs {
    #[arg(short = 'd', long = "dir", default_value = ".")]
    pub dir: PathBuf,
}

impl Cli {
    /// Applies global flags on top of the loaded configuration.
    pub fn apply_to(&self, ftw: &mut FtwConfig) {
        if let Some(log_file) = &self.log_file {
            ftw.logfile = Some(log_file.clone());
        }
        if self.cloud {
            ftw.mode = RunMode::Cloud;
        }
    }
}

impl RunArgs {
    /// Command line values win over the configuration file, which wins over
    /// built-in defaults.
    pub fn runner_config(&self, ftw: &FtwConfig) -> FtwResult<RunnerConfig> {
        let mut config = RunnerConfig::new();
        config.set_include(compile_filter("include", self.include.as_deref())?);
        config.set_exclude(compile_filter("exclude", self.exclude.as_deref())?);
        config.set_show_time(self.show_time);
        config.set_show_only_failed(self.show_failures_only);
        config.set_connect_timeout(Duration::from_millis(self.connect_timeout));
        config.set_read_timeout(Duration::from_millis(self.read_timeout));
        if let Some(retries) = self.max_marker_retries.or(ftw.maxmarkerretries) {
            config.set_max_marker_retries(retries);
        }
        if let Some(lines) = self.max_marker_log_lines.or(ftw.maxmarkerloglines) {
            config.set_max_marker_log_lines(lines);
        }
        config.validate()?;
        Ok(config)
    }
}

fn compile_filter(name: &str, pattern: Option<&str>) -> FtwResult<Option<Regex>> {
    pattern
        .filter(|p| !p.is_empty())
        .map(|p| {
            Regex::new(p).map_err(|e| {
                FtwError::Configuration(format!("invalid {} pattern '{}': {}", name, p, e))
            })
        })
        .transpose()
}
