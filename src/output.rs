// File: output.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use clap::ValueEnum;
use colored::*;
use log::warn;
use std::time::Duration;

use crate::check::Verdict;
use crate::stats::RunStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputMode {
    #[default]
    Normal,
    Quiet,
    Json,
}

/// Human-oriented progress lines and the end-of-run summary.
#[derive(Debug, Clone, Copy)]
pub struct Output {
    mode: OutputMode,
    show_only_failed: bool,
    show_time: bool,
}

impl Output {
    pub fn new(mode: OutputMode, show_only_failed: bool, show_time: bool) -> Self {
        Self {
            mode,
            show_only_failed,
            show_time,
        }
    }

    pub fn quiet() -> Self {
        Self::new(OutputMode::Quiet, false, false)
    }

    fn normal(&self) -> bool {
        self.mode == OutputMode::Normal
    }

    fn verbose(&self) -> bool {
        self.normal() && !self.show_only_failed
    }

    pub fn starting(&self) {
        if self.verbose() {
            println!("{}", "** Running tests".bold());
        }
    }

    pub fn file_header(&self, name: &str) {
        if self.verbose() {
            println!("{} {}", "=> executing tests in file".blue().bold(), name);
        }
    }

    pub fn skipped(&self, title: &str, enabled: bool) {
        if self.verbose() && !enabled {
            println!("\tskipping {} - (enabled: false) in file.", title);
        }
    }

    pub fn running(&self, title: &str) {
        if self.verbose() {
            println!("\trunning {}", title);
        }
    }

    pub fn stage_result(&self, verdict: Verdict, stage_time: Duration, round_trip: Duration) {
        if !self.normal() {
            return;
        }
        let timing = if self.show_time {
            format!(" in {:?} (RTT {:?})", stage_time, round_trip)
        } else {
            String::new()
        };
        match verdict {
            Verdict::Success if !self.show_only_failed => {
                println!("\t\t{}{}", "+ passed".green(), timing)
            }
            Verdict::Failed => println!("\t\t{}{}", "- failed".red().bold(), timing),
            Verdict::Ignored if !self.show_only_failed => {
                println!("\t\t{}", "ℹ test ignored".blue())
            }
            Verdict::ForceFail => println!("\t\t{}", "ℹ test forced to fail".yellow()),
            Verdict::ForcePass if !self.show_only_failed => {
                println!("\t\t{}", "ℹ test forced to pass".blue())
            }
            _ => {}
        }
    }

    pub fn summary(&self, stats: &RunStats) {
        match self.mode {
            OutputMode::Quiet => {}
            OutputMode::Json => match serde_json::to_string_pretty(stats) {
                Ok(json) => println!("{}", json),
                Err(e) => warn!("Failed to serialize run statistics: {}", e),
            },
            OutputMode::Normal => {
                println!();
                println!(
                    "{} Ran {} stages in {:.2}s (started {}).",
                    "➕".bold(),
                    stats.run(),
                    stats.total_time().as_secs_f64(),
                    stats.started_at().format("%Y-%m-%d %H:%M:%S")
                );
                println!(
                    "   {} passed, {} failed, {} skipped, {} ignored, {} forced pass, {} forced fail",
                    stats.count(Verdict::Success).to_string().green(),
                    stats.count(Verdict::Failed).to_string().red(),
                    stats.count(Verdict::Skipped),
                    stats.count(Verdict::Ignored),
                    stats.count(Verdict::ForcePass),
                    stats.count(Verdict::ForceFail).to_string().yellow(),
                );
                if stats.total_failed() > 0 {
                    let titles: Vec<&str> = stats.failed_titles().collect();
                    println!("{} {}", "⚠ failed tests:".red().bold(), titles.join(", "));
                } else {
                    println!("{}", "✓ All tests successful!".green().bold());
                }
            }
        }
    }
}
