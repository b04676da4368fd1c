// File: main.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use colored::*;
use log::{info, LevelFilter};
use simple_logger::SimpleLogger;
use std::str::FromStr;

use wafreplay::check::Verdict;
use wafreplay::cli::{CheckArgs, Cli, Commands, RunArgs};
use wafreplay::config::FtwConfig;
use wafreplay::definition::load_tests;
use wafreplay::output::Output;
use wafreplay::runner;

fn init_logging(level: &str) -> Result<()> {
    let level = LevelFilter::from_str(level)
        .map_err(|_| anyhow!("unknown log level '{}'", level))?;
    SimpleLogger::new()
        .with_level(level)
        .init()
        .context("failed to initialize logger")
}

fn load_config(cli: &Cli) -> Result<FtwConfig> {
    let mut ftw = match &cli.config {
        Some(path) => FtwConfig::from_file(path)
            .with_context(|| format!("failed to load configuration {}", path.display()))?,
        None => FtwConfig::default(),
    };
    cli.apply_to(&mut ftw);
    Ok(ftw)
}

async fn run(ftw: &FtwConfig, args: &RunArgs) -> Result<()> {
    let config = args.runner_config(ftw)?;
    let output = Output::new(args.output, config.show_only_failed(), config.show_time());

    let tests = load_tests(&args.dir)
        .with_context(|| format!("failed to load tests from {}", args.dir.display()))?;
    info!("Loaded {} test files from {}", tests.len(), args.dir.display());

    let ctx = runner::run(ftw, &tests, config, output).await?;
    let stats = ctx.stats();
    if stats.total_failed() > 0 {
        bail!(
            "failed {} tests ({} failed, {} forced to fail)",
            stats.total_failed(),
            stats.count(Verdict::Failed),
            stats.count(Verdict::ForceFail)
        );
    }
    Ok(())
}

fn check(args: &CheckArgs) -> Result<()> {
    let tests = load_tests(&args.dir)
        .with_context(|| format!("failed to load tests from {}", args.dir.display()))?;
    let stages = runner::validate_tests(&tests)?;
    println!(
        "{} {} files, {} stages",
        "✓ definitions ok:".green().bold(),
        tests.len(),
        stages
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;
    if cli.no_color {
        colored::control::set_override(false);
    }

    match &cli.command {
        Commands::Run(args) => {
            let ftw = load_config(&cli)?;
            run(&ftw, args).await
        }
        Commands::Check(args) => check(args),
    }
}
