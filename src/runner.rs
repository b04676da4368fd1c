// File: runner.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use log::{debug, info, warn};
use regex::Regex;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::check::{check_result, Check, Verdict};
use crate::config::{FtwConfig, InputOverride, Overrides, RunnerConfig};
use crate::definition::{FtwTest, Input, Stage, TestCase};
use crate::error::{FtwError, FtwResult};
use crate::http::{Client, ClientConfig};
use crate::marker::{mark_and_flush, MarkerSettings};
use crate::output::Output;
use crate::request::{build_request, RequestSpec};
use crate::stats::RunStats;
use crate::waflog::WafLog;

/// State of one run. Owned by the orchestrator and handed to each stage by
/// mutable reference; stages never run concurrently.
pub struct RunContext {
    config: RunnerConfig,
    client: Client,
    log: Option<WafLog>,
    overrides: Overrides,
    input_override: InputOverride,
    markers: MarkerSettings,
    cloud_mode: bool,
    output: Output,
    stats: RunStats,
    result: Option<Verdict>,
}

impl RunContext {
    pub fn new(ftw: &FtwConfig, config: RunnerConfig, output: Output) -> FtwResult<Self> {
        config.validate()?;

        let cloud_mode = ftw.is_cloud_mode();
        let log = match (&ftw.logfile, cloud_mode) {
            (_, true) => None,
            (Some(path), false) => Some(WafLog::open(path)?),
            (None, false) => {
                return Err(FtwError::Configuration(
                    "no WAF log file configured; set logfile or use cloud mode".to_string(),
                ))
            }
        };

        let client = Client::new(ClientConfig {
            connect_timeout: config.connect_timeout(),
            read_timeout: config.read_timeout(),
        })?;
        let markers = MarkerSettings {
            header_name: ftw.logmarkerheadername.clone(),
            max_retries: config.max_marker_retries(),
            max_log_lines: config.max_marker_log_lines(),
        };

        Ok(Self {
            overrides: ftw.overrides()?,
            input_override: ftw.testoverride.input.clone(),
            config,
            client,
            log,
            markers,
            cloud_mode,
            output,
            stats: RunStats::new(),
            result: None,
        })
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    /// Verdict of the most recently executed stage.
    pub fn last_result(&self) -> Option<Verdict> {
        self.result
    }

    pub fn is_cloud_mode(&self) -> bool {
        self.cloud_mode
    }

    fn record(&mut self, verdict: Verdict, title: &str, stage_time: Duration, rtt: Duration) {
        self.stats.add_result(verdict, title, stage_time);
        self.result = Some(verdict);
        self.output.stage_result(verdict, stage_time, rtt);
    }
}

/// Runs every test in definition order and prints the summary. Fatal errors
/// abort the whole run.
pub async fn run(
    ftw: &FtwConfig,
    tests: &[FtwTest],
    config: RunnerConfig,
    output: Output,
) -> FtwResult<RunContext> {
    let mut ctx = RunContext::new(ftw, config, output)?;
    ctx.output.starting();
    info!(
        "Running {} test files{}",
        tests.len(),
        if ctx.cloud_mode { " in cloud mode" } else { "" }
    );

    for test in tests {
        run_test(&mut ctx, test).await?;
    }

    ctx.client.close();
    ctx.output.summary(&ctx.stats);
    Ok(ctx)
}

pub async fn run_test(ctx: &mut RunContext, test: &FtwTest) -> FtwResult<()> {
    let mut announced = false;

    for case in &test.tests {
        if need_to_skip_test(
            ctx.config.include(),
            ctx.config.exclude(),
            &case.title,
            test.meta.enabled,
        ) {
            ctx.stats.add_result(Verdict::Skipped, &case.title, Duration::ZERO);
            ctx.output.skipped(&case.title, test.meta.enabled);
            continue;
        }

        if !announced {
            ctx.output.file_header(&test.meta.name);
            announced = true;
        }
        ctx.output.running(&case.title);

        for entry in &case.stages {
            run_stage(ctx, case, &entry.stage).await?;
        }
    }

    Ok(())
}

/// Executes one stage: override lookup, request build, start marker, request,
/// end marker, evidence check.
pub async fn run_stage(ctx: &mut RunContext, case: &TestCase, stage: &Stage) -> FtwResult<Verdict> {
    let stage_start = Instant::now();
    let stage_id = Uuid::new_v4().to_string();
    let expectation = &stage.expectation;

    let mut input = stage.input.clone();
    apply_input_override(&ctx.input_override, &mut input);

    let request = build_request(&input).map_err(|e| match e {
        FtwError::Definition(msg) => FtwError::Definition(format!("{}: {}", case.title, msg)),
        other => other,
    })?;

    let mut check = Check::new(&ctx.overrides, ctx.log.as_ref(), ctx.cloud_mode);
    if let Some(verdict) = check.forced_result(&case.title) {
        ctx.record(verdict, &case.title, Duration::ZERO, Duration::ZERO);
        return Ok(verdict);
    }
    check
        .set_expect_test_output(expectation)
        .map_err(|e| match e {
            FtwError::Definition(msg) => FtwError::Definition(format!("{}: {}", case.title, msg)),
            other => other,
        })?;

    let destination = input.destination();
    debug!("Stage {} of '{}' against {}", stage_id, case.title, destination);

    let mut start_marker = None;
    if let Some(log) = ctx.log.as_ref() {
        match mark_and_flush(&mut ctx.client, log, &ctx.markers, &destination, &stage_id, None)
            .await
        {
            Ok(marker) => start_marker = Some(marker),
            Err(e) if expectation.expect_error => {
                debug!("Start marker not found, error was expected: {}", e)
            }
            Err(e) => {
                warn!("Stage {} of '{}': start marker failed", stage_id, case.title);
                return Err(e.in_stage(&stage_id, &case.title));
            }
        }
    }
    check.set_start_marker(start_marker.clone());

    let mut response = None;
    let mut transport_error = None;
    match ctx.client.new_connection(&destination).await {
        Ok(()) => {
            ctx.client.start_tracking_time();
            let result = ctx.client.send(&request).await;
            ctx.client.stop_tracking_time();
            match result {
                Ok(r) => response = Some(r),
                Err(e) => transport_error = Some(e),
            }
        }
        Err(e) => transport_error = Some(e),
    }

    if let Some(e) = &transport_error {
        if !expectation.expect_error {
            warn!("Stage {} of '{}' aborted the run", stage_id, case.title);
            return Err(FtwError::Transport(e.clone()).in_stage(&stage_id, &case.title));
        }
        debug!("Expected transport error: {}", e);
    }
    // a raw request may leave the connection in an undefined state
    if request.is_raw() {
        ctx.client.close();
    }

    if let Some(log) = ctx.log.as_ref() {
        let previous = start_marker.as_deref();
        match mark_and_flush(&mut ctx.client, log, &ctx.markers, &destination, &stage_id, previous)
            .await
        {
            Ok(marker) => check.set_end_marker(Some(marker)),
            Err(e) if expectation.expect_error => {
                debug!("End marker not found, error was expected: {}", e)
            }
            Err(e) => {
                warn!("Stage {} of '{}': end marker failed", stage_id, case.title);
                return Err(e.in_stage(&stage_id, &case.title));
            }
        }
    }

    let verdict = check_result(&mut check, response.as_ref(), transport_error.as_ref());
    let rtt = if response.is_some() {
        ctx.client.round_trip_time().round_trip_duration()
    } else {
        Duration::ZERO
    };
    ctx.record(verdict, &case.title, stage_start.elapsed(), rtt);
    Ok(verdict)
}

/// Validates every stage of the loaded tests without sending traffic and
/// returns the number of stages checked.
pub fn validate_tests(tests: &[FtwTest]) -> FtwResult<usize> {
    let overrides = Overrides::default();
    let mut stages = 0;
    for test in tests {
        for case in &test.tests {
            for entry in &case.stages {
                let stage = &entry.stage;
                let mut check = Check::new(&overrides, None, false);
                RequestSpec::from_input(&stage.input)
                    .and_then(|_| check.set_expect_test_output(&stage.expectation))
                    .map_err(|e| match e {
                        FtwError::Definition(msg) => {
                            FtwError::Definition(format!("{}: {}", case.title, msg))
                        }
                        other => other,
                    })?;
                stages += 1;
            }
        }
    }
    Ok(stages)
}

/// Include always wins, over both the disabled flag and exclusion.
pub fn need_to_skip_test(
    include: Option<&Regex>,
    exclude: Option<&Regex>,
    title: &str,
    enabled: bool,
) -> bool {
    if let Some(include) = include {
        return !include.is_match(title);
    }
    if !enabled {
        return true;
    }
    exclude.is_some_and(|exclude| exclude.is_match(title))
}

/// Forces the configured destination onto a stage input.
pub fn apply_input_override(overrides: &InputOverride, input: &mut Input) {
    if let Some(port) = overrides.port {
        input.port = Some(port);
    }
    if let Some(dest_addr) = &overrides.dest_addr {
        input.dest_addr = Some(dest_addr.clone());
        if !input.headers.contains("Host") {
            input.headers.set("Host", dest_addr.clone());
        }
    }
    if let Some(protocol) = &overrides.protocol {
        input.protocol = Some(protocol.clone());
    }
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
