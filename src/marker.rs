// File: marker.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

//! Correlates a stage with the WAF log. A cheap probe request carrying the
//! stage id in a marker header is sent before and after the stage's own
//! request; the log line recording each probe brackets the stage's log region.

use log::{debug, trace};

use crate::error::{FtwError, FtwResult};
use crate::http::{Client, Destination};
use crate::request::{Header, Request, RequestLine};
use crate::waflog::WafLog;

/// `/status/200` is cheap on the httpbin backends WAF test setups usually run.
pub const MARKER_PROBE_URI: &str = "/status/200";
pub const MARKER_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), " test agent");

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerSettings {
    pub header_name: String,
    pub max_retries: usize,
    pub max_log_lines: usize,
}

pub fn marker_request(header_name: &str, stage_id: &str) -> Request {
    let line = RequestLine {
        method: "GET".to_string(),
        uri: MARKER_PROBE_URI.to_string(),
        version: "HTTP/1.1".to_string(),
    };
    let headers: Header = [
        ("Accept", "*/*"),
        ("User-Agent", MARKER_USER_AGENT),
        ("Host", "localhost"),
        (header_name, stage_id),
    ]
    .into_iter()
    .collect();
    Request::new(line, headers, Vec::new(), true)
}

/// Sends marker probes until the stage id shows up in the log, at most
/// `max_retries` times. Every attempt sends a new probe, because some log
/// sinks only flush when new traffic arrives.
///
/// Both markers of a stage carry the same id. When searching for the end
/// marker, pass the start marker line as `previous`; a match equal to it is
/// not accepted and the next attempt sends another probe.
pub async fn mark_and_flush(
    client: &mut Client,
    log: &WafLog,
    settings: &MarkerSettings,
    destination: &Destination,
    stage_id: &str,
    previous: Option<&[u8]>,
) -> FtwResult<Vec<u8>> {
    let request = marker_request(&settings.header_name, stage_id);

    for attempt in 1..=settings.max_retries {
        client.new_or_reused_connection(destination).await?;
        let response = client.send(&request).await?;
        trace!(
            "Marker probe {} for stage {} answered with {}",
            attempt,
            stage_id,
            response.status()
        );

        match log.check_log_for_marker(stage_id, settings.max_log_lines) {
            Some(marker) if previous == Some(marker.as_slice()) => {
                trace!("Latest line for stage {} is still the start marker", stage_id);
            }
            Some(marker) => {
                debug!("Found marker for stage {} after {} probe(s)", stage_id, attempt);
                return Ok(marker);
            }
            None => {}
        }
    }

    Err(FtwError::MarkerNotFound {
        stage_id: stage_id.to_string(),
        destination: destination.to_string(),
        log_file: log.path().to_path_buf(),
    })
}

#[cfg(test)]
#[path = "marker_tests.rs"]
mod tests;
