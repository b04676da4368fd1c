// File: httpinner.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::request::Header;

/// Parsed view of an HTTP response: status line, headers and decoded body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpInner {
    version: String,
    status: u16,
    reason: String,
    headers: Header,
    body: Vec<u8>,
}

impl HttpInner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_with_all(
        version: String,
        status: u16,
        reason: String,
        headers: Header,
        body: Vec<u8>,
    ) -> Self {
        HttpInner {
            version,
            status,
            reason,
            headers,
            body,
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn headers(&self) -> &Header {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn body_as_string(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn set_body(&mut self, body: Vec<u8>) {
        self.body = body;
    }

    /// Whether the server left the connection open for another request.
    pub fn keeps_alive(&self) -> bool {
        let connection = self
            .headers
            .get("Connection")
            .map(|v| v.to_ascii_lowercase())
            .unwrap_or_default();
        if connection.contains("close") {
            return false;
        }
        if self.version.eq_ignore_ascii_case("HTTP/1.0") {
            return connection.contains("keep-alive");
        }
        true
    }

    pub(crate) fn framing(&self, request_method: &str) -> Result<BodyFraming, String> {
        if request_method.eq_ignore_ascii_case("HEAD")
            || (100..200).contains(&self.status)
            || self.status == 204
            || self.status == 304
        {
            return Ok(BodyFraming::Empty);
        }

        if let Some(te) = self.headers.get("Transfer-Encoding") {
            if te
                .rsplit(',')
                .next()
                .is_some_and(|last| last.trim().eq_ignore_ascii_case("chunked"))
            {
                return Ok(BodyFraming::Chunked);
            }
            return Ok(BodyFraming::UntilClose);
        }

        match self.headers.get("Content-Length") {
            Some(value) => value
                .trim()
                .parse::<usize>()
                .map(BodyFraming::Length)
                .map_err(|_| format!("invalid Content-Length: {}", value)),
            None => Ok(BodyFraming::UntilClose),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BodyFraming {
    Empty,
    Length(usize),
    Chunked,
    UntilClose,
}

/// Response as received from the server or WAF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    raw: Vec<u8>,
    parsed: HttpInner,
}

impl Response {
    pub fn new(raw: Vec<u8>, parsed: HttpInner) -> Self {
        Self { raw, parsed }
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn parsed(&self) -> &HttpInner {
        &self.parsed
    }

    pub fn status(&self) -> u16 {
        self.parsed.status
    }

    pub fn body_as_string(&self) -> String {
        self.parsed.body_as_string()
    }
}

/// Parses a status line plus header block (without the terminating blank line).
pub(crate) fn parse_head(head: &[u8]) -> Result<HttpInner, String> {
    let text = String::from_utf8_lossy(head);
    let mut lines = text.split('\n').map(|l| l.trim_end_matches('\r'));

    let status_line = lines.next().ok_or("No status line in response")?;
    let mut parts = status_line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/") {
        return Err(format!("Malformed status line: {}", status_line));
    }
    let status = parts
        .next()
        .and_then(|s| s.trim().parse::<u16>().ok())
        .ok_or_else(|| format!("Malformed status code in: {}", status_line))?;
    let reason = parts.next().unwrap_or_default().trim().to_string();

    let mut entries: Vec<(String, String)> = Vec::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            // obsolete line folding continues the previous value
            if let Some(last) = entries.last_mut() {
                last.1.push(' ');
                last.1.push_str(line.trim());
            }
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            entries.push((name.trim().to_string(), value.trim().to_string()));
        }
    }

    Ok(HttpInner::new_with_all(
        version.to_string(),
        status,
        reason,
        entries.into_iter().collect(),
        Vec::new(),
    ))
}

#[cfg(test)]
#[path = "httpinner_tests.rs"]
mod tests;
