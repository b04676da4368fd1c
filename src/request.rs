// File: request.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use log::trace;
use percent_encoding::percent_decode_str;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::definition::Input;
use crate::error::{FtwError, FtwResult};
use crate::http::Destination;

pub const DEFAULT_METHOD: &str = "GET";
pub const DEFAULT_URI: &str = "/";
pub const DEFAULT_VERSION: &str = "HTTP/1.1";

/// Header list that keeps insertion order and looks names up case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    entries: Vec<(String, String)>,
}

impl Header {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Replaces the first header with this name in place and drops any duplicates.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self
            .entries
            .iter()
            .position(|(k, _)| k.eq_ignore_ascii_case(&name))
        {
            Some(pos) => {
                self.entries[pos].1 = value;
                let mut index = 0;
                self.entries.retain(|(k, _)| {
                    let keep = index <= pos || !k.eq_ignore_ascii_case(&name);
                    index += 1;
                    keep
                });
            }
            None => self.entries.push((name, value)),
        }
    }

    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn write_to(&self, buf: &mut Vec<u8>) {
        for (name, value) in &self.entries {
            buf.extend_from_slice(name.as_bytes());
            buf.extend_from_slice(b": ");
            buf.extend_from_slice(value.as_bytes());
            buf.extend_from_slice(b"\r\n");
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Header {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut header = Header::new();
        for (k, v) in iter {
            header.add(k, v);
        }
        header
    }
}

impl Serialize for Header {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

// YAML header values are often written unquoted (`Content-Length: 5`).
#[derive(Deserialize)]
#[serde(untagged)]
enum ScalarValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Flag(bool),
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => write!(f, "{}", s),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Float(x) => write!(f, "{}", x),
            Self::Flag(b) => write!(f, "{}", b),
        }
    }
}

struct HeaderVisitor;

impl<'de> Visitor<'de> for HeaderVisitor {
    type Value = Header;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a mapping of header names to values")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Header, A::Error> {
        let mut header = Header::new();
        while let Some((name, value)) = access.next_entry::<String, ScalarValue>()? {
            header.add(name, value.to_string());
        }
        Ok(header)
    }

    fn visit_unit<E: serde::de::Error>(self) -> Result<Header, E> {
        Ok(Header::new())
    }
}

impl<'de> Deserialize<'de> for Header {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(HeaderVisitor)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: String,
    pub uri: String,
    pub version: String,
}

impl Default for RequestLine {
    fn default() -> Self {
        Self {
            method: DEFAULT_METHOD.to_string(),
            uri: DEFAULT_URI.to_string(),
            version: DEFAULT_VERSION.to_string(),
        }
    }
}

impl fmt::Display for RequestLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.method, self.uri, self.version)
    }
}

/// The three mutually exclusive ways a stage can describe its request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestSpec {
    Structured {
        line: RequestLine,
        headers: Header,
        data: Vec<u8>,
        auto_complete_headers: bool,
    },
    Encoded {
        encoded: String,
        auto_complete_headers: bool,
    },
    Raw {
        raw: Vec<u8>,
        auto_complete_headers: bool,
    },
}

impl RequestSpec {
    pub fn from_input(input: &Input) -> FtwResult<Self> {
        let data = input.data.as_deref().filter(|d| !d.is_empty());
        let encoded = input.encoded_request.as_deref().filter(|e| !e.is_empty());
        let raw = input.raw_request.as_deref().filter(|r| !r.is_empty());

        let populated = [data.is_some(), encoded.is_some(), raw.is_some()]
            .iter()
            .filter(|set| **set)
            .count();
        if populated > 1 {
            return Err(FtwError::Definition(
                "choose between data, encoded_request, or raw_request".to_string(),
            ));
        }

        let auto_complete_headers = !input.stop_magic;
        let spec = match (encoded, raw) {
            (Some(encoded), _) => RequestSpec::Encoded {
                encoded: encoded.to_string(),
                auto_complete_headers,
            },
            (_, Some(raw)) => RequestSpec::Raw {
                raw: raw.as_bytes().to_vec(),
                auto_complete_headers,
            },
            _ => RequestSpec::Structured {
                line: RequestLine {
                    method: input.method().to_string(),
                    uri: input.uri().to_string(),
                    version: input.version().to_string(),
                },
                headers: input.headers.clone(),
                data: data.map(|d| d.as_bytes().to_vec()).unwrap_or_default(),
                auto_complete_headers,
            },
        };
        Ok(spec)
    }
}

/// Validates the stage input and materializes the request it describes.
pub fn build_request(input: &Input) -> FtwResult<Request> {
    RequestSpec::from_input(input).map(Request::from)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    request_line: Option<RequestLine>,
    headers: Header,
    data: Vec<u8>,
    raw: Option<Vec<u8>>,
    auto_complete_headers: bool,
}

impl From<RequestSpec> for Request {
    fn from(spec: RequestSpec) -> Self {
        match spec {
            RequestSpec::Structured {
                line,
                headers,
                data,
                auto_complete_headers,
            } => Request::new(line, headers, data, auto_complete_headers),
            RequestSpec::Encoded {
                encoded,
                auto_complete_headers,
            } => {
                let raw: Vec<u8> = percent_decode_str(&encoded).collect();
                Request::new_raw(raw, auto_complete_headers)
            }
            RequestSpec::Raw {
                raw,
                auto_complete_headers,
            } => Request::new_raw(raw, auto_complete_headers),
        }
    }
}

impl Request {
    pub fn new(
        request_line: RequestLine,
        headers: Header,
        data: Vec<u8>,
        auto_complete_headers: bool,
    ) -> Self {
        Self {
            request_line: Some(request_line),
            headers,
            data,
            raw: None,
            auto_complete_headers,
        }
    }

    pub fn new_raw(raw: Vec<u8>, auto_complete_headers: bool) -> Self {
        Self {
            request_line: None,
            headers: Header::new(),
            data: Vec::new(),
            raw: Some(raw),
            auto_complete_headers,
        }
    }

    pub fn is_raw(&self) -> bool {
        self.raw.is_some()
    }

    pub fn request_line(&self) -> Option<&RequestLine> {
        self.request_line.as_ref()
    }

    pub fn headers(&self) -> &Header {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Header {
        &mut self.headers
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn auto_complete_headers(&self) -> bool {
        self.auto_complete_headers
    }

    /// Method token of the request, read from the first raw line for raw requests.
    pub fn method(&self) -> String {
        match (&self.request_line, &self.raw) {
            (Some(line), _) => line.method.clone(),
            (None, Some(raw)) => raw
                .split(|b| *b == b' ' || *b == b'\r' || *b == b'\n')
                .next()
                .map(|m| String::from_utf8_lossy(m).into_owned())
                .unwrap_or_default(),
            (None, None) => String::new(),
        }
    }

    /// Serializes the request for the wire, completing Host and Content-Length when allowed.
    pub fn to_bytes(&self, destination: &Destination) -> Vec<u8> {
        if let Some(raw) = &self.raw {
            return if self.auto_complete_headers {
                complete_raw_headers(raw, destination)
            } else {
                raw.clone()
            };
        }

        let mut headers = self.headers.clone();
        if self.auto_complete_headers {
            complete_headers(&mut headers, self.data.len(), destination);
        }

        let line = self.request_line.clone().unwrap_or_default();
        let mut buf = Vec::with_capacity(128 + self.data.len());
        buf.extend_from_slice(line.to_string().as_bytes());
        buf.extend_from_slice(b"\r\n");
        headers.write_to(&mut buf);
        buf.extend_from_slice(b"\r\n");
        buf.extend_from_slice(&self.data);
        buf
    }
}

fn complete_headers(headers: &mut Header, body_len: usize, destination: &Destination) {
    if !headers.contains("Host") {
        headers.set("Host", destination.host_header());
    }
    if body_len > 0 && !headers.contains("Content-Length") && !headers.contains("Transfer-Encoding")
    {
        headers.set("Content-Length", body_len.to_string());
    }
}

fn complete_raw_headers(raw: &[u8], destination: &Destination) -> Vec<u8> {
    let Some(pos) = find_subsequence(raw, b"\r\n\r\n") else {
        trace!("Raw request has no header terminator, sending unmodified");
        return raw.to_vec();
    };
    let head = &raw[..pos];
    let body = &raw[pos + 4..];

    let names: Vec<String> = String::from_utf8_lossy(head)
        .split("\r\n")
        .skip(1)
        .filter_map(|line| line.split_once(':'))
        .map(|(name, _)| name.trim().to_ascii_lowercase())
        .collect();
    let has = |name: &str| names.iter().any(|n| n == name);

    let mut out = head.to_vec();
    if !has("host") {
        out.extend_from_slice(format!("\r\nHost: {}", destination.host_header()).as_bytes());
    }
    if !body.is_empty() && !has("content-length") && !has("transfer-encoding") {
        out.extend_from_slice(format!("\r\nContent-Length: {}", body.len()).as_bytes());
    }
    out.extend_from_slice(b"\r\n\r\n");
    out.extend_from_slice(body);
    out
}

pub(crate) fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
#[path = "request_tests.rs"]
mod tests;
