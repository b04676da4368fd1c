// File: definition.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

//! In-memory form of YAML test files and a small loader for them.

use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{FtwError, FtwResult};
use crate::http::Destination;
use crate::request::{Header, DEFAULT_METHOD, DEFAULT_URI, DEFAULT_VERSION};

pub const DEFAULT_DEST_ADDR: &str = "localhost";
pub const DEFAULT_PORT: u16 = 80;
pub const DEFAULT_PROTOCOL: &str = "http";

fn enabled_default() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FtwTest {
    pub meta: Meta,
    #[serde(default)]
    pub tests: Vec<TestCase>,
    #[serde(skip)]
    pub file_name: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meta {
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    #[serde(rename = "test_title")]
    pub title: String,
    #[serde(default)]
    pub desc: Option<String>,
    #[serde(default)]
    pub stages: Vec<StageEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageEntry {
    pub stage: Stage,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Stage {
    #[serde(default)]
    pub input: Input,
    #[serde(default, rename = "output")]
    pub expectation: Expectation,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Input {
    #[serde(default)]
    pub dest_addr: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub headers: Header,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub encoded_request: Option<String>,
    #[serde(default)]
    pub raw_request: Option<String>,
    /// Disables automatic Host and Content-Length completion.
    #[serde(default)]
    pub stop_magic: bool,
}

impl Input {
    pub fn dest_addr(&self) -> &str {
        self.dest_addr.as_deref().unwrap_or(DEFAULT_DEST_ADDR)
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }

    pub fn protocol(&self) -> &str {
        self.protocol.as_deref().unwrap_or(DEFAULT_PROTOCOL)
    }

    pub fn method(&self) -> &str {
        self.method.as_deref().unwrap_or(DEFAULT_METHOD)
    }

    pub fn uri(&self) -> &str {
        self.uri.as_deref().unwrap_or(DEFAULT_URI)
    }

    pub fn version(&self) -> &str {
        self.version.as_deref().unwrap_or(DEFAULT_VERSION)
    }

    pub fn destination(&self) -> Destination {
        Destination::new(self.dest_addr(), self.port(), self.protocol())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum StatusCodes {
    One(u16),
    Many(Vec<u16>),
}

fn status_codes<'de, D>(deserializer: D) -> Result<Vec<u16>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Option::<StatusCodes>::deserialize(deserializer)? {
        Some(StatusCodes::One(code)) => vec![code],
        Some(StatusCodes::Many(codes)) => codes,
        None => Vec::new(),
    })
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Expectation {
    #[serde(default, deserialize_with = "status_codes")]
    pub status: Vec<u16>,
    #[serde(default)]
    pub response_contains: Option<String>,
    #[serde(default)]
    pub log_contains: Option<String>,
    #[serde(default)]
    pub no_log_contains: Option<String>,
    #[serde(default)]
    pub expect_error: bool,
}

impl FtwTest {
    pub fn from_yaml(source: &str, file_name: Option<&Path>) -> FtwResult<Self> {
        let mut test: FtwTest = serde_yaml::from_str(source).map_err(|e| FtwError::Yaml {
            file: file_name
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "<inline>".to_string()),
            source: e,
        })?;
        test.file_name = file_name.map(Path::to_path_buf);
        Ok(test)
    }

    pub fn from_file(path: &Path) -> FtwResult<Self> {
        let source = fs::read_to_string(path)?;
        Self::from_yaml(&source, Some(path))
    }
}

/// Loads every `*.yaml`/`*.yml` file below `dir`, in path order.
pub fn load_tests(dir: &Path) -> FtwResult<Vec<FtwTest>> {
    let mut files = Vec::new();
    collect_yaml_files(dir, &mut files)?;
    files.sort();
    debug!("Found {} test files below {}", files.len(), dir.display());

    files.iter().map(|path| FtwTest::from_file(path)).collect()
}

fn collect_yaml_files(dir: &Path, files: &mut Vec<PathBuf>) -> FtwResult<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_yaml_files(&path, files)?;
        } else if matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        ) {
            files.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "definition_tests.rs"]
mod tests;
