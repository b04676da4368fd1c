// File: waflog.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

//! Read access to the WAF log. Lines are always read backwards from the end of
//! the file, since the lines of interest were appended last.

use log::{debug, warn};
use regex::bytes::Regex;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::error::{FtwError, FtwResult};

const CHUNK_SIZE: u64 = 8 * 1024;

#[derive(Debug, Clone)]
pub struct WafLog {
    path: PathBuf,
}

impl WafLog {
    /// Opens the log once to make sure it is readable.
    pub fn open(path: impl Into<PathBuf>) -> FtwResult<Self> {
        let path = path.into();
        File::open(&path).map_err(|e| {
            FtwError::Configuration(format!("can't open log file {}: {}", path.display(), e))
        })?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Searches the last `max_lines` lines for one containing `stage_id` and returns it.
    pub fn check_log_for_marker(&self, stage_id: &str, max_lines: usize) -> Option<Vec<u8>> {
        let needle = stage_id.to_ascii_lowercase().into_bytes();
        let lines = match ReverseLines::open(&self.path) {
            Ok(lines) => lines,
            Err(e) => {
                warn!("Can't read log file {}: {}", self.path.display(), e);
                return None;
            }
        };

        lines
            .take(max_lines)
            .find(|line| contains_ignore_ascii_case(line, &needle))
    }

    /// Lines strictly between the start and end marker lines, in file order.
    pub fn marked_lines(&self, start_marker: &[u8], end_marker: &[u8]) -> Vec<Vec<u8>> {
        let lines = match ReverseLines::open(&self.path) {
            Ok(lines) => lines,
            Err(e) => {
                warn!("Can't read log file {}: {}", self.path.display(), e);
                return Vec::new();
            }
        };

        let mut found_start = false;
        let mut region: Vec<Vec<u8>> = lines
            .skip_while(|line| line.as_slice() != end_marker)
            .skip(1)
            .take_while(|line| {
                found_start = line.as_slice() == start_marker;
                !found_start
            })
            .collect();
        if !found_start {
            debug!("Start marker not found before end marker, region is empty");
            return Vec::new();
        }
        region.reverse();
        region
    }

    /// True when any line of the marked region matches `pattern`.
    pub fn contains(&self, pattern: &Regex, start_marker: &[u8], end_marker: &[u8]) -> bool {
        self.marked_lines(start_marker, end_marker)
            .iter()
            .any(|line| pattern.is_match(line))
    }
}

fn contains_ignore_ascii_case(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() {
        return true;
    }
    haystack
        .windows(needle.len())
        .any(|window| window.eq_ignore_ascii_case(needle))
}

/// Iterates the lines of a file from last to first, reading fixed-size chunks
/// from the end. Empty lines are skipped and trailing `\r` is stripped.
struct ReverseLines {
    file: File,
    pos: u64,
    partial: Vec<u8>,
    lines: Vec<Vec<u8>>,
}

impl ReverseLines {
    fn open(path: &Path) -> std::io::Result<Self> {
        let mut file = File::open(path)?;
        let pos = file.seek(SeekFrom::End(0))?;
        Ok(Self {
            file,
            pos,
            partial: Vec::new(),
            lines: Vec::new(),
        })
    }

    fn read_chunk(&mut self) -> std::io::Result<()> {
        let size = CHUNK_SIZE.min(self.pos);
        self.pos -= size;
        self.file.seek(SeekFrom::Start(self.pos))?;
        let mut chunk = vec![0u8; size as usize];
        self.file.read_exact(&mut chunk)?;
        chunk.append(&mut self.partial);

        let mut pieces = chunk.split(|b| *b == b'\n');
        // the first piece may continue in the previous chunk
        self.partial = pieces.next().map(<[u8]>::to_vec).unwrap_or_default();
        for piece in pieces {
            let line = piece.strip_suffix(b"\r").unwrap_or(piece);
            if !line.is_empty() {
                self.lines.push(line.to_vec());
            }
        }
        Ok(())
    }
}

impl Iterator for ReverseLines {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        loop {
            if let Some(line) = self.lines.pop() {
                return Some(line);
            }
            if self.pos == 0 {
                let last = std::mem::take(&mut self.partial);
                let last = last.strip_suffix(b"\r").map(<[u8]>::to_vec).unwrap_or(last);
                return if last.is_empty() { None } else { Some(last) };
            }
            if let Err(e) = self.read_chunk() {
                warn!("Error reading log file backwards: {}", e);
                return None;
            }
        }
    }
}

#[cfg(test)]
#[path = "waflog_tests.rs"]
mod tests;
