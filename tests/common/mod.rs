// File: common/mod.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

#![allow(dead_code)]

use std::fs::OpenOptions;
use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use wafreplay::definition::FtwTest;

pub const MARKER_HEADER: &str = "X-CRS-Test";
pub const XSS_RULE: &str = "941100";

/// Minimal stand-in for a WAF in front of a web server. Every request is
/// written to a ModSecurity-style log; requests carrying `<script>` are
/// blocked with 403 and logged with rule 941100.
pub struct FakeWaf {
    pub addr: SocketAddr,
    log: NamedTempFile,
    requests: Arc<AtomicUsize>,
    probes: Arc<AtomicUsize>,
}

impl FakeWaf {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let log = NamedTempFile::new().unwrap();
        let log_path = log.path().to_path_buf();
        let requests = Arc::new(AtomicUsize::new(0));
        let probes = Arc::new(AtomicUsize::new(0));

        let (req_counter, probe_counter) = (requests.clone(), probes.clone());
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(
                    stream,
                    log_path.clone(),
                    req_counter.clone(),
                    probe_counter.clone(),
                ));
            }
        });

        Self {
            addr,
            log,
            requests,
            probes,
        }
    }

    pub fn log_path(&self) -> &Path {
        self.log.path()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Requests without a marker header.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn log_contents(&self) -> String {
        std::fs::read_to_string(self.log.path()).unwrap()
    }
}

async fn serve(
    mut stream: TcpStream,
    log_path: PathBuf,
    requests: Arc<AtomicUsize>,
    probes: Arc<AtomicUsize>,
) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let head_end = loop {
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
            match stream.read(&mut chunk).await {
                Ok(0) | Err(_) => return,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
            }
        };

        let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
        let content_length = header_value(&head, "content-length")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(0);
        while buf.len() < head_end + content_length {
            match stream.read(&mut chunk).await {
                Ok(0) | Err(_) => return,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
            }
        }
        let body = String::from_utf8_lossy(&buf[head_end..head_end + content_length]).into_owned();
        buf.drain(..head_end + content_length);

        let request_line = head.lines().next().unwrap_or_default().to_string();
        let (status, reason, lines) = match header_value(&head, MARKER_HEADER) {
            Some(marker) => {
                // ModSecurity stamps every transaction with a unique id
                let unique_id = probes.fetch_add(1, Ordering::SeqCst) + 1;
                (
                    200,
                    "OK",
                    vec![format!(
                        "[client 127.0.0.1] [unique_id \"{}\"] \"{}\" {}: {}",
                        unique_id, request_line, MARKER_HEADER, marker
                    )],
                )
            }
            None if head.contains("<script>") || body.contains("<script>") => {
                requests.fetch_add(1, Ordering::SeqCst);
                (
                    403,
                    "Forbidden",
                    vec![
                        format!(
                            "[client 127.0.0.1] ModSecurity: Warning. XSS Filter [id \"{}\"] \"{}\"",
                            XSS_RULE, request_line
                        ),
                        "[client 127.0.0.1] ModSecurity: Access denied with code 403 [id \"949110\"]"
                            .to_string(),
                    ],
                )
            }
            None => {
                requests.fetch_add(1, Ordering::SeqCst);
                (200, "OK", vec![format!("[client 127.0.0.1] \"{}\" 200", request_line)])
            }
        };

        let mut log = OpenOptions::new().append(true).open(&log_path).unwrap();
        for line in lines {
            writeln!(log, "{}", line).unwrap();
        }
        drop(log);

        let body = if status == 403 { "blocked" } else { "hello" };
        let response = format!(
            "HTTP/1.1 {} {}\r\nContent-Length: {}\r\n\r\n{}",
            status,
            reason,
            body.len(),
            body
        );
        if stream.write_all(response.as_bytes()).await.is_err() {
            return;
        }
    }
}

fn header_value<'a>(head: &'a str, name: &str) -> Option<&'a str> {
    head.lines().skip(1).find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim()
            .eq_ignore_ascii_case(name)
            .then(|| value.trim())
    })
}

/// A port nothing listens on.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

pub fn load(yaml: &str) -> FtwTest {
    FtwTest::from_yaml(yaml, None).unwrap()
}
