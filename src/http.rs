// File: http.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use log::{debug, trace};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::rustls;
use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::crypto::{
    verify_tls12_signature, verify_tls13_signature, CryptoProvider,
};
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::rustls::{DigitallySignedStruct, SignatureScheme};
use tokio_rustls::TlsConnector;

use crate::error::{FtwError, FtwResult, TransportError, TransportErrorKind};
use crate::httpinner::{parse_head, BodyFraming, Response};
use crate::request::{find_subsequence, Request};

const MAX_HEAD_SIZE: usize = 64 * 1024;
const MAX_BODY_SIZE: usize = 64 * 1024 * 1024;
const READ_CHUNK: usize = 4096;

/// Where a connection is made. Immutable for the duration of a stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    pub addr: String,
    pub port: u16,
    pub protocol: String,
}

impl Destination {
    pub fn new(addr: impl Into<String>, port: u16, protocol: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            port,
            protocol: protocol.into(),
        }
    }

    pub fn is_tls(&self) -> bool {
        self.protocol.eq_ignore_ascii_case("https")
    }

    /// Value for an automatically added Host header.
    pub fn host_header(&self) -> String {
        let default_port = if self.is_tls() { 443 } else { 80 };
        if self.port == default_port {
            self.addr.clone()
        } else {
            format!("{}:{}", self.addr, self.port)
        }
    }
}

impl Default for Destination {
    fn default() -> Self {
        Self::new("localhost", 80, "http")
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.protocol, self.addr, self.port)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ClientConfig {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(3),
            read_timeout: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RoundTripTime {
    begin: Option<Instant>,
    end: Option<Instant>,
}

impl RoundTripTime {
    pub fn start_tracking(&mut self) {
        self.begin = Some(Instant::now());
        self.end = None;
    }

    pub fn stop_tracking(&mut self) {
        self.end = Some(Instant::now());
    }

    pub fn round_trip_duration(&self) -> Duration {
        match (self.begin, self.end) {
            (Some(begin), Some(end)) => end.saturating_duration_since(begin),
            _ => Duration::ZERO,
        }
    }
}

trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Stream for T {}

struct Connection {
    stream: Box<dyn Stream>,
    destination: Destination,
    reusable: bool,
    exchanges: usize,
}

/// Failure of one request/response exchange. `stale` marks a reused socket the
/// peer had already closed before anything came back.
struct ExchangeFailure {
    error: TransportError,
    stale: bool,
}

impl From<TransportError> for ExchangeFailure {
    fn from(error: TransportError) -> Self {
        Self {
            error,
            stale: false,
        }
    }
}

/// Single-connection HTTP/1.x client that writes requests byte for byte.
pub struct Client {
    config: ClientConfig,
    connection: Option<Connection>,
    rtt: RoundTripTime,
    tls: TlsConnector,
}

impl Client {
    pub fn new(config: ClientConfig) -> FtwResult<Self> {
        let tls = tls_connector()
            .map_err(|e| FtwError::Configuration(format!("TLS setup failed: {}", e)))?;
        Ok(Self {
            config,
            connection: None,
            rtt: RoundTripTime::default(),
            tls,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn has_connection(&self) -> bool {
        self.connection.is_some()
    }

    pub fn close(&mut self) {
        self.connection = None;
    }

    /// Always opens a fresh connection, dropping the current one.
    pub async fn new_connection(&mut self, destination: &Destination) -> Result<(), TransportError> {
        self.connection = None;
        let stream = self.open(destination).await?;
        self.connection = Some(Connection {
            stream,
            destination: destination.clone(),
            reusable: true,
            exchanges: 0,
        });
        Ok(())
    }

    /// Keeps the current connection when it points at the same destination and is still open.
    pub async fn new_or_reused_connection(
        &mut self,
        destination: &Destination,
    ) -> Result<(), TransportError> {
        if let Some(conn) = &self.connection {
            if conn.reusable && conn.destination == *destination {
                trace!("Reusing connection to {}", destination);
                return Ok(());
            }
        }
        self.new_connection(destination).await
    }

    pub async fn send(&mut self, request: &Request) -> Result<Response, TransportError> {
        let Some(conn) = self.connection.as_ref() else {
            return Err(TransportError::new(
                TransportErrorKind::SendFailed,
                "<none>",
                "no open connection",
            ));
        };
        let reused = conn.exchanges > 0;
        let destination = conn.destination.clone();
        let payload = request.to_bytes(&destination);
        let method = request.method();

        match self.exchange(&payload, &method).await {
            Ok(response) => Ok(response),
            Err(failure) if reused && failure.stale => {
                debug!(
                    "Connection to {} was closed by peer, reconnecting: {}",
                    destination, failure.error
                );
                self.new_connection(&destination).await?;
                self.exchange(&payload, &method).await.map_err(|f| {
                    self.connection = None;
                    f.error
                })
            }
            Err(failure) => {
                self.connection = None;
                Err(failure.error)
            }
        }
    }

    pub fn start_tracking_time(&mut self) {
        self.rtt.start_tracking();
    }

    pub fn stop_tracking_time(&mut self) {
        self.rtt.stop_tracking();
    }

    pub fn round_trip_time(&self) -> &RoundTripTime {
        &self.rtt
    }

    async fn exchange(&mut self, payload: &[u8], method: &str) -> Result<Response, ExchangeFailure> {
        let read_timeout = self.config.read_timeout;
        let conn = self.connection.as_mut().ok_or_else(|| {
            TransportError::new(TransportErrorKind::SendFailed, "<none>", "no open connection")
        })?;
        let destination = conn.destination.clone();

        let write = async {
            conn.stream.write_all(payload).await?;
            conn.stream.flush().await
        };
        match tokio::time::timeout(read_timeout, write).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(ExchangeFailure {
                    error: TransportError::new(
                        TransportErrorKind::SendFailed,
                        &destination,
                        e.to_string(),
                    ),
                    stale: true,
                })
            }
            Err(_) => {
                return Err(TransportError::new(
                    TransportErrorKind::Timeout,
                    &destination,
                    format!("sending request timed out after {:?}", read_timeout),
                )
                .into())
            }
        }
        conn.exchanges += 1;
        trace!("Sent {} bytes to {}", payload.len(), destination);

        let mut reader = ResponseReader {
            stream: &mut conn.stream,
            buf: Vec::new(),
            pos: 0,
            eof: false,
            read_timeout,
            destination: &destination,
        };
        let (response, keep_alive) = reader.read_response(method).await?;
        conn.reusable = keep_alive;
        Ok(response)
    }

    async fn open(&self, destination: &Destination) -> Result<Box<dyn Stream>, TransportError> {
        let tls = match destination.protocol.to_ascii_lowercase().as_str() {
            "http" => false,
            "https" => true,
            other => {
                return Err(TransportError::new(
                    TransportErrorKind::ConnectFailed,
                    destination,
                    format!("unsupported protocol '{}'", other),
                ))
            }
        };

        let connect_timeout = self.config.connect_timeout;
        let address = format!("{}:{}", destination.addr, destination.port);
        let tcp = match tokio::time::timeout(connect_timeout, TcpStream::connect(&address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(TransportError::new(
                    TransportErrorKind::ConnectFailed,
                    destination,
                    e.to_string(),
                ))
            }
            Err(_) => {
                return Err(TransportError::new(
                    TransportErrorKind::Timeout,
                    destination,
                    format!("connecting timed out after {:?}", connect_timeout),
                ))
            }
        };
        if let Err(e) = tcp.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY for {}: {}", destination, e);
        }
        debug!("Connected to {}", destination);

        if !tls {
            return Ok(Box::new(tcp));
        }

        let server_name = ServerName::try_from(destination.addr.as_str())
            .map(|name| name.to_owned())
            .map_err(|e| {
                TransportError::new(TransportErrorKind::ConnectFailed, destination, e.to_string())
            })?;
        match tokio::time::timeout(connect_timeout, self.tls.connect(server_name, tcp)).await {
            Ok(Ok(stream)) => Ok(Box::new(stream)),
            Ok(Err(e)) => Err(TransportError::new(
                TransportErrorKind::ConnectFailed,
                destination,
                format!("TLS handshake failed: {}", e),
            )),
            Err(_) => Err(TransportError::new(
                TransportErrorKind::Timeout,
                destination,
                format!("TLS handshake timed out after {:?}", connect_timeout),
            )),
        }
    }
}

struct ResponseReader<'a> {
    stream: &'a mut Box<dyn Stream>,
    buf: Vec<u8>,
    pos: usize,
    eof: bool,
    read_timeout: Duration,
    destination: &'a Destination,
}

impl ResponseReader<'_> {
    fn receive_error(&self, message: impl Into<String>) -> ExchangeFailure {
        ExchangeFailure {
            error: TransportError::new(
                TransportErrorKind::ReceiveFailed,
                self.destination,
                message,
            ),
            stale: self.buf.is_empty(),
        }
    }

    async fn fill(&mut self) -> Result<usize, ExchangeFailure> {
        let mut chunk = [0u8; READ_CHUNK];
        match tokio::time::timeout(self.read_timeout, self.stream.read(&mut chunk)).await {
            Ok(Ok(0)) => {
                self.eof = true;
                Ok(0)
            }
            Ok(Ok(n)) => {
                self.buf.extend_from_slice(&chunk[..n]);
                Ok(n)
            }
            Ok(Err(e)) => Err(self.receive_error(e.to_string())),
            Err(_) => Err(TransportError::new(
                TransportErrorKind::Timeout,
                self.destination,
                format!("reading response timed out after {:?}", self.read_timeout),
            )
            .into()),
        }
    }

    /// Reads until `needle` appears after `pos`; returns the index just past it.
    async fn read_until(&mut self, needle: &[u8], limit: usize) -> Result<usize, ExchangeFailure> {
        let mut searched = self.pos;
        loop {
            if let Some(i) = find_subsequence(&self.buf[searched..], needle) {
                return Ok(searched + i + needle.len());
            }
            searched = self.buf.len().saturating_sub(needle.len() - 1).max(self.pos);
            if self.buf.len() - self.pos > limit {
                return Err(self.receive_error("response head too large"));
            }
            if self.fill().await? == 0 {
                return Err(self.receive_error("connection closed before response was complete"));
            }
        }
    }

    async fn read_exact_len(&mut self, len: usize) -> Result<(), ExchangeFailure> {
        while self.buf.len() - self.pos < len {
            if self.fill().await? == 0 {
                return Err(self.receive_error("connection closed before body was complete"));
            }
        }
        Ok(())
    }

    async fn read_response(&mut self, method: &str) -> Result<(Response, bool), ExchangeFailure> {
        let mut parsed = loop {
            let head_end = self.read_until(b"\r\n\r\n", MAX_HEAD_SIZE).await?;
            let parsed = parse_head(&self.buf[self.pos..head_end - 4])
                .map_err(|e| self.receive_error(e))?;
            self.pos = head_end;
            if (100..200).contains(&parsed.status()) && parsed.status() != 101 {
                trace!("Skipping interim {} response", parsed.status());
                continue;
            }
            break parsed;
        };

        let framing = parsed.framing(method).map_err(|e| self.receive_error(e))?;
        let mut keep_alive = parsed.keeps_alive();
        let body = match framing {
            BodyFraming::Empty => Vec::new(),
            BodyFraming::Length(len) => {
                if len > MAX_BODY_SIZE {
                    return Err(self.receive_error(format!(
                        "content length {} exceeds the {} byte limit",
                        len, MAX_BODY_SIZE
                    )));
                }
                self.read_exact_len(len).await?;
                let body = self.buf[self.pos..self.pos + len].to_vec();
                self.pos += len;
                body
            }
            BodyFraming::Chunked => self.read_chunked().await?,
            BodyFraming::UntilClose => {
                keep_alive = false;
                self.read_to_close().await?
            }
        };
        parsed.set_body(body);

        let raw = self.buf[..self.pos].to_vec();
        Ok((Response::new(raw, parsed), keep_alive))
    }

    async fn read_chunked(&mut self) -> Result<Vec<u8>, ExchangeFailure> {
        let mut body = Vec::new();
        loop {
            let line_end = self.read_until(b"\r\n", MAX_HEAD_SIZE).await?;
            let line = String::from_utf8_lossy(&self.buf[self.pos..line_end - 2]).into_owned();
            let size_text = line.split(';').next().unwrap_or_default().trim();
            let size = usize::from_str_radix(size_text, 16)
                .map_err(|_| self.receive_error(format!("invalid chunk size '{}'", size_text)))?;
            self.pos = line_end;

            if size == 0 {
                // trailer section ends with an empty line
                loop {
                    let end = self.read_until(b"\r\n", MAX_HEAD_SIZE).await?;
                    let empty = end - self.pos == 2;
                    self.pos = end;
                    if empty {
                        return Ok(body);
                    }
                }
            }

            let framed = match size.checked_add(2) {
                Some(framed) if body.len().saturating_add(size) <= MAX_BODY_SIZE => framed,
                _ => {
                    return Err(self.receive_error(format!(
                        "chunk of {} bytes exceeds the {} byte body limit",
                        size, MAX_BODY_SIZE
                    )))
                }
            };
            self.read_exact_len(framed).await?;
            body.extend_from_slice(&self.buf[self.pos..self.pos + size]);
            self.pos += framed;
        }
    }

    async fn read_to_close(&mut self) -> Result<Vec<u8>, ExchangeFailure> {
        while !self.eof {
            if self.buf.len() - self.pos > MAX_BODY_SIZE {
                return Err(self.receive_error(format!(
                    "body exceeds the {} byte limit",
                    MAX_BODY_SIZE
                )));
            }
            match self.fill().await {
                Ok(_) => {}
                Err(failure) if failure.error.is_timeout() => {
                    debug!(
                        "No more data from {} within {:?}, treating body as complete",
                        self.destination, self.read_timeout
                    );
                    break;
                }
                Err(failure) => return Err(failure),
            }
        }
        let body = self.buf[self.pos..].to_vec();
        self.pos = self.buf.len();
        Ok(body)
    }
}

/// Test endpoints usually run with self-signed certificates, so the server
/// certificate is accepted as is. Handshake signatures are still checked.
#[derive(Debug)]
struct AcceptAnyCertificate(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

fn tls_connector() -> Result<TlsConnector, rustls::Error> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate(provider)))
        .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(config)))
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
