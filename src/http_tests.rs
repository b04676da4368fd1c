// File: http_tests.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

#[cfg(test)]
mod tests {
    use crate::error::TransportErrorKind;
    use crate::http::{Client, ClientConfig, Destination, RoundTripTime};
    use crate::request::{Header, Request, RequestLine};
    use pretty_assertions::assert_eq;
    use rstest::*;
    use std::collections::VecDeque;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct ScriptedServer {
        addr: SocketAddr,
        connections: Arc<AtomicUsize>,
    }

    impl ScriptedServer {
        fn destination(&self) -> Destination {
            Destination::new(self.addr.ip().to_string(), self.addr.port(), "http")
        }

        fn connections(&self) -> usize {
            self.connections.load(Ordering::SeqCst)
        }
    }

    /// Answers each request with the next scripted response. With
    /// `one_per_connection` the socket is dropped after every answer.
    async fn scripted_server(responses: Vec<&'static str>, one_per_connection: bool) -> ScriptedServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(AtomicUsize::new(0));
        let queue = Arc::new(Mutex::new(VecDeque::from(responses)));

        let counter = connections.clone();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let queue = queue.clone();
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let mut chunk = [0u8; 1024];
                    loop {
                        let n = match stream.read(&mut chunk).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => n,
                        };
                        buf.extend_from_slice(&chunk[..n]);
                        if !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                            continue;
                        }
                        buf.clear();
                        let next = queue.lock().unwrap().pop_front();
                        let Some(response) = next else { return };
                        if stream.write_all(response.as_bytes()).await.is_err() {
                            return;
                        }
                        if one_per_connection || response.contains("Connection: close") {
                            let _ = stream.shutdown().await;
                            return;
                        }
                    }
                });
            }
        });

        ScriptedServer { addr, connections }
    }

    fn get(uri: &str) -> Request {
        let line = RequestLine {
            method: "GET".to_string(),
            uri: uri.to_string(),
            version: "HTTP/1.1".to_string(),
        };
        Request::new(line, Header::new(), Vec::new(), true)
    }

    fn quick_client() -> Client {
        Client::new(ClientConfig {
            connect_timeout: Duration::from_millis(500),
            read_timeout: Duration::from_millis(300),
        })
        .unwrap()
    }

    #[rstest]
    #[case("localhost", 80, "http", "localhost")]
    #[case("localhost", 8080, "http", "localhost:8080")]
    #[case("example.com", 443, "https", "example.com")]
    #[case("example.com", 80, "https", "example.com:80")]
    fn test_host_header(
        #[case] addr: &str,
        #[case] port: u16,
        #[case] protocol: &str,
        #[case] expected: &str,
    ) {
        assert_eq!(Destination::new(addr, port, protocol).host_header(), expected);
    }

    #[test]
    fn test_destination_display() {
        let destination = Destination::new("127.0.0.1", 8080, "https");
        assert_eq!(destination.to_string(), "https://127.0.0.1:8080");
        assert!(destination.is_tls());
        assert!(!Destination::default().is_tls());
    }

    #[test]
    fn test_round_trip_time() {
        let mut rtt = RoundTripTime::default();
        assert_eq!(rtt.round_trip_duration(), Duration::ZERO);

        rtt.start_tracking();
        std::thread::sleep(Duration::from_millis(5));
        rtt.stop_tracking();
        assert!(rtt.round_trip_duration() >= Duration::from_millis(5));
    }

    #[tokio::test]
    async fn test_send_against_mock_server() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status/200"))
            .and(header("host", "localhost"))
            .respond_with(ResponseTemplate::new(200).set_body_string("all good"))
            .mount(&server)
            .await;

        let addr = server.address();
        let destination = Destination::new(addr.ip().to_string(), addr.port(), "http");
        let mut request = get("/status/200");
        request.headers_mut().set("Host", "localhost");

        let mut client = quick_client();
        client.new_connection(&destination).await.unwrap();
        let response = client.send(&request).await.unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(response.body_as_string(), "all good");
        assert!(response.raw().starts_with(b"HTTP/1.1 200"));
    }

    #[tokio::test]
    async fn test_chunked_body() {
        let server = scripted_server(
            vec!["HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n6;ext=1\r\n world\r\n0\r\nX-Trailer: t\r\n\r\n"],
            false,
        )
        .await;

        let mut client = quick_client();
        client.new_connection(&server.destination()).await.unwrap();
        let response = client.send(&get("/")).await.unwrap();
        assert_eq!(response.body_as_string(), "hello world");
    }

    #[rstest]
    #[case::size_overflows("HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nffffffffffffffff\r\nhello\r\n0\r\n\r\n")]
    #[case::chunks_add_up("HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n3fffffe\r\nworld\r\n0\r\n\r\n")]
    #[case::content_length("HTTP/1.1 200 OK\r\nContent-Length: 99999999999\r\n\r\nshort")]
    #[tokio::test]
    async fn test_oversized_body_is_a_receive_error(#[case] reply: &'static str) {
        let server = scripted_server(vec![reply], false).await;

        let mut client = quick_client();
        client.new_connection(&server.destination()).await.unwrap();
        let err = client.send(&get("/")).await.unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::ReceiveFailed);
        assert!(err.message.contains("limit"));
    }

    #[tokio::test]
    async fn test_interim_response_is_skipped() {
        let server = scripted_server(
            vec!["HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 403 Forbidden\r\nContent-Length: 7\r\n\r\nblocked"],
            false,
        )
        .await;

        let mut client = quick_client();
        client.new_connection(&server.destination()).await.unwrap();
        let response = client.send(&get("/")).await.unwrap();
        assert_eq!(response.status(), 403);
        assert_eq!(response.body_as_string(), "blocked");
    }

    #[tokio::test]
    async fn test_body_until_close() {
        let server = scripted_server(vec!["HTTP/1.1 200 OK\r\n\r\nstreamed body"], true).await;

        let mut client = quick_client();
        client.new_connection(&server.destination()).await.unwrap();
        let response = client.send(&get("/")).await.unwrap();
        assert_eq!(response.body_as_string(), "streamed body");
    }

    #[tokio::test]
    async fn test_keep_alive_connection_is_reused() {
        let ok = "HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok";
        let server = scripted_server(vec![ok, ok, ok], false).await;
        let destination = server.destination();

        let mut client = quick_client();
        for _ in 0..3 {
            client.new_or_reused_connection(&destination).await.unwrap();
            assert_eq!(client.send(&get("/")).await.unwrap().status(), 200);
        }
        assert_eq!(server.connections(), 1);
    }

    #[tokio::test]
    async fn test_closed_connection_is_not_reused() {
        let close = "HTTP/1.1 200 OK\r\nConnection: close\r\nContent-Length: 0\r\n\r\n";
        let server = scripted_server(vec![close, close], false).await;
        let destination = server.destination();

        let mut client = quick_client();
        for _ in 0..2 {
            client.new_or_reused_connection(&destination).await.unwrap();
            client.send(&get("/")).await.unwrap();
        }
        assert_eq!(server.connections(), 2);
    }

    #[tokio::test]
    async fn test_stale_connection_is_reopened_once() {
        let ok = "HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok";
        let server = scripted_server(vec![ok, ok], true).await;
        let destination = server.destination();

        let mut client = quick_client();
        client.new_or_reused_connection(&destination).await.unwrap();
        client.send(&get("/")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        client.new_or_reused_connection(&destination).await.unwrap();
        let response = client.send(&get("/")).await.unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(server.connections(), 2);
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let destination = Destination::new(addr.ip().to_string(), addr.port(), "http");
        let mut client = quick_client();
        let err = client.new_connection(&destination).await.unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::ConnectFailed);
        assert!(!client.has_connection());
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let destination = Destination::new(addr.ip().to_string(), addr.port(), "http");
        let mut client = quick_client();
        client.new_connection(&destination).await.unwrap();
        let err = client.send(&get("/")).await.unwrap_err();
        assert!(err.is_timeout());
        assert!(!client.has_connection());
    }

    #[tokio::test]
    async fn test_unsupported_protocol() {
        let destination = Destination::new("127.0.0.1", 80, "gopher");
        let mut client = quick_client();
        let err = client.new_connection(&destination).await.unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::ConnectFailed);
    }

    #[tokio::test]
    async fn test_send_without_connection() {
        let mut client = quick_client();
        let err = client.send(&get("/")).await.unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::SendFailed);
    }
}
