//! Mock terminal for integration tests.
//!
//! A minimal HTTP/1.1 server bound to `127.0.0.1:0`. Each connection
//! serves one request and is closed, which keeps the parser trivial and
//! forces the client through a fresh connection for the digest retry.
//! Routing is a closure over the parsed request; [`MockDevice::digest`]
//! wraps a handler with challenge/verify behaviour.

#![allow(dead_code)]

use acsync_core::Credentials;
use acsync_protocol::DigestChallenge;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub const REALM: &str = "DS-K1T671";
pub const NONCE: &str = "4e5749a2c3f1d8b0";
pub const USERNAME: &str = "admin";
pub const PASSWORD: &str = "Passw0rd!";

/// Parsed request as seen by the mock.
#[derive(Debug, Clone)]
pub struct MockRequest {
    pub method: String,
    pub target: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl MockRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn body_json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap_or(serde_json::Value::Null)
    }
}

/// Response the mock writes back.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// Body pieces written with a pause in between, without Content-Length.
    pub chunks: Vec<Vec<u8>>,
    pub chunk_pause: Duration,
}

impl MockResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
            chunks: Vec::new(),
            chunk_pause: Duration::from_millis(5),
        }
    }

    pub fn json(body: serde_json::Value) -> Self {
        Self::new(200)
            .header("Content-Type", "application/json")
            .body(body.to_string().into_bytes())
    }

    pub fn xml(status: u16, body: &str) -> Self {
        Self::new(status)
            .header("Content-Type", "application/xml")
            .body(body.as_bytes().to_vec())
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// Stream `chunks` and close the connection afterwards.
    pub fn streamed(mut self, chunks: Vec<&str>) -> Self {
        self.chunks = chunks.into_iter().map(|c| c.as_bytes().to_vec()).collect();
        self
    }

    pub fn challenge() -> Self {
        Self::new(401).header(
            "WWW-Authenticate",
            &format!(r#"Digest qop="auth", realm="{REALM}", nonce="{NONCE}", stale="FALSE""#),
        )
    }
}

type Handler = dyn Fn(&MockRequest) -> MockResponse + Send + Sync;

/// Running mock terminal.
pub struct MockDevice {
    pub addr: SocketAddr,
    requests: Arc<AtomicUsize>,
    log: Arc<std::sync::Mutex<Vec<MockRequest>>>,
}

impl MockDevice {
    /// Serve every request with `handler`.
    pub async fn start<F>(handler: F) -> Self
    where
        F: Fn(&MockRequest) -> MockResponse + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(AtomicUsize::new(0));
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let handler: Arc<Handler> = Arc::new(handler);

        let counter = Arc::clone(&requests);
        let request_log = Arc::clone(&log);
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    return;
                };
                let handler = Arc::clone(&handler);
                let counter = Arc::clone(&counter);
                let request_log = Arc::clone(&request_log);
                tokio::spawn(async move {
                    serve(socket, handler, counter, request_log).await;
                });
            }
        });

        Self {
            addr,
            requests,
            log,
        }
    }

    /// Serve `handler` behind digest authentication with the test credentials.
    pub async fn digest<F>(handler: F) -> Self
    where
        F: Fn(&MockRequest) -> MockResponse + Send + Sync + 'static,
    {
        Self::start(move |request| match request.header("authorization") {
            None => MockResponse::challenge(),
            Some(header) if verify_digest(request, header) => handler(request),
            Some(_) => MockResponse::challenge(),
        })
        .await
    }

    pub fn address(&self) -> String {
        self.addr.to_string()
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<MockRequest> {
        self.log.lock().unwrap().clone()
    }
}

pub fn credentials() -> Credentials {
    Credentials::new(USERNAME, PASSWORD)
}

/// Check an `Authorization: Digest` header against the test credentials.
pub fn verify_digest(request: &MockRequest, header: &str) -> bool {
    let params: HashMap<String, String> = header
        .trim_start_matches("Digest ")
        .split(", ")
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim_matches('"').to_string()))
        .collect();

    let challenge = DigestChallenge {
        realm: REALM.to_string(),
        nonce: NONCE.to_string(),
        qop: Some("auth".to_string()),
        opaque: None,
        algorithm: None,
    };
    let Some(cnonce) = params.get("cnonce") else {
        return false;
    };
    let expected = challenge.response(&credentials(), &request.method, &request.target, cnonce);

    params.get("username").map(String::as_str) == Some(USERNAME)
        && params.get("uri").map(String::as_str) == Some(request.target.as_str())
        && params.get("nc").map(String::as_str) == Some("00000001")
        && params.get("response") == Some(&expected)
}

async fn serve(
    mut socket: TcpStream,
    handler: Arc<Handler>,
    counter: Arc<AtomicUsize>,
    log: Arc<std::sync::Mutex<Vec<MockRequest>>>,
) {
    let Some(request) = read_request(&mut socket).await else {
        return;
    };
    counter.fetch_add(1, Ordering::SeqCst);
    log.lock().unwrap().push(request.clone());

    let response = handler(&request);
    let reason = match response.status {
        200 => "OK",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        _ => "Error",
    };

    let mut head = format!("HTTP/1.1 {} {reason}\r\nConnection: close\r\n", response.status);
    for (name, value) in &response.headers {
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    if response.chunks.is_empty() {
        head.push_str(&format!("Content-Length: {}\r\n\r\n", response.body.len()));
        let _ = socket.write_all(head.as_bytes()).await;
        let _ = socket.write_all(&response.body).await;
    } else {
        head.push_str("\r\n");
        let _ = socket.write_all(head.as_bytes()).await;
        for chunk in &response.chunks {
            let _ = socket.write_all(chunk).await;
            let _ = socket.flush().await;
            tokio::time::sleep(response.chunk_pause).await;
        }
    }
    let _ = socket.shutdown().await;
}

async fn read_request(socket: &mut TcpStream) -> Option<MockRequest> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    let head_end = loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buffer.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buffer[..head_end]).into_owned();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let target = request_line.next()?.to_string();

    let headers: HashMap<String, String> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();

    let length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let mut body = buffer[head_end..].to_vec();
    while body.len() < length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }

    Some(MockRequest {
        method,
        target,
        headers,
        body,
    })
}
