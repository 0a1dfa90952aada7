//! HTTP plumbing under the session client
//!
//! `Transport` is the seam between protocol logic and the wire. The
//! production implementation wraps a blocking reqwest client; tests swap in a
//! scripted transport.

use reqwest::blocking::{Body, Client};
use reqwest::header::{CONTENT_TYPE, SET_COOKIE};
use std::io::{self, Cursor, Read};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use crate::config::ApiConfig;
use crate::error::{Result, TransportFailure, UploaderError};
use crate::logging::fmt_ms;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

/// One request against the API, path relative to the configured prefix
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    /// Streams the body through a counting reader when set
    pub progress: Option<TransferProgress>,
}

impl ApiRequest {
    pub fn get(path: &str) -> Self {
        Self {
            method: Method::Get,
            path: path.to_string(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
            progress: None,
        }
    }

    pub fn post(path: &str, content_type: &str, body: Vec<u8>) -> Self {
        Self {
            method: Method::Post,
            path: path.to_string(),
            query: Vec::new(),
            headers: vec![("Content-Type".to_string(), content_type.to_string())],
            body: Some(body),
            progress: None,
        }
    }

    pub fn query(mut self, key: &str, value: &str) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.headers.push((key.to_string(), value.to_string()));
        self
    }

    pub fn with_progress(mut self, progress: TransferProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn header_value(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}

/// What came back over the wire, before any protocol checks
#[derive(Debug, Clone, Default)]
pub struct RawResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub set_cookies: Vec<String>,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Media type without parameters, lowercased.
    pub fn media_type(&self) -> Option<String> {
        self.content_type
            .as_deref()
            .and_then(|ct| ct.split(';').next())
            .map(|ct| ct.trim().to_ascii_lowercase())
    }
}

pub trait Transport: Send + Sync {
    fn send(&self, request: ApiRequest) -> Result<RawResponse>;
}

/// Byte counters and abort flag for the upload in flight.
///
/// Clones share state, so the host can poll or abort from another thread
/// while the worker is blocked inside `send`.
#[derive(Debug, Clone, Default)]
pub struct TransferProgress {
    inner: Arc<ProgressState>,
}

#[derive(Debug, Default)]
struct ProgressState {
    to_write: AtomicU64,
    written: AtomicU64,
    aborted: AtomicBool,
}

impl TransferProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bytes_to_write(&self) -> u64 {
        self.inner.to_write.load(Ordering::Relaxed)
    }

    pub fn bytes_written(&self) -> u64 {
        self.inner.written.load(Ordering::Relaxed)
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::Relaxed)
    }

    pub fn abort(&self) {
        self.inner.aborted.store(true, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.inner.to_write.store(0, Ordering::Relaxed);
        self.inner.written.store(0, Ordering::Relaxed);
        self.inner.aborted.store(false, Ordering::Relaxed);
    }

    pub(crate) fn begin(&self, total: u64) {
        self.inner.written.store(0, Ordering::Relaxed);
        self.inner.to_write.store(total, Ordering::Relaxed);
    }

    pub(crate) fn add(&self, n: u64) {
        self.inner.written.fetch_add(n, Ordering::Relaxed);
    }
}

/// Body reader that counts bytes and fails once the transfer is aborted.
pub struct ProgressReader {
    data: Cursor<Vec<u8>>,
    progress: TransferProgress,
}

impl ProgressReader {
    pub fn new(data: Vec<u8>, progress: TransferProgress) -> Self {
        progress.begin(data.len() as u64);
        Self {
            data: Cursor::new(data),
            progress,
        }
    }
}

impl Read for ProgressReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.progress.is_aborted() {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "transfer aborted",
            ));
        }
        let n = self.data.read(buf)?;
        self.progress.add(n as u64);
        Ok(n)
    }
}

/// reqwest-backed transport
pub struct HttpTransport {
    config: ApiConfig,
    client: Client,
}

impl HttpTransport {
    pub fn new(config: ApiConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.read_timeout())
            .build()
            .map_err(|e| UploaderError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: ApiRequest) -> Result<RawResponse> {
        let url = self.config.endpoint_url(&request.path);
        let start = Instant::now();

        let mut builder = match request.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
        };
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = match request.progress {
                Some(progress) => {
                    let len = body.len() as u64;
                    builder.body(Body::sized(ProgressReader::new(body, progress), len))
                }
                None => builder.body(body),
            };
        }

        let response = builder.send()?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let set_cookies = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::to_string)
            .collect();
        let body = response.bytes()?.to_vec();

        debug!(
            method = request.method.as_str(),
            path = %request.path,
            status,
            elapsed = %fmt_ms(start.elapsed()),
            "API request finished"
        );

        Ok(RawResponse {
            status,
            content_type,
            set_cookies,
            body,
        })
    }
}

/// Map a non-usable response status into a transport failure.
pub(crate) fn status_failure(status: u16, message: String) -> UploaderError {
    UploaderError::Transport(TransportFailure::Status(status, message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_reader_counts_bytes() {
        let progress = TransferProgress::new();
        let mut reader = ProgressReader::new(vec![7u8; 10], progress.clone());
        assert_eq!(progress.bytes_to_write(), 10);

        let mut buf = [0u8; 4];
        reader.read(&mut buf).unwrap();
        assert_eq!(progress.bytes_written(), 4);

        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).unwrap();
        assert_eq!(progress.bytes_written(), 10);
    }

    #[test]
    fn test_abort_fails_the_reader() {
        let progress = TransferProgress::new();
        let mut reader = ProgressReader::new(vec![0u8; 10], progress.clone());
        progress.abort();

        let mut buf = [0u8; 4];
        let err = reader.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionAborted);

        progress.reset();
        assert!(!progress.is_aborted());
        assert_eq!(progress.bytes_to_write(), 0);
    }

    #[test]
    fn test_media_type_ignores_parameters() {
        let resp = RawResponse {
            status: 200,
            content_type: Some("Text/XML; charset=utf-8".into()),
            ..Default::default()
        };
        assert_eq!(resp.media_type().as_deref(), Some("text/xml"));
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let req = ApiRequest::get("auth").header("X-PS-Api-Key", "k");
        assert_eq!(req.header_value("x-ps-api-key"), Some("k"));
        assert!(req.header_value("Cookie").is_none());
    }
}
