//! HTTP client for one access-control terminal.
//!
//! # Architecture
//!
//! ```text
//! TerminalSyncOrchestrator
//!     │
//!     └─> DeviceProtocolClient ───(HTTP)───> Terminal (ISAPI)
//!            │
//!            ├─> digest retry (401 challenge, answered once)
//!            ├─> lockout gate (no requests until the device unlocks)
//!            ├─> historical search (JSON per minor code, XML fallback)
//!            └─> alert stream (reconnecting, channel notifications)
//! ```
//!
//! # Authentication
//!
//! Every request is first sent without credentials. A `401` carrying a
//! `WWW-Authenticate: Digest` challenge is answered once; a second `401` is
//! reported as `Unauthorized`. A `401` whose body reports a locked account
//! becomes `AccountLocked`, and the client refuses further requests until
//! the reported unlock time has passed.
//!
//! # Example Usage
//!
//! ```no_run
//! use acsync_core::Credentials;
//! use acsync_network::{DeviceClientConfig, DeviceProtocolClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DeviceClientConfig::new("203.0.113.10", Credentials::new("admin", "secret"));
//! let client = DeviceProtocolClient::new(config)?;
//! let info = client.device_info().await?;
//! println!("Connected to {:?}", info.model);
//! # Ok(())
//! # }
//! ```

use crate::error::{DeviceError, DeviceResult};
use acsync_core::constants::{
    DEFAULT_MAX_SEARCH_PAGES, DEFAULT_PAGE_DELAY, DEFAULT_PAGE_SIZE, DEFAULT_REQUEST_TIMEOUT,
    DEFAULT_STREAM_IDLE_TIMEOUT, PATH_DEVICE_INFO, PATH_USER_SEARCH,
};
use acsync_core::{Credentials, default_utc_offset};
use acsync_protocol::{
    DeviceInfo, DeviceStatus, DeviceUser, DigestChallenge, UserPage, UserSearchRequest,
    generate_cnonce,
};
use bytes::Bytes;
use chrono::FixedOffset;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE};
use reqwest::{Method, Response, StatusCode};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, trace, warn};
use uuid::Uuid;

/// How many leading bytes are inspected for an XML error payload.
const XML_SNIFF_LEN: usize = 50;

/// Configuration for one terminal client
#[derive(Debug, Clone)]
pub struct DeviceClientConfig {
    /// Host, host:port, or full base URL of the terminal
    pub address: String,

    pub credentials: Credentials,

    /// Timeout for search, image and info requests
    pub request_timeout: Duration,

    /// Longest silence tolerated on the alert stream
    pub stream_idle_timeout: Duration,

    /// Records requested per search page
    pub page_size: u32,

    /// Hard cap on pages per pagination loop
    pub max_search_pages: u32,

    /// Pause between consecutive pages
    pub page_delay: Duration,

    /// Offset search time bounds are expressed in
    pub utc_offset: FixedOffset,
}

impl DeviceClientConfig {
    /// Configuration with default timeouts and paging.
    pub fn new(address: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            address: address.into(),
            credentials,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            stream_idle_timeout: DEFAULT_STREAM_IDLE_TIMEOUT,
            page_size: DEFAULT_PAGE_SIZE,
            max_search_pages: DEFAULT_MAX_SEARCH_PAGES,
            page_delay: DEFAULT_PAGE_DELAY,
            utc_offset: default_utc_offset(),
        }
    }

    /// Base URL derived from the configured address.
    #[must_use]
    pub fn base_url(&self) -> String {
        let address = self.address.trim().trim_end_matches('/');
        if address.contains("://") {
            address.to_string()
        } else {
            format!("http://{address}")
        }
    }
}

/// Request body that can be replayed for the authenticated retry.
#[derive(Debug, Clone)]
pub(crate) struct RequestBody {
    content_type: &'static str,
    bytes: Vec<u8>,
}

impl RequestBody {
    pub(crate) fn json(bytes: Vec<u8>) -> Self {
        Self {
            content_type: "application/json",
            bytes,
        }
    }

    pub(crate) fn xml(text: String) -> Self {
        Self {
            content_type: "application/xml",
            bytes: text.into_bytes(),
        }
    }
}

/// Authenticated ISAPI client for one terminal
///
/// The client is `Send + Sync` and meant to be shared behind an `Arc`
/// between the stream task, the polling cycle and manual operations.
pub struct DeviceProtocolClient {
    pub(crate) config: DeviceClientConfig,
    base_url: String,
    http: reqwest::Client,
    stream_http: reqwest::Client,
    locked_until: Mutex<Option<Instant>>,
}

impl DeviceProtocolClient {
    /// Create a client. No request is made until an operation is called.
    ///
    /// # Errors
    /// Returns `DeviceError::Transport` if the HTTP client cannot be built.
    pub fn new(config: DeviceClientConfig) -> DeviceResult<Self> {
        let base_url = config.base_url();
        debug!("Creating device client for {}", base_url);

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| DeviceError::Transport(format!("failed to build HTTP client: {e}")))?;
        let stream_http = reqwest::Client::builder()
            .connect_timeout(config.request_timeout)
            .read_timeout(config.stream_idle_timeout)
            .build()
            .map_err(|e| DeviceError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            config,
            base_url,
            http,
            stream_http,
            locked_until: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn config(&self) -> &DeviceClientConfig {
        &self.config
    }

    /// Remaining lockout, if the terminal reported one that has not elapsed.
    #[must_use]
    pub fn lockout_remaining(&self) -> Option<Duration> {
        let mut guard = self.locked_until.lock().unwrap_or_else(PoisonError::into_inner);
        match *guard {
            Some(until) if until > Instant::now() => Some(until - Instant::now()),
            Some(_) => {
                *guard = None;
                None
            }
            None => None,
        }
    }

    fn record_lockout(&self, remaining: Duration) {
        error!(
            base_url = %self.base_url,
            remaining_secs = remaining.as_secs(),
            "Terminal account locked, suspending requests"
        );
        let mut guard = self.locked_until.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = Some(Instant::now() + remaining);
    }

    /// Send a request, answering a digest challenge once.
    pub(crate) async fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<&RequestBody>,
    ) -> DeviceResult<Response> {
        self.execute_with(&self.http, method, path, body).await
    }

    /// Same as [`execute`](Self::execute) on the long-lived stream client.
    pub(crate) async fn execute_streaming(&self, path: &str) -> DeviceResult<Response> {
        self.execute_with(&self.stream_http, Method::GET, path, None).await
    }

    async fn execute_with(
        &self,
        http: &reqwest::Client,
        method: Method,
        path: &str,
        body: Option<&RequestBody>,
    ) -> DeviceResult<Response> {
        if let Some(remaining) = self.lockout_remaining() {
            return Err(DeviceError::AccountLocked { remaining });
        }

        let url = format!("{}{}", self.base_url, path);
        trace!(method = %method, url = %url, "Sending request");

        let first = dispatch(http, &method, &url, body, None).await?;
        if first.status() != StatusCode::UNAUTHORIZED {
            return self.check_status(first).await;
        }

        let challenge = first
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let unauthorized_body = first.text().await.unwrap_or_default();
        self.check_lockout_body(&unauthorized_body)?;

        let challenge = challenge.ok_or_else(|| {
            DeviceError::AuthChallenge("401 without WWW-Authenticate header".to_string())
        })?;
        let challenge = DigestChallenge::parse(&challenge)?;
        let authorization = challenge.authorization(
            &self.config.credentials,
            method.as_str(),
            path,
            &generate_cnonce(),
        );

        let second = dispatch(http, &method, &url, body, Some(authorization)).await?;
        if second.status() == StatusCode::UNAUTHORIZED {
            let rejected_body = second.text().await.unwrap_or_default();
            self.check_lockout_body(&rejected_body)?;
            warn!(base_url = %self.base_url, "Digest credentials rejected");
            return Err(DeviceError::Unauthorized);
        }
        self.check_status(second).await
    }

    fn check_lockout_body(&self, body: &str) -> DeviceResult<()> {
        if let DeviceStatus::Locked { remaining } = DeviceStatus::parse(body) {
            self.record_lockout(remaining);
            return Err(DeviceError::AccountLocked { remaining });
        }
        Ok(())
    }

    async fn check_status(&self, response: Response) -> DeviceResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let device_status = DeviceStatus::parse(&body);
        if let DeviceStatus::Locked { remaining } = device_status {
            self.record_lockout(remaining);
            return Err(DeviceError::AccountLocked { remaining });
        }
        let message = device_status
            .describe()
            .or_else(|| status.canonical_reason().map(str::to_string))
            .unwrap_or_else(|| "request failed".to_string());
        debug!(status = status.as_u16(), message = %message, "Terminal returned error status");
        Err(DeviceError::HttpStatus {
            status: status.as_u16(),
            message,
        })
    }

    /// Fetch a captured picture by its device reference.
    ///
    /// # Errors
    /// Returns `ImageRejected` for XML error payloads (even under 200) and
    /// empty bodies; transport and auth errors otherwise.
    pub async fn fetch_image(&self, reference: &str) -> DeviceResult<Bytes> {
        let path = device_local_path(reference)
            .ok_or_else(|| DeviceError::ImageRejected(format!("unusable reference: {reference}")))?;
        let response = self.execute(Method::GET, &path, None).await?;

        let xml_content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.to_ascii_lowercase().contains("xml"));
        let bytes = response.bytes().await?;

        if xml_content_type || looks_like_xml(&bytes) {
            let status = DeviceStatus::parse(&String::from_utf8_lossy(&bytes));
            return Err(DeviceError::ImageRejected(
                status
                    .describe()
                    .unwrap_or_else(|| "device returned an XML payload".to_string()),
            ));
        }
        if bytes.is_empty() {
            return Err(DeviceError::ImageRejected("empty body".to_string()));
        }
        Ok(bytes)
    }

    /// Fetch the terminal's identity.
    ///
    /// # Errors
    /// Transport, auth and decode failures.
    pub async fn device_info(&self) -> DeviceResult<DeviceInfo> {
        let response = self.execute(Method::GET, PATH_DEVICE_INFO, None).await?;
        let body = response.text().await?;
        Ok(DeviceInfo::parse(&body)?)
    }

    /// Page through the users enrolled on the terminal.
    ///
    /// # Errors
    /// Transport, auth and decode failures.
    pub async fn fetch_users(&self) -> DeviceResult<Vec<DeviceUser>> {
        let search_id = Uuid::new_v4().to_string();
        let mut users = Vec::new();

        for page_no in 0..self.config.max_search_pages {
            let request = UserSearchRequest {
                search_id: search_id.clone(),
                position: u32::try_from(users.len()).unwrap_or(u32::MAX),
                max_results: self.config.page_size,
            };
            let body = RequestBody::json(request.to_json()?);
            let response = self.execute(Method::POST, PATH_USER_SEARCH, Some(&body)).await?;
            let page = UserPage::from_json(&response.bytes().await?)?;

            let fetched = page.users.len();
            users.extend(page.users);
            if !page.has_more || fetched == 0 {
                return Ok(users);
            }
            if page_no + 1 < self.config.max_search_pages {
                tokio::time::sleep(self.config.page_delay).await;
            }
        }

        warn!(
            base_url = %self.base_url,
            pages = self.config.max_search_pages,
            "User search still reports more results, stopping"
        );
        Ok(users)
    }
}

impl std::fmt::Debug for DeviceProtocolClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceProtocolClient")
            .field("base_url", &self.base_url)
            .field("credentials", &self.config.credentials)
            .finish()
    }
}

async fn dispatch(
    http: &reqwest::Client,
    method: &Method,
    url: &str,
    body: Option<&RequestBody>,
    authorization: Option<String>,
) -> DeviceResult<Response> {
    let mut request = http.request(method.clone(), url);
    if let Some(body) = body {
        request = request
            .header(CONTENT_TYPE, body.content_type)
            .body(body.bytes.clone());
    }
    if let Some(authorization) = authorization {
        request = request.header(AUTHORIZATION, authorization);
    }
    Ok(request.send().await?)
}

/// Reduce a picture reference to a request target on the terminal.
///
/// Drops the `@WEB...` storage suffix and any scheme/host prefix.
pub(crate) fn device_local_path(reference: &str) -> Option<String> {
    let reference = reference.trim();
    let reference = reference.split('@').next().unwrap_or(reference);

    let path = match reference.find("://") {
        Some(scheme_end) => {
            let after_scheme = &reference[scheme_end + 3..];
            &after_scheme[after_scheme.find('/')?..]
        }
        None => reference,
    };

    if path.is_empty() || path == "/" {
        return None;
    }
    Some(if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    })
}

fn looks_like_xml(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(XML_SNIFF_LEN)];
    String::from_utf8_lossy(head).contains("<?xml")
}
