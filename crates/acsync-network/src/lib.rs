//! Device communication layer for acsync
//!
//! This crate provides the HTTP client used to talk to access-control
//! terminals over their ISAPI interface. It handles digest
//! authentication, account lockouts, paginated historical search, the
//! reconnecting alert stream, and picture downloads.
//!
//! # Components
//!
//! - **DeviceProtocolClient**: authenticated client for one terminal
//! - **SearchVariant / SearchQuery**: historical search with JSON/XML fallback
//! - **ReconnectPolicy / StreamNotification**: live stream supervision
//!
//! # Example
//!
//! ```no_run
//! use acsync_core::Credentials;
//! use acsync_network::{DeviceClientConfig, DeviceProtocolClient, ReconnectPolicy, StreamNotification};
//! use tokio::sync::mpsc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = DeviceProtocolClient::new(DeviceClientConfig::new(
//!     "203.0.113.10",
//!     Credentials::new("admin", "secret"),
//! ))?;
//!
//! let (tx, mut rx) = mpsc::channel(100);
//! let cancel = CancellationToken::new();
//! tokio::spawn(async move { client.run_event_stream(ReconnectPolicy::default(), tx, cancel).await });
//!
//! while let Some(notification) = rx.recv().await {
//!     if let StreamNotification::Event(raw) = notification {
//!         println!("{raw:?}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod client;
mod error;
mod search;
mod stream;

pub use client::{DeviceClientConfig, DeviceProtocolClient};
pub use error::{DeviceError, DeviceResult};
pub use search::{SearchQuery, SearchVariant};
pub use stream::{ReconnectPolicy, StreamNotification};
