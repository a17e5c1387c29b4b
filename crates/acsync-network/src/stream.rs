//! Live alert stream with bounded reconnection.
//!
//! The stream task owns one long-lived connection at a time and reports to
//! its owner over a channel:
//!
//! ```text
//!            connect ok                 record decoded
//!  ┌──────┐ ───────────> Connected ───> Event(raw) ...
//!  │start │
//!  └──────┘ <─────────── Error(e) <──── transport failure / device close
//!      ^        sleep base × n
//!      │                                  n > max attempts
//!      └── n = consecutive failures ────> StreamFailed, task ends
//! ```
//!
//! A successful connection resets the failure count. Lockout failures wait
//! at least until the device unlocks.

use crate::client::DeviceProtocolClient;
use crate::error::DeviceError;
use acsync_core::constants::{
    DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_DELAY, PATH_ALERT_STREAM,
};
use acsync_protocol::normalizer::is_access_event;
use acsync_protocol::{RawDeviceEvent, StreamDecoder};
use futures::StreamExt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Notification from the stream task to its owner.
#[derive(Debug)]
#[non_exhaustive]
pub enum StreamNotification {
    /// Stream (re)connected.
    Connected,
    /// One decoded record.
    Event(RawDeviceEvent),
    /// Connection attempt or live connection failed.
    Error(DeviceError),
    /// Reconnect attempts exhausted; the task has stopped.
    StreamFailed { attempts: u32 },
}

/// Attempt-scaled reconnect delay with a hard ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_RECONNECT_DELAY,
            max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnecting after `failures` consecutive failures, or
    /// `None` once the ceiling is exceeded.
    #[must_use]
    pub fn delay_for(&self, failures: u32) -> Option<Duration> {
        (failures >= 1 && failures <= self.max_attempts).then(|| self.base_delay * failures)
    }
}

/// Why one connection ended.
enum StreamEnd {
    /// Owner dropped the receiver.
    Abandoned,
    Failed(DeviceError),
}

impl DeviceProtocolClient {
    /// Run the alert stream until cancelled, abandoned, or exhausted.
    ///
    /// Notifications are delivered in order on `notify`. The task never
    /// returns an error; failures are reported as notifications.
    pub async fn run_event_stream(
        &self,
        policy: ReconnectPolicy,
        notify: mpsc::Sender<StreamNotification>,
        cancel: CancellationToken,
    ) {
        let mut failures: u32 = 0;

        loop {
            let end = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(base_url = %self.base_url(), "Alert stream cancelled");
                    return;
                }
                end = self.stream_once(&notify, &mut failures) => end,
            };

            let err = match end {
                StreamEnd::Abandoned => {
                    debug!(base_url = %self.base_url(), "Stream receiver dropped, stopping");
                    return;
                }
                StreamEnd::Failed(err) => err,
            };

            failures += 1;
            let lockout = err.lockout_remaining();
            warn!(
                base_url = %self.base_url(),
                attempt = failures,
                error = %err,
                "Alert stream failed"
            );
            if notify.send(StreamNotification::Error(err)).await.is_err() {
                return;
            }

            let Some(delay) = policy.delay_for(failures) else {
                error!(
                    base_url = %self.base_url(),
                    attempts = failures,
                    "Alert stream reconnect attempts exhausted, giving up"
                );
                let _ = notify
                    .send(StreamNotification::StreamFailed { attempts: failures })
                    .await;
                return;
            };
            let delay = lockout.map_or(delay, |remaining| remaining.max(delay));

            info!(
                base_url = %self.base_url(),
                attempt = failures,
                delay_ms = delay.as_millis() as u64,
                "Reconnecting alert stream"
            );
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn stream_once(
        &self,
        notify: &mpsc::Sender<StreamNotification>,
        failures: &mut u32,
    ) -> StreamEnd {
        let response = match self.execute_streaming(PATH_ALERT_STREAM).await {
            Ok(response) => response,
            Err(e) => return StreamEnd::Failed(e),
        };

        *failures = 0;
        info!(base_url = %self.base_url(), "Alert stream connected");
        if notify.send(StreamNotification::Connected).await.is_err() {
            return StreamEnd::Abandoned;
        }

        let mut decoder = StreamDecoder::new();
        let mut body = response.bytes_stream();

        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => return StreamEnd::Failed(e.into()),
            };
            trace!(bytes = chunk.len(), "Alert stream chunk");

            for record in decoder.feed(&chunk) {
                let Some(raw) = RawDeviceEvent::from_json(record) else {
                    continue;
                };
                if !is_access_event(&raw) {
                    trace!("Dropping non-access stream record");
                    continue;
                }
                if notify.send(StreamNotification::Event(raw)).await.is_err() {
                    return StreamEnd::Abandoned;
                }
            }
        }

        StreamEnd::Failed(DeviceError::Transport(
            "alert stream closed by device".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1, Some(5))]
    #[case(2, Some(10))]
    #[case(5, Some(25))]
    #[case(6, None)]
    #[case(0, None)]
    fn test_reconnect_delay_scales_with_attempt(#[case] failures: u32, #[case] secs: Option<u64>) {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(failures), secs.map(Duration::from_secs));
    }

    #[test]
    fn test_custom_policy() {
        let policy = ReconnectPolicy {
            base_delay: Duration::from_millis(10),
            max_attempts: 2,
        };
        assert_eq!(policy.delay_for(2), Some(Duration::from_millis(20)));
        assert_eq!(policy.delay_for(3), None);
    }
}
