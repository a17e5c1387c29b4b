//! Sync of one terminal.
//!
//! The orchestrator drives a terminal through its lifecycle (see
//! [`SyncState`]): a bulk backfill of recent history, then the live stream
//! when enabled. Scheduled polling runs next to it as a separate unit of
//! work through [`run_polling`](TerminalSyncOrchestrator::run_polling).
//! Stream and polling write through the same ledger writer; duplicate
//! suppression keeps interleaved writes exactly-once.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::report::SyncReport;
use crate::state::{StateTransition, SyncState, SyncStateMachine};
use acsync_core::NormalizedEvent;
use acsync_network::{DeviceProtocolClient, SearchQuery, StreamNotification};
use acsync_protocol::{EventNormalizer, RawDeviceEvent, TimeWindow};
use acsync_storage::models::Terminal;
use acsync_storage::repositories::{AttendanceLogRepository, SqliteAttendanceLogRepository};
use acsync_storage::AttendanceLedgerWriter;
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Overlap of an incremental poll with the newest stored event.
const POLL_OVERLAP: Duration = Duration::from_secs(60);

const STREAM_CHANNEL_CAPACITY: usize = 256;

/// How a live stream run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// Cancelled by shutdown.
    Cancelled,
    /// Reconnect attempts exhausted.
    Exhausted { attempts: u32 },
}

/// Result of one live stream run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamOutcome {
    pub end: StreamEnd,
    pub report: SyncReport,
}

/// Drives backfill, live stream and polling for one terminal.
pub struct TerminalSyncOrchestrator {
    terminal: Terminal,
    client: Arc<DeviceProtocolClient>,
    writer: AttendanceLedgerWriter,
    logs: SqliteAttendanceLogRepository,
    normalizer: EventNormalizer,
    config: Arc<SyncConfig>,
    state: Mutex<SyncStateMachine>,
}

impl TerminalSyncOrchestrator {
    pub fn new(
        terminal: Terminal,
        client: Arc<DeviceProtocolClient>,
        writer: AttendanceLedgerWriter,
        config: Arc<SyncConfig>,
    ) -> Self {
        Self {
            logs: SqliteAttendanceLogRepository::new(writer.pool().clone()),
            normalizer: config.normalizer(),
            terminal,
            client,
            writer,
            config,
            state: Mutex::new(SyncStateMachine::new()),
        }
    }

    pub fn terminal(&self) -> &Terminal {
        &self.terminal
    }

    pub fn client(&self) -> &Arc<DeviceProtocolClient> {
        &self.client
    }

    pub fn state(&self) -> SyncState {
        self.state_machine().current_state()
    }

    /// Lifecycle transitions so far, oldest first.
    pub fn state_history(&self) -> Vec<StateTransition> {
        self.state_machine().history().iter().cloned().collect()
    }

    /// Backfill, then stream until cancelled or the stream gives up.
    ///
    /// A failed backfill is logged and does not prevent streaming.
    ///
    /// # Errors
    /// Returns `SyncError::Core` if the terminal was already started or stopped.
    pub async fn run(&self, cancel: CancellationToken) -> SyncResult<()> {
        self.transition(SyncState::Backfilling)?;
        match self.backfill().await {
            Ok(report) => info!(terminal_id = self.terminal.id, %report, "Backfill complete"),
            Err(e) => self.log_failure(&e, "Backfill failed"),
        }
        if cancel.is_cancelled() {
            return Ok(());
        }

        if !self.config.stream_enabled {
            self.transition(SyncState::Polling)?;
            return Ok(());
        }

        self.transition(SyncState::Streaming)?;
        let outcome = self.stream(cancel).await;
        info!(terminal_id = self.terminal.id, report = %outcome.report, "Live stream ended");

        if let StreamEnd::Exhausted { attempts } = outcome.end {
            warn!(
                terminal_id = self.terminal.id,
                attempts,
                "Live stream gave up, continuing with scheduled polling only"
            );
            self.transition(SyncState::Polling)?;
        }
        Ok(())
    }

    /// Fetch and record the configured lookback of history.
    ///
    /// # Errors
    /// Device errors from the search and storage errors from the watermark
    /// queries; per-event failures are counted in the report instead.
    pub async fn backfill(&self) -> SyncResult<SyncReport> {
        let now = Utc::now();
        let window = TimeWindow::new(back_from(now, self.config.initial_lookback()), now);
        info!(
            terminal_id = self.terminal.id,
            start = %window.start,
            "Backfilling terminal history"
        );
        self.sync_window(window).await
    }

    /// Fetch and record an explicit time range.
    ///
    /// # Errors
    /// `InvalidRange` when `to` is not after `from`; otherwise as
    /// [`backfill`](Self::backfill).
    pub async fn sync_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> SyncResult<SyncReport> {
        if to <= from {
            return Err(SyncError::InvalidRange(format!("{from} is not before {to}")));
        }
        self.sync_window(TimeWindow::new(from, to)).await
    }

    /// One incremental poll: a recent window, minus serials already stored.
    ///
    /// # Errors
    /// As [`backfill`](Self::backfill).
    pub async fn poll(&self) -> SyncResult<SyncReport> {
        let terminal = &self.terminal;
        let latest = self
            .logs
            .latest_event_time(&terminal.name, terminal.organization_id)
            .await?;
        let last_serial = self
            .logs
            .max_numeric_serial(&terminal.name, terminal.organization_id)
            .await?;
        let window = poll_window(
            Utc::now(),
            latest,
            self.config.initial_lookback(),
            self.config.incremental_window,
        );
        debug!(
            terminal_id = terminal.id,
            start = %window.start,
            last_serial = ?last_serial,
            "Polling terminal"
        );

        let query = SearchQuery::window(window).with_max_results(self.config.max_poll_results);
        let events = self
            .client
            .search_newer_than(self.config.search_variant, query, last_serial)
            .await?;
        Ok(self.process_events(&events).await)
    }

    /// Scheduled polling: once after the startup delay, then every interval.
    ///
    /// Failures are logged and retried on the next tick. Returns when
    /// cancelled.
    pub async fn run_polling(&self, cancel: CancellationToken) {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(self.config.initial_poll_delay) => {}
        }

        let mut interval = tokio::time::interval(self.config.polling_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = interval.tick() => {}
            }

            if let Some(remaining) = self.client.lockout_remaining() {
                warn!(
                    terminal_id = self.terminal.id,
                    remaining_secs = remaining.as_secs(),
                    "Terminal account locked, skipping poll"
                );
                continue;
            }

            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = self.poll() => result,
            };
            match result {
                Ok(report) if report.saved > 0 => {
                    info!(terminal_id = self.terminal.id, %report, "Poll complete");
                }
                Ok(report) => debug!(terminal_id = self.terminal.id, %report, "Poll complete"),
                Err(e) => self.log_failure(&e, "Poll failed"),
            }
        }
    }

    /// Consume the live stream until cancelled or exhausted.
    pub async fn stream(&self, cancel: CancellationToken) -> StreamOutcome {
        let (tx, mut rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let producer = self
            .client
            .run_event_stream(self.config.reconnect, tx, cancel);

        let consumer = async {
            let mut report = SyncReport::default();
            let mut end = StreamEnd::Cancelled;

            while let Some(notification) = rx.recv().await {
                match notification {
                    StreamNotification::Connected => {
                        debug!(terminal_id = self.terminal.id, "Live stream connected");
                    }
                    StreamNotification::Event(raw) => {
                        if let Some(event) = self.normalizer.normalize(&raw, Utc::now()) {
                            report.total_found += 1;
                            self.record(&event, &mut report).await;
                        }
                    }
                    StreamNotification::Error(e) => match e.lockout_remaining() {
                        Some(remaining) => error!(
                            terminal_id = self.terminal.id,
                            remaining_secs = remaining.as_secs(),
                            "Terminal account locked, stream paused"
                        ),
                        None => debug!(terminal_id = self.terminal.id, error = %e, "Live stream error"),
                    },
                    StreamNotification::StreamFailed { attempts } => {
                        end = StreamEnd::Exhausted { attempts };
                    }
                    _ => {}
                }
            }
            StreamOutcome { end, report }
        };

        let ((), outcome) = tokio::join!(producer, consumer);
        outcome
    }

    /// Move to `Stopped`. Stopping twice is a no-op.
    ///
    /// # Errors
    /// Never in practice; every other state may stop.
    pub fn stop(&self) -> SyncResult<()> {
        let mut machine = self.state_machine();
        if machine.current_state() != SyncState::Stopped {
            machine.transition_to(SyncState::Stopped)?;
            debug!(terminal_id = self.terminal.id, "Terminal sync stopped");
        }
        Ok(())
    }

    /// Normalize and record a batch of raw records.
    pub async fn process_events(&self, events: &[RawDeviceEvent]) -> SyncReport {
        let received_at = Utc::now();
        let mut report = SyncReport {
            total_found: events.len(),
            ..SyncReport::default()
        };

        for raw in events {
            let Some(event) = self.normalizer.normalize(raw, received_at) else {
                trace!(terminal_id = self.terminal.id, "Skipping non-access record");
                continue;
            };
            self.record(&event, &mut report).await;
        }
        report
    }

    async fn sync_window(&self, window: TimeWindow) -> SyncResult<SyncReport> {
        let events = self
            .client
            .search(self.config.search_variant, SearchQuery::window(window))
            .await?;
        Ok(self.process_events(&events).await)
    }

    async fn record(&self, event: &NormalizedEvent, report: &mut SyncReport) {
        match self.writer.record(self.terminal.terminal_id(), event).await {
            Ok(outcome) => report.record(&outcome),
            Err(e) => {
                error!(
                    terminal_id = self.terminal.id,
                    serial = %event.serial_number,
                    error = %e,
                    "Failed to record attendance event"
                );
                report.record_error();
            }
        }
    }

    fn transition(&self, to: SyncState) -> SyncResult<()> {
        let transition = self.state_machine().transition_to(to)?;
        debug!(
            terminal_id = self.terminal.id,
            from = %transition.from,
            to = %transition.to,
            "Sync state changed"
        );
        Ok(())
    }

    fn state_machine(&self) -> std::sync::MutexGuard<'_, SyncStateMachine> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn log_failure(&self, err: &SyncError, message: &str) {
        if let Some(remaining) = err.lockout_remaining() {
            error!(
                terminal_id = self.terminal.id,
                remaining_secs = remaining.as_secs(),
                "{message}: terminal account locked"
            );
        } else if err.is_transport() {
            warn!(
                terminal_id = self.terminal.id,
                error = %err,
                "{message}: terminal unreachable, retrying next cycle"
            );
        } else {
            error!(terminal_id = self.terminal.id, error = %err, "{message}");
        }
    }
}

/// Window of an incremental poll.
///
/// Starts one minute before the newest stored event, but never later than
/// `incremental` before `now` and never earlier than `lookback` before it.
pub fn poll_window(
    now: DateTime<Utc>,
    latest: Option<DateTime<Utc>>,
    lookback: Duration,
    incremental: Duration,
) -> TimeWindow {
    let earliest = back_from(now, lookback);
    let latest_start = back_from(now, incremental);
    let start = latest
        .map_or(earliest, |t| back_from(t, POLL_OVERLAP))
        .max(earliest)
        .min(latest_start);
    TimeWindow::new(start, now)
}

fn back_from(instant: DateTime<Utc>, span: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(span)
        .ok()
        .and_then(|span| instant.checked_sub_signed(span))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
