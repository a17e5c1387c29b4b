//! Root lifecycle of the sync engine.
//!
//! [`SyncManager`] owns every background task: one backfill-then-stream
//! task and one polling task per actively synced terminal, plus the image
//! archiver. Tasks live in a single [`JoinSet`] so that shutdown can abort
//! and account for all of them.
//!
//! # Lifecycle
//!
//! 1. Create the manager over a migrated database
//! 2. [`start_all`](SyncManager::start_all) spawns the tasks
//! 3. Administrative operations may run at any time
//! 4. [`stop_all`](SyncManager::stop_all) cancels and joins the tasks

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::orchestrator::TerminalSyncOrchestrator;
use crate::reachability::{self, Reachability};
use crate::registry::ClientRegistry;
use crate::report::SyncReport;
use crate::state::SyncState;
use acsync_core::TerminalId;
use acsync_protocol::DeviceInfo;
use acsync_storage::repositories::{SqliteTerminalRepository, TerminalRepository};
use acsync_storage::{
    ArchiveQueue, AttendanceLedgerWriter, EmployeeResolver, ImageArchiver, transaction,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Outcome of a connectivity test.
#[derive(Debug, Clone, Serialize)]
pub struct TerminalTestResult {
    pub terminal_id: TerminalId,
    /// Whether the address would be actively synced
    pub routable: bool,
    /// Whether the terminal answered at all
    pub reachable: bool,
    pub device_info: Option<DeviceInfo>,
    pub error: Option<String>,
}

/// Outcome of importing a terminal's enrolled users.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UserImportReport {
    pub found: usize,
    /// Placeholder employees created
    pub created: usize,
    /// Users that already resolve to an employee
    pub existing: usize,
    pub skipped: usize,
}

struct RunningSync {
    cancel: CancellationToken,
    tasks: JoinSet<SyncResult<()>>,
    orchestrators: HashMap<TerminalId, Arc<TerminalSyncOrchestrator>>,
    writer: AttendanceLedgerWriter,
}

/// Task termination classification for shutdown handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskTermination {
    Success,
    Error,
    /// Aborted by shutdown
    Cancelled,
    Panic,
}

/// Starts, stops and administers terminal sync.
pub struct SyncManager {
    pool: SqlitePool,
    config: Arc<SyncConfig>,
    registry: Arc<ClientRegistry>,
    terminals: SqliteTerminalRepository,
    running: Mutex<Option<RunningSync>>,
}

impl SyncManager {
    pub fn new(pool: SqlitePool, config: SyncConfig) -> Self {
        let config = Arc::new(config);
        Self {
            registry: Arc::new(ClientRegistry::new(pool.clone(), Arc::clone(&config))),
            terminals: SqliteTerminalRepository::new(pool.clone()),
            pool,
            config,
            running: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Lifecycle state of every actively synced terminal.
    pub async fn terminal_states(&self) -> Vec<(TerminalId, SyncState)> {
        let running = self.running.lock().await;
        let mut states: Vec<_> = running
            .iter()
            .flat_map(|r| r.orchestrators.iter())
            .map(|(id, orchestrator)| (*id, orchestrator.state()))
            .collect();
        states.sort_by_key(|(id, _)| *id);
        states
    }

    /// Start backfill, streaming and polling for every active terminal.
    ///
    /// Terminals on non-routable addresses are skipped unless configured
    /// otherwise. Returns the number of terminals actively synced. Calling
    /// this while already running changes nothing.
    ///
    /// # Errors
    /// Storage errors while loading the terminal directory.
    pub async fn start_all(&self) -> SyncResult<usize> {
        let mut running = self.running.lock().await;
        if let Some(current) = running.as_ref() {
            warn!("Sync already running");
            return Ok(current.orchestrators.len());
        }

        let terminals = self.terminals.find_active().await?;
        let (queue, jobs) = ArchiveQueue::channel();
        let writer = AttendanceLedgerWriter::new(self.pool.clone()).with_archive_queue(queue);
        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();
        let mut orchestrators = HashMap::new();

        let archiver = self.archiver();
        tasks.spawn(async move {
            archiver.run(jobs).await;
            Ok(())
        });

        for terminal in terminals {
            let id = terminal.terminal_id();
            let reachability = reachability::classify(&terminal.address);
            if !self.syncs(reachability) {
                info!(
                    terminal_id = %id,
                    address = %terminal.address,
                    "Terminal address is {reachability}, expecting pushed events instead"
                );
                continue;
            }

            let client = match self.registry.client_for(&terminal).await {
                Ok(client) => client,
                Err(e) => {
                    error!(terminal_id = %id, error = %e, "Cannot create device client");
                    continue;
                }
            };
            let orchestrator = Arc::new(TerminalSyncOrchestrator::new(
                terminal,
                client,
                writer.clone(),
                Arc::clone(&self.config),
            ));

            let task = Arc::clone(&orchestrator);
            let token = cancel.child_token();
            tasks.spawn(async move { task.run(token).await });

            if self.config.polling_enabled {
                let task = Arc::clone(&orchestrator);
                let token = cancel.child_token();
                tasks.spawn(async move {
                    task.run_polling(token).await;
                    Ok(())
                });
            }

            orchestrators.insert(id, orchestrator);
        }

        let active = orchestrators.len();
        info!(
            active,
            polling = self.config.polling_enabled,
            stream = self.config.stream_enabled,
            "Sync started"
        );
        *running = Some(RunningSync {
            cancel,
            tasks,
            orchestrators,
            writer,
        });
        Ok(active)
    }

    /// Cancel and join every sync task and release the device clients.
    ///
    /// Does nothing when not running.
    pub async fn stop_all(&self) {
        let Some(mut running) = self.running.lock().await.take() else {
            debug!("Sync not running");
            return;
        };

        running.cancel.cancel();
        running.tasks.abort_all();

        let mut error_count = 0;
        let mut panic_count = 0;
        while let Some(result) = running.tasks.join_next().await {
            match Self::classify_task_result(result) {
                TaskTermination::Success | TaskTermination::Cancelled => {}
                TaskTermination::Error => error_count += 1,
                TaskTermination::Panic => panic_count += 1,
            }
        }

        for (id, orchestrator) in &running.orchestrators {
            if let Err(e) = orchestrator.stop() {
                warn!(terminal_id = %id, error = %e, "Terminal did not stop cleanly");
            }
        }
        self.registry.clear().await;

        if error_count + panic_count > 0 {
            warn!(
                errors = error_count,
                panics = panic_count,
                "Sync stopped with failed tasks"
            );
        } else {
            info!("Sync stopped");
        }
    }

    /// Run one incremental poll of a terminal now.
    ///
    /// # Errors
    /// Unknown, inactive or non-routable terminal, device and storage errors.
    pub async fn manual_sync(&self, terminal_id: TerminalId) -> SyncResult<SyncReport> {
        let report = self
            .with_orchestrator(terminal_id, |orchestrator| async move {
                orchestrator.poll().await
            })
            .await?;
        info!(terminal_id = %terminal_id, %report, "Manual sync complete");
        Ok(report)
    }

    /// Fetch and record an explicit time range from a terminal.
    ///
    /// # Errors
    /// Invalid range, unknown, inactive or non-routable terminal, device and
    /// storage errors.
    pub async fn manual_sync_historical(
        &self,
        terminal_id: TerminalId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> SyncResult<SyncReport> {
        let report = self
            .with_orchestrator(terminal_id, |orchestrator| async move {
                orchestrator.sync_range(from, to).await
            })
            .await?;
        info!(
            terminal_id = %terminal_id,
            from = %from,
            to = %to,
            %report,
            "Historical sync complete"
        );
        Ok(report)
    }

    /// Ask a terminal for its identity.
    ///
    /// Device failures are part of the result, not errors.
    ///
    /// # Errors
    /// Unknown terminal and storage errors.
    pub async fn test_terminal(&self, terminal_id: TerminalId) -> SyncResult<TerminalTestResult> {
        let (terminal, client) = self.registry.lookup(terminal_id).await?;
        let routable = reachability::classify(&terminal.address).is_routable();

        let result = match client.device_info().await {
            Ok(info) => TerminalTestResult {
                terminal_id,
                routable,
                reachable: true,
                device_info: Some(info),
                error: None,
            },
            Err(e) => {
                warn!(terminal_id = %terminal_id, error = %e, "Terminal test failed");
                TerminalTestResult {
                    terminal_id,
                    routable,
                    reachable: !e.is_transport(),
                    device_info: None,
                    error: Some(e.to_string()),
                }
            }
        };
        Ok(result)
    }

    /// Create placeholder employees for users enrolled on a terminal that
    /// do not resolve to anyone in its organization.
    ///
    /// Each placeholder gets an account named `device-<terminal>-<employeeNo>`
    /// and a mapping from the device's employee number.
    ///
    /// # Errors
    /// Unknown terminal, device and storage errors.
    pub async fn import_device_users(
        &self,
        terminal_id: TerminalId,
    ) -> SyncResult<UserImportReport> {
        let (terminal, client) = self.registry.lookup(terminal_id).await?;
        let users = client.fetch_users().await?;
        let resolver = EmployeeResolver;
        let mut report = UserImportReport {
            found: users.len(),
            ..UserImportReport::default()
        };

        for user in &users {
            let employee_no = user.employee_no.trim();
            if employee_no.is_empty() {
                report.skipped += 1;
                continue;
            }

            let mut tx = self.pool.begin().await?;
            let resolution = resolver
                .resolve(&mut tx, &terminal, Some(employee_no))
                .await?;
            if resolution.is_resolved() {
                tx.commit().await?;
                report.existing += 1;
                continue;
            }

            let username = format!("device-{}-{employee_no}", terminal.id);
            let full_name = user
                .name
                .as_deref()
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .unwrap_or(employee_no);
            let employee_id = match transaction::create_placeholder_employee(
                &mut tx,
                terminal.organization_id,
                &username,
                full_name,
            )
            .await
            {
                Ok(id) => id,
                Err(e) if e.is_unique_violation() => {
                    tx.rollback().await?;
                    warn!(
                        terminal_id = %terminal_id,
                        username = %username,
                        "Placeholder account exists without a mapping, skipping user"
                    );
                    report.skipped += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            transaction::upsert_mapping(
                &mut tx,
                employee_id,
                terminal.id,
                employee_no,
                terminal.organization_id,
            )
            .await?;
            tx.commit().await?;

            debug!(
                terminal_id = %terminal_id,
                employee_id,
                employee_no,
                "Placeholder employee created for device user"
            );
            report.created += 1;
        }

        info!(
            terminal_id = %terminal_id,
            found = report.found,
            created = report.created,
            existing = report.existing,
            "Device users imported"
        );
        Ok(report)
    }

    /// Run `op` on a one-off orchestrator for an active terminal that
    /// would also be synced by [`start_all`](Self::start_all).
    ///
    /// While sync is running, the running ledger writer (and its archiver)
    /// is shared. Otherwise pictures queued by `op` are archived before
    /// returning.
    async fn with_orchestrator<T, F, Fut>(&self, terminal_id: TerminalId, op: F) -> SyncResult<T>
    where
        F: FnOnce(TerminalSyncOrchestrator) -> Fut,
        Fut: Future<Output = SyncResult<T>>,
    {
        let (terminal, client) = self.registry.lookup(terminal_id).await?;
        if !terminal.is_active {
            return Err(SyncError::TerminalInactive(terminal_id));
        }
        let reachability = reachability::classify(&terminal.address);
        if !self.syncs(reachability) {
            debug!(
                terminal_id = %terminal_id,
                address = %terminal.address,
                "Refusing manual sync of {reachability} terminal"
            );
            return Err(SyncError::TerminalNotRoutable(terminal_id));
        }

        let running_writer = self.running.lock().await.as_ref().map(|r| r.writer.clone());
        let (writer, pending) = match running_writer {
            Some(writer) => (writer, None),
            None => {
                let (queue, jobs) = ArchiveQueue::channel();
                let writer = AttendanceLedgerWriter::new(self.pool.clone()).with_archive_queue(queue);
                (writer, Some(jobs))
            }
        };

        let orchestrator =
            TerminalSyncOrchestrator::new(terminal, client, writer, Arc::clone(&self.config));
        let result = op(orchestrator).await;

        // The orchestrator held the only sender, so the queue is closed now.
        if let Some(jobs) = pending {
            self.archiver().run(jobs).await;
        }
        result
    }

    /// Whether terminals with this reachability are actively synced.
    fn syncs(&self, reachability: Reachability) -> bool {
        reachability.is_routable() || self.config.sync_private_addresses
    }

    fn archiver(&self) -> ImageArchiver<ClientRegistry> {
        ImageArchiver::new(
            self.pool.clone(),
            Arc::clone(&self.registry),
            self.config.archive.clone(),
        )
    }

    fn classify_task_result(
        result: std::result::Result<SyncResult<()>, tokio::task::JoinError>,
    ) -> TaskTermination {
        match result {
            Ok(Ok(())) => TaskTermination::Success,
            Ok(Err(e)) => {
                debug!(error = %e, "Sync task ended with error");
                TaskTermination::Error
            }
            Err(e) if e.is_cancelled() => TaskTermination::Cancelled,
            Err(_) => TaskTermination::Panic,
        }
    }
}
