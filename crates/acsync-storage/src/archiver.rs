//! Face picture archival with per-employee retention.
//!
//! The ledger writer queues an [`ArchiveJob`] after its transaction commits.
//! The archiver downloads the picture through an [`ImageFetcher`], stores it
//! as `face_<terminal>_<serial>_<epoch>.<ext>`, points the ledger row at the
//! public path and evicts the employee's oldest archived pictures beyond the
//! retention limit. Failures are logged and never reach the writer.

use crate::error::StorageResult;
use crate::repositories::{AttendanceLogRepository, SqliteAttendanceLogRepository};
use acsync_core::TerminalId;
use acsync_core::constants::{
    DEFAULT_IMAGE_DIR, DEFAULT_IMAGE_PUBLIC_PREFIX, IMAGE_RETENTION_PER_EMPLOYEE,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::fmt::Display;
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

const DEFAULT_EXTENSION: &str = "jpg";

/// Source of picture bytes for a terminal-local reference.
pub trait ImageFetcher: Send + Sync {
    type Error: Display + Send;

    fn fetch_image(
        &self,
        terminal_id: TerminalId,
        reference: &str,
    ) -> impl Future<Output = Result<Bytes, Self::Error>> + Send;
}

/// One written ledger row whose picture should be archived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveJob {
    pub terminal_id: TerminalId,
    pub entry_id: i64,
    pub employee_id: Option<i64>,
    pub serial_number: String,
    pub event_time: DateTime<Utc>,
    /// Device-local picture reference as reported by the terminal
    pub reference: String,
}

/// Sending half of the archive queue, held by the ledger writer.
#[derive(Debug, Clone)]
pub struct ArchiveQueue(mpsc::UnboundedSender<ArchiveJob>);

impl ArchiveQueue {
    /// Create a queue and the receiver to hand to [`ImageArchiver::run`].
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ArchiveJob>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self(tx), rx)
    }

    /// Queue a job without waiting. Returns `false` if the archiver is gone.
    pub fn submit(&self, job: ArchiveJob) -> bool {
        let entry_id = job.entry_id;
        let sent = self.0.send(job).is_ok();
        if !sent {
            debug!(entry_id, "Image archiver stopped, picture left on device");
        }
        sent
    }
}

/// Where and how many pictures are kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveConfig {
    pub directory: PathBuf,
    /// URL prefix stored in the ledger, e.g. `/uploads/faces`
    pub public_prefix: String,
    /// Pictures kept per employee
    pub retention: usize,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(DEFAULT_IMAGE_DIR),
            public_prefix: DEFAULT_IMAGE_PUBLIC_PREFIX.to_string(),
            retention: IMAGE_RETENTION_PER_EMPLOYEE,
        }
    }
}

/// Downloads, stores and evicts face pictures.
pub struct ImageArchiver<F> {
    logs: SqliteAttendanceLogRepository,
    fetcher: Arc<F>,
    config: ArchiveConfig,
}

impl<F: ImageFetcher> ImageArchiver<F> {
    pub fn new(pool: SqlitePool, fetcher: Arc<F>, config: ArchiveConfig) -> Self {
        Self {
            logs: SqliteAttendanceLogRepository::new(pool),
            fetcher,
            config,
        }
    }

    pub fn config(&self) -> &ArchiveConfig {
        &self.config
    }

    /// Process jobs until every [`ArchiveQueue`] is dropped.
    pub async fn run(&self, mut jobs: mpsc::UnboundedReceiver<ArchiveJob>) {
        while let Some(job) = jobs.recv().await {
            self.process(&job).await;
        }
        debug!("Image archive queue closed");
    }

    /// Archive one job, logging instead of returning failures.
    pub async fn process(&self, job: &ArchiveJob) {
        if let Err(e) = self.archive(job).await {
            error!(
                terminal_id = %job.terminal_id,
                entry_id = job.entry_id,
                error = %e,
                "Image archival failed"
            );
        }
    }

    /// Archive one job.
    ///
    /// Returns the stored public path, or `None` when the download failed and
    /// the row keeps the device reference.
    ///
    /// # Errors
    /// Database and filesystem failures.
    pub async fn archive(&self, job: &ArchiveJob) -> StorageResult<Option<String>> {
        if job.reference.starts_with(&self.config.public_prefix) {
            return Ok(Some(job.reference.clone()));
        }

        let bytes = match self.fetcher.fetch_image(job.terminal_id, &job.reference).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(
                    terminal_id = %job.terminal_id,
                    entry_id = job.entry_id,
                    reference = %job.reference,
                    error = %e,
                    "Picture download failed, keeping device reference"
                );
                return Ok(None);
            }
        };

        let file_name = archive_file_name(job);
        tokio::fs::create_dir_all(&self.config.directory).await?;
        tokio::fs::write(self.config.directory.join(&file_name), &bytes).await?;

        let public_path = format!(
            "{}/{}",
            self.config.public_prefix.trim_end_matches('/'),
            file_name
        );
        self.logs
            .set_image_path(job.entry_id, Some(&public_path))
            .await?;
        debug!(
            entry_id = job.entry_id,
            path = %public_path,
            bytes = bytes.len(),
            "Picture archived"
        );

        if let Some(employee_id) = job.employee_id {
            self.enforce_retention(employee_id).await?;
        }
        Ok(Some(public_path))
    }

    /// Keep the newest `retention` archived pictures of an employee.
    ///
    /// Older files are deleted and their rows lose the picture reference;
    /// the rows themselves stay. Returns the number of evicted pictures.
    ///
    /// # Errors
    /// Database failures. File removal failures are logged and skipped.
    pub async fn enforce_retention(&self, employee_id: i64) -> StorageResult<usize> {
        let archived = self
            .logs
            .find_archived_images(employee_id, &self.config.public_prefix)
            .await?;
        if archived.len() <= self.config.retention {
            return Ok(0);
        }

        let mut evicted = 0;
        for (entry_id, public_path) in archived.into_iter().skip(self.config.retention) {
            if let Some(path) = self.local_path(&public_path) {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => {
                        warn!(entry_id, path = %path.display(), error = %e, "Failed to delete old picture");
                        continue;
                    }
                }
            }
            self.logs.set_image_path(entry_id, None).await?;
            evicted += 1;
        }

        info!(
            employee_id,
            evicted,
            kept = self.config.retention,
            "Evicted old face pictures"
        );
        Ok(evicted)
    }

    fn local_path(&self, public_path: &str) -> Option<PathBuf> {
        let prefix = self.config.public_prefix.trim_end_matches('/');
        let name = public_path.strip_prefix(prefix)?.trim_start_matches('/');
        // Only plain file names are ours to delete.
        (!name.is_empty() && !name.contains(['/', '\\']) && name != "..")
            .then(|| self.config.directory.join(name))
    }
}

/// `face_<terminal>_<serial>_<epoch millis>.<ext>`
fn archive_file_name(job: &ArchiveJob) -> String {
    let serial: String = job
        .serial_number
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    format!(
        "face_{}_{}_{}.{}",
        job.terminal_id,
        serial,
        job.event_time.timestamp_millis(),
        extension_of(&job.reference)
    )
}

fn extension_of(reference: &str) -> String {
    let path = reference.split(['@', '?']).next().unwrap_or(reference);
    Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| (1..=5).contains(&ext.len()) && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map_or_else(|| DEFAULT_EXTENSION.to_string(), str::to_ascii_lowercase)
}
