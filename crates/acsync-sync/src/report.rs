use acsync_core::Direction;
use acsync_storage::RecordOutcome;
use serde::Serialize;
use std::fmt;
use std::ops::AddAssign;

/// Counters of one sync run.
///
/// `total_found` counts records returned by the terminal, including those
/// outside the access-control category; `entries` and `exits` count written
/// rows by their persisted direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub total_found: usize,
    pub saved: usize,
    pub duplicates: usize,
    pub errors: usize,
    pub entries: usize,
    pub exits: usize,
}

impl SyncReport {
    /// Count one ledger outcome.
    pub fn record(&mut self, outcome: &RecordOutcome) {
        match outcome {
            RecordOutcome::Written { direction, .. } => {
                self.saved += 1;
                match direction {
                    Direction::Entry => self.entries += 1,
                    Direction::Exit => self.exits += 1,
                }
            }
            outcome if outcome.is_duplicate() => self.duplicates += 1,
            RecordOutcome::Skipped(_) => self.errors += 1,
        }
    }

    pub fn record_error(&mut self) {
        self.errors += 1;
    }

    /// Records that were neither written, duplicates nor failures.
    #[must_use]
    pub fn ignored(&self) -> usize {
        self.total_found
            .saturating_sub(self.saved + self.duplicates + self.errors)
    }
}

impl AddAssign for SyncReport {
    fn add_assign(&mut self, other: Self) {
        self.total_found += other.total_found;
        self.saved += other.saved;
        self.duplicates += other.duplicates;
        self.errors += other.errors;
        self.entries += other.entries;
        self.exits += other.exits;
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "found {}, saved {} ({} entries, {} exits), {} duplicates, {} errors",
            self.total_found, self.saved, self.entries, self.exits, self.duplicates, self.errors
        )
    }
}
