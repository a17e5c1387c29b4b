//! Device subject identifier to employee resolution.
//!
//! Steps run in order and the first hit wins. Every step is restricted to
//! the terminal's organization:
//!
//! | Step | Match                                              |
//! |------|----------------------------------------------------|
//! | 1    | explicit `(terminal, subject)` mapping             |
//! | 2    | subject as integer = linked account id             |
//! | 3    | subject as integer = employee id                   |
//! | 4    | case-insensitive full name                         |
//! | 5    | exact account username                             |
//!
//! A hit in steps 2 to 5 stores a mapping so the next event resolves in
//! step 1. A miss is not an error: the event is recorded under the raw
//! identifier with no employee link.

use crate::error::StorageResult;
use crate::models::Terminal;
use crate::transaction;
use acsync_core::constants::UNKNOWN_SUBJECT_NAME;
use sqlx::SqliteConnection;
use tracing::{debug, trace};

/// Which step produced a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionStep {
    Mapping,
    AccountId,
    EmployeeId,
    FullName,
    Username,
    Unresolved,
}

impl ResolutionStep {
    /// Steps after the mapping lookup create a mapping on success.
    fn creates_mapping(self) -> bool {
        !matches!(self, ResolutionStep::Mapping | ResolutionStep::Unresolved)
    }
}

/// Outcome of resolving one subject identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub employee_id: Option<i64>,
    /// Name written to the ledger row
    pub employee_name: String,
    /// Organization of the matched employee, for the attribution check
    pub employee_organization_id: Option<i64>,
    pub step: ResolutionStep,
}

impl Resolution {
    fn unresolved(subject: Option<&str>) -> Self {
        Self {
            employee_id: None,
            employee_name: subject.unwrap_or(UNKNOWN_SUBJECT_NAME).to_string(),
            employee_organization_id: None,
            step: ResolutionStep::Unresolved,
        }
    }

    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.employee_id.is_some()
    }
}

#[derive(sqlx::FromRow)]
struct Matched {
    id: i64,
    full_name: String,
    organization_id: i64,
}

/// Resolves subject identifiers on the caller's connection.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmployeeResolver;

impl EmployeeResolver {
    /// Resolve `subject` for an event from `terminal`.
    ///
    /// # Errors
    /// Database failures only; a miss yields an unresolved [`Resolution`].
    pub async fn resolve(
        &self,
        conn: &mut SqliteConnection,
        terminal: &Terminal,
        subject: Option<&str>,
    ) -> StorageResult<Resolution> {
        let Some(subject) = subject.map(str::trim).filter(|s| !s.is_empty()) else {
            return Ok(Resolution::unresolved(None));
        };
        let org = terminal.organization_id;

        let Some((step, matched)) = Self::cascade(conn, terminal, subject).await? else {
            debug!(terminal_id = terminal.id, subject, "Subject not resolved");
            return Ok(Resolution::unresolved(Some(subject)));
        };
        trace!(
            terminal_id = terminal.id,
            subject,
            employee_id = matched.id,
            step = ?step,
            "Subject resolved"
        );

        if step.creates_mapping() {
            transaction::upsert_mapping(conn, matched.id, terminal.id, subject, org).await?;
            debug!(
                terminal_id = terminal.id,
                subject,
                employee_id = matched.id,
                "Created employee mapping"
            );
        }

        Ok(Resolution {
            employee_id: Some(matched.id),
            employee_name: matched.full_name,
            employee_organization_id: Some(matched.organization_id),
            step,
        })
    }

    async fn cascade(
        conn: &mut SqliteConnection,
        terminal: &Terminal,
        subject: &str,
    ) -> StorageResult<Option<(ResolutionStep, Matched)>> {
        let org = terminal.organization_id;

        // The mapping carries its own organization, so an employee moved to
        // another organization still resolves and trips the attribution check.
        let mapped = sqlx::query_as::<_, Matched>(
            r#"
            SELECT e.id, e.full_name, e.organization_id
            FROM employee_terminal_mappings m
            JOIN employees e ON e.id = m.employee_id
            WHERE m.terminal_id = ? AND m.subject_identifier = ? AND m.organization_id = ?
            "#,
        )
        .bind(terminal.id)
        .bind(subject)
        .bind(org)
        .fetch_optional(&mut *conn)
        .await?;
        if let Some(matched) = mapped {
            return Ok(Some((ResolutionStep::Mapping, matched)));
        }

        if let Some(numeric) = subject.parse::<i64>().ok().filter(|n| *n > 0) {
            let by_account = sqlx::query_as::<_, Matched>(
                r#"
                SELECT id, full_name, organization_id FROM employees
                WHERE account_id = ? AND organization_id = ?
                ORDER BY id LIMIT 1
                "#,
            )
            .bind(numeric)
            .bind(org)
            .fetch_optional(&mut *conn)
            .await?;
            if let Some(matched) = by_account {
                return Ok(Some((ResolutionStep::AccountId, matched)));
            }

            let by_id = sqlx::query_as::<_, Matched>(
                "SELECT id, full_name, organization_id FROM employees WHERE id = ? AND organization_id = ?",
            )
            .bind(numeric)
            .bind(org)
            .fetch_optional(&mut *conn)
            .await?;
            if let Some(matched) = by_id {
                return Ok(Some((ResolutionStep::EmployeeId, matched)));
            }
        }

        let by_name = sqlx::query_as::<_, Matched>(
            r#"
            SELECT id, full_name, organization_id FROM employees
            WHERE LOWER(TRIM(full_name)) = LOWER(?) AND organization_id = ?
            ORDER BY id LIMIT 1
            "#,
        )
        .bind(subject)
        .bind(org)
        .fetch_optional(&mut *conn)
        .await?;
        if let Some(matched) = by_name {
            return Ok(Some((ResolutionStep::FullName, matched)));
        }

        let by_username = sqlx::query_as::<_, Matched>(
            r#"
            SELECT e.id, e.full_name, e.organization_id
            FROM employees e
            JOIN accounts a ON a.id = e.account_id
            WHERE a.username = ? AND e.organization_id = ?
            ORDER BY e.id LIMIT 1
            "#,
        )
        .bind(subject)
        .bind(org)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(by_username.map(|matched| (ResolutionStep::Username, matched)))
    }
}
