use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Login account linked to an employee.
///
/// Device subject identifiers are often the account id or username, which
/// is why the resolver consults this table.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Account {
    pub id: i64,
    pub username: String,
    pub organization_id: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Employee directory entry.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Employee {
    pub id: i64,
    /// Linked login account, if any
    pub account_id: Option<i64>,
    pub full_name: String,
    pub organization_id: i64,
    pub created_at: DateTime<Utc>,
}

/// `(terminal, subject identifier) -> employee` mapping.
///
/// Created by administrators, by device user import, or lazily by the
/// resolver after a successful fallback match.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EmployeeMapping {
    pub id: i64,
    pub employee_id: i64,
    pub terminal_id: i64,
    pub subject_identifier: String,
    pub organization_id: i64,
    pub created_at: DateTime<Utc>,
}
