use acsync_core::{Credentials, DeclaredRole, TerminalId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Access-control terminal as configured in the administrative directory.
///
/// The sync engine reads terminals and never changes them. `name` is what
/// ledger rows are attributed to, and `organization_id` is authoritative
/// for every event recorded from this terminal.
///
/// # Examples
///
/// ```
/// use acsync_storage::models::Terminal;
/// use acsync_core::{DeclaredRole, Direction};
/// use chrono::Utc;
///
/// let terminal = Terminal {
///     id: 3,
///     name: "Main gate".to_string(),
///     address: "203.0.113.10".to_string(),
///     username: "admin".to_string(),
///     password: "secret".to_string(),
///     declared_role: Some("exit".to_string()),
///     organization_id: 1,
///     is_active: true,
///     created_at: Utc::now(),
///     updated_at: Utc::now(),
/// };
///
/// assert_eq!(terminal.role().unwrap(), DeclaredRole::Exit);
/// assert_eq!(terminal.role().unwrap().resolve(Direction::Entry), Direction::Exit);
/// ```
#[derive(Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Terminal {
    pub id: i64,
    pub name: String,
    /// Host or host:port of the device's HTTP API
    pub address: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    /// `entry`, `exit`, or NULL/`unspecified`
    pub declared_role: Option<String>,
    pub organization_id: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Terminal {
    pub fn terminal_id(&self) -> TerminalId {
        TerminalId::new(self.id)
    }

    /// Parsed declared role.
    ///
    /// # Errors
    /// Returns an error if the stored role is not a recognized value.
    pub fn role(&self) -> acsync_core::Result<DeclaredRole> {
        DeclaredRole::from_column(self.declared_role.as_deref())
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.username.clone(), self.password.clone())
    }

    /// Returns `true` if `other` points the client somewhere else or
    /// authenticates differently.
    pub fn connection_differs(&self, other: &Terminal) -> bool {
        self.address != other.address
            || self.username != other.username
            || self.password != other.password
    }
}

impl std::fmt::Debug for Terminal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Terminal")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("address", &self.address)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("declared_role", &self.declared_role)
            .field("organization_id", &self.organization_id)
            .field("is_active", &self.is_active)
            .finish()
    }
}
