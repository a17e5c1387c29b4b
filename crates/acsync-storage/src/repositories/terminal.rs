#![allow(async_fn_in_trait)]

use crate::error::{StorageError, StorageResult};
use crate::models::Terminal;
use sqlx::SqlitePool;

/// Read access to the terminal directory.
///
/// `create` and `update` exist for provisioning tools and tests; the sync
/// engine itself only reads.
pub trait TerminalRepository: Send + Sync {
    /// Find a terminal by ID
    async fn find_by_id(&self, id: i64) -> StorageResult<Option<Terminal>>;

    /// All terminals flagged active, ordered by ID
    async fn find_active(&self) -> StorageResult<Vec<Terminal>>;

    /// Create a terminal, returning its ID
    async fn create(&self, terminal: &Terminal) -> StorageResult<i64>;

    /// Update a terminal's connection and attribution settings
    async fn update(&self, terminal: &Terminal) -> StorageResult<()>;
}

/// SQLite implementation of TerminalRepository
pub struct SqliteTerminalRepository {
    pool: SqlitePool,
}

impl SqliteTerminalRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

impl TerminalRepository for SqliteTerminalRepository {
    async fn find_by_id(&self, id: i64) -> StorageResult<Option<Terminal>> {
        let terminal = sqlx::query_as::<_, Terminal>(
            r#"
            SELECT id, name, address, username, password, declared_role,
                   organization_id, is_active, created_at, updated_at
            FROM terminals
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(terminal)
    }

    async fn find_active(&self) -> StorageResult<Vec<Terminal>> {
        let terminals = sqlx::query_as::<_, Terminal>(
            r#"
            SELECT id, name, address, username, password, declared_role,
                   organization_id, is_active, created_at, updated_at
            FROM terminals
            WHERE is_active = 1
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(terminals)
    }

    async fn create(&self, terminal: &Terminal) -> StorageResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO terminals (
                name, address, username, password,
                declared_role, organization_id, is_active
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&terminal.name)
        .bind(&terminal.address)
        .bind(&terminal.username)
        .bind(&terminal.password)
        .bind(&terminal.declared_role)
        .bind(terminal.organization_id)
        .bind(terminal.is_active)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn update(&self, terminal: &Terminal) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE terminals
            SET name = ?, address = ?, username = ?, password = ?,
                declared_role = ?, organization_id = ?, is_active = ?,
                updated_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')
            WHERE id = ?
            "#,
        )
        .bind(&terminal.name)
        .bind(&terminal.address)
        .bind(&terminal.username)
        .bind(&terminal.password)
        .bind(&terminal.declared_role)
        .bind(terminal.organization_id)
        .bind(terminal.is_active)
        .bind(terminal.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::not_found("Terminal", "id", terminal.id));
        }
        Ok(())
    }
}
