#![allow(async_fn_in_trait)]

use crate::error::{StorageError, StorageResult};
use crate::models::{Employee, EmployeeMapping};
use sqlx::SqlitePool;

/// Access to employees, their accounts and terminal mappings.
///
/// Resolution itself runs inside the ledger transaction (see
/// [`EmployeeResolver`](crate::EmployeeResolver)); this repository covers the
/// directory operations around it.
pub trait EmployeeRepository: Send + Sync {
    /// Find an employee by ID
    async fn find_by_id(&self, id: i64) -> StorageResult<Option<Employee>>;

    /// Employees of one organization, ordered by ID
    async fn find_by_organization(&self, organization_id: i64) -> StorageResult<Vec<Employee>>;

    /// Create a login account, returning its ID
    async fn create_account(&self, username: &str, organization_id: i64) -> StorageResult<i64>;

    /// Create an employee, returning its ID
    async fn create(&self, employee: &Employee) -> StorageResult<i64>;

    /// Delete an employee; ledger rows keep their name and lose the link
    async fn delete(&self, id: i64) -> StorageResult<()>;

    /// Mapping for a subject identifier on one terminal
    async fn find_mapping(
        &self,
        terminal_id: i64,
        subject_identifier: &str,
    ) -> StorageResult<Option<EmployeeMapping>>;

    /// All mappings on one terminal
    async fn find_mappings_for_terminal(&self, terminal_id: i64)
    -> StorageResult<Vec<EmployeeMapping>>;

    /// Create a mapping, returning its ID
    async fn create_mapping(
        &self,
        employee_id: i64,
        terminal_id: i64,
        subject_identifier: &str,
        organization_id: i64,
    ) -> StorageResult<i64>;
}

/// SQLite implementation of EmployeeRepository
pub struct SqliteEmployeeRepository {
    pool: SqlitePool,
}

impl SqliteEmployeeRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

impl EmployeeRepository for SqliteEmployeeRepository {
    async fn find_by_id(&self, id: i64) -> StorageResult<Option<Employee>> {
        let employee = sqlx::query_as::<_, Employee>(
            r#"
            SELECT id, account_id, full_name, organization_id, created_at
            FROM employees
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(employee)
    }

    async fn find_by_organization(&self, organization_id: i64) -> StorageResult<Vec<Employee>> {
        let employees = sqlx::query_as::<_, Employee>(
            r#"
            SELECT id, account_id, full_name, organization_id, created_at
            FROM employees
            WHERE organization_id = ?
            ORDER BY id
            "#,
        )
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(employees)
    }

    async fn create_account(&self, username: &str, organization_id: i64) -> StorageResult<i64> {
        let result = sqlx::query("INSERT INTO accounts (username, organization_id) VALUES (?, ?)")
            .bind(username)
            .bind(organization_id)
            .execute(&self.pool)
            .await?;

        Ok(result.last_insert_rowid())
    }

    async fn create(&self, employee: &Employee) -> StorageResult<i64> {
        let result = sqlx::query(
            "INSERT INTO employees (account_id, full_name, organization_id) VALUES (?, ?, ?)",
        )
        .bind(employee.account_id)
        .bind(&employee.full_name)
        .bind(employee.organization_id)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn delete(&self, id: i64) -> StorageResult<()> {
        let result = sqlx::query("DELETE FROM employees WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::not_found("Employee", "id", id));
        }
        Ok(())
    }

    async fn find_mapping(
        &self,
        terminal_id: i64,
        subject_identifier: &str,
    ) -> StorageResult<Option<EmployeeMapping>> {
        let mapping = sqlx::query_as::<_, EmployeeMapping>(
            r#"
            SELECT id, employee_id, terminal_id, subject_identifier,
                   organization_id, created_at
            FROM employee_terminal_mappings
            WHERE terminal_id = ? AND subject_identifier = ?
            "#,
        )
        .bind(terminal_id)
        .bind(subject_identifier)
        .fetch_optional(&self.pool)
        .await?;

        Ok(mapping)
    }

    async fn find_mappings_for_terminal(
        &self,
        terminal_id: i64,
    ) -> StorageResult<Vec<EmployeeMapping>> {
        let mappings = sqlx::query_as::<_, EmployeeMapping>(
            r#"
            SELECT id, employee_id, terminal_id, subject_identifier,
                   organization_id, created_at
            FROM employee_terminal_mappings
            WHERE terminal_id = ?
            ORDER BY id
            "#,
        )
        .bind(terminal_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(mappings)
    }

    async fn create_mapping(
        &self,
        employee_id: i64,
        terminal_id: i64,
        subject_identifier: &str,
        organization_id: i64,
    ) -> StorageResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO employee_terminal_mappings (
                employee_id, terminal_id, subject_identifier, organization_id
            )
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(employee_id)
        .bind(terminal_id)
        .bind(subject_identifier)
        .bind(organization_id)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }
}
