//! Per-terminal client cache.
//!
//! One [`DeviceProtocolClient`] is kept per terminal so that the stream
//! task, polling and manual operations share its lockout state. Clients are
//! created on first lookup, replaced when the terminal's address or
//! credentials change, and dropped on shutdown.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use acsync_core::TerminalId;
use acsync_network::DeviceProtocolClient;
use acsync_storage::ImageFetcher;
use acsync_storage::models::Terminal;
use acsync_storage::repositories::{SqliteTerminalRepository, TerminalRepository};
use bytes::Bytes;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

struct CachedClient {
    /// Terminal as it was when the client was built
    terminal: Terminal,
    client: Arc<DeviceProtocolClient>,
}

/// Registry of device clients keyed by terminal.
pub struct ClientRegistry {
    terminals: SqliteTerminalRepository,
    config: Arc<SyncConfig>,
    clients: RwLock<HashMap<TerminalId, CachedClient>>,
}

impl ClientRegistry {
    pub fn new(pool: SqlitePool, config: Arc<SyncConfig>) -> Self {
        Self {
            terminals: SqliteTerminalRepository::new(pool),
            config,
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Client for `terminal`, building or replacing it as needed.
    ///
    /// # Errors
    /// Returns `SyncError::Device` if the HTTP client cannot be built.
    pub async fn client_for(&self, terminal: &Terminal) -> SyncResult<Arc<DeviceProtocolClient>> {
        let id = terminal.terminal_id();
        {
            let clients = self.clients.read().await;
            if let Some(cached) = clients.get(&id)
                && !cached.terminal.connection_differs(terminal)
            {
                return Ok(Arc::clone(&cached.client));
            }
        }

        let mut clients = self.clients.write().await;
        // Another task may have built it while we waited for the write lock.
        if let Some(cached) = clients.get(&id) {
            if !cached.terminal.connection_differs(terminal) {
                return Ok(Arc::clone(&cached.client));
            }
            info!(
                terminal_id = %id,
                address = %terminal.address,
                "Terminal connection settings changed, replacing client"
            );
        }

        let client = Arc::new(DeviceProtocolClient::new(
            self.config.client_config(terminal),
        )?);
        clients.insert(
            id,
            CachedClient {
                terminal: terminal.clone(),
                client: Arc::clone(&client),
            },
        );
        debug!(terminal_id = %id, "Device client registered");
        Ok(client)
    }

    /// Load `id` from the directory and return it with its client.
    ///
    /// # Errors
    /// `TerminalNotFound` for unknown terminals; storage and client errors.
    pub async fn lookup(
        &self,
        id: TerminalId,
    ) -> SyncResult<(Terminal, Arc<DeviceProtocolClient>)> {
        let terminal = self
            .terminals
            .find_by_id(id.get())
            .await?
            .ok_or(SyncError::TerminalNotFound(id))?;
        let client = self.client_for(&terminal).await?;
        Ok((terminal, client))
    }

    /// Drop the client of one terminal. Returns `true` if one was cached.
    pub async fn remove(&self, id: TerminalId) -> bool {
        self.clients.write().await.remove(&id).is_some()
    }

    /// Drop every cached client.
    pub async fn clear(&self) {
        let mut clients = self.clients.write().await;
        let count = clients.len();
        clients.clear();
        debug!(count, "Device clients released");
    }

    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }
}

impl ImageFetcher for ClientRegistry {
    type Error = SyncError;

    async fn fetch_image(&self, terminal_id: TerminalId, reference: &str) -> SyncResult<Bytes> {
        let (_, client) = self.lookup(terminal_id).await?;
        Ok(client.fetch_image(reference).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use acsync_storage::Database;
    use chrono::Utc;

    async fn setup() -> (Database, ClientRegistry, Terminal) {
        let db = Database::in_memory().await.unwrap();
        let mut terminal = Terminal {
            id: 0,
            name: "Lobby".to_string(),
            address: "203.0.113.10".to_string(),
            username: "admin".to_string(),
            password: "pw".to_string(),
            declared_role: None,
            organization_id: 1,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        terminal.id = SqliteTerminalRepository::new(db.pool().clone())
            .create(&terminal)
            .await
            .unwrap();
        let registry = ClientRegistry::new(db.pool().clone(), Arc::new(SyncConfig::default()));
        (db, registry, terminal)
    }

    #[tokio::test]
    async fn test_client_is_cached() {
        let (_db, registry, terminal) = setup().await;

        let first = registry.client_for(&terminal).await.unwrap();
        let second = registry.client_for(&terminal).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_changed_credentials_replace_client() {
        let (_db, registry, mut terminal) = setup().await;
        let first = registry.client_for(&terminal).await.unwrap();

        terminal.password = "rotated".to_string();
        let second = registry.client_for(&terminal).await.unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.config().credentials.password, "rotated");
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_renamed_terminal_keeps_client() {
        let (_db, registry, mut terminal) = setup().await;
        let first = registry.client_for(&terminal).await.unwrap();

        terminal.name = "Lobby west".to_string();
        let second = registry.client_for(&terminal).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_lookup_loads_terminal() {
        let (_db, registry, terminal) = setup().await;

        let (loaded, client) = registry.lookup(terminal.terminal_id()).await.unwrap();
        assert_eq!(loaded.name, "Lobby");
        assert_eq!(client.base_url(), "http://203.0.113.10");

        let missing = registry.lookup(TerminalId::new(99)).await;
        assert!(matches!(missing, Err(SyncError::TerminalNotFound(id)) if id.get() == 99));
    }

    #[tokio::test]
    async fn test_clear_and_remove() {
        let (_db, registry, terminal) = setup().await;
        registry.client_for(&terminal).await.unwrap();

        assert!(registry.remove(terminal.terminal_id()).await);
        assert!(!registry.remove(terminal.terminal_id()).await);

        registry.client_for(&terminal).await.unwrap();
        registry.clear().await;
        assert!(registry.is_empty().await);
    }
}
