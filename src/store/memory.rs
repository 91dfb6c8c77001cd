//! In-memory storage with optimistic concurrency.
//!
//! Units read committed state directly and stage their writes locally.
//! Commit takes the write lock, checks that every saved record is still at
//! the version the unit based its change on and that every role it read is
//! unchanged, then publishes everything. Audit ids and timestamps are
//! assigned under that lock, so the ledger is ordered by id.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use super::{AuditLedger, Storage, StorageError, TransactionStore, UnitOfWork, UserDirectory};
use crate::model::{
    Actor, AuditEntry, AuditId, NewAuditEntry, Role, Transaction, TransactionStatus, TxId,
};

#[derive(Debug, Default)]
struct State {
    /// Keyed by id, so iteration is creation order.
    transactions: BTreeMap<TxId, Transaction>,
    ledger: Vec<AuditEntry>,
    users: HashMap<String, Role>,
}

#[derive(Debug)]
struct Shared {
    state: RwLock<State>,
    next_tx: AtomicU32,
    available: AtomicBool,
    latency_ms: AtomicU64,
}

impl Shared {
    fn ensure_available(&self) -> Result<(), StorageError> {
        if self.available.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(StorageError::Unavailable("store is offline".to_string()))
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, StorageError> {
        self.ensure_available()?;
        self.state
            .read()
            .map_err(|_| StorageError::Unavailable("lock poisoned".to_string()))
    }
}

/// Reference [`Storage`] used by tests, benches, and the demo binary.
///
/// Cloning shares the underlying state.
#[derive(Debug, Clone)]
pub struct InMemoryStorage {
    shared: Arc<Shared>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: RwLock::new(State::default()),
                next_tx: AtomicU32::new(1),
                available: AtomicBool::new(true),
                latency_ms: AtomicU64::new(0),
            }),
        }
    }

    /// Seed the user directory.
    pub fn with_users(self, users: impl IntoIterator<Item = Actor>) -> Self {
        {
            let mut state = self
                .shared
                .state
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            for user in users {
                state.users.insert(user.username, user.role);
            }
        }
        self
    }

    /// Simulate an outage: every call fails with `Unavailable` while `false`.
    pub fn set_available(&self, available: bool) {
        self.shared.available.store(available, Ordering::Release);
    }

    /// Delay applied when a unit of work is opened.
    pub fn set_latency(&self, latency: Duration) {
        self.shared
            .latency_ms
            .store(latency.as_millis() as u64, Ordering::Release);
    }

    pub fn transaction(&self, id: TxId) -> Option<Transaction> {
        self.snapshot().transactions.get(&id).cloned()
    }

    /// Committed transactions in creation order.
    pub fn transactions(&self) -> Vec<Transaction> {
        self.snapshot().transactions.values().cloned().collect()
    }

    /// Committed ledger in commit order.
    pub fn audit_entries(&self) -> Vec<AuditEntry> {
        self.snapshot().ledger.clone()
    }

    pub fn audit_entries_for(&self, id: TxId) -> Vec<AuditEntry> {
        self.snapshot()
            .ledger
            .iter()
            .filter(|entry| entry.transaction_id == Some(id))
            .cloned()
            .collect()
    }

    pub fn role_of(&self, username: &str) -> Option<Role> {
        self.snapshot().users.get(username).copied()
    }

    fn snapshot(&self) -> RwLockReadGuard<'_, State> {
        self.shared
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StorageError> {
        self.shared.ensure_available()?;

        let latency = Duration::from_millis(self.shared.latency_ms.load(Ordering::Acquire));
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        Ok(Box::new(InMemoryUnit::new(Arc::clone(&self.shared))))
    }
}

/// A staged transaction write and the committed version it was based on.
#[derive(Debug)]
struct Staged {
    base_version: u64,
    transaction: Transaction,
}

#[derive(Debug)]
struct InMemoryUnit {
    shared: Arc<Shared>,
    staged: BTreeMap<TxId, Staged>,
    /// Roles as first observed by this unit, for conflict detection.
    users_read: HashMap<String, Option<Role>>,
    /// `None` marks a deletion.
    users_staged: HashMap<String, Option<Role>>,
    audit: Vec<NewAuditEntry>,
}

impl InMemoryUnit {
    fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            staged: BTreeMap::new(),
            users_read: HashMap::new(),
            users_staged: HashMap::new(),
            audit: Vec::new(),
        }
    }

    fn current_role(&mut self, username: &str) -> Result<Option<Role>, StorageError> {
        if let Some(staged) = self.users_staged.get(username) {
            return Ok(*staged);
        }
        if let Some(read) = self.users_read.get(username) {
            return Ok(*read);
        }

        let role = self.shared.read()?.users.get(username).copied();
        self.users_read.insert(username.to_string(), role);
        Ok(role)
    }
}

#[async_trait]
impl TransactionStore for InMemoryUnit {
    async fn next_id(&mut self) -> Result<TxId, StorageError> {
        self.shared.ensure_available()?;
        Ok(self.shared.next_tx.fetch_add(1, Ordering::AcqRel))
    }

    async fn get(&mut self, id: TxId) -> Result<Option<Transaction>, StorageError> {
        if let Some(staged) = self.staged.get(&id) {
            return Ok(Some(staged.transaction.clone()));
        }
        Ok(self.shared.read()?.transactions.get(&id).cloned())
    }

    async fn save(&mut self, transaction: Transaction) -> Result<(), StorageError> {
        self.shared.ensure_available()?;

        // The first save decides what the committed version must still be.
        let base_version = match self.staged.get(&transaction.id) {
            Some(staged) => staged.base_version,
            None => transaction.version.saturating_sub(1),
        };
        self.staged.insert(
            transaction.id,
            Staged {
                base_version,
                transaction,
            },
        );
        Ok(())
    }

    async fn list(
        &mut self,
        status: Option<TransactionStatus>,
    ) -> Result<Vec<Transaction>, StorageError> {
        let mut merged = self.shared.read()?.transactions.clone();
        for (id, staged) in &self.staged {
            merged.insert(*id, staged.transaction.clone());
        }

        Ok(merged
            .into_values()
            .filter(|tx| status.is_none_or(|status| tx.status == status))
            .collect())
    }
}

#[async_trait]
impl AuditLedger for InMemoryUnit {
    async fn append(&mut self, entry: NewAuditEntry) -> Result<(), StorageError> {
        self.shared.ensure_available()?;
        self.audit.push(entry);
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for InMemoryUnit {
    async fn resolve_role(&mut self, username: &str) -> Result<Option<Role>, StorageError> {
        self.current_role(username)
    }

    async fn save_user(&mut self, user: Actor) -> Result<(), StorageError> {
        self.current_role(&user.username)?;
        self.users_staged.insert(user.username, Some(user.role));
        Ok(())
    }

    async fn remove_user(&mut self, username: &str) -> Result<bool, StorageError> {
        if self.current_role(username)?.is_none() {
            return Ok(false);
        }
        self.users_staged.insert(username.to_string(), None);
        Ok(true)
    }
}

#[async_trait]
impl UnitOfWork for InMemoryUnit {
    async fn commit(self: Box<Self>) -> Result<Vec<AuditId>, StorageError> {
        let InMemoryUnit {
            shared,
            staged,
            users_read,
            users_staged,
            audit,
        } = *self;

        shared.ensure_available()?;
        let mut state = shared
            .state
            .write()
            .map_err(|_| StorageError::Unavailable("lock poisoned".to_string()))?;

        // Validate everything before touching anything.
        for (id, staged) in &staged {
            let found = state.transactions.get(id).map_or(0, |tx| tx.version);
            if found != staged.base_version {
                return Err(StorageError::Conflict {
                    record: format!("transaction {id}"),
                });
            }
        }
        // Staged users are always read first, so this covers them too.
        for (username, read) in &users_read {
            if state.users.get(username).copied() != *read {
                return Err(StorageError::Conflict {
                    record: format!("user {username}"),
                });
            }
        }

        for (id, staged) in staged {
            state.transactions.insert(id, staged.transaction);
        }
        for (username, role) in users_staged {
            match role {
                Some(role) => state.users.insert(username, role),
                None => state.users.remove(&username),
            };
        }

        let timestamp = Utc::now();
        let mut audit_ids = Vec::with_capacity(audit.len());
        for entry in audit {
            let id = state.ledger.len() as AuditId + 1;
            state.ledger.push(AuditEntry {
                id,
                username: entry.username,
                action: entry.action,
                transaction_id: entry.transaction_id,
                timestamp,
            });
            audit_ids.push(id);
        }

        Ok(audit_ids)
    }
}
