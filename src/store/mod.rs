//! Persistence seams consumed by the workflow service.
//!
//! A [`Storage`] hands out [`UnitOfWork`]s. Everything written through a
//! unit (transaction saves, audit appends, user changes) becomes visible to
//! other units on [`UnitOfWork::commit`], all at once, or not at all if the
//! unit is dropped.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{Actor, AuditId, NewAuditEntry, Role, Transaction, TransactionStatus, TxId};

mod memory;
pub use memory::InMemoryStorage;

/// Failure of the persistence layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("storage call timed out after {0:?}")]
    Timeout(Duration),

    #[error("{record} was modified concurrently")]
    Conflict { record: String },
}

/// Transaction records.
#[async_trait]
pub trait TransactionStore: Send {
    /// Allocate an id for a record about to be created.
    async fn next_id(&mut self) -> Result<TxId, StorageError>;

    async fn get(&mut self, id: TxId) -> Result<Option<Transaction>, StorageError>;

    /// Insert or update by id. Visible to `get` on the same unit immediately.
    async fn save(&mut self, transaction: Transaction) -> Result<(), StorageError>;

    /// Matching records in creation order.
    async fn list(
        &mut self,
        status: Option<TransactionStatus>,
    ) -> Result<Vec<Transaction>, StorageError>;
}

/// Append-only action log.
#[async_trait]
pub trait AuditLedger: Send {
    /// Stage an entry. Its id and timestamp are assigned when the unit commits.
    async fn append(&mut self, entry: NewAuditEntry) -> Result<(), StorageError>;
}

/// Role lookups and user administration.
#[async_trait]
pub trait UserDirectory: Send {
    async fn resolve_role(&mut self, username: &str) -> Result<Option<Role>, StorageError>;

    async fn save_user(&mut self, user: Actor) -> Result<(), StorageError>;

    /// Returns `false` if the user did not exist.
    async fn remove_user(&mut self, username: &str) -> Result<bool, StorageError>;
}

/// One logical storage transaction.
#[async_trait]
pub trait UnitOfWork: TransactionStore + AuditLedger + UserDirectory {
    /// Publish every staged write atomically and return the ids given to the
    /// appended audit entries, in append order.
    ///
    /// Fails with [`StorageError::Conflict`] when a transaction this unit
    /// saved, or a user role it read, was changed by another unit since.
    async fn commit(self: Box<Self>) -> Result<Vec<AuditId>, StorageError>;
}

/// Factory for units of work.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StorageError>;
}
