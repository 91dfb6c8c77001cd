//! Core domain types for the maker-checker workflow.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Transaction identifier, allocated by the store.
pub type TxId = u32;

/// Audit entry identifier, allocated by the ledger.
pub type AuditId = u64;

/// Role of an actor, as supplied by the identity provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Proposes, edits, and cancels transactions.
    Maker,
    /// Approves or rejects transactions created by someone else.
    Checker,
    /// Manages users. May also edit any pending transaction.
    Admin,
}

#[derive(Debug, Error)]
#[error("unrecognized role '{0}'")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "maker" => Ok(Role::Maker),
            "checker" => Ok(Role::Checker),
            "admin" => Ok(Role::Admin),
            _ => Err(UnknownRole(s.to_string())),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Maker => "Maker",
            Role::Checker => "Checker",
            Role::Admin => "Admin",
        })
    }
}

/// An authenticated caller: a username and the role it acts under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub username: String,
    pub role: Role,
}

impl Actor {
    pub fn new(username: impl Into<String>, role: Role) -> Self {
        Self {
            username: username.into(),
            role,
        }
    }

    pub fn maker(username: impl Into<String>) -> Self {
        Self::new(username, Role::Maker)
    }

    pub fn checker(username: impl Into<String>) -> Self {
        Self::new(username, Role::Checker)
    }

    pub fn admin(username: impl Into<String>) -> Self {
        Self::new(username, Role::Admin)
    }
}

/// Lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TransactionStatus {
    /// Awaiting a checker decision. The only non-terminal state.
    #[default]
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

#[derive(Debug, Error)]
#[error("unrecognized transaction status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for TransactionStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(TransactionStatus::Pending),
            "approved" => Ok(TransactionStatus::Approved),
            "rejected" => Ok(TransactionStatus::Rejected),
            "cancelled" => Ok(TransactionStatus::Cancelled),
            _ => Err(UnknownStatus(s.to_string())),
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransactionStatus::Pending => "Pending",
            TransactionStatus::Approved => "Approved",
            TransactionStatus::Rejected => "Rejected",
            TransactionStatus::Cancelled => "Cancelled",
        })
    }
}

/// Snapshot of a transaction record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TxId,
    pub transaction_type: String,
    pub status: TransactionStatus,
    /// Append-only, in the order the notes were added.
    pub notes: Vec<String>,
    pub created_by: String,
    /// Incremented by every workflow mutation; the store uses it as an
    /// optimistic concurrency token.
    pub version: u64,
}

impl Transaction {
    /// Create a fresh `Pending` record at version 1.
    pub fn new(id: TxId, transaction_type: impl Into<String>, created_by: impl Into<String>) -> Self {
        Self {
            id,
            transaction_type: transaction_type.into(),
            status: TransactionStatus::Pending,
            notes: Vec::new(),
            created_by: created_by.into(),
            version: 1,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == TransactionStatus::Pending
    }
}

/// An audit entry before the ledger has assigned its id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAuditEntry {
    pub username: String,
    pub action: String,
    pub transaction_id: Option<TxId>,
}

/// A committed ledger record. Never mutated or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: AuditId,
    pub username: String,
    pub action: String,
    pub transaction_id: Option<TxId>,
    pub timestamp: DateTime<Utc>,
}
