//! Error types for workflow decisions.

use thiserror::Error;

use crate::model::{Role, TransactionStatus, TxId};

use super::Action;

/// A role, ownership, or state precondition that failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuardViolation {
    #[error("role {role} may not {action}")]
    RoleNotPermitted { role: Role, action: Action },

    #[error("only the creator {created_by} may {action} this transaction")]
    NotCreator { created_by: String, action: Action },

    #[error("creator may not {0} own transaction")]
    SelfApproval(Action),

    #[error("transaction is {0}, not Pending")]
    NotPending(TransactionStatus),
}

/// An expected, audited refusal of a command.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("transaction not found")]
    NotFound(TxId),

    #[error("unknown user {0}")]
    UserNotFound(String),

    #[error("user {0} already exists")]
    UserExists(String),

    #[error("{0}")]
    Guard(#[from] GuardViolation),
}
