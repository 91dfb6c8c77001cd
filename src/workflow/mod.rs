//! Transaction state machine.
//!
//! Every operation takes an actor and a transaction snapshot by value and
//! returns either the updated snapshot or the guard that refused it. Nothing
//! here touches storage; the service decides what to persist.

use crate::model::{Actor, Transaction, TransactionStatus, TxId};

mod error;
pub use error::{GuardViolation, Rejection};

mod guard;
pub use guard::{Action, WorkflowPolicy};

/// A workflow command, as presented by a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Propose a new transaction.
    Create { transaction_type: String },
    /// Change the type of a pending transaction.
    Edit { id: TxId, transaction_type: String },
    /// Withdraw a pending transaction.
    Cancel { id: TxId },
    /// Finalize a pending transaction as approved.
    Approve { id: TxId },
    /// Finalize a pending transaction as rejected.
    Reject { id: TxId },
    /// Append a note, whatever the status.
    AddNote { id: TxId, note: String },
}

impl Command {
    pub fn action(&self) -> Action {
        match self {
            Command::Create { .. } => Action::Create,
            Command::Edit { .. } => Action::Edit,
            Command::Cancel { .. } => Action::Cancel,
            Command::Approve { .. } => Action::Approve,
            Command::Reject { .. } => Action::Reject,
            Command::AddNote { .. } => Action::AddNote,
        }
    }

    /// The existing transaction this command addresses, if any.
    pub fn target(&self) -> Option<TxId> {
        match self {
            Command::Create { .. } => None,
            Command::Edit { id, .. }
            | Command::Cancel { id }
            | Command::Approve { id }
            | Command::Reject { id }
            | Command::AddNote { id, .. } => Some(*id),
        }
    }

    /// Audit text for a command that took effect.
    pub fn applied(&self, transaction: &Transaction) -> String {
        let id = transaction.id;
        match self {
            Command::Create { transaction_type } => format!("Created {transaction_type} transaction"),
            Command::Edit { .. } => format!("Edited transaction {id}"),
            Command::Cancel { .. } => format!("Cancelled transaction {id}"),
            Command::Approve { .. } => format!("Approved transaction {id}"),
            Command::Reject { .. } => format!("Rejected transaction {id}"),
            Command::AddNote { .. } => format!("Added note to transaction {id}"),
        }
    }

    /// Audit text for a command that was refused.
    pub fn denied(&self, reason: &dyn std::fmt::Display) -> String {
        match (self, self.target()) {
            (Command::Create { transaction_type }, _) => {
                format!("Denied create {transaction_type} transaction: {reason}")
            }
            (_, Some(id)) => format!("Denied {} transaction {id}: {reason}", self.action()),
            (_, None) => format!("Denied {}: {reason}", self.action()),
        }
    }
}

/// A change to an existing transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Edit { transaction_type: String },
    Cancel,
    Approve,
    Reject,
    AddNote { note: String },
}

/// The maker-checker state machine.
#[derive(Debug, Clone, Copy, Default)]
pub struct Workflow {
    policy: WorkflowPolicy,
}

impl Workflow {
    pub fn new(policy: WorkflowPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &WorkflowPolicy {
        &self.policy
    }

    /// Start a new `Pending` transaction owned by `actor`.
    pub fn create(
        &self,
        actor: &Actor,
        id: TxId,
        transaction_type: impl Into<String>,
    ) -> Result<Transaction, GuardViolation> {
        self.policy.check_create(actor)?;
        Ok(Transaction::new(id, transaction_type, actor.username.clone()))
    }

    pub fn edit(
        &self,
        actor: &Actor,
        mut snapshot: Transaction,
        transaction_type: impl Into<String>,
    ) -> Result<Transaction, GuardViolation> {
        self.policy.check(actor, &snapshot, Action::Edit)?;
        snapshot.transaction_type = transaction_type.into();
        snapshot.version += 1;
        Ok(snapshot)
    }

    pub fn cancel(&self, actor: &Actor, snapshot: Transaction) -> Result<Transaction, GuardViolation> {
        self.finalize(actor, snapshot, Action::Cancel, TransactionStatus::Cancelled)
    }

    pub fn approve(&self, actor: &Actor, snapshot: Transaction) -> Result<Transaction, GuardViolation> {
        self.finalize(actor, snapshot, Action::Approve, TransactionStatus::Approved)
    }

    pub fn reject(&self, actor: &Actor, snapshot: Transaction) -> Result<Transaction, GuardViolation> {
        self.finalize(actor, snapshot, Action::Reject, TransactionStatus::Rejected)
    }

    pub fn add_note(
        &self,
        actor: &Actor,
        mut snapshot: Transaction,
        note: impl Into<String>,
    ) -> Result<Transaction, GuardViolation> {
        self.policy.check(actor, &snapshot, Action::AddNote)?;
        snapshot.notes.push(note.into());
        snapshot.version += 1;
        Ok(snapshot)
    }

    pub fn apply(
        &self,
        actor: &Actor,
        snapshot: Transaction,
        transition: Transition,
    ) -> Result<Transaction, GuardViolation> {
        match transition {
            Transition::Edit { transaction_type } => self.edit(actor, snapshot, transaction_type),
            Transition::Cancel => self.cancel(actor, snapshot),
            Transition::Approve => self.approve(actor, snapshot),
            Transition::Reject => self.reject(actor, snapshot),
            Transition::AddNote { note } => self.add_note(actor, snapshot, note),
        }
    }

    /// Move a pending transaction into a terminal state.
    fn finalize(
        &self,
        actor: &Actor,
        mut snapshot: Transaction,
        action: Action,
        to: TransactionStatus,
    ) -> Result<Transaction, GuardViolation> {
        self.policy.check(actor, &snapshot, action)?;
        snapshot.status = to;
        snapshot.version += 1;
        Ok(snapshot)
    }
}
