//! Authorization guards for workflow transitions.
//!
//! Guards are pure: they look at an actor and a transaction snapshot and
//! decide. No storage, no clock.

use std::fmt;

use crate::model::{Actor, Role, Transaction};

use super::GuardViolation;

/// Something an actor asks to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Create,
    Edit,
    Cancel,
    Approve,
    Reject,
    AddNote,
    ManageUsers,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::Create => "create",
            Action::Edit => "edit",
            Action::Cancel => "cancel",
            Action::Approve => "approve",
            Action::Reject => "reject",
            Action::AddNote => "add note to",
            Action::ManageUsers => "manage users",
        })
    }
}

/// Policy knobs for the guard table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkflowPolicy {
    /// Let `Admin` approve and reject like a `Checker`. Off by default:
    /// admins are administrative-only.
    pub admin_may_finalize: bool,
}

impl WorkflowPolicy {
    /// Check whether `actor` may create a transaction at all.
    pub fn check_create(&self, actor: &Actor) -> Result<(), GuardViolation> {
        match actor.role {
            Role::Maker | Role::Admin => Ok(()),
            role => Err(GuardViolation::RoleNotPermitted {
                role,
                action: Action::Create,
            }),
        }
    }

    /// Check user administration rights.
    pub fn check_manage_users(&self, actor: &Actor) -> Result<(), GuardViolation> {
        match actor.role {
            Role::Admin => Ok(()),
            role => Err(GuardViolation::RoleNotPermitted {
                role,
                action: Action::ManageUsers,
            }),
        }
    }

    /// Check `action` by `actor` against the current `transaction` snapshot,
    /// naming the specific rule that failed.
    pub fn check(
        &self,
        actor: &Actor,
        transaction: &Transaction,
        action: Action,
    ) -> Result<(), GuardViolation> {
        let is_creator = actor.username == transaction.created_by;

        match action {
            Action::Create => self.check_create(actor),
            Action::ManageUsers => self.check_manage_users(actor),
            Action::AddNote => Ok(()),
            Action::Edit => {
                Self::ensure_pending(transaction)?;
                if is_creator || actor.role == Role::Admin {
                    Ok(())
                } else {
                    Err(GuardViolation::NotCreator {
                        created_by: transaction.created_by.clone(),
                        action,
                    })
                }
            }
            Action::Cancel => {
                Self::ensure_pending(transaction)?;
                if is_creator {
                    Ok(())
                } else {
                    Err(GuardViolation::NotCreator {
                        created_by: transaction.created_by.clone(),
                        action,
                    })
                }
            }
            Action::Approve | Action::Reject => {
                Self::ensure_pending(transaction)?;
                // segregation of duties holds whatever the role
                if is_creator {
                    return Err(GuardViolation::SelfApproval(action));
                }
                match actor.role {
                    Role::Checker => Ok(()),
                    Role::Admin if self.admin_may_finalize => Ok(()),
                    role => Err(GuardViolation::RoleNotPermitted { role, action }),
                }
            }
        }
    }

    /// Boolean form of [`check`](Self::check).
    pub fn authorize(&self, actor: &Actor, transaction: &Transaction, action: Action) -> bool {
        self.check(actor, transaction, action).is_ok()
    }

    fn ensure_pending(transaction: &Transaction) -> Result<(), GuardViolation> {
        if transaction.is_pending() {
            Ok(())
        } else {
            Err(GuardViolation::NotPending(transaction.status))
        }
    }
}
