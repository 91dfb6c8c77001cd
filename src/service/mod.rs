//! Workflow command surface.
//!
//! Each command runs as one unit of work: read the transaction, ask the
//! workflow, save the result, append exactly one audit entry, commit. A
//! refused command still commits its audit entry. A storage failure commits
//! nothing.

use std::future::Future;
use std::sync::Arc;

use tokio_stream::{Stream, StreamExt};
use tracing::{info, warn};

use crate::config::WorkflowConfig;
use crate::model::{Actor, AuditId, NewAuditEntry, Transaction, TransactionStatus, TxId};
use crate::store::{Storage, StorageError, UnitOfWork};
use crate::workflow::{Action, Command, GuardViolation, Rejection, Transition, Workflow};

mod admin;
pub use admin::{AdminCommand, AdminExecution};

mod error;
pub use error::ServiceError;

/// A command together with the actor issuing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub actor: Actor,
    pub command: Command,
}

/// Result of a committed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    /// The ledger entry written for this command.
    pub audit_id: AuditId,
    /// The transaction as committed, or why nothing changed.
    pub outcome: Result<Transaction, Rejection>,
}

impl Execution {
    pub fn is_applied(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Result of a transaction listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    pub audit_id: AuditId,
    pub transactions: Vec<Transaction>,
}

/// Who is calling: an authenticated actor, or a username to look up.
#[derive(Debug, Clone, Copy)]
enum Caller<'a> {
    Known(&'a Actor),
    Lookup(&'a str),
}

impl Caller<'_> {
    fn username(&self) -> &str {
        match self {
            Caller::Known(actor) => &actor.username,
            Caller::Lookup(username) => username,
        }
    }
}

/// Composes the workflow with an injected [`Storage`].
pub struct WorkflowService<S> {
    storage: Arc<S>,
    workflow: Workflow,
    config: WorkflowConfig,
}

/// Public API
impl<S: Storage> WorkflowService<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self::with_config(storage, WorkflowConfig::default())
    }

    pub fn with_config(storage: Arc<S>, config: WorkflowConfig) -> Self {
        Self {
            storage,
            workflow: Workflow::new(config.policy),
            config,
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Execute every request of the stream in order.
    pub async fn run(&self, mut stream: impl Stream<Item = Request> + Unpin) {
        while let Some(request) = stream.next().await {
            // a failed command should not stop the run
            let _ = self.execute(&request.actor, request.command).await;
        }
    }

    /// Execute `command` on behalf of an already authenticated `actor`.
    pub async fn execute(&self, actor: &Actor, command: Command) -> Result<Execution, ServiceError> {
        self.dispatch(Caller::Known(actor), &command).await
    }

    /// Execute `command`, resolving the caller's role through the user
    /// directory. Unknown users are refused and audited.
    pub async fn execute_as(
        &self,
        username: &str,
        command: Command,
    ) -> Result<Execution, ServiceError> {
        self.dispatch(Caller::Lookup(username), &command).await
    }

    /// List transactions, optionally filtered by status, in creation order.
    /// Always audited as a view by `actor`.
    pub async fn list_transactions(
        &self,
        actor: &Actor,
        status: Option<TransactionStatus>,
    ) -> Result<Listing, ServiceError> {
        let result = self.bounded(self.list_once(actor, status)).await;
        if let Err(e) = &result {
            warn!(user = %actor.username, reason = %e, "listing failed");
        }
        result
    }
}

/// Private API
impl<S: Storage> WorkflowService<S> {
    /// Small helper to log command outcomes
    fn log_outcome(action: Action, username: &str, outcome: &Result<Transaction, Rejection>) {
        match outcome {
            Ok(tx) => {
                info!(
                    user = %username,
                    tx = %tx.id,
                    status = %tx.status,
                    "{action} applied"
                );
            }
            Err(reason) => {
                info!(
                    user = %username,
                    reason = %reason,
                    "{action} denied"
                );
            }
        }
    }

    async fn dispatch(&self, caller: Caller<'_>, command: &Command) -> Result<Execution, ServiceError> {
        let action = command.action();
        let result = self
            .with_retries(action, caller.username(), || self.execute_once(caller, command))
            .await;

        match result {
            Err(ServiceError::ConcurrentModification(e)) => {
                warn!(user = %caller.username(), reason = %e, "{action} abandoned");
                self.record_denial(
                    caller.username(),
                    command.denied(&"concurrent modification"),
                    command.target(),
                )
                .await?;
                Err(ServiceError::ConcurrentModification(e))
            }
            Err(e) => {
                warn!(user = %caller.username(), reason = %e, "{action} failed");
                Err(e)
            }
            ok => ok,
        }
    }

    /// One attempt at a command, inside a single unit of work.
    async fn execute_once(
        &self,
        caller: Caller<'_>,
        command: &Command,
    ) -> Result<Execution, ServiceError> {
        let mut unit = self.storage.begin().await?;

        let (username, outcome) = match Self::resolve(unit.as_mut(), caller).await? {
            Ok(actor) => {
                let outcome = self.decide(unit.as_mut(), &actor, command).await?;
                (actor.username, outcome)
            }
            Err(rejection) => (caller.username().to_string(), Err(rejection)),
        };

        let (action, transaction_id) = match &outcome {
            Ok(tx) => (command.applied(tx), Some(tx.id)),
            Err(reason @ Rejection::NotFound(_)) => (command.denied(reason), None),
            Err(reason) => (command.denied(reason), command.target()),
        };
        unit.append(NewAuditEntry {
            username: username.clone(),
            action,
            transaction_id,
        })
        .await?;
        let audit_id = commit_audited(unit).await?;

        Self::log_outcome(command.action(), &username, &outcome);
        Ok(Execution { audit_id, outcome })
    }

    async fn resolve(
        unit: &mut dyn UnitOfWork,
        caller: Caller<'_>,
    ) -> Result<Result<Actor, Rejection>, StorageError> {
        match caller {
            Caller::Known(actor) => Ok(Ok(actor.clone())),
            Caller::Lookup(username) => Ok(unit
                .resolve_role(username)
                .await?
                .map(|role| Actor::new(username, role))
                .ok_or_else(|| Rejection::UserNotFound(username.to_string()))),
        }
    }

    /// Run the state machine against the stored snapshot and stage the result.
    async fn decide(
        &self,
        unit: &mut dyn UnitOfWork,
        actor: &Actor,
        command: &Command,
    ) -> Result<Result<Transaction, Rejection>, StorageError> {
        let (id, transition) = match command {
            Command::Create { transaction_type } => {
                // check before allocating so a refused create burns no id
                if let Err(violation) = self.workflow.policy().check_create(actor) {
                    return Ok(Err(violation.into()));
                }
                let id = unit.next_id().await?;
                let created = self.workflow.create(actor, id, transaction_type.clone());
                return Self::stage(unit, created).await;
            }
            Command::Edit {
                id,
                transaction_type,
            } => (
                *id,
                Transition::Edit {
                    transaction_type: transaction_type.clone(),
                },
            ),
            Command::Cancel { id } => (*id, Transition::Cancel),
            Command::Approve { id } => (*id, Transition::Approve),
            Command::Reject { id } => (*id, Transition::Reject),
            Command::AddNote { id, note } => (*id, Transition::AddNote { note: note.clone() }),
        };

        let Some(snapshot) = unit.get(id).await? else {
            return Ok(Err(Rejection::NotFound(id)));
        };
        let updated = self.workflow.apply(actor, snapshot, transition);
        Self::stage(unit, updated).await
    }

    async fn stage(
        unit: &mut dyn UnitOfWork,
        decision: Result<Transaction, GuardViolation>,
    ) -> Result<Result<Transaction, Rejection>, StorageError> {
        match decision {
            Ok(tx) => {
                unit.save(tx.clone()).await?;
                Ok(Ok(tx))
            }
            Err(violation) => Ok(Err(violation.into())),
        }
    }

    async fn list_once(
        &self,
        actor: &Actor,
        status: Option<TransactionStatus>,
    ) -> Result<Listing, ServiceError> {
        let mut unit = self.storage.begin().await?;
        let transactions = unit.list(status).await?;

        let action = match status {
            Some(status) => format!("Viewed transactions (status: {status})"),
            None => "Viewed transactions".to_string(),
        };
        unit.append(NewAuditEntry {
            username: actor.username.clone(),
            action,
            transaction_id: None,
        })
        .await?;
        let audit_id = commit_audited(unit).await?;

        info!(user = %actor.username, count = transactions.len(), "transactions viewed");
        Ok(Listing {
            audit_id,
            transactions,
        })
    }

    /// Record a refusal on its own, outside the unit that failed.
    async fn record_denial(
        &self,
        username: &str,
        action: String,
        transaction_id: Option<TxId>,
    ) -> Result<AuditId, ServiceError> {
        let entry = NewAuditEntry {
            username: username.to_string(),
            action,
            transaction_id,
        };
        self.bounded(async {
            let mut unit = self.storage.begin().await?;
            unit.append(entry).await?;
            commit_audited(unit).await
        })
        .await
    }

    /// Re-run `attempt` while it fails with a concurrent modification, up to
    /// the configured number of retries.
    async fn with_retries<T, F, Fut>(
        &self,
        action: Action,
        username: &str,
        mut attempt: F,
    ) -> Result<T, ServiceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let mut retries = 0;
        loop {
            match self.bounded(attempt()).await {
                Err(ServiceError::ConcurrentModification(e)) if retries < self.config.max_retries => {
                    retries += 1;
                    warn!(user = %username, retry = retries, reason = %e, "{action} conflicted, retrying");
                }
                result => return result,
            }
        }
    }

    /// Bound a unit of work by the storage timeout. On expiry the unit is
    /// dropped, which rolls it back.
    async fn bounded<T>(
        &self,
        work: impl Future<Output = Result<T, ServiceError>>,
    ) -> Result<T, ServiceError> {
        let limit = self.config.storage_timeout;
        tokio::time::timeout(limit, work)
            .await
            .unwrap_or(Err(ServiceError::StorageUnavailable(StorageError::Timeout(limit))))
    }
}

/// Commit a unit that staged exactly one audit entry and return its id.
async fn commit_audited(unit: Box<dyn UnitOfWork>) -> Result<AuditId, ServiceError> {
    let audit_ids = unit.commit().await?;
    audit_ids.last().copied().ok_or_else(|| {
        ServiceError::from(StorageError::Unavailable(
            "commit recorded no audit entry".to_string(),
        ))
    })
}
