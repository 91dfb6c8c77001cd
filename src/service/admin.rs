//! User administration, audited like every other command.

use tracing::{info, warn};

use super::{ServiceError, WorkflowService, commit_audited};
use crate::model::{Actor, AuditId, NewAuditEntry, Role};
use crate::store::{Storage, StorageError, UnitOfWork};
use crate::workflow::{Action, Rejection};

/// A user management command. Only admins may issue these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    CreateUser { username: String, role: Role },
    ChangeRole { username: String, role: Role },
    DeleteUser { username: String },
}

impl AdminCommand {
    pub fn username(&self) -> &str {
        match self {
            AdminCommand::CreateUser { username, .. }
            | AdminCommand::ChangeRole { username, .. }
            | AdminCommand::DeleteUser { username } => username,
        }
    }

    pub fn applied(&self) -> String {
        match self {
            AdminCommand::CreateUser { username, .. } => format!("Created user {username}"),
            AdminCommand::ChangeRole { username, role } => {
                format!("Changed role of user {username} to {role}")
            }
            AdminCommand::DeleteUser { username } => format!("Deleted user {username}"),
        }
    }

    pub fn denied(&self, reason: &dyn std::fmt::Display) -> String {
        let verb = match self {
            AdminCommand::CreateUser { .. } => "create",
            AdminCommand::ChangeRole { .. } => "change role of",
            AdminCommand::DeleteUser { .. } => "delete",
        };
        format!("Denied {verb} user {}: {reason}", self.username())
    }
}

/// Result of a committed admin command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminExecution {
    pub audit_id: AuditId,
    pub outcome: Result<(), Rejection>,
}

impl<S: Storage> WorkflowService<S> {
    /// Execute a user management command on behalf of `actor`.
    pub async fn administer(
        &self,
        actor: &Actor,
        command: AdminCommand,
    ) -> Result<AdminExecution, ServiceError> {
        let result = self
            .with_retries(Action::ManageUsers, &actor.username, || {
                self.administer_once(actor, &command)
            })
            .await;

        match result {
            Err(ServiceError::ConcurrentModification(e)) => {
                warn!(user = %actor.username, reason = %e, "user management abandoned");
                self.record_denial(
                    &actor.username,
                    command.denied(&"concurrent modification"),
                    None,
                )
                .await?;
                Err(ServiceError::ConcurrentModification(e))
            }
            other => other,
        }
    }

    async fn administer_once(
        &self,
        actor: &Actor,
        command: &AdminCommand,
    ) -> Result<AdminExecution, ServiceError> {
        let mut unit = self.storage.begin().await?;

        let outcome = match self.workflow.policy().check_manage_users(actor) {
            Ok(()) => Self::apply_admin(unit.as_mut(), command).await?,
            Err(violation) => Err(violation.into()),
        };

        let action = match &outcome {
            Ok(()) => command.applied(),
            Err(reason) => command.denied(reason),
        };
        unit.append(NewAuditEntry {
            username: actor.username.clone(),
            action: action.clone(),
            transaction_id: None,
        })
        .await?;
        let audit_id = commit_audited(unit).await?;

        info!(user = %actor.username, "{action}");
        Ok(AdminExecution { audit_id, outcome })
    }

    async fn apply_admin(
        unit: &mut dyn UnitOfWork,
        command: &AdminCommand,
    ) -> Result<Result<(), Rejection>, StorageError> {
        match command {
            AdminCommand::CreateUser { username, role } => {
                if unit.resolve_role(username).await?.is_some() {
                    return Ok(Err(Rejection::UserExists(username.clone())));
                }
                unit.save_user(Actor::new(username.clone(), *role)).await?;
            }
            AdminCommand::ChangeRole { username, role } => {
                if unit.resolve_role(username).await?.is_none() {
                    return Ok(Err(Rejection::UserNotFound(username.clone())));
                }
                unit.save_user(Actor::new(username.clone(), *role)).await?;
            }
            AdminCommand::DeleteUser { username } => {
                if !unit.remove_user(username).await? {
                    return Ok(Err(Rejection::UserNotFound(username.clone())));
                }
            }
        }
        Ok(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStorage;
    use crate::workflow::GuardViolation;
    use std::sync::Arc;

    fn service() -> WorkflowService<InMemoryStorage> {
        let storage = InMemoryStorage::new().with_users([Actor::admin("root")]);
        WorkflowService::new(Arc::new(storage))
    }

    fn create_user(username: &str, role: Role) -> AdminCommand {
        AdminCommand::CreateUser {
            username: username.to_string(),
            role,
        }
    }

    #[tokio::test]
    async fn admin_creates_changes_and_deletes_users() {
        let service = service();
        let root = Actor::admin("root");

        let created = service
            .administer(&root, create_user("new_maker", Role::Maker))
            .await
            .unwrap();
        assert!(created.outcome.is_ok());
        assert_eq!(service.storage().role_of("new_maker"), Some(Role::Maker));

        service
            .administer(
                &root,
                AdminCommand::ChangeRole {
                    username: "new_maker".to_string(),
                    role: Role::Checker,
                },
            )
            .await
            .unwrap();
        assert_eq!(service.storage().role_of("new_maker"), Some(Role::Checker));

        service
            .administer(
                &root,
                AdminCommand::DeleteUser {
                    username: "new_maker".to_string(),
                },
            )
            .await
            .unwrap();
        assert_eq!(service.storage().role_of("new_maker"), None);

        let actions: Vec<_> = service
            .storage()
            .audit_entries()
            .into_iter()
            .map(|entry| entry.action)
            .collect();
        assert_eq!(
            actions,
            [
                "Created user new_maker",
                "Changed role of user new_maker to Checker",
                "Deleted user new_maker",
            ]
        );
    }

    #[tokio::test]
    async fn non_admin_is_refused_and_audited() {
        let service = service();
        let execution = service
            .administer(&Actor::maker("alice"), create_user("eve", Role::Admin))
            .await
            .unwrap();

        assert_eq!(
            execution.outcome,
            Err(Rejection::Guard(GuardViolation::RoleNotPermitted {
                role: Role::Maker,
                action: Action::ManageUsers
            }))
        );
        assert_eq!(service.storage().role_of("eve"), None);

        let ledger = service.storage().audit_entries();
        assert_eq!(ledger.len(), 1);
        assert_eq!(
            ledger[0].action,
            "Denied create user eve: role Maker may not manage users"
        );
    }

    #[tokio::test]
    async fn duplicate_and_missing_users_are_rejections() {
        let service = service();
        let root = Actor::admin("root");

        let duplicate = service
            .administer(&root, create_user("root", Role::Maker))
            .await
            .unwrap();
        assert_eq!(
            duplicate.outcome,
            Err(Rejection::UserExists("root".to_string()))
        );
        assert_eq!(service.storage().role_of("root"), Some(Role::Admin));

        let missing = service
            .administer(
                &root,
                AdminCommand::DeleteUser {
                    username: "ghost".to_string(),
                },
            )
            .await
            .unwrap();
        assert_eq!(
            missing.outcome,
            Err(Rejection::UserNotFound("ghost".to_string()))
        );
        assert_eq!(service.storage().audit_entries().len(), 2);
    }
}
