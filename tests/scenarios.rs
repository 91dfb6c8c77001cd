use std::sync::Arc;

use maker_checker::{
    Actor, Command, GuardViolation, InMemoryStorage, Rejection, TransactionStatus, TxId,
    WorkflowService,
};

fn service() -> WorkflowService<InMemoryStorage> {
    WorkflowService::new(Arc::new(InMemoryStorage::new()))
}

fn alice() -> Actor {
    Actor::maker("alice")
}

fn bob() -> Actor {
    Actor::checker("bob")
}

async fn create_subscription(service: &WorkflowService<InMemoryStorage>) -> TxId {
    service
        .execute(
            &alice(),
            Command::Create {
                transaction_type: "Subscription".to_string(),
            },
        )
        .await
        .unwrap()
        .outcome
        .unwrap()
        .id
}

#[tokio::test]
async fn maker_creates_pending_transaction() {
    let service = service();
    let id = create_subscription(&service).await;

    let tx = service.storage().transaction(id).unwrap();
    assert_eq!(tx.status, TransactionStatus::Pending);
    assert_eq!(tx.created_by, "alice");

    let ledger = service.storage().audit_entries();
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].username, "alice");
    assert_eq!(ledger[0].action, "Created Subscription transaction");
}

#[tokio::test]
async fn maker_edits_checker_approves() {
    let service = service();
    let id = create_subscription(&service).await;

    let edited = service
        .execute(
            &alice(),
            Command::Edit {
                id,
                transaction_type: "Redemption".to_string(),
            },
        )
        .await
        .unwrap();
    assert_eq!(edited.outcome.unwrap().transaction_type, "Redemption");

    let approved = service
        .execute(&bob(), Command::Approve { id })
        .await
        .unwrap();
    assert_eq!(approved.outcome.unwrap().status, TransactionStatus::Approved);

    let last = service.storage().audit_entries().pop().unwrap();
    assert_eq!(last.username, "bob");
    assert_eq!(last.id, approved.audit_id);
}

#[tokio::test]
async fn maker_cannot_approve_own_transaction() {
    let service = service();
    let id = create_subscription(&service).await;

    let attempt = service
        .execute(&alice(), Command::Approve { id })
        .await
        .unwrap();

    assert!(matches!(attempt.outcome, Err(Rejection::Guard(_))));
    assert_eq!(
        service.storage().transaction(id).unwrap().status,
        TransactionStatus::Pending
    );
    let entries = service.storage().audit_entries_for(id);
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1].username, "alice");
    assert!(entries[1].action.starts_with("Denied approve"));
}

#[tokio::test]
async fn reject_after_approval_is_refused() {
    let service = service();
    let id = create_subscription(&service).await;
    service
        .execute(&bob(), Command::Approve { id })
        .await
        .unwrap();

    let attempt = service
        .execute(&bob(), Command::Reject { id })
        .await
        .unwrap();

    assert_eq!(
        attempt.outcome,
        Err(Rejection::Guard(GuardViolation::NotPending(
            TransactionStatus::Approved
        )))
    );
    assert_eq!(
        service.storage().transaction(id).unwrap().status,
        TransactionStatus::Approved
    );
}

#[tokio::test]
async fn notes_keep_their_order() {
    let service = service();
    let id = create_subscription(&service).await;

    for (actor, note) in [
        (alice(), "Initial note by maker"),
        (bob(), "Approval note by checker"),
    ] {
        let before = service.storage().transaction(id).unwrap().notes.len();
        service
            .execute(
                &actor,
                Command::AddNote {
                    id,
                    note: note.to_string(),
                },
            )
            .await
            .unwrap();
        let after = service.storage().transaction(id).unwrap().notes.len();
        assert_eq!(after, before + 1);
    }

    assert_eq!(
        service.storage().transaction(id).unwrap().notes,
        ["Initial note by maker", "Approval note by checker"]
    );
}

#[tokio::test]
async fn terminal_transactions_refuse_every_transition() {
    let service = service();

    let approved = create_subscription(&service).await;
    service.execute(&bob(), Command::Approve { id: approved }).await.unwrap();
    let rejected = create_subscription(&service).await;
    service.execute(&bob(), Command::Reject { id: rejected }).await.unwrap();
    let cancelled = create_subscription(&service).await;
    service.execute(&alice(), Command::Cancel { id: cancelled }).await.unwrap();

    for id in [approved, rejected, cancelled] {
        let before = service.storage().transaction(id).unwrap();
        let attempts = [
            (alice(), Command::Edit { id, transaction_type: "Switch".to_string() }),
            (alice(), Command::Cancel { id }),
            (bob(), Command::Approve { id }),
            (bob(), Command::Reject { id }),
        ];
        for (actor, command) in attempts {
            let execution = service.execute(&actor, command).await.unwrap();
            assert!(matches!(
                execution.outcome,
                Err(Rejection::Guard(GuardViolation::NotPending(_)))
            ));
        }
        assert_eq!(service.storage().transaction(id).unwrap(), before);
    }
}

#[tokio::test]
async fn creator_never_finalizes_whatever_the_role() {
    let service = service();
    let id = create_subscription(&service).await;

    for actor in [alice(), Actor::checker("alice"), Actor::admin("alice")] {
        for command in [Command::Approve { id }, Command::Reject { id }] {
            let action = command.action();
            let execution = service.execute(&actor, command).await.unwrap();
            assert_eq!(
                execution.outcome,
                Err(Rejection::Guard(GuardViolation::SelfApproval(action)))
            );
        }
    }
    assert!(service.storage().transaction(id).unwrap().is_pending());
}

#[tokio::test]
async fn second_approval_is_refused() {
    let service = service();
    let id = create_subscription(&service).await;

    let first = service.execute(&bob(), Command::Approve { id }).await.unwrap();
    let second = service
        .execute(&Actor::checker("carol"), Command::Approve { id })
        .await
        .unwrap();

    assert!(first.is_applied());
    assert!(!second.is_applied());
    assert_eq!(
        service.storage().transaction(id).unwrap().status,
        TransactionStatus::Approved
    );
}
