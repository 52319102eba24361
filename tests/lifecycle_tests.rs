//! Integration tests for completing, paying and cancelling tokens, desk
//! administration, and the consistency sweep.


use std::sync::Arc;

use chrono::{Duration, Utc};
use qdesk::queue::audit::plan_repairs;
use qdesk::queue::{rules, DeskStatus, Token, TokenStatus};
use qdesk::service::QueueService;
use qdesk::store::{DeskQuery, MemoryStore, Store, TokenQuery, WriteBatch};
use qdesk::QueueError;
use test_harness::{new_service, seed};

#[tokio::test]
async fn test_complete_records_serving_desk() {
    let (_store, service) = new_service();
    let (tokens, desks) = seed(&service, &["A"], 1).await;
    service.auto_assign_once().await.unwrap();

    let outcome = service.complete_token(tokens[0].id).await.unwrap();
    assert!(outcome.is_applied());
    let completion = outcome.into_inner();

    assert_eq!(completion.token.status, TokenStatus::Completed);
    assert_eq!(completion.token.served_by_desk_id, Some(desks[0].id));
    assert!(completion.token.assigned_desk_id.is_none());
    assert!(completion.token.completed_at.is_some());

    let desk = completion.desk.unwrap();
    assert_eq!(desk.status, DeskStatus::Free);
    assert!(desk.assigned_token_id.is_none());
    assert_eq!(desk.total_tokens_served, 1);

    // Second completion is a no-op
    let again = service.complete_token(tokens[0].id).await.unwrap();
    assert!(!again.is_applied());
    let desk = service.desk(desks[0].id).await.unwrap();
    assert_eq!(desk.total_tokens_served, 1);
}

#[tokio::test]
async fn test_complete_requires_assignment() {
    let (_store, service) = new_service();
    let (tokens, desks) = seed(&service, &["A"], 1).await;

    let err = service.complete_token(tokens[0].id).await.unwrap_err();
    assert!(matches!(err, QueueError::InvalidTransition(_)));

    let err = service.complete_desk(desks[0].desk_number).await.unwrap_err();
    assert!(matches!(err, QueueError::InvalidTransition(_)));

    let err = service.complete_desk(42).await.unwrap_err();
    assert!(matches!(err, QueueError::DeskNotFound(_)));
}

#[tokio::test]
async fn test_payment_is_idempotent() {
    let (_store, service) = new_service();
    let (tokens, _) = seed(&service, &["A"], 1).await;

    let err = service.pay_token(tokens[0].id, Some(500)).await.unwrap_err();
    assert!(matches!(err, QueueError::InvalidTransition(_)));

    service.auto_assign_once().await.unwrap();
    service.complete_token(tokens[0].id).await.unwrap();

    let paid = service.pay_token(tokens[0].id, Some(1250)).await.unwrap();
    assert!(paid.is_applied());
    let paid = paid.into_inner();
    assert_eq!(paid.status, TokenStatus::Paid);
    assert_eq!(paid.fee_cents, Some(1250));
    assert!(paid.paid_at.is_some());

    let again = service.pay_token(tokens[0].id, Some(9999)).await.unwrap();
    assert!(!again.is_applied());
    assert_eq!(again.into_inner().fee_cents, Some(1250));

    // Paid tokens stay on record
    let stored = service.token_by_number(tokens[0].token_number).await.unwrap();
    assert_eq!(stored.status, TokenStatus::Paid);
}

#[tokio::test]
async fn test_cancel_waiting_and_assigned() {
    let (_store, service) = new_service();
    let (tokens, desks) = seed(&service, &["A", "B"], 1).await;
    service.auto_assign_once().await.unwrap();

    // Assigned token releases its desk without counting as served
    let cancelled = service.cancel_token(tokens[0].id).await.unwrap();
    assert!(cancelled.is_applied());
    let cancelled = cancelled.into_inner();
    assert_eq!(cancelled.status, TokenStatus::Cancelled);
    assert!(cancelled.assigned_desk_id.is_none());

    let desk = service.desk(desks[0].id).await.unwrap();
    assert_eq!(desk.status, DeskStatus::Free);
    assert_eq!(desk.total_tokens_served, 0);

    // Waiting token
    assert!(service.cancel_token(tokens[1].id).await.unwrap().is_applied());
    assert!(!service.cancel_token(tokens[1].id).await.unwrap().is_applied());

    assert!(service.auto_assign_once().await.unwrap().is_none());
    assert!(service.audit().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_cancel_after_completion_rejected() {
    let (_store, service) = new_service();
    let (tokens, _) = seed(&service, &["A"], 1).await;
    service.auto_assign_once().await.unwrap();
    service.complete_token(tokens[0].id).await.unwrap();

    let err = service.cancel_token(tokens[0].id).await.unwrap_err();
    assert!(matches!(err, QueueError::InvalidTransition(_)));
}

#[tokio::test]
async fn test_desk_status_rules() {
    let (_store, service) = new_service();
    let (_, desks) = seed(&service, &["A"], 1).await;
    let desk_id = desks[0].id;

    let err = service
        .set_desk_status(desk_id, DeskStatus::Occupied)
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::Validation(_)));

    let outcome = service
        .set_desk_status(desk_id, DeskStatus::Maintenance)
        .await
        .unwrap();
    assert!(outcome.is_applied());
    assert!(!service
        .set_desk_status(desk_id, DeskStatus::Maintenance)
        .await
        .unwrap()
        .is_applied());

    service.set_desk_status(desk_id, DeskStatus::Free).await.unwrap();
    service.auto_assign_once().await.unwrap().unwrap();

    let err = service
        .set_desk_status(desk_id, DeskStatus::Maintenance)
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::InvalidTransition(_)));
}

#[tokio::test]
async fn test_desk_operator_and_activity() {
    let (_store, service) = new_service();
    let (_, desks) = seed(&service, &[], 1).await;

    let desk = service
        .set_desk_operator(desks[0].id, "  Morgan  ")
        .await
        .unwrap();
    assert_eq!(desk.operator_name, "Morgan");

    let desk = service.set_desk_active(desks[0].id, false).await.unwrap();
    assert!(!desk.is_active);
    assert_eq!(desk.version, desks[0].version + 2);
}

#[tokio::test]
async fn test_validation_and_lookup_errors() {
    let (_store, service) = new_service();

    let err = service.take_token("   ").await.unwrap_err();
    assert!(matches!(err, QueueError::Validation(_)));
    let err = service.register_desk("", "op").await.unwrap_err();
    assert!(matches!(err, QueueError::Validation(_)));

    let err = service.token_by_number(7).await.unwrap_err();
    assert!(err.is_not_found());
    let err = service.desk_by_number(7).await.unwrap_err();
    assert!(err.is_not_found());

    let token = service.take_token("  Ada ").await.unwrap();
    assert_eq!(token.name, "Ada");
    assert_eq!(token.token_number, 1);
}

#[tokio::test]
async fn test_daily_summary_counts() {
    let (_store, service) = new_service();
    let (tokens, _) = seed(&service, &["A", "B", "C", "D"], 2).await;

    service.auto_assign_all().await.unwrap();
    service.complete_token(tokens[0].id).await.unwrap();
    service.pay_token(tokens[0].id, Some(700)).await.unwrap();
    service.cancel_token(tokens[3].id).await.unwrap();

    let today = Utc::now().date_naive();
    let summary = service.daily_summary(today).await.unwrap();
    assert_eq!(summary.issued, 4);
    assert_eq!(summary.paid, 1);
    assert_eq!(summary.assigned, 1);
    assert_eq!(summary.waiting, 1);
    assert_eq!(summary.cancelled, 1);
    assert_eq!(summary.completed, 0);
    assert_eq!(summary.revenue_cents, 700);
    assert!(summary.average_wait_secs.is_some());
    assert_eq!(summary.desks_free, 1);
    assert_eq!(summary.desks_occupied, 1);
    assert_eq!(summary.total_tokens_served, 1);

    let yesterday = today.pred_opt().unwrap();
    assert_eq!(service.daily_summary(yesterday).await.unwrap().issued, 0);
}

#[tokio::test]
async fn test_board_hides_finished_tokens() {
    let (_store, service) = new_service();
    let (tokens, _) = seed(&service, &["A", "B", "C"], 1).await;
    service.auto_assign_once().await.unwrap();
    service.complete_token(tokens[0].id).await.unwrap();
    service.pay_token(tokens[0].id, None).await.unwrap();
    service.cancel_token(tokens[2].id).await.unwrap();

    let board = service.board().await.unwrap();
    let ids: Vec<_> = board.tokens.iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![tokens[1].id]);
    assert_eq!(board.desks.len(), 1);
}

#[tokio::test]
async fn test_reconcile_repairs_half_applied_assignment() {
    let (store, service) = new_service();
    let (tokens, desks) = seed(&service, &["A"], 1).await;

    // Only the desk side of an assignment landed
    let (_, desk) = rules::assign(&tokens[0], &desks[0], Utc::now()).unwrap();
    store
        .commit(WriteBatch::new().put_desk(desk))
        .await
        .unwrap();

    let violations = service.audit().await.unwrap();
    assert_eq!(violations.len(), 1);

    let repaired = service.reconcile().await.unwrap();
    assert_eq!(repaired.len(), 1);
    assert!(service.audit().await.unwrap().is_empty());

    let desk = service.desk(desks[0].id).await.unwrap();
    assert_eq!(desk.status, DeskStatus::Free);
    assert_eq!(desk.total_tokens_served, 0);

    // The queue keeps moving
    let assignment = service.auto_assign_once().await.unwrap().unwrap();
    assert_eq!(assignment.token.id, tokens[0].id);
    assert!(service.reconcile().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_reconcile_returns_orphaned_token_to_queue() {
    let (store, service) = new_service();
    let (tokens, desks) = seed(&service, &["A"], 1).await;

    let (token, _) = rules::assign(&tokens[0], &desks[0], Utc::now()).unwrap();
    store
        .commit(WriteBatch::new().put_token(token))
        .await
        .unwrap();

    service.reconcile().await.unwrap();
    let token: Token = service.token(tokens[0].id).await.unwrap();
    assert_eq!(token.status, TokenStatus::Waiting);
    assert!(token.assigned_desk_id.is_none());
}

#[tokio::test]
async fn test_reconcile_plan_goes_stale_when_counterpart_moves() {
    let (store, service) = new_service();
    let (tokens, desks) = seed(&service, &["A"], 1).await;

    // Desk side of an assignment landed; the token side is still pending
    let (token_side, desk_side) = rules::assign(&tokens[0], &desks[0], Utc::now()).unwrap();
    store
        .commit(WriteBatch::new().put_desk(desk_side))
        .await
        .unwrap();

    let all_tokens = store.list_tokens(&TokenQuery::all()).await.unwrap();
    let all_desks = store.list_desks(&DeskQuery::all()).await.unwrap();
    let plan = plan_repairs(&all_tokens, &all_desks);
    assert_eq!(plan.desks.len(), 1);
    assert_eq!(plan.guard_tokens.len(), 1);

    // The token side lands before the sweep commits
    store
        .commit(WriteBatch::new().put_token(token_side))
        .await
        .unwrap();

    let mut stale = WriteBatch::new();
    for desk in plan.desks {
        stale = stale.put_desk(desk);
    }
    for token in plan.guard_tokens {
        stale = stale.put_token(token);
    }
    assert!(store.commit(stale).await.unwrap_err().is_conflict());

    // A fresh sweep sees a consistent pair and leaves it alone
    assert!(service.reconcile().await.unwrap().is_empty());
    let desk = service.desk(desks[0].id).await.unwrap();
    assert_eq!(desk.status, DeskStatus::Occupied);
    assert_eq!(desk.assigned_token_id, Some(tokens[0].id));
    assert!(service.audit().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_finished_tokens_do_not_count_against_capacity() {
    let service = QueueService::new(Arc::new(MemoryStore::with_capacity(2)));
    let (tokens, _) = seed(&service, &["a", "b"], 1).await;

    assert!(matches!(
        service.take_token("over").await,
        Err(QueueError::QueueFull(2))
    ));

    for token in &tokens {
        service.auto_assign_once().await.unwrap().unwrap();
        service.complete_token(token.id).await.unwrap();
        service.pay_token(token.id, Some(100)).await.unwrap();
    }
    assert!(service.board().await.unwrap().tokens.is_empty());

    let next = service.take_token("c").await.unwrap();
    assert_eq!(next.status, TokenStatus::Waiting);
}

#[tokio::test]
async fn test_purge_finished_removes_old_terminal_tokens() {
    let (store, service) = new_service();
    let today = service.take_token("today").await.unwrap();
    service.cancel_token(today.id).await.unwrap();

    let old = Utc::now() - Duration::days(3);
    let old_token = |number: u64, status: TokenStatus| {
        let mut token = Token::with_created_at(number, format!("old {}", number), old);
        token.status = status;
        token
    };
    let old_paid = store.insert_token(old_token(11, TokenStatus::Paid)).await.unwrap();
    let old_cancelled = store
        .insert_token(old_token(12, TokenStatus::Cancelled))
        .await
        .unwrap();
    let old_completed = store
        .insert_token(old_token(13, TokenStatus::Completed))
        .await
        .unwrap();

    let removed = service.purge_finished(Utc::now().date_naive()).await.unwrap();
    assert_eq!(removed, 2);

    assert!(store.get_token(old_paid.id).await.unwrap().is_none());
    assert!(store.get_token(old_cancelled.id).await.unwrap().is_none());
    assert!(store.get_token(old_completed.id).await.unwrap().is_some());
    assert!(store.get_token(today.id).await.unwrap().is_some());

    assert_eq!(service.purge_finished(Utc::now().date_naive()).await.unwrap(), 0);
}
