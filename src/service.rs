//! Queue operations on top of a [`Store`].
//!
//! Every transition follows the same shape: read the rows, run the matching
//! rule from [`crate::queue::rules`], and commit the result as one
//! conditional [`WriteBatch`]. When the commit loses against a concurrent
//! writer the transition starts again from fresh reads, up to
//! `conflict_retries` times.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{QueueError, Result};
use crate::queue::audit::{self, Violation};
use crate::queue::rules::{self, Outcome};
use crate::queue::{CounterKind, Desk, DeskStatus, SystemSettings, Token, TokenStatus};
use crate::store::{DeskQuery, Store, TokenQuery, WriteBatch};

/// A token and the desk it was matched with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub token: Token,
    pub desk: Desk,
}

/// A token after service and the desk that served it, if still known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    pub token: Token,
    pub desk: Option<Desk>,
}

/// Everything a polling page renders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Board {
    /// Waiting, assigned and completed-but-unpaid tokens in queue order
    pub tokens: Vec<Token>,
    pub desks: Vec<Desk>,
    pub settings: SystemSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailySummary {
    pub date: NaiveDate,
    pub issued: usize,
    pub waiting: usize,
    pub assigned: usize,
    pub completed: usize,
    pub paid: usize,
    pub cancelled: usize,
    pub revenue_cents: u64,
    /// Mean time from issue to assignment, over tokens that were assigned
    pub average_wait_secs: Option<i64>,
    pub desks_free: usize,
    pub desks_occupied: usize,
    pub desks_maintenance: usize,
    pub total_tokens_served: u64,
}

fn validate_required(field: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(QueueError::Validation(format!("{} must not be empty", field)));
    }
    Ok(trimmed.to_string())
}

/// Rows are stored with their version bumped; mirror that in what we return.
fn committed<T: Versioned>(mut row: T) -> T {
    row.bump();
    row
}

trait Versioned {
    fn bump(&mut self);
}

impl Versioned for Token {
    fn bump(&mut self) {
        self.version += 1;
    }
}

impl Versioned for Desk {
    fn bump(&mut self) {
        self.version += 1;
    }
}

pub struct QueueService {
    store: Arc<dyn Store>,
    conflict_retries: u32,
    /// Single-flight gate for auto-assignment passes in this process
    assign_gate: Mutex<()>,
}

impl QueueService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self::with_conflict_retries(store, 3)
    }

    pub fn with_conflict_retries(store: Arc<dyn Store>, conflict_retries: u32) -> Self {
        Self {
            store,
            conflict_retries,
            assign_gate: Mutex::new(()),
        }
    }

    async fn with_retries<T, F, Fut>(&self, operation: &'static str, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut tries = 0;
        loop {
            match attempt().await {
                Err(e) if e.is_conflict() && tries < self.conflict_retries => {
                    tries += 1;
                    tracing::debug!(
                        operation,
                        attempt = tries,
                        error = %e,
                        "Write conflict, retrying"
                    );
                }
                Err(e) if e.is_conflict() => {
                    tracing::warn!(
                        operation,
                        attempts = tries + 1,
                        error = %e,
                        "Giving up after write conflicts"
                    );
                    return Err(e);
                }
                other => return other,
            }
        }
    }

    // =========================================================================
    // Tokens and desks
    // =========================================================================

    /// Issue the next numbered token to a customer.
    pub async fn take_token(&self, name: &str) -> Result<Token> {
        let name = validate_required("name", name)?;
        let number = self.store.next_number(CounterKind::Token).await?;
        let token = self.store.insert_token(Token::new(number, name)).await?;
        tracing::info!(token_number = token.token_number, token_id = %token.id, "Token issued");
        Ok(token)
    }

    pub async fn register_desk(&self, name: &str, operator_name: &str) -> Result<Desk> {
        let name = validate_required("name", name)?;
        let number = self.store.next_number(CounterKind::Desk).await?;
        let desk = self
            .store
            .insert_desk(Desk::new(number, name, operator_name.trim().to_string()))
            .await?;
        tracing::info!(desk_number = desk.desk_number, desk_id = %desk.id, "Desk registered");
        Ok(desk)
    }

    pub async fn token(&self, id: Uuid) -> Result<Token> {
        self.store
            .get_token(id)
            .await?
            .ok_or_else(|| QueueError::TokenNotFound(id.to_string()))
    }

    pub async fn token_by_number(&self, token_number: u64) -> Result<Token> {
        self.store
            .list_tokens(&TokenQuery::by_number(token_number).limit(1))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| QueueError::TokenNotFound(format!("#{}", token_number)))
    }

    pub async fn desk(&self, id: Uuid) -> Result<Desk> {
        self.store
            .get_desk(id)
            .await?
            .ok_or_else(|| QueueError::DeskNotFound(id.to_string()))
    }

    pub async fn desk_by_number(&self, desk_number: u64) -> Result<Desk> {
        self.store
            .list_desks(&DeskQuery::by_number(desk_number).limit(1))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| QueueError::DeskNotFound(format!("#{}", desk_number)))
    }

    pub async fn tokens(&self, query: &TokenQuery) -> Result<Vec<Token>> {
        self.store.list_tokens(query).await
    }

    pub async fn desks(&self, query: &DeskQuery) -> Result<Vec<Desk>> {
        self.store.list_desks(query).await
    }

    // =========================================================================
    // Assignment
    // =========================================================================

    async fn attempt_assign_next(&self) -> Result<Option<Assignment>> {
        let waiting = self
            .store
            .list_tokens(&TokenQuery::waiting().limit(1))
            .await?;
        let desks = self.store.list_desks(&DeskQuery::available().limit(1)).await?;
        let Some((token, desk)) = rules::pick_next(&waiting, &desks) else {
            return Ok(None);
        };

        let (token, desk) = rules::assign(token, desk, Utc::now())?;
        self.store
            .commit(WriteBatch::new().put_token(token.clone()).put_desk(desk.clone()))
            .await?;

        tracing::info!(
            token_number = token.token_number,
            desk_number = desk.desk_number,
            "Token assigned"
        );
        Ok(Some(Assignment {
            token: committed(token),
            desk: committed(desk),
        }))
    }

    async fn assign_next(&self) -> Result<Option<Assignment>> {
        self.with_retries("auto_assign", move || self.attempt_assign_next())
            .await
    }

    /// Match the oldest waiting token with the first free, active desk.
    /// Returns `None` when either side is empty.
    pub async fn auto_assign_once(&self) -> Result<Option<Assignment>> {
        let _gate = self.assign_gate.lock().await;
        self.assign_next().await
    }

    /// Keep assigning until no waiting token or no free desk remains.
    pub async fn auto_assign_all(&self) -> Result<Vec<Assignment>> {
        let _gate = self.assign_gate.lock().await;
        self.drain_assignments().await
    }

    /// Like [`auto_assign_all`](Self::auto_assign_all), but returns `None`
    /// straight away if another pass in this process is still running.
    pub async fn try_auto_assign(&self) -> Result<Option<Vec<Assignment>>> {
        let Ok(_gate) = self.assign_gate.try_lock() else {
            tracing::debug!("Auto-assign pass already running, skipping");
            return Ok(None);
        };
        self.drain_assignments().await.map(Some)
    }

    async fn drain_assignments(&self) -> Result<Vec<Assignment>> {
        let mut assignments = Vec::new();
        while let Some(assignment) = self.assign_next().await? {
            assignments.push(assignment);
        }
        Ok(assignments)
    }

    /// Assign a specific token to a specific desk, bypassing queue order.
    pub async fn assign(&self, token_id: Uuid, desk_id: Uuid) -> Result<Assignment> {
        self.with_retries("assign", move || async move {
            let token = self.token(token_id).await?;
            let desk = self.desk(desk_id).await?;
            let (token, desk) = rules::assign(&token, &desk, Utc::now())?;
            self.store
                .commit(WriteBatch::new().put_token(token.clone()).put_desk(desk.clone()))
                .await?;
            tracing::info!(
                token_number = token.token_number,
                desk_number = desk.desk_number,
                "Token assigned manually"
            );
            Ok(Assignment {
                token: committed(token),
                desk: committed(desk),
            })
        })
        .await
    }

    // =========================================================================
    // Completion, payment, cancellation
    // =========================================================================

    async fn finish(&self, token: Token, desk: Desk) -> Result<Outcome<Completion>> {
        let (token, desk) = rules::complete(&token, &desk, Utc::now())?;
        self.store
            .commit(WriteBatch::new().put_token(token.clone()).put_desk(desk.clone()))
            .await?;
        tracing::info!(
            token_number = token.token_number,
            desk_number = desk.desk_number,
            served = desk.total_tokens_served,
            "Token completed"
        );
        Ok(Outcome::Applied(Completion {
            token: committed(token),
            desk: Some(committed(desk)),
        }))
    }

    /// Mark an assigned token as served and free its desk.
    /// Completing an already completed token changes nothing.
    pub async fn complete_token(&self, token_id: Uuid) -> Result<Outcome<Completion>> {
        self.with_retries("complete_token", move || async move {
            let token = self.token(token_id).await?;
            if token.status == TokenStatus::Completed {
                let desk = match token.served_by_desk_id {
                    Some(id) => self.store.get_desk(id).await?,
                    None => None,
                };
                return Ok(Outcome::Unchanged(Completion { token, desk }));
            }
            let Some(desk_id) = token.assigned_desk_id else {
                return Err(QueueError::InvalidTransition(format!(
                    "token {} is {}, only assigned tokens can be completed",
                    token.token_number, token.status
                )));
            };
            let desk = self.desk(desk_id).await?;
            self.finish(token, desk).await
        })
        .await
    }

    /// Complete whatever token the desk with this number is serving.
    pub async fn complete_desk(&self, desk_number: u64) -> Result<Outcome<Completion>> {
        self.with_retries("complete_desk", move || async move {
            let desk = self.desk_by_number(desk_number).await?;
            let Some(token_id) = desk
                .assigned_token_id
                .filter(|_| desk.status == DeskStatus::Occupied)
            else {
                return Err(QueueError::InvalidTransition(format!(
                    "desk {} is not serving a token",
                    desk.desk_number
                )));
            };
            let token = self.token(token_id).await?;
            self.finish(token, desk).await
        })
        .await
    }

    /// Record payment for a completed token. Paying twice is a no-op.
    pub async fn pay_token(&self, token_id: Uuid, fee_cents: Option<u64>) -> Result<Outcome<Token>> {
        self.with_retries("pay_token", move || async move {
            let token = self.token(token_id).await?;
            match rules::pay(&token, fee_cents, Utc::now())? {
                Outcome::Applied(paid) => {
                    self.store
                        .commit(WriteBatch::new().put_token(paid.clone()))
                        .await?;
                    tracing::info!(
                        token_number = paid.token_number,
                        fee_cents = ?paid.fee_cents,
                        "Token paid"
                    );
                    Ok(Outcome::Applied(committed(paid)))
                }
                unchanged => Ok(unchanged),
            }
        })
        .await
    }

    pub async fn cancel_token(&self, token_id: Uuid) -> Result<Outcome<Token>> {
        self.with_retries("cancel_token", move || async move {
            let token = self.token(token_id).await?;
            let desk = match token.assigned_desk_id {
                Some(id) => self.store.get_desk(id).await?,
                None => None,
            };
            match rules::cancel(&token, desk.as_ref(), Utc::now())? {
                Outcome::Applied((cancelled, freed)) => {
                    let mut batch = WriteBatch::new().put_token(cancelled.clone());
                    if let Some(freed) = freed {
                        tracing::info!(
                            desk_number = freed.desk_number,
                            "Desk released by cancellation"
                        );
                        batch = batch.put_desk(freed);
                    }
                    self.store.commit(batch).await?;
                    tracing::info!(token_number = cancelled.token_number, "Token cancelled");
                    Ok(Outcome::Applied(committed(cancelled)))
                }
                Outcome::Unchanged((token, _)) => Ok(Outcome::Unchanged(token)),
            }
        })
        .await
    }

    // =========================================================================
    // Desk administration
    // =========================================================================

    pub async fn set_desk_status(&self, desk_id: Uuid, status: DeskStatus) -> Result<Outcome<Desk>> {
        self.with_retries("set_desk_status", move || async move {
            let desk = self.desk(desk_id).await?;
            match rules::set_desk_status(&desk, status, Utc::now())? {
                Outcome::Applied(desk) => {
                    self.store
                        .commit(WriteBatch::new().put_desk(desk.clone()))
                        .await?;
                    tracing::info!(
                        desk_number = desk.desk_number,
                        status = %desk.status,
                        "Desk status changed"
                    );
                    Ok(Outcome::Applied(committed(desk)))
                }
                unchanged => Ok(unchanged),
            }
        })
        .await
    }

    /// Inactive desks keep any token they hold but receive no new ones.
    pub async fn set_desk_active(&self, desk_id: Uuid, is_active: bool) -> Result<Desk> {
        self.update_desk("set_desk_active", desk_id, move |desk| {
            desk.is_active = is_active;
            Ok(())
        })
        .await
    }

    pub async fn set_desk_operator(&self, desk_id: Uuid, operator_name: &str) -> Result<Desk> {
        let operator_name = operator_name.trim().to_string();
        self.update_desk("set_desk_operator", desk_id, move |desk| {
            desk.operator_name = operator_name.clone();
            Ok(())
        })
        .await
    }

    async fn update_desk<F>(&self, operation: &'static str, desk_id: Uuid, edit: F) -> Result<Desk>
    where
        F: Fn(&mut Desk) -> Result<()> + Send + Sync,
    {
        let edit = &edit;
        self.with_retries(operation, move || async move {
            let mut desk = self.desk(desk_id).await?;
            edit(&mut desk)?;
            desk.updated_at = Utc::now();
            self.store
                .commit(WriteBatch::new().put_desk(desk.clone()))
                .await?;
            tracing::info!(desk_number = desk.desk_number, operation, "Desk updated");
            Ok(committed(desk))
        })
        .await
    }

    // =========================================================================
    // Settings and views
    // =========================================================================

    pub async fn settings(&self) -> Result<SystemSettings> {
        self.store.settings().await
    }

    pub async fn set_auto_assign(&self, enabled: bool) -> Result<SystemSettings> {
        let settings = self
            .store
            .put_settings(SystemSettings {
                auto_assign_enabled: enabled,
                updated_at: Utc::now(),
            })
            .await?;
        tracing::info!(enabled, "Auto-assign toggled");
        Ok(settings)
    }

    pub async fn board(&self) -> Result<Board> {
        let query = TokenQuery {
            statuses: vec![
                TokenStatus::Waiting,
                TokenStatus::Assigned,
                TokenStatus::Completed,
            ],
            ..TokenQuery::default()
        };
        Ok(Board {
            tokens: self.store.list_tokens(&query).await?,
            desks: self.store.list_desks(&DeskQuery::all()).await?,
            settings: self.store.settings().await?,
        })
    }

    /// Figures for tokens issued on `date` (UTC) and the current desk floor.
    pub async fn daily_summary(&self, date: NaiveDate) -> Result<DailySummary> {
        let tokens = self
            .store
            .list_tokens(&TokenQuery::all().created_on(date))
            .await?;
        let desks = self.store.list_desks(&DeskQuery::all()).await?;

        let mut by_status: HashMap<TokenStatus, usize> = HashMap::new();
        for token in &tokens {
            *by_status.entry(token.status).or_default() += 1;
        }
        let count = |s: TokenStatus| by_status.get(&s).copied().unwrap_or(0);

        let waits: Vec<i64> = tokens
            .iter()
            .filter_map(|t| t.assigned_at.map(|at| (at - t.created_at).num_seconds()))
            .collect();
        let average_wait_secs = if waits.is_empty() {
            None
        } else {
            Some(waits.iter().sum::<i64>() / waits.len() as i64)
        };

        Ok(DailySummary {
            date,
            issued: tokens.len(),
            waiting: count(TokenStatus::Waiting),
            assigned: count(TokenStatus::Assigned),
            completed: count(TokenStatus::Completed),
            paid: count(TokenStatus::Paid),
            cancelled: count(TokenStatus::Cancelled),
            revenue_cents: tokens
                .iter()
                .filter(|t| t.status == TokenStatus::Paid)
                .filter_map(|t| t.fee_cents)
                .sum(),
            average_wait_secs,
            desks_free: desks.iter().filter(|d| d.status == DeskStatus::Free).count(),
            desks_occupied: desks
                .iter()
                .filter(|d| d.status == DeskStatus::Occupied)
                .count(),
            desks_maintenance: desks
                .iter()
                .filter(|d| d.status == DeskStatus::Maintenance)
                .count(),
            total_tokens_served: desks.iter().map(|d| d.total_tokens_served).sum(),
        })
    }

    /// Delete paid and cancelled tokens issued before `before` (UTC) and
    /// return how many went. Counters keep their value, so numbers are
    /// never handed out twice.
    pub async fn purge_finished(&self, before: NaiveDate) -> Result<usize> {
        self.with_retries("purge_finished", move || async move {
            let expired: Vec<Token> = self
                .store
                .list_tokens(&TokenQuery::all())
                .await?
                .into_iter()
                .filter(|t| t.status.is_terminal() && t.created_at.date_naive() < before)
                .collect();
            if expired.is_empty() {
                return Ok(0);
            }

            let batch = expired
                .iter()
                .fold(WriteBatch::new(), |batch, token| batch.delete_token(token));
            self.store.commit(batch).await?;
            tracing::info!(count = expired.len(), %before, "Purged finished tokens");
            Ok(expired.len())
        })
        .await
    }

    // =========================================================================
    // Consistency
    // =========================================================================

    pub async fn audit(&self) -> Result<Vec<Violation>> {
        let tokens = self.store.list_tokens(&TokenQuery::all()).await?;
        let desks = self.store.list_desks(&DeskQuery::all()).await?;
        Ok(audit::find_violations(&tokens, &desks))
    }

    /// Repair broken token/desk links in one conditional commit and return
    /// what was wrong.
    pub async fn reconcile(&self) -> Result<Vec<Violation>> {
        self.with_retries("reconcile", move || async move {
            let tokens = self.store.list_tokens(&TokenQuery::all()).await?;
            let desks = self.store.list_desks(&DeskQuery::all()).await?;
            let plan = audit::plan_repairs(&tokens, &desks);
            if plan.is_empty() {
                return Ok(Vec::new());
            }

            let now = Utc::now();
            let mut batch = WriteBatch::new();
            for mut token in plan.tokens {
                token.updated_at = now;
                batch = batch.put_token(token);
            }
            for mut desk in plan.desks {
                desk.updated_at = now;
                batch = batch.put_desk(desk);
            }
            for token in plan.guard_tokens {
                batch = batch.put_token(token);
            }
            for desk in plan.guard_desks {
                batch = batch.put_desk(desk);
            }
            self.store.commit(batch).await?;

            for violation in &plan.violations {
                tracing::warn!(
                    kind = ?violation.kind,
                    number = violation.number,
                    problem = %violation.problem,
                    "Repaired inconsistent row"
                );
            }
            Ok(plan.violations)
        })
        .await
    }
}
