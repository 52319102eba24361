//! Token and desk state machine.
//!
//! Every function here is pure: it checks the current rows, and returns the
//! rows as they must look afterwards. Versions are left untouched so that the
//! returned rows double as the expected prior state of a conditional commit.
//!
//! ```text
//! token:  waiting ──assign──▶ assigned ──complete──▶ completed ──pay──▶ paid
//!            │                   │
//!            └──────cancel───────┴──▶ cancelled
//!
//! desk:   free ◀──complete/cancel── occupied ◀──assign── free
//!         free ◀──────────────────▶ maintenance
//! ```

use chrono::{DateTime, Utc};

use crate::error::{QueueError, Result};
use crate::queue::desk::{Desk, DeskStatus};
use crate::queue::token::{Token, TokenStatus};

/// Result of a transition that is allowed to be repeated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    /// The rows changed
    Applied(T),
    /// The target state already held; nothing to write
    Unchanged(T),
}

impl<T> Outcome<T> {
    pub fn into_inner(self) -> T {
        match self {
            Outcome::Applied(v) | Outcome::Unchanged(v) => v,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, Outcome::Applied(_))
    }
}

/// Pick the oldest waiting token and the lowest-numbered available desk.
///
/// `waiting` and `desks` may be in any order and may contain rows that are
/// not eligible; they are filtered here.
pub fn pick_next<'a>(waiting: &'a [Token], desks: &'a [Desk]) -> Option<(&'a Token, &'a Desk)> {
    let desk = desks
        .iter()
        .filter(|d| d.is_available())
        .min_by_key(|d| d.desk_number)?;
    let token = waiting
        .iter()
        .filter(|t| t.status == TokenStatus::Waiting)
        .min_by_key(|t| t.queue_key())?;
    Some((token, desk))
}

pub fn assign(token: &Token, desk: &Desk, now: DateTime<Utc>) -> Result<(Token, Desk)> {
    if token.status != TokenStatus::Waiting {
        return Err(QueueError::InvalidTransition(format!(
            "token {} is {}, only waiting tokens can be assigned",
            token.token_number, token.status
        )));
    }
    if desk.status != DeskStatus::Free {
        return Err(QueueError::InvalidTransition(format!(
            "desk {} is {}",
            desk.desk_number, desk.status
        )));
    }
    if !desk.is_active {
        return Err(QueueError::InvalidTransition(format!(
            "desk {} is inactive",
            desk.desk_number
        )));
    }

    let mut token = token.clone();
    token.status = TokenStatus::Assigned;
    token.assigned_desk_id = Some(desk.id);
    token.assigned_at = Some(now);
    token.updated_at = now;

    let mut desk = desk.clone();
    desk.status = DeskStatus::Occupied;
    desk.assigned_token_id = Some(token.id);
    desk.assigned_at = Some(now);
    desk.updated_at = now;

    Ok((token, desk))
}

/// Finish serving `token` at `desk`. Both sides must reference each other.
pub fn complete(token: &Token, desk: &Desk, now: DateTime<Utc>) -> Result<(Token, Desk)> {
    if token.status != TokenStatus::Assigned {
        return Err(QueueError::InvalidTransition(format!(
            "token {} is {}, only assigned tokens can be completed",
            token.token_number, token.status
        )));
    }
    if token.assigned_desk_id != Some(desk.id)
        || desk.status != DeskStatus::Occupied
        || desk.assigned_token_id != Some(token.id)
    {
        return Err(QueueError::InvalidTransition(format!(
            "desk {} is not serving token {}",
            desk.desk_number, token.token_number
        )));
    }

    let mut token = token.clone();
    token.status = TokenStatus::Completed;
    token.served_by_desk_id = token.assigned_desk_id.take();
    token.completed_at = Some(now);
    token.updated_at = now;

    let mut desk = desk.clone();
    desk.status = DeskStatus::Free;
    desk.assigned_token_id = None;
    desk.assigned_at = None;
    desk.total_tokens_served += 1;
    desk.updated_at = now;

    Ok((token, desk))
}

pub fn pay(token: &Token, fee_cents: Option<u64>, now: DateTime<Utc>) -> Result<Outcome<Token>> {
    match token.status {
        TokenStatus::Paid => Ok(Outcome::Unchanged(token.clone())),
        TokenStatus::Completed => {
            let mut token = token.clone();
            token.status = TokenStatus::Paid;
            token.paid_at = Some(now);
            token.fee_cents = fee_cents;
            token.updated_at = now;
            Ok(Outcome::Applied(token))
        }
        other => Err(QueueError::InvalidTransition(format!(
            "token {} is {}, only completed tokens can be paid",
            token.token_number, other
        ))),
    }
}

/// Cancel a token. An assigned token releases its desk; the desk's served
/// count is not touched. `desk` is only freed if it actually holds the token.
pub fn cancel(
    token: &Token,
    desk: Option<&Desk>,
    now: DateTime<Utc>,
) -> Result<Outcome<(Token, Option<Desk>)>> {
    match token.status {
        TokenStatus::Cancelled => Ok(Outcome::Unchanged((token.clone(), None))),
        TokenStatus::Waiting | TokenStatus::Assigned => {
            let mut cancelled = token.clone();
            cancelled.status = TokenStatus::Cancelled;
            cancelled.assigned_desk_id = None;
            cancelled.updated_at = now;

            let freed = desk
                .filter(|d| d.assigned_token_id == Some(token.id))
                .map(|d| {
                    let mut d = d.clone();
                    d.status = DeskStatus::Free;
                    d.assigned_token_id = None;
                    d.assigned_at = None;
                    d.updated_at = now;
                    d
                });
            Ok(Outcome::Applied((cancelled, freed)))
        }
        other => Err(QueueError::InvalidTransition(format!(
            "token {} is {} and can no longer be cancelled",
            token.token_number, other
        ))),
    }
}

/// Move a desk between `free` and `maintenance`.
pub fn set_desk_status(desk: &Desk, target: DeskStatus, now: DateTime<Utc>) -> Result<Outcome<Desk>> {
    if target == DeskStatus::Occupied {
        return Err(QueueError::Validation(
            "desks become occupied only through assignment".to_string(),
        ));
    }
    if desk.status == target {
        return Ok(Outcome::Unchanged(desk.clone()));
    }
    if desk.status == DeskStatus::Occupied {
        return Err(QueueError::InvalidTransition(format!(
            "desk {} is serving a token",
            desk.desk_number
        )));
    }

    let mut desk = desk.clone();
    desk.status = target;
    desk.updated_at = now;
    Ok(Outcome::Applied(desk))
}
