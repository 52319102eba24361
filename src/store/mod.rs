//! Persistence seam.
//!
//! The queue never keeps rows of its own; every read and write goes through a
//! [`Store`]. Multi-row transitions are expressed as a [`WriteBatch`] of
//! conditional writes so the store can apply them all-or-nothing.
//!
//! # Concurrency contract
//!
//! - [`Store::next_number`] is an atomic increment-and-fetch.
//! - [`Store::commit`] checks the expected `version` of every row in the batch
//!   and applies nothing if any of them moved on, returning
//!   [`QueueError::Conflict`](crate::error::QueueError::Conflict).
//! - Applied rows are stored with `version + 1`.

pub mod memory;

use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use crate::error::Result;
use crate::queue::{CounterKind, Desk, DeskStatus, SystemSettings, Token, TokenStatus};

pub use memory::MemoryStore;

/// Filter for [`Store::list_tokens`]. Results are in FIFO order.
#[derive(Debug, Clone, Default)]
pub struct TokenQuery {
    /// Empty means every status
    pub statuses: Vec<TokenStatus>,
    pub token_number: Option<u64>,
    /// Only tokens created on this UTC day
    pub created_on: Option<NaiveDate>,
    pub limit: Option<usize>,
}

impl TokenQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_status(status: TokenStatus) -> Self {
        Self {
            statuses: vec![status],
            ..Self::default()
        }
    }

    pub fn waiting() -> Self {
        Self::with_status(TokenStatus::Waiting)
    }

    pub fn by_number(token_number: u64) -> Self {
        Self {
            token_number: Some(token_number),
            ..Self::default()
        }
    }

    pub fn created_on(mut self, day: NaiveDate) -> Self {
        self.created_on = Some(day);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, token: &Token) -> bool {
        (self.statuses.is_empty() || self.statuses.contains(&token.status))
            && self.token_number.map_or(true, |n| token.token_number == n)
            && self
                .created_on
                .map_or(true, |day| token.created_at.date_naive() == day)
    }
}

/// Filter for [`Store::list_desks`]. Results are ordered by desk number.
#[derive(Debug, Clone, Default)]
pub struct DeskQuery {
    pub statuses: Vec<DeskStatus>,
    pub desk_number: Option<u64>,
    pub active_only: bool,
    pub limit: Option<usize>,
}

impl DeskQuery {
    pub fn all() -> Self {
        Self::default()
    }

    /// Desks the assignment rule may use.
    pub fn available() -> Self {
        Self {
            statuses: vec![DeskStatus::Free],
            active_only: true,
            ..Self::default()
        }
    }

    pub fn by_number(desk_number: u64) -> Self {
        Self {
            desk_number: Some(desk_number),
            ..Self::default()
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, desk: &Desk) -> bool {
        (self.statuses.is_empty() || self.statuses.contains(&desk.status))
            && self.desk_number.map_or(true, |n| desk.desk_number == n)
            && (!self.active_only || desk.is_active)
    }
}

/// One conditional write. The row's own `version` is the expected current version.
#[derive(Debug, Clone)]
pub enum Write {
    PutToken(Token),
    PutDesk(Desk),
    DeleteToken { id: Uuid, expected_version: u64 },
}

/// Writes applied all-or-nothing by [`Store::commit`].
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    writes: Vec<Write>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_token(mut self, token: Token) -> Self {
        self.writes.push(Write::PutToken(token));
        self
    }

    pub fn put_desk(mut self, desk: Desk) -> Self {
        self.writes.push(Write::PutDesk(desk));
        self
    }

    pub fn delete_token(mut self, token: &Token) -> Self {
        self.writes.push(Write::DeleteToken {
            id: token.id,
            expected_version: token.version,
        });
        self
    }

    pub fn writes(&self) -> &[Write] {
        &self.writes
    }

    pub fn into_writes(self) -> Vec<Write> {
        self.writes
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Atomically increment a counter and return the new value.
    async fn next_number(&self, counter: CounterKind) -> Result<u64>;

    async fn insert_token(&self, token: Token) -> Result<Token>;

    async fn insert_desk(&self, desk: Desk) -> Result<Desk>;

    async fn get_token(&self, id: Uuid) -> Result<Option<Token>>;

    async fn get_desk(&self, id: Uuid) -> Result<Option<Desk>>;

    async fn list_tokens(&self, query: &TokenQuery) -> Result<Vec<Token>>;

    async fn list_desks(&self, query: &DeskQuery) -> Result<Vec<Desk>>;

    async fn settings(&self) -> Result<SystemSettings>;

    async fn put_settings(&self, settings: SystemSettings) -> Result<SystemSettings>;

    /// Apply every write in `batch` or none of them.
    async fn commit(&self, batch: WriteBatch) -> Result<()>;
}
