use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStatus {
    Waiting,
    Assigned,
    Completed,
    Paid,
    Cancelled,
}

impl TokenStatus {
    pub const ALL: [TokenStatus; 5] = [
        TokenStatus::Waiting,
        TokenStatus::Assigned,
        TokenStatus::Completed,
        TokenStatus::Paid,
        TokenStatus::Cancelled,
    ];

    /// Paid and cancelled tokens never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TokenStatus::Paid | TokenStatus::Cancelled)
    }
}

impl std::fmt::Display for TokenStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenStatus::Waiting => write!(f, "waiting"),
            TokenStatus::Assigned => write!(f, "assigned"),
            TokenStatus::Completed => write!(f, "completed"),
            TokenStatus::Paid => write!(f, "paid"),
            TokenStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FromStr for TokenStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "waiting" => Ok(TokenStatus::Waiting),
            "assigned" => Ok(TokenStatus::Assigned),
            "completed" => Ok(TokenStatus::Completed),
            "paid" => Ok(TokenStatus::Paid),
            "cancelled" | "canceled" => Ok(TokenStatus::Cancelled),
            other => Err(format!("unknown token status '{}'", other)),
        }
    }
}

/// A customer's place in line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub id: Uuid,
    pub token_number: u64,
    pub name: String,
    pub status: TokenStatus,
    /// Set only while the token is being served
    pub assigned_desk_id: Option<Uuid>,
    /// Desk that finished serving the token, kept for history
    pub served_by_desk_id: Option<Uuid>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub fee_cents: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl Token {
    pub fn new(token_number: u64, name: String) -> Self {
        Self::with_created_at(token_number, name, Utc::now())
    }

    pub fn with_created_at(token_number: u64, name: String, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            token_number,
            name,
            status: TokenStatus::Waiting,
            assigned_desk_id: None,
            served_by_desk_id: None,
            assigned_at: None,
            completed_at: None,
            paid_at: None,
            fee_cents: None,
            created_at,
            updated_at: created_at,
            version: 0,
        }
    }

    /// FIFO order: creation time, then number for tokens created in the same instant.
    pub fn queue_key(&self) -> (DateTime<Utc>, u64) {
        (self.created_at, self.token_number)
    }
}
