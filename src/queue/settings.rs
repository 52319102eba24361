use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Single-row global switches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemSettings {
    pub auto_assign_enabled: bool,
    pub updated_at: DateTime<Utc>,
}

impl Default for SystemSettings {
    fn default() -> Self {
        Self {
            auto_assign_enabled: false,
            updated_at: Utc::now(),
        }
    }
}

/// Which sequence a number is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CounterKind {
    Token,
    Desk,
}
