use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeskStatus {
    Free,
    Occupied,
    Maintenance,
}

impl std::fmt::Display for DeskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeskStatus::Free => write!(f, "free"),
            DeskStatus::Occupied => write!(f, "occupied"),
            DeskStatus::Maintenance => write!(f, "maintenance"),
        }
    }
}

impl FromStr for DeskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(DeskStatus::Free),
            "occupied" => Ok(DeskStatus::Occupied),
            "maintenance" => Ok(DeskStatus::Maintenance),
            other => Err(format!("unknown desk status '{}'", other)),
        }
    }
}

/// A service point staffed by an operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Desk {
    pub id: Uuid,
    pub desk_number: u64,
    pub name: String,
    pub operator_name: String,
    pub status: DeskStatus,
    pub assigned_token_id: Option<Uuid>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub total_tokens_served: u64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl Desk {
    pub fn new(desk_number: u64, name: String, operator_name: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            desk_number,
            name,
            operator_name,
            status: DeskStatus::Free,
            assigned_token_id: None,
            assigned_at: None,
            total_tokens_served: 0,
            is_active: true,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// Whether the assignment rule may hand this desk a token.
    pub fn is_available(&self) -> bool {
        self.is_active && self.status == DeskStatus::Free
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_desk_is_free_and_active() {
        let desk = Desk::new(1, "Desk 1".to_string(), "Grace".to_string());
        assert_eq!(desk.status, DeskStatus::Free);
        assert!(desk.is_active);
        assert!(desk.is_available());
        assert_eq!(desk.total_tokens_served, 0);
    }

    #[test]
    fn inactive_or_busy_desk_is_unavailable() {
        let mut desk = Desk::new(1, "Desk 1".to_string(), String::new());
        desk.is_active = false;
        assert!(!desk.is_available());

        desk.is_active = true;
        desk.status = DeskStatus::Maintenance;
        assert!(!desk.is_available());
    }

    #[test]
    fn status_round_trips_through_str() {
        assert_eq!("MAINTENANCE".parse::<DeskStatus>().unwrap(), DeskStatus::Maintenance);
        assert_eq!(DeskStatus::Occupied.to_string(), "occupied");
        assert!("busy".parse::<DeskStatus>().is_err());
    }
}
