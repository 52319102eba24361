//! Consistency checks between tokens and desks.
//!
//! A token is `assigned` exactly when it names a desk, a desk is `occupied`
//! exactly when it names a token, and the two names must point at each
//! other. Rows written by older deployments (two independent updates with
//! no transaction) can break this; [`plan_repairs`] computes the rows that
//! restore it.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::queue::desk::{Desk, DeskStatus};
use crate::queue::token::{Token, TokenStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Token,
    Desk,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub kind: EntityKind,
    pub id: Uuid,
    pub number: u64,
    pub problem: String,
}

impl Violation {
    fn token(token: &Token, problem: impl Into<String>) -> Self {
        Self {
            kind: EntityKind::Token,
            id: token.id,
            number: token.token_number,
            problem: problem.into(),
        }
    }

    fn desk(desk: &Desk, problem: impl Into<String>) -> Self {
        Self {
            kind: EntityKind::Desk,
            id: desk.id,
            number: desk.desk_number,
            problem: problem.into(),
        }
    }
}

/// Rows to write back, plus what was wrong with them.
#[derive(Debug, Default)]
pub struct RepairPlan {
    pub tokens: Vec<Token>,
    pub desks: Vec<Desk>,
    /// Counterpart rows written back unchanged so the commit fails if they
    /// moved since they were read
    pub guard_tokens: Vec<Token>,
    pub guard_desks: Vec<Desk>,
    pub violations: Vec<Violation>,
}

impl RepairPlan {
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty() && self.desks.is_empty()
    }
}

fn desk_problem(desk: &Desk, tokens: &HashMap<Uuid, &Token>) -> Option<String> {
    match (desk.status, desk.assigned_token_id) {
        (DeskStatus::Occupied, None) => Some("occupied without a token".to_string()),
        (DeskStatus::Occupied, Some(token_id)) => match tokens.get(&token_id) {
            None => Some(format!("occupied by missing token {}", token_id)),
            Some(t) if t.status != TokenStatus::Assigned => Some(format!(
                "occupied by token {} which is {}",
                t.token_number, t.status
            )),
            Some(t) if t.assigned_desk_id != Some(desk.id) => Some(format!(
                "occupied by token {} which is assigned elsewhere",
                t.token_number
            )),
            Some(_) => None,
        },
        (status, Some(_)) => Some(format!("{} but still holds a token", status)),
        (_, None) => None,
    }
}

fn token_problem(token: &Token, desks: &HashMap<Uuid, &Desk>) -> Option<String> {
    match (token.status, token.assigned_desk_id) {
        (TokenStatus::Assigned, None) => Some("assigned without a desk".to_string()),
        (TokenStatus::Assigned, Some(desk_id)) => match desks.get(&desk_id) {
            None => Some(format!("assigned to missing desk {}", desk_id)),
            Some(d) if d.assigned_token_id != Some(token.id) || d.status != DeskStatus::Occupied => {
                Some(format!(
                    "assigned to desk {} which does not hold it",
                    d.desk_number
                ))
            }
            Some(_) => None,
        },
        (status, Some(_)) => Some(format!("{} but still names a desk", status)),
        (_, None) => None,
    }
}

/// Every broken invariant, including duplicate numbers (which are reported
/// but never repaired).
pub fn find_violations(tokens: &[Token], desks: &[Desk]) -> Vec<Violation> {
    let token_map: HashMap<Uuid, &Token> = tokens.iter().map(|t| (t.id, t)).collect();
    let desk_map: HashMap<Uuid, &Desk> = desks.iter().map(|d| (d.id, d)).collect();

    let mut violations: Vec<Violation> = desks
        .iter()
        .filter_map(|d| desk_problem(d, &token_map).map(|p| Violation::desk(d, p)))
        .collect();
    violations.extend(
        tokens
            .iter()
            .filter_map(|t| token_problem(t, &desk_map).map(|p| Violation::token(t, p))),
    );

    let mut seen = HashSet::new();
    for token in tokens {
        if !seen.insert(token.token_number) {
            violations.push(Violation::token(token, "duplicate token number"));
        }
    }
    let mut seen = HashSet::new();
    for desk in desks {
        if !seen.insert(desk.desk_number) {
            violations.push(Violation::desk(desk, "duplicate desk number"));
        }
    }

    violations
}

/// Free desks that do not hold a matching token and return orphaned tokens
/// to the queue. A served count is never changed.
pub fn plan_repairs(tokens: &[Token], desks: &[Desk]) -> RepairPlan {
    let token_map: HashMap<Uuid, &Token> = tokens.iter().map(|t| (t.id, t)).collect();
    let desk_map: HashMap<Uuid, &Desk> = desks.iter().map(|d| (d.id, d)).collect();
    let mut plan = RepairPlan::default();

    for desk in desks {
        if let Some(problem) = desk_problem(desk, &token_map) {
            plan.violations.push(Violation::desk(desk, problem));
            let mut fixed = (*desk).clone();
            if fixed.status == DeskStatus::Occupied {
                fixed.status = DeskStatus::Free;
            }
            fixed.assigned_token_id = None;
            fixed.assigned_at = None;
            plan.desks.push(fixed);
        }
    }

    for token in tokens {
        if let Some(problem) = token_problem(token, &desk_map) {
            plan.violations.push(Violation::token(token, problem));
            let mut fixed = (*token).clone();
            if fixed.status == TokenStatus::Assigned {
                fixed.status = TokenStatus::Waiting;
                fixed.assigned_at = None;
            }
            fixed.assigned_desk_id = None;
            plan.tokens.push(fixed);
        }
    }

    let repaired_tokens: HashSet<Uuid> = plan.tokens.iter().map(|t| t.id).collect();
    let repaired_desks: HashSet<Uuid> = plan.desks.iter().map(|d| d.id).collect();
    let mut guarded_tokens = HashSet::new();
    let mut guarded_desks = HashSet::new();

    for desk in desks.iter().filter(|d| repaired_desks.contains(&d.id)) {
        if let Some(token) = desk.assigned_token_id.and_then(|id| token_map.get(&id)) {
            if !repaired_tokens.contains(&token.id) && guarded_tokens.insert(token.id) {
                plan.guard_tokens.push((*token).clone());
            }
        }
    }
    for token in tokens.iter().filter(|t| repaired_tokens.contains(&t.id)) {
        if let Some(desk) = token.assigned_desk_id.and_then(|id| desk_map.get(&id)) {
            if !repaired_desks.contains(&desk.id) && guarded_desks.insert(desk.id) {
                plan.guard_desks.push((*desk).clone());
            }
        }
    }

    plan
}
