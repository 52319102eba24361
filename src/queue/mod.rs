pub mod audit;
pub mod desk;
pub mod rules;
pub mod settings;
pub mod token;

pub use desk::{Desk, DeskStatus};
pub use rules::Outcome;
pub use settings::{CounterKind, SystemSettings};
pub use token::{Token, TokenStatus};
