pub mod background;
pub mod client;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod queue;
pub mod server;
pub mod service;
pub mod shutdown;
pub mod store;

pub use error::{QueueError, Result};
