//! Domain layer for the Vigil orchestration engine
//!
//! Core models, ports and errors. Nothing in here knows about SQLite,
//! the CLI or the tick driver.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{DomainError, DomainResult};
