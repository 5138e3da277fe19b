//! MDP Importer Service Library
//!
//! Consumer side of the market data pipeline: drains the message broker one
//! delivery at a time and persists the carried datasets to the database.
//!
//! # Overview
//!
//! - **Import coordinator**: owns the broker channel (prefetch 1, manual
//!   acknowledgment), deserializes each delivery, resolves its persistence
//!   mapping, and acknowledges or rejects based on the outcome
//! - **Persistence**: stored-procedure execution with the dataset as one
//!   table-valued parameter
//! - **API**: read-only status, dead-letter, and health endpoints
//!
//! No outcome ever requeues a message: a failed delivery is dead-lettered
//! or dropped after an error is recorded, never retried automatically.

pub mod api;
pub mod config;
pub mod import;
pub mod persist;

pub use config::Config;
