//! MDP Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the MDP project.
//!
//! # Overview
//!
//! This crate provides the functionality shared between the scraper (producer)
//! and importer (consumer) services:
//!
//! - **Error Handling**: the pipeline error taxonomy and result alias
//! - **Types**: service/procedure identity, statuses, the wire envelope, and
//!   the generic tabular dataset carried between the two services
//! - **Stores**: the single-writer latest-state stores used for operation
//!   status and dead-letter aggregation
//! - **Shutdown**: the process-wide shutdown signal observed by every loop
//! - **Configuration**: broker and database settings shared by both services
//!
//! # Example
//!
//! ```no_run
//! use mdp_common::shutdown;
//! use mdp_common::store::StatusStore;
//! use mdp_common::types::{ServiceProcedure, Status};
//!
//! let (controller, signal) = shutdown::channel();
//! let statuses = StatusStore::new("scrape status", signal);
//! statuses.start_monitor();
//! statuses.push(
//!     ServiceProcedure::new("TickerDirectoryScrapeService", "scrape_listed"),
//!     Status::Information,
//!     "scraping data",
//! );
//! controller.trigger();
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod hash;
pub mod logging;
pub mod shutdown;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use error::{PipelineError, Result};
