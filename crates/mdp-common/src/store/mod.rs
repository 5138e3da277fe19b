//! Latest-state stores
//!
//! Three variants of the same pattern: an append-only intake queue drained
//! by one dedicated monitor task that folds records into a latest-wins map.
//! Producers only touch the intake channel; the monitor task is the single
//! writer performing upserts on the map; readers take snapshots.
//!
//! - [`LatestStateStore`] — the generic store
//! - [`StatusStore`] — keyed by service procedure, with severity filters
//! - [`DeadLetterStore`] — keyed by a content hash, with operator delete

mod dead_letter;
mod latest_state;
mod status;

pub use dead_letter::{
    ContentAddressed, DeadLetterStore, UnprocessableMessage, UnprocessableMessageStore,
    UnroutableMessage, UnroutableMessageStore,
};
pub use latest_state::{LatestRecord, LatestStateStore, MonitorState};
pub use status::StatusStore;
