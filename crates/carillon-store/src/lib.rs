//! # carillon-store
//!
//! In-memory notification state for one recipient.
//!
//! [`NotificationStore`] is the single writer of a dashboard's notification
//! list and unread counter. It de-duplicates by id, replaces optimistic
//! entries once the server record arrives, and merges the REST snapshot
//! with live events regardless of which came first. Nothing is persisted.

pub mod store;

mod error;

pub use error::{Result, StoreError};
pub use store::{IngestOutcome, MarkOutcome, NotificationStore, ReconcileSummary};
