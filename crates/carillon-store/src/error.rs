use thiserror::Error;

use carillon_shared::types::{NotificationId, UserId};

/// Errors produced by the store layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Optimistic entries must carry a client-assigned id.
    #[error("Notification {0} is not an optimistic entry")]
    NotOptimistic(NotificationId),

    /// An entry with this id is already present.
    #[error("Notification {0} already exists")]
    DuplicateId(NotificationId),

    /// The store only holds notifications of its owner.
    #[error("Notification for user {target} cannot be stored for user {owner}")]
    WrongOwner { owner: UserId, target: UserId },
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
