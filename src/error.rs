//! Errors shared by the message, thread and expiration services.

use crate::scheduler::SchedulerError;
use crate::store::StoreError;

/// Errors returned by service operations.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The entity does not exist or belongs to another user.
    #[error("cannot find {entity} with ID [{id}]")]
    NotFound {
        /// Kind of entity looked up.
        entity: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// A repository read or write failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A task could not be enqueued.
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    /// An event envelope could not be built.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ServiceError {
    /// Returns `true` for [`ServiceError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
