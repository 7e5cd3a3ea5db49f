//! Error types for the refresh flywheel.

use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum PartitionError {
    #[error("refresh frequency must be at least 1, got {0}")]
    InvalidFrequency(u32),
    #[error("minute of day must be below 1440, got {0}")]
    MinuteOutOfRange(u32),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("{pool} pool is saturated ({capacity} jobs in flight)")]
    Saturated { pool: &'static str, capacity: usize },
    #[error("{pool} pool is shut down")]
    Closed { pool: &'static str },
}

/// Failure while refreshing a single user, tagged with the stage that failed.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("failed to load user-sites for user {user_id}")]
    LoadUserSites {
        user_id: Uuid,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to issue service credential for user {user_id}")]
    IssueCredential {
        user_id: Uuid,
        #[source]
        source: anyhow::Error,
    },
    #[error("bulk refresh of {count} user-sites failed for user {user_id}")]
    Refresh {
        user_id: Uuid,
        count: usize,
        #[source]
        source: anyhow::Error,
    },
}
