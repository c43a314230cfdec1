use std::time::Duration;

use thiserror::Error;

/// Failure taxonomy for the transport's forward/reply primitives.
///
/// `RateLimited` is the only variant the dispatcher retries; everything else
/// is logged and dropped for that (message, subscriber) pair.
#[derive(Error, Debug)]
pub enum ForwardError {
    /// Provider throttling with a mandatory wait before the next attempt.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// Permanent refusal: destination blocked the sender, left, or revoked
    /// write permission.
    #[error("delivery rejected: {0}")]
    Rejected(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ForwardError {
    /// Short tag for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            ForwardError::RateLimited { .. } => "rate_limited",
            ForwardError::Rejected(_) => "rejected",
            ForwardError::Other(_) => "error",
        }
    }
}
