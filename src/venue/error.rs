// =============================================================================
// Venue failure taxonomy
// =============================================================================
//
// Transient failures are retried by the info client / bridge with backoff;
// permanent failures abort the caller's tick. Classification lives with the
// error so retry policy is decided in exactly one place.
// =============================================================================

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VenueError {
    /// Request exceeded the per-call or total retry deadline.
    #[error("venue request timed out")]
    Timeout,

    /// The venue answered with a shape the engine cannot parse.
    #[error("invalid venue response: {0}")]
    InvalidResponse(String),

    /// Signature / agent key rejected.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Venue throttled the request.
    #[error("venue rate limit hit")]
    RateLimited,

    /// Venue rejected the request with an application error.
    #[error("venue error {code}: {msg}")]
    Venue { code: i64, msg: String },

    /// Transport-level failure (connect, TLS, I/O).
    #[error("venue transport error: {0}")]
    Transport(String),
}

impl VenueError {
    /// Whether the retry loop should try again. Invalid and unauthorized
    /// responses are never retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout | Self::RateLimited | Self::Transport(_) => true,
            Self::InvalidResponse(_) | Self::Unauthorized(_) => false,
            // Venue application errors are treated as permanent (bad order,
            // insufficient balance, unknown symbol).
            Self::Venue { .. } => false,
        }
    }
}

pub type VenueResult<T> = Result<T, VenueError>;
