use thiserror::Error;

/// Core error type for chatstream.
/// Internally, modules can use `anyhow::Result<T>` for convenience,
/// but public boundaries should expose `CoreResult<T>` with this error.
///
/// Cancellation is deliberately absent: a cancelled stream resolves to
/// `ChatOutcome::Cancelled`, never to an error.
#[derive(Debug, Error)]
pub enum ChatStreamError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("rate limited by backend")]
    RateLimited { retry_after: Option<u64> },

    #[error("backend unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("backend returned {code}: {message}")]
    Status { code: u16, message: String },

    #[error("decode error: {0}")]
    Decode(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Coarse classification a caller can branch on when choosing what to show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Connection failure or 5xx; retrying later may help.
    Network,
    RateLimited,
    /// Non-success status other than 429/5xx.
    Rejected,
    Decode,
    Validation,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::RateLimited => "rate_limited",
            Self::Rejected => "rejected",
            Self::Decode => "decode",
            Self::Validation => "validation",
            Self::Internal => "internal",
        }
    }

    /// Whether the same request may succeed if sent again unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network | Self::RateLimited)
    }
}

impl ChatStreamError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::Unavailable { .. } => ErrorKind::Network,
            Self::Status { .. } => ErrorKind::Rejected,
            Self::Decode(_) => ErrorKind::Decode,
            Self::Io(_) | Self::Other(_) => ErrorKind::Internal,
        }
    }
}

pub type CoreResult<T> = std::result::Result<T, ChatStreamError>;
