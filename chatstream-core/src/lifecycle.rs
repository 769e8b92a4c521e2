use thiserror::Error;

use crate::error::ChatStreamError;

/// Phase of one `stream_chat` invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamPhase {
    Idle,
    Opening,
    Streaming,
    Completed,
    Cancelled,
    Failed,
}

impl StreamPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Opening => "opening",
            Self::Streaming => "streaming",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("illegal stream transition {from:?} -> {to:?}")]
pub struct IllegalTransition {
    pub from: StreamPhase,
    pub to: StreamPhase,
}

impl From<IllegalTransition> for ChatStreamError {
    fn from(e: IllegalTransition) -> Self {
        ChatStreamError::Other(e.into())
    }
}

/// Enforces `Idle → Opening → Streaming → {Completed, Cancelled, Failed}`.
/// Cancellation and failure are reachable from every non-terminal phase;
/// terminal phases accept nothing.
#[derive(Debug)]
pub struct StreamLifecycle {
    phase: StreamPhase,
}

impl Default for StreamLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamLifecycle {
    pub fn new() -> Self {
        Self {
            phase: StreamPhase::Idle,
        }
    }

    pub fn phase(&self) -> StreamPhase {
        self.phase
    }

    pub fn advance(&mut self, to: StreamPhase) -> Result<(), IllegalTransition> {
        use StreamPhase::*;
        let from = self.phase;
        let ok = match (from, to) {
            (f, _) if f.is_terminal() => false,
            (Idle, Opening) => true,
            (Opening, Streaming) => true,
            (Streaming, Streaming) => true,
            (Streaming, Completed) => true,
            (_, Cancelled | Failed) => true,
            _ => false,
        };
        if !ok {
            return Err(IllegalTransition { from, to });
        }
        if from != to {
            tracing::trace!(from = from.as_str(), to = to.as_str(), "stream phase");
        }
        self.phase = to;
        Ok(())
    }
}
