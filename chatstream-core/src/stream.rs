//! Events produced by classifying one record of a chat response stream.
//!
//! Contract:
//! - A backend emits 0..n `ContentDelta` / `ReasoningDelta` events, interleaved
//!   in any order, optionally followed by a `Terminator`.
//! - An event carries at most one delta; there is no event with both channels.
//! - `Malformed` is never fatal: it is logged and skipped by the assembler.

/// One classified record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Incremental answer text.
    ContentDelta { text: String },
    /// Incremental reasoning ("thinking") text.
    ReasoningDelta { text: String },
    /// Explicit end-of-stream marker, distinct from the connection closing.
    Terminator,
    /// A record that could not be understood. `reason` is for diagnostics only.
    Malformed { raw: String, reason: String },
}

/// Which buffer a delta belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Content,
    Reasoning,
}

impl StreamEvent {
    /// Returns true if this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminator)
    }

    /// Convenience accessor for either delta kind.
    pub fn as_delta(&self) -> Option<(Channel, &str)> {
        match self {
            Self::ContentDelta { text } => Some((Channel::Content, text.as_str())),
            Self::ReasoningDelta { text } => Some((Channel::Reasoning, text.as_str())),
            _ => None,
        }
    }
}
