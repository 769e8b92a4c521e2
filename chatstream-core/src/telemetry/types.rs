use serde::{Deserialize, Serialize};

use crate::assembler::AssemblyStats;

/// One structured summary per finished stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct StreamLog {
    /// Conversation the reply belongs to, when the caller supplied one.
    pub chat_id: Option<String>,

    /// Terminal phase: "completed", "cancelled" or "failed".
    pub outcome: Option<String>,

    /// Wall time from request to terminal phase.
    pub latency_ms: Option<u64>,

    pub content_deltas: u32,
    pub reasoning_deltas: u32,
    pub malformed: u32,
    pub notifications: u32,
    pub skipped_frames: u32,

    /// Final buffer sizes in bytes (zero unless completed).
    pub content_len: usize,
    pub reasoning_len: usize,

    pub error_kind: Option<String>,
    pub error_message: Option<String>,
}

impl StreamLog {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn chat_id_opt(mut self, v: Option<&str>) -> Self {
        self.chat_id = v.map(|s| s.to_string());
        self
    }
    pub fn outcome(mut self, v: &str) -> Self {
        self.outcome = Some(v.to_string());
        self
    }
    pub fn latency_ms(mut self, ms: u64) -> Self {
        self.latency_ms = Some(ms);
        self
    }
    pub fn stats(mut self, s: AssemblyStats) -> Self {
        self.content_deltas = s.content_deltas;
        self.reasoning_deltas = s.reasoning_deltas;
        self.malformed = s.malformed;
        self.notifications = s.notifications;
        self.skipped_frames = s.skipped_frames;
        self
    }
    pub fn lengths(mut self, content: usize, reasoning: usize) -> Self {
        self.content_len = content;
        self.reasoning_len = reasoning;
        self
    }
    pub fn error(mut self, kind: &str, message: &str) -> Self {
        self.error_kind = Some(kind.to_string());
        self.error_message = Some(message.to_string());
        self
    }
}
