/// Span/Log attribute keys for chat streams.
/// Keep these stable; changing them is a breaking change for dashboards.
pub const KEY_CHAT_ID: &str = "chat.id";
pub const KEY_OUTCOME: &str = "stream.outcome";

pub const KEY_CONTENT_DELTAS: &str = "stream.content_deltas";
pub const KEY_REASONING_DELTAS: &str = "stream.reasoning_deltas";
pub const KEY_MALFORMED: &str = "stream.malformed";
pub const KEY_NOTIFICATIONS: &str = "stream.notifications";
pub const KEY_LATENCY_MS: &str = "latency.ms";

/// Error-related (if applicable)
pub const KEY_ERROR_KIND: &str = "error.kind";
pub const KEY_ERROR_MESSAGE: &str = "error.message";
