use serde::Deserialize;

use crate::stream::StreamEvent;

/// Prefix the backend puts in front of every JSON record.
pub const DATA_PREFIX: &str = "data:";
/// End-of-stream sentinel.
pub const TERMINATOR: &str = "[DONE]";

/// Wire shape of one record: `{ type, content?, reasoning? }`.
#[derive(Deserialize)]
struct WireRecord {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
}

/// Strip the `data:` prefix (and the single space after it) and trim.
pub fn strip_prefix(line: &str) -> &str {
    let t = line.trim();
    match t.strip_prefix(DATA_PREFIX) {
        Some(rest) => rest.trim(),
        None => t,
    }
}

/// Classify one raw line. Never fails; unusable input becomes `Malformed`.
pub fn classify_line(line: &str) -> StreamEvent {
    let payload = strip_prefix(line);
    if payload == TERMINATOR {
        return StreamEvent::Terminator;
    }

    let rec = match serde_json::from_str::<WireRecord>(payload) {
        Ok(rec) => rec,
        Err(e) => {
            tracing::warn!(raw = %line, error = %e, "dropping unparseable stream record");
            return malformed(line, format!("invalid json: {e}"));
        }
    };

    match rec.kind.as_str() {
        "content" => match rec.content {
            Some(text) if !text.is_empty() => StreamEvent::ContentDelta { text },
            _ => empty_payload(line, "content"),
        },
        "reasoning" => match rec.reasoning {
            Some(text) if !text.is_empty() => StreamEvent::ReasoningDelta { text },
            _ => empty_payload(line, "reasoning"),
        },
        other => {
            tracing::warn!(raw = %line, kind = other, "dropping record of unknown type");
            malformed(line, format!("unknown record type '{other}'"))
        }
    }
}

fn empty_payload(line: &str, kind: &str) -> StreamEvent {
    tracing::warn!(raw = %line, kind, "dropping record without payload");
    malformed(line, format!("{kind} record without payload"))
}

fn malformed(raw: &str, reason: String) -> StreamEvent {
    StreamEvent::Malformed {
        raw: raw.to_string(),
        reason,
    }
}
