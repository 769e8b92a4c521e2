use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One turn of a conversation as the backend stores it.
///
/// History responses name the reasoning field `reasoning_content`; both
/// spellings are accepted, `reasoning_content` wins when both are present,
/// and an empty string reads as absent.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(from = "WireMessage")]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

#[derive(Deserialize)]
struct WireMessage {
    role: Role,
    content: String,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
}

impl From<WireMessage> for Message {
    fn from(w: WireMessage) -> Self {
        let reasoning = w
            .reasoning_content
            .filter(|s| !s.is_empty())
            .or(w.reasoning.filter(|s| !s.is_empty()));
        Self {
            role: w.role,
            content: w.content,
            reasoning,
        }
    }
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            reasoning: None,
        }
    }

    /// Fold an assembled reply into a message; empty reasoning is dropped.
    pub fn assistant(content: impl Into<String>, reasoning: impl Into<String>) -> Self {
        let reasoning = reasoning.into();
        Self {
            role: Role::Assistant,
            content: content.into(),
            reasoning: (!reasoning.is_empty()).then_some(reasoning),
        }
    }
}

/// Body of `POST /chat`.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    #[serde(rename = "chatId", skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
}

/// Caller-visible pair of buffers pushed on every notification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub content: String,
    pub reasoning: String,
}

/// Entry of `GET /chats`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ChatSummary {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    #[serde(rename = "createdAt", default)]
    pub created_at: Option<String>,
    #[serde(rename = "updatedAt", default)]
    pub updated_at: Option<String>,
}

/// Payload of `GET /chats/:id`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ChatHistory {
    #[serde(rename = "_id", default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    pub messages: Vec<Message>,
}

/// The backend wraps every JSON response as `{ "data": ... }`.
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    pub data: T,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_message_accepts_reasoning_content() {
        let json = r#"{"role":"assistant","content":"ok","reasoning_content":"hmm"}"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(msg.role, Role::Assistant);
        assert_eq!(msg.reasoning.as_deref(), Some("hmm"));

        let json = r#"{"role":"assistant","content":"ok","reasoning_content":""}"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(msg.reasoning, None);
    }

    #[test]
    fn both_reasoning_spellings_prefer_reasoning_content() {
        let json = r#"{"role":"assistant","content":"ok","reasoning":"a","reasoning_content":"b"}"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(msg.reasoning.as_deref(), Some("b"));

        let json = r#"{"role":"assistant","content":"ok","reasoning":"a","reasoning_content":""}"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(msg.reasoning.as_deref(), Some("a"));

        let json = r#"{"role":"assistant","content":"ok","reasoning":"a"}"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(msg.reasoning.as_deref(), Some("a"));
    }

    #[test]
    fn user_message_serializes_without_reasoning() {
        let back = serde_json::to_string(&Message::user("hi")).unwrap();
        assert_eq!(back, r#"{"role":"user","content":"hi"}"#);
    }

    #[test]
    fn assistant_constructor_drops_empty_reasoning() {
        assert_eq!(Message::assistant("a", "").reasoning, None);
        assert_eq!(Message::assistant("a", "r").reasoning.as_deref(), Some("r"));
    }

    #[test]
    fn chat_request_uses_camel_case_chat_id() {
        let req = ChatRequest {
            messages: vec![Message::user("hi")],
            chat_id: Some("c1".into()),
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["chatId"], "c1");

        let req = ChatRequest { messages: vec![], chat_id: None };
        let v = serde_json::to_value(&req).unwrap();
        assert!(v.get("chatId").is_none());
    }

    #[test]
    fn summary_reads_mongo_style_ids() {
        let json = r#"{"_id":"abc","title":"First","createdAt":"2024-01-01"}"#;
        let s: ChatSummary = serde_json::from_str(json).unwrap();
        assert_eq!(s.id, "abc");
        assert_eq!(s.updated_at, None);
    }
}
