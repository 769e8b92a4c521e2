use crate::error::{ChatStreamError, CoreResult};
use crate::model::{Message, Role};
use unicode_normalization::UnicodeNormalization;

fn clean_text(s: &str) -> String {
    // Unicode NFC normalization + BOM strip + CRLF -> LF + trim
    let mut t = s.nfc().collect::<String>();
    if t.starts_with('\u{FEFF}') {
        t.remove(0);
    }
    if t.contains("\r\n") {
        t = t.replace("\r\n", "\n");
    }
    t.trim().to_string()
}

/// Clean the outgoing history and check it ends with something to answer.
pub fn normalize_messages(mut messages: Vec<Message>) -> CoreResult<Vec<Message>> {
    for msg in &mut messages {
        msg.content = clean_text(&msg.content);
        if let Some(r) = msg.reasoning.take() {
            let r = clean_text(&r);
            msg.reasoning = (!r.is_empty()).then_some(r);
        }
    }
    match messages.last() {
        None => Err(ChatStreamError::Validation("no messages to send".into())),
        Some(last) if last.role != Role::User => Err(ChatStreamError::Validation(
            "last message must come from the user".into(),
        )),
        Some(last) if last.content.is_empty() => {
            Err(ChatStreamError::Validation("message is empty".into()))
        }
        Some(_) => Ok(messages),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_and_normalizes_content() {
        let out = normalize_messages(vec![Message::user("\u{FEFF}  e\u{301}\r\nnext  ")]).unwrap();
        assert_eq!(out[0].content, "é\nnext");
    }

    #[test]
    fn keeps_history_order_and_cleans_reasoning() {
        let out = normalize_messages(vec![
            Message::user("q1"),
            Message::assistant("a1 ", "  "),
            Message::user("q2"),
        ])
        .unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[1].content, "a1");
        assert_eq!(out[1].reasoning, None);
        assert_eq!(out[2].content, "q2");
    }

    #[test]
    fn rejects_empty_history() {
        let err = normalize_messages(vec![]).unwrap_err();
        assert!(matches!(err, ChatStreamError::Validation(_)));
    }

    #[test]
    fn rejects_blank_last_user_message() {
        let err = normalize_messages(vec![Message::user(" \r\n ")]).unwrap_err();
        assert!(matches!(err, ChatStreamError::Validation(m) if m == "message is empty"));
    }

    #[test]
    fn rejects_trailing_assistant_message() {
        let history = vec![Message::user("q"), Message::assistant("a", "")];
        let err = normalize_messages(history).unwrap_err();
        assert!(matches!(err, ChatStreamError::Validation(_)));
    }
}
