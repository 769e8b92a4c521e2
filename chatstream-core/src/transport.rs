//! Byte stream → text → records.
//!
//! The reader owns the response body for one invocation. Decoding keeps the
//! bytes of a character that straddles two chunks until the rest arrives, and
//! splitting keeps the unterminated last line (`pending_tail`) until the next
//! chunk, so the records produced do not depend on how the body was chunked.

use std::collections::VecDeque;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::classifier::TERMINATOR;
use crate::error::CoreResult;
use crate::model::ChatRequest;

/// Response body as delivered by a transport.
pub type ByteStream = Pin<Box<dyn Stream<Item = CoreResult<Bytes>> + Send>>;

/// Opens the long-lived response body for a chat request.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Issue the request and return once headers are in. Non-success
    /// statuses must be reported here, not as a body error.
    async fn open_stream(&self, req: &ChatRequest) -> CoreResult<ByteStream>;
}

/// Incremental UTF-8 decoder. Invalid sequences become U+FFFD; an incomplete
/// sequence at the end of a chunk is carried over to the next one.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    carry: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, chunk: &[u8]) -> String {
        let mut bytes = std::mem::take(&mut self.carry);
        bytes.extend_from_slice(chunk);

        let mut out = String::with_capacity(bytes.len());
        let mut rest = bytes.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(s) => {
                    out.push_str(s);
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&rest[..valid]));
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &rest[valid + bad..];
                        }
                        None => {
                            self.carry = rest[valid..].to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Flush whatever is still carried once the body has ended.
    pub fn finish(&mut self) -> String {
        let carry = std::mem::take(&mut self.carry);
        String::from_utf8_lossy(&carry).into_owned()
    }
}

/// Splits decoded text into records on `\n`.
#[derive(Debug, Default)]
pub struct RecordSplitter {
    pending_tail: String,
}

impl RecordSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append text and return the complete records it finished, in order.
    pub fn push(&mut self, text: &str) -> Vec<String> {
        self.pending_tail.push_str(text);
        let Some(last_nl) = self.pending_tail.rfind('\n') else {
            return Vec::new();
        };
        let complete: String = self.pending_tail.drain(..=last_nl).collect();
        complete.split('\n').filter_map(keep_record).collect()
    }

    /// Emit the unterminated tail, if it is a usable record.
    pub fn finish(&mut self) -> Option<String> {
        let tail = std::mem::take(&mut self.pending_tail);
        keep_record(&tail)
    }

    pub fn has_pending(&self) -> bool {
        !self.pending_tail.is_empty()
    }
}

fn keep_record(line: &str) -> Option<String> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.contains(TERMINATOR) {
        tracing::debug!("terminator record received");
        return None;
    }
    Some(line.to_string())
}

/// Result of one suspension on the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Text(String),
    Done,
    Cancelled,
}

/// Result of asking the reader for the next record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Line(String),
    End,
    Cancelled,
}

/// Turns one response body into a lazy, finite sequence of raw records.
pub struct StreamTransportReader {
    inner: ByteStream,
    decoder: Utf8Decoder,
    splitter: RecordSplitter,
    ready: VecDeque<String>,
    cancel: CancellationToken,
    body_done: bool,
    drained: bool,
}

impl StreamTransportReader {
    pub fn new(inner: ByteStream, cancel: CancellationToken) -> Self {
        Self {
            inner,
            decoder: Utf8Decoder::new(),
            splitter: RecordSplitter::new(),
            ready: VecDeque::new(),
            cancel,
            body_done: false,
            drained: false,
        }
    }

    /// Suspend until more bytes arrive, the body ends, or the token fires.
    ///
    /// Cancel-safe: dropping the returned future loses no data.
    pub async fn next_chunk(&mut self) -> CoreResult<ReadOutcome> {
        if self.body_done {
            return Ok(ReadOutcome::Done);
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Ok(ReadOutcome::Cancelled),
            item = self.inner.next() => match item {
                Some(Ok(bytes)) => Ok(ReadOutcome::Text(self.decoder.decode(&bytes))),
                Some(Err(e)) => {
                    self.body_done = true;
                    Err(e)
                }
                None => {
                    self.body_done = true;
                    let tail = self.decoder.finish();
                    if tail.is_empty() {
                        Ok(ReadOutcome::Done)
                    } else {
                        Ok(ReadOutcome::Text(tail))
                    }
                }
            },
        }
    }

    /// Next complete record. After `End` every further call returns `End`.
    pub async fn next_record(&mut self) -> CoreResult<Record> {
        loop {
            if let Some(line) = self.ready.pop_front() {
                return Ok(Record::Line(line));
            }
            if self.drained {
                return Ok(Record::End);
            }
            match self.next_chunk().await? {
                ReadOutcome::Text(text) => {
                    let records = self.splitter.push(&text);
                    self.ready.extend(records);
                }
                ReadOutcome::Done => {
                    if let Some(tail) = self.splitter.finish() {
                        self.ready.push_back(tail);
                    }
                    self.drained = true;
                }
                ReadOutcome::Cancelled => return Ok(Record::Cancelled),
            }
        }
    }

    /// Consume the reader as a stream of lines; ends on body end or cancellation.
    pub fn into_lines(self) -> impl Stream<Item = CoreResult<String>> + Send {
        futures::stream::unfold(Some(self), |state| async move {
            let mut reader = state?;
            match reader.next_record().await {
                Ok(Record::Line(line)) => Some((Ok(line), Some(reader))),
                Ok(Record::End | Record::Cancelled) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChatStreamError;
    use crate::test_util::{byte_stream, byte_stream_with_error};

    async fn collect_lines(chunks: Vec<Vec<u8>>) -> Vec<String> {
        let reader = StreamTransportReader::new(byte_stream(chunks), CancellationToken::new());
        reader
            .into_lines()
            .map(|r| r.expect("no transport error"))
            .collect::<Vec<_>>()
            .await
    }

    #[test]
    fn decoder_carries_split_multibyte_char() {
        let bytes = "café".as_bytes();
        let split = bytes.len() - 1; // inside the two-byte "é"
        let mut d = Utf8Decoder::new();
        assert_eq!(d.decode(&bytes[..split]), "caf");
        assert_eq!(d.decode(&bytes[split..]), "é");
        assert_eq!(d.finish(), "");
    }

    #[test]
    fn decoder_replaces_invalid_bytes_and_flushes_truncated_tail() {
        let mut d = Utf8Decoder::new();
        assert_eq!(d.decode(b"a\xffb"), "a\u{FFFD}b");
        assert_eq!(d.decode(&[0xe2, 0x82]), "");
        assert_eq!(d.finish(), "\u{FFFD}");
    }

    #[test]
    fn splitter_keeps_tail_until_newline() {
        let mut s = RecordSplitter::new();
        assert!(s.push("data: {\"a\"").is_empty());
        assert!(s.has_pending());
        assert_eq!(s.push(":1}\r\ndata: x\n"), vec!["data: {\"a\":1}", "data: x"]);
        assert!(!s.has_pending());
        assert_eq!(s.finish(), None);
    }

    #[test]
    fn splitter_drops_blank_and_terminator_lines() {
        let mut s = RecordSplitter::new();
        let out = s.push("\n   \ndata: [DONE]\n[DONE]\ndata: y\n\n");
        assert_eq!(out, vec!["data: y"]);
    }

    #[test]
    fn splitter_finish_emits_unterminated_record() {
        let mut s = RecordSplitter::new();
        assert!(s.push("data: last").is_empty());
        assert_eq!(s.finish().as_deref(), Some("data: last"));
        assert_eq!(s.finish(), None);
    }

    #[tokio::test]
    async fn lines_are_independent_of_chunking() {
        let body = "data: {\"type\":\"reasoning\",\"reasoning\":\"思考\"}\n\
                    data: {\"type\":\"content\",\"content\":\"café\"}\r\n\
                    \n\
                    data: [DONE]\n"
            .as_bytes()
            .to_vec();
        let whole = collect_lines(vec![body.clone()]).await;
        assert_eq!(whole.len(), 2);

        // every two-chunk split, including ones inside multi-byte characters
        for at in 0..=body.len() {
            let chunks = vec![body[..at].to_vec(), body[at..].to_vec()];
            assert_eq!(collect_lines(chunks).await, whole, "split at byte {at}");
        }

        // one byte per chunk
        let bytewise = body.iter().map(|b| vec![*b]).collect();
        assert_eq!(collect_lines(bytewise).await, whole);
    }

    #[tokio::test]
    async fn end_is_sticky() {
        let mut reader = StreamTransportReader::new(
            byte_stream(vec![b"data: a\n".to_vec()]),
            CancellationToken::new(),
        );
        assert_eq!(reader.next_record().await.unwrap(), Record::Line("data: a".into()));
        assert_eq!(reader.next_record().await.unwrap(), Record::End);
        assert_eq!(reader.next_record().await.unwrap(), Record::End);
        assert_eq!(reader.next_chunk().await.unwrap(), ReadOutcome::Done);
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_pending_read() {
        let token = CancellationToken::new();
        let body = Box::pin(futures::stream::pending::<CoreResult<Bytes>>());
        let mut reader = StreamTransportReader::new(body, token.clone());
        token.cancel();
        assert_eq!(reader.next_chunk().await.unwrap(), ReadOutcome::Cancelled);
        assert_eq!(reader.next_record().await.unwrap(), Record::Cancelled);
    }

    #[tokio::test]
    async fn body_error_surfaces_once() {
        let mut reader = StreamTransportReader::new(
            byte_stream_with_error(vec![b"data: a\n".to_vec()]),
            CancellationToken::new(),
        );
        assert_eq!(reader.next_record().await.unwrap(), Record::Line("data: a".into()));
        let err = reader.next_record().await.unwrap_err();
        assert!(matches!(err, ChatStreamError::Unavailable { .. }));
    }
}
