//! Scripted transports and body builders shared by the unit tests.

use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use futures::channel::mpsc;
use futures::StreamExt;

use crate::error::{ChatStreamError, CoreResult};
use crate::model::ChatRequest;
use crate::transport::{ByteStream, ChatTransport};

/// Body that yields `chunks` and then ends.
pub fn byte_stream(chunks: Vec<Vec<u8>>) -> ByteStream {
    Box::pin(futures::stream::iter(
        chunks.into_iter().map(|c| Ok(Bytes::from(c))),
    ))
}

/// Body that yields `chunks` and then fails as a dropped connection would.
pub fn byte_stream_with_error(chunks: Vec<Vec<u8>>) -> ByteStream {
    let items = chunks
        .into_iter()
        .map(|c| Ok(Bytes::from(c)))
        .chain(std::iter::once(Err(ChatStreamError::Unavailable {
            reason: "connection reset".into(),
        })));
    Box::pin(futures::stream::iter(items))
}

/// `data: {...}` lines joined into one body.
pub fn sse_body(lines: &[&str]) -> Vec<u8> {
    let mut body = String::new();
    for line in lines {
        body.push_str(line);
        body.push('\n');
    }
    body.into_bytes()
}

pub fn content_line(text: &str) -> String {
    format!(
        "data: {}",
        serde_json::json!({"type": "content", "content": text})
    )
}

pub fn reasoning_line(text: &str) -> String {
    format!(
        "data: {}",
        serde_json::json!({"type": "reasoning", "reasoning": text})
    )
}

/// Serves one prepared body (or error) and records the request it got.
pub struct ScriptedTransport {
    body: Mutex<Option<CoreResult<ByteStream>>>,
    pub seen: Mutex<Vec<ChatRequest>>,
}

impl ScriptedTransport {
    pub fn with_chunks(chunks: Vec<Vec<u8>>) -> Self {
        Self::with_body(Ok(byte_stream(chunks)))
    }

    pub fn with_body(body: CoreResult<ByteStream>) -> Self {
        Self {
            body: Mutex::new(Some(body)),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Transport whose body is fed by the returned sender, chunk by chunk.
    pub fn channel() -> (Self, mpsc::UnboundedSender<CoreResult<Bytes>>) {
        let (tx, rx) = mpsc::unbounded();
        (Self::with_body(Ok(rx.boxed())), tx)
    }
}

#[async_trait]
impl ChatTransport for ScriptedTransport {
    async fn open_stream(&self, req: &ChatRequest) -> CoreResult<ByteStream> {
        self.seen.lock().unwrap().push(req.clone());
        self.body
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| Err(ChatStreamError::Validation("body already taken".into())))
    }
}

/// Transport that never answers; only cancellation can end a call on it.
pub struct HangingTransport;

#[async_trait]
impl ChatTransport for HangingTransport {
    async fn open_stream(&self, _req: &ChatRequest) -> CoreResult<ByteStream> {
        futures::future::pending().await
    }
}

/// Deterministic scheduler: an armed frame is due immediately, and the
/// clock only moves when a test advances it or a frame fires.
pub struct FakeFrames {
    now: tokio::time::Instant,
    per_frame: std::time::Duration,
    armed: Option<crate::scheduler::FrameHandle>,
    next_id: u64,
    pub scheduled: u32,
    pub cancelled: u32,
}

impl FakeFrames {
    pub fn new() -> Self {
        Self::stepping(std::time::Duration::ZERO)
    }

    /// Each fired frame advances the clock by `per_frame`.
    pub fn stepping(per_frame: std::time::Duration) -> Self {
        Self {
            now: tokio::time::Instant::now(),
            per_frame,
            armed: None,
            next_id: 0,
            scheduled: 0,
            cancelled: 0,
        }
    }

    pub fn advance(&mut self, by: std::time::Duration) {
        self.now += by;
    }

    /// Fire the armed frame synchronously, if any.
    pub fn take_armed(&mut self) -> Option<crate::scheduler::FrameHandle> {
        let h = self.armed.take()?;
        self.now += self.per_frame;
        Some(h)
    }
}

#[async_trait]
impl crate::scheduler::FrameScheduler for FakeFrames {
    fn now(&self) -> tokio::time::Instant {
        self.now
    }

    fn schedule(&mut self) -> crate::scheduler::FrameHandle {
        self.next_id += 1;
        self.scheduled += 1;
        let h = crate::scheduler::FrameHandle::new(self.next_id);
        self.armed = Some(h);
        h
    }

    fn cancel(&mut self, handle: crate::scheduler::FrameHandle) {
        if self.armed == Some(handle) {
            self.armed = None;
            self.cancelled += 1;
        }
    }

    fn armed(&self) -> Option<crate::scheduler::FrameHandle> {
        self.armed
    }

    async fn fired(&mut self) -> crate::scheduler::FrameHandle {
        match self.take_armed() {
            Some(h) => h,
            None => futures::future::pending().await,
        }
    }
}
