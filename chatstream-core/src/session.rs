//! One request/response cycle: open the stream, assemble it under the render
//! throttle, and resolve to a tagged outcome.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::field::Empty;
use tracing_futures::Instrument;

use crate::assembler::{AssemblyStats, Step, StreamAssembler, ThrottlePolicy};
use crate::classifier::classify_line;
use crate::config::{Config, StreamCfg};
use crate::error::{ChatStreamError, CoreResult};
use crate::http_client::HttpClient;
use crate::lifecycle::{StreamLifecycle, StreamPhase};
use crate::model::{ChatRequest, Message, Snapshot};
use crate::normalizer::normalize_messages;
use crate::scheduler::{FrameClock, FrameScheduler};
use crate::telemetry::{self, StreamLog};
use crate::transport::{ChatTransport, Record, StreamTransportReader};

/// How a `stream_chat` call ended.
#[derive(Debug)]
pub enum ChatOutcome {
    /// The full assistant reply.
    Completed(Message),
    /// The caller cancelled; partial buffers were discarded.
    Cancelled,
    Failed(ChatStreamError),
}

impl ChatOutcome {
    pub fn phase(&self) -> StreamPhase {
        match self {
            Self::Completed(_) => StreamPhase::Completed,
            Self::Cancelled => StreamPhase::Cancelled,
            Self::Failed(_) => StreamPhase::Failed,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    /// `Ok(None)` for a cancelled call.
    pub fn into_result(self) -> CoreResult<Option<Message>> {
        match self {
            Self::Completed(m) => Ok(Some(m)),
            Self::Cancelled => Ok(None),
            Self::Failed(e) => Err(e),
        }
    }
}

/// Streams assistant replies from a `ChatTransport`.
#[derive(Clone)]
pub struct ChatClient {
    transport: Arc<dyn ChatTransport>,
    stream: StreamCfg,
}

impl ChatClient {
    pub fn new(transport: Arc<dyn ChatTransport>, stream: StreamCfg) -> Self {
        Self { transport, stream }
    }

    /// HTTP-backed client for the configured backend.
    pub fn from_config(cfg: &Config) -> CoreResult<Self> {
        let http = HttpClient::from_config(cfg)?;
        Ok(Self::new(Arc::new(http), cfg.stream.clone()))
    }

    /// Send `messages` and stream the reply. `on_update` receives throttled
    /// snapshots of both buffers and, on success, one final complete snapshot.
    /// Nothing is delivered after cancellation is observed.
    pub async fn stream_chat<F>(
        &self,
        messages: Vec<Message>,
        chat_id: Option<String>,
        cancel: CancellationToken,
        on_update: F,
    ) -> ChatOutcome
    where
        F: FnMut(Snapshot) + Send,
    {
        let frames = FrameClock::new(self.stream.frame_interval());
        self.stream_chat_with(frames, messages, chat_id, cancel, on_update)
            .await
    }

    /// Same as `stream_chat` with a caller-provided frame scheduler.
    pub async fn stream_chat_with<S, F>(
        &self,
        mut frames: S,
        messages: Vec<Message>,
        chat_id: Option<String>,
        cancel: CancellationToken,
        mut on_update: F,
    ) -> ChatOutcome
    where
        S: FrameScheduler,
        F: FnMut(Snapshot) + Send,
    {
        let span = tracing::info_span!(
            "chat.stream",
            chat.id = Empty,
            stream.outcome = Empty,
            stream.content_deltas = Empty,
            stream.reasoning_deltas = Empty,
            stream.malformed = Empty,
            stream.notifications = Empty,
            latency.ms = Empty,
            error.kind = Empty,
            error.message = Empty,
        );
        if let Some(id) = chat_id.as_deref() {
            span.record(telemetry::KEY_CHAT_ID, id);
        }

        let started = Instant::now();
        let log_chat_id = chat_id.clone();
        let (outcome, stats) = self
            .drive(&mut frames, messages, chat_id, &cancel, &mut on_update)
            .instrument(span.clone())
            .await;
        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        span.record(telemetry::KEY_OUTCOME, outcome.phase().as_str());
        span.record(telemetry::KEY_CONTENT_DELTAS, stats.content_deltas);
        span.record(telemetry::KEY_REASONING_DELTAS, stats.reasoning_deltas);
        span.record(telemetry::KEY_MALFORMED, stats.malformed);
        span.record(telemetry::KEY_NOTIFICATIONS, stats.notifications);
        span.record(telemetry::KEY_LATENCY_MS, latency_ms);

        let mut log = StreamLog::new()
            .chat_id_opt(log_chat_id.as_deref())
            .outcome(outcome.phase().as_str())
            .latency_ms(latency_ms)
            .stats(stats);
        match &outcome {
            ChatOutcome::Completed(m) => {
                log = log.lengths(
                    m.content.len(),
                    m.reasoning.as_ref().map_or(0, String::len),
                );
            }
            ChatOutcome::Failed(e) => {
                let message = e.to_string();
                span.record(telemetry::KEY_ERROR_KIND, e.kind().as_str());
                span.record(telemetry::KEY_ERROR_MESSAGE, message.as_str());
                tracing::warn!(parent: &span, error = %e, "chat stream failed");
                log = log.error(e.kind().as_str(), &message);
            }
            ChatOutcome::Cancelled => {
                tracing::info!(parent: &span, "chat stream cancelled");
            }
        }
        telemetry::emit_stream(log);
        outcome
    }

    async fn drive<S, F>(
        &self,
        frames: &mut S,
        messages: Vec<Message>,
        chat_id: Option<String>,
        cancel: &CancellationToken,
        on_update: &mut F,
    ) -> (ChatOutcome, AssemblyStats)
    where
        S: FrameScheduler,
        F: FnMut(Snapshot) + Send,
    {
        let mut lifecycle = StreamLifecycle::new();
        let mut assembler = StreamAssembler::new(ThrottlePolicy::from(&self.stream));

        let messages = match normalize_messages(messages) {
            Ok(m) => m,
            Err(e) => return fail(&mut lifecycle, &assembler, e),
        };
        let request = ChatRequest { messages, chat_id };

        if let Err(e) = lifecycle.advance(StreamPhase::Opening) {
            return fail(&mut lifecycle, &assembler, e.into());
        }
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            opened = self.transport.open_stream(&request) => Some(opened),
        };
        let body = match opened {
            None => return cancelled(&mut lifecycle, &mut assembler, frames),
            Some(Err(e)) => return fail(&mut lifecycle, &assembler, e),
            Some(Ok(body)) => body,
        };
        if let Err(e) = lifecycle.advance(StreamPhase::Streaming) {
            return fail(&mut lifecycle, &assembler, e.into());
        }

        let mut reader = StreamTransportReader::new(body, cancel.clone());
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return cancelled(&mut lifecycle, &mut assembler, frames);
                }
                handle = frames.fired() => {
                    if let Some(snapshot) = assembler.on_frame(handle, frames.now()) {
                        on_update(snapshot);
                    }
                }
                record = reader.next_record() => match record {
                    Ok(Record::Line(line)) => {
                        if assembler.apply(classify_line(&line), frames) == Step::Finished {
                            break;
                        }
                    }
                    Ok(Record::End) => break,
                    Ok(Record::Cancelled) => {
                        return cancelled(&mut lifecycle, &mut assembler, frames);
                    }
                    Err(e) => {
                        assembler.abort(frames);
                        return fail(&mut lifecycle, &assembler, e);
                    }
                },
            }
        }

        let last = assembler.finish(frames);
        on_update(last);
        if let Err(e) = lifecycle.advance(StreamPhase::Completed) {
            return fail(&mut lifecycle, &assembler, e.into());
        }
        let stats = assembler.stats();
        tracing::debug!(
            content_deltas = stats.content_deltas,
            reasoning_deltas = stats.reasoning_deltas,
            "chat stream completed"
        );
        (ChatOutcome::Completed(assembler.into_message()), stats)
    }

    /// Run `stream_chat` on a new task. The handle always holds the latest
    /// snapshot only; the outcome is available once the task ends.
    pub fn spawn_chat(
        &self,
        messages: Vec<Message>,
        chat_id: Option<String>,
    ) -> ChatStreamHandle {
        let (tx, updates) = watch::channel(Snapshot::default());
        let cancel = CancellationToken::new();
        let client = self.clone();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            client
                .stream_chat(messages, chat_id, token, move |snapshot| {
                    tx.send_replace(snapshot);
                })
                .await
        });
        ChatStreamHandle {
            updates,
            cancel,
            task,
        }
    }
}

fn fail(
    lifecycle: &mut StreamLifecycle,
    assembler: &StreamAssembler,
    err: ChatStreamError,
) -> (ChatOutcome, AssemblyStats) {
    // Failed is reachable from every live phase.
    let _ = lifecycle.advance(StreamPhase::Failed);
    (ChatOutcome::Failed(err), assembler.stats())
}

fn cancelled<S: FrameScheduler>(
    lifecycle: &mut StreamLifecycle,
    assembler: &mut StreamAssembler,
    frames: &mut S,
) -> (ChatOutcome, AssemblyStats) {
    assembler.abort(frames);
    let _ = lifecycle.advance(StreamPhase::Cancelled);
    (ChatOutcome::Cancelled, assembler.stats())
}

/// A chat streaming on its own task.
pub struct ChatStreamHandle {
    updates: watch::Receiver<Snapshot>,
    cancel: CancellationToken,
    task: JoinHandle<ChatOutcome>,
}

impl ChatStreamHandle {
    /// Request cancellation. A no-op once the stream has ended.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for a snapshot newer than the last one returned. Snapshots the
    /// caller was too slow to see are replaced, never queued. `None` once the
    /// task has ended and the last snapshot has been returned.
    pub async fn next_update(&mut self) -> Option<Snapshot> {
        self.updates.changed().await.ok()?;
        Some(self.updates.borrow_and_update().clone())
    }

    /// A receiver that outlives the handle, for reading the last snapshot
    /// after `outcome`.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.updates.clone()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the task and return its outcome.
    pub async fn outcome(self) -> ChatOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => ChatOutcome::Failed(ChatStreamError::Other(anyhow::anyhow!(
                "chat task ended abnormally: {e}"
            ))),
        }
    }
}
