//! Buffer accumulation and the render-rate limiter.
//!
//! Buffers are always current; only the *notification* of the caller is
//! throttled. Deltas closer together than the throttle window form a burst,
//! and once a burst has produced `max_burst` notifications further frames are
//! skipped until the stream calms down. The end of a stream is always
//! announced with one unthrottled final notification.

use std::time::Duration;

use tokio::time::Instant;

use crate::config::StreamCfg;
use crate::model::{Message, Snapshot};
use crate::scheduler::{FrameHandle, FrameScheduler};
use crate::stream::{Channel, StreamEvent};

/// One display frame.
pub const THROTTLE_WINDOW_MS: u64 = 16;
/// Notifications allowed per burst.
pub const MAX_BURST: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottlePolicy {
    pub window: Duration,
    pub max_burst: u32,
}

impl Default for ThrottlePolicy {
    fn default() -> Self {
        Self {
            window: Duration::from_millis(THROTTLE_WINDOW_MS),
            max_burst: MAX_BURST,
        }
    }
}

impl From<&StreamCfg> for ThrottlePolicy {
    fn from(cfg: &StreamCfg) -> Self {
        Self {
            window: cfg.throttle_window(),
            max_burst: cfg.max_burst,
        }
    }
}

/// Per-invocation state. Created fresh for every send and never shared.
///
/// The unterminated line fragment lives in the transport reader
/// (`RecordSplitter`), which is the only thing allowed to see it.
#[derive(Debug, Clone, Default)]
pub struct AssemblyState {
    pub content: String,
    pub reasoning: String,
    /// When the caller was last notified; `None` before the first notification.
    pub last_flush: Option<Instant>,
    pub burst_count: u32,
    pub cancelled: bool,
}

impl AssemblyState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, channel: Channel, text: &str) {
        match channel {
            Channel::Content => self.content.push_str(text),
            Channel::Reasoning => self.reasoning.push_str(text),
        }
    }

    /// Account for one delta arriving at `now`; returns whether the frame
    /// scheduled for it may notify.
    pub fn register_delta(&mut self, now: Instant, policy: &ThrottlePolicy) -> bool {
        let in_burst = self
            .last_flush
            .is_some_and(|at| now.saturating_duration_since(at) < policy.window);
        if in_burst {
            self.burst_count = self.burst_count.saturating_add(1);
        } else {
            self.burst_count = 0;
        }
        self.burst_count < policy.max_burst
    }

    pub fn mark_flushed(&mut self, now: Instant) {
        self.last_flush = Some(now);
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            content: self.content.clone(),
            reasoning: self.reasoning.clone(),
        }
    }

    pub fn into_message(self) -> Message {
        Message::assistant(self.content, self.reasoning)
    }
}

/// What `StreamAssembler::apply` did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// A frame was (re)armed; `notify` says whether it will reach the caller.
    Scheduled { notify: bool },
    /// Malformed record: nothing changed.
    Ignored,
    /// Terminator seen; the caller should `finish`.
    Finished,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssemblyStats {
    pub content_deltas: u32,
    pub reasoning_deltas: u32,
    pub malformed: u32,
    pub notifications: u32,
    pub skipped_frames: u32,
}

#[derive(Debug, Clone, Copy)]
struct PendingNotification {
    handle: FrameHandle,
    notify: bool,
}

/// Applies events to an `AssemblyState` and decides when the caller sees them.
#[derive(Debug)]
pub struct StreamAssembler {
    state: AssemblyState,
    policy: ThrottlePolicy,
    pending: Option<PendingNotification>,
    stats: AssemblyStats,
}

impl StreamAssembler {
    pub fn new(policy: ThrottlePolicy) -> Self {
        Self {
            state: AssemblyState::new(),
            policy,
            pending: None,
            stats: AssemblyStats::default(),
        }
    }

    pub fn state(&self) -> &AssemblyState {
        &self.state
    }

    pub fn stats(&self) -> AssemblyStats {
        self.stats
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn apply<S: FrameScheduler + ?Sized>(
        &mut self,
        event: StreamEvent,
        frames: &mut S,
    ) -> Step {
        let (channel, text) = match event {
            StreamEvent::ContentDelta { text } => (Channel::Content, text),
            StreamEvent::ReasoningDelta { text } => (Channel::Reasoning, text),
            StreamEvent::Terminator => return Step::Finished,
            StreamEvent::Malformed { .. } => {
                self.stats.malformed += 1;
                return Step::Ignored;
            }
        };

        self.state.append(channel, &text);
        match channel {
            Channel::Content => self.stats.content_deltas += 1,
            Channel::Reasoning => self.stats.reasoning_deltas += 1,
        }

        let notify = self.state.register_delta(frames.now(), &self.policy);
        self.cancel_pending(frames);
        let handle = frames.schedule();
        self.pending = Some(PendingNotification { handle, notify });
        Step::Scheduled { notify }
    }

    /// A frame fired. Returns the snapshot to deliver, if the pending
    /// notification matches `handle` and was allowed to notify.
    pub fn on_frame(&mut self, handle: FrameHandle, now: Instant) -> Option<Snapshot> {
        let pending = self.pending.filter(|p| p.handle == handle)?;
        self.pending = None;
        if pending.notify {
            self.state.mark_flushed(now);
            self.stats.notifications += 1;
            Some(self.state.snapshot())
        } else {
            self.stats.skipped_frames += 1;
            None
        }
    }

    /// End of stream: drop any pending frame and return the final,
    /// unthrottled snapshot.
    pub fn finish<S: FrameScheduler + ?Sized>(&mut self, frames: &mut S) -> Snapshot {
        self.cancel_pending(frames);
        self.state.mark_flushed(frames.now());
        self.stats.notifications += 1;
        self.state.snapshot()
    }

    /// Cancellation or failure: drop any pending frame; nothing more is delivered.
    pub fn abort<S: FrameScheduler + ?Sized>(&mut self, frames: &mut S) {
        self.cancel_pending(frames);
        self.state.cancelled = true;
    }

    pub fn into_message(self) -> Message {
        self.state.into_message()
    }

    fn cancel_pending<S: FrameScheduler + ?Sized>(&mut self, frames: &mut S) {
        if let Some(p) = self.pending.take() {
            frames.cancel(p.handle);
        }
    }
}

/// Assemble a complete, already-split sequence of lines without throttling.
pub fn assemble_lines<I, L>(lines: I) -> (Snapshot, AssemblyStats)
where
    I: IntoIterator<Item = L>,
    L: AsRef<str>,
{
    let mut state = AssemblyState::new();
    let mut stats = AssemblyStats::default();
    for line in lines {
        match crate::classifier::classify_line(line.as_ref()) {
            StreamEvent::ContentDelta { text } => {
                state.append(Channel::Content, &text);
                stats.content_deltas += 1;
            }
            StreamEvent::ReasoningDelta { text } => {
                state.append(Channel::Reasoning, &text);
                stats.reasoning_deltas += 1;
            }
            StreamEvent::Terminator => break,
            StreamEvent::Malformed { .. } => stats.malformed += 1,
        }
    }
    stats.notifications = 1;
    (state.snapshot(), stats)
}
