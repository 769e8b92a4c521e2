//! Next-frame scheduling for throttled notifications.
//!
//! At most one frame is armed per scheduler. Arming again supersedes the
//! previous frame (cancel-and-replace), so a stream never has more than one
//! notification in flight.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

/// Identifies one armed frame; stale handles are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameHandle(u64);

impl FrameHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Host capability that decides when a scheduled notification is delivered.
#[async_trait]
pub trait FrameScheduler: Send {
    fn now(&self) -> Instant;

    /// Arm a frame, superseding any armed one.
    fn schedule(&mut self) -> FrameHandle;

    /// Disarm `handle` if it is still armed. Idempotent.
    fn cancel(&mut self, handle: FrameHandle);

    fn armed(&self) -> Option<FrameHandle>;

    /// Resolves with the handle of the armed frame once it is due, disarming
    /// it. Never resolves while nothing is armed. Must be cancel-safe.
    async fn fired(&mut self) -> FrameHandle;
}

/// Fires on fixed frame boundaries measured from its creation, like a
/// display refresh. Re-arming within a frame keeps that frame's deadline.
#[derive(Debug)]
pub struct FrameClock {
    epoch: Instant,
    interval: Duration,
    armed: Option<(FrameHandle, Instant)>,
    next_id: u64,
}

impl FrameClock {
    pub fn new(interval: Duration) -> Self {
        Self {
            epoch: Instant::now(),
            interval: interval.max(Duration::from_millis(1)),
            armed: None,
            next_id: 0,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// First frame boundary strictly after `now`.
    fn next_boundary(&self, now: Instant) -> Instant {
        let elapsed = now.saturating_duration_since(self.epoch).as_nanos();
        let step = self.interval.as_nanos();
        let frames = elapsed / step + 1;
        let offset = u64::try_from(step * frames).unwrap_or(u64::MAX);
        self.epoch + Duration::from_nanos(offset)
    }
}

#[async_trait]
impl FrameScheduler for FrameClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn schedule(&mut self) -> FrameHandle {
        self.next_id += 1;
        let handle = FrameHandle(self.next_id);
        let deadline = self.next_boundary(Instant::now());
        self.armed = Some((handle, deadline));
        handle
    }

    fn cancel(&mut self, handle: FrameHandle) {
        if matches!(self.armed, Some((h, _)) if h == handle) {
            self.armed = None;
        }
    }

    fn armed(&self) -> Option<FrameHandle> {
        self.armed.map(|(h, _)| h)
    }

    async fn fired(&mut self) -> FrameHandle {
        let Some((handle, deadline)) = self.armed else {
            return std::future::pending().await;
        };
        tokio::time::sleep_until(deadline).await;
        self.armed = None;
        handle
    }
}
