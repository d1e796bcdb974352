//! Software fences for hosts without a GPU.
//!
//! [`HeadlessFenceBackend`] hands out fences that signal a fixed latency after
//! they were created, which is enough to drive the frame synchronization
//! manager in tests, CI and the demo binary. Every create and wait is
//! recorded as a [`FenceEvent`], and failures can be injected to exercise
//! error paths.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::error::{RhiError, RhiResult};
use crate::fence::{FenceBackend, FenceHandle};

/// One call observed by the headless backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceEvent {
    /// A fence was created.
    Created(FenceHandle),
    /// A fence was successfully waited on and released.
    Waited(FenceHandle),
    /// `stall_for_pending_callbacks` was called.
    Stalled,
}

#[derive(Default)]
struct HeadlessState {
    next_raw: u64,
    /// Outstanding fences and the instant each one signals.
    outstanding: HashMap<FenceHandle, Instant>,
    events: Vec<FenceEvent>,
    fail_next_create: Option<String>,
    fail_next_wait: Option<String>,
}

/// Fence backend with simulated GPU latency.
///
/// # Thread Safety
///
/// Internal state sits behind a `Mutex`, so the backend can be shared, but
/// the manager that drives it is single-threaded anyway.
pub struct HeadlessFenceBackend {
    latency: Duration,
    state: Mutex<HeadlessState>,
}

impl HeadlessFenceBackend {
    /// Creates a backend whose fences are signaled immediately.
    pub fn new() -> Self {
        Self::with_latency(Duration::ZERO)
    }

    /// Creates a backend whose fences signal `latency` after creation.
    pub fn with_latency(latency: Duration) -> Self {
        debug!("Created headless fence backend ({:?} latency)", latency);
        Self {
            latency,
            state: Mutex::new(HeadlessState::default()),
        }
    }

    /// Simulated time between fence creation and signal.
    #[inline]
    pub fn latency(&self) -> Duration {
        self.latency
    }

    /// Makes the next `create_fence` call fail with `reason`.
    pub fn fail_next_create(&self, reason: impl Into<String>) {
        self.state().fail_next_create = Some(reason.into());
    }

    /// Makes the next `wait_for_fence` call fail with `reason`.
    ///
    /// The fence stays outstanding, so a later wait can still succeed.
    pub fn fail_next_wait(&self, reason: impl Into<String>) {
        self.state().fail_next_wait = Some(reason.into());
    }

    /// All events recorded so far, in call order.
    pub fn events(&self) -> Vec<FenceEvent> {
        self.state().events.clone()
    }

    /// Forgets the recorded events.
    pub fn clear_events(&self) {
        self.state().events.clear();
    }

    /// Fences created so far.
    pub fn created(&self) -> Vec<FenceHandle> {
        self.filter_events(|event| match event {
            FenceEvent::Created(fence) => Some(fence),
            _ => None,
        })
    }

    /// Fences waited on so far, in wait order.
    pub fn waited(&self) -> Vec<FenceHandle> {
        self.filter_events(|event| match event {
            FenceEvent::Waited(fence) => Some(fence),
            _ => None,
        })
    }

    /// Number of fences created but not yet waited on.
    pub fn outstanding_count(&self) -> usize {
        self.state().outstanding.len()
    }

    fn filter_events<F>(&self, select: F) -> Vec<FenceHandle>
    where
        F: Fn(FenceEvent) -> Option<FenceHandle>,
    {
        self.state().events.iter().copied().filter_map(select).collect()
    }

    fn state(&self) -> MutexGuard<'_, HeadlessState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for HeadlessFenceBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FenceBackend for HeadlessFenceBackend {
    fn create_fence(&self) -> RhiResult<FenceHandle> {
        let mut state = self.state();
        if let Some(reason) = state.fail_next_create.take() {
            return Err(RhiError::FenceCreation(reason));
        }

        state.next_raw += 1;
        let fence = FenceHandle::from_raw(state.next_raw)
            .ok_or_else(|| RhiError::FenceCreation("handle space exhausted".to_string()))?;
        state.outstanding.insert(fence, Instant::now() + self.latency);
        state.events.push(FenceEvent::Created(fence));

        trace!("Created headless fence {}", fence);
        Ok(fence)
    }

    fn wait_for_fence(&self, fence: FenceHandle) -> RhiResult<()> {
        let signal_at = {
            let mut state = self.state();
            if let Some(reason) = state.fail_next_wait.take() {
                return Err(RhiError::FenceWait { fence, reason });
            }
            *state
                .outstanding
                .get(&fence)
                .ok_or(RhiError::UnknownFence(fence))?
        };

        let remaining = signal_at.saturating_duration_since(Instant::now());
        if !remaining.is_zero() {
            std::thread::sleep(remaining);
        }

        let mut state = self.state();
        state.outstanding.remove(&fence);
        state.events.push(FenceEvent::Waited(fence));

        trace!("Waited on headless fence {}", fence);
        Ok(())
    }

    fn stall_for_pending_callbacks(&self) -> RhiResult<()> {
        self.state().events.push(FenceEvent::Stalled);
        Ok(())
    }
}
