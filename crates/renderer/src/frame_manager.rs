//! Frame synchronization and deferred resource disposal.
//!
//! This module provides the [`FrameSynchronizationManager`], the single
//! authority that decides when it is safe to release a GPU resource. It
//! handles:
//!
//! - One ring of in-flight fences per registered renderer
//! - Disposal callbacks deferred until the GPU is done with a resource
//! - Merging callbacks queued between frames into the next emitted fence
//!
//! # Overview
//!
//! Each renderer registers with a buffer depth: the number of frames it may
//! have in flight. After submitting a frame it calls
//! [`emit_fence_and_cycle_buffer`](FrameSynchronizationManager::emit_fence_and_cycle_buffer):
//!
//! 1. If the ring is full, the oldest fence is waited on and every disposal
//!    attached to it runs, in the order it was queued
//! 2. A new fence is created and pushed into slot 0
//! 3. Every disposal queued since the last emission (from any renderer) is
//!    attached to the new fence
//!
//! Disposals are not tied to a renderer because resources can be shared;
//! whichever renderer emits next claims them. That may wait a little longer
//! than strictly needed, never shorter.
//!
//! Depth 0 means fully synchronous frames: each emission waits on its own
//! fence immediately and then runs every queued disposal.
//!
//! # Example
//!
//! ```
//! use framesync_renderer::{FrameSynchronizationManager, RendererId, ResourceHandle};
//! use framesync_rhi::HeadlessFenceBackend;
//!
//! # fn example() -> Result<(), framesync_renderer::SyncError> {
//! let manager = FrameSynchronizationManager::new(HeadlessFenceBackend::new());
//! let renderer = RendererId(1);
//! manager.register_renderer(renderer, 2)?;
//!
//! // A mesh is dropped while frames may still be reading it
//! manager.queue_resource_disposal(ResourceHandle(0x10), |_handle| {
//!     // release native memory here
//!     Ok(())
//! })?;
//!
//! // Main render loop
//! for _ in 0..3 {
//!     // ...submit GPU work...
//!     manager.emit_fence_and_cycle_buffer(renderer)?;
//! }
//!
//! manager.deregister_renderer(renderer)?;
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;

use tracing::{debug, info, trace, warn};

use framesync_rhi::{FenceBackend, FenceHandle};

use crate::disposal::{CallbackQueuePool, DisposalResult, QueuedDisposal, ResourceHandle, run_batch};
use crate::error::{SyncError, SyncResult};
use crate::fence_buffer::CircularFenceBuffer;

/// Opaque renderer identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RendererId(pub u64);

impl fmt::Display for RendererId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Renderer '{}'", self.0)
    }
}

/// Mutable bookkeeping, never borrowed across a fence wait or a callback.
#[derive(Default)]
struct SyncState {
    /// Fence ring per registered renderer.
    renderers: HashMap<RendererId, CircularFenceBuffer>,
    /// Disposals waiting on a specific fence.
    fence_callbacks: HashMap<FenceHandle, Vec<QueuedDisposal>>,
    /// Disposals not yet claimed by any fence.
    unassigned: Vec<QueuedDisposal>,
    /// Spare queues for `unassigned`.
    pool: CallbackQueuePool,
    /// Last id handed out by `allocate_renderer_id`.
    last_allocated_id: u64,
}

impl SyncState {
    fn ring(&self, renderer: RendererId) -> SyncResult<&CircularFenceBuffer> {
        self.renderers
            .get(&renderer)
            .ok_or(SyncError::NotRegistered(renderer))
    }

    fn ring_mut(&mut self, renderer: RendererId) -> SyncResult<&mut CircularFenceBuffer> {
        self.renderers
            .get_mut(&renderer)
            .ok_or(SyncError::NotRegistered(renderer))
    }

    /// Swaps the unassigned queue for an empty one and returns the old queue.
    fn take_unassigned(&mut self) -> Vec<QueuedDisposal> {
        let fresh = self.pool.rent();
        std::mem::replace(&mut self.unassigned, fresh)
    }
}

/// Coordinates GPU fences and deferred disposals for every renderer.
///
/// Create one per render subsystem and share it (typically through an
/// `Rc`) with renderers and resource owners.
///
/// # Thread Safety
///
/// The manager is single-threaded by design: it is neither `Sync` nor
/// internally locked, and every call is expected on the render thread.
///
/// # Reentrancy
///
/// All methods take `&self`. Internal state is released before any fence
/// wait or disposal callback runs, so a callback may queue further
/// disposals on the same manager; they go to a fresh queue rather than the
/// one being drained. Callbacks must not register, deregister or emit.
pub struct FrameSynchronizationManager<B: FenceBackend> {
    backend: B,
    state: RefCell<SyncState>,
}

impl<B: FenceBackend> FrameSynchronizationManager<B> {
    /// Creates a manager with no renderers and nothing queued.
    pub fn new(backend: B) -> Self {
        debug!("Frame synchronization manager created");
        Self {
            backend,
            state: RefCell::new(SyncState::default()),
        }
    }

    /// Returns the fence backend.
    #[inline]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Returns an id that is not currently registered.
    ///
    /// Ids are handed out in increasing order, skipping any that were
    /// registered by hand.
    pub fn allocate_renderer_id(&self) -> RendererId {
        let mut state = self.state.borrow_mut();
        loop {
            state.last_allocated_id += 1;
            let id = RendererId(state.last_allocated_id);
            if !state.renderers.contains_key(&id) {
                return id;
            }
        }
    }

    /// Registers `renderer` with an empty ring of `buffer_depth` fences.
    ///
    /// # Errors
    ///
    /// - [`SyncError::BufferDepthOutOfRange`] if `buffer_depth > MAX_BUFFER_DEPTH`
    /// - [`SyncError::AlreadyRegistered`] if `renderer` is already registered
    pub fn register_renderer(&self, renderer: RendererId, buffer_depth: usize) -> SyncResult<()> {
        let ring = CircularFenceBuffer::new(buffer_depth)
            .ok_or(SyncError::BufferDepthOutOfRange { depth: buffer_depth })?;

        let mut state = self.state.borrow_mut();
        if state.renderers.contains_key(&renderer) {
            return Err(SyncError::AlreadyRegistered(renderer));
        }
        state.renderers.insert(renderer, ring);

        info!(
            "{} registered with buffer depth {} ({} renderers)",
            renderer,
            buffer_depth,
            state.renderers.len()
        );
        Ok(())
    }

    /// Removes `renderer` after draining every fence it still holds.
    ///
    /// Fences are waited on oldest-first and their disposals run. If this was
    /// the last renderer, every unassigned disposal runs too, since no fence
    /// will ever be emitted for them.
    ///
    /// # Errors
    ///
    /// - [`SyncError::NotRegistered`] if `renderer` is unknown
    /// - [`SyncError::Rhi`] if a fence wait fails; the renderer stays
    ///   registered with the fences not yet drained, so the call can be
    ///   retried
    /// - [`SyncError::Disposal`] for the first failing disposal, reported
    ///   after everything else has been drained
    pub fn deregister_renderer(&self, renderer: RendererId) -> SyncResult<()> {
        let ring = *self.state.borrow().ring(renderer)?;

        info!(
            "{} deregistering, draining {} in-flight fences",
            renderer,
            ring.in_flight()
        );

        let mut outcome = Ok(());
        for fence in ring.occupied_oldest_first() {
            absorb_disposal_failure(&mut outcome, self.execute_fence(fence))?;
            self.state.borrow_mut().ring_mut(renderer)?.release(fence);
        }

        let remaining = {
            let mut state = self.state.borrow_mut();
            state.renderers.remove(&renderer);
            state.renderers.len()
        };
        debug!("{} deregistered ({} renderers remain)", renderer, remaining);

        if remaining == 0 {
            absorb_disposal_failure(&mut outcome, self.run_unassigned())?;
        }

        outcome
    }

    /// Emits a fence for the frame just submitted by `renderer` and cycles
    /// its ring.
    ///
    /// Blocks whenever a fence has to be evicted: on every call at depth 0,
    /// and once the ring is full at depth 1 and above.
    ///
    /// # Errors
    ///
    /// - [`SyncError::NotRegistered`] if `renderer` is unknown
    /// - [`SyncError::Rhi`] if creating or waiting on a fence fails; an
    ///   evicted fence whose wait failed keeps its slot and its disposals.
    ///   At depth 0 there is no slot to keep: the fence is abandoned to the
    ///   backend, and the unassigned disposals stay queued for the next
    ///   emission
    /// - [`SyncError::Disposal`] for the first failing disposal
    pub fn emit_fence_and_cycle_buffer(&self, renderer: RendererId) -> SyncResult<()> {
        let ring = *self.state.borrow().ring(renderer)?;

        if ring.depth() == 0 {
            let fence = self.backend.create_fence()?;
            trace!("{} emitted synchronous fence {}", renderer, fence);
            let mut outcome = Ok(());
            if let Err(err) = self.execute_fence(fence) {
                if !matches!(err, SyncError::Disposal { .. }) {
                    warn!("{} abandoning synchronous fence {}: {}", renderer, fence, err);
                }
                absorb_disposal_failure(&mut outcome, Err(err))?;
            }
            absorb_disposal_failure(&mut outcome, self.run_unassigned())?;
            return outcome;
        }

        let mut outcome = Ok(());
        if let Some(oldest) = ring.oldest() {
            debug!("{} evicting fence {}", renderer, oldest);
            absorb_disposal_failure(&mut outcome, self.execute_fence(oldest))?;
            self.state.borrow_mut().ring_mut(renderer)?.release(oldest);
        }

        let fence = self.backend.create_fence()?;

        let mut state = self.state.borrow_mut();
        let ring = state.ring_mut(renderer)?;
        *ring = ring.cycled(fence);

        if state.unassigned.is_empty() {
            trace!("{} emitted fence {}", renderer, fence);
        } else {
            let claimed = state.take_unassigned();
            debug!(
                "{} emitted fence {} claiming {} disposals",
                renderer,
                fence,
                claimed.len()
            );
            state.fence_callbacks.insert(fence, claimed);
        }

        outcome
    }

    /// Defers `callback(handle)` until the GPU can no longer be using the
    /// resource.
    ///
    /// With no renderer registered nothing can be in flight, so the callback
    /// runs before this returns. Otherwise it waits for the next fence any
    /// renderer emits, and runs once that fence is evicted.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Disposal`] only when the callback ran immediately
    /// and failed.
    pub fn queue_resource_disposal<F>(&self, handle: ResourceHandle, callback: F) -> SyncResult<()>
    where
        F: FnOnce(ResourceHandle) -> DisposalResult + 'static,
    {
        let disposal = QueuedDisposal::new(handle, callback);

        let mut state = self.state.borrow_mut();
        if state.renderers.is_empty() {
            drop(state);
            trace!("No renderers registered, disposing {} immediately", handle);
            return disposal.invoke();
        }

        state.unassigned.push(disposal);
        trace!(
            "Queued disposal of {} ({} unassigned)",
            handle,
            state.unassigned.len()
        );
        Ok(())
    }

    /// Waits on every fence `renderer` holds, oldest-first, and runs their
    /// disposals, leaving its ring empty.
    ///
    /// The registration stays, and unassigned disposals are not touched.
    ///
    /// # Errors
    ///
    /// - [`SyncError::NotRegistered`] if `renderer` is unknown
    /// - [`SyncError::Rhi`] if a fence wait fails; later fences stay in the ring
    /// - [`SyncError::Disposal`] for the first failing disposal
    pub fn flush_all_pending_fences(&self, renderer: RendererId) -> SyncResult<()> {
        let ring = *self.state.borrow().ring(renderer)?;
        debug!("{} flushing {} in-flight fences", renderer, ring.in_flight());

        let mut outcome = Ok(());
        for fence in ring.occupied_oldest_first() {
            absorb_disposal_failure(&mut outcome, self.execute_fence(fence))?;
            self.state.borrow_mut().ring_mut(renderer)?.release(fence);
        }
        outcome
    }

    /// Lets the native engine run completion callbacks it has deferred.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Rhi`] if the backend reports a failure.
    pub fn stall_for_pending_callbacks(&self) -> SyncResult<()> {
        self.backend.stall_for_pending_callbacks()?;
        Ok(())
    }

    /// Deregisters every remaining renderer in id order, draining all fences
    /// and, after the last one, the unassigned disposals.
    ///
    /// # Errors
    ///
    /// Stops at the first fence failure. Disposal failures are reported
    /// after everything has been drained.
    pub fn shutdown(self) -> SyncResult<()> {
        let mut renderers: Vec<RendererId> = self.state.borrow().renderers.keys().copied().collect();
        renderers.sort_unstable();
        info!("Shutting down frame synchronization ({} renderers)", renderers.len());

        let mut outcome = Ok(());
        for renderer in renderers {
            absorb_disposal_failure(&mut outcome, self.deregister_renderer(renderer))?;
        }
        outcome
    }

    /// Whether `renderer` is registered.
    pub fn is_registered(&self, renderer: RendererId) -> bool {
        self.state.borrow().renderers.contains_key(&renderer)
    }

    /// Number of registered renderers.
    pub fn registered_renderer_count(&self) -> usize {
        self.state.borrow().renderers.len()
    }

    /// The buffer depth `renderer` registered with.
    pub fn buffer_depth(&self, renderer: RendererId) -> SyncResult<usize> {
        Ok(self.state.borrow().ring(renderer)?.depth())
    }

    /// Fences `renderer` holds, newest first.
    pub fn in_flight_fences(&self, renderer: RendererId) -> SyncResult<Vec<FenceHandle>> {
        Ok(self.state.borrow().ring(renderer)?.occupied().collect())
    }

    /// Disposals queued but not yet claimed by a fence.
    pub fn unassigned_disposal_count(&self) -> usize {
        self.state.borrow().unassigned.len()
    }

    /// Fences that still have disposals attached.
    pub fn pending_fence_count(&self) -> usize {
        self.state.borrow().fence_callbacks.len()
    }

    /// Disposals attached to `fence`, if any.
    pub fn disposals_for_fence(&self, fence: FenceHandle) -> Vec<ResourceHandle> {
        self.state
            .borrow()
            .fence_callbacks
            .get(&fence)
            .map(|queue| queue.iter().map(QueuedDisposal::handle).collect())
            .unwrap_or_default()
    }

    /// Waits on `fence`, then runs and forgets the disposals attached to it.
    ///
    /// If the wait fails the disposals stay attached and none run.
    fn execute_fence(&self, fence: FenceHandle) -> SyncResult<()> {
        self.backend.wait_for_fence(fence)?;

        let Some(mut batch) = self.state.borrow_mut().fence_callbacks.remove(&fence) else {
            return Ok(());
        };

        debug!("Fence {} signaled, running {} disposals", fence, batch.len());
        let outcome = run_batch(&mut batch);
        self.state.borrow_mut().pool.give_back(batch);
        outcome
    }

    /// Runs every unassigned disposal and empties the queue.
    fn run_unassigned(&self) -> SyncResult<()> {
        let mut batch = self.state.borrow_mut().take_unassigned();
        if batch.is_empty() {
            self.state.borrow_mut().pool.give_back(batch);
            return Ok(());
        }

        debug!("Running {} unassigned disposals", batch.len());
        let outcome = run_batch(&mut batch);
        self.state.borrow_mut().pool.give_back(batch);
        outcome
    }
}

impl<B: FenceBackend> Drop for FrameSynchronizationManager<B> {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        let claimed: usize = state.fence_callbacks.values().map(Vec::len).sum();
        if !state.renderers.is_empty() || !state.unassigned.is_empty() || claimed > 0 {
            warn!(
                "Frame synchronization manager dropped with {} renderers, {} unassigned and {} fenced disposals outstanding; they will never run",
                state.renderers.len(),
                state.unassigned.len(),
                claimed
            );
        }
    }
}

/// Keeps the first disposal failure in `outcome` and passes any other
/// error straight through.
fn absorb_disposal_failure(outcome: &mut SyncResult<()>, result: SyncResult<()>) -> SyncResult<()> {
    match result {
        Err(err @ SyncError::Disposal { .. }) => {
            if outcome.is_ok() {
                *outcome = Err(err);
            } else {
                warn!("Additional disposal failure: {}", err);
            }
            Ok(())
        }
        other => other,
    }
}
