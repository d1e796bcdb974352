//! Per-renderer synchronization handle.
//!
//! This module provides [`RendererSync`], the piece a renderer holds to take
//! part in frame synchronization. It registers on creation, emits a fence at
//! the end of every frame, and drains its fences when it goes away.

use std::rc::Rc;

use tracing::{debug, error};

use framesync_rhi::FenceBackend;

use crate::error::{SyncError, SyncResult};
use crate::frame_manager::{FrameSynchronizationManager, RendererId};
use crate::{DEFAULT_BUFFER_DEPTH, MAX_BUFFER_DEPTH};

/// How a renderer synchronizes with the GPU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RendererSyncConfig {
    /// Name used in log output.
    pub name: String,
    /// Frames allowed in flight. `Some(0)` waits on every frame; `None`
    /// disables fence emission for this renderer entirely.
    pub buffer_depth: Option<usize>,
}

impl Default for RendererSyncConfig {
    fn default() -> Self {
        Self {
            name: "Renderer".to_string(),
            buffer_depth: Some(DEFAULT_BUFFER_DEPTH),
        }
    }
}

impl RendererSyncConfig {
    /// Sets the name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the buffer depth.
    #[must_use]
    pub fn with_buffer_depth(mut self, buffer_depth: Option<usize>) -> Self {
        self.buffer_depth = buffer_depth;
        self
    }

    /// Checks the depth against [`MAX_BUFFER_DEPTH`].
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::BufferDepthOutOfRange`] if the depth is too large.
    pub fn validate(&self) -> SyncResult<()> {
        match self.buffer_depth {
            Some(depth) if depth > MAX_BUFFER_DEPTH => {
                Err(SyncError::BufferDepthOutOfRange { depth })
            }
            _ => Ok(()),
        }
    }
}

/// A renderer's registration with the [`FrameSynchronizationManager`].
///
/// Dropping the handle deregisters it, which waits on every fence it still
/// holds. Use [`close`](Self::close) to observe errors from that.
///
/// # Example
///
/// ```
/// use std::rc::Rc;
/// use framesync_renderer::{FrameSynchronizationManager, RendererSync, RendererSyncConfig};
/// use framesync_rhi::HeadlessFenceBackend;
///
/// # fn example() -> Result<(), framesync_renderer::SyncError> {
/// let manager = Rc::new(FrameSynchronizationManager::new(HeadlessFenceBackend::new()));
/// let renderer = RendererSync::new(manager.clone(), &RendererSyncConfig::default())?;
///
/// for _ in 0..4 {
///     // ...record and submit the frame...
///     renderer.end_frame()?;
/// }
///
/// renderer.wait_for_gpu()?;
/// renderer.close()?;
/// # Ok(())
/// # }
/// # example().unwrap();
/// ```
pub struct RendererSync<B: FenceBackend> {
    manager: Rc<FrameSynchronizationManager<B>>,
    id: RendererId,
    name: String,
    emits_fences: bool,
    closed: bool,
}

impl<B: FenceBackend> RendererSync<B> {
    /// Allocates an id and, unless fences are disabled, registers it.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::BufferDepthOutOfRange`] for an invalid config.
    pub fn new(
        manager: Rc<FrameSynchronizationManager<B>>,
        config: &RendererSyncConfig,
    ) -> SyncResult<Self> {
        config.validate()?;

        let id = manager.allocate_renderer_id();
        if let Some(depth) = config.buffer_depth {
            manager.register_renderer(id, depth)?;
        } else {
            debug!("{} ('{}') created without fence emission", id, config.name);
        }

        Ok(Self {
            manager,
            id,
            name: config.name.clone(),
            emits_fences: config.buffer_depth.is_some(),
            closed: false,
        })
    }

    /// The id this renderer is registered under.
    #[inline]
    pub fn id(&self) -> RendererId {
        self.id
    }

    /// The configured name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this renderer emits fences at all.
    #[inline]
    pub fn emits_fences(&self) -> bool {
        self.emits_fences
    }

    /// The shared manager.
    #[inline]
    pub fn manager(&self) -> &Rc<FrameSynchronizationManager<B>> {
        &self.manager
    }

    /// Marks the end of a submitted frame.
    ///
    /// # Errors
    ///
    /// See [`FrameSynchronizationManager::emit_fence_and_cycle_buffer`].
    pub fn end_frame(&self) -> SyncResult<()> {
        if !self.emits_fences {
            return Ok(());
        }
        self.manager.emit_fence_and_cycle_buffer(self.id)
    }

    /// Blocks until every frame this renderer has in flight is finished and
    /// the native engine has run its pending callbacks.
    ///
    /// # Errors
    ///
    /// See [`FrameSynchronizationManager::flush_all_pending_fences`].
    pub fn wait_for_gpu(&self) -> SyncResult<()> {
        if self.emits_fences {
            self.manager.flush_all_pending_fences(self.id)?;
        }
        self.manager.stall_for_pending_callbacks()
    }

    /// Deregisters, reporting any error from draining the fences.
    ///
    /// # Errors
    ///
    /// See [`FrameSynchronizationManager::deregister_renderer`].
    pub fn close(mut self) -> SyncResult<()> {
        self.closed = true;
        self.deregister()
    }

    fn deregister(&self) -> SyncResult<()> {
        if !self.emits_fences {
            return Ok(());
        }
        self.manager.deregister_renderer(self.id)
    }
}

impl<B: FenceBackend> Drop for RendererSync<B> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.deregister() {
            error!("Failed to deregister {} ('{}'): {}", self.id, self.name, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use framesync_rhi::HeadlessFenceBackend;

    use super::*;

    fn shared_manager() -> Rc<FrameSynchronizationManager<HeadlessFenceBackend>> {
        Rc::new(FrameSynchronizationManager::new(HeadlessFenceBackend::new()))
    }

    #[test]
    fn test_default_config() {
        let config = RendererSyncConfig::default();
        assert_eq!(config.buffer_depth, Some(DEFAULT_BUFFER_DEPTH));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_rejects_deep_buffers() {
        let config = RendererSyncConfig::default().with_buffer_depth(Some(MAX_BUFFER_DEPTH + 1));
        assert!(matches!(
            config.validate(),
            Err(SyncError::BufferDepthOutOfRange { .. })
        ));
        assert!(RendererSync::new(shared_manager(), &config).is_err());
    }

    #[test]
    fn test_registers_and_drop_deregisters() {
        let manager = shared_manager();
        let renderer = RendererSync::new(manager.clone(), &RendererSyncConfig::default()).unwrap();
        let id = renderer.id();

        assert!(manager.is_registered(id));
        assert_eq!(manager.buffer_depth(id).unwrap(), DEFAULT_BUFFER_DEPTH);

        renderer.end_frame().unwrap();
        drop(renderer);

        assert!(!manager.is_registered(id));
        assert_eq!(manager.backend().outstanding_count(), 0);
    }

    #[test]
    fn test_renderers_get_distinct_ids() {
        let manager = shared_manager();
        let a = RendererSync::new(manager.clone(), &RendererSyncConfig::default()).unwrap();
        let b = RendererSync::new(manager.clone(), &RendererSyncConfig::default()).unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(manager.registered_renderer_count(), 2);
    }

    #[test]
    fn test_disabled_fences_never_touch_the_backend() {
        let manager = shared_manager();
        let config = RendererSyncConfig::default()
            .with_name("overlay")
            .with_buffer_depth(None);
        let renderer = RendererSync::new(manager.clone(), &config).unwrap();

        assert!(!renderer.emits_fences());
        assert!(!manager.is_registered(renderer.id()));
        for _ in 0..5 {
            renderer.end_frame().unwrap();
        }
        renderer.close().unwrap();

        assert!(manager.backend().created().is_empty());
    }

    #[test]
    fn test_wait_for_gpu_empties_ring() {
        let manager = shared_manager();
        let renderer = RendererSync::new(
            manager.clone(),
            &RendererSyncConfig::default().with_buffer_depth(Some(4)),
        )
        .unwrap();

        for _ in 0..3 {
            renderer.end_frame().unwrap();
        }
        assert_eq!(manager.in_flight_fences(renderer.id()).unwrap().len(), 3);

        renderer.wait_for_gpu().unwrap();
        assert!(manager.in_flight_fences(renderer.id()).unwrap().is_empty());
        assert!(manager.is_registered(renderer.id()));
        assert_eq!(manager.backend().waited().len(), 3);
    }
}
