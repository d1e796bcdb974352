//! Frame synchronization demo driver.
//!
//! Runs two renderers against the headless fence backend: a main renderer
//! with the configured buffer depth and a shadow-map renderer that keeps a
//! single frame in flight. Every frame retires the previous frame's
//! transient buffer through the shared manager, so the log shows disposals
//! trailing their frames by the buffer depth.

use std::cell::Cell;
use std::rc::Rc;

use anyhow::Result;
use tracing::{debug, info};

use framesync_core::{Error, FrameSyncConfig};
use framesync_renderer::{
    DisposalResult, FrameSynchronizationManager, RendererSync, RendererSyncConfig, ResourceHandle,
};
use framesync_rhi::HeadlessFenceBackend;

/// Counts how many transient buffers the "native engine" has released.
struct ReleaseCounter(Rc<Cell<u64>>);

impl ReleaseCounter {
    fn callback(&self) -> impl FnOnce(ResourceHandle) -> DisposalResult + 'static {
        let released = self.0.clone();
        move |handle| {
            debug!("Releasing transient buffer {}", handle);
            released.set(released.get() + 1);
            Ok(())
        }
    }
}

fn main() -> Result<()> {
    // Initialize logging
    framesync_core::init_logging();
    info!("Starting frame synchronization demo");

    let config = FrameSyncConfig::from_env()?;
    info!(
        "Buffer depth {:?}, {} frames, {:?} simulated GPU latency",
        config.buffer_depth, config.frames, config.gpu_latency
    );

    let manager = Rc::new(FrameSynchronizationManager::new(
        HeadlessFenceBackend::with_latency(config.gpu_latency),
    ));

    let main_renderer = RendererSync::new(
        manager.clone(),
        &RendererSyncConfig::default()
            .with_name("main")
            .with_buffer_depth(config.buffer_depth),
    )?;
    let shadow_renderer = RendererSync::new(
        manager.clone(),
        &RendererSyncConfig::default()
            .with_name("shadow")
            .with_buffer_depth(Some(1)),
    )?;

    let released = Rc::new(Cell::new(0));
    let counter = ReleaseCounter(released.clone());

    for frame in 0..u64::from(config.frames) {
        // The previous frame's transient buffer is no longer referenced by
        // the CPU, but the GPU may still be reading it
        if frame > 0 {
            manager.queue_resource_disposal(ResourceHandle(frame - 1), counter.callback())?;
        }

        shadow_renderer.end_frame()?;
        main_renderer.end_frame()?;

        debug!(
            "Frame {}: {} unassigned, {} fences holding disposals, {} released",
            frame,
            manager.unassigned_disposal_count(),
            manager.pending_fence_count(),
            released.get()
        );
    }

    main_renderer.wait_for_gpu()?;
    info!(
        "GPU idle for main renderer, {} transient buffers released",
        released.get()
    );

    shadow_renderer.close()?;
    main_renderer.close()?;

    let manager = Rc::try_unwrap(manager)
        .map_err(|_| Error::Internal("frame sync manager still shared at shutdown".to_string()))?;
    let fences_created = manager.backend().created().len();
    manager.shutdown()?;

    info!(
        "Done: {} fences emitted, {} transient buffers released",
        fences_created,
        released.get()
    );
    Ok(())
}
