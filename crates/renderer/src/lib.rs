//! GPU frame synchronization.
//!
//! This crate decides when GPU-visible resources may be released:
//! - Per-renderer rings of in-flight fences
//! - Deferred disposal callbacks, run once their fence has signaled
//! - A per-renderer handle that wires the above into a render loop

mod disposal;
mod error;

pub mod fence_buffer;
pub mod frame_manager;
pub mod renderer;

pub use disposal::{DisposalResult, QueuedDisposal, ResourceHandle};
pub use error::{SyncError, SyncResult};
pub use fence_buffer::CircularFenceBuffer;
pub use frame_manager::{FrameSynchronizationManager, RendererId};
pub use renderer::{RendererSync, RendererSyncConfig};

/// Maximum number of frames a renderer may keep in flight.
pub const MAX_BUFFER_DEPTH: usize = 5;

/// Buffer depth used when a renderer does not ask for one.
pub const DEFAULT_BUFFER_DEPTH: usize = 3;
