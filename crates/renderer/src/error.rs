//! Error types for frame synchronization.

use thiserror::Error;

use framesync_rhi::RhiError;

use crate::MAX_BUFFER_DEPTH;
use crate::disposal::ResourceHandle;
use crate::frame_manager::RendererId;

/// Frame synchronization error type.
///
/// The first three variants are contract violations: they mean the host
/// integration is wrong, and callers should treat them as fatal rather than
/// retry. The remaining variants carry native engine failures, which are
/// never retried internally either.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Buffer depth outside `0..=MAX_BUFFER_DEPTH`
    #[error("Buffer depth {depth} is out of range (should be between 0 and {max})", max = MAX_BUFFER_DEPTH)]
    BufferDepthOutOfRange {
        /// Requested depth.
        depth: usize,
    },

    /// Renderer registered twice
    #[error("{0} is already registered")]
    AlreadyRegistered(RendererId),

    /// Renderer referenced without being registered
    #[error("{0} was not registered")]
    NotRegistered(RendererId),

    /// Fence creation or wait failed in the native engine
    #[error("Fence error: {0}")]
    Rhi(#[from] RhiError),

    /// A deferred disposal callback reported failure
    #[error("Disposal of resource {handle} failed: {source}")]
    Disposal {
        /// Resource whose disposal failed.
        handle: ResourceHandle,
        /// Error returned by the disposal callback.
        #[source]
        source: RhiError,
    },
}

/// Result type alias for frame synchronization operations.
pub type SyncResult<T> = std::result::Result<T, SyncError>;
