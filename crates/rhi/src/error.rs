//! RHI-specific error types.

use thiserror::Error;

use crate::fence::FenceHandle;

/// RHI-specific error type.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] ash::vk::Result),

    /// The native engine could not create a fence
    #[error("Fence creation failed: {0}")]
    FenceCreation(String),

    /// Waiting on a fence failed
    #[error("Waiting on fence {fence} failed: {reason}")]
    FenceWait {
        /// Fence that was being waited on.
        fence: FenceHandle,
        /// Backend-specific reason.
        reason: String,
    },

    /// A native engine call failed
    #[error("Native engine error: {0}")]
    Native(String),

    /// The handle was never created by this backend, or was already waited on
    #[error("Unknown fence handle: {0}")]
    UnknownFence(FenceHandle),
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;
