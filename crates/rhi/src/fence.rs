//! Fence handles and the native fence interface.
//!
//! A fence is signaled by the GPU once all work submitted before it has
//! finished executing. The frame synchronization manager only ever needs two
//! native calls: create a fence after a frame's work has been submitted, and
//! block until a fence signals.
//!
//! # Lifetime
//!
//! A fence is waited on at most once. After [`FenceBackend::wait_for_fence`]
//! returns `Ok`, the backend is free to destroy the native object and the
//! handle must not be used again.
//!
//! # Example
//!
//! ```
//! use framesync_rhi::{FenceBackend, HeadlessFenceBackend};
//!
//! # fn example() -> Result<(), framesync_rhi::RhiError> {
//! let backend = HeadlessFenceBackend::new();
//!
//! // After submitting a frame's work...
//! let fence = backend.create_fence()?;
//!
//! // ...later, before reclaiming anything that frame used:
//! backend.wait_for_fence(fence)?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::num::NonZeroU64;

use crate::error::RhiResult;

/// Opaque handle to a native GPU fence.
///
/// Handles are never null; an empty slot in a fence ring is represented as
/// `Option::<FenceHandle>::None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FenceHandle(NonZeroU64);

impl FenceHandle {
    /// Wraps a raw native handle, returning `None` for a null handle.
    #[inline]
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    /// Returns the raw native handle value.
    #[inline]
    pub fn as_raw(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for FenceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0.get())
    }
}

/// The native engine's fence API.
///
/// Both calls are blocking and synchronous and report failure explicitly.
/// Implementations must not retry internally; the caller decides what a
/// failure means for its render loop.
pub trait FenceBackend {
    /// Creates a fence that signals once all previously submitted GPU work
    /// has completed.
    ///
    /// # Errors
    ///
    /// Returns an error if the native engine cannot create the fence.
    fn create_fence(&self) -> RhiResult<FenceHandle>;

    /// Blocks until `fence` signals, then releases it.
    ///
    /// # Errors
    ///
    /// Returns an error if the wait fails or the handle is unknown to this
    /// backend. On error the fence has not been consumed.
    fn wait_for_fence(&self, fence: FenceHandle) -> RhiResult<()>;

    /// Lets the native engine run any completion callbacks it has deferred.
    ///
    /// Backends without such a queue keep the default no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the native engine reports a failure.
    fn stall_for_pending_callbacks(&self) -> RhiResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_handle_is_rejected() {
        assert!(FenceHandle::from_raw(0).is_none());
    }

    #[test]
    fn test_raw_value_round_trips() {
        let fence = FenceHandle::from_raw(0xdead).unwrap();
        assert_eq!(fence.as_raw(), 0xdead);
        assert_eq!(fence.to_string(), "0xdead");
    }

    #[test]
    fn test_empty_slot_is_pointer_sized() {
        // A ring of Option<FenceHandle> costs nothing over raw handles
        assert_eq!(
            std::mem::size_of::<Option<FenceHandle>>(),
            std::mem::size_of::<u64>()
        );
    }
}
