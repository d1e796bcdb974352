//! Vulkan fence backend.
//!
//! Fences are emitted by submitting an empty batch to a queue: Vulkan
//! signals a fence passed to `vkQueueSubmit` only once every batch
//! previously submitted to that queue has completed, so the fence covers
//! the whole frame without the renderer having to thread it through its own
//! submissions.
//!
//! # Example
//!
//! ```no_run
//! use framesync_rhi::{FenceBackend, VulkanFenceBackend};
//! use framesync_rhi::vk;
//!
//! # fn example(device: ash::Device, graphics_queue: vk::Queue) -> Result<(), framesync_rhi::RhiError> {
//! let backend = VulkanFenceBackend::new(device, graphics_queue);
//!
//! // After the frame's command buffers have been submitted:
//! let fence = backend.create_fence()?;
//!
//! // Some frames later, before freeing anything that frame used:
//! backend.wait_for_fence(fence)?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use ash::vk;
use ash::vk::Handle;
use tracing::{debug, warn};

use crate::error::{RhiError, RhiResult};
use crate::fence::{FenceBackend, FenceHandle};

/// Fence backend on top of a host-owned Vulkan device and queue.
///
/// The backend does not own the device; the host must keep it alive and
/// must not destroy it while fences created here are outstanding.
///
/// # Thread Safety
///
/// The set of live fences is protected by a `Mutex`. Submissions to the
/// queue follow Vulkan's external synchronization rules, which remain the
/// host's responsibility.
pub struct VulkanFenceBackend {
    /// Logical device the fences are created on.
    device: ash::Device,
    /// Queue that fence batches are submitted to.
    queue: vk::Queue,
    /// Fences created but not yet waited on.
    live: Mutex<HashSet<FenceHandle>>,
}

impl VulkanFenceBackend {
    /// Creates a backend that emits fences on `queue`.
    ///
    /// `queue` should be the queue the renderer submits its frame work to.
    pub fn new(device: ash::Device, queue: vk::Queue) -> Self {
        debug!("Created Vulkan fence backend");
        Self {
            device,
            queue,
            live: Mutex::new(HashSet::new()),
        }
    }

    /// Returns the queue fences are submitted to.
    #[inline]
    pub fn queue(&self) -> vk::Queue {
        self.queue
    }

    /// Number of fences created but not yet waited on.
    pub fn live_fence_count(&self) -> usize {
        self.live().len()
    }

    fn live(&self) -> MutexGuard<'_, HashSet<FenceHandle>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl FenceBackend for VulkanFenceBackend {
    fn create_fence(&self) -> RhiResult<FenceHandle> {
        let create_info = vk::FenceCreateInfo::default();
        let fence = unsafe { self.device.create_fence(&create_info, None)? };

        let submitted = unsafe { self.device.queue_submit(self.queue, &[], fence) };
        if let Err(e) = submitted {
            unsafe { self.device.destroy_fence(fence, None) };
            return Err(e.into());
        }

        let handle = FenceHandle::from_raw(fence.as_raw())
            .ok_or_else(|| RhiError::FenceCreation("driver returned a null fence".to_string()))?;
        self.live().insert(handle);

        debug!("Emitted Vulkan fence {}", handle);
        Ok(handle)
    }

    fn wait_for_fence(&self, fence: FenceHandle) -> RhiResult<()> {
        if !self.live().contains(&fence) {
            return Err(RhiError::UnknownFence(fence));
        }

        let raw = vk::Fence::from_raw(fence.as_raw());
        unsafe {
            self.device
                .wait_for_fences(&[raw], true, u64::MAX)
                .map_err(|e| RhiError::FenceWait {
                    fence,
                    reason: e.to_string(),
                })?;
            self.device.destroy_fence(raw, None);
        }

        self.live().remove(&fence);
        debug!("Waited on and destroyed Vulkan fence {}", fence);
        Ok(())
    }
}

impl Drop for VulkanFenceBackend {
    fn drop(&mut self) {
        let live = std::mem::take(&mut *self.live());
        if !live.is_empty() {
            warn!(
                "Destroying {} Vulkan fences that were never waited on",
                live.len()
            );
        }
        for fence in live {
            unsafe {
                self.device
                    .destroy_fence(vk::Fence::from_raw(fence.as_raw()), None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vulkan_backend_is_send_sync() {
        // Compile-time check that the backend can live in shared renderer state
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<VulkanFenceBackend>();
    }

    #[test]
    fn test_fence_handle_matches_vulkan_raw_value() {
        let raw = vk::Fence::from_raw(0x1234);
        let handle = FenceHandle::from_raw(raw.as_raw()).unwrap();
        assert_eq!(vk::Fence::from_raw(handle.as_raw()), raw);
    }

    #[test]
    fn test_null_vulkan_fence_has_no_handle() {
        assert!(FenceHandle::from_raw(vk::Fence::null().as_raw()).is_none());
    }
}
