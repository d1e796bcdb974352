//! GPU fence boundary (Render Hardware Interface).
//!
//! This crate defines what the frame synchronization manager consumes from
//! the native rendering engine:
//! - Opaque fence handles
//! - The [`FenceBackend`] trait (create, wait, pump pending callbacks)
//! - A Vulkan backend built on `ash`
//! - A headless backend with simulated GPU latency

mod error;

pub mod fence;
pub mod headless;
pub mod vulkan;

pub use error::{RhiError, RhiResult};
pub use fence::{FenceBackend, FenceHandle};
pub use headless::{FenceEvent, HeadlessFenceBackend};
pub use vulkan::VulkanFenceBackend;

// Re-export ash types that users might need
pub use ash::vk;
