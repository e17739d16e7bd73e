// Backend module - Vulkan abstraction layer
//
// Design: Thin wrapper around ash with scoped ownership of every handle
// Performance: Zero-cost abstractions, explicit control

pub mod buffer;
pub mod descriptor;
pub mod device;
pub mod image;
pub mod pipeline;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod upload;

pub use device::VulkanDevice;
