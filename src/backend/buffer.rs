// Buffer utilities for vertex, index, uniform and staging buffers
//
// Memory comes from gpu-allocator; a GpuBuffer owns its handle and its
// allocation and releases both on drop.

use anyhow::{Context, Result};
use ash::vk;
use bytemuck::Pod;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

use super::VulkanDevice;

/// A device buffer plus its memory
pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    allocation: Option<Allocation>,
    pub size: vk::DeviceSize,
    pub location: MemoryLocation,
    device: Arc<VulkanDevice>,
}

impl GpuBuffer {
    /// Create a buffer with `usage` in the given memory location.
    ///
    /// `CpuToGpu` and `GpuToCpu` buffers are persistently mapped.
    pub fn new(
        device: &Arc<VulkanDevice>,
        name: &str,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> Result<Self> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.device.create_buffer(&buffer_info, None) }
            .with_context(|| format!("Failed to create buffer '{}'", name))?;

        let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };

        let allocation = device.allocator().allocate(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.device.destroy_buffer(buffer, None) };
                return Err(e).with_context(|| format!("Failed to allocate memory for '{}'", name));
            }
        };

        if let Err(e) = unsafe {
            device
                .device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        } {
            unsafe { device.device.destroy_buffer(buffer, None) };
            let _ = device.allocator().free(allocation);
            return Err(e).with_context(|| format!("Failed to bind memory for '{}'", name));
        }

        Ok(Self {
            buffer,
            allocation: Some(allocation),
            size,
            location,
            device: Arc::clone(device),
        })
    }

    /// Copy `data` to the start of a host-visible buffer
    pub fn write<T: Pod>(&mut self, data: &[T]) -> Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        anyhow::ensure!(
            bytes.len() as vk::DeviceSize <= self.size,
            "write of {} bytes overflows buffer of {} bytes",
            bytes.len(),
            self.size
        );

        let mapped = self
            .allocation
            .as_mut()
            .and_then(|a| a.mapped_slice_mut())
            .context("Buffer is not host visible")?;
        mapped[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Read the first `len` bytes of a host-visible buffer
    pub fn read(&self, len: usize) -> Result<Vec<u8>> {
        let mapped = self
            .allocation
            .as_ref()
            .and_then(|a| a.mapped_slice())
            .context("Buffer is not host visible")?;
        anyhow::ensure!(
            len <= mapped.len(),
            "read of {} bytes overflows mapping of {} bytes",
            len,
            mapped.len()
        );
        Ok(mapped[..len].to_vec())
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_buffer(self.buffer, None) };
        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = self.device.allocator().free(allocation) {
                log::error!("Failed to free buffer memory: {}", e);
            }
        }
    }
}
