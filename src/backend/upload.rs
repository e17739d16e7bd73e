// Staging uploads and readback
//
// Data reaches device-local memory through a host-visible staging buffer
// copied on the transfer queue. When the transfer family differs from the
// graphics family, ownership moves with a release barrier on the transfer
// queue and a matching acquire barrier on the graphics queue.
//
// The buffer path goes through the `TransferDevice` trait so the staging
// protocol can be exercised without a GPU.

use anyhow::{Context, Result};
use ash::vk;
use bytemuck::Pod;
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

use super::buffer::GpuBuffer;
use super::image::{mip_levels, GpuImage, ImageDesc};
use super::sync::CommandPool;
use super::VulkanDevice;
use crate::error::RenderError;

/// Texture format for everything decoded to RGBA8
pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

/// Buffer operations needed by the staging protocol
pub trait TransferDevice {
    type Buffer;

    fn create_buffer(
        &self,
        label: &str,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> Result<Self::Buffer>;

    fn write_buffer(&self, buffer: &mut Self::Buffer, bytes: &[u8]) -> Result<()>;

    fn read_buffer(&self, buffer: &Self::Buffer, len: usize) -> Result<Vec<u8>>;

    /// Copy on the transfer queue and hand the destination to the graphics
    /// queue, made visible to the stages implied by `dst_usage`. Blocks
    /// until the copy has completed.
    fn copy_to_device(
        &self,
        src: &Self::Buffer,
        dst: &Self::Buffer,
        size: vk::DeviceSize,
        dst_usage: vk::BufferUsageFlags,
    ) -> Result<()>;

    /// Copy a graphics-owned buffer into a host-readable one. Blocks.
    fn copy_to_host(
        &self,
        src: &Self::Buffer,
        dst: &Self::Buffer,
        size: vk::DeviceSize,
    ) -> Result<()>;
}

/// Upload `data` into a new device-local buffer.
///
/// The staging buffer is released before returning, so on success only the
/// destination buffer remains.
pub fn upload_buffer<D: TransferDevice, T: Pod>(
    device: &D,
    label: &str,
    data: &[T],
    usage: vk::BufferUsageFlags,
) -> Result<D::Buffer> {
    let bytes: &[u8] = bytemuck::cast_slice(data);
    if bytes.is_empty() {
        return Err(RenderError::EmptyUpload(label.to_string()).into());
    }
    let size = bytes.len() as vk::DeviceSize;

    let mut staging = device.create_buffer(
        &format!("{} staging", label),
        size,
        vk::BufferUsageFlags::TRANSFER_SRC,
        MemoryLocation::CpuToGpu,
    )?;
    device.write_buffer(&mut staging, bytes)?;

    // TRANSFER_SRC keeps the buffer readable for download_buffer
    let destination = device.create_buffer(
        label,
        size,
        usage | vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::TRANSFER_SRC,
        MemoryLocation::GpuOnly,
    )?;
    device
        .copy_to_device(&staging, &destination, size, usage)
        .with_context(|| format!("Failed to upload '{}'", label))?;

    Ok(destination)
}

/// Read the first `size` bytes of a device-local buffer back to the host
pub fn download_buffer<D: TransferDevice>(
    device: &D,
    source: &D::Buffer,
    size: vk::DeviceSize,
) -> Result<Vec<u8>> {
    let readback = device.create_buffer(
        "readback",
        size,
        vk::BufferUsageFlags::TRANSFER_DST,
        MemoryLocation::GpuToCpu,
    )?;
    device.copy_to_host(source, &readback, size)?;
    device.read_buffer(&readback, size as usize)
}

/// Queue family ownership transfer from the transfer to the graphics family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueHandoff {
    pub src_family: u32,
    pub dst_family: u32,
}

impl QueueHandoff {
    /// `None` when both roles share a family and no transfer is needed
    pub fn between(transfer_family: u32, graphics_family: u32) -> Option<Self> {
        (transfer_family != graphics_family).then_some(Self {
            src_family: transfer_family,
            dst_family: graphics_family,
        })
    }

    pub fn release_buffer(
        &self,
        buffer: vk::Buffer,
        size: vk::DeviceSize,
    ) -> vk::BufferMemoryBarrier<'static> {
        vk::BufferMemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(vk::AccessFlags::empty())
            .src_queue_family_index(self.src_family)
            .dst_queue_family_index(self.dst_family)
            .buffer(buffer)
            .offset(0)
            .size(size)
    }

    pub fn acquire_buffer(
        &self,
        buffer: vk::Buffer,
        size: vk::DeviceSize,
        dst_access: vk::AccessFlags,
    ) -> vk::BufferMemoryBarrier<'static> {
        vk::BufferMemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::empty())
            .dst_access_mask(dst_access)
            .src_queue_family_index(self.src_family)
            .dst_queue_family_index(self.dst_family)
            .buffer(buffer)
            .offset(0)
            .size(size)
    }

    /// Images keep TRANSFER_DST_OPTIMAL across the handoff
    pub fn release_image(
        &self,
        image: vk::Image,
        range: vk::ImageSubresourceRange,
    ) -> vk::ImageMemoryBarrier<'static> {
        vk::ImageMemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(vk::AccessFlags::empty())
            .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .src_queue_family_index(self.src_family)
            .dst_queue_family_index(self.dst_family)
            .image(image)
            .subresource_range(range)
    }

    pub fn acquire_image(
        &self,
        image: vk::Image,
        range: vk::ImageSubresourceRange,
    ) -> vk::ImageMemoryBarrier<'static> {
        vk::ImageMemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::empty())
            .dst_access_mask(vk::AccessFlags::TRANSFER_READ | vk::AccessFlags::TRANSFER_WRITE)
            .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .src_queue_family_index(self.src_family)
            .dst_queue_family_index(self.dst_family)
            .image(image)
            .subresource_range(range)
    }
}

/// Pipeline stages and access types that consume a buffer with `usage`
pub fn consumer_scope(usage: vk::BufferUsageFlags) -> (vk::PipelineStageFlags, vk::AccessFlags) {
    let mut stages = vk::PipelineStageFlags::empty();
    let mut access = vk::AccessFlags::empty();

    if usage.contains(vk::BufferUsageFlags::VERTEX_BUFFER) {
        stages |= vk::PipelineStageFlags::VERTEX_INPUT;
        access |= vk::AccessFlags::VERTEX_ATTRIBUTE_READ;
    }
    if usage.contains(vk::BufferUsageFlags::INDEX_BUFFER) {
        stages |= vk::PipelineStageFlags::VERTEX_INPUT;
        access |= vk::AccessFlags::INDEX_READ;
    }
    if usage.contains(vk::BufferUsageFlags::UNIFORM_BUFFER) {
        stages |= vk::PipelineStageFlags::VERTEX_SHADER | vk::PipelineStageFlags::FRAGMENT_SHADER;
        access |= vk::AccessFlags::UNIFORM_READ;
    }

    if stages.is_empty() {
        (vk::PipelineStageFlags::ALL_COMMANDS, vk::AccessFlags::MEMORY_READ)
    } else {
        (stages, access)
    }
}

/// Access and stage masks for an image layout change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutTransition {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

pub fn layout_transition(
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) -> Result<LayoutTransition, RenderError> {
    match (old, new) {
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => Ok(LayoutTransition {
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::TRANSFER_WRITE,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::TRANSFER,
        }),
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => {
            Ok(LayoutTransition {
                src_access: vk::AccessFlags::TRANSFER_WRITE,
                dst_access: vk::AccessFlags::SHADER_READ,
                src_stage: vk::PipelineStageFlags::TRANSFER,
                dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
            })
        }
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::TRANSFER_SRC_OPTIMAL) => {
            Ok(LayoutTransition {
                src_access: vk::AccessFlags::TRANSFER_WRITE,
                dst_access: vk::AccessFlags::TRANSFER_READ,
                src_stage: vk::PipelineStageFlags::TRANSFER,
                dst_stage: vk::PipelineStageFlags::TRANSFER,
            })
        }
        (vk::ImageLayout::TRANSFER_SRC_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => {
            Ok(LayoutTransition {
                src_access: vk::AccessFlags::TRANSFER_READ,
                dst_access: vk::AccessFlags::SHADER_READ,
                src_stage: vk::PipelineStageFlags::TRANSFER,
                dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
            })
        }
        (from, to) => Err(RenderError::UnsupportedLayoutTransition { from, to }),
    }
}

fn color_range(base_mip_level: u32, level_count: u32) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level,
        level_count,
        base_array_layer: 0,
        layer_count: 1,
    }
}

fn record_layout_transition(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    range: vk::ImageSubresourceRange,
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) -> Result<()> {
    let transition = layout_transition(old, new)?;
    let barrier = vk::ImageMemoryBarrier::default()
        .src_access_mask(transition.src_access)
        .dst_access_mask(transition.dst_access)
        .old_layout(old)
        .new_layout(new)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(range);

    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            transition.src_stage,
            transition.dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        );
    }
    Ok(())
}

/// GPU implementation: owns a transient pool per queue family
pub struct Uploader {
    transfer_pool: CommandPool,
    graphics_pool: CommandPool,
    handoff: Option<QueueHandoff>,
    device: Arc<VulkanDevice>,
}

impl Uploader {
    pub fn new(device: &Arc<VulkanDevice>) -> Result<Self> {
        let families = device.queue_families;
        let transfer_pool = CommandPool::new(
            device,
            families.transfer,
            vk::CommandPoolCreateFlags::TRANSIENT,
        )?;
        let graphics_pool = CommandPool::new(
            device,
            families.graphics,
            vk::CommandPoolCreateFlags::TRANSIENT,
        )?;

        let handoff = QueueHandoff::between(families.transfer, families.graphics);
        if handoff.is_some() {
            log::info!(
                "Uploads use dedicated transfer family {} with ownership handoff to {}",
                families.transfer,
                families.graphics
            );
        }

        Ok(Self {
            transfer_pool,
            graphics_pool,
            handoff,
            device: Arc::clone(device),
        })
    }

    /// Record into a one-shot command buffer, submit and wait for the queue
    fn submit_once(
        &self,
        pool: &CommandPool,
        queue: vk::Queue,
        record: impl FnOnce(vk::CommandBuffer) -> Result<()>,
    ) -> Result<()> {
        let cmd = pool.allocate(1)?[0];
        let result = self.record_and_submit(cmd, queue, record);
        pool.free(&[cmd]);
        result
    }

    fn record_and_submit(
        &self,
        cmd: vk::CommandBuffer,
        queue: vk::Queue,
        record: impl FnOnce(vk::CommandBuffer) -> Result<()>,
    ) -> Result<()> {
        let device = &self.device.device;
        let begin_info =
            vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        unsafe { device.begin_command_buffer(cmd, &begin_info) }
            .context("Failed to begin upload command buffer")?;
        record(cmd)?;
        unsafe { device.end_command_buffer(cmd) }
            .context("Failed to end upload command buffer")?;

        let command_buffers = [cmd];
        let submit = vk::SubmitInfo::default().command_buffers(&command_buffers);
        unsafe {
            device
                .queue_submit(queue, &[submit], vk::Fence::null())
                .context("Failed to submit upload")?;
            device
                .queue_wait_idle(queue)
                .context("Failed to wait for upload")?;
        }
        Ok(())
    }

    /// Upload RGBA8 pixels into a sampled, mipmapped texture image
    pub fn upload_texture(&self, label: &str, width: u32, height: u32, pixels: &[u8]) -> Result<GpuImage> {
        if pixels.is_empty() {
            return Err(RenderError::EmptyUpload(label.to_string()).into());
        }
        anyhow::ensure!(
            pixels.len() as u64 == width as u64 * height as u64 * 4,
            "texture '{}' has {} bytes, expected {}x{} RGBA8",
            label,
            pixels.len(),
            width,
            height
        );

        let size = pixels.len() as vk::DeviceSize;
        let mut staging = GpuBuffer::new(
            &self.device,
            &format!("{} staging", label),
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
        )?;
        staging.write(pixels)?;

        // Blitting needs linear filtering support for the format
        let linear_blit = self
            .device
            .format_properties(TEXTURE_FORMAT)
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR);
        let mips = if linear_blit {
            mip_levels(width, height)
        } else {
            log::warn!("{:?} does not support linear blits, skipping mipmaps", TEXTURE_FORMAT);
            1
        };

        let image = GpuImage::new(
            &self.device,
            label,
            ImageDesc {
                extent: vk::Extent2D { width, height },
                format: TEXTURE_FORMAT,
                usage: vk::ImageUsageFlags::TRANSFER_SRC
                    | vk::ImageUsageFlags::TRANSFER_DST
                    | vk::ImageUsageFlags::SAMPLED,
                aspect: vk::ImageAspectFlags::COLOR,
                mip_levels: mips,
                samples: vk::SampleCountFlags::TYPE_1,
            },
        )?;

        let device = &self.device.device;
        let full_range = color_range(0, mips);

        self.submit_once(&self.transfer_pool, self.device.queues.transfer, |cmd| {
            record_layout_transition(
                device,
                cmd,
                image.image,
                full_range,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            )?;

            let region = vk::BufferImageCopy::default()
                .image_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .image_extent(vk::Extent3D {
                    width,
                    height,
                    depth: 1,
                });
            unsafe {
                device.cmd_copy_buffer_to_image(
                    cmd,
                    staging.buffer,
                    image.image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                );
            }

            if let Some(handoff) = self.handoff {
                unsafe {
                    device.cmd_pipeline_barrier(
                        cmd,
                        vk::PipelineStageFlags::TRANSFER,
                        vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                        vk::DependencyFlags::empty(),
                        &[],
                        &[],
                        &[handoff.release_image(image.image, full_range)],
                    );
                }
            }
            Ok(())
        })?;
        drop(staging);

        self.submit_once(&self.graphics_pool, self.device.queues.graphics, |cmd| {
            if let Some(handoff) = self.handoff {
                unsafe {
                    device.cmd_pipeline_barrier(
                        cmd,
                        vk::PipelineStageFlags::TOP_OF_PIPE,
                        vk::PipelineStageFlags::TRANSFER,
                        vk::DependencyFlags::empty(),
                        &[],
                        &[],
                        &[handoff.acquire_image(image.image, full_range)],
                    );
                }
            }
            record_mipmaps(device, cmd, image.image, width, height, mips)
        })?;

        Ok(image)
    }
}

/// Blit each level from the previous one, leaving every level shader-readable
fn record_mipmaps(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    width: u32,
    height: u32,
    mips: u32,
) -> Result<()> {
    let mut mip_width = width as i32;
    let mut mip_height = height as i32;

    for level in 1..mips {
        record_layout_transition(
            device,
            cmd,
            image,
            color_range(level - 1, 1),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        )?;

        let next_width = (mip_width / 2).max(1);
        let next_height = (mip_height / 2).max(1);
        let blit = vk::ImageBlit::default()
            .src_offsets([
                vk::Offset3D { x: 0, y: 0, z: 0 },
                vk::Offset3D {
                    x: mip_width,
                    y: mip_height,
                    z: 1,
                },
            ])
            .src_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: level - 1,
                base_array_layer: 0,
                layer_count: 1,
            })
            .dst_offsets([
                vk::Offset3D { x: 0, y: 0, z: 0 },
                vk::Offset3D {
                    x: next_width,
                    y: next_height,
                    z: 1,
                },
            ])
            .dst_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: level,
                base_array_layer: 0,
                layer_count: 1,
            });

        unsafe {
            device.cmd_blit_image(
                cmd,
                image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[blit],
                vk::Filter::LINEAR,
            );
        }

        record_layout_transition(
            device,
            cmd,
            image,
            color_range(level - 1, 1),
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )?;

        mip_width = next_width;
        mip_height = next_height;
    }

    // Last level was only ever written
    record_layout_transition(
        device,
        cmd,
        image,
        color_range(mips - 1, 1),
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    )
}

impl TransferDevice for Uploader {
    type Buffer = GpuBuffer;

    fn create_buffer(
        &self,
        label: &str,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> Result<GpuBuffer> {
        GpuBuffer::new(&self.device, label, size, usage, location)
    }

    fn write_buffer(&self, buffer: &mut GpuBuffer, bytes: &[u8]) -> Result<()> {
        buffer.write(bytes)
    }

    fn read_buffer(&self, buffer: &GpuBuffer, len: usize) -> Result<Vec<u8>> {
        buffer.read(len)
    }

    fn copy_to_device(
        &self,
        src: &GpuBuffer,
        dst: &GpuBuffer,
        size: vk::DeviceSize,
        dst_usage: vk::BufferUsageFlags,
    ) -> Result<()> {
        let device = &self.device.device;
        let (consumer_stage, consumer_access) = consumer_scope(dst_usage);

        self.submit_once(&self.transfer_pool, self.device.queues.transfer, |cmd| {
            let region = vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size,
            };
            unsafe { device.cmd_copy_buffer(cmd, src.buffer, dst.buffer, &[region]) };

            let (dst_stage, barrier) = match self.handoff {
                Some(handoff) => (
                    vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                    handoff.release_buffer(dst.buffer, size),
                ),
                None => (
                    consumer_stage,
                    vk::BufferMemoryBarrier::default()
                        .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                        .dst_access_mask(consumer_access)
                        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .buffer(dst.buffer)
                        .offset(0)
                        .size(size),
                ),
            };
            unsafe {
                device.cmd_pipeline_barrier(
                    cmd,
                    vk::PipelineStageFlags::TRANSFER,
                    dst_stage,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[barrier],
                    &[],
                );
            }
            Ok(())
        })?;

        if let Some(handoff) = self.handoff {
            self.submit_once(&self.graphics_pool, self.device.queues.graphics, |cmd| {
                unsafe {
                    device.cmd_pipeline_barrier(
                        cmd,
                        vk::PipelineStageFlags::TOP_OF_PIPE,
                        consumer_stage,
                        vk::DependencyFlags::empty(),
                        &[],
                        &[handoff.acquire_buffer(dst.buffer, size, consumer_access)],
                        &[],
                    );
                }
                Ok(())
            })?;
        }

        Ok(())
    }

    fn copy_to_host(&self, src: &GpuBuffer, dst: &GpuBuffer, size: vk::DeviceSize) -> Result<()> {
        let device = &self.device.device;

        self.submit_once(&self.graphics_pool, self.device.queues.graphics, |cmd| {
            let region = vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size,
            };
            let host_barrier = vk::BufferMemoryBarrier::default()
                .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .dst_access_mask(vk::AccessFlags::HOST_READ)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .buffer(dst.buffer)
                .offset(0)
                .size(size);
            unsafe {
                device.cmd_copy_buffer(cmd, src.buffer, dst.buffer, &[region]);
                device.cmd_pipeline_barrier(
                    cmd,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::PipelineStageFlags::HOST,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[host_barrier],
                    &[],
                );
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    /// Decrements the live-buffer count when its buffer is dropped
    struct LiveToken(Rc<Cell<usize>>);

    impl Drop for LiveToken {
        fn drop(&mut self) {
            self.0.set(self.0.get() - 1);
        }
    }

    struct MockBuffer {
        bytes: RefCell<Vec<u8>>,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        _live: LiveToken,
    }

    #[derive(Default)]
    struct MockTransfer {
        live: Rc<Cell<usize>>,
        created: RefCell<Vec<(String, vk::DeviceSize, MemoryLocation)>>,
        device_copies: Cell<usize>,
    }

    impl TransferDevice for MockTransfer {
        type Buffer = MockBuffer;

        fn create_buffer(
            &self,
            label: &str,
            size: vk::DeviceSize,
            usage: vk::BufferUsageFlags,
            location: MemoryLocation,
        ) -> Result<MockBuffer> {
            self.live.set(self.live.get() + 1);
            self.created
                .borrow_mut()
                .push((label.to_string(), size, location));
            Ok(MockBuffer {
                bytes: RefCell::new(vec![0; size as usize]),
                usage,
                location,
                _live: LiveToken(Rc::clone(&self.live)),
            })
        }

        fn write_buffer(&self, buffer: &mut MockBuffer, bytes: &[u8]) -> Result<()> {
            assert_ne!(buffer.location, MemoryLocation::GpuOnly);
            buffer.bytes.borrow_mut()[..bytes.len()].copy_from_slice(bytes);
            Ok(())
        }

        fn read_buffer(&self, buffer: &MockBuffer, len: usize) -> Result<Vec<u8>> {
            assert_ne!(buffer.location, MemoryLocation::GpuOnly);
            Ok(buffer.bytes.borrow()[..len].to_vec())
        }

        fn copy_to_device(
            &self,
            src: &MockBuffer,
            dst: &MockBuffer,
            size: vk::DeviceSize,
            _dst_usage: vk::BufferUsageFlags,
        ) -> Result<()> {
            assert!(src.usage.contains(vk::BufferUsageFlags::TRANSFER_SRC));
            assert!(dst.usage.contains(vk::BufferUsageFlags::TRANSFER_DST));
            self.device_copies.set(self.device_copies.get() + 1);
            let n = size as usize;
            dst.bytes.borrow_mut()[..n].copy_from_slice(&src.bytes.borrow()[..n]);
            Ok(())
        }

        fn copy_to_host(
            &self,
            src: &MockBuffer,
            dst: &MockBuffer,
            size: vk::DeviceSize,
        ) -> Result<()> {
            assert!(src.usage.contains(vk::BufferUsageFlags::TRANSFER_SRC));
            let n = size as usize;
            dst.bytes.borrow_mut()[..n].copy_from_slice(&src.bytes.borrow()[..n]);
            Ok(())
        }
    }

    #[test]
    fn test_index_upload_uses_one_staging_buffer() {
        let device = MockTransfer::default();
        let indices: [u32; 3] = [0, 1, 2];

        let buffer =
            upload_buffer(&device, "indices", &indices, vk::BufferUsageFlags::INDEX_BUFFER).unwrap();

        let created = device.created.borrow();
        assert_eq!(created.len(), 2);
        assert_eq!(created[0].1, 12);
        assert_eq!(created[0].2, MemoryLocation::CpuToGpu);
        assert_eq!(created[1], ("indices".to_string(), 12, MemoryLocation::GpuOnly));
        assert_eq!(device.device_copies.get(), 1);

        // Staging buffer already released
        assert_eq!(device.live.get(), 1);
        assert!(buffer.usage.contains(vk::BufferUsageFlags::INDEX_BUFFER));
        assert_eq!(&*buffer.bytes.borrow(), bytemuck::cast_slice::<u32, u8>(&indices));

        drop(buffer);
        assert_eq!(device.live.get(), 0);
    }

    #[test]
    fn test_vertex_readback_is_bit_exact() {
        let device = MockTransfer::default();
        let vertices: [[f32; 3]; 3] = [[0.0, -0.5, 0.0], [0.5, 0.5, 0.1], [-0.5, 0.5, f32::EPSILON]];

        let buffer =
            upload_buffer(&device, "vertices", &vertices, vk::BufferUsageFlags::VERTEX_BUFFER)
                .unwrap();
        let bytes = download_buffer(&device, &buffer, 36).unwrap();

        assert_eq!(bytes, bytemuck::cast_slice::<[f32; 3], u8>(&vertices));
        let read_back: &[[f32; 3]] = bytemuck::cast_slice(&bytes);
        assert_eq!(read_back, &vertices);
        assert_eq!(device.live.get(), 1);
    }

    #[test]
    fn test_empty_upload_rejected() {
        let device = MockTransfer::default();
        let empty: [u32; 0] = [];

        let err = upload_buffer(&device, "nothing", &empty, vk::BufferUsageFlags::INDEX_BUFFER)
            .err()
            .unwrap();

        assert!(matches!(
            err.downcast_ref::<RenderError>(),
            Some(RenderError::EmptyUpload(label)) if label == "nothing"
        ));
        assert!(device.created.borrow().is_empty());
    }

    #[test]
    fn test_handoff_only_between_distinct_families() {
        assert_eq!(QueueHandoff::between(0, 0), None);
        assert_eq!(
            QueueHandoff::between(2, 0),
            Some(QueueHandoff {
                src_family: 2,
                dst_family: 0
            })
        );
    }

    #[test]
    fn test_release_and_acquire_name_the_same_families() {
        let handoff = QueueHandoff::between(1, 0).unwrap();
        let release = handoff.release_buffer(vk::Buffer::null(), 64);
        let acquire =
            handoff.acquire_buffer(vk::Buffer::null(), 64, vk::AccessFlags::INDEX_READ);

        assert_eq!(release.src_queue_family_index, 1);
        assert_eq!(release.dst_queue_family_index, 0);
        assert_eq!(acquire.src_queue_family_index, 1);
        assert_eq!(acquire.dst_queue_family_index, 0);
        assert_eq!(release.src_access_mask, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(acquire.dst_access_mask, vk::AccessFlags::INDEX_READ);
    }

    #[test]
    fn test_consumer_scope() {
        assert_eq!(
            consumer_scope(vk::BufferUsageFlags::VERTEX_BUFFER),
            (
                vk::PipelineStageFlags::VERTEX_INPUT,
                vk::AccessFlags::VERTEX_ATTRIBUTE_READ
            )
        );
        assert_eq!(
            consumer_scope(vk::BufferUsageFlags::INDEX_BUFFER).1,
            vk::AccessFlags::INDEX_READ
        );
        assert_eq!(
            consumer_scope(vk::BufferUsageFlags::STORAGE_BUFFER).0,
            vk::PipelineStageFlags::ALL_COMMANDS
        );
    }

    #[test]
    fn test_layout_transitions() {
        let upload = layout_transition(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )
        .unwrap();
        assert_eq!(upload.dst_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(upload.src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);

        let sample = layout_transition(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .unwrap();
        assert_eq!(sample.dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);

        assert!(matches!(
            layout_transition(
                vk::ImageLayout::PRESENT_SRC_KHR,
                vk::ImageLayout::GENERAL
            ),
            Err(RenderError::UnsupportedLayoutTransition { .. })
        ));
    }
}
