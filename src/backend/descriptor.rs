// Descriptor sets
//
// Set 0: per-swapchain-image uniform buffer (view/projection)
// Set 1: combined image sampler, one set per texture slot
//
// Uniform sets belong to a swapchain generation; the texture table lives as
// long as the renderer.

use anyhow::{Context, Result};
use ash::vk;
use bytemuck::Pod;
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

use super::buffer::GpuBuffer;
use super::image::GpuImage;
use super::VulkanDevice;
use crate::error::RenderError;

/// Texture slots available for the whole run. No eviction.
pub const MAX_TEXTURES: usize = 64;

/// Both set layouts, shared by every pipeline generation
pub struct DescriptorLayouts {
    pub frame: vk::DescriptorSetLayout,
    pub texture: vk::DescriptorSetLayout,
    device: Arc<VulkanDevice>,
}

impl DescriptorLayouts {
    pub fn new(device: &Arc<VulkanDevice>) -> Result<Self> {
        let frame_binding = [vk::DescriptorSetLayoutBinding::default()
            .binding(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::VERTEX)];
        let texture_binding = [vk::DescriptorSetLayoutBinding::default()
            .binding(0)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::FRAGMENT)];

        let frame = unsafe {
            device.device.create_descriptor_set_layout(
                &vk::DescriptorSetLayoutCreateInfo::default().bindings(&frame_binding),
                None,
            )
        }
        .context("Failed to create uniform descriptor set layout")?;

        let texture = unsafe {
            device.device.create_descriptor_set_layout(
                &vk::DescriptorSetLayoutCreateInfo::default().bindings(&texture_binding),
                None,
            )
        };
        let texture = match texture {
            Ok(layout) => layout,
            Err(e) => {
                unsafe { device.device.destroy_descriptor_set_layout(frame, None) };
                return Err(e).context("Failed to create texture descriptor set layout");
            }
        };

        Ok(Self {
            frame,
            texture,
            device: Arc::clone(device),
        })
    }

    /// Set layouts in binding order
    pub fn as_array(&self) -> [vk::DescriptorSetLayout; 2] {
        [self.frame, self.texture]
    }
}

impl Drop for DescriptorLayouts {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_descriptor_set_layout(self.texture, None);
            self.device.device.destroy_descriptor_set_layout(self.frame, None);
        }
    }
}

/// One uniform buffer and descriptor set per swapchain image
pub struct UniformSets {
    pool: vk::DescriptorPool,
    pub sets: Vec<vk::DescriptorSet>,
    buffers: Vec<GpuBuffer>,
    device: Arc<VulkanDevice>,
}

impl UniformSets {
    pub fn new(
        device: &Arc<VulkanDevice>,
        layout: vk::DescriptorSetLayout,
        image_count: usize,
        uniform_size: vk::DeviceSize,
    ) -> Result<Self> {
        let pool_sizes = [vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: image_count as u32,
        }];
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(image_count as u32)
            .pool_sizes(&pool_sizes);
        let pool = unsafe { device.device.create_descriptor_pool(&pool_info, None) }
            .context("Failed to create uniform descriptor pool")?;

        let mut uniforms = Self {
            pool,
            sets: Vec::new(),
            buffers: Vec::with_capacity(image_count),
            device: Arc::clone(device),
        };

        for i in 0..image_count {
            uniforms.buffers.push(GpuBuffer::new(
                device,
                &format!("uniform buffer {}", i),
                uniform_size,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                MemoryLocation::CpuToGpu,
            )?);
        }

        let layouts = vec![layout; image_count];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        uniforms.sets = unsafe { device.device.allocate_descriptor_sets(&alloc_info) }
            .context("Failed to allocate uniform descriptor sets")?;

        for (set, buffer) in uniforms.sets.iter().zip(&uniforms.buffers) {
            let buffer_info = [vk::DescriptorBufferInfo {
                buffer: buffer.buffer,
                offset: 0,
                range: uniform_size,
            }];
            let write = vk::WriteDescriptorSet::default()
                .dst_set(*set)
                .dst_binding(0)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .buffer_info(&buffer_info);
            unsafe { device.device.update_descriptor_sets(&[write], &[]) };
        }

        Ok(uniforms)
    }

    /// Update the uniform buffer that belongs to `image_index`
    pub fn write<T: Pod>(&mut self, image_index: usize, value: &T) -> Result<()> {
        let len = self.buffers.len();
        self.buffers
            .get_mut(image_index)
            .ok_or(RenderError::index("uniform buffer", image_index, len))?
            .write(std::slice::from_ref(value))
    }
}

impl Drop for UniformSets {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_descriptor_pool(self.pool, None) };
    }
}

/// Fixed-capacity, append-only table
#[derive(Debug)]
pub struct SlotTable<T> {
    items: Vec<T>,
    capacity: usize,
}

impl<T> SlotTable<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn ensure_free_slot(&self) -> Result<(), RenderError> {
        if self.items.len() >= self.capacity {
            return Err(RenderError::TextureSlotsExhausted {
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    /// Append and return the new slot index
    pub fn push(&mut self, item: T) -> Result<usize, RenderError> {
        self.ensure_free_slot()?;
        self.items.push(item);
        Ok(self.items.len() - 1)
    }

    pub fn get(&self, index: usize) -> Result<&T, RenderError> {
        self.items
            .get(index)
            .ok_or(RenderError::index("texture", index, self.items.len()))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

struct TextureSlot {
    set: vk::DescriptorSet,
    _image: GpuImage,
}

/// Sampler plus one descriptor set per loaded texture
pub struct TextureTable {
    slots: SlotTable<TextureSlot>,
    pool: vk::DescriptorPool,
    layout: vk::DescriptorSetLayout,
    pub sampler: vk::Sampler,
    device: Arc<VulkanDevice>,
}

impl TextureTable {
    pub fn new(device: &Arc<VulkanDevice>, layout: vk::DescriptorSetLayout) -> Result<Self> {
        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(true)
            .max_anisotropy(device.properties.limits.max_sampler_anisotropy)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .min_lod(0.0)
            .max_lod(vk::LOD_CLAMP_NONE);
        let sampler = unsafe { device.device.create_sampler(&sampler_info, None) }
            .context("Failed to create texture sampler")?;

        let pool_sizes = [vk::DescriptorPoolSize {
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: MAX_TEXTURES as u32,
        }];
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(MAX_TEXTURES as u32)
            .pool_sizes(&pool_sizes);
        let pool = match unsafe { device.device.create_descriptor_pool(&pool_info, None) } {
            Ok(pool) => pool,
            Err(e) => {
                unsafe { device.device.destroy_sampler(sampler, None) };
                return Err(e).context("Failed to create texture descriptor pool");
            }
        };

        Ok(Self {
            slots: SlotTable::with_capacity(MAX_TEXTURES),
            pool,
            layout,
            sampler,
            device: Arc::clone(device),
        })
    }

    /// Fails before touching the GPU when the table is full
    pub fn ensure_free_slot(&self) -> Result<()> {
        self.slots.ensure_free_slot()?;
        Ok(())
    }

    /// Register a shader-readable image and return its texture id
    pub fn add(&mut self, image: GpuImage) -> Result<usize> {
        self.slots.ensure_free_slot()?;

        let layouts = [self.layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);
        let set = unsafe { self.device.device.allocate_descriptor_sets(&alloc_info) }
            .context("Failed to allocate texture descriptor set")?[0];

        let image_info = [vk::DescriptorImageInfo {
            sampler: self.sampler,
            image_view: image.view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }];
        let write = vk::WriteDescriptorSet::default()
            .dst_set(set)
            .dst_binding(0)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .image_info(&image_info);
        unsafe { self.device.device.update_descriptor_sets(&[write], &[]) };

        let id = self.slots.push(TextureSlot { set, _image: image })?;
        Ok(id)
    }

    pub fn descriptor_set(&self, texture_id: usize) -> Result<vk::DescriptorSet> {
        Ok(self.slots.get(texture_id)?.set)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }
}

impl Drop for TextureTable {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_descriptor_pool(self.pool, None);
            self.device.device.destroy_sampler(self.sampler, None);
        }
    }
}
