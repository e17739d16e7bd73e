// =============================================================================
// SCENE - Meshes, models and per-frame camera data
// =============================================================================
//
// Meshes are uploaded once at load time and are read-only afterwards. Models
// group meshes under one transform that the update step rewrites every frame.

use anyhow::Result;
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

use crate::backend::buffer::GpuBuffer;
use crate::backend::upload::{upload_buffer, TransferDevice};
use crate::error::RenderError;

/// Interleaved vertex: position, color, texture coordinate
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub color: [f32; 3],
    pub tex_coord: [f32; 2],
}

impl Vertex {
    pub const fn new(position: [f32; 3], color: [f32; 3], tex_coord: [f32; 2]) -> Self {
        Self {
            position,
            color,
            tex_coord,
        }
    }
}

/// Camera matrices written to the uniform buffer of the image being drawn
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct ViewProjection {
    pub view: Mat4,
    pub projection: Mat4,
}

impl ViewProjection {
    pub const NEAR: f32 = 0.1;
    pub const FAR: f32 = 100.0;

    /// Look from `eye` at the origin with +Z up
    pub fn look_at_origin(eye: Vec3, fov_degrees: f32, extent: vk::Extent2D) -> Self {
        let aspect = extent.width as f32 / extent.height.max(1) as f32;
        let mut projection =
            Mat4::perspective_rh(fov_degrees.to_radians(), aspect, Self::NEAR, Self::FAR);
        // Vulkan clip space has Y pointing down
        projection.y_axis.y *= -1.0;

        Self {
            view: Mat4::look_at_rh(eye, Vec3::ZERO, Vec3::Z),
            projection,
        }
    }
}

/// Device-local geometry plus the texture it samples
pub struct Mesh {
    pub vertex_buffer: GpuBuffer,
    pub index_buffer: GpuBuffer,
    pub vertex_count: u32,
    pub index_count: u32,
    pub texture_id: usize,
}

impl Mesh {
    pub fn new<D>(
        uploader: &D,
        name: &str,
        vertices: &[Vertex],
        indices: &[u32],
        texture_id: usize,
    ) -> Result<Self>
    where
        D: TransferDevice<Buffer = GpuBuffer>,
    {
        let vertex_buffer = upload_buffer(
            uploader,
            &format!("{} vertices", name),
            vertices,
            vk::BufferUsageFlags::VERTEX_BUFFER,
        )?;
        let index_buffer = upload_buffer(
            uploader,
            &format!("{} indices", name),
            indices,
            vk::BufferUsageFlags::INDEX_BUFFER,
        )?;

        log::debug!(
            "Uploaded mesh '{}': {} vertices, {} indices, texture {}",
            name,
            vertices.len(),
            indices.len(),
            texture_id
        );

        Ok(Self {
            vertex_buffer,
            index_buffer,
            vertex_count: vertices.len() as u32,
            index_count: indices.len() as u32,
            texture_id,
        })
    }
}

/// Named group of meshes sharing one model transform
pub struct Model {
    pub name: String,
    meshes: Vec<Mesh>,
    pub transform: Mat4,
}

impl Model {
    pub fn new(name: impl Into<String>, meshes: Vec<Mesh>) -> Self {
        Self {
            name: name.into(),
            meshes,
            transform: Mat4::IDENTITY,
        }
    }

    pub fn meshes(&self) -> &[Mesh] {
        &self.meshes
    }

    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    pub fn mesh(&self, index: usize) -> Result<&Mesh, RenderError> {
        self.meshes
            .get(index)
            .ok_or(RenderError::index("mesh", index, self.meshes.len()))
    }

    /// Rotate about +Z by `elapsed_seconds * speed_radians`
    pub fn update(&mut self, elapsed_seconds: f32, speed_radians: f32) {
        self.transform = Mat4::from_rotation_z(elapsed_seconds * speed_radians);
    }
}

#[derive(Default)]
pub struct ModelRegistry {
    models: Vec<Model>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the model id
    pub fn add(&mut self, model: Model) -> usize {
        log::info!("Registered model '{}' ({} meshes)", model.name, model.mesh_count());
        self.models.push(model);
        self.models.len() - 1
    }

    pub fn model(&self, id: usize) -> Result<&Model, RenderError> {
        self.models
            .get(id)
            .ok_or(RenderError::index("model", id, self.models.len()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Model> {
        self.models.iter()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn update_all(&mut self, elapsed_seconds: f32, speed_radians: f32) {
        for model in &mut self.models {
            model.update(elapsed_seconds, speed_radians);
        }
    }
}
