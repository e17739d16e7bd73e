// =============================================================================
// RENDERER - Explicit context object tying the backend together
// =============================================================================
//
// Owns the device, the upload engine, the texture table, the model registry,
// the frame slots and the swapchain manager. `RenderTarget` implements the
// GPU side of the frame protocol; `Renderer` pairs it with the scheduler and
// exposes the load / update / draw API the event loop calls.
//
// IMPORTANT: Field order matters for Drop! Everything that holds GPU memory
// is declared before the device so it is released first.

use anyhow::{Context, Result};
use ash::vk;
use glam::Vec3;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use winit::window::Window;

use crate::backend::descriptor::{DescriptorLayouts, TextureTable, MAX_TEXTURES};
use crate::backend::shader::ShaderCode;
use crate::backend::swapchain::{
    AcquireOutcome, GenerationInputs, PresentOutcome, SwapchainManager,
};
use crate::backend::sync::FrameSlot;
use crate::backend::upload::{download_buffer, Uploader};
use crate::backend::VulkanDevice;
use crate::config::Config;
use crate::loader::{self, DecodedImage, MeshData};
use crate::scene::{Mesh, Model, ModelRegistry, Vertex, ViewProjection};
use crate::scheduler::{FrameBackend, FrameOutcome, FrameScheduler};

/// Texture slot used by meshes whose material has no texture
pub const DEFAULT_TEXTURE: usize = 0;

/// Per-frame settings resolved from the config once at startup
#[derive(Debug, Clone, Copy)]
pub struct RenderSettings {
    pub preferred_present_mode: vk::PresentModeKHR,
    pub depth_test: bool,
    pub clear_color: [f32; 4],
    pub camera_eye: Vec3,
    pub fov_degrees: f32,
    pub rotation_speed: f32,
}

impl RenderSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            preferred_present_mode: config.preferred_present_mode(),
            depth_test: config.graphics.depth_test,
            clear_color: config.graphics.clear_color,
            camera_eye: Vec3::from(config.scene.camera_eye),
            fov_degrees: config.scene.fov_degrees,
            rotation_speed: config.scene.rotation_speed_degrees.to_radians(),
        }
    }
}

fn window_size(window: &Window) -> (u32, u32) {
    let size = window.inner_size();
    (size.width, size.height)
}

/// GPU state the frame protocol runs against
pub struct RenderTarget {
    registry: ModelRegistry,
    textures: TextureTable,
    swapchain: SwapchainManager,
    slots: Vec<FrameSlot>,
    layouts: DescriptorLayouts,
    vertex_shader: ShaderCode,
    fragment_shader: ShaderCode,
    uploader: Uploader,
    window: Arc<Window>,
    settings: RenderSettings,
    device: Arc<VulkanDevice>,
}

/// Borrow only the fields a generation is built from, so the swapchain
/// manager can be mutated alongside
fn generation_inputs<'a>(
    layouts: &'a DescriptorLayouts,
    vertex_shader: &'a ShaderCode,
    fragment_shader: &'a ShaderCode,
    settings: &RenderSettings,
) -> GenerationInputs<'a> {
    GenerationInputs {
        layouts,
        vertex_shader,
        fragment_shader,
        preferred_present_mode: settings.preferred_present_mode,
        depth_test: settings.depth_test,
        uniform_size: std::mem::size_of::<ViewProjection>() as vk::DeviceSize,
    }
}

impl RenderTarget {
    fn create_swapchain(&mut self) -> Result<bool> {
        let size = window_size(&self.window);
        let inputs = generation_inputs(
            &self.layouts,
            &self.vertex_shader,
            &self.fragment_shader,
            &self.settings,
        );
        self.swapchain.create(&self.device, &inputs, size)
    }

    fn rebuild_swapchain(&mut self) -> Result<bool> {
        let size = window_size(&self.window);
        let inputs = generation_inputs(
            &self.layouts,
            &self.vertex_shader,
            &self.fragment_shader,
            &self.settings,
        );
        self.swapchain.rebuild(&self.device, &inputs, size)
    }

    fn record_commands(&mut self, image_index: u32) -> Result<()> {
        let device = &self.device.device;
        let state = self
            .swapchain
            .current_mut()
            .context("No live swapchain to record into")?;
        let image = image_index as usize;

        let view_projection = ViewProjection::look_at_origin(
            self.settings.camera_eye,
            self.settings.fov_degrees,
            state.extent(),
        );
        state.uniforms.write(image, &view_projection)?;

        let cmd = *state
            .command_buffers
            .get(image)
            .context("Image index has no command buffer")?;
        let framebuffer = state.framebuffers.framebuffers[image];
        let uniform_set = state.uniforms.sets[image];

        let begin_info = vk::CommandBufferBeginInfo::default();
        unsafe {
            device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .context("Failed to reset command buffer")?;
            device
                .begin_command_buffer(cmd, &begin_info)
                .context("Failed to begin command buffer")?;
        }

        // ─────────────────────────────────────────────────────────────────────
        // RENDER PASS
        // ─────────────────────────────────────────────────────────────────────
        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.settings.clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];
        let render_pass_info = vk::RenderPassBeginInfo::default()
            .render_pass(state.render_pass.render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: state.extent(),
            })
            .clear_values(&clear_values);

        unsafe {
            device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
            device.cmd_bind_pipeline(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                state.pipeline.pipeline,
            );
        }

        for model in self.registry.iter() {
            unsafe {
                device.cmd_push_constants(
                    cmd,
                    state.pipeline.layout,
                    vk::ShaderStageFlags::VERTEX,
                    0,
                    bytemuck::bytes_of(&model.transform),
                );
            }

            for mesh in model.meshes() {
                let descriptor_sets = [uniform_set, self.textures.descriptor_set(mesh.texture_id)?];
                unsafe {
                    device.cmd_bind_vertex_buffers(cmd, 0, &[mesh.vertex_buffer.buffer], &[0]);
                    device.cmd_bind_index_buffer(
                        cmd,
                        mesh.index_buffer.buffer,
                        0,
                        vk::IndexType::UINT32,
                    );
                    device.cmd_bind_descriptor_sets(
                        cmd,
                        vk::PipelineBindPoint::GRAPHICS,
                        state.pipeline.layout,
                        0,
                        &descriptor_sets,
                        &[],
                    );
                    device.cmd_draw_indexed(cmd, mesh.index_count, 1, 0, 0, 0);
                }
            }
        }

        unsafe {
            device.cmd_end_render_pass(cmd);
            device
                .end_command_buffer(cmd)
                .context("Failed to record command buffer")?;
        }

        Ok(())
    }
}

impl FrameBackend for RenderTarget {
    fn image_count(&self) -> usize {
        self.swapchain.image_count()
    }

    fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
        self.slots[slot].wait()
    }

    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome> {
        let state = self
            .swapchain
            .current()
            .context("No live swapchain to acquire from")?;
        let outcome = state
            .chain
            .acquire_next_image(self.slots[slot].image_available)?;

        if matches!(
            outcome,
            AcquireOutcome::OutOfDate | AcquireOutcome::Ready { suboptimal: true, .. }
        ) {
            self.swapchain.mark_stale();
        }
        Ok(outcome)
    }

    fn record(&mut self, _slot: usize, image_index: u32) -> Result<()> {
        self.record_commands(image_index)
    }

    fn submit(&mut self, slot: usize, image_index: u32) -> Result<()> {
        let state = self
            .swapchain
            .current()
            .context("No live swapchain to submit to")?;
        let frame = &self.slots[slot];

        let wait_semaphores = [frame.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [state.command_buffers[image_index as usize]];
        let signal_semaphores = [frame.render_finished];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores) // Wait for image to be available
            .wait_dst_stage_mask(&wait_stages) // Which stage waits
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores); // Signal when done

        // Only reset once we are certain to submit, or the next wait deadlocks
        frame.reset()?;
        unsafe {
            self.device
                .device
                .queue_submit(self.device.queues.graphics, &[submit_info], frame.in_flight)
                .context("Failed to submit draw command buffer")?;
        }
        Ok(())
    }

    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome> {
        let state = self
            .swapchain
            .current()
            .context("No live swapchain to present")?;
        let outcome = state.chain.present(
            self.device.queues.present,
            image_index,
            self.slots[slot].render_finished,
        )?;

        if outcome.is_stale() {
            self.swapchain.mark_stale();
        }
        Ok(outcome)
    }

    fn rebuild(&mut self) -> Result<bool> {
        self.rebuild_swapchain()
    }
}

impl Drop for RenderTarget {
    fn drop(&mut self) {
        log::info!("Shutting down renderer...");
        if let Err(e) = self.device.wait_idle() {
            log::error!("Failed to wait for device idle on shutdown: {:#}", e);
        }
    }
}

/// The renderer context handed to the event loop
pub struct Renderer {
    scheduler: FrameScheduler,
    target: RenderTarget,
    texture_cache: HashMap<PathBuf, usize>,
}

impl Renderer {
    pub fn new(window: Arc<Window>, config: &Config) -> Result<Self> {
        let device = VulkanDevice::new(
            &config.window.title,
            &window,
            config.validation_enabled(),
            config.msaa_limit(),
        )?;

        let uploader = Uploader::new(&device)?;
        let layouts = DescriptorLayouts::new(&device)?;
        let vertex_shader = ShaderCode::load(&config.assets.vertex_shader)?;
        let fragment_shader = ShaderCode::load(&config.assets.fragment_shader)?;

        let mut textures = TextureTable::new(&device, layouts.texture)?;
        let white = DecodedImage::solid([255, 255, 255, 255]);
        let default_texture =
            uploader.upload_texture("default texture", white.width, white.height, &white.pixels)?;
        let slot = textures.add(default_texture)?;
        debug_assert_eq!(slot, DEFAULT_TEXTURE);

        let scheduler = FrameScheduler::new(config.graphics.frames_in_flight)?;
        let slots = FrameSlot::create_all(&device, scheduler.frames_in_flight())?;
        log::info!("Frames in flight: {}", scheduler.frames_in_flight());

        let mut target = RenderTarget {
            registry: ModelRegistry::new(),
            textures,
            swapchain: SwapchainManager::new(),
            slots,
            layouts,
            vertex_shader,
            fragment_shader,
            uploader,
            window,
            settings: RenderSettings::from_config(config),
            device,
        };
        target.create_swapchain()?;

        Ok(Self {
            scheduler,
            target,
            texture_cache: HashMap::new(),
        })
    }

    /// Decode and upload an image file, reusing the slot if already loaded
    pub fn load_texture(&mut self, path: &Path) -> Result<usize> {
        if let Some(&id) = self.texture_cache.get(path) {
            return Ok(id);
        }
        // Fail on a full table before decoding or touching the GPU
        self.target.textures.ensure_free_slot()?;

        let image = DecodedImage::load(path)?;
        let id = self.create_texture(&path.display().to_string(), &image)?;
        self.texture_cache.insert(path.to_path_buf(), id);
        Ok(id)
    }

    /// Upload decoded pixels into the next texture slot
    pub fn create_texture(&mut self, label: &str, image: &DecodedImage) -> Result<usize> {
        self.target.textures.ensure_free_slot()?;

        let gpu_image =
            self.target
                .uploader
                .upload_texture(label, image.width, image.height, &image.pixels)?;
        let id = self.target.textures.add(gpu_image)?;

        log::info!(
            "Texture '{}' ({}x{}) -> slot {} ({}/{} used)",
            label,
            image.width,
            image.height,
            id,
            self.target.textures.len(),
            MAX_TEXTURES
        );
        Ok(id)
    }

    /// Upload every mesh and register them as one model
    pub fn load_model(&mut self, name: &str, meshes: Vec<MeshData>) -> Result<usize> {
        let mut uploaded = Vec::with_capacity(meshes.len());
        let mut sources = Vec::with_capacity(meshes.len());

        for (i, data) in meshes.into_iter().enumerate() {
            let texture_id = match &data.texture {
                Some(path) => self.load_texture(path)?,
                None => DEFAULT_TEXTURE,
            };

            uploaded.push(Mesh::new(
                &self.target.uploader,
                &format!("{}[{}]", name, i),
                &data.vertices,
                &data.indices,
                texture_id,
            )?);
            sources.push(data.vertices);
        }

        let id = self.target.registry.add(Model::new(name, uploaded));
        if cfg!(debug_assertions) {
            self.verify_vertices(id, &sources)?;
        }
        Ok(id)
    }

    /// Read every mesh of a model back and compare it with the host copy
    fn verify_vertices(&self, model_id: usize, sources: &[Vec<Vertex>]) -> Result<()> {
        for (i, expected) in sources.iter().enumerate() {
            let read_back = self.read_back_vertices(model_id, i)?;
            anyhow::ensure!(
                &read_back == expected,
                "vertex readback mismatch for model {} mesh {}",
                model_id,
                i
            );
        }
        log::debug!("Verified {} meshes of model {}", sources.len(), model_id);
        Ok(())
    }

    /// Load an OBJ file as one model named after the file
    pub fn load_obj(&mut self, path: &Path) -> Result<usize> {
        let meshes = loader::load_obj(path)?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        self.load_model(&name, meshes)
    }

    /// Read a mesh's vertex buffer back from the GPU
    fn read_back_vertices(&self, model_id: usize, mesh_index: usize) -> Result<Vec<Vertex>> {
        let mesh = self.target.registry.model(model_id)?.mesh(mesh_index)?;
        read_vertices(&self.target.uploader, mesh)
    }

    pub fn model_count(&self) -> usize {
        self.target.registry.len()
    }

    /// Rotate every model for the given time since startup
    pub fn update_models(&mut self, elapsed_seconds: f32) {
        let speed = self.target.settings.rotation_speed;
        self.target.registry.update_all(elapsed_seconds, speed);
    }

    /// False while the window has zero area and no swapchain exists
    pub fn has_swapchain(&self) -> bool {
        self.target.swapchain.has_swapchain()
    }

    pub fn request_resize(&mut self) {
        self.scheduler.request_resize();
    }

    /// Run one frame of the acquire / record / submit / present protocol
    pub fn draw(&mut self) -> Result<FrameOutcome> {
        let frame = self.scheduler.frame_count();
        let slot = self.scheduler.current_slot();
        self.scheduler
            .draw_frame(&mut self.target)
            .with_context(|| format!("Frame {} (slot {}) failed", frame, slot))
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        log::info!("Presented {} frames", self.scheduler.frame_count());
    }
}

fn read_vertices(uploader: &Uploader, mesh: &Mesh) -> Result<Vec<Vertex>> {
    let size = mesh.vertex_count as vk::DeviceSize * std::mem::size_of::<Vertex>() as vk::DeviceSize;
    let bytes = download_buffer(uploader, &mesh.vertex_buffer, size)?;
    Ok(bytemuck::pod_collect_to_vec(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_convert_rotation_to_radians() {
        let config = Config::parse(
            r#"
            [graphics]
            present_mode = "fifo"
            depth_test = false

            [scene]
            rotation_speed_degrees = 180.0
            camera_eye = [0.0, 3.0, 1.0]
            "#,
        )
        .unwrap();

        let settings = RenderSettings::from_config(&config);
        assert!((settings.rotation_speed - std::f32::consts::PI).abs() < 1e-6);
        assert_eq!(settings.preferred_present_mode, vk::PresentModeKHR::FIFO);
        assert!(!settings.depth_test);
        assert_eq!(settings.camera_eye, Vec3::new(0.0, 3.0, 1.0));
    }
}
