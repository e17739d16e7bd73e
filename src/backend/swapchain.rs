// Swapchain - Window presentation
//
// Manages the chain of images we render to and present to the screen, plus
// everything sized or formatted after it (attachments, uniforms, render pass,
// pipeline, command buffers, framebuffers). All of that is one generation:
// built together, torn down together, never patched in place.
//
// Out-of-date and suboptimal results are reported as outcomes, not errors.

use anyhow::{Context, Result};
use ash::{khr, vk};
use std::sync::Arc;

use super::descriptor::{DescriptorLayouts, UniformSets};
use super::device::SurfaceSupport;
use super::image::{create_image_view, GpuImage};
use super::pipeline::{
    framebuffer_attachments, Framebuffers, GraphicsPipeline, PipelineOptions, RenderPass,
};
use super::shader::ShaderCode;
use super::sync::CommandPool;
use super::VulkanDevice;
use crate::error::RenderError;

pub const PREFERRED_SURFACE_FORMAT: vk::Format = vk::Format::B8G8R8A8_SRGB;
pub const PREFERRED_COLOR_SPACE: vk::ColorSpaceKHR = vk::ColorSpaceKHR::SRGB_NONLINEAR;

/// Prefer sRGB BGRA8, else the first format the surface reports
pub fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
) -> Result<vk::SurfaceFormatKHR, RenderError> {
    formats
        .iter()
        .find(|f| f.format == PREFERRED_SURFACE_FORMAT && f.color_space == PREFERRED_COLOR_SPACE)
        .or_else(|| formats.first())
        .copied()
        .ok_or(RenderError::NoSurfaceFormat)
}

/// The preferred mode when supported, otherwise FIFO (always available)
pub fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    if modes.contains(&preferred) {
        preferred
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// Use the surface's extent unless it reports the u32::MAX sentinel, in
/// which case the window framebuffer size is clamped into the allowed range
pub fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, window_size: (u32, u32)) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    let (width, height) = window_size;
    vk::Extent2D {
        width: width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// One more than the minimum, capped at the maximum (0 = no maximum)
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

/// Everything decided before any swapchain object is created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainPlan {
    pub format: vk::Format,
    pub color_space: vk::ColorSpaceKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

impl SwapchainPlan {
    pub fn new(
        support: &SurfaceSupport,
        preferred_present_mode: vk::PresentModeKHR,
        window_size: (u32, u32),
    ) -> Result<Self, RenderError> {
        let surface_format = choose_surface_format(&support.formats)?;
        Ok(Self {
            format: surface_format.format,
            color_space: surface_format.color_space,
            present_mode: choose_present_mode(&support.present_modes, preferred_present_mode),
            extent: choose_extent(&support.capabilities, window_size),
            image_count: choose_image_count(&support.capabilities),
            pre_transform: support.capabilities.current_transform,
        })
    }
}

/// Result of asking the chain for the next image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// The image semaphore will be signaled; `suboptimal` asks for a rebuild
    /// after this frame
    Ready { image_index: u32, suboptimal: bool },
    /// Nothing was acquired; the chain must be rebuilt before drawing
    OutOfDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

impl PresentOutcome {
    /// Whether the chain no longer matches the surface
    pub fn is_stale(self) -> bool {
        !matches!(self, PresentOutcome::Presented)
    }
}

pub fn classify_acquire(result: ash::prelude::VkResult<(u32, bool)>) -> Result<AcquireOutcome, RenderError> {
    match result {
        Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Ready {
            image_index,
            suboptimal,
        }),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
        Err(e) => Err(RenderError::Device(e)),
    }
}

pub fn classify_present(result: ash::prelude::VkResult<bool>) -> Result<PresentOutcome, RenderError> {
    match result {
        Ok(false) => Ok(PresentOutcome::Presented),
        Ok(true) => Ok(PresentOutcome::Suboptimal),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
        Err(e) => Err(RenderError::Device(e)),
    }
}

/// The presentable images and their views
pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_loader: khr::swapchain::Device,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub plan: SwapchainPlan,
    device: Arc<VulkanDevice>,
}

impl Swapchain {
    pub fn new(device: &Arc<VulkanDevice>, plan: SwapchainPlan) -> Result<Self> {
        log::info!(
            "Creating swapchain: {}x{}, {} images, {:?}, {:?}",
            plan.extent.width,
            plan.extent.height,
            plan.image_count,
            plan.format,
            plan.present_mode
        );

        let swapchain_loader = khr::swapchain::Device::new(&device.instance, &device.device);

        // Graphics and present may be different families
        let families = device.queue_families;
        let queue_family_indices = [families.graphics, families.present];
        let mut create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(device.surface)
            .min_image_count(plan.image_count)
            .image_format(plan.format)
            .image_color_space(plan.color_space)
            .image_extent(plan.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(plan.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(plan.present_mode)
            .clipped(true);
        create_info = if families.graphics != families.present {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&queue_family_indices)
        } else {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        };

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None) }
            .context("Failed to create swapchain")?;

        let mut chain = Self {
            swapchain,
            swapchain_loader,
            images: Vec::new(),
            image_views: Vec::new(),
            plan,
            device: Arc::clone(device),
        };

        chain.images = unsafe { chain.swapchain_loader.get_swapchain_images(swapchain) }
            .context("Failed to get swapchain images")?;

        for &image in &chain.images {
            let view = create_image_view(device, image, plan.format, vk::ImageAspectFlags::COLOR, 1)?;
            chain.image_views.push(view);
        }

        log::info!("Created swapchain with {} images", chain.images.len());
        Ok(chain)
    }

    /// Acquire next image for rendering
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> Result<AcquireOutcome, RenderError> {
        classify_acquire(unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        })
    }

    /// Present rendered image to screen
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> Result<PresentOutcome, RenderError> {
        let wait_semaphores = [wait_semaphore];
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        classify_present(unsafe { self.swapchain_loader.queue_present(queue, &present_info) })
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &view in &self.image_views {
                self.device.device.destroy_image_view(view, None);
            }
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

/// Long-lived inputs every generation is built from
pub struct GenerationInputs<'a> {
    pub layouts: &'a DescriptorLayouts,
    pub vertex_shader: &'a ShaderCode,
    pub fragment_shader: &'a ShaderCode,
    pub preferred_present_mode: vk::PresentModeKHR,
    pub depth_test: bool,
    pub uniform_size: vk::DeviceSize,
}

/// One swapchain generation.
///
/// Fields drop in declaration order, which is the teardown order:
/// framebuffers, command buffers, pipeline, render pass, uniform sets,
/// per-image attachments, then the chain itself.
pub struct SwapchainState {
    pub framebuffers: Framebuffers,
    pub command_buffers: Vec<vk::CommandBuffer>,
    _command_pool: CommandPool,
    pub pipeline: GraphicsPipeline,
    pub render_pass: RenderPass,
    pub uniforms: UniformSets,
    _msaa_color: Vec<GpuImage>,
    _depth: Vec<GpuImage>,
    pub chain: Swapchain,
}

impl SwapchainState {
    pub fn new(
        device: &Arc<VulkanDevice>,
        inputs: &GenerationInputs<'_>,
        window_size: (u32, u32),
    ) -> Result<Self> {
        let support = device.surface_support()?;
        let plan = SwapchainPlan::new(&support, inputs.preferred_present_mode, window_size)?;

        let chain = Swapchain::new(device, plan)?;
        let image_count = chain.images.len();
        let extent = plan.extent;
        let samples = device.msaa_samples;

        let depth = (0..image_count)
            .map(|_| GpuImage::depth_attachment(device, extent, samples))
            .collect::<Result<Vec<_>>>()?;
        let msaa_color = if samples != vk::SampleCountFlags::TYPE_1 {
            (0..image_count)
                .map(|_| GpuImage::msaa_color_attachment(device, extent, plan.format, samples))
                .collect::<Result<Vec<_>>>()?
        } else {
            Vec::new()
        };

        let uniforms = UniformSets::new(device, inputs.layouts.frame, image_count, inputs.uniform_size)?;

        let render_pass = RenderPass::new(device, plan.format, samples)?;
        let pipeline = GraphicsPipeline::new(
            device,
            &render_pass,
            &inputs.layouts.as_array(),
            inputs.vertex_shader,
            inputs.fragment_shader,
            PipelineOptions {
                extent,
                samples,
                depth_test: inputs.depth_test,
            },
        )?;

        let command_pool = CommandPool::new(
            device,
            device.queue_families.graphics,
            vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        )?;
        let command_buffers = command_pool.allocate(image_count as u32)?;

        let attachments: Vec<Vec<vk::ImageView>> = (0..image_count)
            .map(|i| {
                framebuffer_attachments(
                    chain.image_views[i],
                    depth[i].view,
                    msaa_color.get(i).map(|image| image.view),
                )
            })
            .collect();
        let framebuffers = Framebuffers::new(device, &render_pass, &attachments, extent)?;

        Ok(Self {
            framebuffers,
            command_buffers,
            _command_pool: command_pool,
            pipeline,
            render_pass,
            uniforms,
            _msaa_color: msaa_color,
            _depth: depth,
            chain,
        })
    }

    pub fn image_count(&self) -> usize {
        self.chain.images.len()
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.chain.plan.extent
    }

    pub fn plan(&self) -> SwapchainPlan {
        self.chain.plan
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapchainPhase {
    Uninitialized,
    Live,
    StaleSurface,
}

/// Owns the current generation and the Uninitialized/Live/StaleSurface cycle
pub struct SwapchainManager {
    state: Option<SwapchainState>,
    phase: SwapchainPhase,
}

impl Default for SwapchainManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SwapchainManager {
    pub fn new() -> Self {
        Self {
            state: None,
            phase: SwapchainPhase::Uninitialized,
        }
    }

    /// Live or stale; Uninitialized means there is nothing to draw into
    pub fn has_swapchain(&self) -> bool {
        self.phase != SwapchainPhase::Uninitialized
    }

    pub fn current(&self) -> Option<&SwapchainState> {
        self.state.as_ref()
    }

    pub fn current_mut(&mut self) -> Option<&mut SwapchainState> {
        self.state.as_mut()
    }

    pub fn image_count(&self) -> usize {
        self.state.as_ref().map_or(0, SwapchainState::image_count)
    }

    /// Build the first generation. Returns false (and stays Uninitialized)
    /// when the window has zero area.
    pub fn create(
        &mut self,
        device: &Arc<VulkanDevice>,
        inputs: &GenerationInputs<'_>,
        window_size: (u32, u32),
    ) -> Result<bool> {
        if window_size.0 == 0 || window_size.1 == 0 {
            log::info!("Window has zero area, deferring swapchain creation");
            self.phase = SwapchainPhase::Uninitialized;
            return Ok(false);
        }

        self.state = Some(SwapchainState::new(device, inputs, window_size)?);
        self.phase = SwapchainPhase::Live;
        Ok(true)
    }

    /// Acquire or present reported the chain no longer matches the surface
    pub fn mark_stale(&mut self) {
        if self.phase == SwapchainPhase::Live {
            self.phase = SwapchainPhase::StaleSurface;
        }
    }

    /// Stop-the-world rebuild: wait for idle, drop the whole generation, then
    /// build a fresh one
    pub fn rebuild(
        &mut self,
        device: &Arc<VulkanDevice>,
        inputs: &GenerationInputs<'_>,
        window_size: (u32, u32),
    ) -> Result<bool> {
        device.wait_idle()?;

        let previous = self.state.take().map(|state| state.plan());
        self.phase = SwapchainPhase::Uninitialized;

        let live = self.create(device, inputs, window_size)?;
        if let (Some(previous), Some(state)) = (previous, self.state.as_ref()) {
            if previous == state.plan() {
                log::debug!("Swapchain rebuilt with unchanged plan");
            } else {
                log::info!(
                    "Swapchain rebuilt: {}x{} -> {}x{}",
                    previous.extent.width,
                    previous.extent.height,
                    state.extent().width,
                    state.extent().height
                );
            }
        }
        Ok(live)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    fn capabilities(min: u32, max: u32, current: vk::Extent2D) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: current,
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 2160,
            },
            ..Default::default()
        }
    }

    const UNDEFINED_EXTENT: vk::Extent2D = vk::Extent2D {
        width: u32::MAX,
        height: u32::MAX,
    };

    #[test]
    fn test_choose_surface_format_prefers_srgb() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let chosen = choose_surface_format(&formats).unwrap();
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(chosen.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn test_choose_surface_format_falls_back_to_first() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            // Right format, wrong color space
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT),
        ];
        let chosen = choose_surface_format(&formats).unwrap();
        assert_eq!(chosen.format, vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn test_choose_surface_format_never_fabricates() {
        let candidates = [
            vk::Format::R8G8B8A8_UNORM,
            vk::Format::B8G8R8A8_UNORM,
            vk::Format::A2B10G10R10_UNORM_PACK32,
            vk::Format::R16G16B16A16_SFLOAT,
        ];
        // Every non-empty prefix and rotation of the candidate list
        for len in 1..=candidates.len() {
            for start in 0..candidates.len() {
                let formats: Vec<_> = (0..len)
                    .map(|i| {
                        format(
                            candidates[(start + i) % candidates.len()],
                            vk::ColorSpaceKHR::SRGB_NONLINEAR,
                        )
                    })
                    .collect();
                let chosen = choose_surface_format(&formats).unwrap();
                assert!(formats
                    .iter()
                    .any(|f| f.format == chosen.format && f.color_space == chosen.color_space));
            }
        }
    }

    #[test]
    fn test_choose_surface_format_empty() {
        assert!(matches!(
            choose_surface_format(&[]),
            Err(RenderError::NoSurfaceFormat)
        ));
    }

    #[test]
    fn test_choose_present_mode() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(
            choose_present_mode(&modes, vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&modes, vk::PresentModeKHR::IMMEDIATE),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO], vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn test_choose_extent_uses_current_extent() {
        let current = vk::Extent2D {
            width: 1280,
            height: 720,
        };
        let caps = capabilities(2, 0, current);
        for window in [(1, 1), (800, 600), (10_000, 10_000), (0, 0)] {
            assert_eq!(choose_extent(&caps, window), current);
        }
    }

    #[test]
    fn test_choose_extent_clamps_undefined() {
        let caps = capabilities(2, 0, UNDEFINED_EXTENT);
        assert_eq!(
            choose_extent(&caps, (800, 600)),
            vk::Extent2D {
                width: 800,
                height: 600
            }
        );
        assert_eq!(
            choose_extent(&caps, (10_000, 0)),
            vk::Extent2D {
                width: 4096,
                height: 1
            }
        );
    }

    #[test]
    fn test_choose_image_count_unbounded() {
        let caps = capabilities(2, 0, UNDEFINED_EXTENT);
        assert_eq!(choose_image_count(&caps), 3);
    }

    #[test]
    fn test_choose_image_count_capped() {
        let caps = capabilities(2, 2, UNDEFINED_EXTENT);
        assert_eq!(choose_image_count(&caps), 2);
    }

    #[test]
    fn test_plan_is_idempotent_for_unchanged_window() {
        let support = SurfaceSupport {
            capabilities: capabilities(
                2,
                8,
                vk::Extent2D {
                    width: 1024,
                    height: 768,
                },
            ),
            formats: vec![format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR)],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
        };
        let first = SwapchainPlan::new(&support, vk::PresentModeKHR::MAILBOX, (1024, 768)).unwrap();
        let second = SwapchainPlan::new(&support, vk::PresentModeKHR::MAILBOX, (1024, 768)).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.image_count, 3);
        assert_eq!(first.extent.width, 1024);
    }

    #[test]
    fn test_classify_acquire() {
        assert_eq!(
            classify_acquire(Ok((2, false))).unwrap(),
            AcquireOutcome::Ready {
                image_index: 2,
                suboptimal: false
            }
        );
        assert_eq!(
            classify_acquire(Ok((0, true))).unwrap(),
            AcquireOutcome::Ready {
                image_index: 0,
                suboptimal: true
            }
        );
        assert_eq!(
            classify_acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            AcquireOutcome::OutOfDate
        );
        assert!(matches!(
            classify_acquire(Err(vk::Result::ERROR_DEVICE_LOST)),
            Err(RenderError::Device(vk::Result::ERROR_DEVICE_LOST))
        ));
    }

    #[test]
    fn test_classify_present() {
        assert_eq!(classify_present(Ok(false)).unwrap(), PresentOutcome::Presented);
        assert!(classify_present(Ok(true)).unwrap().is_stale());
        assert!(classify_present(Err(vk::Result::ERROR_OUT_OF_DATE_KHR))
            .unwrap()
            .is_stale());
        assert!(!PresentOutcome::Presented.is_stale());
        assert!(matches!(
            classify_present(Err(vk::Result::ERROR_SURFACE_LOST_KHR)),
            Err(RenderError::Device(_))
        ));
    }

    #[test]
    fn test_manager_starts_uninitialized() {
        let mut manager = SwapchainManager::new();
        assert_eq!(manager.phase, SwapchainPhase::Uninitialized);
        assert!(!manager.has_swapchain());
        assert_eq!(manager.image_count(), 0);
        assert!(manager.current().is_none());
        // Staleness only applies to a live chain
        manager.mark_stale();
        assert_eq!(manager.phase, SwapchainPhase::Uninitialized);
    }

    #[test]
    fn test_stale_chain_still_counts_as_present() {
        let mut manager = SwapchainManager::new();
        manager.phase = SwapchainPhase::Live;
        assert!(manager.has_swapchain());

        // A stale chain still needs frames driven through it to be rebuilt
        manager.mark_stale();
        assert_eq!(manager.phase, SwapchainPhase::StaleSurface);
        assert!(manager.has_swapchain());
    }
}
