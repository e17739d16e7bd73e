// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Instance creation with optional validation layers
// - Window surface creation
// - Physical device selection (queue families, extensions, surface support)
// - Logical device + graphics/present/transfer queue handles
// - Memory allocator setup

use anyhow::{Context, Result};
use ash::{ext, khr, vk, Entry};
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use parking_lot::{Mutex, MutexGuard};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle};
use std::collections::BTreeSet;
use std::ffi::{c_char, CStr, CString};
use std::mem::ManuallyDrop;
use std::sync::Arc;
use winit::window::Window;

use super::image::find_depth_format;
use crate::error::RenderError;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Device extensions every candidate GPU must expose
const DEVICE_EXTENSIONS: [&CStr; 1] = [khr::swapchain::NAME];

/// Queue family indices for the three roles the renderer uses.
///
/// Families may coincide; callers must not assume the queues are distinct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub present: u32,
    pub transfer: u32,
}

impl QueueFamilyIndices {
    /// Search the queue families of one physical device.
    ///
    /// Present prefers the graphics family when it can present. Transfer
    /// prefers a dedicated family (TRANSFER without GRAPHICS) and falls back
    /// to the graphics family, which always supports transfer.
    pub fn find(
        families: &[vk::QueueFamilyProperties],
        mut supports_present: impl FnMut(u32) -> bool,
    ) -> Option<Self> {
        let mut graphics = None;
        let mut dedicated_transfer = None;
        let mut present_capable = Vec::new();

        for (index, family) in families.iter().enumerate() {
            let index = index as u32;
            if family.queue_count == 0 {
                continue;
            }

            let flags = family.queue_flags;
            if graphics.is_none() && flags.contains(vk::QueueFlags::GRAPHICS) {
                graphics = Some(index);
            }
            if dedicated_transfer.is_none()
                && flags.contains(vk::QueueFlags::TRANSFER)
                && !flags.contains(vk::QueueFlags::GRAPHICS)
            {
                dedicated_transfer = Some(index);
            }
            if supports_present(index) {
                present_capable.push(index);
            }
        }

        let graphics = graphics?;
        let present = if present_capable.contains(&graphics) {
            graphics
        } else {
            *present_capable.first()?
        };

        Some(Self {
            graphics,
            present,
            transfer: dedicated_transfer.unwrap_or(graphics),
        })
    }

    /// Distinct family indices, one queue create info each
    pub fn unique(&self) -> Vec<u32> {
        [self.graphics, self.present, self.transfer]
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// What a surface supports on one physical device
#[derive(Debug, Clone)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceSupport {
    pub fn query(
        loader: &khr::surface::Instance,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> Result<Self> {
        unsafe {
            Ok(Self {
                capabilities: loader
                    .get_physical_device_surface_capabilities(physical_device, surface)
                    .context("Failed to query surface capabilities")?,
                formats: loader
                    .get_physical_device_surface_formats(physical_device, surface)
                    .context("Failed to query surface formats")?,
                present_modes: loader
                    .get_physical_device_surface_present_modes(physical_device, surface)
                    .context("Failed to query surface present modes")?,
            })
        }
    }

    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Capability set of the chosen GPU. Immutable once selected.
#[derive(Debug, Clone)]
pub struct PhysicalDeviceSelection {
    pub physical_device: vk::PhysicalDevice,
    pub queue_families: QueueFamilyIndices,
    pub properties: vk::PhysicalDeviceProperties,
    pub support: SurfaceSupport,
    pub msaa_samples: vk::SampleCountFlags,
}

impl PhysicalDeviceSelection {
    pub fn device_name(&self) -> String {
        self.properties
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "<unnamed>".to_string())
    }
}

/// Queue handles; may alias the same hardware queue
#[derive(Debug, Clone, Copy)]
pub struct Queues {
    pub graphics: vk::Queue,
    pub present: vk::Queue,
    pub transfer: vk::Queue,
}

/// Vulkan device wrapper with automatic cleanup
pub struct VulkanDevice {
    // Dropped by hand before the device, see Drop
    allocator: ManuallyDrop<Mutex<Allocator>>,
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub instance: ash::Instance,
    _entry: Entry,

    pub surface: vk::SurfaceKHR,
    pub surface_loader: khr::surface::Instance,

    pub queue_families: QueueFamilyIndices,
    pub queues: Queues,

    debug_utils: Option<(ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,

    pub properties: vk::PhysicalDeviceProperties,
    pub msaa_samples: vk::SampleCountFlags,
    pub depth_format: vk::Format,
}

impl VulkanDevice {
    /// Create instance, surface, device and allocator for `window`.
    ///
    /// # Arguments
    /// * `app_name` - Application name for debugging
    /// * `enable_validation` - Enable Vulkan validation layers
    /// * `msaa_limit` - Upper bound for the multisample count
    pub fn new(
        app_name: &str,
        window: &Window,
        enable_validation: bool,
        msaa_limit: vk::SampleCountFlags,
    ) -> Result<Arc<Self>> {
        log::info!("Creating Vulkan device: {}", app_name);

        let entry = unsafe { Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;

        let display_handle = window
            .display_handle()
            .context("Failed to get display handle")?
            .as_raw();
        let window_handle = window
            .window_handle()
            .context("Failed to get window handle")?
            .as_raw();

        let instance = Self::create_instance(&entry, app_name, display_handle, enable_validation)?;

        let debug_utils = if enable_validation {
            Some(Self::setup_debug_messenger(&entry, &instance)?)
        } else {
            None
        };

        let surface = unsafe {
            ash_window::create_surface(&entry, &instance, display_handle, window_handle, None)
        }
        .context("Failed to create window surface")?;
        let surface_loader = khr::surface::Instance::new(&entry, &instance);

        let selection = select_physical_device(&instance, &surface_loader, surface, msaa_limit)?;
        log::info!("Selected GPU: {}", selection.device_name());
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(selection.properties.api_version),
            vk::api_version_minor(selection.properties.api_version),
            vk::api_version_patch(selection.properties.api_version)
        );
        log::info!(
            "Queue families: graphics={} present={} transfer={}",
            selection.queue_families.graphics,
            selection.queue_families.present,
            selection.queue_families.transfer
        );
        log::info!("MSAA samples: {:?}", selection.msaa_samples);

        let (device, queues) = create_logical_device(&instance, &selection)?;

        let depth_format = find_depth_format(&instance, selection.physical_device)?;

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device: selection.physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .context("Failed to create GPU memory allocator")?;

        Ok(Arc::new(Self {
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            device,
            physical_device: selection.physical_device,
            instance,
            _entry: entry,
            surface,
            surface_loader,
            queue_families: selection.queue_families,
            queues,
            debug_utils,
            properties: selection.properties,
            msaa_samples: selection.msaa_samples,
            depth_format,
        }))
    }

    fn create_instance(
        entry: &Entry,
        app_name: &str,
        display_handle: RawDisplayHandle,
        enable_validation: bool,
    ) -> Result<ash::Instance> {
        let app_name_cstr = CString::new(app_name)?;

        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"vk-mesh-renderer")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_2);

        // Windowing extensions, plus debug utils for the messenger
        let mut extensions: Vec<*const c_char> =
            ash_window::enumerate_required_extensions(display_handle)
                .context("Failed to query required surface extensions")?
                .to_vec();
        if enable_validation {
            extensions.push(ext::debug_utils::NAME.as_ptr());
        }

        let available = unsafe { entry.enumerate_instance_extension_properties(None) }
            .context("Failed to enumerate instance extensions")?;
        let required: Vec<&CStr> = extensions
            .iter()
            .map(|&ptr| unsafe { CStr::from_ptr(ptr) })
            .collect();
        let missing = missing_names(
            available.iter().filter_map(|e| e.extension_name_as_c_str().ok()),
            &required,
        );
        if let Some(name) = missing.first() {
            return Err(RenderError::MissingInstanceExtension(name.to_string_lossy().into_owned()).into());
        }

        let layer_names = if enable_validation {
            let layers = unsafe { entry.enumerate_instance_layer_properties() }
                .context("Failed to enumerate instance layers")?;
            let missing = missing_names(
                layers.iter().filter_map(|l| l.layer_name_as_c_str().ok()),
                &[VALIDATION_LAYER],
            );
            if !missing.is_empty() {
                return Err(RenderError::MissingLayer(
                    VALIDATION_LAYER.to_string_lossy().into_owned(),
                )
                .into());
            }
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .context("Failed to create Vulkan instance")?;

        Ok(instance)
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = ext::debug_utils::Instance::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .context("Failed to set up debug messenger")?;

        Ok((debug_utils, messenger))
    }

    /// Lock the memory allocator
    pub fn allocator(&self) -> MutexGuard<'_, Allocator> {
        self.allocator.lock()
    }

    /// Re-query surface support, e.g. before building a new swapchain
    pub fn surface_support(&self) -> Result<SurfaceSupport> {
        SurfaceSupport::query(&self.surface_loader, self.physical_device, self.surface)
    }

    pub fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        unsafe {
            self.instance
                .get_physical_device_format_properties(self.physical_device, format)
        }
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }.context("device_wait_idle failed")?;
        Ok(())
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        let _ = self.wait_idle();

        unsafe {
            // The allocator frees its memory blocks through the device
            ManuallyDrop::drop(&mut self.allocator);

            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);

            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}

/// Pick the best GPU that can drive `surface`.
///
/// Fails with `RenderError::NoSuitableDevice` when no device exposes a
/// graphics queue, a present queue, the swapchain extension, at least one
/// surface format and present mode, and sampler anisotropy.
pub fn select_physical_device(
    instance: &ash::Instance,
    surface_loader: &khr::surface::Instance,
    surface: vk::SurfaceKHR,
    msaa_limit: vk::SampleCountFlags,
) -> Result<PhysicalDeviceSelection> {
    let devices = unsafe { instance.enumerate_physical_devices() }
        .context("Failed to enumerate physical devices")?;

    if devices.is_empty() {
        return Err(RenderError::NoSuitableDevice("no Vulkan-capable GPU found".into()).into());
    }

    let mut best: Option<(u32, PhysicalDeviceSelection)> = None;

    for physical_device in devices {
        let Some(selection) =
            evaluate_device(instance, surface_loader, surface, physical_device, msaa_limit)?
        else {
            continue;
        };

        let score = device_type_score(selection.properties.device_type);
        if best.as_ref().map_or(true, |(best_score, _)| score > *best_score) {
            best = Some((score, selection));
        }
    }

    best.map(|(_, selection)| selection).ok_or_else(|| {
        RenderError::NoSuitableDevice("no device satisfies queue, extension and surface requirements".into())
            .into()
    })
}

/// Returns `None` (and logs why) when the device is unsuitable
fn evaluate_device(
    instance: &ash::Instance,
    surface_loader: &khr::surface::Instance,
    surface: vk::SurfaceKHR,
    physical_device: vk::PhysicalDevice,
    msaa_limit: vk::SampleCountFlags,
) -> Result<Option<PhysicalDeviceSelection>> {
    let properties = unsafe { instance.get_physical_device_properties(physical_device) };
    let features = unsafe { instance.get_physical_device_features(physical_device) };
    let name = properties
        .device_name_as_c_str()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    if features.sampler_anisotropy != vk::TRUE {
        log::info!("Skipping {}: no sampler anisotropy", name);
        return Ok(None);
    }

    let extensions = unsafe { instance.enumerate_device_extension_properties(physical_device) }
        .context("Failed to enumerate device extensions")?;
    let missing = missing_names(
        extensions.iter().filter_map(|e| e.extension_name_as_c_str().ok()),
        &DEVICE_EXTENSIONS,
    );
    if !missing.is_empty() {
        log::info!("Skipping {}: missing extensions {:?}", name, missing);
        return Ok(None);
    }

    let families =
        unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
    let queue_families = QueueFamilyIndices::find(&families, |index| unsafe {
        surface_loader
            .get_physical_device_surface_support(physical_device, index, surface)
            .unwrap_or(false)
    });
    let Some(queue_families) = queue_families else {
        log::info!("Skipping {}: no graphics or present queue family", name);
        return Ok(None);
    };

    let support = SurfaceSupport::query(surface_loader, physical_device, surface)?;
    if !support.is_adequate() {
        log::info!("Skipping {}: surface has no formats or present modes", name);
        return Ok(None);
    }

    Ok(Some(PhysicalDeviceSelection {
        physical_device,
        queue_families,
        msaa_samples: max_usable_sample_count(&properties.limits, msaa_limit),
        properties,
        support,
    }))
}

/// Open the logical device with one queue per unique family
pub fn create_logical_device(
    instance: &ash::Instance,
    selection: &PhysicalDeviceSelection,
) -> Result<(ash::Device, Queues)> {
    let queue_priorities = [1.0];
    let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = selection
        .queue_families
        .unique()
        .into_iter()
        .map(|family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(&queue_priorities)
        })
        .collect();

    let extensions: Vec<*const c_char> = DEVICE_EXTENSIONS.iter().map(|n| n.as_ptr()).collect();
    let features = vk::PhysicalDeviceFeatures::default().sampler_anisotropy(true);

    let create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extensions)
        .enabled_features(&features);

    let device = unsafe { instance.create_device(selection.physical_device, &create_info, None) }
        .context("Failed to create logical device")?;

    let families = selection.queue_families;
    let queues = unsafe {
        Queues {
            graphics: device.get_device_queue(families.graphics, 0),
            present: device.get_device_queue(families.present, 0),
            transfer: device.get_device_queue(families.transfer, 0),
        }
    };

    Ok((device, queues))
}

/// Highest sample count usable for both color and depth, capped at `limit`
pub fn max_usable_sample_count(
    limits: &vk::PhysicalDeviceLimits,
    limit: vk::SampleCountFlags,
) -> vk::SampleCountFlags {
    let counts = limits.framebuffer_color_sample_counts & limits.framebuffer_depth_sample_counts;
    [
        vk::SampleCountFlags::TYPE_64,
        vk::SampleCountFlags::TYPE_32,
        vk::SampleCountFlags::TYPE_16,
        vk::SampleCountFlags::TYPE_8,
        vk::SampleCountFlags::TYPE_4,
        vk::SampleCountFlags::TYPE_2,
    ]
    .into_iter()
    .find(|&count| count.as_raw() <= limit.as_raw() && counts.contains(count))
    .unwrap_or(vk::SampleCountFlags::TYPE_1)
}

/// Prefer discrete over integrated over everything else
pub fn device_type_score(device_type: vk::PhysicalDeviceType) -> u32 {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
        _ => 1,
    }
}

/// Names in `required` that `available` lacks
fn missing_names<'a>(
    available: impl Iterator<Item = &'a CStr>,
    required: &[&'a CStr],
) -> Vec<&'a CStr> {
    let available: BTreeSet<&CStr> = available.collect();
    required
        .iter()
        .copied()
        .filter(|name| !available.contains(name))
        .collect()
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_single_family_serves_every_role() {
        let families = [family(
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
        )];
        let indices = QueueFamilyIndices::find(&families, |_| true).unwrap();
        assert_eq!(
            indices,
            QueueFamilyIndices {
                graphics: 0,
                present: 0,
                transfer: 0
            }
        );
        assert_eq!(indices.unique(), vec![0]);
    }

    #[test]
    fn test_dedicated_transfer_family_preferred() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::TRANSFER),
        ];
        let indices = QueueFamilyIndices::find(&families, |i| i == 0).unwrap();
        assert_eq!(indices.graphics, 0);
        assert_eq!(indices.transfer, 1);
        assert_eq!(indices.unique(), vec![0, 1]);
    }

    #[test]
    fn test_present_prefers_graphics_family() {
        let families = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS),
        ];
        let indices = QueueFamilyIndices::find(&families, |_| true).unwrap();
        assert_eq!(indices.present, 1);
        assert_eq!(indices.graphics, 1);
    }

    #[test]
    fn test_separate_present_family() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::COMPUTE),
        ];
        let indices = QueueFamilyIndices::find(&families, |i| i == 1).unwrap();
        assert_eq!(indices.graphics, 0);
        assert_eq!(indices.present, 1);
        assert_eq!(indices.transfer, 0);
    }

    #[test]
    fn test_missing_present_support_is_unsuitable() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        assert!(QueueFamilyIndices::find(&families, |_| false).is_none());
    }

    #[test]
    fn test_missing_graphics_is_unsuitable() {
        let families = [family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER)];
        assert!(QueueFamilyIndices::find(&families, |_| true).is_none());
    }

    #[test]
    fn test_empty_family_skipped() {
        let mut empty = family(vk::QueueFlags::GRAPHICS);
        empty.queue_count = 0;
        let families = [empty, family(vk::QueueFlags::GRAPHICS)];
        let indices = QueueFamilyIndices::find(&families, |_| true).unwrap();
        assert_eq!(indices.graphics, 1);
    }

    #[test]
    fn test_sample_count_capped_by_limit() {
        let limits = vk::PhysicalDeviceLimits {
            framebuffer_color_sample_counts: vk::SampleCountFlags::TYPE_1
                | vk::SampleCountFlags::TYPE_2
                | vk::SampleCountFlags::TYPE_4
                | vk::SampleCountFlags::TYPE_8,
            framebuffer_depth_sample_counts: vk::SampleCountFlags::TYPE_1
                | vk::SampleCountFlags::TYPE_2
                | vk::SampleCountFlags::TYPE_4
                | vk::SampleCountFlags::TYPE_8,
            ..Default::default()
        };
        assert_eq!(
            max_usable_sample_count(&limits, vk::SampleCountFlags::TYPE_4),
            vk::SampleCountFlags::TYPE_4
        );
        assert_eq!(
            max_usable_sample_count(&limits, vk::SampleCountFlags::TYPE_64),
            vk::SampleCountFlags::TYPE_8
        );
        assert_eq!(
            max_usable_sample_count(&limits, vk::SampleCountFlags::TYPE_1),
            vk::SampleCountFlags::TYPE_1
        );
    }

    #[test]
    fn test_sample_count_needs_color_and_depth() {
        let limits = vk::PhysicalDeviceLimits {
            framebuffer_color_sample_counts: vk::SampleCountFlags::TYPE_1
                | vk::SampleCountFlags::TYPE_8,
            framebuffer_depth_sample_counts: vk::SampleCountFlags::TYPE_1
                | vk::SampleCountFlags::TYPE_2,
            ..Default::default()
        };
        assert_eq!(
            max_usable_sample_count(&limits, vk::SampleCountFlags::TYPE_8),
            vk::SampleCountFlags::TYPE_1
        );
    }

    #[test]
    fn test_discrete_gpu_scores_highest() {
        assert!(
            device_type_score(vk::PhysicalDeviceType::DISCRETE_GPU)
                > device_type_score(vk::PhysicalDeviceType::INTEGRATED_GPU)
        );
        assert!(
            device_type_score(vk::PhysicalDeviceType::INTEGRATED_GPU)
                > device_type_score(vk::PhysicalDeviceType::CPU)
        );
    }

    #[test]
    fn test_missing_names_reports_absent_extensions() {
        let available = [c"VK_KHR_surface", c"VK_KHR_swapchain"];
        assert!(missing_names(available.into_iter(), &[c"VK_KHR_swapchain"]).is_empty());
        assert_eq!(
            missing_names(available.into_iter(), &[c"VK_KHR_swapchain", c"VK_EXT_missing"]),
            vec![c"VK_EXT_missing"]
        );
    }
}
