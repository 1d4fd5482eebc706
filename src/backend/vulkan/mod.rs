//! Vulkan backend implementation using ash
//!
//! Every native object lives in a handle table behind a mutex so the device can
//! be shared by all managers; memory comes from gpu-allocator. Pipelines and
//! pipeline layouts are built by the host and registered here.

mod command;
pub mod conversion;

use crate::backend::command::GpuCommand;
use crate::backend::traits::*;
use crate::backend::types::*;
use ash::khr::{surface, swapchain};
use ash::vk;
use conversion::*;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc};
use parking_lot::Mutex;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::collections::HashMap;

struct VkBuffer {
    buffer: vk::Buffer,
    allocation: Allocation,
}

struct VkImage {
    image: vk::Image,
    /// `None` for swapchain images, which the swapchain owns
    allocation: Option<Allocation>,
}

#[derive(Clone, Copy)]
struct VkCommandBuffer {
    buffer: vk::CommandBuffer,
    pool: u64,
}

#[derive(Clone, Copy)]
struct VkDescriptorSet {
    set: vk::DescriptorSet,
    pool: u64,
}

struct VkSwapchain {
    swapchain: vk::SwapchainKHR,
    images: Vec<u64>,
    views: Vec<u64>,
}

fn lookup<T: Copy>(map: &HashMap<u64, T>, kind: &'static str, id: u64) -> BackendResult<T> {
    map.get(&id).copied().ok_or(BackendError::UnknownHandle { kind, id })
}

/// Native objects keyed by the ids handed out as handles
#[derive(Default)]
struct VkObjects {
    next_id: u64,
    buffers: HashMap<u64, VkBuffer>,
    images: HashMap<u64, VkImage>,
    image_views: HashMap<u64, vk::ImageView>,
    samplers: HashMap<u64, vk::Sampler>,
    semaphores: HashMap<u64, vk::Semaphore>,
    fences: HashMap<u64, vk::Fence>,
    render_passes: HashMap<u64, vk::RenderPass>,
    framebuffers: HashMap<u64, vk::Framebuffer>,
    command_pools: HashMap<u64, vk::CommandPool>,
    command_buffers: HashMap<u64, VkCommandBuffer>,
    descriptor_set_layouts: HashMap<u64, vk::DescriptorSetLayout>,
    descriptor_pools: HashMap<u64, vk::DescriptorPool>,
    descriptor_sets: HashMap<u64, VkDescriptorSet>,
    pipelines: HashMap<u64, vk::Pipeline>,
    pipeline_layouts: HashMap<u64, vk::PipelineLayout>,
    swapchains: HashMap<u64, VkSwapchain>,
}

impl VkObjects {
    fn id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn buffer(&self, handle: BufferHandle) -> BackendResult<vk::Buffer> {
        self.buffers
            .get(&handle.0)
            .map(|buffer| buffer.buffer)
            .ok_or(BackendError::UnknownHandle {
                kind: "buffer",
                id: handle.0,
            })
    }

    fn image(&self, handle: ImageHandle) -> BackendResult<vk::Image> {
        self.images
            .get(&handle.0)
            .map(|image| image.image)
            .ok_or(BackendError::UnknownHandle {
                kind: "image",
                id: handle.0,
            })
    }

    fn image_view(&self, handle: ImageViewHandle) -> BackendResult<vk::ImageView> {
        lookup(&self.image_views, "image view", handle.0)
    }

    fn sampler(&self, handle: SamplerHandle) -> BackendResult<vk::Sampler> {
        lookup(&self.samplers, "sampler", handle.0)
    }

    fn semaphore(&self, handle: SemaphoreHandle) -> BackendResult<vk::Semaphore> {
        lookup(&self.semaphores, "semaphore", handle.0)
    }

    fn fence(&self, handle: FenceHandle) -> BackendResult<vk::Fence> {
        lookup(&self.fences, "fence", handle.0)
    }

    fn render_pass(&self, handle: RenderPassHandle) -> BackendResult<vk::RenderPass> {
        lookup(&self.render_passes, "render pass", handle.0)
    }

    fn framebuffer(&self, handle: FramebufferHandle) -> BackendResult<vk::Framebuffer> {
        lookup(&self.framebuffers, "framebuffer", handle.0)
    }

    fn command_pool(&self, handle: CommandPoolHandle) -> BackendResult<vk::CommandPool> {
        lookup(&self.command_pools, "command pool", handle.0)
    }

    fn command_buffer(&self, handle: CommandBufferHandle) -> BackendResult<vk::CommandBuffer> {
        lookup(&self.command_buffers, "command buffer", handle.0).map(|buffer| buffer.buffer)
    }

    fn descriptor_set_layout(&self, handle: DescriptorSetLayoutHandle) -> BackendResult<vk::DescriptorSetLayout> {
        lookup(&self.descriptor_set_layouts, "descriptor set layout", handle.0)
    }

    fn descriptor_pool(&self, handle: DescriptorPoolHandle) -> BackendResult<vk::DescriptorPool> {
        lookup(&self.descriptor_pools, "descriptor pool", handle.0)
    }

    fn descriptor_set(&self, handle: DescriptorSetHandle) -> BackendResult<vk::DescriptorSet> {
        lookup(&self.descriptor_sets, "descriptor set", handle.0).map(|set| set.set)
    }

    fn pipeline(&self, handle: PipelineHandle) -> BackendResult<vk::Pipeline> {
        lookup(&self.pipelines, "pipeline", handle.0)
    }

    fn pipeline_layout(&self, handle: PipelineLayoutHandle) -> BackendResult<vk::PipelineLayout> {
        lookup(&self.pipeline_layouts, "pipeline layout", handle.0)
    }

    fn swapchain(&self, handle: SwapchainHandle) -> BackendResult<vk::SwapchainKHR> {
        self.swapchains
            .get(&handle.0)
            .map(|swapchain| swapchain.swapchain)
            .ok_or(BackendError::UnknownHandle {
                kind: "swapchain",
                id: handle.0,
            })
    }
}

/// Vulkan backend implementation
pub struct VulkanBackend {
    _entry: ash::Entry,
    instance: ash::Instance,
    surface_fn: surface::Instance,
    swapchain_fn: swapchain::Device,
    surface: vk::SurfaceKHR,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    graphics_queue: Mutex<vk::Queue>,
    graphics_queue_family: u32,
    allocator: Option<Mutex<Allocator>>,
    objects: Mutex<VkObjects>,
    /// Device limit, `None` when anisotropic filtering is unsupported
    max_anisotropy: Option<f32>,
}

impl VulkanBackend {
    /// Create an instance, surface, device and allocator for `window`
    pub fn new<W: HasDisplayHandle + HasWindowHandle>(window: &W) -> BackendResult<Self> {
        unsafe {
            let entry = ash::Entry::load().map_err(|e| BackendError::InitializationFailed(e.to_string()))?;

            let app_info = vk::ApplicationInfo::default()
                .application_name(c"Frame Graph Engine")
                .application_version(vk::make_api_version(0, 1, 0, 0))
                .engine_name(c"Frame Graph Engine")
                .engine_version(vk::make_api_version(0, 1, 0, 0))
                .api_version(vk::API_VERSION_1_2);

            let display_handle = window
                .display_handle()
                .map_err(|e| BackendError::InitializationFailed(e.to_string()))?;
            let window_handle = window
                .window_handle()
                .map_err(|e| BackendError::InitializationFailed(e.to_string()))?;

            let extensions = ash_window::enumerate_required_extensions(display_handle.as_raw())
                .map_err(|e| BackendError::InitializationFailed(e.to_string()))?;

            let instance_info = vk::InstanceCreateInfo::default()
                .application_info(&app_info)
                .enabled_extension_names(extensions);

            let instance = entry
                .create_instance(&instance_info, None)
                .map_err(|e| BackendError::InitializationFailed(e.to_string()))?;

            let surface_fn = surface::Instance::new(&entry, &instance);
            let surface = ash_window::create_surface(
                &entry,
                &instance,
                display_handle.as_raw(),
                window_handle.as_raw(),
                None,
            )
            .map_err(|e| BackendError::SurfaceCreationFailed(e.to_string()))?;

            let physical_devices = instance
                .enumerate_physical_devices()
                .map_err(|e| BackendError::InitializationFailed(e.to_string()))?;

            let (physical_device, graphics_queue_family) = physical_devices
                .into_iter()
                .find_map(|pd| Self::find_queue_family(&instance, pd, &surface_fn, surface).map(|family| (pd, family)))
                .ok_or_else(|| BackendError::InitializationFailed("No suitable physical device".into()))?;

            let properties = instance.get_physical_device_properties(physical_device);
            let supported = instance.get_physical_device_features(physical_device);
            let anisotropy = supported.sampler_anisotropy == vk::TRUE;
            log::info!(
                "Vulkan device: {}",
                properties
                    .device_name_as_c_str()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default()
            );

            let queue_priorities = [1.0f32];
            let queue_info = vk::DeviceQueueCreateInfo::default()
                .queue_family_index(graphics_queue_family)
                .queue_priorities(&queue_priorities);

            let device_extensions = [swapchain::NAME.as_ptr()];
            let device_features = vk::PhysicalDeviceFeatures::default().sampler_anisotropy(anisotropy);

            let device_info = vk::DeviceCreateInfo::default()
                .queue_create_infos(std::slice::from_ref(&queue_info))
                .enabled_extension_names(&device_extensions)
                .enabled_features(&device_features);

            let device = instance
                .create_device(physical_device, &device_info, None)
                .map_err(|e| BackendError::InitializationFailed(e.to_string()))?;

            let graphics_queue = device.get_device_queue(graphics_queue_family, 0);

            let allocator = Allocator::new(&AllocatorCreateDesc {
                instance: instance.clone(),
                device: device.clone(),
                physical_device,
                debug_settings: Default::default(),
                buffer_device_address: false,
                allocation_sizes: Default::default(),
            })
            .map_err(|e| BackendError::InitializationFailed(e.to_string()))?;

            let swapchain_fn = swapchain::Device::new(&instance, &device);

            Ok(Self {
                _entry: entry,
                instance,
                surface_fn,
                swapchain_fn,
                surface,
                physical_device,
                device,
                graphics_queue: Mutex::new(graphics_queue),
                graphics_queue_family,
                allocator: Some(Mutex::new(allocator)),
                objects: Mutex::new(VkObjects::default()),
                max_anisotropy: anisotropy.then_some(properties.limits.max_sampler_anisotropy),
            })
        }
    }

    fn find_queue_family(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        surface_fn: &surface::Instance,
        surface: vk::SurfaceKHR,
    ) -> Option<u32> {
        let queue_families = unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

        for (index, family) in queue_families.iter().enumerate() {
            let supports_graphics = family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
            let supports_surface = unsafe {
                surface_fn
                    .get_physical_device_surface_support(physical_device, index as u32, surface)
                    .unwrap_or(false)
            };

            if supports_graphics && supports_surface {
                return Some(index as u32);
            }
        }
        None
    }

    /// Get the Vulkan instance
    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Get the Vulkan device, for building pipelines and shader modules
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn graphics_queue_family(&self) -> u32 {
        self.graphics_queue_family
    }

    /// Native render pass behind `handle`, for pipeline creation
    pub fn native_render_pass(&self, handle: RenderPassHandle) -> Option<vk::RenderPass> {
        self.objects.lock().render_pass(handle).ok()
    }

    pub fn native_descriptor_set_layout(&self, handle: DescriptorSetLayoutHandle) -> Option<vk::DescriptorSetLayout> {
        self.objects.lock().descriptor_set_layout(handle).ok()
    }

    /// Take ownership of a host-built pipeline; it is destroyed with the backend
    pub fn register_pipeline(&self, pipeline: vk::Pipeline) -> PipelineHandle {
        let mut objects = self.objects.lock();
        let id = objects.id();
        objects.pipelines.insert(id, pipeline);
        PipelineHandle(id)
    }

    /// Take ownership of a host-built pipeline layout; it is destroyed with the backend
    pub fn register_pipeline_layout(&self, layout: vk::PipelineLayout) -> PipelineLayoutHandle {
        let mut objects = self.objects.lock();
        let id = objects.id();
        objects.pipeline_layouts.insert(id, layout);
        PipelineLayoutHandle(id)
    }

    fn allocator(&self) -> BackendResult<&Mutex<Allocator>> {
        self.allocator
            .as_ref()
            .ok_or_else(|| BackendError::InitializationFailed("Allocator not available".into()))
    }

    fn free_allocation(&self, allocation: Allocation) {
        if let Some(allocator) = self.allocator.as_ref() {
            if let Err(e) = allocator.lock().free(allocation) {
                log::warn!("Failed to free allocation: {}", e);
            }
        }
    }

    fn allocate(&self, name: &str, requirements: vk::MemoryRequirements, location: MemoryLocation, linear: bool) -> Result<Allocation, String> {
        self.allocator()
            .map_err(|e| e.to_string())?
            .lock()
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location: convert_memory_location(location),
                linear,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| e.to_string())
    }

    fn choose_surface_format(formats: &[vk::SurfaceFormatKHR], preferred: Format) -> Option<(vk::SurfaceFormatKHR, Format)> {
        let preferred_vk = convert_format(preferred);
        formats
            .iter()
            .find(|f| f.format == preferred_vk && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
            .map(|f| (*f, preferred))
            .or_else(|| {
                formats
                    .iter()
                    .find_map(|f| convert_format_back(f.format).map(|format| (*f, format)))
            })
    }

    fn choose_present_mode(modes: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
        if vsync {
            return vk::PresentModeKHR::FIFO;
        }
        [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
            .into_iter()
            .find(|mode| modes.contains(mode))
            .unwrap_or(vk::PresentModeKHR::FIFO)
    }

    unsafe fn create_view(&self, info: &vk::ImageViewCreateInfo<'_>) -> BackendResult<vk::ImageView> {
        self.device
            .create_image_view(info, None)
            .map_err(|e| map_result(e, BackendError::ImageCreationFailed))
    }
}

impl GpuDevice for VulkanBackend {
    fn name(&self) -> &'static str {
        "Vulkan"
    }

    fn wait_idle(&self) -> BackendResult<()> {
        unsafe { self.device.device_wait_idle() }.map_err(|e| map_result(e, BackendError::WaitFailed))
    }

    fn create_semaphore(&self) -> BackendResult<SemaphoreHandle> {
        let semaphore = unsafe { self.device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None) }
            .map_err(|e| map_result(e, BackendError::SyncCreationFailed))?;
        let mut objects = self.objects.lock();
        let id = objects.id();
        objects.semaphores.insert(id, semaphore);
        Ok(SemaphoreHandle(id))
    }

    fn destroy_semaphore(&self, semaphore: SemaphoreHandle) {
        if let Some(semaphore) = self.objects.lock().semaphores.remove(&semaphore.0) {
            unsafe { self.device.destroy_semaphore(semaphore, None) };
        }
    }

    fn create_fence(&self, signaled: bool) -> BackendResult<FenceHandle> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let fence = unsafe { self.device.create_fence(&vk::FenceCreateInfo::default().flags(flags), None) }
            .map_err(|e| map_result(e, BackendError::SyncCreationFailed))?;
        let mut objects = self.objects.lock();
        let id = objects.id();
        objects.fences.insert(id, fence);
        Ok(FenceHandle(id))
    }

    fn destroy_fence(&self, fence: FenceHandle) {
        if let Some(fence) = self.objects.lock().fences.remove(&fence.0) {
            unsafe { self.device.destroy_fence(fence, None) };
        }
    }

    fn wait_for_fences(&self, fences: &[FenceHandle], timeout_ns: u64) -> BackendResult<()> {
        let fences = {
            let objects = self.objects.lock();
            fences
                .iter()
                .map(|&fence| objects.fence(fence))
                .collect::<BackendResult<Vec<_>>>()?
        };
        unsafe { self.device.wait_for_fences(&fences, true, timeout_ns) }.map_err(|e| map_result(e, BackendError::WaitFailed))
    }

    fn reset_fences(&self, fences: &[FenceHandle]) -> BackendResult<()> {
        let fences = {
            let objects = self.objects.lock();
            fences
                .iter()
                .map(|&fence| objects.fence(fence))
                .collect::<BackendResult<Vec<_>>>()?
        };
        unsafe { self.device.reset_fences(&fences) }.map_err(|e| map_result(e, BackendError::WaitFailed))
    }

    fn is_fence_signaled(&self, fence: FenceHandle) -> BackendResult<bool> {
        let fence = self.objects.lock().fence(fence)?;
        unsafe { self.device.get_fence_status(fence) }.map_err(|e| map_result(e, BackendError::WaitFailed))
    }

    fn create_buffer(&self, desc: &BufferDesc) -> BackendResult<BufferHandle> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(desc.size.max(1))
            .usage(convert_buffer_usage(desc.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        unsafe {
            let buffer = self
                .device
                .create_buffer(&buffer_info, None)
                .map_err(|e| map_result(e, BackendError::BufferCreationFailed))?;
            let requirements = self.device.get_buffer_memory_requirements(buffer);

            let allocation = match self.allocate(desc.label.as_deref().unwrap_or("buffer"), requirements, desc.location, true) {
                Ok(allocation) => allocation,
                Err(e) => {
                    self.device.destroy_buffer(buffer, None);
                    return Err(BackendError::BufferCreationFailed(e));
                }
            };
            if let Err(e) = self
                .device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
            {
                self.device.destroy_buffer(buffer, None);
                self.free_allocation(allocation);
                return Err(map_result(e, BackendError::BufferCreationFailed));
            }

            let mut objects = self.objects.lock();
            let id = objects.id();
            objects.buffers.insert(id, VkBuffer { buffer, allocation });
            Ok(BufferHandle(id))
        }
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        let removed = self.objects.lock().buffers.remove(&buffer.0);
        if let Some(removed) = removed {
            unsafe { self.device.destroy_buffer(removed.buffer, None) };
            self.free_allocation(removed.allocation);
        }
    }

    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8]) -> BackendResult<()> {
        let mut objects = self.objects.lock();
        let target = objects.buffers.get_mut(&buffer.0).ok_or(BackendError::UnknownHandle {
            kind: "buffer",
            id: buffer.0,
        })?;
        let mapped = target
            .allocation
            .mapped_slice_mut()
            .ok_or(BackendError::NotHostVisible(buffer.0))?;
        let start = offset as usize;
        let end = start + data.len();
        if end > mapped.len() {
            return Err(BackendError::OutOfMemory);
        }
        mapped[start..end].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&self, buffer: BufferHandle, offset: u64, size: u64) -> BackendResult<Vec<u8>> {
        let objects = self.objects.lock();
        let source = objects.buffers.get(&buffer.0).ok_or(BackendError::UnknownHandle {
            kind: "buffer",
            id: buffer.0,
        })?;
        let mapped = source
            .allocation
            .mapped_slice()
            .ok_or(BackendError::NotHostVisible(buffer.0))?;
        let start = (offset as usize).min(mapped.len());
        let end = (start + size as usize).min(mapped.len());
        Ok(mapped[start..end].to_vec())
    }

    fn create_image(&self, desc: &ImageDesc) -> BackendResult<ImageHandle> {
        let flags = if desc.cube_compatible {
            vk::ImageCreateFlags::CUBE_COMPATIBLE
        } else {
            vk::ImageCreateFlags::empty()
        };
        let image_info = vk::ImageCreateInfo::default()
            .flags(flags)
            .image_type(vk::ImageType::TYPE_2D)
            .format(convert_format(desc.format))
            .extent(convert_extent_3d(desc.extent))
            .mip_levels(desc.mip_levels)
            .array_layers(desc.array_layers)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(convert_image_usage(desc.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        unsafe {
            let image = self
                .device
                .create_image(&image_info, None)
                .map_err(|e| map_result(e, BackendError::ImageCreationFailed))?;
            let requirements = self.device.get_image_memory_requirements(image);

            let allocation = match self.allocate(
                desc.label.as_deref().unwrap_or("image"),
                requirements,
                MemoryLocation::GpuOnly,
                false,
            ) {
                Ok(allocation) => allocation,
                Err(e) => {
                    self.device.destroy_image(image, None);
                    return Err(BackendError::ImageCreationFailed(e));
                }
            };
            if let Err(e) = self
                .device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
            {
                self.device.destroy_image(image, None);
                self.free_allocation(allocation);
                return Err(map_result(e, BackendError::ImageCreationFailed));
            }

            let mut objects = self.objects.lock();
            let id = objects.id();
            objects.images.insert(
                id,
                VkImage {
                    image,
                    allocation: Some(allocation),
                },
            );
            Ok(ImageHandle(id))
        }
    }

    fn destroy_image(&self, image: ImageHandle) {
        let removed = {
            let mut objects = self.objects.lock();
            match objects.images.get(&image.0) {
                Some(owned) if owned.allocation.is_some() => objects.images.remove(&image.0),
                _ => None,
            }
        };
        if let Some(VkImage {
            image,
            allocation: Some(allocation),
        }) = removed
        {
            unsafe { self.device.destroy_image(image, None) };
            self.free_allocation(allocation);
        }
    }

    fn create_image_view(&self, desc: &ImageViewDesc) -> BackendResult<ImageViewHandle> {
        let image = self.objects.lock().image(desc.image)?;
        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(convert_view_type(desc.view_type))
            .format(convert_format(desc.format))
            .components(vk::ComponentMapping::default())
            .subresource_range(convert_subresource_range(&desc.range));
        let view = unsafe { self.create_view(&view_info)? };

        let mut objects = self.objects.lock();
        let id = objects.id();
        objects.image_views.insert(id, view);
        Ok(ImageViewHandle(id))
    }

    fn destroy_image_view(&self, view: ImageViewHandle) {
        if let Some(view) = self.objects.lock().image_views.remove(&view.0) {
            unsafe { self.device.destroy_image_view(view, None) };
        }
    }

    fn create_sampler(&self, desc: &SamplerDesc) -> BackendResult<SamplerHandle> {
        let anisotropy = desc
            .max_anisotropy
            .zip(self.max_anisotropy)
            .map(|(requested, limit)| requested.min(limit));
        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(convert_filter(desc.mag_filter))
            .min_filter(convert_filter(desc.min_filter))
            .mipmap_mode(convert_mipmap_mode(desc.mipmap_filter))
            .address_mode_u(convert_address_mode(desc.address_mode))
            .address_mode_v(convert_address_mode(desc.address_mode))
            .address_mode_w(convert_address_mode(desc.address_mode))
            .anisotropy_enable(anisotropy.is_some())
            .max_anisotropy(anisotropy.unwrap_or(1.0))
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .min_lod(desc.min_lod)
            .max_lod(desc.max_lod)
            .border_color(convert_border_color(desc.border_color));

        let sampler = unsafe { self.device.create_sampler(&sampler_info, None) }
            .map_err(|e| map_result(e, BackendError::ImageCreationFailed))?;
        let mut objects = self.objects.lock();
        let id = objects.id();
        objects.samplers.insert(id, sampler);
        Ok(SamplerHandle(id))
    }

    fn destroy_sampler(&self, sampler: SamplerHandle) {
        if let Some(sampler) = self.objects.lock().samplers.remove(&sampler.0) {
            unsafe { self.device.destroy_sampler(sampler, None) };
        }
    }

    fn create_render_pass(&self, desc: &RenderPassDesc) -> BackendResult<RenderPassHandle> {
        let attachment = |desc: &AttachmentDesc| {
            let stencil_load = if desc.format.has_stencil() {
                convert_load_op(desc.load_op)
            } else {
                vk::AttachmentLoadOp::DONT_CARE
            };
            vk::AttachmentDescription::default()
                .format(convert_format(desc.format))
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(convert_load_op(desc.load_op))
                .store_op(convert_store_op(desc.store_op))
                .stencil_load_op(stencil_load)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(convert_layout(desc.initial_layout))
                .final_layout(convert_layout(desc.final_layout))
        };

        let mut attachments: Vec<vk::AttachmentDescription> = desc.color_attachments.iter().map(attachment).collect();
        let color_refs: Vec<vk::AttachmentReference> = (0..attachments.len() as u32)
            .map(|index| vk::AttachmentReference {
                attachment: index,
                layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            })
            .collect();
        let depth_ref = desc.depth_attachment.as_ref().map(|depth| {
            attachments.push(attachment(depth));
            vk::AttachmentReference {
                attachment: attachments.len() as u32 - 1,
                layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            }
        });

        let mut subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs);
        if let Some(depth_ref) = depth_ref.as_ref() {
            subpass = subpass.depth_stencil_attachment(depth_ref);
        }

        let dependencies: Vec<vk::SubpassDependency> = desc
            .dependencies
            .iter()
            .map(|dependency| {
                vk::SubpassDependency::default()
                    .src_subpass(dependency.src_subpass.unwrap_or(vk::SUBPASS_EXTERNAL))
                    .dst_subpass(dependency.dst_subpass.unwrap_or(vk::SUBPASS_EXTERNAL))
                    .src_stage_mask(convert_stage(dependency.src_stage))
                    .dst_stage_mask(convert_stage(dependency.dst_stage))
                    .src_access_mask(convert_access(dependency.src_access))
                    .dst_access_mask(convert_access(dependency.dst_access))
                    .dependency_flags(if dependency.by_region {
                        vk::DependencyFlags::BY_REGION
                    } else {
                        vk::DependencyFlags::empty()
                    })
            })
            .collect();

        let render_pass_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(std::slice::from_ref(&subpass))
            .dependencies(&dependencies);

        let render_pass = unsafe { self.device.create_render_pass(&render_pass_info, None) }
            .map_err(|e| map_result(e, BackendError::RenderPassCreationFailed))?;
        let mut objects = self.objects.lock();
        let id = objects.id();
        objects.render_passes.insert(id, render_pass);
        Ok(RenderPassHandle(id))
    }

    fn destroy_render_pass(&self, render_pass: RenderPassHandle) {
        if let Some(render_pass) = self.objects.lock().render_passes.remove(&render_pass.0) {
            unsafe { self.device.destroy_render_pass(render_pass, None) };
        }
    }

    fn create_framebuffer(&self, desc: &FramebufferDesc) -> BackendResult<FramebufferHandle> {
        let mut objects = self.objects.lock();
        let render_pass = objects.render_pass(desc.render_pass)?;
        let attachments = desc
            .attachments
            .iter()
            .map(|&view| objects.image_view(view))
            .collect::<BackendResult<Vec<_>>>()?;
        let framebuffer_info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass)
            .attachments(&attachments)
            .width(desc.extent.width)
            .height(desc.extent.height)
            .layers(desc.layers);

        let framebuffer = unsafe { self.device.create_framebuffer(&framebuffer_info, None) }
            .map_err(|e| map_result(e, BackendError::FramebufferCreationFailed))?;
        let id = objects.id();
        objects.framebuffers.insert(id, framebuffer);
        Ok(FramebufferHandle(id))
    }

    fn destroy_framebuffer(&self, framebuffer: FramebufferHandle) {
        if let Some(framebuffer) = self.objects.lock().framebuffers.remove(&framebuffer.0) {
            unsafe { self.device.destroy_framebuffer(framebuffer, None) };
        }
    }

    fn create_command_pool(&self, flags: CommandPoolFlags) -> BackendResult<CommandPoolHandle> {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .flags(convert_pool_flags(flags))
            .queue_family_index(self.graphics_queue_family);
        let pool = unsafe { self.device.create_command_pool(&pool_info, None) }
            .map_err(|e| map_result(e, BackendError::CommandCreationFailed))?;
        let mut objects = self.objects.lock();
        let id = objects.id();
        objects.command_pools.insert(id, pool);
        Ok(CommandPoolHandle(id))
    }

    fn destroy_command_pool(&self, pool: CommandPoolHandle) {
        let mut objects = self.objects.lock();
        if let Some(native) = objects.command_pools.remove(&pool.0) {
            objects.command_buffers.retain(|_, buffer| buffer.pool != pool.0);
            unsafe { self.device.destroy_command_pool(native, None) };
        }
    }

    fn allocate_command_buffers(
        &self,
        pool: CommandPoolHandle,
        level: CommandBufferLevel,
        count: u32,
    ) -> BackendResult<Vec<CommandBufferHandle>> {
        let mut objects = self.objects.lock();
        let native_pool = objects.command_pool(pool)?;
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(native_pool)
            .level(convert_level(level))
            .command_buffer_count(count);
        let buffers = unsafe { self.device.allocate_command_buffers(&alloc_info) }
            .map_err(|e| map_result(e, BackendError::CommandCreationFailed))?;

        Ok(buffers
            .into_iter()
            .map(|buffer| {
                let id = objects.id();
                objects
                    .command_buffers
                    .insert(id, VkCommandBuffer { buffer, pool: pool.0 });
                CommandBufferHandle(id)
            })
            .collect())
    }

    fn free_command_buffers(&self, pool: CommandPoolHandle, buffers: &[CommandBufferHandle]) {
        let mut objects = self.objects.lock();
        let Ok(native_pool) = objects.command_pool(pool) else {
            return;
        };
        let natives: Vec<vk::CommandBuffer> = buffers
            .iter()
            .filter_map(|buffer| objects.command_buffers.remove(&buffer.0))
            .map(|buffer| buffer.buffer)
            .collect();
        if !natives.is_empty() {
            unsafe { self.device.free_command_buffers(native_pool, &natives) };
        }
    }

    fn record_command_buffer(
        &self,
        buffer: CommandBufferHandle,
        begin: &CommandBufferBeginInfo,
        commands: &[GpuCommand],
    ) -> BackendResult<()> {
        let objects = self.objects.lock();
        let cmd = objects.command_buffer(buffer)?;

        let inheritance = match begin.inheritance {
            Some(inheritance) => {
                let framebuffer = match inheritance.framebuffer {
                    Some(framebuffer) => objects.framebuffer(framebuffer)?,
                    None => vk::Framebuffer::null(),
                };
                Some(
                    vk::CommandBufferInheritanceInfo::default()
                        .render_pass(objects.render_pass(inheritance.render_pass)?)
                        .subpass(inheritance.subpass)
                        .framebuffer(framebuffer),
                )
            }
            None => None,
        };
        let mut begin_info = vk::CommandBufferBeginInfo::default().flags(convert_begin_usage(begin.usage));
        if let Some(inheritance) = inheritance.as_ref() {
            begin_info = begin_info.inheritance_info(inheritance);
        }

        unsafe {
            self.device
                .begin_command_buffer(cmd, &begin_info)
                .map_err(|e| map_result(e, BackendError::RecordingFailed))?;
            let encoded = command::encode_commands(&self.device, cmd, commands, &objects);
            let ended = self
                .device
                .end_command_buffer(cmd)
                .map_err(|e| map_result(e, BackendError::RecordingFailed));
            encoded?;
            ended
        }
    }

    fn queue_submit(&self, submits: &[SubmitInfo], fence: Option<FenceHandle>) -> BackendResult<()> {
        let mut waits = Vec::with_capacity(submits.len());
        let mut stages = Vec::with_capacity(submits.len());
        let mut buffers = Vec::with_capacity(submits.len());
        let mut signals = Vec::with_capacity(submits.len());
        let fence = {
            let objects = self.objects.lock();
            for submit in submits {
                waits.push(
                    submit
                        .wait_semaphores
                        .iter()
                        .map(|&semaphore| objects.semaphore(semaphore))
                        .collect::<BackendResult<Vec<_>>>()?,
                );
                stages.push(submit.wait_stages.iter().map(|&stage| convert_stage(stage)).collect::<Vec<_>>());
                buffers.push(
                    submit
                        .command_buffers
                        .iter()
                        .map(|&buffer| objects.command_buffer(buffer))
                        .collect::<BackendResult<Vec<_>>>()?,
                );
                signals.push(
                    submit
                        .signal_semaphores
                        .iter()
                        .map(|&semaphore| objects.semaphore(semaphore))
                        .collect::<BackendResult<Vec<_>>>()?,
                );
            }
            match fence {
                Some(fence) => objects.fence(fence)?,
                None => vk::Fence::null(),
            }
        };

        let submit_infos: Vec<vk::SubmitInfo> = (0..submits.len())
            .map(|i| {
                vk::SubmitInfo::default()
                    .wait_semaphores(&waits[i])
                    .wait_dst_stage_mask(&stages[i])
                    .command_buffers(&buffers[i])
                    .signal_semaphores(&signals[i])
            })
            .collect();

        log::trace!("Vulkan: submitting {} batches", submit_infos.len());
        let queue = self.graphics_queue.lock();
        unsafe { self.device.queue_submit(*queue, &submit_infos, fence) }
            .map_err(|e| map_result(e, BackendError::SubmitFailed))
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[DescriptorSetLayoutBinding],
    ) -> BackendResult<DescriptorSetLayoutHandle> {
        let vk_bindings: Vec<vk::DescriptorSetLayoutBinding> = bindings
            .iter()
            .map(|binding| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(binding.binding)
                    .descriptor_type(convert_descriptor_type(binding.ty))
                    .descriptor_count(binding.count)
                    .stage_flags(convert_shader_stage(binding.stages))
            })
            .collect();
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&vk_bindings);

        let layout = unsafe { self.device.create_descriptor_set_layout(&layout_info, None) }
            .map_err(|e| map_result(e, BackendError::DescriptorCreationFailed))?;
        let mut objects = self.objects.lock();
        let id = objects.id();
        objects.descriptor_set_layouts.insert(id, layout);
        Ok(DescriptorSetLayoutHandle(id))
    }

    fn destroy_descriptor_set_layout(&self, layout: DescriptorSetLayoutHandle) {
        if let Some(layout) = self.objects.lock().descriptor_set_layouts.remove(&layout.0) {
            unsafe { self.device.destroy_descriptor_set_layout(layout, None) };
        }
    }

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        sizes: &[DescriptorPoolSize],
    ) -> BackendResult<DescriptorPoolHandle> {
        let pool_sizes: Vec<vk::DescriptorPoolSize> = sizes
            .iter()
            .map(|size| vk::DescriptorPoolSize {
                ty: convert_descriptor_type(size.ty),
                descriptor_count: size.count,
            })
            .collect();
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(&pool_sizes);

        let pool = unsafe { self.device.create_descriptor_pool(&pool_info, None) }
            .map_err(|e| map_result(e, BackendError::DescriptorCreationFailed))?;
        let mut objects = self.objects.lock();
        let id = objects.id();
        objects.descriptor_pools.insert(id, pool);
        Ok(DescriptorPoolHandle(id))
    }

    fn destroy_descriptor_pool(&self, pool: DescriptorPoolHandle) {
        let mut objects = self.objects.lock();
        if let Some(native) = objects.descriptor_pools.remove(&pool.0) {
            objects.descriptor_sets.retain(|_, set| set.pool != pool.0);
            unsafe { self.device.destroy_descriptor_pool(native, None) };
        }
    }

    fn allocate_descriptor_set(
        &self,
        pool: DescriptorPoolHandle,
        layout: DescriptorSetLayoutHandle,
    ) -> BackendResult<DescriptorSetHandle> {
        let mut objects = self.objects.lock();
        let layouts = [objects.descriptor_set_layout(layout)?];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(objects.descriptor_pool(pool)?)
            .set_layouts(&layouts);

        let set = unsafe { self.device.allocate_descriptor_sets(&alloc_info) }
            .map_err(|e| map_result(e, BackendError::DescriptorCreationFailed))?
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::DescriptorCreationFailed("no descriptor set allocated".into()))?;
        let id = objects.id();
        objects.descriptor_sets.insert(id, VkDescriptorSet { set, pool: pool.0 });
        Ok(DescriptorSetHandle(id))
    }

    fn write_image_descriptor(
        &self,
        set: DescriptorSetHandle,
        binding: u32,
        view: ImageViewHandle,
        sampler: SamplerHandle,
    ) -> BackendResult<()> {
        let objects = self.objects.lock();
        let image_info = [vk::DescriptorImageInfo::default()
            .sampler(objects.sampler(sampler)?)
            .image_view(objects.image_view(view)?)
            .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)];
        let write = vk::WriteDescriptorSet::default()
            .dst_set(objects.descriptor_set(set)?)
            .dst_binding(binding)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .image_info(&image_info);
        unsafe { self.device.update_descriptor_sets(&[write], &[]) };
        Ok(())
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> BackendResult<SwapchainInfo> {
        let swapchain_error = |e: vk::Result| map_result(e, BackendError::SwapchainCreationFailed);
        unsafe {
            let capabilities = self
                .surface_fn
                .get_physical_device_surface_capabilities(self.physical_device, self.surface)
                .map_err(swapchain_error)?;
            let formats = self
                .surface_fn
                .get_physical_device_surface_formats(self.physical_device, self.surface)
                .map_err(swapchain_error)?;
            let present_modes = self
                .surface_fn
                .get_physical_device_surface_present_modes(self.physical_device, self.surface)
                .map_err(swapchain_error)?;

            let (surface_format, format) = Self::choose_surface_format(&formats, desc.preferred_format)
                .ok_or_else(|| BackendError::SwapchainCreationFailed("No usable surface format".into()))?;
            let present_mode = Self::choose_present_mode(&present_modes, desc.vsync);

            let extent = if capabilities.current_extent.width != u32::MAX {
                capabilities.current_extent
            } else {
                vk::Extent2D {
                    width: desc.extent.width.clamp(
                        capabilities.min_image_extent.width,
                        capabilities.max_image_extent.width,
                    ),
                    height: desc.extent.height.clamp(
                        capabilities.min_image_extent.height,
                        capabilities.max_image_extent.height,
                    ),
                }
            };

            let image_count = if capabilities.max_image_count > 0 {
                capabilities.min_image_count.min(capabilities.max_image_count)
            } else {
                capabilities.min_image_count
            };

            let swapchain_info = vk::SwapchainCreateInfoKHR::default()
                .surface(self.surface)
                .min_image_count(image_count)
                .image_format(surface_format.format)
                .image_color_space(surface_format.color_space)
                .image_extent(extent)
                .image_array_layers(1)
                .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
                .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
                .pre_transform(capabilities.current_transform)
                .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
                .present_mode(present_mode)
                .clipped(true);

            let swapchain = self
                .swapchain_fn
                .create_swapchain(&swapchain_info, None)
                .map_err(swapchain_error)?;
            let images = match self.swapchain_fn.get_swapchain_images(swapchain) {
                Ok(images) => images,
                Err(e) => {
                    self.swapchain_fn.destroy_swapchain(swapchain, None);
                    return Err(swapchain_error(e));
                }
            };

            let mut views = Vec::with_capacity(images.len());
            for &image in &images {
                let view_info = vk::ImageViewCreateInfo::default()
                    .image(image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(surface_format.format)
                    .components(vk::ComponentMapping::default())
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    });
                match self.create_view(&view_info) {
                    Ok(view) => views.push(view),
                    Err(e) => {
                        for view in views {
                            self.device.destroy_image_view(view, None);
                        }
                        self.swapchain_fn.destroy_swapchain(swapchain, None);
                        return Err(e);
                    }
                }
            }

            let mut objects = self.objects.lock();
            let image_ids: Vec<u64> = images
                .into_iter()
                .map(|image| {
                    let id = objects.id();
                    objects.images.insert(id, VkImage { image, allocation: None });
                    id
                })
                .collect();
            let view_ids: Vec<u64> = views
                .into_iter()
                .map(|view| {
                    let id = objects.id();
                    objects.image_views.insert(id, view);
                    id
                })
                .collect();
            let id = objects.id();
            objects.swapchains.insert(
                id,
                VkSwapchain {
                    swapchain,
                    images: image_ids,
                    views: view_ids.clone(),
                },
            );

            log::info!(
                "Vulkan swapchain {}x{} {:?} {:?}, {} images",
                extent.width,
                extent.height,
                surface_format.format,
                present_mode,
                view_ids.len()
            );
            Ok(SwapchainInfo {
                handle: SwapchainHandle(id),
                format,
                extent: Extent2d::new(extent.width, extent.height),
                image_views: view_ids.into_iter().map(ImageViewHandle).collect(),
            })
        }
    }

    fn destroy_swapchain(&self, swapchain: SwapchainHandle) {
        let mut objects = self.objects.lock();
        let Some(removed) = objects.swapchains.remove(&swapchain.0) else {
            return;
        };
        for id in &removed.views {
            if let Some(view) = objects.image_views.remove(id) {
                unsafe { self.device.destroy_image_view(view, None) };
            }
        }
        for id in &removed.images {
            objects.images.remove(id);
        }
        unsafe { self.swapchain_fn.destroy_swapchain(removed.swapchain, None) };
    }

    fn acquire_next_image(&self, swapchain: SwapchainHandle, signal: SemaphoreHandle) -> BackendResult<u32> {
        let (swapchain, semaphore) = {
            let objects = self.objects.lock();
            (objects.swapchain(swapchain)?, objects.semaphore(signal)?)
        };
        unsafe {
            self.swapchain_fn
                .acquire_next_image(swapchain, u64::MAX, semaphore, vk::Fence::null())
        }
        .map(|(index, _suboptimal)| index)
        .map_err(|e| map_result(e, BackendError::AcquireImageFailed))
    }

    fn queue_present(
        &self,
        swapchain: SwapchainHandle,
        image_index: u32,
        wait: SemaphoreHandle,
    ) -> BackendResult<()> {
        let (swapchains, waits) = {
            let objects = self.objects.lock();
            ([objects.swapchain(swapchain)?], [objects.semaphore(wait)?])
        };
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&waits)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let queue = self.graphics_queue.lock();
        match unsafe { self.swapchain_fn.queue_present(*queue, &present_info) } {
            Ok(false) => Ok(()),
            // Suboptimal images are rebuilt like out-of-date ones
            Ok(true) => Err(BackendError::OutOfDate),
            Err(e) => Err(map_result(e, BackendError::PresentFailed)),
        }
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            let objects = std::mem::take(self.objects.get_mut());

            for (_, framebuffer) in objects.framebuffers {
                self.device.destroy_framebuffer(framebuffer, None);
            }
            for (_, view) in objects.image_views {
                self.device.destroy_image_view(view, None);
            }
            for (_, sampler) in objects.samplers {
                self.device.destroy_sampler(sampler, None);
            }
            for (_, render_pass) in objects.render_passes {
                self.device.destroy_render_pass(render_pass, None);
            }
            for (_, pool) in objects.command_pools {
                self.device.destroy_command_pool(pool, None);
            }
            for (_, pool) in objects.descriptor_pools {
                self.device.destroy_descriptor_pool(pool, None);
            }
            for (_, layout) in objects.descriptor_set_layouts {
                self.device.destroy_descriptor_set_layout(layout, None);
            }
            for (_, pipeline) in objects.pipelines {
                self.device.destroy_pipeline(pipeline, None);
            }
            for (_, layout) in objects.pipeline_layouts {
                self.device.destroy_pipeline_layout(layout, None);
            }
            for (_, semaphore) in objects.semaphores {
                self.device.destroy_semaphore(semaphore, None);
            }
            for (_, fence) in objects.fences {
                self.device.destroy_fence(fence, None);
            }
            for (_, swapchain) in objects.swapchains {
                self.swapchain_fn.destroy_swapchain(swapchain.swapchain, None);
            }

            for (_, buffer) in objects.buffers {
                self.device.destroy_buffer(buffer.buffer, None);
                self.free_allocation(buffer.allocation);
            }
            for (_, image) in objects.images {
                if let Some(allocation) = image.allocation {
                    self.device.destroy_image(image.image, None);
                    self.free_allocation(allocation);
                }
            }

            // The allocator must go before the device
            drop(self.allocator.take());

            self.device.destroy_device(None);
            self.surface_fn.destroy_surface(self.surface, None);
            self.instance.destroy_instance(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface_format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    #[test]
    fn test_surface_format_prefers_requested() {
        let formats = [
            surface_format(vk::Format::R8G8B8A8_UNORM),
            surface_format(vk::Format::B8G8R8A8_UNORM),
        ];
        let (chosen, format) = VulkanBackend::choose_surface_format(&formats, Format::Bgra8Unorm).unwrap();
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_UNORM);
        assert_eq!(format, Format::Bgra8Unorm);
    }

    #[test]
    fn test_surface_format_falls_back_to_first_known() {
        let formats = [
            surface_format(vk::Format::A2B10G10R10_UNORM_PACK32),
            surface_format(vk::Format::R8G8B8A8_SRGB),
        ];
        let (_, format) = VulkanBackend::choose_surface_format(&formats, Format::Bgra8Unorm).unwrap();
        assert_eq!(format, Format::Rgba8UnormSrgb);
    }

    #[test]
    fn test_present_mode_selection() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(VulkanBackend::choose_present_mode(&modes, true), vk::PresentModeKHR::FIFO);
        assert_eq!(VulkanBackend::choose_present_mode(&modes, false), vk::PresentModeKHR::IMMEDIATE);
        assert_eq!(
            VulkanBackend::choose_present_mode(&[vk::PresentModeKHR::FIFO], false),
            vk::PresentModeKHR::FIFO
        );
    }
}
