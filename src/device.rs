//! Graphics device.
//!
//! [`Device`] creates every resource, submits command lists
//! and reclaims what submissions kept alive once their fences signal.
//! Submissions complete strictly in order: polling stops at the first
//! submission whose fence is not signaled yet.

use std::{
    collections::VecDeque,
    convert::TryFrom as _,
    fmt::{self, Debug},
    marker::PhantomData,
    sync::Arc,
    time::Duration,
};

use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::{
    backend::headless::{HeadlessConfig, HeadlessDriver},
    buffer::{write_host_memory, Buffer, BufferInfo, BufferUsage},
    command::{
        check_location, record_texture_copy, CommandList, CommandListShared, TextureCopyRegion,
        TextureLocation,
    },
    descriptor::DescriptorPoolManager,
    dimensions::Extent3,
    fence::Fence,
    format::{AspectFlags, PixelFormat},
    framebuffer::{Framebuffer, FramebufferInfo},
    native::{
        self, BufferCopy, DeviceInfo, Driver, FormatFeatureFlags, ImageKind, ImageLayout,
        ImageSubresourceRange, ImageUsageFlags, MappedPtr, MemoryBlock, ObjectType, ResultCode,
        SampleCountFlags,
    },
    pipeline::{ComputePipelineInfo, GraphicsPipelineInfo, Pipeline},
    refcount::ResourceRefCount,
    resource::{ResourceLayout, ResourceLayoutInfo, ResourceSet, ResourceSetInfo},
    sampler::{Filter, Sampler, SamplerInfo},
    shader::{Shader, ShaderInfo},
    swapchain::{Swapchain, SwapchainInfo},
    texture::{Texture, TextureInfo, TextureSampleCount, TextureType, TextureUsage},
    view::{TextureView, TextureViewInfo},
    Error,
};

/// Shared command pools created with the device.
/// More are created on demand and destroyed once their submission completes.
const CACHED_SHARED_POOLS: usize = 4;

/// Staging buffers up to this size are kept for reuse after completion.
const MAX_REUSED_STAGING_BUFFER_SIZE: u64 = 512;

const MIN_STAGING_BUFFER_SIZE: u64 = 64;

/// Smallest width and height of a newly created staging texture.
const MIN_STAGING_TEXTURE_EXTENT: u32 = 256;

/// Options the device is created with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GraphicsDeviceOptions {
    /// Enables validation layers. Error-severity messages are escalated to [`Error::Validation`].
    pub debug: bool,

    /// Main swapchain presents in sync with vertical blank.
    pub sync_to_vertical_blank: bool,

    /// Depth target format of the main swapchain framebuffer.
    pub swapchain_depth_format: Option<PixelFormat>,

    /// Main swapchain uses sRGB color images.
    pub swapchain_srgb_format: bool,

    /// Makes clip space Y point up when the driver can flip viewports.
    pub prefer_standard_clip_space_y_direction: bool,

    /// Device is created together with a swapchain for the main window.
    pub has_main_swapchain: bool,
}

/// Filter for mipmap generation per pixel format.
pub(crate) struct FilterCache {
    driver: Arc<dyn Driver>,
    filters: Mutex<HashMap<PixelFormat, Filter>>,
}

impl FilterCache {
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        FilterCache {
            driver,
            filters: Mutex::new(HashMap::new()),
        }
    }

    /// Linear if optimal tiling of the format supports linear filtering.
    pub fn filter(&self, format: PixelFormat) -> Filter {
        let driver = &self.driver;
        *self.filters.lock().entry(format).or_insert_with(|| {
            let properties = driver.format_properties(format);
            if properties
                .optimal_tiling
                .contains(FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR)
            {
                Filter::Linear
            } else {
                Filter::Nearest
            }
        })
    }
}

impl Debug for FilterCache {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("FilterCache")
            .field("filters", &*self.filters.lock())
            .finish()
    }
}

/// Command pool with single command buffer for one-off transfers recorded by the device.
#[derive(Debug)]
struct SharedCommandPool {
    pool: native::CommandPool,
    cb: native::CommandBuffer,
    cached: bool,
}

impl SharedCommandPool {
    fn new(driver: &dyn Driver, cached: bool) -> Result<Self, Error> {
        let pool = driver.create_command_pool(true)?;
        let cb = match driver.allocate_command_buffer(pool) {
            Ok(cb) => cb,
            Err(err) => {
                driver.destroy_command_pool(pool);
                return Err(err.into());
            }
        };
        tracing::trace!("Shared command pool {:?} created, cached: {}", pool, cached);
        Ok(SharedCommandPool { pool, cb, cached })
    }
}

/// Submission waiting for its tracking fence.
struct FenceSubmission {
    fence: native::Fence,
    list: Option<(Arc<CommandListShared>, Arc<ResourceRefCount>)>,
    cb: native::CommandBuffer,
}

#[derive(Default)]
struct StagingResources {
    available_textures: Vec<Texture>,
    available_buffers: Vec<Buffer>,
    submitted_textures: HashMap<native::CommandBuffer, Texture>,
    submitted_buffers: HashMap<native::CommandBuffer, Buffer>,
}

/// How mapped memory is going to be accessed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MapMode {
    Read,
    Write,
    ReadWrite,
}

impl MapMode {
    fn readable(self) -> bool {
        matches!(self, MapMode::Read | MapMode::ReadWrite)
    }

    fn writable(self) -> bool {
        matches!(self, MapMode::Write | MapMode::ReadWrite)
    }
}

/// Resource to map into host address space.
#[derive(Clone, Copy, Debug)]
pub enum MapTarget<'a> {
    /// Whole buffer. It must be `DYNAMIC` or `STAGING`.
    Buffer(&'a Buffer),

    /// One subresource of a staging texture.
    Texture {
        texture: &'a Texture,
        mip_level: u32,
        array_layer: u32,
    },
}

impl<'a> From<&'a Buffer> for MapTarget<'a> {
    fn from(buffer: &'a Buffer) -> Self {
        MapTarget::Buffer(buffer)
    }
}

/// Host view of a mapped buffer or texture subresource.
///
/// Memory that is not persistently mapped is unmapped when this is dropped.
pub struct MappedResource<'a> {
    driver: Arc<dyn Driver>,
    memory: MemoryBlock,
    mapped_here: bool,
    ptr: MappedPtr,
    mode: MapMode,
    size: u64,
    row_pitch: u64,
    depth_pitch: u64,
    marker: PhantomData<&'a ()>,
}

impl MappedResource<'_> {
    #[inline]
    pub fn mode(&self) -> MapMode {
        self.mode
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Bytes between rows of a mapped texture. Buffer size for buffers.
    #[inline]
    pub fn row_pitch(&self) -> u64 {
        self.row_pitch
    }

    /// Bytes between depth slices of a mapped texture. Buffer size for buffers.
    #[inline]
    pub fn depth_pitch(&self) -> u64 {
        self.depth_pitch
    }

    /// Pointer to the first mapped byte.
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    fn check_range(&self, offset: u64, len: usize) -> Result<(), Error> {
        if offset + len as u64 > self.size {
            return Err(Error::invalid(format!(
                "Access of {} bytes at {} is outside of mapped range of {} bytes",
                len, offset, self.size
            )));
        }
        Ok(())
    }

    /// Copies `data` into mapped memory at `offset`.
    pub fn write(&self, offset: u64, data: &[u8]) -> Result<(), Error> {
        if !self.mode.writable() {
            return Err(Error::invalid("Resource is not mapped for writing"));
        }
        self.check_range(offset, data.len())?;

        // Range is checked above.
        unsafe {
            std::ptr::copy_nonoverlapping(
                data.as_ptr(),
                self.ptr.add(offset).as_ptr(),
                data.len(),
            );
        }
        Ok(())
    }

    /// Copies mapped memory at `offset` into `data`.
    pub fn read(&self, offset: u64, data: &mut [u8]) -> Result<(), Error> {
        if !self.mode.readable() {
            return Err(Error::invalid("Resource is not mapped for reading"));
        }
        self.check_range(offset, data.len())?;

        // Range is checked above.
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.ptr.add(offset).as_ptr(),
                data.as_mut_ptr(),
                data.len(),
            );
        }
        Ok(())
    }
}

impl Drop for MappedResource<'_> {
    fn drop(&mut self) {
        if self.mapped_here {
            self.driver.unmap_memory(&self.memory);
        }
    }
}

impl Debug for MappedResource<'_> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("MappedResource")
            .field("ptr", &self.ptr)
            .field("mode", &self.mode)
            .field("size", &self.size)
            .field("row_pitch", &self.row_pitch)
            .field("depth_pitch", &self.depth_pitch)
            .finish()
    }
}

/// Limits reported for a format used with a given texture type and usage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelFormatProperties {
    pub max_width: u32,
    pub max_height: u32,
    pub max_depth: u32,
    pub max_mip_levels: u32,
    pub max_array_layers: u32,
    pub sample_counts: SampleCountFlags,
}

impl PixelFormatProperties {
    pub fn is_sample_count_supported(&self, count: TextureSampleCount) -> bool {
        self.sample_counts
            .contains(SampleCountFlags::from_bits_truncate(count.count()))
    }
}

/// Resource whose native objects receive a debug name.
#[derive(Debug)]
pub enum NamedResource<'a> {
    Buffer(&'a Buffer),
    CommandList(&'a mut CommandList),
    Fence(&'a Fence),
    Framebuffer(&'a Framebuffer),
    Pipeline(&'a Pipeline),
    ResourceLayout(&'a ResourceLayout),
    ResourceSet(&'a ResourceSet),
    Sampler(&'a Sampler),
    Shader(&'a Shader),
    Swapchain(&'a mut Swapchain),
    Texture(&'a Texture),
    TextureView(&'a TextureView),
}

macro_rules! named_resource_from {
    ($($variant:ident: $ty:ty,)*) => {
        $(
            impl<'a> From<$ty> for NamedResource<'a> {
                fn from(resource: $ty) -> Self {
                    NamedResource::$variant(resource)
                }
            }
        )*
    };
}

named_resource_from! {
    Buffer: &'a Buffer,
    CommandList: &'a mut CommandList,
    Fence: &'a Fence,
    Framebuffer: &'a Framebuffer,
    Pipeline: &'a Pipeline,
    ResourceLayout: &'a ResourceLayout,
    ResourceSet: &'a ResourceSet,
    Sampler: &'a Sampler,
    Shader: &'a Shader,
    Swapchain: &'a mut Swapchain,
    Texture: &'a Texture,
    TextureView: &'a TextureView,
}

/// Graphics device.
///
/// Owns the queue, the descriptor pools and the pools of recycled fences,
/// staging resources and shared command pools.
pub struct Device {
    driver: Arc<dyn Driver>,
    options: GraphicsDeviceOptions,

    /// Held across native submits and presents.
    /// Shared with swapchains, which lock it before their own state.
    queue: Arc<Mutex<()>>,
    submissions: Mutex<VecDeque<FenceSubmission>>,
    available_fences: Mutex<Vec<native::Fence>>,

    shared_pools: Mutex<Vec<SharedCommandPool>>,
    submitted_pools: Mutex<HashMap<native::CommandBuffer, SharedCommandPool>>,
    staging: Mutex<StagingResources>,

    descriptors: Arc<DescriptorPoolManager>,
    filters: Arc<FilterCache>,
    main_swapchain: Option<Swapchain>,
}

impl Device {
    /// Creates device on top of `driver`.
    ///
    /// With `has_main_swapchain` set, `main_swapchain` describes the window
    /// and the options provide vsync, depth and sRGB settings of its swapchain.
    #[tracing::instrument(skip(driver))]
    pub fn new(
        driver: Arc<dyn Driver>,
        options: GraphicsDeviceOptions,
        main_swapchain: Option<SwapchainInfo>,
    ) -> Result<Self, Error> {
        let main_swapchain = match (options.has_main_swapchain, main_swapchain) {
            (true, Some(info)) => Some(SwapchainInfo {
                depth_format: options.swapchain_depth_format,
                sync_to_vertical_blank: options.sync_to_vertical_blank,
                color_srgb: options.swapchain_srgb_format,
                ..info
            }),
            (false, None) => None,
            (true, None) => {
                return Err(Error::invalid(
                    "Main swapchain is requested but no swapchain description is given",
                ))
            }
            (false, Some(_)) => {
                return Err(Error::invalid(
                    "Swapchain description is given but `has_main_swapchain` is not set",
                ))
            }
        };

        let info = driver.info();
        tracing::info!(
            "Creating device on {} ({}), API {}.{}.{}",
            info.device_name,
            info.driver_name,
            info.api_version.0,
            info.api_version.1,
            info.api_version.2,
        );

        let descriptors = Arc::new(DescriptorPoolManager::new(driver.clone())?);
        let filters = Arc::new(FilterCache::new(driver.clone()));

        let mut device = Device {
            driver,
            options,
            queue: Arc::new(Mutex::new(())),
            submissions: Mutex::new(VecDeque::new()),
            available_fences: Mutex::new(Vec::new()),
            shared_pools: Mutex::new(Vec::with_capacity(CACHED_SHARED_POOLS)),
            submitted_pools: Mutex::new(HashMap::new()),
            staging: Mutex::new(StagingResources::default()),
            descriptors,
            filters,
            main_swapchain: None,
        };

        for _ in 0..CACHED_SHARED_POOLS {
            let pool = SharedCommandPool::new(&*device.driver, true)?;
            device.shared_pools.lock().push(pool);
        }

        if let Some(info) = main_swapchain {
            device.main_swapchain = Some(Swapchain::new(&device.driver, &device.queue, &info)?);
        }

        Ok(device)
    }

    /// Creates device on the in-process headless driver.
    pub fn headless(config: HeadlessConfig, options: GraphicsDeviceOptions) -> Result<Self, Error> {
        Device::new(Arc::new(HeadlessDriver::new(config)), options, None)
    }

    /// Creates device on Vulkan.
    #[cfg(feature = "vulkan")]
    pub fn vulkan(
        options: GraphicsDeviceOptions,
        main_swapchain: Option<SwapchainInfo>,
    ) -> Result<Self, Error> {
        let source = main_swapchain.as_ref().map(|info| &info.source);
        let driver = crate::backend::vulkan::VulkanDriver::new(&options, source)?;
        Device::new(Arc::new(driver), options, main_swapchain)
    }

    #[inline]
    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    #[inline]
    pub fn info(&self) -> &DeviceInfo {
        self.driver.info()
    }

    #[inline]
    pub fn options(&self) -> &GraphicsDeviceOptions {
        &self.options
    }

    #[inline]
    pub fn descriptor_pool_manager(&self) -> &Arc<DescriptorPoolManager> {
        &self.descriptors
    }

    #[inline]
    pub fn main_swapchain(&self) -> Option<&Swapchain> {
        self.main_swapchain.as_ref()
    }

    #[inline]
    pub fn main_swapchain_mut(&mut self) -> Option<&mut Swapchain> {
        self.main_swapchain.as_mut()
    }

    /// Clip space Y axis points down, as native Vulkan has it.
    pub fn is_clip_space_y_inverted(&self) -> bool {
        !self.info().standard_clip_space_y
    }

    pub fn get_uniform_buffer_min_offset_alignment(&self) -> u64 {
        self.info().limits.min_uniform_buffer_offset_alignment
    }

    pub fn get_structured_buffer_min_offset_alignment(&self) -> u64 {
        self.info().limits.min_storage_buffer_offset_alignment
    }

    /// Raises error-severity validation message recorded by the driver since the last call.
    fn validated<T>(&self, result: Result<T, Error>) -> Result<T, Error> {
        match self.driver.take_validation_error() {
            Some(message) => Err(Error::Validation { message }),
            None => result,
        }
    }

    // Resource factory

    #[tracing::instrument(skip(self))]
    pub fn create_buffer(&self, info: BufferInfo) -> Result<Buffer, Error> {
        self.validated(Buffer::new(&self.driver, info))
    }

    /// Creates texture and prepares it for its first use.
    /// Render targets and depth targets are cleared, sampled textures
    /// are moved into shader-read-only layout.
    #[tracing::instrument(skip(self))]
    pub fn create_texture(&self, info: TextureInfo) -> Result<Texture, Error> {
        let texture = Texture::new(&self.driver, info)?;

        if !texture.shared().is_staging() {
            if info.usage.contains(TextureUsage::RENDER_TARGET) {
                self.clear_color_texture(&texture, [0.0; 4])?;
            } else if info.usage.contains(TextureUsage::DEPTH_STENCIL) {
                self.clear_depth_texture(&texture, 0.0, 0)?;
            }
            if info.usage.contains(TextureUsage::SAMPLED) {
                self.transition_image_layout(&texture, ImageLayout::ShaderReadOnlyOptimal)?;
            }
        }

        self.validated(Ok(texture))
    }

    #[tracing::instrument(skip(self))]
    pub fn create_texture_view(&self, info: TextureViewInfo<'_>) -> Result<TextureView, Error> {
        self.validated(TextureView::new(&self.driver, info))
    }

    #[tracing::instrument(skip(self))]
    pub fn create_sampler(&self, info: SamplerInfo) -> Result<Sampler, Error> {
        self.validated(Sampler::new(&self.driver, info))
    }

    #[tracing::instrument(skip(self))]
    pub fn create_shader(&self, info: &ShaderInfo) -> Result<Shader, Error> {
        self.validated(Shader::new(&self.driver, info))
    }

    #[tracing::instrument(skip(self))]
    pub fn create_resource_layout(&self, info: &ResourceLayoutInfo) -> Result<ResourceLayout, Error> {
        self.validated(ResourceLayout::new(&self.driver, info))
    }

    #[tracing::instrument(skip(self))]
    pub fn create_resource_set(&self, info: &ResourceSetInfo<'_>) -> Result<ResourceSet, Error> {
        self.validated(ResourceSet::new(&self.driver, &self.descriptors, info))
    }

    #[tracing::instrument(skip(self))]
    pub fn create_graphics_pipeline(&self, info: &GraphicsPipelineInfo<'_>) -> Result<Pipeline, Error> {
        self.validated(Pipeline::new_graphics(&self.driver, info))
    }

    #[tracing::instrument(skip(self))]
    pub fn create_compute_pipeline(&self, info: &ComputePipelineInfo<'_>) -> Result<Pipeline, Error> {
        self.validated(Pipeline::new_compute(&self.driver, info))
    }

    #[tracing::instrument(skip(self))]
    pub fn create_framebuffer(&self, info: &FramebufferInfo<'_>) -> Result<Framebuffer, Error> {
        self.validated(Framebuffer::new(&self.driver, info))
    }

    #[tracing::instrument(skip(self))]
    pub fn create_swapchain(&self, info: &SwapchainInfo) -> Result<Swapchain, Error> {
        self.validated(Swapchain::new(&self.driver, &self.queue, info))
    }

    #[tracing::instrument(skip(self))]
    pub fn create_fence(&self, signaled: bool) -> Result<Fence, Error> {
        self.validated(Fence::new(&self.driver, signaled))
    }

    #[tracing::instrument(skip(self))]
    pub fn create_command_list(&self) -> Result<CommandList, Error> {
        self.validated(CommandList::new(&self.driver, self.filters.clone()))
    }

    // Submission

    /// Submits ended command list.
    ///
    /// Completed submissions are reclaimed first.
    /// `fence` is signaled once the commands complete.
    #[tracing::instrument(skip(self, list))]
    pub fn submit_commands(&self, list: &mut CommandList, fence: Option<&Fence>) -> Result<(), Error> {
        let cb = list.submission_buffer()?;
        let result = self.submit_command_buffer(cb, fence.map(Fence::handle), || {
            Some(list.command_buffer_submitted(cb))
        });
        self.validated(result)
    }

    fn submit_command_buffer(
        &self,
        cb: native::CommandBuffer,
        user_fence: Option<native::Fence>,
        on_submitted: impl FnOnce() -> Option<(Arc<CommandListShared>, Arc<ResourceRefCount>)>,
    ) -> Result<(), Error> {
        self.check_submitted_fences()?;

        let fence = self.take_submission_fence()?;
        let submitted = {
            let _queue = self.queue.lock();
            match user_fence {
                None => self.driver.queue_submit(&[cb], fence),
                Some(user_fence) => self
                    .driver
                    .queue_submit(&[cb], user_fence)
                    .and_then(|()| self.driver.queue_submit(&[], fence)),
            }
        };

        if let Err(err) = submitted {
            self.available_fences.lock().push(fence);
            return Err(err.into());
        }

        tracing::trace!("Command buffer {:?} submitted with fence {:?}", cb, fence);
        let list = on_submitted();
        self.submissions
            .lock()
            .push_back(FenceSubmission { fence, list, cb });
        Ok(())
    }

    fn take_submission_fence(&self) -> Result<native::Fence, Error> {
        let cached = self.available_fences.lock().pop();
        match cached {
            Some(fence) => Ok(fence),
            None => Ok(self.driver.create_fence(false)?),
        }
    }

    /// Completes submissions in order until one is found still executing.
    pub fn check_submitted_fences(&self) -> Result<(), Error> {
        loop {
            let completed = {
                let mut submissions = self.submissions.lock();
                let head = submissions.front().map(|submission| submission.fence);
                match head {
                    Some(fence) if self.driver.fence_status(fence)? => submissions.pop_front(),
                    _ => None,
                }
            };

            match completed {
                Some(submission) => self.complete_submission(submission)?,
                None => return Ok(()),
            }
        }
    }

    /// Number of submissions whose fences were not observed signaled yet.
    pub fn pending_submissions(&self) -> usize {
        self.submissions.lock().len()
    }

    fn complete_submission(&self, submission: FenceSubmission) -> Result<(), Error> {
        let FenceSubmission { fence, list, cb } = submission;
        tracing::trace!("Submission of {:?} completed", cb);

        if let Some((list, ref_count)) = list {
            list.command_buffer_completed(cb);
            ref_count.decrement();
        }
        self.release_submission_resources(cb);

        match self.driver.reset_fences(&[fence]) {
            Ok(()) => {
                self.available_fences.lock().push(fence);
                Ok(())
            }
            Err(err) => {
                self.driver.destroy_fence(fence);
                Err(err.into())
            }
        }
    }

    /// Returns staging resources and shared command pool used by `cb`.
    fn release_submission_resources(&self, cb: native::CommandBuffer) {
        let dropped_buffer = {
            let mut staging = self.staging.lock();
            if let Some(texture) = staging.submitted_textures.remove(&cb) {
                staging.available_textures.push(texture);
            }
            match staging.submitted_buffers.remove(&cb) {
                Some(buffer) if buffer.size() <= MAX_REUSED_STAGING_BUFFER_SIZE => {
                    staging.available_buffers.push(buffer);
                    None
                }
                buffer => buffer,
            }
        };
        drop(dropped_buffer);

        let pool = self.submitted_pools.lock().remove(&cb);
        if let Some(pool) = pool {
            self.return_shared_pool(pool);
        }
    }

    // Shared command pools

    fn begin_shared_commands(&self) -> Result<SharedCommandPool, Error> {
        let cached = self.shared_pools.lock().pop();
        let pool = match cached {
            Some(pool) => pool,
            None => SharedCommandPool::new(&*self.driver, false)?,
        };

        if let Err(err) = self.driver.begin_command_buffer(pool.cb, true) {
            self.return_shared_pool(pool);
            return Err(err.into());
        }
        Ok(pool)
    }

    /// Ends and submits shared commands.
    /// Resources registered for the command buffer are released if submission fails.
    fn submit_shared_commands(&self, pool: SharedCommandPool) -> Result<(), Error> {
        let cb = pool.cb;
        let ended = self.driver.end_command_buffer(cb);
        self.submitted_pools.lock().insert(cb, pool);

        let result = ended
            .map_err(Error::from)
            .and_then(|()| self.submit_command_buffer(cb, None, || None));
        if result.is_err() {
            self.release_submission_resources(cb);
        }
        result
    }

    fn return_shared_pool(&self, pool: SharedCommandPool) {
        if pool.cached {
            match self.driver.reset_command_pool(pool.pool) {
                Ok(()) => {
                    self.shared_pools.lock().push(pool);
                    return;
                }
                Err(err) => {
                    tracing::error!("Failed to reset shared command pool {:?}: {}", pool.pool, err);
                }
            }
        }
        tracing::trace!("Shared command pool {:?} destroyed", pool.pool);
        self.driver.destroy_command_pool(pool.pool);
    }

    fn clear_color_texture(&self, texture: &Texture, color: [f32; 4]) -> Result<(), Error> {
        let shared = texture.shared();
        let layers = shared.actual_array_layers();
        let mips = texture.mip_levels();

        let pool = self.begin_shared_commands()?;
        shared.transition_image_layout(pool.cb, 0, mips, 0, layers, ImageLayout::TransferDstOptimal);
        self.driver.cmd_clear_color_image(
            pool.cb,
            shared.image(),
            ImageLayout::TransferDstOptimal,
            color,
            &ImageSubresourceRange {
                aspect: AspectFlags::COLOR,
                base_mip_level: 0,
                level_count: mips,
                base_array_layer: 0,
                layer_count: layers,
            },
        );
        let layout = if shared.is_swapchain_texture() {
            ImageLayout::PresentSrc
        } else {
            ImageLayout::ColorAttachmentOptimal
        };
        shared.transition_image_layout(pool.cb, 0, mips, 0, layers, layout);
        self.submit_shared_commands(pool)
    }

    fn clear_depth_texture(&self, texture: &Texture, depth: f32, stencil: u32) -> Result<(), Error> {
        let shared = texture.shared();
        let layers = shared.actual_array_layers();
        let mips = texture.mip_levels();

        let pool = self.begin_shared_commands()?;
        shared.transition_image_layout(pool.cb, 0, mips, 0, layers, ImageLayout::TransferDstOptimal);
        self.driver.cmd_clear_depth_stencil_image(
            pool.cb,
            shared.image(),
            ImageLayout::TransferDstOptimal,
            depth,
            stencil,
            &ImageSubresourceRange {
                aspect: shared.aspect(),
                base_mip_level: 0,
                level_count: mips,
                base_array_layer: 0,
                layer_count: layers,
            },
        );
        shared.transition_image_layout(
            pool.cb,
            0,
            mips,
            0,
            layers,
            ImageLayout::DepthStencilAttachmentOptimal,
        );
        self.submit_shared_commands(pool)
    }

    fn transition_image_layout(&self, texture: &Texture, layout: ImageLayout) -> Result<(), Error> {
        let shared = texture.shared();
        let pool = self.begin_shared_commands()?;
        shared.transition_image_layout(
            pool.cb,
            0,
            texture.mip_levels(),
            0,
            shared.actual_array_layers(),
            layout,
        );
        self.submit_shared_commands(pool)
    }

    // Transfers

    /// Writes `data` into the buffer at `offset`.
    ///
    /// Persistently mapped buffers are written directly.
    /// Others are updated through a staging buffer copy submitted right away.
    #[tracing::instrument(skip(self, data), fields(len = data.len()))]
    pub fn update_buffer(&self, buffer: &Buffer, offset: u64, data: &[u8]) -> Result<(), Error> {
        if offset + data.len() as u64 > buffer.size() {
            return Err(Error::invalid(format!(
                "Update of {} bytes at {} exceeds buffer size {}",
                data.len(),
                offset,
                buffer.size()
            )));
        }
        if data.is_empty() {
            return Ok(());
        }

        if buffer.memory().mapped.is_some() {
            return write_host_memory(&*self.driver, buffer.memory(), offset, data);
        }

        let staging = self.take_staging_buffer(data.len() as u64)?;
        if let Err(err) = write_host_memory(&*self.driver, staging.memory(), 0, data) {
            self.staging.lock().available_buffers.push(staging);
            return Err(err);
        }

        let pool = match self.begin_shared_commands() {
            Ok(pool) => pool,
            Err(err) => {
                self.staging.lock().available_buffers.push(staging);
                return Err(err);
            }
        };
        self.driver.cmd_copy_buffer(
            pool.cb,
            staging.handle(),
            buffer.handle(),
            &[BufferCopy {
                src_offset: 0,
                dst_offset: offset,
                size: data.len() as u64,
            }],
        );
        self.staging.lock().submitted_buffers.insert(pool.cb, staging);

        let result = self.submit_shared_commands(pool);
        self.validated(result)
    }

    fn take_staging_buffer(&self, size: u64) -> Result<Buffer, Error> {
        {
            let mut staging = self.staging.lock();
            if let Some(index) = staging
                .available_buffers
                .iter()
                .position(|buffer| buffer.size() >= size)
            {
                return Ok(staging.available_buffers.swap_remove(index));
            }
        }

        let size = size.max(MIN_STAGING_BUFFER_SIZE);
        let buffer = Buffer::new(&self.driver, BufferInfo::new(size, BufferUsage::STAGING))?;
        tracing::trace!("Staging buffer {:?} of {} bytes created", buffer, size);
        Ok(buffer)
    }

    /// Writes tightly packed texel data into a region of one texture subresource.
    ///
    /// Staging textures are written through their mapping.
    /// Optimal textures are updated through a staging texture copy submitted right away.
    #[tracing::instrument(skip(self, data), fields(len = data.len()))]
    pub fn update_texture(
        &self,
        texture: &Texture,
        data: &[u8],
        location: TextureLocation,
        extent: Extent3,
    ) -> Result<(), Error> {
        let shared = texture.shared();
        check_location(shared, &location, extent, 1, "destination")?;

        let format = shared.format();
        let region_size = format.region_size(extent.width, extent.height, extent.depth);
        if (data.len() as u64) < region_size {
            return Err(Error::invalid(format!(
                "Texture update of {:?} texels of {:?} requires {} bytes, got {}",
                extent,
                format,
                region_size,
                data.len()
            )));
        }

        if shared.is_staging() {
            return self.write_staging_region(texture, data, location, extent);
        }

        let staging = self.take_staging_texture(extent, format)?;
        if let Err(err) = self.write_staging_region(&staging, data, TextureLocation::default(), extent)
        {
            self.staging.lock().available_textures.push(staging);
            return Err(err);
        }

        let pool = match self.begin_shared_commands() {
            Ok(pool) => pool,
            Err(err) => {
                self.staging.lock().available_textures.push(staging);
                return Err(err);
            }
        };
        record_texture_copy(
            &*self.driver,
            pool.cb,
            staging.shared(),
            shared,
            &TextureCopyRegion {
                src: TextureLocation::default(),
                dst: location,
                extent,
                layer_count: 1,
            },
        );
        self.staging.lock().submitted_textures.insert(pool.cb, staging);

        let result = self.submit_shared_commands(pool);
        self.validated(result)
    }

    fn write_staging_region(
        &self,
        texture: &Texture,
        data: &[u8],
        location: TextureLocation,
        extent: Extent3,
    ) -> Result<(), Error> {
        let format = texture.format();
        let block = format.block_size();
        let texel_bytes = u64::from(format.size_in_bytes());
        let src_row_pitch = u64::from(format.row_pitch(extent.width));
        let rows = format.num_rows(extent.height);
        let src_depth_pitch = src_row_pitch * u64::from(rows);

        let mapped = self.map(
            MapTarget::Texture {
                texture,
                mip_level: location.mip_level,
                array_layer: location.array_layer,
            },
            MapMode::Write,
        )?;

        let base = u64::from(location.z) * mapped.depth_pitch()
            + u64::from(location.y / block) * mapped.row_pitch()
            + u64::from(location.x / block) * texel_bytes;

        for z in 0..u64::from(extent.depth) {
            for row in 0..u64::from(rows) {
                let src = (z * src_depth_pitch + row * src_row_pitch) as usize;
                let dst = base + z * mapped.depth_pitch() + row * mapped.row_pitch();
                mapped.write(dst, &data[src..src + src_row_pitch as usize])?;
            }
        }
        Ok(())
    }

    /// Reuses the first free staging texture large enough for the region,
    /// reinterpreted to the region's dimensions and format.
    fn take_staging_texture(&self, extent: Extent3, format: PixelFormat) -> Result<Texture, Error> {
        let size = format.region_size(extent.width, extent.height, extent.depth);
        {
            let mut staging = self.staging.lock();
            if let Some(index) = staging.available_textures.iter().position(|texture| {
                texture
                    .shared()
                    .memory()
                    .map_or(false, |memory| memory.size >= size)
            }) {
                let texture = staging.available_textures.swap_remove(index);
                texture.shared().set_staging_dimensions(extent, format);
                return Ok(texture);
            }
        }

        let texture = Texture::new(
            &self.driver,
            TextureInfo::texture_3d(
                extent.width.max(MIN_STAGING_TEXTURE_EXTENT),
                extent.height.max(MIN_STAGING_TEXTURE_EXTENT),
                extent.depth,
                1,
                format,
                TextureUsage::STAGING,
            ),
        )?;
        texture.shared().set_staging_dimensions(extent, format);
        tracing::trace!("Staging texture {:?} created", texture);
        Ok(texture)
    }

    /// Maps host-visible buffer or staging texture subresource.
    /// Persistently mapped memory is used as is.
    pub fn map<'a>(
        &self,
        target: impl Into<MapTarget<'a>>,
        mode: MapMode,
    ) -> Result<MappedResource<'a>, Error> {
        let (memory, offset, size, row_pitch, depth_pitch) = match target.into() {
            MapTarget::Buffer(buffer) => {
                if !buffer.usage().is_host_visible() {
                    return Err(Error::invalid(
                        "Only dynamic or staging buffers can be mapped",
                    ));
                }
                let size = buffer.size();
                (*buffer.memory(), 0, size, size, size)
            }
            MapTarget::Texture {
                texture,
                mip_level,
                array_layer,
            } => {
                let shared = texture.shared();
                if !shared.is_staging() {
                    return Err(Error::invalid("Only staging textures can be mapped"));
                }
                if mip_level >= texture.mip_levels() || array_layer >= shared.actual_array_layers()
                {
                    return Err(Error::invalid(format!(
                        "Subresource mip {} layer {} is out of texture bounds",
                        mip_level, array_layer
                    )));
                }
                let memory = shared
                    .memory()
                    .copied()
                    .ok_or_else(|| Error::invalid("Texture has no memory to map"))?;
                let layout = shared.subresource_layout(mip_level, array_layer);
                (
                    memory,
                    layout.offset,
                    layout.size,
                    layout.row_pitch,
                    layout.depth_pitch,
                )
            }
        };

        let (base, mapped_here) = match memory.mapped {
            Some(ptr) => (ptr, false),
            None => (self.driver.map_memory(&memory)?, true),
        };

        if offset + size > memory.size {
            if mapped_here {
                self.driver.unmap_memory(&memory);
            }
            return Err(Error::invalid("Mapped range exceeds memory block"));
        }

        Ok(MappedResource {
            driver: self.driver.clone(),
            memory,
            mapped_here,
            // Offset is within the block, checked above.
            ptr: unsafe { base.add(offset) },
            mode,
            size,
            row_pitch,
            depth_pitch,
            marker: PhantomData,
        })
    }

    /// Unmaps memory mapped by [`Device::map`].
    pub fn unmap(&self, mapped: MappedResource<'_>) {
        drop(mapped);
    }

    // Synchronization

    /// Returns `false` if the fence is not signaled within `timeout`.
    pub fn wait_for_fence(&self, fence: &Fence, timeout: Duration) -> Result<bool, Error> {
        self.wait_for_fences(&[fence], true, timeout)
    }

    /// Waits for all or any of the fences.
    /// Returns `false` if the wait timed out.
    pub fn wait_for_fences(
        &self,
        fences: &[&Fence],
        wait_all: bool,
        timeout: Duration,
    ) -> Result<bool, Error> {
        let handles: smallvec::SmallVec<[native::Fence; 8]> =
            fences.iter().map(|fence| fence.handle()).collect();
        let timeout = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);
        let result = self
            .driver
            .wait_for_fences(&handles, wait_all, timeout)
            .map_err(Error::from);
        self.validated(result)
    }

    pub fn reset_fence(&self, fence: &Fence) -> Result<(), Error> {
        fence.reset()
    }

    /// Waits until the queue is idle and completes every submission.
    #[tracing::instrument(skip(self))]
    pub fn wait_for_idle(&self) -> Result<(), Error> {
        {
            let _queue = self.queue.lock();
            self.driver.queue_wait_idle()?;
        }
        let result = self.check_submitted_fences();
        self.validated(result)
    }

    // Presentation

    /// Presents the current image of `swapchain` and acquires the next one.
    #[tracing::instrument(skip(self))]
    pub fn swap_buffers(&self, swapchain: &Swapchain) -> Result<(), Error> {
        let result = swapchain.shared().present();
        self.validated(result)
    }

    pub fn swap_main_buffers(&self) -> Result<(), Error> {
        let swapchain = self
            .main_swapchain
            .as_ref()
            .ok_or_else(|| Error::invalid("Device has no main swapchain"))?;
        self.swap_buffers(swapchain)
    }

    pub fn resize_main_window(&self, width: u32, height: u32) -> Result<(), Error> {
        let swapchain = self
            .main_swapchain
            .as_ref()
            .ok_or_else(|| Error::invalid("Device has no main swapchain"))?;
        let result = swapchain.resize(width, height);
        self.validated(result)
    }

    // Queries

    /// Names native objects of the resource for debugging tools.
    /// Names are applied only when debug markers are available.
    pub fn set_resource_name<'a>(&self, resource: impl Into<NamedResource<'a>>, name: &str) {
        let driver = &*self.driver;
        let enabled = driver.info().debug_markers;

        match resource.into() {
            NamedResource::CommandList(list) => list.set_name(name),
            NamedResource::Swapchain(swapchain) => {
                swapchain.set_name_field(name);
                if enabled {
                    driver.set_object_name(ObjectType::Swapchain, swapchain.native().0, name);
                }
            }
            _ if !enabled => {}
            NamedResource::Buffer(buffer) => {
                driver.set_object_name(ObjectType::Buffer, buffer.handle().0, name)
            }
            NamedResource::Fence(fence) => {
                driver.set_object_name(ObjectType::Fence, fence.handle().0, name)
            }
            NamedResource::Framebuffer(framebuffer) => {
                driver.set_object_name(ObjectType::Framebuffer, framebuffer.handle().0, name)
            }
            NamedResource::Pipeline(pipeline) => {
                driver.set_object_name(ObjectType::Pipeline, pipeline.handle().0, name);
                driver.set_object_name(
                    ObjectType::PipelineLayout,
                    pipeline.shared().layout().0,
                    &format!("{}_PipelineLayout", name),
                );
            }
            NamedResource::ResourceLayout(layout) => driver.set_object_name(
                ObjectType::DescriptorSetLayout,
                layout.set_layout().0,
                name,
            ),
            NamedResource::ResourceSet(set) => {
                driver.set_object_name(ObjectType::DescriptorSet, set.descriptor_set().0, name)
            }
            NamedResource::Sampler(sampler) => {
                driver.set_object_name(ObjectType::Sampler, sampler.handle().0, name)
            }
            NamedResource::Shader(shader) => {
                driver.set_object_name(ObjectType::ShaderModule, shader.module().0, name)
            }
            NamedResource::Texture(texture) => {
                if texture.shared().is_staging() {
                    driver.set_object_name(ObjectType::Buffer, texture.staging_buffer().0, name)
                } else {
                    driver.set_object_name(ObjectType::Image, texture.image().0, name)
                }
            }
            NamedResource::TextureView(view) => {
                driver.set_object_name(ObjectType::ImageView, view.handle().0, name)
            }
        }
    }

    /// Highest sample count supported for sampled color or depth targets of `format`.
    pub fn get_sample_count_limit(
        &self,
        format: PixelFormat,
        depth: bool,
    ) -> Result<TextureSampleCount, Error> {
        let usage = ImageUsageFlags::SAMPLED
            | if depth {
                ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT
            } else {
                ImageUsageFlags::COLOR_ATTACHMENT
            };

        let counts = match self
            .driver
            .image_format_properties(format, ImageKind::D2, usage, false)
        {
            Ok(properties) => properties.sample_counts,
            Err(err) if err.code == ResultCode::FormatNotSupported => SampleCountFlags::COUNT_1,
            Err(err) => return Err(err.into()),
        };

        Ok([
            (SampleCountFlags::COUNT_32, TextureSampleCount::Count32),
            (SampleCountFlags::COUNT_16, TextureSampleCount::Count16),
            (SampleCountFlags::COUNT_8, TextureSampleCount::Count8),
            (SampleCountFlags::COUNT_4, TextureSampleCount::Count4),
            (SampleCountFlags::COUNT_2, TextureSampleCount::Count2),
        ]
        .iter()
        .find(|(flag, _)| counts.contains(*flag))
        .map_or(TextureSampleCount::Count1, |&(_, count)| count))
    }

    /// Returns `None` if the format cannot be used with given type and usage.
    pub fn get_pixel_format_support(
        &self,
        format: PixelFormat,
        ty: TextureType,
        usage: TextureUsage,
    ) -> Result<Option<PixelFormatProperties>, Error> {
        let result = self.driver.image_format_properties(
            format,
            ty.to_native(),
            usage.to_native(),
            usage.contains(TextureUsage::CUBEMAP),
        );

        match result {
            Ok(properties) => Ok(Some(PixelFormatProperties {
                max_width: properties.max_extent.width,
                max_height: properties.max_extent.height,
                max_depth: properties.max_extent.depth,
                max_mip_levels: properties.max_mip_levels,
                max_array_layers: properties.max_array_layers,
                sample_counts: properties.sample_counts,
            })),
            Err(err) if err.code == ResultCode::FormatNotSupported => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Filter used by mipmap generation for `format`.
    pub fn mipmap_filter(&self, format: PixelFormat) -> Filter {
        self.filters.filter(format)
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        if let Err(err) = self.wait_for_idle() {
            tracing::error!("Failed to wait for idle device on destruction: {}", err);
        }

        let remaining = std::mem::take(&mut *self.submissions.lock());
        debug_assert!(
            remaining.is_empty(),
            "Device destroyed with {} pending submissions",
            remaining.len()
        );
        for submission in remaining {
            if let Some((list, ref_count)) = submission.list {
                list.command_buffer_completed(submission.cb);
                ref_count.decrement();
            }
            self.release_submission_resources(submission.cb);
            self.driver.destroy_fence(submission.fence);
        }

        for fence in self.available_fences.lock().drain(..) {
            self.driver.destroy_fence(fence);
        }

        self.main_swapchain = None;
        self.descriptors.destroy_all();

        {
            let mut staging = self.staging.lock();
            staging.available_textures.clear();
            staging.available_buffers.clear();
        }

        for pool in self.shared_pools.lock().drain(..) {
            self.driver.destroy_command_pool(pool.pool);
        }

        if let Err(err) = self.driver.device_wait_idle() {
            tracing::error!("Failed to wait for idle device: {}", err);
        }
        tracing::debug!("Device destroyed");
    }
}

impl Debug for Device {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        if fmt.alternate() {
            fmt.debug_struct("Device")
                .field("driver", &self.driver)
                .field("options", &self.options)
                .field("pending_submissions", &self.submissions.lock().len())
                .field("available_fences", &self.available_fences.lock().len())
                .field("main_swapchain", &self.main_swapchain)
                .finish()
        } else {
            write!(fmt, "Device({})", self.info().device_name)
        }
    }
}
