//! In-process driver that performs no GPU work.
//!
//! Every command is recorded per command buffer and every submission is logged.
//! Fences are signaled on submit, or later by the owner of the driver
//! when [`HeadlessConfig::signal_fences_on_submit`] is off.
//! Memory is backed by heap allocations and buffer-to-buffer copies are executed
//! on submission, so uploads can be observed with [`HeadlessDriver::buffer_contents`].
//! A single simulated surface lets swapchain logic run without a window.

use std::{
    collections::VecDeque,
    fmt::{self, Debug},
    ptr::NonNull,
};

use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::{
    descriptor::DescriptorResourceCounts,
    dimensions::{Extent2, Extent3, Rect, Viewport},
    format::PixelFormat,
    native::{
        AcquireResult, Buffer, BufferCopy, BufferCreateInfo, BufferImageCopy, ClearAttachment,
        ClearRect, ClearValue, ColorSpace, CommandBuffer, CommandPool,
        ComputePipelineCreateInfo, DescriptorPool, DescriptorSet, DescriptorSetLayout,
        DescriptorSetLayoutBinding, DescriptorWrite, DeviceFeatures, DeviceInfo, DeviceLimits,
        Driver, Fence, FormatFeatureFlags, FormatProperties, Framebuffer, FramebufferCreateInfo,
        GraphicsPipelineCreateInfo, Image, ImageBarrier, ImageBlit, ImageCopy, ImageCreateInfo,
        ImageFormatProperties, ImageKind, ImageLayout, ImageResolve, ImageSubresourceRange,
        ImageUsageFlags, ImageView, ImageViewCreateInfo, MappedPtr, Memory, MemoryBarrier,
        MemoryBlock, MemoryRequest, MemoryRequirements, NativeError, ObjectType, Pipeline,
        PipelineBindPoint, PipelineLayout, PipelineStageFlags, PresentMode, PresentResult,
        RenderPass, RenderPassBeginInfo, RenderPassCreateInfo, ResultCode, SampleCountFlags,
        Sampler, ShaderModule, Surface, SurfaceCapabilities, SurfaceFormat, SurfaceSource,
        Swapchain, SwapchainCreateInfo,
    },
    sampler::{Filter, SamplerInfo},
    IndexFormat,
};

/// Kinds of objects counted by the headless driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HeadlessObject {
    Buffer,
    Image,
    ImageView,
    Sampler,
    ShaderModule,
    DescriptorSetLayout,
    DescriptorPool,
    DescriptorSet,
    PipelineLayout,
    Pipeline,
    RenderPass,
    Framebuffer,
    CommandPool,
    CommandBuffer,
    Fence,
    Memory,
    Surface,
    Swapchain,
}

/// Simulated presentation surface.
#[derive(Clone, Debug, PartialEq)]
pub struct HeadlessSurfaceConfig {
    /// Graphics queue can present to the surface.
    pub supported: bool,
    pub capabilities: SurfaceCapabilities,
    pub formats: Vec<SurfaceFormat>,
    pub present_modes: Vec<PresentMode>,
}

impl Default for HeadlessSurfaceConfig {
    fn default() -> Self {
        HeadlessSurfaceConfig {
            supported: true,
            capabilities: SurfaceCapabilities {
                min_image_count: 2,
                max_image_count: 8,
                current_extent: Extent2::new(800, 600),
                min_extent: Extent2::new(1, 1),
                max_extent: Extent2::new(4096, 4096),
            },
            formats: vec![
                SurfaceFormat {
                    format: Some(PixelFormat::BGRA8Srgb),
                    color_space: ColorSpace::SrgbNonlinear,
                },
                SurfaceFormat {
                    format: Some(PixelFormat::BGRA8Unorm),
                    color_space: ColorSpace::SrgbNonlinear,
                },
            ],
            present_modes: vec![
                PresentMode::Fifo,
                PresentMode::FifoRelaxed,
                PresentMode::Mailbox,
                PresentMode::Immediate,
            ],
        }
    }
}

/// Configuration of the headless driver.
#[derive(Clone, Debug, PartialEq)]
pub struct HeadlessConfig {
    pub device_name: String,
    pub limits: DeviceLimits,
    pub features: DeviceFeatures,
    pub debug_markers: bool,
    pub standard_clip_space_y: bool,

    /// Fences passed to submissions are signaled right away.
    /// Otherwise they stay unsignaled until waited on or signaled explicitly.
    pub signal_fences_on_submit: bool,

    /// Formats whose optimal tiling lacks linear filtering.
    pub unfilterable_formats: Vec<PixelFormat>,

    /// Formats reported as not supported for images.
    pub unsupported_formats: Vec<PixelFormat>,

    /// Sample counts supported by every image format.
    pub sample_counts: SampleCountFlags,

    pub surface: HeadlessSurfaceConfig,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        HeadlessConfig {
            device_name: "Headless Device".to_owned(),
            limits: DeviceLimits {
                min_uniform_buffer_offset_alignment: 256,
                min_storage_buffer_offset_alignment: 64,
                max_sampler_anisotropy: 16.0,
                max_viewports: 16,
            },
            features: DeviceFeatures {
                geometry_shader: true,
                tessellation_shader: true,
                multi_viewport: true,
                draw_indirect_first_instance: true,
                fill_mode_non_solid: true,
                sampler_anisotropy: true,
                depth_clamp: true,
                independent_blend: true,
                shader_float64: false,
            },
            debug_markers: true,
            standard_clip_space_y: false,
            signal_fences_on_submit: true,
            unfilterable_formats: Vec::new(),
            unsupported_formats: Vec::new(),
            sample_counts: SampleCountFlags::COUNT_1
                | SampleCountFlags::COUNT_2
                | SampleCountFlags::COUNT_4
                | SampleCountFlags::COUNT_8,
            surface: HeadlessSurfaceConfig::default(),
        }
    }
}

/// Command recorded into a headless command buffer.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    BeginRenderPass {
        render_pass: RenderPass,
        framebuffer: Framebuffer,
        area: Rect,
        clear_values: Vec<ClearValue>,
    },
    EndRenderPass,
    ClearAttachments {
        attachments: Vec<ClearAttachment>,
        rects: Vec<ClearRect>,
    },
    PipelineBarrier {
        src_stages: PipelineStageFlags,
        dst_stages: PipelineStageFlags,
        memory_barriers: Vec<MemoryBarrier>,
        image_barriers: Vec<ImageBarrier>,
    },
    BindPipeline {
        bind_point: PipelineBindPoint,
        pipeline: Pipeline,
    },
    BindDescriptorSets {
        bind_point: PipelineBindPoint,
        layout: PipelineLayout,
        first_set: u32,
        sets: Vec<DescriptorSet>,
        dynamic_offsets: Vec<u32>,
    },
    BindVertexBuffer {
        binding: u32,
        buffer: Buffer,
        offset: u64,
    },
    BindIndexBuffer {
        buffer: Buffer,
        offset: u64,
        format: IndexFormat,
    },
    SetViewport {
        index: u32,
        viewport: Viewport,
    },
    SetScissor {
        index: u32,
        rect: Rect,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    },
    DrawIndirect {
        buffer: Buffer,
        offset: u64,
        draw_count: u32,
        stride: u32,
    },
    DrawIndexedIndirect {
        buffer: Buffer,
        offset: u64,
        draw_count: u32,
        stride: u32,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    DispatchIndirect {
        buffer: Buffer,
        offset: u64,
    },
    CopyBuffer {
        src: Buffer,
        dst: Buffer,
        regions: Vec<BufferCopy>,
    },
    CopyImage {
        src: Image,
        src_layout: ImageLayout,
        dst: Image,
        dst_layout: ImageLayout,
        regions: Vec<ImageCopy>,
    },
    CopyBufferToImage {
        src: Buffer,
        dst: Image,
        dst_layout: ImageLayout,
        regions: Vec<BufferImageCopy>,
    },
    CopyImageToBuffer {
        src: Image,
        src_layout: ImageLayout,
        dst: Buffer,
        regions: Vec<BufferImageCopy>,
    },
    BlitImage {
        src: Image,
        src_layout: ImageLayout,
        dst: Image,
        dst_layout: ImageLayout,
        regions: Vec<ImageBlit>,
        filter: Filter,
    },
    ResolveImage {
        src: Image,
        src_layout: ImageLayout,
        dst: Image,
        dst_layout: ImageLayout,
        regions: Vec<ImageResolve>,
    },
    ClearColorImage {
        image: Image,
        layout: ImageLayout,
        color: [f32; 4],
        range: ImageSubresourceRange,
    },
    ClearDepthStencilImage {
        image: Image,
        layout: ImageLayout,
        depth: f32,
        stencil: u32,
        range: ImageSubresourceRange,
    },
    DebugMarkerBegin {
        name: String,
    },
    DebugMarkerEnd,
    DebugMarkerInsert {
        name: String,
    },
}

/// Logged queue submission.
#[derive(Clone, Debug, PartialEq)]
pub struct SubmissionRecord {
    pub command_buffers: Vec<CommandBuffer>,
    pub fence: Fence,

    /// Commands of every command buffer, in submission order.
    pub commands: Vec<Command>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RecordingState {
    Initial,
    Recording,
    Executable,
}

#[derive(Debug)]
struct CommandBufferState {
    pool: CommandPool,
    state: RecordingState,
    commands: Vec<Command>,
}

/// Heap allocation standing in for device memory.
#[derive(Debug)]
struct HostAllocation {
    ptr: MappedPtr,
    len: usize,
}

impl HostAllocation {
    fn new(size: u64) -> Self {
        let len = size.max(1) as usize;
        let data = vec![0u8; len].into_boxed_slice();
        let raw = Box::into_raw(data) as *mut u8;

        // Box pointers are never null.
        let ptr = MappedPtr::new(unsafe { NonNull::new_unchecked(raw) });
        HostAllocation { ptr, len }
    }
}

impl Drop for HostAllocation {
    fn drop(&mut self) {
        // Pointer and length come from `Box::into_raw` in `new`.
        unsafe {
            drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(
                self.ptr.as_ptr(),
                self.len,
            )));
        }
    }
}

#[derive(Debug)]
struct SwapchainRecord {
    info: SwapchainCreateInfo,
    images: Vec<Image>,
    next_image: u32,
}

#[derive(Default)]
struct State {
    next_handle: u64,
    live: HashMap<HeadlessObject, usize>,

    memory: HashMap<Memory, HostAllocation>,
    buffers: HashMap<Buffer, (u64, Option<(Memory, u64)>)>,
    images: HashMap<Image, ImageCreateInfo>,
    map_calls: usize,
    unmap_calls: usize,

    command_buffers: HashMap<CommandBuffer, CommandBufferState>,
    allocated_command_buffers: usize,
    submissions: Vec<SubmissionRecord>,

    fences: HashMap<Fence, bool>,

    /// Fences of submissions the simulated queue has not finished yet.
    pending: VecDeque<Fence>,
    wait_idle_calls: usize,

    descriptor_writes: HashMap<DescriptorSet, Vec<DescriptorWrite>>,
    object_names: Vec<(ObjectType, u64, String)>,

    surfaces: HashMap<Surface, SurfaceSource>,
    surface_lost: bool,
    swapchains: HashMap<Swapchain, SwapchainRecord>,
    swapchain_infos: Vec<SwapchainCreateInfo>,
    acquire_results: VecDeque<AcquireResult>,
    present_results: VecDeque<PresentResult>,
    presents: Vec<(Swapchain, u32)>,

    /// Overrides configured surface capabilities.
    surface_capabilities: Option<SurfaceCapabilities>,

    /// One-shot failures keyed by native call name.
    failures: HashMap<&'static str, ResultCode>,

    validation_error: Option<String>,
}

impl State {
    fn create(&mut self, kind: HeadlessObject) -> u64 {
        self.next_handle += 1;
        *self.live.entry(kind).or_insert(0) += 1;
        self.next_handle
    }

    fn destroy(&mut self, kind: HeadlessObject, handle: u64) {
        if handle == 0 {
            return;
        }
        match self.live.get_mut(&kind) {
            Some(count) if *count > 0 => *count -= 1,
            _ => self.report(format!("{:?} {:#x} destroyed more times than created", kind, handle)),
        }
    }

    fn report(&mut self, message: String) {
        tracing::error!("Headless validation: {}", message);
        if self.validation_error.is_none() {
            self.validation_error = Some(message);
        }
    }

    fn record(&mut self, cb: CommandBuffer, command: Command) {
        match self.command_buffers.get_mut(&cb) {
            Some(state) if state.state == RecordingState::Recording => state.commands.push(command),
            Some(_) => self.report(format!("{:?} recorded into {:?} outside of recording", command, cb)),
            None => self.report(format!("{:?} recorded into unknown {:?}", command, cb)),
        }
    }

    fn signal(&mut self, fence: Fence) {
        if let Some(signaled) = self.fences.get_mut(&fence) {
            *signaled = true;
        }
        self.pending.retain(|&pending| pending != fence);
    }

    fn finish_all(&mut self) {
        while let Some(fence) = self.pending.pop_front() {
            if let Some(signaled) = self.fences.get_mut(&fence) {
                *signaled = true;
            }
        }
    }

    /// Executes buffer copies of a submitted command buffer.
    fn execute(&mut self, commands: &[Command]) {
        for command in commands {
            if let Command::CopyBuffer { src, dst, regions } = command {
                for region in regions {
                    if let Err(message) = self.copy_buffer(*src, *dst, region) {
                        self.report(message);
                    }
                }
            }
        }
    }

    fn buffer_range(&self, buffer: Buffer, offset: u64, size: u64) -> Result<*mut u8, String> {
        let (buffer_size, binding) = self
            .buffers
            .get(&buffer)
            .ok_or_else(|| format!("Copy uses unknown {:?}", buffer))?;
        let (memory, memory_offset) =
            binding.ok_or_else(|| format!("Copy uses {:?} without memory", buffer))?;
        if offset + size > *buffer_size {
            return Err(format!(
                "Copy of {} bytes at {} exceeds {:?} of {} bytes",
                size, offset, buffer, buffer_size
            ));
        }
        let allocation = self
            .memory
            .get(&memory)
            .ok_or_else(|| format!("{:?} is bound to freed memory", buffer))?;
        if (memory_offset + offset + size) as usize > allocation.len {
            return Err(format!("Copy exceeds memory bound to {:?}", buffer));
        }

        // Range is checked against allocation length above.
        Ok(unsafe { allocation.ptr.add(memory_offset + offset).as_ptr() })
    }

    fn copy_buffer(&self, src: Buffer, dst: Buffer, region: &BufferCopy) -> Result<(), String> {
        let from = self.buffer_range(src, region.src_offset, region.size)?;
        let to = self.buffer_range(dst, region.dst_offset, region.size)?;

        // Both ranges are inside live allocations. They may overlap for copies within one buffer.
        unsafe {
            std::ptr::copy(from, to, region.size as usize);
        }
        Ok(())
    }
}

/// Driver that simulates a device in process memory.
pub struct HeadlessDriver {
    info: DeviceInfo,
    config: HeadlessConfig,
    state: Mutex<State>,
}

impl HeadlessDriver {
    pub fn new(config: HeadlessConfig) -> Self {
        tracing::debug!("Headless driver created: {}", config.device_name);

        HeadlessDriver {
            info: DeviceInfo {
                device_name: config.device_name.clone(),
                driver_name: "strata-headless".to_owned(),
                api_version: (1, 1, 0),
                limits: config.limits,
                features: config.features,
                debug_markers: config.debug_markers,
                standard_clip_space_y: config.standard_clip_space_y,
            },
            config,
            state: Mutex::new(State::default()),
        }
    }

    #[inline]
    pub fn config(&self) -> &HeadlessConfig {
        &self.config
    }

    /// Number of live objects of given kind.
    pub fn live_objects(&self, kind: HeadlessObject) -> usize {
        self.state.lock().live.get(&kind).copied().unwrap_or(0)
    }

    /// Number of command buffers allocated over the driver's lifetime.
    pub fn allocated_command_buffers(&self) -> usize {
        self.state.lock().allocated_command_buffers
    }

    /// Commands currently recorded into `cb`.
    pub fn commands(&self, cb: CommandBuffer) -> Vec<Command> {
        self.state
            .lock()
            .command_buffers
            .get(&cb)
            .map(|state| state.commands.clone())
            .unwrap_or_default()
    }

    pub fn submissions(&self) -> Vec<SubmissionRecord> {
        self.state.lock().submissions.clone()
    }

    pub fn submission_count(&self) -> usize {
        self.state.lock().submissions.len()
    }

    /// Signals the fence as if the submission it tracks finished.
    pub fn signal_fence(&self, fence: Fence) {
        self.state.lock().signal(fence);
    }

    /// Finishes every pending submission.
    pub fn finish_all(&self) {
        self.state.lock().finish_all();
    }

    pub fn is_fence_signaled(&self, fence: Fence) -> bool {
        self.state.lock().fences.get(&fence).copied().unwrap_or(false)
    }

    pub fn wait_idle_calls(&self) -> usize {
        self.state.lock().wait_idle_calls
    }

    /// Native map calls. Persistently mapped blocks never show up here.
    pub fn map_calls(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.map_calls, state.unmap_calls)
    }

    /// Bytes of memory bound to `buffer`.
    pub fn buffer_contents(&self, buffer: Buffer) -> Option<Vec<u8>> {
        let state = self.state.lock();
        let (size, binding) = state.buffers.get(&buffer)?;
        let (memory, offset) = (*binding)?;
        let allocation = state.memory.get(&memory)?;
        let start = offset as usize;
        let end = start + *size as usize;
        if end > allocation.len {
            return None;
        }

        // Allocation is live and the range is checked above.
        let bytes = unsafe { std::slice::from_raw_parts(allocation.ptr.as_ptr(), allocation.len) };
        Some(bytes[start..end].to_vec())
    }

    pub fn descriptor_writes(&self, set: DescriptorSet) -> Vec<DescriptorWrite> {
        self.state
            .lock()
            .descriptor_writes
            .get(&set)
            .cloned()
            .unwrap_or_default()
    }

    pub fn object_names(&self) -> Vec<(ObjectType, u64, String)> {
        self.state.lock().object_names.clone()
    }

    /// Queues a validation message returned by the next [`Driver::take_validation_error`].
    pub fn report_validation_error(&self, message: &str) {
        self.state.lock().report(message.to_owned());
    }

    /// Makes the next acquire return `result` instead of the next image.
    pub fn inject_acquire_result(&self, result: AcquireResult) {
        self.state.lock().acquire_results.push_back(result);
    }

    /// Makes the next present return `result`.
    pub fn inject_present_result(&self, result: PresentResult) {
        self.state.lock().present_results.push_back(result);
    }

    /// Makes the next native call named `call` fail with `code`.
    ///
    /// Supported calls: `vkEndCommandBuffer`.
    pub fn inject_failure(&self, call: &'static str, code: ResultCode) {
        self.state.lock().failures.insert(call, code);
    }

    /// Replaces surface capabilities reported from now on.
    pub fn set_surface_capabilities(&self, capabilities: SurfaceCapabilities) {
        self.state.lock().surface_capabilities = Some(capabilities);
    }

    /// Surface calls fail with `SurfaceLost` from now on.
    pub fn lose_surface(&self) {
        self.state.lock().surface_lost = true;
    }

    /// Infos of every swapchain created so far, oldest first.
    pub fn created_swapchains(&self) -> Vec<SwapchainCreateInfo> {
        self.state.lock().swapchain_infos.clone()
    }

    pub fn live_swapchain_images(&self, swapchain: Swapchain) -> Vec<Image> {
        self.state
            .lock()
            .swapchains
            .get(&swapchain)
            .map(|record| record.images.clone())
            .unwrap_or_default()
    }

    pub fn presents(&self) -> Vec<(Swapchain, u32)> {
        self.state.lock().presents.clone()
    }

    fn surface_call(&self, state: &State, call: &'static str, surface: Surface) -> Result<(), NativeError> {
        if state.surface_lost {
            return Err(NativeError::new(call, ResultCode::SurfaceLost));
        }
        if !state.surfaces.contains_key(&surface) {
            return Err(NativeError::new(call, ResultCode::Other(-1)));
        }
        Ok(())
    }
}

impl Debug for HeadlessDriver {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        if fmt.alternate() {
            let state = self.state.lock();
            fmt.debug_struct("HeadlessDriver")
                .field("config", &self.config)
                .field("live", &state.live)
                .field("submissions", &state.submissions.len())
                .finish()
        } else {
            write!(fmt, "HeadlessDriver({})", self.config.device_name)
        }
    }
}

fn image_size(info: &ImageCreateInfo) -> u64 {
    let layers = u64::from(info.array_layers) * u64::from(info.samples.max(1));
    (0..info.mip_levels)
        .map(|level| {
            let mip = info.extent.mip_level(level);
            info.format.region_size(mip.width, mip.height, mip.depth)
        })
        .sum::<u64>()
        * layers
}

impl Driver for HeadlessDriver {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn take_validation_error(&self) -> Option<String> {
        self.state.lock().validation_error.take()
    }

    fn queue_submit(&self, command_buffers: &[CommandBuffer], fence: Fence) -> Result<(), NativeError> {
        let mut state = self.state.lock();

        let mut commands = Vec::new();
        for cb in command_buffers {
            match state.command_buffers.get(cb) {
                Some(cb_state) if cb_state.state == RecordingState::Executable => {
                    commands.extend(cb_state.commands.iter().cloned())
                }
                Some(_) => {
                    let message = format!("Submitted {:?} is not executable", cb);
                    state.report(message);
                }
                None => {
                    let message = format!("Submitted unknown {:?}", cb);
                    state.report(message);
                }
            }
        }
        state.execute(&commands);

        if !fence.is_null() {
            match state.fences.get(&fence) {
                Some(false) => {}
                Some(true) => state.report(format!("Submitted with signaled {:?}", fence)),
                None => state.report(format!("Submitted with unknown {:?}", fence)),
            }
            if self.config.signal_fences_on_submit {
                state.signal(fence);
            } else {
                state.pending.push_back(fence);
            }
        }

        tracing::trace!("Headless submission of {:?} with {:?}", command_buffers, fence);
        state.submissions.push(SubmissionRecord {
            command_buffers: command_buffers.to_vec(),
            fence,
            commands,
        });
        Ok(())
    }

    fn queue_wait_idle(&self) -> Result<(), NativeError> {
        let mut state = self.state.lock();
        state.wait_idle_calls += 1;
        state.finish_all();
        Ok(())
    }

    fn device_wait_idle(&self) -> Result<(), NativeError> {
        self.queue_wait_idle()
    }

    fn buffer_memory_requirements(&self, buffer: Buffer) -> MemoryRequirements {
        let size = self
            .state
            .lock()
            .buffers
            .get(&buffer)
            .map_or(0, |(size, _)| *size);
        MemoryRequirements {
            size: crate::align_up(size, 16),
            alignment: 16,
            memory_type_bits: !0,
            prefers_dedicated: false,
        }
    }

    fn image_memory_requirements(&self, image: Image) -> MemoryRequirements {
        let size = self.state.lock().images.get(&image).map_or(0, image_size);
        MemoryRequirements {
            size: crate::align_up(size, 256),
            alignment: 256,
            memory_type_bits: !0,
            prefers_dedicated: false,
        }
    }

    fn allocate_memory(&self, request: &MemoryRequest) -> Result<MemoryBlock, NativeError> {
        let mut state = self.state.lock();
        let memory = Memory(state.create(HeadlessObject::Memory));
        let allocation = HostAllocation::new(request.requirements.size);
        let mapped = if request.host_visible {
            Some(allocation.ptr)
        } else {
            None
        };
        state.memory.insert(memory, allocation);

        Ok(MemoryBlock {
            memory,
            offset: 0,
            size: request.requirements.size,
            mapped,
            id: memory.0 as usize,
        })
    }

    fn free_memory(&self, block: MemoryBlock) {
        let mut state = self.state.lock();
        if state.memory.remove(&block.memory).is_none() {
            state.report(format!("Freed unknown {:?}", block.memory));
            return;
        }
        state.destroy(HeadlessObject::Memory, block.memory.0);
    }

    fn bind_buffer_memory(&self, buffer: Buffer, block: &MemoryBlock) -> Result<(), NativeError> {
        let mut state = self.state.lock();
        match state.buffers.get_mut(&buffer) {
            Some((_, binding)) => {
                *binding = Some((block.memory, block.offset));
                Ok(())
            }
            None => Err(NativeError::new("vkBindBufferMemory", ResultCode::Other(-1))),
        }
    }

    fn bind_image_memory(&self, image: Image, _block: &MemoryBlock) -> Result<(), NativeError> {
        if self.state.lock().images.contains_key(&image) {
            Ok(())
        } else {
            Err(NativeError::new("vkBindImageMemory", ResultCode::Other(-1)))
        }
    }

    fn map_memory(&self, block: &MemoryBlock) -> Result<MappedPtr, NativeError> {
        let mut state = self.state.lock();
        state.map_calls += 1;
        let ptr = state
            .memory
            .get(&block.memory)
            .map(|allocation| allocation.ptr)
            .ok_or_else(|| NativeError::new("vkMapMemory", ResultCode::MemoryMapFailed))?;

        // Block offset is within its allocation.
        Ok(unsafe { ptr.add(block.offset) })
    }

    fn unmap_memory(&self, _block: &MemoryBlock) {
        self.state.lock().unmap_calls += 1;
    }

    fn create_buffer(&self, info: &BufferCreateInfo) -> Result<Buffer, NativeError> {
        let mut state = self.state.lock();
        let buffer = Buffer(state.create(HeadlessObject::Buffer));
        state.buffers.insert(buffer, (info.size, None));
        Ok(buffer)
    }

    fn destroy_buffer(&self, buffer: Buffer) {
        let mut state = self.state.lock();
        state.buffers.remove(&buffer);
        state.destroy(HeadlessObject::Buffer, buffer.0);
    }

    fn create_image(&self, info: &ImageCreateInfo) -> Result<Image, NativeError> {
        if self.config.unsupported_formats.contains(&info.format) {
            return Err(NativeError::new("vkCreateImage", ResultCode::FormatNotSupported));
        }
        let mut state = self.state.lock();
        let image = Image(state.create(HeadlessObject::Image));
        state.images.insert(image, *info);
        Ok(image)
    }

    fn destroy_image(&self, image: Image) {
        let mut state = self.state.lock();
        state.images.remove(&image);
        state.destroy(HeadlessObject::Image, image.0);
    }

    fn create_image_view(&self, _info: &ImageViewCreateInfo) -> Result<ImageView, NativeError> {
        Ok(ImageView(self.state.lock().create(HeadlessObject::ImageView)))
    }

    fn destroy_image_view(&self, view: ImageView) {
        self.state.lock().destroy(HeadlessObject::ImageView, view.0);
    }

    fn create_sampler(&self, _info: &SamplerInfo) -> Result<Sampler, NativeError> {
        Ok(Sampler(self.state.lock().create(HeadlessObject::Sampler)))
    }

    fn destroy_sampler(&self, sampler: Sampler) {
        self.state.lock().destroy(HeadlessObject::Sampler, sampler.0);
    }

    fn create_shader_module(&self, code: &[u32]) -> Result<ShaderModule, NativeError> {
        if code.is_empty() {
            return Err(NativeError::new("vkCreateShaderModule", ResultCode::InitializationFailed));
        }
        Ok(ShaderModule(self.state.lock().create(HeadlessObject::ShaderModule)))
    }

    fn destroy_shader_module(&self, module: ShaderModule) {
        self.state.lock().destroy(HeadlessObject::ShaderModule, module.0);
    }

    fn create_descriptor_set_layout(
        &self,
        _bindings: &[DescriptorSetLayoutBinding],
    ) -> Result<DescriptorSetLayout, NativeError> {
        Ok(DescriptorSetLayout(
            self.state.lock().create(HeadlessObject::DescriptorSetLayout),
        ))
    }

    fn destroy_descriptor_set_layout(&self, layout: DescriptorSetLayout) {
        self.state
            .lock()
            .destroy(HeadlessObject::DescriptorSetLayout, layout.0);
    }

    fn create_descriptor_pool(
        &self,
        _max_sets: u32,
        _counts: &DescriptorResourceCounts,
    ) -> Result<DescriptorPool, NativeError> {
        Ok(DescriptorPool(
            self.state.lock().create(HeadlessObject::DescriptorPool),
        ))
    }

    fn destroy_descriptor_pool(&self, pool: DescriptorPool) {
        self.state.lock().destroy(HeadlessObject::DescriptorPool, pool.0);
    }

    fn allocate_descriptor_set(
        &self,
        _pool: DescriptorPool,
        _layout: DescriptorSetLayout,
    ) -> Result<DescriptorSet, NativeError> {
        Ok(DescriptorSet(
            self.state.lock().create(HeadlessObject::DescriptorSet),
        ))
    }

    fn free_descriptor_set(&self, _pool: DescriptorPool, set: DescriptorSet) -> Result<(), NativeError> {
        let mut state = self.state.lock();
        state.descriptor_writes.remove(&set);
        state.destroy(HeadlessObject::DescriptorSet, set.0);
        Ok(())
    }

    fn update_descriptor_set(&self, set: DescriptorSet, writes: &[DescriptorWrite]) {
        self.state
            .lock()
            .descriptor_writes
            .entry(set)
            .or_default()
            .extend_from_slice(writes);
    }

    fn create_pipeline_layout(
        &self,
        _set_layouts: &[DescriptorSetLayout],
    ) -> Result<PipelineLayout, NativeError> {
        Ok(PipelineLayout(
            self.state.lock().create(HeadlessObject::PipelineLayout),
        ))
    }

    fn destroy_pipeline_layout(&self, layout: PipelineLayout) {
        self.state.lock().destroy(HeadlessObject::PipelineLayout, layout.0);
    }

    fn create_render_pass(&self, _info: &RenderPassCreateInfo) -> Result<RenderPass, NativeError> {
        Ok(RenderPass(self.state.lock().create(HeadlessObject::RenderPass)))
    }

    fn destroy_render_pass(&self, render_pass: RenderPass) {
        self.state
            .lock()
            .destroy(HeadlessObject::RenderPass, render_pass.0);
    }

    fn create_framebuffer(&self, _info: &FramebufferCreateInfo) -> Result<Framebuffer, NativeError> {
        Ok(Framebuffer(self.state.lock().create(HeadlessObject::Framebuffer)))
    }

    fn destroy_framebuffer(&self, framebuffer: Framebuffer) {
        self.state
            .lock()
            .destroy(HeadlessObject::Framebuffer, framebuffer.0);
    }

    fn create_graphics_pipeline(
        &self,
        _info: &GraphicsPipelineCreateInfo,
    ) -> Result<Pipeline, NativeError> {
        Ok(Pipeline(self.state.lock().create(HeadlessObject::Pipeline)))
    }

    fn create_compute_pipeline(
        &self,
        _info: &ComputePipelineCreateInfo,
    ) -> Result<Pipeline, NativeError> {
        Ok(Pipeline(self.state.lock().create(HeadlessObject::Pipeline)))
    }

    fn destroy_pipeline(&self, pipeline: Pipeline) {
        self.state.lock().destroy(HeadlessObject::Pipeline, pipeline.0);
    }

    fn create_command_pool(&self, _transient: bool) -> Result<CommandPool, NativeError> {
        Ok(CommandPool(self.state.lock().create(HeadlessObject::CommandPool)))
    }

    fn destroy_command_pool(&self, pool: CommandPool) {
        let mut state = self.state.lock();
        let freed: Vec<CommandBuffer> = state
            .command_buffers
            .iter()
            .filter(|(_, cb)| cb.pool == pool)
            .map(|(&handle, _)| handle)
            .collect();
        for cb in freed {
            state.command_buffers.remove(&cb);
            state.destroy(HeadlessObject::CommandBuffer, cb.0);
        }
        state.destroy(HeadlessObject::CommandPool, pool.0);
    }

    fn reset_command_pool(&self, pool: CommandPool) -> Result<(), NativeError> {
        let mut state = self.state.lock();
        for cb in state.command_buffers.values_mut().filter(|cb| cb.pool == pool) {
            cb.state = RecordingState::Initial;
            cb.commands.clear();
        }
        Ok(())
    }

    fn allocate_command_buffer(&self, pool: CommandPool) -> Result<CommandBuffer, NativeError> {
        let mut state = self.state.lock();
        let cb = CommandBuffer(state.create(HeadlessObject::CommandBuffer));
        state.allocated_command_buffers += 1;
        state.command_buffers.insert(
            cb,
            CommandBufferState {
                pool,
                state: RecordingState::Initial,
                commands: Vec::new(),
            },
        );
        Ok(cb)
    }

    fn reset_command_buffer(&self, cb: CommandBuffer) -> Result<(), NativeError> {
        let mut state = self.state.lock();
        match state.command_buffers.get_mut(&cb) {
            Some(cb_state) => {
                cb_state.state = RecordingState::Initial;
                cb_state.commands.clear();
                Ok(())
            }
            None => Err(NativeError::new("vkResetCommandBuffer", ResultCode::Other(-1))),
        }
    }

    fn begin_command_buffer(&self, cb: CommandBuffer, _one_time_submit: bool) -> Result<(), NativeError> {
        let mut state = self.state.lock();
        let recording = match state.command_buffers.get_mut(&cb) {
            Some(cb_state) => {
                let recording = cb_state.state == RecordingState::Recording;
                cb_state.state = RecordingState::Recording;
                cb_state.commands.clear();
                recording
            }
            None => return Err(NativeError::new("vkBeginCommandBuffer", ResultCode::Other(-1))),
        };
        if recording {
            state.report(format!("{:?} begun while recording", cb));
        }
        Ok(())
    }

    fn end_command_buffer(&self, cb: CommandBuffer) -> Result<(), NativeError> {
        let mut state = self.state.lock();
        if let Some(code) = state.failures.remove("vkEndCommandBuffer") {
            return Err(NativeError::new("vkEndCommandBuffer", code));
        }
        match state.command_buffers.get_mut(&cb) {
            Some(cb_state) if cb_state.state == RecordingState::Recording => {
                cb_state.state = RecordingState::Executable;
                Ok(())
            }
            _ => Err(NativeError::new("vkEndCommandBuffer", ResultCode::Other(-1))),
        }
    }

    fn cmd_begin_render_pass(&self, cb: CommandBuffer, info: &RenderPassBeginInfo<'_>) {
        self.state.lock().record(
            cb,
            Command::BeginRenderPass {
                render_pass: info.render_pass,
                framebuffer: info.framebuffer,
                area: info.area,
                clear_values: info.clear_values.to_vec(),
            },
        );
    }

    fn cmd_end_render_pass(&self, cb: CommandBuffer) {
        self.state.lock().record(cb, Command::EndRenderPass);
    }

    fn cmd_clear_attachments(&self, cb: CommandBuffer, attachments: &[ClearAttachment], rects: &[ClearRect]) {
        self.state.lock().record(
            cb,
            Command::ClearAttachments {
                attachments: attachments.to_vec(),
                rects: rects.to_vec(),
            },
        );
    }

    fn cmd_pipeline_barrier(
        &self,
        cb: CommandBuffer,
        src_stages: PipelineStageFlags,
        dst_stages: PipelineStageFlags,
        memory_barriers: &[MemoryBarrier],
        image_barriers: &[ImageBarrier],
    ) {
        self.state.lock().record(
            cb,
            Command::PipelineBarrier {
                src_stages,
                dst_stages,
                memory_barriers: memory_barriers.to_vec(),
                image_barriers: image_barriers.to_vec(),
            },
        );
    }

    fn cmd_bind_pipeline(&self, cb: CommandBuffer, bind_point: PipelineBindPoint, pipeline: Pipeline) {
        self.state
            .lock()
            .record(cb, Command::BindPipeline { bind_point, pipeline });
    }

    fn cmd_bind_descriptor_sets(
        &self,
        cb: CommandBuffer,
        bind_point: PipelineBindPoint,
        layout: PipelineLayout,
        first_set: u32,
        sets: &[DescriptorSet],
        dynamic_offsets: &[u32],
    ) {
        self.state.lock().record(
            cb,
            Command::BindDescriptorSets {
                bind_point,
                layout,
                first_set,
                sets: sets.to_vec(),
                dynamic_offsets: dynamic_offsets.to_vec(),
            },
        );
    }

    fn cmd_bind_vertex_buffer(&self, cb: CommandBuffer, binding: u32, buffer: Buffer, offset: u64) {
        self.state.lock().record(
            cb,
            Command::BindVertexBuffer {
                binding,
                buffer,
                offset,
            },
        );
    }

    fn cmd_bind_index_buffer(&self, cb: CommandBuffer, buffer: Buffer, offset: u64, format: IndexFormat) {
        self.state.lock().record(
            cb,
            Command::BindIndexBuffer {
                buffer,
                offset,
                format,
            },
        );
    }

    fn cmd_set_viewport(&self, cb: CommandBuffer, index: u32, viewport: &Viewport) {
        self.state.lock().record(
            cb,
            Command::SetViewport {
                index,
                viewport: *viewport,
            },
        );
    }

    fn cmd_set_scissor(&self, cb: CommandBuffer, index: u32, rect: &Rect) {
        self.state
            .lock()
            .record(cb, Command::SetScissor { index, rect: *rect });
    }

    fn cmd_draw(
        &self,
        cb: CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        self.state.lock().record(
            cb,
            Command::Draw {
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            },
        );
    }

    fn cmd_draw_indexed(
        &self,
        cb: CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        self.state.lock().record(
            cb,
            Command::DrawIndexed {
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            },
        );
    }

    fn cmd_draw_indirect(&self, cb: CommandBuffer, buffer: Buffer, offset: u64, draw_count: u32, stride: u32) {
        self.state.lock().record(
            cb,
            Command::DrawIndirect {
                buffer,
                offset,
                draw_count,
                stride,
            },
        );
    }

    fn cmd_draw_indexed_indirect(
        &self,
        cb: CommandBuffer,
        buffer: Buffer,
        offset: u64,
        draw_count: u32,
        stride: u32,
    ) {
        self.state.lock().record(
            cb,
            Command::DrawIndexedIndirect {
                buffer,
                offset,
                draw_count,
                stride,
            },
        );
    }

    fn cmd_dispatch(&self, cb: CommandBuffer, x: u32, y: u32, z: u32) {
        self.state.lock().record(cb, Command::Dispatch { x, y, z });
    }

    fn cmd_dispatch_indirect(&self, cb: CommandBuffer, buffer: Buffer, offset: u64) {
        self.state
            .lock()
            .record(cb, Command::DispatchIndirect { buffer, offset });
    }

    fn cmd_copy_buffer(&self, cb: CommandBuffer, src: Buffer, dst: Buffer, regions: &[BufferCopy]) {
        self.state.lock().record(
            cb,
            Command::CopyBuffer {
                src,
                dst,
                regions: regions.to_vec(),
            },
        );
    }

    fn cmd_copy_image(
        &self,
        cb: CommandBuffer,
        src: Image,
        src_layout: ImageLayout,
        dst: Image,
        dst_layout: ImageLayout,
        regions: &[ImageCopy],
    ) {
        self.state.lock().record(
            cb,
            Command::CopyImage {
                src,
                src_layout,
                dst,
                dst_layout,
                regions: regions.to_vec(),
            },
        );
    }

    fn cmd_copy_buffer_to_image(
        &self,
        cb: CommandBuffer,
        src: Buffer,
        dst: Image,
        dst_layout: ImageLayout,
        regions: &[BufferImageCopy],
    ) {
        self.state.lock().record(
            cb,
            Command::CopyBufferToImage {
                src,
                dst,
                dst_layout,
                regions: regions.to_vec(),
            },
        );
    }

    fn cmd_copy_image_to_buffer(
        &self,
        cb: CommandBuffer,
        src: Image,
        src_layout: ImageLayout,
        dst: Buffer,
        regions: &[BufferImageCopy],
    ) {
        self.state.lock().record(
            cb,
            Command::CopyImageToBuffer {
                src,
                src_layout,
                dst,
                regions: regions.to_vec(),
            },
        );
    }

    fn cmd_blit_image(
        &self,
        cb: CommandBuffer,
        src: Image,
        src_layout: ImageLayout,
        dst: Image,
        dst_layout: ImageLayout,
        regions: &[ImageBlit],
        filter: Filter,
    ) {
        self.state.lock().record(
            cb,
            Command::BlitImage {
                src,
                src_layout,
                dst,
                dst_layout,
                regions: regions.to_vec(),
                filter,
            },
        );
    }

    fn cmd_resolve_image(
        &self,
        cb: CommandBuffer,
        src: Image,
        src_layout: ImageLayout,
        dst: Image,
        dst_layout: ImageLayout,
        regions: &[ImageResolve],
    ) {
        self.state.lock().record(
            cb,
            Command::ResolveImage {
                src,
                src_layout,
                dst,
                dst_layout,
                regions: regions.to_vec(),
            },
        );
    }

    fn cmd_clear_color_image(
        &self,
        cb: CommandBuffer,
        image: Image,
        layout: ImageLayout,
        color: [f32; 4],
        range: &ImageSubresourceRange,
    ) {
        self.state.lock().record(
            cb,
            Command::ClearColorImage {
                image,
                layout,
                color,
                range: *range,
            },
        );
    }

    fn cmd_clear_depth_stencil_image(
        &self,
        cb: CommandBuffer,
        image: Image,
        layout: ImageLayout,
        depth: f32,
        stencil: u32,
        range: &ImageSubresourceRange,
    ) {
        self.state.lock().record(
            cb,
            Command::ClearDepthStencilImage {
                image,
                layout,
                depth,
                stencil,
                range: *range,
            },
        );
    }

    fn cmd_debug_marker_begin(&self, cb: CommandBuffer, name: &str, _color: [f32; 4]) {
        self.state.lock().record(
            cb,
            Command::DebugMarkerBegin {
                name: name.to_owned(),
            },
        );
    }

    fn cmd_debug_marker_end(&self, cb: CommandBuffer) {
        self.state.lock().record(cb, Command::DebugMarkerEnd);
    }

    fn cmd_debug_marker_insert(&self, cb: CommandBuffer, name: &str, _color: [f32; 4]) {
        self.state.lock().record(
            cb,
            Command::DebugMarkerInsert {
                name: name.to_owned(),
            },
        );
    }

    fn create_fence(&self, signaled: bool) -> Result<Fence, NativeError> {
        let mut state = self.state.lock();
        let fence = Fence(state.create(HeadlessObject::Fence));
        state.fences.insert(fence, signaled);
        Ok(fence)
    }

    fn destroy_fence(&self, fence: Fence) {
        let mut state = self.state.lock();
        state.fences.remove(&fence);
        state.pending.retain(|&pending| pending != fence);
        state.destroy(HeadlessObject::Fence, fence.0);
    }

    fn fence_status(&self, fence: Fence) -> Result<bool, NativeError> {
        self.state
            .lock()
            .fences
            .get(&fence)
            .copied()
            .ok_or_else(|| NativeError::new("vkGetFenceStatus", ResultCode::Other(-1)))
    }

    fn reset_fences(&self, fences: &[Fence]) -> Result<(), NativeError> {
        let mut state = self.state.lock();
        for fence in fences {
            match state.fences.get_mut(fence) {
                Some(signaled) => *signaled = false,
                None => return Err(NativeError::new("vkResetFences", ResultCode::Other(-1))),
            }
        }
        Ok(())
    }

    /// Waiting finishes pending submissions tracked by the fences.
    /// Fences no submission will signal time out.
    fn wait_for_fences(&self, fences: &[Fence], wait_all: bool, _timeout_ns: u64) -> Result<bool, NativeError> {
        let mut state = self.state.lock();

        for fence in fences {
            if state.pending.contains(fence) {
                // Queue executes in order, everything before the fence finishes too.
                while let Some(pending) = state.pending.pop_front() {
                    if let Some(signaled) = state.fences.get_mut(&pending) {
                        *signaled = true;
                    }
                    if pending == *fence {
                        break;
                    }
                }
            }
        }

        let mut signaled = fences
            .iter()
            .map(|fence| state.fences.get(fence).copied().unwrap_or(false));
        Ok(if wait_all {
            signaled.all(|signaled| signaled)
        } else {
            signaled.any(|signaled| signaled)
        })
    }

    fn set_object_name(&self, ty: ObjectType, handle: u64, name: &str) {
        self.state
            .lock()
            .object_names
            .push((ty, handle, name.to_owned()));
    }

    fn format_properties(&self, format: PixelFormat) -> FormatProperties {
        let all = FormatFeatureFlags::all();
        let optimal = if self.config.unfilterable_formats.contains(&format) {
            all - FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR
        } else {
            all
        };
        FormatProperties {
            linear_tiling: all,
            optimal_tiling: optimal,
            buffer: all,
        }
    }

    fn image_format_properties(
        &self,
        format: PixelFormat,
        kind: ImageKind,
        _usage: ImageUsageFlags,
        _cube_compatible: bool,
    ) -> Result<ImageFormatProperties, NativeError> {
        if self.config.unsupported_formats.contains(&format) {
            return Err(NativeError::new(
                "vkGetPhysicalDeviceImageFormatProperties",
                ResultCode::FormatNotSupported,
            ));
        }

        let max_extent = match kind {
            ImageKind::D1 => Extent3::new(16384, 1, 1),
            ImageKind::D2 => Extent3::new(16384, 16384, 1),
            ImageKind::D3 => Extent3::new(2048, 2048, 2048),
        };
        Ok(ImageFormatProperties {
            max_extent,
            max_mip_levels: 15,
            max_array_layers: if kind == ImageKind::D3 { 1 } else { 2048 },
            sample_counts: if kind == ImageKind::D2 {
                self.config.sample_counts
            } else {
                SampleCountFlags::COUNT_1
            },
        })
    }

    fn create_surface(&self, source: &SurfaceSource) -> Result<Surface, NativeError> {
        let mut state = self.state.lock();
        if state.surface_lost {
            return Err(NativeError::new("vkCreateSurfaceKHR", ResultCode::SurfaceLost));
        }
        let surface = Surface(state.create(HeadlessObject::Surface));
        state.surfaces.insert(surface, *source);
        Ok(surface)
    }

    fn destroy_surface(&self, surface: Surface) {
        let mut state = self.state.lock();
        state.surfaces.remove(&surface);
        state.destroy(HeadlessObject::Surface, surface.0);
    }

    fn surface_supported(&self, surface: Surface) -> Result<bool, NativeError> {
        let state = self.state.lock();
        self.surface_call(&state, "vkGetPhysicalDeviceSurfaceSupportKHR", surface)?;
        Ok(self.config.surface.supported)
    }

    fn surface_capabilities(&self, surface: Surface) -> Result<SurfaceCapabilities, NativeError> {
        let state = self.state.lock();
        self.surface_call(&state, "vkGetPhysicalDeviceSurfaceCapabilitiesKHR", surface)?;
        Ok(state
            .surface_capabilities
            .unwrap_or(self.config.surface.capabilities))
    }

    fn surface_formats(&self, surface: Surface) -> Result<Vec<SurfaceFormat>, NativeError> {
        let state = self.state.lock();
        self.surface_call(&state, "vkGetPhysicalDeviceSurfaceFormatsKHR", surface)?;
        Ok(self.config.surface.formats.clone())
    }

    fn surface_present_modes(&self, surface: Surface) -> Result<Vec<PresentMode>, NativeError> {
        let state = self.state.lock();
        self.surface_call(&state, "vkGetPhysicalDeviceSurfacePresentModesKHR", surface)?;
        Ok(self.config.surface.present_modes.clone())
    }

    fn create_swapchain(&self, info: &SwapchainCreateInfo) -> Result<Swapchain, NativeError> {
        let mut state = self.state.lock();
        self.surface_call(&state, "vkCreateSwapchainKHR", info.surface)?;

        if !info.old_swapchain.is_null() && !state.swapchains.contains_key(&info.old_swapchain) {
            let message = format!("Unknown old {:?} passed to swapchain creation", info.old_swapchain);
            state.report(message);
        }

        let swapchain = Swapchain(state.create(HeadlessObject::Swapchain));
        let images = (0..info.image_count)
            .map(|_| {
                state.next_handle += 1;
                Image(state.next_handle)
            })
            .collect();
        state.swapchains.insert(
            swapchain,
            SwapchainRecord {
                info: *info,
                images,
                next_image: 0,
            },
        );
        state.swapchain_infos.push(*info);

        tracing::trace!("Headless swapchain {:?} created: {:?}", swapchain, info);
        Ok(swapchain)
    }

    fn destroy_swapchain(&self, swapchain: Swapchain) {
        let mut state = self.state.lock();
        state.swapchains.remove(&swapchain);
        state.destroy(HeadlessObject::Swapchain, swapchain.0);
    }

    fn swapchain_images(&self, swapchain: Swapchain) -> Result<Vec<Image>, NativeError> {
        self.state
            .lock()
            .swapchains
            .get(&swapchain)
            .map(|record| record.images.clone())
            .ok_or_else(|| NativeError::new("vkGetSwapchainImagesKHR", ResultCode::Other(-1)))
    }

    fn acquire_next_image(&self, swapchain: Swapchain, fence: Fence) -> Result<AcquireResult, NativeError> {
        let mut state = self.state.lock();
        if state.surface_lost {
            return Err(NativeError::new("vkAcquireNextImageKHR", ResultCode::SurfaceLost));
        }

        let result = match state.acquire_results.pop_front() {
            Some(result) => result,
            None => {
                let record = state
                    .swapchains
                    .get_mut(&swapchain)
                    .ok_or_else(|| NativeError::new("vkAcquireNextImageKHR", ResultCode::Other(-1)))?;
                let index = record.next_image;
                record.next_image = (index + 1) % record.info.image_count.max(1);
                AcquireResult::Success(index)
            }
        };

        if !matches!(result, AcquireResult::OutOfDate) {
            state.signal(fence);
        }
        Ok(result)
    }

    fn queue_present(&self, swapchain: Swapchain, image_index: u32) -> Result<PresentResult, NativeError> {
        let mut state = self.state.lock();
        if state.surface_lost {
            return Err(NativeError::new("vkQueuePresentKHR", ResultCode::SurfaceLost));
        }
        if !state.swapchains.contains_key(&swapchain) {
            return Err(NativeError::new("vkQueuePresentKHR", ResultCode::Other(-1)));
        }
        state.presents.push((swapchain, image_index));
        Ok(state
            .present_results
            .pop_front()
            .unwrap_or(PresentResult::Success))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copies_execute_on_submit() {
        let driver = HeadlessDriver::new(HeadlessConfig::default());

        let make_buffer = |host_visible| {
            let buffer = driver
                .create_buffer(&BufferCreateInfo {
                    size: 16,
                    usage: crate::native::BufferUsageFlags::TRANSFER_SRC
                        | crate::native::BufferUsageFlags::TRANSFER_DST,
                })
                .unwrap();
            let memory = driver
                .allocate_memory(&MemoryRequest {
                    requirements: driver.buffer_memory_requirements(buffer),
                    host_visible,
                    dedicated: false,
                })
                .unwrap();
            driver.bind_buffer_memory(buffer, &memory).unwrap();
            (buffer, memory)
        };

        let (src, src_memory) = make_buffer(true);
        let (dst, _) = make_buffer(false);

        let ptr = src_memory.mapped.unwrap();
        unsafe { std::ptr::copy_nonoverlapping([1u8, 2, 3, 4].as_ptr(), ptr.as_ptr(), 4) };

        let pool = driver.create_command_pool(true).unwrap();
        let cb = driver.allocate_command_buffer(pool).unwrap();
        driver.begin_command_buffer(cb, true).unwrap();
        driver.cmd_copy_buffer(
            cb,
            src,
            dst,
            &[BufferCopy {
                src_offset: 0,
                dst_offset: 8,
                size: 4,
            }],
        );
        driver.end_command_buffer(cb).unwrap();
        driver.queue_submit(&[cb], Fence::NULL).unwrap();

        let contents = driver.buffer_contents(dst).unwrap();
        assert_eq!(&contents[8..12], &[1, 2, 3, 4]);
        assert_eq!(driver.take_validation_error(), None);
    }

    #[test]
    fn waiting_finishes_earlier_submissions() {
        let driver = HeadlessDriver::new(HeadlessConfig {
            signal_fences_on_submit: false,
            ..HeadlessConfig::default()
        });

        let first = driver.create_fence(false).unwrap();
        let second = driver.create_fence(false).unwrap();
        driver.queue_submit(&[], first).unwrap();
        driver.queue_submit(&[], second).unwrap();

        assert!(!driver.fence_status(first).unwrap());
        assert!(driver.wait_for_fences(&[second], true, u64::MAX).unwrap());
        assert!(driver.fence_status(first).unwrap());

        let orphan = driver.create_fence(false).unwrap();
        assert!(!driver.wait_for_fences(&[orphan], true, 0).unwrap());
    }

    #[test]
    fn double_destroy_is_reported() {
        let driver = HeadlessDriver::new(HeadlessConfig::default());
        let sampler = driver.create_sampler(&SamplerInfo::default()).unwrap();

        driver.destroy_sampler(sampler);
        assert_eq!(driver.live_objects(HeadlessObject::Sampler), 0);
        assert_eq!(driver.take_validation_error(), None);

        driver.destroy_sampler(sampler);
        assert!(driver.take_validation_error().is_some());
    }
}
