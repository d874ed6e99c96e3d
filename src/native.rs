//! Native graphics API seam.
//!
//! The core never talks to Vulkan directly.
//! Everything goes through [`Driver`] using plain `u64` handles
//! and small descriptive structs defined here.

use std::{fmt, ptr::NonNull};

use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use smallvec::SmallVec;

use crate::{
    dimensions::{Extent2, Extent3, Offset3, Rect, Viewport},
    format::{AspectFlags, PixelFormat},
    pipeline::{
        BlendStateInfo, DepthStencilStateInfo, PrimitiveTopology, RasterizerStateInfo,
        VertexElementFormat,
    },
    descriptor::DescriptorResourceCounts,
    sampler::{Filter, SamplerInfo},
    shader::ShaderStages,
    IndexFormat,
};

macro_rules! define_handle {
    ($($(#[$meta:meta])* $name:ident;)*) => {
        $(
            $(#[$meta])*
            #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
            #[repr(transparent)]
            pub struct $name(pub u64);

            impl $name {
                pub const NULL: Self = $name(0);

                #[inline]
                pub fn is_null(&self) -> bool {
                    self.0 == 0
                }
            }
        )*
    };
}

define_handle! {
    Buffer;
    Image;
    ImageView;
    Sampler;
    ShaderModule;
    DescriptorSetLayout;
    PipelineLayout;
    Pipeline;
    RenderPass;
    Framebuffer;
    DescriptorPool;
    DescriptorSet;
    CommandPool;
    CommandBuffer;
    Fence;
    Memory;
    Surface;
    Swapchain;
}

/// Kind of native object, used for debug naming.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Buffer,
    Image,
    ImageView,
    Sampler,
    ShaderModule,
    DescriptorSetLayout,
    DescriptorSet,
    PipelineLayout,
    Pipeline,
    RenderPass,
    Framebuffer,
    CommandPool,
    CommandBuffer,
    Fence,
    Swapchain,
}

/// Result codes a native call may report.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResultCode {
    NotReady,
    Timeout,
    Incomplete,
    Suboptimal,
    OutOfDate,
    OutOfHostMemory,
    OutOfDeviceMemory,
    InitializationFailed,
    DeviceLost,
    MemoryMapFailed,
    LayerNotPresent,
    ExtensionNotPresent,
    FeatureNotPresent,
    IncompatibleDriver,
    TooManyObjects,
    FormatNotSupported,
    FragmentedPool,
    OutOfPoolMemory,
    SurfaceLost,
    NativeWindowInUse,
    Other(i32),
}

/// Failed native call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("`{call}` failed with {code:?}")]
pub struct NativeError {
    pub call: &'static str,
    pub code: ResultCode,
}

impl NativeError {
    pub const fn new(call: &'static str, code: ResultCode) -> Self {
        NativeError { call, code }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ImageLayout {
    Undefined,
    General,
    ColorAttachmentOptimal,
    DepthStencilAttachmentOptimal,
    DepthStencilReadOnlyOptimal,
    ShaderReadOnlyOptimal,
    TransferSrcOptimal,
    TransferDstOptimal,
    Preinitialized,
    PresentSrc,
}

impl ImageLayout {
    /// Accesses and stages that touch an image while it is in this layout.
    /// Used as source scope when leaving the layout and destination scope when entering it.
    pub fn access_and_stage(self) -> (AccessFlags, PipelineStageFlags) {
        match self {
            ImageLayout::Undefined | ImageLayout::Preinitialized => {
                (AccessFlags::empty(), PipelineStageFlags::TOP_OF_PIPE)
            }
            ImageLayout::General => (
                AccessFlags::SHADER_READ | AccessFlags::SHADER_WRITE,
                PipelineStageFlags::COMPUTE_SHADER | PipelineStageFlags::FRAGMENT_SHADER,
            ),
            ImageLayout::ColorAttachmentOptimal => (
                AccessFlags::COLOR_ATTACHMENT_READ | AccessFlags::COLOR_ATTACHMENT_WRITE,
                PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            ),
            ImageLayout::DepthStencilAttachmentOptimal => (
                AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                    | AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                PipelineStageFlags::EARLY_FRAGMENT_TESTS | PipelineStageFlags::LATE_FRAGMENT_TESTS,
            ),
            ImageLayout::DepthStencilReadOnlyOptimal => (
                AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ | AccessFlags::SHADER_READ,
                PipelineStageFlags::EARLY_FRAGMENT_TESTS | PipelineStageFlags::FRAGMENT_SHADER,
            ),
            ImageLayout::ShaderReadOnlyOptimal => (
                AccessFlags::SHADER_READ,
                PipelineStageFlags::VERTEX_SHADER
                    | PipelineStageFlags::FRAGMENT_SHADER
                    | PipelineStageFlags::COMPUTE_SHADER,
            ),
            ImageLayout::TransferSrcOptimal => {
                (AccessFlags::TRANSFER_READ, PipelineStageFlags::TRANSFER)
            }
            ImageLayout::TransferDstOptimal => {
                (AccessFlags::TRANSFER_WRITE, PipelineStageFlags::TRANSFER)
            }
            ImageLayout::PresentSrc => (AccessFlags::MEMORY_READ, PipelineStageFlags::BOTTOM_OF_PIPE),
        }
    }
}

bitflags::bitflags! {
    /// Memory access types. Bits match native access mask.
    pub struct AccessFlags: u32 {
        const INDIRECT_COMMAND_READ = 0x00001;
        const INDEX_READ = 0x00002;
        const VERTEX_ATTRIBUTE_READ = 0x00004;
        const UNIFORM_READ = 0x00008;
        const INPUT_ATTACHMENT_READ = 0x00010;
        const SHADER_READ = 0x00020;
        const SHADER_WRITE = 0x00040;
        const COLOR_ATTACHMENT_READ = 0x00080;
        const COLOR_ATTACHMENT_WRITE = 0x00100;
        const DEPTH_STENCIL_ATTACHMENT_READ = 0x00200;
        const DEPTH_STENCIL_ATTACHMENT_WRITE = 0x00400;
        const TRANSFER_READ = 0x00800;
        const TRANSFER_WRITE = 0x01000;
        const HOST_READ = 0x02000;
        const HOST_WRITE = 0x04000;
        const MEMORY_READ = 0x08000;
        const MEMORY_WRITE = 0x10000;
    }
}

bitflags::bitflags! {
    /// Pipeline stages. Bits match native stage mask.
    pub struct PipelineStageFlags: u32 {
        const TOP_OF_PIPE = 0x00001;
        const DRAW_INDIRECT = 0x00002;
        const VERTEX_INPUT = 0x00004;
        const VERTEX_SHADER = 0x00008;
        const TESSELLATION_CONTROL_SHADER = 0x00010;
        const TESSELLATION_EVALUATION_SHADER = 0x00020;
        const GEOMETRY_SHADER = 0x00040;
        const FRAGMENT_SHADER = 0x00080;
        const EARLY_FRAGMENT_TESTS = 0x00100;
        const LATE_FRAGMENT_TESTS = 0x00200;
        const COLOR_ATTACHMENT_OUTPUT = 0x00400;
        const COMPUTE_SHADER = 0x00800;
        const TRANSFER = 0x01000;
        const BOTTOM_OF_PIPE = 0x02000;
        const HOST = 0x04000;
        const ALL_GRAPHICS = 0x08000;
        const ALL_COMMANDS = 0x10000;
    }
}

bitflags::bitflags! {
    pub struct BufferUsageFlags: u32 {
        const TRANSFER_SRC = 0x001;
        const TRANSFER_DST = 0x002;
        const UNIFORM_TEXEL = 0x004;
        const STORAGE_TEXEL = 0x008;
        const UNIFORM = 0x010;
        const STORAGE = 0x020;
        const INDEX = 0x040;
        const VERTEX = 0x080;
        const INDIRECT = 0x100;
    }
}

bitflags::bitflags! {
    pub struct ImageUsageFlags: u32 {
        const TRANSFER_SRC = 0x01;
        const TRANSFER_DST = 0x02;
        const SAMPLED = 0x04;
        const STORAGE = 0x08;
        const COLOR_ATTACHMENT = 0x10;
        const DEPTH_STENCIL_ATTACHMENT = 0x20;
        const TRANSIENT_ATTACHMENT = 0x40;
        const INPUT_ATTACHMENT = 0x80;
    }
}

bitflags::bitflags! {
    #[derive(Default)]
    pub struct FormatFeatureFlags: u32 {
        const SAMPLED_IMAGE = 0x0001;
        const STORAGE_IMAGE = 0x0002;
        const STORAGE_IMAGE_ATOMIC = 0x0004;
        const UNIFORM_TEXEL_BUFFER = 0x0008;
        const STORAGE_TEXEL_BUFFER = 0x0010;
        const STORAGE_TEXEL_BUFFER_ATOMIC = 0x0020;
        const VERTEX_BUFFER = 0x0040;
        const COLOR_ATTACHMENT = 0x0080;
        const COLOR_ATTACHMENT_BLEND = 0x0100;
        const DEPTH_STENCIL_ATTACHMENT = 0x0200;
        const BLIT_SRC = 0x0400;
        const BLIT_DST = 0x0800;
        const SAMPLED_IMAGE_FILTER_LINEAR = 0x1000;
        const TRANSFER_SRC = 0x4000;
        const TRANSFER_DST = 0x8000;
    }
}

bitflags::bitflags! {
    /// Supported sample counts. Each bit value equals the count it stands for.
    pub struct SampleCountFlags: u32 {
        const COUNT_1 = 0x01;
        const COUNT_2 = 0x02;
        const COUNT_4 = 0x04;
        const COUNT_8 = 0x08;
        const COUNT_16 = 0x10;
        const COUNT_32 = 0x20;
        const COUNT_64 = 0x40;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ImageKind {
    D1,
    D2,
    D3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ImageViewKind {
    D1,
    D1Array,
    D2,
    D2Array,
    Cube,
    CubeArray,
    D3,
}

#[derive(Clone, Copy, Debug)]
pub struct BufferCreateInfo {
    pub size: u64,
    pub usage: BufferUsageFlags,
}

#[derive(Clone, Copy, Debug)]
pub struct ImageCreateInfo {
    pub kind: ImageKind,
    pub format: PixelFormat,
    pub extent: Extent3,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub samples: u32,
    pub usage: ImageUsageFlags,
    pub cube_compatible: bool,
    pub initial_layout: ImageLayout,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ImageSubresourceRange {
    pub aspect: AspectFlags,
    pub base_mip_level: u32,
    pub level_count: u32,
    pub base_array_layer: u32,
    pub layer_count: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ImageSubresourceLayers {
    pub aspect: AspectFlags,
    pub mip_level: u32,
    pub base_array_layer: u32,
    pub layer_count: u32,
}

#[derive(Clone, Copy, Debug)]
pub struct ImageViewCreateInfo {
    pub image: Image,
    pub kind: ImageViewKind,
    pub format: PixelFormat,
    pub range: ImageSubresourceRange,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryBarrier {
    pub src_access: AccessFlags,
    pub dst_access: AccessFlags,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageBarrier {
    pub image: Image,
    pub old_layout: ImageLayout,
    pub new_layout: ImageLayout,
    pub src_access: AccessFlags,
    pub dst_access: AccessFlags,
    pub range: ImageSubresourceRange,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferCopy {
    pub src_offset: u64,
    pub dst_offset: u64,
    pub size: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageCopy {
    pub src_subresource: ImageSubresourceLayers,
    pub src_offset: Offset3,
    pub dst_subresource: ImageSubresourceLayers,
    pub dst_offset: Offset3,
    pub extent: Extent3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferImageCopy {
    pub buffer_offset: u64,
    pub buffer_row_length: u32,
    pub buffer_image_height: u32,
    pub image_subresource: ImageSubresourceLayers,
    pub image_offset: Offset3,
    pub image_extent: Extent3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageBlit {
    pub src_subresource: ImageSubresourceLayers,
    pub src_offsets: [Offset3; 2],
    pub dst_subresource: ImageSubresourceLayers,
    pub dst_offsets: [Offset3; 2],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageResolve {
    pub src_subresource: ImageSubresourceLayers,
    pub src_offset: Offset3,
    pub dst_subresource: ImageSubresourceLayers,
    pub dst_offset: Offset3,
    pub extent: Extent3,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ClearValue {
    Color([f32; 4]),
    DepthStencil { depth: f32, stencil: u32 },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClearAttachment {
    pub aspect: AspectFlags,
    pub color_attachment: u32,
    pub value: ClearValue,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClearRect {
    pub rect: Rect,
    pub base_array_layer: u32,
    pub layer_count: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AttachmentLoadOp {
    Load,
    Clear,
    DontCare,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AttachmentStoreOp {
    Store,
    DontCare,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AttachmentDescription {
    pub format: PixelFormat,
    pub samples: u32,
    pub load_op: AttachmentLoadOp,
    pub store_op: AttachmentStoreOp,
    pub stencil_load_op: AttachmentLoadOp,
    pub stencil_store_op: AttachmentStoreOp,
    pub initial_layout: ImageLayout,
    pub final_layout: ImageLayout,
}

/// Single-subpass render pass.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RenderPassCreateInfo {
    pub colors: SmallVec<[AttachmentDescription; 4]>,
    pub depth: Option<AttachmentDescription>,

    /// Adds dependency from external color output to the subpass color output.
    pub external_dependency: bool,
}

#[derive(Clone, Debug)]
pub struct FramebufferCreateInfo {
    pub render_pass: RenderPass,
    pub attachments: SmallVec<[ImageView; 5]>,
    pub extent: Extent2,
    pub layers: u32,
}

#[derive(Clone, Copy, Debug)]
pub struct RenderPassBeginInfo<'a> {
    pub render_pass: RenderPass,
    pub framebuffer: Framebuffer,
    pub area: Rect,
    pub clear_values: &'a [ClearValue],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DescriptorType {
    Sampler,
    SampledImage,
    StorageImage,
    UniformBuffer,
    StorageBuffer,
    UniformBufferDynamic,
    StorageBufferDynamic,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DescriptorSetLayoutBinding {
    pub binding: u32,
    pub ty: DescriptorType,
    pub stages: ShaderStages,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DescriptorResource {
    Buffer { buffer: Buffer, offset: u64, range: u64 },
    Image { view: ImageView, layout: ImageLayout },
    Sampler(Sampler),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DescriptorWrite {
    pub binding: u32,
    pub ty: DescriptorType,
    pub resource: DescriptorResource,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PipelineBindPoint {
    Graphics,
    Compute,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpecializationEntry {
    pub constant_id: u32,
    pub offset: u32,
    pub size: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SpecializationInfo {
    pub entries: Vec<SpecializationEntry>,
    pub data: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct ShaderStageCreateInfo {
    pub module: ShaderModule,
    pub stage: ShaderStages,
    pub entry: String,
    pub specialization: SpecializationInfo,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexBindingDescription {
    pub binding: u32,
    pub stride: u32,
    pub per_instance: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexAttributeDescription {
    pub location: u32,
    pub binding: u32,
    pub format: VertexElementFormat,
    pub offset: u32,
}

#[derive(Clone, Debug)]
pub struct GraphicsPipelineCreateInfo {
    pub layout: PipelineLayout,
    pub render_pass: RenderPass,
    pub stages: Vec<ShaderStageCreateInfo>,
    pub vertex_bindings: Vec<VertexBindingDescription>,
    pub vertex_attributes: Vec<VertexAttributeDescription>,
    pub topology: PrimitiveTopology,
    pub rasterizer: RasterizerStateInfo,
    pub depth_stencil: DepthStencilStateInfo,
    pub blend: BlendStateInfo,
    pub samples: u32,
}

#[derive(Clone, Debug)]
pub struct ComputePipelineCreateInfo {
    pub layout: PipelineLayout,
    pub stage: ShaderStageCreateInfo,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ColorSpace {
    SrgbNonlinear,
    Other(i32),
}

/// Format reported by a surface.
/// `format` is `None` when the surface does not restrict the format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SurfaceFormat {
    pub format: Option<PixelFormat>,
    pub color_space: ColorSpace,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PresentMode {
    Immediate,
    Mailbox,
    Fifo,
    FifoRelaxed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfaceCapabilities {
    pub min_image_count: u32,

    /// Zero means no limit.
    pub max_image_count: u32,
    pub current_extent: Extent2,
    pub min_extent: Extent2,
    pub max_extent: Extent2,
}

#[derive(Clone, Copy, Debug)]
pub struct SwapchainCreateInfo {
    pub surface: Surface,
    pub image_count: u32,
    pub format: PixelFormat,
    pub color_space: ColorSpace,
    pub extent: Extent2,
    pub usage: ImageUsageFlags,
    pub present_mode: PresentMode,
    pub old_swapchain: Swapchain,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireResult {
    Success(u32),
    Suboptimal(u32),
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentResult {
    Success,
    Suboptimal,
    OutOfDate,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FormatProperties {
    pub linear_tiling: FormatFeatureFlags,
    pub optimal_tiling: FormatFeatureFlags,
    pub buffer: FormatFeatureFlags,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageFormatProperties {
    pub max_extent: Extent3,
    pub max_mip_levels: u32,
    pub max_array_layers: u32,
    pub sample_counts: SampleCountFlags,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SubresourceLayout {
    pub offset: u64,
    pub size: u64,
    pub row_pitch: u64,
    pub array_pitch: u64,
    pub depth_pitch: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryRequirements {
    pub size: u64,
    pub alignment: u64,
    pub memory_type_bits: u32,
    pub prefers_dedicated: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryRequest {
    pub requirements: MemoryRequirements,
    pub host_visible: bool,
    pub dedicated: bool,
}

/// Pointer to mapped device memory.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct MappedPtr(NonNull<u8>);

// Mapped memory is plain bytes owned by the memory block.
// Synchronization of accesses is on the user.
unsafe impl Send for MappedPtr {}
unsafe impl Sync for MappedPtr {}

impl MappedPtr {
    pub fn new(ptr: NonNull<u8>) -> Self {
        MappedPtr(ptr)
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.0.as_ptr()
    }

    /// Returns pointer `offset` bytes further.
    ///
    /// # Safety
    ///
    /// Result must stay within the mapped range.
    pub unsafe fn add(&self, offset: u64) -> Self {
        MappedPtr(NonNull::new_unchecked(self.0.as_ptr().add(offset as usize)))
    }
}

impl fmt::Debug for MappedPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:p}", self.0)
    }
}

/// Range of device memory handed out by the memory provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryBlock {
    pub memory: Memory,
    pub offset: u64,
    pub size: u64,

    /// Set when the block is persistently mapped.
    pub mapped: Option<MappedPtr>,

    /// Provider-private identifier.
    pub id: usize,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DeviceLimits {
    pub min_uniform_buffer_offset_alignment: u64,
    pub min_storage_buffer_offset_alignment: u64,
    pub max_sampler_anisotropy: f32,
    pub max_viewports: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeviceFeatures {
    pub geometry_shader: bool,
    pub tessellation_shader: bool,
    pub multi_viewport: bool,
    pub draw_indirect_first_instance: bool,
    pub fill_mode_non_solid: bool,
    pub sampler_anisotropy: bool,
    pub depth_clamp: bool,
    pub independent_blend: bool,
    pub shader_float64: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DeviceInfo {
    pub device_name: String,
    pub driver_name: String,
    pub api_version: (u32, u32, u32),
    pub limits: DeviceLimits,
    pub features: DeviceFeatures,

    /// Debug marker extension is enabled.
    pub debug_markers: bool,

    /// Clip space Y axis points down as in other APIs.
    pub standard_clip_space_y: bool,
}

/// Window and display a surface is created for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfaceSource {
    pub window: RawWindowHandle,
    pub display: RawDisplayHandle,
}

// Handles are only passed back to the windowing system by the driver.
unsafe impl Send for SurfaceSource {}
unsafe impl Sync for SurfaceSource {}

/// Native graphics API.
///
/// Implementations own the instance, the device and the queues.
/// All handles passed in must be created by the same driver.
pub trait Driver: Send + Sync + fmt::Debug + 'static {
    fn info(&self) -> &DeviceInfo;

    /// Returns and clears pending error-severity validation message.
    fn take_validation_error(&self) -> Option<String>;

    // Queues
    fn queue_submit(&self, command_buffers: &[CommandBuffer], fence: Fence)
        -> Result<(), NativeError>;
    fn queue_wait_idle(&self) -> Result<(), NativeError>;
    fn device_wait_idle(&self) -> Result<(), NativeError>;

    // Memory
    fn buffer_memory_requirements(&self, buffer: Buffer) -> MemoryRequirements;
    fn image_memory_requirements(&self, image: Image) -> MemoryRequirements;
    fn allocate_memory(&self, request: &MemoryRequest) -> Result<MemoryBlock, NativeError>;
    fn free_memory(&self, block: MemoryBlock);
    fn bind_buffer_memory(&self, buffer: Buffer, block: &MemoryBlock) -> Result<(), NativeError>;
    fn bind_image_memory(&self, image: Image, block: &MemoryBlock) -> Result<(), NativeError>;
    fn map_memory(&self, block: &MemoryBlock) -> Result<MappedPtr, NativeError>;
    fn unmap_memory(&self, block: &MemoryBlock);

    // Resources
    fn create_buffer(&self, info: &BufferCreateInfo) -> Result<Buffer, NativeError>;
    fn destroy_buffer(&self, buffer: Buffer);
    fn create_image(&self, info: &ImageCreateInfo) -> Result<Image, NativeError>;
    fn destroy_image(&self, image: Image);
    fn create_image_view(&self, info: &ImageViewCreateInfo) -> Result<ImageView, NativeError>;
    fn destroy_image_view(&self, view: ImageView);
    fn create_sampler(&self, info: &SamplerInfo) -> Result<Sampler, NativeError>;
    fn destroy_sampler(&self, sampler: Sampler);
    fn create_shader_module(&self, code: &[u32]) -> Result<ShaderModule, NativeError>;
    fn destroy_shader_module(&self, module: ShaderModule);

    // Descriptors
    fn create_descriptor_set_layout(
        &self,
        bindings: &[DescriptorSetLayoutBinding],
    ) -> Result<DescriptorSetLayout, NativeError>;
    fn destroy_descriptor_set_layout(&self, layout: DescriptorSetLayout);
    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        counts: &DescriptorResourceCounts,
    ) -> Result<DescriptorPool, NativeError>;
    fn destroy_descriptor_pool(&self, pool: DescriptorPool);
    fn allocate_descriptor_set(
        &self,
        pool: DescriptorPool,
        layout: DescriptorSetLayout,
    ) -> Result<DescriptorSet, NativeError>;
    fn free_descriptor_set(&self, pool: DescriptorPool, set: DescriptorSet)
        -> Result<(), NativeError>;
    fn update_descriptor_set(&self, set: DescriptorSet, writes: &[DescriptorWrite]);

    // Pipelines
    fn create_pipeline_layout(
        &self,
        set_layouts: &[DescriptorSetLayout],
    ) -> Result<PipelineLayout, NativeError>;
    fn destroy_pipeline_layout(&self, layout: PipelineLayout);
    fn create_render_pass(&self, info: &RenderPassCreateInfo) -> Result<RenderPass, NativeError>;
    fn destroy_render_pass(&self, render_pass: RenderPass);
    fn create_framebuffer(&self, info: &FramebufferCreateInfo) -> Result<Framebuffer, NativeError>;
    fn destroy_framebuffer(&self, framebuffer: Framebuffer);
    fn create_graphics_pipeline(
        &self,
        info: &GraphicsPipelineCreateInfo,
    ) -> Result<Pipeline, NativeError>;
    fn create_compute_pipeline(
        &self,
        info: &ComputePipelineCreateInfo,
    ) -> Result<Pipeline, NativeError>;
    fn destroy_pipeline(&self, pipeline: Pipeline);

    // Command pools and buffers
    fn create_command_pool(&self, transient: bool) -> Result<CommandPool, NativeError>;
    fn destroy_command_pool(&self, pool: CommandPool);
    fn reset_command_pool(&self, pool: CommandPool) -> Result<(), NativeError>;
    fn allocate_command_buffer(&self, pool: CommandPool) -> Result<CommandBuffer, NativeError>;
    fn reset_command_buffer(&self, cb: CommandBuffer) -> Result<(), NativeError>;
    fn begin_command_buffer(&self, cb: CommandBuffer, one_time_submit: bool)
        -> Result<(), NativeError>;
    fn end_command_buffer(&self, cb: CommandBuffer) -> Result<(), NativeError>;

    // Recording
    fn cmd_begin_render_pass(&self, cb: CommandBuffer, info: &RenderPassBeginInfo<'_>);
    fn cmd_end_render_pass(&self, cb: CommandBuffer);
    fn cmd_clear_attachments(
        &self,
        cb: CommandBuffer,
        attachments: &[ClearAttachment],
        rects: &[ClearRect],
    );
    fn cmd_pipeline_barrier(
        &self,
        cb: CommandBuffer,
        src_stages: PipelineStageFlags,
        dst_stages: PipelineStageFlags,
        memory_barriers: &[MemoryBarrier],
        image_barriers: &[ImageBarrier],
    );
    fn cmd_bind_pipeline(&self, cb: CommandBuffer, bind_point: PipelineBindPoint, pipeline: Pipeline);
    fn cmd_bind_descriptor_sets(
        &self,
        cb: CommandBuffer,
        bind_point: PipelineBindPoint,
        layout: PipelineLayout,
        first_set: u32,
        sets: &[DescriptorSet],
        dynamic_offsets: &[u32],
    );
    fn cmd_bind_vertex_buffer(&self, cb: CommandBuffer, binding: u32, buffer: Buffer, offset: u64);
    fn cmd_bind_index_buffer(
        &self,
        cb: CommandBuffer,
        buffer: Buffer,
        offset: u64,
        format: IndexFormat,
    );
    fn cmd_set_viewport(&self, cb: CommandBuffer, index: u32, viewport: &Viewport);
    fn cmd_set_scissor(&self, cb: CommandBuffer, index: u32, rect: &Rect);
    fn cmd_draw(
        &self,
        cb: CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    );
    fn cmd_draw_indexed(
        &self,
        cb: CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    );
    fn cmd_draw_indirect(
        &self,
        cb: CommandBuffer,
        buffer: Buffer,
        offset: u64,
        draw_count: u32,
        stride: u32,
    );
    fn cmd_draw_indexed_indirect(
        &self,
        cb: CommandBuffer,
        buffer: Buffer,
        offset: u64,
        draw_count: u32,
        stride: u32,
    );
    fn cmd_dispatch(&self, cb: CommandBuffer, x: u32, y: u32, z: u32);
    fn cmd_dispatch_indirect(&self, cb: CommandBuffer, buffer: Buffer, offset: u64);
    fn cmd_copy_buffer(&self, cb: CommandBuffer, src: Buffer, dst: Buffer, regions: &[BufferCopy]);
    fn cmd_copy_image(
        &self,
        cb: CommandBuffer,
        src: Image,
        src_layout: ImageLayout,
        dst: Image,
        dst_layout: ImageLayout,
        regions: &[ImageCopy],
    );
    fn cmd_copy_buffer_to_image(
        &self,
        cb: CommandBuffer,
        src: Buffer,
        dst: Image,
        dst_layout: ImageLayout,
        regions: &[BufferImageCopy],
    );
    fn cmd_copy_image_to_buffer(
        &self,
        cb: CommandBuffer,
        src: Image,
        src_layout: ImageLayout,
        dst: Buffer,
        regions: &[BufferImageCopy],
    );
    fn cmd_blit_image(
        &self,
        cb: CommandBuffer,
        src: Image,
        src_layout: ImageLayout,
        dst: Image,
        dst_layout: ImageLayout,
        regions: &[ImageBlit],
        filter: Filter,
    );
    fn cmd_resolve_image(
        &self,
        cb: CommandBuffer,
        src: Image,
        src_layout: ImageLayout,
        dst: Image,
        dst_layout: ImageLayout,
        regions: &[ImageResolve],
    );
    fn cmd_clear_color_image(
        &self,
        cb: CommandBuffer,
        image: Image,
        layout: ImageLayout,
        color: [f32; 4],
        range: &ImageSubresourceRange,
    );
    fn cmd_clear_depth_stencil_image(
        &self,
        cb: CommandBuffer,
        image: Image,
        layout: ImageLayout,
        depth: f32,
        stencil: u32,
        range: &ImageSubresourceRange,
    );
    fn cmd_debug_marker_begin(&self, cb: CommandBuffer, name: &str, color: [f32; 4]);
    fn cmd_debug_marker_end(&self, cb: CommandBuffer);
    fn cmd_debug_marker_insert(&self, cb: CommandBuffer, name: &str, color: [f32; 4]);

    // Fences
    fn create_fence(&self, signaled: bool) -> Result<Fence, NativeError>;
    fn destroy_fence(&self, fence: Fence);
    fn fence_status(&self, fence: Fence) -> Result<bool, NativeError>;
    fn reset_fences(&self, fences: &[Fence]) -> Result<(), NativeError>;

    /// Returns `false` on timeout.
    fn wait_for_fences(&self, fences: &[Fence], wait_all: bool, timeout_ns: u64)
        -> Result<bool, NativeError>;

    // Debug
    fn set_object_name(&self, ty: ObjectType, handle: u64, name: &str);

    // Format queries
    fn format_properties(&self, format: PixelFormat) -> FormatProperties;
    fn image_format_properties(
        &self,
        format: PixelFormat,
        kind: ImageKind,
        usage: ImageUsageFlags,
        cube_compatible: bool,
    ) -> Result<ImageFormatProperties, NativeError>;

    // Surfaces and swapchains
    fn create_surface(&self, source: &SurfaceSource) -> Result<Surface, NativeError>;
    fn destroy_surface(&self, surface: Surface);
    fn surface_supported(&self, surface: Surface) -> Result<bool, NativeError>;
    fn surface_capabilities(&self, surface: Surface) -> Result<SurfaceCapabilities, NativeError>;
    fn surface_formats(&self, surface: Surface) -> Result<Vec<SurfaceFormat>, NativeError>;
    fn surface_present_modes(&self, surface: Surface) -> Result<Vec<PresentMode>, NativeError>;
    fn create_swapchain(&self, info: &SwapchainCreateInfo) -> Result<Swapchain, NativeError>;
    fn destroy_swapchain(&self, swapchain: Swapchain);
    fn swapchain_images(&self, swapchain: Swapchain) -> Result<Vec<Image>, NativeError>;
    fn acquire_next_image(&self, swapchain: Swapchain, fence: Fence)
        -> Result<AcquireResult, NativeError>;
    fn queue_present(&self, swapchain: Swapchain, image_index: u32)
        -> Result<PresentResult, NativeError>;
}
