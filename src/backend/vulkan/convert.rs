use erupt::{
    extensions::{
        khr_surface::{ColorSpaceKHR, PresentModeKHR, SurfaceKHR},
        khr_swapchain as vksw,
    },
    vk1_0,
};

use crate::{
    dimensions::{Extent2, Extent3, Offset3, Rect, Viewport},
    format::{AspectFlags, PixelFormat},
    native::{
        self, AccessFlags, AttachmentLoadOp, AttachmentStoreOp, BufferCopy, BufferImageCopy,
        BufferUsageFlags, ColorSpace, DescriptorType, FormatFeatureFlags, ImageBlit, ImageCopy,
        ImageKind, ImageLayout, ImageResolve, ImageSubresourceLayers, ImageSubresourceRange,
        ImageUsageFlags, ImageViewKind, NativeError, PipelineBindPoint, PipelineStageFlags,
        PresentMode, ResultCode, SampleCountFlags,
    },
    pipeline::{
        BlendFactor, BlendFunction, ColorWriteMask, FaceCullMode, FrontFace, PolygonFillMode,
        PrimitiveTopology, StencilOperation, VertexElementFormat,
    },
    sampler::{BorderColor, CompareOp, Filter, MipmapMode, SamplerAddressMode},
    shader::ShaderStages,
    IndexFormat,
};

pub(crate) trait ToErupt<T> {
    fn to_erupt(self) -> T;
}

pub(crate) trait FromErupt<T> {
    fn from_erupt(value: T) -> Self;
}

pub(crate) fn from_erupt<T, U: FromErupt<T>>(value: T) -> U {
    U::from_erupt(value)
}

/// Maps a failed native call into [`NativeError`].
pub(crate) fn native_error(call: &'static str, result: vk1_0::Result) -> NativeError {
    let code = match result {
        vk1_0::Result::NOT_READY => ResultCode::NotReady,
        vk1_0::Result::TIMEOUT => ResultCode::Timeout,
        vk1_0::Result::INCOMPLETE => ResultCode::Incomplete,
        vk1_0::Result::SUBOPTIMAL_KHR => ResultCode::Suboptimal,
        vk1_0::Result::ERROR_OUT_OF_DATE_KHR => ResultCode::OutOfDate,
        vk1_0::Result::ERROR_OUT_OF_HOST_MEMORY => ResultCode::OutOfHostMemory,
        vk1_0::Result::ERROR_OUT_OF_DEVICE_MEMORY => ResultCode::OutOfDeviceMemory,
        vk1_0::Result::ERROR_INITIALIZATION_FAILED => ResultCode::InitializationFailed,
        vk1_0::Result::ERROR_DEVICE_LOST => ResultCode::DeviceLost,
        vk1_0::Result::ERROR_MEMORY_MAP_FAILED => ResultCode::MemoryMapFailed,
        vk1_0::Result::ERROR_LAYER_NOT_PRESENT => ResultCode::LayerNotPresent,
        vk1_0::Result::ERROR_EXTENSION_NOT_PRESENT => ResultCode::ExtensionNotPresent,
        vk1_0::Result::ERROR_FEATURE_NOT_PRESENT => ResultCode::FeatureNotPresent,
        vk1_0::Result::ERROR_INCOMPATIBLE_DRIVER => ResultCode::IncompatibleDriver,
        vk1_0::Result::ERROR_TOO_MANY_OBJECTS => ResultCode::TooManyObjects,
        vk1_0::Result::ERROR_FORMAT_NOT_SUPPORTED => ResultCode::FormatNotSupported,
        vk1_0::Result::ERROR_FRAGMENTED_POOL => ResultCode::FragmentedPool,
        vk1_0::Result::ERROR_OUT_OF_POOL_MEMORY => ResultCode::OutOfPoolMemory,
        vk1_0::Result::ERROR_SURFACE_LOST_KHR => ResultCode::SurfaceLost,
        vk1_0::Result::ERROR_NATIVE_WINDOW_IN_USE_KHR => ResultCode::NativeWindowInUse,
        other => ResultCode::Other(other.0),
    };
    NativeError::new(call, code)
}

pub(crate) fn memory_error(call: &'static str, err: gpu_alloc::AllocationError) -> NativeError {
    let code = match err {
        gpu_alloc::AllocationError::OutOfHostMemory => ResultCode::OutOfHostMemory,
        gpu_alloc::AllocationError::TooManyObjects => ResultCode::TooManyObjects,
        _ => ResultCode::OutOfDeviceMemory,
    };
    NativeError::new(call, code)
}

pub(crate) fn map_error(err: gpu_alloc::MapError) -> NativeError {
    let code = match err {
        gpu_alloc::MapError::OutOfDeviceMemory => ResultCode::OutOfDeviceMemory,
        gpu_alloc::MapError::OutOfHostMemory => ResultCode::OutOfHostMemory,
        _ => ResultCode::MemoryMapFailed,
    };
    NativeError::new("vkMapMemory", code)
}

macro_rules! raw_handles {
    ($($native:ident => $vk:path,)*) => {
        $(
            impl ToErupt<$vk> for native::$native {
                #[inline]
                fn to_erupt(self) -> $vk {
                    $vk(self.0)
                }
            }

            impl FromErupt<$vk> for native::$native {
                #[inline]
                fn from_erupt(value: $vk) -> Self {
                    native::$native(value.0)
                }
            }
        )*
    };
}

raw_handles! {
    Buffer => vk1_0::Buffer,
    Image => vk1_0::Image,
    ImageView => vk1_0::ImageView,
    Sampler => vk1_0::Sampler,
    ShaderModule => vk1_0::ShaderModule,
    DescriptorSetLayout => vk1_0::DescriptorSetLayout,
    PipelineLayout => vk1_0::PipelineLayout,
    Pipeline => vk1_0::Pipeline,
    RenderPass => vk1_0::RenderPass,
    Framebuffer => vk1_0::Framebuffer,
    DescriptorPool => vk1_0::DescriptorPool,
    DescriptorSet => vk1_0::DescriptorSet,
    CommandPool => vk1_0::CommandPool,
    Fence => vk1_0::Fence,
    Surface => SurfaceKHR,
    Swapchain => vksw::SwapchainKHR,
}

/// Null native handles turn into `None`.
pub(crate) fn optional<N, V>(handle: N) -> Option<V>
where
    N: ToErupt<V> + Copy + Default + PartialEq,
{
    if handle == N::default() {
        None
    } else {
        Some(handle.to_erupt())
    }
}

impl FromErupt<vk1_0::Format> for Option<PixelFormat> {
    fn from_erupt(format: vk1_0::Format) -> Self {
        match format {
            vk1_0::Format::R8_UNORM => Some(PixelFormat::R8Unorm),
            vk1_0::Format::R8_SNORM => Some(PixelFormat::R8Snorm),
            vk1_0::Format::R8_UINT => Some(PixelFormat::R8Uint),
            vk1_0::Format::R8_SINT => Some(PixelFormat::R8Sint),
            vk1_0::Format::R16_UNORM => Some(PixelFormat::R16Unorm),
            vk1_0::Format::R16_SNORM => Some(PixelFormat::R16Snorm),
            vk1_0::Format::R16_UINT => Some(PixelFormat::R16Uint),
            vk1_0::Format::R16_SINT => Some(PixelFormat::R16Sint),
            vk1_0::Format::R16_SFLOAT => Some(PixelFormat::R16Sfloat),
            vk1_0::Format::R32_UINT => Some(PixelFormat::R32Uint),
            vk1_0::Format::R32_SINT => Some(PixelFormat::R32Sint),
            vk1_0::Format::R32_SFLOAT => Some(PixelFormat::R32Sfloat),
            vk1_0::Format::R8G8_UNORM => Some(PixelFormat::RG8Unorm),
            vk1_0::Format::R8G8_SNORM => Some(PixelFormat::RG8Snorm),
            vk1_0::Format::R8G8_UINT => Some(PixelFormat::RG8Uint),
            vk1_0::Format::R8G8_SINT => Some(PixelFormat::RG8Sint),
            vk1_0::Format::R16G16_UNORM => Some(PixelFormat::RG16Unorm),
            vk1_0::Format::R16G16_SNORM => Some(PixelFormat::RG16Snorm),
            vk1_0::Format::R16G16_UINT => Some(PixelFormat::RG16Uint),
            vk1_0::Format::R16G16_SINT => Some(PixelFormat::RG16Sint),
            vk1_0::Format::R16G16_SFLOAT => Some(PixelFormat::RG16Sfloat),
            vk1_0::Format::R32G32_UINT => Some(PixelFormat::RG32Uint),
            vk1_0::Format::R32G32_SINT => Some(PixelFormat::RG32Sint),
            vk1_0::Format::R32G32_SFLOAT => Some(PixelFormat::RG32Sfloat),
            vk1_0::Format::R8G8B8A8_UNORM => Some(PixelFormat::RGBA8Unorm),
            vk1_0::Format::R8G8B8A8_SNORM => Some(PixelFormat::RGBA8Snorm),
            vk1_0::Format::R8G8B8A8_UINT => Some(PixelFormat::RGBA8Uint),
            vk1_0::Format::R8G8B8A8_SINT => Some(PixelFormat::RGBA8Sint),
            vk1_0::Format::R8G8B8A8_SRGB => Some(PixelFormat::RGBA8Srgb),
            vk1_0::Format::B8G8R8A8_UNORM => Some(PixelFormat::BGRA8Unorm),
            vk1_0::Format::B8G8R8A8_SRGB => Some(PixelFormat::BGRA8Srgb),
            vk1_0::Format::R16G16B16A16_UNORM => Some(PixelFormat::RGBA16Unorm),
            vk1_0::Format::R16G16B16A16_SNORM => Some(PixelFormat::RGBA16Snorm),
            vk1_0::Format::R16G16B16A16_UINT => Some(PixelFormat::RGBA16Uint),
            vk1_0::Format::R16G16B16A16_SINT => Some(PixelFormat::RGBA16Sint),
            vk1_0::Format::R16G16B16A16_SFLOAT => Some(PixelFormat::RGBA16Sfloat),
            vk1_0::Format::R32G32B32A32_UINT => Some(PixelFormat::RGBA32Uint),
            vk1_0::Format::R32G32B32A32_SINT => Some(PixelFormat::RGBA32Sint),
            vk1_0::Format::R32G32B32A32_SFLOAT => Some(PixelFormat::RGBA32Sfloat),
            vk1_0::Format::A2B10G10R10_UNORM_PACK32 => Some(PixelFormat::A2BGR10Unorm),
            vk1_0::Format::A2B10G10R10_UINT_PACK32 => Some(PixelFormat::A2BGR10Uint),
            vk1_0::Format::B10G11R11_UFLOAT_PACK32 => Some(PixelFormat::B10GR11Ufloat),
            vk1_0::Format::D16_UNORM => Some(PixelFormat::D16Unorm),
            vk1_0::Format::D32_SFLOAT => Some(PixelFormat::D32Sfloat),
            vk1_0::Format::D24_UNORM_S8_UINT => Some(PixelFormat::D24UnormS8Uint),
            vk1_0::Format::D32_SFLOAT_S8_UINT => Some(PixelFormat::D32SfloatS8Uint),
            vk1_0::Format::BC1_RGB_UNORM_BLOCK => Some(PixelFormat::BC1RgbUnorm),
            vk1_0::Format::BC1_RGB_SRGB_BLOCK => Some(PixelFormat::BC1RgbSrgb),
            vk1_0::Format::BC1_RGBA_UNORM_BLOCK => Some(PixelFormat::BC1RgbaUnorm),
            vk1_0::Format::BC1_RGBA_SRGB_BLOCK => Some(PixelFormat::BC1RgbaSrgb),
            vk1_0::Format::BC2_UNORM_BLOCK => Some(PixelFormat::BC2Unorm),
            vk1_0::Format::BC2_SRGB_BLOCK => Some(PixelFormat::BC2Srgb),
            vk1_0::Format::BC3_UNORM_BLOCK => Some(PixelFormat::BC3Unorm),
            vk1_0::Format::BC3_SRGB_BLOCK => Some(PixelFormat::BC3Srgb),
            vk1_0::Format::BC4_UNORM_BLOCK => Some(PixelFormat::BC4Unorm),
            vk1_0::Format::BC4_SNORM_BLOCK => Some(PixelFormat::BC4Snorm),
            vk1_0::Format::BC5_UNORM_BLOCK => Some(PixelFormat::BC5Unorm),
            vk1_0::Format::BC5_SNORM_BLOCK => Some(PixelFormat::BC5Snorm),
            vk1_0::Format::BC7_UNORM_BLOCK => Some(PixelFormat::BC7Unorm),
            vk1_0::Format::BC7_SRGB_BLOCK => Some(PixelFormat::BC7Srgb),
            _ => None,
        }
    }
}

impl ToErupt<vk1_0::Format> for PixelFormat {
    fn to_erupt(self) -> vk1_0::Format {
        match self {
            PixelFormat::R8Unorm => vk1_0::Format::R8_UNORM,
            PixelFormat::R8Snorm => vk1_0::Format::R8_SNORM,
            PixelFormat::R8Uint => vk1_0::Format::R8_UINT,
            PixelFormat::R8Sint => vk1_0::Format::R8_SINT,
            PixelFormat::R16Unorm => vk1_0::Format::R16_UNORM,
            PixelFormat::R16Snorm => vk1_0::Format::R16_SNORM,
            PixelFormat::R16Uint => vk1_0::Format::R16_UINT,
            PixelFormat::R16Sint => vk1_0::Format::R16_SINT,
            PixelFormat::R16Sfloat => vk1_0::Format::R16_SFLOAT,
            PixelFormat::R32Uint => vk1_0::Format::R32_UINT,
            PixelFormat::R32Sint => vk1_0::Format::R32_SINT,
            PixelFormat::R32Sfloat => vk1_0::Format::R32_SFLOAT,
            PixelFormat::RG8Unorm => vk1_0::Format::R8G8_UNORM,
            PixelFormat::RG8Snorm => vk1_0::Format::R8G8_SNORM,
            PixelFormat::RG8Uint => vk1_0::Format::R8G8_UINT,
            PixelFormat::RG8Sint => vk1_0::Format::R8G8_SINT,
            PixelFormat::RG16Unorm => vk1_0::Format::R16G16_UNORM,
            PixelFormat::RG16Snorm => vk1_0::Format::R16G16_SNORM,
            PixelFormat::RG16Uint => vk1_0::Format::R16G16_UINT,
            PixelFormat::RG16Sint => vk1_0::Format::R16G16_SINT,
            PixelFormat::RG16Sfloat => vk1_0::Format::R16G16_SFLOAT,
            PixelFormat::RG32Uint => vk1_0::Format::R32G32_UINT,
            PixelFormat::RG32Sint => vk1_0::Format::R32G32_SINT,
            PixelFormat::RG32Sfloat => vk1_0::Format::R32G32_SFLOAT,
            PixelFormat::RGBA8Unorm => vk1_0::Format::R8G8B8A8_UNORM,
            PixelFormat::RGBA8Snorm => vk1_0::Format::R8G8B8A8_SNORM,
            PixelFormat::RGBA8Uint => vk1_0::Format::R8G8B8A8_UINT,
            PixelFormat::RGBA8Sint => vk1_0::Format::R8G8B8A8_SINT,
            PixelFormat::RGBA8Srgb => vk1_0::Format::R8G8B8A8_SRGB,
            PixelFormat::BGRA8Unorm => vk1_0::Format::B8G8R8A8_UNORM,
            PixelFormat::BGRA8Srgb => vk1_0::Format::B8G8R8A8_SRGB,
            PixelFormat::RGBA16Unorm => vk1_0::Format::R16G16B16A16_UNORM,
            PixelFormat::RGBA16Snorm => vk1_0::Format::R16G16B16A16_SNORM,
            PixelFormat::RGBA16Uint => vk1_0::Format::R16G16B16A16_UINT,
            PixelFormat::RGBA16Sint => vk1_0::Format::R16G16B16A16_SINT,
            PixelFormat::RGBA16Sfloat => vk1_0::Format::R16G16B16A16_SFLOAT,
            PixelFormat::RGBA32Uint => vk1_0::Format::R32G32B32A32_UINT,
            PixelFormat::RGBA32Sint => vk1_0::Format::R32G32B32A32_SINT,
            PixelFormat::RGBA32Sfloat => vk1_0::Format::R32G32B32A32_SFLOAT,
            PixelFormat::A2BGR10Unorm => vk1_0::Format::A2B10G10R10_UNORM_PACK32,
            PixelFormat::A2BGR10Uint => vk1_0::Format::A2B10G10R10_UINT_PACK32,
            PixelFormat::B10GR11Ufloat => vk1_0::Format::B10G11R11_UFLOAT_PACK32,
            PixelFormat::D16Unorm => vk1_0::Format::D16_UNORM,
            PixelFormat::D32Sfloat => vk1_0::Format::D32_SFLOAT,
            PixelFormat::D24UnormS8Uint => vk1_0::Format::D24_UNORM_S8_UINT,
            PixelFormat::D32SfloatS8Uint => vk1_0::Format::D32_SFLOAT_S8_UINT,
            PixelFormat::BC1RgbUnorm => vk1_0::Format::BC1_RGB_UNORM_BLOCK,
            PixelFormat::BC1RgbSrgb => vk1_0::Format::BC1_RGB_SRGB_BLOCK,
            PixelFormat::BC1RgbaUnorm => vk1_0::Format::BC1_RGBA_UNORM_BLOCK,
            PixelFormat::BC1RgbaSrgb => vk1_0::Format::BC1_RGBA_SRGB_BLOCK,
            PixelFormat::BC2Unorm => vk1_0::Format::BC2_UNORM_BLOCK,
            PixelFormat::BC2Srgb => vk1_0::Format::BC2_SRGB_BLOCK,
            PixelFormat::BC3Unorm => vk1_0::Format::BC3_UNORM_BLOCK,
            PixelFormat::BC3Srgb => vk1_0::Format::BC3_SRGB_BLOCK,
            PixelFormat::BC4Unorm => vk1_0::Format::BC4_UNORM_BLOCK,
            PixelFormat::BC4Snorm => vk1_0::Format::BC4_SNORM_BLOCK,
            PixelFormat::BC5Unorm => vk1_0::Format::BC5_UNORM_BLOCK,
            PixelFormat::BC5Snorm => vk1_0::Format::BC5_SNORM_BLOCK,
            PixelFormat::BC7Unorm => vk1_0::Format::BC7_UNORM_BLOCK,
            PixelFormat::BC7Srgb => vk1_0::Format::BC7_SRGB_BLOCK,
        }
    }
}

impl ToErupt<vk1_0::Format> for VertexElementFormat {
    fn to_erupt(self) -> vk1_0::Format {
        use VertexElementFormat::*;

        match self {
            Float1 => vk1_0::Format::R32_SFLOAT,
            Float2 => vk1_0::Format::R32G32_SFLOAT,
            Float3 => vk1_0::Format::R32G32B32_SFLOAT,
            Float4 => vk1_0::Format::R32G32B32A32_SFLOAT,
            Byte2Norm => vk1_0::Format::R8G8_UNORM,
            Byte2 => vk1_0::Format::R8G8_UINT,
            Byte4Norm => vk1_0::Format::R8G8B8A8_UNORM,
            Byte4 => vk1_0::Format::R8G8B8A8_UINT,
            SByte2Norm => vk1_0::Format::R8G8_SNORM,
            SByte2 => vk1_0::Format::R8G8_SINT,
            SByte4Norm => vk1_0::Format::R8G8B8A8_SNORM,
            SByte4 => vk1_0::Format::R8G8B8A8_SINT,
            UShort2Norm => vk1_0::Format::R16G16_UNORM,
            UShort2 => vk1_0::Format::R16G16_UINT,
            UShort4Norm => vk1_0::Format::R16G16B16A16_UNORM,
            UShort4 => vk1_0::Format::R16G16B16A16_UINT,
            Short2Norm => vk1_0::Format::R16G16_SNORM,
            Short2 => vk1_0::Format::R16G16_SINT,
            Short4Norm => vk1_0::Format::R16G16B16A16_SNORM,
            Short4 => vk1_0::Format::R16G16B16A16_SINT,
            UInt1 => vk1_0::Format::R32_UINT,
            UInt2 => vk1_0::Format::R32G32_UINT,
            UInt3 => vk1_0::Format::R32G32B32_UINT,
            UInt4 => vk1_0::Format::R32G32B32A32_UINT,
            Int1 => vk1_0::Format::R32_SINT,
            Int2 => vk1_0::Format::R32G32_SINT,
            Int3 => vk1_0::Format::R32G32B32_SINT,
            Int4 => vk1_0::Format::R32G32B32A32_SINT,
            Half1 => vk1_0::Format::R16_SFLOAT,
            Half2 => vk1_0::Format::R16G16_SFLOAT,
            Half4 => vk1_0::Format::R16G16B16A16_SFLOAT,
        }
    }
}

impl FromErupt<vk1_0::Extent2D> for Extent2 {
    fn from_erupt(extent: vk1_0::Extent2D) -> Self {
        Extent2::new(extent.width, extent.height)
    }
}

impl ToErupt<vk1_0::Extent2D> for Extent2 {
    fn to_erupt(self) -> vk1_0::Extent2D {
        vk1_0::Extent2D {
            width: self.width,
            height: self.height,
        }
    }
}

impl FromErupt<vk1_0::Extent3D> for Extent3 {
    fn from_erupt(extent: vk1_0::Extent3D) -> Self {
        Extent3::new(extent.width, extent.height, extent.depth)
    }
}

impl ToErupt<vk1_0::Extent3D> for Extent3 {
    fn to_erupt(self) -> vk1_0::Extent3D {
        vk1_0::Extent3D {
            width: self.width,
            height: self.height,
            depth: self.depth,
        }
    }
}

impl ToErupt<vk1_0::Offset3D> for Offset3 {
    fn to_erupt(self) -> vk1_0::Offset3D {
        vk1_0::Offset3D {
            x: self.x,
            y: self.y,
            z: self.z,
        }
    }
}

impl ToErupt<vk1_0::Rect2D> for Rect {
    fn to_erupt(self) -> vk1_0::Rect2D {
        vk1_0::Rect2D {
            offset: vk1_0::Offset2D {
                x: self.x,
                y: self.y,
            },
            extent: vk1_0::Extent2D {
                width: self.width,
                height: self.height,
            },
        }
    }
}

impl ToErupt<vk1_0::Viewport> for Viewport {
    fn to_erupt(self) -> vk1_0::Viewport {
        vk1_0::Viewport {
            x: self.x,
            y: self.y,
            width: self.width,
            height: self.height,
            min_depth: self.min_depth,
            max_depth: self.max_depth,
        }
    }
}

// Flags below share bit values with their native counterparts.

impl ToErupt<vk1_0::AccessFlags> for AccessFlags {
    fn to_erupt(self) -> vk1_0::AccessFlags {
        vk1_0::AccessFlags::from_bits_truncate(self.bits())
    }
}

impl ToErupt<vk1_0::PipelineStageFlags> for PipelineStageFlags {
    fn to_erupt(self) -> vk1_0::PipelineStageFlags {
        vk1_0::PipelineStageFlags::from_bits_truncate(self.bits())
    }
}

impl ToErupt<vk1_0::BufferUsageFlags> for BufferUsageFlags {
    fn to_erupt(self) -> vk1_0::BufferUsageFlags {
        vk1_0::BufferUsageFlags::from_bits_truncate(self.bits())
    }
}

impl ToErupt<vk1_0::ImageUsageFlags> for ImageUsageFlags {
    fn to_erupt(self) -> vk1_0::ImageUsageFlags {
        vk1_0::ImageUsageFlags::from_bits_truncate(self.bits())
    }
}

impl FromErupt<vk1_0::FormatFeatureFlags> for FormatFeatureFlags {
    fn from_erupt(flags: vk1_0::FormatFeatureFlags) -> Self {
        FormatFeatureFlags::from_bits_truncate(flags.bits())
    }
}

impl FromErupt<vk1_0::SampleCountFlags> for SampleCountFlags {
    fn from_erupt(flags: vk1_0::SampleCountFlags) -> Self {
        SampleCountFlags::from_bits_truncate(flags.bits())
    }
}

impl ToErupt<vk1_0::ImageAspectFlags> for AspectFlags {
    fn to_erupt(self) -> vk1_0::ImageAspectFlags {
        vk1_0::ImageAspectFlags::from_bits_truncate(self.bits())
    }
}

impl ToErupt<vk1_0::ShaderStageFlags> for ShaderStages {
    fn to_erupt(self) -> vk1_0::ShaderStageFlags {
        vk1_0::ShaderStageFlags::from_bits_truncate(self.bits())
    }
}

impl ToErupt<vk1_0::ShaderStageFlagBits> for ShaderStages {
    fn to_erupt(self) -> vk1_0::ShaderStageFlagBits {
        if self.contains(ShaderStages::VERTEX) {
            vk1_0::ShaderStageFlagBits::VERTEX
        } else if self.contains(ShaderStages::TESSELLATION_CONTROL) {
            vk1_0::ShaderStageFlagBits::TESSELLATION_CONTROL
        } else if self.contains(ShaderStages::TESSELLATION_EVALUATION) {
            vk1_0::ShaderStageFlagBits::TESSELLATION_EVALUATION
        } else if self.contains(ShaderStages::GEOMETRY) {
            vk1_0::ShaderStageFlagBits::GEOMETRY
        } else if self.contains(ShaderStages::FRAGMENT) {
            vk1_0::ShaderStageFlagBits::FRAGMENT
        } else {
            vk1_0::ShaderStageFlagBits::COMPUTE
        }
    }
}

pub(crate) fn sample_count(samples: u32) -> vk1_0::SampleCountFlagBits {
    match samples {
        2 => vk1_0::SampleCountFlagBits::_2,
        4 => vk1_0::SampleCountFlagBits::_4,
        8 => vk1_0::SampleCountFlagBits::_8,
        16 => vk1_0::SampleCountFlagBits::_16,
        32 => vk1_0::SampleCountFlagBits::_32,
        64 => vk1_0::SampleCountFlagBits::_64,
        _ => vk1_0::SampleCountFlagBits::_1,
    }
}

impl ToErupt<vk1_0::ImageLayout> for ImageLayout {
    fn to_erupt(self) -> vk1_0::ImageLayout {
        match self {
            ImageLayout::Undefined => vk1_0::ImageLayout::UNDEFINED,
            ImageLayout::General => vk1_0::ImageLayout::GENERAL,
            ImageLayout::ColorAttachmentOptimal => vk1_0::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            ImageLayout::DepthStencilAttachmentOptimal => {
                vk1_0::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
            }
            ImageLayout::DepthStencilReadOnlyOptimal => {
                vk1_0::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
            }
            ImageLayout::ShaderReadOnlyOptimal => vk1_0::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            ImageLayout::TransferSrcOptimal => vk1_0::ImageLayout::TRANSFER_SRC_OPTIMAL,
            ImageLayout::TransferDstOptimal => vk1_0::ImageLayout::TRANSFER_DST_OPTIMAL,
            ImageLayout::Preinitialized => vk1_0::ImageLayout::PREINITIALIZED,
            ImageLayout::PresentSrc => vk1_0::ImageLayout::PRESENT_SRC_KHR,
        }
    }
}

impl ToErupt<vk1_0::ImageType> for ImageKind {
    fn to_erupt(self) -> vk1_0::ImageType {
        match self {
            ImageKind::D1 => vk1_0::ImageType::_1D,
            ImageKind::D2 => vk1_0::ImageType::_2D,
            ImageKind::D3 => vk1_0::ImageType::_3D,
        }
    }
}

impl ToErupt<vk1_0::ImageViewType> for ImageViewKind {
    fn to_erupt(self) -> vk1_0::ImageViewType {
        match self {
            ImageViewKind::D1 => vk1_0::ImageViewType::_1D,
            ImageViewKind::D1Array => vk1_0::ImageViewType::_1D_ARRAY,
            ImageViewKind::D2 => vk1_0::ImageViewType::_2D,
            ImageViewKind::D2Array => vk1_0::ImageViewType::_2D_ARRAY,
            ImageViewKind::Cube => vk1_0::ImageViewType::CUBE,
            ImageViewKind::CubeArray => vk1_0::ImageViewType::CUBE_ARRAY,
            ImageViewKind::D3 => vk1_0::ImageViewType::_3D,
        }
    }
}

impl ToErupt<vk1_0::ImageSubresourceRange> for ImageSubresourceRange {
    fn to_erupt(self) -> vk1_0::ImageSubresourceRange {
        vk1_0::ImageSubresourceRange {
            aspect_mask: self.aspect.to_erupt(),
            base_mip_level: self.base_mip_level,
            level_count: self.level_count,
            base_array_layer: self.base_array_layer,
            layer_count: self.layer_count,
        }
    }
}

impl ToErupt<vk1_0::ImageSubresourceLayers> for ImageSubresourceLayers {
    fn to_erupt(self) -> vk1_0::ImageSubresourceLayers {
        vk1_0::ImageSubresourceLayers {
            aspect_mask: self.aspect.to_erupt(),
            mip_level: self.mip_level,
            base_array_layer: self.base_array_layer,
            layer_count: self.layer_count,
        }
    }
}

impl ToErupt<vk1_0::BufferCopy> for BufferCopy {
    fn to_erupt(self) -> vk1_0::BufferCopy {
        vk1_0::BufferCopy {
            src_offset: self.src_offset,
            dst_offset: self.dst_offset,
            size: self.size,
        }
    }
}

impl ToErupt<vk1_0::ImageCopy> for ImageCopy {
    fn to_erupt(self) -> vk1_0::ImageCopy {
        vk1_0::ImageCopy {
            src_subresource: self.src_subresource.to_erupt(),
            src_offset: self.src_offset.to_erupt(),
            dst_subresource: self.dst_subresource.to_erupt(),
            dst_offset: self.dst_offset.to_erupt(),
            extent: self.extent.to_erupt(),
        }
    }
}

impl ToErupt<vk1_0::BufferImageCopy> for BufferImageCopy {
    fn to_erupt(self) -> vk1_0::BufferImageCopy {
        vk1_0::BufferImageCopy {
            buffer_offset: self.buffer_offset,
            buffer_row_length: self.buffer_row_length,
            buffer_image_height: self.buffer_image_height,
            image_subresource: self.image_subresource.to_erupt(),
            image_offset: self.image_offset.to_erupt(),
            image_extent: self.image_extent.to_erupt(),
        }
    }
}

impl ToErupt<vk1_0::ImageBlit> for ImageBlit {
    fn to_erupt(self) -> vk1_0::ImageBlit {
        vk1_0::ImageBlit {
            src_subresource: self.src_subresource.to_erupt(),
            src_offsets: [
                self.src_offsets[0].to_erupt(),
                self.src_offsets[1].to_erupt(),
            ],
            dst_subresource: self.dst_subresource.to_erupt(),
            dst_offsets: [
                self.dst_offsets[0].to_erupt(),
                self.dst_offsets[1].to_erupt(),
            ],
        }
    }
}

impl ToErupt<vk1_0::ImageResolve> for ImageResolve {
    fn to_erupt(self) -> vk1_0::ImageResolve {
        vk1_0::ImageResolve {
            src_subresource: self.src_subresource.to_erupt(),
            src_offset: self.src_offset.to_erupt(),
            dst_subresource: self.dst_subresource.to_erupt(),
            dst_offset: self.dst_offset.to_erupt(),
            extent: self.extent.to_erupt(),
        }
    }
}

impl ToErupt<vk1_0::AttachmentLoadOp> for AttachmentLoadOp {
    fn to_erupt(self) -> vk1_0::AttachmentLoadOp {
        match self {
            AttachmentLoadOp::Load => vk1_0::AttachmentLoadOp::LOAD,
            AttachmentLoadOp::Clear => vk1_0::AttachmentLoadOp::CLEAR,
            AttachmentLoadOp::DontCare => vk1_0::AttachmentLoadOp::DONT_CARE,
        }
    }
}

impl ToErupt<vk1_0::AttachmentStoreOp> for AttachmentStoreOp {
    fn to_erupt(self) -> vk1_0::AttachmentStoreOp {
        match self {
            AttachmentStoreOp::Store => vk1_0::AttachmentStoreOp::STORE,
            AttachmentStoreOp::DontCare => vk1_0::AttachmentStoreOp::DONT_CARE,
        }
    }
}

impl ToErupt<vk1_0::DescriptorType> for DescriptorType {
    fn to_erupt(self) -> vk1_0::DescriptorType {
        match self {
            DescriptorType::Sampler => vk1_0::DescriptorType::SAMPLER,
            DescriptorType::SampledImage => vk1_0::DescriptorType::SAMPLED_IMAGE,
            DescriptorType::StorageImage => vk1_0::DescriptorType::STORAGE_IMAGE,
            DescriptorType::UniformBuffer => vk1_0::DescriptorType::UNIFORM_BUFFER,
            DescriptorType::StorageBuffer => vk1_0::DescriptorType::STORAGE_BUFFER,
            DescriptorType::UniformBufferDynamic => vk1_0::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
            DescriptorType::StorageBufferDynamic => vk1_0::DescriptorType::STORAGE_BUFFER_DYNAMIC,
        }
    }
}

impl ToErupt<vk1_0::PipelineBindPoint> for PipelineBindPoint {
    fn to_erupt(self) -> vk1_0::PipelineBindPoint {
        match self {
            PipelineBindPoint::Graphics => vk1_0::PipelineBindPoint::GRAPHICS,
            PipelineBindPoint::Compute => vk1_0::PipelineBindPoint::COMPUTE,
        }
    }
}

impl ToErupt<vk1_0::IndexType> for IndexFormat {
    fn to_erupt(self) -> vk1_0::IndexType {
        match self {
            IndexFormat::U16 => vk1_0::IndexType::UINT16,
            IndexFormat::U32 => vk1_0::IndexType::UINT32,
        }
    }
}

impl ToErupt<vk1_0::Filter> for Filter {
    fn to_erupt(self) -> vk1_0::Filter {
        match self {
            Filter::Nearest => vk1_0::Filter::NEAREST,
            Filter::Linear => vk1_0::Filter::LINEAR,
        }
    }
}

impl ToErupt<vk1_0::SamplerMipmapMode> for MipmapMode {
    fn to_erupt(self) -> vk1_0::SamplerMipmapMode {
        match self {
            MipmapMode::Nearest => vk1_0::SamplerMipmapMode::NEAREST,
            MipmapMode::Linear => vk1_0::SamplerMipmapMode::LINEAR,
        }
    }
}

impl ToErupt<vk1_0::SamplerAddressMode> for SamplerAddressMode {
    fn to_erupt(self) -> vk1_0::SamplerAddressMode {
        match self {
            SamplerAddressMode::Repeat => vk1_0::SamplerAddressMode::REPEAT,
            SamplerAddressMode::MirroredRepeat => vk1_0::SamplerAddressMode::MIRRORED_REPEAT,
            SamplerAddressMode::ClampToEdge => vk1_0::SamplerAddressMode::CLAMP_TO_EDGE,
            SamplerAddressMode::ClampToBorder => vk1_0::SamplerAddressMode::CLAMP_TO_BORDER,
        }
    }
}

impl ToErupt<vk1_0::BorderColor> for BorderColor {
    fn to_erupt(self) -> vk1_0::BorderColor {
        match self {
            BorderColor::TransparentBlack => vk1_0::BorderColor::FLOAT_TRANSPARENT_BLACK,
            BorderColor::OpaqueBlack => vk1_0::BorderColor::FLOAT_OPAQUE_BLACK,
            BorderColor::OpaqueWhite => vk1_0::BorderColor::FLOAT_OPAQUE_WHITE,
        }
    }
}

impl ToErupt<vk1_0::CompareOp> for CompareOp {
    fn to_erupt(self) -> vk1_0::CompareOp {
        match self {
            CompareOp::Never => vk1_0::CompareOp::NEVER,
            CompareOp::Less => vk1_0::CompareOp::LESS,
            CompareOp::Equal => vk1_0::CompareOp::EQUAL,
            CompareOp::LessOrEqual => vk1_0::CompareOp::LESS_OR_EQUAL,
            CompareOp::Greater => vk1_0::CompareOp::GREATER,
            CompareOp::NotEqual => vk1_0::CompareOp::NOT_EQUAL,
            CompareOp::GreaterOrEqual => vk1_0::CompareOp::GREATER_OR_EQUAL,
            CompareOp::Always => vk1_0::CompareOp::ALWAYS,
        }
    }
}

impl ToErupt<vk1_0::StencilOp> for StencilOperation {
    fn to_erupt(self) -> vk1_0::StencilOp {
        match self {
            StencilOperation::Keep => vk1_0::StencilOp::KEEP,
            StencilOperation::Zero => vk1_0::StencilOp::ZERO,
            StencilOperation::Replace => vk1_0::StencilOp::REPLACE,
            StencilOperation::IncrementAndClamp => vk1_0::StencilOp::INCREMENT_AND_CLAMP,
            StencilOperation::DecrementAndClamp => vk1_0::StencilOp::DECREMENT_AND_CLAMP,
            StencilOperation::Invert => vk1_0::StencilOp::INVERT,
            StencilOperation::IncrementAndWrap => vk1_0::StencilOp::INCREMENT_AND_WRAP,
            StencilOperation::DecrementAndWrap => vk1_0::StencilOp::DECREMENT_AND_WRAP,
        }
    }
}

impl ToErupt<vk1_0::BlendFactor> for BlendFactor {
    fn to_erupt(self) -> vk1_0::BlendFactor {
        match self {
            BlendFactor::Zero => vk1_0::BlendFactor::ZERO,
            BlendFactor::One => vk1_0::BlendFactor::ONE,
            BlendFactor::SourceAlpha => vk1_0::BlendFactor::SRC_ALPHA,
            BlendFactor::InverseSourceAlpha => vk1_0::BlendFactor::ONE_MINUS_SRC_ALPHA,
            BlendFactor::DestinationAlpha => vk1_0::BlendFactor::DST_ALPHA,
            BlendFactor::InverseDestinationAlpha => vk1_0::BlendFactor::ONE_MINUS_DST_ALPHA,
            BlendFactor::SourceColor => vk1_0::BlendFactor::SRC_COLOR,
            BlendFactor::InverseSourceColor => vk1_0::BlendFactor::ONE_MINUS_SRC_COLOR,
            BlendFactor::DestinationColor => vk1_0::BlendFactor::DST_COLOR,
            BlendFactor::InverseDestinationColor => vk1_0::BlendFactor::ONE_MINUS_DST_COLOR,
            BlendFactor::BlendFactor => vk1_0::BlendFactor::CONSTANT_COLOR,
            BlendFactor::InverseBlendFactor => vk1_0::BlendFactor::ONE_MINUS_CONSTANT_COLOR,
        }
    }
}

impl ToErupt<vk1_0::BlendOp> for BlendFunction {
    fn to_erupt(self) -> vk1_0::BlendOp {
        match self {
            BlendFunction::Add => vk1_0::BlendOp::ADD,
            BlendFunction::Subtract => vk1_0::BlendOp::SUBTRACT,
            BlendFunction::ReverseSubtract => vk1_0::BlendOp::REVERSE_SUBTRACT,
            BlendFunction::Minimum => vk1_0::BlendOp::MIN,
            BlendFunction::Maximum => vk1_0::BlendOp::MAX,
        }
    }
}

impl ToErupt<vk1_0::ColorComponentFlags> for ColorWriteMask {
    fn to_erupt(self) -> vk1_0::ColorComponentFlags {
        let mut result = vk1_0::ColorComponentFlags::empty();

        if self.contains(ColorWriteMask::RED) {
            result |= vk1_0::ColorComponentFlags::R
        }

        if self.contains(ColorWriteMask::GREEN) {
            result |= vk1_0::ColorComponentFlags::G
        }

        if self.contains(ColorWriteMask::BLUE) {
            result |= vk1_0::ColorComponentFlags::B
        }

        if self.contains(ColorWriteMask::ALPHA) {
            result |= vk1_0::ColorComponentFlags::A
        }

        result
    }
}

impl ToErupt<vk1_0::CullModeFlags> for FaceCullMode {
    fn to_erupt(self) -> vk1_0::CullModeFlags {
        match self {
            FaceCullMode::Back => vk1_0::CullModeFlags::BACK,
            FaceCullMode::Front => vk1_0::CullModeFlags::FRONT,
            FaceCullMode::None => vk1_0::CullModeFlags::NONE,
        }
    }
}

impl ToErupt<vk1_0::PolygonMode> for PolygonFillMode {
    fn to_erupt(self) -> vk1_0::PolygonMode {
        match self {
            PolygonFillMode::Solid => vk1_0::PolygonMode::FILL,
            PolygonFillMode::Wireframe => vk1_0::PolygonMode::LINE,
        }
    }
}

impl ToErupt<vk1_0::FrontFace> for FrontFace {
    fn to_erupt(self) -> vk1_0::FrontFace {
        match self {
            FrontFace::Clockwise => vk1_0::FrontFace::CLOCKWISE,
            FrontFace::CounterClockwise => vk1_0::FrontFace::COUNTER_CLOCKWISE,
        }
    }
}

impl ToErupt<vk1_0::PrimitiveTopology> for PrimitiveTopology {
    fn to_erupt(self) -> vk1_0::PrimitiveTopology {
        match self {
            PrimitiveTopology::TriangleList => vk1_0::PrimitiveTopology::TRIANGLE_LIST,
            PrimitiveTopology::TriangleStrip => vk1_0::PrimitiveTopology::TRIANGLE_STRIP,
            PrimitiveTopology::LineList => vk1_0::PrimitiveTopology::LINE_LIST,
            PrimitiveTopology::LineStrip => vk1_0::PrimitiveTopology::LINE_STRIP,
            PrimitiveTopology::PointList => vk1_0::PrimitiveTopology::POINT_LIST,
        }
    }
}

impl FromErupt<PresentModeKHR> for Option<PresentMode> {
    fn from_erupt(mode: PresentModeKHR) -> Self {
        match mode {
            PresentModeKHR::IMMEDIATE_KHR => Some(PresentMode::Immediate),
            PresentModeKHR::MAILBOX_KHR => Some(PresentMode::Mailbox),
            PresentModeKHR::FIFO_KHR => Some(PresentMode::Fifo),
            PresentModeKHR::FIFO_RELAXED_KHR => Some(PresentMode::FifoRelaxed),
            _ => None,
        }
    }
}

impl ToErupt<PresentModeKHR> for PresentMode {
    fn to_erupt(self) -> PresentModeKHR {
        match self {
            PresentMode::Immediate => PresentModeKHR::IMMEDIATE_KHR,
            PresentMode::Mailbox => PresentModeKHR::MAILBOX_KHR,
            PresentMode::Fifo => PresentModeKHR::FIFO_KHR,
            PresentMode::FifoRelaxed => PresentModeKHR::FIFO_RELAXED_KHR,
        }
    }
}

impl FromErupt<ColorSpaceKHR> for ColorSpace {
    fn from_erupt(space: ColorSpaceKHR) -> Self {
        match space {
            ColorSpaceKHR::SRGB_NONLINEAR_KHR => ColorSpace::SrgbNonlinear,
            other => ColorSpace::Other(other.0),
        }
    }
}

impl ToErupt<ColorSpaceKHR> for ColorSpace {
    fn to_erupt(self) -> ColorSpaceKHR {
        match self {
            ColorSpace::SrgbNonlinear => ColorSpaceKHR::SRGB_NONLINEAR_KHR,
            ColorSpace::Other(raw) => ColorSpaceKHR(raw),
        }
    }
}
