use std::{
    fmt::{self, Debug},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::{
    dimensions::{Extent3, ImageSize},
    format::{AspectFlags, PixelFormat},
    native::{
        self, BufferCreateInfo, BufferUsageFlags, Driver, ImageBarrier, ImageCreateInfo,
        ImageKind, ImageLayout, ImageSubresourceRange, ImageUsageFlags, MemoryBlock,
        MemoryRequest, SubresourceLayout,
    },
    refcount::ResourceRefCount,
    Error,
};

bitflags::bitflags! {
    /// How a texture is going to be used.
    pub struct TextureUsage: u32 {
        const SAMPLED = 0x01;
        const STORAGE = 0x02;
        const RENDER_TARGET = 0x04;
        const DEPTH_STENCIL = 0x08;

        /// Six layers per array layer, viewable as cube.
        const CUBEMAP = 0x10;

        /// Texture is a host-visible buffer laid out as tightly packed subresources.
        const STAGING = 0x20;
        const GENERATE_MIPMAPS = 0x40;
    }
}

impl TextureUsage {
    pub(crate) fn to_native(self) -> ImageUsageFlags {
        let mut flags = ImageUsageFlags::TRANSFER_DST | ImageUsageFlags::TRANSFER_SRC;

        if self.contains(TextureUsage::SAMPLED) {
            flags |= ImageUsageFlags::SAMPLED;
        }
        if self.contains(TextureUsage::DEPTH_STENCIL) {
            flags |= ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
        }
        if self.contains(TextureUsage::RENDER_TARGET) {
            flags |= ImageUsageFlags::COLOR_ATTACHMENT;
        }
        if self.contains(TextureUsage::STORAGE) {
            flags |= ImageUsageFlags::STORAGE;
        }

        flags
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureType {
    D1,
    D2,
    D3,
}

impl TextureType {
    pub(crate) fn to_native(self) -> ImageKind {
        match self {
            TextureType::D1 => ImageKind::D1,
            TextureType::D2 => ImageKind::D2,
            TextureType::D3 => ImageKind::D3,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TextureSampleCount {
    Count1,
    Count2,
    Count4,
    Count8,
    Count16,
    Count32,
}

impl TextureSampleCount {
    pub fn count(&self) -> u32 {
        match self {
            TextureSampleCount::Count1 => 1,
            TextureSampleCount::Count2 => 2,
            TextureSampleCount::Count4 => 4,
            TextureSampleCount::Count8 => 8,
            TextureSampleCount::Count16 => 16,
            TextureSampleCount::Count32 => 32,
        }
    }
}

impl Default for TextureSampleCount {
    fn default() -> Self {
        TextureSampleCount::Count1
    }
}

/// Information required to create a texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureInfo {
    pub width: ImageSize,
    pub height: ImageSize,
    pub depth: ImageSize,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub format: PixelFormat,
    pub usage: TextureUsage,
    pub ty: TextureType,
    pub samples: TextureSampleCount,
}

impl TextureInfo {
    pub fn texture_2d(
        width: ImageSize,
        height: ImageSize,
        mip_levels: u32,
        array_layers: u32,
        format: PixelFormat,
        usage: TextureUsage,
    ) -> Self {
        TextureInfo {
            width,
            height,
            depth: 1,
            mip_levels,
            array_layers,
            format,
            usage,
            ty: TextureType::D2,
            samples: TextureSampleCount::Count1,
        }
    }

    pub fn texture_3d(
        width: ImageSize,
        height: ImageSize,
        depth: ImageSize,
        mip_levels: u32,
        format: PixelFormat,
        usage: TextureUsage,
    ) -> Self {
        TextureInfo {
            width,
            height,
            depth,
            mip_levels,
            array_layers: 1,
            format,
            usage,
            ty: TextureType::D3,
            samples: TextureSampleCount::Count1,
        }
    }

    pub fn is_staging(&self) -> bool {
        self.usage.contains(TextureUsage::STAGING)
    }

    /// Number of native array layers. Cubemaps have six per layer.
    pub fn actual_array_layers(&self) -> u32 {
        if self.usage.contains(TextureUsage::CUBEMAP) {
            self.array_layers * 6
        } else {
            self.array_layers
        }
    }

    fn validate(&self) -> Result<(), Error> {
        if self.width == 0 || self.height == 0 || self.depth == 0 {
            return Err(Error::invalid("Texture dimensions must be non-zero"));
        }
        if self.mip_levels == 0 || self.array_layers == 0 {
            return Err(Error::invalid(
                "Texture must have at least one mip level and array layer",
            ));
        }
        if self.usage.contains(TextureUsage::DEPTH_STENCIL) && !self.format.is_depth() {
            return Err(Error::invalid(format!(
                "Depth-stencil texture requires depth format, got {:?}",
                self.format
            )));
        }
        if self.ty == TextureType::D3 && self.array_layers != 1 {
            return Err(Error::invalid("3D textures must have exactly one array layer"));
        }
        Ok(())
    }
}

/// Dimensions and layout tracking that may change after creation.
#[derive(Debug)]
struct TextureState {
    /// Staging textures reused for smaller updates are reinterpreted in place.
    extent: Extent3,
    format: PixelFormat,

    /// Tracked layout per subresource, indexed by `mip + layer * mip_levels`.
    layouts: Vec<ImageLayout>,
}

pub(crate) struct TextureShared {
    driver: Arc<dyn Driver>,
    image: native::Image,
    staging_buffer: native::Buffer,
    memory: Option<MemoryBlock>,
    info: TextureInfo,
    swapchain: bool,
    state: Mutex<TextureState>,
    ref_count: Arc<ResourceRefCount>,
    destroyed: Arc<AtomicBool>,
}

impl TextureShared {
    #[inline]
    pub fn info(&self) -> &TextureInfo {
        &self.info
    }

    #[inline]
    pub fn image(&self) -> native::Image {
        self.image
    }

    #[inline]
    pub fn staging_buffer(&self) -> native::Buffer {
        self.staging_buffer
    }

    #[inline]
    pub fn memory(&self) -> Option<&MemoryBlock> {
        self.memory.as_ref()
    }

    #[inline]
    pub fn is_staging(&self) -> bool {
        !self.staging_buffer.is_null()
    }

    #[inline]
    pub fn is_swapchain_texture(&self) -> bool {
        self.swapchain
    }

    #[inline]
    pub fn ref_count(&self) -> &Arc<ResourceRefCount> {
        &self.ref_count
    }

    pub fn extent(&self) -> Extent3 {
        self.state.lock().extent
    }

    pub fn format(&self) -> PixelFormat {
        self.state.lock().format
    }

    pub fn mip_extent(&self, level: u32) -> Extent3 {
        self.extent().mip_level(level)
    }

    pub fn actual_array_layers(&self) -> u32 {
        self.info.actual_array_layers()
    }

    /// Aspects touched by layout transitions and clears.
    pub fn aspect(&self) -> AspectFlags {
        if self.info.usage.contains(TextureUsage::DEPTH_STENCIL) {
            let format = self.format();
            if format.is_stencil() {
                AspectFlags::DEPTH | AspectFlags::STENCIL
            } else {
                AspectFlags::DEPTH
            }
        } else {
            AspectFlags::COLOR
        }
    }

    #[inline]
    fn subresource(&self, mip_level: u32, array_layer: u32) -> usize {
        (array_layer * self.info.mip_levels + mip_level) as usize
    }

    pub fn layout(&self, mip_level: u32, array_layer: u32) -> ImageLayout {
        let state = self.state.lock();
        let index = self.subresource(mip_level, array_layer);
        state.layouts.get(index).copied().unwrap_or(ImageLayout::Undefined)
    }

    /// Updates tracked layout without recording a barrier.
    /// Used where a render pass performs the transition itself.
    pub fn set_layout(&self, mip_level: u32, array_layer: u32, layout: ImageLayout) {
        let mut state = self.state.lock();
        let index = self.subresource(mip_level, array_layer);
        if let Some(slot) = state.layouts.get_mut(index) {
            *slot = layout;
        }
    }

    /// Records single barrier moving a range of subresources into `new_layout`.
    ///
    /// All subresources in the range must share one layout.
    /// Staging textures have no layouts and are skipped.
    pub fn transition_image_layout(
        &self,
        cb: native::CommandBuffer,
        base_mip_level: u32,
        level_count: u32,
        base_array_layer: u32,
        layer_count: u32,
        new_layout: ImageLayout,
    ) {
        if self.is_staging() {
            return;
        }

        let state = self.state.lock();
        let old_layout = state.layouts[self.subresource(base_mip_level, base_array_layer)];

        #[cfg(debug_assertions)]
        for level in 0..level_count {
            for layer in 0..layer_count {
                let index = self.subresource(base_mip_level + level, base_array_layer + layer);
                if state.layouts[index] != old_layout {
                    panic!(
                        "Unexpected image layout {:?} at mip {} layer {}, expected {:?}",
                        state.layouts[index],
                        base_mip_level + level,
                        base_array_layer + layer,
                        old_layout,
                    );
                }
            }
        }

        if old_layout != new_layout {
            drop(state);
            self.record_barrier(
                cb,
                ImageSubresourceRange {
                    aspect: self.aspect(),
                    base_mip_level,
                    level_count,
                    base_array_layer,
                    layer_count,
                },
                old_layout,
                new_layout,
            );

            let mut state = self.state.lock();
            for level in 0..level_count {
                for layer in 0..layer_count {
                    let index = self.subresource(base_mip_level + level, base_array_layer + layer);
                    state.layouts[index] = new_layout;
                }
            }
        }
    }

    /// Moves every subresource in the range into `new_layout`,
    /// recording one barrier per subresource that is not there already.
    pub fn transition_image_layout_nonmatching(
        &self,
        cb: native::CommandBuffer,
        base_mip_level: u32,
        level_count: u32,
        base_array_layer: u32,
        layer_count: u32,
        new_layout: ImageLayout,
    ) {
        if self.is_staging() {
            return;
        }

        let aspect = self.aspect();
        for level in base_mip_level..base_mip_level + level_count {
            for layer in base_array_layer..base_array_layer + layer_count {
                let index = self.subresource(level, layer);
                let old_layout = self.state.lock().layouts[index];

                if old_layout != new_layout {
                    self.record_barrier(
                        cb,
                        ImageSubresourceRange {
                            aspect,
                            base_mip_level: level,
                            level_count: 1,
                            base_array_layer: layer,
                            layer_count: 1,
                        },
                        old_layout,
                        new_layout,
                    );
                    self.state.lock().layouts[index] = new_layout;
                }
            }
        }
    }

    fn record_barrier(
        &self,
        cb: native::CommandBuffer,
        range: ImageSubresourceRange,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
    ) {
        let (src_access, src_stage) = old_layout.access_and_stage();
        let (dst_access, dst_stage) = new_layout.access_and_stage();

        self.driver.cmd_pipeline_barrier(
            cb,
            src_stage,
            dst_stage,
            &[],
            &[ImageBarrier {
                image: self.image,
                old_layout,
                new_layout,
                src_access,
                dst_access,
                range,
            }],
        );
    }

    /// Layout of a subresource inside staging memory.
    pub fn subresource_layout(&self, mip_level: u32, array_layer: u32) -> SubresourceLayout {
        debug_assert!(self.is_staging(), "Only staging textures have host layout");

        let state = self.state.lock();
        let mip = state.extent.mip_level(mip_level);
        let row_pitch = state.format.row_pitch(mip.width);
        let depth_pitch = state.format.depth_pitch(row_pitch, mip.height);

        SubresourceLayout {
            offset: staging_subresource_offset(
                state.format,
                state.extent,
                self.info.mip_levels,
                mip_level,
                array_layer,
            ),
            size: u64::from(depth_pitch) * u64::from(mip.depth),
            row_pitch: row_pitch.into(),
            array_pitch: depth_pitch.into(),
            depth_pitch: depth_pitch.into(),
        }
    }

    /// Reinterprets staging memory as a texture of different size and format.
    pub fn set_staging_dimensions(&self, extent: Extent3, format: PixelFormat) {
        debug_assert!(self.is_staging());
        let mut state = self.state.lock();
        state.extent = extent;
        state.format = format;
    }
}

/// Size of one array layer with full mip chain in staging memory.
fn staging_layer_size(format: PixelFormat, extent: Extent3, mip_levels: u32) -> u64 {
    (0..mip_levels)
        .map(|level| {
            let mip = extent.mip_level(level);
            format.region_size(mip.width, mip.height, mip.depth)
        })
        .sum()
}

/// Staging memory is layer-major with mips tightly packed inside each layer.
fn staging_subresource_offset(
    format: PixelFormat,
    extent: Extent3,
    mip_levels: u32,
    mip_level: u32,
    array_layer: u32,
) -> u64 {
    let layer_offset = u64::from(array_layer) * staging_layer_size(format, extent, mip_levels);
    let mip_offset = staging_layer_size(format, extent, mip_level);
    layer_offset + mip_offset
}

/// Handle for GPU texture.
///
/// Optimal textures are native images with tracked layouts.
/// Staging textures are host-visible buffers.
pub struct Texture {
    shared: Arc<TextureShared>,
}

impl Texture {
    /// Creates native objects. Device finishes initialization
    /// by clearing render targets and transitioning sampled textures.
    pub(crate) fn new(driver: &Arc<dyn Driver>, info: TextureInfo) -> Result<Self, Error> {
        info.validate()?;

        let extent = Extent3::new(info.width, info.height, info.depth);
        let (image, staging_buffer, memory, layouts) = if info.is_staging() {
            let size = staging_layer_size(info.format, extent, info.mip_levels)
                * u64::from(info.array_layers);

            let buffer = driver.create_buffer(&BufferCreateInfo {
                size,
                usage: BufferUsageFlags::TRANSFER_SRC | BufferUsageFlags::TRANSFER_DST,
            })?;

            let requirements = driver.buffer_memory_requirements(buffer);
            let memory = allocate_and_bind(driver, requirements, true, |memory| {
                driver.bind_buffer_memory(buffer, memory)
            })
            .map_err(|err| {
                driver.destroy_buffer(buffer);
                err
            })?;

            (
                native::Image::NULL,
                buffer,
                memory,
                vec![ImageLayout::Preinitialized],
            )
        } else {
            let image = driver.create_image(&ImageCreateInfo {
                kind: info.ty.to_native(),
                format: info.format,
                extent,
                mip_levels: info.mip_levels,
                array_layers: info.actual_array_layers(),
                samples: info.samples.count(),
                usage: info.usage.to_native(),
                cube_compatible: info.usage.contains(TextureUsage::CUBEMAP),
                initial_layout: ImageLayout::Preinitialized,
            })?;

            let requirements = driver.image_memory_requirements(image);
            let memory = allocate_and_bind(driver, requirements, false, |memory| {
                driver.bind_image_memory(image, memory)
            })
            .map_err(|err| {
                driver.destroy_image(image);
                err
            })?;

            let subresources = (info.mip_levels * info.actual_array_layers()) as usize;
            (
                image,
                native::Buffer::NULL,
                memory,
                vec![ImageLayout::Preinitialized; subresources],
            )
        };

        tracing::debug!(
            "Texture {:?}/{:?} created: {:?}",
            image,
            staging_buffer,
            info
        );

        Ok(Texture::from_parts(
            driver,
            image,
            staging_buffer,
            Some(memory),
            info,
            false,
            layouts,
        ))
    }

    /// Wraps image owned by a swapchain.
    pub(crate) fn from_swapchain_image(
        driver: &Arc<dyn Driver>,
        image: native::Image,
        info: TextureInfo,
    ) -> Self {
        Texture::from_parts(
            driver,
            image,
            native::Buffer::NULL,
            None,
            info,
            true,
            vec![ImageLayout::Undefined],
        )
    }

    fn from_parts(
        driver: &Arc<dyn Driver>,
        image: native::Image,
        staging_buffer: native::Buffer,
        memory: Option<MemoryBlock>,
        info: TextureInfo,
        swapchain: bool,
        layouts: Vec<ImageLayout>,
    ) -> Self {
        let destroyed = Arc::new(AtomicBool::new(false));
        let ref_count = {
            let driver = driver.clone();
            let destroyed = destroyed.clone();
            ResourceRefCount::new(move || {
                if destroyed.swap(true, Ordering::AcqRel) {
                    return;
                }
                tracing::debug!("Texture {:?}/{:?} destroyed", image, staging_buffer);
                if !swapchain && !image.is_null() {
                    driver.destroy_image(image);
                }
                if !staging_buffer.is_null() {
                    driver.destroy_buffer(staging_buffer);
                }
                if let Some(memory) = memory {
                    driver.free_memory(memory);
                }
            })
        };

        Texture {
            shared: Arc::new(TextureShared {
                driver: driver.clone(),
                image,
                staging_buffer,
                memory,
                info,
                swapchain,
                state: Mutex::new(TextureState {
                    extent: Extent3::new(info.width, info.height, info.depth),
                    format: info.format,
                    layouts,
                }),
                ref_count,
                destroyed,
            }),
        }
    }

    #[inline]
    pub(crate) fn shared(&self) -> &Arc<TextureShared> {
        &self.shared
    }

    #[inline]
    pub fn info(&self) -> &TextureInfo {
        &self.shared.info
    }

    /// Current extent. Differs from creation info only for reused staging textures.
    pub fn extent(&self) -> Extent3 {
        self.shared.extent()
    }

    pub fn format(&self) -> PixelFormat {
        self.shared.format()
    }

    #[inline]
    pub fn usage(&self) -> TextureUsage {
        self.shared.info.usage
    }

    #[inline]
    pub fn mip_levels(&self) -> u32 {
        self.shared.info.mip_levels
    }

    #[inline]
    pub fn array_layers(&self) -> u32 {
        self.shared.info.array_layers
    }

    /// Native image. Null for staging textures.
    #[inline]
    pub fn image(&self) -> native::Image {
        self.shared.image
    }

    /// Native buffer backing staging texture. Null for optimal textures.
    #[inline]
    pub fn staging_buffer(&self) -> native::Buffer {
        self.shared.staging_buffer
    }

    #[inline]
    pub fn is_swapchain_texture(&self) -> bool {
        self.shared.swapchain
    }

    /// Layout of the subresource as of the last recorded command.
    pub fn layout(&self, mip_level: u32, array_layer: u32) -> ImageLayout {
        self.shared.layout(mip_level, array_layer)
    }

    pub fn subresource_layout(&self, mip_level: u32, array_layer: u32) -> SubresourceLayout {
        self.shared.subresource_layout(mip_level, array_layer)
    }

    pub fn transition_image_layout(
        &self,
        cb: native::CommandBuffer,
        base_mip_level: u32,
        level_count: u32,
        base_array_layer: u32,
        layer_count: u32,
        new_layout: ImageLayout,
    ) {
        self.shared.transition_image_layout(
            cb,
            base_mip_level,
            level_count,
            base_array_layer,
            layer_count,
            new_layout,
        )
    }

    #[inline]
    pub fn ref_count(&self) -> &Arc<ResourceRefCount> {
        &self.shared.ref_count
    }

    #[inline]
    pub fn is_destroyed(&self) -> bool {
        self.shared.destroyed.load(Ordering::Acquire)
    }
}

fn allocate_and_bind(
    driver: &Arc<dyn Driver>,
    requirements: native::MemoryRequirements,
    host_visible: bool,
    bind: impl FnOnce(&MemoryBlock) -> Result<(), native::NativeError>,
) -> Result<MemoryBlock, Error> {
    let memory = driver.allocate_memory(&MemoryRequest {
        requirements,
        host_visible,
        dedicated: requirements.prefers_dedicated,
    })?;

    if let Err(err) = bind(&memory) {
        driver.free_memory(memory);
        return Err(err.into());
    }

    Ok(memory)
}

impl Drop for Texture {
    fn drop(&mut self) {
        self.shared.ref_count.decrement();
    }
}

impl PartialEq for Texture {
    #[inline]
    fn eq(&self, rhs: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &rhs.shared)
    }
}

impl Eq for Texture {}

impl Debug for Texture {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        if fmt.alternate() {
            fmt.debug_struct("Texture")
                .field("info", &self.shared.info)
                .field("image", &self.shared.image)
                .field("staging_buffer", &self.shared.staging_buffer)
                .field("state", &*self.shared.state.lock())
                .field("ref_count", &self.shared.ref_count)
                .finish()
        } else if self.shared.is_staging() {
            write!(fmt, "Texture(staging {:#x})", self.shared.staging_buffer.0)
        } else {
            write!(fmt, "Texture({:#x})", self.shared.image.0)
        }
    }
}

/// Textures referenced by a recording or resource set.
pub(crate) type TextureList = SmallVec<[Arc<TextureShared>; 4]>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_offsets_are_layer_major() {
        let format = PixelFormat::RGBA8Unorm;
        let extent = Extent3::new(4, 4, 1);

        // 4x4 + 2x2 + 1x1 texels of 4 bytes.
        assert_eq!(staging_layer_size(format, extent, 3), (16 + 4 + 1) * 4);
        assert_eq!(staging_subresource_offset(format, extent, 3, 0, 0), 0);
        assert_eq!(staging_subresource_offset(format, extent, 3, 1, 0), 64);
        assert_eq!(staging_subresource_offset(format, extent, 3, 2, 0), 80);
        assert_eq!(staging_subresource_offset(format, extent, 3, 0, 1), 84);
        assert_eq!(staging_subresource_offset(format, extent, 3, 1, 1), 148);
    }

    #[test]
    fn staging_offsets_for_compressed_formats() {
        let format = PixelFormat::BC3Unorm;
        let extent = Extent3::new(8, 8, 1);

        // 2x2 blocks, then 1x1 block for 4x4, 2x2 and 1x1 mips.
        assert_eq!(staging_layer_size(format, extent, 4), (4 + 1 + 1 + 1) * 16);
    }

    #[test]
    fn cubemaps_have_six_layers_each() {
        let info = TextureInfo::texture_2d(
            16,
            16,
            1,
            2,
            PixelFormat::RGBA8Unorm,
            TextureUsage::SAMPLED | TextureUsage::CUBEMAP,
        );
        assert_eq!(info.actual_array_layers(), 12);
    }

    #[test]
    fn usage_maps_to_native_flags() {
        let usage = TextureUsage::SAMPLED | TextureUsage::RENDER_TARGET;
        assert_eq!(
            usage.to_native(),
            ImageUsageFlags::TRANSFER_SRC
                | ImageUsageFlags::TRANSFER_DST
                | ImageUsageFlags::SAMPLED
                | ImageUsageFlags::COLOR_ATTACHMENT
        );
    }
}
