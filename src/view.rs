use std::{
    fmt::{self, Debug},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use crate::{
    format::{AspectFlags, PixelFormat},
    native::{self, Driver, ImageSubresourceRange, ImageViewCreateInfo, ImageViewKind},
    refcount::ResourceRefCount,
    texture::{Texture, TextureShared, TextureType, TextureUsage},
    Error,
};

/// Information required to create a texture view.
#[derive(Clone, Copy, Debug)]
pub struct TextureViewInfo<'a> {
    pub target: &'a Texture,

    /// View format. Defaults to texture format.
    pub format: Option<PixelFormat>,
    pub base_mip_level: u32,
    pub mip_levels: u32,
    pub base_array_layer: u32,
    pub array_layers: u32,
}

impl<'a> TextureViewInfo<'a> {
    /// View of every mip level and array layer.
    pub fn new(target: &'a Texture) -> Self {
        TextureViewInfo {
            target,
            format: None,
            base_mip_level: 0,
            mip_levels: target.mip_levels(),
            base_array_layer: 0,
            array_layers: target.array_layers(),
        }
    }
}

pub(crate) struct TextureViewShared {
    handle: native::ImageView,
    target: Arc<TextureShared>,
    format: PixelFormat,
    base_mip_level: u32,
    mip_levels: u32,
    base_array_layer: u32,
    array_layers: u32,
    ref_count: Arc<ResourceRefCount>,
    destroyed: Arc<AtomicBool>,
}

impl TextureViewShared {
    #[inline]
    pub fn handle(&self) -> native::ImageView {
        self.handle
    }

    #[inline]
    pub fn target(&self) -> &Arc<TextureShared> {
        &self.target
    }

    #[inline]
    pub fn ref_count(&self) -> &Arc<ResourceRefCount> {
        &self.ref_count
    }
}

/// View into a range of texture subresources.
///
/// Keeps its texture alive.
pub struct TextureView {
    shared: Arc<TextureViewShared>,
}

impl TextureView {
    pub(crate) fn new(driver: &Arc<dyn Driver>, info: TextureViewInfo<'_>) -> Result<Self, Error> {
        let target = info.target.shared();
        let texture = target.info();

        if target.is_staging() {
            return Err(Error::invalid("Staging textures cannot be viewed"));
        }

        if info.mip_levels == 0
            || info.array_layers == 0
            || info.base_mip_level + info.mip_levels > texture.mip_levels
            || info.base_array_layer + info.array_layers > texture.array_layers
        {
            return Err(Error::invalid(format!(
                "View range mips {}+{} layers {}+{} is out of texture bounds",
                info.base_mip_level, info.mip_levels, info.base_array_layer, info.array_layers
            )));
        }

        let format = info.format.unwrap_or(texture.format);
        let cube = texture.usage.contains(TextureUsage::CUBEMAP);

        let kind = match (texture.ty, cube, texture.array_layers > 1) {
            (_, true, false) => ImageViewKind::Cube,
            (_, true, true) => ImageViewKind::CubeArray,
            (TextureType::D1, false, false) => ImageViewKind::D1,
            (TextureType::D1, false, true) => ImageViewKind::D1Array,
            (TextureType::D2, false, false) => ImageViewKind::D2,
            (TextureType::D2, false, true) => ImageViewKind::D2Array,
            (TextureType::D3, false, _) => ImageViewKind::D3,
        };

        let (base_array_layer, layer_count) = if cube {
            (info.base_array_layer * 6, info.array_layers * 6)
        } else {
            (info.base_array_layer, info.array_layers)
        };

        let aspect = if texture.usage.contains(TextureUsage::DEPTH_STENCIL) {
            AspectFlags::DEPTH
        } else {
            AspectFlags::COLOR
        };

        let handle = driver.create_image_view(&ImageViewCreateInfo {
            image: target.image(),
            kind,
            format,
            range: ImageSubresourceRange {
                aspect,
                base_mip_level: info.base_mip_level,
                level_count: info.mip_levels,
                base_array_layer,
                layer_count,
            },
        })?;

        tracing::debug!("TextureView {:?} created for {:?}", handle, info.target);

        // View keeps texture alive until the view itself is destroyed.
        target.ref_count().increment();

        let destroyed = Arc::new(AtomicBool::new(false));
        let ref_count = {
            let driver = driver.clone();
            let destroyed = destroyed.clone();
            let target_ref_count = target.ref_count().clone();
            ResourceRefCount::new(move || {
                if !destroyed.swap(true, Ordering::AcqRel) {
                    tracing::debug!("TextureView {:?} destroyed", handle);
                    driver.destroy_image_view(handle);
                    target_ref_count.decrement();
                }
            })
        };

        Ok(TextureView {
            shared: Arc::new(TextureViewShared {
                handle,
                target: target.clone(),
                format,
                base_mip_level: info.base_mip_level,
                mip_levels: info.mip_levels,
                base_array_layer: info.base_array_layer,
                array_layers: info.array_layers,
                ref_count,
                destroyed,
            }),
        })
    }

    #[inline]
    pub(crate) fn shared(&self) -> &Arc<TextureViewShared> {
        &self.shared
    }

    #[inline]
    pub fn handle(&self) -> native::ImageView {
        self.shared.handle
    }

    #[inline]
    pub fn format(&self) -> PixelFormat {
        self.shared.format
    }

    #[inline]
    pub fn base_mip_level(&self) -> u32 {
        self.shared.base_mip_level
    }

    #[inline]
    pub fn mip_levels(&self) -> u32 {
        self.shared.mip_levels
    }

    #[inline]
    pub fn base_array_layer(&self) -> u32 {
        self.shared.base_array_layer
    }

    #[inline]
    pub fn array_layers(&self) -> u32 {
        self.shared.array_layers
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

impl Drop for TextureView {
    fn drop(&mut self) {
        self.shared.ref_count.decrement();
    }
}

impl Debug for TextureView {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        if fmt.alternate() {
            fmt.debug_struct("TextureView")
                .field("handle", &self.shared.handle)
                .field("image", &self.shared.target.image())
                .field("format", &self.shared.format)
                .field("mips", &(self.shared.base_mip_level..self.shared.base_mip_level + self.shared.mip_levels))
                .field(
                    "layers",
                    &(self.shared.base_array_layer
                        ..self.shared.base_array_layer + self.shared.array_layers),
                )
                .finish()
        } else {
            write!(fmt, "TextureView({:#x})", self.shared.handle.0)
        }
    }
}
