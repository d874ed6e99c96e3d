use std::{
    fmt::{self, Debug},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use crate::{
    native::{self, Driver},
    refcount::ResourceRefCount,
    Error,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CompareOp {
    /// Never passes.
    Never,

    /// Passes if fragment's depth is less than stored.
    Less,

    /// Passes if fragment's depth is equal to stored.
    Equal,

    /// Passes if fragment's depth is less than or equal to stored.
    LessOrEqual,

    /// Passes if fragment's depth is greater than stored.
    Greater,

    /// Passes if fragment's depth is not equal to stored.
    NotEqual,

    /// Passes if fragment's depth is greater than or equal to stored.
    GreaterOrEqual,

    /// Always passes.
    Always,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Filter {
    Nearest,
    Linear,
}

impl Default for Filter {
    fn default() -> Self {
        Filter::Nearest
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MipmapMode {
    Nearest,
    Linear,
}

impl Default for MipmapMode {
    fn default() -> Self {
        MipmapMode::Nearest
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SamplerAddressMode {
    Repeat,
    MirroredRepeat,
    ClampToEdge,
    ClampToBorder,
}

impl Default for SamplerAddressMode {
    fn default() -> Self {
        SamplerAddressMode::ClampToEdge
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BorderColor {
    TransparentBlack,
    OpaqueBlack,
    OpaqueWhite,
}

impl Default for BorderColor {
    fn default() -> Self {
        BorderColor::TransparentBlack
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SamplerInfo {
    pub mag_filter: Filter,
    pub min_filter: Filter,
    pub mipmap_mode: MipmapMode,
    pub address_mode_u: SamplerAddressMode,
    pub address_mode_v: SamplerAddressMode,
    pub address_mode_w: SamplerAddressMode,
    pub mip_lod_bias: f32,

    /// Anisotropic filtering is enabled when set.
    pub max_anisotropy: Option<f32>,

    /// Comparison sampler when set.
    pub compare_op: Option<CompareOp>,
    pub min_lod: f32,
    pub max_lod: f32,
    pub border_color: BorderColor,
}

impl SamplerInfo {
    pub const fn new() -> Self {
        SamplerInfo {
            mag_filter: Filter::Nearest,
            min_filter: Filter::Nearest,
            mipmap_mode: MipmapMode::Nearest,
            address_mode_u: SamplerAddressMode::ClampToEdge,
            address_mode_v: SamplerAddressMode::ClampToEdge,
            address_mode_w: SamplerAddressMode::ClampToEdge,
            mip_lod_bias: 0.0,
            max_anisotropy: None,
            compare_op: None,
            min_lod: 0.0,
            max_lod: 1000.0,
            border_color: BorderColor::TransparentBlack,
        }
    }

    pub const fn linear() -> Self {
        SamplerInfo {
            mag_filter: Filter::Linear,
            min_filter: Filter::Linear,
            mipmap_mode: MipmapMode::Linear,
            ..SamplerInfo::new()
        }
    }
}

impl Default for SamplerInfo {
    fn default() -> Self {
        SamplerInfo::new()
    }
}

pub struct Sampler {
    handle: native::Sampler,
    info: SamplerInfo,
    ref_count: Arc<ResourceRefCount>,
    destroyed: Arc<AtomicBool>,
}

impl Sampler {
    pub(crate) fn new(driver: &Arc<dyn Driver>, info: SamplerInfo) -> Result<Self, Error> {
        if let Some(anisotropy) = info.max_anisotropy {
            let device = driver.info();
            if !device.features.sampler_anisotropy {
                return Err(Error::unsupported("sampler anisotropy"));
            }
            if anisotropy > device.limits.max_sampler_anisotropy {
                return Err(Error::invalid(format!(
                    "Sampler anisotropy {} exceeds device limit {}",
                    anisotropy, device.limits.max_sampler_anisotropy
                )));
            }
        }

        let handle = driver.create_sampler(&info)?;
        tracing::debug!("Sampler {:?} created", handle);

        let destroyed = Arc::new(AtomicBool::new(false));
        let ref_count = {
            let driver = driver.clone();
            let destroyed = destroyed.clone();
            ResourceRefCount::new(move || {
                if !destroyed.swap(true, Ordering::AcqRel) {
                    driver.destroy_sampler(handle);
                }
            })
        };

        Ok(Sampler {
            handle,
            info,
            ref_count,
            destroyed,
        })
    }

    #[inline]
    pub fn info(&self) -> &SamplerInfo {
        &self.info
    }

    #[inline]
    pub fn handle(&self) -> native::Sampler {
        self.handle
    }

    #[inline]
    pub fn ref_count(&self) -> &Arc<ResourceRefCount> {
        &self.ref_count
    }

    #[inline]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.ref_count.decrement();
    }
}

impl Debug for Sampler {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        if fmt.alternate() {
            fmt.debug_struct("Sampler")
                .field("info", &self.info)
                .field("handle", &self.handle)
                .finish()
        } else {
            write!(fmt, "Sampler({:#x})", self.handle.0)
        }
    }
}
