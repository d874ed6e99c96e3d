//! Strata is a Vulkan backend core behind a backend-neutral resource vocabulary.
//!
//! It owns device and queue setup, ref-counted resource lifetime,
//! the command list recording and submission state machine,
//! staging and command pool recycling, image layout tracking
//! and swapchain acquire/present logic.
//!
//! Native calls go through the [`native::Driver`] seam.
//! The `vulkan` feature provides a driver built on `erupt` and `gpu-alloc`,
//! and [`backend::headless`] provides an in-process driver that records everything
//! it is asked to do.

#![warn(missing_debug_implementations)]

pub mod backend;
pub mod native;

mod buffer;
mod command;
mod descriptor;
mod device;
mod dimensions;
mod fence;
mod format;
mod framebuffer;
mod pipeline;
mod probe;
mod refcount;
mod resource;
mod sampler;
mod shader;
mod swapchain;
mod texture;
mod view;

pub use self::{
    buffer::*,
    command::*,
    descriptor::*,
    device::*,
    dimensions::*,
    fence::*,
    format::*,
    framebuffer::*,
    pipeline::*,
    probe::*,
    refcount::*,
    resource::*,
    sampler::*,
    shader::*,
    swapchain::*,
    texture::*,
    view::*,
};

/// Re-exporting for applications that build native arrays alongside the crate.
#[doc(hidden)]
pub use {arrayvec, smallvec};

use native::{NativeError, ResultCode};

/// Error that may occur when allocation fails because
/// host or device memory is exhausted.
///
/// Deallocation of device memory or other resources may increase chance
/// that operation would succeed.
#[derive(Clone, Copy, Debug, thiserror::Error, PartialEq, Eq)]
#[error("Out of memory")]
pub struct OutOfMemory;

/// Error that may occur during execution on the device
/// and then signalled on command submission or waiting operations.
///
/// This error is unrecoverable. Lost `Device` must be recreated.
#[derive(Clone, Copy, Debug, thiserror::Error, PartialEq, Eq)]
#[error("Device lost")]
pub struct DeviceLost;

/// Errors reported by device, resource and command list operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Operation is not valid in the current state or with given arguments.
    #[error("Invalid operation: {message}")]
    InvalidOperation { message: String },

    /// Requested configuration, extension or backend is not supported.
    #[error("Unsupported: {what}")]
    Unsupported { what: String },

    #[error("Surface lost")]
    SurfaceLost,

    #[error(transparent)]
    DeviceLost {
        #[from]
        source: DeviceLost,
    },

    #[error(transparent)]
    OutOfMemory {
        #[from]
        source: OutOfMemory,
    },

    /// Native call failed with a result that has no dedicated variant.
    #[error("`{call}` failed with {code:?}")]
    Native { call: &'static str, code: ResultCode },

    /// Error-severity message reported by validation layers.
    #[error("Validation error: {message}")]
    Validation { message: String },
}

impl Error {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Error::InvalidOperation {
            message: message.into(),
        }
    }

    pub(crate) fn unsupported(what: impl Into<String>) -> Self {
        Error::Unsupported { what: what.into() }
    }
}

impl From<NativeError> for Error {
    fn from(err: NativeError) -> Self {
        match err.code {
            ResultCode::DeviceLost => Error::DeviceLost { source: DeviceLost },
            ResultCode::OutOfHostMemory | ResultCode::OutOfDeviceMemory => {
                Error::OutOfMemory {
                    source: OutOfMemory,
                }
            }
            ResultCode::SurfaceLost => Error::SurfaceLost,
            ResultCode::ExtensionNotPresent
            | ResultCode::FeatureNotPresent
            | ResultCode::IncompatibleDriver => Error::Unsupported {
                what: err.call.to_owned(),
            },
            code => Error::Native {
                call: err.call,
                code,
            },
        }
    }
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum IndexFormat {
    U16,
    U32,
}

impl IndexFormat {
    pub fn size(&self) -> u8 {
        match self {
            IndexFormat::U16 => 2,
            IndexFormat::U32 => 4,
        }
    }
}

/// Rounds `value` up to multiple of `align`.
/// `align` must be power of two.
#[inline]
pub(crate) fn align_up(value: u64, align: u64) -> u64 {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}
