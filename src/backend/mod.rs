//! Drivers implementing [`crate::native::Driver`].

pub mod headless;

#[cfg(feature = "vulkan")]
pub mod vulkan;
