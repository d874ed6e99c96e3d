//! Driver on top of `erupt` with memory from `gpu-alloc`.

mod convert;
mod device;
mod driver;
mod instance;
mod pipeline;

pub use self::{
    device::VulkanDriver,
    instance::{probe_instance, InstanceError},
};
