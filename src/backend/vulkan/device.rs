use std::{
    ffi::CStr,
    fmt::{self, Debug},
    os::raw::c_char,
};

use erupt::{
    extensions::{
        ext_debug_marker::EXT_DEBUG_MARKER_EXTENSION_NAME,
        khr_maintenance1::KHR_MAINTENANCE1_EXTENSION_NAME,
        khr_swapchain::KHR_SWAPCHAIN_EXTENSION_NAME,
    },
    vk1_0, DeviceLoader, LoaderError,
};
use gpu_alloc::{GpuAllocator, MemoryBlock};
use gpu_alloc_erupt::EruptMemoryDevice;
use parking_lot::Mutex;
use slab::Slab;
use smallvec::SmallVec;

use super::{convert::native_error, instance::Instance};
use crate::{
    device::GraphicsDeviceOptions,
    native::{DeviceFeatures, DeviceInfo, DeviceLimits, SurfaceSource},
    Error,
};

/// Command buffer allocated from one of the driver's pools.
#[derive(Clone, Copy, Debug)]
pub(super) struct CommandBufferSlot {
    pub handle: vk1_0::CommandBuffer,
    pub pool: vk1_0::CommandPool,
}

/// Driver backed by a single Vulkan device.
///
/// Commands are submitted to one graphics queue.
/// Presentation goes through the first family that can present to the main window,
/// which is the graphics family whenever possible.
pub struct VulkanDriver {
    pub(super) info: DeviceInfo,
    pub(super) logical: DeviceLoader,
    pub(super) physical: vk1_0::PhysicalDevice,
    pub(super) graphics_family: u32,
    pub(super) present_family: u32,
    pub(super) graphics_queue: Mutex<vk1_0::Queue>,
    pub(super) present_queue: Mutex<vk1_0::Queue>,
    pub(super) allocator: Mutex<GpuAllocator<vk1_0::DeviceMemory>>,
    pub(super) blocks: Mutex<Slab<MemoryBlock<vk1_0::DeviceMemory>>>,
    pub(super) command_buffers: Mutex<Slab<CommandBufferSlot>>,
    pub(super) instance: Instance,
}

// Queue access is serialized by mutexes.
// Every other object is externally synchronized by the caller as Vulkan requires.
unsafe impl Send for VulkanDriver {}
unsafe impl Sync for VulkanDriver {}

impl Debug for VulkanDriver {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("VulkanDriver")
            .field("device", &self.logical.handle)
            .field("name", &self.info.device_name)
            .field("graphics_family", &self.graphics_family)
            .field("present_family", &self.present_family)
            .finish()
    }
}

impl VulkanDriver {
    #[tracing::instrument(skip(source))]
    pub fn new(
        options: &GraphicsDeviceOptions,
        source: Option<&SurfaceSource>,
    ) -> Result<Self, Error> {
        let instance = Instance::new(options.debug).map_err(|err| Error::unsupported(err.to_string()))?;

        let physical = unsafe { instance.loader.enumerate_physical_devices(None) }
            .result()
            .map_err(|err| native_error("vkEnumeratePhysicalDevices", err))?
            .into_iter()
            .next()
            .ok_or_else(|| Error::unsupported("No physical devices found"))?;

        let properties = unsafe { instance.loader.get_physical_device_properties(physical, None) };
        let features = unsafe { instance.loader.get_physical_device_features(physical, None) };
        let families = unsafe {
            instance
                .loader
                .get_physical_device_queue_family_properties(physical, None)
        };

        let graphics_family = families
            .iter()
            .position(|family| family.queue_flags.contains(vk1_0::QueueFlags::GRAPHICS))
            .ok_or_else(|| Error::unsupported("No graphics queue family"))?
            as u32;

        // Presentation support is queried on a throwaway surface.
        let present_family = match source {
            None => graphics_family,
            Some(source) => {
                let surface = instance.create_surface(source)?;
                let supports = |family: u32| unsafe {
                    instance
                        .loader
                        .get_physical_device_surface_support_khr(physical, family, surface, None)
                        .result()
                        .unwrap_or(false)
                };

                let family = if supports(graphics_family) {
                    Some(graphics_family)
                } else {
                    (0..families.len() as u32).find(|&family| supports(family))
                };
                instance.destroy_surface(surface);

                family.ok_or_else(|| Error::unsupported("No queue family can present to the window"))?
            }
        };

        let extension_properties = unsafe {
            instance
                .loader
                .enumerate_device_extension_properties(physical, None, None)
        }
        .result()
        .map_err(|err| native_error("vkEnumerateDeviceExtensionProperties", err))?;

        let mut enable_exts = SmallVec::<[_; 4]>::new();

        let mut push_ext = |name: *const c_char| -> bool {
            let name = unsafe { CStr::from_ptr(name) };
            if extension_properties
                .iter()
                .any(|p| unsafe { CStr::from_ptr(&p.extension_name[0]) } == name)
            {
                tracing::trace!("Pick device extension {:?}", name);
                enable_exts.push(name.as_ptr());
                true
            } else {
                false
            }
        };

        if !push_ext(KHR_SWAPCHAIN_EXTENSION_NAME) && source.is_some() {
            return Err(Error::unsupported("VK_KHR_swapchain"));
        }

        let maintenance1 = push_ext(KHR_MAINTENANCE1_EXTENSION_NAME);
        if options.debug {
            push_ext(EXT_DEBUG_MARKER_EXTENSION_NAME);
        }

        let priorities = [1.0f32];
        let mut queue_infos = SmallVec::<[_; 2]>::new();
        queue_infos.push(
            vk1_0::DeviceQueueCreateInfoBuilder::new()
                .queue_family_index(graphics_family)
                .queue_priorities(&priorities),
        );
        if present_family != graphics_family {
            queue_infos.push(
                vk1_0::DeviceQueueCreateInfoBuilder::new()
                    .queue_family_index(present_family)
                    .queue_priorities(&priorities),
            );
        }

        let device_create_info = vk1_0::DeviceCreateInfoBuilder::new()
            .queue_create_infos(&queue_infos)
            .enabled_features(&features)
            .enabled_extension_names(&enable_exts);

        let result = unsafe { DeviceLoader::new(&instance.loader, physical, &device_create_info, None) };

        let logical = match result {
            Err(LoaderError::SymbolNotAvailable) => {
                return Err(Error::unsupported("Failed to load device functions"));
            }
            Err(LoaderError::VulkanError(err)) => {
                return Err(native_error("vkCreateDevice", err).into());
            }
            Ok(ok) => ok,
        };

        let graphics_queue = unsafe { logical.get_device_queue(graphics_family, 0, None) };
        let present_queue = unsafe { logical.get_device_queue(present_family, 0, None) };

        let memory_properties =
            unsafe { instance.loader.get_physical_device_memory_properties(physical, None) };

        let allocator = GpuAllocator::new(
            gpu_alloc::Config::i_am_prototyping(),
            memory_device_properties(&properties, &memory_properties),
        );

        let limits = &properties.limits;
        let device_name = unsafe { CStr::from_ptr(&properties.device_name[0]) }
            .to_string_lossy()
            .into_owned();

        let info = DeviceInfo {
            device_name,
            driver_name: format!("{:#x}", properties.driver_version),
            api_version: decode_version(properties.api_version),
            limits: DeviceLimits {
                min_uniform_buffer_offset_alignment: limits.min_uniform_buffer_offset_alignment,
                min_storage_buffer_offset_alignment: limits.min_storage_buffer_offset_alignment,
                max_sampler_anisotropy: limits.max_sampler_anisotropy,
                max_viewports: limits.max_viewports,
            },
            features: DeviceFeatures {
                geometry_shader: features.geometry_shader != 0,
                tessellation_shader: features.tessellation_shader != 0,
                multi_viewport: features.multi_viewport != 0,
                draw_indirect_first_instance: features.draw_indirect_first_instance != 0,
                fill_mode_non_solid: features.fill_mode_non_solid != 0,
                sampler_anisotropy: features.sampler_anisotropy != 0,
                depth_clamp: features.depth_clamp != 0,
                independent_blend: features.independent_blend != 0,
                shader_float64: features.shader_float64 != 0,
            },
            debug_markers: logical.enabled().ext_debug_marker,
            standard_clip_space_y: options.prefer_standard_clip_space_y_direction && maintenance1,
        };

        tracing::debug!(
            "Device {:?} created. Graphics family {}, present family {}",
            info.device_name,
            graphics_family,
            present_family,
        );

        Ok(VulkanDriver {
            info,
            logical,
            physical,
            graphics_family,
            present_family,
            graphics_queue: Mutex::new(graphics_queue),
            present_queue: Mutex::new(present_queue),
            allocator: Mutex::new(allocator),
            blocks: Mutex::new(Slab::new()),
            command_buffers: Mutex::new(Slab::new()),
            instance,
        })
    }

    pub(super) fn memory_device(&self) -> &EruptMemoryDevice {
        EruptMemoryDevice::wrap(&self.logical)
    }

    /// Raw handle of a command buffer allocated by this driver.
    pub(super) fn command_buffer(&self, cb: crate::native::CommandBuffer) -> vk1_0::CommandBuffer {
        self.command_buffers.lock()[cb.0 as usize - 1].handle
    }
}

impl Drop for VulkanDriver {
    fn drop(&mut self) {
        unsafe {
            let _ = self.logical.device_wait_idle().result();

            let device = EruptMemoryDevice::wrap(&self.logical);
            let mut allocator = self.allocator.lock();
            for block in self.blocks.lock().drain() {
                tracing::warn!("Memory block leaked until device destruction");
                allocator.dealloc(device, block);
            }
            allocator.cleanup(device);
            drop(allocator);

            self.logical.destroy_device(None);
        }
    }
}

fn decode_version(version: u32) -> (u32, u32, u32) {
    ((version >> 22) & 0x7f, (version >> 12) & 0x3ff, version & 0xfff)
}

fn memory_device_properties(
    properties: &vk1_0::PhysicalDeviceProperties,
    memory_properties: &vk1_0::PhysicalDeviceMemoryProperties,
) -> gpu_alloc::DeviceProperties<'static> {
    let limits = &properties.limits;

    gpu_alloc::DeviceProperties {
        max_memory_allocation_count: limits.max_memory_allocation_count,
        max_memory_allocation_size: u64::max_value(),
        non_coherent_atom_size: limits.non_coherent_atom_size,
        memory_types: memory_properties.memory_types
            [..memory_properties.memory_type_count as usize]
            .iter()
            .map(|memory_type| gpu_alloc::MemoryType {
                props: gpu_alloc_erupt::memory_properties_from_erupt(memory_type.property_flags),
                heap: memory_type.heap_index,
            })
            .collect(),
        memory_heaps: memory_properties.memory_heaps
            [..memory_properties.memory_heap_count as usize]
            .iter()
            .map(|&memory_heap| gpu_alloc::MemoryHeap {
                size: memory_heap.size,
            })
            .collect(),
        buffer_device_address: false,
    }
}

#[cfg(test)]
mod tests {
    use super::decode_version;

    #[test]
    fn versions_decode() {
        assert_eq!(decode_version((1 << 22) | (2 << 12) | 131), (1, 2, 131));
    }
}
