use std::{
    fmt::{self, Debug},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use crate::{
    native::{self, BufferCreateInfo, BufferUsageFlags, Driver, MemoryBlock, MemoryRequest},
    refcount::ResourceRefCount,
    Error,
};

bitflags::bitflags! {
    /// How a buffer is going to be used.
    pub struct BufferUsage: u32 {
        const VERTEX = 0x01;
        const INDEX = 0x02;
        const UNIFORM = 0x04;
        const STRUCTURED_READ_ONLY = 0x08;
        const STRUCTURED_READ_WRITE = 0x10;
        const INDIRECT = 0x20;

        /// Buffer is updated from host often and lives in host-visible memory.
        const DYNAMIC = 0x40;

        /// Buffer is used for host transfers and lives in host-visible memory.
        const STAGING = 0x80;
    }
}

impl BufferUsage {
    /// Buffers with these usages live in persistently mapped host-visible memory.
    pub fn is_host_visible(&self) -> bool {
        self.intersects(BufferUsage::DYNAMIC | BufferUsage::STAGING)
    }

    pub(crate) fn to_native(self) -> BufferUsageFlags {
        let mut flags = BufferUsageFlags::TRANSFER_SRC | BufferUsageFlags::TRANSFER_DST;

        if self.contains(BufferUsage::VERTEX) {
            flags |= BufferUsageFlags::VERTEX;
        }
        if self.contains(BufferUsage::INDEX) {
            flags |= BufferUsageFlags::INDEX;
        }
        if self.contains(BufferUsage::UNIFORM) {
            flags |= BufferUsageFlags::UNIFORM;
        }
        if self.intersects(BufferUsage::STRUCTURED_READ_ONLY | BufferUsage::STRUCTURED_READ_WRITE)
        {
            flags |= BufferUsageFlags::STORAGE;
        }
        if self.contains(BufferUsage::INDIRECT) {
            flags |= BufferUsageFlags::INDIRECT;
        }

        flags
    }
}

/// Information required to create a buffer.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct BufferInfo {
    /// Size of content buffer can hold.
    pub size: u64,

    /// Usage types supported by buffer.
    pub usage: BufferUsage,

    /// Element size for structured buffers. Zero otherwise.
    pub structure_byte_stride: u32,
}

impl BufferInfo {
    pub fn new(size: u64, usage: BufferUsage) -> Self {
        BufferInfo {
            size,
            usage,
            structure_byte_stride: 0,
        }
    }
}

/// Handle for GPU buffer object.
///
/// Native buffer is destroyed once the handle is dropped
/// and every submission that used it has completed.
pub struct Buffer {
    driver: Arc<dyn Driver>,
    handle: native::Buffer,
    memory: MemoryBlock,
    info: BufferInfo,
    ref_count: Arc<ResourceRefCount>,
    destroyed: Arc<AtomicBool>,
}

impl Buffer {
    pub(crate) fn new(driver: &Arc<dyn Driver>, info: BufferInfo) -> Result<Self, Error> {
        if info.size == 0 {
            return Err(Error::invalid("Buffer size must be greater than zero"));
        }

        if info.usage.contains(BufferUsage::UNIFORM) && info.size % 16 != 0 {
            return Err(Error::invalid(format!(
                "Uniform buffer size must be a multiple of 16 bytes, got {}",
                info.size
            )));
        }

        let handle = driver.create_buffer(&BufferCreateInfo {
            size: info.size,
            usage: info.usage.to_native(),
        })?;

        let requirements = driver.buffer_memory_requirements(handle);
        let memory = match driver.allocate_memory(&MemoryRequest {
            requirements,
            host_visible: info.usage.is_host_visible(),
            dedicated: requirements.prefers_dedicated,
        }) {
            Ok(memory) => memory,
            Err(err) => {
                driver.destroy_buffer(handle);
                return Err(err.into());
            }
        };

        if let Err(err) = driver.bind_buffer_memory(handle, &memory) {
            driver.destroy_buffer(handle);
            driver.free_memory(memory);
            return Err(err.into());
        }

        tracing::debug!("Buffer {:?} created: {:?}", handle, info);

        let destroyed = Arc::new(AtomicBool::new(false));
        let ref_count = {
            let driver = driver.clone();
            let destroyed = destroyed.clone();
            ResourceRefCount::new(move || {
                if !destroyed.swap(true, Ordering::AcqRel) {
                    tracing::debug!("Buffer {:?} destroyed", handle);
                    driver.destroy_buffer(handle);
                    driver.free_memory(memory);
                }
            })
        };

        Ok(Buffer {
            driver: driver.clone(),
            handle,
            memory,
            info,
            ref_count,
            destroyed,
        })
    }

    #[inline]
    pub fn info(&self) -> &BufferInfo {
        &self.info
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.info.size
    }

    #[inline]
    pub fn usage(&self) -> BufferUsage {
        self.info.usage
    }

    #[inline]
    pub fn handle(&self) -> native::Buffer {
        self.handle
    }

    #[inline]
    pub fn memory(&self) -> &MemoryBlock {
        &self.memory
    }

    #[inline]
    pub fn ref_count(&self) -> &Arc<ResourceRefCount> {
        &self.ref_count
    }

    /// Returns `true` once the native buffer is destroyed.
    #[inline]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.ref_count.decrement();
    }
}

impl PartialEq for Buffer {
    #[inline]
    fn eq(&self, rhs: &Self) -> bool {
        Arc::ptr_eq(&self.ref_count, &rhs.ref_count)
    }
}

impl Eq for Buffer {}

impl Debug for Buffer {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        if fmt.alternate() {
            fmt.debug_struct("Buffer")
                .field("info", &self.info)
                .field("handle", &self.handle)
                .field("memory", &self.memory)
                .field("ref_count", &self.ref_count)
                .finish()
        } else {
            write!(fmt, "Buffer({:#x})", self.handle.0)
        }
    }
}

/// Copies `data` into host-visible memory at `offset` bytes from the block start.
/// Blocks that are not persistently mapped are mapped for the duration of the copy.
pub(crate) fn write_host_memory(
    driver: &dyn Driver,
    memory: &MemoryBlock,
    offset: u64,
    data: &[u8],
) -> Result<(), Error> {
    if offset + data.len() as u64 > memory.size {
        return Err(Error::invalid(format!(
            "Write of {} bytes at {} exceeds memory block of {} bytes",
            data.len(),
            offset,
            memory.size
        )));
    }

    let (ptr, mapped_here) = match memory.mapped {
        Some(ptr) => (ptr, false),
        None => (driver.map_memory(memory)?, true),
    };

    // Range is checked against block size above.
    unsafe {
        std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.add(offset).as_ptr(), data.len());
    }

    if mapped_here {
        driver.unmap_memory(memory);
    }
    Ok(())
}

/// Buffer range bound in resource sets.
#[derive(Clone, Copy, Debug)]
pub struct BufferRange<'a> {
    pub buffer: &'a Buffer,
    pub offset: u64,
    pub size: u64,
}

impl<'a> BufferRange<'a> {
    pub fn whole(buffer: &'a Buffer) -> Self {
        BufferRange {
            buffer,
            offset: 0,
            size: buffer.size(),
        }
    }
}
