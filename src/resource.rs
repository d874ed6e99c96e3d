use std::{
    fmt::{self, Debug},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use smallvec::SmallVec;

use crate::{
    buffer::{Buffer, BufferRange, BufferUsage},
    descriptor::{DescriptorAllocationToken, DescriptorPoolManager, DescriptorResourceCounts},
    native::{
        self, DescriptorResource, DescriptorSetLayoutBinding, DescriptorType, DescriptorWrite,
        Driver, ImageLayout,
    },
    refcount::ResourceRefCount,
    sampler::Sampler,
    shader::ShaderStages,
    texture::{TextureList, TextureUsage},
    view::TextureView,
    Error,
};

/// Maximum number of resource sets bound to one pipeline.
pub const MAX_RESOURCE_SETS: usize = 8;

/// Kind of resource bound at a layout element.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    UniformBuffer,
    StructuredBufferReadOnly,
    StructuredBufferReadWrite,
    TextureReadOnly,
    TextureReadWrite,
    Sampler,
}

impl ResourceKind {
    fn is_buffer(&self) -> bool {
        matches!(
            self,
            ResourceKind::UniformBuffer
                | ResourceKind::StructuredBufferReadOnly
                | ResourceKind::StructuredBufferReadWrite
        )
    }

    fn descriptor_type(&self, dynamic: bool) -> DescriptorType {
        match (self, dynamic) {
            (ResourceKind::UniformBuffer, false) => DescriptorType::UniformBuffer,
            (ResourceKind::UniformBuffer, true) => DescriptorType::UniformBufferDynamic,
            (
                ResourceKind::StructuredBufferReadOnly | ResourceKind::StructuredBufferReadWrite,
                false,
            ) => DescriptorType::StorageBuffer,
            (
                ResourceKind::StructuredBufferReadOnly | ResourceKind::StructuredBufferReadWrite,
                true,
            ) => DescriptorType::StorageBufferDynamic,
            (ResourceKind::TextureReadOnly, _) => DescriptorType::SampledImage,
            (ResourceKind::TextureReadWrite, _) => DescriptorType::StorageImage,
            (ResourceKind::Sampler, _) => DescriptorType::Sampler,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceLayoutElementInfo {
    pub name: String,
    pub kind: ResourceKind,
    pub stages: ShaderStages,

    /// Buffer is bound with offset supplied at bind time.
    pub dynamic_binding: bool,
}

impl ResourceLayoutElementInfo {
    pub fn new(name: &str, kind: ResourceKind, stages: ShaderStages) -> Self {
        ResourceLayoutElementInfo {
            name: name.to_owned(),
            kind,
            stages,
            dynamic_binding: false,
        }
    }

    pub fn dynamic(mut self) -> Self {
        self.dynamic_binding = true;
        self
    }
}

/// Elements of a resource layout. Element `i` is bound at binding `i`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ResourceLayoutInfo {
    pub elements: Vec<ResourceLayoutElementInfo>,
}

impl ResourceLayoutInfo {
    pub fn new(elements: Vec<ResourceLayoutElementInfo>) -> Self {
        ResourceLayoutInfo { elements }
    }
}

/// Describes the resources of one resource set.
pub struct ResourceLayout {
    driver: Arc<dyn Driver>,
    handle: native::DescriptorSetLayout,
    kinds: Vec<ResourceKind>,
    descriptor_types: Vec<DescriptorType>,
    counts: DescriptorResourceCounts,
    dynamic_buffer_count: u32,
}

impl ResourceLayout {
    pub(crate) fn new(driver: &Arc<dyn Driver>, info: &ResourceLayoutInfo) -> Result<Self, Error> {
        let mut bindings = Vec::with_capacity(info.elements.len());
        let mut kinds = Vec::with_capacity(info.elements.len());
        let mut descriptor_types = Vec::with_capacity(info.elements.len());
        let mut dynamic_buffer_count = 0;

        for (index, element) in info.elements.iter().enumerate() {
            if element.dynamic_binding && !element.kind.is_buffer() {
                return Err(Error::invalid(format!(
                    "Element `{}` of kind {:?} cannot use dynamic binding",
                    element.name, element.kind
                )));
            }

            if element.dynamic_binding {
                dynamic_buffer_count += 1;
            }

            let ty = element.kind.descriptor_type(element.dynamic_binding);
            bindings.push(DescriptorSetLayoutBinding {
                binding: index as u32,
                ty,
                stages: element.stages,
            });
            kinds.push(element.kind);
            descriptor_types.push(ty);
        }

        let handle = driver.create_descriptor_set_layout(&bindings)?;
        tracing::debug!("ResourceLayout {:?} created", handle);

        Ok(ResourceLayout {
            driver: driver.clone(),
            handle,
            counts: DescriptorResourceCounts::from_types(&descriptor_types),
            kinds,
            descriptor_types,
            dynamic_buffer_count,
        })
    }

    #[inline]
    pub fn set_layout(&self) -> native::DescriptorSetLayout {
        self.handle
    }

    #[inline]
    pub fn descriptor_types(&self) -> &[DescriptorType] {
        &self.descriptor_types
    }

    #[inline]
    pub fn counts(&self) -> &DescriptorResourceCounts {
        &self.counts
    }

    /// Number of dynamic offsets expected when a set of this layout is bound.
    #[inline]
    pub fn dynamic_buffer_count(&self) -> u32 {
        self.dynamic_buffer_count
    }
}

impl Drop for ResourceLayout {
    fn drop(&mut self) {
        self.driver.destroy_descriptor_set_layout(self.handle);
    }
}

impl Debug for ResourceLayout {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        if fmt.alternate() {
            fmt.debug_struct("ResourceLayout")
                .field("handle", &self.handle)
                .field("kinds", &self.kinds)
                .field("dynamic_buffer_count", &self.dynamic_buffer_count)
                .finish()
        } else {
            write!(fmt, "ResourceLayout({:#x})", self.handle.0)
        }
    }
}

/// Resource bound at one element of a resource set.
#[derive(Clone, Copy, Debug)]
pub enum BindableResource<'a> {
    Buffer(&'a Buffer),
    BufferRange(BufferRange<'a>),
    TextureView(&'a TextureView),
    Sampler(&'a Sampler),
}

impl<'a> From<&'a Buffer> for BindableResource<'a> {
    fn from(buffer: &'a Buffer) -> Self {
        BindableResource::Buffer(buffer)
    }
}

impl<'a> From<BufferRange<'a>> for BindableResource<'a> {
    fn from(range: BufferRange<'a>) -> Self {
        BindableResource::BufferRange(range)
    }
}

impl<'a> From<&'a TextureView> for BindableResource<'a> {
    fn from(view: &'a TextureView) -> Self {
        BindableResource::TextureView(view)
    }
}

impl<'a> From<&'a Sampler> for BindableResource<'a> {
    fn from(sampler: &'a Sampler) -> Self {
        BindableResource::Sampler(sampler)
    }
}

#[derive(Clone, Debug)]
pub struct ResourceSetInfo<'a> {
    pub layout: &'a ResourceLayout,
    pub resources: Vec<BindableResource<'a>>,
}

impl<'a> ResourceSetInfo<'a> {
    pub fn new(layout: &'a ResourceLayout, resources: Vec<BindableResource<'a>>) -> Self {
        ResourceSetInfo { layout, resources }
    }
}

pub(crate) struct ResourceSetShared {
    set: native::DescriptorSet,
    dynamic_buffer_count: u32,

    /// Ref counts of every bound resource.
    ref_counts: Vec<Arc<ResourceRefCount>>,
    sampled_textures: TextureList,
    storage_textures: TextureList,
    ref_count: Arc<ResourceRefCount>,
    destroyed: Arc<AtomicBool>,
}

impl ResourceSetShared {
    #[inline]
    pub fn descriptor_set(&self) -> native::DescriptorSet {
        self.set
    }

    #[inline]
    pub fn dynamic_buffer_count(&self) -> u32 {
        self.dynamic_buffer_count
    }

    #[inline]
    pub fn ref_counts(&self) -> &[Arc<ResourceRefCount>] {
        &self.ref_counts
    }

    /// Textures sampled through this set.
    #[inline]
    pub fn sampled_textures(&self) -> &TextureList {
        &self.sampled_textures
    }

    /// Textures bound as storage images.
    #[inline]
    pub fn storage_textures(&self) -> &TextureList {
        &self.storage_textures
    }

    #[inline]
    pub fn ref_count(&self) -> &Arc<ResourceRefCount> {
        &self.ref_count
    }
}

fn buffer_range<'a>(resource: &BindableResource<'a>) -> Option<BufferRange<'a>> {
    match *resource {
        BindableResource::Buffer(buffer) => Some(BufferRange::whole(buffer)),
        BindableResource::BufferRange(range) => Some(range),
        _ => None,
    }
}

fn check_buffer(
    driver: &dyn Driver,
    index: usize,
    kind: ResourceKind,
    range: &BufferRange<'_>,
) -> Result<(), Error> {
    let (required, alignment) = match kind {
        ResourceKind::UniformBuffer => (
            BufferUsage::UNIFORM,
            driver.info().limits.min_uniform_buffer_offset_alignment,
        ),
        ResourceKind::StructuredBufferReadOnly => (
            BufferUsage::STRUCTURED_READ_ONLY | BufferUsage::STRUCTURED_READ_WRITE,
            driver.info().limits.min_storage_buffer_offset_alignment,
        ),
        _ => (
            BufferUsage::STRUCTURED_READ_WRITE,
            driver.info().limits.min_storage_buffer_offset_alignment,
        ),
    };

    if !range.buffer.usage().intersects(required) {
        return Err(Error::invalid(format!(
            "Buffer bound at element {} as {:?} lacks usage {:?}",
            index, kind, required
        )));
    }

    if range.size == 0 || range.offset + range.size > range.buffer.size() {
        return Err(Error::invalid(format!(
            "Buffer range {}+{} at element {} exceeds buffer size {}",
            range.offset,
            range.size,
            index,
            range.buffer.size()
        )));
    }

    if alignment > 0 && range.offset % alignment != 0 {
        return Err(Error::invalid(format!(
            "Buffer range offset {} at element {} is not a multiple of {}",
            range.offset, index, alignment
        )));
    }

    Ok(())
}

/// Resources bound together, matching a [`ResourceLayout`].
///
/// Keeps every bound resource alive.
pub struct ResourceSet {
    shared: Arc<ResourceSetShared>,
}

impl ResourceSet {
    pub(crate) fn new(
        driver: &Arc<dyn Driver>,
        manager: &Arc<DescriptorPoolManager>,
        info: &ResourceSetInfo<'_>,
    ) -> Result<Self, Error> {
        let layout = info.layout;

        if info.resources.len() != layout.kinds.len() {
            return Err(Error::invalid(format!(
                "Resource set has {} resources, layout expects {}",
                info.resources.len(),
                layout.kinds.len()
            )));
        }

        let mut writes: SmallVec<[DescriptorWrite; 8]> = SmallVec::new();
        let mut ref_counts = Vec::with_capacity(info.resources.len());
        let mut sampled_textures = TextureList::new();
        let mut storage_textures = TextureList::new();

        for (index, (resource, &kind)) in info.resources.iter().zip(&layout.kinds).enumerate() {
            let ty = layout.descriptor_types[index];

            let (descriptor, ref_count) = match kind {
                ResourceKind::UniformBuffer
                | ResourceKind::StructuredBufferReadOnly
                | ResourceKind::StructuredBufferReadWrite => {
                    let range = buffer_range(resource).ok_or_else(|| {
                        Error::invalid(format!("Element {} expects a buffer", index))
                    })?;
                    check_buffer(&**driver, index, kind, &range)?;
                    (
                        DescriptorResource::Buffer {
                            buffer: range.buffer.handle(),
                            offset: range.offset,
                            range: range.size,
                        },
                        range.buffer.ref_count().clone(),
                    )
                }
                ResourceKind::TextureReadOnly | ResourceKind::TextureReadWrite => {
                    let view = match resource {
                        BindableResource::TextureView(view) => view,
                        _ => {
                            return Err(Error::invalid(format!(
                                "Element {} expects a texture view",
                                index
                            )))
                        }
                    };
                    let shared = view.shared();
                    let target = shared.target();

                    let (required, layout) = if kind == ResourceKind::TextureReadOnly {
                        sampled_textures.push(target.clone());
                        (TextureUsage::SAMPLED, ImageLayout::ShaderReadOnlyOptimal)
                    } else {
                        storage_textures.push(target.clone());
                        (TextureUsage::STORAGE, ImageLayout::General)
                    };

                    if !target.info().usage.contains(required) {
                        return Err(Error::invalid(format!(
                            "Texture bound at element {} lacks usage {:?}",
                            index, required
                        )));
                    }

                    (
                        DescriptorResource::Image {
                            view: shared.handle(),
                            layout,
                        },
                        shared.ref_count().clone(),
                    )
                }
                ResourceKind::Sampler => match resource {
                    BindableResource::Sampler(sampler) => (
                        DescriptorResource::Sampler(sampler.handle()),
                        sampler.ref_count().clone(),
                    ),
                    _ => {
                        return Err(Error::invalid(format!(
                            "Element {} expects a sampler",
                            index
                        )))
                    }
                },
            };

            writes.push(DescriptorWrite {
                binding: index as u32,
                ty,
                resource: descriptor,
            });
            ref_counts.push(ref_count);
        }

        let counts = layout.counts;
        let token = manager.allocate(&counts, layout.handle)?;
        driver.update_descriptor_set(token.set, &writes);

        for ref_count in &ref_counts {
            ref_count.increment();
        }

        tracing::debug!("ResourceSet {:?} created from {:?}", token.set, layout);

        let destroyed = Arc::new(AtomicBool::new(false));
        let ref_count = {
            let manager = manager.clone();
            let destroyed = destroyed.clone();
            let bound = ref_counts.clone();
            ResourceRefCount::new(move || {
                if !destroyed.swap(true, Ordering::AcqRel) {
                    tracing::debug!("ResourceSet {:?} destroyed", token.set);
                    free_set(&manager, token, &counts);
                    for ref_count in bound {
                        ref_count.decrement();
                    }
                }
            })
        };

        Ok(ResourceSet {
            shared: Arc::new(ResourceSetShared {
                set: token.set,
                dynamic_buffer_count: layout.dynamic_buffer_count,
                ref_counts,
                sampled_textures,
                storage_textures,
                ref_count,
                destroyed,
            }),
        })
    }

    #[inline]
    pub(crate) fn shared(&self) -> &Arc<ResourceSetShared> {
        &self.shared
    }

    #[inline]
    pub fn descriptor_set(&self) -> native::DescriptorSet {
        self.shared.set
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

fn free_set(
    manager: &DescriptorPoolManager,
    token: DescriptorAllocationToken,
    counts: &DescriptorResourceCounts,
) {
    manager.free(token, counts);
}

impl Drop for ResourceSet {
    fn drop(&mut self) {
        self.shared.ref_count.decrement();
    }
}

impl Debug for ResourceSet {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        if fmt.alternate() {
            fmt.debug_struct("ResourceSet")
                .field("set", &self.shared.set)
                .field("sampled_textures", &self.shared.sampled_textures.len())
                .field("storage_textures", &self.shared.storage_textures.len())
                .field("ref_count", &self.shared.ref_count)
                .finish()
        } else {
            write!(fmt, "ResourceSet({:#x})", self.shared.set.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_types_follow_dynamic_binding() {
        assert_eq!(
            ResourceKind::UniformBuffer.descriptor_type(true),
            DescriptorType::UniformBufferDynamic
        );
        assert_eq!(
            ResourceKind::StructuredBufferReadWrite.descriptor_type(false),
            DescriptorType::StorageBuffer
        );
        assert_eq!(
            ResourceKind::TextureReadWrite.descriptor_type(false),
            DescriptorType::StorageImage
        );
    }
}
