use std::ffi::CString;

use erupt::{
    extensions::{
        ext_debug_marker::{DebugMarkerMarkerInfoEXTBuilder, DebugMarkerObjectNameInfoEXTBuilder},
        ext_debug_report::DebugReportObjectTypeEXT,
        khr_surface as vks,
        khr_swapchain as vksw,
    },
    vk1_0,
};
use gpu_alloc::UsageFlags;
use smallvec::SmallVec;

use super::{
    convert::{from_erupt, map_error, memory_error, native_error, optional, ToErupt as _},
    device::{CommandBufferSlot, VulkanDriver},
};
use crate::{
    descriptor::DescriptorResourceCounts,
    dimensions::{Rect, Viewport},
    format::PixelFormat,
    native::*,
    sampler::{CompareOp, Filter, SamplerInfo},
    IndexFormat,
};

fn clear_value(value: &ClearValue) -> vk1_0::ClearValue {
    match *value {
        ClearValue::Color(float32) => vk1_0::ClearValue {
            color: vk1_0::ClearColorValue { float32 },
        },
        ClearValue::DepthStencil { depth, stencil } => vk1_0::ClearValue {
            depth_stencil: vk1_0::ClearDepthStencilValue { depth, stencil },
        },
    }
}

fn object_type(ty: ObjectType) -> DebugReportObjectTypeEXT {
    match ty {
        ObjectType::Buffer => DebugReportObjectTypeEXT::BUFFER_EXT,
        ObjectType::Image => DebugReportObjectTypeEXT::IMAGE_EXT,
        ObjectType::ImageView => DebugReportObjectTypeEXT::IMAGE_VIEW_EXT,
        ObjectType::Sampler => DebugReportObjectTypeEXT::SAMPLER_EXT,
        ObjectType::ShaderModule => DebugReportObjectTypeEXT::SHADER_MODULE_EXT,
        ObjectType::DescriptorSetLayout => DebugReportObjectTypeEXT::DESCRIPTOR_SET_LAYOUT_EXT,
        ObjectType::DescriptorSet => DebugReportObjectTypeEXT::DESCRIPTOR_SET_EXT,
        ObjectType::PipelineLayout => DebugReportObjectTypeEXT::PIPELINE_LAYOUT_EXT,
        ObjectType::Pipeline => DebugReportObjectTypeEXT::PIPELINE_EXT,
        ObjectType::RenderPass => DebugReportObjectTypeEXT::RENDER_PASS_EXT,
        ObjectType::Framebuffer => DebugReportObjectTypeEXT::FRAMEBUFFER_EXT,
        ObjectType::CommandPool => DebugReportObjectTypeEXT::COMMAND_POOL_EXT,
        ObjectType::CommandBuffer => DebugReportObjectTypeEXT::COMMAND_BUFFER_EXT,
        ObjectType::Fence => DebugReportObjectTypeEXT::FENCE_EXT,
        ObjectType::Swapchain => DebugReportObjectTypeEXT::SWAPCHAIN_KHR_EXT,
    }
}

fn marker_name(name: &str) -> Option<CString> {
    match CString::new(name) {
        Ok(name) => Some(name),
        Err(_) => {
            tracing::warn!("Debug name {:?} contains nul byte", name);
            None
        }
    }
}

impl VulkanDriver {
    fn begin_marker(&self, cb: CommandBuffer, name: &str, color: [f32; 4], insert: bool) {
        if !self.info.debug_markers {
            return;
        }

        if let Some(name) = marker_name(name) {
            let cb = self.command_buffer(cb);
            let info = DebugMarkerMarkerInfoEXTBuilder::new()
                .marker_name(&name)
                .color(color);
            unsafe {
                if insert {
                    self.logical.cmd_debug_marker_insert_ext(cb, &info)
                } else {
                    self.logical.cmd_debug_marker_begin_ext(cb, &info)
                }
            }
        }
    }
}

impl Driver for VulkanDriver {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn take_validation_error(&self) -> Option<String> {
        self.instance.validation().take()
    }

    fn queue_submit(&self, command_buffers: &[CommandBuffer], fence: Fence) -> Result<(), NativeError> {
        let cbs = command_buffers
            .iter()
            .map(|&cb| self.command_buffer(cb))
            .collect::<SmallVec<[_; 4]>>();

        let queue = self.graphics_queue.lock();
        unsafe {
            self.logical.queue_submit(
                *queue,
                &[vk1_0::SubmitInfoBuilder::new().command_buffers(&cbs)],
                optional(fence),
            )
        }
        .result()
        .map_err(|err| native_error("vkQueueSubmit", err))
    }

    fn queue_wait_idle(&self) -> Result<(), NativeError> {
        let queue = self.graphics_queue.lock();
        unsafe { self.logical.queue_wait_idle(*queue) }
            .result()
            .map_err(|err| native_error("vkQueueWaitIdle", err))
    }

    fn device_wait_idle(&self) -> Result<(), NativeError> {
        unsafe { self.logical.device_wait_idle() }
            .result()
            .map_err(|err| native_error("vkDeviceWaitIdle", err))
    }

    fn buffer_memory_requirements(&self, buffer: Buffer) -> MemoryRequirements {
        let reqs = unsafe {
            self.logical
                .get_buffer_memory_requirements(buffer.to_erupt(), None)
        };
        debug_assert!(reqs.alignment.is_power_of_two());

        MemoryRequirements {
            size: reqs.size,
            alignment: reqs.alignment,
            memory_type_bits: reqs.memory_type_bits,
            prefers_dedicated: false,
        }
    }

    fn image_memory_requirements(&self, image: Image) -> MemoryRequirements {
        let reqs = unsafe {
            self.logical
                .get_image_memory_requirements(image.to_erupt(), None)
        };
        debug_assert!(reqs.alignment.is_power_of_two());

        MemoryRequirements {
            size: reqs.size,
            alignment: reqs.alignment,
            memory_type_bits: reqs.memory_type_bits,
            prefers_dedicated: false,
        }
    }

    fn allocate_memory(&self, request: &MemoryRequest) -> Result<MemoryBlock, NativeError> {
        let requirements = &request.requirements;
        let usage = if request.host_visible {
            UsageFlags::HOST_ACCESS | UsageFlags::UPLOAD
        } else {
            UsageFlags::FAST_DEVICE_ACCESS
        };

        let device = self.memory_device();
        let mut block = unsafe {
            self.allocator.lock().alloc(
                device,
                gpu_alloc::Request {
                    size: requirements.size,
                    align_mask: requirements.alignment - 1,
                    usage,
                    memory_types: requirements.memory_type_bits,
                },
            )
        }
        .map_err(|err| memory_error("vkAllocateMemory", err))?;

        // Host visible blocks stay mapped until freed.
        let mapped = if request.host_visible {
            match unsafe { block.map(device, 0, requirements.size as usize) } {
                Ok(ptr) => Some(MappedPtr::new(ptr)),
                Err(err) => {
                    unsafe { self.allocator.lock().dealloc(device, block) };
                    return Err(map_error(err));
                }
            }
        } else {
            None
        };

        let memory = Memory(block.memory().0);
        let offset = block.offset();
        let size = block.size();
        let id = self.blocks.lock().insert(block);

        Ok(MemoryBlock {
            memory,
            offset,
            size,
            mapped,
            id,
        })
    }

    fn free_memory(&self, block: MemoryBlock) {
        let device = self.memory_device();
        let mut memory_block = self.blocks.lock().remove(block.id);
        if block.mapped.is_some() {
            unsafe { memory_block.unmap(device) };
        }
        unsafe { self.allocator.lock().dealloc(device, memory_block) }
    }

    fn bind_buffer_memory(&self, buffer: Buffer, block: &MemoryBlock) -> Result<(), NativeError> {
        unsafe {
            self.logical.bind_buffer_memory(
                buffer.to_erupt(),
                vk1_0::DeviceMemory(block.memory.0),
                block.offset,
            )
        }
        .result()
        .map_err(|err| native_error("vkBindBufferMemory", err))
    }

    fn bind_image_memory(&self, image: Image, block: &MemoryBlock) -> Result<(), NativeError> {
        unsafe {
            self.logical.bind_image_memory(
                image.to_erupt(),
                vk1_0::DeviceMemory(block.memory.0),
                block.offset,
            )
        }
        .result()
        .map_err(|err| native_error("vkBindImageMemory", err))
    }

    fn map_memory(&self, block: &MemoryBlock) -> Result<MappedPtr, NativeError> {
        if let Some(mapped) = block.mapped {
            return Ok(mapped);
        }

        let device = self.memory_device();
        let mut blocks = self.blocks.lock();
        let ptr = unsafe { blocks[block.id].map(device, 0, block.size as usize) }.map_err(map_error)?;
        Ok(MappedPtr::new(ptr))
    }

    fn unmap_memory(&self, block: &MemoryBlock) {
        if block.mapped.is_none() {
            let device = self.memory_device();
            unsafe { self.blocks.lock()[block.id].unmap(device) };
        }
    }

    fn create_buffer(&self, info: &BufferCreateInfo) -> Result<Buffer, NativeError> {
        let buffer = unsafe {
            self.logical.create_buffer(
                &vk1_0::BufferCreateInfoBuilder::new()
                    .size(info.size)
                    .usage(info.usage.to_erupt())
                    .sharing_mode(vk1_0::SharingMode::EXCLUSIVE),
                None,
                None,
            )
        }
        .result()
        .map_err(|err| native_error("vkCreateBuffer", err))?;

        Ok(from_erupt(buffer))
    }

    fn destroy_buffer(&self, buffer: Buffer) {
        unsafe { self.logical.destroy_buffer(Some(buffer.to_erupt()), None) }
    }

    fn create_image(&self, info: &ImageCreateInfo) -> Result<Image, NativeError> {
        let flags = if info.cube_compatible {
            vk1_0::ImageCreateFlags::CUBE_COMPATIBLE
        } else {
            vk1_0::ImageCreateFlags::empty()
        };

        let image = unsafe {
            self.logical.create_image(
                &vk1_0::ImageCreateInfoBuilder::new()
                    .flags(flags)
                    .image_type(info.kind.to_erupt())
                    .format(info.format.to_erupt())
                    .extent(info.extent.to_erupt())
                    .mip_levels(info.mip_levels)
                    .array_layers(info.array_layers)
                    .samples(super::convert::sample_count(info.samples))
                    .tiling(vk1_0::ImageTiling::OPTIMAL)
                    .usage(info.usage.to_erupt())
                    .sharing_mode(vk1_0::SharingMode::EXCLUSIVE)
                    .initial_layout(info.initial_layout.to_erupt()),
                None,
                None,
            )
        }
        .result()
        .map_err(|err| native_error("vkCreateImage", err))?;

        Ok(from_erupt(image))
    }

    fn destroy_image(&self, image: Image) {
        unsafe { self.logical.destroy_image(Some(image.to_erupt()), None) }
    }

    fn create_image_view(&self, info: &ImageViewCreateInfo) -> Result<ImageView, NativeError> {
        let view = unsafe {
            self.logical.create_image_view(
                &vk1_0::ImageViewCreateInfoBuilder::new()
                    .image(info.image.to_erupt())
                    .format(info.format.to_erupt())
                    .view_type(info.kind.to_erupt())
                    .subresource_range(info.range.to_erupt()),
                None,
                None,
            )
        }
        .result()
        .map_err(|err| native_error("vkCreateImageView", err))?;

        Ok(from_erupt(view))
    }

    fn destroy_image_view(&self, view: ImageView) {
        unsafe { self.logical.destroy_image_view(Some(view.to_erupt()), None) }
    }

    fn create_sampler(&self, info: &SamplerInfo) -> Result<Sampler, NativeError> {
        let sampler = unsafe {
            self.logical.create_sampler(
                &vk1_0::SamplerCreateInfoBuilder::new()
                    .mag_filter(info.mag_filter.to_erupt())
                    .min_filter(info.min_filter.to_erupt())
                    .mipmap_mode(info.mipmap_mode.to_erupt())
                    .address_mode_u(info.address_mode_u.to_erupt())
                    .address_mode_v(info.address_mode_v.to_erupt())
                    .address_mode_w(info.address_mode_w.to_erupt())
                    .mip_lod_bias(info.mip_lod_bias)
                    .anisotropy_enable(info.max_anisotropy.is_some())
                    .max_anisotropy(info.max_anisotropy.unwrap_or(1.0))
                    .compare_enable(info.compare_op.is_some())
                    .compare_op(info.compare_op.unwrap_or(CompareOp::Never).to_erupt())
                    .min_lod(info.min_lod)
                    .max_lod(info.max_lod)
                    .border_color(info.border_color.to_erupt())
                    .unnormalized_coordinates(false),
                None,
                None,
            )
        }
        .result()
        .map_err(|err| native_error("vkCreateSampler", err))?;

        Ok(from_erupt(sampler))
    }

    fn destroy_sampler(&self, sampler: Sampler) {
        unsafe { self.logical.destroy_sampler(Some(sampler.to_erupt()), None) }
    }

    fn create_shader_module(&self, code: &[u32]) -> Result<ShaderModule, NativeError> {
        let module = unsafe {
            self.logical.create_shader_module(
                &vk1_0::ShaderModuleCreateInfoBuilder::new().code(code),
                None,
                None,
            )
        }
        .result()
        .map_err(|err| native_error("vkCreateShaderModule", err))?;

        Ok(from_erupt(module))
    }

    fn destroy_shader_module(&self, module: ShaderModule) {
        unsafe { self.logical.destroy_shader_module(Some(module.to_erupt()), None) }
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[DescriptorSetLayoutBinding],
    ) -> Result<DescriptorSetLayout, NativeError> {
        let bindings = bindings
            .iter()
            .map(|binding| {
                vk1_0::DescriptorSetLayoutBindingBuilder::new()
                    .binding(binding.binding)
                    .descriptor_type(binding.ty.to_erupt())
                    .descriptor_count(1)
                    .stage_flags(binding.stages.to_erupt())
            })
            .collect::<SmallVec<[_; 16]>>();

        let layout = unsafe {
            self.logical.create_descriptor_set_layout(
                &vk1_0::DescriptorSetLayoutCreateInfoBuilder::new().bindings(&bindings),
                None,
                None,
            )
        }
        .result()
        .map_err(|err| native_error("vkCreateDescriptorSetLayout", err))?;

        Ok(from_erupt(layout))
    }

    fn destroy_descriptor_set_layout(&self, layout: DescriptorSetLayout) {
        unsafe {
            self.logical
                .destroy_descriptor_set_layout(Some(layout.to_erupt()), None)
        }
    }

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        counts: &DescriptorResourceCounts,
    ) -> Result<DescriptorPool, NativeError> {
        let sizes = counts
            .iter()
            .filter(|&(_, count)| count > 0)
            .map(|(ty, count)| {
                vk1_0::DescriptorPoolSizeBuilder::new()
                    ._type(ty.to_erupt())
                    .descriptor_count(count)
            })
            .collect::<SmallVec<[_; 8]>>();

        let pool = unsafe {
            self.logical.create_descriptor_pool(
                &vk1_0::DescriptorPoolCreateInfoBuilder::new()
                    .flags(vk1_0::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
                    .max_sets(max_sets)
                    .pool_sizes(&sizes),
                None,
                None,
            )
        }
        .result()
        .map_err(|err| native_error("vkCreateDescriptorPool", err))?;

        Ok(from_erupt(pool))
    }

    fn destroy_descriptor_pool(&self, pool: DescriptorPool) {
        unsafe { self.logical.destroy_descriptor_pool(Some(pool.to_erupt()), None) }
    }

    fn allocate_descriptor_set(
        &self,
        pool: DescriptorPool,
        layout: DescriptorSetLayout,
    ) -> Result<DescriptorSet, NativeError> {
        let layouts = [layout.to_erupt()];
        let sets = unsafe {
            self.logical.allocate_descriptor_sets(
                &vk1_0::DescriptorSetAllocateInfoBuilder::new()
                    .descriptor_pool(pool.to_erupt())
                    .set_layouts(&layouts),
            )
        }
        .result()
        .map_err(|err| native_error("vkAllocateDescriptorSets", err))?;

        debug_assert_eq!(sets.len(), 1);
        Ok(from_erupt(sets[0]))
    }

    fn free_descriptor_set(&self, pool: DescriptorPool, set: DescriptorSet) -> Result<(), NativeError> {
        unsafe {
            self.logical
                .free_descriptor_sets(pool.to_erupt(), &[set.to_erupt()])
        }
        .result()
        .map_err(|err| native_error("vkFreeDescriptorSets", err))
    }

    fn update_descriptor_set(&self, set: DescriptorSet, writes: &[DescriptorWrite]) {
        let mut buffers = SmallVec::<[_; 8]>::new();
        let mut images = SmallVec::<[_; 8]>::new();

        for write in writes {
            match write.resource {
                DescriptorResource::Buffer {
                    buffer,
                    offset,
                    range,
                } => buffers.push(
                    vk1_0::DescriptorBufferInfoBuilder::new()
                        .buffer(buffer.to_erupt())
                        .offset(offset)
                        .range(range),
                ),
                DescriptorResource::Image { view, layout } => images.push(
                    vk1_0::DescriptorImageInfoBuilder::new()
                        .image_view(view.to_erupt())
                        .image_layout(layout.to_erupt()),
                ),
                DescriptorResource::Sampler(sampler) => images.push(
                    vk1_0::DescriptorImageInfoBuilder::new().sampler(sampler.to_erupt()),
                ),
            }
        }

        let (mut next_buffer, mut next_image) = (0, 0);
        let set = set.to_erupt();
        let vk_writes = writes
            .iter()
            .map(|write| {
                let builder = vk1_0::WriteDescriptorSetBuilder::new()
                    .dst_set(set)
                    .dst_binding(write.binding)
                    .dst_array_element(0)
                    .descriptor_type(write.ty.to_erupt());

                match write.resource {
                    DescriptorResource::Buffer { .. } => {
                        next_buffer += 1;
                        builder.buffer_info(&buffers[next_buffer - 1..next_buffer])
                    }
                    _ => {
                        next_image += 1;
                        builder.image_info(&images[next_image - 1..next_image])
                    }
                }
            })
            .collect::<SmallVec<[_; 8]>>();

        unsafe { self.logical.update_descriptor_sets(&vk_writes, &[]) }
    }

    fn create_pipeline_layout(
        &self,
        set_layouts: &[DescriptorSetLayout],
    ) -> Result<PipelineLayout, NativeError> {
        let set_layouts = set_layouts
            .iter()
            .map(|layout| layout.to_erupt())
            .collect::<SmallVec<[_; 8]>>();

        let layout = unsafe {
            self.logical.create_pipeline_layout(
                &vk1_0::PipelineLayoutCreateInfoBuilder::new().set_layouts(&set_layouts),
                None,
                None,
            )
        }
        .result()
        .map_err(|err| native_error("vkCreatePipelineLayout", err))?;

        Ok(from_erupt(layout))
    }

    fn destroy_pipeline_layout(&self, layout: PipelineLayout) {
        unsafe { self.logical.destroy_pipeline_layout(Some(layout.to_erupt()), None) }
    }

    fn create_render_pass(&self, info: &RenderPassCreateInfo) -> Result<RenderPass, NativeError> {
        self.create_render_pass_impl(info)
    }

    fn destroy_render_pass(&self, render_pass: RenderPass) {
        unsafe { self.logical.destroy_render_pass(Some(render_pass.to_erupt()), None) }
    }

    fn create_framebuffer(&self, info: &FramebufferCreateInfo) -> Result<Framebuffer, NativeError> {
        let attachments = info
            .attachments
            .iter()
            .map(|view| view.to_erupt())
            .collect::<SmallVec<[_; 5]>>();

        let framebuffer = unsafe {
            self.logical.create_framebuffer(
                &vk1_0::FramebufferCreateInfoBuilder::new()
                    .render_pass(info.render_pass.to_erupt())
                    .attachments(&attachments)
                    .width(info.extent.width)
                    .height(info.extent.height)
                    .layers(info.layers),
                None,
                None,
            )
        }
        .result()
        .map_err(|err| native_error("vkCreateFramebuffer", err))?;

        Ok(from_erupt(framebuffer))
    }

    fn destroy_framebuffer(&self, framebuffer: Framebuffer) {
        unsafe { self.logical.destroy_framebuffer(Some(framebuffer.to_erupt()), None) }
    }

    fn create_graphics_pipeline(
        &self,
        info: &GraphicsPipelineCreateInfo,
    ) -> Result<Pipeline, NativeError> {
        self.create_graphics_pipeline_impl(info)
    }

    fn create_compute_pipeline(
        &self,
        info: &ComputePipelineCreateInfo,
    ) -> Result<Pipeline, NativeError> {
        self.create_compute_pipeline_impl(info)
    }

    fn destroy_pipeline(&self, pipeline: Pipeline) {
        unsafe { self.logical.destroy_pipeline(Some(pipeline.to_erupt()), None) }
    }

    fn create_command_pool(&self, transient: bool) -> Result<CommandPool, NativeError> {
        let mut flags = vk1_0::CommandPoolCreateFlags::RESET_COMMAND_BUFFER;
        if transient {
            flags |= vk1_0::CommandPoolCreateFlags::TRANSIENT;
        }

        let pool = unsafe {
            self.logical.create_command_pool(
                &vk1_0::CommandPoolCreateInfoBuilder::new()
                    .flags(flags)
                    .queue_family_index(self.graphics_family),
                None,
                None,
            )
        }
        .result()
        .map_err(|err| native_error("vkCreateCommandPool", err))?;

        Ok(from_erupt(pool))
    }

    fn destroy_command_pool(&self, pool: CommandPool) {
        let pool = pool.to_erupt();

        // Buffers are freed together with their pool.
        self.command_buffers
            .lock()
            .retain(|_, slot| slot.pool != pool);

        unsafe { self.logical.destroy_command_pool(Some(pool), None) }
    }

    fn reset_command_pool(&self, pool: CommandPool) -> Result<(), NativeError> {
        unsafe {
            self.logical
                .reset_command_pool(pool.to_erupt(), Some(vk1_0::CommandPoolResetFlags::empty()))
        }
        .result()
        .map_err(|err| native_error("vkResetCommandPool", err))
    }

    fn allocate_command_buffer(&self, pool: CommandPool) -> Result<CommandBuffer, NativeError> {
        let pool = pool.to_erupt();
        let buffers = unsafe {
            self.logical.allocate_command_buffers(
                &vk1_0::CommandBufferAllocateInfoBuilder::new()
                    .command_pool(pool)
                    .level(vk1_0::CommandBufferLevel::PRIMARY)
                    .command_buffer_count(1),
            )
        }
        .result()
        .map_err(|err| native_error("vkAllocateCommandBuffers", err))?;

        debug_assert_eq!(buffers.len(), 1);
        let index = self.command_buffers.lock().insert(CommandBufferSlot {
            handle: buffers[0],
            pool,
        });

        Ok(CommandBuffer(index as u64 + 1))
    }

    fn reset_command_buffer(&self, cb: CommandBuffer) -> Result<(), NativeError> {
        unsafe {
            self.logical.reset_command_buffer(
                self.command_buffer(cb),
                Some(vk1_0::CommandBufferResetFlags::empty()),
            )
        }
        .result()
        .map_err(|err| native_error("vkResetCommandBuffer", err))
    }

    fn begin_command_buffer(&self, cb: CommandBuffer, one_time_submit: bool) -> Result<(), NativeError> {
        let flags = if one_time_submit {
            vk1_0::CommandBufferUsageFlags::ONE_TIME_SUBMIT
        } else {
            vk1_0::CommandBufferUsageFlags::empty()
        };

        unsafe {
            self.logical.begin_command_buffer(
                self.command_buffer(cb),
                &vk1_0::CommandBufferBeginInfoBuilder::new().flags(flags),
            )
        }
        .result()
        .map_err(|err| native_error("vkBeginCommandBuffer", err))
    }

    fn end_command_buffer(&self, cb: CommandBuffer) -> Result<(), NativeError> {
        unsafe { self.logical.end_command_buffer(self.command_buffer(cb)) }
            .result()
            .map_err(|err| native_error("vkEndCommandBuffer", err))
    }

    fn cmd_begin_render_pass(&self, cb: CommandBuffer, info: &RenderPassBeginInfo<'_>) {
        let clear_values = info
            .clear_values
            .iter()
            .map(clear_value)
            .collect::<SmallVec<[_; 5]>>();

        unsafe {
            self.logical.cmd_begin_render_pass(
                self.command_buffer(cb),
                &vk1_0::RenderPassBeginInfoBuilder::new()
                    .render_pass(info.render_pass.to_erupt())
                    .framebuffer(info.framebuffer.to_erupt())
                    .render_area(info.area.to_erupt())
                    .clear_values(&clear_values),
                vk1_0::SubpassContents::INLINE,
            )
        }
    }

    fn cmd_end_render_pass(&self, cb: CommandBuffer) {
        unsafe { self.logical.cmd_end_render_pass(self.command_buffer(cb)) }
    }

    fn cmd_clear_attachments(
        &self,
        cb: CommandBuffer,
        attachments: &[ClearAttachment],
        rects: &[ClearRect],
    ) {
        let attachments = attachments
            .iter()
            .map(|attachment| {
                vk1_0::ClearAttachmentBuilder::new()
                    .aspect_mask(attachment.aspect.to_erupt())
                    .color_attachment(attachment.color_attachment)
                    .clear_value(clear_value(&attachment.value))
            })
            .collect::<SmallVec<[_; 5]>>();

        let rects = rects
            .iter()
            .map(|rect| {
                vk1_0::ClearRectBuilder::new()
                    .rect(rect.rect.to_erupt())
                    .base_array_layer(rect.base_array_layer)
                    .layer_count(rect.layer_count)
            })
            .collect::<SmallVec<[_; 1]>>();

        unsafe {
            self.logical
                .cmd_clear_attachments(self.command_buffer(cb), &attachments, &rects)
        }
    }

    fn cmd_pipeline_barrier(
        &self,
        cb: CommandBuffer,
        src_stages: PipelineStageFlags,
        dst_stages: PipelineStageFlags,
        memory_barriers: &[MemoryBarrier],
        image_barriers: &[ImageBarrier],
    ) {
        let memory_barriers = memory_barriers
            .iter()
            .map(|barrier| {
                vk1_0::MemoryBarrierBuilder::new()
                    .src_access_mask(barrier.src_access.to_erupt())
                    .dst_access_mask(barrier.dst_access.to_erupt())
            })
            .collect::<SmallVec<[_; 1]>>();

        let image_barriers = image_barriers
            .iter()
            .map(|barrier| {
                vk1_0::ImageMemoryBarrierBuilder::new()
                    .image(barrier.image.to_erupt())
                    .old_layout(barrier.old_layout.to_erupt())
                    .new_layout(barrier.new_layout.to_erupt())
                    .src_access_mask(barrier.src_access.to_erupt())
                    .dst_access_mask(barrier.dst_access.to_erupt())
                    .src_queue_family_index(vk1_0::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk1_0::QUEUE_FAMILY_IGNORED)
                    .subresource_range(barrier.range.to_erupt())
            })
            .collect::<SmallVec<[_; 4]>>();

        unsafe {
            self.logical.cmd_pipeline_barrier(
                self.command_buffer(cb),
                src_stages.to_erupt(),
                dst_stages.to_erupt(),
                Some(vk1_0::DependencyFlags::empty()),
                &memory_barriers,
                &[],
                &image_barriers,
            )
        }
    }

    fn cmd_bind_pipeline(&self, cb: CommandBuffer, bind_point: PipelineBindPoint, pipeline: Pipeline) {
        unsafe {
            self.logical.cmd_bind_pipeline(
                self.command_buffer(cb),
                bind_point.to_erupt(),
                pipeline.to_erupt(),
            )
        }
    }

    fn cmd_bind_descriptor_sets(
        &self,
        cb: CommandBuffer,
        bind_point: PipelineBindPoint,
        layout: PipelineLayout,
        first_set: u32,
        sets: &[DescriptorSet],
        dynamic_offsets: &[u32],
    ) {
        let sets = sets
            .iter()
            .map(|set| set.to_erupt())
            .collect::<SmallVec<[_; 8]>>();

        unsafe {
            self.logical.cmd_bind_descriptor_sets(
                self.command_buffer(cb),
                bind_point.to_erupt(),
                layout.to_erupt(),
                first_set,
                &sets,
                dynamic_offsets,
            )
        }
    }

    fn cmd_bind_vertex_buffer(&self, cb: CommandBuffer, binding: u32, buffer: Buffer, offset: u64) {
        unsafe {
            self.logical.cmd_bind_vertex_buffers(
                self.command_buffer(cb),
                binding,
                &[buffer.to_erupt()],
                &[offset],
            )
        }
    }

    fn cmd_bind_index_buffer(&self, cb: CommandBuffer, buffer: Buffer, offset: u64, format: IndexFormat) {
        unsafe {
            self.logical.cmd_bind_index_buffer(
                self.command_buffer(cb),
                buffer.to_erupt(),
                offset,
                format.to_erupt(),
            )
        }
    }

    fn cmd_set_viewport(&self, cb: CommandBuffer, index: u32, viewport: &Viewport) {
        unsafe {
            self.logical.cmd_set_viewport(
                self.command_buffer(cb),
                index,
                &[viewport.to_erupt().into_builder()],
            )
        }
    }

    fn cmd_set_scissor(&self, cb: CommandBuffer, index: u32, rect: &Rect) {
        unsafe {
            self.logical.cmd_set_scissor(
                self.command_buffer(cb),
                index,
                &[rect.to_erupt().into_builder()],
            )
        }
    }

    fn cmd_draw(
        &self,
        cb: CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        unsafe {
            self.logical.cmd_draw(
                self.command_buffer(cb),
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            )
        }
    }

    fn cmd_draw_indexed(
        &self,
        cb: CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        unsafe {
            self.logical.cmd_draw_indexed(
                self.command_buffer(cb),
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            )
        }
    }

    fn cmd_draw_indirect(&self, cb: CommandBuffer, buffer: Buffer, offset: u64, draw_count: u32, stride: u32) {
        unsafe {
            self.logical.cmd_draw_indirect(
                self.command_buffer(cb),
                buffer.to_erupt(),
                offset,
                draw_count,
                stride,
            )
        }
    }

    fn cmd_draw_indexed_indirect(
        &self,
        cb: CommandBuffer,
        buffer: Buffer,
        offset: u64,
        draw_count: u32,
        stride: u32,
    ) {
        unsafe {
            self.logical.cmd_draw_indexed_indirect(
                self.command_buffer(cb),
                buffer.to_erupt(),
                offset,
                draw_count,
                stride,
            )
        }
    }

    fn cmd_dispatch(&self, cb: CommandBuffer, x: u32, y: u32, z: u32) {
        unsafe { self.logical.cmd_dispatch(self.command_buffer(cb), x, y, z) }
    }

    fn cmd_dispatch_indirect(&self, cb: CommandBuffer, buffer: Buffer, offset: u64) {
        unsafe {
            self.logical
                .cmd_dispatch_indirect(self.command_buffer(cb), buffer.to_erupt(), offset)
        }
    }

    fn cmd_copy_buffer(&self, cb: CommandBuffer, src: Buffer, dst: Buffer, regions: &[BufferCopy]) {
        let regions = regions
            .iter()
            .map(|region| region.to_erupt().into_builder())
            .collect::<SmallVec<[_; 4]>>();

        unsafe {
            self.logical.cmd_copy_buffer(
                self.command_buffer(cb),
                src.to_erupt(),
                dst.to_erupt(),
                &regions,
            )
        }
    }

    fn cmd_copy_image(
        &self,
        cb: CommandBuffer,
        src: Image,
        src_layout: ImageLayout,
        dst: Image,
        dst_layout: ImageLayout,
        regions: &[ImageCopy],
    ) {
        let regions = regions
            .iter()
            .map(|region| region.to_erupt().into_builder())
            .collect::<SmallVec<[_; 4]>>();

        unsafe {
            self.logical.cmd_copy_image(
                self.command_buffer(cb),
                src.to_erupt(),
                src_layout.to_erupt(),
                dst.to_erupt(),
                dst_layout.to_erupt(),
                &regions,
            )
        }
    }

    fn cmd_copy_buffer_to_image(
        &self,
        cb: CommandBuffer,
        src: Buffer,
        dst: Image,
        dst_layout: ImageLayout,
        regions: &[BufferImageCopy],
    ) {
        let regions = regions
            .iter()
            .map(|region| region.to_erupt().into_builder())
            .collect::<SmallVec<[_; 4]>>();

        unsafe {
            self.logical.cmd_copy_buffer_to_image(
                self.command_buffer(cb),
                src.to_erupt(),
                dst.to_erupt(),
                dst_layout.to_erupt(),
                &regions,
            )
        }
    }

    fn cmd_copy_image_to_buffer(
        &self,
        cb: CommandBuffer,
        src: Image,
        src_layout: ImageLayout,
        dst: Buffer,
        regions: &[BufferImageCopy],
    ) {
        let regions = regions
            .iter()
            .map(|region| region.to_erupt().into_builder())
            .collect::<SmallVec<[_; 4]>>();

        unsafe {
            self.logical.cmd_copy_image_to_buffer(
                self.command_buffer(cb),
                src.to_erupt(),
                src_layout.to_erupt(),
                dst.to_erupt(),
                &regions,
            )
        }
    }

    fn cmd_blit_image(
        &self,
        cb: CommandBuffer,
        src: Image,
        src_layout: ImageLayout,
        dst: Image,
        dst_layout: ImageLayout,
        regions: &[ImageBlit],
        filter: Filter,
    ) {
        let regions = regions
            .iter()
            .map(|region| region.to_erupt().into_builder())
            .collect::<SmallVec<[_; 4]>>();

        unsafe {
            self.logical.cmd_blit_image(
                self.command_buffer(cb),
                src.to_erupt(),
                src_layout.to_erupt(),
                dst.to_erupt(),
                dst_layout.to_erupt(),
                &regions,
                filter.to_erupt(),
            )
        }
    }

    fn cmd_resolve_image(
        &self,
        cb: CommandBuffer,
        src: Image,
        src_layout: ImageLayout,
        dst: Image,
        dst_layout: ImageLayout,
        regions: &[ImageResolve],
    ) {
        let regions = regions
            .iter()
            .map(|region| region.to_erupt().into_builder())
            .collect::<SmallVec<[_; 1]>>();

        unsafe {
            self.logical.cmd_resolve_image(
                self.command_buffer(cb),
                src.to_erupt(),
                src_layout.to_erupt(),
                dst.to_erupt(),
                dst_layout.to_erupt(),
                &regions,
            )
        }
    }

    fn cmd_clear_color_image(
        &self,
        cb: CommandBuffer,
        image: Image,
        layout: ImageLayout,
        color: [f32; 4],
        range: &ImageSubresourceRange,
    ) {
        unsafe {
            self.logical.cmd_clear_color_image(
                self.command_buffer(cb),
                image.to_erupt(),
                layout.to_erupt(),
                &vk1_0::ClearColorValue { float32: color },
                &[range.to_erupt().into_builder()],
            )
        }
    }

    fn cmd_clear_depth_stencil_image(
        &self,
        cb: CommandBuffer,
        image: Image,
        layout: ImageLayout,
        depth: f32,
        stencil: u32,
        range: &ImageSubresourceRange,
    ) {
        unsafe {
            self.logical.cmd_clear_depth_stencil_image(
                self.command_buffer(cb),
                image.to_erupt(),
                layout.to_erupt(),
                &vk1_0::ClearDepthStencilValue { depth, stencil },
                &[range.to_erupt().into_builder()],
            )
        }
    }

    fn cmd_debug_marker_begin(&self, cb: CommandBuffer, name: &str, color: [f32; 4]) {
        self.begin_marker(cb, name, color, false)
    }

    fn cmd_debug_marker_end(&self, cb: CommandBuffer) {
        if self.info.debug_markers {
            unsafe { self.logical.cmd_debug_marker_end_ext(self.command_buffer(cb)) }
        }
    }

    fn cmd_debug_marker_insert(&self, cb: CommandBuffer, name: &str, color: [f32; 4]) {
        self.begin_marker(cb, name, color, true)
    }

    fn create_fence(&self, signaled: bool) -> Result<Fence, NativeError> {
        let flags = if signaled {
            vk1_0::FenceCreateFlags::SIGNALED
        } else {
            vk1_0::FenceCreateFlags::empty()
        };

        let fence = unsafe {
            self.logical
                .create_fence(&vk1_0::FenceCreateInfoBuilder::new().flags(flags), None, None)
        }
        .result()
        .map_err(|err| native_error("vkCreateFence", err))?;

        Ok(from_erupt(fence))
    }

    fn destroy_fence(&self, fence: Fence) {
        unsafe { self.logical.destroy_fence(Some(fence.to_erupt()), None) }
    }

    fn fence_status(&self, fence: Fence) -> Result<bool, NativeError> {
        match unsafe { self.logical.get_fence_status(fence.to_erupt()) }.raw {
            vk1_0::Result::SUCCESS => Ok(true),
            vk1_0::Result::NOT_READY => Ok(false),
            err => Err(native_error("vkGetFenceStatus", err)),
        }
    }

    fn reset_fences(&self, fences: &[Fence]) -> Result<(), NativeError> {
        let handles = fences
            .iter()
            .map(|fence| fence.to_erupt())
            .collect::<SmallVec<[_; 8]>>();

        unsafe { self.logical.reset_fences(&handles) }
            .result()
            .map_err(|err| native_error("vkResetFences", err))
    }

    fn wait_for_fences(&self, fences: &[Fence], wait_all: bool, timeout_ns: u64) -> Result<bool, NativeError> {
        let handles = fences
            .iter()
            .map(|fence| fence.to_erupt())
            .collect::<SmallVec<[_; 8]>>();

        match unsafe { self.logical.wait_for_fences(&handles, wait_all, timeout_ns) }.raw {
            vk1_0::Result::SUCCESS => Ok(true),
            vk1_0::Result::TIMEOUT => Ok(false),
            err => Err(native_error("vkWaitForFences", err)),
        }
    }

    fn set_object_name(&self, ty: ObjectType, handle: u64, name: &str) {
        if !self.info.debug_markers {
            return;
        }

        // Dispatchable command buffers are keyed by slot here, not by native handle.
        if ty == ObjectType::CommandBuffer {
            tracing::trace!("Command buffer {} named {:?}", handle, name);
            return;
        }

        if let Some(name) = marker_name(name) {
            let result = unsafe {
                self.logical.debug_marker_set_object_name_ext(
                    &DebugMarkerObjectNameInfoEXTBuilder::new()
                        .object_type(object_type(ty))
                        .object(handle)
                        .object_name(&name),
                )
            }
            .result();

            if let Err(err) = result {
                tracing::warn!("Failed to name {:?} {:#x}: {}", ty, handle, err);
            }
        }
    }

    fn format_properties(&self, format: PixelFormat) -> FormatProperties {
        let properties = unsafe {
            self.instance
                .loader
                .get_physical_device_format_properties(self.physical, format.to_erupt(), None)
        };

        FormatProperties {
            linear_tiling: from_erupt(properties.linear_tiling_features),
            optimal_tiling: from_erupt(properties.optimal_tiling_features),
            buffer: from_erupt(properties.buffer_features),
        }
    }

    fn image_format_properties(
        &self,
        format: PixelFormat,
        kind: ImageKind,
        usage: ImageUsageFlags,
        cube_compatible: bool,
    ) -> Result<ImageFormatProperties, NativeError> {
        let flags = if cube_compatible {
            vk1_0::ImageCreateFlags::CUBE_COMPATIBLE
        } else {
            vk1_0::ImageCreateFlags::empty()
        };

        let properties = unsafe {
            self.instance.loader.get_physical_device_image_format_properties(
                self.physical,
                format.to_erupt(),
                kind.to_erupt(),
                vk1_0::ImageTiling::OPTIMAL,
                usage.to_erupt(),
                Some(flags),
                None,
            )
        }
        .result()
        .map_err(|err| native_error("vkGetPhysicalDeviceImageFormatProperties", err))?;

        Ok(ImageFormatProperties {
            max_extent: from_erupt(properties.max_extent),
            max_mip_levels: properties.max_mip_levels,
            max_array_layers: properties.max_array_layers,
            sample_counts: from_erupt(properties.sample_counts),
        })
    }

    fn create_surface(&self, source: &SurfaceSource) -> Result<Surface, NativeError> {
        self.instance.create_surface(source).map(from_erupt)
    }

    fn destroy_surface(&self, surface: Surface) {
        self.instance.destroy_surface(surface.to_erupt())
    }

    fn surface_supported(&self, surface: Surface) -> Result<bool, NativeError> {
        unsafe {
            self.instance.loader.get_physical_device_surface_support_khr(
                self.physical,
                self.present_family,
                surface.to_erupt(),
                None,
            )
        }
        .result()
        .map_err(|err| native_error("vkGetPhysicalDeviceSurfaceSupportKHR", err))
    }

    fn surface_capabilities(&self, surface: Surface) -> Result<SurfaceCapabilities, NativeError> {
        let caps = self.raw_surface_capabilities(surface)?;

        Ok(SurfaceCapabilities {
            min_image_count: caps.min_image_count,
            max_image_count: caps.max_image_count,
            current_extent: from_erupt(caps.current_extent),
            min_extent: from_erupt(caps.min_image_extent),
            max_extent: from_erupt(caps.max_image_extent),
        })
    }

    fn surface_formats(&self, surface: Surface) -> Result<Vec<SurfaceFormat>, NativeError> {
        let formats = unsafe {
            self.instance.loader.get_physical_device_surface_formats_khr(
                self.physical,
                surface.to_erupt(),
                None,
            )
        }
        .result()
        .map_err(|err| native_error("vkGetPhysicalDeviceSurfaceFormatsKHR", err))?;

        Ok(formats
            .iter()
            .map(|sf| SurfaceFormat {
                format: from_erupt(sf.format),
                color_space: from_erupt(sf.color_space),
            })
            .collect())
    }

    fn surface_present_modes(&self, surface: Surface) -> Result<Vec<PresentMode>, NativeError> {
        let modes = unsafe {
            self.instance
                .loader
                .get_physical_device_surface_present_modes_khr(
                    self.physical,
                    surface.to_erupt(),
                    None,
                )
        }
        .result()
        .map_err(|err| native_error("vkGetPhysicalDeviceSurfacePresentModesKHR", err))?;

        Ok(modes
            .into_iter()
            .filter_map(|mode| from_erupt::<_, Option<PresentMode>>(mode))
            .collect())
    }

    fn create_swapchain(&self, info: &SwapchainCreateInfo) -> Result<Swapchain, NativeError> {
        let caps = self.raw_surface_capabilities(info.surface)?;

        let composite_alpha = {
            let raw = caps.supported_composite_alpha.bits();

            if raw == 0 {
                tracing::warn!("Surface reports no composite alpha mode, picking OPAQUE");
                vks::CompositeAlphaFlagsKHR::OPAQUE_KHR
            } else {
                // Lowest supported bit.
                vks::CompositeAlphaFlagsKHR::from_bits_truncate(1 << raw.trailing_zeros())
            }
        };

        let families = [self.graphics_family, self.present_family];

        let mut builder = vksw::SwapchainCreateInfoKHRBuilder::new()
            .surface(info.surface.to_erupt())
            .min_image_count(info.image_count)
            .image_format(info.format.to_erupt())
            .image_color_space(info.color_space.to_erupt())
            .image_extent(info.extent.to_erupt())
            .image_array_layers(1)
            .image_usage(info.usage.to_erupt())
            .pre_transform(caps.current_transform)
            .composite_alpha(vks::CompositeAlphaFlagBitsKHR(composite_alpha.bits()))
            .present_mode(info.present_mode.to_erupt())
            .clipped(true)
            .old_swapchain(info.old_swapchain.to_erupt());

        builder = if self.graphics_family == self.present_family {
            builder.image_sharing_mode(vk1_0::SharingMode::EXCLUSIVE)
        } else {
            builder
                .image_sharing_mode(vk1_0::SharingMode::CONCURRENT)
                .queue_family_indices(&families)
        };

        let swapchain = unsafe { self.logical.create_swapchain_khr(&builder, None, None) }
            .result()
            .map_err(|err| native_error("vkCreateSwapchainKHR", err))?;

        tracing::debug!("Swapchain created {:?}", swapchain);
        Ok(from_erupt(swapchain))
    }

    fn destroy_swapchain(&self, swapchain: Swapchain) {
        unsafe {
            self.logical
                .destroy_swapchain_khr(Some(swapchain.to_erupt()), None)
        }
    }

    fn swapchain_images(&self, swapchain: Swapchain) -> Result<Vec<Image>, NativeError> {
        let images = unsafe {
            self.logical
                .get_swapchain_images_khr(swapchain.to_erupt(), None)
        }
        .result()
        .map_err(|err| native_error("vkGetSwapchainImagesKHR", err))?;

        Ok(images.into_iter().map(from_erupt).collect())
    }

    fn acquire_next_image(&self, swapchain: Swapchain, fence: Fence) -> Result<AcquireResult, NativeError> {
        let result = unsafe {
            self.logical.acquire_next_image_khr(
                swapchain.to_erupt(),
                u64::MAX,
                None,
                optional(fence),
                None,
            )
        };

        match (result.raw, result.value) {
            (vk1_0::Result::ERROR_OUT_OF_DATE_KHR, _) => Ok(AcquireResult::OutOfDate),
            (vk1_0::Result::SUBOPTIMAL_KHR, Some(index)) => Ok(AcquireResult::Suboptimal(index)),
            (vk1_0::Result::SUCCESS, Some(index)) => Ok(AcquireResult::Success(index)),
            (err, _) => Err(native_error("vkAcquireNextImageKHR", err)),
        }
    }

    fn queue_present(&self, swapchain: Swapchain, image_index: u32) -> Result<PresentResult, NativeError> {
        let swapchains = [swapchain.to_erupt()];
        let indices = [image_index];

        let queue = self.present_queue.lock();
        let result = unsafe {
            self.logical.queue_present_khr(
                *queue,
                &vksw::PresentInfoKHRBuilder::new()
                    .swapchains(&swapchains)
                    .image_indices(&indices),
            )
        };

        match result.raw {
            vk1_0::Result::SUCCESS => Ok(PresentResult::Success),
            vk1_0::Result::SUBOPTIMAL_KHR => Ok(PresentResult::Suboptimal),
            vk1_0::Result::ERROR_OUT_OF_DATE_KHR => Ok(PresentResult::OutOfDate),
            err => Err(native_error("vkQueuePresentKHR", err)),
        }
    }
}

impl VulkanDriver {
    fn raw_surface_capabilities(
        &self,
        surface: Surface,
    ) -> Result<vks::SurfaceCapabilitiesKHR, NativeError> {
        unsafe {
            self.instance
                .loader
                .get_physical_device_surface_capabilities_khr(
                    self.physical,
                    surface.to_erupt(),
                    None,
                )
        }
        .result()
        .map_err(|err| native_error("vkGetPhysicalDeviceSurfaceCapabilitiesKHR", err))
    }
}
