use std::ffi::{c_void, CString};

use erupt::vk1_0;
use scoped_arena::Scope;
use smallvec::SmallVec;

use super::{
    convert::{native_error, sample_count, ToErupt as _},
    device::VulkanDriver,
};
use crate::native::{
    ComputePipelineCreateInfo, GraphicsPipelineCreateInfo, ImageLayout, NativeError, Pipeline,
    RenderPass, RenderPassCreateInfo, ResultCode, ShaderStageCreateInfo,
};

fn entry_name_to_cstr(name: &str, call: &'static str) -> Result<CString, NativeError> {
    CString::new(name.as_bytes()).map_err(|_| {
        tracing::error!("Shader entry point {:?} contains nul byte", name);
        NativeError::new(call, ResultCode::InitializationFailed)
    })
}

/// Specialization constants and entry point of one stage, kept alive while the pipeline is built.
struct StageData<'a> {
    entry: CString,
    map_entries: SmallVec<[vk1_0::SpecializationMapEntry; 8]>,
    info: &'a ShaderStageCreateInfo,
}

impl<'a> StageData<'a> {
    fn new(info: &'a ShaderStageCreateInfo, call: &'static str) -> Result<Self, NativeError> {
        Ok(StageData {
            entry: entry_name_to_cstr(&info.entry, call)?,
            map_entries: info
                .specialization
                .entries
                .iter()
                .map(|entry| vk1_0::SpecializationMapEntry {
                    constant_id: entry.constant_id,
                    offset: entry.offset,
                    size: entry.size,
                })
                .collect(),
            info,
        })
    }

    fn specialization(&self) -> vk1_0::SpecializationInfo {
        let data = &self.info.specialization.data;
        vk1_0::SpecializationInfo {
            map_entry_count: self.map_entries.len() as u32,
            p_map_entries: self.map_entries.as_ptr(),
            data_size: data.len(),
            p_data: data.as_ptr() as *const c_void,
            ..vk1_0::SpecializationInfo::default()
        }
    }
}

impl VulkanDriver {
    pub(super) fn create_render_pass_impl(
        &self,
        info: &RenderPassCreateInfo,
    ) -> Result<RenderPass, NativeError> {
        let attachment = |description: &crate::native::AttachmentDescription| {
            vk1_0::AttachmentDescriptionBuilder::new()
                .format(description.format.to_erupt())
                .samples(sample_count(description.samples))
                .load_op(description.load_op.to_erupt())
                .store_op(description.store_op.to_erupt())
                .stencil_load_op(description.stencil_load_op.to_erupt())
                .stencil_store_op(description.stencil_store_op.to_erupt())
                .initial_layout(description.initial_layout.to_erupt())
                .final_layout(description.final_layout.to_erupt())
        };

        let attachments = info
            .colors
            .iter()
            .chain(&info.depth)
            .map(attachment)
            .collect::<SmallVec<[_; 5]>>();

        let color_refs = (0..info.colors.len() as u32)
            .map(|index| {
                vk1_0::AttachmentReferenceBuilder::new()
                    .attachment(index)
                    .layout(ImageLayout::ColorAttachmentOptimal.to_erupt())
            })
            .collect::<SmallVec<[_; 4]>>();

        let depth_ref = vk1_0::AttachmentReferenceBuilder::new()
            .attachment(info.colors.len() as u32)
            .layout(ImageLayout::DepthStencilAttachmentOptimal.to_erupt());

        let mut subpass = vk1_0::SubpassDescriptionBuilder::new()
            .pipeline_bind_point(vk1_0::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs);

        if info.depth.is_some() {
            subpass = subpass.depth_stencil_attachment(&depth_ref);
        }

        let mut dependencies = SmallVec::<[_; 1]>::new();
        if info.external_dependency {
            dependencies.push(
                vk1_0::SubpassDependencyBuilder::new()
                    .src_subpass(vk1_0::SUBPASS_EXTERNAL)
                    .dst_subpass(0)
                    .src_stage_mask(vk1_0::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
                    .dst_stage_mask(vk1_0::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
                    .dst_access_mask(
                        vk1_0::AccessFlags::COLOR_ATTACHMENT_READ
                            | vk1_0::AccessFlags::COLOR_ATTACHMENT_WRITE,
                    ),
            );
        }

        let render_pass = unsafe {
            self.logical.create_render_pass(
                &vk1_0::RenderPassCreateInfoBuilder::new()
                    .attachments(&attachments)
                    .subpasses(std::slice::from_ref(&subpass))
                    .dependencies(&dependencies),
                None,
                None,
            )
        }
        .result()
        .map_err(|err| native_error("vkCreateRenderPass", err))?;

        Ok(RenderPass(render_pass.0))
    }

    pub(super) fn create_graphics_pipeline_impl(
        &self,
        info: &GraphicsPipelineCreateInfo,
    ) -> Result<Pipeline, NativeError> {
        const CALL: &str = "vkCreateGraphicsPipelines";

        let scope = Scope::new();

        let stage_data = info
            .stages
            .iter()
            .map(|stage| StageData::new(stage, CALL))
            .collect::<Result<SmallVec<[_; 4]>, _>>()?;

        let specializations = stage_data
            .iter()
            .map(StageData::specialization)
            .collect::<SmallVec<[_; 4]>>();

        let stages = scope.to_scope_from_iter(stage_data.iter().zip(&specializations).map(
            |(data, specialization)| {
                let mut builder = vk1_0::PipelineShaderStageCreateInfoBuilder::new()
                    .stage(data.info.stage.to_erupt())
                    .module(data.info.module.to_erupt())
                    .name(&data.entry);

                if !data.map_entries.is_empty() {
                    builder = builder.specialization_info(specialization);
                }
                builder
            },
        ));

        let vertex_binding_descriptions = scope.to_scope_from_iter(info.vertex_bindings.iter().map(
            |binding| {
                vk1_0::VertexInputBindingDescriptionBuilder::new()
                    .binding(binding.binding)
                    .stride(binding.stride)
                    .input_rate(if binding.per_instance {
                        vk1_0::VertexInputRate::INSTANCE
                    } else {
                        vk1_0::VertexInputRate::VERTEX
                    })
            },
        ));

        let vertex_attribute_descriptions =
            scope.to_scope_from_iter(info.vertex_attributes.iter().map(|attr| {
                vk1_0::VertexInputAttributeDescriptionBuilder::new()
                    .location(attr.location)
                    .binding(attr.binding)
                    .offset(attr.offset)
                    .format(attr.format.to_erupt())
            }));

        let vertex_input_state = vk1_0::PipelineVertexInputStateCreateInfoBuilder::new()
            .vertex_binding_descriptions(vertex_binding_descriptions)
            .vertex_attribute_descriptions(vertex_attribute_descriptions);

        let input_assembly_state = vk1_0::PipelineInputAssemblyStateCreateInfoBuilder::new()
            .topology(info.topology.to_erupt())
            .primitive_restart_enable(false);

        let rasterizer = &info.rasterizer;
        let rasterization_state = vk1_0::PipelineRasterizationStateCreateInfoBuilder::new()
            .rasterizer_discard_enable(false)
            .depth_clamp_enable(!rasterizer.depth_clip_enabled)
            .polygon_mode(rasterizer.fill_mode.to_erupt())
            .cull_mode(rasterizer.cull_mode.to_erupt())
            .front_face(rasterizer.front_face.to_erupt())
            .line_width(1.0);

        // Viewport and scissor are always set while recording.
        let viewport_state = vk1_0::PipelineViewportStateCreateInfoBuilder::new()
            .viewport_count(1)
            .scissor_count(1);

        let dynamic_states = [vk1_0::DynamicState::VIEWPORT, vk1_0::DynamicState::SCISSOR];
        let dynamic_state =
            vk1_0::PipelineDynamicStateCreateInfoBuilder::new().dynamic_states(&dynamic_states);

        let multisample_state = vk1_0::PipelineMultisampleStateCreateInfoBuilder::new()
            .rasterization_samples(sample_count(info.samples))
            .alpha_to_coverage_enable(info.blend.alpha_to_coverage_enabled);

        let depth_stencil = &info.depth_stencil;
        let stencil_op = |behavior: &crate::pipeline::StencilBehavior| {
            *vk1_0::StencilOpStateBuilder::new()
                .fail_op(behavior.fail.to_erupt())
                .pass_op(behavior.pass.to_erupt())
                .depth_fail_op(behavior.depth_fail.to_erupt())
                .compare_op(behavior.comparison.to_erupt())
                .compare_mask(depth_stencil.stencil_read_mask.into())
                .write_mask(depth_stencil.stencil_write_mask.into())
                .reference(depth_stencil.stencil_reference)
        };

        let depth_stencil_state = vk1_0::PipelineDepthStencilStateCreateInfoBuilder::new()
            .depth_test_enable(depth_stencil.depth_test_enabled)
            .depth_write_enable(depth_stencil.depth_write_enabled)
            .depth_compare_op(depth_stencil.depth_comparison.to_erupt())
            .stencil_test_enable(depth_stencil.stencil_test_enabled)
            .front(stencil_op(&depth_stencil.stencil_front))
            .back(stencil_op(&depth_stencil.stencil_back));

        let blend = &info.blend;
        let blend_attachments = scope.to_scope_from_iter(blend.attachments.iter().map(|attachment| {
            vk1_0::PipelineColorBlendAttachmentStateBuilder::new()
                .blend_enable(attachment.blend_enabled)
                .src_color_blend_factor(attachment.source_color_factor.to_erupt())
                .dst_color_blend_factor(attachment.destination_color_factor.to_erupt())
                .color_blend_op(attachment.color_function.to_erupt())
                .src_alpha_blend_factor(attachment.source_alpha_factor.to_erupt())
                .dst_alpha_blend_factor(attachment.destination_alpha_factor.to_erupt())
                .alpha_blend_op(attachment.alpha_function.to_erupt())
                .color_write_mask(attachment.write_mask().to_erupt())
        }));

        let color_blend_state = vk1_0::PipelineColorBlendStateCreateInfoBuilder::new()
            .logic_op_enable(false)
            .attachments(blend_attachments)
            .blend_constants(blend.blend_factor.to_array());

        let builder = vk1_0::GraphicsPipelineCreateInfoBuilder::new()
            .stages(stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .multisample_state(&multisample_state)
            .depth_stencil_state(&depth_stencil_state)
            .color_blend_state(&color_blend_state)
            .dynamic_state(&dynamic_state)
            .layout(info.layout.to_erupt())
            .render_pass(info.render_pass.to_erupt())
            .subpass(0);

        let pipelines = unsafe { self.logical.create_graphics_pipelines(None, &[builder], None) }
            .result()
            .map_err(|err| native_error(CALL, err))?;

        debug_assert_eq!(pipelines.len(), 1);
        tracing::debug!("Graphics pipeline created {:?}", pipelines[0]);
        Ok(Pipeline(pipelines[0].0))
    }

    pub(super) fn create_compute_pipeline_impl(
        &self,
        info: &ComputePipelineCreateInfo,
    ) -> Result<Pipeline, NativeError> {
        const CALL: &str = "vkCreateComputePipelines";

        let data = StageData::new(&info.stage, CALL)?;
        let specialization = data.specialization();

        let mut stage = vk1_0::PipelineShaderStageCreateInfoBuilder::new()
            .stage(vk1_0::ShaderStageFlagBits::COMPUTE)
            .module(info.stage.module.to_erupt())
            .name(&data.entry);

        if !data.map_entries.is_empty() {
            stage = stage.specialization_info(&specialization);
        }

        let pipelines = unsafe {
            self.logical.create_compute_pipelines(
                None,
                &[vk1_0::ComputePipelineCreateInfoBuilder::new()
                    .stage(stage.build())
                    .layout(info.layout.to_erupt())],
                None,
            )
        }
        .result()
        .map_err(|err| native_error(CALL, err))?;

        debug_assert_eq!(pipelines.len(), 1);
        tracing::debug!("Compute pipeline created {:?}", pipelines[0]);
        Ok(Pipeline(pipelines[0].0))
    }
}
