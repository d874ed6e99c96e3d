use std::{
    fmt::{self, Debug},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use smallvec::{smallvec, SmallVec};

use crate::{
    dimensions::RgbaFloat,
    format::PixelFormat,
    framebuffer::attachment_description,
    native::{
        self, AttachmentLoadOp, ComputePipelineCreateInfo, DescriptorSetLayout, Driver,
        GraphicsPipelineCreateInfo, ImageLayout, RenderPassCreateInfo, ShaderStageCreateInfo,
        SpecializationEntry, SpecializationInfo, VertexAttributeDescription,
        VertexBindingDescription,
    },
    refcount::ResourceRefCount,
    resource::{ResourceLayout, MAX_RESOURCE_SETS},
    sampler::CompareOp,
    shader::{Shader, ShaderStages},
    texture::TextureSampleCount,
    Error,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SourceAlpha,
    InverseSourceAlpha,
    DestinationAlpha,
    InverseDestinationAlpha,
    SourceColor,
    InverseSourceColor,
    DestinationColor,
    InverseDestinationColor,

    /// Constant from [`BlendStateInfo::blend_factor`].
    BlendFactor,
    InverseBlendFactor,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlendFunction {
    Add,
    Subtract,
    ReverseSubtract,
    Minimum,
    Maximum,
}

bitflags::bitflags! {
    pub struct ColorWriteMask: u8 {
        const RED = 0b0001;
        const GREEN = 0b0010;
        const BLUE = 0b0100;
        const ALPHA = 0b1000;
        const ALL = 0b1111;
    }
}

/// Blending of a single color attachment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlendAttachment {
    pub blend_enabled: bool,

    /// All channels are written when `None`.
    pub color_write_mask: Option<ColorWriteMask>,
    pub source_color_factor: BlendFactor,
    pub destination_color_factor: BlendFactor,
    pub color_function: BlendFunction,
    pub source_alpha_factor: BlendFactor,
    pub destination_alpha_factor: BlendFactor,
    pub alpha_function: BlendFunction,
}

impl BlendAttachment {
    /// Source replaces destination.
    pub const OVERRIDE_BLEND: Self = BlendAttachment {
        blend_enabled: true,
        color_write_mask: None,
        source_color_factor: BlendFactor::One,
        destination_color_factor: BlendFactor::Zero,
        color_function: BlendFunction::Add,
        source_alpha_factor: BlendFactor::One,
        destination_alpha_factor: BlendFactor::Zero,
        alpha_function: BlendFunction::Add,
    };

    pub const ALPHA_BLEND: Self = BlendAttachment {
        blend_enabled: true,
        color_write_mask: None,
        source_color_factor: BlendFactor::SourceAlpha,
        destination_color_factor: BlendFactor::InverseSourceAlpha,
        color_function: BlendFunction::Add,
        source_alpha_factor: BlendFactor::SourceAlpha,
        destination_alpha_factor: BlendFactor::InverseSourceAlpha,
        alpha_function: BlendFunction::Add,
    };

    pub const ADDITIVE_BLEND: Self = BlendAttachment {
        blend_enabled: true,
        color_write_mask: None,
        source_color_factor: BlendFactor::SourceAlpha,
        destination_color_factor: BlendFactor::One,
        color_function: BlendFunction::Add,
        source_alpha_factor: BlendFactor::SourceAlpha,
        destination_alpha_factor: BlendFactor::One,
        alpha_function: BlendFunction::Add,
    };

    pub const DISABLED: Self = BlendAttachment {
        blend_enabled: false,
        ..Self::OVERRIDE_BLEND
    };

    pub fn write_mask(&self) -> ColorWriteMask {
        self.color_write_mask.unwrap_or(ColorWriteMask::ALL)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BlendStateInfo {
    pub blend_factor: RgbaFloat,

    /// One entry per color attachment of the output.
    pub attachments: SmallVec<[BlendAttachment; 4]>,
    pub alpha_to_coverage_enabled: bool,
}

impl BlendStateInfo {
    pub fn single(attachment: BlendAttachment) -> Self {
        BlendStateInfo {
            blend_factor: RgbaFloat::BLACK,
            attachments: smallvec![attachment],
            alpha_to_coverage_enabled: false,
        }
    }

    pub fn single_override() -> Self {
        Self::single(BlendAttachment::OVERRIDE_BLEND)
    }

    pub fn single_alpha() -> Self {
        Self::single(BlendAttachment::ALPHA_BLEND)
    }

    /// No color attachments. Used for depth-only outputs.
    pub fn empty() -> Self {
        BlendStateInfo {
            blend_factor: RgbaFloat::BLACK,
            attachments: SmallVec::new(),
            alpha_to_coverage_enabled: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StencilOperation {
    Keep,
    Zero,
    Replace,
    IncrementAndClamp,
    DecrementAndClamp,
    Invert,
    IncrementAndWrap,
    DecrementAndWrap,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StencilBehavior {
    /// Performed on samples that fail the stencil test.
    pub fail: StencilOperation,

    /// Performed on samples that pass both depth and stencil tests.
    pub pass: StencilOperation,

    /// Performed on samples that pass stencil test but fail depth test.
    pub depth_fail: StencilOperation,
    pub comparison: CompareOp,
}

impl StencilBehavior {
    pub const KEEP: Self = StencilBehavior {
        fail: StencilOperation::Keep,
        pass: StencilOperation::Keep,
        depth_fail: StencilOperation::Keep,
        comparison: CompareOp::Always,
    };
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DepthStencilStateInfo {
    pub depth_test_enabled: bool,
    pub depth_write_enabled: bool,
    pub depth_comparison: CompareOp,
    pub stencil_test_enabled: bool,
    pub stencil_front: StencilBehavior,
    pub stencil_back: StencilBehavior,
    pub stencil_read_mask: u8,
    pub stencil_write_mask: u8,
    pub stencil_reference: u32,
}

impl DepthStencilStateInfo {
    pub const DEPTH_ONLY_LESS_EQUAL: Self = DepthStencilStateInfo {
        depth_test_enabled: true,
        depth_write_enabled: true,
        depth_comparison: CompareOp::LessOrEqual,
        stencil_test_enabled: false,
        stencil_front: StencilBehavior::KEEP,
        stencil_back: StencilBehavior::KEEP,
        stencil_read_mask: 0xff,
        stencil_write_mask: 0xff,
        stencil_reference: 0,
    };

    pub const DEPTH_ONLY_LESS_EQUAL_READ: Self = DepthStencilStateInfo {
        depth_write_enabled: false,
        ..Self::DEPTH_ONLY_LESS_EQUAL
    };

    pub const DISABLED: Self = DepthStencilStateInfo {
        depth_test_enabled: false,
        depth_write_enabled: false,
        ..Self::DEPTH_ONLY_LESS_EQUAL
    };
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FaceCullMode {
    Back,
    Front,
    None,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PolygonFillMode {
    Solid,
    Wireframe,
}

/// Polygon front face definition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FrontFace {
    /// Polygon which has vertices ordered in clockwise
    /// from some point of view is front faced to that point.
    Clockwise,

    /// Polygon which has vertices ordered in counter-clockwise
    /// from some point of view is front faced to that point.
    CounterClockwise,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RasterizerStateInfo {
    pub cull_mode: FaceCullMode,
    pub fill_mode: PolygonFillMode,
    pub front_face: FrontFace,

    /// Fragments outside of depth range are clipped.
    /// Disabling clipping clamps them and requires depth clamp feature.
    pub depth_clip_enabled: bool,
    pub scissor_test_enabled: bool,
}

impl RasterizerStateInfo {
    pub const DEFAULT: Self = RasterizerStateInfo {
        cull_mode: FaceCullMode::Back,
        fill_mode: PolygonFillMode::Solid,
        front_face: FrontFace::Clockwise,
        depth_clip_enabled: true,
        scissor_test_enabled: false,
    };

    pub const CULL_NONE: Self = RasterizerStateInfo {
        cull_mode: FaceCullMode::None,
        ..Self::DEFAULT
    };
}

impl Default for RasterizerStateInfo {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Topology of primitives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PrimitiveTopology {
    /// Each separate triplet of vertices forms one triangle.
    TriangleList,

    /// Each triplet of consecutive vertices forms one triangle.
    TriangleStrip,
    LineList,
    LineStrip,
    PointList,
}

impl Default for PrimitiveTopology {
    fn default() -> Self {
        PrimitiveTopology::TriangleList
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VertexElementFormat {
    Float1,
    Float2,
    Float3,
    Float4,
    Byte2Norm,
    Byte2,
    Byte4Norm,
    Byte4,
    SByte2Norm,
    SByte2,
    SByte4Norm,
    SByte4,
    UShort2Norm,
    UShort2,
    UShort4Norm,
    UShort4,
    Short2Norm,
    Short2,
    Short4Norm,
    Short4,
    UInt1,
    UInt2,
    UInt3,
    UInt4,
    Int1,
    Int2,
    Int3,
    Int4,
    Half1,
    Half2,
    Half4,
}

impl VertexElementFormat {
    pub fn size(&self) -> u32 {
        use VertexElementFormat::*;

        match self {
            Byte2Norm | Byte2 | SByte2Norm | SByte2 | Half1 => 2,
            Float1 | UInt1 | Int1 | Byte4Norm | Byte4 | SByte4Norm | SByte4 | UShort2Norm
            | UShort2 | Short2Norm | Short2 | Half2 => 4,
            Float2 | UInt2 | Int2 | UShort4Norm | UShort4 | Short4Norm | Short4 | Half4 => 8,
            Float3 | UInt3 | Int3 => 12,
            Float4 | UInt4 | Int4 => 16,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct VertexElementInfo {
    pub name: String,
    pub format: VertexElementFormat,

    /// Offset within the vertex. Zero places the element right after the previous one.
    pub offset: u32,
}

impl VertexElementInfo {
    pub fn new(name: &str, format: VertexElementFormat) -> Self {
        VertexElementInfo {
            name: name.to_owned(),
            format,
            offset: 0,
        }
    }
}

/// Layout of a single vertex buffer.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct VertexLayoutInfo {
    pub stride: u32,
    pub elements: Vec<VertexElementInfo>,

    /// Zero steps per vertex, anything else steps per instance.
    pub instance_step_rate: u32,
}

impl VertexLayoutInfo {
    /// Tightly packed per-vertex layout.
    pub fn new(elements: Vec<VertexElementInfo>) -> Self {
        let stride = elements.iter().map(|e| e.format.size()).sum();
        VertexLayoutInfo {
            stride,
            elements,
            instance_step_rate: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SpecializationConstantType {
    Bool,
    UInt16,
    Int16,
    UInt32,
    Int32,
    UInt64,
    Int64,
    Float,
    Double,
}

impl SpecializationConstantType {
    /// Size of the constant in specialization data.
    /// Booleans are 32 bit as in SPIR-V.
    pub fn size(&self) -> usize {
        match self {
            SpecializationConstantType::UInt16 | SpecializationConstantType::Int16 => 2,
            SpecializationConstantType::Bool
            | SpecializationConstantType::UInt32
            | SpecializationConstantType::Int32
            | SpecializationConstantType::Float => 4,
            SpecializationConstantType::UInt64
            | SpecializationConstantType::Int64
            | SpecializationConstantType::Double => 8,
        }
    }
}

/// Value for a shader specialization constant.
/// The value occupies low bytes of `data`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SpecializationConstant {
    pub id: u32,
    pub ty: SpecializationConstantType,
    pub data: u64,
}

impl SpecializationConstant {
    pub fn bool(id: u32, value: bool) -> Self {
        SpecializationConstant {
            id,
            ty: SpecializationConstantType::Bool,
            data: value as u64,
        }
    }

    pub fn u32(id: u32, value: u32) -> Self {
        SpecializationConstant {
            id,
            ty: SpecializationConstantType::UInt32,
            data: value.into(),
        }
    }

    pub fn i32(id: u32, value: i32) -> Self {
        SpecializationConstant {
            id,
            ty: SpecializationConstantType::Int32,
            data: value as u32 as u64,
        }
    }

    pub fn f32(id: u32, value: f32) -> Self {
        SpecializationConstant {
            id,
            ty: SpecializationConstantType::Float,
            data: value.to_bits().into(),
        }
    }

    pub fn f64(id: u32, value: f64) -> Self {
        SpecializationConstant {
            id,
            ty: SpecializationConstantType::Double,
            data: value.to_bits(),
        }
    }

    fn write_bytes(&self, out: &mut Vec<u8>) {
        match self.ty.size() {
            2 => out.extend_from_slice(&(self.data as u16).to_ne_bytes()),
            4 => out.extend_from_slice(&(self.data as u32).to_ne_bytes()),
            _ => out.extend_from_slice(&self.data.to_ne_bytes()),
        }
    }
}

/// Packs constants back to back, in order.
pub(crate) fn specialization_info(constants: &[SpecializationConstant]) -> SpecializationInfo {
    let mut info = SpecializationInfo::default();
    for constant in constants {
        info.entries.push(SpecializationEntry {
            constant_id: constant.id,
            offset: info.data.len() as u32,
            size: constant.ty.size(),
        });
        constant.write_bytes(&mut info.data);
    }
    info
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OutputAttachmentInfo {
    pub format: PixelFormat,
}

/// Attachment formats a graphics pipeline renders into.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct OutputInfo {
    pub depth_attachment: Option<OutputAttachmentInfo>,
    pub color_attachments: SmallVec<[OutputAttachmentInfo; 4]>,
    pub sample_count: TextureSampleCount,
}

impl OutputInfo {
    pub fn new(color: &[PixelFormat], depth: Option<PixelFormat>) -> Self {
        OutputInfo {
            depth_attachment: depth.map(|format| OutputAttachmentInfo { format }),
            color_attachments: color
                .iter()
                .map(|&format| OutputAttachmentInfo { format })
                .collect(),
            sample_count: TextureSampleCount::Count1,
        }
    }
}

#[derive(Clone, Debug)]
pub struct GraphicsPipelineInfo<'a> {
    pub blend_state: BlendStateInfo,
    pub depth_stencil_state: DepthStencilStateInfo,
    pub rasterizer_state: RasterizerStateInfo,
    pub primitive_topology: PrimitiveTopology,
    pub vertex_layouts: Vec<VertexLayoutInfo>,
    pub shaders: Vec<&'a Shader>,
    pub specializations: Vec<SpecializationConstant>,
    pub resource_layouts: Vec<&'a ResourceLayout>,
    pub outputs: OutputInfo,
}

#[derive(Clone, Debug)]
pub struct ComputePipelineInfo<'a> {
    pub shader: &'a Shader,
    pub resource_layouts: Vec<&'a ResourceLayout>,
    pub specializations: Vec<SpecializationConstant>,
}

pub(crate) struct PipelineShared {
    handle: native::Pipeline,
    layout: native::PipelineLayout,
    is_compute: bool,
    resource_set_count: u32,
    dynamic_offset_count: u32,
    scissor_test_enabled: bool,
    ref_count: Arc<ResourceRefCount>,
    destroyed: Arc<AtomicBool>,
}

impl PipelineShared {
    #[inline]
    pub fn handle(&self) -> native::Pipeline {
        self.handle
    }

    #[inline]
    pub fn layout(&self) -> native::PipelineLayout {
        self.layout
    }

    #[inline]
    pub fn is_compute(&self) -> bool {
        self.is_compute
    }

    #[inline]
    pub fn resource_set_count(&self) -> u32 {
        self.resource_set_count
    }

    #[inline]
    pub fn dynamic_offset_count(&self) -> u32 {
        self.dynamic_offset_count
    }

    #[inline]
    pub fn scissor_test_enabled(&self) -> bool {
        self.scissor_test_enabled
    }

    #[inline]
    pub fn ref_count(&self) -> &Arc<ResourceRefCount> {
        &self.ref_count
    }
}

/// Immutable graphics or compute pipeline.
pub struct Pipeline {
    shared: Arc<PipelineShared>,
}

fn pipeline_layout(
    driver: &Arc<dyn Driver>,
    layouts: &[&ResourceLayout],
) -> Result<(native::PipelineLayout, u32), Error> {
    if layouts.len() > MAX_RESOURCE_SETS {
        return Err(Error::invalid(format!(
            "Pipeline uses {} resource layouts, at most {} are supported",
            layouts.len(),
            MAX_RESOURCE_SETS
        )));
    }

    let set_layouts: SmallVec<[DescriptorSetLayout; MAX_RESOURCE_SETS]> =
        layouts.iter().map(|layout| layout.set_layout()).collect();
    let dynamic_offset_count = layouts.iter().map(|l| l.dynamic_buffer_count()).sum();

    let layout = driver.create_pipeline_layout(&set_layouts)?;
    Ok((layout, dynamic_offset_count))
}

fn vertex_input(
    layouts: &[VertexLayoutInfo],
) -> (Vec<VertexBindingDescription>, Vec<VertexAttributeDescription>) {
    let mut bindings = Vec::with_capacity(layouts.len());
    let mut attributes = Vec::new();

    // Locations continue across buffers.
    let mut location = 0;
    for (binding, layout) in layouts.iter().enumerate() {
        bindings.push(VertexBindingDescription {
            binding: binding as u32,
            stride: layout.stride,
            per_instance: layout.instance_step_rate != 0,
        });

        let mut offset = 0;
        for element in &layout.elements {
            attributes.push(VertexAttributeDescription {
                location,
                binding: binding as u32,
                format: element.format,
                offset: if element.offset != 0 {
                    element.offset
                } else {
                    offset
                },
            });
            location += 1;
            offset += element.format.size();
        }
    }

    (bindings, attributes)
}

/// Render pass the pipeline is created against.
/// Any framebuffer with matching formats is compatible with it.
fn compatible_render_pass(outputs: &OutputInfo) -> RenderPassCreateInfo {
    let samples = outputs.sample_count.count();
    RenderPassCreateInfo {
        colors: outputs
            .color_attachments
            .iter()
            .map(|color| {
                attachment_description(
                    color.format,
                    samples,
                    AttachmentLoadOp::DontCare,
                    ImageLayout::Undefined,
                    ImageLayout::ShaderReadOnlyOptimal,
                )
            })
            .collect(),
        depth: outputs.depth_attachment.map(|depth| {
            attachment_description(
                depth.format,
                samples,
                AttachmentLoadOp::DontCare,
                ImageLayout::Undefined,
                ImageLayout::DepthStencilAttachmentOptimal,
            )
        }),
        external_dependency: true,
    }
}

impl Pipeline {
    #[tracing::instrument(skip(driver, info))]
    pub(crate) fn new_graphics(
        driver: &Arc<dyn Driver>,
        info: &GraphicsPipelineInfo<'_>,
    ) -> Result<Self, Error> {
        if !info
            .shaders
            .iter()
            .any(|shader| shader.stage() == ShaderStages::VERTEX)
        {
            return Err(Error::invalid("Graphics pipeline requires a vertex shader"));
        }
        if info
            .shaders
            .iter()
            .any(|shader| shader.stage() == ShaderStages::COMPUTE)
        {
            return Err(Error::invalid(
                "Compute shader cannot be used in graphics pipeline",
            ));
        }
        if info.blend_state.attachments.len() != info.outputs.color_attachments.len() {
            return Err(Error::invalid(format!(
                "Blend state describes {} attachments while outputs have {}",
                info.blend_state.attachments.len(),
                info.outputs.color_attachments.len()
            )));
        }
        if !info.rasterizer_state.depth_clip_enabled && !driver.info().features.depth_clamp {
            return Err(Error::unsupported("disabling depth clip"));
        }
        if info.rasterizer_state.fill_mode == PolygonFillMode::Wireframe
            && !driver.info().features.fill_mode_non_solid
        {
            return Err(Error::unsupported("wireframe fill mode"));
        }

        let (layout, dynamic_offset_count) = pipeline_layout(driver, &info.resource_layouts)?;

        let render_pass = match driver.create_render_pass(&compatible_render_pass(&info.outputs)) {
            Ok(render_pass) => render_pass,
            Err(err) => {
                driver.destroy_pipeline_layout(layout);
                return Err(err.into());
            }
        };

        let specialization = specialization_info(&info.specializations);
        let (vertex_bindings, vertex_attributes) = vertex_input(&info.vertex_layouts);

        let result = driver.create_graphics_pipeline(&GraphicsPipelineCreateInfo {
            layout,
            render_pass,
            stages: info
                .shaders
                .iter()
                .map(|shader| ShaderStageCreateInfo {
                    module: shader.module(),
                    stage: shader.stage(),
                    entry: shader.entry_point().to_owned(),
                    specialization: specialization.clone(),
                })
                .collect(),
            vertex_bindings,
            vertex_attributes,
            topology: info.primitive_topology,
            rasterizer: info.rasterizer_state,
            depth_stencil: info.depth_stencil_state,
            blend: info.blend_state.clone(),
            samples: info.outputs.sample_count.count(),
        });

        let handle = match result {
            Ok(handle) => handle,
            Err(err) => {
                driver.destroy_render_pass(render_pass);
                driver.destroy_pipeline_layout(layout);
                return Err(err.into());
            }
        };

        tracing::debug!("Graphics pipeline {:?} created", handle);

        Ok(Pipeline::from_parts(
            driver,
            handle,
            layout,
            render_pass,
            false,
            info.resource_layouts.len() as u32,
            dynamic_offset_count,
            info.rasterizer_state.scissor_test_enabled,
        ))
    }

    #[tracing::instrument(skip(driver, info))]
    pub(crate) fn new_compute(
        driver: &Arc<dyn Driver>,
        info: &ComputePipelineInfo<'_>,
    ) -> Result<Self, Error> {
        if info.shader.stage() != ShaderStages::COMPUTE {
            return Err(Error::invalid(format!(
                "Compute pipeline requires compute shader, got {:?}",
                info.shader.stage()
            )));
        }

        let (layout, dynamic_offset_count) = pipeline_layout(driver, &info.resource_layouts)?;

        let result = driver.create_compute_pipeline(&ComputePipelineCreateInfo {
            layout,
            stage: ShaderStageCreateInfo {
                module: info.shader.module(),
                stage: ShaderStages::COMPUTE,
                entry: info.shader.entry_point().to_owned(),
                specialization: specialization_info(&info.specializations),
            },
        });

        let handle = match result {
            Ok(handle) => handle,
            Err(err) => {
                driver.destroy_pipeline_layout(layout);
                return Err(err.into());
            }
        };

        tracing::debug!("Compute pipeline {:?} created", handle);

        Ok(Pipeline::from_parts(
            driver,
            handle,
            layout,
            native::RenderPass::NULL,
            true,
            info.resource_layouts.len() as u32,
            dynamic_offset_count,
            false,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn from_parts(
        driver: &Arc<dyn Driver>,
        handle: native::Pipeline,
        layout: native::PipelineLayout,
        render_pass: native::RenderPass,
        is_compute: bool,
        resource_set_count: u32,
        dynamic_offset_count: u32,
        scissor_test_enabled: bool,
    ) -> Self {
        let destroyed = Arc::new(AtomicBool::new(false));
        let ref_count = {
            let driver = driver.clone();
            let destroyed = destroyed.clone();
            ResourceRefCount::new(move || {
                if destroyed.swap(true, Ordering::AcqRel) {
                    return;
                }
                tracing::debug!("Pipeline {:?} destroyed", handle);
                driver.destroy_pipeline(handle);
                driver.destroy_pipeline_layout(layout);
                if !render_pass.is_null() {
                    driver.destroy_render_pass(render_pass);
                }
            })
        };

        Pipeline {
            shared: Arc::new(PipelineShared {
                handle,
                layout,
                is_compute,
                resource_set_count,
                dynamic_offset_count,
                scissor_test_enabled,
                ref_count,
                destroyed,
            }),
        }
    }

    #[inline]
    pub(crate) fn shared(&self) -> &Arc<PipelineShared> {
        &self.shared
    }

    #[inline]
    pub fn handle(&self) -> native::Pipeline {
        self.shared.handle
    }

    #[inline]
    pub fn is_compute(&self) -> bool {
        self.shared.is_compute
    }

    #[inline]
    pub fn resource_set_count(&self) -> u32 {
        self.shared.resource_set_count
    }

    #[inline]
    pub fn dynamic_offset_count(&self) -> u32 {
        self.shared.dynamic_offset_count
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

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.shared.ref_count.decrement();
    }
}

impl Debug for Pipeline {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.shared.is_compute {
            "compute"
        } else {
            "graphics"
        };
        write!(fmt, "Pipeline({} {:#x})", kind, self.shared.handle.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_locations_continue_across_buffers() {
        let layouts = [
            VertexLayoutInfo::new(vec![
                VertexElementInfo::new("position", VertexElementFormat::Float3),
                VertexElementInfo::new("uv", VertexElementFormat::Float2),
            ]),
            VertexLayoutInfo {
                instance_step_rate: 1,
                ..VertexLayoutInfo::new(vec![VertexElementInfo::new(
                    "offset",
                    VertexElementFormat::Float4,
                )])
            },
        ];

        let (bindings, attributes) = vertex_input(&layouts);
        assert_eq!(bindings[0].stride, 20);
        assert!(!bindings[0].per_instance);
        assert!(bindings[1].per_instance);

        let placed: Vec<_> = attributes
            .iter()
            .map(|a| (a.location, a.binding, a.offset))
            .collect();
        assert_eq!(placed, vec![(0, 0, 0), (1, 0, 12), (2, 1, 0)]);
    }

    #[test]
    fn specialization_data_is_packed() {
        let info = specialization_info(&[
            SpecializationConstant::bool(0, true),
            SpecializationConstant {
                id: 1,
                ty: SpecializationConstantType::UInt16,
                data: 7,
            },
            SpecializationConstant::f64(2, 1.5),
        ]);

        let offsets: Vec<_> = info.entries.iter().map(|e| (e.offset, e.size)).collect();
        assert_eq!(offsets, vec![(0, 4), (4, 2), (6, 8)]);
        assert_eq!(info.data.len(), 14);
        assert_eq!(&info.data[4..6], &7u16.to_ne_bytes());
    }
}
