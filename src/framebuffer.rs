use std::{
    fmt::{self, Debug},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use smallvec::SmallVec;

use crate::{
    dimensions::Extent2,
    format::{AspectFlags, PixelFormat},
    native::{
        self, AttachmentDescription, AttachmentLoadOp, AttachmentStoreOp, Driver,
        FramebufferCreateInfo, ImageLayout, ImageSubresourceRange, ImageViewCreateInfo,
        ImageViewKind, RenderPassCreateInfo,
    },
    pipeline::OutputInfo,
    refcount::ResourceRefCount,
    swapchain::SwapchainFramebuffer,
    texture::{Texture, TextureSampleCount, TextureShared, TextureUsage},
    Error,
};

/// Single-sample-count attachment with `Store` and no stencil operations.
pub(crate) fn attachment_description(
    format: PixelFormat,
    samples: u32,
    load_op: AttachmentLoadOp,
    initial_layout: ImageLayout,
    final_layout: ImageLayout,
) -> AttachmentDescription {
    AttachmentDescription {
        format,
        samples,
        load_op,
        store_op: AttachmentStoreOp::Store,
        stencil_load_op: AttachmentLoadOp::DontCare,
        stencil_store_op: AttachmentStoreOp::DontCare,
        initial_layout,
        final_layout,
    }
}

/// Texture subresource used as an attachment.
#[derive(Clone, Copy, Debug)]
pub struct FramebufferAttachmentInfo<'a> {
    pub target: &'a Texture,
    pub mip_level: u32,
    pub array_layer: u32,
}

impl<'a> FramebufferAttachmentInfo<'a> {
    pub fn new(target: &'a Texture) -> Self {
        FramebufferAttachmentInfo {
            target,
            mip_level: 0,
            array_layer: 0,
        }
    }
}

impl<'a> From<&'a Texture> for FramebufferAttachmentInfo<'a> {
    fn from(target: &'a Texture) -> Self {
        FramebufferAttachmentInfo::new(target)
    }
}

#[derive(Clone, Debug, Default)]
pub struct FramebufferInfo<'a> {
    pub depth_target: Option<FramebufferAttachmentInfo<'a>>,
    pub color_targets: Vec<FramebufferAttachmentInfo<'a>>,
}

impl<'a> FramebufferInfo<'a> {
    pub fn new(
        depth_target: Option<&'a Texture>,
        color_targets: &[&'a Texture],
    ) -> Self {
        FramebufferInfo {
            depth_target: depth_target.map(FramebufferAttachmentInfo::new),
            color_targets: color_targets
                .iter()
                .map(|&target| FramebufferAttachmentInfo::new(target))
                .collect(),
        }
    }
}

#[derive(Clone)]
pub(crate) struct AttachmentTarget {
    pub texture: Arc<TextureShared>,
    pub mip_level: u32,
    pub array_layer: u32,
}

impl AttachmentTarget {
    fn from_info(info: &FramebufferAttachmentInfo<'_>) -> Self {
        AttachmentTarget {
            texture: info.target.shared().clone(),
            mip_level: info.mip_level,
            array_layer: info.array_layer,
        }
    }

    fn is_sampled(&self) -> bool {
        self.texture.info().usage.contains(TextureUsage::SAMPLED)
    }

    fn transition(&self, cb: native::CommandBuffer, layout: ImageLayout) {
        self.texture
            .transition_image_layout(cb, self.mip_level, 1, self.array_layer, 1, layout);
    }
}

impl Debug for AttachmentTarget {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            fmt,
            "{:?}@mip{}/layer{}",
            self.texture.image(),
            self.mip_level,
            self.array_layer
        )
    }
}

/// Render passes a framebuffer is begun with.
pub(crate) struct RenderPassSet {
    driver: Arc<dyn Driver>,

    /// Loads attachments from the layout they were left in before first use.
    pub no_clear_init: native::RenderPass,

    /// Loads attachments left by a previous pass of the same recording.
    pub no_clear_load: native::RenderPass,

    /// Clears every attachment.
    pub clear: native::RenderPass,
}

impl RenderPassSet {
    fn new(
        driver: &Arc<dyn Driver>,
        colors: &[AttachmentTarget],
        depth: Option<&AttachmentTarget>,
        presented: bool,
    ) -> Result<Self, Error> {
        let mut info = RenderPassCreateInfo {
            colors: colors
                .iter()
                .map(|color| {
                    let initial = if presented {
                        ImageLayout::PresentSrc
                    } else if color.is_sampled() {
                        ImageLayout::ShaderReadOnlyOptimal
                    } else {
                        ImageLayout::ColorAttachmentOptimal
                    };
                    attachment_description(
                        color.texture.format(),
                        color.texture.info().samples.count(),
                        AttachmentLoadOp::Load,
                        initial,
                        ImageLayout::ColorAttachmentOptimal,
                    )
                })
                .collect(),
            depth: depth.map(|depth| {
                let initial = if depth.is_sampled() {
                    ImageLayout::ShaderReadOnlyOptimal
                } else {
                    ImageLayout::DepthStencilAttachmentOptimal
                };
                let mut description = attachment_description(
                    depth.texture.format(),
                    depth.texture.info().samples.count(),
                    AttachmentLoadOp::Load,
                    initial,
                    ImageLayout::DepthStencilAttachmentOptimal,
                );
                if depth.texture.format().is_stencil() {
                    description.stencil_store_op = AttachmentStoreOp::Store;
                }
                description
            }),
            external_dependency: true,
        };
        let stencil = depth.map_or(false, |depth| depth.texture.format().is_stencil());

        let no_clear_init = driver.create_render_pass(&info)?;

        for color in &mut info.colors {
            color.load_op = AttachmentLoadOp::Load;
            color.initial_layout = ImageLayout::ColorAttachmentOptimal;
        }
        if let Some(depth) = &mut info.depth {
            depth.load_op = AttachmentLoadOp::Load;
            depth.initial_layout = ImageLayout::DepthStencilAttachmentOptimal;
            if stencil {
                depth.stencil_load_op = AttachmentLoadOp::Load;
            }
        }

        let no_clear_load = match driver.create_render_pass(&info) {
            Ok(pass) => pass,
            Err(err) => {
                driver.destroy_render_pass(no_clear_init);
                return Err(err.into());
            }
        };

        for color in &mut info.colors {
            color.load_op = AttachmentLoadOp::Clear;
            color.initial_layout = ImageLayout::Undefined;
        }
        if let Some(depth) = &mut info.depth {
            depth.load_op = AttachmentLoadOp::Clear;
            depth.initial_layout = ImageLayout::Undefined;
            if stencil {
                depth.stencil_load_op = AttachmentLoadOp::Clear;
            }
        }

        let clear = match driver.create_render_pass(&info) {
            Ok(pass) => pass,
            Err(err) => {
                driver.destroy_render_pass(no_clear_init);
                driver.destroy_render_pass(no_clear_load);
                return Err(err.into());
            }
        };

        Ok(RenderPassSet {
            driver: driver.clone(),
            no_clear_init,
            no_clear_load,
            clear,
        })
    }
}

impl Drop for RenderPassSet {
    fn drop(&mut self) {
        self.driver.destroy_render_pass(self.no_clear_init);
        self.driver.destroy_render_pass(self.no_clear_load);
        self.driver.destroy_render_pass(self.clear);
    }
}

pub(crate) struct FramebufferShared {
    handle: native::Framebuffer,
    render_passes: Arc<RenderPassSet>,
    color_targets: SmallVec<[AttachmentTarget; 4]>,
    depth_target: Option<AttachmentTarget>,
    extent: Extent2,
    presented: bool,
    output: OutputInfo,
    ref_count: Arc<ResourceRefCount>,
    destroyed: Arc<AtomicBool>,
}

impl FramebufferShared {
    #[inline]
    pub fn handle(&self) -> native::Framebuffer {
        self.handle
    }

    #[inline]
    pub fn render_passes(&self) -> &RenderPassSet {
        &self.render_passes
    }

    #[inline]
    pub fn color_targets(&self) -> &[AttachmentTarget] {
        &self.color_targets
    }

    #[inline]
    pub fn depth_target(&self) -> Option<&AttachmentTarget> {
        self.depth_target.as_ref()
    }

    #[inline]
    pub fn attachment_count(&self) -> usize {
        self.color_targets.len() + self.depth_target.is_some() as usize
    }

    /// Size of the area rendering may touch.
    #[inline]
    pub fn renderable_extent(&self) -> Extent2 {
        self.extent
    }

    #[inline]
    pub fn output(&self) -> &OutputInfo {
        &self.output
    }

    #[inline]
    pub fn ref_count(&self) -> &Arc<ResourceRefCount> {
        &self.ref_count
    }

    /// Records layouts the render pass left attachments in.
    pub fn transition_to_intermediate_layout(&self, _cb: native::CommandBuffer) {
        for color in &self.color_targets {
            color.texture.set_layout(
                color.mip_level,
                color.array_layer,
                ImageLayout::ColorAttachmentOptimal,
            );
        }
        if let Some(depth) = &self.depth_target {
            depth.texture.set_layout(
                depth.mip_level,
                depth.array_layer,
                ImageLayout::DepthStencilAttachmentOptimal,
            );
        }
    }

    /// Moves attachments into the initial layouts of a loading pass.
    /// `first_use` selects the layouts of the "no-clear, initial" pass.
    pub fn transition_to_initial_layout(&self, cb: native::CommandBuffer, first_use: bool) {
        for color in &self.color_targets {
            let layout = if !first_use {
                ImageLayout::ColorAttachmentOptimal
            } else if self.presented {
                ImageLayout::PresentSrc
            } else if color.is_sampled() {
                ImageLayout::ShaderReadOnlyOptimal
            } else {
                ImageLayout::ColorAttachmentOptimal
            };
            color.transition(cb, layout);
        }
        if let Some(depth) = &self.depth_target {
            let layout = if first_use && depth.is_sampled() {
                ImageLayout::ShaderReadOnlyOptimal
            } else {
                ImageLayout::DepthStencilAttachmentOptimal
            };
            depth.transition(cb, layout);
        }
    }

    /// Moves attachments into layouts expected outside of rendering.
    pub fn transition_to_final_layout(&self, cb: native::CommandBuffer) {
        for color in &self.color_targets {
            if self.presented {
                color.transition(cb, ImageLayout::PresentSrc);
            } else if color.is_sampled() {
                color.transition(cb, ImageLayout::ShaderReadOnlyOptimal);
            }
        }
        if let Some(depth) = &self.depth_target {
            if depth.is_sampled() {
                depth.transition(cb, ImageLayout::ShaderReadOnlyOptimal);
            }
        }
    }
}

fn check_target(
    target: &AttachmentTarget,
    required: TextureUsage,
    samples: TextureSampleCount,
) -> Result<(), Error> {
    let info = target.texture.info();
    if !info.usage.contains(required) {
        return Err(Error::invalid(format!(
            "Framebuffer attachment {:?} lacks usage {:?}",
            target, required
        )));
    }
    if target.mip_level >= info.mip_levels || target.array_layer >= info.actual_array_layers() {
        return Err(Error::invalid(format!(
            "Framebuffer attachment {:?} is out of texture bounds",
            target
        )));
    }
    if info.samples != samples {
        return Err(Error::invalid(format!(
            "Framebuffer attachment {:?} has {:?}, expected {:?}",
            target, info.samples, samples
        )));
    }
    Ok(())
}

fn attachment_view(
    driver: &dyn Driver,
    target: &AttachmentTarget,
    depth: bool,
) -> Result<native::ImageView, Error> {
    let format = target.texture.format();
    let (kind, aspect) = if depth {
        let kind = if target.texture.info().array_layers == 1 {
            ImageViewKind::D2
        } else {
            ImageViewKind::D2Array
        };
        let aspect = if format.is_stencil() {
            AspectFlags::DEPTH | AspectFlags::STENCIL
        } else {
            AspectFlags::DEPTH
        };
        (kind, aspect)
    } else {
        (ImageViewKind::D2, AspectFlags::COLOR)
    };

    let view = driver.create_image_view(&ImageViewCreateInfo {
        image: target.texture.image(),
        kind,
        format,
        range: ImageSubresourceRange {
            aspect,
            base_mip_level: target.mip_level,
            level_count: 1,
            base_array_layer: target.array_layer,
            layer_count: 1,
        },
    })?;
    Ok(view)
}

/// Set of attachments rendered into together.
///
/// Keeps its attachment textures alive.
pub struct Framebuffer {
    shared: Arc<FramebufferShared>,
}

impl Framebuffer {
    pub(crate) fn new(driver: &Arc<dyn Driver>, info: &FramebufferInfo<'_>) -> Result<Self, Error> {
        let colors: SmallVec<[AttachmentTarget; 4]> = info
            .color_targets
            .iter()
            .map(AttachmentTarget::from_info)
            .collect();
        let depth = info.depth_target.as_ref().map(AttachmentTarget::from_info);

        Framebuffer::from_targets(driver, colors, depth, false)
    }

    /// Creates framebuffer over given targets.
    /// Presented framebuffers leave color targets ready for presentation.
    #[tracing::instrument(skip(driver))]
    pub(crate) fn from_targets(
        driver: &Arc<dyn Driver>,
        colors: SmallVec<[AttachmentTarget; 4]>,
        depth: Option<AttachmentTarget>,
        presented: bool,
    ) -> Result<Self, Error> {
        let first = colors
            .first()
            .or(depth.as_ref())
            .ok_or_else(|| Error::invalid("Framebuffer must have at least one attachment"))?;
        let samples = first.texture.info().samples;
        let extent = first.texture.mip_extent(first.mip_level).into_2d();

        for color in &colors {
            check_target(color, TextureUsage::RENDER_TARGET, samples)?;
        }
        if let Some(depth) = &depth {
            check_target(depth, TextureUsage::DEPTH_STENCIL, samples)?;
        }

        let render_passes = Arc::new(RenderPassSet::new(
            driver,
            &colors,
            depth.as_ref(),
            presented,
        )?);

        let mut views: SmallVec<[native::ImageView; 5]> = SmallVec::new();
        let targets = colors
            .iter()
            .map(|color| (color, false))
            .chain(depth.iter().map(|depth| (depth, true)));

        for (target, is_depth) in targets {
            match attachment_view(&**driver, target, is_depth) {
                Ok(view) => views.push(view),
                Err(err) => {
                    for view in views {
                        driver.destroy_image_view(view);
                    }
                    return Err(err);
                }
            }
        }

        let handle = match driver.create_framebuffer(&FramebufferCreateInfo {
            render_pass: render_passes.no_clear_init,
            attachments: views.clone(),
            extent,
            layers: 1,
        }) {
            Ok(handle) => handle,
            Err(err) => {
                for view in views {
                    driver.destroy_image_view(view);
                }
                return Err(err.into());
            }
        };

        tracing::debug!(
            "Framebuffer {:?} created with {} color targets",
            handle,
            colors.len()
        );

        let output = OutputInfo {
            sample_count: samples,
            ..OutputInfo::new(
                &colors
                    .iter()
                    .map(|color| color.texture.format())
                    .collect::<SmallVec<[_; 4]>>(),
                depth.as_ref().map(|depth| depth.texture.format()),
            )
        };

        let target_ref_counts: SmallVec<[Arc<ResourceRefCount>; 5]> = colors
            .iter()
            .chain(depth.iter())
            .map(|target| target.texture.ref_count().clone())
            .collect();
        for ref_count in &target_ref_counts {
            ref_count.increment();
        }

        let destroyed = Arc::new(AtomicBool::new(false));
        let ref_count = {
            let driver = driver.clone();
            let destroyed = destroyed.clone();
            let render_passes = render_passes.clone();
            ResourceRefCount::new(move || {
                if destroyed.swap(true, Ordering::AcqRel) {
                    return;
                }
                tracing::debug!("Framebuffer {:?} destroyed", handle);
                driver.destroy_framebuffer(handle);
                drop(render_passes);
                for view in views {
                    driver.destroy_image_view(view);
                }
                for ref_count in target_ref_counts {
                    ref_count.decrement();
                }
            })
        };

        Ok(Framebuffer {
            shared: Arc::new(FramebufferShared {
                handle,
                render_passes,
                color_targets: colors,
                depth_target: depth,
                extent,
                presented,
                output,
                ref_count,
                destroyed,
            }),
        })
    }

    #[inline]
    pub(crate) fn shared(&self) -> &Arc<FramebufferShared> {
        &self.shared
    }

    #[inline]
    pub fn handle(&self) -> native::Framebuffer {
        self.shared.handle
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.shared.extent.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.shared.extent.height
    }

    /// Attachment formats, for creating compatible pipelines.
    #[inline]
    pub fn output_info(&self) -> &OutputInfo {
        &self.shared.output
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

impl Drop for Framebuffer {
    fn drop(&mut self) {
        self.shared.ref_count.decrement();
    }
}

impl Debug for Framebuffer {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        if fmt.alternate() {
            fmt.debug_struct("Framebuffer")
                .field("handle", &self.shared.handle)
                .field("color_targets", &self.shared.color_targets)
                .field("depth_target", &self.shared.depth_target)
                .field("extent", &self.shared.extent)
                .field("presented", &self.shared.presented)
                .finish()
        } else {
            write!(fmt, "Framebuffer({:#x})", self.shared.handle.0)
        }
    }
}

/// Framebuffer a command list renders into.
#[derive(Clone, Copy, Debug)]
pub enum FramebufferRef<'a> {
    Framebuffer(&'a Framebuffer),

    /// Framebuffer of the image currently acquired from a swapchain.
    Swapchain(&'a SwapchainFramebuffer),
}

impl FramebufferRef<'_> {
    /// Current framebuffer and, for swapchains, the swapchain ref count.
    pub(crate) fn resolve(&self) -> Result<(Arc<FramebufferShared>, Option<Arc<ResourceRefCount>>), Error> {
        match self {
            FramebufferRef::Framebuffer(framebuffer) => Ok((framebuffer.shared().clone(), None)),
            FramebufferRef::Swapchain(framebuffer) => {
                let current = framebuffer
                    .current()
                    .ok_or_else(|| Error::invalid("Swapchain has no images"))?;
                Ok((current, Some(framebuffer.swapchain_ref_count().clone())))
            }
        }
    }
}

impl<'a> From<&'a Framebuffer> for FramebufferRef<'a> {
    fn from(framebuffer: &'a Framebuffer) -> Self {
        FramebufferRef::Framebuffer(framebuffer)
    }
}

impl<'a> From<&'a SwapchainFramebuffer> for FramebufferRef<'a> {
    fn from(framebuffer: &'a SwapchainFramebuffer) -> Self {
        FramebufferRef::Swapchain(framebuffer)
    }
}
