//! Command list recording.
//!
//! A [`CommandList`] records into one native command buffer at a time.
//! Submitted command buffers stay alive until the device observes their fence,
//! together with staging buffers and ref counts of every resource they captured.

mod copy;

pub(crate) use self::copy::{check_location, record_texture_copy};
pub use self::copy::{TextureCopyRegion, TextureLocation};

use std::{
    collections::VecDeque,
    fmt::{self, Debug},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use arrayvec::ArrayVec;
use hashbrown::{HashMap, HashSet};
use parking_lot::Mutex;
use smallvec::{smallvec, SmallVec};

use crate::{
    buffer::{Buffer, BufferInfo, BufferUsage},
    device::FilterCache,
    dimensions::{Extent2, Rect, RgbaFloat, Viewport},
    format::AspectFlags,
    framebuffer::{FramebufferRef, FramebufferShared},
    native::{
        self, ClearAttachment, ClearRect, ClearValue, Driver, ImageLayout, ObjectType,
        PipelineBindPoint, PipelineStageFlags, RenderPassBeginInfo,
    },
    pipeline::{Pipeline, PipelineShared},
    refcount::{CapturedRef, ResourceRefCount},
    resource::{ResourceSet, ResourceSetShared, MAX_RESOURCE_SETS},
    texture::{TextureShared, TextureUsage},
    Error, IndexFormat,
};

/// Resources kept alive by one recording until its submission completes.
#[derive(Default)]
pub(crate) struct StagingResourceInfo {
    buffers_used: Vec<Buffer>,
    resources: HashSet<CapturedRef>,
}

impl StagingResourceInfo {
    fn capture(&mut self, ref_count: &Arc<ResourceRefCount>) {
        self.resources.insert(CapturedRef(ref_count.clone()));
    }
}

#[derive(Default)]
struct Recycler {
    available_command_buffers: VecDeque<native::CommandBuffer>,
    submitted_command_buffers: Vec<native::CommandBuffer>,
    submitted_staging_infos: HashMap<native::CommandBuffer, StagingResourceInfo>,
    available_staging_infos: Vec<StagingResourceInfo>,
    available_staging_buffers: Vec<Buffer>,
}

/// Part of the command list that outlives the handle while submissions are pending.
pub(crate) struct CommandListShared {
    driver: Arc<dyn Driver>,
    pool: native::CommandPool,
    recycler: Mutex<Recycler>,
    destroyed: AtomicBool,
}

impl CommandListShared {
    fn next_command_buffer(&self) -> Result<native::CommandBuffer, Error> {
        let cached = self.recycler.lock().available_command_buffers.pop_front();
        match cached {
            Some(cb) => {
                self.driver.reset_command_buffer(cb)?;
                Ok(cb)
            }
            None => {
                let cb = self.driver.allocate_command_buffer(self.pool)?;
                tracing::trace!("Command buffer {:?} allocated from {:?}", cb, self.pool);
                Ok(cb)
            }
        }
    }

    fn staging_info(&self) -> StagingResourceInfo {
        self.recycler
            .lock()
            .available_staging_infos
            .pop()
            .unwrap_or_default()
    }

    /// Returns staging buffers and the info to the pools.
    /// Captured ref counts are released only when the info was submitted.
    fn recycle_staging_info(&self, mut info: StagingResourceInfo, submitted: bool) {
        if submitted {
            for captured in info.resources.drain() {
                captured.0.decrement();
            }
        } else {
            info.resources.clear();
        }

        let mut recycler = self.recycler.lock();
        recycler
            .available_staging_buffers
            .extend(info.buffers_used.drain(..));
        recycler.available_staging_infos.push(info);
    }

    fn return_staging_buffer(&self, buffer: Buffer) {
        self.recycler.lock().available_staging_buffers.push(buffer);
    }

    /// Ended command buffer that was never submitted goes back to the pool.
    fn reclaim_unsubmitted(&self, cb: native::CommandBuffer) {
        let mut recycler = self.recycler.lock();
        if let Some(index) = recycler
            .submitted_command_buffers
            .iter()
            .position(|&submitted| submitted == cb)
        {
            recycler.submitted_command_buffers.swap_remove(index);
            recycler.available_command_buffers.push_back(cb);
        }
    }

    /// Called by the device once the fence of a submission with `cb` is signaled.
    pub(crate) fn command_buffer_completed(&self, cb: native::CommandBuffer) {
        let info = {
            let mut recycler = self.recycler.lock();
            if let Some(index) = recycler
                .submitted_command_buffers
                .iter()
                .position(|&submitted| submitted == cb)
            {
                recycler.submitted_command_buffers.swap_remove(index);
                recycler.available_command_buffers.push_back(cb);
            }
            recycler.submitted_staging_infos.remove(&cb)
        };

        // Releasing captures may destroy resources, keep the lock out of it.
        if let Some(info) = info {
            self.recycle_staging_info(info, true);
        }
    }

    fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }

        let buffers = {
            let mut recycler = self.recycler.lock();
            debug_assert!(
                recycler.submitted_staging_infos.is_empty(),
                "Command list destroyed with pending submissions"
            );
            recycler.available_command_buffers.clear();
            recycler.submitted_command_buffers.clear();
            recycler.available_staging_infos.clear();
            std::mem::take(&mut recycler.available_staging_buffers)
        };
        drop(buffers);

        tracing::debug!("Command pool {:?} destroyed", self.pool);
        self.driver.destroy_command_pool(self.pool);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RecordingState {
    Initial,
    Recording,
    Ended,
}

#[derive(Clone)]
struct BoundResourceSet {
    set: Arc<ResourceSetShared>,
    offsets: SmallVec<[u32; 4]>,
}

impl BoundResourceSet {
    fn matches(&self, set: &Arc<ResourceSetShared>, offsets: &[u32]) -> bool {
        Arc::ptr_eq(&self.set, set) && self.offsets.as_slice() == offsets
    }
}

#[derive(Default)]
struct BindPointState {
    pipeline: Option<Arc<PipelineShared>>,
    sets: [Option<BoundResourceSet>; MAX_RESOURCE_SETS],
    changed: [bool; MAX_RESOURCE_SETS],
}

impl BindPointState {
    fn reset_sets(&mut self) {
        self.sets = Default::default();
        self.changed = [false; MAX_RESOURCE_SETS];
    }

    fn reset(&mut self) {
        self.pipeline = None;
        self.reset_sets();
    }

    fn check_sets_bound(&self, what: &str) -> Result<Arc<PipelineShared>, Error> {
        let pipeline = self
            .pipeline
            .clone()
            .ok_or_else(|| Error::invalid(format!("A {} Pipeline must be set", what)))?;

        for slot in 0..pipeline.resource_set_count() as usize {
            if self.sets[slot].is_none() {
                return Err(Error::invalid(format!(
                    "A {} ResourceSet must be bound to slot {}",
                    what, slot
                )));
            }
        }
        Ok(pipeline)
    }
}

/// Records commands for submission with [`Device::submit_commands`].
///
/// `begin` starts a recording, `end` finishes it.
/// A list may be recorded again while previous recordings are still executing.
///
/// [`Device::submit_commands`]: crate::Device::submit_commands
pub struct CommandList {
    shared: Arc<CommandListShared>,
    ref_count: Arc<ResourceRefCount>,
    filters: Arc<FilterCache>,
    cb: native::CommandBuffer,
    state: RecordingState,
    staging: Option<StagingResourceInfo>,
    name: Option<String>,

    framebuffer: Option<Arc<FramebufferShared>>,
    framebuffer_ever_active: bool,
    new_framebuffer: bool,
    active_render_pass: native::RenderPass,
    color_clear_values: SmallVec<[Option<[f32; 4]>; 4]>,
    depth_clear_value: Option<(f32, u32)>,
    scissor_rects: SmallVec<[Option<Rect>; 4]>,
    pre_draw_sampled_images: SmallVec<[Arc<TextureShared>; 4]>,

    graphics: BindPointState,
    compute: BindPointState,
}

impl CommandList {
    pub(crate) fn new(driver: &Arc<dyn Driver>, filters: Arc<FilterCache>) -> Result<Self, Error> {
        let pool = driver.create_command_pool(false)?;
        let cb = match driver.allocate_command_buffer(pool) {
            Ok(cb) => cb,
            Err(err) => {
                driver.destroy_command_pool(pool);
                return Err(err.into());
            }
        };

        tracing::debug!("Command list created with pool {:?}", pool);

        let shared = Arc::new(CommandListShared {
            driver: driver.clone(),
            pool,
            recycler: Mutex::new(Recycler::default()),
            destroyed: AtomicBool::new(false),
        });

        let ref_count = {
            let shared = shared.clone();
            ResourceRefCount::new(move || shared.destroy())
        };

        Ok(CommandList {
            shared,
            ref_count,
            filters,
            cb,
            state: RecordingState::Initial,
            staging: None,
            name: None,
            framebuffer: None,
            framebuffer_ever_active: false,
            new_framebuffer: false,
            active_render_pass: native::RenderPass::NULL,
            color_clear_values: SmallVec::new(),
            depth_clear_value: None,
            scissor_rects: SmallVec::new(),
            pre_draw_sampled_images: SmallVec::new(),
            graphics: BindPointState::default(),
            compute: BindPointState::default(),
        })
    }

    /// Native command buffer currently recorded into.
    #[inline]
    pub fn command_buffer(&self) -> native::CommandBuffer {
        self.cb
    }

    #[inline]
    pub fn command_pool(&self) -> native::CommandPool {
        self.shared.pool
    }

    #[inline]
    pub fn ref_count(&self) -> &Arc<ResourceRefCount> {
        &self.ref_count
    }

    /// Returns `true` once the native command pool is destroyed.
    #[inline]
    pub fn is_destroyed(&self) -> bool {
        self.shared.destroyed.load(Ordering::Acquire)
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Names the native objects when debug markers are available.
    pub fn set_name(&mut self, name: &str) {
        let driver = &self.shared.driver;
        if driver.info().debug_markers {
            driver.set_object_name(
                ObjectType::CommandBuffer,
                self.cb.0,
                &format!("{}_CommandBuffer", name),
            );
            driver.set_object_name(
                ObjectType::CommandPool,
                self.shared.pool.0,
                &format!("{}_CommandPool", name),
            );
        }
        self.name = Some(name.to_owned());
    }

    /// Starts a new recording.
    ///
    /// Valid in the initial state or after `end`.
    /// If the ended recording was never submitted its command buffer is reused.
    pub fn begin(&mut self) -> Result<(), Error> {
        match self.state {
            RecordingState::Recording => {
                return Err(Error::invalid(
                    "CommandList must be in its initial state, or `end` must have been called, for `begin` to be valid to call",
                ))
            }
            RecordingState::Ended => {
                if let Some(unsubmitted) = self.staging.take() {
                    self.shared.reclaim_unsubmitted(self.cb);
                    self.shared.recycle_staging_info(unsubmitted, false);
                }
                let cb = self.shared.next_command_buffer()?;
                self.cb = cb;
                self.state = RecordingState::Initial;
            }
            RecordingState::Initial => {}
        }

        self.shared.driver.begin_command_buffer(self.cb, true)?;
        self.staging = Some(self.shared.staging_info());
        self.state = RecordingState::Recording;

        self.framebuffer = None;
        self.framebuffer_ever_active = false;
        self.new_framebuffer = false;
        self.active_render_pass = native::RenderPass::NULL;
        self.color_clear_values.clear();
        self.depth_clear_value = None;
        self.scissor_rects.clear();
        self.pre_draw_sampled_images.clear();
        self.graphics.reset();
        self.compute.reset();
        Ok(())
    }

    /// Finishes the recording.
    /// Queued clears of a framebuffer that never began rendering are flushed.
    pub fn end(&mut self) -> Result<(), Error> {
        if self.state != RecordingState::Recording {
            return Err(Error::invalid(
                "CommandBuffer must have been started before `end` may be called",
            ));
        }
        if !self.framebuffer_ever_active && self.framebuffer.is_some() {
            self.begin_current_render_pass();
        }
        self.ensure_no_render_pass();
        if let Some(framebuffer) = &self.framebuffer {
            framebuffer.transition_to_final_layout(self.cb);
        }

        self.shared.driver.end_command_buffer(self.cb)?;
        self.state = RecordingState::Ended;
        self.shared
            .recycler
            .lock()
            .submitted_command_buffers
            .push(self.cb);
        Ok(())
    }

    /// Command buffer of an ended recording not submitted yet.
    pub(crate) fn submission_buffer(&self) -> Result<native::CommandBuffer, Error> {
        match (self.state, &self.staging) {
            (RecordingState::Ended, Some(_)) => Ok(self.cb),
            (RecordingState::Ended, None) => Err(Error::invalid(
                "CommandList was already submitted, `begin` must be called before submitting it again",
            )),
            _ => Err(Error::invalid(
                "CommandList must be ended before it is submitted",
            )),
        }
    }

    /// Hands the recording over to a submission.
    ///
    /// Captured resources and the list itself stay alive
    /// until [`CommandListShared::command_buffer_completed`] is called for `cb`
    /// and the returned ref count is decremented.
    pub(crate) fn command_buffer_submitted(
        &mut self,
        cb: native::CommandBuffer,
    ) -> (Arc<CommandListShared>, Arc<ResourceRefCount>) {
        self.ref_count.increment();
        if let Some(info) = self.staging.take() {
            for captured in &info.resources {
                captured.0.increment();
            }
            self.shared
                .recycler
                .lock()
                .submitted_staging_infos
                .insert(cb, info);
        }
        (self.shared.clone(), self.ref_count.clone())
    }

    fn check_recording(&self) -> Result<(), Error> {
        if self.state != RecordingState::Recording {
            return Err(Error::invalid(
                "CommandList must be recording, call `begin` first",
            ));
        }
        Ok(())
    }

    fn capture(&mut self, ref_count: &Arc<ResourceRefCount>) {
        if let Some(staging) = &mut self.staging {
            staging.capture(ref_count);
        }
    }

    fn take_staging_buffer(&mut self, size: u64) -> Result<Buffer, Error> {
        {
            let mut recycler = self.shared.recycler.lock();
            if let Some(index) = recycler
                .available_staging_buffers
                .iter()
                .position(|buffer| buffer.size() >= size)
            {
                return Ok(recycler.available_staging_buffers.swap_remove(index));
            }
        }

        let driver = &self.shared.driver;
        let buffer = Buffer::new(driver, BufferInfo::new(size, BufferUsage::STAGING))?;
        if driver.info().debug_markers {
            driver.set_object_name(
                ObjectType::Buffer,
                buffer.handle().0,
                &format!(
                    "Staging Buffer (CommandList {})",
                    self.name.as_deref().unwrap_or("")
                ),
            );
        }
        Ok(buffer)
    }

    // Render passes

    pub fn set_framebuffer<'a>(&mut self, framebuffer: impl Into<FramebufferRef<'a>>) -> Result<(), Error> {
        self.check_recording()?;
        let (framebuffer, swapchain_ref_count) = framebuffer.into().resolve()?;

        if !self.active_render_pass.is_null() {
            self.end_current_render_pass();
        } else if !self.framebuffer_ever_active && self.framebuffer.is_some() {
            // Flushes clears queued for the previous framebuffer.
            self.begin_current_render_pass();
            self.end_current_render_pass();
        }

        if let Some(current) = &self.framebuffer {
            current.transition_to_final_layout(self.cb);
        }

        self.capture(framebuffer.ref_count());
        if let Some(swapchain_ref_count) = &swapchain_ref_count {
            self.capture(swapchain_ref_count);
        }

        let color_count = framebuffer.color_targets().len();
        self.framebuffer = Some(framebuffer);
        self.framebuffer_ever_active = false;
        self.new_framebuffer = true;
        self.scissor_rects = smallvec![None; color_count.max(1)];
        self.color_clear_values = smallvec![None; color_count];
        self.depth_clear_value = None;
        Ok(())
    }

    fn ensure_render_pass_active(&mut self) {
        if self.active_render_pass.is_null() {
            self.begin_current_render_pass();
        }
    }

    fn ensure_no_render_pass(&mut self) {
        if !self.active_render_pass.is_null() {
            self.end_current_render_pass();
        }
    }

    fn begin_current_render_pass(&mut self) {
        let framebuffer = match &self.framebuffer {
            Some(framebuffer) => framebuffer.clone(),
            None => return,
        };
        debug_assert!(self.active_render_pass.is_null());

        let has_depth = framebuffer.depth_target().is_some();
        let have_all_clear_values = (self.depth_clear_value.is_some() || !has_depth)
            && self.color_clear_values.iter().all(Option::is_some);
        let have_any_clear_values = self.depth_clear_value.is_some()
            || self.color_clear_values.iter().any(Option::is_some);

        let area = Rect::from_extent(framebuffer.renderable_extent());
        let passes = framebuffer.render_passes();

        if framebuffer.attachment_count() == 0 || !have_all_clear_values {
            let render_pass = if self.new_framebuffer {
                passes.no_clear_init
            } else {
                passes.no_clear_load
            };
            framebuffer.transition_to_initial_layout(self.cb, self.new_framebuffer);

            self.shared.driver.cmd_begin_render_pass(
                self.cb,
                &RenderPassBeginInfo {
                    render_pass,
                    framebuffer: framebuffer.handle(),
                    area,
                    clear_values: &[],
                },
            );
            self.active_render_pass = render_pass;

            if have_any_clear_values {
                if let Some((depth, stencil)) = self.depth_clear_value.take() {
                    self.clear_depth_attachment(&framebuffer, depth, stencil);
                }
                for index in 0..self.color_clear_values.len() {
                    if let Some(color) = self.color_clear_values[index].take() {
                        self.clear_color_attachment(&framebuffer, index as u32, color);
                    }
                }
            }
        } else {
            let mut clear_values: SmallVec<[ClearValue; 5]> = self
                .color_clear_values
                .iter_mut()
                .map(|color| ClearValue::Color(color.take().unwrap_or([0.0; 4])))
                .collect();
            if let Some((depth, stencil)) = self.depth_clear_value.take() {
                clear_values.push(ClearValue::DepthStencil { depth, stencil });
            }

            self.shared.driver.cmd_begin_render_pass(
                self.cb,
                &RenderPassBeginInfo {
                    render_pass: passes.clear,
                    framebuffer: framebuffer.handle(),
                    area,
                    clear_values: &clear_values,
                },
            );
            self.active_render_pass = passes.clear;
        }

        self.new_framebuffer = false;
        self.framebuffer_ever_active = true;
    }

    fn end_current_render_pass(&mut self) {
        debug_assert!(!self.active_render_pass.is_null());

        let driver = &self.shared.driver;
        driver.cmd_end_render_pass(self.cb);
        if let Some(framebuffer) = &self.framebuffer {
            framebuffer.transition_to_intermediate_layout(self.cb);
        }
        self.active_render_pass = native::RenderPass::NULL;

        // Orders rendering before anything recorded after the pass.
        driver.cmd_pipeline_barrier(
            self.cb,
            PipelineStageFlags::BOTTOM_OF_PIPE,
            PipelineStageFlags::TOP_OF_PIPE,
            &[],
            &[],
        );
    }

    fn clear_rect(framebuffer: &FramebufferShared) -> ClearRect {
        ClearRect {
            rect: Rect::from_extent(framebuffer.renderable_extent()),
            base_array_layer: 0,
            layer_count: 1,
        }
    }

    fn clear_color_attachment(&self, framebuffer: &FramebufferShared, index: u32, color: [f32; 4]) {
        self.shared.driver.cmd_clear_attachments(
            self.cb,
            &[ClearAttachment {
                aspect: AspectFlags::COLOR,
                color_attachment: index,
                value: ClearValue::Color(color),
            }],
            &[CommandList::clear_rect(framebuffer)],
        );
    }

    fn clear_depth_attachment(&self, framebuffer: &FramebufferShared, depth: f32, stencil: u32) {
        let extent = framebuffer.renderable_extent();
        if extent.width == 0 || extent.height == 0 {
            return;
        }

        let mut aspect = AspectFlags::DEPTH;
        if let Some(target) = framebuffer.depth_target() {
            if target.texture.format().is_stencil() {
                aspect |= AspectFlags::STENCIL;
            }
        }

        self.shared.driver.cmd_clear_attachments(
            self.cb,
            &[ClearAttachment {
                aspect,
                color_attachment: 0,
                value: ClearValue::DepthStencil { depth, stencil },
            }],
            &[CommandList::clear_rect(framebuffer)],
        );
    }

    /// Clears color target `index` of the current framebuffer.
    /// Outside of a render pass the clear is folded into the next pass begin.
    pub fn clear_color_target(&mut self, index: u32, color: RgbaFloat) -> Result<(), Error> {
        self.check_recording()?;
        let framebuffer = self
            .framebuffer
            .clone()
            .ok_or_else(|| Error::invalid("A Framebuffer must be set to clear its targets"))?;
        if index as usize >= framebuffer.color_targets().len() {
            return Err(Error::invalid(format!(
                "Color target index {} is out of range, framebuffer has {} color targets",
                index,
                framebuffer.color_targets().len()
            )));
        }

        if self.active_render_pass.is_null() {
            self.color_clear_values[index as usize] = Some(color.to_array());
        } else {
            self.clear_color_attachment(&framebuffer, index, color.to_array());
        }
        Ok(())
    }

    pub fn clear_depth_stencil(&mut self, depth: f32, stencil: u8) -> Result<(), Error> {
        self.check_recording()?;
        let framebuffer = self
            .framebuffer
            .clone()
            .ok_or_else(|| Error::invalid("A Framebuffer must be set to clear its targets"))?;
        if framebuffer.depth_target().is_none() {
            return Err(Error::invalid(
                "Framebuffer has no depth target to clear",
            ));
        }

        if self.active_render_pass.is_null() {
            self.depth_clear_value = Some((depth, u32::from(stencil)));
        } else {
            self.clear_depth_attachment(&framebuffer, depth, u32::from(stencil));
        }
        Ok(())
    }

    // Pipeline state

    pub fn set_pipeline(&mut self, pipeline: &Pipeline) -> Result<(), Error> {
        self.check_recording()?;
        let shared = pipeline.shared();

        let (state, bind_point) = if shared.is_compute() {
            (&mut self.compute, PipelineBindPoint::Compute)
        } else {
            (&mut self.graphics, PipelineBindPoint::Graphics)
        };

        let bound = state
            .pipeline
            .as_ref()
            .map_or(false, |current| Arc::ptr_eq(current, shared));
        if !bound {
            state.reset_sets();
            self.shared
                .driver
                .cmd_bind_pipeline(self.cb, bind_point, shared.handle());
            state.pipeline = Some(shared.clone());
        }

        self.capture(shared.ref_count());
        Ok(())
    }

    pub fn set_vertex_buffer(&mut self, index: u32, buffer: &Buffer, offset: u64) -> Result<(), Error> {
        self.check_recording()?;
        if !buffer.usage().contains(BufferUsage::VERTEX) {
            return Err(Error::invalid("Buffer was not created with `BufferUsage::VERTEX`"));
        }

        self.shared
            .driver
            .cmd_bind_vertex_buffer(self.cb, index, buffer.handle(), offset);
        self.capture(buffer.ref_count());
        Ok(())
    }

    pub fn set_index_buffer(&mut self, buffer: &Buffer, format: IndexFormat, offset: u64) -> Result<(), Error> {
        self.check_recording()?;
        if !buffer.usage().contains(BufferUsage::INDEX) {
            return Err(Error::invalid("Buffer was not created with `BufferUsage::INDEX`"));
        }

        self.shared
            .driver
            .cmd_bind_index_buffer(self.cb, buffer.handle(), offset, format);
        self.capture(buffer.ref_count());
        Ok(())
    }

    /// Binds `set` to `slot` for draws.
    ///
    /// Sampled textures not yet readable by shaders are transitioned before the next draw.
    /// Storage textures are moved into general layout right away.
    pub fn set_graphics_resource_set(
        &mut self,
        slot: u32,
        set: &ResourceSet,
        dynamic_offsets: &[u32],
    ) -> Result<(), Error> {
        self.check_recording()?;
        let shared = set.shared();
        self.bind_resource_set(PipelineBindPoint::Graphics, slot, shared, dynamic_offsets)?;

        for texture in shared.sampled_textures() {
            if texture.layout(0, 0) != ImageLayout::ShaderReadOnlyOptimal
                && !self
                    .pre_draw_sampled_images
                    .iter()
                    .any(|pending| Arc::ptr_eq(pending, texture))
            {
                self.pre_draw_sampled_images.push(texture.clone());
            }
        }

        let storage_pending = shared
            .storage_textures()
            .iter()
            .any(|texture| texture.layout(0, 0) != ImageLayout::General);
        if storage_pending {
            self.ensure_no_render_pass();
            for texture in shared.storage_textures() {
                transition_whole(texture, self.cb, ImageLayout::General);
            }
        }
        Ok(())
    }

    /// Binds `set` to `slot` for dispatches.
    /// Layouts are fixed up when the next dispatch is recorded.
    pub fn set_compute_resource_set(
        &mut self,
        slot: u32,
        set: &ResourceSet,
        dynamic_offsets: &[u32],
    ) -> Result<(), Error> {
        self.check_recording()?;
        self.bind_resource_set(PipelineBindPoint::Compute, slot, set.shared(), dynamic_offsets)
    }

    fn bind_resource_set(
        &mut self,
        bind_point: PipelineBindPoint,
        slot: u32,
        set: &Arc<ResourceSetShared>,
        dynamic_offsets: &[u32],
    ) -> Result<(), Error> {
        let state = match bind_point {
            PipelineBindPoint::Graphics => &mut self.graphics,
            PipelineBindPoint::Compute => &mut self.compute,
        };

        let slot = slot as usize;
        if slot >= MAX_RESOURCE_SETS {
            return Err(Error::invalid(format!(
                "Resource set slot {} exceeds maximum of {}",
                slot, MAX_RESOURCE_SETS
            )));
        }
        if let Some(pipeline) = &state.pipeline {
            if slot >= pipeline.resource_set_count() as usize {
                return Err(Error::invalid(format!(
                    "Resource set slot {} is out of range, pipeline has {} resource layouts",
                    slot,
                    pipeline.resource_set_count()
                )));
            }
        }
        if dynamic_offsets.len() != set.dynamic_buffer_count() as usize {
            return Err(Error::invalid(format!(
                "A dynamic offset must be provided for each dynamic buffer, expected {} got {}",
                set.dynamic_buffer_count(),
                dynamic_offsets.len()
            )));
        }

        let unchanged = state.sets[slot]
            .as_ref()
            .map_or(false, |bound| bound.matches(set, dynamic_offsets));
        if !unchanged {
            state.sets[slot] = Some(BoundResourceSet {
                set: set.clone(),
                offsets: SmallVec::from_slice(dynamic_offsets),
            });
            state.changed[slot] = true;
        }
        Ok(())
    }

    /// Binds changed sets in runs of consecutive slots.
    fn flush_resource_sets(&mut self, bind_point: PipelineBindPoint) {
        let state = match bind_point {
            PipelineBindPoint::Graphics => &mut self.graphics,
            PipelineBindPoint::Compute => &mut self.compute,
        };
        let pipeline = match &state.pipeline {
            Some(pipeline) => pipeline.clone(),
            None => return,
        };

        let count = pipeline.resource_set_count() as usize;
        let mut sets: ArrayVec<native::DescriptorSet, MAX_RESOURCE_SETS> = ArrayVec::new();
        let mut offsets: SmallVec<[u32; 16]> = SmallVec::new();
        let mut first_set = 0;

        for slot in 0..count {
            let batch_ended = !state.changed[slot] || slot == count - 1;

            if state.changed[slot] {
                state.changed[slot] = false;
                if let Some(bound) = &state.sets[slot] {
                    sets.push(bound.set.descriptor_set());
                    offsets.extend_from_slice(&bound.offsets);

                    if let Some(staging) = &mut self.staging {
                        staging.capture(bound.set.ref_count());
                        for ref_count in bound.set.ref_counts() {
                            staging.capture(ref_count);
                        }
                    }
                }
            }

            if batch_ended {
                if !sets.is_empty() {
                    self.shared.driver.cmd_bind_descriptor_sets(
                        self.cb,
                        bind_point,
                        pipeline.layout(),
                        first_set as u32,
                        &sets,
                        &offsets,
                    );
                }
                sets.clear();
                offsets.clear();
                first_set = slot + 1;
            }
        }
    }

    pub fn set_viewport(&mut self, index: u32, viewport: &Viewport) -> Result<(), Error> {
        self.check_recording()?;
        let driver = &self.shared.driver;
        if index != 0 && !driver.info().features.multi_viewport {
            return Ok(());
        }

        let mut native = *viewport;
        if driver.info().standard_clip_space_y {
            native.y = viewport.y + viewport.height;
            native.height = -viewport.height;
        }
        driver.cmd_set_viewport(self.cb, index, &native);
        Ok(())
    }

    /// Sets viewport `index` to cover the whole framebuffer.
    pub fn set_full_viewport(&mut self, index: u32) -> Result<(), Error> {
        let extent = self.framebuffer_extent()?;
        self.set_viewport(index, &Viewport::from_extent(extent))
    }

    pub fn set_full_viewports(&mut self) -> Result<(), Error> {
        let extent = self.framebuffer_extent()?;
        let count = self.scissor_rects.len() as u32;
        for index in 0..count {
            self.set_viewport(index, &Viewport::from_extent(extent))?;
        }
        Ok(())
    }

    pub fn set_scissor_rect(&mut self, index: u32, rect: Rect) -> Result<(), Error> {
        self.check_recording()?;
        if index != 0 && !self.shared.driver.info().features.multi_viewport {
            return Ok(());
        }

        let slot = self
            .scissor_rects
            .get_mut(index as usize)
            .ok_or_else(|| Error::invalid(format!("Scissor index {} is out of range", index)))?;
        if *slot != Some(rect) {
            *slot = Some(rect);
            self.shared.driver.cmd_set_scissor(self.cb, index, &rect);
        }
        Ok(())
    }

    pub fn set_full_scissor_rect(&mut self, index: u32) -> Result<(), Error> {
        let extent = self.framebuffer_extent()?;
        self.set_scissor_rect(index, Rect::from_extent(extent))
    }

    pub fn set_full_scissor_rects(&mut self) -> Result<(), Error> {
        let extent = self.framebuffer_extent()?;
        let count = self.scissor_rects.len() as u32;
        for index in 0..count {
            self.set_scissor_rect(index, Rect::from_extent(extent))?;
        }
        Ok(())
    }

    fn framebuffer_extent(&self) -> Result<Extent2, Error> {
        self.check_recording()?;
        self.framebuffer
            .as_ref()
            .map(|framebuffer| framebuffer.renderable_extent())
            .ok_or_else(|| Error::invalid("A Framebuffer must be set"))
    }

    // Draws and dispatches

    fn pre_draw(&mut self) -> Result<(), Error> {
        self.check_recording()?;
        if self.framebuffer.is_none() {
            return Err(Error::invalid("A Framebuffer must be set before drawing"));
        }
        self.graphics.check_sets_bound("graphics")?;

        let pending = std::mem::take(&mut self.pre_draw_sampled_images);
        if pending
            .iter()
            .any(|texture| texture.layout(0, 0) != ImageLayout::ShaderReadOnlyOptimal)
        {
            self.ensure_no_render_pass();
            for texture in &pending {
                transition_whole(texture, self.cb, ImageLayout::ShaderReadOnlyOptimal);
            }
        }

        self.ensure_render_pass_active();
        self.flush_resource_sets(PipelineBindPoint::Graphics);
        Ok(())
    }

    pub fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        vertex_start: u32,
        instance_start: u32,
    ) -> Result<(), Error> {
        self.pre_draw()?;
        self.shared.driver.cmd_draw(
            self.cb,
            vertex_count,
            instance_count,
            vertex_start,
            instance_start,
        );
        Ok(())
    }

    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        index_start: u32,
        vertex_offset: i32,
        instance_start: u32,
    ) -> Result<(), Error> {
        self.pre_draw()?;
        self.shared.driver.cmd_draw_indexed(
            self.cb,
            index_count,
            instance_count,
            index_start,
            vertex_offset,
            instance_start,
        );
        Ok(())
    }

    pub fn draw_indirect(
        &mut self,
        buffer: &Buffer,
        offset: u64,
        draw_count: u32,
        stride: u32,
    ) -> Result<(), Error> {
        check_indirect(buffer, offset)?;
        self.pre_draw()?;
        self.capture(buffer.ref_count());
        self.shared
            .driver
            .cmd_draw_indirect(self.cb, buffer.handle(), offset, draw_count, stride);
        Ok(())
    }

    pub fn draw_indexed_indirect(
        &mut self,
        buffer: &Buffer,
        offset: u64,
        draw_count: u32,
        stride: u32,
    ) -> Result<(), Error> {
        check_indirect(buffer, offset)?;
        self.pre_draw()?;
        self.capture(buffer.ref_count());
        self.shared.driver.cmd_draw_indexed_indirect(
            self.cb,
            buffer.handle(),
            offset,
            draw_count,
            stride,
        );
        Ok(())
    }

    fn pre_dispatch(&mut self) -> Result<(), Error> {
        self.check_recording()?;
        let pipeline = self.compute.check_sets_bound("compute")?;
        self.ensure_no_render_pass();

        for slot in 0..pipeline.resource_set_count() as usize {
            let set = match &self.compute.sets[slot] {
                Some(bound) => bound.set.clone(),
                None => continue,
            };

            for texture in set.sampled_textures() {
                transition_whole(texture, self.cb, ImageLayout::ShaderReadOnlyOptimal);
            }
            for texture in set.storage_textures() {
                transition_whole(texture, self.cb, ImageLayout::General);
                // Sampled storage textures are read by draws after compute writes.
                if texture.info().usage.contains(TextureUsage::SAMPLED)
                    && !self
                        .pre_draw_sampled_images
                        .iter()
                        .any(|pending| Arc::ptr_eq(pending, texture))
                {
                    self.pre_draw_sampled_images.push(texture.clone());
                }
            }
        }

        self.flush_resource_sets(PipelineBindPoint::Compute);
        Ok(())
    }

    pub fn dispatch(&mut self, group_count_x: u32, group_count_y: u32, group_count_z: u32) -> Result<(), Error> {
        self.pre_dispatch()?;
        self.shared
            .driver
            .cmd_dispatch(self.cb, group_count_x, group_count_y, group_count_z);
        Ok(())
    }

    pub fn dispatch_indirect(&mut self, buffer: &Buffer, offset: u64) -> Result<(), Error> {
        check_indirect(buffer, offset)?;
        self.pre_dispatch()?;
        self.capture(buffer.ref_count());
        self.shared
            .driver
            .cmd_dispatch_indirect(self.cb, buffer.handle(), offset);
        Ok(())
    }

    // Debug markers

    pub fn push_debug_group(&mut self, name: &str) -> Result<(), Error> {
        self.check_recording()?;
        let driver = &self.shared.driver;
        if driver.info().debug_markers {
            driver.cmd_debug_marker_begin(self.cb, name, [0.0; 4]);
        }
        Ok(())
    }

    pub fn pop_debug_group(&mut self) -> Result<(), Error> {
        self.check_recording()?;
        let driver = &self.shared.driver;
        if driver.info().debug_markers {
            driver.cmd_debug_marker_end(self.cb);
        }
        Ok(())
    }

    pub fn insert_debug_marker(&mut self, name: &str) -> Result<(), Error> {
        self.check_recording()?;
        let driver = &self.shared.driver;
        if driver.info().debug_markers {
            driver.cmd_debug_marker_insert(self.cb, name, [0.0; 4]);
        }
        Ok(())
    }
}

fn transition_whole(texture: &TextureShared, cb: native::CommandBuffer, layout: ImageLayout) {
    texture.transition_image_layout(
        cb,
        0,
        texture.info().mip_levels,
        0,
        texture.actual_array_layers(),
        layout,
    );
}

fn check_indirect(buffer: &Buffer, offset: u64) -> Result<(), Error> {
    if !buffer.usage().contains(BufferUsage::INDIRECT) {
        return Err(Error::invalid(
            "Indirect buffer must be created with `BufferUsage::INDIRECT`",
        ));
    }
    if offset % 4 != 0 {
        return Err(Error::invalid(format!(
            "Indirect buffer offset must be a multiple of 4, got {}",
            offset
        )));
    }
    Ok(())
}

impl Drop for CommandList {
    fn drop(&mut self) {
        if let Some(info) = self.staging.take() {
            self.shared.recycle_staging_info(info, false);
        }
        self.ref_count.decrement();
    }
}

impl Debug for CommandList {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        if fmt.alternate() {
            fmt.debug_struct("CommandList")
                .field("name", &self.name)
                .field("pool", &self.shared.pool)
                .field("cb", &self.cb)
                .field("state", &self.state)
                .field("ref_count", &self.ref_count)
                .finish()
        } else {
            write!(fmt, "CommandList({:#x})", self.shared.pool.0)
        }
    }
}
