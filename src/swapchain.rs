use std::{
    fmt::{self, Debug},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;
use smallvec::smallvec;

use crate::{
    dimensions::Extent2,
    format::PixelFormat,
    framebuffer::{AttachmentTarget, Framebuffer, FramebufferShared},
    native::{
        self, AcquireResult, ColorSpace, Driver, ImageUsageFlags, PresentMode, PresentResult,
        SurfaceFormat, SurfaceSource, SwapchainCreateInfo,
    },
    pipeline::OutputInfo,
    refcount::ResourceRefCount,
    texture::{Texture, TextureInfo, TextureUsage},
    Error,
};

/// Information required to create a swapchain.
#[derive(Clone, Copy, Debug)]
pub struct SwapchainInfo {
    /// Window presented into.
    pub source: SurfaceSource,

    pub width: u32,
    pub height: u32,

    /// Format of the depth target created along with the color images.
    pub depth_format: Option<PixelFormat>,

    pub sync_to_vertical_blank: bool,

    /// Requests sRGB color images. Creation fails if the surface has none.
    pub color_srgb: bool,
}

impl SwapchainInfo {
    pub fn new(source: SurfaceSource, width: u32, height: u32) -> Self {
        SwapchainInfo {
            source,
            width,
            height,
            depth_format: None,
            sync_to_vertical_blank: false,
            color_srgb: false,
        }
    }
}

/// Vsync change requested by the user and applied on the next acquire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum VsyncState {
    Current(bool),
    Pending { current: bool, requested: bool },
}

impl VsyncState {
    fn effective(&self) -> bool {
        match *self {
            VsyncState::Current(value) => value,
            VsyncState::Pending { requested, .. } => requested,
        }
    }

    fn current(&self) -> bool {
        match *self {
            VsyncState::Current(value) => value,
            VsyncState::Pending { current, .. } => current,
        }
    }
}

/// Images of the current native swapchain and the framebuffers over them.
struct SwapchainImages {
    // Framebuffers are dropped before the textures they reference.
    framebuffers: Vec<Framebuffer>,
    colors: Vec<Texture>,
    depth: Option<Texture>,
}

struct SwapchainState {
    native: native::Swapchain,
    image_index: u32,
    vsync: VsyncState,
    extent: Extent2,
    format: PixelFormat,
    present_mode: PresentMode,
    images: Option<SwapchainImages>,
}

pub(crate) struct SwapchainShared {
    driver: Arc<dyn Driver>,

    /// Device queue lock. Always taken before `state`.
    queue: Arc<Mutex<()>>,
    surface: native::Surface,
    image_available: native::Fence,
    depth_format: Option<PixelFormat>,
    color_srgb: bool,
    state: Mutex<SwapchainState>,
    destroyed: AtomicBool,
}

impl SwapchainShared {
    /// Creates native swapchain for the requested size.
    ///
    /// Returns `false` when the surface currently has zero extent,
    /// leaving the previous swapchain intact.
    #[tracing::instrument(skip(self, state))]
    fn create_native(&self, state: &mut SwapchainState, width: u32, height: u32) -> Result<bool, Error> {
        let driver = &self.driver;
        let caps = driver.surface_capabilities(self.surface)?;
        if caps.min_extent == Extent2::new(0, 0) && caps.max_extent == Extent2::new(0, 0) {
            tracing::debug!("Surface has zero extent, swapchain is not recreated");
            if state.native.is_null() {
                // Used once the surface has an extent again.
                state.extent = Extent2::new(width, height);
            }
            return Ok(false);
        }

        if !state.native.is_null() {
            driver.queue_wait_idle()?;
        }
        state.image_index = 0;

        let formats = driver.surface_formats(self.surface)?;
        let (format, color_space) = select_surface_format(&formats, self.color_srgb)?;

        let present_modes = driver.surface_present_modes(self.surface)?;
        let present_mode = select_present_mode(&present_modes, state.vsync.current());

        let image_count = match caps.max_image_count {
            0 => caps.min_image_count + 1,
            max => max.min(caps.min_image_count + 1),
        };
        let extent = Extent2::new(width, height).clamp(caps.min_extent, caps.max_extent);

        let old_swapchain = state.native;
        let swapchain = driver.create_swapchain(&SwapchainCreateInfo {
            surface: self.surface,
            image_count,
            format,
            color_space,
            extent,
            usage: ImageUsageFlags::COLOR_ATTACHMENT | ImageUsageFlags::TRANSFER_DST,
            present_mode,
            old_swapchain,
        })?;

        // Old images are retired with the old swapchain.
        state.images = None;
        if !old_swapchain.is_null() {
            driver.destroy_swapchain(old_swapchain);
        }
        state.native = swapchain;
        state.extent = extent;
        state.format = format;
        state.present_mode = present_mode;

        state.images = Some(self.create_images(swapchain, format, extent)?);

        tracing::debug!(
            "Swapchain {:?} created: {:?} {:?} {:?}, {} images",
            swapchain,
            extent,
            format,
            present_mode,
            image_count
        );
        Ok(true)
    }

    fn create_images(
        &self,
        swapchain: native::Swapchain,
        format: PixelFormat,
        extent: Extent2,
    ) -> Result<SwapchainImages, Error> {
        let driver = &self.driver;

        let colors: Vec<Texture> = driver
            .swapchain_images(swapchain)?
            .into_iter()
            .map(|image| {
                Texture::from_swapchain_image(
                    driver,
                    image,
                    TextureInfo::texture_2d(
                        extent.width,
                        extent.height,
                        1,
                        1,
                        format,
                        TextureUsage::RENDER_TARGET,
                    ),
                )
            })
            .collect();

        let depth = match self.depth_format {
            Some(depth_format) => Some(Texture::new(
                driver,
                TextureInfo::texture_2d(
                    extent.width,
                    extent.height,
                    1,
                    1,
                    depth_format,
                    TextureUsage::DEPTH_STENCIL,
                ),
            )?),
            None => None,
        };

        let framebuffers = colors
            .iter()
            .map(|color| {
                Framebuffer::from_targets(
                    driver,
                    smallvec![AttachmentTarget {
                        texture: color.shared().clone(),
                        mip_level: 0,
                        array_layer: 0,
                    }],
                    depth.as_ref().map(|depth| AttachmentTarget {
                        texture: depth.shared().clone(),
                        mip_level: 0,
                        array_layer: 0,
                    }),
                    true,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(SwapchainImages {
            framebuffers,
            colors,
            depth,
        })
    }

    /// Acquires next image and waits until it is available.
    /// Returns `false` if the surface is out of date.
    fn acquire(&self, state: &mut SwapchainState) -> Result<bool, Error> {
        match self
            .driver
            .acquire_next_image(state.native, self.image_available)?
        {
            AcquireResult::Success(index) => {
                state.image_index = index;
                self.wait_image_available()?;
                Ok(true)
            }
            AcquireResult::Suboptimal(index) => {
                state.image_index = index;
                self.wait_image_available()?;
                Ok(false)
            }
            AcquireResult::OutOfDate => Ok(false),
        }
    }

    fn wait_image_available(&self) -> Result<(), Error> {
        self.driver
            .wait_for_fences(&[self.image_available], true, u64::MAX)?;
        self.driver.reset_fences(&[self.image_available])?;
        Ok(())
    }

    fn recreate_and_reacquire(&self, state: &mut SwapchainState, width: u32, height: u32) -> Result<(), Error> {
        if self.create_native(state, width, height)? && !self.acquire(state)? {
            tracing::warn!("Swapchain image acquired right after recreation is out of date");
        }
        Ok(())
    }

    pub(crate) fn acquire_next_image(&self) -> Result<bool, Error> {
        let _queue = self.queue.lock();
        let mut state = self.state.lock();
        self.acquire_next_image_locked(&mut state)
    }

    fn acquire_next_image_locked(&self, state: &mut SwapchainState) -> Result<bool, Error> {
        let extent = state.extent;

        if let VsyncState::Pending { requested, .. } = state.vsync {
            state.vsync = VsyncState::Current(requested);
            tracing::debug!("Applying vsync change to {}", requested);
            self.recreate_and_reacquire(state, extent.width, extent.height)?;
            return Ok(false);
        }

        if state.native.is_null() {
            tracing::debug!("Swapchain has no images, recreating");
            self.recreate_and_reacquire(state, extent.width, extent.height)?;
            return Ok(false);
        }

        if self.acquire(state)? {
            Ok(true)
        } else {
            tracing::debug!("Swapchain is out of date, recreating");
            self.recreate_and_reacquire(state, extent.width, extent.height)?;
            Ok(false)
        }
    }

    /// Presents current image and acquires the next one.
    pub(crate) fn present(&self) -> Result<(), Error> {
        let _queue = self.queue.lock();
        let mut state = self.state.lock();
        let extent = state.extent;

        if state.native.is_null() {
            tracing::debug!("Swapchain has no images to present");
            return self.recreate_and_reacquire(&mut state, extent.width, extent.height);
        }

        let result = self.driver.queue_present(state.native, state.image_index)?;
        match result {
            PresentResult::Success => {
                self.acquire_next_image_locked(&mut state)?;
            }
            PresentResult::Suboptimal | PresentResult::OutOfDate => {
                tracing::debug!("Present reported {:?}, recreating swapchain", result);
                self.recreate_and_reacquire(&mut state, extent.width, extent.height)?;
            }
        }
        Ok(())
    }

    pub(crate) fn native(&self) -> native::Swapchain {
        self.state.lock().native
    }

    fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }

        let mut state = self.state.lock();
        state.images = None;
        if !state.native.is_null() {
            self.driver.destroy_swapchain(state.native);
            state.native = native::Swapchain::NULL;
        }
        self.driver.destroy_fence(self.image_available);
        self.driver.destroy_surface(self.surface);
        tracing::debug!("Swapchain surface {:?} destroyed", self.surface);
    }
}

fn select_surface_format(
    formats: &[SurfaceFormat],
    srgb: bool,
) -> Result<(PixelFormat, ColorSpace), Error> {
    let desired = if srgb {
        PixelFormat::BGRA8Srgb
    } else {
        PixelFormat::BGRA8Unorm
    };

    if let [SurfaceFormat { format: None, .. }] = formats {
        return Ok((desired, ColorSpace::SrgbNonlinear));
    }

    if formats
        .iter()
        .any(|sf| sf.format == Some(desired) && sf.color_space == ColorSpace::SrgbNonlinear)
    {
        return Ok((desired, ColorSpace::SrgbNonlinear));
    }

    if srgb {
        return Err(Error::unsupported("sRGB swapchain format for this surface"));
    }

    formats
        .iter()
        .find_map(|sf| sf.format.map(|format| (format, sf.color_space)))
        .ok_or_else(|| Error::unsupported("Surface reports no formats"))
}

fn select_present_mode(modes: &[PresentMode], vsync: bool) -> PresentMode {
    if vsync {
        if modes.contains(&PresentMode::FifoRelaxed) {
            return PresentMode::FifoRelaxed;
        }
    } else if modes.contains(&PresentMode::Mailbox) {
        return PresentMode::Mailbox;
    } else if modes.contains(&PresentMode::Immediate) {
        return PresentMode::Immediate;
    }
    PresentMode::Fifo
}

/// Framebuffer over the image currently acquired from a swapchain.
pub struct SwapchainFramebuffer {
    swapchain: Arc<SwapchainShared>,
    ref_count: Arc<ResourceRefCount>,
}

impl SwapchainFramebuffer {
    /// Framebuffer of the acquired image.
    pub(crate) fn current(&self) -> Option<Arc<FramebufferShared>> {
        let state = self.swapchain.state.lock();
        let images = state.images.as_ref()?;
        images
            .framebuffers
            .get(state.image_index as usize)
            .map(|framebuffer| framebuffer.shared().clone())
    }

    pub(crate) fn swapchain_ref_count(&self) -> &Arc<ResourceRefCount> {
        &self.ref_count
    }

    pub fn width(&self) -> u32 {
        self.swapchain.state.lock().extent.width
    }

    pub fn height(&self) -> u32 {
        self.swapchain.state.lock().extent.height
    }

    pub fn extent(&self) -> Extent2 {
        self.swapchain.state.lock().extent
    }

    /// Index of the acquired image.
    pub fn image_index(&self) -> u32 {
        self.swapchain.state.lock().image_index
    }

    pub fn image_count(&self) -> usize {
        self.swapchain
            .state
            .lock()
            .images
            .as_ref()
            .map_or(0, |images| images.colors.len())
    }

    /// Native handle of the framebuffer for the acquired image.
    pub fn handle(&self) -> native::Framebuffer {
        self.current()
            .map_or(native::Framebuffer::NULL, |framebuffer| framebuffer.handle())
    }

    pub fn color_format(&self) -> PixelFormat {
        self.swapchain.state.lock().format
    }

    pub fn depth_format(&self) -> Option<PixelFormat> {
        self.swapchain.depth_format
    }

    pub fn output_info(&self) -> OutputInfo {
        OutputInfo::new(&[self.color_format()], self.swapchain.depth_format)
    }
}

impl Debug for SwapchainFramebuffer {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            fmt,
            "SwapchainFramebuffer({:#x}@{})",
            self.swapchain.surface.0,
            self.image_index()
        )
    }
}

/// Presentable images of a window surface.
///
/// The native swapchain is recreated on resize, when the surface goes out of date
/// and on the first acquire after a vsync change.
pub struct Swapchain {
    framebuffer: SwapchainFramebuffer,
    name: Option<String>,
}

impl Swapchain {
    pub(crate) fn new(
        driver: &Arc<dyn Driver>,
        queue: &Arc<Mutex<()>>,
        info: &SwapchainInfo,
    ) -> Result<Self, Error> {
        let surface = driver.create_surface(&info.source)?;

        let supported = match driver.surface_supported(surface) {
            Ok(supported) => supported,
            Err(err) => {
                driver.destroy_surface(surface);
                return Err(err.into());
            }
        };
        if !supported {
            driver.destroy_surface(surface);
            return Err(Error::unsupported(
                "Presenting to the given surface from the graphics queue",
            ));
        }

        let image_available = match driver.create_fence(false) {
            Ok(fence) => fence,
            Err(err) => {
                driver.destroy_surface(surface);
                return Err(err.into());
            }
        };

        let shared = Arc::new(SwapchainShared {
            driver: driver.clone(),
            queue: queue.clone(),
            surface,
            image_available,
            depth_format: info.depth_format,
            color_srgb: info.color_srgb,
            state: Mutex::new(SwapchainState {
                native: native::Swapchain::NULL,
                image_index: 0,
                vsync: VsyncState::Current(info.sync_to_vertical_blank),
                extent: Extent2::new(info.width, info.height),
                format: PixelFormat::BGRA8Unorm,
                present_mode: PresentMode::Fifo,
                images: None,
            }),
            destroyed: AtomicBool::new(false),
        });

        let created = {
            let _queue = shared.queue.lock();
            let mut state = shared.state.lock();
            shared
                .create_native(&mut state, info.width, info.height)
                .and_then(|created| {
                    if created {
                        shared.acquire(&mut state)?;
                    }
                    Ok(())
                })
        };
        if let Err(err) = created {
            shared.destroy();
            return Err(err);
        }

        let ref_count = {
            let shared = shared.clone();
            ResourceRefCount::new(move || shared.destroy())
        };

        Ok(Swapchain {
            framebuffer: SwapchainFramebuffer {
                swapchain: shared,
                ref_count,
            },
            name: None,
        })
    }

    pub(crate) fn shared(&self) -> &Arc<SwapchainShared> {
        &self.framebuffer.swapchain
    }

    /// Framebuffer to render the next presented image into.
    pub fn framebuffer(&self) -> &SwapchainFramebuffer {
        &self.framebuffer
    }

    /// Recreates images for the new window size and acquires one.
    pub fn resize(&self, width: u32, height: u32) -> Result<(), Error> {
        let shared = self.shared();
        let _queue = shared.queue.lock();
        let mut state = shared.state.lock();
        shared.recreate_and_reacquire(&mut state, width, height)
    }

    /// Returns requested vsync, including a change not applied yet.
    pub fn sync_to_vertical_blank(&self) -> bool {
        self.shared().state.lock().vsync.effective()
    }

    /// Vsync change takes effect on the next acquire.
    pub fn set_sync_to_vertical_blank(&self, value: bool) {
        let mut state = self.shared().state.lock();
        let current = state.vsync.current();
        state.vsync = if current == value {
            VsyncState::Current(current)
        } else {
            VsyncState::Pending {
                current,
                requested: value,
            }
        };
    }

    /// Acquires next image.
    ///
    /// Returns `false` when the swapchain had to be recreated,
    /// either for a vsync change or because the surface was out of date.
    pub fn acquire_next_image(&self) -> Result<bool, Error> {
        self.shared().acquire_next_image()
    }

    /// Present mode of the current native swapchain.
    pub fn present_mode(&self) -> PresentMode {
        self.shared().state.lock().present_mode
    }

    pub fn native(&self) -> native::Swapchain {
        self.shared().native()
    }

    pub fn surface(&self) -> native::Surface {
        self.shared().surface
    }

    #[inline]
    pub fn ref_count(&self) -> &Arc<ResourceRefCount> {
        &self.framebuffer.ref_count
    }

    pub fn is_destroyed(&self) -> bool {
        self.shared().destroyed.load(Ordering::Acquire)
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub(crate) fn set_name_field(&mut self, name: &str) {
        self.name = Some(name.to_owned());
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.framebuffer.ref_count.decrement();
    }
}

impl Debug for Swapchain {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        if fmt.alternate() {
            let state = self.shared().state.lock();
            fmt.debug_struct("Swapchain")
                .field("surface", &self.shared().surface)
                .field("native", &state.native)
                .field("extent", &state.extent)
                .field("format", &state.format)
                .field("present_mode", &state.present_mode)
                .field("vsync", &state.vsync)
                .finish()
        } else {
            write!(fmt, "Swapchain({:#x})", self.shared().surface.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::mpsc, time::Duration};

    use raw_window_handle::{RawDisplayHandle, RawWindowHandle, XlibDisplayHandle, XlibWindowHandle};

    use super::*;
    use crate::backend::headless::{HeadlessConfig, HeadlessDriver};

    fn headless_swapchain() -> (Arc<Mutex<()>>, Swapchain) {
        let driver: Arc<dyn Driver> = Arc::new(HeadlessDriver::new(HeadlessConfig::default()));
        let queue = Arc::new(Mutex::new(()));
        let source = SurfaceSource {
            window: RawWindowHandle::Xlib(XlibWindowHandle::empty()),
            display: RawDisplayHandle::Xlib(XlibDisplayHandle::empty()),
        };
        let swapchain = Swapchain::new(&driver, &queue, &SwapchainInfo::new(source, 64, 64)).unwrap();
        (queue, swapchain)
    }

    #[test]
    fn resize_and_acquire_wait_for_queue() {
        let (queue, swapchain) = headless_swapchain();

        let guard = queue.lock();
        let (tx, rx) = mpsc::channel();
        let swapchain = &swapchain;
        std::thread::scope(|scope| {
            scope.spawn(move || {
                let resized = swapchain.resize(128, 128);
                let acquired = swapchain.acquire_next_image();
                tx.send((resized, acquired)).unwrap();
            });

            assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
            drop(guard);

            let (resized, acquired) = rx.recv().unwrap();
            resized.unwrap();
            assert!(acquired.unwrap());
        });
        assert_eq!(swapchain.framebuffer().width(), 128);
    }

    #[test]
    fn present_takes_queue_itself() {
        let (queue, swapchain) = headless_swapchain();
        swapchain.shared().present().unwrap();
        assert!(queue.try_lock().is_some());
    }

    fn sf(format: Option<PixelFormat>) -> SurfaceFormat {
        SurfaceFormat {
            format,
            color_space: ColorSpace::SrgbNonlinear,
        }
    }

    #[test]
    fn undefined_surface_format_accepts_desired() {
        let picked = select_surface_format(&[sf(None)], true).unwrap();
        assert_eq!(picked.0, PixelFormat::BGRA8Srgb);
    }

    #[test]
    fn missing_srgb_is_unsupported() {
        let err = select_surface_format(&[sf(Some(PixelFormat::RGBA8Unorm))], true).unwrap_err();
        assert!(matches!(err, Error::Unsupported { .. }));
    }

    #[test]
    fn falls_back_to_first_format() {
        let picked = select_surface_format(
            &[sf(Some(PixelFormat::RGBA8Unorm)), sf(Some(PixelFormat::RGBA16Sfloat))],
            false,
        )
        .unwrap();
        assert_eq!(picked.0, PixelFormat::RGBA8Unorm);
    }

    #[test]
    fn present_mode_preferences() {
        let all = [
            PresentMode::Fifo,
            PresentMode::FifoRelaxed,
            PresentMode::Mailbox,
            PresentMode::Immediate,
        ];
        assert_eq!(select_present_mode(&all, true), PresentMode::FifoRelaxed);
        assert_eq!(select_present_mode(&all, false), PresentMode::Mailbox);
        assert_eq!(
            select_present_mode(&[PresentMode::Fifo, PresentMode::Immediate], false),
            PresentMode::Immediate
        );
        assert_eq!(select_present_mode(&[PresentMode::Fifo], true), PresentMode::Fifo);
    }
}
