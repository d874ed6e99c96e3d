use std::{
    ffi::{c_void, CStr},
    fmt::{self, Debug},
    os::raw::c_char,
};

use erupt::{
    extensions::{
        ext_debug_report::{
            DebugReportCallbackCreateInfoEXTBuilder, DebugReportCallbackEXT, DebugReportFlagsEXT,
            DebugReportObjectTypeEXT, EXT_DEBUG_REPORT_EXTENSION_NAME,
        },
        khr_surface::{SurfaceKHR, KHR_SURFACE_EXTENSION_NAME},
    },
    utils::loading::EntryLoaderError,
    DefaultEntryLoader as EntryLoader,
    vk1_0, InstanceLoader, LoaderError,
};
use parking_lot::Mutex;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use smallvec::SmallVec;

use super::convert::native_error;
use crate::{
    native::{NativeError, ResultCode, SurfaceSource},
    probe::InstanceReport,
};

#[cfg(any(
    target_os = "linux",
    target_os = "dragonfly",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
))]
use erupt::extensions::{
    khr_wayland_surface::{WaylandSurfaceCreateInfoKHRBuilder, KHR_WAYLAND_SURFACE_EXTENSION_NAME},
    khr_xcb_surface::{XcbSurfaceCreateInfoKHRBuilder, KHR_XCB_SURFACE_EXTENSION_NAME},
    khr_xlib_surface::{XlibSurfaceCreateInfoKHR, KHR_XLIB_SURFACE_EXTENSION_NAME},
};

#[cfg(target_os = "android")]
use erupt::extensions::khr_android_surface::{
    AndroidSurfaceCreateInfoKHR, KHR_ANDROID_SURFACE_EXTENSION_NAME,
};

#[cfg(target_os = "windows")]
use erupt::extensions::khr_win32_surface::{
    Win32SurfaceCreateInfoKHR, KHR_WIN32_SURFACE_EXTENSION_NAME,
};

#[cfg(any(target_os = "ios", target_os = "macos"))]
use erupt::extensions::ext_metal_surface::EXT_METAL_SURFACE_EXTENSION_NAME;

#[derive(Debug, thiserror::Error)]
pub enum InstanceError {
    #[error(transparent)]
    EntryLoaderError {
        #[from]
        source: EntryLoaderError,
    },

    #[error("Failed to load functions from vulkan library")]
    FunctionLoadFailed,

    #[error("Instance creation failed")]
    CreateInstanceError {
        #[from]
        source: vk1_0::Result,
    },
}

/// Error-severity messages reported by validation layers.
#[derive(Debug, Default)]
pub(super) struct ValidationLog {
    error: Mutex<Option<String>>,
}

impl ValidationLog {
    /// Takes first error reported since last call.
    pub fn take(&self) -> Option<String> {
        self.error.lock().take()
    }

    fn record(&self, message: String) {
        let mut error = self.error.lock();
        if error.is_none() {
            *error = Some(message);
        }
    }
}

pub(super) struct Instance {
    pub loader: InstanceLoader,
    pub version: u32,
    pub available_extensions: Vec<String>,
    validation: Box<ValidationLog>,
    debug_callback: Option<DebugReportCallbackEXT>,
    _entry: EntryLoader,
}

impl Debug for Instance {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        if fmt.alternate() {
            fmt.debug_struct("Instance")
                .field("instance", &self.loader.handle)
                .field("version", &self.version)
                .field("debug", &self.debug_callback.is_some())
                .finish()
        } else {
            Debug::fmt(&self.loader.handle, fmt)
        }
    }
}

impl Instance {
    /// Creates instance with every available surface extension enabled.
    /// With `debug` validation layers and the report callback are enabled as well.
    #[tracing::instrument(skip(debug_enabled), fields(debug = debug_enabled))]
    pub fn new(debug_enabled: bool) -> Result<Self, InstanceError> {
        let entry = EntryLoader::new()?;
        let version = entry.instance_version();

        let layer_properties =
            unsafe { entry.enumerate_instance_layer_properties(None) }.result()?;

        let mut enable_layers = SmallVec::<[_; 1]>::new();

        let mut push_layer = |name: &'static CStr| -> bool {
            if layer_properties
                .iter()
                .any(|p| unsafe { CStr::from_ptr(&p.layer_name[0]) } == name)
            {
                enable_layers.push(name.as_ptr());
                true
            } else {
                false
            }
        };

        if debug_enabled
            && !push_layer(unsafe {
                // Literal has nul-byte.
                CStr::from_bytes_with_nul_unchecked(b"VK_LAYER_KHRONOS_validation\0")
            })
            && !push_layer(unsafe {
                // Literal has nul-byte.
                CStr::from_bytes_with_nul_unchecked(b"VK_LAYER_LUNARG_standard_validation\0")
            })
        {
            tracing::warn!("Validation layers requested but not available");
        }

        let extension_properties =
            unsafe { entry.enumerate_instance_extension_properties(None, None) }.result()?;

        let available_extensions = extension_properties
            .iter()
            .map(|p| {
                unsafe { CStr::from_ptr(&p.extension_name[0]) }
                    .to_string_lossy()
                    .into_owned()
            })
            .collect::<Vec<_>>();

        let mut enable_exts = SmallVec::<[_; 8]>::new();

        let mut push_ext = |name: *const c_char| -> bool {
            let name = unsafe { CStr::from_ptr(name) };
            if extension_properties
                .iter()
                .any(|p| unsafe { CStr::from_ptr(&p.extension_name[0]) } == name)
            {
                tracing::trace!("Pick extension {:?}", name);
                enable_exts.push(name.as_ptr());
                true
            } else {
                false
            }
        };

        if debug_enabled {
            push_ext(EXT_DEBUG_REPORT_EXTENSION_NAME);
        }

        if push_ext(KHR_SURFACE_EXTENSION_NAME) {
            #[cfg(target_os = "android")]
            {
                push_ext(KHR_ANDROID_SURFACE_EXTENSION_NAME);
            }

            #[cfg(any(
                target_os = "linux",
                target_os = "dragonfly",
                target_os = "freebsd",
                target_os = "netbsd",
                target_os = "openbsd",
            ))]
            {
                push_ext(KHR_XLIB_SURFACE_EXTENSION_NAME);
                push_ext(KHR_XCB_SURFACE_EXTENSION_NAME);
                push_ext(KHR_WAYLAND_SURFACE_EXTENSION_NAME);
            }

            #[cfg(target_os = "windows")]
            {
                push_ext(KHR_WIN32_SURFACE_EXTENSION_NAME);
            }

            #[cfg(any(target_os = "ios", target_os = "macos"))]
            {
                push_ext(EXT_METAL_SURFACE_EXTENSION_NAME);
            }
        }

        let engine_name = unsafe { CStr::from_bytes_with_nul_unchecked(b"Strata\0") };

        let result = unsafe {
            InstanceLoader::new(
                &entry,
                &vk1_0::InstanceCreateInfoBuilder::new()
                    .application_info(
                        &vk1_0::ApplicationInfoBuilder::new()
                            .engine_name(engine_name)
                            .engine_version(1)
                            .application_name(engine_name)
                            .application_version(1)
                            .api_version(version),
                    )
                    .enabled_layer_names(&enable_layers)
                    .enabled_extension_names(&enable_exts),
                None,
            )
        };

        let loader = match result {
            Err(LoaderError::SymbolNotAvailable) => {
                return Err(InstanceError::FunctionLoadFailed);
            }
            Err(LoaderError::VulkanError(err)) => {
                return Err(InstanceError::CreateInstanceError { source: err });
            }
            Ok(ok) => ok,
        };

        let validation = Box::new(ValidationLog::default());

        let mut debug_callback = None;
        if debug_enabled && loader.enabled().ext_debug_report {
            let user_data = &*validation as *const ValidationLog as *mut c_void;
            let result = unsafe {
                loader.create_debug_report_callback_ext(
                    &DebugReportCallbackCreateInfoEXTBuilder::new()
                        .flags(
                            DebugReportFlagsEXT::ERROR_EXT
                                | DebugReportFlagsEXT::WARNING_EXT
                                | DebugReportFlagsEXT::PERFORMANCE_WARNING_EXT,
                        )
                        .pfn_callback(Some(debug_report_callback))
                        .user_data(user_data),
                    None,
                    None,
                )
            }
            .result();

            match result {
                Ok(callback) => debug_callback = Some(callback),
                Err(err) => {
                    unsafe { loader.destroy_instance(None) };
                    return Err(InstanceError::CreateInstanceError { source: err });
                }
            }
        }

        tracing::debug!("Instance created, version {:#x}", version);

        Ok(Instance {
            loader,
            version,
            available_extensions,
            validation,
            debug_callback,
            _entry: entry,
        })
    }

    pub fn validation(&self) -> &ValidationLog {
        &self.validation
    }

    #[tracing::instrument(skip(self))]
    pub fn create_surface(&self, source: &SurfaceSource) -> Result<SurfaceKHR, NativeError> {
        let missing = |call| NativeError::new(call, ResultCode::ExtensionNotPresent);
        match (source.window, source.display) {
            #[cfg(any(
                target_os = "linux",
                target_os = "dragonfly",
                target_os = "freebsd",
                target_os = "netbsd",
                target_os = "openbsd",
            ))]
            (RawWindowHandle::Xlib(window), RawDisplayHandle::Xlib(display)) => {
                if !self.loader.enabled().khr_xlib_surface {
                    return Err(missing("vkCreateXlibSurfaceKHR"));
                }

                unsafe {
                    self.loader.create_xlib_surface_khr(
                        &XlibSurfaceCreateInfoKHR {
                            window: window.window as _,
                            dpy: display.display as _,
                            ..XlibSurfaceCreateInfoKHR::default()
                        },
                        None,
                        None,
                    )
                }
                .result()
                .map_err(|err| native_error("vkCreateXlibSurfaceKHR", err))
            }

            #[cfg(any(
                target_os = "linux",
                target_os = "dragonfly",
                target_os = "freebsd",
                target_os = "netbsd",
                target_os = "openbsd",
            ))]
            (RawWindowHandle::Xcb(window), RawDisplayHandle::Xcb(display)) => {
                if !self.loader.enabled().khr_xcb_surface {
                    return Err(missing("vkCreateXcbSurfaceKHR"));
                }

                unsafe {
                    self.loader.create_xcb_surface_khr(
                        &XcbSurfaceCreateInfoKHRBuilder::new()
                            .window(window.window)
                            .connection(display.connection as _),
                        None,
                        None,
                    )
                }
                .result()
                .map_err(|err| native_error("vkCreateXcbSurfaceKHR", err))
            }

            #[cfg(any(
                target_os = "linux",
                target_os = "dragonfly",
                target_os = "freebsd",
                target_os = "netbsd",
                target_os = "openbsd",
            ))]
            (RawWindowHandle::Wayland(window), RawDisplayHandle::Wayland(display)) => {
                if !self.loader.enabled().khr_wayland_surface {
                    return Err(missing("vkCreateWaylandSurfaceKHR"));
                }

                unsafe {
                    self.loader.create_wayland_surface_khr(
                        &WaylandSurfaceCreateInfoKHRBuilder::new()
                            .surface(window.surface as _)
                            .display(display.display as _),
                        None,
                        None,
                    )
                }
                .result()
                .map_err(|err| native_error("vkCreateWaylandSurfaceKHR", err))
            }

            #[cfg(target_os = "windows")]
            (RawWindowHandle::Win32(window), _) => {
                if !self.loader.enabled().khr_win32_surface {
                    return Err(missing("vkCreateWin32SurfaceKHR"));
                }

                let mut info = Win32SurfaceCreateInfoKHR::default();
                info.hinstance = window.hinstance as _;
                info.hwnd = window.hwnd as _;

                unsafe { self.loader.create_win32_surface_khr(&info, None) }
                    .result()
                    .map_err(|err| native_error("vkCreateWin32SurfaceKHR", err))
            }

            #[cfg(target_os = "android")]
            (RawWindowHandle::AndroidNdk(window), _) => {
                if !self.loader.enabled().khr_android_surface {
                    return Err(missing("vkCreateAndroidSurfaceKHR"));
                }

                unsafe {
                    self.loader.create_android_surface_khr(
                        &AndroidSurfaceCreateInfoKHR {
                            window: window.a_native_window as _,
                            ..AndroidSurfaceCreateInfoKHR::default()
                        },
                        None,
                    )
                }
                .result()
                .map_err(|err| native_error("vkCreateAndroidSurfaceKHR", err))
            }

            // Metal layers have to be attached to the view on the main thread,
            // which is left to the windowing code.
            (window, _) => {
                tracing::error!("Unsupported window {:?}", window);
                Err(missing("vkCreateSurfaceKHR"))
            }
        }
    }

    pub fn destroy_surface(&self, surface: SurfaceKHR) {
        unsafe { self.loader.destroy_surface_khr(Some(surface), None) }
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            if let Some(callback) = self.debug_callback.take() {
                self.loader
                    .destroy_debug_report_callback_ext(Some(callback), None);
            }
            self.loader.destroy_instance(None);
        }
    }
}

/// Creates a throwaway instance to find out what the system offers.
pub fn probe_instance() -> Result<InstanceReport, InstanceError> {
    let instance = Instance::new(false)?;

    let devices = unsafe { instance.loader.enumerate_physical_devices(None) }.result()?;

    Ok(InstanceReport {
        instance_extensions: instance.available_extensions.clone(),
        physical_device_count: devices.len() as u32,
    })
}

unsafe extern "system" fn debug_report_callback(
    flags: DebugReportFlagsEXT,
    object_type: DebugReportObjectTypeEXT,
    _object: u64,
    _location: usize,
    _message_code: i32,
    p_layer_prefix: *const c_char,
    p_message: *const c_char,
    p_user_data: *mut c_void,
) -> vk1_0::Bool32 {
    let layer_prefix = CStr::from_ptr(p_layer_prefix).to_string_lossy();
    let message = CStr::from_ptr(p_message).to_string_lossy();

    if flags.contains(DebugReportFlagsEXT::ERROR_EXT) {
        tracing::error!("{}: {:?} | {}", layer_prefix, object_type, message);

        // Points to the log boxed in `Instance` which outlives the callback.
        if let Some(log) = (p_user_data as *const ValidationLog).as_ref() {
            log.record(format!("[{}] {}", layer_prefix, message));
        }
    } else if flags.intersects(
        DebugReportFlagsEXT::WARNING_EXT | DebugReportFlagsEXT::PERFORMANCE_WARNING_EXT,
    ) {
        tracing::warn!("{}: {:?} | {}", layer_prefix, object_type, message);
    } else {
        tracing::debug!("{}: {:?} | {}", layer_prefix, object_type, message);
    }

    vk1_0::FALSE
}
