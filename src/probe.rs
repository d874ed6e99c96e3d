use once_cell::sync::OnceCell;

/// Platform whose window system needs a surface extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SurfacePlatform {
    Windows,
    Android,
    Linux,
    MacOS,
    IOS,
    Other,
}

impl SurfacePlatform {
    pub const fn current() -> Self {
        if cfg!(target_os = "windows") {
            SurfacePlatform::Windows
        } else if cfg!(target_os = "android") {
            SurfacePlatform::Android
        } else if cfg!(any(
            target_os = "linux",
            target_os = "dragonfly",
            target_os = "freebsd",
            target_os = "netbsd",
            target_os = "openbsd",
        )) {
            SurfacePlatform::Linux
        } else if cfg!(target_os = "macos") {
            SurfacePlatform::MacOS
        } else if cfg!(target_os = "ios") {
            SurfacePlatform::IOS
        } else {
            SurfacePlatform::Other
        }
    }

    /// Instance extensions, any of which lets windows of the platform be presented to.
    pub fn surface_extensions(&self) -> &'static [&'static str] {
        match self {
            SurfacePlatform::Windows => &["VK_KHR_win32_surface"],
            SurfacePlatform::Android => &["VK_KHR_android_surface"],
            SurfacePlatform::Linux => &["VK_KHR_xlib_surface"],
            SurfacePlatform::MacOS => &["VK_MVK_macos_surface", "VK_EXT_metal_surface"],
            SurfacePlatform::IOS => &["VK_MVK_ios_surface", "VK_EXT_metal_surface"],
            SurfacePlatform::Other => &[],
        }
    }
}

/// Checks that instance extensions allow presenting on the platform.
///
/// `VK_KHR_surface` is always required.
/// Platforms without a known window system need nothing else.
pub fn surface_extensions_supported<'a>(
    platform: SurfacePlatform,
    instance_extensions: impl IntoIterator<Item = &'a str> + Clone,
) -> bool {
    let has = |name: &str| instance_extensions.clone().into_iter().any(|ext| ext == name);

    if !has("VK_KHR_surface") {
        return false;
    }

    let required = platform.surface_extensions();
    required.is_empty() || required.iter().any(|&ext| has(ext))
}

/// What a throwaway instance revealed about the system.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InstanceReport {
    pub instance_extensions: Vec<String>,
    pub physical_device_count: u32,
}

/// Process-wide answer to whether the Vulkan backend can run here.
///
/// Probing creates an instance, counts physical devices and destroys it again.
/// It runs at most once, the answer is cached for the process lifetime.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceCapabilityProbe {
    report: Option<InstanceReport>,
    supported: bool,
}

static PROBE: OnceCell<DeviceCapabilityProbe> = OnceCell::new();

impl DeviceCapabilityProbe {
    pub fn get() -> &'static Self {
        PROBE.get_or_init(Self::run)
    }

    /// Shortcut for `DeviceCapabilityProbe::get().supported()`.
    pub fn is_supported() -> bool {
        Self::get().supported
    }

    #[inline]
    pub fn supported(&self) -> bool {
        self.supported
    }

    /// Report of the probing instance, `None` if no instance could be created.
    #[inline]
    pub fn report(&self) -> Option<&InstanceReport> {
        self.report.as_ref()
    }

    /// Evaluates a report for given platform.
    pub fn from_report(report: Option<InstanceReport>, platform: SurfacePlatform) -> Self {
        let supported = match &report {
            None => false,
            Some(report) => {
                report.physical_device_count > 0
                    && surface_extensions_supported(
                        platform,
                        report.instance_extensions.iter().map(String::as_str),
                    )
            }
        };

        DeviceCapabilityProbe { report, supported }
    }

    #[tracing::instrument]
    fn run() -> Self {
        #[cfg(feature = "vulkan")]
        let report = match crate::backend::vulkan::probe_instance() {
            Ok(report) => Some(report),
            Err(err) => {
                tracing::debug!("Vulkan is not available: {}", err);
                None
            }
        };

        #[cfg(not(feature = "vulkan"))]
        let report = None;

        let probe = Self::from_report(report, SurfacePlatform::current());
        tracing::debug!("Vulkan support probed: {}", probe.supported);
        probe
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(extensions: &[&str], devices: u32) -> Option<InstanceReport> {
        Some(InstanceReport {
            instance_extensions: extensions.iter().map(|&ext| ext.to_owned()).collect(),
            physical_device_count: devices,
        })
    }

    #[test]
    fn surface_extension_is_required() {
        let probe = DeviceCapabilityProbe::from_report(
            report(&["VK_KHR_xlib_surface"], 1),
            SurfacePlatform::Linux,
        );
        assert!(!probe.supported());
    }

    #[test]
    fn platform_extension_is_required() {
        let extensions = ["VK_KHR_surface", "VK_KHR_win32_surface"];
        assert!(surface_extensions_supported(
            SurfacePlatform::Windows,
            extensions.iter().copied()
        ));
        assert!(!surface_extensions_supported(
            SurfacePlatform::Linux,
            extensions.iter().copied()
        ));
        assert!(surface_extensions_supported(
            SurfacePlatform::Other,
            extensions.iter().copied()
        ));
    }

    #[test]
    fn devices_are_required() {
        let extensions = ["VK_KHR_surface", "VK_KHR_android_surface"];
        assert!(DeviceCapabilityProbe::from_report(report(&extensions, 2), SurfacePlatform::Android).supported());
        assert!(!DeviceCapabilityProbe::from_report(report(&extensions, 0), SurfacePlatform::Android).supported());
        assert!(!DeviceCapabilityProbe::from_report(None, SurfacePlatform::Android).supported());
    }
}
