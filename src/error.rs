//! Error types for the Openframe backlight driver.

/// Errors that can occur while attaching or driving the backlight.
#[derive(Debug, thiserror::Error)]
pub enum BacklightError {
    /// The graphics controller was not found on the PCI bus.
    #[error("Graphics controller {vendor:04x}:{device:04x} not found")]
    DeviceNotFound {
        /// PCI vendor ID searched for.
        vendor: u16,
        /// PCI device ID searched for.
        device: u16,
    },

    /// The brightness register window could not be mapped.
    #[error("Failed to map register window at {addr:#x} ({len} bytes): {source}")]
    MapError {
        /// Physical address of the window.
        addr: u64,
        /// Window length in bytes.
        len: usize,
        /// Underlying cause.
        source: std::io::Error,
    },

    /// The backlight management layer rejected the registration.
    #[error("Backlight registration of '{name}' rejected: {reason}")]
    RegistrationError {
        /// The backlight device name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A brightness value was outside the device's range.
    #[error("Invalid brightness {value} for '{name}' (expected 0-{max})")]
    InvalidBrightness {
        /// The backlight device name.
        name: String,
        /// The invalid value provided.
        value: u32,
        /// Maximum allowed value.
        max: u32,
    },

    /// No backlight device is registered under this name.
    #[error("No backlight device named '{0}'")]
    UnknownDevice(String),

    /// The platform bus rejected a driver or device registration.
    #[error("Platform registration of '{name}' failed: {reason}")]
    PlatformRegistration {
        /// The driver or device name.
        name: String,
        /// Why it failed.
        reason: String,
    },

    /// The platform device already has a controller bound to it.
    #[error("Platform device '{0}' is already bound")]
    AlreadyBound(String),

    /// An I/O error occurred (e.g., reading PCI config space from sysfs).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
