//! PCI discovery and config space access.

use crate::error::BacklightError;

use log::{debug, trace, warn};
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

const SYSFS_PCI_DEVICES: &str = "/sys/bus/pci/devices";

/// A PCI function address (`domain:bus:device.function`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PciAddress {
    /// PCI segment.
    pub domain: u16,
    /// Bus number.
    pub bus: u8,
    /// Device (slot) number.
    pub device: u8,
    /// Function number.
    pub function: u8,
}

impl PciAddress {
    /// Parse a sysfs-style address such as `0000:00:02.0`.
    pub fn parse(s: &str) -> Option<Self> {
        let (domain, rest) = s.split_once(':')?;
        let (bus, rest) = rest.split_once(':')?;
        let (device, function) = rest.split_once('.')?;
        Some(Self {
            domain: u16::from_str_radix(domain, 16).ok()?,
            bus: u8::from_str_radix(bus, 16).ok()?,
            device: u8::from_str_radix(device, 16).ok()?,
            function: u8::from_str_radix(function, 16).ok()?,
        })
    }
}

impl fmt::Display for PciAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:02x}:{:02x}.{:x}",
            self.domain, self.bus, self.device, self.function
        )
    }
}

/// A referenced PCI device.
///
/// Dropping the value releases the reference.
pub trait PciDevice: fmt::Debug + Send + Sync {
    /// The function's bus address.
    fn address(&self) -> PciAddress;

    /// Read a little-endian dword from config space.
    fn read_config_dword(&self, offset: u16) -> Result<u32, BacklightError>;
}

/// Trait for PCI bus implementations.
///
/// This allows for fake buses in tests.
pub trait PciBus: Send + Sync {
    /// Find the first device matching a vendor/device ID pair.
    fn find_device(
        &self,
        vendor: u16,
        device: u16,
    ) -> Result<Option<Box<dyn PciDevice>>, BacklightError>;
}

// =============================================================================
// Sysfs backend
// =============================================================================

/// PCI bus view backed by `/sys/bus/pci/devices`.
#[derive(Debug, Clone)]
pub struct SysfsPciBus {
    root: PathBuf,
}

impl SysfsPciBus {
    /// Use the system's sysfs.
    pub fn new() -> Self {
        Self::with_root(SYSFS_PCI_DEVICES)
    }

    /// Use an alternative devices directory (laid out like sysfs).
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Default for SysfsPciBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Read a sysfs ID attribute such as `0x8086\n`.
fn read_id(path: &Path) -> Option<u16> {
    let contents = fs::read_to_string(path).ok()?;
    let trimmed = contents.trim();
    let hex = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    u16::from_str_radix(hex, 16).ok()
}

impl PciBus for SysfsPciBus {
    fn find_device(
        &self,
        vendor: u16,
        device: u16,
    ) -> Result<Option<Box<dyn PciDevice>>, BacklightError> {
        let dir = match fs::read_dir(&self.root) {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("pci: {} does not exist", self.root.display());
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let mut entries: Vec<PathBuf> = dir.flatten().map(|entry| entry.path()).collect();
        entries.sort();

        for path in entries {
            let ids = (read_id(&path.join("vendor")), read_id(&path.join("device")));
            trace!("pci: {} -> {:x?}", path.display(), ids);
            if ids != (Some(vendor), Some(device)) {
                continue;
            }

            let Some(address) = path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(PciAddress::parse)
            else {
                warn!("pci: skipping {}, not a PCI address", path.display());
                continue;
            };
            debug!("pci: found {:04x}:{:04x} at {}", vendor, device, address);
            return Ok(Some(Box::new(SysfsPciDevice { path, address })));
        }

        Ok(None)
    }
}

/// A PCI function found through sysfs.
#[derive(Debug)]
pub struct SysfsPciDevice {
    path: PathBuf,
    address: PciAddress,
}

impl PciDevice for SysfsPciDevice {
    fn address(&self) -> PciAddress {
        self.address
    }

    fn read_config_dword(&self, offset: u16) -> Result<u32, BacklightError> {
        let config = fs::File::open(self.path.join("config"))?;
        let mut buf = [0u8; 4];
        config.read_exact_at(&mut buf, u64::from(offset))?;
        Ok(u32::from_le_bytes(buf))
    }
}
