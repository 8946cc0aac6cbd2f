//! Backlight driver for Openframe devices.
//!
//! Openframe devices drive their LCD backlight through a single register of
//! the Intel SCH Poulsbo graphics controller. This crate finds that
//! controller on the PCI bus, maps the register, and exposes brightness
//! get/set to a backlight management layer.
//!
//! # Requirements
//!
//! - Linux with sysfs (for PCI discovery)
//! - Read/write access to `/dev/mem` (usually root)
//! - An Intel SCH Poulsbo graphics controller (`8086:8108`)
//!
//! # Example
//!
//! ```no_run
//! use openframe_bl::{
//!     BacklightClass, BlankState, DevMemMapper, OpenframeDriver, OpenframeModule,
//!     SimplePlatformBus, SysfsPciBus,
//! };
//! use std::sync::Arc;
//!
//! fn main() -> Result<(), openframe_bl::BacklightError> {
//!     let class = Arc::new(BacklightClass::new());
//!     let driver = Arc::new(OpenframeDriver::new(
//!         Arc::new(SysfsPciBus::new()),
//!         Arc::new(DevMemMapper::new()),
//!         class.clone(),
//!     ));
//!
//!     // Registers the driver and its platform device, which attaches the hardware
//!     let module = OpenframeModule::init(Arc::new(SimplePlatformBus::new()), driver)?;
//!
//!     class.set_brightness("openframe-bl", 16)?;
//!     class.set_power("openframe-bl", BlankState::Powerdown)?;
//!
//!     module.exit();
//!     Ok(())
//! }
//! ```
//!
//! # Testing
//!
//! The [`mock`] module has fake PCI, register, and manager implementations:
//!
//! ```
//! use openframe_bl::mock::{FakeMapper, FakePciBus, Journal, MockManager};
//! use openframe_bl::{BacklightController, BlankState, ChipsetConfig};
//! use std::sync::Arc;
//!
//! let journal = Journal::new();
//! let controller = BacklightController::attach(
//!     "openframe-bl",
//!     ChipsetConfig::POULSBO,
//!     &FakePciBus::with_bar0(&journal, 0x1000),
//!     &FakeMapper::new(&journal),
//!     Arc::new(MockManager::new(&journal)),
//! )
//! .unwrap();
//! controller.set_intensity(32, BlankState::Unblank, BlankState::Unblank);
//! assert_eq!(journal.last_write(), Some(0x400040));
//! ```

#![warn(missing_docs)]

mod backlight;
mod chipset;
mod controller;
mod error;
pub mod mock;
mod pci;
mod platform;
mod register;

// Re-export public API
pub use backlight::{
    BacklightClass, BacklightHandle, BacklightManager, BacklightOps, BacklightProperties,
    BacklightType, BlankState,
};
pub use chipset::{ChipsetConfig, PCI_VENDOR_ID_INTEL, POULSBO_GFX_DEVICE_ID};
pub use controller::{BacklightController, DRIVER_NAME, OpenframeBacklight, map_register};
pub use error::BacklightError;
pub use pci::{PciAddress, PciBus, PciDevice, SysfsPciBus, SysfsPciDevice};
pub use platform::{
    OpenframeDriver, OpenframeModule, PLATFORM_DEVID_NONE, PlatformBus, PlatformDevice,
    PlatformDriver, SimplePlatformBus,
};
pub use register::{DevMemMapper, DevMemWindow, RegisterMapper, RegisterWindow};
