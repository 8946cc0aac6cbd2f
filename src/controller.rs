//! Openframe backlight controller.

use crate::backlight::{
    BacklightHandle, BacklightManager, BacklightOps, BacklightProperties, BacklightType,
    BlankState,
};
use crate::chipset::ChipsetConfig;
use crate::error::BacklightError;
use crate::pci::{PciAddress, PciBus, PciDevice};
use crate::register::{RegisterMapper, RegisterWindow};

use log::{debug, info, trace, warn};
use std::sync::{Arc, RwLock};

/// Name used for the backlight device and the platform driver.
pub const DRIVER_NAME: &str = "openframe-bl";

/// Find the graphics function and map its brightness register.
///
/// If mapping fails the device reference is dropped, and so released, before
/// the error is returned.
///
/// # Errors
///
/// - [`BacklightError::DeviceNotFound`] if no matching PCI function exists
/// - [`BacklightError::MapError`] if the register window cannot be mapped
pub fn map_register(
    chip: &ChipsetConfig,
    bus: &dyn PciBus,
    mapper: &dyn RegisterMapper,
) -> Result<(Box<dyn PciDevice>, Box<dyn RegisterWindow>), BacklightError> {
    let device = bus
        .find_device(chip.vendor_id, chip.device_id)?
        .ok_or_else(|| {
            warn!(
                "graphics controller {:04x}:{:04x} not found",
                chip.vendor_id, chip.device_id
            );
            BacklightError::DeviceNotFound {
                vendor: chip.vendor_id,
                device: chip.device_id,
            }
        })?;

    let base = device.read_config_dword(chip.base_config_offset)?;
    let addr = chip.register_address(base);
    debug!(
        "{}: base {:#x}, brightness register at {:#x}",
        device.address(),
        base,
        addr
    );

    let window = mapper.map(addr, chip.window_len)?;
    Ok((device, window))
}

// =============================================================================
// OpenframeBacklight
// =============================================================================

/// Brightness get/set on a mapped register.
///
/// This is what the management layer calls back into. After
/// [`OpenframeBacklight::unmap`] reads return 0 and writes are dropped.
#[derive(Debug)]
pub struct OpenframeBacklight {
    chip: ChipsetConfig,
    phys_addr: u64,
    window: RwLock<Option<Box<dyn RegisterWindow>>>,
}

impl OpenframeBacklight {
    /// Wrap a mapped brightness register.
    pub fn new(chip: ChipsetConfig, window: Box<dyn RegisterWindow>) -> Self {
        Self {
            chip,
            phys_addr: window.phys_addr(),
            window: RwLock::new(Some(window)),
        }
    }

    /// The register layout in use.
    pub fn chipset(&self) -> &ChipsetConfig {
        &self.chip
    }

    /// Physical address of the register.
    pub fn phys_addr(&self) -> u64 {
        self.phys_addr
    }

    /// Whether the register is still mapped.
    pub fn is_mapped(&self) -> bool {
        self.window
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Unmap the register now, whoever else still holds this value.
    pub fn unmap(&self) {
        let window = self.window.write().unwrap_or_else(|e| e.into_inner()).take();
        drop(window);
    }

    /// Raw register contents.
    pub fn read_raw(&self) -> u32 {
        match self.window.read().unwrap_or_else(|e| e.into_inner()).as_ref() {
            Some(window) => window.read(),
            None => {
                warn!("read of unmapped register {:#x}", self.phys_addr);
                0
            }
        }
    }

    /// Write a brightness, forced to zero unless both states are active.
    pub fn set_intensity(&self, requested: u32, power: BlankState, blank: BlankState) {
        let effective = if power.is_active() && blank.is_active() {
            self.chip.clamp(requested)
        } else {
            0
        };
        let value = self.chip.encode(effective);
        trace!(
            "set_intensity: requested={}, power={:?}, blank={:?} -> {:#x}",
            requested, power, blank, value
        );
        match self.window.read().unwrap_or_else(|e| e.into_inner()).as_ref() {
            Some(window) => window.write(value),
            None => warn!("write to unmapped register {:#x} dropped", self.phys_addr),
        }
    }

    /// Read back the brightness field.
    pub fn get_intensity(&self) -> u32 {
        self.chip.decode(self.read_raw())
    }
}

impl BacklightOps for OpenframeBacklight {
    fn get_brightness(&self) -> u32 {
        self.get_intensity()
    }

    fn update_status(&self, props: &BacklightProperties) -> Result<(), BacklightError> {
        self.set_intensity(props.brightness, props.power, props.fb_blank);
        Ok(())
    }
}

// =============================================================================
// BacklightController
// =============================================================================

/// An attached Openframe backlight.
///
/// A value of this type exists only while the hardware is attached: it is
/// created by [`BacklightController::attach`] and torn down by
/// [`BacklightController::detach`] or drop.
///
/// # Example
///
/// ```
/// use openframe_bl::mock::{FakeMapper, FakePciBus, Journal, MockManager};
/// use openframe_bl::{BacklightController, BlankState, ChipsetConfig};
/// use std::sync::Arc;
///
/// let journal = Journal::new();
/// let controller = BacklightController::attach(
///     "openframe-bl",
///     ChipsetConfig::POULSBO,
///     &FakePciBus::with_bar0(&journal, 0x1000),
///     &FakeMapper::new(&journal),
///     Arc::new(MockManager::new(&journal)),
/// )?;
/// assert_eq!(controller.phys_addr(), 0x62254);
/// assert_eq!(controller.get_intensity(), 32);
///
/// controller.set_intensity(8, BlankState::Unblank, BlankState::Unblank);
/// assert_eq!(controller.get_intensity(), 8);
/// controller.detach();
/// # Ok::<(), openframe_bl::BacklightError>(())
/// ```
pub struct BacklightController {
    handle: Option<BacklightHandle>,
    manager: Arc<dyn BacklightManager>,
    backlight: Arc<OpenframeBacklight>,
    device: Box<dyn PciDevice>,
}

impl BacklightController {
    /// Discover, map, register, and apply the initial brightness.
    ///
    /// Every failure rolls back what was acquired before it.
    ///
    /// # Errors
    ///
    /// - [`BacklightError::DeviceNotFound`] if the graphics controller is absent
    /// - [`BacklightError::MapError`] if the register window cannot be mapped
    /// - [`BacklightError::RegistrationError`] if the manager rejects the device
    /// - [`BacklightError::Io`] if config space cannot be read
    pub fn attach(
        parent: &str,
        chip: ChipsetConfig,
        bus: &dyn PciBus,
        mapper: &dyn RegisterMapper,
        manager: Arc<dyn BacklightManager>,
    ) -> Result<Self, BacklightError> {
        let (device, window) = map_register(&chip, bus, mapper)?;

        if !chip.decode_mask_covers_range() {
            warn!(
                "decode mask {:#x} does not cover 0-{}; some levels will not read back",
                chip.decode_mask, chip.max_brightness
            );
        }

        let backlight = Arc::new(OpenframeBacklight::new(chip, window));
        let props = BacklightProperties {
            brightness: chip.max_brightness,
            max_brightness: chip.max_brightness,
            power: BlankState::Unblank,
            fb_blank: BlankState::Unblank,
            kind: BacklightType::Platform,
        };

        let handle = manager.register(DRIVER_NAME, parent, backlight.clone(), props.clone())?;
        let controller = Self {
            handle: Some(handle),
            manager,
            backlight,
            device,
        };
        controller.backlight.update_status(&props)?;

        info!(
            "{} attached to {} (register {:#x})",
            DRIVER_NAME,
            controller.address(),
            controller.phys_addr()
        );
        Ok(controller)
    }

    /// Tear down: unregister, unmap, release.
    pub fn detach(self) {
        info!("{} detaching from {}", DRIVER_NAME, self.device.address());
    }

    /// PCI address of the graphics function.
    pub fn address(&self) -> PciAddress {
        self.device.address()
    }

    /// Physical address of the brightness register.
    pub fn phys_addr(&self) -> u64 {
        self.backlight.phys_addr()
    }

    /// See [`OpenframeBacklight::set_intensity`].
    pub fn set_intensity(&self, requested: u32, power: BlankState, blank: BlankState) {
        self.backlight.set_intensity(requested, power, blank);
    }

    /// See [`OpenframeBacklight::get_intensity`].
    pub fn get_intensity(&self) -> u32 {
        self.backlight.get_intensity()
    }
}

impl Drop for BacklightController {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.manager.unregister(handle);
        }
        self.backlight.unmap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{FakeMapper, FakePciBus, Journal, MockEvent, MockManager};
    use crate::pci::SysfsPciBus;

    fn attach(journal: &Journal, manager: Arc<MockManager>) -> BacklightController {
        BacklightController::attach(
            "openframe-bl",
            ChipsetConfig::POULSBO,
            &FakePciBus::with_bar0(journal, 0x1000),
            &FakeMapper::new(journal),
            manager,
        )
        .unwrap()
    }

    #[test]
    fn test_attach_sequence() {
        let journal = Journal::new();
        let manager = Arc::new(MockManager::new(&journal));
        let controller = attach(&journal, manager.clone());

        assert_eq!(
            journal.events(),
            vec![
                MockEvent::DeviceAcquired,
                MockEvent::ConfigRead(0x10),
                MockEvent::Mapped(0x62254),
                MockEvent::Registered(DRIVER_NAME.to_string()),
                MockEvent::RegisterWrite(0x400040),
            ]
        );

        let props = manager.properties(DRIVER_NAME).unwrap();
        assert_eq!(props.max_brightness, 32);
        assert_eq!(props.brightness, 32);
        assert_eq!(props.power, BlankState::Unblank);
        assert_eq!(props.kind, BacklightType::Platform);
        assert_eq!(manager.parent(DRIVER_NAME).as_deref(), Some("openframe-bl"));

        drop(controller);
    }

    #[test]
    fn test_device_not_found_has_no_side_effects() {
        let journal = Journal::new();
        let manager = Arc::new(MockManager::new(&journal));
        let result = BacklightController::attach(
            "openframe-bl",
            ChipsetConfig::POULSBO,
            &FakePciBus::empty(&journal),
            &FakeMapper::new(&journal),
            manager,
        );

        assert!(matches!(
            result,
            Err(BacklightError::DeviceNotFound {
                vendor: 0x8086,
                device: 0x8108
            })
        ));
        assert!(journal.events().is_empty());
    }

    #[test]
    fn test_map_failure_releases_device() {
        let journal = Journal::new();
        let result = BacklightController::attach(
            "openframe-bl",
            ChipsetConfig::POULSBO,
            &FakePciBus::with_bar0(&journal, 0x1000),
            &FakeMapper::failing(&journal),
            Arc::new(MockManager::new(&journal)),
        );

        assert!(matches!(
            result,
            Err(BacklightError::MapError { addr: 0x62254, len: 4, .. })
        ));
        assert_eq!(
            journal.events(),
            vec![
                MockEvent::DeviceAcquired,
                MockEvent::ConfigRead(0x10),
                MockEvent::DeviceReleased,
            ]
        );
    }

    #[test]
    fn test_registration_failure_rolls_back_once() {
        let journal = Journal::new();
        let result = BacklightController::attach(
            "openframe-bl",
            ChipsetConfig::POULSBO,
            &FakePciBus::with_bar0(&journal, 0x1000),
            &FakeMapper::new(&journal),
            Arc::new(MockManager::rejecting(&journal, "no backlight class")),
        );

        assert!(matches!(
            result,
            Err(BacklightError::RegistrationError { .. })
        ));
        assert_eq!(
            journal.events(),
            vec![
                MockEvent::DeviceAcquired,
                MockEvent::ConfigRead(0x10),
                MockEvent::Mapped(0x62254),
                MockEvent::Unmapped(0x62254),
                MockEvent::DeviceReleased,
            ]
        );
        assert_eq!(journal.count(|e| matches!(e, MockEvent::Unmapped(_))), 1);
    }

    #[test]
    fn test_detach_order_right_after_attach() {
        let journal = Journal::new();
        let controller = attach(&journal, Arc::new(MockManager::new(&journal)));
        journal.clear();

        controller.detach();
        assert_eq!(
            journal.events(),
            vec![
                MockEvent::Unregistered(DRIVER_NAME.to_string()),
                MockEvent::Unmapped(0x62254),
                MockEvent::DeviceReleased,
            ]
        );
    }

    #[test]
    fn test_set_intensity_gating() {
        let journal = Journal::new();
        let controller = attach(&journal, Arc::new(MockManager::new(&journal)));

        controller.set_intensity(32, BlankState::Powerdown, BlankState::Unblank);
        assert_eq!(journal.last_write(), Some(0x400000));
        assert_eq!(controller.get_intensity(), 0);

        controller.set_intensity(20, BlankState::Unblank, BlankState::Normal);
        assert_eq!(journal.last_write(), Some(0x400000));

        controller.set_intensity(12, BlankState::Unblank, BlankState::Unblank);
        assert_eq!(journal.last_write(), Some((12 << 1) | 0x400000));
        assert_eq!(controller.get_intensity(), 12);
    }

    #[test]
    fn test_set_intensity_clamps_and_is_idempotent() {
        let journal = Journal::new();
        let controller = attach(&journal, Arc::new(MockManager::new(&journal)));

        controller.set_intensity(500, BlankState::Unblank, BlankState::Unblank);
        let first = journal.last_write();
        controller.set_intensity(500, BlankState::Unblank, BlankState::Unblank);
        assert_eq!(journal.last_write(), first);
        assert_eq!(first, Some(0x400040));
    }

    #[test]
    fn test_manager_callbacks_drive_register() {
        let journal = Journal::new();
        let manager = Arc::new(MockManager::new(&journal));
        let _controller = attach(&journal, manager.clone());

        let props = BacklightProperties {
            brightness: 5,
            max_brightness: 32,
            ..Default::default()
        };
        manager.update_status(DRIVER_NAME, &props).unwrap();
        assert_eq!(manager.get_brightness(DRIVER_NAME), Some(5));

        let blanked = BacklightProperties {
            fb_blank: BlankState::Powerdown,
            ..props
        };
        manager.update_status(DRIVER_NAME, &blanked).unwrap();
        assert_eq!(manager.get_brightness(DRIVER_NAME), Some(0));
    }

    #[test]
    fn test_get_intensity_decodes_raw_register() {
        let journal = Journal::new();
        let (_device, window) = map_register(
            &ChipsetConfig::POULSBO,
            &FakePciBus::with_bar0(&journal, 0x1000),
            &FakeMapper::with_initial(&journal, 0x400040),
        )
        .unwrap();
        let backlight = OpenframeBacklight::new(ChipsetConfig::POULSBO, window);

        assert_eq!(backlight.read_raw(), 0x400040);
        assert_eq!(backlight.get_intensity(), 32);
    }

    #[test]
    fn test_detach_unmaps_even_if_manager_keeps_ops() {
        let journal = Journal::new();
        let manager = Arc::new(MockManager::retaining_ops(&journal));
        let controller = attach(&journal, manager.clone());
        journal.clear();

        controller.detach();
        assert_eq!(
            journal.events(),
            vec![
                MockEvent::Unregistered(DRIVER_NAME.to_string()),
                MockEvent::Unmapped(0x62254),
                MockEvent::DeviceReleased,
            ]
        );

        let stale = manager.retained_ops();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].get_brightness(), 0);
        stale[0]
            .update_status(&BacklightProperties {
                brightness: 10,
                max_brightness: 32,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(journal.last_write(), None);
    }

    #[test]
    fn test_missing_pci_tree_is_device_not_found() {
        let journal = Journal::new();
        let result = BacklightController::attach(
            "openframe-bl",
            ChipsetConfig::POULSBO,
            &SysfsPciBus::with_root("/nonexistent/openframe-bl/pci"),
            &FakeMapper::new(&journal),
            Arc::new(MockManager::new(&journal)),
        );

        assert!(matches!(
            result,
            Err(BacklightError::DeviceNotFound { .. })
        ));
        assert!(journal.events().is_empty());
    }
}
