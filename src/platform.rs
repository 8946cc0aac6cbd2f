//! Platform device lifecycle.
//!
//! The Openframe backlight has no firmware description, so the driver
//! registers itself and a synthetic platform device of the same name; the bus
//! then matches the two and probes.

use crate::backlight::BacklightManager;
use crate::chipset::ChipsetConfig;
use crate::controller::{BacklightController, DRIVER_NAME};
use crate::error::BacklightError;
use crate::pci::PciBus;
use crate::register::RegisterMapper;

use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Device ID meaning "the only device of this name".
pub const PLATFORM_DEVID_NONE: i32 = -1;

/// A registered platform device.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PlatformDevice {
    name: String,
    id: i32,
}

impl PlatformDevice {
    /// Describe a device. Only [`PlatformBus`] implementations create these.
    pub fn new(name: impl Into<String>, id: i32) -> Self {
        Self {
            name: name.into(),
            id,
        }
    }

    /// Name used for driver matching.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Instance ID.
    pub fn id(&self) -> i32 {
        self.id
    }

    /// Unique device name: `name` alone, or `name.id`.
    pub fn dev_name(&self) -> String {
        if self.id == PLATFORM_DEVID_NONE {
            self.name.clone()
        } else {
            format!("{}.{}", self.name, self.id)
        }
    }
}

/// Trait for platform drivers.
pub trait PlatformDriver: Send + Sync {
    /// Name matched against device names.
    fn name(&self) -> &str;

    /// Bind to a device.
    fn probe(&self, device: &PlatformDevice) -> Result<(), BacklightError>;

    /// Unbind from a device.
    fn remove(&self, device: &PlatformDevice) -> Result<(), BacklightError>;
}

/// Trait for platform bus implementations.
pub trait PlatformBus: Send + Sync {
    /// Register a driver and probe matching devices.
    fn register_driver(&self, driver: Arc<dyn PlatformDriver>) -> Result<(), BacklightError>;

    /// Remove bound devices from a driver and unregister it.
    fn unregister_driver(&self, name: &str);

    /// Register a resource-less device and probe a matching driver.
    fn register_device_simple(&self, name: &str, id: i32)
    -> Result<PlatformDevice, BacklightError>;

    /// Remove a device from its driver and unregister it.
    fn unregister_device(&self, device: &PlatformDevice);
}

// =============================================================================
// SimplePlatformBus
// =============================================================================

struct DeviceSlot {
    device: PlatformDevice,
    bound: bool,
}

#[derive(Default)]
struct BusState {
    drivers: HashMap<String, Arc<dyn PlatformDriver>>,
    devices: Vec<DeviceSlot>,
}

/// In-process platform bus.
///
/// Probe and remove run under the bus lock, so they never overlap.
#[derive(Default)]
pub struct SimplePlatformBus {
    state: Mutex<BusState>,
}

fn probe_slot(driver: &dyn PlatformDriver, slot: &mut DeviceSlot) {
    match driver.probe(&slot.device) {
        Ok(()) => {
            debug!("{}: bound to {}", slot.device.dev_name(), driver.name());
            slot.bound = true;
        }
        Err(e) => warn!(
            "{}: probe by {} failed: {}",
            slot.device.dev_name(),
            driver.name(),
            e
        ),
    }
}

fn remove_slot(driver: &dyn PlatformDriver, slot: &mut DeviceSlot) {
    if let Err(e) = driver.remove(&slot.device) {
        error!("{}: remove failed: {}", slot.device.dev_name(), e);
    }
    slot.bound = false;
}

impl SimplePlatformBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether a driver is bound to the device.
    pub fn is_bound(&self, device: &PlatformDevice) -> bool {
        self.lock()
            .devices
            .iter()
            .any(|slot| slot.device == *device && slot.bound)
    }

    /// All registered devices, in registration order.
    pub fn devices(&self) -> Vec<PlatformDevice> {
        self.lock()
            .devices
            .iter()
            .map(|slot| slot.device.clone())
            .collect()
    }

    /// Names of all registered drivers, sorted.
    pub fn drivers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().drivers.keys().cloned().collect();
        names.sort();
        names
    }
}

impl PlatformBus for SimplePlatformBus {
    fn register_driver(&self, driver: Arc<dyn PlatformDriver>) -> Result<(), BacklightError> {
        let mut state = self.lock();
        let name = driver.name().to_string();
        if state.drivers.contains_key(&name) {
            return Err(BacklightError::PlatformRegistration {
                name,
                reason: "driver already registered".into(),
            });
        }

        for slot in state.devices.iter_mut() {
            if !slot.bound && slot.device.name() == name {
                probe_slot(driver.as_ref(), slot);
            }
        }
        info!("registered platform driver {}", name);
        state.drivers.insert(name, driver);
        Ok(())
    }

    fn unregister_driver(&self, name: &str) {
        let mut state = self.lock();
        let Some(driver) = state.drivers.remove(name) else {
            warn!("unregister of unknown platform driver {}", name);
            return;
        };

        for slot in state.devices.iter_mut() {
            if slot.bound && slot.device.name() == name {
                remove_slot(driver.as_ref(), slot);
            }
        }
        info!("unregistered platform driver {}", name);
    }

    fn register_device_simple(
        &self,
        name: &str,
        id: i32,
    ) -> Result<PlatformDevice, BacklightError> {
        let mut state = self.lock();
        let device = PlatformDevice::new(name, id);
        if state.devices.iter().any(|slot| slot.device == device) {
            return Err(BacklightError::PlatformRegistration {
                name: device.dev_name(),
                reason: "device already registered".into(),
            });
        }

        let mut slot = DeviceSlot {
            device: device.clone(),
            bound: false,
        };
        if let Some(driver) = state.drivers.get(name) {
            probe_slot(driver.as_ref(), &mut slot);
        }
        debug!("registered platform device {}", device.dev_name());
        state.devices.push(slot);
        Ok(device)
    }

    fn unregister_device(&self, device: &PlatformDevice) {
        let mut state = self.lock();
        let Some(pos) = state.devices.iter().position(|slot| slot.device == *device) else {
            warn!("unregister of unknown platform device {}", device.dev_name());
            return;
        };

        let mut slot = state.devices.remove(pos);
        if slot.bound {
            if let Some(driver) = state.drivers.get(device.name()) {
                remove_slot(driver.as_ref(), &mut slot);
            }
        }
        debug!("unregistered platform device {}", device.dev_name());
    }
}

// =============================================================================
// OpenframeDriver
// =============================================================================

/// The Openframe backlight platform driver.
///
/// Holds the collaborators each probe needs and one controller per bound
/// device.
pub struct OpenframeDriver {
    chip: ChipsetConfig,
    pci: Arc<dyn PciBus>,
    mapper: Arc<dyn RegisterMapper>,
    manager: Arc<dyn BacklightManager>,
    bound: Mutex<HashMap<String, BacklightController>>,
}

impl OpenframeDriver {
    /// Create the driver for the Poulsbo chipset.
    pub fn new(
        pci: Arc<dyn PciBus>,
        mapper: Arc<dyn RegisterMapper>,
        manager: Arc<dyn BacklightManager>,
    ) -> Self {
        Self::with_chipset(ChipsetConfig::POULSBO, pci, mapper, manager)
    }

    /// Create the driver for another register layout.
    pub fn with_chipset(
        chip: ChipsetConfig,
        pci: Arc<dyn PciBus>,
        mapper: Arc<dyn RegisterMapper>,
        manager: Arc<dyn BacklightManager>,
    ) -> Self {
        Self {
            chip,
            pci,
            mapper,
            manager,
            bound: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, BacklightController>> {
        self.bound.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Device names with an attached controller, sorted.
    pub fn bound_devices(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Current hardware brightness of a bound device.
    pub fn intensity(&self, dev_name: &str) -> Option<u32> {
        self.lock().get(dev_name).map(|c| c.get_intensity())
    }
}

impl PlatformDriver for OpenframeDriver {
    fn name(&self) -> &str {
        DRIVER_NAME
    }

    fn probe(&self, device: &PlatformDevice) -> Result<(), BacklightError> {
        let dev_name = device.dev_name();
        let mut bound = self.lock();
        if bound.contains_key(&dev_name) {
            return Err(BacklightError::AlreadyBound(dev_name));
        }

        let controller = BacklightController::attach(
            &dev_name,
            self.chip,
            self.pci.as_ref(),
            self.mapper.as_ref(),
            self.manager.clone(),
        )?;
        bound.insert(dev_name, controller);
        Ok(())
    }

    fn remove(&self, device: &PlatformDevice) -> Result<(), BacklightError> {
        match self.lock().remove(&device.dev_name()) {
            Some(controller) => controller.detach(),
            None => warn!("{}: remove without a bound controller", device.dev_name()),
        }
        Ok(())
    }
}

// =============================================================================
// OpenframeModule
// =============================================================================

/// A loaded driver plus its synthetic platform device.
///
/// Unloads on [`OpenframeModule::exit`] or drop.
pub struct OpenframeModule {
    bus: Arc<dyn PlatformBus>,
    driver_name: String,
    device: Option<PlatformDevice>,
}

impl OpenframeModule {
    /// Register the driver, then the device that triggers its probe.
    ///
    /// A probe failure does not fail loading; the device just stays unbound.
    ///
    /// # Errors
    ///
    /// [`BacklightError::PlatformRegistration`] if either registration is
    /// refused. The driver is unregistered again if the device is refused.
    pub fn init(
        bus: Arc<dyn PlatformBus>,
        driver: Arc<dyn PlatformDriver>,
    ) -> Result<Self, BacklightError> {
        let driver_name = driver.name().to_string();
        bus.register_driver(driver)?;

        let device = match bus.register_device_simple(&driver_name, PLATFORM_DEVID_NONE) {
            Ok(device) => device,
            Err(e) => {
                bus.unregister_driver(&driver_name);
                return Err(e);
            }
        };

        Ok(Self {
            bus,
            driver_name,
            device: Some(device),
        })
    }

    /// The synthetic device.
    pub fn device(&self) -> Option<&PlatformDevice> {
        self.device.as_ref()
    }

    /// Unregister the device, then the driver.
    pub fn exit(self) {}
}

impl Drop for OpenframeModule {
    fn drop(&mut self) {
        if let Some(device) = self.device.take() {
            self.bus.unregister_device(&device);
            self.bus.unregister_driver(&self.driver_name);
        }
    }
}
