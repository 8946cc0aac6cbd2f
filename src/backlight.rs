//! Backlight management layer contract.
//!
//! A backlight driver hands a [`BacklightOps`] implementation to a
//! [`BacklightManager`], which owns brightness policy and calls back into the
//! driver. [`BacklightClass`] is an in-process manager with the attribute
//! semantics of the Linux backlight class.

use crate::error::BacklightError;

use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Framebuffer blank level, used for both `power` and `fb_blank`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlankState {
    /// Display on.
    #[default]
    Unblank,
    /// Blanked, everything still powered.
    Normal,
    /// Vertical sync off.
    VsyncSuspend,
    /// Horizontal sync off.
    HsyncSuspend,
    /// Display powered down.
    Powerdown,
}

impl BlankState {
    /// Whether the display is lit in this state.
    pub fn is_active(self) -> bool {
        self == BlankState::Unblank
    }

    /// The numeric `FB_BLANK_*` level.
    pub fn level(self) -> u8 {
        match self {
            BlankState::Unblank => 0,
            BlankState::Normal => 1,
            BlankState::VsyncSuspend => 2,
            BlankState::HsyncSuspend => 3,
            BlankState::Powerdown => 4,
        }
    }
}

/// How a backlight device controls brightness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BacklightType {
    /// Direct hardware register access.
    #[default]
    Raw,
    /// Platform-specific interface.
    Platform,
    /// Firmware interface.
    Firmware,
}

/// Properties the manager keeps for each registered device.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BacklightProperties {
    /// Requested brightness.
    pub brightness: u32,
    /// Maximum brightness.
    pub max_brightness: u32,
    /// Power state.
    pub power: BlankState,
    /// Framebuffer blank state.
    pub fb_blank: BlankState,
    /// Device class.
    pub kind: BacklightType,
}

/// Callbacks a backlight driver provides to the manager.
pub trait BacklightOps: Send + Sync {
    /// Read the brightness currently in effect in hardware.
    fn get_brightness(&self) -> u32;

    /// Push the manager's properties to hardware.
    fn update_status(&self, props: &BacklightProperties) -> Result<(), BacklightError>;
}

/// Registration handle returned by [`BacklightManager::register`].
///
/// Not `Clone`: a registration is released exactly once.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct BacklightHandle {
    id: u64,
    name: String,
}

impl BacklightHandle {
    /// Build a handle. Managers call this when they accept a registration.
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }

    /// Manager-assigned ID.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Registered device name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Trait for backlight management layers.
pub trait BacklightManager: Send + Sync {
    /// Register a device. The manager may call `ops` until `unregister` returns.
    fn register(
        &self,
        name: &str,
        parent: &str,
        ops: Arc<dyn BacklightOps>,
        props: BacklightProperties,
    ) -> Result<BacklightHandle, BacklightError>;

    /// Unregister a device. No callback is dispatched after this returns.
    fn unregister(&self, handle: BacklightHandle);
}

// =============================================================================
// BacklightClass
// =============================================================================

struct Registered {
    id: u64,
    parent: String,
    ops: Arc<dyn BacklightOps>,
    props: BacklightProperties,
}

/// In-process backlight manager.
///
/// One lock serializes every attribute access and callback, so a driver sees
/// at most one call at a time.
///
/// # Example
///
/// ```
/// use openframe_bl::{BacklightClass, BlankState};
/// use openframe_bl::mock::{FakePciBus, FakeMapper, Journal};
/// use openframe_bl::{BacklightController, ChipsetConfig};
/// use std::sync::Arc;
///
/// let journal = Journal::new();
/// let class = Arc::new(BacklightClass::new());
/// let controller = BacklightController::attach(
///     "openframe-bl",
///     ChipsetConfig::POULSBO,
///     &FakePciBus::with_bar0(&journal, 0x1000),
///     &FakeMapper::new(&journal),
///     class.clone(),
/// )?;
///
/// class.set_brightness("openframe-bl", 8)?;
/// assert_eq!(class.actual_brightness("openframe-bl")?, 8);
///
/// class.set_fb_blank("openframe-bl", BlankState::Powerdown)?;
/// assert_eq!(class.actual_brightness("openframe-bl")?, 0);
///
/// controller.detach();
/// # Ok::<(), openframe_bl::BacklightError>(())
/// ```
pub struct BacklightClass {
    devices: Mutex<HashMap<String, Registered>>,
    next_id: AtomicU64,
}

impl BacklightClass {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self {
            devices: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Registered>> {
        // Poisoned only if a callback panicked; the map itself is intact.
        self.devices.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn with_device<T>(
        &self,
        name: &str,
        f: impl FnOnce(&mut Registered) -> Result<T, BacklightError>,
    ) -> Result<T, BacklightError> {
        let mut devices = self.lock();
        let dev = devices
            .get_mut(name)
            .ok_or_else(|| BacklightError::UnknownDevice(name.to_string()))?;
        f(dev)
    }

    /// Names of all registered devices, sorted.
    pub fn device_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Parent device name a backlight was registered under.
    pub fn parent(&self, name: &str) -> Result<String, BacklightError> {
        self.with_device(name, |dev| Ok(dev.parent.clone()))
    }

    /// Snapshot of a device's properties.
    pub fn properties(&self, name: &str) -> Result<BacklightProperties, BacklightError> {
        self.with_device(name, |dev| Ok(dev.props.clone()))
    }

    /// Requested brightness.
    pub fn brightness(&self, name: &str) -> Result<u32, BacklightError> {
        self.with_device(name, |dev| Ok(dev.props.brightness))
    }

    /// Maximum brightness.
    pub fn max_brightness(&self, name: &str) -> Result<u32, BacklightError> {
        self.with_device(name, |dev| Ok(dev.props.max_brightness))
    }

    /// Current power state.
    pub fn bl_power(&self, name: &str) -> Result<BlankState, BacklightError> {
        self.with_device(name, |dev| Ok(dev.props.power))
    }

    /// Brightness as read back from the driver.
    pub fn actual_brightness(&self, name: &str) -> Result<u32, BacklightError> {
        self.with_device(name, |dev| Ok(dev.ops.get_brightness()))
    }

    /// Set the requested brightness and push it to the driver.
    pub fn set_brightness(&self, name: &str, value: u32) -> Result<(), BacklightError> {
        self.with_device(name, |dev| {
            if value > dev.props.max_brightness {
                return Err(BacklightError::InvalidBrightness {
                    name: name.to_string(),
                    value,
                    max: dev.props.max_brightness,
                });
            }
            debug!("{}: brightness {} -> {}", name, dev.props.brightness, value);
            dev.props.brightness = value;
            dev.ops.update_status(&dev.props)
        })
    }

    /// Set the power state and push it to the driver.
    pub fn set_power(&self, name: &str, state: BlankState) -> Result<(), BacklightError> {
        self.with_device(name, |dev| {
            debug!("{}: power {:?} -> {:?}", name, dev.props.power, state);
            dev.props.power = state;
            dev.ops.update_status(&dev.props)
        })
    }

    /// Set the framebuffer blank state and push it to the driver.
    pub fn set_fb_blank(&self, name: &str, state: BlankState) -> Result<(), BacklightError> {
        self.with_device(name, |dev| {
            debug!("{}: fb_blank {:?} -> {:?}", name, dev.props.fb_blank, state);
            dev.props.fb_blank = state;
            dev.ops.update_status(&dev.props)
        })
    }
}

impl Default for BacklightClass {
    fn default() -> Self {
        Self::new()
    }
}

impl BacklightManager for BacklightClass {
    fn register(
        &self,
        name: &str,
        parent: &str,
        ops: Arc<dyn BacklightOps>,
        props: BacklightProperties,
    ) -> Result<BacklightHandle, BacklightError> {
        let reject = |reason: String| BacklightError::RegistrationError {
            name: name.to_string(),
            reason,
        };

        if props.max_brightness == 0 {
            return Err(reject("max_brightness is zero".into()));
        }
        if props.brightness > props.max_brightness {
            return Err(reject(format!(
                "brightness {} exceeds max {}",
                props.brightness, props.max_brightness
            )));
        }

        let mut devices = self.lock();
        if devices.contains_key(name) {
            return Err(reject("name already registered".into()));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        info!(
            "registered backlight '{}' (parent {}, max {})",
            name, parent, props.max_brightness
        );
        devices.insert(
            name.to_string(),
            Registered {
                id,
                parent: parent.to_string(),
                ops,
                props,
            },
        );
        Ok(BacklightHandle::new(id, name))
    }

    fn unregister(&self, handle: BacklightHandle) {
        let mut devices = self.lock();
        match devices.get(handle.name()) {
            Some(dev) if dev.id == handle.id() => {
                devices.remove(handle.name());
                info!("unregistered backlight '{}'", handle.name());
            }
            _ => warn!("unregister of unknown backlight '{}'", handle.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[derive(Default)]
    struct Recorder {
        level: AtomicU32,
        updates: AtomicU32,
    }

    impl BacklightOps for Recorder {
        fn get_brightness(&self) -> u32 {
            self.level.load(Ordering::SeqCst)
        }

        fn update_status(&self, props: &BacklightProperties) -> Result<(), BacklightError> {
            let level = if props.power.is_active() && props.fb_blank.is_active() {
                props.brightness
            } else {
                0
            };
            self.level.store(level, Ordering::SeqCst);
            self.updates.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn props(max: u32, brightness: u32) -> BacklightProperties {
        BacklightProperties {
            brightness,
            max_brightness: max,
            kind: BacklightType::Platform,
            ..Default::default()
        }
    }

    #[test]
    fn test_blank_state_levels() {
        assert!(BlankState::Unblank.is_active());
        assert!(!BlankState::Normal.is_active());
        assert!(!BlankState::Powerdown.is_active());
        assert_eq!(BlankState::Powerdown.level(), 4);
        assert_eq!(BlankState::default(), BlankState::Unblank);
    }

    #[test]
    fn test_register_and_query() {
        let class = BacklightClass::new();
        let ops = Arc::new(Recorder::default());
        let handle = class.register("bl", "parent", ops, props(32, 32)).unwrap();

        assert_eq!(handle.name(), "bl");
        assert_eq!(class.device_names(), vec!["bl".to_string()]);
        assert_eq!(class.parent("bl").unwrap(), "parent");
        assert_eq!(class.max_brightness("bl").unwrap(), 32);
        assert_eq!(class.brightness("bl").unwrap(), 32);
        assert_eq!(class.bl_power("bl").unwrap(), BlankState::Unblank);

        class.unregister(handle);
        assert!(class.device_names().is_empty());
        assert!(matches!(
            class.brightness("bl"),
            Err(BacklightError::UnknownDevice(_))
        ));
    }

    #[test]
    fn test_register_rejections() {
        let class = BacklightClass::new();
        let ops: Arc<dyn BacklightOps> = Arc::new(Recorder::default());

        assert!(matches!(
            class.register("bl", "p", ops.clone(), props(0, 0)),
            Err(BacklightError::RegistrationError { .. })
        ));
        assert!(matches!(
            class.register("bl", "p", ops.clone(), props(10, 11)),
            Err(BacklightError::RegistrationError { .. })
        ));

        let _handle = class.register("bl", "p", ops.clone(), props(10, 10)).unwrap();
        assert!(matches!(
            class.register("bl", "p", ops, props(10, 10)),
            Err(BacklightError::RegistrationError { .. })
        ));
    }

    #[test]
    fn test_set_brightness_validates_range() {
        let class = BacklightClass::new();
        let ops = Arc::new(Recorder::default());
        let _handle = class.register("bl", "p", ops.clone(), props(32, 32)).unwrap();

        class.set_brightness("bl", 12).unwrap();
        assert_eq!(class.actual_brightness("bl").unwrap(), 12);

        let err = class.set_brightness("bl", 33).unwrap_err();
        assert!(matches!(
            err,
            BacklightError::InvalidBrightness { value: 33, max: 32, .. }
        ));
        assert_eq!(class.brightness("bl").unwrap(), 12);
        assert_eq!(ops.updates.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_power_and_blank_reach_driver() {
        let class = BacklightClass::new();
        let ops = Arc::new(Recorder::default());
        let _handle = class.register("bl", "p", ops, props(32, 20)).unwrap();

        class.set_brightness("bl", 20).unwrap();
        class.set_power("bl", BlankState::Powerdown).unwrap();
        assert_eq!(class.actual_brightness("bl").unwrap(), 0);

        class.set_power("bl", BlankState::Unblank).unwrap();
        class.set_fb_blank("bl", BlankState::Normal).unwrap();
        assert_eq!(class.actual_brightness("bl").unwrap(), 0);

        class.set_fb_blank("bl", BlankState::Unblank).unwrap();
        assert_eq!(class.actual_brightness("bl").unwrap(), 20);
    }

    #[test]
    fn test_stale_handle_is_ignored() {
        let class = BacklightClass::new();
        let first = class
            .register("bl", "p", Arc::new(Recorder::default()), props(32, 0))
            .unwrap();
        let stale = BacklightHandle::new(first.id(), "bl");
        class.unregister(first);

        let _second = class
            .register("bl", "p", Arc::new(Recorder::default()), props(32, 0))
            .unwrap();
        class.unregister(stale);
        assert_eq!(class.device_names(), vec!["bl".to_string()]);
    }
}
