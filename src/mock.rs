//! Fake collaborators for testing.
//!
//! These allow exercising [`BacklightController`](crate::BacklightController)
//! without the graphics hardware or a host backlight layer. Every fake writes
//! what happens to it into a shared [`Journal`], so tests can check the exact
//! order of acquire and release steps.

use crate::backlight::{BacklightHandle, BacklightManager, BacklightOps, BacklightProperties};
use crate::error::BacklightError;
use crate::pci::{PciAddress, PciBus, PciDevice};
use crate::register::{RegisterMapper, RegisterWindow};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Something a fake observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEvent {
    /// A PCI device reference was handed out.
    DeviceAcquired,
    /// A PCI device reference was dropped.
    DeviceReleased,
    /// Config space was read at this offset.
    ConfigRead(u16),
    /// A register window was mapped at this address.
    Mapped(u64),
    /// A register window at this address was dropped.
    Unmapped(u64),
    /// A value was written to a register window.
    RegisterWrite(u32),
    /// A backlight was registered under this name.
    Registered(String),
    /// A backlight was unregistered.
    Unregistered(String),
}

/// Shared, ordered event log.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    events: Arc<Mutex<Vec<MockEvent>>>,
}

impl Journal {
    /// Create an empty journal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event.
    pub fn record(&self, event: MockEvent) {
        self.events.lock().unwrap().push(event);
    }

    /// All events so far, oldest first.
    pub fn events(&self) -> Vec<MockEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Number of events matching a predicate.
    pub fn count(&self, pred: impl Fn(&MockEvent) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| pred(e)).count()
    }

    /// The most recent register write.
    pub fn last_write(&self) -> Option<u32> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find_map(|e| match e {
                MockEvent::RegisterWrite(v) => Some(*v),
                _ => None,
            })
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

// =============================================================================
// PCI
// =============================================================================

/// A PCI bus holding at most one graphics function.
pub struct FakePciBus {
    journal: Journal,
    bar0: Option<u32>,
}

impl FakePciBus {
    /// A bus whose graphics function reports `bar0` at config offset `0x10`.
    pub fn with_bar0(journal: &Journal, bar0: u32) -> Self {
        Self {
            journal: journal.clone(),
            bar0: Some(bar0),
        }
    }

    /// A bus with nothing on it.
    pub fn empty(journal: &Journal) -> Self {
        Self {
            journal: journal.clone(),
            bar0: None,
        }
    }
}

impl PciBus for FakePciBus {
    fn find_device(
        &self,
        _vendor: u16,
        _device: u16,
    ) -> Result<Option<Box<dyn PciDevice>>, BacklightError> {
        let Some(bar0) = self.bar0 else {
            return Ok(None);
        };
        self.journal.record(MockEvent::DeviceAcquired);
        Ok(Some(Box::new(FakePciDevice {
            journal: self.journal.clone(),
            bar0,
        })))
    }
}

/// Device handed out by [`FakePciBus`], always at `0000:00:02.0`.
#[derive(Debug)]
pub struct FakePciDevice {
    journal: Journal,
    bar0: u32,
}

impl PciDevice for FakePciDevice {
    fn address(&self) -> PciAddress {
        PciAddress {
            domain: 0,
            bus: 0,
            device: 2,
            function: 0,
        }
    }

    fn read_config_dword(&self, offset: u16) -> Result<u32, BacklightError> {
        self.journal.record(MockEvent::ConfigRead(offset));
        Ok(if offset == 0x10 { self.bar0 } else { 0 })
    }
}

impl Drop for FakePciDevice {
    fn drop(&mut self) {
        self.journal.record(MockEvent::DeviceReleased);
    }
}

// =============================================================================
// Registers
// =============================================================================

/// Maps in-memory registers.
pub struct FakeMapper {
    journal: Journal,
    initial: u32,
    fail: bool,
}

impl FakeMapper {
    /// Windows start out zeroed.
    pub fn new(journal: &Journal) -> Self {
        Self::with_initial(journal, 0)
    }

    /// Windows start out holding `initial`.
    pub fn with_initial(journal: &Journal, initial: u32) -> Self {
        Self {
            journal: journal.clone(),
            initial,
            fail: false,
        }
    }

    /// Every map attempt fails.
    pub fn failing(journal: &Journal) -> Self {
        Self {
            journal: journal.clone(),
            initial: 0,
            fail: true,
        }
    }
}

impl RegisterMapper for FakeMapper {
    fn map(&self, phys_addr: u64, len: usize) -> Result<Box<dyn RegisterWindow>, BacklightError> {
        if self.fail {
            return Err(BacklightError::MapError {
                addr: phys_addr,
                len,
                source: std::io::Error::other("mapping refused"),
            });
        }
        self.journal.record(MockEvent::Mapped(phys_addr));
        Ok(Box::new(FakeWindow {
            journal: self.journal.clone(),
            phys_addr,
            value: AtomicU32::new(self.initial),
        }))
    }
}

/// An in-memory register.
#[derive(Debug)]
pub struct FakeWindow {
    journal: Journal,
    phys_addr: u64,
    value: AtomicU32,
}

impl RegisterWindow for FakeWindow {
    fn phys_addr(&self) -> u64 {
        self.phys_addr
    }

    fn read(&self) -> u32 {
        self.value.load(Ordering::SeqCst)
    }

    fn write(&self, value: u32) {
        self.value.store(value, Ordering::SeqCst);
        self.journal.record(MockEvent::RegisterWrite(value));
    }
}

impl Drop for FakeWindow {
    fn drop(&mut self) {
        self.journal.record(MockEvent::Unmapped(self.phys_addr));
    }
}

// =============================================================================
// Management layer
// =============================================================================

struct MockRegistration {
    id: u64,
    parent: String,
    ops: Arc<dyn BacklightOps>,
    props: BacklightProperties,
}

/// A backlight manager that records registrations and can refuse them.
pub struct MockManager {
    journal: Journal,
    reject: Option<String>,
    retain: bool,
    devices: Mutex<HashMap<String, MockRegistration>>,
    retained: Mutex<Vec<Arc<dyn BacklightOps>>>,
    next_id: AtomicU64,
}

impl MockManager {
    /// Accept every registration.
    pub fn new(journal: &Journal) -> Self {
        Self {
            journal: journal.clone(),
            reject: None,
            retain: false,
            devices: Mutex::new(HashMap::new()),
            retained: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Refuse every registration with `reason`.
    pub fn rejecting(journal: &Journal, reason: &str) -> Self {
        Self {
            reject: Some(reason.to_string()),
            ..Self::new(journal)
        }
    }

    /// Keep each device's ops after it is unregistered, as a misbehaving
    /// manager would.
    pub fn retaining_ops(journal: &Journal) -> Self {
        Self {
            retain: true,
            ..Self::new(journal)
        }
    }

    /// Ops kept past unregistration by a [`MockManager::retaining_ops`] manager.
    pub fn retained_ops(&self) -> Vec<Arc<dyn BacklightOps>> {
        self.retained.lock().unwrap().clone()
    }

    /// Properties a device was registered with.
    pub fn properties(&self, name: &str) -> Option<BacklightProperties> {
        self.devices.lock().unwrap().get(name).map(|d| d.props.clone())
    }

    /// Parent a device was registered under.
    pub fn parent(&self, name: &str) -> Option<String> {
        self.devices.lock().unwrap().get(name).map(|d| d.parent.clone())
    }

    /// Call the device's `get_brightness`.
    pub fn get_brightness(&self, name: &str) -> Option<u32> {
        self.devices
            .lock()
            .unwrap()
            .get(name)
            .map(|d| d.ops.get_brightness())
    }

    /// Call the device's `update_status`.
    pub fn update_status(
        &self,
        name: &str,
        props: &BacklightProperties,
    ) -> Result<(), BacklightError> {
        let devices = self.devices.lock().unwrap();
        let dev = devices
            .get(name)
            .ok_or_else(|| BacklightError::UnknownDevice(name.to_string()))?;
        dev.ops.update_status(props)
    }
}

impl BacklightManager for MockManager {
    fn register(
        &self,
        name: &str,
        parent: &str,
        ops: Arc<dyn BacklightOps>,
        props: BacklightProperties,
    ) -> Result<BacklightHandle, BacklightError> {
        if let Some(reason) = &self.reject {
            return Err(BacklightError::RegistrationError {
                name: name.to_string(),
                reason: reason.clone(),
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.devices.lock().unwrap().insert(
            name.to_string(),
            MockRegistration {
                id,
                parent: parent.to_string(),
                ops,
                props,
            },
        );
        self.journal.record(MockEvent::Registered(name.to_string()));
        Ok(BacklightHandle::new(id, name))
    }

    fn unregister(&self, handle: BacklightHandle) {
        let mut devices = self.devices.lock().unwrap();
        if devices.get(handle.name()).is_some_and(|d| d.id == handle.id()) {
            if let Some(dev) = devices.remove(handle.name()) {
                if self.retain {
                    self.retained.lock().unwrap().push(dev.ops);
                }
            }
            self.journal
                .record(MockEvent::Unregistered(handle.name().to_string()));
        }
    }
}
