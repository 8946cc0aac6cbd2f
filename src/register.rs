//! Memory-mapped register access.

use crate::error::BacklightError;

use log::debug;
use memmap2::{MmapOptions, MmapRaw};
use std::fmt;
use std::fs::OpenOptions;
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;
use std::ptr;

const DEV_MEM: &str = "/dev/mem";

/// A mapped 32-bit register window.
///
/// Accesses take `&self` like volatile MMIO does and have no error path.
/// Dropping the window unmaps it.
pub trait RegisterWindow: fmt::Debug + Send + Sync {
    /// Physical address the window is mapped at.
    fn phys_addr(&self) -> u64;

    /// Read the register.
    fn read(&self) -> u32;

    /// Write the register.
    fn write(&self, value: u32);
}

/// Trait for mapping register windows.
pub trait RegisterMapper: Send + Sync {
    /// Map `len` bytes of device memory at `phys_addr`.
    fn map(&self, phys_addr: u64, len: usize) -> Result<Box<dyn RegisterWindow>, BacklightError>;
}

// =============================================================================
// /dev/mem backend
// =============================================================================

fn page_size() -> u64 {
    // SAFETY: sysconf has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 { size as u64 } else { 4096 }
}

/// Maps register windows from `/dev/mem`.
#[derive(Debug, Clone)]
pub struct DevMemMapper {
    path: PathBuf,
}

impl DevMemMapper {
    /// Use `/dev/mem`.
    pub fn new() -> Self {
        Self::with_path(DEV_MEM)
    }

    /// Use another physical memory device node.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for DevMemMapper {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterMapper for DevMemMapper {
    fn map(&self, phys_addr: u64, len: usize) -> Result<Box<dyn RegisterWindow>, BacklightError> {
        let map_err = |source| BacklightError::MapError {
            addr: phys_addr,
            len,
            source,
        };

        if len != 4 || phys_addr % 4 != 0 {
            return Err(map_err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "window must be one aligned dword",
            )));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open(&self.path)
            .map_err(map_err)?;

        let page = page_size();
        let page_base = phys_addr & !(page - 1);
        let offset = (phys_addr - page_base) as usize;

        // Mapping past the end of a regular file succeeds but faults on access.
        let meta = file.metadata().map_err(map_err)?;
        if meta.is_file() && meta.len() < phys_addr + len as u64 {
            return Err(map_err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "address beyond end of memory device",
            )));
        }

        let map = MmapOptions::new()
            .offset(page_base)
            .len(page as usize)
            .map_raw(&file)
            .map_err(map_err)?;

        debug!(
            "mapped {:#x} (page {:#x}) via {}",
            phys_addr,
            page_base,
            self.path.display()
        );
        Ok(Box::new(DevMemWindow {
            map,
            offset,
            phys_addr,
        }))
    }
}

/// A single dword of a page mapped from `/dev/mem`.
///
/// The page is unmapped on drop.
#[derive(Debug)]
pub struct DevMemWindow {
    map: MmapRaw,
    offset: usize,
    phys_addr: u64,
}

impl DevMemWindow {
    fn register(&self) -> *mut u32 {
        // SAFETY: `offset + 4` lies inside the mapped page and is 4-byte
        // aligned, both checked in `DevMemMapper::map`.
        unsafe { self.map.as_mut_ptr().add(self.offset) as *mut u32 }
    }
}

impl RegisterWindow for DevMemWindow {
    fn phys_addr(&self) -> u64 {
        self.phys_addr
    }

    fn read(&self) -> u32 {
        // SAFETY: see `register`; the mapping lives as long as `self`.
        u32::from_le(unsafe { ptr::read_volatile(self.register()) })
    }

    fn write(&self, value: u32) {
        // SAFETY: see `register`; the mapping lives as long as `self`.
        unsafe { ptr::write_volatile(self.register(), value.to_le()) }
    }
}

impl Drop for DevMemWindow {
    fn drop(&mut self) {
        debug!("unmapped {:#x}", self.phys_addr);
    }
}
