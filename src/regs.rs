//! 32-bit register access over a memory-mapped window.
//!
//! Every access is a single volatile load or store. `set_bits`/`clear_bits`
//! are read-modify-write sequences and are only atomic with respect to other
//! writers when the caller holds the device register lock.

use alloc::sync::Arc;
use core::ptr::NonNull;

use memory_addr::{PhysAddr, VirtAddr};

/// Raw 32-bit access to a mapped register block.
///
/// Offsets are in bytes from the start of the block and are always 4-byte
/// aligned. Implementations must not reorder or merge accesses.
pub trait MmioOps: Send + Sync {
    /// Loads the register at `offset`.
    fn read32(&self, offset: usize) -> u32;
    /// Stores `value` into the register at `offset`.
    fn write32(&self, offset: usize, value: u32);
}

/// Volatile access to a block mapped into the current address space.
pub struct RawMmio {
    base: NonNull<u32>,
    size: usize,
}

// SAFETY: `RawMmio` only performs volatile word accesses to device memory;
// serialization of read-modify-write sequences is the caller's job.
unsafe impl Send for RawMmio {}
unsafe impl Sync for RawMmio {}

impl RawMmio {
    /// Wraps a mapped block of `size` bytes starting at `vaddr`.
    ///
    /// Returns `None` if `vaddr` is null or not 4-byte aligned.
    ///
    /// # Safety
    ///
    /// `vaddr..vaddr + size` must be a valid device mapping for the whole
    /// lifetime of the returned value.
    pub unsafe fn new(vaddr: VirtAddr, size: usize) -> Option<Self> {
        let raw = vaddr.as_usize();
        if raw % 4 != 0 {
            return None;
        }
        NonNull::new(raw as *mut u32).map(|base| Self { base, size })
    }

    fn word(&self, offset: usize) -> *mut u32 {
        debug_assert!(offset % 4 == 0 && offset + 4 <= self.size);
        // SAFETY: offset is within the mapping per the constructor contract.
        unsafe { self.base.as_ptr().add(offset / 4) }
    }
}

impl MmioOps for RawMmio {
    fn read32(&self, offset: usize) -> u32 {
        // SAFETY: see `word`.
        unsafe { self.word(offset).read_volatile() }
    }

    fn write32(&self, offset: usize, value: u32) {
        // SAFETY: see `word`.
        unsafe { self.word(offset).write_volatile(value) }
    }
}

/// A mapped register window owned by exactly one bound device.
///
/// Not `Clone`: the host consumes it on unmap, so a window can only ever be
/// unmapped once.
pub struct RegisterWindow {
    base: PhysAddr,
    size: usize,
    io: Arc<dyn MmioOps>,
}

impl RegisterWindow {
    /// Creates a window for the physical block `base..base + size`, accessed
    /// through `io`.
    pub fn new(base: PhysAddr, size: usize, io: Arc<dyn MmioOps>) -> Self {
        Self { base, size, io }
    }

    /// Physical base address of the window.
    pub fn base(&self) -> PhysAddr {
        self.base
    }

    /// Size of the window in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    fn check(&self, offset: usize) {
        debug_assert!(
            offset % 4 == 0 && offset + 4 <= self.size,
            "register offset {:#x} outside window of {:#x} bytes",
            offset,
            self.size
        );
    }

    /// Reads the register at `offset`.
    #[inline]
    pub fn read32(&self, offset: usize) -> u32 {
        self.check(offset);
        self.io.read32(offset)
    }

    /// Writes `value` to the register at `offset`.
    #[inline]
    pub fn write32(&self, offset: usize, value: u32) {
        self.check(offset);
        self.io.write32(offset, value);
    }

    /// Sets `mask` in the register at `offset` (read-modify-write).
    #[inline]
    pub fn set_bits(&self, offset: usize, mask: u32) {
        let val = self.read32(offset);
        self.write32(offset, val | mask);
    }

    /// Clears `mask` in the register at `offset` (read-modify-write).
    #[inline]
    pub fn clear_bits(&self, offset: usize, mask: u32) {
        let val = self.read32(offset);
        self.write32(offset, val & !mask);
    }
}

impl core::fmt::Debug for RegisterWindow {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RegisterWindow")
            .field("base", &self.base)
            .field("size", &format_args!("{:#x}", self.size))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::boxed::Box;
    use alloc::vec;

    #[test]
    fn test_raw_mmio_rejects_bad_base() {
        assert!(unsafe { RawMmio::new(VirtAddr::from(0), 16) }.is_none());
        assert!(unsafe { RawMmio::new(VirtAddr::from(0x1002), 16) }.is_none());
    }

    #[test]
    fn test_window_set_and_clear_bits() {
        let backing: &'static mut [u32] = Box::leak(vec![0u32; 4].into_boxed_slice());
        let vaddr = VirtAddr::from(backing.as_mut_ptr() as usize);
        let io = unsafe { RawMmio::new(vaddr, 16) }.unwrap();
        let window = RegisterWindow::new(PhysAddr::from(0x4120_0000), 16, Arc::new(io));

        window.write32(0x4, 0x10);
        window.set_bits(0x4, 0x1);
        assert_eq!(window.read32(0x4), 0x11);

        window.clear_bits(0x4, 0x10);
        assert_eq!(window.read32(0x4), 0x1);
        assert_eq!(window.read32(0x0), 0);
        assert_eq!(window.size(), 16);
        assert_eq!(window.base(), PhysAddr::from(0x4120_0000));
    }
}
