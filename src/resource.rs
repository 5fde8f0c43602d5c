//! Hardware nodes and the resources the bus hands to attach.

use alloc::string::String;
use alloc::vec::Vec;

use arrayvec::ArrayVec;
use memory_addr::PhysAddr;

/// Maximum number of resources of each kind a descriptor carries.
pub const MAX_RESOURCES: usize = 4;

/// A physical memory region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemRegion {
    /// First byte of the region.
    pub start: PhysAddr,
    /// Size of the region in bytes.
    pub size: usize,
}

impl MemRegion {
    /// Creates a region of `size` bytes at `start`.
    pub fn new(start: PhysAddr, size: usize) -> Self {
        Self { start, size }
    }

    /// One past the last byte of the region.
    pub fn end(&self) -> PhysAddr {
        self.start + self.size
    }

    /// Returns `true` if the region is large enough to hold `len` bytes.
    pub fn covers(&self, len: usize) -> bool {
        self.size >= len
    }
}

/// Resources resolved by the bus for one hardware node.
#[derive(Debug, Clone, Default)]
pub struct ResourceDescriptor {
    mem: ArrayVec<MemRegion, MAX_RESOURCES>,
    irqs: ArrayVec<u32, MAX_RESOURCES>,
}

impl ResourceDescriptor {
    /// Creates an empty descriptor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a memory region. Extra regions beyond [`MAX_RESOURCES`] are
    /// dropped.
    pub fn with_mem(mut self, region: MemRegion) -> Self {
        if self.mem.try_push(region).is_err() {
            warn!("resource descriptor full, dropping region {:?}", region);
        }
        self
    }

    /// Appends an interrupt line. Extra lines beyond [`MAX_RESOURCES`] are
    /// dropped.
    pub fn with_irq(mut self, irq: u32) -> Self {
        if self.irqs.try_push(irq).is_err() {
            warn!("resource descriptor full, dropping irq {}", irq);
        }
        self
    }

    /// The `index`-th memory region.
    pub fn mem(&self, index: usize) -> Option<&MemRegion> {
        self.mem.get(index)
    }

    /// The `index`-th interrupt line.
    pub fn irq(&self, index: usize) -> Option<u32> {
        self.irqs.get(index).copied()
    }
}

/// A node of the hardware description the bus matched against the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HwDescription {
    /// Unique node name, used as the instance key.
    pub name: String,
    /// Compatible strings, most specific first.
    pub compatible: Vec<String>,
}

impl HwDescription {
    /// Creates a node with a single compatible string.
    pub fn new(name: &str, compatible: &str) -> Self {
        Self {
            name: String::from(name),
            compatible: alloc::vec![String::from(compatible)],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_lookup() {
        let region = MemRegion::new(PhysAddr::from(0x4120_0000), 0x1_0000);
        let res = ResourceDescriptor::new().with_mem(region).with_irq(61);

        assert_eq!(res.mem(0), Some(&region));
        assert_eq!(res.mem(1), None);
        assert_eq!(res.irq(0), Some(61));
        assert_eq!(res.irq(1), None);
        assert_eq!(region.end(), PhysAddr::from(0x4121_0000));
    }

    #[test]
    fn test_descriptor_capacity() {
        let mut res = ResourceDescriptor::new();
        for irq in 0..(MAX_RESOURCES as u32 + 2) {
            res = res.with_irq(irq);
        }
        assert_eq!(res.irq(MAX_RESOURCES - 1), Some(MAX_RESOURCES as u32 - 1));
        assert_eq!(res.irq(MAX_RESOURCES), None);
    }

    #[test]
    fn test_region_covers() {
        let region = MemRegion::new(PhysAddr::from(0x4120_0000), 0x100);
        assert!(region.covers(0x100));
        assert!(!region.covers(0x12C));
    }
}
