//! Register map of the AXI GPIO block driving the switch.
//!
//! ```text
//! 0x000  DATA    channel 1 pin levels
//! 0x004  TRI     channel 1 direction (1 = input)
//! 0x008  DATA2   channel 2 pin levels
//! 0x00C  TRI2    channel 2 direction
//! 0x010  reserved (67 words)
//! 0x11C  GIER    global interrupt enable (bit 31)
//! 0x120  ISR     interrupt status, write-1-to-clear
//! 0x124  reserved
//! 0x128  IER     interrupt enable
//! ```
//!
//! Reserved words are part of the hardware contract and are never written.

use crate::regs::RegisterWindow;

/// Channel 1 data register.
pub const DATA: usize = 0x000;
/// Channel 1 tri-state (direction) register.
pub const TRI: usize = 0x004;
/// Channel 2 data register.
pub const DATA2: usize = 0x008;
/// Channel 2 tri-state register.
pub const TRI2: usize = 0x00C;
/// Global interrupt enable register.
pub const GIER: usize = 0x11C;
/// Interrupt status register.
pub const ISR: usize = 0x120;
/// Interrupt enable register.
pub const IER: usize = 0x128;

/// Number of reserved words between `TRI2` and `GIER`.
pub const RESERVED1_WORDS: usize = 67;
/// Bytes covered by the register block.
pub const BLOCK_SIZE: usize = IER + 4;

/// Byte ranges that must never be written.
pub const RESERVED: [core::ops::Range<usize>; 2] = [TRI2 + 4..GIER, ISR + 4..IER];

/// Master enable bit in `GIER`.
pub const GIER_ENABLE: u32 = 1 << 31;
/// Channel 1 bit in `TRI`, `ISR` and `IER`.
pub const CHANNEL1: u32 = 1 << 0;

const _: () = assert!(GIER == TRI2 + 4 + RESERVED1_WORDS * 4);
const _: () = assert!(IER == ISR + 8);
const _: () = assert!(BLOCK_SIZE == 0x12C);

/// Returns `true` if `offset` falls inside a reserved region.
pub const fn is_reserved(offset: usize) -> bool {
    (offset >= RESERVED[0].start && offset < RESERVED[0].end)
        || (offset >= RESERVED[1].start && offset < RESERVED[1].end)
}

/// Typed view over a mapped GPIO block.
///
/// Borrowing the window means the view cannot outlive the mapping; callers
/// obtain it under the device register lock.
pub struct GpioRegs<'a> {
    window: &'a RegisterWindow,
}

impl<'a> GpioRegs<'a> {
    /// Wraps a mapped window. The window must cover [`BLOCK_SIZE`] bytes.
    pub fn new(window: &'a RegisterWindow) -> Self {
        debug_assert!(window.size() >= BLOCK_SIZE);
        Self { window }
    }

    #[inline]
    fn set(&self, offset: usize, mask: u32) {
        debug_assert!(!is_reserved(offset));
        self.window.set_bits(offset, mask);
    }

    #[inline]
    fn clear(&self, offset: usize, mask: u32) {
        debug_assert!(!is_reserved(offset));
        self.window.clear_bits(offset, mask);
    }

    /// Current channel 1 pin levels.
    #[inline]
    pub fn data(&self) -> u32 {
        self.window.read32(DATA)
    }

    /// Configures the pins in `mask` as inputs.
    pub fn set_input(&self, mask: u32) {
        self.set(TRI, mask);
    }

    /// Sets the global interrupt enable bit.
    pub fn enable_global_irq(&self) {
        self.set(GIER, GIER_ENABLE);
    }

    /// Clears the global interrupt enable bit.
    pub fn disable_global_irq(&self) {
        self.clear(GIER, GIER_ENABLE);
    }

    /// Enables the interrupt sources in `mask`.
    pub fn enable_irq(&self, mask: u32) {
        self.set(IER, mask);
    }

    /// Disables the interrupt sources in `mask`.
    pub fn disable_irq(&self, mask: u32) {
        self.clear(IER, mask);
    }

    /// Raw interrupt status.
    #[inline]
    pub fn irq_status(&self) -> u32 {
        self.window.read32(ISR)
    }

    /// Acknowledges the status bits in `mask`.
    ///
    /// ISR is write-1-to-clear, so only `mask` is written; a read-modify-write
    /// would also clear sources that fired in the meantime.
    #[inline]
    pub fn ack_irq(&self, mask: u32) {
        self.window.write32(ISR, mask);
    }

    /// Programs the block for edge notification on channel 1: input
    /// direction, global and channel interrupt enable, then a clean status.
    pub fn arm(&self) {
        self.set_input(CHANNEL1);
        self.enable_global_irq();
        self.enable_irq(CHANNEL1);
        self.ack_irq(CHANNEL1);
    }

    /// Stops the block from asserting its interrupt line.
    pub fn disarm(&self) {
        self.disable_irq(CHANNEL1);
        self.disable_global_irq();
        self.ack_irq(CHANNEL1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimGpioBlock;
    use alloc::sync::Arc;
    use memory_addr::PhysAddr;

    fn window(block: &Arc<SimGpioBlock>) -> RegisterWindow {
        RegisterWindow::new(PhysAddr::from(0x4120_0000), 0x1_0000, block.clone())
    }

    #[test]
    fn test_reserved_ranges() {
        assert!(!is_reserved(DATA));
        assert!(!is_reserved(TRI2));
        assert!(is_reserved(0x010));
        assert!(is_reserved(0x118));
        assert!(!is_reserved(GIER));
        assert!(!is_reserved(ISR));
        assert!(is_reserved(0x124));
        assert!(!is_reserved(IER));
    }

    #[test]
    fn test_arm_programs_block() {
        let block = Arc::new(SimGpioBlock::new());
        block.force_status(CHANNEL1);
        let win = window(&block);
        let regs = GpioRegs::new(&win);

        regs.arm();

        assert_eq!(block.peek(TRI) & CHANNEL1, CHANNEL1);
        assert_eq!(block.peek(GIER) & GIER_ENABLE, GIER_ENABLE);
        assert_eq!(block.peek(IER) & CHANNEL1, CHANNEL1);
        assert_eq!(regs.irq_status() & CHANNEL1, 0);
        assert_eq!(block.writes_to_reserved(), 0);
    }

    #[test]
    fn test_disarm_clears_enables() {
        let block = Arc::new(SimGpioBlock::new());
        let win = window(&block);
        let regs = GpioRegs::new(&win);

        regs.arm();
        regs.disarm();

        assert_eq!(block.peek(GIER), 0);
        assert_eq!(block.peek(IER), 0);
        // Direction is left as input.
        assert_eq!(block.peek(TRI) & CHANNEL1, CHANNEL1);
    }

    #[test]
    fn test_ack_only_clears_requested_bits() {
        let block = Arc::new(SimGpioBlock::new());
        block.force_status(0b11);
        let win = window(&block);
        let regs = GpioRegs::new(&win);

        regs.ack_irq(CHANNEL1);
        assert_eq!(regs.irq_status(), 0b10);
    }
}
