//! Simulated AXI GPIO block and host services.
//!
//! Always available, so the driver can be brought up and exercised without
//! the hardware: [`SimGpioBlock`] emulates the register semantics the driver
//! relies on (write-1-to-clear status, enable gating) and [`SimHost`]
//! implements every host trait with resource bookkeeping and failure
//! injection.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

use axerrno::{AxResult, ax_err};
use memory_addr::PhysAddr;
use spin::Mutex;

use crate::channel::ChannelOps;
use crate::error::NotifyError;
use crate::gpio::{self, BLOCK_SIZE, CHANNEL1, GIER_ENABLE};
use crate::host::{
    ChannelRegistry, IoMapper, IrqController, IrqFlags, IrqHandler, IrqReturn, SignalSender,
};
use crate::regs::{MmioOps, RegisterWindow};
use crate::registration::Pid;
use crate::resource::MemRegion;

const WORDS: usize = BLOCK_SIZE / 4;

/// Emulated AXI GPIO register block.
pub struct SimGpioBlock {
    words: [AtomicU32; WORDS],
    mapped: AtomicBool,
    after_unmap: AtomicUsize,
    reserved_writes: AtomicUsize,
}

impl SimGpioBlock {
    /// Creates a block with all registers zero, accessible as if mapped.
    pub fn new() -> Self {
        Self {
            words: core::array::from_fn(|_| AtomicU32::new(0)),
            mapped: AtomicBool::new(true),
            after_unmap: AtomicUsize::new(0),
            reserved_writes: AtomicUsize::new(0),
        }
    }

    fn word(&self, offset: usize) -> Option<&AtomicU32> {
        self.words.get(offset / 4)
    }

    /// Reads a register without counting as a driver access.
    pub fn peek(&self, offset: usize) -> u32 {
        self.word(offset).map_or(0, |w| w.load(Ordering::Acquire))
    }

    /// Drives the channel 1 input pins to `level` without raising an edge.
    pub fn set_input_level(&self, level: u32) {
        self.words[gpio::DATA / 4].store(level, Ordering::Release);
    }

    /// Sets status bits directly, regardless of the enables.
    pub fn force_status(&self, bits: u32) {
        self.words[gpio::ISR / 4].fetch_or(bits, Ordering::AcqRel);
    }

    /// Drives the pins to `level` and latches a channel 1 edge if the block
    /// has the channel and global interrupt enabled.
    ///
    /// Returns `true` if the interrupt was asserted.
    pub fn raise_edge(&self, level: u32) -> bool {
        self.set_input_level(level);
        let enabled = self.peek(gpio::IER) & CHANNEL1 != 0
            && self.peek(gpio::GIER) & GIER_ENABLE != 0;
        if enabled {
            self.force_status(CHANNEL1);
        }
        enabled
    }

    /// Whether the block is currently mapped.
    pub fn is_mapped(&self) -> bool {
        self.mapped.load(Ordering::Acquire)
    }

    fn set_mapped(&self, mapped: bool) {
        self.mapped.store(mapped, Ordering::Release);
    }

    /// Driver accesses observed while the block was unmapped.
    pub fn accesses_after_unmap(&self) -> usize {
        self.after_unmap.load(Ordering::Acquire)
    }

    /// Driver writes that landed in a reserved region.
    pub fn writes_to_reserved(&self) -> usize {
        self.reserved_writes.load(Ordering::Acquire)
    }

    fn note_access(&self) {
        if !self.is_mapped() {
            self.after_unmap.fetch_add(1, Ordering::AcqRel);
        }
    }
}

impl Default for SimGpioBlock {
    fn default() -> Self {
        Self::new()
    }
}

impl MmioOps for SimGpioBlock {
    fn read32(&self, offset: usize) -> u32 {
        self.note_access();
        self.peek(offset)
    }

    fn write32(&self, offset: usize, value: u32) {
        self.note_access();
        if gpio::is_reserved(offset) {
            self.reserved_writes.fetch_add(1, Ordering::AcqRel);
            return;
        }
        let Some(word) = self.word(offset) else {
            return;
        };
        if offset == gpio::ISR {
            word.fetch_and(!value, Ordering::AcqRel);
        } else {
            word.store(value, Ordering::Release);
        }
    }
}

struct IrqAction {
    handler: Arc<dyn IrqHandler>,
    flags: IrqFlags,
}

fn same_handler(a: &Arc<dyn IrqHandler>, b: &Arc<dyn IrqHandler>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

type SignalHook = Arc<dyn Fn(Pid) + Send + Sync>;

/// Simulated host kernel.
pub struct SimHost {
    blocks: Mutex<BTreeMap<usize, Arc<SimGpioBlock>>>,
    regions: Mutex<Vec<MemRegion>>,
    mappings: AtomicUsize,
    irqs: Mutex<BTreeMap<u32, Vec<IrqAction>>>,
    woken: Mutex<Vec<(u32, Arc<dyn IrqHandler>)>>,
    chrdevs: Mutex<BTreeMap<u32, (String, Arc<dyn ChannelOps>)>>,
    next_dynamic_major: AtomicU32,
    signals: Mutex<Vec<(Pid, u32)>>,
    dead: Mutex<Vec<Pid>>,
    signal_hook: Mutex<Option<SignalHook>>,
    fail_region: AtomicBool,
    fail_map: AtomicBool,
    fail_irq: AtomicBool,
    fail_channel: AtomicBool,
    fail_signal: AtomicBool,
}

impl SimHost {
    /// First major handed out for dynamic requests; counts down.
    pub const DYNAMIC_MAJOR_BASE: u32 = 254;

    /// Creates a host with no resources in use.
    pub fn new() -> Self {
        Self {
            blocks: Mutex::new(BTreeMap::new()),
            regions: Mutex::new(Vec::new()),
            mappings: AtomicUsize::new(0),
            irqs: Mutex::new(BTreeMap::new()),
            woken: Mutex::new(Vec::new()),
            chrdevs: Mutex::new(BTreeMap::new()),
            next_dynamic_major: AtomicU32::new(Self::DYNAMIC_MAJOR_BASE),
            signals: Mutex::new(Vec::new()),
            dead: Mutex::new(Vec::new()),
            signal_hook: Mutex::new(None),
            fail_region: AtomicBool::new(false),
            fail_map: AtomicBool::new(false),
            fail_irq: AtomicBool::new(false),
            fail_channel: AtomicBool::new(false),
            fail_signal: AtomicBool::new(false),
        }
    }

    /// The block backing physical address `start`, created on first use.
    pub fn block(&self, start: PhysAddr) -> Arc<SimGpioBlock> {
        self.blocks
            .lock()
            .entry(start.as_usize())
            .or_insert_with(|| {
                let block = SimGpioBlock::new();
                block.set_mapped(false);
                Arc::new(block)
            })
            .clone()
    }

    /// Makes region reservation fail.
    pub fn fail_region(&self, fail: bool) {
        self.fail_region.store(fail, Ordering::Release);
    }

    /// Makes mapping fail.
    pub fn fail_map(&self, fail: bool) {
        self.fail_map.store(fail, Ordering::Release);
    }

    /// Makes interrupt line requests fail.
    pub fn fail_irq(&self, fail: bool) {
        self.fail_irq.store(fail, Ordering::Release);
    }

    /// Makes control-channel registration fail.
    pub fn fail_channel(&self, fail: bool) {
        self.fail_channel.store(fail, Ordering::Release);
    }

    /// Makes signal delivery fail.
    pub fn fail_signal(&self, fail: bool) {
        self.fail_signal.store(fail, Ordering::Release);
    }

    /// Marks `pid` as exited; signals to it fail with
    /// [`NotifyError::NoSuchProcess`].
    pub fn kill(&self, pid: Pid) {
        self.dead.lock().push(pid);
    }

    /// Installs a hook run at the start of every signal delivery.
    pub fn set_signal_hook(&self, hook: impl Fn(Pid) + Send + Sync + 'static) {
        *self.signal_hook.lock() = Some(Arc::new(hook));
    }

    /// Number of reserved regions.
    pub fn regions_held(&self) -> usize {
        self.regions.lock().len()
    }

    /// Number of live mappings.
    pub fn mappings_live(&self) -> usize {
        self.mappings.load(Ordering::Acquire)
    }

    /// Number of installed interrupt handlers, over all lines.
    pub fn irqs_held(&self) -> usize {
        self.irqs.lock().values().map(Vec::len).sum()
    }

    /// Number of claimed control-channel identities.
    pub fn channels_held(&self) -> usize {
        self.chrdevs.lock().len()
    }

    /// Signals delivered so far, oldest first.
    pub fn signals(&self) -> Vec<(Pid, u32)> {
        self.signals.lock().clone()
    }

    fn actions(&self, irq: u32) -> Vec<Arc<dyn IrqHandler>> {
        self.irqs
            .lock()
            .get(&irq)
            .map(|v| v.iter().map(|a| a.handler.clone()).collect())
            .unwrap_or_default()
    }

    /// Runs the top halves installed on `irq` and leaves woken bottom halves
    /// queued for [`run_threaded`](Self::run_threaded).
    ///
    /// Returns the strongest verdict of all handlers.
    pub fn fire_primary(&self, irq: u32) -> IrqReturn {
        let mut verdict = IrqReturn::None;
        for handler in self.actions(irq) {
            match handler.handle_primary() {
                IrqReturn::WakeThread => {
                    self.woken.lock().push((irq, handler));
                    verdict = IrqReturn::WakeThread;
                }
                IrqReturn::Handled if verdict == IrqReturn::None => verdict = IrqReturn::Handled,
                _ => {}
            }
        }
        verdict
    }

    /// Runs every bottom half queued for `irq`. Returns how many ran.
    pub fn run_threaded(&self, irq: u32) -> usize {
        let queued: Vec<_> = {
            let mut woken = self.woken.lock();
            let (mine, rest): (Vec<_>, Vec<_>) = woken.drain(..).partition(|(i, _)| *i == irq);
            *woken = rest;
            mine
        };
        for (_, handler) in &queued {
            handler.handle_threaded();
        }
        queued.len()
    }

    /// Delivers one interrupt on `irq`: top halves, then any woken bottom
    /// halves.
    pub fn fire(&self, irq: u32) -> IrqReturn {
        let verdict = self.fire_primary(irq);
        self.run_threaded(irq);
        verdict
    }

    fn channel(&self, major: u32) -> AxResult<Arc<dyn ChannelOps>> {
        match self.chrdevs.lock().get(&major) {
            Some((_, ops)) => Ok(ops.clone()),
            None => ax_err!(NotFound, "no such control channel"),
        }
    }

    /// `pid` opens the channel registered under `major`.
    pub fn open(&self, major: u32, pid: Pid) -> AxResult {
        self.channel(major)?.open(pid)
    }

    /// `pid` issues `cmd` on the channel registered under `major`.
    pub fn ioctl(&self, major: u32, pid: Pid, cmd: u32) -> AxResult<usize> {
        self.channel(major)?.ioctl(pid, cmd, 0)
    }

    /// `pid` closes the channel registered under `major`.
    pub fn close(&self, major: u32, pid: Pid) -> AxResult {
        self.channel(major)?.release(pid);
        Ok(())
    }
}

impl Default for SimHost {
    fn default() -> Self {
        Self::new()
    }
}

impl IoMapper for SimHost {
    fn request_region(&self, region: &MemRegion, owner: &str) -> AxResult {
        let mut regions = self.regions.lock();
        if self.fail_region.load(Ordering::Acquire)
            || regions
                .iter()
                .any(|r| r.start < region.end() && region.start < r.end())
        {
            return ax_err!(ResourceBusy, "mem region already requested");
        }
        trace!("sim: region {:?} requested by {}", region, owner);
        regions.push(*region);
        Ok(())
    }

    fn release_region(&self, region: &MemRegion) -> AxResult {
        let mut regions = self.regions.lock();
        match regions.iter().position(|r| r == region) {
            Some(idx) => {
                regions.swap_remove(idx);
                Ok(())
            }
            None => ax_err!(NotFound, "mem region not requested"),
        }
    }

    fn ioremap(&self, region: &MemRegion) -> AxResult<RegisterWindow> {
        if self.fail_map.load(Ordering::Acquire) {
            return ax_err!(BadAddress, "ioremap failed");
        }
        let block = self.block(region.start);
        block.set_mapped(true);
        self.mappings.fetch_add(1, Ordering::AcqRel);
        Ok(RegisterWindow::new(region.start, region.size, block))
    }

    fn iounmap(&self, window: RegisterWindow) -> AxResult {
        let block = self.block(window.base());
        if !block.is_mapped() {
            return ax_err!(BadState, "window not mapped");
        }
        block.set_mapped(false);
        self.mappings.fetch_sub(1, Ordering::AcqRel);
        Ok(())
    }
}

impl IrqController for SimHost {
    fn request_threaded_irq(
        &self,
        irq: u32,
        handler: Arc<dyn IrqHandler>,
        flags: IrqFlags,
        name: &str,
    ) -> AxResult {
        if self.fail_irq.load(Ordering::Acquire) {
            return ax_err!(ResourceBusy, "irq line unavailable");
        }
        let mut irqs = self.irqs.lock();
        let actions = irqs.entry(irq).or_default();
        let shareable = flags.contains(IrqFlags::SHARED)
            && actions.iter().all(|a| a.flags.contains(IrqFlags::SHARED));
        if !actions.is_empty() && !shareable {
            return ax_err!(ResourceBusy, "irq line not shareable");
        }
        trace!("sim: irq {} requested by {}", irq, name);
        actions.push(IrqAction { handler, flags });
        Ok(())
    }

    fn free_irq(&self, irq: u32, handler: &Arc<dyn IrqHandler>) -> AxResult {
        let mut irqs = self.irqs.lock();
        let Some(actions) = irqs.get_mut(&irq) else {
            return ax_err!(NotFound, "irq not requested");
        };
        let Some(idx) = actions.iter().position(|a| same_handler(&a.handler, handler)) else {
            return ax_err!(NotFound, "handler not installed");
        };
        actions.remove(idx);
        if actions.is_empty() {
            irqs.remove(&irq);
        }
        self.woken
            .lock()
            .retain(|(i, h)| !(*i == irq && same_handler(h, handler)));
        Ok(())
    }
}

impl ChannelRegistry for SimHost {
    fn register_chrdev(&self, major: u32, name: &str, ops: Arc<dyn ChannelOps>) -> AxResult<u32> {
        if self.fail_channel.load(Ordering::Acquire) {
            return ax_err!(AlreadyExists, "control channel identity taken");
        }
        let mut chrdevs = self.chrdevs.lock();
        let major = if major == 0 {
            let mut candidate = self.next_dynamic_major.load(Ordering::Acquire);
            while chrdevs.contains_key(&candidate) {
                candidate -= 1;
            }
            self.next_dynamic_major.store(candidate - 1, Ordering::Release);
            candidate
        } else {
            major
        };
        if chrdevs.contains_key(&major) {
            return ax_err!(AlreadyExists, "major number in use");
        }
        chrdevs.insert(major, (String::from(name), ops));
        Ok(major)
    }

    fn unregister_chrdev(&self, major: u32, name: &str) -> AxResult {
        let mut chrdevs = self.chrdevs.lock();
        match chrdevs.get(&major) {
            Some((registered, _)) if registered == name => {
                chrdevs.remove(&major);
                Ok(())
            }
            _ => ax_err!(NotFound, "control channel not registered"),
        }
    }
}

impl SignalSender for SimHost {
    fn send_signal(&self, pid: Pid, signal: u32) -> Result<(), NotifyError> {
        let hook = self.signal_hook.lock().clone();
        if let Some(hook) = hook {
            hook(pid);
        }
        if self.dead.lock().contains(&pid) {
            return Err(NotifyError::NoSuchProcess);
        }
        if self.fail_signal.load(Ordering::Acquire) {
            return Err(NotifyError::Rejected(axerrno::AxError::PermissionDenied));
        }
        self.signals.lock().push((pid, signal));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isr_is_write_one_to_clear() {
        let block = SimGpioBlock::new();
        block.force_status(0b101);
        block.write32(gpio::ISR, 0b001);
        assert_eq!(block.peek(gpio::ISR), 0b100);
        block.write32(gpio::ISR, 0);
        assert_eq!(block.peek(gpio::ISR), 0b100);
    }

    #[test]
    fn test_edge_needs_enables() {
        let block = SimGpioBlock::new();
        assert!(!block.raise_edge(0));
        assert_eq!(block.peek(gpio::ISR), 0);

        block.write32(gpio::IER, CHANNEL1);
        block.write32(gpio::GIER, GIER_ENABLE);
        assert!(block.raise_edge(0));
        assert_eq!(block.peek(gpio::ISR), CHANNEL1);
    }

    #[test]
    fn test_unmapped_access_is_counted() {
        let host = SimHost::new();
        let region = MemRegion::new(PhysAddr::from(0x4120_0000), 0x1_0000);
        let window = host.ioremap(&region).unwrap();
        window.read32(gpio::DATA);
        let block = host.block(region.start);
        assert_eq!(block.accesses_after_unmap(), 0);

        let io: Arc<dyn MmioOps> = block.clone();
        host.iounmap(window).unwrap();
        io.read32(gpio::DATA);
        assert_eq!(block.accesses_after_unmap(), 1);
        assert_eq!(host.mappings_live(), 0);
    }

    #[test]
    fn test_overlapping_region_is_busy() {
        let host = SimHost::new();
        let a = MemRegion::new(PhysAddr::from(0x4120_0000), 0x1_0000);
        let b = MemRegion::new(PhysAddr::from(0x4120_8000), 0x1_0000);
        host.request_region(&a, "a").unwrap();
        assert!(host.request_region(&b, "b").is_err());
        host.release_region(&a).unwrap();
        host.request_region(&b, "b").unwrap();
        assert_eq!(host.regions_held(), 1);
    }

    #[test]
    fn test_dynamic_major() {
        struct Nop;
        impl ChannelOps for Nop {
            fn open(&self, _pid: Pid) -> AxResult {
                Ok(())
            }
            fn ioctl(&self, _pid: Pid, _cmd: u32, _arg: usize) -> AxResult<usize> {
                Ok(0)
            }
            fn release(&self, _pid: Pid) {}
        }

        let host = SimHost::new();
        let first = host.register_chrdev(0, "a", Arc::new(Nop)).unwrap();
        let second = host.register_chrdev(0, "b", Arc::new(Nop)).unwrap();
        assert_eq!(first, SimHost::DYNAMIC_MAJOR_BASE);
        assert_ne!(first, second);
        assert!(host.register_chrdev(first, "c", Arc::new(Nop)).is_err());
        assert!(host.unregister_chrdev(first, "b").is_err());
        host.unregister_chrdev(first, "a").unwrap();
        assert_eq!(host.channels_held(), 1);
    }
}
