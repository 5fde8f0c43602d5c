//! Per-instance device state shared by the interrupt halves, the control
//! channel and detach.

use alloc::string::String;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use spin::Mutex;

use crate::gpio::GpioRegs;
use crate::host::SignalSender;
use crate::lifecycle::DeviceLifecycle;
use crate::regs::RegisterWindow;
use crate::registration::RegistrationSlot;

/// Classification of an observed pin value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinLevel {
    /// The data register read as zero.
    Pressed,
    /// Any non-zero data value.
    Released,
}

impl PinLevel {
    /// Classifies a raw data register value.
    #[inline]
    pub const fn classify(value: u32) -> Self {
        if value == 0 {
            Self::Pressed
        } else {
            Self::Released
        }
    }
}

/// Event counters of one device.
#[derive(Debug, Default)]
pub struct SwitchStats {
    /// Edges claimed by the top half.
    pub edges: AtomicU64,
    /// Edges classified as pressed.
    pub presses: AtomicU64,
    /// Edges classified as released.
    pub releases: AtomicU64,
    /// Top-half invocations whose status bit was clear.
    pub spurious: AtomicU64,
    /// Edges folded into an already pending bottom half.
    pub coalesced: AtomicU64,
    /// Signals delivered.
    pub notifications: AtomicU64,
    /// Signal deliveries that failed.
    pub notify_errors: AtomicU64,
}

impl SwitchStats {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Edges claimed by the top half.
    pub fn edges(&self) -> u64 {
        self.edges.load(Ordering::Relaxed)
    }

    /// Edges classified as pressed.
    pub fn presses(&self) -> u64 {
        self.presses.load(Ordering::Relaxed)
    }

    /// Edges classified as released.
    pub fn releases(&self) -> u64 {
        self.releases.load(Ordering::Relaxed)
    }

    /// Interrupts that were not raised by this device.
    pub fn spurious(&self) -> u64 {
        self.spurious.load(Ordering::Relaxed)
    }

    /// Edges coalesced into a pending bottom half.
    pub fn coalesced(&self) -> u64 {
        self.coalesced.load(Ordering::Relaxed)
    }

    /// Signals delivered.
    pub fn notifications(&self) -> u64 {
        self.notifications.load(Ordering::Relaxed)
    }

    /// Failed signal deliveries.
    pub fn notify_errors(&self) -> u64 {
        self.notify_errors.load(Ordering::Relaxed)
    }
}

/// State of one bound switch device.
pub struct DeviceContext {
    name: String,
    /// Register lock. `None` before the window is mapped and after detach
    /// took it for unmapping.
    regs: Mutex<Option<RegisterWindow>>,
    irq: AtomicU32,
    last_observed: AtomicU32,
    pending: AtomicBool,
    registration: Arc<RegistrationSlot>,
    lifecycle: DeviceLifecycle,
    stats: SwitchStats,
    signal: u32,
    sender: Arc<dyn SignalSender>,
}

impl DeviceContext {
    /// Creates an empty context for node `name`.
    pub fn new(name: String, signal: u32, sender: Arc<dyn SignalSender>) -> Self {
        Self {
            name,
            regs: Mutex::new(None),
            irq: AtomicU32::new(0),
            last_observed: AtomicU32::new(0),
            pending: AtomicBool::new(false),
            registration: Arc::new(RegistrationSlot::new()),
            lifecycle: DeviceLifecycle::new(),
            stats: SwitchStats::new(),
            signal,
            sender,
        }
    }

    /// Hardware node name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs `f` on the register block with the register lock held.
    ///
    /// Returns `None` if no window is installed.
    #[inline]
    pub fn with_regs<R>(&self, f: impl FnOnce(&GpioRegs<'_>) -> R) -> Option<R> {
        let guard = self.regs.lock();
        guard.as_ref().map(|window| f(&GpioRegs::new(window)))
    }

    pub(crate) fn install_window(&self, window: RegisterWindow) {
        let prev = self.regs.lock().replace(window);
        debug_assert!(prev.is_none());
    }

    pub(crate) fn take_window(&self) -> Option<RegisterWindow> {
        self.regs.lock().take()
    }

    /// Interrupt line owned by this instance (0 until resolved).
    pub fn irq(&self) -> u32 {
        self.irq.load(Ordering::Relaxed)
    }

    pub(crate) fn set_irq(&self, irq: u32) {
        self.irq.store(irq, Ordering::Relaxed);
    }

    /// Data value captured by the most recent claimed edge.
    #[inline]
    pub fn last_observed(&self) -> u32 {
        self.last_observed.load(Ordering::Acquire)
    }

    pub(crate) fn record_observed(&self, value: u32) {
        self.last_observed.store(value, Ordering::Release);
    }

    /// Marks an edge as pending. Returns `true` if one already was.
    pub(crate) fn mark_pending(&self) -> bool {
        self.pending.swap(true, Ordering::AcqRel)
    }

    /// Consumes the pending mark. Returns `true` if it was set.
    pub(crate) fn take_pending(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }

    /// The registration slot.
    pub fn registration(&self) -> &Arc<RegistrationSlot> {
        &self.registration
    }

    /// The lifecycle gate.
    pub fn lifecycle(&self) -> &DeviceLifecycle {
        &self.lifecycle
    }

    /// Event counters.
    pub fn stats(&self) -> &SwitchStats {
        &self.stats
    }

    /// Signal number delivered on a press.
    pub fn signal(&self) -> u32 {
        self.signal
    }

    pub(crate) fn sender(&self) -> &dyn SignalSender {
        self.sender.as_ref()
    }
}

impl core::fmt::Debug for DeviceContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DeviceContext")
            .field("name", &self.name)
            .field("irq", &self.irq())
            .field("last_observed", &self.last_observed())
            .field("registered", &self.registration.holder())
            .field("lifecycle", &self.lifecycle)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(PinLevel::classify(0), PinLevel::Pressed);
        assert_eq!(PinLevel::classify(1), PinLevel::Released);
        assert_eq!(PinLevel::classify(0x8000_0000), PinLevel::Released);
    }

    #[test]
    fn test_stats_counters() {
        let stats = SwitchStats::new();
        SwitchStats::bump(&stats.edges);
        SwitchStats::bump(&stats.edges);
        SwitchStats::bump(&stats.notify_errors);
        assert_eq!(stats.edges(), 2);
        assert_eq!(stats.notify_errors(), 1);
        assert_eq!(stats.notifications(), 0);
    }
}
