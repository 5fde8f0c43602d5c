//! Services the host kernel provides to the driver.
//!
//! The driver never talks to the platform directly: region reservation,
//! mapping, interrupt dispatch, control-channel identities and signal
//! delivery are injected as trait objects through [`HostServices`].

use alloc::sync::Arc;

use axerrno::AxResult;
use bitflags::bitflags;

use crate::channel::ChannelOps;
use crate::error::NotifyError;
use crate::regs::RegisterWindow;
use crate::registration::Pid;
use crate::resource::MemRegion;

bitflags! {
    /// Flags passed along with an interrupt handler request.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IrqFlags: u32 {
        /// Trigger on the rising edge.
        const TRIGGER_RISING = 1 << 0;
        /// Trigger on the falling edge.
        const TRIGGER_FALLING = 1 << 1;
        /// The line may be shared with other devices.
        const SHARED = 1 << 7;
    }
}

/// Verdict of an interrupt handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqReturn {
    /// The interrupt was not raised by this device.
    None,
    /// The interrupt was handled.
    Handled,
    /// The interrupt was handled and the threaded half must run.
    WakeThread,
}

/// A two-stage interrupt handler.
///
/// The host calls [`handle_primary`](Self::handle_primary) in interrupt
/// context. When it returns [`IrqReturn::WakeThread`], the host schedules
/// [`handle_threaded`](Self::handle_threaded) on a context that may block.
pub trait IrqHandler: Send + Sync {
    /// Top half. Must not block, sleep or allocate.
    fn handle_primary(&self) -> IrqReturn;

    /// Bottom half.
    fn handle_threaded(&self) -> IrqReturn;
}

/// Register-window reservation and mapping.
pub trait IoMapper: Send + Sync {
    /// Reserves `region` for `owner`.
    fn request_region(&self, region: &MemRegion, owner: &str) -> AxResult;

    /// Returns a reservation made by [`request_region`](Self::request_region).
    fn release_region(&self, region: &MemRegion) -> AxResult;

    /// Maps a reserved region.
    fn ioremap(&self, region: &MemRegion) -> AxResult<RegisterWindow>;

    /// Unmaps a window returned by [`ioremap`](Self::ioremap).
    fn iounmap(&self, window: RegisterWindow) -> AxResult;
}

/// Interrupt line ownership.
pub trait IrqController: Send + Sync {
    /// Installs `handler` on `irq`.
    fn request_threaded_irq(
        &self,
        irq: u32,
        handler: Arc<dyn IrqHandler>,
        flags: IrqFlags,
        name: &str,
    ) -> AxResult;

    /// Removes `handler` from `irq`. Other handlers sharing the line stay.
    fn free_irq(&self, irq: u32, handler: &Arc<dyn IrqHandler>) -> AxResult;
}

/// Character-device style control-channel identities.
pub trait ChannelRegistry: Send + Sync {
    /// Claims `major` (or a free major when `major` is 0) for `ops`.
    ///
    /// Returns the major number actually assigned.
    fn register_chrdev(&self, major: u32, name: &str, ops: Arc<dyn ChannelOps>) -> AxResult<u32>;

    /// Returns a claimed identity.
    fn unregister_chrdev(&self, major: u32, name: &str) -> AxResult;
}

/// Asynchronous signal delivery to a user process.
pub trait SignalSender: Send + Sync {
    /// Queues `signal` for `pid`. Fire-and-forget.
    fn send_signal(&self, pid: Pid, signal: u32) -> Result<(), NotifyError>;
}

/// The host services a driver instance depends on.
#[derive(Clone)]
pub struct HostServices {
    /// Register-window reservation and mapping.
    pub io: Arc<dyn IoMapper>,
    /// Interrupt dispatcher.
    pub irq: Arc<dyn IrqController>,
    /// Control-channel identities.
    pub chrdev: Arc<dyn ChannelRegistry>,
    /// Signal delivery.
    pub signal: Arc<dyn SignalSender>,
}

impl HostServices {
    /// Bundles a single object that provides every service.
    pub fn from_host<H>(host: Arc<H>) -> Self
    where
        H: IoMapper + IrqController + ChannelRegistry + SignalSender + 'static,
    {
        Self {
            io: host.clone(),
            irq: host.clone(),
            chrdev: host.clone(),
            signal: host,
        }
    }
}
