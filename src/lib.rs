#![cfg_attr(not(test), no_std)]

//! # AXI GPIO Switch Notifier
//!
//! This crate drives a single switch wired to an AXI GPIO block: it takes the
//! block's edge interrupt, classifies the pin level and signals exactly one
//! registered user process when the switch is pressed.
//! It is designed for `no_std` environments and uses the `alloc` crate for dynamic memory allocation.
//!
//! ## Architecture
//!
//! The module is organized into multiple layers:
//!
//! ### Register Access
//! - [`RegisterWindow`]: Exclusively owned handle to a mapped register block
//! - [`GpioRegs`]: Typed view of the AXI GPIO register map
//!
//! ### Interrupt Path
//! - [`handle_edge`]: Top half, claims and acknowledges the edge in interrupt context
//! - [`run_deferred`]: Bottom half, delivers the signal in threaded context
//! - [`DeviceLifecycle`]: Gate that lets detach wait for in-flight handlers
//!
//! ### Control Plane
//! - [`ControlChannel`]: open / ioctl / release entry points
//! - [`RegistrationSlot`]: The single registered consumer
//!
//! ### Driver
//! - [`GpioSwitchDriver`]: Attach with ordered rollback, best-effort detach
//! - [`HostServices`]: Region mapping, interrupt lines, control channels and
//!   signal delivery provided by the host kernel
//! - [`sim`]: Simulated GPIO block and host
//!
//! ## Examples
//!
//! ```rust,ignore
//! use axgpio_switch::{GpioSwitchConfig, GpioSwitchDriver, HostServices};
//! use axgpio_switch::{HwDescription, MemRegion, ResourceDescriptor};
//!
//! let driver = GpioSwitchDriver::new(GpioSwitchConfig::default(), HostServices::from_host(host));
//!
//! let node = HwDescription::new("gpio@41200000", "gpio-ebaz-lkmTest02");
//! let res = ResourceDescriptor::new()
//!     .with_mem(MemRegion::new(PhysAddr::from(0x4120_0000), 0x1_0000))
//!     .with_irq(61);
//! if driver.matches(&node) {
//!     driver.attach(&node, &res)?;
//! }
//!
//! // Module unload.
//! driver.detach_all();
//! ```

extern crate alloc;
#[macro_use]
extern crate log;

mod channel;
mod config;
mod context;
mod driver;
mod error;
mod gpio;
mod host;
mod irq;
mod lifecycle;
mod registration;
mod regs;
mod resource;
pub mod sim;

pub use channel::{ChannelOps, ControlChannel, REGISTER_UAPP, UNREGISTER_UAPP, io_cmd};
pub use config::{COMPATIBLE, GpioSwitchConfig};
pub use context::{DeviceContext, PinLevel, SwitchStats};
pub use driver::{GpioSwitchDevice, GpioSwitchDriver};
pub use error::{AttachError, NotifyError};
pub use gpio::GpioRegs;
pub use host::{
    ChannelRegistry, HostServices, IoMapper, IrqController, IrqFlags, IrqHandler, IrqReturn,
    SignalSender,
};
pub use irq::{SwitchIrqHandler, handle_edge, run_deferred};
pub use lifecycle::{BindState, DeviceLifecycle, InFlight};
pub use registration::{Pid, RegistrationSlot};
pub use regs::{MmioOps, RawMmio, RegisterWindow};
pub use resource::{HwDescription, MAX_RESOURCES, MemRegion, ResourceDescriptor};

/// AXI GPIO register offsets and bits.
pub mod layout {
    pub use crate::gpio::{
        BLOCK_SIZE, CHANNEL1, DATA, DATA2, GIER, GIER_ENABLE, IER, ISR, RESERVED, TRI, TRI2,
        is_reserved,
    };
}
