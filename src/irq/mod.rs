//! Two-stage interrupt handling for the switch.
//!
//! ```text
//!   edge ──> top half (interrupt context)
//!              - claim ISR bit, read DATA, store last_observed
//!              - ack ISR, mark pending
//!              │ WakeThread (only if nothing was pending)
//!              ▼
//!            bottom half (threaded context)
//!              - consume pending, load last_observed
//!              - copy registered pid
//!              - pressed && registered => send signal
//! ```
//!
//! Edges arriving while a bottom half is pending are coalesced: the bottom
//! half runs at least once per burst and always sees the latest value.

mod bottom_half;
mod top_half;

use alloc::sync::Arc;

use crate::context::DeviceContext;
use crate::host::{IrqHandler, IrqReturn};

pub use bottom_half::run_deferred;
pub use top_half::handle_edge;

/// The handler pair installed on the device's interrupt line.
pub struct SwitchIrqHandler {
    ctx: Arc<DeviceContext>,
}

impl SwitchIrqHandler {
    /// Creates a handler bound to `ctx`.
    pub fn new(ctx: Arc<DeviceContext>) -> Self {
        Self { ctx }
    }
}

impl IrqHandler for SwitchIrqHandler {
    fn handle_primary(&self) -> IrqReturn {
        handle_edge(&self.ctx)
    }

    fn handle_threaded(&self) -> IrqReturn {
        run_deferred(&self.ctx)
    }
}
