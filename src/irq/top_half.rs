use crate::context::{DeviceContext, PinLevel, SwitchStats};
use crate::gpio::CHANNEL1;
use crate::host::IrqReturn;

/// Top half: claims the edge and hands it to the bottom half.
///
/// Runs in interrupt context. Takes only the register spinlock, for the
/// duration of three register accesses, and never allocates.
pub fn handle_edge(ctx: &DeviceContext) -> IrqReturn {
    let Some(_in_flight) = ctx.lifecycle().try_enter() else {
        return IrqReturn::None;
    };
    let stats = ctx.stats();

    let claimed = ctx.with_regs(|regs| {
        if regs.irq_status() & CHANNEL1 == 0 {
            // Another device on the shared line.
            return None;
        }
        let value = regs.data();
        ctx.record_observed(value);
        regs.ack_irq(CHANNEL1);
        Some(value)
    });

    let value = match claimed {
        Some(Some(value)) => value,
        _ => {
            SwitchStats::bump(&stats.spurious);
            return IrqReturn::None;
        }
    };

    SwitchStats::bump(&stats.edges);
    match PinLevel::classify(value) {
        PinLevel::Pressed => {
            SwitchStats::bump(&stats.presses);
            trace!("{}: irq {} gpio value {:#x}, button pressed", ctx.name(), ctx.irq(), value);
        }
        PinLevel::Released => {
            SwitchStats::bump(&stats.releases);
            trace!("{}: irq {} gpio value {:#x}, button released", ctx.name(), ctx.irq(), value);
        }
    }

    if ctx.mark_pending() {
        SwitchStats::bump(&stats.coalesced);
        IrqReturn::Handled
    } else {
        IrqReturn::WakeThread
    }
}
