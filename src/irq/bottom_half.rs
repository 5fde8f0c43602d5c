use crate::context::{DeviceContext, PinLevel, SwitchStats};
use crate::host::IrqReturn;

/// Bottom half: signals the registered consumer if the switch is pressed.
///
/// Runs in the host's threaded context and may block inside signal delivery.
/// The registration lock is only held to copy the pid out.
pub fn run_deferred(ctx: &DeviceContext) -> IrqReturn {
    let Some(_in_flight) = ctx.lifecycle().try_enter() else {
        return IrqReturn::None;
    };

    // Consume the mark before loading the value: an edge landing after this
    // point re-arms the mark and triggers another run.
    if !ctx.take_pending() {
        trace!("{}: deferred run with nothing pending", ctx.name());
        return IrqReturn::Handled;
    }
    let value = ctx.last_observed();
    let holder = ctx.registration().holder();

    match (holder, PinLevel::classify(value)) {
        (Some(pid), PinLevel::Pressed) => {
            let stats = ctx.stats();
            match ctx.sender().send_signal(pid, ctx.signal()) {
                Ok(()) => {
                    SwitchStats::bump(&stats.notifications);
                    debug!("{}: signal {} sent to PID {}", ctx.name(), ctx.signal(), pid);
                }
                Err(e) => {
                    SwitchStats::bump(&stats.notify_errors);
                    warn!("{}: error sending signal to PID {}: {}", ctx.name(), pid, e);
                }
            }
        }
        (None, PinLevel::Pressed) => {
            trace!("{}: pressed, no userspace app registered", ctx.name());
        }
        (_, PinLevel::Released) => {}
    }

    IrqReturn::Handled
}
