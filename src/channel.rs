//! Control channel through which a process registers for notifications.
//!
//! The host routes file operations on the channel identity to a
//! [`ChannelOps`] object. Opening allocates nothing; the only state touched
//! is the device's [`RegistrationSlot`].

use alloc::sync::Arc;

use axerrno::{AxResult, ax_err};

use crate::registration::{Pid, RegistrationSlot};

const IOC_TYPE_SHIFT: u32 = 8;

/// Encodes a payload-less control command, like Linux `_IO(type, nr)`.
pub const fn io_cmd(ty: u8, nr: u8) -> u32 {
    ((ty as u32) << IOC_TYPE_SHIFT) | nr as u32
}

/// Registers the calling process as the notification target.
pub const REGISTER_UAPP: u32 = io_cmd(b'R', b'g');
/// Drops the calling process's registration, if it holds it.
pub const UNREGISTER_UAPP: u32 = io_cmd(b'R', b'u');

/// File operations of a control channel, called by the host on behalf of a
/// user process.
pub trait ChannelOps: Send + Sync {
    /// A process opened the channel.
    fn open(&self, pid: Pid) -> AxResult;

    /// A process issued control command `cmd`.
    fn ioctl(&self, pid: Pid, cmd: u32, arg: usize) -> AxResult<usize>;

    /// A process closed its last handle on the channel.
    fn release(&self, pid: Pid);
}

/// The registration control channel of one device.
pub struct ControlChannel {
    slot: Arc<RegistrationSlot>,
}

impl ControlChannel {
    /// Creates a channel writing to `slot`.
    pub fn new(slot: Arc<RegistrationSlot>) -> Self {
        Self { slot }
    }

    fn unregister(&self, pid: Pid) {
        if self.slot.release(pid) {
            debug!("sw_irq_signal: userspace app with PID {} unregistered", pid);
        } else {
            trace!("sw_irq_signal: PID {} does not hold the registration", pid);
        }
    }
}

impl ChannelOps for ControlChannel {
    fn open(&self, pid: Pid) -> AxResult {
        trace!("sw_irq_signal: opened by PID {}", pid);
        Ok(())
    }

    fn ioctl(&self, pid: Pid, cmd: u32, _arg: usize) -> AxResult<usize> {
        match cmd {
            REGISTER_UAPP => {
                if let Some(prev) = self.slot.register(pid) {
                    if prev != pid {
                        debug!("sw_irq_signal: PID {} replaces PID {}", pid, prev);
                    }
                }
                info!("sw_irq_signal: userspace app with PID {} is registered", pid);
                Ok(0)
            }
            UNREGISTER_UAPP => {
                self.unregister(pid);
                Ok(0)
            }
            _ => ax_err!(InvalidInput, "unknown control command"),
        }
    }

    fn release(&self, pid: Pid) {
        self.unregister(pid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> (Arc<RegistrationSlot>, ControlChannel) {
        let slot = Arc::new(RegistrationSlot::new());
        let channel = ControlChannel::new(slot.clone());
        (slot, channel)
    }

    #[test]
    fn test_command_codes() {
        assert_eq!(REGISTER_UAPP, 0x5267);
        assert_ne!(REGISTER_UAPP, UNREGISTER_UAPP);
    }

    #[test]
    fn test_open_allocates_nothing() {
        let (slot, channel) = channel();
        channel.open(Pid(1)).unwrap();
        assert_eq!(slot.holder(), None);
    }

    #[test]
    fn test_register_and_close() {
        let (slot, channel) = channel();
        channel.open(Pid(1)).unwrap();
        assert_eq!(channel.ioctl(Pid(1), REGISTER_UAPP, 0), Ok(0));
        assert_eq!(slot.holder(), Some(Pid(1)));

        channel.release(Pid(1));
        assert_eq!(slot.holder(), None);
    }

    #[test]
    fn test_foreign_close_keeps_holder() {
        let (slot, channel) = channel();
        channel.ioctl(Pid(1), REGISTER_UAPP, 0).unwrap();
        channel.ioctl(Pid(2), REGISTER_UAPP, 0).unwrap();
        assert_eq!(slot.holder(), Some(Pid(2)));

        // The replaced process closing must not drop the new holder.
        channel.release(Pid(1));
        assert_eq!(slot.holder(), Some(Pid(2)));
    }

    #[test]
    fn test_explicit_unregister() {
        let (slot, channel) = channel();
        channel.ioctl(Pid(3), REGISTER_UAPP, 0).unwrap();
        channel.ioctl(Pid(4), UNREGISTER_UAPP, 0).unwrap();
        assert_eq!(slot.holder(), Some(Pid(3)));
        channel.ioctl(Pid(3), UNREGISTER_UAPP, 0).unwrap();
        assert_eq!(slot.holder(), None);
    }

    #[test]
    fn test_unknown_command() {
        let (slot, channel) = channel();
        assert!(channel.ioctl(Pid(1), io_cmd(b'R', b'x'), 0).is_err());
        assert_eq!(slot.holder(), None);
    }
}
