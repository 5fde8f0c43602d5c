use crate::host::IrqFlags;

/// Compatible strings the driver binds to.
pub const COMPATIBLE: &[&str] = &["gpio-ebaz-lkmTest02"];

/// Static configuration of the switch driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpioSwitchConfig {
    /// Major number of the control channel; `0` asks the host for a free one.
    pub channel_major: u32,
    /// Name the control channel is registered under.
    pub channel_name: &'static str,
    /// Name the interrupt handler is registered under.
    pub irq_name: &'static str,
    /// Flags passed with the interrupt handler request.
    pub irq_flags: IrqFlags,
    /// Signal delivered to the registered consumer on a press.
    pub signal: u32,
}

/// The implemention for GpioSwitchConfig
impl GpioSwitchConfig {
    /// Default control-channel major number.
    pub const DEFAULT_MAJOR: u32 = 64;
    /// Default signal number.
    pub const DEFAULT_SIGNAL: u32 = 44;

    /// The new function for GpioSwitchConfig
    pub fn new(channel_major: u32, channel_name: &'static str, signal: u32) -> Self {
        Self {
            channel_major,
            channel_name,
            signal,
            ..Self::default()
        }
    }

    /// Sets the control-channel major number.
    pub fn with_channel_major(mut self, major: u32) -> Self {
        self.channel_major = major;
        self
    }

    /// Sets the interrupt handler name.
    pub fn with_irq_name(mut self, name: &'static str) -> Self {
        self.irq_name = name;
        self
    }

    /// Sets the interrupt request flags.
    pub fn with_irq_flags(mut self, flags: IrqFlags) -> Self {
        self.irq_flags = flags;
        self
    }

    /// Sets the signal number.
    pub fn with_signal(mut self, signal: u32) -> Self {
        self.signal = signal;
        self
    }
}

impl Default for GpioSwitchConfig {
    fn default() -> Self {
        Self {
            channel_major: Self::DEFAULT_MAJOR,
            channel_name: "sw_irq_signal",
            irq_name: "gpio-switch",
            irq_flags: IrqFlags::TRIGGER_RISING | IrqFlags::SHARED,
            signal: Self::DEFAULT_SIGNAL,
        }
    }
}
