//! Error kinds raised by attach and by notification delivery.

use axerrno::AxError;

/// Why an attach attempt failed.
///
/// Whatever the variant, every resource the attempt had acquired was released
/// before the error was returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachError {
    /// A driver instance is already bound to this hardware node.
    AlreadyBound,
    /// The resource descriptor has no memory region.
    ResourceMissing,
    /// The memory region is already reserved by someone else.
    RegionBusy,
    /// The region could not be mapped, or is too small for the register block.
    MapFailed,
    /// The resource descriptor has no interrupt line.
    IrqMissing,
    /// The interrupt line could not be claimed.
    IrqRegistrationFailed(AxError),
    /// The control-channel identity is already taken.
    ChannelRegistrationFailed(AxError),
}

impl core::fmt::Display for AttachError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::AlreadyBound => write!(f, "device already bound"),
            Self::ResourceMissing => write!(f, "io region resource not defined"),
            Self::RegionBusy => write!(f, "mem region not requested"),
            Self::MapFailed => write!(f, "could not remap io region"),
            Self::IrqMissing => write!(f, "could not get irq number 0"),
            Self::IrqRegistrationFailed(e) => write!(f, "could not request irq: {:?}", e),
            Self::ChannelRegistrationFailed(e) => {
                write!(f, "could not register control channel: {:?}", e)
            }
        }
    }
}

impl From<AttachError> for AxError {
    fn from(err: AttachError) -> Self {
        match err {
            AttachError::AlreadyBound => AxError::AlreadyExists,
            AttachError::ResourceMissing => AxError::NotFound,
            AttachError::RegionBusy => AxError::ResourceBusy,
            AttachError::MapFailed => AxError::BadAddress,
            AttachError::IrqMissing => AxError::NotFound,
            AttachError::IrqRegistrationFailed(e) | AttachError::ChannelRegistrationFailed(e) => e,
        }
    }
}

/// Why a signal could not be delivered. Never fatal to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyError {
    /// The target process no longer exists.
    NoSuchProcess,
    /// The host refused delivery.
    Rejected(AxError),
}

impl core::fmt::Display for NotifyError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NoSuchProcess => write!(f, "no such process"),
            Self::Rejected(e) => write!(f, "signal rejected: {:?}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attach_error_to_ax_error() {
        assert_eq!(AxError::from(AttachError::RegionBusy), AxError::ResourceBusy);
        assert_eq!(AxError::from(AttachError::IrqMissing), AxError::NotFound);
        assert_eq!(
            AxError::from(AttachError::ChannelRegistrationFailed(AxError::AlreadyExists)),
            AxError::AlreadyExists
        );
    }
}
