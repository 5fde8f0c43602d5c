//! The single-consumer registration slot.
//!
//! Written from process context by the control channel, read by the deferred
//! notifier. The lock is held only to copy or swap the identity, never across
//! signal delivery.

use spin::Mutex;

/// Identity of a user process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(pub u32);

impl core::fmt::Display for Pid {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Holds at most one registered consumer.
///
/// ```text
/// Empty --register--> Registered --release by holder / clear--> Empty
///                     Registered --register(other)--> Registered(other)
/// ```
#[derive(Debug, Default)]
pub struct RegistrationSlot {
    holder: Mutex<Option<Pid>>,
}

impl RegistrationSlot {
    /// Creates an empty slot.
    pub const fn new() -> Self {
        Self {
            holder: Mutex::new(None),
        }
    }

    /// Registers `pid`, replacing any current holder. Returns the replaced
    /// holder, if any.
    pub fn register(&self, pid: Pid) -> Option<Pid> {
        self.holder.lock().replace(pid)
    }

    /// Clears the slot if `pid` is the current holder.
    ///
    /// Returns `true` if the slot was cleared.
    pub fn release(&self, pid: Pid) -> bool {
        let mut holder = self.holder.lock();
        if *holder == Some(pid) {
            *holder = None;
            true
        } else {
            false
        }
    }

    /// Clears the slot unconditionally, returning the previous holder.
    pub fn clear(&self) -> Option<Pid> {
        self.holder.lock().take()
    }

    /// Current holder.
    #[inline]
    pub fn holder(&self) -> Option<Pid> {
        *self.holder.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_replaces() {
        let slot = RegistrationSlot::new();
        assert_eq!(slot.register(Pid(10)), None);
        assert_eq!(slot.register(Pid(20)), Some(Pid(10)));
        assert_eq!(slot.holder(), Some(Pid(20)));
    }

    #[test]
    fn test_register_is_idempotent() {
        let slot = RegistrationSlot::new();
        slot.register(Pid(10));
        assert_eq!(slot.register(Pid(10)), Some(Pid(10)));
        assert_eq!(slot.holder(), Some(Pid(10)));
    }

    #[test]
    fn test_release_checks_identity() {
        let slot = RegistrationSlot::new();
        slot.register(Pid(10));

        assert!(!slot.release(Pid(99)));
        assert_eq!(slot.holder(), Some(Pid(10)));

        assert!(slot.release(Pid(10)));
        assert_eq!(slot.holder(), None);

        // Re-entering Registered after Empty.
        slot.register(Pid(11));
        assert_eq!(slot.clear(), Some(Pid(11)));
        assert_eq!(slot.holder(), None);
    }
}
