//! Bind/unbind gate shared by the interrupt halves and detach.
//!
//! Both interrupt halves enter the gate before touching device state. Detach
//! closes the gate and waits for every handler already inside to leave, so
//! the IRQ line is never freed and the register window never unmapped under a
//! running handler.
//!
//! State and in-flight count live in one `AtomicU32` so that "is the device
//! bound" and "count me in" are decided by a single CAS.
//!
//! Layout: `[state(8 bits) | in_flight(24 bits)]`

use core::sync::atomic::{AtomicU32, Ordering};

/// Binding state of a device instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BindState {
    /// Attached; handlers may run.
    Bound = 0,
    /// Detach in progress; new handler invocations are turned away.
    Unbinding = 1,
    /// Detach finished.
    Unbound = 2,
}

/// Packed state and in-flight handler count.
struct StateAndCount(AtomicU32);

impl StateAndCount {
    const STATE_SHIFT: u32 = 24;
    const COUNT_MASK: u32 = (1 << Self::STATE_SHIFT) - 1;
    const BOUND: u32 = 0;
    const UNBINDING: u32 = 1;
    const UNBOUND: u32 = 2;

    const fn new() -> Self {
        Self(AtomicU32::new(Self::BOUND << Self::STATE_SHIFT))
    }

    fn decode(raw: u32) -> BindState {
        match raw >> Self::STATE_SHIFT {
            Self::BOUND => BindState::Bound,
            Self::UNBINDING => BindState::Unbinding,
            _ => BindState::Unbound,
        }
    }

    #[inline]
    fn state(&self) -> BindState {
        Self::decode(self.0.load(Ordering::Acquire))
    }

    #[inline]
    fn count(&self) -> u32 {
        self.0.load(Ordering::Acquire) & Self::COUNT_MASK
    }

    /// Increments the count if and only if the state is `Bound`.
    fn try_acquire(&self) -> Result<(), BindState> {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            if current >> Self::STATE_SHIFT != Self::BOUND {
                return Err(Self::decode(current));
            }
            if current & Self::COUNT_MASK == Self::COUNT_MASK {
                return Err(BindState::Bound);
            }
            match self.0.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    #[inline]
    fn release(&self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }

    /// Moves `Bound` to `Unbinding`, keeping the count. Returns `false` if
    /// the state was not `Bound`.
    fn set_unbinding(&self) -> bool {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            if current >> Self::STATE_SHIFT != Self::BOUND {
                return false;
            }
            let next = (Self::UNBINDING << Self::STATE_SHIFT) | (current & Self::COUNT_MASK);
            match self.0.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    fn set_unbound(&self) {
        self.0
            .store(Self::UNBOUND << Self::STATE_SHIFT, Ordering::Release);
    }
}

/// Lifecycle gate of one bound device.
pub struct DeviceLifecycle {
    state_count: StateAndCount,
}

/// Proof that a handler is inside the gate; leaving is done on drop.
#[must_use]
pub struct InFlight<'a> {
    lifecycle: &'a DeviceLifecycle,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.lifecycle.state_count.release();
    }
}

impl DeviceLifecycle {
    /// Creates a gate in the `Bound` state.
    pub const fn new() -> Self {
        Self {
            state_count: StateAndCount::new(),
        }
    }

    /// Current binding state.
    #[inline]
    pub fn state(&self) -> BindState {
        self.state_count.state()
    }

    /// Number of handler invocations currently inside the gate.
    #[inline]
    pub fn in_flight(&self) -> usize {
        self.state_count.count() as usize
    }

    /// Enters the gate. Returns `None` once detach has started.
    ///
    /// Lock-free and bounded, usable from interrupt context.
    #[inline]
    pub fn try_enter(&self) -> Option<InFlight<'_>> {
        self.state_count
            .try_acquire()
            .ok()
            .map(|()| InFlight { lifecycle: self })
    }

    /// Closes the gate. Returns `false` if detach was already started.
    pub fn begin_unbind(&self) -> bool {
        self.state_count.set_unbinding()
    }

    /// Spins until no handler is inside the gate.
    pub fn wait_quiescent(&self) {
        while self.state_count.count() != 0 {
            core::hint::spin_loop();
        }
    }

    /// Like [`wait_quiescent`](Self::wait_quiescent) but gives up after
    /// `max_spins` iterations. Returns `true` if the gate drained.
    pub fn wait_quiescent_timeout(&self, max_spins: usize) -> bool {
        for _ in 0..max_spins {
            if self.state_count.count() == 0 {
                return true;
            }
            core::hint::spin_loop();
        }
        self.state_count.count() == 0
    }

    /// Marks detach as finished. Only valid after the gate drained.
    pub fn finish_unbind(&self) {
        debug_assert_eq!(self.in_flight(), 0);
        self.state_count.set_unbound();
    }
}

impl Default for DeviceLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for DeviceLifecycle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DeviceLifecycle")
            .field("state", &self.state())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_initial_state() {
        let lifecycle = DeviceLifecycle::new();
        assert_eq!(lifecycle.state(), BindState::Bound);
        assert_eq!(lifecycle.in_flight(), 0);
    }

    #[test]
    fn test_enter_and_leave() {
        let lifecycle = DeviceLifecycle::new();

        let a = lifecycle.try_enter().unwrap();
        let b = lifecycle.try_enter().unwrap();
        assert_eq!(lifecycle.in_flight(), 2);

        drop(a);
        assert_eq!(lifecycle.in_flight(), 1);
        drop(b);
        assert_eq!(lifecycle.in_flight(), 0);
    }

    #[test]
    fn test_unbind_turns_away_new_handlers() {
        let lifecycle = DeviceLifecycle::new();
        let running = lifecycle.try_enter().unwrap();

        assert!(lifecycle.begin_unbind());
        assert_eq!(lifecycle.state(), BindState::Unbinding);
        assert!(lifecycle.try_enter().is_none());
        // The handler that was already inside still counts.
        assert_eq!(lifecycle.in_flight(), 1);
        assert!(!lifecycle.wait_quiescent_timeout(1000));

        drop(running);
        lifecycle.wait_quiescent();
        lifecycle.finish_unbind();
        assert_eq!(lifecycle.state(), BindState::Unbound);
        assert!(lifecycle.try_enter().is_none());
    }

    #[test]
    fn test_double_unbind() {
        let lifecycle = DeviceLifecycle::new();
        assert!(lifecycle.begin_unbind());
        assert!(!lifecycle.begin_unbind());
    }
}
