//! # Page-table synchronization primitives
//!
//! Two locks cover the page-table manager:
//!
//! * [`SpinLock`] guards short, shared structures (the hop pool bitmap and
//!   the root hop region). Test-and-test-and-set, no fairness.
//! * [`TicketMutex`] serialises every operation on one address-space context.
//!   FIFO ordering, so a long map of many pages cannot starve a concurrent
//!   unmap on the same context.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod mutex;
mod raw_ticket;
mod spin_lock;

pub use mutex::{Mutex, MutexGuard};
pub use raw_ticket::RawTicket;
pub use spin_lock::{SpinLock, SpinLockGuard};

pub type TicketMutex<T> = Mutex<T, RawTicket>;

impl<T> TicketMutex<T> {
    pub const fn new(value: T) -> Self {
        Self::from_raw(RawTicket::new(), value)
    }
}

/// A raw lock without data, driven by [`Mutex`].
pub trait RawLock {
    fn raw_lock(&self);
    fn raw_try_lock(&self) -> bool;

    /// # Safety
    /// The caller must currently hold the lock.
    unsafe fn raw_unlock(&self);
}
