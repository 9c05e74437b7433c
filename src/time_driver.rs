//! embassy-time driver backed by the simulation's virtual clock.
//!
//! The discrete-event [`Scheduler`](crate::simulation::scheduler::Scheduler) publishes its current
//! time here every time it fires an event, so `embassy_time::Instant::now()` anywhere in the crate
//! (log formatting, ad-hoc diagnostics) reports simulated time instead of host time.
//!
//! The clock is per thread: every simulation runs single-threaded, and keeping the value thread local
//! lets independent runs (for example parallel unit tests) coexist without observing each other's time.

use core::task::Waker;
use embassy_time_driver::{Driver, time_driver_impl};
use std::cell::Cell;

thread_local! {
    static VIRTUAL_NOW: Cell<u64> = const { Cell::new(0) };
}

/// Publish the simulated time (in embassy ticks) for the calling thread.
pub(crate) fn set_virtual_now(ticks: u64) {
    VIRTUAL_NOW.with(|now| now.set(ticks));
}

/// Simulated time of the calling thread, in embassy ticks.
pub fn virtual_now() -> u64 {
    VIRTUAL_NOW.with(|now| now.get())
}

struct VirtualDriver;

impl Driver for VirtualDriver {
    fn now(&self) -> u64 {
        virtual_now()
    }

    fn schedule_wake(&self, _at: u64, waker: &Waker) {
        // No executor runs on the virtual clock; time advances only through the
        // event scheduler, so pending embassy timers are polled again right away.
        waker.wake_by_ref();
    }
}

time_driver_impl!(static DRIVER: VirtualDriver = VirtualDriver);
