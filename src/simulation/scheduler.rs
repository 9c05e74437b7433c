//! Discrete-event scheduler driving simulated time.
//!
//! Events are kept in a `BTreeMap` keyed by `(virtual tick, sequence)`, so the
//! earliest deadline is always the first entry and events sharing a timestamp
//! fire in the order they were scheduled. Time only moves when an event is
//! popped; nothing here reads the host clock.
//!
//! Components never hold a reference to the scheduler. They receive a
//! `&mut dyn EventQueue<E>` for the duration of a handler and keep the returned
//! [`EventId`]s (usually wrapped in a [`Timer`]) to cancel or query later.

use crate::time_driver;
use embassy_time::{Duration, Instant};
use std::collections::BTreeMap;

/// Handle of a scheduled event. Stays valid (but no longer pending) after the
/// event fired or was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId {
    at: u64,
    seq: u64,
}

impl EventId {
    /// Virtual time the event was scheduled for.
    pub fn deadline(&self) -> Instant {
        Instant::from_ticks(self.at)
    }
}

/// The scheduling surface handed to protocol components.
pub trait EventQueue<E> {
    /// Current simulated time.
    fn now(&self) -> Instant;
    /// Schedule `event` to fire `delay` after now.
    fn schedule(&mut self, delay: Duration, event: E) -> EventId;
    /// Cancel a pending event. Returns false if it already fired or was cancelled.
    fn cancel(&mut self, id: EventId) -> bool;
    /// Whether the event is still waiting to fire.
    fn is_pending(&self, id: EventId) -> bool;
}

/// Single-threaded event queue with a virtual clock.
pub struct Scheduler<E> {
    now: Instant,
    next_seq: u64,
    queue: BTreeMap<(u64, u64), E>,
}

impl<E> Default for Scheduler<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Scheduler<E> {
    pub fn new() -> Self {
        time_driver::set_virtual_now(0);
        Self {
            now: Instant::from_ticks(0),
            next_seq: 0,
            queue: BTreeMap::new(),
        }
    }

    /// Schedule at an absolute time. Scheduling in the past is a programming error.
    pub fn schedule_at(&mut self, at: Instant, event: E) -> EventId {
        assert!(at >= self.now, "event scheduled in the past: {:?} < {:?}", at, self.now);
        let id = EventId {
            at: at.as_ticks(),
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.queue.insert((id.at, id.seq), event);
        id
    }

    /// Time of the earliest pending event.
    pub fn peek_time(&self) -> Option<Instant> {
        self.queue.keys().next().map(|&(at, _)| Instant::from_ticks(at))
    }

    /// Remove the earliest event and advance the clock to its deadline.
    pub fn pop(&mut self) -> Option<(Instant, E)> {
        let ((at, _), event) = self.queue.pop_first()?;
        let at = Instant::from_ticks(at);
        debug_assert!(at >= self.now);
        self.set_now(at);
        Some((at, event))
    }

    /// Advance the clock without firing anything (used to stop a run at a fixed time).
    pub fn advance_to(&mut self, at: Instant) {
        if at > self.now {
            self.set_now(at);
        }
    }

    fn set_now(&mut self, at: Instant) {
        self.now = at;
        time_driver::set_virtual_now(at.as_ticks());
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl<E> EventQueue<E> for Scheduler<E> {
    fn now(&self) -> Instant {
        self.now
    }

    fn schedule(&mut self, delay: Duration, event: E) -> EventId {
        let at = self.now + delay;
        self.schedule_at(at, event)
    }

    fn cancel(&mut self, id: EventId) -> bool {
        self.queue.remove(&(id.at, id.seq)).is_some()
    }

    fn is_pending(&self, id: EventId) -> bool {
        self.queue.contains_key(&(id.at, id.seq))
    }
}

/// A cancellable one-shot slot. At most one event per slot may be outstanding.
#[derive(Debug, Default, Clone, Copy)]
pub struct Timer {
    id: Option<EventId>,
}

impl Timer {
    pub const fn new() -> Self {
        Self { id: None }
    }

    /// Arm the timer. Arming a timer that is still running is an invariant violation.
    pub fn arm<E>(&mut self, queue: &mut dyn EventQueue<E>, delay: Duration, event: E) {
        assert!(!self.is_running(queue), "one-shot timer armed twice");
        self.id = Some(queue.schedule(delay, event));
    }

    pub fn is_running<E>(&self, queue: &dyn EventQueue<E>) -> bool {
        self.id.is_some_and(|id| queue.is_pending(id))
    }

    /// Cancel the outstanding event, if any. Returns true if something was cancelled.
    pub fn cancel<E>(&mut self, queue: &mut dyn EventQueue<E>) -> bool {
        match self.id.take() {
            Some(id) => queue.cancel(id),
            None => false,
        }
    }

    /// Deadline of the outstanding event.
    pub fn deadline<E>(&self, queue: &dyn EventQueue<E>) -> Option<Instant> {
        self.id.filter(|id| queue.is_pending(*id)).map(|id| id.deadline())
    }
}
