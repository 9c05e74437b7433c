//! PHY state bookkeeping.
//!
//! The state is not stored directly. It is derived from when the current
//! transmission ends, whether a reception is in progress and when the medium
//! stops being reported busy, with a fixed priority: TX, then RX, then
//! CCA_BUSY, then IDLE. Every transition logs the interval the PHY leaves so
//! the trace reconstructs a gap-free timeline.

use embassy_time::{Duration, Instant};
use std::fmt;

use crate::simulation::trace::{TraceEvent, TraceLog};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhyState {
    Idle,
    CcaBusy,
    Tx,
    /// Synchronized on a frame and receiving it.
    Rx,
}

impl fmt::Display for PhyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PhyState::Idle => "IDLE",
            PhyState::CcaBusy => "CCA_BUSY",
            PhyState::Tx => "TX",
            PhyState::Rx => "RX",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct StateTimeline {
    receiving: bool,
    end_tx: Instant,
    end_rx: Instant,
    end_cca_busy: Instant,
    start_tx: Instant,
    start_rx: Instant,
    start_cca_busy: Instant,
    previous_state_change: Instant,
}

impl Default for StateTimeline {
    fn default() -> Self {
        let zero = Instant::from_ticks(0);
        Self {
            receiving: false,
            end_tx: zero,
            end_rx: zero,
            end_cca_busy: zero,
            start_tx: zero,
            start_rx: zero,
            start_cca_busy: zero,
            previous_state_change: zero,
        }
    }
}

impl StateTimeline {
    pub fn state(&self, now: Instant) -> PhyState {
        if self.end_tx > now {
            PhyState::Tx
        } else if self.receiving {
            PhyState::Rx
        } else if self.end_cca_busy > now {
            PhyState::CcaBusy
        } else {
            PhyState::Idle
        }
    }

    pub fn end_tx(&self) -> Instant {
        self.end_tx
    }

    pub fn end_rx(&self) -> Instant {
        self.end_rx
    }

    pub fn end_cca_busy(&self) -> Instant {
        self.end_cca_busy
    }

    pub fn start_tx(&self) -> Instant {
        self.start_tx
    }

    /// Start of the most recent reception.
    pub fn last_rx_start(&self) -> Instant {
        self.start_rx
    }

    /// When the medium was last released. Only meaningful while idle.
    pub fn idle_start(&self) -> Instant {
        self.end_cca_busy.max(self.end_rx).max(self.end_tx)
    }

    /// Time since the last state transition.
    pub fn state_duration(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.previous_state_change)
    }

    /// Time until the PHY would be idle if nothing new happened.
    pub fn delay_until_idle(&self, now: Instant) -> Duration {
        let end = match self.state(now) {
            PhyState::Rx => self.end_rx,
            PhyState::Tx => self.end_tx,
            PhyState::CcaBusy => self.end_cca_busy,
            PhyState::Idle => now,
        };
        end.saturating_duration_since(now)
    }

    fn log(trace: &mut TraceLog, start: Instant, end: Instant, state: PhyState) {
        if end > start {
            trace.record(
                start,
                TraceEvent::PhyState {
                    start,
                    duration: end - start,
                    state,
                },
            );
        }
    }

    fn log_previous_idle_and_cca_busy(&self, now: Instant, trace: &mut TraceLog) {
        let idle_start = self.idle_start();
        assert!(idle_start <= now, "idle period starts in the future");
        if self.end_cca_busy > self.end_rx && self.end_cca_busy > self.end_tx {
            let cca_start = self.end_tx.max(self.end_rx).max(self.start_cca_busy);
            Self::log(trace, cca_start, idle_start, PhyState::CcaBusy);
        }
        Self::log(trace, idle_start, now, PhyState::Idle);
    }

    fn log_current_cca_busy(&self, now: Instant, trace: &mut TraceLog) {
        let cca_start = self.end_rx.max(self.end_tx).max(self.start_cca_busy);
        Self::log(trace, cca_start, now, PhyState::CcaBusy);
    }

    /// Enter TX for `duration`. An ongoing reception is abandoned.
    pub fn switch_to_tx(&mut self, now: Instant, duration: Duration, trace: &mut TraceLog) {
        match self.state(now) {
            PhyState::Rx => {
                self.receiving = false;
                Self::log(trace, self.start_rx, now, PhyState::Rx);
                self.end_rx = now;
            }
            PhyState::CcaBusy => self.log_current_cca_busy(now, trace),
            PhyState::Idle => self.log_previous_idle_and_cca_busy(now, trace),
            PhyState::Tx => panic!("switch to TX while already transmitting"),
        }
        Self::log(trace, now, now + duration, PhyState::Tx);
        self.previous_state_change = now;
        self.end_tx = now + duration;
        self.start_tx = now;
    }

    /// Start receiving a frame that lasts `duration`.
    pub fn switch_to_rx(&mut self, now: Instant, duration: Duration, trace: &mut TraceLog) {
        match self.state(now) {
            PhyState::Idle => self.log_previous_idle_and_cca_busy(now, trace),
            PhyState::CcaBusy => self.log_current_cca_busy(now, trace),
            state => panic!("switch to RX from {state}"),
        }
        self.previous_state_change = now;
        self.receiving = true;
        self.start_rx = now;
        self.end_rx = now + duration;
    }

    /// The reception finished (successfully or not).
    pub fn switch_from_rx(&mut self, now: Instant, trace: &mut TraceLog) {
        assert!(self.receiving && self.state(now) == PhyState::Rx, "end of reception while not receiving");
        Self::log(trace, self.start_rx, now, PhyState::Rx);
        self.previous_state_change = now;
        self.receiving = false;
        self.end_rx = now;
    }

    /// Report the medium busy for at least `duration` from now.
    pub fn switch_maybe_to_cca_busy(&mut self, now: Instant, duration: Duration, trace: &mut TraceLog) {
        if self.state(now) == PhyState::Idle {
            self.log_previous_idle_and_cca_busy(now, trace);
        }
        self.start_cca_busy = now;
        self.end_cca_busy = self.end_cca_busy.max(now + duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(us: u64) -> Instant {
        Instant::from_micros(us)
    }

    fn us(us: u64) -> Duration {
        Duration::from_micros(us)
    }

    #[test]
    fn priority_is_tx_then_rx_then_cca() {
        let mut trace = TraceLog::new();
        let mut timeline = StateTimeline::default();
        assert_eq!(timeline.state(at(0)), PhyState::Idle);

        timeline.switch_maybe_to_cca_busy(at(10), us(100), &mut trace);
        assert_eq!(timeline.state(at(10)), PhyState::CcaBusy);

        timeline.switch_to_rx(at(20), us(50), &mut trace);
        assert_eq!(timeline.state(at(30)), PhyState::Rx);
        // Still receiving at the scheduled end until the end is processed.
        assert_eq!(timeline.state(at(70)), PhyState::Rx);
        timeline.switch_from_rx(at(70), &mut trace);
        assert_eq!(timeline.state(at(70)), PhyState::CcaBusy);
        assert_eq!(timeline.delay_until_idle(at(70)), us(40));

        timeline.switch_to_tx(at(80), us(20), &mut trace);
        assert_eq!(timeline.state(at(90)), PhyState::Tx);
        assert_eq!(timeline.state(at(100)), PhyState::CcaBusy);
        assert_eq!(timeline.state(at(110)), PhyState::Idle);
        assert_eq!(timeline.last_rx_start(), at(20));
    }

    #[test]
    fn tx_aborts_reception() {
        let mut trace = TraceLog::new();
        let mut timeline = StateTimeline::default();
        timeline.switch_to_rx(at(0), us(100), &mut trace);
        timeline.switch_to_tx(at(40), us(10), &mut trace);
        assert_eq!(timeline.state(at(45)), PhyState::Tx);
        assert_eq!(timeline.state(at(50)), PhyState::Idle);
        assert_eq!(timeline.end_rx(), at(40));
    }

    #[test]
    fn logged_intervals_cover_the_timeline() {
        let mut trace = TraceLog::new();
        let mut timeline = StateTimeline::default();
        timeline.switch_to_rx(at(10), us(30), &mut trace);
        timeline.switch_from_rx(at(40), &mut trace);
        timeline.switch_maybe_to_cca_busy(at(50), us(10), &mut trace);
        timeline.switch_to_tx(at(70), us(5), &mut trace);

        let intervals: Vec<(u64, u64, PhyState)> = trace
            .drain()
            .into_iter()
            .filter_map(|record| match record.event {
                TraceEvent::PhyState { start, duration, state } => Some((start.as_micros(), duration.as_micros(), state)),
                _ => None,
            })
            .collect();
        assert_eq!(
            intervals,
            vec![
                (0, 10, PhyState::Idle),
                (10, 30, PhyState::Rx),
                (40, 10, PhyState::Idle),
                (50, 10, PhyState::CcaBusy),
                (60, 10, PhyState::Idle),
                (70, 5, PhyState::Tx),
            ]
        );
    }

    #[test]
    #[should_panic(expected = "already transmitting")]
    fn double_tx_is_rejected() {
        let mut trace = TraceLog::new();
        let mut timeline = StateTimeline::default();
        timeline.switch_to_tx(at(0), us(10), &mut trace);
        timeline.switch_to_tx(at(5), us(10), &mut trace);
    }
}
