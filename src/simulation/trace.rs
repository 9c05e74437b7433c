//! Bounded capture of observability trace points.
//!
//! PHYs and station managers record what they do (state intervals, end of
//! reception outcomes, rate and power changes) into their own [`TraceLog`].
//! The network loop drains those logs after each event, tags every record with
//! the node it came from and keeps them in its global log for inspection.
//!
//! A log never grows past its capacity: the oldest record is dropped and a
//! warning is logged the first time that happens.

use embassy_time::{Duration, Instant};
use std::collections::VecDeque;

use crate::wifi::frame::Mac48Address;
use crate::wifi::mode::WifiMode;
use crate::wifi::phy_state::PhyState;

/// Maximum number of records a log holds before discarding the oldest.
pub const TRACE_BUFFER_CAPACITY: usize = 10000;

#[derive(Debug, Clone, PartialEq)]
pub enum TraceEvent {
    /// The PHY spent `duration` from `start` in `state`.
    PhyState { start: Instant, duration: Duration, state: PhyState },
    /// A reception finished; `success` tells whether it was decoded.
    EndOfSync { mode: WifiMode, snr: f64, per: f64, success: bool },
    /// The PHY started transmitting.
    TxStart { mode: WifiMode, size: u32, power_dbm: f64 },
    RateChange { peer: Mac48Address, old: WifiMode, new: WifiMode },
    PowerChange { peer: Mac48Address, old: u8, new: u8 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TraceRecord {
    pub timestamp: Instant,
    /// Set when the network loop collects the record.
    pub node_id: Option<u32>,
    pub event: TraceEvent,
}

#[derive(Debug)]
pub struct TraceLog {
    records: VecDeque<TraceRecord>,
    capacity: usize,
    dropped: u64,
}

impl Default for TraceLog {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceLog {
    pub fn new() -> Self {
        Self::with_capacity(TRACE_BUFFER_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "trace log needs room for at least one record");
        Self {
            records: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            dropped: 0,
        }
    }

    /// Record an untagged event.
    pub fn record(&mut self, timestamp: Instant, event: TraceEvent) {
        self.push(TraceRecord {
            timestamp,
            node_id: None,
            event,
        });
    }

    /// Push a record, popping the oldest one if at capacity.
    pub fn push(&mut self, record: TraceRecord) {
        if self.records.len() >= self.capacity {
            if self.dropped == 0 {
                log::warn!("Trace log full ({} records), dropping oldest entries", self.capacity);
            }
            self.dropped += 1;
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// Remove and return every buffered record.
    pub fn drain(&mut self) -> Vec<TraceRecord> {
        self.records.drain(..).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TraceRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of records discarded because the log was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
