//! Interference tracking and packet error rate computation.
//!
//! Every signal reaching a PHY, decodable or not, is registered here as an
//! [`InterferenceEvent`]. For a frame being received the helper reconstructs the
//! piecewise-constant interference profile over the frame's airtime from the
//! other events, then walks it segment by segment through the error-rate model.
//!
//! Events are owned by value and addressed by a monotonically increasing
//! [`RxEventId`]; anything scheduled against an event (the end-of-reception
//! timer) keeps only the id and must cope with the event having been evicted.

use super::error_rate::chunk_success_rate;
use super::mode::{WifiMode, WifiPreamble};
use embassy_time::{Duration, Instant, TICK_HZ};

/// Boltzmann constant as used by the reference model, in J/K.
pub const BOLTZMANN: f64 = 1.3803e-23;
/// Receiver reference temperature in K.
const NOISE_TEMPERATURE: f64 = 290.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RxEventId(u64);

/// A signal present on the medium at one receiver.
#[derive(Debug, Clone)]
pub struct InterferenceEvent {
    pub id: RxEventId,
    pub size: u32,
    pub mode: WifiMode,
    pub preamble: WifiPreamble,
    pub start: Instant,
    pub end: Instant,
    /// Received power in W.
    pub rx_power_w: f64,
}

impl InterferenceEvent {
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Whether `t` lies in the half-open airtime `[start, end)`.
    fn covers(&self, t: Instant) -> bool {
        self.start <= t && t < self.end
    }
}

/// A step of the interference profile: at `time` the total interference
/// power changes by `delta` W.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NiChange {
    pub time: Instant,
    pub delta: f64,
}

/// Interference profile over one event's airtime.
///
/// `changes` starts with `(start, initial)` and ends with `(end, 0)`; in between
/// are the steps caused by other events starting or ending strictly inside the
/// airtime, ordered by time.
#[derive(Debug, Clone)]
pub struct NoiseInterference {
    pub initial_w: f64,
    pub changes: Vec<NiChange>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SnrPer {
    /// Linear SNR at the start of the frame.
    pub snr: f64,
    pub per: f64,
}

fn seconds(duration: Duration) -> f64 {
    duration.as_ticks() as f64 / TICK_HZ as f64
}

pub struct InterferenceHelper {
    events: Vec<InterferenceEvent>,
    next_id: u64,
    max_packet_duration: Duration,
    /// Receiver noise figure as a linear ratio.
    noise_figure: f64,
}

impl InterferenceHelper {
    pub fn new(noise_figure_db: f64) -> Self {
        Self {
            events: Vec::new(),
            next_id: 0,
            max_packet_duration: Duration::from_ticks(0),
            noise_figure: 10f64.powf(noise_figure_db / 10.0),
        }
    }

    pub fn noise_figure(&self) -> f64 {
        self.noise_figure
    }

    /// Longest airtime seen so far.
    pub fn max_packet_duration(&self) -> Duration {
        self.max_packet_duration
    }

    /// Register a signal arriving `now`.
    ///
    /// Events that ended before `now - max_packet_duration` can no longer
    /// overlap any frame still on the air and are dropped here.
    pub fn add(&mut self, now: Instant, size: u32, mode: WifiMode, preamble: WifiPreamble, duration: Duration, rx_power_w: f64) -> RxEventId {
        assert!(rx_power_w >= 0.0, "negative received power {rx_power_w}");
        if duration > self.max_packet_duration {
            self.max_packet_duration = duration;
        }
        if let Some(horizon) = now.checked_sub(self.max_packet_duration) {
            self.events.retain(|event| event.end > horizon);
        }

        let id = RxEventId(self.next_id);
        self.next_id += 1;
        self.events.push(InterferenceEvent {
            id,
            size,
            mode,
            preamble,
            start: now,
            end: now + duration,
            rx_power_w,
        });
        id
    }

    /// Look up a tracked event. `None` once it has been evicted.
    pub fn get(&self, id: RxEventId) -> Option<&InterferenceEvent> {
        self.events
            .binary_search_by_key(&id, |event| event.id)
            .ok()
            .map(|index| &self.events[index])
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Forget every tracked event (used when the PHY is reset).
    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// SNR of a signal of `signal_w` against thermal noise plus `interference_w`.
    pub fn snr(&self, signal_w: f64, interference_w: f64, mode: WifiMode) -> f64 {
        let noise_floor = BOLTZMANN * NOISE_TEMPERATURE * mode.bandwidth_hz() as f64;
        signal_w / (noise_floor * self.noise_figure + interference_w)
    }

    /// Success probability of `duration` worth of bits sent in `mode` at `snr`.
    pub fn chunk_success_rate(&self, snr: f64, duration: Duration, mode: WifiMode) -> f64 {
        if duration.as_ticks() == 0 {
            return 1.0;
        }
        let nbits = (mode.phy_rate() as f64 * seconds(duration)) as u64;
        chunk_success_rate(mode, snr, nbits)
    }

    /// Interference profile seen by `target` from every other tracked event.
    pub fn noise_interference(&self, target: &InterferenceEvent) -> NoiseInterference {
        let mut initial_w = 0.0;
        let mut inner = Vec::new();
        for other in self.events.iter().filter(|event| event.id != target.id) {
            if other.covers(target.start) {
                initial_w += other.rx_power_w;
            }
            if other.start > target.start && other.start < target.end {
                inner.push(NiChange {
                    time: other.start,
                    delta: other.rx_power_w,
                });
            }
            if other.end > target.start && other.end < target.end {
                inner.push(NiChange {
                    time: other.end,
                    delta: -other.rx_power_w,
                });
            }
        }
        inner.sort_by_key(|change| change.time);

        let mut changes = Vec::with_capacity(inner.len() + 2);
        changes.push(NiChange {
            time: target.start,
            delta: initial_w,
        });
        changes.extend(inner);
        changes.push(NiChange { time: target.end, delta: 0.0 });
        NoiseInterference { initial_w, changes }
    }

    /// Packet error rate of `event` given its interference profile.
    ///
    /// The PLCP preamble is assumed to always be acquired; the header is
    /// evaluated in the lowest mode of the channel width and the payload in the
    /// frame's own mode.
    pub fn per(&self, event: &InterferenceEvent, ni: &NoiseInterference) -> f64 {
        let width = event.mode.width();
        let header_mode = width.header_mode();
        let header_start = event.start + width.preamble_duration();
        let payload_start = header_start + width.header_duration();

        let mut psr = 1.0;
        let mut level = ni.initial_w;
        let mut previous = event.start;
        for change in ni.changes.iter().skip(1) {
            let current = change.time;
            assert!(current >= previous, "interference profile out of order");
            let snr = self.snr(event.rx_power_w, level, event.mode);

            let header_overlap = overlap(previous, current, header_start, payload_start);
            psr *= self.chunk_success_rate(snr, header_overlap, header_mode);
            let payload_overlap = overlap(previous, current, payload_start, event.end);
            psr *= self.chunk_success_rate(snr, payload_overlap, event.mode);

            level += change.delta;
            previous = current;
        }
        1.0 - psr
    }

    /// SNR at the start of `id` and its packet error rate. `None` if the event is gone.
    pub fn calculate_snr_per(&self, id: RxEventId) -> Option<SnrPer> {
        let event = self.get(id)?;
        let ni = self.noise_interference(event);
        let snr = self.snr(event.rx_power_w, ni.initial_w, event.mode);
        let per = self.per(event, &ni);
        Some(SnrPer { snr, per })
    }

    /// Total received power of all tracked events covering `t`.
    pub fn energy_at(&self, t: Instant) -> f64 {
        self.events.iter().filter(|event| event.covers(t)).map(|event| event.rx_power_w).sum()
    }

    /// How long, from `now`, the aggregate energy on the medium stays at or
    /// above `threshold_w`. Zero if it is already below.
    pub fn energy_duration(&self, now: Instant, threshold_w: f64) -> Duration {
        let mut level = 0.0;
        let mut changes = Vec::new();
        for event in &self.events {
            if event.covers(now) {
                level += event.rx_power_w;
            } else if event.start > now {
                changes.push(NiChange {
                    time: event.start,
                    delta: event.rx_power_w,
                });
            }
            if event.end > now {
                changes.push(NiChange {
                    time: event.end,
                    delta: -event.rx_power_w,
                });
            }
        }
        changes.sort_by_key(|change| change.time);

        let mut end = now;
        for change in changes {
            if level < threshold_w {
                break;
            }
            end = change.time;
            level += change.delta;
        }
        end - now
    }
}

/// Length of the intersection of `[a_start, a_end)` and `[b_start, b_end)`.
fn overlap(a_start: Instant, a_end: Instant, b_start: Instant, b_end: Instant) -> Duration {
    let start = a_start.max(b_start);
    let end = a_end.min(b_end);
    end.checked_duration_since(start).unwrap_or(Duration::from_ticks(0))
}
