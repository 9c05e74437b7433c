//! Saturated traffic source: a minimal DCF that always has a frame to send.
//!
//! The source waits until the medium has been idle (physically and by NAV)
//! for DIFS (EIFS after a reception error) plus a random backoff, then hands
//! its frame to MAC low. It learns the outcome through [`MacLowListener`]
//! callbacks and reacts after the device returns: on success it moves to a new
//! frame with the minimum contention window, on failure it doubles the window
//! and retries until the station manager's retry limit drops the frame.

use embassy_time::{Duration, Instant};
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;

use super::scheduler::{EventQueue, Timer};
use crate::wifi::device::{DeviceEvent, WifiDevice};
use crate::wifi::frame::{Frame, FrameKind, Mac48Address};
use crate::wifi::mac_low::{AckPolicy, MacLowListener, TxParams};
use crate::wifi::mode::WifiMode;

pub const CW_MIN: u32 = 15;
pub const CW_MAX: u32 = 1023;

fn default_packet_size() -> u32 {
    1000
}

/// A flow of back-to-back frames from one node.
#[derive(Debug, Clone, Deserialize)]
pub struct TrafficConfig {
    /// Receiving node; broadcast when absent.
    #[serde(default)]
    pub destination: Option<u32>,
    /// MSDU payload size in bytes.
    #[serde(default = "default_packet_size")]
    pub packet_size: u32,
    /// When the first frame is offered, in microseconds.
    #[serde(default)]
    pub start_us: u64,
    /// Stop after this many frames were delivered or dropped.
    #[serde(default)]
    pub max_packets: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrafficEvent {
    /// Try to access the medium.
    Access,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrafficStats {
    /// Data transmissions, retries included.
    pub data_sent: u64,
    pub rts_sent: u64,
    /// Frames acknowledged by the receiver (or sent, for broadcast).
    pub delivered: u64,
    /// Frames given up after the retry limit.
    pub dropped: u64,
    pub missed_cts: u64,
    pub missed_ack: u64,
    /// Frames delivered to this node by MAC low.
    pub received: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Acked,
    MissedCts,
    MissedAck,
    Sent,
    Cancelled,
}

struct Flow {
    destination: Mac48Address,
    packet_size: u32,
    max_packets: Option<u64>,
    /// Identifier of the frame being delivered.
    packet_id: u64,
    finished: u64,
    cw: u32,
    /// Slots drawn for the current access attempt.
    backoff_slots: Option<u32>,
    in_flight: bool,
}

pub struct SaturatedSource {
    flow: Option<Flow>,
    ack_policy: AckPolicy,
    rng: StdRng,
    access: Timer,
    outcome: Option<Outcome>,
    stats: TrafficStats,
}

impl SaturatedSource {
    /// A source for `config`, or a node that only receives when `config` is `None`.
    pub fn new(config: Option<&TrafficConfig>, ack_policy: AckPolicy, seed: u64) -> Self {
        let flow = config.map(|config| Flow {
            destination: config.destination.map(Mac48Address::from_node_id).unwrap_or(Mac48Address::BROADCAST),
            packet_size: config.packet_size,
            max_packets: config.max_packets,
            packet_id: 0,
            finished: 0,
            cw: CW_MIN,
            backoff_slots: None,
            in_flight: false,
        });
        Self {
            flow,
            ack_policy,
            rng: StdRng::seed_from_u64(seed),
            access: Timer::new(),
            outcome: None,
            stats: TrafficStats::default(),
        }
    }

    pub fn stats(&self) -> &TrafficStats {
        &self.stats
    }

    /// Offer the first frame after `delay`.
    pub fn start<Q>(&mut self, queue: &mut Q, delay: Duration)
    where
        Q: EventQueue<TrafficEvent> + EventQueue<DeviceEvent>,
    {
        if self.flow.is_some() {
            let queue: &mut dyn EventQueue<TrafficEvent> = queue;
            self.access.arm(queue, delay, TrafficEvent::Access);
        }
    }

    pub fn handle_event<Q>(&mut self, queue: &mut Q, device: &mut WifiDevice, event: TrafficEvent)
    where
        Q: EventQueue<TrafficEvent> + EventQueue<DeviceEvent>,
    {
        match event {
            TrafficEvent::Access => self.try_access(queue, device),
        }
    }

    /// React to whatever the device reported while handling its last event.
    pub fn after_device_event<Q>(&mut self, queue: &mut Q, device: &mut WifiDevice)
    where
        Q: EventQueue<TrafficEvent> + EventQueue<DeviceEvent>,
    {
        let Some(outcome) = self.outcome.take() else {
            return;
        };
        let Some(flow) = self.flow.as_mut() else {
            return;
        };
        let now = EventQueue::<DeviceEvent>::now(queue);
        flow.in_flight = false;
        let peer = flow.destination;
        match outcome {
            Outcome::Acked | Outcome::Sent => {
                flow.cw = CW_MIN;
                Self::next_packet(flow);
                self.stats.delivered += 1;
            }
            Outcome::MissedCts => {
                flow.cw = (flow.cw * 2 + 1).min(CW_MAX);
                if !device.manager_mut().need_rts_retransmission(peer) {
                    debug!("{peer}: RTS retry limit reached, dropping frame {}", flow.packet_id);
                    device.manager_mut().report_final_rts_failed(now, peer);
                    flow.cw = CW_MIN;
                    Self::next_packet(flow);
                    self.stats.dropped += 1;
                }
            }
            Outcome::MissedAck => {
                flow.cw = (flow.cw * 2 + 1).min(CW_MAX);
                if !device.manager_mut().need_data_retransmission(peer) {
                    debug!("{peer}: data retry limit reached, dropping frame {}", flow.packet_id);
                    device.manager_mut().report_final_data_failed(now, peer);
                    flow.cw = CW_MIN;
                    Self::next_packet(flow);
                    self.stats.dropped += 1;
                }
            }
            Outcome::Cancelled => {}
        }
        if flow.max_packets.is_some_and(|max| flow.finished >= max) {
            debug!("flow to {peer} finished after {} frames", flow.finished);
            return;
        }
        self.schedule_access(queue, device);
    }

    fn next_packet(flow: &mut Flow) {
        flow.packet_id += 1;
        flow.finished += 1;
    }

    /// Earliest time the backoff of the current attempt can end.
    fn ready_at(&mut self, now: Instant, device: &WifiDevice) -> Instant {
        let slots = match self.flow.as_mut() {
            Some(flow) => {
                let cw = flow.cw;
                *flow.backoff_slots.get_or_insert_with(|| self.rng.gen_range(0..=cw))
            }
            None => 0,
        };
        let params = device.mac().parameters();
        let idle_since = device.phy().idle_since(now).max(device.mac().nav_end());
        let ifs = if device.mac().last_rx_failed() { params.difs + params.eifs_no_difs } else { params.difs };
        idle_since + ifs + params.slot * slots
    }

    fn schedule_access<Q>(&mut self, queue: &mut Q, device: &WifiDevice)
    where
        Q: EventQueue<TrafficEvent> + EventQueue<DeviceEvent>,
    {
        let now = EventQueue::<TrafficEvent>::now(queue);
        let phy = device.phy();
        let at = if phy.is_busy(now) {
            now + phy.delay_until_idle(now)
        } else if !device.mac().is_nav_zero(now) {
            device.mac().nav_end() + Duration::from_ticks(1)
        } else {
            self.ready_at(now, device).max(now)
        };
        let queue: &mut dyn EventQueue<TrafficEvent> = queue;
        self.access.cancel(queue);
        self.access.arm(queue, at - now, TrafficEvent::Access);
    }

    fn try_access<Q>(&mut self, queue: &mut Q, device: &mut WifiDevice)
    where
        Q: EventQueue<TrafficEvent> + EventQueue<DeviceEvent>,
    {
        let now = EventQueue::<TrafficEvent>::now(queue);
        let Some(flow) = self.flow.as_ref() else {
            return;
        };
        if flow.in_flight {
            return;
        }
        let mac_busy = device.mac().is_busy(&*queue as &dyn EventQueue<DeviceEvent>);
        let medium_free = device.phy().is_idle(now) && device.mac().is_nav_zero(now) && !mac_busy;
        if !medium_free || self.ready_at(now, device) > now {
            self.schedule_access(queue, device);
            return;
        }
        self.transmit(queue, device);
    }

    fn transmit<Q>(&mut self, queue: &mut Q, device: &mut WifiDevice)
    where
        Q: EventQueue<TrafficEvent> + EventQueue<DeviceEvent>,
    {
        let Some(flow) = self.flow.as_mut() else {
            return;
        };
        flow.backoff_slots = None;
        flow.in_flight = true;
        let frame = Frame::data(FrameKind::Data, flow.destination, device.address(), flow.packet_size, flow.packet_id);
        let rts = device.manager_mut().need_rts(flow.destination, frame.size());
        let ack = if flow.destination.is_group() { AckPolicy::None } else { self.ack_policy };
        self.stats.data_sent += 1;
        if rts {
            self.stats.rts_sent += 1;
        }
        let queue: &mut dyn EventQueue<DeviceEvent> = queue;
        device.start_transmission(queue, self, frame, TxParams::new(ack).with_rts(rts));
    }
}

impl MacLowListener for SaturatedSource {
    fn got_cts(&mut self, _snr: f64, _mode: WifiMode) {}

    fn missed_cts(&mut self) {
        self.stats.missed_cts += 1;
        self.outcome = Some(Outcome::MissedCts);
    }

    fn got_ack(&mut self, _snr: f64, _mode: WifiMode) {
        self.outcome = Some(Outcome::Acked);
    }

    fn missed_ack(&mut self) {
        self.stats.missed_ack += 1;
        self.outcome = Some(Outcome::MissedAck);
    }

    fn start_next(&mut self) {}

    fn end_tx_no_ack(&mut self) {
        self.outcome = Some(Outcome::Sent);
    }

    fn cancel(&mut self) {
        self.outcome = Some(Outcome::Cancelled);
    }

    fn receive(&mut self, _frame: Frame, _snr: f64, _mode: WifiMode) {
        self.stats.received += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::scheduler::{EventId, Scheduler};
    use crate::wifi::mac_parameters::MacParameters;
    use crate::wifi::mode::{Standard, WifiPreamble};
    use crate::wifi::phy::PhyConfig;
    use crate::wifi::station_manager::{RateControlConfig, StationManagerConfig};

    #[derive(Debug)]
    enum Event {
        Device(DeviceEvent),
        Traffic(TrafficEvent),
    }

    struct Queue(Scheduler<Event>);

    impl EventQueue<DeviceEvent> for Queue {
        fn now(&self) -> Instant {
            self.0.now()
        }
        fn schedule(&mut self, delay: Duration, event: DeviceEvent) -> EventId {
            self.0.schedule(delay, Event::Device(event))
        }
        fn cancel(&mut self, id: EventId) -> bool {
            self.0.cancel(id)
        }
        fn is_pending(&self, id: EventId) -> bool {
            self.0.is_pending(id)
        }
    }

    impl EventQueue<TrafficEvent> for Queue {
        fn now(&self) -> Instant {
            self.0.now()
        }
        fn schedule(&mut self, delay: Duration, event: TrafficEvent) -> EventId {
            self.0.schedule(delay, Event::Traffic(event))
        }
        fn cancel(&mut self, id: EventId) -> bool {
            self.0.cancel(id)
        }
        fn is_pending(&self, id: EventId) -> bool {
            self.0.is_pending(id)
        }
    }

    /// Node 1 overhears a frame between two other nodes, then starts its flow.
    /// Returns (end of that reception, start of node 1's first frame, whether the reception failed).
    fn first_access_after(rx_power_dbm: f64, mode: WifiMode) -> (Instant, Instant, bool) {
        let mut queue = Queue(Scheduler::new());
        let rate_control = RateControlConfig::ConstantRate {
            data_mode: Some("OfdmRate6Mbps".to_string()),
            control_mode: None,
        };
        let mut device = WifiDevice::new(Mac48Address::from_node_id(1), &PhyConfig::default(), &StationManagerConfig::default(), &rate_control, 3).unwrap();
        let config = TrafficConfig {
            destination: Some(2),
            packet_size: 500,
            start_us: 0,
            max_packets: Some(1),
        };
        let mut source = SaturatedSource::new(Some(&config), AckPolicy::Normal, 11);

        let overheard = Frame::data(FrameKind::Data, Mac48Address::from_node_id(3), Mac48Address::from_node_id(4), 1000, 0);
        device.start_receive(&mut queue, overheard, rx_power_dbm, mode, WifiPreamble::Long);
        let Some((rx_end, Event::Device(event))) = queue.0.pop() else {
            panic!("expected the end of the reception");
        };
        device.handle_event(&mut queue, &mut source, event);
        let failed = device.mac().last_rx_failed();

        source.start(&mut queue, Duration::from_ticks(0));
        while let Some((_, event)) = queue.0.pop() {
            match event {
                Event::Device(event) => {
                    device.handle_event(&mut queue, &mut source, event);
                    source.after_device_event(&mut queue, &mut device);
                }
                Event::Traffic(event) => source.handle_event(&mut queue, &mut device, event),
            }
            if let Some(tx) = device.drain_transmissions().into_iter().next() {
                return (rx_end, tx.start, failed);
            }
        }
        panic!("the source never transmitted");
    }

    #[test]
    fn reception_error_defers_access_by_eifs() {
        let params = MacParameters::for_standard(Standard::Ieee80211a);
        let (ok_end, ok_start, ok_failed) = first_access_after(-50.0, WifiMode::OfdmRate6Mbps);
        // 0 dB SNR at 54 Mbps: the frame is never decoded.
        let (err_end, err_start, err_failed) = first_access_after(-95.0, WifiMode::OfdmRate54Mbps);
        assert!(!ok_failed);
        assert!(err_failed);

        let ok_wait = ok_start - ok_end;
        let err_wait = err_start - err_end;
        assert!(ok_wait >= params.difs);
        assert!(ok_wait <= params.difs + params.slot * CW_MIN);
        // Same seed, same backoff draw: the only difference is EIFS - DIFS.
        assert_eq!(err_wait, ok_wait + params.eifs_no_difs);
    }
}
