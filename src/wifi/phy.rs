//! The 802.11 OFDM PHY: capture decisions, CCA, and the probabilistic
//! outcome of every reception.
//!
//! A PHY never talks to the medium directly. Frames it sends are queued as
//! [`Transmission`]s that the network loop drains and propagates; frames
//! reaching it are handed to [`WifiPhy::start_receive`]. When a reception it
//! synchronized on ends, the device calls [`WifiPhy::end_receive`] and forwards
//! the returned [`RxOutcome`] to MAC low.

use embassy_time::{Duration, Instant};
use log::{debug, trace};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;

use super::device::DeviceEvent;
use super::error_rate;
use super::frame::Frame;
use super::interference::{InterferenceHelper, RxEventId};
use super::mode::{Standard, WifiMode, WifiPreamble, tx_duration};
use super::phy_state::{PhyState, StateTimeline};
use crate::error::ConfigError;
use crate::simulation::scheduler::{EventQueue, Timer};
use crate::simulation::signal_calculations::{db_to_ratio, dbm_to_w};
use crate::simulation::trace::{TraceEvent, TraceLog};

/// PHY parameters. Every field has the reference default, so a scene only
/// needs to name what it changes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PhyConfig {
    pub standard: Standard,
    /// Energy detection threshold: weaker signals are never synchronized on
    /// and only count as interference.
    pub energy_detection_threshold_dbm: f64,
    /// Receiver noise figure in dB.
    pub noise_figure_db: f64,
    pub tx_gain_db: f64,
    pub rx_gain_db: f64,
    /// Transmission power of the lowest power level.
    pub tx_power_start_dbm: f64,
    /// Transmission power of the highest power level.
    pub tx_power_end_dbm: f64,
    /// Number of evenly spaced power levels between start and end.
    pub tx_power_levels: u8,
}

impl Default for PhyConfig {
    fn default() -> Self {
        Self {
            standard: Standard::Ieee80211a,
            energy_detection_threshold_dbm: -96.0,
            noise_figure_db: 7.0,
            tx_gain_db: 1.0,
            rx_gain_db: 1.0,
            tx_power_start_dbm: 16.0206,
            tx_power_end_dbm: 16.0206,
            tx_power_levels: 1,
        }
    }
}

impl PhyConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let range_ok = self.tx_power_start_dbm <= self.tx_power_end_dbm
            && self.tx_power_start_dbm.is_finite()
            && self.tx_power_end_dbm.is_finite()
            && self.tx_power_levels > 0
            && (self.tx_power_levels > 1 || self.tx_power_start_dbm == self.tx_power_end_dbm);
        if !range_ok {
            return Err(ConfigError::InvalidTxPowerRange {
                start_dbm: self.tx_power_start_dbm,
                end_dbm: self.tx_power_end_dbm,
                levels: self.tx_power_levels,
            });
        }
        Ok(())
    }
}

/// Callbacks fired on every PHY state change, for upper layers tracking
/// medium activity.
pub trait PhyListener {
    /// A reception of `duration` started.
    fn notify_rx_start(&mut self, duration: Duration);
    fn notify_rx_end_ok(&mut self);
    fn notify_rx_end_error(&mut self);
    fn notify_tx_start(&mut self, duration: Duration);
    /// The medium is expected to stay busy for at least `duration`.
    fn notify_cca_busy_start(&mut self, duration: Duration);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhyEvent {
    /// The frame the PHY synchronized on is over.
    EndReceive { rx: RxEventId },
}

/// A frame leaving this PHY, waiting to be put on the medium.
#[derive(Debug, Clone)]
pub struct Transmission {
    pub frame: Frame,
    pub mode: WifiMode,
    pub preamble: WifiPreamble,
    /// Radiated power, tx gain included.
    pub tx_power_dbm: f64,
    pub start: Instant,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RxOutcome {
    Ok { frame: Frame, snr: f64, mode: WifiMode, preamble: WifiPreamble },
    Error { frame: Frame, snr: f64 },
}

struct Reception {
    rx: RxEventId,
    frame: Frame,
    mode: WifiMode,
    preamble: WifiPreamble,
}

pub struct WifiPhy {
    config: PhyConfig,
    modes: Vec<WifiMode>,
    ed_threshold_w: f64,
    interference: InterferenceHelper,
    timeline: StateTimeline,
    end_rx_timer: Timer,
    reception: Option<Reception>,
    rng: StdRng,
    listeners: Vec<Box<dyn PhyListener>>,
    outbox: Vec<Transmission>,
    trace: TraceLog,
}

impl WifiPhy {
    pub fn new(config: PhyConfig, seed: u64) -> Result<Self, ConfigError> {
        config.validate()?;
        let modes = config.standard.modes();
        if modes.is_empty() {
            return Err(ConfigError::EmptyModeSet);
        }
        Ok(Self {
            modes,
            ed_threshold_w: dbm_to_w(config.energy_detection_threshold_dbm),
            interference: InterferenceHelper::new(config.noise_figure_db),
            timeline: StateTimeline::default(),
            end_rx_timer: Timer::new(),
            reception: None,
            rng: StdRng::seed_from_u64(seed),
            listeners: Vec::new(),
            outbox: Vec::new(),
            trace: TraceLog::new(),
            config,
        })
    }

    pub fn config(&self) -> &PhyConfig {
        &self.config
    }

    pub fn standard(&self) -> Standard {
        self.config.standard
    }

    pub fn register_listener(&mut self, listener: Box<dyn PhyListener>) {
        self.listeners.push(listener);
    }

    /// Supported modes, slowest first.
    pub fn modes(&self) -> &[WifiMode] {
        &self.modes
    }

    pub fn n_tx_power(&self) -> u8 {
        self.config.tx_power_levels
    }

    /// Output power of a power level, before tx gain.
    pub fn power_dbm(&self, level: u8) -> f64 {
        assert!(level < self.config.tx_power_levels, "tx power level {level} out of range");
        if self.config.tx_power_levels == 1 {
            return self.config.tx_power_start_dbm;
        }
        let step = (self.config.tx_power_end_dbm - self.config.tx_power_start_dbm) / (self.config.tx_power_levels - 1) as f64;
        self.config.tx_power_start_dbm + level as f64 * step
    }

    pub fn ed_threshold_w(&self) -> f64 {
        self.ed_threshold_w
    }

    pub fn max_packet_duration(&self) -> Duration {
        self.interference.max_packet_duration()
    }

    pub fn interference(&self) -> &InterferenceHelper {
        &self.interference
    }

    pub fn calculate_tx_duration(&self, size: u32, mode: WifiMode, preamble: WifiPreamble) -> Duration {
        tx_duration(size, mode, preamble)
    }

    /// SNR needed in `mode` for a bit error rate of `ber`.
    pub fn calculate_snr(&self, mode: WifiMode, ber: f64) -> f64 {
        error_rate::calculate_snr_for_ber(mode, ber)
    }

    pub fn state(&self, now: Instant) -> PhyState {
        self.timeline.state(now)
    }

    pub fn is_idle(&self, now: Instant) -> bool {
        self.state(now) == PhyState::Idle
    }

    pub fn is_busy(&self, now: Instant) -> bool {
        !self.is_idle(now)
    }

    pub fn is_tx(&self, now: Instant) -> bool {
        self.state(now) == PhyState::Tx
    }

    pub fn is_rx(&self, now: Instant) -> bool {
        self.state(now) == PhyState::Rx
    }

    pub fn is_cca_busy(&self, now: Instant) -> bool {
        self.state(now) == PhyState::CcaBusy
    }

    pub fn state_duration(&self, now: Instant) -> Duration {
        self.timeline.state_duration(now)
    }

    pub fn delay_until_idle(&self, now: Instant) -> Duration {
        self.timeline.delay_until_idle(now)
    }

    /// Start of the current idle period; `now` if the PHY is busy.
    pub fn idle_since(&self, now: Instant) -> Instant {
        if self.is_idle(now) {
            self.timeline.idle_start()
        } else {
            now
        }
    }

    pub fn last_rx_start_time(&self) -> Instant {
        self.timeline.last_rx_start()
    }

    /// Start transmitting `frame`. Must not be called while transmitting;
    /// an ongoing reception is abandoned.
    pub fn send(&mut self, queue: &mut dyn EventQueue<DeviceEvent>, frame: Frame, mode: WifiMode, preamble: WifiPreamble, power_level: u8) {
        let now = queue.now();
        assert!(!self.is_tx(now), "send while already transmitting");

        let duration = tx_duration(frame.size(), mode, preamble);
        if let Some(abandoned) = self.reception.take() {
            debug!("abandoning reception of {:?} frame to transmit", abandoned.frame.kind());
            self.end_rx_timer.cancel(queue);
        }
        for listener in &mut self.listeners {
            listener.notify_tx_start(duration);
        }
        self.timeline.switch_to_tx(now, duration, &mut self.trace);

        let tx_power_dbm = self.power_dbm(power_level) + self.config.tx_gain_db;
        trace!("tx {:?} size={} mode={} power={:.2}dBm duration={}us", frame.kind(), frame.size(), mode, tx_power_dbm, duration.as_micros());
        self.trace.record(
            now,
            TraceEvent::TxStart {
                mode,
                size: frame.size(),
                power_dbm: tx_power_dbm,
            },
        );
        self.outbox.push(Transmission {
            frame,
            mode,
            preamble,
            tx_power_dbm,
            start: now,
            duration,
        });
    }

    /// A signal sent in `mode` reaches this PHY with `rx_power_dbm` (before rx gain).
    pub fn start_receive(&mut self, queue: &mut dyn EventQueue<DeviceEvent>, frame: Frame, rx_power_dbm: f64, mode: WifiMode, preamble: WifiPreamble) {
        let now = queue.now();
        let rx_power_w = dbm_to_w(rx_power_dbm + self.config.rx_gain_db);
        let duration = tx_duration(frame.size(), mode, preamble);
        let end = now + duration;
        let rx = self.interference.add(now, frame.size(), mode, preamble, duration, rx_power_w);

        match self.state(now) {
            PhyState::Rx => {
                debug!("drop {:?} frame, already receiving (power={rx_power_w:e}W)", frame.kind());
                if end > self.timeline.end_rx() {
                    self.maybe_cca_busy(now, duration, rx_power_w);
                }
            }
            PhyState::Tx => {
                debug!("drop {:?} frame, transmitting (power={rx_power_w:e}W)", frame.kind());
                if end > self.timeline.end_tx() {
                    self.maybe_cca_busy(now, duration, rx_power_w);
                }
            }
            PhyState::Idle | PhyState::CcaBusy => {
                if rx_power_w > self.ed_threshold_w {
                    debug!("sync on {:?} frame (power={rx_power_w:e}W, mode={mode})", frame.kind());
                    for listener in &mut self.listeners {
                        listener.notify_rx_start(duration);
                    }
                    self.timeline.switch_to_rx(now, duration, &mut self.trace);
                    self.end_rx_timer.arm(queue, duration, DeviceEvent::Phy(PhyEvent::EndReceive { rx }));
                    self.reception = Some(Reception { rx, frame, mode, preamble });
                } else {
                    debug!(
                        "drop {:?} frame, signal too weak ({rx_power_w:e}W < {:e}W)",
                        frame.kind(),
                        self.ed_threshold_w
                    );
                    self.maybe_cca_busy(now, duration, rx_power_w);
                }
            }
        }
    }

    fn maybe_cca_busy(&mut self, now: Instant, duration: Duration, rx_power_w: f64) {
        let busy_for = if rx_power_w > self.ed_threshold_w {
            duration
        } else {
            self.interference.energy_duration(now, self.ed_threshold_w)
        };
        if busy_for.as_ticks() > 0 {
            self.timeline.switch_maybe_to_cca_busy(now, busy_for, &mut self.trace);
            for listener in &mut self.listeners {
                listener.notify_cca_busy_start(busy_for);
            }
        }
    }

    /// The reception identified by `rx` is over: decide its fate.
    ///
    /// Returns `None` only if the event no longer matches the current
    /// reception, which cannot happen while the end-of-reception timer is
    /// cancelled on every abort. A reception whose interference event is gone
    /// cannot be evaluated and ends in error.
    pub fn end_receive(&mut self, queue: &mut dyn EventQueue<DeviceEvent>, rx: RxEventId) -> Option<RxOutcome> {
        let now = queue.now();
        let reception = self.reception.take_if(|reception| reception.rx == rx)?;
        let Some(snr_per) = self.interference.calculate_snr_per(rx) else {
            log::warn!("reception {rx:?} ended after its interference event was evicted");
            for listener in &mut self.listeners {
                listener.notify_rx_end_error();
            }
            self.timeline.switch_from_rx(now, &mut self.trace);
            return Some(RxOutcome::Error {
                frame: reception.frame,
                snr: 0.0,
            });
        };

        let draw: f64 = self.rng.gen_range(0.0..1.0);
        let success = draw > snr_per.per;
        debug!(
            "end of rx: mode={} snr={:.2}dB per={:.3e} size={} -> {}",
            reception.mode,
            10.0 * snr_per.snr.log10(),
            snr_per.per,
            reception.frame.size(),
            if success { "ok" } else { "error" }
        );
        self.trace.record(
            now,
            TraceEvent::EndOfSync {
                mode: reception.mode,
                snr: snr_per.snr,
                per: snr_per.per,
                success,
            },
        );

        for listener in &mut self.listeners {
            if success {
                listener.notify_rx_end_ok();
            } else {
                listener.notify_rx_end_error();
            }
        }
        self.timeline.switch_from_rx(now, &mut self.trace);

        Some(if success {
            RxOutcome::Ok {
                frame: reception.frame,
                snr: snr_per.snr,
                mode: reception.mode,
                preamble: reception.preamble,
            }
        } else {
            RxOutcome::Error {
                frame: reception.frame,
                snr: snr_per.snr,
            }
        })
    }

    /// Transmissions started since the last call.
    pub fn drain_transmissions(&mut self) -> Vec<Transmission> {
        std::mem::take(&mut self.outbox)
    }

    pub fn trace_mut(&mut self) -> &mut TraceLog {
        &mut self.trace
    }

    /// Linear SNR the PHY would see for a signal of `rx_power_dbm` with no interference.
    pub fn snr_without_interference(&self, rx_power_dbm: f64, mode: WifiMode) -> f64 {
        self.interference.snr(dbm_to_w(rx_power_dbm + self.config.rx_gain_db), 0.0, mode)
    }

    /// Noise figure as configured, as a linear ratio.
    pub fn noise_figure(&self) -> f64 {
        db_to_ratio(self.config.noise_figure_db)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::scheduler::Scheduler;
    use crate::wifi::frame::{FrameKind, Mac48Address};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Calls(Vec<&'static str>);

    struct Recorder(Rc<RefCell<Calls>>);

    impl PhyListener for Recorder {
        fn notify_rx_start(&mut self, _duration: Duration) {
            self.0.borrow_mut().0.push("rx_start");
        }
        fn notify_rx_end_ok(&mut self) {
            self.0.borrow_mut().0.push("rx_ok");
        }
        fn notify_rx_end_error(&mut self) {
            self.0.borrow_mut().0.push("rx_error");
        }
        fn notify_tx_start(&mut self, _duration: Duration) {
            self.0.borrow_mut().0.push("tx_start");
        }
        fn notify_cca_busy_start(&mut self, _duration: Duration) {
            self.0.borrow_mut().0.push("cca");
        }
    }

    fn data_frame(size: u32) -> Frame {
        Frame::data(FrameKind::Data, Mac48Address::from_node_id(2), Mac48Address::from_node_id(1), size, 1)
    }

    fn run_until_end(phy: &mut WifiPhy, sched: &mut Scheduler<DeviceEvent>) -> Option<RxOutcome> {
        let (_, event) = sched.pop()?;
        match event {
            DeviceEvent::Phy(PhyEvent::EndReceive { rx }) => phy.end_receive(sched, rx),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn strong_frame_is_received() {
        let mut sched: Scheduler<DeviceEvent> = Scheduler::new();
        let mut phy = WifiPhy::new(PhyConfig::default(), 1).unwrap();
        let calls = Rc::new(RefCell::new(Calls::default()));
        phy.register_listener(Box::new(Recorder(calls.clone())));

        phy.start_receive(&mut sched, data_frame(500), -60.0, WifiMode::OfdmRate54Mbps, WifiPreamble::Long);
        assert!(phy.is_rx(sched.now()));
        let outcome = run_until_end(&mut phy, &mut sched).unwrap();
        assert!(matches!(outcome, RxOutcome::Ok { mode: WifiMode::OfdmRate54Mbps, .. }));
        assert_eq!(sched.now(), Instant::from_micros(tx_duration(528, WifiMode::OfdmRate54Mbps, WifiPreamble::Long).as_micros()));
        assert!(phy.is_idle(sched.now()));
        assert_eq!(calls.borrow().0, vec!["rx_start", "rx_ok"]);
    }

    #[test]
    fn reception_without_interference_record_ends_in_error() {
        let mut sched: Scheduler<DeviceEvent> = Scheduler::new();
        let mut phy = WifiPhy::new(PhyConfig::default(), 1).unwrap();
        let calls = Rc::new(RefCell::new(Calls::default()));
        phy.register_listener(Box::new(Recorder(calls.clone())));

        phy.start_receive(&mut sched, data_frame(500), -60.0, WifiMode::OfdmRate54Mbps, WifiPreamble::Long);
        phy.interference.clear();
        let outcome = run_until_end(&mut phy, &mut sched).unwrap();
        assert!(matches!(outcome, RxOutcome::Error { snr, .. } if snr == 0.0));
        assert!(phy.is_idle(sched.now()));
        assert_eq!(calls.borrow().0, vec!["rx_start", "rx_error"]);
    }

    #[test]
    fn weak_signal_only_counts_as_noise() {
        let mut sched: Scheduler<DeviceEvent> = Scheduler::new();
        let mut phy = WifiPhy::new(PhyConfig::default(), 1).unwrap();
        phy.start_receive(&mut sched, data_frame(100), -110.0, WifiMode::OfdmRate6Mbps, WifiPreamble::Long);
        assert!(phy.is_idle(sched.now()));
        assert!(sched.is_empty());
    }

    #[test]
    fn second_arrival_during_reception_extends_cca() {
        let mut sched: Scheduler<DeviceEvent> = Scheduler::new();
        let mut phy = WifiPhy::new(PhyConfig::default(), 1).unwrap();
        phy.start_receive(&mut sched, data_frame(100), -60.0, WifiMode::OfdmRate6Mbps, WifiPreamble::Long);
        sched.advance_to(Instant::from_micros(50));
        phy.start_receive(&mut sched, data_frame(1000), -70.0, WifiMode::OfdmRate6Mbps, WifiPreamble::Long);
        assert_eq!(sched.len(), 1);
        let second_end = Instant::from_micros(50) + tx_duration(1028, WifiMode::OfdmRate6Mbps, WifiPreamble::Long);

        // The first frame is still decoded: 10 dB of SIR is plenty at 6 Mbps.
        assert!(matches!(run_until_end(&mut phy, &mut sched), Some(RxOutcome::Ok { .. })));
        assert!(phy.is_cca_busy(sched.now()));
        assert_eq!(phy.delay_until_idle(sched.now()), second_end - sched.now());
    }

    #[test]
    fn sending_cancels_reception() {
        let mut sched: Scheduler<DeviceEvent> = Scheduler::new();
        let mut phy = WifiPhy::new(PhyConfig::default(), 1).unwrap();
        let calls = Rc::new(RefCell::new(Calls::default()));
        phy.register_listener(Box::new(Recorder(calls.clone())));
        phy.start_receive(&mut sched, data_frame(100), -60.0, WifiMode::OfdmRate6Mbps, WifiPreamble::Long);
        sched.advance_to(Instant::from_micros(20));
        phy.send(&mut sched, Frame::ack(Mac48Address::from_node_id(2), Duration::from_ticks(0), 1.0), WifiMode::OfdmRate6Mbps, WifiPreamble::Long, 0);

        assert!(sched.is_empty());
        assert!(phy.is_tx(sched.now()));
        let sent = phy.drain_transmissions();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].duration, Duration::from_micros(44));
        assert!((sent[0].tx_power_dbm - 17.0206).abs() < 1e-9);
        assert_eq!(calls.borrow().0, vec!["rx_start", "tx_start"]);
    }

    #[test]
    fn power_levels_are_evenly_spaced() {
        let config = PhyConfig {
            tx_power_start_dbm: 0.0,
            tx_power_end_dbm: 17.0,
            tx_power_levels: 18,
            ..PhyConfig::default()
        };
        let phy = WifiPhy::new(config, 1).unwrap();
        assert_eq!(phy.power_dbm(0), 0.0);
        assert!((phy.power_dbm(17) - 17.0).abs() < 1e-12);
        assert!((phy.power_dbm(5) - 5.0).abs() < 1e-12);

        let invalid = PhyConfig {
            tx_power_start_dbm: 20.0,
            tx_power_end_dbm: 10.0,
            ..PhyConfig::default()
        };
        assert!(matches!(WifiPhy::new(invalid, 1), Err(ConfigError::InvalidTxPowerRange { .. })));
    }

    #[test]
    fn snr_for_ber_is_exposed() {
        let phy = WifiPhy::new(PhyConfig::default(), 1).unwrap();
        let low = phy.calculate_snr(WifiMode::OfdmRate6Mbps, 1e-5);
        let high = phy.calculate_snr(WifiMode::OfdmRate54Mbps, 1e-5);
        assert!(high > low);
    }
}
