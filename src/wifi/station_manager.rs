//! Remote station management: per-peer transmission parameters and the
//! feedback loop that adapts them.
//!
//! [`RemoteStationManager`] keeps what every algorithm needs (retry counters,
//! last observed SNR, the RTS and retransmission policy, control response
//! modes) and delegates the rate/power decision to a [`RateControl`]
//! implementation with its own per-peer state. MAC low only sees the
//! object-safe [`StationManager`] interface, so the algorithm is picked from
//! configuration at runtime.

use embassy_time::Instant;
use log::debug;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;

use super::aparf::{Aparf, AparfConfig};
use super::constant_rate::ConstantRate;
use super::frame::Mac48Address;
use super::mode::{Standard, WifiMode};
use super::parf::{Parf, ParfConfig};
use crate::error::ConfigError;
use crate::simulation::trace::{TraceEvent, TraceLog};

/// Retry and RTS policy shared by all algorithms.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StationManagerConfig {
    /// Frames (header and FCS included) larger than this are protected by RTS/CTS.
    pub rts_cts_threshold: u32,
    /// Maximum short retry count (RTS attempts).
    pub max_ssrc: u32,
    /// Maximum long retry count (data attempts).
    pub max_slrc: u32,
}

impl Default for StationManagerConfig {
    fn default() -> Self {
        Self {
            rts_cts_threshold: 2346,
            max_ssrc: 7,
            max_slrc: 7,
        }
    }
}

/// Rate-control algorithm selection, as written in scene files.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum RateControlConfig {
    Parf(ParfConfig),
    Aparf(AparfConfig),
    ConstantRate {
        /// Mode name for data frames; the slowest mode when absent.
        data_mode: Option<String>,
        /// Mode name for RTS frames; the slowest mode when absent.
        control_mode: Option<String>,
    },
}

impl Default for RateControlConfig {
    fn default() -> Self {
        RateControlConfig::Parf(ParfConfig::default())
    }
}

/// What MAC low needs to put a frame on the air.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TxVector {
    pub mode: WifiMode,
    pub power_level: u8,
    /// Retransmissions of the current frame so far.
    pub retry_count: u32,
}

/// Device capabilities an algorithm adapts within.
#[derive(Debug, Clone)]
pub struct RateContext {
    /// Supported modes, slowest first. Rate indices point into this list.
    pub modes: Vec<WifiMode>,
    pub min_power: u8,
    pub max_power: u8,
}

impl RateContext {
    pub fn max_rate_index(&self) -> usize {
        self.modes.len() - 1
    }
}

/// A rate/power adaptation algorithm.
///
/// Each algorithm owns the shape of its per-peer state; the manager creates
/// one on first contact with a peer and hands it back on every report.
pub trait RateControl {
    type State: fmt::Debug;

    fn name(&self) -> &'static str;

    fn new_station(&self, ctx: &RateContext) -> Self::State;

    /// Current (rate index, power level) for data frames.
    fn data_parameters(&self, ctx: &RateContext, state: &Self::State) -> (usize, u8);

    /// (rate index, power level) for RTS frames.
    fn rts_parameters(&self, ctx: &RateContext, _state: &Self::State) -> (usize, u8) {
        (0, ctx.max_power)
    }

    fn report_data_ok(&self, ctx: &RateContext, state: &mut Self::State, ack_snr: f64, data_snr: f64);

    fn report_data_failed(&self, ctx: &RateContext, state: &mut Self::State);

    fn report_rts_ok(&self, _ctx: &RateContext, _state: &mut Self::State, _cts_snr: f64, _rts_snr: f64) {}

    fn report_rts_failed(&self, _ctx: &RateContext, _state: &mut Self::State) {}

    fn report_final_rts_failed(&self, _ctx: &RateContext, _state: &mut Self::State) {}

    fn report_final_data_failed(&self, _ctx: &RateContext, _state: &mut Self::State) {}

    fn report_rx_ok(&self, _ctx: &RateContext, _state: &mut Self::State, _snr: f64, _mode: WifiMode) {}
}

/// The interface MAC low and the traffic source talk to.
pub trait StationManager {
    fn algorithm(&self) -> &'static str;

    /// Whether a frame of `size` bytes (header and FCS included) to `peer` needs RTS/CTS.
    fn need_rts(&mut self, peer: Mac48Address, size: u32) -> bool;
    fn need_rts_retransmission(&mut self, peer: Mac48Address) -> bool;
    fn need_data_retransmission(&mut self, peer: Mac48Address) -> bool;

    fn data_tx_vector(&mut self, peer: Mac48Address) -> TxVector;
    fn rts_tx_vector(&mut self, peer: Mac48Address) -> TxVector;
    /// Parameters for a CTS answering an RTS sent in `rts_mode`.
    fn cts_tx_vector(&self, rts_mode: WifiMode) -> TxVector;
    /// Parameters for an ACK answering a data frame sent in `data_mode`.
    fn ack_tx_vector(&self, data_mode: WifiMode) -> TxVector;

    fn report_rts_failed(&mut self, now: Instant, peer: Mac48Address);
    fn report_data_failed(&mut self, now: Instant, peer: Mac48Address);
    fn report_rts_ok(&mut self, now: Instant, peer: Mac48Address, cts_snr: f64, cts_mode: WifiMode, rts_snr: f64);
    fn report_data_ok(&mut self, now: Instant, peer: Mac48Address, ack_snr: f64, ack_mode: WifiMode, data_snr: f64);
    /// The RTS retry limit was reached and the frame is dropped.
    fn report_final_rts_failed(&mut self, now: Instant, peer: Mac48Address);
    /// The data retry limit was reached and the frame is dropped.
    fn report_final_data_failed(&mut self, now: Instant, peer: Mac48Address);
    fn report_rx_ok(&mut self, now: Instant, peer: Mac48Address, snr: f64, mode: WifiMode);

    /// SNR of the last frame received from `peer`.
    fn last_rx_snr(&self, peer: Mac48Address) -> Option<f64>;

    fn trace_mut(&mut self) -> &mut TraceLog;
}

struct Station<S> {
    ssrc: u32,
    slrc: u32,
    last_rx_snr: Option<f64>,
    algorithm: S,
}

pub struct RemoteStationManager<A: RateControl> {
    config: StationManagerConfig,
    control: A,
    ctx: RateContext,
    basic_modes: Vec<WifiMode>,
    default_mode: WifiMode,
    stations: HashMap<Mac48Address, Station<A::State>>,
    trace: TraceLog,
}

impl<A: RateControl> RemoteStationManager<A> {
    pub fn new(config: StationManagerConfig, control: A, standard: Standard, n_tx_power: u8) -> Result<Self, ConfigError> {
        let modes = standard.modes();
        if modes.is_empty() {
            return Err(ConfigError::EmptyModeSet);
        }
        if n_tx_power == 0 {
            return Err(ConfigError::TxPowerLevelOutOfRange { level: 0, levels: 0 });
        }
        Ok(Self {
            config,
            control,
            ctx: RateContext {
                modes,
                min_power: 0,
                max_power: n_tx_power - 1,
            },
            basic_modes: standard.basic_modes(),
            default_mode: standard.lowest_mode(),
            stations: HashMap::new(),
            trace: TraceLog::new(),
        })
    }

    pub fn context(&self) -> &RateContext {
        &self.ctx
    }

    /// Algorithm state for `peer`, if it was ever contacted.
    pub fn station_state(&self, peer: Mac48Address) -> Option<&A::State> {
        self.stations.get(&peer).map(|station| &station.algorithm)
    }

    /// Per-peer entry, created on first contact. Takes the fields apart so
    /// callers can keep using the algorithm and context alongside it.
    fn entry<'a>(stations: &'a mut HashMap<Mac48Address, Station<A::State>>, control: &A, ctx: &RateContext, peer: Mac48Address) -> &'a mut Station<A::State> {
        stations.entry(peer).or_insert_with(|| Station {
            ssrc: 0,
            slrc: 0,
            last_rx_snr: None,
            algorithm: control.new_station(ctx),
        })
    }

    fn lookup(&mut self, peer: Mac48Address) -> &mut Station<A::State> {
        Self::entry(&mut self.stations, &self.control, &self.ctx, peer)
    }

    /// Run `report` against the algorithm state of `peer` and trace whatever
    /// it changed.
    fn adapt(&mut self, now: Instant, peer: Mac48Address, report: impl FnOnce(&A, &RateContext, &mut A::State)) {
        let station = Self::entry(&mut self.stations, &self.control, &self.ctx, peer);
        let (old_rate, old_power) = self.control.data_parameters(&self.ctx, &station.algorithm);
        report(&self.control, &self.ctx, &mut station.algorithm);
        let (new_rate, new_power) = self.control.data_parameters(&self.ctx, &station.algorithm);

        if old_rate != new_rate {
            let (old, new) = (self.ctx.modes[old_rate], self.ctx.modes[new_rate]);
            debug!("{} {peer}: rate {old} -> {new}", self.control.name());
            self.trace.record(now, TraceEvent::RateChange { peer, old, new });
        }
        if old_power != new_power {
            debug!("{} {peer}: power level {old_power} -> {new_power}", self.control.name());
            self.trace.record(
                now,
                TraceEvent::PowerChange {
                    peer,
                    old: old_power,
                    new: new_power,
                },
            );
        }
    }

    /// Highest basic mode not faster than `requested` on the same channel
    /// width, falling back to the slowest mode.
    fn control_answer_mode(&self, requested: WifiMode) -> WifiMode {
        self.basic_modes
            .iter()
            .copied()
            .filter(|mode| mode.width() == requested.width() && mode.phy_rate() <= requested.phy_rate())
            .max_by_key(|mode| mode.phy_rate())
            .unwrap_or(self.default_mode)
    }

    fn vector(&self, rate_index: usize, power_level: u8, retry_count: u32) -> TxVector {
        TxVector {
            mode: self.ctx.modes[rate_index.min(self.ctx.max_rate_index())],
            power_level: power_level.clamp(self.ctx.min_power, self.ctx.max_power),
            retry_count,
        }
    }
}

impl<A: RateControl> StationManager for RemoteStationManager<A> {
    fn algorithm(&self) -> &'static str {
        self.control.name()
    }

    fn need_rts(&mut self, peer: Mac48Address, size: u32) -> bool {
        !peer.is_group() && size > self.config.rts_cts_threshold
    }

    fn need_rts_retransmission(&mut self, peer: Mac48Address) -> bool {
        let max_ssrc = self.config.max_ssrc;
        self.lookup(peer).ssrc < max_ssrc
    }

    fn need_data_retransmission(&mut self, peer: Mac48Address) -> bool {
        let max_slrc = self.config.max_slrc;
        self.lookup(peer).slrc < max_slrc
    }

    fn data_tx_vector(&mut self, peer: Mac48Address) -> TxVector {
        if peer.is_group() {
            return self.vector(0, self.ctx.max_power, 0);
        }
        let station = Self::entry(&mut self.stations, &self.control, &self.ctx, peer);
        let retry_count = station.slrc;
        let (rate, power) = self.control.data_parameters(&self.ctx, &station.algorithm);
        self.vector(rate, power, retry_count)
    }

    fn rts_tx_vector(&mut self, peer: Mac48Address) -> TxVector {
        let station = Self::entry(&mut self.stations, &self.control, &self.ctx, peer);
        let retry_count = station.ssrc;
        let (rate, power) = self.control.rts_parameters(&self.ctx, &station.algorithm);
        self.vector(rate, power, retry_count)
    }

    fn cts_tx_vector(&self, rts_mode: WifiMode) -> TxVector {
        TxVector {
            mode: self.control_answer_mode(rts_mode),
            power_level: self.ctx.max_power,
            retry_count: 0,
        }
    }

    fn ack_tx_vector(&self, data_mode: WifiMode) -> TxVector {
        TxVector {
            mode: self.control_answer_mode(data_mode),
            power_level: self.ctx.max_power,
            retry_count: 0,
        }
    }

    fn report_rts_failed(&mut self, now: Instant, peer: Mac48Address) {
        assert!(!peer.is_group(), "RTS failure reported for group address");
        self.lookup(peer).ssrc += 1;
        self.adapt(now, peer, |control, ctx, state| control.report_rts_failed(ctx, state));
    }

    fn report_data_failed(&mut self, now: Instant, peer: Mac48Address) {
        assert!(!peer.is_group(), "data failure reported for group address");
        self.lookup(peer).slrc += 1;
        self.adapt(now, peer, |control, ctx, state| control.report_data_failed(ctx, state));
    }

    fn report_rts_ok(&mut self, now: Instant, peer: Mac48Address, cts_snr: f64, _cts_mode: WifiMode, rts_snr: f64) {
        self.lookup(peer).ssrc = 0;
        self.adapt(now, peer, |control, ctx, state| control.report_rts_ok(ctx, state, cts_snr, rts_snr));
    }

    fn report_data_ok(&mut self, now: Instant, peer: Mac48Address, ack_snr: f64, _ack_mode: WifiMode, data_snr: f64) {
        self.lookup(peer).slrc = 0;
        self.adapt(now, peer, |control, ctx, state| control.report_data_ok(ctx, state, ack_snr, data_snr));
    }

    fn report_final_rts_failed(&mut self, now: Instant, peer: Mac48Address) {
        self.lookup(peer).ssrc = 0;
        self.adapt(now, peer, |control, ctx, state| control.report_final_rts_failed(ctx, state));
    }

    fn report_final_data_failed(&mut self, now: Instant, peer: Mac48Address) {
        self.lookup(peer).slrc = 0;
        self.adapt(now, peer, |control, ctx, state| control.report_final_data_failed(ctx, state));
    }

    fn report_rx_ok(&mut self, now: Instant, peer: Mac48Address, snr: f64, mode: WifiMode) {
        if peer.is_group() {
            return;
        }
        self.lookup(peer).last_rx_snr = Some(snr);
        self.adapt(now, peer, |control, ctx, state| control.report_rx_ok(ctx, state, snr, mode));
    }

    fn last_rx_snr(&self, peer: Mac48Address) -> Option<f64> {
        self.stations.get(&peer).and_then(|station| station.last_rx_snr)
    }

    fn trace_mut(&mut self) -> &mut TraceLog {
        &mut self.trace
    }
}

/// Build the configured algorithm for a device of `standard` with `n_tx_power` levels.
pub fn build_station_manager(
    config: StationManagerConfig,
    rate_control: &RateControlConfig,
    standard: Standard,
    n_tx_power: u8,
) -> Result<Box<dyn StationManager>, ConfigError> {
    let manager: Box<dyn StationManager> = match rate_control {
        RateControlConfig::Parf(parf) => Box::new(RemoteStationManager::new(config, Parf::new(parf.clone())?, standard, n_tx_power)?),
        RateControlConfig::Aparf(aparf) => Box::new(RemoteStationManager::new(config, Aparf::new(aparf.clone())?, standard, n_tx_power)?),
        RateControlConfig::ConstantRate { data_mode, control_mode } => {
            let pick = |name: &Option<String>| -> Result<WifiMode, ConfigError> {
                match name {
                    Some(name) => name.parse(),
                    None => Ok(standard.lowest_mode()),
                }
            };
            let constant = ConstantRate::new(standard, pick(data_mode)?, pick(control_mode)?)?;
            Box::new(RemoteStationManager::new(config, constant, standard, n_tx_power)?)
        }
    };
    debug!("station manager: {} for {}", manager.algorithm(), standard.name());
    Ok(manager)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parf_manager() -> RemoteStationManager<Parf> {
        RemoteStationManager::new(StationManagerConfig::default(), Parf::new(ParfConfig::default()).unwrap(), Standard::Ieee80211a, 18).unwrap()
    }

    fn peer() -> Mac48Address {
        Mac48Address::from_node_id(7)
    }

    #[test]
    fn control_responses_use_highest_basic_rate_not_above_request() {
        let manager = parf_manager();
        assert_eq!(manager.ack_tx_vector(WifiMode::OfdmRate54Mbps).mode, WifiMode::OfdmRate24Mbps);
        assert_eq!(manager.ack_tx_vector(WifiMode::OfdmRate18Mbps).mode, WifiMode::OfdmRate12Mbps);
        assert_eq!(manager.cts_tx_vector(WifiMode::OfdmRate9Mbps).mode, WifiMode::OfdmRate6Mbps);
        assert_eq!(manager.cts_tx_vector(WifiMode::OfdmRate6Mbps).mode, WifiMode::OfdmRate6Mbps);
    }

    #[test]
    fn rts_threshold_and_group_addresses() {
        let mut manager = parf_manager();
        assert!(!manager.need_rts(peer(), 2346));
        assert!(manager.need_rts(peer(), 2347));
        assert!(!manager.need_rts(Mac48Address::BROADCAST, 5000));
        assert_eq!(manager.data_tx_vector(Mac48Address::BROADCAST).mode, WifiMode::OfdmRate6Mbps);
    }

    #[test]
    fn retry_counters_limit_retransmissions() {
        let now = Instant::from_ticks(0);
        let mut manager = parf_manager();
        for _ in 0..6 {
            manager.report_data_failed(now, peer());
            assert!(manager.need_data_retransmission(peer()));
        }
        manager.report_data_failed(now, peer());
        assert!(!manager.need_data_retransmission(peer()));
        assert_eq!(manager.data_tx_vector(peer()).retry_count, 7);
        manager.report_final_data_failed(now, peer());
        assert!(manager.need_data_retransmission(peer()));

        manager.report_rts_failed(now, peer());
        assert_eq!(manager.rts_tx_vector(peer()).retry_count, 1);
        manager.report_rts_ok(now, peer(), 100.0, WifiMode::OfdmRate6Mbps, 100.0);
        assert_eq!(manager.rts_tx_vector(peer()).retry_count, 0);
    }

    #[test]
    fn rx_snr_is_remembered_per_peer() {
        let mut manager = parf_manager();
        assert_eq!(manager.last_rx_snr(peer()), None);
        manager.report_rx_ok(Instant::from_ticks(0), peer(), 42.0, WifiMode::OfdmRate6Mbps);
        assert_eq!(manager.last_rx_snr(peer()), Some(42.0));
        assert_eq!(manager.last_rx_snr(Mac48Address::from_node_id(8)), None);
    }

    #[test]
    fn changes_are_traced() {
        let now = Instant::from_micros(5);
        let mut manager = parf_manager();
        for _ in 0..10 {
            manager.report_data_ok(now, peer(), 100.0, WifiMode::OfdmRate24Mbps, 100.0);
        }
        let records = manager.trace_mut().drain();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].timestamp, now);
        assert_eq!(records[0].event, TraceEvent::PowerChange { peer: peer(), old: 17, new: 16 });
    }

    #[test]
    fn builds_configured_algorithm() {
        let config = StationManagerConfig::default();
        let built = build_station_manager(config.clone(), &RateControlConfig::default(), Standard::Ieee80211a, 1).unwrap();
        assert_eq!(built.algorithm(), "parf");

        let constant = RateControlConfig::ConstantRate {
            data_mode: Some("OfdmRate36Mbps".to_string()),
            control_mode: None,
        };
        let mut built = build_station_manager(config.clone(), &constant, Standard::Ieee80211a, 1).unwrap();
        assert_eq!(built.data_tx_vector(peer()).mode, WifiMode::OfdmRate36Mbps);
        assert_eq!(built.rts_tx_vector(peer()).mode, WifiMode::OfdmRate6Mbps);

        let wrong_band = RateControlConfig::ConstantRate {
            data_mode: Some("OfdmRate36Mbps".to_string()),
            control_mode: None,
        };
        assert!(matches!(
            build_station_manager(config.clone(), &wrong_band, Standard::Ofdm10Mhz, 1),
            Err(ConfigError::ModeNotInStandard { .. })
        ));
        let unknown = RateControlConfig::ConstantRate {
            data_mode: Some("OfdmRate99Mbps".to_string()),
            control_mode: None,
        };
        assert!(matches!(build_station_manager(config, &unknown, Standard::Ieee80211a, 1), Err(ConfigError::UnknownMode(_))));
    }

    #[test]
    fn rate_control_config_from_json() {
        let parsed: RateControlConfig = serde_json::from_str(r#"{"algorithm": "aparf", "success_threshold_1": 4}"#).unwrap();
        match parsed {
            RateControlConfig::Aparf(config) => {
                assert_eq!(config.success_threshold_1, 4);
                assert_eq!(config.success_threshold_2, 10);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
