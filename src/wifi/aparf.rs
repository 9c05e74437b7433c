//! APARF: Adaptive Power-Aware Rate Fallback.
//!
//! Each peer moves between three states. `High` needs few successes before
//! adapting, `Low` needs many, and `Spread` is the state right after a change.
//! A failure in `Spread` means the change hurt, so the station falls back to
//! `Low`. When a rate decrease happens at full power, the rate it left is
//! remembered as critical: power is then lowered at the reduced rate, and
//! after enough power changes the station jumps back to full power at the
//! critical rate.

use serde::Deserialize;

use super::station_manager::{RateContext, RateControl};
use crate::error::ConfigError;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AparfConfig {
    /// Successes needed in the `High` state.
    pub success_threshold_1: u32,
    /// Successes needed in the `Low` state.
    pub success_threshold_2: u32,
    /// Consecutive failures before stepping rate down or power up.
    pub fail_threshold: u32,
    /// Power changes before returning to the critical rate.
    pub power_threshold: u32,
    pub power_decrement_step: u8,
    pub power_increment_step: u8,
    pub rate_decrement_step: usize,
    pub rate_increment_step: usize,
}

impl Default for AparfConfig {
    fn default() -> Self {
        Self {
            success_threshold_1: 3,
            success_threshold_2: 10,
            fail_threshold: 1,
            power_threshold: 10,
            power_decrement_step: 1,
            power_increment_step: 1,
            rate_decrement_step: 1,
            rate_increment_step: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AparfState {
    High,
    Low,
    Spread,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AparfStation {
    pub n_success: u32,
    pub n_failed: u32,
    /// Power changes since the critical rate was set.
    pub p_count: u32,
    pub success_threshold: u32,
    pub state: AparfState,
    pub rate_index: usize,
    /// Rate the station left when it had to slow down at full power.
    pub critical_rate: Option<usize>,
    pub power_level: u8,
}

#[derive(Debug, Clone)]
pub struct Aparf {
    config: AparfConfig,
}

impl Aparf {
    pub fn new(config: AparfConfig) -> Result<Self, ConfigError> {
        let thresholds = [
            ("success_threshold_1", config.success_threshold_1),
            ("success_threshold_2", config.success_threshold_2),
            ("fail_threshold", config.fail_threshold),
        ];
        if let Some((name, value)) = thresholds.into_iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::ThresholdOutOfRange { name, value });
        }
        Ok(Self { config })
    }
}

impl RateControl for Aparf {
    type State = AparfStation;

    fn name(&self) -> &'static str {
        "aparf"
    }

    fn new_station(&self, ctx: &RateContext) -> AparfStation {
        AparfStation {
            n_success: 0,
            n_failed: 0,
            p_count: 0,
            success_threshold: self.config.success_threshold_1,
            state: AparfState::High,
            rate_index: ctx.max_rate_index(),
            critical_rate: None,
            power_level: ctx.max_power,
        }
    }

    fn data_parameters(&self, _ctx: &RateContext, state: &AparfStation) -> (usize, u8) {
        (state.rate_index, state.power_level)
    }

    fn report_data_ok(&self, ctx: &RateContext, station: &mut AparfStation, _ack_snr: f64, _data_snr: f64) {
        station.n_success += 1;
        station.n_failed = 0;
        match station.state {
            AparfState::High | AparfState::Low if station.n_success >= station.success_threshold => {
                station.state = AparfState::Spread;
            }
            AparfState::Spread => {
                station.state = AparfState::High;
                station.success_threshold = self.config.success_threshold_1;
            }
            _ => {}
        }

        if station.n_success != station.success_threshold {
            return;
        }
        station.n_success = 0;
        station.n_failed = 0;

        if station.rate_index == ctx.max_rate_index() {
            station.power_level = lower_power(ctx, station.power_level, self.config.power_decrement_step);
            return;
        }
        match station.critical_rate {
            None => {
                station.rate_index = (station.rate_index + self.config.rate_increment_step).min(ctx.max_rate_index());
            }
            Some(critical) if station.p_count == self.config.power_threshold => {
                station.power_level = ctx.max_power;
                station.rate_index = critical;
                station.p_count = 0;
                station.critical_rate = None;
            }
            Some(_) => {
                if station.power_level != ctx.min_power {
                    station.power_level = lower_power(ctx, station.power_level, self.config.power_decrement_step);
                    station.p_count += 1;
                }
            }
        }
    }

    fn report_data_failed(&self, ctx: &RateContext, station: &mut AparfStation) {
        station.n_failed += 1;
        station.n_success = 0;
        match station.state {
            AparfState::Low => {
                station.state = AparfState::High;
                station.success_threshold = self.config.success_threshold_1;
            }
            AparfState::Spread => {
                station.state = AparfState::Low;
                station.success_threshold = self.config.success_threshold_2;
            }
            AparfState::High => {}
        }

        if station.n_failed != self.config.fail_threshold {
            return;
        }
        station.n_failed = 0;
        station.n_success = 0;
        station.p_count = 0;
        if station.power_level == ctx.max_power {
            station.critical_rate = Some(station.rate_index);
            station.rate_index = station.rate_index.saturating_sub(self.config.rate_decrement_step);
        } else {
            station.power_level = station.power_level.saturating_add(self.config.power_increment_step).min(ctx.max_power);
        }
    }
}

fn lower_power(ctx: &RateContext, level: u8, step: u8) -> u8 {
    level.saturating_sub(step).max(ctx.min_power)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wifi::frame::Mac48Address;
    use crate::wifi::mode::{Standard, WifiMode};
    use crate::wifi::station_manager::{RemoteStationManager, StationManager, StationManagerConfig};
    use embassy_time::Instant;

    struct Harness {
        manager: RemoteStationManager<Aparf>,
        peer: Mac48Address,
    }

    impl Harness {
        fn new() -> Self {
            let aparf = Aparf::new(AparfConfig::default()).unwrap();
            Self {
                manager: RemoteStationManager::new(StationManagerConfig::default(), aparf, Standard::Ieee80211a, 18).unwrap(),
                peer: Mac48Address::from_node_id(3),
            }
        }

        fn ok(&mut self, times: usize) {
            for _ in 0..times {
                self.manager.report_data_ok(Instant::from_ticks(0), self.peer, 0.0, WifiMode::OfdmRate6Mbps, 0.0);
            }
        }

        fn fail(&mut self, times: usize) {
            for _ in 0..times {
                self.manager.report_data_failed(Instant::from_ticks(0), self.peer);
            }
        }

        fn assert_at(&mut self, rate_mbps: u64, power: u8) {
            let tx = self.manager.data_tx_vector(self.peer);
            assert_eq!(tx.mode.data_rate(), rate_mbps * 1_000_000, "data rate");
            assert_eq!(tx.power_level, power, "power level");
        }

        fn state(&self) -> AparfState {
            self.manager.station_state(self.peer).map(|station| station.state).unwrap()
        }
    }

    #[test]
    fn adaptation_sequence() {
        let mut h = Harness::new();
        h.assert_at(54, 17);

        // High needs 3 successes; at the top rate the power goes down.
        h.ok(3);
        h.assert_at(54, 16);
        assert_eq!(h.state(), AparfState::Spread);

        h.fail(1);
        h.assert_at(54, 17);
        assert_eq!(h.state(), AparfState::Low);

        h.ok(10);
        h.assert_at(54, 16);

        h.ok(3);
        h.assert_at(54, 15);

        h.ok(16 * 3);
        h.assert_at(54, 0);

        h.fail(1);
        h.assert_at(54, 1);

        h.fail(16);
        h.assert_at(54, 17);

        // Failing at full power lowers the rate and remembers 54 Mbps as critical.
        h.fail(1);
        h.assert_at(48, 17);

        h.ok(3);
        h.assert_at(48, 16);

        h.ok(9 * 3);
        h.assert_at(48, 7);

        // Ten power changes later the critical rate is restored at full power.
        h.ok(3);
        h.assert_at(54, 17);
    }

    #[test]
    fn zero_fail_threshold_is_rejected() {
        let config = AparfConfig {
            fail_threshold: 0,
            ..AparfConfig::default()
        };
        assert!(matches!(Aparf::new(config), Err(ConfigError::ThresholdOutOfRange { name: "fail_threshold", value: 0 })));
    }
}
