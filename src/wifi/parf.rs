//! PARF: Power-Aware Rate Fallback.
//!
//! ARF extended with power control. After enough successes the rate goes up,
//! or the power goes down once the rate is at its maximum. A failure right
//! after such a change rolls it back. Otherwise every second consecutive
//! failure first raises the power and only lowers the rate at full power.

use serde::Deserialize;

use super::station_manager::{RateContext, RateControl};
use crate::error::ConfigError;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ParfConfig {
    /// Consecutive successes before stepping rate up or power down.
    pub success_threshold: u32,
    /// Attempts (successes and failures) before stepping rate up or power down.
    pub attempt_threshold: u32,
}

impl Default for ParfConfig {
    fn default() -> Self {
        Self {
            success_threshold: 10,
            attempt_threshold: 15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParfStation {
    pub n_attempt: u32,
    pub n_success: u32,
    pub n_fail: u32,
    pub n_retry: u32,
    /// The last success raised the rate; the next failure rolls it back.
    pub using_recovery_rate: bool,
    /// The last success lowered the power; the next failure rolls it back.
    pub using_recovery_power: bool,
    pub rate_index: usize,
    pub power_level: u8,
}

#[derive(Debug, Clone)]
pub struct Parf {
    config: ParfConfig,
}

impl Parf {
    pub fn new(config: ParfConfig) -> Result<Self, ConfigError> {
        if config.success_threshold == 0 {
            return Err(ConfigError::ThresholdOutOfRange {
                name: "success_threshold",
                value: config.success_threshold,
            });
        }
        if config.attempt_threshold == 0 {
            return Err(ConfigError::ThresholdOutOfRange {
                name: "attempt_threshold",
                value: config.attempt_threshold,
            });
        }
        Ok(Self { config })
    }
}

impl RateControl for Parf {
    type State = ParfStation;

    fn name(&self) -> &'static str {
        "parf"
    }

    fn new_station(&self, ctx: &RateContext) -> ParfStation {
        ParfStation {
            n_attempt: 0,
            n_success: 0,
            n_fail: 0,
            n_retry: 0,
            using_recovery_rate: false,
            using_recovery_power: false,
            rate_index: ctx.max_rate_index(),
            power_level: ctx.max_power,
        }
    }

    fn data_parameters(&self, _ctx: &RateContext, state: &ParfStation) -> (usize, u8) {
        (state.rate_index, state.power_level)
    }

    fn report_data_ok(&self, ctx: &RateContext, station: &mut ParfStation, _ack_snr: f64, _data_snr: f64) {
        station.n_attempt += 1;
        station.n_success += 1;
        station.n_fail = 0;
        station.n_retry = 0;
        station.using_recovery_rate = false;
        station.using_recovery_power = false;

        if station.n_success < self.config.success_threshold && station.n_attempt < self.config.attempt_threshold {
            return;
        }
        if station.rate_index < ctx.max_rate_index() {
            station.rate_index += 1;
            station.using_recovery_rate = true;
        } else if station.power_level > ctx.min_power {
            station.power_level -= 1;
            station.using_recovery_power = true;
        }
        station.n_attempt = 0;
        station.n_success = 0;
    }

    fn report_data_failed(&self, ctx: &RateContext, station: &mut ParfStation) {
        station.n_attempt += 1;
        station.n_fail += 1;
        station.n_retry += 1;
        station.n_success = 0;

        if station.using_recovery_rate {
            if station.n_retry == 1 && station.rate_index > 0 {
                station.rate_index -= 1;
                station.using_recovery_rate = false;
            }
            station.n_attempt = 0;
        } else if station.using_recovery_power {
            if station.n_retry == 1 && station.power_level < ctx.max_power {
                station.power_level += 1;
                station.using_recovery_power = false;
            }
            station.n_attempt = 0;
        } else {
            // Fall back on every second retry: 2, 4, 6...
            if (station.n_retry - 1) % 2 == 1 {
                if station.power_level == ctx.max_power {
                    station.rate_index = station.rate_index.saturating_sub(1);
                } else {
                    station.power_level += 1;
                }
            }
            if station.n_retry >= 2 {
                station.n_attempt = 0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wifi::frame::Mac48Address;
    use crate::wifi::mode::{Standard, WifiMode};
    use crate::wifi::station_manager::{RemoteStationManager, StationManager, StationManagerConfig};
    use embassy_time::Instant;

    struct Harness {
        manager: RemoteStationManager<Parf>,
        peer: Mac48Address,
        now: Instant,
    }

    impl Harness {
        /// 802.11a with 18 power levels from 0 to 17 dBm.
        fn new() -> Self {
            let parf = Parf::new(ParfConfig::default()).unwrap();
            Self {
                manager: RemoteStationManager::new(StationManagerConfig::default(), parf, Standard::Ieee80211a, 18).unwrap(),
                peer: Mac48Address::from_node_id(2),
                now: Instant::from_ticks(0),
            }
        }

        fn ok(&mut self, times: usize) {
            for _ in 0..times {
                self.manager.report_data_ok(self.now, self.peer, 0.0, WifiMode::OfdmRate6Mbps, 0.0);
            }
        }

        fn fail(&mut self, times: usize) {
            for _ in 0..times {
                self.manager.report_data_failed(self.now, self.peer);
            }
        }

        fn assert_at(&mut self, rate_mbps: u64, power: u8) {
            let tx = self.manager.data_tx_vector(self.peer);
            assert_eq!(tx.mode.data_rate(), rate_mbps * 1_000_000, "data rate");
            assert_eq!(tx.power_level, power, "power level");
        }
    }

    #[test]
    fn power_drops_after_successes_and_recovers_on_failure() {
        let mut h = Harness::new();
        h.assert_at(54, 17);

        h.ok(10);
        h.assert_at(54, 16);

        h.fail(1);
        h.assert_at(54, 17);
    }

    #[test]
    fn full_adaptation_sequence() {
        let mut h = Harness::new();
        h.assert_at(54, 17);
        h.ok(10);
        h.assert_at(54, 16);
        h.fail(1);
        h.assert_at(54, 17);

        // Alternating outcomes never hit two consecutive failures, so the
        // attempt threshold is what triggers the power decrease.
        for _ in 0..7 {
            h.ok(1);
            h.fail(1);
        }
        h.ok(1);
        h.assert_at(54, 16);

        h.fail(1);
        h.assert_at(54, 17);

        // Full power already: the second failure lowers the rate.
        h.fail(2);
        h.assert_at(48, 17);

        h.ok(10);
        h.assert_at(54, 17);

        // Failure right after a rate increase rolls it back.
        h.fail(1);
        h.assert_at(48, 17);

        h.ok(10);
        h.assert_at(54, 17);

        h.ok(10);
        h.assert_at(54, 16);

        // One success clears the recovery flag, so only the second failure
        // raises the power.
        h.ok(1);
        h.fail(2);
        h.assert_at(54, 17);
    }

    #[test]
    fn rate_bottoms_out_at_the_slowest_mode() {
        let mut h = Harness::new();
        h.fail(40);
        h.assert_at(6, 17);
    }

    #[test]
    fn zero_thresholds_are_rejected() {
        let config = ParfConfig {
            success_threshold: 0,
            ..ParfConfig::default()
        };
        assert!(matches!(Parf::new(config), Err(ConfigError::ThresholdOutOfRange { name: "success_threshold", .. })));
    }
}
