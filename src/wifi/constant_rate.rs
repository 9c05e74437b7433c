//! Fixed data and control modes at full power, for baselines.

use super::mode::{Standard, WifiMode};
use super::station_manager::{RateContext, RateControl};
use crate::error::ConfigError;

#[derive(Debug, Clone)]
pub struct ConstantRate {
    data_mode: WifiMode,
    control_mode: WifiMode,
}

impl ConstantRate {
    pub fn new(standard: Standard, data_mode: WifiMode, control_mode: WifiMode) -> Result<Self, ConfigError> {
        let modes = standard.modes();
        for mode in [data_mode, control_mode] {
            if !modes.contains(&mode) {
                return Err(ConfigError::ModeNotInStandard {
                    mode: mode.to_string(),
                    standard: standard.name().to_string(),
                });
            }
        }
        Ok(Self { data_mode, control_mode })
    }
}

fn index_of(ctx: &RateContext, mode: WifiMode) -> usize {
    ctx.modes.iter().position(|m| *m == mode).unwrap_or(0)
}

impl RateControl for ConstantRate {
    type State = ();

    fn name(&self) -> &'static str {
        "constant_rate"
    }

    fn new_station(&self, _ctx: &RateContext) {}

    fn data_parameters(&self, ctx: &RateContext, _state: &()) -> (usize, u8) {
        (index_of(ctx, self.data_mode), ctx.max_power)
    }

    fn rts_parameters(&self, ctx: &RateContext, _state: &()) -> (usize, u8) {
        (index_of(ctx, self.control_mode), ctx.max_power)
    }

    fn report_data_ok(&self, _ctx: &RateContext, _state: &mut (), _ack_snr: f64, _data_snr: f64) {}

    fn report_data_failed(&self, _ctx: &RateContext, _state: &mut ()) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wifi::frame::Mac48Address;
    use crate::wifi::station_manager::{RemoteStationManager, StationManager, StationManagerConfig};
    use embassy_time::Instant;

    #[test]
    fn never_adapts() {
        let constant = ConstantRate::new(Standard::Holland, WifiMode::OfdmRate36Mbps, WifiMode::OfdmRate12Mbps).unwrap();
        let mut manager = RemoteStationManager::new(StationManagerConfig::default(), constant, Standard::Holland, 4).unwrap();
        let peer = Mac48Address::from_node_id(1);
        for _ in 0..20 {
            manager.report_data_failed(Instant::from_ticks(0), peer);
        }
        let data = manager.data_tx_vector(peer);
        assert_eq!(data.mode, WifiMode::OfdmRate36Mbps);
        assert_eq!(data.power_level, 3);
        assert_eq!(manager.rts_tx_vector(peer).mode, WifiMode::OfdmRate12Mbps);
        assert!(manager.trace_mut().is_empty());
    }

    #[test]
    fn holland_has_no_9mbps() {
        assert!(matches!(
            ConstantRate::new(Standard::Holland, WifiMode::OfdmRate9Mbps, WifiMode::OfdmRate6Mbps),
            Err(ConfigError::ModeNotInStandard { .. })
        ));
    }
}
