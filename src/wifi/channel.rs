//! The shared medium: how much of a transmission reaches each device, and when.
//!
//! Loss and delay models are configured once per scene and shared by every
//! PHY. [`Channel::propagate`] is called for each (transmitter, receiver)
//! pair when a frame goes on the air.

use embassy_time::{Duration, TICK_HZ};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Deserialize;

use crate::simulation::geometry::{Position, distance};
use crate::simulation::signal_calculations::{PathLossParameters, SPEED_OF_LIGHT, calculate_friis_loss, calculate_path_loss, calculate_rssi};

/// Received power for a transmission between two positions.
pub trait PropagationLossModel {
    fn calc_rx_power(&mut self, tx_power_dbm: f64, from: &Position, to: &Position) -> f64;
}

/// Time a signal needs to travel between two positions.
pub trait PropagationDelayModel {
    fn delay(&self, from: &Position, to: &Position) -> Duration;
}

/// Log-distance path loss, optionally with log-normal shadowing drawn per frame.
pub struct LogDistancePropagation {
    params: PathLossParameters,
    rng: StdRng,
}

impl LogDistancePropagation {
    pub fn new(params: PathLossParameters, seed: u64) -> Self {
        Self {
            params,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl PropagationLossModel for LogDistancePropagation {
    fn calc_rx_power(&mut self, tx_power_dbm: f64, from: &Position, to: &Position) -> f64 {
        let loss = calculate_path_loss(distance(from, to), &self.params, &mut self.rng);
        calculate_rssi(tx_power_dbm, loss)
    }
}

pub struct FriisPropagation {
    pub frequency_hz: f64,
    /// Linear system loss factor; 1 means none.
    pub system_loss: f64,
}

impl PropagationLossModel for FriisPropagation {
    fn calc_rx_power(&mut self, tx_power_dbm: f64, from: &Position, to: &Position) -> f64 {
        calculate_rssi(tx_power_dbm, calculate_friis_loss(distance(from, to), self.frequency_hz, self.system_loss))
    }
}

/// Every receiver sees the same power, whatever the distance and tx power.
pub struct FixedRssPropagation {
    pub rss_dbm: f64,
}

impl PropagationLossModel for FixedRssPropagation {
    fn calc_rx_power(&mut self, _tx_power_dbm: f64, _from: &Position, _to: &Position) -> f64 {
        self.rss_dbm
    }
}

/// Delay at a constant propagation speed, truncated to whole ticks.
pub struct ConstantSpeedDelay {
    pub speed: f64,
}

impl PropagationDelayModel for ConstantSpeedDelay {
    fn delay(&self, from: &Position, to: &Position) -> Duration {
        let seconds = distance(from, to) / self.speed;
        Duration::from_ticks((seconds * TICK_HZ as f64) as u64)
    }
}

pub struct ZeroDelay;

impl PropagationDelayModel for ZeroDelay {
    fn delay(&self, _from: &Position, _to: &Position) -> Duration {
        Duration::from_ticks(0)
    }
}

fn default_frequency_hz() -> f64 {
    5.15e9
}

fn default_system_loss() -> f64 {
    1.0
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum PropagationLossConfig {
    LogDistance(PathLossParameters),
    Friis {
        #[serde(default = "default_frequency_hz")]
        frequency_hz: f64,
        #[serde(default = "default_system_loss")]
        system_loss: f64,
    },
    FixedRss {
        rss_dbm: f64,
    },
}

impl Default for PropagationLossConfig {
    fn default() -> Self {
        PropagationLossConfig::LogDistance(PathLossParameters::default())
    }
}

impl PropagationLossConfig {
    pub fn build(&self, seed: u64) -> Box<dyn PropagationLossModel> {
        match self {
            PropagationLossConfig::LogDistance(params) => Box::new(LogDistancePropagation::new(params.clone(), seed)),
            PropagationLossConfig::Friis { frequency_hz, system_loss } => Box::new(FriisPropagation {
                frequency_hz: *frequency_hz,
                system_loss: *system_loss,
            }),
            PropagationLossConfig::FixedRss { rss_dbm } => Box::new(FixedRssPropagation { rss_dbm: *rss_dbm }),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum PropagationDelayConfig {
    #[default]
    ConstantSpeed,
    Zero,
}

impl PropagationDelayConfig {
    pub fn build(&self) -> Box<dyn PropagationDelayModel> {
        match self {
            PropagationDelayConfig::ConstantSpeed => Box::new(ConstantSpeedDelay { speed: SPEED_OF_LIGHT }),
            PropagationDelayConfig::Zero => Box::new(ZeroDelay),
        }
    }
}

pub struct Channel {
    loss: Box<dyn PropagationLossModel>,
    delay: Box<dyn PropagationDelayModel>,
}

impl Channel {
    pub fn new(loss: Box<dyn PropagationLossModel>, delay: Box<dyn PropagationDelayModel>) -> Self {
        Self { loss, delay }
    }

    /// (arrival delay, received power in dBm) for a frame radiated at `tx_power_dbm`.
    pub fn propagate(&mut self, tx_power_dbm: f64, from: &Position, to: &Position) -> (Duration, f64) {
        (self.delay.delay(from, to), self.loss.calc_rx_power(tx_power_dbm, from, to))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_speed_delay_truncates_to_microseconds() {
        let delay = ConstantSpeedDelay { speed: SPEED_OF_LIGHT };
        let origin = Position::new(0.0, 0.0, 0.0);
        assert_eq!(delay.delay(&origin, &Position::new(100.0, 0.0, 0.0)), Duration::from_ticks(0));
        assert_eq!(delay.delay(&origin, &Position::new(1000.0, 0.0, 0.0)), Duration::from_micros(3));
        assert_eq!(ZeroDelay.delay(&origin, &Position::new(1e6, 0.0, 0.0)), Duration::from_ticks(0));
    }

    #[test]
    fn loss_models_from_config() {
        let a = Position::new(0.0, 0.0, 0.0);
        let b = Position::new(10.0, 0.0, 0.0);

        let json = r#"{"model": "log_distance", "path_loss_exponent": 2.0, "reference_loss": 40.0}"#;
        let config: PropagationLossConfig = serde_json::from_str(json).unwrap();
        let mut model = config.build(1);
        assert!((model.calc_rx_power(20.0, &a, &b) - (20.0 - 60.0)).abs() < 1e-9);

        let config: PropagationLossConfig = serde_json::from_str(r#"{"model": "fixed_rss", "rss_dbm": -65.0}"#).unwrap();
        assert_eq!(config.build(1).calc_rx_power(20.0, &a, &b), -65.0);

        let config: PropagationLossConfig = serde_json::from_str(r#"{"model": "friis"}"#).unwrap();
        let friis = config.build(1).calc_rx_power(0.0, &a, &b);
        assert!((friis + calculate_friis_loss(10.0, 5.15e9, 1.0)).abs() < 1e-9);
    }

    #[test]
    fn channel_combines_delay_and_loss() {
        let mut channel = Channel::new(Box::new(FixedRssPropagation { rss_dbm: -70.0 }), Box::new(ConstantSpeedDelay { speed: SPEED_OF_LIGHT }));
        let (delay, power) = channel.propagate(16.0, &Position::new(0.0, 0.0, 0.0), &Position::new(0.0, 3000.0, 0.0));
        assert_eq!(delay, Duration::from_micros(10));
        assert_eq!(power, -70.0);
    }
}
