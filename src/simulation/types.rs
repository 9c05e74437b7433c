//! Type definitions for the simulation.
//!
//! Contains the scene description read from JSON or TOML files:
//! - Run parameters (seed, duration)
//! - Propagation loss and delay models
//! - PHY, MAC and rate-control configuration shared by all nodes
//! - Nodes with their positions and optional traffic flows

use embassy_time::Duration;
use serde::Deserialize;

use super::geometry::Position;
use super::traffic::TrafficConfig;
use crate::wifi::channel::{PropagationDelayConfig, PropagationLossConfig};
use crate::wifi::mac_low::AckPolicy;
use crate::wifi::phy::PhyConfig;
use crate::wifi::station_manager::{RateControlConfig, StationManagerConfig};

fn default_duration_ms() -> u64 {
    1000
}

/// Root structure representing the entire scene
#[derive(Debug, Clone, Deserialize)]
pub struct Scene {
    /// Seed for every random source of the run.
    #[serde(default)]
    pub seed: u64,
    /// Simulated time to run.
    #[serde(default = "default_duration_ms")]
    pub duration_ms: u64,
    #[serde(default)]
    pub propagation: PropagationLossConfig,
    #[serde(default)]
    pub propagation_delay: PropagationDelayConfig,
    /// PHY parameters, including the 802.11 standard.
    #[serde(default)]
    pub phy: PhyConfig,
    #[serde(default)]
    pub mac: MacConfig,
    #[serde(default)]
    pub rate_control: RateControlConfig,
    pub nodes: Vec<NodeConfig>,
}

impl Scene {
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

/// Retry/RTS policy and the ACK policy used by traffic sources.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MacConfig {
    #[serde(flatten)]
    pub station_manager: StationManagerConfig,
    #[serde(default)]
    pub ack_policy: AckPolicy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    pub node_id: u32,
    pub position: Position,
    /// Saturated flow sent by this node, if any.
    #[serde(default)]
    pub traffic: Option<TrafficConfig>,
}
