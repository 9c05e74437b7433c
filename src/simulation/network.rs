//! Network loop driving the simulation timeline.
//!
//! High-level flow for every event popped from the scheduler:
//! 1) Route it to the node it belongs to: the device (PHY/MAC timers), the
//!    traffic source (medium access), or the PHY itself for a signal arriving
//!    at the antenna.
//! 2) Let the traffic source react to the outcomes the device reported.
//! 3) Put every frame the node started sending on the channel: one arrival
//!    per other node, after the propagation delay and at the received power.
//! 4) Move the node's trace records into the global log, tagged with its id.

use embassy_time::{Duration, Instant};
use log::{debug, info};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use super::geometry::Position;
use super::scheduler::{EventId, EventQueue, Scheduler};
use super::trace::{TraceLog, TraceRecord};
use super::traffic::{SaturatedSource, TrafficEvent, TrafficStats};
use super::types::Scene;
use crate::error::SceneLoadError;
use crate::wifi::channel::{Channel, PropagationLossConfig};
use crate::wifi::device::{Airtime, DeviceEvent, WifiDevice};
use crate::wifi::frame::{Frame, FrameKind, Mac48Address};
use crate::wifi::mode::{WifiMode, WifiPreamble};

/// Everything the scheduler can hold, addressed by node index.
#[derive(Debug, Clone)]
pub enum SimEvent {
    Device {
        node: usize,
        event: DeviceEvent,
    },
    Traffic {
        node: usize,
        event: TrafficEvent,
    },
    /// The start of a frame reaches a node.
    Arrival {
        node: usize,
        frame: Frame,
        rx_power_dbm: f64,
        mode: WifiMode,
        preamble: WifiPreamble,
    },
}

/// The scheduler as seen by one node: its events are wrapped with the node index.
pub struct NodeQueue<'a> {
    sched: &'a mut Scheduler<SimEvent>,
    node: usize,
}

impl EventQueue<DeviceEvent> for NodeQueue<'_> {
    fn now(&self) -> Instant {
        self.sched.now()
    }

    fn schedule(&mut self, delay: Duration, event: DeviceEvent) -> EventId {
        self.sched.schedule(delay, SimEvent::Device { node: self.node, event })
    }

    fn cancel(&mut self, id: EventId) -> bool {
        self.sched.cancel(id)
    }

    fn is_pending(&self, id: EventId) -> bool {
        self.sched.is_pending(id)
    }
}

impl EventQueue<TrafficEvent> for NodeQueue<'_> {
    fn now(&self) -> Instant {
        self.sched.now()
    }

    fn schedule(&mut self, delay: Duration, event: TrafficEvent) -> EventId {
        self.sched.schedule(delay, SimEvent::Traffic { node: self.node, event })
    }

    fn cancel(&mut self, id: EventId) -> bool {
        self.sched.cancel(id)
    }

    fn is_pending(&self, id: EventId) -> bool {
        self.sched.is_pending(id)
    }
}

/// A frame put on the air, kept for inspection after the run.
#[derive(Debug, Clone, PartialEq)]
pub struct TransmissionRecord {
    pub node_id: u32,
    pub start: Instant,
    pub duration: Duration,
    pub kind: FrameKind,
    pub receiver: Mac48Address,
    pub mode: WifiMode,
    pub tx_power_dbm: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeStats {
    pub node_id: u32,
    pub algorithm: &'static str,
    pub traffic: TrafficStats,
    pub airtime: Airtime,
}

pub struct Node {
    pub node_id: u32,
    pub position: Position,
    pub device: WifiDevice,
    pub source: SaturatedSource,
}

pub struct Network {
    nodes: Vec<Node>,
    channel: Channel,
    sched: Scheduler<SimEvent>,
    trace: TraceLog,
    transmissions: Vec<TransmissionRecord>,
    events_processed: u64,
}

/// Seed of one random stream of one node, derived from the scene seed.
fn node_seed(scene_seed: u64, node_id: u32, stream: u64) -> u64 {
    scene_seed ^ ((u64::from(node_id) << 8) | stream).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

impl Network {
    /// Build devices, channel and traffic sources for a scene.
    ///
    /// The scene is validated first; nothing is scheduled for an invalid one.
    pub fn new(scene: &Scene) -> Result<Self, SceneLoadError> {
        validate_scene(scene)?;
        let channel = Channel::new(scene.propagation.build(scene.seed), scene.propagation_delay.build());
        let mut sched = Scheduler::new();

        let mut nodes = Vec::with_capacity(scene.nodes.len());
        for (index, config) in scene.nodes.iter().enumerate() {
            let device = WifiDevice::new(
                Mac48Address::from_node_id(config.node_id),
                &scene.phy,
                &scene.mac.station_manager,
                &scene.rate_control,
                node_seed(scene.seed, config.node_id, 0),
            )?;
            let mut source = SaturatedSource::new(config.traffic.as_ref(), scene.mac.ack_policy, node_seed(scene.seed, config.node_id, 1));
            if let Some(traffic) = &config.traffic {
                let mut queue = NodeQueue { sched: &mut sched, node: index };
                source.start(&mut queue, Duration::from_micros(traffic.start_us));
            }
            debug!("node {} at {:?} is {}", config.node_id, config.position, device.address());
            nodes.push(Node {
                node_id: config.node_id,
                position: config.position,
                device,
                source,
            });
        }

        Ok(Self {
            nodes,
            channel,
            sched,
            trace: TraceLog::new(),
            transmissions: Vec::new(),
            events_processed: 0,
        })
    }

    pub fn now(&self) -> Instant {
        self.sched.now()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, node_id: u32) -> Option<&Node> {
        self.nodes.iter().find(|node| node.node_id == node_id)
    }

    /// Every frame put on the air so far, in order.
    pub fn transmissions(&self) -> &[TransmissionRecord] {
        &self.transmissions
    }

    pub fn trace(&self) -> &TraceLog {
        &self.trace
    }

    pub fn trace_mut(&mut self) -> &mut TraceLog {
        &mut self.trace
    }

    pub fn events_processed(&self) -> u64 {
        self.events_processed
    }

    pub fn stats(&self) -> Vec<NodeStats> {
        self.nodes
            .iter()
            .map(|node| NodeStats {
                node_id: node.node_id,
                algorithm: node.device.manager().algorithm(),
                traffic: node.source.stats().clone(),
                airtime: node.device.airtime(),
            })
            .collect()
    }

    /// Run for `duration` of simulated time.
    pub fn run_for(&mut self, duration: Duration) {
        let stop = self.now() + duration;
        self.run_until(stop);
    }

    /// Fire every event due at or before `stop`, then leave the clock at `stop`.
    pub fn run_until(&mut self, stop: Instant) {
        while self.sched.peek_time().is_some_and(|at| at <= stop) {
            self.step();
        }
        self.sched.advance_to(stop);
        info!(
            "Simulation at {} us: {} events processed, {} frames sent",
            stop.as_micros(),
            self.events_processed,
            self.transmissions.len()
        );
    }

    /// Fire the next event. Returns false once nothing is left to do.
    pub fn step(&mut self) -> bool {
        let Some((_, event)) = self.sched.pop() else {
            return false;
        };
        self.events_processed += 1;

        let Network { nodes, sched, .. } = self;
        let index = match event {
            SimEvent::Device { node, event } => {
                let Node { device, source, .. } = &mut nodes[node];
                let mut queue = NodeQueue { sched, node };
                device.handle_event(&mut queue, source, event);
                source.after_device_event(&mut queue, device);
                node
            }
            SimEvent::Traffic { node, event } => {
                let Node { device, source, .. } = &mut nodes[node];
                let mut queue = NodeQueue { sched, node };
                source.handle_event(&mut queue, device, event);
                source.after_device_event(&mut queue, device);
                node
            }
            SimEvent::Arrival {
                node,
                frame,
                rx_power_dbm,
                mode,
                preamble,
            } => {
                let mut queue = NodeQueue { sched, node };
                nodes[node].device.start_receive(&mut queue, frame, rx_power_dbm, mode, preamble);
                node
            }
        };

        self.propagate(index);
        self.collect_trace(index);
        true
    }

    /// Schedule an arrival at every other node for each frame node `index` started sending.
    fn propagate(&mut self, index: usize) {
        let transmissions = self.nodes[index].device.drain_transmissions();
        for tx in transmissions {
            let sender = &self.nodes[index];
            self.transmissions.push(TransmissionRecord {
                node_id: sender.node_id,
                start: tx.start,
                duration: tx.duration,
                kind: tx.frame.kind(),
                receiver: tx.frame.receiver(),
                mode: tx.mode,
                tx_power_dbm: tx.tx_power_dbm,
            });
            for (receiver, node) in self.nodes.iter().enumerate() {
                if receiver == index {
                    continue;
                }
                let (delay, rx_power_dbm) = self.channel.propagate(tx.tx_power_dbm, &sender.position, &node.position);
                self.sched.schedule_at(
                    tx.start + delay,
                    SimEvent::Arrival {
                        node: receiver,
                        frame: tx.frame.clone(),
                        rx_power_dbm,
                        mode: tx.mode,
                        preamble: tx.preamble,
                    },
                );
            }
        }
    }

    fn collect_trace(&mut self, index: usize) {
        let node = &mut self.nodes[index];
        for record in node.device.drain_trace() {
            self.trace.push(TraceRecord {
                node_id: Some(node.node_id),
                ..record
            });
        }
    }
}

/// Validate scene configuration to reject malformed inputs.
///
/// Checks for issues that would make a run meaningless or panic later:
/// - Empty node list or duplicate node IDs
/// - Traffic toward an unknown node, toward the sender itself, or with empty frames
/// - Invalid propagation parameters (non-positive exponent, negative shadowing sigma)
/// - Invalid PHY power range
/// - Zero run duration
///
/// # Parameters
///
/// * `scene` - The parsed scene to validate
///
/// # Returns
///
/// `Ok(())` if validation passes, `Err(SceneLoadError)` describing the first problem found.
pub fn validate_scene(scene: &Scene) -> Result<(), SceneLoadError> {
    let invalid = |message: String| Err(SceneLoadError::Validation(message));

    if scene.nodes.is_empty() {
        return invalid("Scene must contain at least one node".to_string());
    }
    if scene.duration_ms == 0 {
        return invalid("duration_ms must be positive".to_string());
    }

    let mut node_ids = HashSet::new();
    for node in &scene.nodes {
        if !node_ids.insert(node.node_id) {
            return invalid(format!("Duplicate node_id found: {}", node.node_id));
        }
    }

    for node in &scene.nodes {
        let Some(traffic) = &node.traffic else {
            continue;
        };
        if traffic.packet_size == 0 {
            return invalid(format!("Node {} traffic has zero packet_size", node.node_id));
        }
        if let Some(destination) = traffic.destination {
            if destination == node.node_id {
                return invalid(format!("Node {} sends traffic to itself", node.node_id));
            }
            if !node_ids.contains(&destination) {
                return invalid(format!("Node {} sends traffic to unknown node {}", node.node_id, destination));
            }
        }
    }

    match &scene.propagation {
        PropagationLossConfig::LogDistance(params) => {
            if params.path_loss_exponent <= 0.0 {
                return invalid("Invalid path_loss_exponent, must be positive".to_string());
            }
            if params.shadowing_sigma < 0.0 {
                return invalid("Invalid shadowing_sigma, must be non-negative".to_string());
            }
        }
        PropagationLossConfig::Friis { frequency_hz, system_loss } => {
            if *frequency_hz <= 0.0 || *system_loss <= 0.0 {
                return invalid("Invalid Friis parameters, frequency and system loss must be positive".to_string());
            }
        }
        PropagationLossConfig::FixedRss { .. } => {}
    }

    scene.phy.validate()?;
    Ok(())
}

/// Parse a scene from text in the format named by `extension` (`json` or `toml`).
pub fn parse_scene(data: &str, extension: &str) -> Result<Scene, SceneLoadError> {
    let scene = match extension {
        "json" => serde_json::from_str::<Scene>(data)?,
        "toml" => toml::from_str::<Scene>(data)?,
        other => return Err(SceneLoadError::UnsupportedFormat(other.to_string())),
    };
    validate_scene(&scene)?;
    Ok(scene)
}

/// Load and parse the scene configuration from a file.
///
/// # Parameters
///
/// * `path` - Path to a `.json` or `.toml` scene file
///
/// # Returns
///
/// The validated scene, or the reason it could not be loaded.
pub fn load_scene(path: &str) -> Result<Scene, SceneLoadError> {
    let data = fs::read_to_string(path).map_err(|source| SceneLoadError::Read {
        path: path.to_string(),
        source,
    })?;
    let extension = Path::new(path).extension().and_then(|ext| ext.to_str()).unwrap_or_default();
    let scene = parse_scene(&data, extension)?;
    info!(
        "Loaded scene {}: {} nodes, standard {}, {} ms",
        path,
        scene.nodes.len(),
        scene.phy.standard.name(),
        scene.duration_ms
    );
    Ok(scene)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::signal_calculations::ratio_to_db;
    use crate::simulation::traffic::TrafficConfig;
    use crate::simulation::types::{MacConfig, NodeConfig};
    use crate::wifi::channel::PropagationDelayConfig;
    use crate::wifi::frame::{ack_size, cts_size, rts_size};
    use crate::wifi::mode::tx_duration;
    use crate::wifi::phy::PhyConfig;
    use crate::wifi::station_manager::{RateControlConfig, StationManagerConfig};

    fn two_nodes(rss_dbm: f64, data_mode: &str, max_packets: Option<u64>) -> Scene {
        Scene {
            seed: 7,
            duration_ms: 1000,
            propagation: PropagationLossConfig::FixedRss { rss_dbm },
            propagation_delay: PropagationDelayConfig::Zero,
            phy: PhyConfig::default(),
            mac: MacConfig::default(),
            rate_control: RateControlConfig::ConstantRate {
                data_mode: Some(data_mode.to_string()),
                control_mode: None,
            },
            nodes: vec![
                NodeConfig {
                    node_id: 1,
                    position: Position::new(0.0, 0.0, 0.0),
                    traffic: Some(TrafficConfig {
                        destination: Some(2),
                        packet_size: 1000,
                        start_us: 0,
                        max_packets,
                    }),
                },
                NodeConfig {
                    node_id: 2,
                    position: Position::new(10.0, 0.0, 0.0),
                    traffic: None,
                },
            ],
        }
    }

    fn snr_db(network: &Network, rss_dbm: f64, mode: WifiMode) -> f64 {
        ratio_to_db(network.nodes()[1].device.phy().snr_without_interference(rss_dbm, mode))
    }

    fn success_ratio(network: &Network) -> (f64, u64) {
        let airtime = network.node(2).unwrap().device.airtime();
        let total = airtime.rx_ok + airtime.rx_error;
        (airtime.rx_ok as f64 / total as f64, total)
    }

    #[test]
    fn rts_cts_data_ack_on_the_air() {
        let mut scene = two_nodes(-60.0, "OfdmRate6Mbps", Some(1));
        scene.mac.station_manager = StationManagerConfig {
            rts_cts_threshold: 0,
            ..StationManagerConfig::default()
        };
        let mut network = Network::new(&scene).unwrap();
        network.run_for(Duration::from_millis(20));

        let sent = network.transmissions();
        let kinds: Vec<FrameKind> = sent.iter().map(|tx| tx.kind).collect();
        assert_eq!(kinds, vec![FrameKind::Rts, FrameKind::Cts, FrameKind::Data, FrameKind::Ack]);
        assert_eq!(sent[0].node_id, 1);
        assert_eq!(sent[1].node_id, 2);

        let sifs = Duration::from_micros(16);
        let mode = WifiMode::OfdmRate6Mbps;
        let t0 = sent[0].start;
        assert_eq!(sent[0].duration, tx_duration(rts_size(), mode, WifiPreamble::Long));
        assert_eq!(sent[1].start, t0 + sent[0].duration + sifs);
        assert_eq!(sent[1].duration, tx_duration(cts_size(), mode, WifiPreamble::Long));
        assert_eq!(sent[2].start, sent[1].start + sent[1].duration + sifs);
        assert_eq!(sent[2].duration, tx_duration(1028, mode, WifiPreamble::Long));
        assert_eq!(sent[3].start, sent[2].start + sent[2].duration + sifs);
        assert_eq!(sent[3].duration, tx_duration(ack_size(), mode, WifiPreamble::Long));

        let stats = network.stats();
        assert_eq!(stats[0].traffic.delivered, 1);
        assert_eq!(stats[0].traffic.rts_sent, 1);
        assert_eq!(stats[1].traffic.received, 1);
        // The first access waits at least DIFS.
        assert!(t0 >= Instant::from_micros(34));
    }

    #[test]
    fn strong_link_delivers_nearly_every_frame() {
        let rss_dbm = -64.5;
        let mut network = Network::new(&two_nodes(rss_dbm, "OfdmRate54Mbps", None)).unwrap();
        let snr = snr_db(&network, rss_dbm, WifiMode::OfdmRate54Mbps);
        assert!((30.0..31.0).contains(&snr), "snr {snr} dB");

        network.run_for(Duration::from_millis(500));
        let (ratio, total) = success_ratio(&network);
        assert!(total > 500, "only {total} frames");
        assert!(ratio >= 0.999, "success ratio {ratio}");
        let stats = network.stats();
        assert!(stats[0].traffic.delivered > 500);
        assert_eq!(stats[0].traffic.dropped, 0);
    }

    #[test]
    fn link_at_noise_level_loses_most_frames() {
        let rss_dbm = -95.0;
        let mut network = Network::new(&two_nodes(rss_dbm, "OfdmRate54Mbps", None)).unwrap();
        let snr = snr_db(&network, rss_dbm, WifiMode::OfdmRate54Mbps);
        assert!(snr.abs() < 0.5, "snr {snr} dB");

        network.run_for(Duration::from_millis(200));
        let (ratio, total) = success_ratio(&network);
        assert!(total >= 10, "only {total} frames");
        assert!(ratio <= 0.5, "success ratio {ratio}");
        assert!(network.stats()[0].traffic.missed_ack > 0);
    }

    #[test]
    fn runs_are_reproducible() {
        let scene = two_nodes(-80.0, "OfdmRate36Mbps", None);
        let mut a = Network::new(&scene).unwrap();
        let mut b = Network::new(&scene).unwrap();
        a.run_for(Duration::from_millis(50));
        b.run_for(Duration::from_millis(50));
        assert_eq!(a.transmissions(), b.transmissions());
        assert_eq!(a.stats(), b.stats());
    }

    #[test]
    fn trace_records_are_tagged_with_node_ids() {
        let mut network = Network::new(&two_nodes(-60.0, "OfdmRate6Mbps", Some(2))).unwrap();
        network.run_for(Duration::from_millis(10));
        assert!(!network.trace().is_empty());
        assert!(network.trace().iter().all(|record| matches!(record.node_id, Some(1) | Some(2))));
    }

    #[test]
    fn scene_from_json_and_toml() {
        let json = r#"{
            "seed": 3,
            "duration_ms": 100,
            "propagation": {"model": "log_distance", "path_loss_exponent": 3.0},
            "mac": {"rts_cts_threshold": 500, "ack_policy": "normal"},
            "rate_control": {"algorithm": "aparf", "success_threshold_1": 5},
            "nodes": [
                {"node_id": 1, "position": {"x": 0, "y": 0}, "traffic": {"destination": 2}},
                {"node_id": 2, "position": {"x": 30, "y": 40}}
            ]
        }"#;
        let scene = parse_scene(json, "json").unwrap();
        assert_eq!(scene.mac.station_manager.rts_cts_threshold, 500);
        assert_eq!(scene.mac.station_manager.max_slrc, 7);
        assert_eq!(scene.nodes[0].traffic.as_ref().map(|t| t.packet_size), Some(1000));
        assert!(matches!(scene.rate_control, RateControlConfig::Aparf(ref c) if c.success_threshold_1 == 5 && c.success_threshold_2 == 10));

        let toml = r#"
            duration_ms = 50
            [phy]
            standard = "holland"
            tx_power_start_dbm = 0.0
            tx_power_end_dbm = 17.0
            tx_power_levels = 18
            [rate_control]
            algorithm = "parf"
            [[nodes]]
            node_id = 1
            position = { x = 0.0, y = 0.0 }
            traffic = { start_us = 100 }
            [[nodes]]
            node_id = 2
            position = { x = 5.0, y = 0.0 }
        "#;
        let scene = parse_scene(toml, "toml").unwrap();
        assert_eq!(scene.phy.tx_power_levels, 18);
        assert_eq!(scene.nodes[0].traffic.as_ref().and_then(|t| t.destination), None);
        let mut network = Network::new(&scene).unwrap();
        network.run_for(Duration::from_millis(5));
        assert!(network.stats()[1].traffic.received > 0);

        assert!(matches!(parse_scene(json, "yaml"), Err(SceneLoadError::UnsupportedFormat(_))));
    }

    #[test]
    fn invalid_scenes_are_rejected() {
        let mut scene = two_nodes(-60.0, "OfdmRate6Mbps", None);
        scene.nodes[1].node_id = 1;
        assert!(matches!(Network::new(&scene), Err(SceneLoadError::Validation(_))));

        let mut scene = two_nodes(-60.0, "OfdmRate6Mbps", None);
        if let Some(traffic) = scene.nodes[0].traffic.as_mut() {
            traffic.destination = Some(9);
        }
        assert!(matches!(validate_scene(&scene), Err(SceneLoadError::Validation(_))));

        let mut scene = two_nodes(-60.0, "OfdmRate6Mbps", None);
        scene.propagation = PropagationLossConfig::LogDistance(crate::simulation::signal_calculations::PathLossParameters {
            path_loss_exponent: 0.0,
            ..Default::default()
        });
        assert!(matches!(validate_scene(&scene), Err(SceneLoadError::Validation(_))));

        let mut scene = two_nodes(-60.0, "OfdmRate6Mbps", None);
        scene.phy.tx_power_levels = 0;
        assert!(matches!(validate_scene(&scene), Err(SceneLoadError::Config(_))));

        let scene = two_nodes(-60.0, "NoSuchMode", None);
        assert!(matches!(Network::new(&scene), Err(SceneLoadError::Config(_))));

        assert!(matches!(load_scene("/nonexistent/scene.json"), Err(SceneLoadError::Read { .. })));
    }
}
