//! Network simulation core module.
//!
//! This module drives a set of 802.11 devices on a shared channel in virtual
//! time. It integrates:
//! - Scene loading and validation
//! - A discrete-event scheduler publishing the simulated clock
//! - Saturated traffic sources performing DCF-style medium access
//! - Propagation loss and delay between node positions
//! - Trace collection for PHY state and rate/power decisions
//!
//! ## Module Organization
//!
//! - `types`: Scene description (nodes, propagation, PHY/MAC/rate control)
//! - `scheduler`: Event queue, timers and the virtual clock
//! - `traffic`: Per-node saturated source
//! - `network`: The event loop connecting devices through the channel
//! - `signal_calculations`: Path loss and power unit conversions
//! - `geometry`: Positions and distances
//! - `trace`: Bounded trace log
//!
//! ## Public API
//!
//! The main entry points are [`load_scene`] and [`Network`]: build a network from
//! a scene, run it for the scene duration and read the per-node statistics.

pub mod geometry;
pub mod network;
pub mod scheduler;
pub mod signal_calculations;
pub mod trace;
pub mod traffic;
pub mod types;

pub use network::{Network, NodeStats, load_scene};
pub use types::Scene;
