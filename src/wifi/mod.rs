//! 802.11a/OFDM station model: PHY with interference-based reception, MAC low
//! frame exchanges, and per-peer rate and power control.

pub mod aparf;
pub mod channel;
pub mod constant_rate;
pub mod device;
pub mod error_rate;
pub mod frame;
pub mod interference;
pub mod mac_low;
pub mod mac_parameters;
pub mod mode;
pub mod parf;
pub mod phy;
pub mod phy_state;
pub mod station_manager;
