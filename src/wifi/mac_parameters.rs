//! Inter-frame spacing and timeout values per standard.

use embassy_time::{Duration, TICK_HZ};

use super::frame::ack_size;
use super::mode::{ChannelWidth, Standard, WifiPreamble, tx_duration};
use crate::simulation::signal_calculations::SPEED_OF_LIGHT;

/// Distance used to bound the round-trip propagation delay in the timeouts.
///
/// The delay over it (3.336 us) is truncated to whole clock ticks, so with the
/// 1 MHz simulation clock it counts as 3 us and the 802.11a CTS/ACK timeout is
/// 75 us instead of 75.67 us.
const MAX_PROPAGATION_DISTANCE_M: f64 = 1000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacParameters {
    pub slot: Duration,
    pub sifs: Duration,
    pub pifs: Duration,
    pub difs: Duration,
    /// EIFS minus DIFS: SIFS plus an ACK at the lowest rate. Added to DIFS
    /// when the last reception failed.
    pub eifs_no_difs: Duration,
    pub cts_timeout: Duration,
    pub ack_timeout: Duration,
    pub max_propagation_delay: Duration,
}

impl MacParameters {
    pub fn for_standard(standard: Standard) -> Self {
        let (slot_us, sifs_us) = match standard.width() {
            ChannelWidth::Mhz20 => (9, 16),
            ChannelWidth::Mhz10 => (13, 32),
            ChannelWidth::Mhz5 => (21, 64),
        };
        let slot = Duration::from_micros(slot_us);
        let sifs = Duration::from_micros(sifs_us);
        let ack_at_lowest_rate = tx_duration(ack_size(), standard.lowest_mode(), WifiPreamble::Long);
        let max_propagation_delay = Duration::from_ticks((MAX_PROPAGATION_DISTANCE_M / SPEED_OF_LIGHT * TICK_HZ as f64) as u64);
        let response_timeout = sifs + ack_at_lowest_rate + slot + max_propagation_delay + max_propagation_delay;
        Self {
            slot,
            sifs,
            pifs: sifs + slot,
            difs: sifs + slot + slot,
            eifs_no_difs: sifs + ack_at_lowest_rate,
            cts_timeout: response_timeout,
            ack_timeout: response_timeout,
            max_propagation_delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ieee_80211a_timings() {
        let params = MacParameters::for_standard(Standard::Ieee80211a);
        assert_eq!(params.sifs, Duration::from_micros(16));
        assert_eq!(params.slot, Duration::from_micros(9));
        assert_eq!(params.pifs, Duration::from_micros(25));
        assert_eq!(params.difs, Duration::from_micros(34));
        assert_eq!(params.eifs_no_difs, Duration::from_micros(60));
        // 3.336 us truncated to the clock resolution.
        assert_eq!(TICK_HZ, 1_000_000);
        assert_eq!(params.max_propagation_delay, Duration::from_micros(3));
        // 16 + 44 + 9 + 2 * 3
        assert_eq!(params.ack_timeout, Duration::from_micros(75));
        assert_eq!(params.cts_timeout, params.ack_timeout);
    }

    #[test]
    fn narrow_channels_stretch_timings() {
        let ten = MacParameters::for_standard(Standard::Ofdm10Mhz);
        assert_eq!(ten.sifs, Duration::from_micros(32));
        assert_eq!(ten.slot, Duration::from_micros(13));
        // 32 + 88 + 13 + 6
        assert_eq!(ten.ack_timeout, Duration::from_micros(139));
        let five = MacParameters::for_standard(Standard::Ofdm5Mhz);
        assert_eq!(five.sifs, Duration::from_micros(64));
        assert_eq!(five.slot, Duration::from_micros(21));
        assert_eq!(five.difs, Duration::from_micros(106));
    }
}
