//! OFDM transmission modes and PLCP timing.
//!
//! The catalog is a closed enum backed by a fixed table: every mode carries its
//! channel width, data rate, coded rate, constellation and the parameters of the
//! convolutional code the error model needs. Modes compare by value and are
//! looked up by name only when configuration is parsed.

use crate::error::ConfigError;
use embassy_time::Duration;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// OFDM channel width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelWidth {
    Mhz20,
    Mhz10,
    Mhz5,
}

impl ChannelWidth {
    /// Channel bandwidth in Hz.
    pub const fn hz(self) -> u32 {
        match self {
            ChannelWidth::Mhz20 => 20_000_000,
            ChannelWidth::Mhz10 => 10_000_000,
            ChannelWidth::Mhz5 => 5_000_000,
        }
    }

    /// PLCP preamble (short + long training) duration.
    pub const fn preamble_duration(self) -> Duration {
        match self {
            ChannelWidth::Mhz20 => Duration::from_micros(16),
            ChannelWidth::Mhz10 => Duration::from_micros(32),
            ChannelWidth::Mhz5 => Duration::from_micros(64),
        }
    }

    /// PLCP header (SIGNAL field) duration, one OFDM symbol.
    pub const fn header_duration(self) -> Duration {
        self.symbol_duration()
    }

    pub const fn symbol_duration(self) -> Duration {
        match self {
            ChannelWidth::Mhz20 => Duration::from_micros(4),
            ChannelWidth::Mhz10 => Duration::from_micros(8),
            ChannelWidth::Mhz5 => Duration::from_micros(16),
        }
    }

    /// The mode the PLCP header is sent in.
    pub const fn header_mode(self) -> WifiMode {
        match self {
            ChannelWidth::Mhz20 => WifiMode::OfdmRate6Mbps,
            ChannelWidth::Mhz10 => WifiMode::OfdmRate3MbpsBw10Mhz,
            ChannelWidth::Mhz5 => WifiMode::OfdmRate1_5MbpsBw5Mhz,
        }
    }
}

/// Preamble type. OFDM has a single preamble format, the distinction is kept
/// so frames remember what they were sent with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WifiPreamble {
    #[default]
    Long,
    Short,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modulation {
    Bpsk,
    /// Square M-QAM with the given constellation size.
    Qam(u32),
}

/// Union-bound parameters of the punctured convolutional code.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CodeParameters {
    /// Free distance d.
    pub free_distance: u32,
    /// Number of error paths at distance d.
    pub a_d: f64,
    /// Number of error paths at distance d + 1 (only used for QAM).
    pub a_d1: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct ModeInfo {
    pub name: &'static str,
    pub width: ChannelWidth,
    /// Information rate in bit/s.
    pub data_rate: u64,
    /// Coded rate in bit/s.
    pub phy_rate: u64,
    pub modulation: Modulation,
    pub code: CodeParameters,
    /// Part of the basic rate set every station must support.
    pub mandatory: bool,
}

/// Every supported OFDM mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WifiMode {
    OfdmRate6Mbps,
    OfdmRate9Mbps,
    OfdmRate12Mbps,
    OfdmRate18Mbps,
    OfdmRate24Mbps,
    OfdmRate36Mbps,
    OfdmRate48Mbps,
    OfdmRate54Mbps,
    OfdmRate3MbpsBw10Mhz,
    OfdmRate4_5MbpsBw10Mhz,
    OfdmRate6MbpsBw10Mhz,
    OfdmRate9MbpsBw10Mhz,
    OfdmRate12MbpsBw10Mhz,
    OfdmRate18MbpsBw10Mhz,
    OfdmRate24MbpsBw10Mhz,
    OfdmRate27MbpsBw10Mhz,
    OfdmRate1_5MbpsBw5Mhz,
    OfdmRate2_25MbpsBw5Mhz,
    OfdmRate3MbpsBw5Mhz,
    OfdmRate4_5MbpsBw5Mhz,
    OfdmRate6MbpsBw5Mhz,
    OfdmRate9MbpsBw5Mhz,
    OfdmRate12MbpsBw5Mhz,
    OfdmRate13_5MbpsBw5Mhz,
}

const fn code(free_distance: u32, a_d: f64, a_d1: f64) -> CodeParameters {
    CodeParameters { free_distance, a_d, a_d1 }
}

// Per-rate-step constellation and code, identical for all channel widths.
const STEPS: [(Modulation, CodeParameters, bool); 8] = [
    (Modulation::Bpsk, code(10, 11.0, 0.0), true),
    (Modulation::Bpsk, code(5, 8.0, 0.0), false),
    (Modulation::Qam(4), code(10, 11.0, 0.0), true),
    (Modulation::Qam(4), code(5, 8.0, 31.0), false),
    (Modulation::Qam(16), code(10, 11.0, 0.0), true),
    (Modulation::Qam(16), code(5, 8.0, 31.0), false),
    (Modulation::Qam(64), code(6, 1.0, 16.0), false),
    (Modulation::Qam(64), code(5, 8.0, 31.0), false),
];

// Data and coded rates at 20 MHz in kbit/s; narrower channels divide both.
const RATES_20MHZ: [(u64, u64); 8] = [
    (6_000, 12_000),
    (9_000, 12_000),
    (12_000, 24_000),
    (18_000, 24_000),
    (24_000, 48_000),
    (36_000, 48_000),
    (48_000, 72_000),
    (54_000, 72_000),
];

const fn info(name: &'static str, width: ChannelWidth, step: usize) -> ModeInfo {
    let divisor = match width {
        ChannelWidth::Mhz20 => 1,
        ChannelWidth::Mhz10 => 2,
        ChannelWidth::Mhz5 => 4,
    };
    let (modulation, code, mandatory) = STEPS[step];
    ModeInfo {
        name,
        width,
        data_rate: RATES_20MHZ[step].0 * 1000 / divisor,
        phy_rate: RATES_20MHZ[step].1 * 1000 / divisor,
        modulation,
        code,
        mandatory,
    }
}

static MODE_TABLE: [ModeInfo; 24] = [
    info("OfdmRate6Mbps", ChannelWidth::Mhz20, 0),
    info("OfdmRate9Mbps", ChannelWidth::Mhz20, 1),
    info("OfdmRate12Mbps", ChannelWidth::Mhz20, 2),
    info("OfdmRate18Mbps", ChannelWidth::Mhz20, 3),
    info("OfdmRate24Mbps", ChannelWidth::Mhz20, 4),
    info("OfdmRate36Mbps", ChannelWidth::Mhz20, 5),
    info("OfdmRate48Mbps", ChannelWidth::Mhz20, 6),
    info("OfdmRate54Mbps", ChannelWidth::Mhz20, 7),
    info("OfdmRate3MbpsBW10MHz", ChannelWidth::Mhz10, 0),
    info("OfdmRate4_5MbpsBW10MHz", ChannelWidth::Mhz10, 1),
    info("OfdmRate6MbpsBW10MHz", ChannelWidth::Mhz10, 2),
    info("OfdmRate9MbpsBW10MHz", ChannelWidth::Mhz10, 3),
    info("OfdmRate12MbpsBW10MHz", ChannelWidth::Mhz10, 4),
    info("OfdmRate18MbpsBW10MHz", ChannelWidth::Mhz10, 5),
    info("OfdmRate24MbpsBW10MHz", ChannelWidth::Mhz10, 6),
    info("OfdmRate27MbpsBW10MHz", ChannelWidth::Mhz10, 7),
    info("OfdmRate1_5MbpsBW5MHz", ChannelWidth::Mhz5, 0),
    info("OfdmRate2_25MbpsBW5MHz", ChannelWidth::Mhz5, 1),
    info("OfdmRate3MbpsBW5MHz", ChannelWidth::Mhz5, 2),
    info("OfdmRate4_5MbpsBW5MHz", ChannelWidth::Mhz5, 3),
    info("OfdmRate6MbpsBW5MHz", ChannelWidth::Mhz5, 4),
    info("OfdmRate9MbpsBW5MHz", ChannelWidth::Mhz5, 5),
    info("OfdmRate12MbpsBW5MHz", ChannelWidth::Mhz5, 6),
    info("OfdmRate13_5MbpsBW5MHz", ChannelWidth::Mhz5, 7),
];

impl WifiMode {
    pub const ALL: [WifiMode; 24] = [
        WifiMode::OfdmRate6Mbps,
        WifiMode::OfdmRate9Mbps,
        WifiMode::OfdmRate12Mbps,
        WifiMode::OfdmRate18Mbps,
        WifiMode::OfdmRate24Mbps,
        WifiMode::OfdmRate36Mbps,
        WifiMode::OfdmRate48Mbps,
        WifiMode::OfdmRate54Mbps,
        WifiMode::OfdmRate3MbpsBw10Mhz,
        WifiMode::OfdmRate4_5MbpsBw10Mhz,
        WifiMode::OfdmRate6MbpsBw10Mhz,
        WifiMode::OfdmRate9MbpsBw10Mhz,
        WifiMode::OfdmRate12MbpsBw10Mhz,
        WifiMode::OfdmRate18MbpsBw10Mhz,
        WifiMode::OfdmRate24MbpsBw10Mhz,
        WifiMode::OfdmRate27MbpsBw10Mhz,
        WifiMode::OfdmRate1_5MbpsBw5Mhz,
        WifiMode::OfdmRate2_25MbpsBw5Mhz,
        WifiMode::OfdmRate3MbpsBw5Mhz,
        WifiMode::OfdmRate4_5MbpsBw5Mhz,
        WifiMode::OfdmRate6MbpsBw5Mhz,
        WifiMode::OfdmRate9MbpsBw5Mhz,
        WifiMode::OfdmRate12MbpsBw5Mhz,
        WifiMode::OfdmRate13_5MbpsBw5Mhz,
    ];

    pub fn info(self) -> &'static ModeInfo {
        &MODE_TABLE[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.info().name
    }

    pub fn width(self) -> ChannelWidth {
        self.info().width
    }

    pub fn bandwidth_hz(self) -> u32 {
        self.info().width.hz()
    }

    pub fn data_rate(self) -> u64 {
        self.info().data_rate
    }

    pub fn phy_rate(self) -> u64 {
        self.info().phy_rate
    }

    pub fn is_mandatory(self) -> bool {
        self.info().mandatory
    }

    /// Data bits carried per OFDM symbol.
    pub fn data_bits_per_symbol(self) -> u64 {
        self.data_rate() * self.width().symbol_duration().as_micros() / 1_000_000
    }
}

impl fmt::Display for WifiMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for WifiMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WifiMode::ALL
            .iter()
            .copied()
            .find(|mode| mode.name() == s)
            .ok_or_else(|| ConfigError::UnknownMode(s.to_string()))
    }
}

/// Duration of the PLCP preamble plus header for a frame sent in `mode`.
pub fn plcp_duration(mode: WifiMode, _preamble: WifiPreamble) -> Duration {
    let width = mode.width();
    width.preamble_duration() + width.header_duration()
}

/// Duration of the payload (SERVICE + PSDU + tail bits, padded to whole symbols).
pub fn payload_duration(size: u32, mode: WifiMode) -> Duration {
    let bits = 16 + 8 * size as u64 + 6;
    let symbols = bits.div_ceil(mode.data_bits_per_symbol());
    let symbol_us = mode.width().symbol_duration().as_micros();
    Duration::from_micros(symbols * symbol_us)
}

/// Total on-air time of a `size`-byte PSDU.
pub fn tx_duration(size: u32, mode: WifiMode, preamble: WifiPreamble) -> Duration {
    plcp_duration(mode, preamble) + payload_duration(size, mode)
}

/// Supported 802.11 OFDM variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
pub enum Standard {
    #[default]
    #[serde(rename = "80211a")]
    Ieee80211a,
    /// Research profile using a subset of the 802.11a rates.
    #[serde(rename = "holland")]
    Holland,
    #[serde(rename = "80211_10Mhz")]
    Ofdm10Mhz,
    #[serde(rename = "80211_5Mhz")]
    Ofdm5Mhz,
}

impl Standard {
    pub fn width(self) -> ChannelWidth {
        match self {
            Standard::Ieee80211a | Standard::Holland => ChannelWidth::Mhz20,
            Standard::Ofdm10Mhz => ChannelWidth::Mhz10,
            Standard::Ofdm5Mhz => ChannelWidth::Mhz5,
        }
    }

    /// Modes the PHY supports, ordered from slowest to fastest.
    pub fn modes(self) -> Vec<WifiMode> {
        use WifiMode::*;
        match self {
            Standard::Holland => vec![OfdmRate6Mbps, OfdmRate12Mbps, OfdmRate18Mbps, OfdmRate36Mbps, OfdmRate54Mbps],
            _ => {
                let width = self.width();
                WifiMode::ALL.iter().copied().filter(|m| m.width() == width).collect()
            }
        }
    }

    /// The basic (mandatory) rate set.
    pub fn basic_modes(self) -> Vec<WifiMode> {
        self.modes().into_iter().filter(|m| m.is_mandatory()).collect()
    }

    pub fn lowest_mode(self) -> WifiMode {
        self.width().header_mode()
    }

    pub fn name(self) -> &'static str {
        match self {
            Standard::Ieee80211a => "80211a",
            Standard::Holland => "holland",
            Standard::Ofdm10Mhz => "80211_10Mhz",
            Standard::Ofdm5Mhz => "80211_5Mhz",
        }
    }
}

impl FromStr for Standard {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [Standard::Ieee80211a, Standard::Holland, Standard::Ofdm10Mhz, Standard::Ofdm5Mhz]
            .into_iter()
            .find(|standard| standard.name() == s)
            .ok_or_else(|| ConfigError::UnknownStandard(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_order_matches_enum() {
        for (index, mode) in WifiMode::ALL.iter().enumerate() {
            assert_eq!(*mode as usize, index);
            assert_eq!(mode.name().parse::<WifiMode>().unwrap(), *mode);
        }
    }

    #[test]
    fn narrow_channels_scale_rates() {
        assert_eq!(WifiMode::OfdmRate54Mbps.data_rate(), 54_000_000);
        assert_eq!(WifiMode::OfdmRate27MbpsBw10Mhz.data_rate(), 27_000_000);
        assert_eq!(WifiMode::OfdmRate13_5MbpsBw5Mhz.data_rate(), 13_500_000);
        assert_eq!(WifiMode::OfdmRate2_25MbpsBw5Mhz.phy_rate(), 3_000_000);
        // 24 data bits per symbol at the lowest rate for every width.
        for width in [ChannelWidth::Mhz20, ChannelWidth::Mhz10, ChannelWidth::Mhz5] {
            assert_eq!(width.header_mode().data_bits_per_symbol(), 24);
        }
    }

    #[test]
    fn tx_duration_matches_ofdm_formula() {
        // ACK (14 bytes) at 6 Mbps: 16 + 4 + ceil(134 / 24) * 4 = 44 us.
        assert_eq!(tx_duration(14, WifiMode::OfdmRate6Mbps, WifiPreamble::Long), Duration::from_micros(44));
        // RTS (20 bytes) at 6 Mbps: 16 + 4 + ceil(182 / 24) * 4 = 52 us.
        assert_eq!(tx_duration(20, WifiMode::OfdmRate6Mbps, WifiPreamble::Long), Duration::from_micros(52));
        // 1500 bytes at 54 Mbps: 16 + 4 + ceil(12022 / 216) * 4 = 244 us.
        assert_eq!(tx_duration(1500, WifiMode::OfdmRate54Mbps, WifiPreamble::Long), Duration::from_micros(244));
        // The 10 MHz variant doubles every component.
        assert_eq!(tx_duration(14, WifiMode::OfdmRate3MbpsBw10Mhz, WifiPreamble::Long), Duration::from_micros(88));
    }

    #[test]
    fn standards_expose_expected_rate_sets() {
        assert_eq!(Standard::Ieee80211a.modes().len(), 8);
        assert_eq!(Standard::Holland.modes().len(), 5);
        assert_eq!(
            Standard::Ieee80211a.basic_modes(),
            vec![WifiMode::OfdmRate6Mbps, WifiMode::OfdmRate12Mbps, WifiMode::OfdmRate24Mbps]
        );
        assert_eq!(Standard::Ofdm5Mhz.lowest_mode(), WifiMode::OfdmRate1_5MbpsBw5Mhz);
        assert!(matches!("80211n".parse::<Standard>(), Err(ConfigError::UnknownStandard(_))));
        assert!(matches!("OfdmRate7Mbps".parse::<WifiMode>(), Err(ConfigError::UnknownMode(_))));
    }
}
