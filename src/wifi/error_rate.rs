//! Analytical error-rate model for coded OFDM modes.
//!
//! Uncoded bit error rates come from the Gaussian Q-function, the convolutional
//! code is accounted for with the union bound over its first error-path terms.
//! Everything here is a pure function of its arguments.

use super::mode::{Modulation, WifiMode};
use libm::erfc;

/// Uncoded BPSK bit error rate.
///
/// `signal_spread` is the channel bandwidth in Hz and `phy_rate` the coded rate
/// in bit/s; their ratio turns SNR into Eb/No.
pub fn bpsk_ber(snr: f64, signal_spread: f64, phy_rate: f64) -> f64 {
    let eb_no = snr * signal_spread / phy_rate;
    0.5 * erfc(eb_no.sqrt())
}

/// Uncoded square M-QAM bit error rate (Gray mapping approximation).
pub fn qam_ber(snr: f64, m: u32, signal_spread: f64, phy_rate: f64) -> f64 {
    let m = m as f64;
    let bits_per_symbol = m.log2();
    let eb_no = snr * signal_spread / phy_rate;
    let z = ((1.5 * bits_per_symbol * eb_no) / (m - 1.0)).sqrt();
    let z1 = (1.0 - 1.0 / m.sqrt()) * erfc(z);
    let z2 = 1.0 - (1.0 - z1) * (1.0 - z1);
    z2 / bits_per_symbol
}

fn binomial(n: u32, k: u32) -> f64 {
    let k = k.min(n - k);
    (0..k).fold(1.0, |acc, i| acc * (n - i) as f64 / (i + 1) as f64)
}

fn path_term(ber: f64, d: u32, i: u32) -> f64 {
    binomial(d, i) * ber.powi(i as i32) * (1.0 - ber).powi((d - i) as i32)
}

/// Probability that a wrong path at Hamming distance `d` is chosen by the
/// Viterbi decoder, given the raw bit error rate.
pub fn pairwise_error_probability(ber: f64, d: u32) -> f64 {
    if d % 2 == 1 {
        ((d + 1) / 2..=d).map(|i| path_term(ber, d, i)).sum()
    } else {
        let half = d / 2;
        0.5 * path_term(ber, d, half) + (half + 1..=d).map(|i| path_term(ber, d, i)).sum::<f64>()
    }
}

/// Probability that `nbits` consecutive bits sent in `mode` at constant `snr`
/// (linear ratio) are all decoded correctly.
pub fn chunk_success_rate(mode: WifiMode, snr: f64, nbits: u64) -> f64 {
    let info = mode.info();
    let signal_spread = mode.bandwidth_hz() as f64;
    let phy_rate = info.phy_rate as f64;
    let code = info.code;

    let (ber, extra_term) = match info.modulation {
        Modulation::Bpsk => (bpsk_ber(snr, signal_spread, phy_rate), false),
        Modulation::Qam(m) => (qam_ber(snr, m, signal_spread, phy_rate), true),
    };
    if ber == 0.0 {
        return 1.0;
    }

    let mut pmu = code.a_d * pairwise_error_probability(ber, code.free_distance);
    if extra_term {
        pmu += code.a_d1 * pairwise_error_probability(ber, code.free_distance + 1);
    }
    let pmu = pmu.min(1.0);
    (1.0 - pmu).powf(nbits as f64)
}

/// Smallest SNR at which a single bit sent in `mode` fails with probability at most `ber`.
pub fn calculate_snr_for_ber(mode: WifiMode, ber: f64) -> f64 {
    let mut low = 1e-25;
    let mut high = 1e25;
    let precision = 1e-12;
    while (high - low) / low > precision {
        let middle = low + (high - low) / 2.0;
        if 1.0 - chunk_success_rate(mode, middle, 1) > ber {
            low = middle;
        } else {
            high = middle;
        }
    }
    low
}
