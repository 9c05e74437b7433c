//! Radio signal calculations.
//!
//! Contains helpers for:
//! - Log-distance path loss with optional log-normal shadowing
//! - Friis free-space path loss
//! - Power unit conversions between dBm, mW, W and dB ratios
//!
//! Units:
//! - Power: dBm, mW or W as named by each function
//! - Distance: meters

use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::Deserialize;

/// Speed of light in vacuum, m/s.
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// Parameters of the log-distance path loss model with log-normal shadowing.
///
/// They determine how fast the signal decays over distance and how much random
/// variation (shadowing) is applied on top of the deterministic loss.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PathLossParameters {
    /// Path loss exponent (n).
    ///
    /// - n = 2.0: Free space
    /// - n = 2.7 to 3.5: Urban areas
    /// - n = 3.0 to 5.0: Indoor obstructed environments
    pub path_loss_exponent: f64,

    /// Standard deviation of the log-normal shadowing (σ) in dB. 0 disables shadowing.
    pub shadowing_sigma: f64,

    /// Path loss at the reference distance in dB.
    pub reference_loss: f64,

    /// Reference distance d₀ in meters.
    pub reference_distance: f64,
}

impl Default for PathLossParameters {
    fn default() -> Self {
        // Free-space loss at 1 m for 5.15 GHz with exponent 3.
        Self {
            path_loss_exponent: 3.0,
            shadowing_sigma: 0.0,
            reference_loss: 46.6777,
            reference_distance: 1.0,
        }
    }
}

/// Path loss (in dB) at `distance` using the log-distance model with
/// log-normal shadowing.
///
/// # Formula
///
/// ```text
/// PL(d) = PL(d₀) + 10 × n × log₁₀(d/d₀) + X_σ
/// ```
///
/// # Parameters
///
/// - `distance`: Distance between transmitter and receiver in meters
/// - `params`: Exponent, shadowing sigma and reference loss/distance
/// - `rng`: Source of the shadowing sample
///
/// # Returns
///
/// Path loss in dB. Stochastic when `shadowing_sigma > 0`: every call draws a
/// new shadowing value.
///
/// # Notes
///
/// Distances below the reference distance return the reference loss.
pub fn calculate_path_loss<R: Rng + ?Sized>(distance: f64, params: &PathLossParameters, rng: &mut R) -> f64 {
    if distance <= params.reference_distance {
        return params.reference_loss;
    }
    let path_loss = params.reference_loss + 10.0 * params.path_loss_exponent * (distance / params.reference_distance).log10();
    let shadowing = match Normal::new(0.0, params.shadowing_sigma) {
        Ok(normal) if params.shadowing_sigma > 0.0 => normal.sample(rng),
        _ => 0.0,
    };
    path_loss + shadowing
}

/// Friis free-space loss in dB, with `system_loss` as a linear factor (1 = none).
///
/// ```text
/// PL = -10 × log₁₀(λ² / ((4π)² × d² × L))
/// ```
///
/// Distances of zero yield no loss.
pub fn calculate_friis_loss(distance: f64, frequency_hz: f64, system_loss: f64) -> f64 {
    if distance <= 0.0 {
        return 0.0;
    }
    let lambda = SPEED_OF_LIGHT / frequency_hz;
    let denominator = 16.0 * std::f64::consts::PI * std::f64::consts::PI * distance * distance * system_loss;
    -10.0 * (lambda * lambda / denominator).log10()
}

/// Received power (dBm) given the transmit power and a path loss.
pub fn calculate_rssi(tx_power_dbm: f64, path_loss_db: f64) -> f64 {
    tx_power_dbm - path_loss_db
}

/// Convert dBm to milliwatts.
///
/// ```text
/// 0 dBm   → 1 mW
/// 10 dBm  → 10 mW
/// -10 dBm → 0.1 mW
/// ```
pub fn dbm_to_mw(dbm: f64) -> f64 {
    10f64.powf(dbm / 10.0)
}

/// Convert milliwatts to dBm. Inverse of [`dbm_to_mw`]; `mw` must be positive.
pub fn mw_to_dbm(mw: f64) -> f64 {
    10.0 * mw.log10()
}

pub fn dbm_to_w(dbm: f64) -> f64 {
    dbm_to_mw(dbm) / 1000.0
}

pub fn w_to_dbm(w: f64) -> f64 {
    mw_to_dbm(w * 1000.0)
}

pub fn db_to_ratio(db: f64) -> f64 {
    10f64.powf(db / 10.0)
}

pub fn ratio_to_db(ratio: f64) -> f64 {
    10.0 * ratio.log10()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn default_pathloss() -> PathLossParameters {
        PathLossParameters {
            path_loss_exponent: 2.0,
            shadowing_sigma: 0.0,
            reference_loss: 40.0,
            reference_distance: 1.0,
        }
    }

    #[test]
    fn log_distance_loss_grows_with_distance() {
        let mut rng = StdRng::seed_from_u64(3);
        let params = default_pathloss();
        assert_eq!(calculate_path_loss(0.5, &params, &mut rng), 40.0);
        assert!((calculate_path_loss(10.0, &params, &mut rng) - 60.0).abs() < 1e-9);
        assert!((calculate_path_loss(100.0, &params, &mut rng) - 80.0).abs() < 1e-9);
    }

    #[test]
    fn shadowing_is_reproducible_with_a_seed() {
        let params = PathLossParameters {
            shadowing_sigma: 4.0,
            ..default_pathloss()
        };
        let mut a = StdRng::seed_from_u64(11);
        let mut b = StdRng::seed_from_u64(11);
        let first = calculate_path_loss(50.0, &params, &mut a);
        assert_eq!(first, calculate_path_loss(50.0, &params, &mut b));
        assert!((first - 40.0 - 20.0 * 50f64.log10()).abs() < 40.0);
    }

    #[test]
    fn friis_matches_reference_loss_at_one_meter() {
        // The default log-distance reference loss is the Friis loss at 5.15 GHz, 1 m.
        let loss = calculate_friis_loss(1.0, 5.15e9, 1.0);
        assert!((loss - PathLossParameters::default().reference_loss).abs() < 0.01);
        // Doubling the distance adds about 6 dB in free space.
        assert!((calculate_friis_loss(2.0, 5.15e9, 1.0) - loss - 6.0206).abs() < 1e-3);
    }

    #[test]
    fn power_conversions_are_consistent() {
        for v in [-100.0, -50.0, 0.0, 10.0] {
            assert!((v - mw_to_dbm(dbm_to_mw(v))).abs() < 1e-9);
            assert!((v - w_to_dbm(dbm_to_w(v))).abs() < 1e-9);
        }
        assert!((dbm_to_w(30.0) - 1.0).abs() < 1e-12);
        assert!((db_to_ratio(7.0) - 5.0119).abs() < 1e-3);
        assert!((ratio_to_db(100.0) - 20.0).abs() < 1e-12);
    }
}
