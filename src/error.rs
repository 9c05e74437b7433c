//! Error types for setup-time failures.
//!
//! Everything here is raised before the first event fires. Once a simulation is
//! running, lost frames and missed responses are ordinary outcomes reported
//! through listeners, never errors.

use thiserror::Error;

/// Invalid PHY/MAC/rate-control configuration.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("unknown 802.11 standard: {0}")]
    UnknownStandard(String),

    #[error("unknown wifi mode: {0}")]
    UnknownMode(String),

    #[error("mode {mode} does not belong to standard {standard}")]
    ModeNotInStandard { mode: String, standard: String },

    #[error("invalid tx power range: start {start_dbm} dBm, end {end_dbm} dBm, {levels} levels")]
    InvalidTxPowerRange { start_dbm: f64, end_dbm: f64, levels: u8 },

    #[error("tx power level {level} out of range (device has {levels} levels)")]
    TxPowerLevelOutOfRange { level: u8, levels: u8 },

    #[error("empty mode set")]
    EmptyModeSet,

    #[error("threshold {name} out of range: {value}")]
    ThresholdOutOfRange { name: &'static str, value: u32 },
}

/// Failure to turn a scene file into a runnable network.
#[derive(Error, Debug)]
pub enum SceneLoadError {
    #[error("failed to read scene file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON scene: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid TOML scene: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("unsupported scene file extension: {0}")]
    UnsupportedFormat(String),

    #[error("invalid scene configuration: {0}")]
    Validation(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
