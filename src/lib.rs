pub mod error;
pub mod simulation;
pub mod time_driver;
pub mod wifi;
