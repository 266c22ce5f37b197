//! Configuration and ranging statistics

pub mod config;
pub mod stats;

pub use config::{ConfigError, ConfigResult, ConfigurationManager, TagConfig};
pub use stats::{RateCounter, TdoaStats};
