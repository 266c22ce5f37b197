//! Clock correction and anchor pairing

pub mod clock_correction;
pub mod tdoa_engine;

pub use clock_correction::ClockCorrection;
pub use tdoa_engine::{MatchingAlgorithm, TdoaEngine};
