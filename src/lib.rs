//! TDOA3 tag
//!
//! Listens to the range packets broadcast by TDOA3 anchors, keeps a bounded
//! context per anchor and turns pairs of anchors into distance-difference
//! measurements for a position estimator.

pub mod core;
pub mod algorithms;
pub mod processing;
pub mod utils;
pub mod hardware;
pub mod api;

// Re-export commonly used types
pub use self::core::{AnchorId, EstimatorInput, HeightMeasurement, RxQuality, TdoaMeasurement};
pub use algorithms::{ClockCorrection, MatchingAlgorithm, TdoaEngine};
pub use processing::{decode, AnchorContext, AnchorRegistry, CodecError, CodecResult, DecodedPayload, RangePacket};
pub use hardware::{AnchorSimulator, CommError, CommResult, MockRadio, RadioInterface, RxFrame, SimulatorConfig};
pub use api::{EstimatorQueue, LppShortPacket, LppSource, MeasurementSink, RadioEvent, Tdoa3Tag};
pub use utils::{ConfigError, ConfigurationManager, TagConfig, TdoaStats};
