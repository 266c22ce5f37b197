//! Radio abstraction and test doubles
//!
//! The tag talks to its UWB radio through [`RadioInterface`]. A scripted
//! [`MockRadio`] and an [`AnchorSimulator`] producing physically consistent
//! anchor traffic are provided for tests and the demo binary.

pub mod error;
pub mod mock;
pub mod simulator;
pub mod transceiver;

pub use error::{CommError, CommResult};
pub use mock::MockRadio;
pub use simulator::{AnchorSimulator, SimulatorConfig};
pub use transceiver::RadioInterface;

use crate::core::types::RxQuality;

/// Raw frame received by the radio
#[derive(Debug, Clone, PartialEq)]
pub struct RxFrame {
    /// MAC frame, header included
    pub data: Vec<u8>,
    /// 40-bit radio clock at arrival
    pub rx_timestamp: u64,
    pub quality: RxQuality,
}

impl RxFrame {
    pub fn new(data: Vec<u8>, rx_timestamp: u64) -> Self {
        Self {
            data,
            rx_timestamp,
            quality: RxQuality::default(),
        }
    }

    pub fn with_quality(mut self, quality: RxQuality) -> Self {
        self.quality = quality;
        self
    }
}
