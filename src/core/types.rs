//! Core data types for the TDOA3 tag

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Anchor identifier as carried on air.
///
/// Ids are not globally unique: two anchors far enough apart may share one.
/// Anything stored under an id is only meaningful while the anchor is being
/// heard, see [`crate::processing::registry::AnchorRegistry`].
pub type AnchorId = u8;

/// Signal quality readings captured by the radio for one received frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RxQuality {
    /// First path power (dBm)
    pub first_path_power: f32,
    /// Total received power (dBm)
    pub receive_power: f32,
    /// First path amplitude over CIR noise standard deviation
    pub snr: f32,
}

impl RxQuality {
    /// Received power minus first path power; large values hint at NLOS
    pub fn power_diff(&self) -> f32 {
        self.receive_power - self.first_path_power
    }
}

/// Distance-difference observation between two anchors.
///
/// `distance_diff` is the tag's distance to `anchor_ids[1]` minus its
/// distance to `anchor_ids[0]`, in metres.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TdoaMeasurement {
    pub anchor_ids: [AnchorId; 2],
    pub anchor_positions: [Vector3<f32>; 2],
    pub distance_diff: f32,
    pub std_dev: f32,
}

/// Absolute height fed to the estimator when positioning in 2D
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeightMeasurement {
    pub timestamp_ms: u64,
    pub height: f32,
    pub std_dev: f32,
}

/// Everything the tag hands over to the state estimator
#[derive(Debug, Clone, PartialEq)]
pub enum EstimatorInput {
    Tdoa(TdoaMeasurement),
    AbsoluteHeight(HeightMeasurement),
}
