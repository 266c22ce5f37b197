//! Hands measurements over to the state estimator

use crate::api::types::MeasurementSink;
use crate::core::constants::HEIGHT_MEASUREMENT_STD;
use crate::core::types::{EstimatorInput, HeightMeasurement, TdoaMeasurement};
use crate::utils::stats::TdoaStats;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::warn;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Bounded estimator queue that drops instead of blocking when full.
///
/// Clones feed the same channel and share one drop counter.
#[derive(Debug, Clone)]
pub struct EstimatorQueue {
    sender: Sender<EstimatorInput>,
    dropped: Arc<AtomicU32>,
}

impl EstimatorQueue {
    /// Queue of `capacity` items and the estimator's end of it
    pub fn bounded(capacity: usize) -> (Self, Receiver<EstimatorInput>) {
        let (sender, receiver) = bounded(capacity);
        (
            Self {
                sender,
                dropped: Arc::new(AtomicU32::new(0)),
            },
            receiver,
        )
    }

    /// Items dropped because the queue was full or closed
    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl MeasurementSink for EstimatorQueue {
    fn send(&mut self, input: EstimatorInput) -> bool {
        match self.sender.try_send(input) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Estimator queue full, measurement dropped");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }
}

/// Forwards measurements, adding a fixed height when positioning in 2D
#[derive(Debug, Clone, Copy, Default)]
pub struct MeasurementEmitter {
    two_d_height: Option<f32>,
}

impl MeasurementEmitter {
    pub fn new(two_d_height: Option<f32>) -> Self {
        Self { two_d_height }
    }

    pub fn two_d_height(&self) -> Option<f32> {
        self.two_d_height
    }

    pub fn emit<S: MeasurementSink + ?Sized>(
        &self,
        sink: &mut S,
        measurement: TdoaMeasurement,
        now_ms: u64,
        stats: &mut TdoaStats,
    ) {
        let sent = measurement.clone();
        if sink.send(EstimatorInput::Tdoa(measurement)) {
            stats.measurement_sent(&sent);
        } else {
            stats.measurement_dropped();
        }

        if let Some(height) = self.two_d_height {
            let height = HeightMeasurement {
                timestamp_ms: now_ms,
                height,
                std_dev: HEIGHT_MEASUREMENT_STD,
            };
            if !sink.send(EstimatorInput::AbsoluteHeight(height)) {
                stats.measurement_dropped();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    fn measurement(ids: [u8; 2]) -> TdoaMeasurement {
        TdoaMeasurement {
            anchor_ids: ids,
            anchor_positions: [Vector3::new(0.0, 0.0, 0.0), Vector3::new(1.0, 0.0, 0.0)],
            distance_diff: 0.5,
            std_dev: 0.15,
        }
    }

    #[test]
    fn test_emit_tdoa_only() {
        let mut sink: Vec<EstimatorInput> = Vec::new();
        let mut stats = TdoaStats::default();
        MeasurementEmitter::new(None).emit(&mut sink, measurement([1, 2]), 10, &mut stats);

        assert_eq!(sink, vec![EstimatorInput::Tdoa(measurement([1, 2]))]);
        assert_eq!(stats.packets_to_estimator().count(), 1);
        assert_eq!(stats.tracked_tdoa(), 0.5);
    }

    #[test]
    fn test_emit_with_height() {
        let mut sink: Vec<EstimatorInput> = Vec::new();
        let mut stats = TdoaStats::default();
        MeasurementEmitter::new(Some(0.8)).emit(&mut sink, measurement([3, 4]), 1234, &mut stats);

        assert_eq!(sink.len(), 2);
        match &sink[1] {
            EstimatorInput::AbsoluteHeight(height) => {
                assert_eq!(height.height, 0.8);
                assert_eq!(height.timestamp_ms, 1234);
                assert_eq!(height.std_dev, HEIGHT_MEASUREMENT_STD);
            }
            other => panic!("Expected height, got {:?}", other),
        }
    }

    #[test]
    fn test_full_queue_drops_without_blocking() {
        let (mut queue, receiver) = EstimatorQueue::bounded(1);
        let mut stats = TdoaStats::default();
        let emitter = MeasurementEmitter::new(None);

        emitter.emit(&mut queue, measurement([1, 2]), 0, &mut stats);
        emitter.emit(&mut queue, measurement([2, 3]), 0, &mut stats);

        assert_eq!(queue.dropped(), 1);
        assert_eq!(stats.measurements_dropped(), 1);
        assert_eq!(receiver.len(), 1);
        assert_eq!(receiver.try_recv().unwrap(), EstimatorInput::Tdoa(measurement([1, 2])));
    }

    #[test]
    fn test_clones_share_drop_count() {
        let (mut queue, _receiver) = EstimatorQueue::bounded(1);
        let mut other = queue.clone();

        assert!(queue.send(EstimatorInput::Tdoa(measurement([1, 2]))));
        assert!(!other.send(EstimatorInput::Tdoa(measurement([2, 3]))));
        assert!(!queue.send(EstimatorInput::Tdoa(measurement([3, 4]))));

        assert_eq!(queue.dropped(), 2);
        assert_eq!(other.dropped(), 2);
    }
}
