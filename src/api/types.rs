//! Collaborator interfaces of the tag

use crate::core::constants::LPP_SHORT_MAX_DATA;
use crate::core::types::{AnchorId, EstimatorInput};
use crate::processing::parser::{CodecError, CodecResult};
use crossbeam_channel::{Receiver, Sender};
use heapless::Vec as BoundedVec;

/// Consumer of measurements, typically the state estimator's input queue.
///
/// Implementations must not block; returns false if the item was dropped.
pub trait MeasurementSink {
    fn send(&mut self, input: EstimatorInput) -> bool;
}

/// Provider of outgoing control packets, polled after every radio event
pub trait LppSource {
    fn next_packet(&mut self) -> Option<LppShortPacket>;
}

/// Control packet queued for transmission to one anchor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LppShortPacket {
    /// Short address of the destination anchor
    pub dest: AnchorId,
    pub data: BoundedVec<u8, LPP_SHORT_MAX_DATA>,
}

impl LppShortPacket {
    pub fn new(dest: AnchorId, data: &[u8]) -> CodecResult<Self> {
        let data = BoundedVec::from_slice(data).map_err(|_| CodecError::PayloadTooLarge {
            size: data.len(),
            max: LPP_SHORT_MAX_DATA,
        })?;
        Ok(Self { dest, data })
    }
}

impl MeasurementSink for Sender<EstimatorInput> {
    fn send(&mut self, input: EstimatorInput) -> bool {
        self.try_send(input).is_ok()
    }
}

/// Collects everything, for tests and offline processing
impl MeasurementSink for Vec<EstimatorInput> {
    fn send(&mut self, input: EstimatorInput) -> bool {
        self.push(input);
        true
    }
}

impl LppSource for Receiver<LppShortPacket> {
    fn next_packet(&mut self) -> Option<LppShortPacket> {
        self.try_recv().ok()
    }
}

/// Source that never has anything to send
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLpp;

impl LppSource for NoLpp {
    fn next_packet(&mut self) -> Option<LppShortPacket> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lpp_packet_capacity() {
        let packet = LppShortPacket::new(3, &[1, 2, 3]).unwrap();
        assert_eq!(packet.dest, 3);
        assert_eq!(&packet.data[..], &[1, 2, 3]);

        let result = LppShortPacket::new(3, &[0u8; LPP_SHORT_MAX_DATA + 1]);
        assert_eq!(
            result,
            Err(CodecError::PayloadTooLarge {
                size: LPP_SHORT_MAX_DATA + 1,
                max: LPP_SHORT_MAX_DATA
            })
        );
    }

    #[test]
    fn test_channel_lpp_source() {
        let (tx, mut rx) = crossbeam_channel::unbounded();
        assert!(rx.next_packet().is_none());
        tx.send(LppShortPacket::new(1, &[9]).unwrap()).unwrap();
        assert_eq!(rx.next_packet().unwrap().dest, 1);
        assert!(NoLpp.next_packet().is_none());
    }
}
