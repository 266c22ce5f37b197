//! Stages the remote data an anchor piggy-backs on its broadcast.
//!
//! Each remote record says "I heard anchor X's packet number N at time T on
//! my clock", optionally with the time of flight between the two anchors.
//! The data is written into the *sender's* context; the engine later pairs it
//! with what the tag itself heard from X.

use crate::processing::parser::{RangePacket, RANGE_HEADER_SIZE};
use crate::processing::registry::AnchorContext;

/// Zero marks a timestamp or distance the anchor could not provide
fn is_valid_timestamp(value: u64) -> bool {
    value != 0
}

/// Store the remote records of `packet` in `sender` and return the length of
/// the range section, i.e. where a trailing control sub-packet starts
pub fn apply(packet: &RangePacket, sender: &mut AnchorContext, now_ms: u64) -> usize {
    let mut consumed = RANGE_HEADER_SIZE;

    for record in &packet.records {
        let rx_timestamp = record.rx_timestamp as u64;
        if is_valid_timestamp(rx_timestamp) {
            sender.set_remote_timestamp(record.anchor_id, rx_timestamp, record.sequence, now_ms);
        }

        if let Some(distance) = record.distance {
            let tof = distance as u64;
            if is_valid_timestamp(tof) {
                sender.set_time_of_flight(record.anchor_id, tof, now_ms);
            }
        }

        consumed += record.encoded_len();
    }

    consumed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::constants::PACKET_TYPE_TDOA3;
    use crate::processing::parser::{decode, DecodedPayload};

    fn decode_range(data: &[u8]) -> RangePacket {
        match decode(data).unwrap() {
            DecodedPayload::Range(packet) => packet,
            other => panic!("Expected range packet, got {:?}", other),
        }
    }

    fn header(remote_count: u8) -> Vec<u8> {
        let mut data = vec![PACKET_TYPE_TDOA3, 0x01];
        data.extend_from_slice(&77u32.to_le_bytes());
        data.push(remote_count);
        data
    }

    fn push_record(data: &mut Vec<u8>, id: u8, seq: u8, rx: u32, distance: Option<u16>) {
        data.push(id);
        data.push(seq);
        data.extend_from_slice(&rx.to_le_bytes());
        if let Some(d) = distance {
            data.extend_from_slice(&d.to_le_bytes());
        }
    }

    #[test]
    fn test_full_and_short_records() {
        let mut data = header(2);
        push_record(&mut data, 3, 0x81, 1000, Some(500));
        push_record(&mut data, 9, 0x02, 2000, None);

        let packet = decode_range(&data);
        let mut ctx = AnchorContext::new(7, 0);
        let consumed = apply(&packet, &mut ctx, 10);

        assert_eq!(consumed, 7 + 8 + 6);
        let r3 = ctx.remote_timestamp(3).unwrap();
        assert_eq!((r3.rx_timestamp, r3.sequence), (1000, 1));
        let r9 = ctx.remote_timestamp(9).unwrap();
        assert_eq!((r9.rx_timestamp, r9.sequence), (2000, 2));
        assert_eq!(ctx.time_of_flight(3).unwrap().ticks, 500);
        assert!(ctx.time_of_flight(9).is_none());
    }

    #[test]
    fn test_zero_timestamp_discarded_but_consumed() {
        let mut data = header(2);
        push_record(&mut data, 4, 0x83, 0, Some(321));
        push_record(&mut data, 5, 0x04, 4444, None);

        let packet = decode_range(&data);
        let mut ctx = AnchorContext::new(1, 0);
        ctx.set_remote_timestamp(4, 999, 2, 0);

        let consumed = apply(&packet, &mut ctx, 10);
        assert_eq!(consumed, data.len());
        // Previous value survives the invalid update
        assert_eq!(ctx.remote_timestamp(4).unwrap().rx_timestamp, 999);
        // The record after it still parsed correctly
        assert_eq!(ctx.remote_timestamp(5).unwrap().rx_timestamp, 4444);
        // Distance is independent of the timestamp
        assert_eq!(ctx.time_of_flight(4).unwrap().ticks, 321);
    }

    #[test]
    fn test_zero_distance_does_not_overwrite_tof() {
        let mut data = header(1);
        push_record(&mut data, 6, 0x85, 1234, Some(0));

        let packet = decode_range(&data);
        let mut ctx = AnchorContext::new(1, 0);
        ctx.set_time_of_flight(6, 700, 0);

        apply(&packet, &mut ctx, 10);
        let tof = ctx.time_of_flight(6).unwrap();
        assert_eq!(tof.ticks, 700);
        assert_eq!(tof.updated_ms, 0);
        assert_eq!(ctx.remote_timestamp(6).unwrap().sequence, 5);
    }

    #[test]
    fn test_no_records() {
        let packet = decode_range(&header(0));
        let mut ctx = AnchorContext::new(1, 0);
        assert_eq!(apply(&packet, &mut ctx, 0), RANGE_HEADER_SIZE);
        assert!(ctx.remote_timestamps().is_empty());
    }
}
