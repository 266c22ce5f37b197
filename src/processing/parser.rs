//! TDOA3 range packet codec.
//!
//! Layout of a range packet payload (little-endian):
//!
//! ```text
//! [type(1)] [seq(1)] [tx_timestamp(4)] [remote_count(1)]
//! remote_count x ( [id(1)] [seq|flag(1)] [rx_timestamp(4)] [distance(2) if flag] )
//! [optional LPP short packet]
//! ```
//!
//! Whether a remote record carries a distance is decided by bit 7 of its own
//! sequence byte, so records are walked one by one with a bounds-checked
//! cursor instead of a fixed stride.

use crate::core::constants::{
    LPP_HEADER_SHORT_PACKET, LPP_SHORT_ANCHORPOS, LPP_SHORT_MAX_DATA, MAX_REMOTE_RECORDS,
    PACKET_TYPE_TDOA3,
};
use crate::core::types::AnchorId;
use heapless::Vec as BoundedVec;
use nalgebra::Vector3;
use thiserror::Error;

/// Low 7 bits of a sequence byte hold the sequence number
pub const SEQUENCE_MASK: u8 = 0x7f;

/// Bit 7 of a remote record's sequence byte marks a trailing distance field
pub const DISTANCE_FLAG: u8 = 0x80;

/// type + seq + tx timestamp + remote count
pub const RANGE_HEADER_SIZE: usize = 7;

/// id + seq + rx timestamp + distance
pub const FULL_RECORD_SIZE: usize = 8;

/// id + seq + rx timestamp
pub const SHORT_RECORD_SIZE: usize = 6;

/// Errors raised while decoding or encoding radio payloads
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("insufficient data: need {required} bytes, got {available}")]
    InsufficientData { required: usize, available: usize },
    #[error("too many remote records: {count} (max {max})")]
    TooManyRecords { count: usize, max: usize },
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },
}

pub type CodecResult<T> = Result<T, CodecError>;

/// Forward-only reader over a received buffer.
///
/// Every read checks the remaining length first, a short buffer is reported
/// as [`CodecError::InsufficientData`] and never read past.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    /// Bytes consumed so far
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Fail unless at least `count` more bytes are available
    pub fn ensure(&self, count: usize) -> CodecResult<()> {
        if self.remaining() < count {
            return Err(CodecError::InsufficientData {
                required: self.offset + count,
                available: self.data.len(),
            });
        }
        Ok(())
    }

    pub fn take(&mut self, count: usize) -> CodecResult<&'a [u8]> {
        self.ensure(count)?;
        let bytes = &self.data[self.offset..self.offset + count];
        self.offset += count;
        Ok(bytes)
    }

    /// Everything not consumed yet
    pub fn rest(&self) -> &'a [u8] {
        &self.data[self.offset..]
    }

    pub fn read_u8(&mut self) -> CodecResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16_le(&mut self) -> CodecResult<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_u32_le(&mut self) -> CodecResult<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_u64_le(&mut self) -> CodecResult<u64> {
        let bytes = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(raw))
    }

    pub fn read_f32_le(&mut self) -> CodecResult<f32> {
        Ok(f32::from_bits(self.read_u32_le()?))
    }
}

/// Fixed part of a range packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeHeader {
    /// 7-bit rolling sequence number of the sending anchor
    pub sequence: u8,
    /// Low 32 bits of the sender's clock at transmission
    pub tx_timestamp: u32,
    /// Number of remote records that follow
    pub remote_count: u8,
}

/// What the sender heard from another anchor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteRecord {
    pub anchor_id: AnchorId,
    /// 7-bit sequence number of the referenced anchor's packet
    pub sequence: u8,
    /// Sender's clock when it received that packet; zero means invalid
    pub rx_timestamp: u32,
    /// Time of flight between the two anchors in radio ticks, if carried
    pub distance: Option<u16>,
}

impl RemoteRecord {
    /// Bytes this record occupies on air
    pub fn encoded_len(&self) -> usize {
        if self.distance.is_some() {
            FULL_RECORD_SIZE
        } else {
            SHORT_RECORD_SIZE
        }
    }

    fn sequence_byte(&self) -> u8 {
        let flag = if self.distance.is_some() { DISTANCE_FLAG } else { 0 };
        (self.sequence & SEQUENCE_MASK) | flag
    }
}

/// Decoded TDOA3 range section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangePacket {
    pub header: RangeHeader,
    pub records: BoundedVec<RemoteRecord, MAX_REMOTE_RECORDS>,
}

impl RangePacket {
    /// Length of the range section, header included
    pub fn encoded_len(&self) -> usize {
        RANGE_HEADER_SIZE + self.records.iter().map(RemoteRecord::encoded_len).sum::<usize>()
    }
}

/// Outcome of decoding a payload
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedPayload {
    Range(RangePacket),
    /// Some other protocol shares the channel; not an error
    NotTdoa { packet_type: u8 },
}

/// Decode the range section of a radio payload.
///
/// Bytes after the range section are left alone; the relay processor reports
/// where the section ends so the caller can look for a control sub-packet.
pub fn decode(payload: &[u8]) -> CodecResult<DecodedPayload> {
    let mut reader = ByteReader::new(payload);

    let packet_type = reader.read_u8()?;
    if packet_type != PACKET_TYPE_TDOA3 {
        return Ok(DecodedPayload::NotTdoa { packet_type });
    }

    let sequence = reader.read_u8()? & SEQUENCE_MASK;
    let tx_timestamp = reader.read_u32_le()?;
    let remote_count = reader.read_u8()?;

    let count = remote_count as usize;
    if count > MAX_REMOTE_RECORDS {
        return Err(CodecError::TooManyRecords {
            count,
            max: MAX_REMOTE_RECORDS,
        });
    }
    // Even all-short records must fit
    reader.ensure(count * SHORT_RECORD_SIZE)?;

    let mut records = BoundedVec::new();
    for _ in 0..count {
        let record = read_record(&mut reader)?;
        records.push(record).map_err(|_| CodecError::TooManyRecords {
            count,
            max: MAX_REMOTE_RECORDS,
        })?;
    }

    Ok(DecodedPayload::Range(RangePacket {
        header: RangeHeader {
            sequence,
            tx_timestamp,
            remote_count,
        },
        records,
    }))
}

fn read_record(reader: &mut ByteReader<'_>) -> CodecResult<RemoteRecord> {
    let anchor_id = reader.read_u8()?;
    let sequence_byte = reader.read_u8()?;
    let rx_timestamp = reader.read_u32_le()?;
    let distance = if sequence_byte & DISTANCE_FLAG != 0 {
        Some(reader.read_u16_le()?)
    } else {
        None
    };

    Ok(RemoteRecord {
        anchor_id,
        sequence: sequence_byte & SEQUENCE_MASK,
        rx_timestamp,
        distance,
    })
}

/// Encode a range section, as anchors put it on air
pub fn encode_range_packet(packet: &RangePacket, out: &mut Vec<u8>) {
    out.push(PACKET_TYPE_TDOA3);
    out.push(packet.header.sequence & SEQUENCE_MASK);
    out.extend_from_slice(&packet.header.tx_timestamp.to_le_bytes());
    out.push(packet.records.len() as u8);

    for record in &packet.records {
        out.push(record.anchor_id);
        out.push(record.sequence_byte());
        out.extend_from_slice(&record.rx_timestamp.to_le_bytes());
        if let Some(distance) = record.distance {
            out.extend_from_slice(&distance.to_le_bytes());
        }
    }
}

/// Anchor position announcement with the anchor's own view of the link
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnchorPositionReport {
    pub position: Vector3<f32>,
    /// SNR the anchor measured on its neighbour
    pub snr: Option<f32>,
    /// Received minus first path power the anchor measured
    pub power_diff: Option<f32>,
}

/// Control sub-packet trailing a range section
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlPacket {
    AnchorPosition(AnchorPositionReport),
    /// Recognised framing, unknown sub-type
    Unknown { lpp_type: u8 },
}

/// Decode the bytes following the range section.
///
/// Returns `Ok(None)` when nothing addressed to the tag is present.
pub fn decode_control(section: &[u8]) -> CodecResult<Option<ControlPacket>> {
    let mut reader = ByteReader::new(section);
    if reader.is_empty() {
        return Ok(None);
    }
    if reader.read_u8()? != LPP_HEADER_SHORT_PACKET {
        return Ok(None);
    }
    if reader.is_empty() {
        return Ok(None);
    }

    let lpp_type = reader.read_u8()?;
    if lpp_type != LPP_SHORT_ANCHORPOS {
        return Ok(Some(ControlPacket::Unknown { lpp_type }));
    }

    let x = reader.read_f32_le()?;
    let y = reader.read_f32_le()?;
    let z = reader.read_f32_le()?;

    // Older anchors stop after the coordinates
    let (snr, power_diff) = if reader.remaining() >= 8 {
        (Some(reader.read_f32_le()?), Some(reader.read_f32_le()?))
    } else {
        (None, None)
    };

    Ok(Some(ControlPacket::AnchorPosition(AnchorPositionReport {
        position: Vector3::new(x, y, z),
        snr,
        power_diff,
    })))
}

/// Encode an anchor position announcement including its LPP header
pub fn encode_anchor_position(report: &AnchorPositionReport, out: &mut Vec<u8>) {
    out.push(LPP_HEADER_SHORT_PACKET);
    out.push(LPP_SHORT_ANCHORPOS);
    for value in report.position.iter() {
        out.extend_from_slice(&value.to_le_bytes());
    }
    if let (Some(snr), Some(power_diff)) = (report.snr, report.power_diff) {
        out.extend_from_slice(&snr.to_le_bytes());
        out.extend_from_slice(&power_diff.to_le_bytes());
    }
}

/// Payload of an outgoing LPP short packet: header byte then the data
pub fn encode_lpp_short(data: &[u8], out: &mut Vec<u8>) -> CodecResult<()> {
    if data.len() > LPP_SHORT_MAX_DATA {
        return Err(CodecError::PayloadTooLarge {
            size: data.len(),
            max: LPP_SHORT_MAX_DATA,
        });
    }
    out.push(LPP_HEADER_SHORT_PACKET);
    out.extend_from_slice(data);
    Ok(())
}
