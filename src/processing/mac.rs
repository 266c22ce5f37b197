//! IEEE 802.15.4 data frame header used by the Loco Positioning System.
//!
//! Frames always use 64-bit source and destination addresses with PAN id
//! compression, giving a fixed 21-byte header. Anchors put their id in the
//! low byte of the source address.

use crate::core::types::AnchorId;
use crate::processing::parser::{ByteReader, CodecError, CodecResult};

pub const MAC802154_HEADER_LENGTH: usize = 21;
pub const MAC802154_TYPE_DATA: u8 = 1;

/// Largest payload a frame may carry
pub const MAC_MAX_PAYLOAD: usize = 128;

pub const LPS_PAN_ID: u16 = 0xbccf;
pub const LPS_ADDRESS_BASE: u64 = 0xbccf_0000_0000_0000;

/// Short address tags use as their source
pub const TAG_SHORT_ADDRESS: u8 = 0xff;

const FCF_TYPE_MASK: u16 = 0x0007;
const FCF_PAN_ID_COMPRESSION: u16 = 1 << 6;
const FCF_DEST_ADDR_MODE_LONG: u16 = 3 << 10;
const FCF_FRAME_VERSION_2006: u16 = 1 << 12;
const FCF_SRC_ADDR_MODE_LONG: u16 = 3 << 14;

/// Fixed-size MAC header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacHeader {
    pub frame_control: u16,
    pub sequence: u8,
    pub pan: u16,
    pub destination: u64,
    pub source: u64,
}

impl MacHeader {
    /// Data frame header with long addressing on the LPS PAN
    pub fn data(sequence: u8, destination: u64, source: u64) -> Self {
        Self {
            frame_control: MAC802154_TYPE_DATA as u16
                | FCF_PAN_ID_COMPRESSION
                | FCF_DEST_ADDR_MODE_LONG
                | FCF_FRAME_VERSION_2006
                | FCF_SRC_ADDR_MODE_LONG,
            sequence,
            pan: LPS_PAN_ID,
            destination,
            source,
        }
    }

    pub fn frame_type(&self) -> u8 {
        (self.frame_control & FCF_TYPE_MASK) as u8
    }

    /// Anchor id encoded in the source address
    pub fn source_anchor_id(&self) -> AnchorId {
        (self.source & 0xff) as AnchorId
    }
}

/// Address of a node on the LPS PAN
pub fn lps_address(short: u8) -> u64 {
    LPS_ADDRESS_BASE | short as u64
}

/// Received frame split into header and payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacFrame<'a> {
    pub header: MacHeader,
    pub payload: &'a [u8],
}

pub fn decode_frame(data: &[u8]) -> CodecResult<MacFrame<'_>> {
    let mut reader = ByteReader::new(data);
    let header = MacHeader {
        frame_control: reader.read_u16_le()?,
        sequence: reader.read_u8()?,
        pan: reader.read_u16_le()?,
        destination: reader.read_u64_le()?,
        source: reader.read_u64_le()?,
    };
    Ok(MacFrame {
        header,
        payload: reader.rest(),
    })
}

pub fn encode_frame(header: &MacHeader, payload: &[u8], out: &mut Vec<u8>) -> CodecResult<()> {
    if payload.len() > MAC_MAX_PAYLOAD {
        return Err(CodecError::PayloadTooLarge {
            size: payload.len(),
            max: MAC_MAX_PAYLOAD,
        });
    }
    out.reserve(MAC802154_HEADER_LENGTH + payload.len());
    out.extend_from_slice(&header.frame_control.to_le_bytes());
    out.push(header.sequence);
    out.extend_from_slice(&header.pan.to_le_bytes());
    out.extend_from_slice(&header.destination.to_le_bytes());
    out.extend_from_slice(&header.source.to_le_bytes());
    out.extend_from_slice(payload);
    Ok(())
}
