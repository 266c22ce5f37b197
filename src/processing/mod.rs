//! Packet decoding and per-anchor state

pub mod parser;
pub mod mac;
pub mod registry;
pub mod relay;

pub use parser::{decode, CodecError, CodecResult, ControlPacket, DecodedPayload, RangePacket, RemoteRecord};
pub use registry::{AnchorContext, AnchorRegistry};
