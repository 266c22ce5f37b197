//! Physical constants and protocol parameters

/// Speed of light in air (m/s)
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// Radio timestamp counter frequency (Hz), 499.2 MHz * 128
pub const LOCODECK_TS_FREQ: f64 = 499.2e6 * 128.0;

/// Metres travelled per radio tick
pub const M_PER_TICK: f64 = SPEED_OF_LIGHT / LOCODECK_TS_FREQ;

/// Antenna delay folded into anchor time-of-flight reports (m)
pub const ANTENNA_OFFSET_M: f64 = 154.6;

/// Header type byte of a TDOA3 range packet
pub const PACKET_TYPE_TDOA3: u8 = 0x30;

/// First byte of an embedded LPP short packet
pub const LPP_HEADER_SHORT_PACKET: u8 = 0xF0;

/// LPP short packet sub-type carrying an anchor position
pub const LPP_SHORT_ANCHORPOS: u8 = 0x01;

/// Maximum payload of an outgoing LPP short packet
pub const LPP_SHORT_MAX_DATA: usize = 30;

/// Receive wait timeout programmed into the radio (radio timeout units)
pub const TDOA3_RECEIVE_TIMEOUT: u16 = 10_000;

/// Next-event timeout returned by the event callback: wait for the radio
pub const MAX_TIMEOUT: u32 = u32::MAX;

/// Standard deviation attached to every TDOA measurement (m)
pub const MEASUREMENT_NOISE_STD: f32 = 0.15;

/// Standard deviation of the fixed height used for 2D positioning (m)
pub const HEIGHT_MEASUREMENT_STD: f32 = 0.0001;

/// Registry capacity, well above the 5-20 anchors audible at once
pub const ANCHOR_STORAGE_COUNT: usize = 32;

/// Remote timestamps kept per anchor
pub const REMOTE_ANCHOR_DATA_COUNT: usize = 16;

/// Time-of-flight values kept per anchor
pub const TOF_PER_ANCHOR_COUNT: usize = 16;

/// Upper bound on remote records accepted in a single packet
pub const MAX_REMOTE_RECORDS: usize = 32;
