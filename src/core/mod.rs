//! Core types, constants and clock arithmetic for the TDOA3 tag

pub mod types;
pub mod constants;
pub mod timestamp;

pub use types::*;
pub use constants::*;
