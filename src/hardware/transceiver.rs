//! Radio abstraction used by the tag

use crate::hardware::{CommResult, RxFrame};

/// Operations the tag needs from a UWB radio.
///
/// Calls are made from the radio's event callback and must not block.
pub trait RadioInterface {
    /// Receive timeout applied on every subsequent `start_receive` (radio units)
    fn set_receive_timeout(&mut self, timeout: u16) -> CommResult<()>;

    /// Apply pending configuration changes
    fn commit_configuration(&mut self) -> CommResult<()>;

    /// The frame that triggered the current receive event, if any.
    ///
    /// The receive timestamp is the 40-bit radio clock at arrival.
    fn read_frame(&mut self) -> CommResult<Option<RxFrame>>;

    /// Arm reception with default settings
    fn start_receive(&mut self) -> CommResult<()>;

    /// Send a complete MAC frame right away
    fn start_transmit(&mut self, frame: &[u8]) -> CommResult<()>;

    /// Abort whatever the radio is doing
    fn idle(&mut self) -> CommResult<()>;
}
