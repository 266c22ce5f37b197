//! Mock radio for testing and development

use crate::hardware::{CommError, CommResult, RadioInterface, RxFrame};
use crate::processing::mac::{MAC802154_HEADER_LENGTH, MAC_MAX_PAYLOAD};
use rand::Rng;
use std::collections::VecDeque;

/// Radio double: frames are scripted, everything sent is recorded
#[derive(Debug, Default)]
pub struct MockRadio {
    frame_queue: VecDeque<RxFrame>,
    sent_frames: Vec<Vec<u8>>,
    receive_timeout: Option<u16>,
    configuration_commits: u32,
    receive_starts: u32,
    idle_count: u32,
    error_count: u32,
    simulate_errors: bool,
    error_probability: f32,
}

impl MockRadio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the frame returned by the next `read_frame`
    pub fn add_frame(&mut self, frame: RxFrame) {
        self.frame_queue.push_back(frame);
    }

    /// Enable error simulation with given probability (0.0 to 1.0)
    pub fn simulate_errors(&mut self, enable: bool, probability: f32) {
        self.simulate_errors = enable;
        self.error_probability = probability.clamp(0.0, 1.0);
    }

    /// Get all frames that were transmitted
    pub fn sent_frames(&self) -> &[Vec<u8>] {
        &self.sent_frames
    }

    pub fn clear_sent_frames(&mut self) {
        self.sent_frames.clear();
    }

    pub fn queued_frame_count(&self) -> usize {
        self.frame_queue.len()
    }

    pub fn receive_timeout(&self) -> Option<u16> {
        self.receive_timeout
    }

    pub fn configuration_commits(&self) -> u32 {
        self.configuration_commits
    }

    /// How many times reception was armed
    pub fn receive_starts(&self) -> u32 {
        self.receive_starts
    }

    pub fn idle_count(&self) -> u32 {
        self.idle_count
    }

    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    fn should_simulate_error(&self) -> bool {
        if !self.simulate_errors {
            return false;
        }
        rand::thread_rng().gen::<f32>() < self.error_probability
    }

    fn check(&mut self, code: u32, description: &str) -> CommResult<()> {
        if self.should_simulate_error() {
            self.error_count += 1;
            return Err(CommError::HardwareError {
                code,
                description: description.to_string(),
            });
        }
        Ok(())
    }
}

impl RadioInterface for MockRadio {
    fn set_receive_timeout(&mut self, timeout: u16) -> CommResult<()> {
        self.receive_timeout = Some(timeout);
        Ok(())
    }

    fn commit_configuration(&mut self) -> CommResult<()> {
        self.check(1000, "Simulated configuration failure")?;
        self.configuration_commits += 1;
        Ok(())
    }

    fn read_frame(&mut self) -> CommResult<Option<RxFrame>> {
        self.check(1001, "Simulated read failure")?;
        Ok(self.frame_queue.pop_front())
    }

    fn start_receive(&mut self) -> CommResult<()> {
        self.check(1002, "Simulated receive failure")?;
        self.receive_starts += 1;
        Ok(())
    }

    fn start_transmit(&mut self, frame: &[u8]) -> CommResult<()> {
        self.check(1003, "Simulated transmit failure")?;
        let max = MAC802154_HEADER_LENGTH + MAC_MAX_PAYLOAD;
        if frame.len() > max {
            return Err(CommError::FrameTooLarge { size: frame.len(), max });
        }
        self.sent_frames.push(frame.to_vec());
        Ok(())
    }

    fn idle(&mut self) -> CommResult<()> {
        self.idle_count += 1;
        Ok(())
    }
}
