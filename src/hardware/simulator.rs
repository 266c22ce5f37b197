//! # Anchor constellation simulator
//!
//! Produces the frames a stationary tag would receive from a set of TDOA3
//! anchors, without hardware. Every anchor runs its own drifting clock,
//! anchors take turns transmitting in fixed slots and each packet carries
//! what the sender heard from the others, the anchor-to-anchor time of
//! flight and the sender's position.
//!
//! Propagation is computed from the geometry, so the distance differences
//! the tag derives can be checked against [`AnchorSimulator::expected_distance_diff`].

use crate::core::constants::{LOCODECK_TS_FREQ, SPEED_OF_LIGHT};
use crate::core::timestamp::{self, ANCHOR_TIMESTAMP_BITS, TAG_TIMESTAMP_BITS};
use crate::core::types::{AnchorId, RxQuality};
use crate::hardware::RxFrame;
use crate::processing::mac::{self, MacHeader, MAC_MAX_PAYLOAD};
use crate::processing::parser::{
    encode_anchor_position, encode_range_packet, AnchorPositionReport, CodecError, CodecResult, RangeHeader,
    RangePacket, RemoteRecord, FULL_RECORD_SIZE, RANGE_HEADER_SIZE, SEQUENCE_MASK,
};
use crate::utils::config::{ConfigError, ConfigResult};
use heapless::Vec as BoundedVec;
use log::debug;
use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Anchors broadcast to everyone
const BROADCAST_ADDRESS: u64 = u64::MAX;

/// Largest anchor clock drift the tag's clock correction accepts
const MAX_CLOCK_DRIFT_PPM: f64 = 10.0;

/// Anchor position announcement with link telemetry
const POSITION_SECTION_SIZE: usize = 2 + 5 * 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedAnchorConfig {
    pub id: AnchorId,
    /// Position in metres
    pub position: [f64; 3],
    /// Clock rate error (parts per million)
    #[serde(default)]
    pub clock_drift_ppm: f64,
    /// Where the anchor clock starts (s)
    #[serde(default)]
    pub clock_offset_s: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub anchors: Vec<SimulatedAnchorConfig>,
    pub tag_position: [f64; 3],
    /// Where the tag clock starts (s)
    pub tag_clock_offset_s: f64,
    /// Time between two consecutive anchor transmissions (ms)
    pub slot_ms: u64,
    /// Probability that the tag misses a packet
    pub loss_probability: f64,
    /// Anchors carry times of flight every n-th packet
    pub distance_interval: u32,
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        // Two rings of four anchors, the usual 4 x 4 x 3 m flight space
        let corners = [
            [0.0, 0.0, 0.2],
            [4.0, 0.0, 2.8],
            [4.0, 4.0, 0.2],
            [0.0, 4.0, 2.8],
            [0.0, 0.0, 2.8],
            [4.0, 0.0, 0.2],
            [4.0, 4.0, 2.8],
            [0.0, 4.0, 0.2],
        ];
        let drifts = [3.0, -2.5, 1.0, 4.2, -4.0, 0.5, -1.5, 2.0];

        let anchors = corners
            .iter()
            .zip(drifts)
            .enumerate()
            .map(|(i, (position, clock_drift_ppm))| SimulatedAnchorConfig {
                id: i as AnchorId,
                position: *position,
                clock_drift_ppm,
                clock_offset_s: 0.013 * i as f64,
            })
            .collect();

        Self {
            anchors,
            tag_position: [1.5, 2.0, 1.0],
            tag_clock_offset_s: 16.5,
            slot_ms: 5,
            loss_probability: 0.0,
            distance_interval: 2,
            seed: 42,
        }
    }
}

fn invalid(parameter: &str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidParameter {
        parameter: parameter.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

impl SimulatorConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.anchors.len() < 2 {
            return Err(invalid("anchors", self.anchors.len(), "At least two anchors are needed"));
        }
        let payload = RANGE_HEADER_SIZE + (self.anchors.len() - 1) * FULL_RECORD_SIZE + POSITION_SECTION_SIZE;
        if payload > MAC_MAX_PAYLOAD {
            return Err(invalid("anchors", self.anchors.len(), "Too many anchors to fit in one frame"));
        }
        for (i, anchor) in self.anchors.iter().enumerate() {
            if self.anchors[..i].iter().any(|other| other.id == anchor.id) {
                return Err(invalid("anchors.id", anchor.id, "Anchor ids must be unique"));
            }
            if anchor.clock_drift_ppm.abs() > MAX_CLOCK_DRIFT_PPM {
                return Err(invalid(
                    "anchors.clock_drift_ppm",
                    anchor.clock_drift_ppm,
                    "Drift outside the crystal tolerance",
                ));
            }
            for other in &self.anchors[..i] {
                let tof_ticks = distance(&anchor.position, &other.position) / SPEED_OF_LIGHT * LOCODECK_TS_FREQ;
                if tof_ticks >= u16::MAX as f64 {
                    return Err(invalid("anchors.position", anchor.id, "Anchors too far apart"));
                }
            }
        }
        if self.slot_ms == 0 {
            return Err(invalid("slot_ms", self.slot_ms, "Slot must be non-zero"));
        }
        if !(0.0..=1.0).contains(&self.loss_probability) {
            return Err(invalid("loss_probability", self.loss_probability, "Probability must be within 0..1"));
        }
        if self.distance_interval == 0 {
            return Err(invalid("distance_interval", self.distance_interval, "Interval must be non-zero"));
        }
        Ok(())
    }
}

fn distance(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    (Vector3::from(*a) - Vector3::from(*b)).norm()
}

#[derive(Debug, Clone)]
struct AnchorState {
    config: SimulatedAnchorConfig,
    sequence: u8,
    packets_sent: u32,
    /// Global time and sequence number of the latest transmission
    last_tx: Option<(f64, u8)>,
}

impl AnchorState {
    /// Anchor clock at global time `t_s`, full width
    fn ticks(&self, t_s: f64) -> u64 {
        let local_s = (t_s + self.config.clock_offset_s) * (1.0 + self.config.clock_drift_ppm * 1e-6);
        (local_s * LOCODECK_TS_FREQ).round() as u64
    }

    /// Anchor clock as put on air
    fn on_air_ticks(&self, t_s: f64) -> u32 {
        timestamp::truncate(self.ticks(t_s), ANCHOR_TIMESTAMP_BITS) as u32
    }
}

/// One slot of simulated traffic
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedTransmission {
    pub anchor_id: AnchorId,
    /// Tag time when the frame arrives (ms)
    pub now_ms: u64,
    /// `None` if the tag missed the frame
    pub frame: Option<RxFrame>,
}

pub struct AnchorSimulator {
    anchors: Vec<AnchorState>,
    tag_position: [f64; 3],
    tag_clock_offset_s: f64,
    slot_s: f64,
    loss_probability: f64,
    distance_interval: u32,
    time_s: f64,
    next_anchor: usize,
    rng: StdRng,
}

impl AnchorSimulator {
    pub fn new(config: SimulatorConfig) -> ConfigResult<Self> {
        config.validate()?;
        let anchors = config
            .anchors
            .into_iter()
            .map(|config| AnchorState {
                config,
                sequence: 0,
                packets_sent: 0,
                last_tx: None,
            })
            .collect();

        Ok(Self {
            anchors,
            tag_position: config.tag_position,
            tag_clock_offset_s: config.tag_clock_offset_s,
            slot_s: config.slot_ms as f64 / 1000.0,
            loss_probability: config.loss_probability,
            distance_interval: config.distance_interval,
            time_s: 0.0,
            next_anchor: 0,
            rng: StdRng::seed_from_u64(config.seed),
        })
    }

    pub fn time_ms(&self) -> u64 {
        (self.time_s * 1000.0).round() as u64
    }

    pub fn tag_position(&self) -> Vector3<f64> {
        Vector3::from(self.tag_position)
    }

    pub fn anchor_position(&self, anchor_id: AnchorId) -> Option<Vector3<f64>> {
        self.anchor(anchor_id).map(|state| Vector3::from(state.config.position))
    }

    pub fn anchor_ids(&self) -> Vec<AnchorId> {
        self.anchors.iter().map(|state| state.config.id).collect()
    }

    fn anchor(&self, anchor_id: AnchorId) -> Option<&AnchorState> {
        self.anchors.iter().find(|state| state.config.id == anchor_id)
    }

    /// True distance to `anchor_ids[1]` minus distance to `anchor_ids[0]` (m)
    pub fn expected_distance_diff(&self, anchor_ids: [AnchorId; 2]) -> Option<f64> {
        let tag = self.tag_position();
        let d0 = (self.anchor_position(anchor_ids[0])? - tag).norm();
        let d1 = (self.anchor_position(anchor_ids[1])? - tag).norm();
        Some(d1 - d0)
    }

    fn tag_ticks(&self, t_s: f64) -> u64 {
        timestamp::truncate(
            ((t_s + self.tag_clock_offset_s) * LOCODECK_TS_FREQ).round() as u64,
            TAG_TIMESTAMP_BITS,
        )
    }

    /// Advance one slot and let the next anchor in turn transmit
    pub fn next_transmission(&mut self) -> CodecResult<SimulatedTransmission> {
        self.time_s += self.slot_s;
        let t_tx = self.time_s;
        let index = self.next_anchor;
        self.next_anchor = (self.next_anchor + 1) % self.anchors.len();

        let payload = self.build_payload(index, t_tx)?;
        let sender = &self.anchors[index];
        let anchor_id = sender.config.id;
        let sequence = sender.sequence;

        let mut data = Vec::new();
        let header = MacHeader::data(sequence, BROADCAST_ADDRESS, mac::lps_address(anchor_id));
        mac::encode_frame(&header, &payload, &mut data)?;

        let range = distance(&sender.config.position, &self.tag_position);
        let t_rx = t_tx + range / SPEED_OF_LIGHT;
        let rx_timestamp = self.tag_ticks(t_rx);
        let now_ms = (t_rx * 1000.0).round() as u64;

        let state = &mut self.anchors[index];
        state.last_tx = Some((t_tx, sequence));
        state.packets_sent = state.packets_sent.wrapping_add(1);
        state.sequence = sequence.wrapping_add(1) & SEQUENCE_MASK;

        let lost = self.loss_probability > 0.0 && self.rng.gen::<f64>() < self.loss_probability;
        let frame = if lost {
            debug!("Simulated loss of packet {} from anchor {}", sequence, anchor_id);
            None
        } else {
            Some(RxFrame::new(data, rx_timestamp).with_quality(link_quality(range)))
        };

        Ok(SimulatedTransmission {
            anchor_id,
            now_ms,
            frame,
        })
    }

    fn build_payload(&self, index: usize, t_tx: f64) -> CodecResult<Vec<u8>> {
        let sender = &self.anchors[index];
        let carry_distance = sender.packets_sent % self.distance_interval == 0;

        let mut records = BoundedVec::new();
        for (j, other) in self.anchors.iter().enumerate() {
            let Some((t_other_tx, other_sequence)) = other.last_tx else {
                continue;
            };
            if j == index {
                continue;
            }
            let range = distance(&other.config.position, &sender.config.position);
            let flight_s = range / SPEED_OF_LIGHT;
            let rx_timestamp = sender.on_air_ticks(t_other_tx + flight_s);
            let distance = carry_distance.then(|| {
                let ticks = flight_s * LOCODECK_TS_FREQ * (1.0 + sender.config.clock_drift_ppm * 1e-6);
                ticks.round() as u16
            });

            let record = RemoteRecord {
                anchor_id: other.config.id,
                sequence: other_sequence,
                rx_timestamp,
                distance,
            };
            records.push(record).map_err(|_| CodecError::TooManyRecords {
                count: self.anchors.len() - 1,
                max: records.capacity(),
            })?;
        }

        let packet = RangePacket {
            header: RangeHeader {
                sequence: sender.sequence,
                tx_timestamp: sender.on_air_ticks(t_tx),
                remote_count: records.len() as u8,
            },
            records,
        };

        let mut payload = Vec::with_capacity(MAC_MAX_PAYLOAD);
        encode_range_packet(&packet, &mut payload);

        let [x, y, z] = sender.config.position;
        let nearest = self
            .anchors
            .iter()
            .filter(|other| other.config.id != sender.config.id)
            .map(|other| distance(&other.config.position, &sender.config.position))
            .fold(f64::INFINITY, f64::min);
        let neighbour = link_quality(nearest);
        let report = AnchorPositionReport {
            position: Vector3::new(x as f32, y as f32, z as f32),
            snr: Some(neighbour.snr),
            power_diff: Some(neighbour.power_diff()),
        };
        encode_anchor_position(&report, &mut payload);
        Ok(payload)
    }
}

/// Rough free-space signal levels for a link of `range` metres
fn link_quality(range: f64) -> RxQuality {
    let path_loss = 20.0 * (range.max(0.1)).log10() as f32;
    RxQuality {
        first_path_power: -75.0 - path_loss,
        receive_power: -72.0 - path_loss,
        snr: 40.0 - path_loss,
    }
}
