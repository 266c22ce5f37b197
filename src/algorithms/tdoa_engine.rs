//! Pairs anchors and turns their timestamps into distance differences.
//!
//! When anchor An's packet arrives, An's context holds what An heard from
//! other anchors (remote timestamps and times of flight). If the tag also
//! heard the very packet An refers to from some anchor Ar, the two arrivals at
//! the tag can be compared after translating An's view into tag ticks with
//! An's clock correction.

use crate::core::constants::{MEASUREMENT_NOISE_STD, REMOTE_ANCHOR_DATA_COUNT, SPEED_OF_LIGHT};
use crate::core::timestamp::{self, ANCHOR_TIMESTAMP_BITS, TAG_TIMESTAMP_BITS};
use crate::core::types::{AnchorId, TdoaMeasurement};
use crate::algorithms::clock_correction::ClockCorrection;
use crate::processing::registry::{AnchorContext, AnchorRegistry};
use crate::utils::config::TagConfig;
use crate::utils::stats::TdoaStats;
use heapless::Vec as BoundedVec;
use log::debug;
use serde::{Deserialize, Serialize};

/// Strategy for choosing the second anchor of a pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchingAlgorithm {
    /// First usable candidate, starting at an offset that rotates every packet
    Random,
    /// Usable candidate heard most recently
    Youngest,
}

pub struct TdoaEngine {
    registry: AnchorRegistry,
    stats: TdoaStats,
    matching_algorithm: MatchingAlgorithm,
    matching_offset: usize,
    timestamp_frequency_hz: f64,
    remote_data_validity_ms: u64,
    tof_validity_ms: u64,
}

impl Default for TdoaEngine {
    fn default() -> Self {
        Self::new(&TagConfig::default(), 0)
    }
}

impl TdoaEngine {
    pub fn new(config: &TagConfig, now_ms: u64) -> Self {
        Self {
            registry: AnchorRegistry::new(config.inactivity_window_ms),
            stats: TdoaStats::new(config.tracked_pair[0], config.tracked_pair[1], now_ms),
            matching_algorithm: config.matching_algorithm,
            matching_offset: 0,
            timestamp_frequency_hz: config.timestamp_frequency_hz,
            remote_data_validity_ms: config.remote_data_validity_ms,
            tof_validity_ms: config.tof_validity_ms,
        }
    }

    pub fn registry(&self) -> &AnchorRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut AnchorRegistry {
        &mut self.registry
    }

    pub fn stats(&self) -> &TdoaStats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut TdoaStats {
        &mut self.stats
    }

    pub fn matching_algorithm(&self) -> MatchingAlgorithm {
        self.matching_algorithm
    }

    pub fn set_matching_algorithm(&mut self, algorithm: MatchingAlgorithm) {
        self.matching_algorithm = algorithm;
    }

    /// Context of the anchor that sent the packet being processed
    pub fn begin_packet(&mut self, anchor_id: AnchorId, now_ms: u64) -> &mut AnchorContext {
        let hit = self.registry.contains(anchor_id);
        self.stats.context_lookup(hit);
        self.registry.get_or_create(anchor_id, now_ms)
    }

    /// Run clock correction and matching for a packet from `anchor_id`.
    ///
    /// Must be called after the packet's remote data has been stored and
    /// before [`Self::record_rx_tx`], since the previous packet's timestamps
    /// drive the clock correction.
    pub fn process_packet(
        &mut self,
        anchor_id: AnchorId,
        tx_an_in_cl_an: u64,
        rx_an_by_t_in_cl_t: u64,
        now_ms: u64,
    ) -> Option<TdoaMeasurement> {
        if !self.update_clock_correction(anchor_id, tx_an_in_cl_an, rx_an_by_t_in_cl_t) {
            return None;
        }
        self.stats.time_is_good();

        let other_id = self.find_suitable_anchor(anchor_id, now_ms)?;
        self.stats.suitable_data_found();

        let current = self.registry.get(anchor_id)?;
        let other = self.registry.get(other_id)?;
        let distance_diff = self.distance_diff(other, current, tx_an_in_cl_an, rx_an_by_t_in_cl_t, now_ms)?;

        let measurement = build_measurement(other, current, distance_diff);
        if measurement.is_none() {
            debug!("No position for anchor pair [{}, {}] yet", other_id, anchor_id);
        }
        measurement
    }

    /// Remember the timestamps and sequence number of the packet just processed
    pub fn record_rx_tx(&mut self, anchor_id: AnchorId, rx_by_tag: u64, tx_by_anchor: u64, sequence: u8) {
        if let Some(ctx) = self.registry.get_mut(anchor_id) {
            ctx.set_rx_tx_data(rx_by_tag, tx_by_anchor, sequence);
        }
    }

    fn update_clock_correction(&mut self, anchor_id: AnchorId, tx_an_in_cl_an: u64, rx_an_by_t_in_cl_t: u64) -> bool {
        let Some(ctx) = self.registry.get_mut(anchor_id) else {
            return false;
        };
        let Some(previous) = ctx.rx_tx() else {
            return false;
        };
        let Some(candidate) = ClockCorrection::candidate(
            rx_an_by_t_in_cl_t,
            previous.local_rx_timestamp,
            tx_an_in_cl_an,
            previous.remote_tx_timestamp,
        ) else {
            return false;
        };

        let reliable = ctx.clock_correction_mut().update(candidate);
        if reliable {
            let value = ctx.clock_correction().get();
            self.stats.clock_correction_sample(anchor_id, value);
        }
        reliable
    }

    fn next_matching_offset(&mut self) -> usize {
        self.matching_offset = self.matching_offset.wrapping_add(1);
        self.matching_offset
    }

    fn find_suitable_anchor(&mut self, anchor_id: AnchorId, now_ms: u64) -> Option<AnchorId> {
        let offset = match self.matching_algorithm {
            MatchingAlgorithm::Random => self.next_matching_offset(),
            MatchingAlgorithm::Youngest => 0,
        };

        let current = self.registry.get(anchor_id)?;
        let candidates: BoundedVec<(AnchorId, u8), REMOTE_ANCHOR_DATA_COUNT> = current
            .valid_remote_timestamps(now_ms, self.remote_data_validity_ms)
            .map(|remote| (remote.anchor_id, remote.sequence))
            .collect();
        if candidates.is_empty() {
            return None;
        }

        let usable = |&(candidate_id, sequence): &(AnchorId, u8)| {
            if candidate_id == anchor_id {
                return None;
            }
            let other = self.registry.get_active(candidate_id, now_ms)?;
            let heard_same_packet = other.local_rx_timestamp().is_some() && other.last_sequence_number() == sequence;
            let has_tof = current
                .valid_time_of_flight(candidate_id, now_ms, self.tof_validity_ms)
                .is_some();
            (heard_same_packet && has_tof).then_some(other)
        };

        match self.matching_algorithm {
            MatchingAlgorithm::Random => {
                let count = candidates.len();
                (0..count)
                    .map(|i| &candidates[offset.wrapping_add(i) % count])
                    .find_map(usable)
                    .map(AnchorContext::id)
            }
            MatchingAlgorithm::Youngest => candidates
                .iter()
                .filter_map(usable)
                .max_by_key(|other| other.last_seen_ms())
                .map(AnchorContext::id),
        }
    }

    /// Distance difference in metres between `current` (An) and `other` (Ar)
    fn distance_diff(
        &self,
        other: &AnchorContext,
        current: &AnchorContext,
        tx_an_in_cl_an: u64,
        rx_an_by_t_in_cl_t: u64,
        now_ms: u64,
    ) -> Option<f64> {
        let other_id = other.id();
        let tof_ar_to_an_in_cl_an = current.valid_time_of_flight(other_id, now_ms, self.tof_validity_ms)?;
        let rx_ar_by_an_in_cl_an = current.remote_timestamp(other_id)?.rx_timestamp;
        let clock_correction = current.clock_correction().get();
        let rx_ar_by_t_in_cl_t = other.local_rx_timestamp()?;

        let delta_tx_ar_to_tx_an_in_cl_an =
            tof_ar_to_an_in_cl_an + timestamp::elapsed(tx_an_in_cl_an, rx_ar_by_an_in_cl_an, ANCHOR_TIMESTAMP_BITS);
        let time_diff_of_arrival_in_cl_t = timestamp::elapsed(rx_an_by_t_in_cl_t, rx_ar_by_t_in_cl_t, TAG_TIMESTAMP_BITS)
            as f64
            - delta_tx_ar_to_tx_an_in_cl_an as f64 * clock_correction;

        Some(SPEED_OF_LIGHT * time_diff_of_arrival_in_cl_t / self.timestamp_frequency_hz)
    }
}

fn build_measurement(other: &AnchorContext, current: &AnchorContext, distance_diff: f64) -> Option<TdoaMeasurement> {
    Some(TdoaMeasurement {
        anchor_ids: [other.id(), current.id()],
        anchor_positions: [other.position()?, current.position()?],
        distance_diff: distance_diff as f32,
        std_dev: MEASUREMENT_NOISE_STD,
    })
}
