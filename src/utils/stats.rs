//! Ranging statistics owned by the engine instance.
//!
//! Counters are plain fields updated from the event callback; rates are
//! recomputed at a fixed interval. A configurable pair of anchors gets
//! detailed link telemetry for signal testing.

use crate::core::constants::{ANTENNA_OFFSET_M, M_PER_TICK};
use crate::core::types::{AnchorId, RxQuality, TdoaMeasurement};

/// Interval between rate recomputations (ms)
pub const STATS_INTERVAL_MS: u64 = 500;

/// Event counter with a rate sampled every [`STATS_INTERVAL_MS`]
#[derive(Debug, Clone, Default)]
pub struct RateCounter {
    count: u32,
    latest_count: u32,
    latest_rate: f32,
    latest_update_ms: u64,
}

impl RateCounter {
    pub fn event(&mut self) {
        self.count = self.count.wrapping_add(1);
    }

    /// Events since start
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Events per second over the last interval
    pub fn rate(&self) -> f32 {
        self.latest_rate
    }

    fn update(&mut self, now_ms: u64) {
        let dt_ms = now_ms.saturating_sub(self.latest_update_ms);
        if dt_ms > 0 {
            let events = self.count.wrapping_sub(self.latest_count);
            self.latest_rate = events as f32 * 1000.0 / dt_ms as f32;
        }
        self.latest_count = self.count;
        self.latest_update_ms = now_ms;
    }
}

/// Signal telemetry for one anchor of the tracked pair
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LinkTelemetry {
    /// SNR of the anchor's packets at the tag
    pub rx_snr: f32,
    /// Receive minus first path power of the anchor's packets at the tag
    pub rx_power_diff: f32,
    /// SNR the anchor reports for its neighbour
    pub reported_snr: f32,
    /// Power difference the anchor reports for its neighbour
    pub reported_power_diff: f32,
    /// Time of flight to the other anchor of the pair, in metres
    pub tof_m: f32,
}

#[derive(Debug, Clone)]
pub struct TdoaStats {
    packets_received: RateCounter,
    packets_to_estimator: RateCounter,
    context_hit: RateCounter,
    context_miss: RateCounter,
    time_is_good: RateCounter,
    suitable_data_found: RateCounter,
    clock_correction_count: RateCounter,

    not_tdoa_packets: u32,
    malformed_packets: u32,
    measurements_dropped: u32,
    control_packets_sent: u32,
    control_packets_dropped: u32,

    anchor_id: AnchorId,
    remote_anchor_id: AnchorId,
    tof: u16,
    clock_correction: f64,
    tdoa: f32,
    links: [LinkTelemetry; 2],

    next_update_ms: u64,
}

impl Default for TdoaStats {
    fn default() -> Self {
        Self::new(1, 2, 0)
    }
}

impl TdoaStats {
    pub fn new(anchor_id: AnchorId, remote_anchor_id: AnchorId, now_ms: u64) -> Self {
        let mut stats = Self {
            packets_received: RateCounter::default(),
            packets_to_estimator: RateCounter::default(),
            context_hit: RateCounter::default(),
            context_miss: RateCounter::default(),
            time_is_good: RateCounter::default(),
            suitable_data_found: RateCounter::default(),
            clock_correction_count: RateCounter::default(),
            not_tdoa_packets: 0,
            malformed_packets: 0,
            measurements_dropped: 0,
            control_packets_sent: 0,
            control_packets_dropped: 0,
            anchor_id,
            remote_anchor_id,
            tof: 0,
            clock_correction: 0.0,
            tdoa: 0.0,
            links: [LinkTelemetry::default(); 2],
            next_update_ms: now_ms + STATS_INTERVAL_MS,
        };
        stats.restart_rates(now_ms);
        stats
    }

    fn restart_rates(&mut self, now_ms: u64) {
        for counter in self.counters_mut() {
            counter.latest_update_ms = now_ms;
        }
    }

    fn counters_mut(&mut self) -> [&mut RateCounter; 7] {
        [
            &mut self.packets_received,
            &mut self.packets_to_estimator,
            &mut self.context_hit,
            &mut self.context_miss,
            &mut self.time_is_good,
            &mut self.suitable_data_found,
            &mut self.clock_correction_count,
        ]
    }

    /// Recompute rates once per interval
    pub fn update(&mut self, now_ms: u64) {
        if now_ms < self.next_update_ms {
            return;
        }
        for counter in self.counters_mut() {
            counter.update(now_ms);
        }
        self.next_update_ms = now_ms + STATS_INTERVAL_MS;
    }

    /// Change the anchor pair that gets detailed telemetry
    pub fn set_tracked_pair(&mut self, anchor_id: AnchorId, remote_anchor_id: AnchorId) {
        self.anchor_id = anchor_id;
        self.remote_anchor_id = remote_anchor_id;
        self.tof = 0;
        self.clock_correction = 0.0;
        self.tdoa = 0.0;
        self.links = [LinkTelemetry::default(); 2];
    }

    pub fn tracked_pair(&self) -> (AnchorId, AnchorId) {
        (self.anchor_id, self.remote_anchor_id)
    }

    fn link_mut(&mut self, anchor_id: AnchorId) -> Option<&mut LinkTelemetry> {
        if anchor_id == self.anchor_id {
            Some(&mut self.links[0])
        } else if anchor_id == self.remote_anchor_id {
            Some(&mut self.links[1])
        } else {
            None
        }
    }

    pub(crate) fn packet_received(&mut self) {
        self.packets_received.event();
    }

    pub(crate) fn context_lookup(&mut self, hit: bool) {
        if hit {
            self.context_hit.event();
        } else {
            self.context_miss.event();
        }
    }

    pub(crate) fn time_is_good(&mut self) {
        self.time_is_good.event();
    }

    pub(crate) fn suitable_data_found(&mut self) {
        self.suitable_data_found.event();
    }

    pub(crate) fn not_tdoa_packet(&mut self) {
        self.not_tdoa_packets = self.not_tdoa_packets.wrapping_add(1);
    }

    pub(crate) fn malformed_packet(&mut self) {
        self.malformed_packets = self.malformed_packets.wrapping_add(1);
    }

    pub(crate) fn control_packet_sent(&mut self) {
        self.control_packets_sent = self.control_packets_sent.wrapping_add(1);
    }

    pub(crate) fn control_packet_dropped(&mut self) {
        self.control_packets_dropped = self.control_packets_dropped.wrapping_add(1);
    }

    pub(crate) fn measurement_dropped(&mut self) {
        self.measurements_dropped = self.measurements_dropped.wrapping_add(1);
    }

    pub(crate) fn clock_correction_sample(&mut self, anchor_id: AnchorId, clock_correction: f64) {
        self.clock_correction_count.event();
        if anchor_id == self.anchor_id {
            self.clock_correction = clock_correction;
        }
    }

    pub(crate) fn rx_quality(&mut self, anchor_id: AnchorId, quality: &RxQuality) {
        if let Some(link) = self.link_mut(anchor_id) {
            link.rx_snr = quality.snr;
            link.rx_power_diff = quality.power_diff();
        }
    }

    pub(crate) fn anchor_report(&mut self, anchor_id: AnchorId, snr: f32, power_diff: f32) {
        if let Some(link) = self.link_mut(anchor_id) {
            link.reported_snr = snr;
            link.reported_power_diff = power_diff;
        }
    }

    /// Time of flight relayed by `anchor_id` towards `remote_id`, in ticks
    pub(crate) fn time_of_flight(&mut self, anchor_id: AnchorId, remote_id: AnchorId, ticks: u64) {
        let ticks = ticks.min(u16::MAX as u64) as u16;
        if anchor_id == self.anchor_id && remote_id == self.remote_anchor_id {
            self.tof = ticks;
        }
        if let Some(link) = self.link_mut(anchor_id) {
            link.tof_m = tof_to_metres(ticks);
        }
    }

    pub(crate) fn measurement_sent(&mut self, measurement: &TdoaMeasurement) {
        self.packets_to_estimator.event();
        if measurement.anchor_ids == [self.anchor_id, self.remote_anchor_id] {
            self.tdoa = measurement.distance_diff;
        }
    }

    pub fn packets_received(&self) -> &RateCounter {
        &self.packets_received
    }

    pub fn packets_to_estimator(&self) -> &RateCounter {
        &self.packets_to_estimator
    }

    pub fn context_hit(&self) -> &RateCounter {
        &self.context_hit
    }

    pub fn context_miss(&self) -> &RateCounter {
        &self.context_miss
    }

    pub fn time_is_good_rate(&self) -> &RateCounter {
        &self.time_is_good
    }

    pub fn suitable_data_found_rate(&self) -> &RateCounter {
        &self.suitable_data_found
    }

    pub fn clock_corrections(&self) -> &RateCounter {
        &self.clock_correction_count
    }

    pub fn not_tdoa_packets(&self) -> u32 {
        self.not_tdoa_packets
    }

    pub fn malformed_packets(&self) -> u32 {
        self.malformed_packets
    }

    pub fn measurements_dropped(&self) -> u32 {
        self.measurements_dropped
    }

    pub fn control_packets_sent(&self) -> u32 {
        self.control_packets_sent
    }

    pub fn control_packets_dropped(&self) -> u32 {
        self.control_packets_dropped
    }

    /// Raw time of flight between the tracked anchors, in ticks
    pub fn tracked_tof(&self) -> u16 {
        self.tof
    }

    pub fn tracked_clock_correction(&self) -> f64 {
        self.clock_correction
    }

    /// Latest distance difference between the tracked anchors (m)
    pub fn tracked_tdoa(&self) -> f32 {
        self.tdoa
    }

    /// Telemetry for the first and second anchor of the tracked pair
    pub fn tracked_links(&self) -> &[LinkTelemetry; 2] {
        &self.links
    }
}

/// Convert an anchor-reported time of flight to metres
pub fn tof_to_metres(ticks: u16) -> f32 {
    (ticks as f64 * M_PER_TICK - ANTENNA_OFFSET_M) as f32
}
