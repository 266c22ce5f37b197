//! Bounded registry of per-anchor ranging state.
//!
//! The tag may pass through an unbounded number of anchors but only hears a
//! handful at a time, so contexts live in a fixed number of slots. A slot is
//! keyed by the on-air anchor id, which is not a stable identity: everything
//! stored under an id is only trusted while the anchor keeps being heard,
//! i.e. within the inactivity window. Expired slots are swept lazily and the
//! least recently seen slot is reclaimed when a new id arrives at capacity.

use crate::algorithms::clock_correction::ClockCorrection;
use crate::core::constants::{ANCHOR_STORAGE_COUNT, REMOTE_ANCHOR_DATA_COUNT, TOF_PER_ANCHOR_COUNT};
use crate::core::types::AnchorId;
use heapless::Vec as BoundedVec;
use log::debug;
use nalgebra::Vector3;

/// Default inactivity window after which a context is considered gone (ms)
pub const DEFAULT_INACTIVITY_WINDOW_MS: u64 = 2_000;

/// Remote receive time relayed by an anchor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteTimestamp {
    pub anchor_id: AnchorId,
    pub rx_timestamp: u64,
    pub sequence: u8,
    pub updated_ms: u64,
}

/// Anchor-to-anchor time of flight in radio ticks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeOfFlight {
    pub anchor_id: AnchorId,
    pub ticks: u64,
    pub updated_ms: u64,
}

/// Receive/transmit pair of the latest packet sent by an anchor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxTxData {
    /// Tag clock at reception (40 bits)
    pub local_rx_timestamp: u64,
    /// Anchor clock at transmission (low 32 bits)
    pub remote_tx_timestamp: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnchorPosition {
    pub position: Vector3<f32>,
    pub updated_ms: u64,
}

/// Everything known about one anchor id
#[derive(Debug, Clone)]
pub struct AnchorContext {
    id: AnchorId,
    last_seen_ms: u64,
    last_sequence_number: u8,
    rx_tx: Option<RxTxData>,
    remote_timestamps: BoundedVec<RemoteTimestamp, REMOTE_ANCHOR_DATA_COUNT>,
    time_of_flight: BoundedVec<TimeOfFlight, TOF_PER_ANCHOR_COUNT>,
    position: Option<AnchorPosition>,
    clock_correction: ClockCorrection,
}

impl AnchorContext {
    pub fn new(id: AnchorId, now_ms: u64) -> Self {
        Self {
            id,
            last_seen_ms: now_ms,
            last_sequence_number: 0,
            rx_tx: None,
            remote_timestamps: BoundedVec::new(),
            time_of_flight: BoundedVec::new(),
            position: None,
            clock_correction: ClockCorrection::new(),
        }
    }

    pub fn id(&self) -> AnchorId {
        self.id
    }

    pub fn last_seen_ms(&self) -> u64 {
        self.last_seen_ms
    }

    /// Mark the anchor as heard; never moves backwards
    pub fn refresh(&mut self, now_ms: u64) {
        self.last_seen_ms = self.last_seen_ms.max(now_ms);
    }

    pub fn last_sequence_number(&self) -> u8 {
        self.last_sequence_number
    }

    pub fn rx_tx(&self) -> Option<RxTxData> {
        self.rx_tx
    }

    /// Tag receive time of this anchor's latest packet, if any
    pub fn local_rx_timestamp(&self) -> Option<u64> {
        self.rx_tx.map(|data| data.local_rx_timestamp)
    }

    pub fn remote_tx_timestamp(&self) -> Option<u64> {
        self.rx_tx.map(|data| data.remote_tx_timestamp)
    }

    /// Store the timestamps and sequence number of a packet this anchor sent
    pub fn set_rx_tx_data(&mut self, local_rx_timestamp: u64, remote_tx_timestamp: u64, sequence: u8) {
        self.rx_tx = Some(RxTxData {
            local_rx_timestamp,
            remote_tx_timestamp,
        });
        self.last_sequence_number = sequence;
    }

    pub fn remote_timestamps(&self) -> &[RemoteTimestamp] {
        &self.remote_timestamps
    }

    pub fn remote_timestamp(&self, anchor_id: AnchorId) -> Option<&RemoteTimestamp> {
        self.remote_timestamps.iter().find(|entry| entry.anchor_id == anchor_id)
    }

    /// Remote timestamps updated within `max_age_ms`
    pub fn valid_remote_timestamps(&self, now_ms: u64, max_age_ms: u64) -> impl Iterator<Item = &RemoteTimestamp> + '_ {
        self.remote_timestamps
            .iter()
            .filter(move |entry| now_ms.saturating_sub(entry.updated_ms) <= max_age_ms)
    }

    pub fn set_remote_timestamp(&mut self, anchor_id: AnchorId, rx_timestamp: u64, sequence: u8, now_ms: u64) {
        let entry = RemoteTimestamp {
            anchor_id,
            rx_timestamp,
            sequence,
            updated_ms: now_ms,
        };
        upsert(&mut self.remote_timestamps, entry, |e| e.anchor_id, |e| e.updated_ms);
    }

    pub fn time_of_flight(&self, anchor_id: AnchorId) -> Option<&TimeOfFlight> {
        self.time_of_flight.iter().find(|entry| entry.anchor_id == anchor_id)
    }

    /// Time of flight towards `anchor_id` if updated within `max_age_ms`
    pub fn valid_time_of_flight(&self, anchor_id: AnchorId, now_ms: u64, max_age_ms: u64) -> Option<u64> {
        self.time_of_flight(anchor_id)
            .filter(|entry| now_ms.saturating_sub(entry.updated_ms) <= max_age_ms)
            .map(|entry| entry.ticks)
    }

    pub fn set_time_of_flight(&mut self, anchor_id: AnchorId, ticks: u64, now_ms: u64) {
        let entry = TimeOfFlight {
            anchor_id,
            ticks,
            updated_ms: now_ms,
        };
        upsert(&mut self.time_of_flight, entry, |e| e.anchor_id, |e| e.updated_ms);
    }

    pub fn position(&self) -> Option<Vector3<f32>> {
        self.position.map(|p| p.position)
    }

    pub fn set_position(&mut self, position: Vector3<f32>, now_ms: u64) {
        self.position = Some(AnchorPosition {
            position,
            updated_ms: now_ms,
        });
    }

    pub fn clock_correction(&self) -> &ClockCorrection {
        &self.clock_correction
    }

    pub fn clock_correction_mut(&mut self) -> &mut ClockCorrection {
        &mut self.clock_correction
    }
}

/// Replace the entry with the same key, else append, else overwrite the
/// stalest entry
fn upsert<T, const N: usize>(
    entries: &mut BoundedVec<T, N>,
    entry: T,
    key: impl Fn(&T) -> AnchorId,
    updated: impl Fn(&T) -> u64,
) {
    if let Some(index) = entries.iter().position(|e| key(e) == key(&entry)) {
        entries[index] = entry;
        return;
    }
    if let Err(entry) = entries.push(entry) {
        if let Some(index) = entries
            .iter()
            .enumerate()
            .min_by_key(|(_, e)| updated(*e))
            .map(|(index, _)| index)
        {
            entries[index] = entry;
        }
    }
}

/// Fixed-capacity store of anchor contexts
#[derive(Debug, Clone)]
pub struct AnchorRegistry {
    contexts: BoundedVec<AnchorContext, ANCHOR_STORAGE_COUNT>,
    inactivity_window_ms: u64,
}

impl Default for AnchorRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_INACTIVITY_WINDOW_MS)
    }
}

impl AnchorRegistry {
    pub fn new(inactivity_window_ms: u64) -> Self {
        Self {
            contexts: BoundedVec::new(),
            inactivity_window_ms,
        }
    }

    pub fn capacity(&self) -> usize {
        ANCHOR_STORAGE_COUNT
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    pub fn inactivity_window_ms(&self) -> u64 {
        self.inactivity_window_ms
    }

    fn slot_of(&self, id: AnchorId) -> Option<usize> {
        self.contexts.iter().position(|ctx| ctx.id == id)
    }

    fn is_expired(&self, ctx: &AnchorContext, now_ms: u64) -> bool {
        now_ms.saturating_sub(ctx.last_seen_ms) > self.inactivity_window_ms
    }

    pub fn contains(&self, id: AnchorId) -> bool {
        self.slot_of(id).is_some()
    }

    /// Context for `id`, created empty if unknown; refreshes its last-seen time.
    ///
    /// At capacity only the least recently seen context is reclaimed; the rest
    /// stay untouched even if expired.
    pub fn get_or_create(&mut self, id: AnchorId, now_ms: u64) -> &mut AnchorContext {
        if let Some(slot) = self.slot_of(id) {
            let ctx = &mut self.contexts[slot];
            ctx.refresh(now_ms);
            return ctx;
        }

        let slot = match self.contexts.push(AnchorContext::new(id, now_ms)) {
            Ok(()) => self.contexts.len() - 1,
            Err(fresh) => {
                let slot = self.least_recently_seen().unwrap_or(0);
                debug!("Registry full, reclaiming slot of anchor {} for anchor {}", self.contexts[slot].id, id);
                self.contexts[slot] = fresh;
                slot
            }
        };
        &mut self.contexts[slot]
    }

    /// Read-only lookup; neither refreshes nor creates
    pub fn get(&self, id: AnchorId) -> Option<&AnchorContext> {
        self.slot_of(id).map(|slot| &self.contexts[slot])
    }

    /// Lookup restricted to contexts seen within the inactivity window
    pub fn get_active(&self, id: AnchorId, now_ms: u64) -> Option<&AnchorContext> {
        self.get(id).filter(|ctx| !self.is_expired(ctx, now_ms))
    }

    pub fn get_mut(&mut self, id: AnchorId) -> Option<&mut AnchorContext> {
        match self.slot_of(id) {
            Some(slot) => Some(&mut self.contexts[slot]),
            None => None,
        }
    }

    /// Refresh an already tracked anchor without creating one
    pub fn touch(&mut self, id: AnchorId, now_ms: u64) -> bool {
        match self.get_mut(id) {
            Some(ctx) => {
                ctx.refresh(now_ms);
                true
            }
            None => false,
        }
    }

    /// Drop every context not seen within the inactivity window
    pub fn evict_expired(&mut self, now_ms: u64) -> usize {
        let window = self.inactivity_window_ms;
        let before = self.contexts.len();
        self.contexts
            .retain(|ctx| now_ms.saturating_sub(ctx.last_seen_ms) <= window);
        let removed = before - self.contexts.len();
        if removed > 0 {
            debug!("Evicted {} inactive anchor contexts", removed);
        }
        removed
    }

    fn least_recently_seen(&self) -> Option<usize> {
        self.contexts
            .iter()
            .enumerate()
            .min_by_key(|(_, ctx)| ctx.last_seen_ms)
            .map(|(slot, _)| slot)
    }

    /// Ids of every stored context, expired or not
    pub fn ids(&self) -> BoundedVec<AnchorId, ANCHOR_STORAGE_COUNT> {
        self.contexts.iter().map(|ctx| ctx.id).collect()
    }

    /// Ids of contexts seen within the inactivity window
    pub fn active_ids(&self, now_ms: u64) -> BoundedVec<AnchorId, ANCHOR_STORAGE_COUNT> {
        self.contexts
            .iter()
            .filter(|ctx| !self.is_expired(ctx, now_ms))
            .map(|ctx| ctx.id)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AnchorContext> {
        self.contexts.iter()
    }

    pub fn clear(&mut self) {
        self.contexts.clear();
    }
}
