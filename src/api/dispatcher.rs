//! Radio event handling for a TDOA3 tag.
//!
//! The radio driver calls [`Tdoa3Tag::on_event`] from its event loop. Every
//! event is handled to completion without blocking; afterwards the tag either
//! transmits a pending control packet or re-arms reception.

use crate::algorithms::tdoa_engine::TdoaEngine;
use crate::api::emitter::MeasurementEmitter;
use crate::api::types::{LppShortPacket, LppSource, MeasurementSink};
use crate::core::constants::{ANCHOR_STORAGE_COUNT, MAX_TIMEOUT};
use crate::core::timestamp::{self, TAG_TIMESTAMP_BITS};
use crate::core::types::AnchorId;
use crate::hardware::{CommError, CommResult, RadioInterface, RxFrame};
use crate::processing::mac::{self, MacHeader, TAG_SHORT_ADDRESS};
use crate::processing::parser::{self, ControlPacket, DecodedPayload};
use crate::processing::relay;
use crate::utils::config::{ConfigResult, TagConfig};
use crate::utils::stats::TdoaStats;
use heapless::Vec as BoundedVec;
use log::{debug, error};
use nalgebra::Vector3;

/// Everything the radio can report to the tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioEvent {
    PacketReceived,
    PacketSent,
    Timeout,
    ReceiveTimeout,
    /// Not expected while only listening for broadcasts
    ReceiveFailed,
}

pub struct Tdoa3Tag<S, L> {
    engine: TdoaEngine,
    emitter: MeasurementEmitter,
    sink: S,
    lpp_source: L,
    receive_timeout: u16,
    tx_sequence: u8,
    ranging_ok: bool,
}

impl<S: MeasurementSink, L: LppSource> Tdoa3Tag<S, L> {
    pub fn new(config: &TagConfig, sink: S, lpp_source: L, now_ms: u64) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self {
            engine: TdoaEngine::new(config, now_ms),
            emitter: MeasurementEmitter::new(config.two_d_height),
            sink,
            lpp_source,
            receive_timeout: config.receive_timeout,
            tx_sequence: 0,
            ranging_ok: false,
        })
    }

    /// Configure the radio for listening
    pub fn initialize<R: RadioInterface + ?Sized>(&mut self, radio: &mut R) -> CommResult<()> {
        if let Some(height) = self.emitter.two_d_height() {
            debug!("2D positioning enabled at {} m height", height);
        }
        radio.set_receive_timeout(self.receive_timeout)?;
        radio.commit_configuration()?;
        self.ranging_ok = false;
        Ok(())
    }

    /// Handle one radio event; returns the time until the next timeout event
    pub fn on_event<R: RadioInterface + ?Sized>(
        &mut self,
        radio: &mut R,
        event: RadioEvent,
        now_ms: u64,
    ) -> CommResult<u32> {
        let handled = match event {
            RadioEvent::PacketReceived => self.handle_packet(radio, now_ms),
            RadioEvent::Timeout | RadioEvent::ReceiveTimeout => Ok(()),
            // The radio goes back to receive by itself after a control packet
            RadioEvent::PacketSent => Ok(()),
            RadioEvent::ReceiveFailed => {
                error!("Unexpected radio event {:?}", event);
                debug_assert!(false, "Unexpected radio event {:?}", event);
                Ok(())
            }
        };

        // The radio must end up transmitting or listening, whatever happened above
        let armed = if self.send_lpp(radio) {
            Ok(())
        } else {
            radio.start_receive()
        };

        self.engine.stats_mut().update(now_ms);
        handled.and(armed)?;
        Ok(MAX_TIMEOUT)
    }

    fn handle_packet<R: RadioInterface + ?Sized>(&mut self, radio: &mut R, now_ms: u64) -> CommResult<()> {
        let Some(frame) = radio.read_frame()? else {
            debug!("Receive event without a frame");
            return Ok(());
        };
        self.engine.stats_mut().packet_received();
        self.process_frame(&frame, now_ms);
        Ok(())
    }

    fn process_frame(&mut self, frame: &RxFrame, now_ms: u64) {
        let mac_frame = match mac::decode_frame(&frame.data) {
            Ok(mac_frame) => mac_frame,
            Err(e) => {
                self.engine.stats_mut().malformed_packet();
                debug!("Dropping frame: {}", e);
                return;
            }
        };
        let anchor_id = mac_frame.header.source_anchor_id();
        self.engine.stats_mut().rx_quality(anchor_id, &frame.quality);

        let packet = match parser::decode(mac_frame.payload) {
            Ok(DecodedPayload::Range(packet)) => packet,
            Ok(DecodedPayload::NotTdoa { packet_type }) => {
                self.engine.stats_mut().not_tdoa_packet();
                debug!("Ignoring packet type 0x{:02x} from anchor {}", packet_type, anchor_id);
                return;
            }
            Err(e) => {
                self.engine.stats_mut().malformed_packet();
                debug!("Dropping packet from anchor {}: {}", anchor_id, e);
                return;
            }
        };

        let tx_an_in_cl_an = packet.header.tx_timestamp as u64;
        let rx_an_by_t_in_cl_t = timestamp::truncate(frame.rx_timestamp, TAG_TIMESTAMP_BITS);

        let sender = self.engine.begin_packet(anchor_id, now_ms);
        let range_length = relay::apply(&packet, sender, now_ms);

        for record in &packet.records {
            if record.anchor_id != anchor_id && record.rx_timestamp != 0 {
                self.engine.registry_mut().touch(record.anchor_id, now_ms);
            }
            if let Some(distance) = record.distance.filter(|&d| d != 0) {
                self.engine
                    .stats_mut()
                    .time_of_flight(anchor_id, record.anchor_id, distance as u64);
            }
        }

        if let Some(measurement) = self
            .engine
            .process_packet(anchor_id, tx_an_in_cl_an, rx_an_by_t_in_cl_t, now_ms)
        {
            self.emitter
                .emit(&mut self.sink, measurement, now_ms, self.engine.stats_mut());
        }

        self.engine
            .record_rx_tx(anchor_id, rx_an_by_t_in_cl_t, tx_an_in_cl_an, packet.header.sequence);

        let control = mac_frame.payload.get(range_length..).unwrap_or(&[]);
        self.handle_control(anchor_id, control, now_ms);

        self.ranging_ok = true;
    }

    fn handle_control(&mut self, anchor_id: AnchorId, section: &[u8], now_ms: u64) {
        match parser::decode_control(section) {
            Ok(Some(ControlPacket::AnchorPosition(report))) => {
                if let Some(ctx) = self.engine.registry_mut().get_mut(anchor_id) {
                    ctx.set_position(report.position, now_ms);
                }
                if let (Some(snr), Some(power_diff)) = (report.snr, report.power_diff) {
                    self.engine.stats_mut().anchor_report(anchor_id, snr, power_diff);
                }
            }
            Ok(Some(ControlPacket::Unknown { lpp_type })) => {
                debug!("Ignoring LPP type 0x{:02x} from anchor {}", lpp_type, anchor_id);
            }
            Ok(None) => {}
            Err(e) => debug!("Bad control section from anchor {}: {}", anchor_id, e),
        }
    }

    /// Transmit the next pending control packet; false if nothing went out.
    ///
    /// A packet that cannot be framed or sent is dropped and counted.
    fn send_lpp<R: RadioInterface + ?Sized>(&mut self, radio: &mut R) -> bool {
        let Some(packet) = self.lpp_source.next_packet() else {
            return false;
        };
        let sent = self
            .build_lpp_frame(&packet)
            .and_then(|frame| radio.idle().and_then(|()| radio.start_transmit(&frame)));
        match sent {
            Ok(()) => {
                self.engine.stats_mut().control_packet_sent();
                true
            }
            Err(e) => {
                error!("Dropping control packet for anchor {}: {}", packet.dest, e);
                self.engine.stats_mut().control_packet_dropped();
                false
            }
        }
    }

    fn build_lpp_frame(&mut self, packet: &LppShortPacket) -> CommResult<Vec<u8>> {
        let to_comm_error = |e: parser::CodecError| CommError::InvalidFrame { details: e.to_string() };

        let mut payload = Vec::with_capacity(1 + packet.data.len());
        parser::encode_lpp_short(&packet.data, &mut payload).map_err(to_comm_error)?;

        let header = MacHeader::data(
            self.tx_sequence,
            mac::lps_address(packet.dest),
            mac::lps_address(TAG_SHORT_ADDRESS),
        );
        self.tx_sequence = self.tx_sequence.wrapping_add(1);

        let mut frame = Vec::new();
        mac::encode_frame(&header, &payload, &mut frame).map_err(to_comm_error)?;
        Ok(frame)
    }

    /// True once a TDOA3 packet has been processed since initialisation
    pub fn is_ranging_ok(&self) -> bool {
        self.ranging_ok
    }

    /// Last announced position of a stored anchor
    pub fn anchor_position(&self, anchor_id: AnchorId) -> Option<Vector3<f32>> {
        self.engine.registry().get(anchor_id)?.position()
    }

    pub fn anchor_ids(&self) -> BoundedVec<AnchorId, ANCHOR_STORAGE_COUNT> {
        self.engine.registry().ids()
    }

    pub fn active_anchor_ids(&self, now_ms: u64) -> BoundedVec<AnchorId, ANCHOR_STORAGE_COUNT> {
        self.engine.registry().active_ids(now_ms)
    }

    /// Drop contexts not heard from within the inactivity window
    pub fn sweep(&mut self, now_ms: u64) -> usize {
        self.engine.registry_mut().evict_expired(now_ms)
    }

    pub fn engine(&self) -> &TdoaEngine {
        &self.engine
    }

    pub fn stats(&self) -> &TdoaStats {
        self.engine.stats()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::types::NoLpp;
    use crate::core::constants::{LPP_HEADER_SHORT_PACKET, M_PER_TICK};
    use crate::core::types::{EstimatorInput, RxQuality};
    use crate::hardware::simulator::{AnchorSimulator, SimulatorConfig};
    use crate::hardware::MockRadio;
    use crate::processing::mac::LPS_PAN_ID;
    use crate::processing::parser::{
        encode_anchor_position, encode_range_packet, AnchorPositionReport, RangeHeader, RangePacket, RemoteRecord,
    };

    type TestTag = Tdoa3Tag<Vec<EstimatorInput>, NoLpp>;

    fn tag() -> TestTag {
        Tdoa3Tag::new(&TagConfig::default(), Vec::new(), NoLpp, 0).unwrap()
    }

    fn range_frame(
        anchor_id: AnchorId,
        sequence: u8,
        tx_timestamp: u32,
        records: &[RemoteRecord],
        position: Option<[f32; 3]>,
    ) -> Vec<u8> {
        let packet = RangePacket {
            header: RangeHeader {
                sequence,
                tx_timestamp,
                remote_count: records.len() as u8,
            },
            records: records.iter().copied().collect(),
        };
        let mut payload = Vec::new();
        encode_range_packet(&packet, &mut payload);
        if let Some([x, y, z]) = position {
            let report = AnchorPositionReport {
                position: Vector3::new(x, y, z),
                snr: None,
                power_diff: None,
            };
            encode_anchor_position(&report, &mut payload);
        }
        raw_frame(anchor_id, &payload)
    }

    fn raw_frame(anchor_id: AnchorId, payload: &[u8]) -> Vec<u8> {
        let header = MacHeader::data(0, u64::MAX, mac::lps_address(anchor_id));
        let mut frame = Vec::new();
        mac::encode_frame(&header, payload, &mut frame).unwrap();
        frame
    }

    fn deliver<S: MeasurementSink, L: LppSource>(
        tag: &mut Tdoa3Tag<S, L>,
        radio: &mut MockRadio,
        data: Vec<u8>,
        rx_timestamp: u64,
        now_ms: u64,
    ) {
        radio.add_frame(RxFrame::new(data, rx_timestamp));
        let timeout = tag.on_event(radio, RadioEvent::PacketReceived, now_ms).unwrap();
        assert_eq!(timeout, MAX_TIMEOUT);
    }

    fn tdoa_measurements(inputs: &[EstimatorInput]) -> Vec<&crate::core::types::TdoaMeasurement> {
        inputs
            .iter()
            .filter_map(|input| match input {
                EstimatorInput::Tdoa(m) => Some(m),
                EstimatorInput::AbsoluteHeight(_) => None,
            })
            .collect()
    }

    #[test]
    fn test_initialize_configures_radio() {
        let mut tag = tag();
        let mut radio = MockRadio::new();
        tag.initialize(&mut radio).unwrap();
        assert_eq!(radio.receive_timeout(), Some(10_000));
        assert_eq!(radio.configuration_commits(), 1);
        assert!(!tag.is_ranging_ok());
    }

    #[test]
    fn test_two_anchors_produce_one_measurement() {
        const A: AnchorId = 1;
        const B: AnchorId = 2;
        let mut tag = tag();
        let mut radio = MockRadio::new();

        deliver(&mut tag, &mut radio, range_frame(B, 0, 1_000_000, &[], Some([1.0, 0.0, 0.0])), 1_001_000, 0);
        deliver(&mut tag, &mut radio, range_frame(B, 1, 2_000_000, &[], None), 2_001_000, 5);
        deliver(&mut tag, &mut radio, range_frame(A, 5, 3_000_000, &[], Some([0.0, 0.0, 0.0])), 3_002_000, 10);
        assert!(tag.sink().is_empty());

        let relayed = RemoteRecord {
            anchor_id: A,
            sequence: 5,
            rx_timestamp: 3_001_500,
            distance: Some(1_500),
        };
        deliver(&mut tag, &mut radio, range_frame(B, 2, 4_000_000, &[relayed], None), 4_001_000, 15);

        let measurements = tdoa_measurements(tag.sink());
        assert_eq!(measurements.len(), 1);
        let m = measurements[0];
        assert_eq!(m.anchor_ids, [A, B]);
        assert_eq!(m.anchor_positions, [Vector3::new(0.0, 0.0, 0.0), Vector3::new(1.0, 0.0, 0.0)]);
        assert!((m.distance_diff as f64 + 1_000.0 * M_PER_TICK).abs() < 1e-3);

        assert_eq!(tag.stats().tracked_tdoa(), m.distance_diff);
        assert_eq!(tag.stats().tracked_tof(), 0);
        assert_eq!(tag.stats().packets_received().count(), 4);
        assert_eq!(radio.receive_starts(), 4);
        assert!(tag.is_ranging_ok());
    }

    #[test]
    fn test_relay_and_trailing_position() {
        let mut tag = tag();
        let mut radio = MockRadio::new();
        let records = [
            RemoteRecord {
                anchor_id: 3,
                sequence: 1,
                rx_timestamp: 1_000,
                distance: Some(500),
            },
            RemoteRecord {
                anchor_id: 9,
                sequence: 2,
                rx_timestamp: 2_000,
                distance: None,
            },
        ];
        deliver(&mut tag, &mut radio, range_frame(7, 4, 123, &records, Some([1.0, 2.0, 3.0])), 50, 100);

        let ctx = tag.engine().registry().get(7).unwrap();
        assert_eq!(ctx.remote_timestamp(3).unwrap().rx_timestamp, 1_000);
        assert_eq!(ctx.remote_timestamp(9).unwrap().sequence, 2);
        assert_eq!(ctx.time_of_flight(3).unwrap().ticks, 500);
        assert!(ctx.time_of_flight(9).is_none());
        assert_eq!(ctx.rx_tx().unwrap().remote_tx_timestamp, 123);
        assert_eq!(ctx.last_sequence_number(), 4);
        assert_eq!(tag.anchor_position(7), Some(Vector3::new(1.0, 2.0, 3.0)));

        // Referenced anchors are not created
        assert_eq!(&tag.anchor_ids()[..], &[7]);
    }

    #[test]
    fn test_referenced_anchor_is_refreshed() {
        let mut tag = tag();
        let mut radio = MockRadio::new();
        deliver(&mut tag, &mut radio, range_frame(3, 0, 10, &[], None), 10, 0);

        let record = RemoteRecord {
            anchor_id: 3,
            sequence: 0,
            rx_timestamp: 99,
            distance: None,
        };
        deliver(&mut tag, &mut radio, range_frame(7, 0, 10, &[record], None), 20, 1_500);

        assert_eq!(tag.engine().registry().get(3).unwrap().last_seen_ms(), 1_500);
        assert_eq!(tag.active_anchor_ids(3_000).len(), 2);
    }

    #[test]
    fn test_unheard_anchor_is_not_refreshed() {
        let mut tag = tag();
        let mut radio = MockRadio::new();
        deliver(&mut tag, &mut radio, range_frame(3, 0, 10, &[], None), 10, 0);

        // Anchor 7 did not hear anchor 3: zero receive timestamp
        let record = RemoteRecord {
            anchor_id: 3,
            sequence: 0,
            rx_timestamp: 0,
            distance: None,
        };
        deliver(&mut tag, &mut radio, range_frame(7, 0, 10, &[record], None), 20, 1_500);

        assert_eq!(tag.engine().registry().get(3).unwrap().last_seen_ms(), 0);
        assert_eq!(&tag.active_anchor_ids(2_500)[..], &[7]);
    }

    #[test]
    fn test_receive_timeout_rearms_without_mutation() {
        let mut tag = tag();
        let mut radio = MockRadio::new();

        let timeout = tag.on_event(&mut radio, RadioEvent::ReceiveTimeout, 10).unwrap();
        assert_eq!(timeout, MAX_TIMEOUT);
        assert_eq!(radio.receive_starts(), 1);
        assert!(radio.sent_frames().is_empty());
        assert!(tag.engine().registry().is_empty());
        assert!(!tag.is_ranging_ok());

        tag.on_event(&mut radio, RadioEvent::Timeout, 20).unwrap();
        tag.on_event(&mut radio, RadioEvent::PacketSent, 30).unwrap();
        assert_eq!(radio.receive_starts(), 3);
        assert!(tag.engine().registry().is_empty());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "Unexpected radio event")]
    fn test_receive_failed_is_loud() {
        let mut tag = tag();
        let mut radio = MockRadio::new();
        let _ = tag.on_event(&mut radio, RadioEvent::ReceiveFailed, 0);
    }

    #[test]
    fn test_pending_lpp_packet_is_transmitted() {
        let (lpp_tx, lpp_rx) = crossbeam_channel::unbounded();
        let mut tag = Tdoa3Tag::new(&TagConfig::default(), Vec::<EstimatorInput>::new(), lpp_rx, 0).unwrap();
        let mut radio = MockRadio::new();

        lpp_tx.send(LppShortPacket::new(5, &[0x11, 0x22, 0x33]).unwrap()).unwrap();
        tag.on_event(&mut radio, RadioEvent::Timeout, 0).unwrap();

        assert_eq!(radio.receive_starts(), 0);
        assert_eq!(radio.idle_count(), 1);
        assert_eq!(radio.sent_frames().len(), 1);
        assert_eq!(tag.stats().control_packets_sent(), 1);

        let sent = mac::decode_frame(&radio.sent_frames()[0]).unwrap();
        assert_eq!(sent.header.pan, LPS_PAN_ID);
        assert_eq!(sent.header.source, 0xbccf_0000_0000_00ff);
        assert_eq!(sent.header.destination, 0xbccf_0000_0000_0005);
        assert_eq!(sent.payload, &[LPP_HEADER_SHORT_PACKET, 0x11, 0x22, 0x33]);

        // Queue drained: back to listening
        tag.on_event(&mut radio, RadioEvent::PacketSent, 1).unwrap();
        assert_eq!(radio.receive_starts(), 1);
    }

    /// Radio whose reads or transmissions fail on demand
    #[derive(Default)]
    struct FailingRadio {
        fail_read: bool,
        fail_transmit: bool,
        receive_starts: u32,
        idles: u32,
        transmitted: u32,
    }

    impl RadioInterface for FailingRadio {
        fn set_receive_timeout(&mut self, _timeout: u16) -> CommResult<()> {
            Ok(())
        }

        fn commit_configuration(&mut self) -> CommResult<()> {
            Ok(())
        }

        fn read_frame(&mut self) -> CommResult<Option<RxFrame>> {
            if self.fail_read {
                return Err(CommError::HardwareError {
                    code: 1,
                    description: "read failed".to_string(),
                });
            }
            Ok(None)
        }

        fn start_receive(&mut self) -> CommResult<()> {
            self.receive_starts += 1;
            Ok(())
        }

        fn start_transmit(&mut self, _frame: &[u8]) -> CommResult<()> {
            if self.fail_transmit {
                return Err(CommError::HardwareError {
                    code: 2,
                    description: "transmit failed".to_string(),
                });
            }
            self.transmitted += 1;
            Ok(())
        }

        fn idle(&mut self) -> CommResult<()> {
            self.idles += 1;
            Ok(())
        }
    }

    #[test]
    fn test_read_failure_still_rearms_receive() {
        let mut tag = tag();
        let mut radio = FailingRadio {
            fail_read: true,
            ..FailingRadio::default()
        };

        let result = tag.on_event(&mut radio, RadioEvent::PacketReceived, 0);
        assert!(matches!(result, Err(CommError::HardwareError { code: 1, .. })));
        assert_eq!(radio.receive_starts, 1);

        // Next event works normally
        radio.fail_read = false;
        assert_eq!(tag.on_event(&mut radio, RadioEvent::PacketReceived, 1).unwrap(), MAX_TIMEOUT);
        assert_eq!(radio.receive_starts, 2);
    }

    #[test]
    fn test_transmit_failure_falls_back_to_receive() {
        let (lpp_tx, lpp_rx) = crossbeam_channel::unbounded();
        let mut tag = Tdoa3Tag::new(&TagConfig::default(), Vec::<EstimatorInput>::new(), lpp_rx, 0).unwrap();
        let mut radio = FailingRadio {
            fail_transmit: true,
            ..FailingRadio::default()
        };

        lpp_tx.send(LppShortPacket::new(5, &[0x01]).unwrap()).unwrap();
        assert_eq!(tag.on_event(&mut radio, RadioEvent::Timeout, 0).unwrap(), MAX_TIMEOUT);

        assert_eq!(radio.idles, 1);
        assert_eq!(radio.transmitted, 0);
        assert_eq!(radio.receive_starts, 1);
        assert_eq!(tag.stats().control_packets_sent(), 0);
        assert_eq!(tag.stats().control_packets_dropped(), 1);
    }

    #[test]
    fn test_foreign_and_malformed_packets_ignored() {
        let mut tag = tag();
        let mut radio = MockRadio::new();

        deliver(&mut tag, &mut radio, raw_frame(4, &[0x21, 0x00, 0x01]), 10, 0);
        assert_eq!(tag.stats().not_tdoa_packets(), 1);

        // Claims two records but carries one short record
        let mut truncated = vec![0x30, 0x01, 0, 0, 0, 0, 2];
        truncated.extend_from_slice(&[3, 0x01, 1, 0, 0, 0]);
        deliver(&mut tag, &mut radio, raw_frame(4, &truncated), 20, 1);

        // Too short for a MAC header
        deliver(&mut tag, &mut radio, vec![0x41, 0xdc, 0x00], 30, 2);

        assert_eq!(tag.stats().malformed_packets(), 2);
        assert_eq!(tag.stats().packets_received().count(), 3);
        assert!(tag.engine().registry().is_empty());
        assert!(!tag.is_ranging_ok());
        assert_eq!(radio.receive_starts(), 3);
    }

    #[test]
    fn test_unknown_control_type_ignored() {
        let mut tag = tag();
        let mut radio = MockRadio::new();
        let mut payload = vec![0x30, 0x00, 1, 0, 0, 0, 0];
        payload.extend_from_slice(&[LPP_HEADER_SHORT_PACKET, 0x7e, 1, 2, 3]);
        deliver(&mut tag, &mut radio, raw_frame(6, &payload), 10, 0);

        assert!(tag.is_ranging_ok());
        assert_eq!(tag.anchor_position(6), None);
    }

    #[test]
    fn test_rx_quality_feeds_tracked_pair() {
        let mut tag = tag();
        let mut radio = MockRadio::new();
        let quality = RxQuality {
            first_path_power: -90.0,
            receive_power: -85.0,
            snr: 9.0,
        };
        radio.add_frame(RxFrame::new(range_frame(2, 0, 1, &[], None), 1).with_quality(quality));
        tag.on_event(&mut radio, RadioEvent::PacketReceived, 0).unwrap();

        let link = tag.stats().tracked_links()[1];
        assert_eq!(link.rx_snr, 9.0);
        assert!((link.rx_power_diff - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_sweep_evicts_silent_anchors() {
        let mut tag = tag();
        let mut radio = MockRadio::new();
        deliver(&mut tag, &mut radio, range_frame(1, 0, 1, &[], None), 1, 0);
        deliver(&mut tag, &mut radio, range_frame(2, 0, 1, &[], None), 1, 1_000);

        assert_eq!(tag.active_anchor_ids(2_500).len(), 1);
        assert_eq!(tag.sweep(2_500), 1);
        assert_eq!(&tag.anchor_ids()[..], &[2]);
    }

    fn run_simulation(config: SimulatorConfig, tag_config: TagConfig, slots: usize) -> (Vec<EstimatorInput>, AnchorSimulator) {
        let mut sim = AnchorSimulator::new(config).unwrap();
        let mut tag = Tdoa3Tag::new(&tag_config, Vec::<EstimatorInput>::new(), NoLpp, 0).unwrap();
        let mut radio = MockRadio::new();
        tag.initialize(&mut radio).unwrap();

        for _ in 0..slots {
            let transmission = sim.next_transmission().unwrap();
            match transmission.frame {
                Some(frame) => {
                    radio.add_frame(frame);
                    tag.on_event(&mut radio, RadioEvent::PacketReceived, transmission.now_ms)
                        .unwrap();
                }
                None => {
                    tag.on_event(&mut radio, RadioEvent::ReceiveTimeout, transmission.now_ms)
                        .unwrap();
                }
            }
        }
        (std::mem::take(tag.sink_mut()), sim)
    }

    #[test]
    fn test_simulated_constellation_matches_geometry() {
        let (inputs, sim) = run_simulation(SimulatorConfig::default(), TagConfig::default(), 400);
        let measurements = tdoa_measurements(&inputs);
        assert!(measurements.len() > 100);

        for m in measurements {
            let expected = sim.expected_distance_diff(m.anchor_ids).unwrap();
            assert!(
                (m.distance_diff as f64 - expected).abs() < 0.05,
                "{:?}: {} vs {}",
                m.anchor_ids,
                m.distance_diff,
                expected
            );
        }
    }

    #[test]
    fn test_simulated_loss_and_2d_height() {
        let config = SimulatorConfig {
            loss_probability: 0.2,
            ..SimulatorConfig::default()
        };
        let tag_config = TagConfig {
            two_d_height: Some(1.0),
            matching_algorithm: crate::algorithms::tdoa_engine::MatchingAlgorithm::Youngest,
            ..TagConfig::default()
        };
        let (inputs, sim) = run_simulation(config, tag_config, 400);

        let measurements = tdoa_measurements(&inputs);
        assert!(!measurements.is_empty());
        for m in &measurements {
            let expected = sim.expected_distance_diff(m.anchor_ids).unwrap();
            assert!((m.distance_diff as f64 - expected).abs() < 0.05);
        }
        // One height per measurement
        assert_eq!(inputs.len(), measurements.len() * 2);
    }
}
