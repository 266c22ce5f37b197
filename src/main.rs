//! Runs a simulated anchor constellation through the tag and reports the
//! distance differences it produces.
//!
//! Usage: `tdoa3-sim [config.json] [slots]`
//!        `tdoa3-sim --write-default <config.json>`

use log::{debug, info, warn};
use std::env;
use std::error::Error;
use tdoa3_tag::api::LppShortPacket;
use tdoa3_tag::hardware::simulator::AnchorSimulator;
use tdoa3_tag::{ConfigurationManager, EstimatorInput, EstimatorQueue, MockRadio, RadioEvent, Tdoa3Tag};

const DEFAULT_SLOTS: usize = 2_000;

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().skip(1).collect();
    if args.first().map(String::as_str) == Some("--write-default") {
        let path = args.get(1).ok_or("Missing output path")?;
        ConfigurationManager::new().save_to_file(path)?;
        info!("Default configuration written to {}", path);
        return Ok(());
    }

    let manager = match args.first() {
        Some(path) => ConfigurationManager::from_file(path)?,
        None => ConfigurationManager::new(),
    };
    let slots = match args.get(1) {
        Some(value) => value.parse()?,
        None => DEFAULT_SLOTS,
    };

    let tag_config = manager.tag_config().clone();
    let mut simulator = AnchorSimulator::new(manager.simulator_config().clone())?;

    let (queue, estimator) = EstimatorQueue::bounded(tag_config.estimator_queue_capacity);
    let (lpp_sender, lpp_receiver) = crossbeam_channel::bounded::<LppShortPacket>(4);
    let mut tag = Tdoa3Tag::new(&tag_config, queue, lpp_receiver, 0)?;
    let mut radio = MockRadio::new();
    tag.initialize(&mut radio)?;
    tag.on_event(&mut radio, RadioEvent::Timeout, 0)?;

    info!(
        "Simulating {} slots with anchors {:?}, tag at {:?}",
        slots,
        simulator.anchor_ids(),
        simulator.tag_position().as_slice()
    );

    let mut measurement_count = 0usize;
    let mut sum_squared_error = 0.0f64;
    let mut last_measurement = None;

    for _ in 0..slots {
        let transmission = simulator.next_transmission()?;
        let event = match transmission.frame {
            Some(frame) => {
                radio.add_frame(frame);
                RadioEvent::PacketReceived
            }
            None => RadioEvent::ReceiveTimeout,
        };
        tag.on_event(&mut radio, event, transmission.now_ms)?;

        while let Ok(input) = estimator.try_recv() {
            match input {
                EstimatorInput::Tdoa(measurement) => {
                    let Some(expected) = simulator.expected_distance_diff(measurement.anchor_ids) else {
                        warn!("Measurement for unknown anchors {:?}", measurement.anchor_ids);
                        continue;
                    };
                    let error = measurement.distance_diff as f64 - expected;
                    debug!(
                        "{:?}: {:.3} m (expected {:.3} m)",
                        measurement.anchor_ids, measurement.distance_diff, expected
                    );
                    sum_squared_error += error * error;
                    measurement_count += 1;
                    last_measurement = Some(measurement);
                }
                EstimatorInput::AbsoluteHeight(height) => {
                    debug!("Height {:.2} m", height.height);
                }
            }
        }
    }

    // Queue one control packet for anchor 0; the next event transmits it
    if tag.is_ranging_ok() {
        lpp_sender.try_send(LppShortPacket::new(0, &[0x00])?)?;
        tag.on_event(&mut radio, RadioEvent::Timeout, simulator.time_ms())?;
        info!("Control frames sent: {}", radio.sent_frames().len());
    }

    let stats = tag.stats();
    info!(
        "Packets received: {}, to estimator: {}, dropped: {}, malformed: {}",
        stats.packets_received().count(),
        stats.packets_to_estimator().count(),
        stats.measurements_dropped(),
        stats.malformed_packets()
    );
    info!(
        "Active anchors: {:?}",
        tag.active_anchor_ids(simulator.time_ms()).as_slice()
    );
    if measurement_count > 0 {
        info!(
            "{} measurements, RMS error {:.4} m",
            measurement_count,
            (sum_squared_error / measurement_count as f64).sqrt()
        );
    }
    if let Some(measurement) = last_measurement {
        info!("Last measurement: {}", serde_json::to_string(&measurement)?);
    }

    Ok(())
}
