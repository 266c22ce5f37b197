//! Event-driven tag interface
//!
//! [`Tdoa3Tag`] is driven by radio events and hands measurements to a
//! [`MeasurementSink`]; outgoing control packets are pulled from an
//! [`LppSource`].

pub mod dispatcher;
pub mod emitter;
pub mod types;

pub use dispatcher::{RadioEvent, Tdoa3Tag};
pub use emitter::{EstimatorQueue, MeasurementEmitter};
pub use types::{LppShortPacket, LppSource, MeasurementSink, NoLpp};
