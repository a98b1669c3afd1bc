//! Smart Energy 1.1 meter session
//!
//! A per-device client session on top of an injected radio transport:
//! attribute reads with sequence correlation, cached metering/pricing
//! readings, the DRLC event engine and the OTA transfer client. Decoded
//! inbound records fan out to subscribers as [`MeterEvent`]s.

pub mod clock;
pub mod drlc;
pub mod error;
pub mod events;
pub mod ota;
pub mod readings;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod testutil;

pub use clock::{Clock, SystemClock};
pub use drlc::{DeviceClass, DrlcConfig, DrlcEngine, DrlcEvent, EventControl, EventStatus};
pub use error::MeterError;
pub use events::MeterEvent;
pub use ota::{OtaClient, OtaConfig, OtaStage};
pub use readings::{LoadProfile, MeterReadings, MeterSummary};
pub use session::MeterSession;
pub use transport::{Destination, InboundMessage, OutboundMessage, RadioTransport, TxOptions};
