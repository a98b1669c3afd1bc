//! ZigBee Cluster Library codec for the Smart Energy 1.1 profile
//!
//! This crate implements the ZCL frame and scalar value codecs plus the
//! Smart Energy command encoders and response decoders used by the meter
//! driver. It is wire-format only: no I/O, no timers, no session state.

pub mod attributes;
pub mod commands;
pub mod frame;
pub mod responses;
pub mod types;
pub mod value;

pub use attributes::{AttributeRecord, DefaultResponse, ReadAttributes};
pub use frame::{Direction, FrameType, ZclFrame};
pub use types::{ZclError, ZclStatus};
pub use value::{DataType, ZclValue};
