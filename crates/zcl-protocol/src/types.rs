//! Common types used throughout the ZCL codec

use thiserror::Error;

use crate::value::DataType;

/// Codec errors
#[derive(Error, Debug)]
pub enum ZclError {
    #[error("Frame too short: {0} bytes")]
    FrameTooShort(usize),

    #[error("Malformed payload: {0}")]
    Malformed(String),

    #[error("Unknown data type: {0:#04X}")]
    UnknownDataType(u8),

    #[error("Attribute {attribute:#06X}: expected {expected:?}, device reported {actual:?}")]
    TypeMismatch {
        attribute: u16,
        expected: DataType,
        actual: DataType,
    },
}

/// ZCL status codes shared by attribute responses and the DRLC/OTA clusters
///
/// Unrecognized bytes map to `Unknown` so a misbehaving device can never
/// abort a decode through the status field alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZclStatus {
    Success,
    Failure,
    NotAuthorized,
    MalformedCommand,
    UnsupportedClusterCommand,
    UnsupportedGeneralCommand,
    UnsupportedAttribute,
    InvalidValue,
    ReadOnly,
    InvalidDataType,
    Timeout,
    Abort,
    InvalidImage,
    WaitForData,
    NoImageAvailable,
    RequireMoreImage,
    Unknown(u8),
}

impl From<u8> for ZclStatus {
    fn from(value: u8) -> Self {
        match value {
            0x00 => ZclStatus::Success,
            0x01 => ZclStatus::Failure,
            0x7E => ZclStatus::NotAuthorized,
            0x80 => ZclStatus::MalformedCommand,
            0x81 => ZclStatus::UnsupportedClusterCommand,
            0x82 => ZclStatus::UnsupportedGeneralCommand,
            0x86 => ZclStatus::UnsupportedAttribute,
            0x87 => ZclStatus::InvalidValue,
            0x88 => ZclStatus::ReadOnly,
            0x8D => ZclStatus::InvalidDataType,
            0x94 => ZclStatus::Timeout,
            0x95 => ZclStatus::Abort,
            0x96 => ZclStatus::InvalidImage,
            0x97 => ZclStatus::WaitForData,
            0x98 => ZclStatus::NoImageAvailable,
            0x99 => ZclStatus::RequireMoreImage,
            v => ZclStatus::Unknown(v),
        }
    }
}

impl ZclStatus {
    #[must_use]
    pub fn as_u8(self) -> u8 {
        match self {
            ZclStatus::Success => 0x00,
            ZclStatus::Failure => 0x01,
            ZclStatus::NotAuthorized => 0x7E,
            ZclStatus::MalformedCommand => 0x80,
            ZclStatus::UnsupportedClusterCommand => 0x81,
            ZclStatus::UnsupportedGeneralCommand => 0x82,
            ZclStatus::UnsupportedAttribute => 0x86,
            ZclStatus::InvalidValue => 0x87,
            ZclStatus::ReadOnly => 0x88,
            ZclStatus::InvalidDataType => 0x8D,
            ZclStatus::Timeout => 0x94,
            ZclStatus::Abort => 0x95,
            ZclStatus::InvalidImage => 0x96,
            ZclStatus::WaitForData => 0x97,
            ZclStatus::NoImageAvailable => 0x98,
            ZclStatus::RequireMoreImage => 0x99,
            ZclStatus::Unknown(v) => v,
        }
    }

    #[must_use]
    pub fn is_success(self) -> bool {
        self == ZclStatus::Success
    }
}

/// Smart Energy cluster IDs
pub mod clusters {
    pub const PRICE: u16 = 0x0700;
    pub const DRLC: u16 = 0x0701;
    pub const SIMPLE_METERING: u16 = 0x0702;
    pub const MESSAGING: u16 = 0x0703;
    pub const OTA_UPGRADE: u16 = 0x0019;
}

/// ZCL profile IDs
pub mod profiles {
    pub const SMART_ENERGY: u16 = 0x0109;
}

/// ZCL global (profile-wide) command IDs
pub mod global {
    pub const READ_ATTRIBUTES: u8 = 0x00;
    pub const READ_ATTRIBUTES_RESPONSE: u8 = 0x01;
    pub const WRITE_ATTRIBUTES_RESPONSE: u8 = 0x04;
    pub const CONFIGURE_REPORTING_RESPONSE: u8 = 0x07;
    pub const READ_REPORTING_CONFIGURATION_RESPONSE: u8 = 0x09;
    pub const DEFAULT_RESPONSE: u8 = 0x0B;
    pub const DISCOVER_ATTRIBUTES_RESPONSE: u8 = 0x0D;
}

/// DRLC cluster command IDs (server side generates, client side generates)
pub mod drlc {
    // Server -> client
    pub const LOAD_CONTROL_EVENT: u8 = 0x00;
    pub const CANCEL_LOAD_CONTROL_EVENT: u8 = 0x01;
    pub const CANCEL_ALL_LOAD_CONTROL_EVENTS: u8 = 0x02;
    // Client -> server
    pub const REPORT_EVENT_STATUS: u8 = 0x00;
    pub const GET_SCHEDULED_EVENTS: u8 = 0x01;
}

/// OTA upgrade cluster command IDs
pub mod ota {
    // Server -> client
    pub const IMAGE_NOTIFY: u8 = 0x00;
    pub const QUERY_NEXT_IMAGE_RESPONSE: u8 = 0x02;
    pub const IMAGE_BLOCK_RESPONSE: u8 = 0x05;
    pub const UPGRADE_END_RESPONSE: u8 = 0x07;
    // Client -> server
    pub const QUERY_NEXT_IMAGE: u8 = 0x01;
    pub const IMAGE_BLOCK_REQUEST: u8 = 0x03;
    pub const UPGRADE_END_REQUEST: u8 = 0x06;
}

/// Price cluster command IDs
pub mod price {
    // Server -> client
    pub const PUBLISH_PRICE: u8 = 0x00;
    pub const PUBLISH_BLOCK_PERIOD: u8 = 0x01;
    // Client -> server
    pub const GET_CURRENT_PRICE: u8 = 0x00;
}

/// Messaging cluster command IDs
pub mod messaging {
    // Server -> client
    pub const DISPLAY_MESSAGE: u8 = 0x00;
    pub const CANCEL_MESSAGE: u8 = 0x01;
    // Client -> server
    pub const GET_LAST_MESSAGE: u8 = 0x00;
    pub const MESSAGE_CONFIRMATION: u8 = 0x01;
}

/// Simple Metering cluster command IDs
pub mod metering {
    // Client -> server
    pub const GET_PROFILE: u8 = 0x00;
    // Server -> client
    pub const GET_PROFILE_RESPONSE: u8 = 0x00;
}

/// Simple Metering attribute IDs consumed by the session cache
pub mod metering_attrs {
    pub const CURRENT_SUMMATION_DELIVERED: u16 = 0x0000;
    pub const CURRENT_SUMMATION_RECEIVED: u16 = 0x0001;
    pub const STATUS: u16 = 0x0200;
    pub const UNIT_OF_MEASURE: u16 = 0x0300;
    pub const MULTIPLIER: u16 = 0x0301;
    pub const DIVISOR: u16 = 0x0302;
    pub const SUMMATION_FORMATTING: u16 = 0x0303;
    pub const METERING_DEVICE_TYPE: u16 = 0x0306;
    pub const INSTANTANEOUS_DEMAND: u16 = 0x0400;
}

/// Price cluster attribute IDs for the block threshold/price tables
pub mod price_attrs {
    /// First of the Block1..Block16 threshold attributes (consecutive IDs)
    pub const BLOCK1_THRESHOLD: u16 = 0x0100;
    /// First of the NoTierBlock1..Block16 price attributes (consecutive IDs)
    pub const NO_TIER_BLOCK1_PRICE: u16 = 0x0400;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrip() {
        for v in [0x00u8, 0x01, 0x7E, 0x81, 0x95, 0x97, 0x98, 0x99] {
            assert_eq!(ZclStatus::from(v).as_u8(), v);
        }
    }

    #[test]
    fn status_unknown_is_preserved() {
        let status = ZclStatus::from(0xC3);
        assert_eq!(status, ZclStatus::Unknown(0xC3));
        assert_eq!(status.as_u8(), 0xC3);
    }
}
