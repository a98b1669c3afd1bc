//! Incoming Smart Energy payload decoders
//!
//! Payloads are fixed-layout after the ZCL header. Devices in the field send
//! short payloads, so every field read checks the remaining length; missing
//! trailing fields are left at the all-1s sentinel instead of failing.

use crate::types::{ZclError, ZclStatus};

fn take_u8(data: &[u8], idx: &mut usize) -> Option<u8> {
    let v = data.get(*idx).copied();
    if v.is_some() {
        *idx += 1;
    }
    v
}

fn take_u16(data: &[u8], idx: &mut usize) -> Option<u16> {
    if data.len() < *idx + 2 {
        return None;
    }
    let v = u16::from_le_bytes([data[*idx], data[*idx + 1]]);
    *idx += 2;
    Some(v)
}

fn take_u24(data: &[u8], idx: &mut usize) -> Option<u32> {
    if data.len() < *idx + 3 {
        return None;
    }
    let v = u32::from(data[*idx])
        | u32::from(data[*idx + 1]) << 8
        | u32::from(data[*idx + 2]) << 16;
    *idx += 3;
    Some(v)
}

fn take_u32(data: &[u8], idx: &mut usize) -> Option<u32> {
    if data.len() < *idx + 4 {
        return None;
    }
    let v = u32::from_le_bytes([data[*idx], data[*idx + 1], data[*idx + 2], data[*idx + 3]]);
    *idx += 4;
    Some(v)
}

fn take_string(data: &[u8], idx: &mut usize) -> Option<String> {
    let len = take_u8(data, idx)? as usize;
    if data.len() < *idx + len {
        return None;
    }
    let s = String::from_utf8_lossy(&data[*idx..*idx + len]).into_owned();
    *idx += len;
    Some(s)
}

/// DRLC LoadControlEvent (server command 0x00)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadControlEvent {
    pub issuer_event_id: u32,
    pub device_class: u16,
    pub utility_enrollment_group: u8,
    pub start_time: u32,
    pub duration_minutes: u16,
    pub criticality_level: u8,
    pub cooling_temperature_offset: u8,
    pub heating_temperature_offset: u8,
    pub cooling_set_point: u16,
    pub heating_set_point: u16,
    pub average_load_adjustment_pct: i8,
    pub duty_cycle: u8,
    pub event_control: u8,
}

impl LoadControlEvent {
    pub fn parse(data: &[u8]) -> Result<Self, ZclError> {
        // Everything through the criticality level is mandatory
        if data.len() < 14 {
            return Err(ZclError::FrameTooShort(data.len()));
        }
        let mut idx = 0;
        let issuer_event_id = take_u32(data, &mut idx).unwrap_or(u32::MAX);
        let device_class = take_u16(data, &mut idx).unwrap_or(u16::MAX);
        let utility_enrollment_group = take_u8(data, &mut idx).unwrap_or(0);
        let start_time = take_u32(data, &mut idx).unwrap_or(0);
        let duration_minutes = take_u16(data, &mut idx).unwrap_or(0);
        let criticality_level = take_u8(data, &mut idx).unwrap_or(0);
        Ok(Self {
            issuer_event_id,
            device_class,
            utility_enrollment_group,
            start_time,
            duration_minutes,
            criticality_level,
            cooling_temperature_offset: take_u8(data, &mut idx).unwrap_or(0xFF),
            heating_temperature_offset: take_u8(data, &mut idx).unwrap_or(0xFF),
            cooling_set_point: take_u16(data, &mut idx).unwrap_or(0xFFFF),
            heating_set_point: take_u16(data, &mut idx).unwrap_or(0xFFFF),
            average_load_adjustment_pct: take_u8(data, &mut idx).unwrap_or(0xFF) as i8,
            duty_cycle: take_u8(data, &mut idx).unwrap_or(0xFF),
            event_control: take_u8(data, &mut idx).unwrap_or(0x00),
        })
    }
}

/// DRLC CancelLoadControlEvent (server command 0x01)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelLoadControlEvent {
    pub issuer_event_id: u32,
    pub device_class: u16,
    pub utility_enrollment_group: u8,
    pub cancel_control: u8,
    /// UTC time the cancellation takes effect, 0 = now
    pub effective_time: u32,
}

impl CancelLoadControlEvent {
    pub fn parse(data: &[u8]) -> Result<Self, ZclError> {
        if data.len() < 8 {
            return Err(ZclError::FrameTooShort(data.len()));
        }
        let mut idx = 0;
        Ok(Self {
            issuer_event_id: take_u32(data, &mut idx).unwrap_or(u32::MAX),
            device_class: take_u16(data, &mut idx).unwrap_or(u16::MAX),
            utility_enrollment_group: take_u8(data, &mut idx).unwrap_or(0),
            cancel_control: take_u8(data, &mut idx).unwrap_or(0),
            effective_time: take_u32(data, &mut idx).unwrap_or(0),
        })
    }
}

/// DRLC CancelAllLoadControlEvents (server command 0x02)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelAllLoadControlEvents {
    pub cancel_control: u8,
}

impl CancelAllLoadControlEvents {
    pub fn parse(data: &[u8]) -> Result<Self, ZclError> {
        if data.is_empty() {
            return Err(ZclError::FrameTooShort(0));
        }
        Ok(Self {
            cancel_control: data[0],
        })
    }
}

/// OTA ImageNotify (server command 0x00)
///
/// Trailing fields are gated by the payload type byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageNotify {
    pub payload_type: u8,
    pub query_jitter: u8,
    pub manufacturer_code: Option<u16>,
    pub image_type: Option<u16>,
    pub new_file_version: Option<u32>,
}

impl ImageNotify {
    pub fn parse(data: &[u8]) -> Result<Self, ZclError> {
        if data.len() < 2 {
            return Err(ZclError::FrameTooShort(data.len()));
        }
        let mut idx = 0;
        let payload_type = take_u8(data, &mut idx).unwrap_or(0);
        let query_jitter = take_u8(data, &mut idx).unwrap_or(0);
        let manufacturer_code = if payload_type >= 1 {
            take_u16(data, &mut idx)
        } else {
            None
        };
        let image_type = if payload_type >= 2 {
            take_u16(data, &mut idx)
        } else {
            None
        };
        let new_file_version = if payload_type >= 3 {
            take_u32(data, &mut idx)
        } else {
            None
        };
        Ok(Self {
            payload_type,
            query_jitter,
            manufacturer_code,
            image_type,
            new_file_version,
        })
    }
}

/// OTA QueryNextImageResponse (server command 0x02)
///
/// Only a Success status carries the image fields; any other status is the
/// complete payload by itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryNextImageResponse {
    pub status: ZclStatus,
    pub manufacturer_code: u16,
    pub image_type: u16,
    pub file_version: u32,
    pub image_size: u32,
}

impl QueryNextImageResponse {
    pub fn parse(data: &[u8]) -> Result<Self, ZclError> {
        if data.is_empty() {
            return Err(ZclError::FrameTooShort(0));
        }
        let mut idx = 0;
        let status = ZclStatus::from(take_u8(data, &mut idx).unwrap_or(0xFF));
        if !status.is_success() {
            return Ok(Self {
                status,
                manufacturer_code: 0xFFFF,
                image_type: 0xFFFF,
                file_version: u32::MAX,
                image_size: u32::MAX,
            });
        }
        Ok(Self {
            status,
            manufacturer_code: take_u16(data, &mut idx).unwrap_or(0xFFFF),
            image_type: take_u16(data, &mut idx).unwrap_or(0xFFFF),
            file_version: take_u32(data, &mut idx).unwrap_or(u32::MAX),
            image_size: take_u32(data, &mut idx).unwrap_or(u32::MAX),
        })
    }
}

/// OTA ImageBlockResponse (server command 0x05), three-way branch on status
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageBlockResponse {
    Success {
        manufacturer_code: u16,
        image_type: u16,
        file_version: u32,
        file_offset: u32,
        data: Vec<u8>,
    },
    /// Field order as observed on the wire: no manufacturer code is re-read
    /// in this branch (current time, request time, then image type directly).
    WaitForData {
        current_time: u32,
        request_time: u32,
        image_type: u16,
        file_version: u32,
        file_offset: u32,
        block_request_delay: u16,
    },
    Abort,
    Other(ZclStatus),
}

impl ImageBlockResponse {
    pub fn parse(data: &[u8]) -> Result<Self, ZclError> {
        if data.is_empty() {
            return Err(ZclError::FrameTooShort(0));
        }
        let mut idx = 0;
        let status = ZclStatus::from(take_u8(data, &mut idx).unwrap_or(0xFF));
        match status {
            ZclStatus::Success => {
                let manufacturer_code = take_u16(data, &mut idx).unwrap_or(0xFFFF);
                let image_type = take_u16(data, &mut idx).unwrap_or(0xFFFF);
                let file_version = take_u32(data, &mut idx).unwrap_or(u32::MAX);
                let file_offset = take_u32(data, &mut idx).unwrap_or(u32::MAX);
                let data_size = take_u8(data, &mut idx).unwrap_or(0) as usize;
                let available = data.len().saturating_sub(idx);
                let block = data[idx..idx + data_size.min(available)].to_vec();
                Ok(Self::Success {
                    manufacturer_code,
                    image_type,
                    file_version,
                    file_offset,
                    data: block,
                })
            }
            ZclStatus::WaitForData => Ok(Self::WaitForData {
                current_time: take_u32(data, &mut idx).unwrap_or(u32::MAX),
                request_time: take_u32(data, &mut idx).unwrap_or(u32::MAX),
                image_type: take_u16(data, &mut idx).unwrap_or(0xFFFF),
                file_version: take_u32(data, &mut idx).unwrap_or(u32::MAX),
                file_offset: take_u32(data, &mut idx).unwrap_or(u32::MAX),
                block_request_delay: take_u16(data, &mut idx).unwrap_or(0xFFFF),
            }),
            ZclStatus::Abort => Ok(Self::Abort),
            other => Ok(Self::Other(other)),
        }
    }
}

/// OTA UpgradeEndResponse (server command 0x07)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeEndResponse {
    pub manufacturer_code: u16,
    pub image_type: u16,
    pub file_version: u32,
    pub current_time: u32,
    /// UTC time at which to apply the image; all-1s = on next command
    pub upgrade_time: u32,
}

impl UpgradeEndResponse {
    pub fn parse(data: &[u8]) -> Result<Self, ZclError> {
        if data.len() < 8 {
            return Err(ZclError::FrameTooShort(data.len()));
        }
        let mut idx = 0;
        Ok(Self {
            manufacturer_code: take_u16(data, &mut idx).unwrap_or(0xFFFF),
            image_type: take_u16(data, &mut idx).unwrap_or(0xFFFF),
            file_version: take_u32(data, &mut idx).unwrap_or(u32::MAX),
            current_time: take_u32(data, &mut idx).unwrap_or(u32::MAX),
            upgrade_time: take_u32(data, &mut idx).unwrap_or(u32::MAX),
        })
    }
}

/// Price PublishPrice (server command 0x00)
#[derive(Debug, Clone, PartialEq)]
pub struct PublishPrice {
    pub provider_id: u32,
    pub rate_label: String,
    pub issuer_event_id: u32,
    pub current_time: u32,
    pub unit_of_measure: u8,
    pub currency: u16,
    pub price_trailing_digit_and_tier: u8,
    pub number_of_tiers_and_register: u8,
    pub start_time: u32,
    pub duration_minutes: u16,
    pub price: u32,
}

impl PublishPrice {
    pub fn parse(data: &[u8]) -> Result<Self, ZclError> {
        if data.len() < 5 {
            return Err(ZclError::FrameTooShort(data.len()));
        }
        let mut idx = 0;
        Ok(Self {
            provider_id: take_u32(data, &mut idx).unwrap_or(u32::MAX),
            rate_label: take_string(data, &mut idx).unwrap_or_default(),
            issuer_event_id: take_u32(data, &mut idx).unwrap_or(u32::MAX),
            current_time: take_u32(data, &mut idx).unwrap_or(u32::MAX),
            unit_of_measure: take_u8(data, &mut idx).unwrap_or(0xFF),
            currency: take_u16(data, &mut idx).unwrap_or(0xFFFF),
            price_trailing_digit_and_tier: take_u8(data, &mut idx).unwrap_or(0xFF),
            number_of_tiers_and_register: take_u8(data, &mut idx).unwrap_or(0xFF),
            start_time: take_u32(data, &mut idx).unwrap_or(u32::MAX),
            duration_minutes: take_u16(data, &mut idx).unwrap_or(0xFFFF),
            price: take_u32(data, &mut idx).unwrap_or(u32::MAX),
        })
    }
}

/// Price PublishBlockPeriod (server command 0x01)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishBlockPeriod {
    pub provider_id: u32,
    pub issuer_event_id: u32,
    pub block_period_start_time: u32,
    /// Duration in minutes, 24-bit on the wire
    pub block_period_duration: u32,
    pub number_of_price_tiers_and_blocks: u8,
    pub block_period_control: u8,
}

impl PublishBlockPeriod {
    pub fn parse(data: &[u8]) -> Result<Self, ZclError> {
        if data.len() < 12 {
            return Err(ZclError::FrameTooShort(data.len()));
        }
        let mut idx = 0;
        Ok(Self {
            provider_id: take_u32(data, &mut idx).unwrap_or(u32::MAX),
            issuer_event_id: take_u32(data, &mut idx).unwrap_or(u32::MAX),
            block_period_start_time: take_u32(data, &mut idx).unwrap_or(u32::MAX),
            block_period_duration: take_u24(data, &mut idx).unwrap_or(0x00FF_FFFF),
            number_of_price_tiers_and_blocks: take_u8(data, &mut idx).unwrap_or(0xFF),
            block_period_control: take_u8(data, &mut idx).unwrap_or(0xFF),
        })
    }
}

/// Messaging DisplayMessage (server command 0x00)
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayMessage {
    pub message_id: u32,
    pub message_control: u8,
    pub start_time: u32,
    pub duration_minutes: u16,
    pub message: String,
}

impl DisplayMessage {
    pub fn parse(data: &[u8]) -> Result<Self, ZclError> {
        if data.len() < 11 {
            return Err(ZclError::FrameTooShort(data.len()));
        }
        let mut idx = 0;
        Ok(Self {
            message_id: take_u32(data, &mut idx).unwrap_or(u32::MAX),
            message_control: take_u8(data, &mut idx).unwrap_or(0),
            start_time: take_u32(data, &mut idx).unwrap_or(0),
            duration_minutes: take_u16(data, &mut idx).unwrap_or(0xFFFF),
            message: take_string(data, &mut idx).unwrap_or_default(),
        })
    }
}

/// Simple Metering GetProfileResponse (server command 0x00)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetProfileResponse {
    pub end_time: u32,
    pub status: u8,
    pub profile_interval_period: u8,
    /// Interval values, most recent first; the all-1s u24 sentinel means
    /// the interval was never populated by the meter.
    pub intervals: Vec<Option<u32>>,
}

impl GetProfileResponse {
    pub fn parse(data: &[u8]) -> Result<Self, ZclError> {
        if data.len() < 7 {
            return Err(ZclError::FrameTooShort(data.len()));
        }
        let mut idx = 0;
        let end_time = take_u32(data, &mut idx).unwrap_or(0);
        let status = take_u8(data, &mut idx).unwrap_or(0xFF);
        let profile_interval_period = take_u8(data, &mut idx).unwrap_or(0xFF);
        let count = take_u8(data, &mut idx).unwrap_or(0) as usize;

        let mut intervals = Vec::with_capacity(count);
        for _ in 0..count {
            match take_u24(data, &mut idx) {
                Some(0x00FF_FFFF) | None => intervals.push(None),
                Some(v) => intervals.push(Some(v)),
            }
        }
        Ok(Self {
            end_time,
            status,
            profile_interval_period,
            intervals,
        })
    }
}
