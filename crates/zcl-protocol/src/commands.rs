//! Outgoing Smart Energy command payload encoders
//!
//! Each encoder is a pure function from typed parameters to the command's
//! fixed or field-control-dependent byte layout.

use crate::types::ZclStatus;

/// Length of the ECDSA signature field in ReportEventStatus (never populated)
pub const SIGNATURE_LEN: usize = 42;

/// DRLC ReportEventStatus (client command 0x00)
#[derive(Debug, Clone)]
pub struct ReportEventStatus {
    pub issuer_event_id: u32,
    pub event_status: u8,
    pub event_status_time: u32,
    pub criticality_applied: u8,
    pub cooling_set_point_applied: u16,
    pub heating_set_point_applied: u16,
    pub average_load_adjustment_applied: i8,
    pub duty_cycle_applied: u8,
    pub event_control: u8,
}

impl ReportEventStatus {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(17 + 1 + SIGNATURE_LEN);
        data.extend_from_slice(&self.issuer_event_id.to_le_bytes());
        data.push(self.event_status);
        data.extend_from_slice(&self.event_status_time.to_le_bytes());
        data.push(self.criticality_applied);
        data.extend_from_slice(&self.cooling_set_point_applied.to_le_bytes());
        data.extend_from_slice(&self.heating_set_point_applied.to_le_bytes());
        data.push(self.average_load_adjustment_applied as u8);
        data.push(self.duty_cycle_applied);
        data.push(self.event_control);
        // Signature type + signature, reserved all-0xFF (no ECDSA support)
        data.resize(data.len() + 1 + SIGNATURE_LEN, 0xFF);
        data
    }
}

/// OTA QueryNextImage (client command 0x01)
///
/// 9 bytes, or 11 when the hardware version is present (field control bit 0).
#[derive(Debug, Clone)]
pub struct QueryNextImage {
    pub manufacturer_code: u16,
    pub image_type: u16,
    pub current_file_version: u32,
    pub hardware_version: Option<u16>,
}

impl QueryNextImage {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(11);
        data.push(u8::from(self.hardware_version.is_some()));
        data.extend_from_slice(&self.manufacturer_code.to_le_bytes());
        data.extend_from_slice(&self.image_type.to_le_bytes());
        data.extend_from_slice(&self.current_file_version.to_le_bytes());
        if let Some(hw) = self.hardware_version {
            data.extend_from_slice(&hw.to_le_bytes());
        }
        data
    }
}

/// OTA ImageBlockRequest (client command 0x03)
///
/// Field control bit 0 = IEEE address present, bit 1 = block-request delay
/// present, per the OTA cluster specification.
#[derive(Debug, Clone)]
pub struct ImageBlockRequest {
    pub manufacturer_code: u16,
    pub image_type: u16,
    pub file_version: u32,
    pub file_offset: u32,
    pub max_data_size: u8,
    pub ieee_address: Option<[u8; 8]>,
    pub block_request_delay: Option<u16>,
}

impl ImageBlockRequest {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut field_control = 0u8;
        if self.ieee_address.is_some() {
            field_control |= 0x01;
        }
        if self.block_request_delay.is_some() {
            field_control |= 0x02;
        }

        let mut data = Vec::with_capacity(14 + 8 + 2);
        data.push(field_control);
        data.extend_from_slice(&self.manufacturer_code.to_le_bytes());
        data.extend_from_slice(&self.image_type.to_le_bytes());
        data.extend_from_slice(&self.file_version.to_le_bytes());
        data.extend_from_slice(&self.file_offset.to_le_bytes());
        data.push(self.max_data_size);
        if let Some(ieee) = self.ieee_address {
            data.extend_from_slice(&ieee);
        }
        if let Some(delay) = self.block_request_delay {
            data.extend_from_slice(&delay.to_le_bytes());
        }
        data
    }
}

/// OTA UpgradeEndRequest (client command 0x06)
#[derive(Debug, Clone)]
pub struct UpgradeEndRequest {
    pub status: ZclStatus,
    pub manufacturer_code: u16,
    pub image_type: u16,
    pub file_version: u32,
}

impl UpgradeEndRequest {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(9);
        data.push(self.status.as_u8());
        data.extend_from_slice(&self.manufacturer_code.to_le_bytes());
        data.extend_from_slice(&self.image_type.to_le_bytes());
        data.extend_from_slice(&self.file_version.to_le_bytes());
        data
    }
}

/// Price GetCurrentPrice (client command 0x00)
#[derive(Debug, Clone)]
pub struct GetCurrentPrice {
    /// Bit 0: requestor rx on when idle
    pub rx_on_when_idle: bool,
}

impl GetCurrentPrice {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        vec![u8::from(self.rx_on_when_idle)]
    }
}

/// Messaging MessageConfirmation (client command 0x01)
#[derive(Debug, Clone)]
pub struct MessageConfirmation {
    pub message_id: u32,
    pub confirmation_time: u32,
}

impl MessageConfirmation {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(8);
        data.extend_from_slice(&self.message_id.to_le_bytes());
        data.extend_from_slice(&self.confirmation_time.to_le_bytes());
        data
    }
}

/// Simple Metering GetProfile (client command 0x00)
#[derive(Debug, Clone)]
pub struct GetProfile {
    /// 0 = consumption delivered, 1 = consumption received
    pub interval_channel: u8,
    /// UTC time of the most recent interval requested, 0 = now
    pub end_time: u32,
    pub number_of_periods: u8,
}

impl GetProfile {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(6);
        data.push(self.interval_channel);
        data.extend_from_slice(&self.end_time.to_le_bytes());
        data.push(self.number_of_periods);
        data
    }
}

/// DRLC GetScheduledEvents (client command 0x01)
#[derive(Debug, Clone)]
pub struct GetScheduledEvents {
    pub start_time: u32,
    pub number_of_events: u8,
}

impl GetScheduledEvents {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(5);
        data.extend_from_slice(&self.start_time.to_le_bytes());
        data.push(self.number_of_events);
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_event_status_layout() {
        let report = ReportEventStatus {
            issuer_event_id: 0x0102_0304,
            event_status: 0x02,
            event_status_time: 0x0A0B_0C0D,
            criticality_applied: 0x05,
            cooling_set_point_applied: 0x0960,
            heating_set_point_applied: 0x076C,
            average_load_adjustment_applied: -10,
            duty_cycle_applied: 80,
            event_control: 0x00,
        };
        let data = report.encode();
        assert_eq!(data.len(), 17 + 1 + SIGNATURE_LEN);
        assert_eq!(&data[0..4], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(data[4], 0x02);
        assert_eq!(&data[5..9], &[0x0D, 0x0C, 0x0B, 0x0A]);
        assert_eq!(data[14], (-10i8) as u8);
        // Signature type byte plus signature block, all 0xFF
        assert!(data[17..].iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn query_next_image_without_hardware_version() {
        let cmd = QueryNextImage {
            manufacturer_code: 0x1234,
            image_type: 0x0001,
            current_file_version: 0x0400_0000,
            hardware_version: None,
        };
        let data = cmd.encode();
        assert_eq!(data.len(), 9);
        assert_eq!(data[0], 0x00);
    }

    #[test]
    fn query_next_image_with_hardware_version() {
        let cmd = QueryNextImage {
            manufacturer_code: 0x1234,
            image_type: 0x0001,
            current_file_version: 0x0400_0000,
            hardware_version: Some(0x0102),
        };
        let data = cmd.encode();
        assert_eq!(data.len(), 11);
        assert_eq!(data[0], 0x01);
        assert_eq!(&data[9..], &[0x02, 0x01]);
    }

    #[test]
    fn image_block_request_field_control_bits() {
        let base = ImageBlockRequest {
            manufacturer_code: 0x1234,
            image_type: 0x0001,
            file_version: 0x0400_0000,
            file_offset: 0x0000_0080,
            max_data_size: 64,
            ieee_address: None,
            block_request_delay: None,
        };
        assert_eq!(base.encode()[0], 0x00);
        assert_eq!(base.encode().len(), 14);

        let with_ieee = ImageBlockRequest {
            ieee_address: Some([1, 2, 3, 4, 5, 6, 7, 8]),
            ..base.clone()
        };
        assert_eq!(with_ieee.encode()[0], 0x01);
        assert_eq!(with_ieee.encode().len(), 22);

        let with_delay = ImageBlockRequest {
            block_request_delay: Some(100),
            ..base.clone()
        };
        assert_eq!(with_delay.encode()[0], 0x02);
        assert_eq!(with_delay.encode().len(), 16);

        let with_both = ImageBlockRequest {
            ieee_address: Some([1, 2, 3, 4, 5, 6, 7, 8]),
            block_request_delay: Some(100),
            ..base
        };
        // Independent bit positions, never a merged OR of raw bytes
        assert_eq!(with_both.encode()[0], 0x03);
        assert_eq!(with_both.encode().len(), 24);
    }

    #[test]
    fn upgrade_end_request_layout() {
        let cmd = UpgradeEndRequest {
            status: ZclStatus::Success,
            manufacturer_code: 0x1234,
            image_type: 0x0001,
            file_version: 0x0102_0304,
        };
        let data = cmd.encode();
        assert_eq!(data, vec![0x00, 0x34, 0x12, 0x01, 0x00, 0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn get_profile_layout() {
        let cmd = GetProfile {
            interval_channel: 0,
            end_time: 0,
            number_of_periods: 12,
        };
        assert_eq!(cmd.encode(), vec![0x00, 0x00, 0x00, 0x00, 0x00, 12]);
    }
}
