//! ZCL frame header codec
//!
//! Frame layout:
//! ```text
//! [Frame control: 1 byte]
//!   bits 0-1  frame type (0 = global, 1 = cluster-specific)
//!   bit 2     manufacturer-specific (code follows)
//!   bit 3     direction (1 = server to client)
//!   bit 4     disable default response
//! [Manufacturer code: 2 bytes LE] (only if bit 2 set)
//! [Sequence: 1 byte]
//! [Command ID: 1 byte]
//! [Payload: variable]
//! ```

use crate::types::{global, ZclError, ZclStatus};

/// Minimum header size: frame control(1) + sequence(1) + command(1)
pub const MIN_HEADER_SIZE: usize = 3;

/// ZCL frame type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    Global = 0x00,
    ClusterSpecific = 0x01,
}

/// ZCL direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Direction {
    ClientToServer = 0x00,
    ServerToClient = 0x01,
}

/// A ZCL frame: header fields plus the raw command payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZclFrame {
    pub frame_type: FrameType,
    pub manufacturer_code: Option<u16>,
    pub direction: Direction,
    pub disable_default_response: bool,
    pub sequence: u8,
    pub command_id: u8,
    pub payload: Vec<u8>,
}

impl ZclFrame {
    /// Create a cluster-specific command frame (client to server)
    #[must_use]
    pub fn cluster_command(sequence: u8, command_id: u8, payload: Vec<u8>) -> Self {
        Self {
            frame_type: FrameType::ClusterSpecific,
            manufacturer_code: None,
            direction: Direction::ClientToServer,
            disable_default_response: false,
            sequence,
            command_id,
            payload,
        }
    }

    /// Create a global command frame (client to server)
    #[must_use]
    pub fn global_command(sequence: u8, command_id: u8, payload: Vec<u8>) -> Self {
        Self {
            frame_type: FrameType::Global,
            manufacturer_code: None,
            direction: Direction::ClientToServer,
            disable_default_response: false,
            sequence,
            command_id,
            payload,
        }
    }

    /// Create a default response answering `command_id` with `status`
    ///
    /// Default responses must never themselves solicit a default response.
    #[must_use]
    pub fn default_response(sequence: u8, command_id: u8, status: ZclStatus) -> Self {
        Self {
            frame_type: FrameType::Global,
            manufacturer_code: None,
            direction: Direction::ClientToServer,
            disable_default_response: true,
            sequence,
            command_id: global::DEFAULT_RESPONSE,
            payload: vec![command_id, status.as_u8()],
        }
    }

    /// Serialize to wire bytes
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut control = self.frame_type as u8;
        if self.manufacturer_code.is_some() {
            control |= 0x04;
        }
        control |= (self.direction as u8) << 3;
        if self.disable_default_response {
            control |= 0x10;
        }

        let mut data = Vec::with_capacity(MIN_HEADER_SIZE + 2 + self.payload.len());
        data.push(control);
        if let Some(code) = self.manufacturer_code {
            data.extend_from_slice(&code.to_le_bytes());
        }
        data.push(self.sequence);
        data.push(self.command_id);
        data.extend_from_slice(&self.payload);
        data
    }

    /// Parse from wire bytes
    pub fn parse(data: &[u8]) -> Result<Self, ZclError> {
        if data.len() < MIN_HEADER_SIZE {
            return Err(ZclError::FrameTooShort(data.len()));
        }

        let control = data[0];
        let frame_type = if control & 0x03 == 0x01 {
            FrameType::ClusterSpecific
        } else {
            FrameType::Global
        };
        let direction = if control & 0x08 != 0 {
            Direction::ServerToClient
        } else {
            Direction::ClientToServer
        };
        let disable_default_response = control & 0x10 != 0;

        let mut idx = 1;
        let manufacturer_code = if control & 0x04 != 0 {
            if data.len() < idx + 2 {
                return Err(ZclError::FrameTooShort(data.len()));
            }
            let code = u16::from_le_bytes([data[idx], data[idx + 1]]);
            idx += 2;
            Some(code)
        } else {
            None
        };

        if data.len() < idx + 2 {
            return Err(ZclError::FrameTooShort(data.len()));
        }
        let sequence = data[idx];
        let command_id = data[idx + 1];
        idx += 2;

        Ok(Self {
            frame_type,
            manufacturer_code,
            direction,
            disable_default_response,
            sequence,
            command_id,
            payload: data[idx..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_cluster_command() {
        let frame = ZclFrame::cluster_command(0x42, 0x03, vec![0xAA, 0xBB]);
        let parsed = ZclFrame::parse(&frame.serialize()).unwrap();
        assert_eq!(parsed, frame);
    }

    #[test]
    fn roundtrip_manufacturer_specific() {
        let mut frame = ZclFrame::cluster_command(1, 0x00, vec![]);
        frame.manufacturer_code = Some(0x1234);
        frame.direction = Direction::ServerToClient;
        frame.disable_default_response = true;
        let bytes = frame.serialize();
        assert_eq!(bytes[0], 0x01 | 0x04 | 0x08 | 0x10);
        assert_eq!(ZclFrame::parse(&bytes).unwrap(), frame);
    }

    #[test]
    fn frame_control_bit_packing() {
        let frame = ZclFrame::global_command(7, 0x00, vec![]);
        let bytes = frame.serialize();
        assert_eq!(bytes, vec![0x00, 7, 0x00]);
    }

    #[test]
    fn default_response_payload() {
        let frame = ZclFrame::default_response(9, 0x17, ZclStatus::UnsupportedClusterCommand);
        assert!(frame.disable_default_response);
        assert_eq!(frame.command_id, global::DEFAULT_RESPONSE);
        assert_eq!(frame.payload, vec![0x17, 0x81]);
    }

    #[test]
    fn parse_too_short() {
        assert!(matches!(
            ZclFrame::parse(&[0x00, 0x01]),
            Err(ZclError::FrameTooShort(2))
        ));
        // Manufacturer bit set but no room for the code
        assert!(matches!(
            ZclFrame::parse(&[0x04, 0x01, 0x02]),
            Err(ZclError::FrameTooShort(3))
        ));
    }
}
