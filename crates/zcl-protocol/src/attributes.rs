//! Read-attributes request/response plumbing

use crate::types::{ZclError, ZclStatus};
use crate::value::{DataType, ZclValue};

/// Payload of a global ReadAttributes command
#[derive(Debug, Clone)]
pub struct ReadAttributes {
    pub attributes: Vec<u16>,
}

impl ReadAttributes {
    #[must_use]
    pub fn new(attributes: Vec<u16>) -> Self {
        Self { attributes }
    }

    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(self.attributes.len() * 2);
        for id in &self.attributes {
            data.extend_from_slice(&id.to_le_bytes());
        }
        data
    }
}

/// One (attribute, status, type, value) tuple from a ReadAttributesResponse
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeRecord {
    pub id: u16,
    pub status: ZclStatus,
    pub data_type: Option<DataType>,
    pub value: Option<ZclValue>,
}

impl AttributeRecord {
    /// Parse the next record starting at `*offset`, advancing the offset
    ///
    /// An unknown data-type code is a hard error: without its width the
    /// following records cannot be located in the payload.
    pub fn parse(data: &[u8], offset: &mut usize) -> Result<Self, ZclError> {
        let rest = &data[*offset..];
        if rest.len() < 3 {
            return Err(ZclError::FrameTooShort(rest.len()));
        }
        let id = u16::from_le_bytes([rest[0], rest[1]]);
        let status = ZclStatus::from(rest[2]);
        *offset += 3;

        if !status.is_success() {
            return Ok(Self {
                id,
                status,
                data_type: None,
                value: None,
            });
        }

        let rest = &data[*offset..];
        if rest.is_empty() {
            return Err(ZclError::FrameTooShort(0));
        }
        let data_type =
            DataType::from_u8(rest[0]).ok_or(ZclError::UnknownDataType(rest[0]))?;
        *offset += 1;

        let (value, consumed) = ZclValue::decode(data_type, &data[*offset..])?;
        *offset += consumed;

        Ok(Self {
            id,
            status,
            data_type: Some(data_type),
            value: Some(value),
        })
    }
}

/// Payload of a global DefaultResponse command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultResponse {
    pub command_id: u8,
    pub status: ZclStatus,
}

impl DefaultResponse {
    pub fn parse(data: &[u8]) -> Result<Self, ZclError> {
        if data.len() < 2 {
            return Err(ZclError::FrameTooShort(data.len()));
        }
        Ok(Self {
            command_id: data[0],
            status: ZclStatus::from(data[1]),
        })
    }

    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        vec![self.command_id, self.status.as_u8()]
    }
}
