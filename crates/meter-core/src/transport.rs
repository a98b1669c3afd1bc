//! Radio transport seam
//!
//! The vendor radio (serial link, EZSP plumbing, join/bind bookkeeping) is an
//! external collaborator. The session only needs unicast send of an opaque
//! payload to an addressing tuple; inbound messages are pushed into
//! `MeterSession::handle_message` by whoever owns the radio's receive pump.

use zcl_protocol::types::profiles;

/// A node/endpoint addressing pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Destination {
    pub node_id: u16,
    pub endpoint: u8,
}

/// Per-send APS options, each independently toggleable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxOptions {
    pub aps_encryption: bool,
    pub route_discovery: bool,
    pub address_discovery: bool,
    pub retry: bool,
}

impl Default for TxOptions {
    fn default() -> Self {
        Self {
            aps_encryption: false,
            route_discovery: true,
            address_discovery: false,
            retry: true,
        }
    }
}

impl TxOptions {
    /// Options for commands that always go out APS-encrypted
    #[must_use]
    pub fn secure() -> Self {
        Self {
            aps_encryption: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_encryption(mut self, enabled: bool) -> Self {
        self.aps_encryption = enabled;
        self
    }
}

/// An outbound unicast message (serialized ZCL frame plus addressing)
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub destination: Destination,
    pub profile_id: u16,
    pub cluster_id: u16,
    pub payload: Vec<u8>,
    pub options: TxOptions,
}

impl OutboundMessage {
    /// Smart Energy profile unicast
    #[must_use]
    pub fn new(
        destination: Destination,
        cluster_id: u16,
        payload: Vec<u8>,
        options: TxOptions,
    ) -> Self {
        Self {
            destination,
            profile_id: profiles::SMART_ENERGY,
            cluster_id,
            payload,
            options,
        }
    }
}

/// An inbound message tagged with its addressing tuple
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub source: Destination,
    pub cluster_id: u16,
    pub payload: Vec<u8>,
}

/// The injected radio collaborator
pub trait RadioTransport: Send + Sync {
    /// Unicast an opaque payload; completes when the radio accepts the frame
    fn send_unicast(&self, message: OutboundMessage) -> Result<(), crate::MeterError>;
}
