//! Typed events broadcast to session subscribers
//!
//! Delivery is zero-or-more subscribers over `tokio::sync::broadcast`;
//! send failures (no receivers) are ignored at every emit site.

use zcl_protocol::responses::{DisplayMessage, PublishBlockPeriod, PublishPrice};

use crate::drlc::EventStatus;
use crate::ota::OtaStage;

/// Events emitted by the meter session
#[derive(Debug, Clone)]
pub enum MeterEvent {
    /// A DRLC event changed status
    DrlcStatus {
        issuer_event_id: u32,
        status: EventStatus,
    },
    /// The OTA client moved to a new stage
    OtaStage(OtaStage),
    /// OTA download progress after a successful block
    OtaProgress { offset: u32, image_size: u32 },
    /// A text message was published by the server
    MessageReceived(DisplayMessage),
    /// A price publication arrived
    PriceReceived(PublishPrice),
    /// A block period publication arrived
    BlockPeriodReceived(PublishBlockPeriod),
}
