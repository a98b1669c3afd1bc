//! OTA firmware transfer client
//!
//! Client side of ImageNotify -> QueryNextImage -> ImageBlockRequest ->
//! ImageBlockResponse -> UpgradeEndRequest. The session bundle lives behind
//! one mutex; the lock is released before anything is sent.
//!
//! Auto-drive covers ImageNotify -> QueryNextImage and the first block
//! request after a successful QueryNextImageResponse. Block-to-block
//! chaining stays caller-driven through `request_next_block`.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use zcl_protocol::commands::{ImageBlockRequest, QueryNextImage, UpgradeEndRequest};
use zcl_protocol::responses::{
    ImageBlockResponse, ImageNotify, QueryNextImageResponse, UpgradeEndResponse,
};
use zcl_protocol::types::{clusters, ota};
use zcl_protocol::{ZclFrame, ZclStatus};

use crate::events::MeterEvent;
use crate::transport::{Destination, OutboundMessage, RadioTransport, TxOptions};
use crate::MeterError;

/// Transfer stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OtaStage {
    #[default]
    Idle,
    ImageAvailable,
    NextImageRequested,
    NextImageReceived,
    BlockRequested,
    BlockReceived,
    TransferComplete,
    Aborted,
}

/// Static OTA client parameters
#[derive(Debug, Clone)]
pub struct OtaConfig {
    pub manufacturer_code: u16,
    pub image_type: u16,
    pub current_file_version: u32,
    pub hardware_version: Option<u16>,
    /// Largest block the client will accept per request
    pub max_data_size: u8,
    /// Included in block requests when set (field control bit 0)
    pub ieee_address: Option<[u8; 8]>,
    /// Drive notify->query->first block without caller involvement
    pub auto_drive: bool,
}

impl Default for OtaConfig {
    fn default() -> Self {
        Self {
            manufacturer_code: 0xFFFF,
            image_type: 0xFFFF,
            current_file_version: 0,
            hardware_version: None,
            max_data_size: 64,
            ieee_address: None,
            auto_drive: true,
        }
    }
}

/// Mutable transfer bookkeeping, reset wholesale on abort
#[derive(Debug, Default)]
struct OtaSession {
    stage: OtaStage,
    manufacturer_code: Option<u16>,
    image_type: Option<u16>,
    file_version: Option<u32>,
    image_size: Option<u32>,
    offset: u32,
    /// Server-dictated minimum delay between block requests
    block_request_delay: Option<u16>,
    server: Option<Destination>,
}

impl OtaSession {
    fn reset(&mut self, stage: OtaStage) {
        let server = self.server;
        *self = OtaSession {
            stage,
            server,
            ..OtaSession::default()
        };
    }
}

/// OTA upgrade client for a single device session
#[derive(Clone)]
pub struct OtaClient {
    config: OtaConfig,
    session: Arc<Mutex<OtaSession>>,
    transport: Arc<dyn RadioTransport>,
    sequence: Arc<AtomicU8>,
    events: broadcast::Sender<MeterEvent>,
}

impl OtaClient {
    pub fn new(
        config: OtaConfig,
        transport: Arc<dyn RadioTransport>,
        sequence: Arc<AtomicU8>,
        events: broadcast::Sender<MeterEvent>,
    ) -> Self {
        Self {
            config,
            session: Arc::new(Mutex::new(OtaSession::default())),
            transport,
            sequence,
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, OtaSession> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remember the upgrade server without waiting for an ImageNotify
    pub fn bind(&self, server: Destination) {
        self.lock().server = Some(server);
    }

    #[must_use]
    pub fn stage(&self) -> OtaStage {
        self.lock().stage
    }

    /// (offset, total size) while a transfer is active
    #[must_use]
    pub fn progress(&self) -> Option<(u32, u32)> {
        let session = self.lock();
        session.image_size.map(|size| (session.offset, size))
    }

    pub fn handle_image_notify(
        &self,
        server: Destination,
        notify: &ImageNotify,
    ) -> Result<(), MeterError> {
        info!(
            "Image notify from {:#06x} (payload type {})",
            server.node_id, notify.payload_type
        );
        {
            let mut session = self.lock();
            session.server = Some(server);
            session.stage = OtaStage::ImageAvailable;
        }
        self.emit_stage(OtaStage::ImageAvailable);
        if self.config.auto_drive {
            self.query_next_image()?;
        }
        Ok(())
    }

    /// Ask the server whether a newer image exists
    pub fn query_next_image(&self) -> Result<(), MeterError> {
        let server = self.lock().server.ok_or(MeterError::NotJoined)?;
        let cmd = QueryNextImage {
            manufacturer_code: self.config.manufacturer_code,
            image_type: self.config.image_type,
            current_file_version: self.config.current_file_version,
            hardware_version: self.config.hardware_version,
        };
        self.send(server, ota::QUERY_NEXT_IMAGE, cmd.encode())?;
        self.lock().stage = OtaStage::NextImageRequested;
        self.emit_stage(OtaStage::NextImageRequested);
        Ok(())
    }

    pub fn handle_query_next_image_response(
        &self,
        response: &QueryNextImageResponse,
    ) -> Result<(), MeterError> {
        if !response.status.is_success() {
            info!("No image available: {:?}", response.status);
            let stage = OtaStage::Idle;
            self.lock().reset(stage);
            self.emit_stage(stage);
            return Ok(());
        }

        info!(
            "Image available: version {:#010x}, {} bytes",
            response.file_version, response.image_size
        );
        {
            let mut session = self.lock();
            session.manufacturer_code = Some(response.manufacturer_code);
            session.image_type = Some(response.image_type);
            session.file_version = Some(response.file_version);
            session.image_size = Some(response.image_size);
            session.offset = 0;
            session.stage = OtaStage::NextImageReceived;
        }
        self.emit_stage(OtaStage::NextImageReceived);
        if self.config.auto_drive {
            self.request_next_block()?;
        }
        Ok(())
    }

    /// Request the block at the current offset
    pub fn request_next_block(&self) -> Result<(), MeterError> {
        let (server, cmd) = {
            let session = self.lock();
            let server = session.server.ok_or(MeterError::NotJoined)?;
            let cmd = ImageBlockRequest {
                manufacturer_code: session
                    .manufacturer_code
                    .ok_or(MeterError::NoActiveTransfer)?,
                image_type: session.image_type.ok_or(MeterError::NoActiveTransfer)?,
                file_version: session.file_version.ok_or(MeterError::NoActiveTransfer)?,
                file_offset: session.offset,
                max_data_size: self.config.max_data_size,
                ieee_address: self.config.ieee_address,
                block_request_delay: session.block_request_delay,
            };
            (server, cmd)
        };
        debug!("Requesting image block at offset {}", cmd.file_offset);
        self.send(server, ota::IMAGE_BLOCK_REQUEST, cmd.encode())?;
        self.lock().stage = OtaStage::BlockRequested;
        self.emit_stage(OtaStage::BlockRequested);
        Ok(())
    }

    pub fn handle_image_block_response(
        &self,
        response: &ImageBlockResponse,
    ) -> Result<(), MeterError> {
        match response {
            ImageBlockResponse::Success { data, .. } => self.apply_block(data),
            ImageBlockResponse::WaitForData {
                block_request_delay, ..
            } => {
                debug!("Server asked to wait {block_request_delay}s before next block");
                self.lock().block_request_delay = Some(*block_request_delay);
                Ok(())
            }
            ImageBlockResponse::Abort => {
                warn!("Image transfer aborted by server");
                self.lock().reset(OtaStage::Aborted);
                self.emit_stage(OtaStage::Aborted);
                Ok(())
            }
            ImageBlockResponse::Other(ZclStatus::NoImageAvailable) => {
                warn!("Server withdrew the image mid-transfer");
                self.lock().reset(OtaStage::Aborted);
                self.emit_stage(OtaStage::Aborted);
                Ok(())
            }
            ImageBlockResponse::Other(status) => {
                warn!("Unsupported image block response status {status:?}");
                Ok(())
            }
        }
    }

    fn apply_block(&self, data: &[u8]) -> Result<(), MeterError> {
        let (server, progress, finish) = {
            let mut session = self.lock();
            let Some(size) = session.image_size else {
                debug!("Block response without an active transfer");
                return Ok(());
            };
            if session.stage == OtaStage::TransferComplete {
                debug!("Block response after transfer completion");
                return Ok(());
            }
            session.offset = session.offset.saturating_add(data.len() as u32);
            let done = session.offset >= size;
            session.stage = if done {
                OtaStage::TransferComplete
            } else {
                OtaStage::BlockReceived
            };
            let finish = done.then_some(UpgradeEndRequest {
                status: ZclStatus::Success,
                manufacturer_code: session.manufacturer_code.unwrap_or(0xFFFF),
                image_type: session.image_type.unwrap_or(0xFFFF),
                file_version: session.file_version.unwrap_or(u32::MAX),
            });
            let server = session.server.ok_or(MeterError::NotJoined)?;
            (server, (session.offset, size), finish)
        };

        let _ = self.events.send(MeterEvent::OtaProgress {
            offset: progress.0,
            image_size: progress.1,
        });

        if let Some(cmd) = finish {
            info!("Image transfer complete at offset {}", progress.0);
            self.send(server, ota::UPGRADE_END_REQUEST, cmd.encode())?;
            self.emit_stage(OtaStage::TransferComplete);
        } else {
            self.emit_stage(OtaStage::BlockReceived);
        }
        Ok(())
    }

    pub fn handle_upgrade_end_response(
        &self,
        response: &UpgradeEndResponse,
    ) -> Result<(), MeterError> {
        info!(
            "Upgrade to {:#010x} scheduled for {}",
            response.file_version, response.upgrade_time
        );
        // Upgrade status returns to normal; the transfer bundle is done.
        self.lock().reset(OtaStage::Idle);
        self.emit_stage(OtaStage::Idle);
        Ok(())
    }

    /// Abandon an in-flight transfer and tell the server
    pub fn abort_transfer(&self) -> Result<(), MeterError> {
        let (server, cmd) = {
            let session = self.lock();
            let server = session.server.ok_or(MeterError::NotJoined)?;
            if session.image_size.is_none() {
                return Err(MeterError::NoActiveTransfer);
            }
            let cmd = UpgradeEndRequest {
                status: ZclStatus::Abort,
                manufacturer_code: session.manufacturer_code.unwrap_or(0xFFFF),
                image_type: session.image_type.unwrap_or(0xFFFF),
                file_version: session.file_version.unwrap_or(u32::MAX),
            };
            (server, cmd)
        };
        self.send(server, ota::UPGRADE_END_REQUEST, cmd.encode())?;
        self.lock().reset(OtaStage::Aborted);
        self.emit_stage(OtaStage::Aborted);
        Ok(())
    }

    fn send(&self, server: Destination, command_id: u8, payload: Vec<u8>) -> Result<(), MeterError> {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let frame = ZclFrame::cluster_command(sequence, command_id, payload);
        self.transport.send_unicast(OutboundMessage::new(
            server,
            clusters::OTA_UPGRADE,
            frame.serialize(),
            TxOptions::default(),
        ))
    }

    fn emit_stage(&self, stage: OtaStage) {
        let _ = self.events.send(MeterEvent::OtaStage(stage));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockRadio;

    const SERVER: Destination = Destination {
        node_id: 0x00A1,
        endpoint: 1,
    };

    fn client(auto_drive: bool) -> (OtaClient, Arc<MockRadio>) {
        let radio = Arc::new(MockRadio::new());
        let (tx, _rx) = broadcast::channel(64);
        let config = OtaConfig {
            manufacturer_code: 0x1234,
            image_type: 0x0001,
            current_file_version: 0x0400_0000,
            auto_drive,
            ..OtaConfig::default()
        };
        let client = OtaClient::new(config, radio.clone(), Arc::new(AtomicU8::new(0)), tx);
        (client, radio)
    }

    fn sent_commands(radio: &MockRadio) -> Vec<u8> {
        radio
            .sent()
            .iter()
            .map(|m| ZclFrame::parse(&m.payload).unwrap().command_id)
            .collect()
    }

    fn success_response(size: u32) -> QueryNextImageResponse {
        QueryNextImageResponse {
            status: ZclStatus::Success,
            manufacturer_code: 0x1234,
            image_type: 0x0001,
            file_version: 0x0500_0000,
            image_size: size,
        }
    }

    fn block(len: usize) -> ImageBlockResponse {
        ImageBlockResponse::Success {
            manufacturer_code: 0x1234,
            image_type: 0x0001,
            file_version: 0x0500_0000,
            file_offset: 0,
            data: vec![0xAB; len],
        }
    }

    #[test]
    fn full_transfer_sends_exactly_one_upgrade_end() {
        let (client, radio) = client(true);
        client
            .handle_image_notify(SERVER, &ImageNotify::parse(&[0x00, 0x20]).unwrap())
            .unwrap();
        // Auto-drive: notify triggered the query
        assert_eq!(sent_commands(&radio), vec![ota::QUERY_NEXT_IMAGE]);

        client
            .handle_query_next_image_response(&success_response(1000))
            .unwrap();
        // Auto-drive: first block request went out at offset 0
        assert_eq!(client.stage(), OtaStage::BlockRequested);

        for _ in 0..7 {
            client.handle_image_block_response(&block(128)).unwrap();
            client.request_next_block().unwrap();
        }
        client.handle_image_block_response(&block(104)).unwrap();

        assert_eq!(client.stage(), OtaStage::TransferComplete);
        assert_eq!(client.progress(), Some((1000, 1000)));
        let commands = sent_commands(&radio);
        let upgrade_ends = commands
            .iter()
            .filter(|&&c| c == ota::UPGRADE_END_REQUEST)
            .count();
        assert_eq!(upgrade_ends, 1);
        // 1 query + 8 block requests + 1 upgrade end
        assert_eq!(commands.len(), 10);
    }

    #[test]
    fn block_offsets_increase_by_data_length() {
        let (client, radio) = client(true);
        client
            .handle_image_notify(SERVER, &ImageNotify::parse(&[0x00, 0x20]).unwrap())
            .unwrap();
        client
            .handle_query_next_image_response(&success_response(1000))
            .unwrap();
        client.handle_image_block_response(&block(128)).unwrap();
        client.request_next_block().unwrap();

        // Second block request carries offset 128 (field control 0, so the
        // offset sits at payload bytes 9..13)
        let last = radio.sent().pop().unwrap();
        let frame = ZclFrame::parse(&last.payload).unwrap();
        assert_eq!(frame.command_id, ota::IMAGE_BLOCK_REQUEST);
        assert_eq!(&frame.payload[9..13], &128u32.to_le_bytes());
    }

    #[test]
    fn abort_resets_session_fields() {
        let (client, _radio) = client(true);
        client
            .handle_image_notify(SERVER, &ImageNotify::parse(&[0x00, 0x20]).unwrap())
            .unwrap();
        client
            .handle_query_next_image_response(&success_response(1000))
            .unwrap();
        client.handle_image_block_response(&block(128)).unwrap();

        client
            .handle_image_block_response(&ImageBlockResponse::Abort)
            .unwrap();
        assert_eq!(client.stage(), OtaStage::Aborted);
        assert_eq!(client.progress(), None);
        assert!(matches!(
            client.request_next_block(),
            Err(MeterError::NoActiveTransfer)
        ));
    }

    #[test]
    fn no_image_available_resets_to_idle() {
        let (client, _radio) = client(true);
        client
            .handle_image_notify(SERVER, &ImageNotify::parse(&[0x00, 0x20]).unwrap())
            .unwrap();
        client
            .handle_query_next_image_response(&QueryNextImageResponse {
                status: ZclStatus::NoImageAvailable,
                manufacturer_code: 0xFFFF,
                image_type: 0xFFFF,
                file_version: u32::MAX,
                image_size: u32::MAX,
            })
            .unwrap();
        assert_eq!(client.stage(), OtaStage::Idle);
        assert_eq!(client.progress(), None);
    }

    #[test]
    fn no_image_available_mid_transfer_aborts() {
        let (client, _radio) = client(true);
        client
            .handle_image_notify(SERVER, &ImageNotify::parse(&[0x00, 0x20]).unwrap())
            .unwrap();
        client
            .handle_query_next_image_response(&success_response(1000))
            .unwrap();
        client.handle_image_block_response(&block(128)).unwrap();

        // A bare NO_IMAGE_AVAILABLE status byte in place of a block
        client
            .handle_image_block_response(&ImageBlockResponse::parse(&[0x98]).unwrap())
            .unwrap();
        assert_eq!(client.stage(), OtaStage::Aborted);
        assert_eq!(client.progress(), None);
        assert!(matches!(
            client.request_next_block(),
            Err(MeterError::NoActiveTransfer)
        ));
    }

    #[test]
    fn wait_for_data_records_delay_without_advancing() {
        let (client, radio) = client(true);
        client
            .handle_image_notify(SERVER, &ImageNotify::parse(&[0x00, 0x20]).unwrap())
            .unwrap();
        client
            .handle_query_next_image_response(&success_response(1000))
            .unwrap();

        client
            .handle_image_block_response(&ImageBlockResponse::WaitForData {
                current_time: 100,
                request_time: 160,
                image_type: 0x0001,
                file_version: 0x0500_0000,
                file_offset: 0,
                block_request_delay: 30,
            })
            .unwrap();
        assert_eq!(client.progress(), Some((0, 1000)));

        client.request_next_block().unwrap();
        let last = radio.sent().pop().unwrap();
        let frame = ZclFrame::parse(&last.payload).unwrap();
        // Delay-present field control bit plus the recorded delay at the tail
        assert_eq!(frame.payload[0], 0x02);
        assert_eq!(&frame.payload[14..16], &30u16.to_le_bytes());
    }

    #[test]
    fn manual_mode_does_not_self_drive() {
        let (client, radio) = client(false);
        client
            .handle_image_notify(SERVER, &ImageNotify::parse(&[0x00, 0x20]).unwrap())
            .unwrap();
        assert_eq!(client.stage(), OtaStage::ImageAvailable);
        assert!(radio.sent().is_empty());
    }

    #[test]
    fn upgrade_end_response_returns_to_idle() {
        let (client, _radio) = client(true);
        client
            .handle_image_notify(SERVER, &ImageNotify::parse(&[0x00, 0x20]).unwrap())
            .unwrap();
        client
            .handle_query_next_image_response(&success_response(128))
            .unwrap();
        client.handle_image_block_response(&block(128)).unwrap();
        assert_eq!(client.stage(), OtaStage::TransferComplete);

        client
            .handle_upgrade_end_response(&UpgradeEndResponse {
                manufacturer_code: 0x1234,
                image_type: 0x0001,
                file_version: 0x0500_0000,
                current_time: 500,
                upgrade_time: 600,
            })
            .unwrap();
        assert_eq!(client.stage(), OtaStage::Idle);
        assert_eq!(client.progress(), None);
    }
}
