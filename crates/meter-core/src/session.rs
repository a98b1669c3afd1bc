//! Per-device meter session
//!
//! One `MeterSession` per joined device. The owner of the radio's receive
//! pump pushes inbound messages into `handle_message`; outbound requests go
//! through the injected `RadioTransport`. Attribute reads are correlated by
//! ZCL sequence number against a pending-waiter map with a timeout; a
//! response arriving after its waiter timed out is discarded.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{broadcast, oneshot, Mutex};
use tracing::{debug, info, warn};

use zcl_protocol::commands::{
    GetCurrentPrice, GetProfile, GetScheduledEvents, MessageConfirmation,
};
use zcl_protocol::responses::{
    CancelAllLoadControlEvents, CancelLoadControlEvent, DisplayMessage, GetProfileResponse,
    ImageBlockResponse, ImageNotify, LoadControlEvent, PublishBlockPeriod, PublishPrice,
    QueryNextImageResponse, UpgradeEndResponse,
};
use zcl_protocol::types::{clusters, drlc, global, messaging, metering, metering_attrs, ota, price};
use zcl_protocol::{
    AttributeRecord, DataType, FrameType, ReadAttributes, ZclError, ZclFrame, ZclStatus,
};

use crate::clock::Clock;
use crate::drlc::{DrlcConfig, DrlcEngine};
use crate::events::MeterEvent;
use crate::ota::{OtaClient, OtaConfig};
use crate::readings::{MeterReadings, MeterSummary};
use crate::transport::{Destination, InboundMessage, OutboundMessage, RadioTransport, TxOptions};
use crate::MeterError;

const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);
const READ_ATTEMPTS: u32 = 3;
const EVENT_CAPACITY: usize = 64;

/// Attribute batch for the composite energy-and-demand read
const ENERGY_AND_DEMAND: &[(u16, DataType)] = &[
    (metering_attrs::CURRENT_SUMMATION_DELIVERED, DataType::Uint48),
    (metering_attrs::CURRENT_SUMMATION_RECEIVED, DataType::Uint48),
    (metering_attrs::STATUS, DataType::Bitmap8),
    (metering_attrs::UNIT_OF_MEASURE, DataType::Enum8),
    (metering_attrs::MULTIPLIER, DataType::Uint24),
    (metering_attrs::DIVISOR, DataType::Uint24),
    (metering_attrs::SUMMATION_FORMATTING, DataType::Bitmap8),
    (metering_attrs::INSTANTANEOUS_DEMAND, DataType::Int24),
];

/// A single device session: correlation, cached readings, DRLC and OTA
pub struct MeterSession {
    transport: Arc<dyn RadioTransport>,
    clock: Arc<dyn Clock>,
    sequence: Arc<AtomicU8>,
    pending: Mutex<HashMap<u8, oneshot::Sender<Vec<u8>>>>,
    server: StdMutex<Option<Destination>>,
    readings: StdMutex<MeterReadings>,
    pub drlc: DrlcEngine,
    pub ota: OtaClient,
    events: broadcast::Sender<MeterEvent>,
}

impl MeterSession {
    pub fn new(
        transport: Arc<dyn RadioTransport>,
        clock: Arc<dyn Clock>,
        drlc_config: DrlcConfig,
        ota_config: OtaConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let sequence = Arc::new(AtomicU8::new(0));
        let drlc = DrlcEngine::new(
            drlc_config,
            transport.clone(),
            clock.clone(),
            sequence.clone(),
            events.clone(),
        );
        let ota = OtaClient::new(
            ota_config,
            transport.clone(),
            sequence.clone(),
            events.clone(),
        );
        Self {
            transport,
            clock,
            sequence,
            pending: Mutex::new(HashMap::new()),
            server: StdMutex::new(None),
            readings: StdMutex::new(MeterReadings::default()),
            drlc,
            ota,
            events,
        }
    }

    /// Subscribe to decoded inbound events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<MeterEvent> {
        self.events.subscribe()
    }

    /// Record the joined device as the server for outbound requests
    pub fn bind(&self, server: Destination) {
        info!(
            "Bound to meter {:#06x} endpoint {}",
            server.node_id, server.endpoint
        );
        *self.lock_server() = Some(server);
        self.ota.bind(server);
    }

    fn lock_server(&self) -> MutexGuard<'_, Option<Destination>> {
        self.server.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_readings(&self) -> MutexGuard<'_, MeterReadings> {
        self.readings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn server(&self) -> Result<Destination, MeterError> {
        self.lock_server().ok_or(MeterError::NotJoined)
    }

    fn next_sequence(&self) -> u8 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    /// Snapshot of the cached readings
    #[must_use]
    pub fn readings(&self) -> MeterReadings {
        self.lock_readings().clone()
    }

    /// Scaled energy snapshot from the cache
    #[must_use]
    pub fn summary(&self) -> MeterSummary {
        self.lock_readings().summary()
    }

    /// Read a batch of attributes and fold the records into the cache.
    ///
    /// The device's reported data type is checked against the expected one
    /// per attribute; a mismatch aborts the whole batch since record widths
    /// past the mismatch cannot be trusted.
    pub async fn read_attributes(
        &self,
        use_security: bool,
        cluster_id: u16,
        attributes: &[(u16, DataType)],
    ) -> Result<Vec<AttributeRecord>, MeterError> {
        let server = self.server()?;
        let sequence = self.next_sequence();
        let request = ReadAttributes {
            attributes: attributes.iter().map(|(id, _)| *id).collect(),
        };
        let frame = ZclFrame::global_command(sequence, global::READ_ATTRIBUTES, request.encode());

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(sequence, tx);

        debug!("Reading {} attributes from cluster {cluster_id:#06x} (seq {sequence})", attributes.len());
        let options = TxOptions::default().with_encryption(use_security);
        if let Err(e) = self.transport.send_unicast(OutboundMessage::new(
            server,
            cluster_id,
            frame.serialize(),
            options,
        )) {
            self.pending.lock().await.remove(&sequence);
            return Err(e);
        }

        let payload = match tokio::time::timeout(RESPONSE_TIMEOUT, rx).await {
            Ok(Ok(payload)) => payload,
            Ok(Err(_)) => return Err(MeterError::Timeout),
            Err(_) => {
                // Late responses find no waiter and are discarded
                self.pending.lock().await.remove(&sequence);
                return Err(MeterError::Timeout);
            }
        };

        let records = parse_attribute_records(attributes, &payload)?;
        let mut readings = self.lock_readings();
        for record in &records {
            readings.apply_attribute(cluster_id, record);
        }
        Ok(records)
    }

    /// Composite read of the summation/demand/scaling attributes, retried on
    /// timeout before propagating.
    pub async fn read_energy_and_demand(&self) -> Result<MeterSummary, MeterError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self
                .read_attributes(true, clusters::SIMPLE_METERING, ENERGY_AND_DEMAND)
                .await
            {
                Ok(_) => return Ok(self.summary()),
                Err(MeterError::Timeout) if attempt < READ_ATTEMPTS => {
                    warn!("Energy read attempt {attempt} timed out, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Dispatch one inbound message by cluster and command
    pub async fn handle_message(&self, message: InboundMessage) -> Result<(), MeterError> {
        let frame = ZclFrame::parse(&message.payload)?;
        debug!(
            "Inbound cluster {:#06x} command {:#04x} (seq {})",
            message.cluster_id, frame.command_id, frame.sequence
        );

        if frame.frame_type == FrameType::Global {
            return self.handle_global(&message, &frame).await;
        }

        match message.cluster_id {
            clusters::DRLC => self.handle_drlc(&message, &frame)?,
            clusters::OTA_UPGRADE => self.handle_ota(&message, &frame)?,
            clusters::MESSAGING => self.handle_messaging(&message, &frame)?,
            clusters::PRICE => self.handle_price(&message, &frame)?,
            clusters::SIMPLE_METERING => self.handle_metering(&message, &frame)?,
            other => {
                debug!("Command for unsupported cluster {other:#06x}");
                self.send_default_response(
                    &message,
                    frame.sequence,
                    frame.command_id,
                    ZclStatus::UnsupportedClusterCommand,
                )?;
            }
        }
        Ok(())
    }

    async fn handle_global(
        &self,
        message: &InboundMessage,
        frame: &ZclFrame,
    ) -> Result<(), MeterError> {
        match frame.command_id {
            global::READ_ATTRIBUTES_RESPONSE => {
                let waiter = self.pending.lock().await.remove(&frame.sequence);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(frame.payload.clone());
                    }
                    None => debug!("Discarding read response for stale seq {}", frame.sequence),
                }
            }
            global::DEFAULT_RESPONSE => {
                if frame.payload.len() >= 2 {
                    let status = ZclStatus::from(frame.payload[1]);
                    if !status.is_success() {
                        warn!(
                            "Default response {status:?} for command {:#04x}",
                            frame.payload[0]
                        );
                    }
                }
            }
            global::WRITE_ATTRIBUTES_RESPONSE
            | global::CONFIGURE_REPORTING_RESPONSE
            | global::READ_REPORTING_CONFIGURATION_RESPONSE
            | global::DISCOVER_ATTRIBUTES_RESPONSE => {
                debug!(
                    "Ignoring unsolicited global response {:#04x}",
                    frame.command_id
                );
            }
            other => self.send_default_response(
                message,
                frame.sequence,
                other,
                ZclStatus::UnsupportedGeneralCommand,
            )?,
        }
        Ok(())
    }

    fn handle_drlc(&self, message: &InboundMessage, frame: &ZclFrame) -> Result<(), MeterError> {
        match frame.command_id {
            drlc::LOAD_CONTROL_EVENT => {
                let cmd = LoadControlEvent::parse(&frame.payload)?;
                self.drlc.handle_load_control_event(message.source, &cmd);
            }
            drlc::CANCEL_LOAD_CONTROL_EVENT => {
                let cmd = CancelLoadControlEvent::parse(&frame.payload)?;
                self.drlc.handle_cancel(message.source, &cmd);
            }
            drlc::CANCEL_ALL_LOAD_CONTROL_EVENTS => {
                let cmd = CancelAllLoadControlEvents::parse(&frame.payload)?;
                self.drlc.handle_cancel_all(&cmd);
            }
            other => self.send_default_response(
                message,
                frame.sequence,
                other,
                ZclStatus::UnsupportedClusterCommand,
            )?,
        }
        Ok(())
    }

    fn handle_ota(&self, message: &InboundMessage, frame: &ZclFrame) -> Result<(), MeterError> {
        match frame.command_id {
            ota::IMAGE_NOTIFY => {
                let notify = ImageNotify::parse(&frame.payload)?;
                self.ota.handle_image_notify(message.source, &notify)?;
            }
            ota::QUERY_NEXT_IMAGE_RESPONSE => {
                let response = QueryNextImageResponse::parse(&frame.payload)?;
                self.ota.handle_query_next_image_response(&response)?;
            }
            ota::IMAGE_BLOCK_RESPONSE => {
                let response = ImageBlockResponse::parse(&frame.payload)?;
                self.ota.handle_image_block_response(&response)?;
            }
            ota::UPGRADE_END_RESPONSE => {
                let response = UpgradeEndResponse::parse(&frame.payload)?;
                self.ota.handle_upgrade_end_response(&response)?;
            }
            other => self.send_default_response(
                message,
                frame.sequence,
                other,
                ZclStatus::UnsupportedClusterCommand,
            )?,
        }
        Ok(())
    }

    fn handle_messaging(
        &self,
        message: &InboundMessage,
        frame: &ZclFrame,
    ) -> Result<(), MeterError> {
        match frame.command_id {
            messaging::DISPLAY_MESSAGE => {
                let msg = DisplayMessage::parse(&frame.payload)?;
                info!("Message {}: {}", msg.message_id, msg.message);
                // High bit of the control field asks for a confirmation
                if msg.message_control & 0x80 != 0 {
                    self.confirm_message(msg.message_id)?;
                }
                self.lock_readings().last_message = Some(msg.clone());
                let _ = self.events.send(MeterEvent::MessageReceived(msg));
            }
            other => self.send_default_response(
                message,
                frame.sequence,
                other,
                ZclStatus::UnsupportedClusterCommand,
            )?,
        }
        Ok(())
    }

    fn handle_price(&self, message: &InboundMessage, frame: &ZclFrame) -> Result<(), MeterError> {
        match frame.command_id {
            price::PUBLISH_PRICE => {
                let published = PublishPrice::parse(&frame.payload)?;
                info!(
                    "Price published: {} for {} minutes",
                    published.price, published.duration_minutes
                );
                self.lock_readings().last_price = Some(published.clone());
                let _ = self.events.send(MeterEvent::PriceReceived(published));
            }
            price::PUBLISH_BLOCK_PERIOD => {
                let period = PublishBlockPeriod::parse(&frame.payload)?;
                self.lock_readings().last_block_period = Some(period.clone());
                let _ = self.events.send(MeterEvent::BlockPeriodReceived(period));
            }
            other => self.send_default_response(
                message,
                frame.sequence,
                other,
                ZclStatus::UnsupportedClusterCommand,
            )?,
        }
        Ok(())
    }

    fn handle_metering(
        &self,
        message: &InboundMessage,
        frame: &ZclFrame,
    ) -> Result<(), MeterError> {
        match frame.command_id {
            metering::GET_PROFILE_RESPONSE => {
                let response = GetProfileResponse::parse(&frame.payload)?;
                debug!(
                    "Load profile: {} intervals ending at {}",
                    response.intervals.len(),
                    response.end_time
                );
                self.lock_readings().apply_load_profile(&response);
            }
            other => self.send_default_response(
                message,
                frame.sequence,
                other,
                ZclStatus::UnsupportedClusterCommand,
            )?,
        }
        Ok(())
    }

    fn send_default_response(
        &self,
        message: &InboundMessage,
        sequence: u8,
        command_id: u8,
        status: ZclStatus,
    ) -> Result<(), MeterError> {
        debug!("Answering command {command_id:#04x} with {status:?}");
        let frame = ZclFrame::default_response(sequence, command_id, status);
        self.transport.send_unicast(OutboundMessage::new(
            message.source,
            message.cluster_id,
            frame.serialize(),
            TxOptions::default(),
        ))
    }

    fn send_command(
        &self,
        cluster_id: u16,
        command_id: u8,
        payload: Vec<u8>,
        options: TxOptions,
    ) -> Result<(), MeterError> {
        let server = self.server()?;
        let frame = ZclFrame::cluster_command(self.next_sequence(), command_id, payload);
        self.transport.send_unicast(OutboundMessage::new(
            server,
            cluster_id,
            frame.serialize(),
            options,
        ))
    }

    /// Ask for the currently active price
    pub fn get_current_price(&self) -> Result<(), MeterError> {
        self.send_command(
            clusters::PRICE,
            price::GET_CURRENT_PRICE,
            GetCurrentPrice {
                rx_on_when_idle: true,
            }
            .encode(),
            TxOptions::secure(),
        )
    }

    /// Ask the server to re-send the latest display message
    pub fn get_last_message(&self) -> Result<(), MeterError> {
        self.send_command(
            clusters::MESSAGING,
            messaging::GET_LAST_MESSAGE,
            Vec::new(),
            TxOptions::secure(),
        )
    }

    /// Confirm a display message by id
    pub fn confirm_message(&self, message_id: u32) -> Result<(), MeterError> {
        let cmd = MessageConfirmation {
            message_id,
            confirmation_time: self.clock.utc_now(),
        };
        self.send_command(
            clusters::MESSAGING,
            messaging::MESSAGE_CONFIRMATION,
            cmd.encode(),
            TxOptions::secure(),
        )
    }

    /// Request load-profile intervals; the response replaces the cached table
    pub fn request_load_profile(
        &self,
        interval_channel: u8,
        end_time: u32,
        number_of_periods: u8,
    ) -> Result<(), MeterError> {
        let cmd = GetProfile {
            interval_channel,
            end_time,
            number_of_periods,
        };
        self.send_command(
            clusters::SIMPLE_METERING,
            metering::GET_PROFILE,
            cmd.encode(),
            TxOptions::secure(),
        )
    }

    /// Ask the DRLC server to re-send scheduled events
    pub fn get_scheduled_events(
        &self,
        start_time: u32,
        number_of_events: u8,
    ) -> Result<(), MeterError> {
        let cmd = GetScheduledEvents {
            start_time,
            number_of_events,
        };
        self.send_command(
            clusters::DRLC,
            drlc::GET_SCHEDULED_EVENTS,
            cmd.encode(),
            TxOptions::secure(),
        )
    }
}

fn parse_attribute_records(
    expected: &[(u16, DataType)],
    payload: &[u8],
) -> Result<Vec<AttributeRecord>, ZclError> {
    let mut offset = 0;
    let mut records = Vec::new();
    while offset < payload.len() {
        let record = AttributeRecord::parse(payload, &mut offset)?;
        if let Some(actual) = record.data_type {
            if let Some((_, wanted)) = expected.iter().find(|(id, _)| *id == record.id) {
                if actual != *wanted {
                    return Err(ZclError::TypeMismatch {
                        attribute: record.id,
                        expected: *wanted,
                        actual,
                    });
                }
            }
        }
        records.push(record);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{FixedClock, MockRadio};
    use zcl_protocol::{Direction, ZclValue};

    const METER: Destination = Destination {
        node_id: 0x00B2,
        endpoint: 1,
    };

    fn session() -> (Arc<MeterSession>, Arc<MockRadio>) {
        let radio = Arc::new(MockRadio::new());
        let clock = Arc::new(FixedClock::new(10_000));
        let session = Arc::new(MeterSession::new(
            radio.clone(),
            clock,
            DrlcConfig::default(),
            OtaConfig::default(),
        ));
        session.bind(METER);
        (session, radio)
    }

    fn attribute_bytes(id: u16, data_type: DataType, value: &ZclValue) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&id.to_le_bytes());
        data.push(0x00); // Success
        data.push(data_type as u8);
        value.encode(&mut data);
        data
    }

    fn response_frame(sequence: u8, payload: Vec<u8>) -> InboundMessage {
        let frame = ZclFrame {
            frame_type: FrameType::Global,
            manufacturer_code: None,
            direction: Direction::ServerToClient,
            disable_default_response: false,
            sequence,
            command_id: global::READ_ATTRIBUTES_RESPONSE,
            payload,
        };
        InboundMessage {
            source: METER,
            cluster_id: clusters::SIMPLE_METERING,
            payload: frame.serialize(),
        }
    }

    fn cluster_frame(cluster_id: u16, command_id: u8, payload: Vec<u8>) -> InboundMessage {
        let frame = ZclFrame {
            frame_type: FrameType::ClusterSpecific,
            manufacturer_code: None,
            direction: Direction::ServerToClient,
            disable_default_response: false,
            sequence: 0x55,
            command_id,
            payload,
        };
        InboundMessage {
            source: METER,
            cluster_id,
            payload: frame.serialize(),
        }
    }

    fn last_sent_sequence(radio: &MockRadio) -> u8 {
        let sent = radio.sent();
        ZclFrame::parse(&sent.last().unwrap().payload)
            .unwrap()
            .sequence
    }

    #[tokio::test(start_paused = true)]
    async fn read_attributes_correlates_by_sequence() {
        let (session, radio) = session();
        let reader = session.clone();
        let handle = tokio::spawn(async move {
            reader
                .read_attributes(
                    true,
                    clusters::SIMPLE_METERING,
                    &[(metering_attrs::CURRENT_SUMMATION_DELIVERED, DataType::Uint48)],
                )
                .await
        });
        tokio::task::yield_now().await;

        let sequence = last_sent_sequence(&radio);
        let payload = attribute_bytes(
            metering_attrs::CURRENT_SUMMATION_DELIVERED,
            DataType::Uint48,
            &ZclValue::Uint48(123_456),
        );
        session
            .handle_message(response_frame(sequence, payload))
            .await
            .unwrap();

        let records = handle.await.unwrap().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].value, Some(ZclValue::Uint48(123_456)));
        // Folded into the cache with default 1/1 scaling
        assert!((session.summary().summation_delivered - 123_456.0).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn type_mismatch_aborts_the_batch() {
        let (session, radio) = session();
        let reader = session.clone();
        let handle = tokio::spawn(async move {
            reader
                .read_attributes(
                    true,
                    clusters::SIMPLE_METERING,
                    &[
                        (metering_attrs::CURRENT_SUMMATION_DELIVERED, DataType::Uint48),
                        (metering_attrs::MULTIPLIER, DataType::Uint24),
                    ],
                )
                .await
        });
        tokio::task::yield_now().await;

        let sequence = last_sent_sequence(&radio);
        let mut payload = attribute_bytes(
            metering_attrs::CURRENT_SUMMATION_DELIVERED,
            DataType::Uint48,
            &ZclValue::Uint48(500),
        );
        // The device reports the wrong width for the multiplier
        payload.extend(attribute_bytes(
            metering_attrs::MULTIPLIER,
            DataType::Uint32,
            &ZclValue::Uint32(3),
        ));
        session
            .handle_message(response_frame(sequence, payload))
            .await
            .unwrap();

        let result = handle.await.unwrap();
        assert!(matches!(
            result,
            Err(MeterError::Codec(ZclError::TypeMismatch { .. }))
        ));
        // Nothing from the aborted batch reached the cache
        assert_eq!(session.summary().summation_delivered, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_then_late_response_is_discarded() {
        let (session, radio) = session();
        let result = session
            .read_attributes(
                true,
                clusters::SIMPLE_METERING,
                &[(metering_attrs::CURRENT_SUMMATION_DELIVERED, DataType::Uint48)],
            )
            .await;
        assert!(matches!(result, Err(MeterError::Timeout)));

        // The response shows up anyway; no waiter, no cache update
        let sequence = last_sent_sequence(&radio);
        let payload = attribute_bytes(
            metering_attrs::CURRENT_SUMMATION_DELIVERED,
            DataType::Uint48,
            &ZclValue::Uint48(999),
        );
        session
            .handle_message(response_frame(sequence, payload))
            .await
            .unwrap();
        assert_eq!(session.summary().summation_delivered, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn energy_read_retries_three_times_on_timeout() {
        let (session, radio) = session();
        let result = session.read_energy_and_demand().await;
        assert!(matches!(result, Err(MeterError::Timeout)));
        assert_eq!(radio.sent().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn unjoined_session_fails_fast() {
        let radio = Arc::new(MockRadio::new());
        let session = MeterSession::new(
            radio.clone(),
            Arc::new(FixedClock::new(0)),
            DrlcConfig::default(),
            OtaConfig::default(),
        );
        let result = session
            .read_attributes(true, clusters::SIMPLE_METERING, &[])
            .await;
        assert!(matches!(result, Err(MeterError::NotJoined)));
        assert!(radio.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unsupported_command_gets_default_response() {
        let (session, radio) = session();
        session
            .handle_message(cluster_frame(clusters::DRLC, 0x7F, Vec::new()))
            .await
            .unwrap();

        let sent = radio.sent();
        let frame = ZclFrame::parse(&sent.last().unwrap().payload).unwrap();
        assert_eq!(frame.command_id, global::DEFAULT_RESPONSE);
        assert_eq!(frame.sequence, 0x55);
        assert_eq!(frame.payload, vec![0x7F, 0x81]);
    }

    #[tokio::test(start_paused = true)]
    async fn unsupported_global_command_gets_default_response() {
        let (session, radio) = session();
        // A write-attributes request, which this client does not serve
        let frame = ZclFrame {
            frame_type: FrameType::Global,
            manufacturer_code: None,
            direction: Direction::ServerToClient,
            disable_default_response: false,
            sequence: 0x66,
            command_id: 0x02,
            payload: Vec::new(),
        };
        session
            .handle_message(InboundMessage {
                source: METER,
                cluster_id: clusters::SIMPLE_METERING,
                payload: frame.serialize(),
            })
            .await
            .unwrap();

        let sent = radio.sent();
        let frame = ZclFrame::parse(&sent.last().unwrap().payload).unwrap();
        assert_eq!(frame.command_id, global::DEFAULT_RESPONSE);
        assert_eq!(frame.sequence, 0x66);
        assert_eq!(frame.payload, vec![0x02, 0x82]);

        // An unsolicited response-type global is dropped, not answered
        let before = radio.sent().len();
        let frame = ZclFrame {
            frame_type: FrameType::Global,
            manufacturer_code: None,
            direction: Direction::ServerToClient,
            disable_default_response: false,
            sequence: 0x67,
            command_id: global::WRITE_ATTRIBUTES_RESPONSE,
            payload: vec![0x00],
        };
        session
            .handle_message(InboundMessage {
                source: METER,
                cluster_id: clusters::SIMPLE_METERING,
                payload: frame.serialize(),
            })
            .await
            .unwrap();
        assert_eq!(radio.sent().len(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn display_message_is_cached_and_confirmed() {
        let (session, radio) = session();
        let mut payload = Vec::new();
        payload.extend_from_slice(&42u32.to_le_bytes());
        payload.push(0x80); // confirmation required
        payload.extend_from_slice(&0u32.to_le_bytes());
        payload.extend_from_slice(&30u16.to_le_bytes());
        payload.push(2);
        payload.extend_from_slice(b"Hi");

        session
            .handle_message(cluster_frame(
                clusters::MESSAGING,
                messaging::DISPLAY_MESSAGE,
                payload,
            ))
            .await
            .unwrap();

        assert_eq!(
            session.readings().last_message.map(|m| m.message_id),
            Some(42)
        );
        let sent = radio.sent();
        let frame = ZclFrame::parse(&sent.last().unwrap().payload).unwrap();
        assert_eq!(frame.command_id, messaging::MESSAGE_CONFIRMATION);
        assert_eq!(&frame.payload[0..4], &42u32.to_le_bytes());
    }

    #[tokio::test(start_paused = true)]
    async fn publish_price_is_cached_and_broadcast() {
        let (session, _radio) = session();
        let mut subscriber = session.subscribe();

        let mut payload = Vec::new();
        payload.extend_from_slice(&1u32.to_le_bytes());
        payload.push(0); // empty rate label
        payload.extend_from_slice(&9u32.to_le_bytes());
        payload.extend_from_slice(&500u32.to_le_bytes());
        payload.push(0x00);
        payload.extend_from_slice(&840u16.to_le_bytes());
        payload.push(0x31);
        payload.push(0x11);
        payload.extend_from_slice(&600u32.to_le_bytes());
        payload.extend_from_slice(&120u16.to_le_bytes());
        payload.extend_from_slice(&1750u32.to_le_bytes());

        session
            .handle_message(cluster_frame(clusters::PRICE, price::PUBLISH_PRICE, payload))
            .await
            .unwrap();

        assert_eq!(session.readings().last_price.map(|p| p.price), Some(1750));
        match subscriber.recv().await.unwrap() {
            MeterEvent::PriceReceived(p) => assert_eq!(p.price, 1750),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn load_profile_response_replaces_table() {
        let (session, _radio) = session();
        let mut payload = Vec::new();
        payload.extend_from_slice(&1000u32.to_le_bytes());
        payload.push(0x00);
        payload.push(0x05);
        payload.push(2);
        payload.extend_from_slice(&[0x10, 0x00, 0x00]);
        payload.extend_from_slice(&[0xFF, 0xFF, 0xFF]);

        session
            .handle_message(cluster_frame(
                clusters::SIMPLE_METERING,
                metering::GET_PROFILE_RESPONSE,
                payload,
            ))
            .await
            .unwrap();

        let readings = session.readings();
        assert_eq!(readings.load_profile.end_time, 1000);
        assert_eq!(readings.load_profile.values, vec![Some(16), None]);
    }
}
