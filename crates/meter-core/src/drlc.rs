//! Demand-Response/Load-Control event engine
//!
//! Events arrive as LoadControlEvent commands and live in exactly one of
//! three disjoint collections: scheduled (future start), running (keyed
//! additionally by device class) or completed (terminal). Membership only
//! ever moves forward. All three collections sit behind one mutex so the
//! timer-fire and message-receive paths are mutually excluded; the mutex is
//! never held across an await.
//!
//! Each event owns at most one timer slot. Re-arming the slot (opt-out,
//! pending cancel) aborts the previous handle, and a timer that fires after
//! its event already left scheduled/running finds no membership and becomes
//! a no-op.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bitflags::bitflags;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use zcl_protocol::commands::ReportEventStatus;
use zcl_protocol::responses::{
    CancelAllLoadControlEvents, CancelLoadControlEvent, LoadControlEvent,
};
use zcl_protocol::types::{clusters, drlc};
use zcl_protocol::ZclFrame;

use crate::clock::Clock;
use crate::events::MeterEvent;
use crate::transport::{Destination, OutboundMessage, RadioTransport, TxOptions};

bitflags! {
    /// Device classes a load-control event can target, one bit per class
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DeviceClass: u16 {
        const HVAC = 0x0001;
        const STRIP_HEATER = 0x0002;
        const WATER_HEATER = 0x0004;
        const POOL_PUMP = 0x0008;
        const SMART_APPLIANCE = 0x0010;
        const IRRIGATION_PUMP = 0x0020;
        const MANAGED_LOADS = 0x0040;
        const SIMPLE_LOADS = 0x0080;
        const EXTERIOR_LIGHTING = 0x0100;
        const INTERIOR_LIGHTING = 0x0200;
        const ELECTRIC_VEHICLE = 0x0400;
        const GENERATION = 0x0800;
    }
}

impl DeviceClass {
    /// Wildcard matching every defined class
    pub const ALL: DeviceClass = DeviceClass::all();
    /// Matches no class at all
    pub const NONE: DeviceClass = DeviceClass::empty();
}

bitflags! {
    /// Event control flags carried on a load-control event
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EventControl: u8 {
        const RANDOMIZE_START = 0x01;
        const RANDOMIZE_DURATION = 0x02;
        const MANDATORY = 0x04;
    }
}

/// SE 1.1 event status values carried in ReportEventStatus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    CommandReceived,
    EventStarted,
    EventCompleted,
    UserOptOut,
    UserOptIn,
    Cancelled,
    Superseded,
    PartialCompletionOptOut,
    PartialCompletionOptIn,
    EventCompleteNoParticipation,
    RejectedInvalidCancelCommand,
    RejectedInvalidEffectiveTime,
    RejectedEventExpired,
    RejectedUndefinedEvent,
    EventRejected,
}

impl EventStatus {
    #[must_use]
    pub fn as_u8(self) -> u8 {
        match self {
            EventStatus::CommandReceived => 0x01,
            EventStatus::EventStarted => 0x02,
            EventStatus::EventCompleted => 0x03,
            EventStatus::UserOptOut => 0x04,
            EventStatus::UserOptIn => 0x05,
            EventStatus::Cancelled => 0x06,
            EventStatus::Superseded => 0x07,
            EventStatus::PartialCompletionOptOut => 0x08,
            EventStatus::PartialCompletionOptIn => 0x09,
            EventStatus::EventCompleteNoParticipation => 0x0A,
            EventStatus::RejectedInvalidCancelCommand => 0xF8,
            EventStatus::RejectedInvalidEffectiveTime => 0xF9,
            EventStatus::RejectedEventExpired => 0xFB,
            EventStatus::RejectedUndefinedEvent => 0xFD,
            EventStatus::EventRejected => 0xFE,
        }
    }

    /// Terminal statuses file the event into the completed collection
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(
            self,
            EventStatus::CommandReceived
                | EventStatus::EventStarted
                | EventStatus::UserOptOut
                | EventStatus::UserOptIn
        )
    }
}

/// This device's DRLC enrollment
#[derive(Debug, Clone, Copy)]
pub struct DrlcConfig {
    pub device_classes: DeviceClass,
    pub utility_enrollment_group: u8,
}

impl Default for DrlcConfig {
    fn default() -> Self {
        Self {
            device_classes: DeviceClass::ALL,
            utility_enrollment_group: 0,
        }
    }
}

/// A tracked load-control event, identity = issuer event id
#[derive(Debug, Clone)]
pub struct DrlcEvent {
    pub issuer_event_id: u32,
    pub device_class: DeviceClass,
    pub utility_enrollment_group: u8,
    /// UTC start; a wire value of 0 is materialized to "now" at receipt
    pub start_time: u32,
    pub duration_minutes: u16,
    pub criticality_level: u8,
    pub cooling_set_point: u16,
    pub heating_set_point: u16,
    pub average_load_adjustment_pct: i8,
    pub duty_cycle: u8,
    pub event_control: EventControl,
    pub status: EventStatus,
    /// Reply destination for status reports
    pub server: Destination,
    pub cancel_pending: bool,
    pub opted_out_before_start: bool,
}

impl DrlcEvent {
    fn from_wire(cmd: &LoadControlEvent, server: Destination) -> Self {
        Self {
            issuer_event_id: cmd.issuer_event_id,
            device_class: DeviceClass::from_bits_truncate(cmd.device_class),
            utility_enrollment_group: cmd.utility_enrollment_group,
            start_time: cmd.start_time,
            duration_minutes: cmd.duration_minutes,
            criticality_level: cmd.criticality_level,
            cooling_set_point: cmd.cooling_set_point,
            heating_set_point: cmd.heating_set_point,
            average_load_adjustment_pct: cmd.average_load_adjustment_pct,
            duty_cycle: cmd.duty_cycle,
            event_control: EventControl::from_bits_truncate(cmd.event_control),
            status: EventStatus::CommandReceived,
            server,
            cancel_pending: false,
            opted_out_before_start: false,
        }
    }

    /// Natural end of the event window
    #[must_use]
    pub fn end_time(&self) -> u32 {
        self.start_time
            .saturating_add(u32::from(self.duration_minutes) * 60)
    }
}

#[derive(Default)]
struct DrlcState {
    scheduled: HashMap<u32, DrlcEvent>,
    running: HashMap<u32, DrlcEvent>,
    /// Single class bit -> issuer event id currently holding that slot
    class_slots: HashMap<u16, u32>,
    completed: HashMap<u32, DrlcEvent>,
}

/// The DRLC engine, clone-cheap so timer tasks can re-enter it
#[derive(Clone)]
pub struct DrlcEngine {
    config: DrlcConfig,
    state: Arc<Mutex<DrlcState>>,
    timers: Arc<DashMap<u32, JoinHandle<()>>>,
    transport: Arc<dyn RadioTransport>,
    clock: Arc<dyn Clock>,
    sequence: Arc<AtomicU8>,
    events: broadcast::Sender<MeterEvent>,
}

impl DrlcEngine {
    pub fn new(
        config: DrlcConfig,
        transport: Arc<dyn RadioTransport>,
        clock: Arc<dyn Clock>,
        sequence: Arc<AtomicU8>,
        events: broadcast::Sender<MeterEvent>,
    ) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(DrlcState::default())),
            timers: Arc::new(DashMap::new()),
            transport,
            clock,
            sequence,
            events,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, DrlcState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Eligibility filter: group wildcard on either side or exact match,
    /// AND a non-empty class intersection.
    #[must_use]
    pub fn should_handle(&self, device_class: DeviceClass, enrollment_group: u8) -> bool {
        let group_ok = enrollment_group == 0
            || self.config.utility_enrollment_group == 0
            || enrollment_group == self.config.utility_enrollment_group;
        group_ok && !(device_class & self.config.device_classes).is_empty()
    }

    pub fn handle_load_control_event(&self, server: Destination, cmd: &LoadControlEvent) {
        let now = self.clock.utc_now();
        let mut event = DrlcEvent::from_wire(cmd, server);
        let id = event.issuer_event_id;

        {
            let state = self.lock_state();
            if state.scheduled.contains_key(&id)
                || state.running.contains_key(&id)
                || state.completed.contains_key(&id)
            {
                debug!("Ignoring duplicate load control event {id}");
                return;
            }
        }

        if !self.should_handle(event.device_class, event.utility_enrollment_group) {
            debug!(
                "Load control event {id} not for us (class {:#06x}, group {})",
                event.device_class.bits(),
                event.utility_enrollment_group
            );
            event.status = EventStatus::EventRejected;
            self.emit(id, event.status);
            self.lock_state().completed.insert(id, event);
            return;
        }

        let start = if event.start_time == 0 {
            now
        } else {
            event.start_time
        };
        event.start_time = start;

        if event.end_time() < now {
            info!("Load control event {id} received after expiration");
            event.status = EventStatus::RejectedEventExpired;
            self.send_report(&event);
            self.emit(id, event.status);
            self.lock_state().completed.insert(id, event);
            return;
        }

        if start <= now {
            let mut state = self.lock_state();
            self.start_locked(&mut state, event, now);
        } else {
            info!("Scheduling load control event {id} in {}s", start - now);
            let mut state = self.lock_state();
            state.scheduled.insert(id, event.clone());
            drop(state);
            self.arm_timer(id, u64::from(start - now));
            self.send_report(&event);
            self.emit(id, EventStatus::CommandReceived);
        }
    }

    /// Start an event: claim its class slots (superseding current holders),
    /// arm the expiry timer and report EventStarted.
    fn start_locked(&self, state: &mut DrlcState, mut event: DrlcEvent, now: u32) {
        let id = event.issuer_event_id;
        let classes = event.device_class & self.config.device_classes;

        for bit in 0..16 {
            let mask = 1u16 << bit;
            if classes.bits() & mask == 0 {
                continue;
            }
            if let Some(&other_id) = state.class_slots.get(&mask) {
                if other_id != id {
                    self.detach_timer(other_id);
                    if let Some(mut other) = state.running.remove(&other_id) {
                        info!("Event {other_id} superseded by {id} on class {mask:#06x}");
                        state.class_slots.retain(|_, v| *v != other_id);
                        other.status = EventStatus::Superseded;
                        self.send_report(&other);
                        self.emit(other_id, EventStatus::Superseded);
                        state.completed.insert(other_id, other);
                    }
                }
            }
            state.class_slots.insert(mask, id);
        }

        event.status = EventStatus::EventStarted;
        info!(
            "Load control event {id} started for {} minutes",
            event.duration_minutes
        );
        // Remaining window, not the full duration: a late-arriving event only
        // participates until its original end.
        self.arm_timer(id, u64::from(event.end_time().saturating_sub(now)));
        self.send_report(&event);
        self.emit(id, EventStatus::EventStarted);
        state.running.insert(id, event);
    }

    /// User opts out; returns whether the request was applied
    pub fn opt_out(&self, issuer_event_id: u32) -> bool {
        let now = self.clock.utc_now();
        let mut state = self.lock_state();
        if let Some(event) = state.scheduled.get_mut(&issuer_event_id) {
            if !matches!(
                event.status,
                EventStatus::CommandReceived | EventStatus::UserOptIn
            ) {
                return false;
            }
            if event.event_control.contains(EventControl::MANDATORY) {
                warn!("Opt-out refused for mandatory event {issuer_event_id}");
                return false;
            }
            event.opted_out_before_start = true;
            event.status = EventStatus::UserOptOut;
            // The event will never run; the single timer slot now carries it
            // straight to completion at its natural end.
            let delay = u64::from(event.end_time().saturating_sub(now));
            let report = event.clone();
            drop(state);
            self.arm_timer(issuer_event_id, delay);
            self.send_report(&report);
            self.emit(issuer_event_id, EventStatus::UserOptOut);
            true
        } else if let Some(event) = state.running.get_mut(&issuer_event_id) {
            if !matches!(
                event.status,
                EventStatus::EventStarted | EventStatus::UserOptIn
            ) {
                return false;
            }
            event.status = EventStatus::UserOptOut;
            let report = event.clone();
            drop(state);
            self.send_report(&report);
            self.emit(issuer_event_id, EventStatus::UserOptOut);
            true
        } else {
            false
        }
    }

    /// User opts (back) in; returns whether the request was applied
    pub fn opt_in(&self, issuer_event_id: u32) -> bool {
        let now = self.clock.utc_now();
        let mut state = self.lock_state();
        if let Some(event) = state.scheduled.get_mut(&issuer_event_id) {
            if !matches!(
                event.status,
                EventStatus::CommandReceived | EventStatus::UserOptOut
            ) {
                return false;
            }
            event.opted_out_before_start = false;
            event.status = EventStatus::UserOptIn;
            let delay = u64::from(event.start_time.saturating_sub(now));
            let report = event.clone();
            drop(state);
            self.arm_timer(issuer_event_id, delay);
            self.send_report(&report);
            self.emit(issuer_event_id, EventStatus::UserOptIn);
            true
        } else if let Some(event) = state.running.get_mut(&issuer_event_id) {
            if !matches!(
                event.status,
                EventStatus::EventStarted | EventStatus::UserOptOut
            ) {
                return false;
            }
            event.status = EventStatus::UserOptIn;
            let report = event.clone();
            drop(state);
            self.send_report(&report);
            self.emit(issuer_event_id, EventStatus::UserOptIn);
            true
        } else {
            false
        }
    }

    pub fn handle_cancel(&self, server: Destination, cmd: &CancelLoadControlEvent) {
        let now = self.clock.utc_now();
        let id = cmd.issuer_event_id;
        let mut state = self.lock_state();

        let known = state
            .scheduled
            .get(&id)
            .cloned()
            .or_else(|| state.running.get(&id).cloned());
        let Some(event) = known else {
            drop(state);
            warn!("Cancel for undefined event {id}");
            self.send_rejection(server, id, EventStatus::RejectedUndefinedEvent);
            self.emit(id, EventStatus::RejectedUndefinedEvent);
            return;
        };

        let effective = if cmd.effective_time == 0 {
            now
        } else {
            cmd.effective_time
        };

        if effective > event.end_time() {
            // Cancellation is not applied; the report references the
            // original event data.
            drop(state);
            warn!("Cancel for event {id} effective after its natural end");
            let mut rejected = event;
            rejected.status = EventStatus::RejectedInvalidEffectiveTime;
            self.send_report(&rejected);
            self.emit(id, EventStatus::RejectedInvalidEffectiveTime);
            return;
        }

        if effective <= now {
            self.finish_cancel_locked(&mut state, id);
        } else {
            info!("Cancel for event {id} pending until {effective}");
            if let Some(event) = state.scheduled.get_mut(&id) {
                event.cancel_pending = true;
            } else if let Some(event) = state.running.get_mut(&id) {
                event.cancel_pending = true;
            }
            drop(state);
            // Replaces the start/expiry timer in the single slot
            self.arm_timer(id, u64::from(effective - now));
        }
    }

    pub fn handle_cancel_all(&self, cmd: &CancelAllLoadControlEvents) {
        debug!("Cancel all events, control {:#04x}", cmd.cancel_control);
        let mut state = self.lock_state();
        let mut drained: Vec<DrlcEvent> = state.scheduled.drain().map(|(_, v)| v).collect();
        drained.extend(state.running.drain().map(|(_, v)| v));
        state.class_slots.clear();
        for mut event in drained {
            let id = event.issuer_event_id;
            self.detach_timer(id);
            event.status = EventStatus::Cancelled;
            self.send_report(&event);
            self.emit(id, EventStatus::Cancelled);
            state.completed.insert(id, event);
        }
    }

    /// A timer slot fired. Membership is re-checked under the lock: a stale
    /// fire for an event that already completed is a no-op.
    fn on_timer(&self, id: u32) {
        self.timers.remove(&id);
        let now = self.clock.utc_now();
        let mut state = self.lock_state();

        let cancel_pending = state
            .scheduled
            .get(&id)
            .or_else(|| state.running.get(&id))
            .map(|e| e.cancel_pending)
            .unwrap_or(false);
        if cancel_pending {
            self.finish_cancel_locked(&mut state, id);
            return;
        }

        if let Some(event) = state.scheduled.remove(&id) {
            if event.status == EventStatus::UserOptOut && event.opted_out_before_start {
                let mut event = event;
                event.status = EventStatus::EventCompleteNoParticipation;
                self.send_report(&event);
                self.emit(id, event.status);
                state.completed.insert(id, event);
            } else {
                self.start_locked(&mut state, event, now);
            }
        } else if let Some(mut event) = state.running.remove(&id) {
            state.class_slots.retain(|_, v| *v != id);
            event.status = match event.status {
                EventStatus::UserOptOut if event.opted_out_before_start => {
                    EventStatus::EventCompleteNoParticipation
                }
                EventStatus::UserOptOut => EventStatus::PartialCompletionOptOut,
                EventStatus::UserOptIn => EventStatus::PartialCompletionOptIn,
                _ => EventStatus::EventCompleted,
            };
            info!("Load control event {id} completed as {:?}", event.status);
            self.send_report(&event);
            self.emit(id, event.status);
            state.completed.insert(id, event);
        } else {
            debug!("Timer fired for event {id} no longer tracked");
        }
    }

    fn finish_cancel_locked(&self, state: &mut DrlcState, id: u32) {
        let removed = state
            .scheduled
            .remove(&id)
            .or_else(|| state.running.remove(&id));
        let Some(mut event) = removed else {
            return;
        };
        self.detach_timer(id);
        state.class_slots.retain(|_, v| *v != id);
        event.status = EventStatus::Cancelled;
        event.cancel_pending = false;
        info!("Load control event {id} cancelled");
        self.send_report(&event);
        self.emit(id, EventStatus::Cancelled);
        state.completed.insert(id, event);
    }

    fn arm_timer(&self, id: u32, delay_secs: u64) {
        let engine = self.clone();
        debug!("Arming timer for event {id} in {delay_secs}s");
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(delay_secs)).await;
            engine.on_timer(id);
        });
        if let Some(old) = self.timers.insert(id, handle) {
            old.abort();
        }
    }

    fn detach_timer(&self, id: u32) {
        if let Some((_, handle)) = self.timers.remove(&id) {
            debug!("Detaching timer for event {id}");
            handle.abort();
        }
    }

    fn send_report(&self, event: &DrlcEvent) {
        let report = ReportEventStatus {
            issuer_event_id: event.issuer_event_id,
            event_status: event.status.as_u8(),
            event_status_time: self.clock.utc_now(),
            criticality_applied: event.criticality_level,
            cooling_set_point_applied: event.cooling_set_point,
            heating_set_point_applied: event.heating_set_point,
            average_load_adjustment_applied: event.average_load_adjustment_pct,
            duty_cycle_applied: event.duty_cycle,
            event_control: event.event_control.bits(),
        };
        self.unicast_report(event.server, report);
    }

    /// Report for an event we never tracked (undefined cancel target)
    fn send_rejection(&self, server: Destination, issuer_event_id: u32, status: EventStatus) {
        let report = ReportEventStatus {
            issuer_event_id,
            event_status: status.as_u8(),
            event_status_time: self.clock.utc_now(),
            criticality_applied: 0,
            cooling_set_point_applied: 0xFFFF,
            heating_set_point_applied: 0xFFFF,
            average_load_adjustment_applied: -1,
            duty_cycle_applied: 0xFF,
            event_control: 0,
        };
        self.unicast_report(server, report);
    }

    fn unicast_report(&self, server: Destination, report: ReportEventStatus) {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let frame = ZclFrame::cluster_command(sequence, drlc::REPORT_EVENT_STATUS, report.encode());
        let message =
            OutboundMessage::new(server, clusters::DRLC, frame.serialize(), TxOptions::secure());
        if let Err(e) = self.transport.send_unicast(message) {
            warn!("Failed to send event status report: {e}");
        }
    }

    fn emit(&self, issuer_event_id: u32, status: EventStatus) {
        let _ = self.events.send(MeterEvent::DrlcStatus {
            issuer_event_id,
            status,
        });
    }

    #[must_use]
    pub fn scheduled_events(&self) -> Vec<DrlcEvent> {
        self.lock_state().scheduled.values().cloned().collect()
    }

    #[must_use]
    pub fn running_events(&self) -> Vec<DrlcEvent> {
        self.lock_state().running.values().cloned().collect()
    }

    #[must_use]
    pub fn completed_events(&self) -> Vec<DrlcEvent> {
        self.lock_state().completed.values().cloned().collect()
    }

    /// Current status of a tracked event, wherever it lives
    #[must_use]
    pub fn event_status(&self, issuer_event_id: u32) -> Option<EventStatus> {
        let state = self.lock_state();
        state
            .scheduled
            .get(&issuer_event_id)
            .or_else(|| state.running.get(&issuer_event_id))
            .or_else(|| state.completed.get(&issuer_event_id))
            .map(|e| e.status)
    }
}
