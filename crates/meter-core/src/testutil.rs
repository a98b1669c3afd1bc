//! Test doubles shared across the crate's unit tests

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use crate::clock::Clock;
use crate::transport::{OutboundMessage, RadioTransport};
use crate::MeterError;

/// Records every unicast instead of sending it
pub struct MockRadio {
    sent: Mutex<Vec<OutboundMessage>>,
}

impl MockRadio {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().unwrap().clone()
    }
}

impl RadioTransport for MockRadio {
    fn send_unicast(&self, message: OutboundMessage) -> Result<(), MeterError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

/// Manually advanced clock in ZigBee UTC seconds
pub struct FixedClock {
    now: AtomicU32,
}

impl FixedClock {
    pub fn new(now: u32) -> Self {
        Self {
            now: AtomicU32::new(now),
        }
    }

    pub fn advance(&self, secs: u32) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn utc_now(&self) -> u32 {
        self.now.load(Ordering::SeqCst)
    }
}
