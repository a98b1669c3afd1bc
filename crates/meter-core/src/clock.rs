//! Clock seam
//!
//! DRLC scheduling decisions compare event times against "now" in ZigBee UTC
//! seconds (offset from 2000-01-01T00:00:00Z). The trait keeps that readable
//! by tests; delayed one-shot callbacks use `tokio::time::sleep` in spawned
//! tasks, which are aborted to cancel before firing.

use chrono::Utc;
use zcl_protocol::value::datetime_to_utc_time;

/// Current-time provider in ZigBee UTC seconds
pub trait Clock: Send + Sync {
    fn utc_now(&self) -> u32;
}

/// Wall-clock implementation
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn utc_now(&self) -> u32 {
        datetime_to_utc_time(Utc::now())
    }
}
