//! Cached metering and pricing readings
//!
//! The session keeps the latest raw attribute values here and exposes scaled
//! getters (`raw * multiplier / divisor`). Sentinel handling is asymmetric on
//! purpose: the block threshold/price tables and load-profile intervals
//! translate the all-1s sentinel to "absent", while summation/demand keep the
//! raw value as read and only suppress it in the derived getter.

use serde::Serialize;
use tracing::debug;
use zcl_protocol::responses::{DisplayMessage, GetProfileResponse, PublishBlockPeriod, PublishPrice};
use zcl_protocol::types::{metering_attrs, price_attrs};
use zcl_protocol::{AttributeRecord, DataType};

/// Number of block threshold / block price slots in the Price cluster tables
pub const BLOCK_COUNT: usize = 16;

const UINT48_SENTINEL: u64 = 0xFFFF_FFFF_FFFF;
const UINT32_SENTINEL: u64 = 0xFFFF_FFFF;

/// Latest load profile returned by GetProfile, replaced wholesale per response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadProfile {
    pub end_time: u32,
    pub interval_period: u8,
    pub values: Vec<Option<u32>>,
}

/// Scaled snapshot of the energy readings
#[derive(Debug, Clone, Serialize)]
pub struct MeterSummary {
    pub summation_delivered: f64,
    pub summation_received: f64,
    pub instantaneous_demand: f64,
    pub multiplier: u32,
    pub divisor: u32,
}

/// Cached per-device attribute values
#[derive(Debug, Clone)]
pub struct MeterReadings {
    summation_delivered_raw: u64,
    summation_received_raw: u64,
    instantaneous_demand_raw: i64,
    multiplier: u32,
    divisor: u32,
    pub meter_status: u8,
    pub unit_of_measure: u8,
    pub load_profile: LoadProfile,
    block_thresholds: [Option<u64>; BLOCK_COUNT],
    block_prices: [Option<u32>; BLOCK_COUNT],
    pub last_message: Option<DisplayMessage>,
    pub last_price: Option<PublishPrice>,
    pub last_block_period: Option<PublishBlockPeriod>,
}

impl Default for MeterReadings {
    fn default() -> Self {
        Self {
            summation_delivered_raw: 0,
            summation_received_raw: 0,
            instantaneous_demand_raw: 0,
            multiplier: 1,
            divisor: 1,
            meter_status: 0,
            unit_of_measure: 0,
            load_profile: LoadProfile::default(),
            block_thresholds: [None; BLOCK_COUNT],
            block_prices: [None; BLOCK_COUNT],
            last_message: None,
            last_price: None,
            last_block_period: None,
        }
    }
}

impl MeterReadings {
    fn scale(&self, raw: f64) -> f64 {
        if self.divisor == 0 {
            return 0.0;
        }
        raw * f64::from(self.multiplier) / f64::from(self.divisor)
    }

    /// Scaled summation delivered; the all-1s raw value reads as 0.0
    #[must_use]
    pub fn summation_delivered(&self) -> f64 {
        if self.summation_delivered_raw == UINT48_SENTINEL {
            return 0.0;
        }
        self.scale(self.summation_delivered_raw as f64)
    }

    /// Scaled summation received; the all-1s raw value reads as 0.0
    #[must_use]
    pub fn summation_received(&self) -> f64 {
        if self.summation_received_raw == UINT48_SENTINEL {
            return 0.0;
        }
        self.scale(self.summation_received_raw as f64)
    }

    /// Scaled instantaneous demand
    #[must_use]
    pub fn instantaneous_demand(&self) -> f64 {
        self.scale(self.instantaneous_demand_raw as f64)
    }

    /// Raw 48-bit summation delivered exactly as read off the wire
    #[must_use]
    pub fn summation_delivered_raw(&self) -> u64 {
        self.summation_delivered_raw
    }

    /// Raw 48-bit summation received exactly as read off the wire
    #[must_use]
    pub fn summation_received_raw(&self) -> u64 {
        self.summation_received_raw
    }

    #[must_use]
    pub fn multiplier(&self) -> u32 {
        self.multiplier
    }

    #[must_use]
    pub fn divisor(&self) -> u32 {
        self.divisor
    }

    /// Block threshold table entry, `None` when the meter reports all-1s
    #[must_use]
    pub fn block_threshold(&self, index: usize) -> Option<u64> {
        self.block_thresholds.get(index).copied().flatten()
    }

    /// Block price table entry, `None` when the meter reports all-1s
    #[must_use]
    pub fn block_price(&self, index: usize) -> Option<u32> {
        self.block_prices.get(index).copied().flatten()
    }

    #[must_use]
    pub fn summary(&self) -> MeterSummary {
        MeterSummary {
            summation_delivered: self.summation_delivered(),
            summation_received: self.summation_received(),
            instantaneous_demand: self.instantaneous_demand(),
            multiplier: self.multiplier,
            divisor: self.divisor,
        }
    }

    /// Fold one decoded attribute record into the cache
    pub fn apply_attribute(&mut self, cluster_id: u16, record: &AttributeRecord) {
        if !record.status.is_success() {
            return;
        }
        let Some(value) = &record.value else {
            return;
        };

        match cluster_id {
            zcl_protocol::types::clusters::SIMPLE_METERING => match record.id {
                metering_attrs::CURRENT_SUMMATION_DELIVERED => {
                    if let Some(v) = value.as_u64() {
                        self.summation_delivered_raw = v;
                    }
                }
                metering_attrs::CURRENT_SUMMATION_RECEIVED => {
                    if let Some(v) = value.as_u64() {
                        self.summation_received_raw = v;
                    }
                }
                metering_attrs::INSTANTANEOUS_DEMAND => {
                    if let Some(v) = value.as_i64() {
                        self.instantaneous_demand_raw = v;
                    }
                }
                metering_attrs::MULTIPLIER => {
                    if let Some(v) = value.as_u64() {
                        self.multiplier = v as u32;
                    }
                }
                metering_attrs::DIVISOR => {
                    if let Some(v) = value.as_u64() {
                        self.divisor = v as u32;
                    }
                }
                metering_attrs::STATUS => {
                    if let Some(v) = value.as_u64() {
                        self.meter_status = v as u8;
                    }
                }
                metering_attrs::UNIT_OF_MEASURE => {
                    if let Some(v) = value.as_u64() {
                        self.unit_of_measure = v as u8;
                    }
                }
                other => debug!("Uncached metering attribute {:#06x}", other),
            },
            zcl_protocol::types::clusters::PRICE => {
                let id = record.id;
                let threshold_base = price_attrs::BLOCK1_THRESHOLD;
                let price_base = price_attrs::NO_TIER_BLOCK1_PRICE;
                if (threshold_base..threshold_base + BLOCK_COUNT as u16).contains(&id) {
                    let slot = (id - threshold_base) as usize;
                    self.block_thresholds[slot] = value
                        .as_u64()
                        .filter(|&v| v != DataType::Uint48.unsigned_sentinel().unwrap_or(u64::MAX));
                } else if (price_base..price_base + BLOCK_COUNT as u16).contains(&id) {
                    let slot = (id - price_base) as usize;
                    self.block_prices[slot] = value
                        .as_u64()
                        .filter(|&v| v != UINT32_SENTINEL)
                        .map(|v| v as u32);
                } else {
                    debug!("Uncached price attribute {:#06x}", id);
                }
            }
            other => debug!("Uncached cluster {:#06x}", other),
        }
    }

    /// Replace the load-profile table with a fresh response
    pub fn apply_load_profile(&mut self, response: &GetProfileResponse) {
        self.load_profile = LoadProfile {
            end_time: response.end_time,
            interval_period: response.profile_interval_period,
            values: response.intervals.clone(),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zcl_protocol::types::clusters;
    use zcl_protocol::{ZclStatus, ZclValue};

    fn record(id: u16, value: ZclValue) -> AttributeRecord {
        AttributeRecord {
            id,
            status: ZclStatus::Success,
            data_type: Some(value.data_type()),
            value: Some(value),
        }
    }

    #[test]
    fn scaling_applies_multiplier_and_divisor() {
        let mut readings = MeterReadings::default();
        readings.apply_attribute(
            clusters::SIMPLE_METERING,
            &record(metering_attrs::CURRENT_SUMMATION_DELIVERED, ZclValue::Uint48(1000)),
        );
        readings.apply_attribute(
            clusters::SIMPLE_METERING,
            &record(metering_attrs::MULTIPLIER, ZclValue::Uint24(3)),
        );
        readings.apply_attribute(
            clusters::SIMPLE_METERING,
            &record(metering_attrs::DIVISOR, ZclValue::Uint24(4)),
        );
        assert!((readings.summation_delivered() - 750.0).abs() < f64::EPSILON);
    }

    #[test]
    fn zero_divisor_reads_zero() {
        let mut readings = MeterReadings::default();
        readings.apply_attribute(
            clusters::SIMPLE_METERING,
            &record(metering_attrs::CURRENT_SUMMATION_DELIVERED, ZclValue::Uint48(1000)),
        );
        readings.apply_attribute(
            clusters::SIMPLE_METERING,
            &record(metering_attrs::DIVISOR, ZclValue::Uint24(0)),
        );
        assert_eq!(readings.summation_delivered(), 0.0);
    }

    #[test]
    fn summation_sentinel_keeps_raw_but_derives_zero() {
        let mut readings = MeterReadings::default();
        readings.apply_attribute(
            clusters::SIMPLE_METERING,
            &record(metering_attrs::CURRENT_SUMMATION_DELIVERED, ZclValue::Uint48(123_456)),
        );
        readings.apply_attribute(
            clusters::SIMPLE_METERING,
            &record(
                metering_attrs::CURRENT_SUMMATION_RECEIVED,
                ZclValue::Uint48(0xFFFF_FFFF_FFFF),
            ),
        );
        // Default multiplier/divisor are 1/1
        assert!((readings.summation_delivered() - 123_456.0).abs() < f64::EPSILON);
        assert_eq!(readings.summation_received(), 0.0);
        // The raw value is preserved as read, never translated to absent
        assert_eq!(readings.summation_received_raw(), 0xFFFF_FFFF_FFFF);
    }

    #[test]
    fn block_price_sentinel_translates_to_absent() {
        let mut readings = MeterReadings::default();
        readings.apply_attribute(
            clusters::PRICE,
            &record(price_attrs::NO_TIER_BLOCK1_PRICE, ZclValue::Uint32(1234)),
        );
        readings.apply_attribute(
            clusters::PRICE,
            &record(
                price_attrs::NO_TIER_BLOCK1_PRICE + 1,
                ZclValue::Uint32(0xFFFF_FFFF),
            ),
        );
        readings.apply_attribute(
            clusters::PRICE,
            &record(price_attrs::BLOCK1_THRESHOLD, ZclValue::Uint48(0xFFFF_FFFF_FFFF)),
        );
        assert_eq!(readings.block_price(0), Some(1234));
        assert_eq!(readings.block_price(1), None);
        assert_eq!(readings.block_threshold(0), None);
    }

    #[test]
    fn load_profile_replaced_wholesale() {
        let mut readings = MeterReadings::default();
        readings.apply_load_profile(&GetProfileResponse {
            end_time: 100,
            status: 0,
            profile_interval_period: 5,
            intervals: vec![Some(10), None],
        });
        readings.apply_load_profile(&GetProfileResponse {
            end_time: 200,
            status: 0,
            profile_interval_period: 5,
            intervals: vec![Some(42)],
        });
        assert_eq!(readings.load_profile.end_time, 200);
        assert_eq!(readings.load_profile.values, vec![Some(42)]);
    }
}
