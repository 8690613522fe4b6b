//! Counters accumulated by the card runtime.

use serde_json::json;
use std::time::Duration;

use crate::logging::{LogEvent, LogFields, LogLevel};

#[derive(Debug, Default, Clone)]
pub struct RuntimeMetrics {
    cards_created: u64,
    cards_destroyed: u64,
    resize_requests: u64,
    coalesced_requests: u64,
    resize_passes: u64,
    measurements: u64,
    measurement_cache_hits: u64,
    settlement_waits: u64,
    settlement_timeouts: u64,
    events_dispatched: u64,
}

impl RuntimeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_card_created(&mut self) {
        self.cards_created = self.cards_created.saturating_add(1);
    }

    pub fn record_card_destroyed(&mut self) {
        self.cards_destroyed = self.cards_destroyed.saturating_add(1);
    }

    pub fn record_resize_request(&mut self) {
        self.resize_requests = self.resize_requests.saturating_add(1);
    }

    pub fn record_coalesced(&mut self) {
        self.coalesced_requests = self.coalesced_requests.saturating_add(1);
    }

    pub fn record_resize_pass(&mut self) {
        self.resize_passes = self.resize_passes.saturating_add(1);
    }

    pub fn record_measurement(&mut self, cache_hit: bool) {
        if cache_hit {
            self.measurement_cache_hits = self.measurement_cache_hits.saturating_add(1);
        } else {
            self.measurements = self.measurements.saturating_add(1);
        }
    }

    pub fn record_settlement_wait(&mut self, timed_out: bool) {
        self.settlement_waits = self.settlement_waits.saturating_add(1);
        if timed_out {
            self.settlement_timeouts = self.settlement_timeouts.saturating_add(1);
        }
    }

    pub fn record_event_dispatched(&mut self) {
        self.events_dispatched = self.events_dispatched.saturating_add(1);
    }

    pub fn snapshot(&self, uptime: Duration) -> MetricSnapshot {
        MetricSnapshot {
            uptime_ms: uptime.as_millis() as u64,
            cards_created: self.cards_created,
            cards_destroyed: self.cards_destroyed,
            resize_requests: self.resize_requests,
            coalesced_requests: self.coalesced_requests,
            resize_passes: self.resize_passes,
            measurements: self.measurements,
            measurement_cache_hits: self.measurement_cache_hits,
            settlement_waits: self.settlement_waits,
            settlement_timeouts: self.settlement_timeouts,
            events_dispatched: self.events_dispatched,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricSnapshot {
    pub uptime_ms: u64,
    pub cards_created: u64,
    pub cards_destroyed: u64,
    pub resize_requests: u64,
    pub coalesced_requests: u64,
    pub resize_passes: u64,
    pub measurements: u64,
    pub measurement_cache_hits: u64,
    pub settlement_waits: u64,
    pub settlement_timeouts: u64,
    pub events_dispatched: u64,
}

impl MetricSnapshot {
    pub fn as_fields(&self) -> LogFields {
        let mut map = LogFields::new();
        map.insert("uptime_ms".to_string(), json!(self.uptime_ms));
        map.insert("cards_created".to_string(), json!(self.cards_created));
        map.insert("cards_destroyed".to_string(), json!(self.cards_destroyed));
        map.insert("resize_requests".to_string(), json!(self.resize_requests));
        map.insert(
            "coalesced_requests".to_string(),
            json!(self.coalesced_requests),
        );
        map.insert("resize_passes".to_string(), json!(self.resize_passes));
        map.insert("measurements".to_string(), json!(self.measurements));
        map.insert(
            "measurement_cache_hits".to_string(),
            json!(self.measurement_cache_hits),
        );
        map.insert("settlement_waits".to_string(), json!(self.settlement_waits));
        map.insert(
            "settlement_timeouts".to_string(),
            json!(self.settlement_timeouts),
        );
        map.insert(
            "events_dispatched".to_string(),
            json!(self.events_dispatched),
        );
        map
    }

    pub fn to_log_event(&self, target: &str) -> LogEvent {
        LogEvent::with_fields(LogLevel::Info, target, "runtime_metrics", self.as_fields())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counters() {
        let mut metrics = RuntimeMetrics::new();
        metrics.record_resize_request();
        metrics.record_resize_request();
        metrics.record_coalesced();
        metrics.record_measurement(false);
        metrics.record_measurement(true);

        let snapshot = metrics.snapshot(Duration::from_millis(250));
        assert_eq!(snapshot.uptime_ms, 250);
        assert_eq!(snapshot.resize_requests, 2);
        assert_eq!(snapshot.coalesced_requests, 1);
        assert_eq!(snapshot.measurements, 1);
        assert_eq!(snapshot.measurement_cache_hits, 1);
    }
}
