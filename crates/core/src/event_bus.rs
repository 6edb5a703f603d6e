//! Observability sink for engine events.
//!
//! Components accept an `Arc<dyn EventSink>` and emit an [`EngineEvent`] for
//! every outcome worth surfacing, including failures the engine recovers
//! from locally (fraud store unavailable, notification timeout).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EngineEventType {
    ReceiptInvalid,
    ReceiptMatched,
    ReceiptUnmatched,
    RewardIssued,
    VoucherAllocated,
    FallbackCodeIssued,
    PoolDepleted,
    CampaignPaused,
    FraudBlocked,
    SuspiciousActivity,
    LedgerRollback,
    FraudStoreFailure,
    NotificationFailure,
    VoucherRedeemed,
    RedemptionFailure,
    StatsRecomputeFailure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineEvent {
    pub event_id: Uuid,
    pub event_type: EngineEventType,
    pub receipt_id: Option<String>,
    pub guest_id: Option<String>,
    pub campaign_id: Option<String>,
    pub reward_type_id: Option<String>,
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl EngineEvent {
    pub fn new(event_type: EngineEventType) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type,
            receipt_id: None,
            guest_id: None,
            campaign_id: None,
            reward_type_id: None,
            detail: None,
            timestamp: Utc::now(),
        }
    }

    pub fn receipt(mut self, receipt_id: impl Into<String>) -> Self {
        self.receipt_id = Some(receipt_id.into());
        self
    }

    pub fn guest(mut self, guest_id: impl Into<String>) -> Self {
        self.guest_id = Some(guest_id.into());
        self
    }

    pub fn campaign(mut self, campaign_id: impl Into<String>) -> Self {
        self.campaign_id = Some(campaign_id.into());
        self
    }

    pub fn reward_type(mut self, reward_type_id: impl Into<String>) -> Self {
        self.reward_type_id = Some(reward_type_id.into());
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Trait for emitting engine events. Implementations may forward to an
/// analytics pipeline, a log shipper or an alerting hook.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: EngineEvent);
}

/// No-op sink for callers that don't need event emission.
pub struct NoOpSink;

impl EventSink for NoOpSink {
    fn emit(&self, _event: EngineEvent) {}
}

/// In-memory sink that captures events for testing.
#[derive(Default)]
pub struct CaptureSink {
    events: Mutex<Vec<EngineEvent>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().expect("event bus mutex poisoned").clone()
    }

    pub fn count(&self) -> usize {
        self.events.lock().expect("event bus mutex poisoned").len()
    }

    pub fn count_type(&self, event_type: EngineEventType) -> usize {
        self.events
            .lock()
            .expect("event bus mutex poisoned")
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().expect("event bus mutex poisoned").clear();
    }
}

impl EventSink for CaptureSink {
    fn emit(&self, event: EngineEvent) {
        self.events.lock().expect("event bus mutex poisoned").push(event);
    }
}

pub fn noop_sink() -> Arc<dyn EventSink> {
    Arc::new(NoOpSink)
}

pub fn capture_sink() -> Arc<CaptureSink> {
    Arc::new(CaptureSink::new())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_sink() {
        let sink = capture_sink();
        assert_eq!(sink.count(), 0);

        sink.emit(
            EngineEvent::new(EngineEventType::RewardIssued)
                .receipt("r-1")
                .guest("g-1"),
        );
        sink.emit(
            EngineEvent::new(EngineEventType::PoolDepleted)
                .reward_type("rt-1")
                .detail("no claimable vouchers"),
        );

        assert_eq!(sink.count(), 2);
        assert_eq!(sink.count_type(EngineEventType::RewardIssued), 1);
        assert_eq!(sink.count_type(EngineEventType::CampaignPaused), 0);

        let events = sink.events();
        assert_eq!(events[0].receipt_id.as_deref(), Some("r-1"));
        assert_eq!(events[1].reward_type_id.as_deref(), Some("rt-1"));

        sink.clear();
        assert_eq!(sink.count(), 0);
    }

    #[test]
    fn test_noop_sink() {
        let sink = noop_sink();
        sink.emit(EngineEvent::new(EngineEventType::FraudBlocked));
    }
}
