//! Platform-wide duplicate receipt detection.
//!
//! A receipt is identified by its fingerprint (normalized invoice number +
//! receipt date), independent of the guest submitting it. Store failures
//! never block processing: they are logged, counted and surfaced to the
//! event sink, and the receipt is treated as unseen.

use chrono::{DateTime, Utc};
use loyalty_core::config::FraudConfig;
use loyalty_core::event_bus::{EngineEvent, EngineEventType, EventSink};
use loyalty_core::fraud::{Fingerprint, FraudRecord, SuspiciousActivity};
use loyalty_core::receipt::ValidatedReceipt;
use loyalty_core::repository::FraudRepo;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FraudReason {
    /// Same guest sent the same receipt again.
    ResubmittedBySameGuest,
    /// Receipt already claimed by another guest.
    ReusedByDifferentGuest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FraudCheck {
    pub is_fraud: bool,
    pub reason: Option<FraudReason>,
    /// When the fingerprint was first seen.
    pub original_date: Option<DateTime<Utc>>,
    pub duplicate_count: Option<u32>,
    /// Receipt id of the first submission, for same-guest replays.
    pub original_receipt_id: Option<String>,
}

impl FraudCheck {
    pub fn clear() -> Self {
        Self {
            is_fraud: false,
            reason: None,
            original_date: None,
            duplicate_count: None,
            original_receipt_id: None,
        }
    }

    /// Duplicate under a different guest; always blocked.
    pub fn is_cross_guest(&self) -> bool {
        self.reason == Some(FraudReason::ReusedByDifferentGuest)
    }
}

pub struct FraudDetector {
    fraud: Arc<dyn FraudRepo>,
    config: FraudConfig,
    sink: Arc<dyn EventSink>,
}

impl FraudDetector {
    pub fn new(fraud: Arc<dyn FraudRepo>, config: &FraudConfig, sink: Arc<dyn EventSink>) -> Self {
        Self {
            fraud,
            config: config.clone(),
            sink,
        }
    }

    pub fn fingerprint(&self, receipt: &ValidatedReceipt) -> Fingerprint {
        let amount = self
            .config
            .include_amount_in_fingerprint
            .then_some(receipt.receipt.total_amount);
        Fingerprint::compute(&receipt.receipt.invoice_number, receipt.date, amount)
    }

    /// Registers the sighting and reports whether it is a duplicate.
    pub async fn check_receipt(&self, receipt: &ValidatedReceipt) -> FraudCheck {
        if !self.config.enabled {
            return FraudCheck::clear();
        }

        let now = Utc::now();
        let r = &receipt.receipt;
        let fingerprint = self.fingerprint(receipt);
        let candidate = FraudRecord::first_sight(
            &fingerprint,
            &r.brand_name,
            &r.store_name,
            &r.guest_id,
            &r.receipt_id,
            now,
        );

        let sighting = match self.fraud.register_sighting(candidate, &r.guest_id, now).await {
            Ok(sighting) => sighting,
            Err(e) => {
                warn!(
                    receipt_id = %r.receipt_id,
                    error = %e,
                    "Fraud store unavailable, allowing receipt through"
                );
                metrics::counter!("fraud.store_failures").increment(1);
                self.sink.emit(
                    EngineEvent::new(EngineEventType::FraudStoreFailure)
                        .receipt(r.receipt_id.clone())
                        .guest(r.guest_id.clone())
                        .detail(e.to_string()),
                );
                return FraudCheck::clear();
            }
        };

        if sighting.first_sight {
            return FraudCheck::clear();
        }

        let record = sighting.record;
        let same_guest = record.first_guest_id == r.guest_id;
        let reason = if same_guest {
            FraudReason::ResubmittedBySameGuest
        } else {
            FraudReason::ReusedByDifferentGuest
        };

        info!(
            receipt_id = %r.receipt_id,
            invoice = %record.invoice_number,
            duplicate_count = record.duplicate_count,
            same_guest = same_guest,
            "Duplicate receipt detected"
        );
        metrics::counter!("fraud.duplicates").increment(1);

        if !same_guest {
            self.escalate(&record, &r.guest_id, &r.receipt_id, now).await;
        }

        FraudCheck {
            is_fraud: true,
            reason: Some(reason),
            original_date: Some(record.first_seen_at),
            duplicate_count: Some(record.duplicate_count),
            original_receipt_id: Some(record.first_receipt_id.clone()),
        }
    }

    /// Writes the suspicious-activity audit entry for cross-guest reuse.
    async fn escalate(&self, record: &FraudRecord, guest_id: &str, receipt_id: &str, now: DateTime<Utc>) {
        let activity = SuspiciousActivity {
            id: Uuid::new_v4(),
            fingerprint: record.fingerprint.clone(),
            invoice_number: record.invoice_number.clone(),
            receipt_date: record.receipt_date,
            original_guest_id: record.first_guest_id.clone(),
            attempted_guest_id: guest_id.to_string(),
            duplicate_count: record.duplicate_count,
            detected_at: now,
        };

        metrics::counter!("fraud.suspicious_activity").increment(1);
        self.sink.emit(
            EngineEvent::new(EngineEventType::SuspiciousActivity)
                .receipt(receipt_id)
                .guest(guest_id)
                .detail(format!(
                    "invoice {} first claimed by {}",
                    record.invoice_number, record.first_guest_id
                )),
        );

        if let Err(e) = self.fraud.put_suspicious_activity(&activity).await {
            warn!(
                fingerprint = %record.fingerprint,
                error = %e,
                "Failed to persist suspicious activity entry"
            );
            self.sink.emit(
                EngineEvent::new(EngineEventType::FraudStoreFailure)
                    .receipt(receipt_id)
                    .guest(guest_id)
                    .detail(e.to_string()),
            );
        }
    }
}
