//! Duplicate-receipt bookkeeping: fingerprints, fraud records and
//! suspicious-activity audit entries.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Platform-wide receipt identity. Guest is deliberately not part of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    pub key: String,
    pub invoice_number: String,
    pub receipt_date: NaiveDate,
}

impl Fingerprint {
    /// SHA-256 over the normalized invoice number and date, plus the total
    /// in cents when `amount` is given.
    pub fn compute(invoice_number: &str, receipt_date: NaiveDate, amount: Option<f64>) -> Self {
        let invoice = normalize_invoice(invoice_number);
        let mut material = format!("{invoice}|{}", receipt_date.format("%Y-%m-%d"));
        if let Some(amount) = amount {
            material.push_str(&format!("|{}", (amount * 100.0).round() as i64));
        }
        let key = hex::encode(Sha256::digest(material.as_bytes()));
        Self {
            key,
            invoice_number: invoice,
            receipt_date,
        }
    }
}

/// Uppercase, drop whitespace and a leading `#`.
pub fn normalize_invoice(raw: &str) -> String {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    compact.trim_start_matches('#').to_uppercase()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FraudRecord {
    pub fingerprint: String,
    pub invoice_number: String,
    pub receipt_date: NaiveDate,
    pub brand_name: String,
    pub store_name: String,
    pub first_guest_id: String,
    pub first_receipt_id: String,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    /// Number of times the fingerprint has been submitted, first sight included.
    pub duplicate_count: u32,
    /// Distinct guests that resubmitted after the first sighting.
    pub attempted_guests: Vec<String>,
    pub flagged: bool,
}

impl FraudRecord {
    pub fn first_sight(
        fingerprint: &Fingerprint,
        brand_name: &str,
        store_name: &str,
        guest_id: &str,
        receipt_id: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            fingerprint: fingerprint.key.clone(),
            invoice_number: fingerprint.invoice_number.clone(),
            receipt_date: fingerprint.receipt_date,
            brand_name: brand_name.to_string(),
            store_name: store_name.to_string(),
            first_guest_id: guest_id.to_string(),
            first_receipt_id: receipt_id.to_string(),
            first_seen_at: now,
            last_seen_at: now,
            duplicate_count: 1,
            attempted_guests: Vec::new(),
            flagged: false,
        }
    }

    pub fn record_collision(&mut self, guest_id: &str, now: DateTime<Utc>) {
        self.duplicate_count += 1;
        if !self.attempted_guests.iter().any(|g| g == guest_id) {
            self.attempted_guests.push(guest_id.to_string());
        }
        self.flagged = true;
        self.last_seen_at = now;
    }
}

/// Result of registering a sighting with the fraud store.
#[derive(Debug, Clone)]
pub struct FraudSighting {
    /// Record state after this sighting was applied.
    pub record: FraudRecord,
    pub first_sight: bool,
}

/// Audit entry written when a receipt is reused under a different guest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuspiciousActivity {
    pub id: Uuid,
    pub fingerprint: String,
    pub invoice_number: String,
    pub receipt_date: NaiveDate,
    pub original_guest_id: String,
    pub attempted_guest_id: String,
    pub duplicate_count: u32,
    pub detected_at: DateTime<Utc>,
}
