//! Receipt input types and structural validation.
//!
//! Receipts arrive from the extraction collaborator with text dates and
//! times; [`Receipt::validate`] re-checks them and produces a
//! [`ValidatedReceipt`] with parsed calendar values.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LoyaltyError, LoyaltyResult};

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y", "%d %B %Y", "%d %b %Y",
];
const TIME_FORMATS: &[&str] = &["%H:%M:%S", "%H:%M", "%I:%M %p", "%I:%M:%S %p"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    pub receipt_id: String,
    pub guest_id: String,
    pub brand_name: String,
    pub store_name: String,
    pub invoice_number: String,
    pub date: String,
    #[serde(default)]
    pub time: Option<String>,
    pub total_amount: f64,
    #[serde(default)]
    pub items: Vec<LineItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItem {
    pub name: String,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

fn default_quantity() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Guest {
    pub id: String,
    pub display_name: String,
}

/// A receipt that passed structural validation.
#[derive(Debug, Clone)]
pub struct ValidatedReceipt {
    pub receipt: Receipt,
    pub date: NaiveDate,
    pub time: Option<NaiveTime>,
}

impl Receipt {
    /// Structural validation: required fields present, items non-empty,
    /// total positive, date parseable and not after `today`.
    pub fn validate(&self, today: NaiveDate) -> LoyaltyResult<ValidatedReceipt> {
        let required = [
            ("receipt_id", &self.receipt_id),
            ("guest_id", &self.guest_id),
            ("brand_name", &self.brand_name),
            ("store_name", &self.store_name),
            ("invoice_number", &self.invoice_number),
            ("date", &self.date),
        ];
        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(field, _)| *field)
            .collect();
        if !missing.is_empty() {
            return Err(LoyaltyError::Validation(format!(
                "missing required fields: {}",
                missing.join(", ")
            )));
        }

        if !self.total_amount.is_finite() || self.total_amount <= 0.0 {
            return Err(LoyaltyError::Validation(format!(
                "invalid total amount {}",
                self.total_amount
            )));
        }

        if self.items.is_empty() {
            return Err(LoyaltyError::Validation("receipt has no line items".into()));
        }
        if self.items.iter().any(|i| i.name.trim().is_empty()) {
            return Err(LoyaltyError::Validation("line item without a name".into()));
        }

        let date = parse_receipt_date(&self.date).ok_or_else(|| {
            LoyaltyError::Validation(format!("unparseable receipt date '{}'", self.date))
        })?;
        if date > today {
            return Err(LoyaltyError::Validation(format!(
                "receipt date {date} is in the future"
            )));
        }

        let time = match self.time.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(parse_receipt_time(raw).ok_or_else(|| {
                LoyaltyError::Validation(format!("unparseable receipt time '{raw}'"))
            })?),
        };

        Ok(ValidatedReceipt {
            receipt: self.clone(),
            date,
            time,
        })
    }
}

pub fn parse_receipt_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
}

pub fn parse_receipt_time(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(raw, fmt).ok())
}

// ─── Receipt Records ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    Pending,
    Validated,
}

/// Persisted processing state of a receipt; carries the idempotency flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptRecord {
    pub receipt_id: String,
    pub guest_id: String,
    pub status: ReceiptStatus,
    pub campaign_id: Option<String>,
    pub total_amount: f64,
    pub validated_at: Option<DateTime<Utc>>,
}
