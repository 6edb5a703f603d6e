//! Campaign domain types — brand-scoped promotions and the reward types
//! (criteria + payout parameters) they contain.
//!
//! Campaigns are authored by the admin surface; the engine only reads them,
//! apart from the `active → paused` transition on pool exhaustion.

use chrono::{DateTime, NaiveDate, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

// ─── Campaign ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: String,
    pub name: String,
    pub brand_name: String,
    /// Restricts the whole campaign to a single store when set.
    #[serde(default)]
    pub store_name: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub status: CampaignStatus,
    /// Evaluated in declaration order.
    pub reward_types: Vec<RewardType>,
    #[serde(default)]
    pub paused_reason: Option<String>,
    #[serde(default)]
    pub paused_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Active,
    Inactive,
    Paused,
}

impl Campaign {
    /// Active status and `date` inside the inclusive `[start_date, end_date]` range.
    pub fn is_active_on(&self, date: NaiveDate) -> bool {
        self.status == CampaignStatus::Active && self.covers_date(date)
    }

    pub fn covers_date(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }

    pub fn matches_brand(&self, brand: &str) -> bool {
        names_match(&self.brand_name, brand)
    }

    /// True when the campaign has no store restriction or it names `store`.
    pub fn allows_store(&self, store: &str) -> bool {
        self.store_name
            .as_deref()
            .map(|s| names_match(s, store))
            .unwrap_or(true)
    }

    pub fn reward_type(&self, reward_type_id: &str) -> Option<&RewardType> {
        self.reward_types.iter().find(|rt| rt.id == reward_type_id)
    }
}

/// Case-insensitive, whitespace-trimmed name comparison.
pub fn names_match(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

// ─── Reward Types ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardType {
    pub id: String,
    pub name: String,
    pub category: RewardCategory,
    /// Points per currency unit for `points`.
    #[serde(default)]
    pub points_multiplier: Option<f64>,
    /// Fixed value for `discount_amount`.
    #[serde(default)]
    pub fixed_amount: Option<f64>,
    /// Percentage (0–100) for `discount_percent`.
    #[serde(default)]
    pub percentage: Option<f64>,
    /// Upper bound on the `discount_percent` value.
    #[serde(default)]
    pub cap: Option<f64>,
    /// Item name or free text for `free_item` / `standard` rewards.
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub criteria: Criteria,
    #[serde(default)]
    pub validity_days: Option<u32>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RewardCategory {
    Points,
    DiscountAmount,
    DiscountPercent,
    FreeItem,
    Standard,
}

// ─── Criteria ──────────────────────────────────────────────────────────────

/// Eligibility rules for one reward type. Every field is optional and an
/// absent field places no constraint; present fields combine with AND.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Criteria {
    /// Receipt total must be at least this amount.
    #[serde(default)]
    pub min_purchase_amount: Option<f64>,
    /// Guest may hold fewer than this many unexpired rewards of the type.
    #[serde(default)]
    pub max_rewards: Option<u32>,
    /// Receipt store must be one of these. Empty list is unconstrained.
    #[serde(default)]
    pub store_restrictions: Option<Vec<String>>,
    /// Every item must be covered by the summed quantity of matching lines.
    #[serde(default)]
    pub required_items: Vec<RequiredItem>,
    #[serde(default)]
    pub time_window: Option<TimeWindow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequiredItem {
    pub name: String,
    #[serde(default = "default_required_quantity")]
    pub quantity: u32,
}

fn default_required_quantity() -> u32 {
    1
}

impl RequiredItem {
    /// Case-insensitive substring match against a receipt line name.
    pub fn matches_line(&self, line_name: &str) -> bool {
        let needle = self.name.trim().to_lowercase();
        !needle.is_empty() && line_name.to_lowercase().contains(&needle)
    }
}

/// Inclusive time-of-day window at minute granularity. A window whose start
/// is later than its end wraps past midnight.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

impl TimeWindow {
    pub fn contains(&self, time: NaiveTime) -> bool {
        let t = minute_of_day(time);
        let start = minute_of_day(self.start_time);
        let end = minute_of_day(self.end_time);
        if start <= end {
            start <= t && t <= end
        } else {
            t >= start || t <= end
        }
    }
}

fn minute_of_day(time: NaiveTime) -> u32 {
    time.hour() * 60 + time.minute()
}
