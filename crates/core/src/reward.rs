//! Reward records and the guest / campaign index entries persisted with them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::campaign::RewardCategory;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RewardStatus {
    /// Created but not yet backed by a voucher (pool depleted).
    Pending,
    Available,
    Redeemed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reward {
    pub id: Uuid,
    pub reward_type_id: String,
    pub category: RewardCategory,
    pub guest_id: String,
    pub guest_name: String,
    pub campaign_id: String,
    pub receipt_id: String,
    pub receipt_amount: f64,
    pub value: f64,
    pub description: String,
    pub status: RewardStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub voucher_code: Option<String>,
    /// Code was synthesized because the reward type has no pool.
    #[serde(default)]
    pub uses_random_code: bool,
    /// Pool existed but had nothing claimable at creation time.
    #[serde(default)]
    pub pool_depleted: bool,
    #[serde(default)]
    pub redeemed_at: Option<DateTime<Utc>>,
}

impl Reward {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Guest-side index entry: `guest_id → reward_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuestRewardIndex {
    pub guest_id: String,
    pub reward_id: Uuid,
    pub reward_type_id: String,
    pub receipt_id: String,
    pub expires_at: DateTime<Utc>,
}

/// Campaign-side index entry: `campaign_id → reward_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignRewardIndex {
    pub campaign_id: String,
    pub reward_id: Uuid,
    pub guest_id: String,
    pub created_at: DateTime<Utc>,
}

impl From<&Reward> for GuestRewardIndex {
    fn from(reward: &Reward) -> Self {
        Self {
            guest_id: reward.guest_id.clone(),
            reward_id: reward.id,
            reward_type_id: reward.reward_type_id.clone(),
            receipt_id: reward.receipt_id.clone(),
            expires_at: reward.expires_at,
        }
    }
}

impl From<&Reward> for CampaignRewardIndex {
    fn from(reward: &Reward) -> Self {
        Self {
            campaign_id: reward.campaign_id.clone(),
            reward_id: reward.id,
            guest_id: reward.guest_id.clone(),
            created_at: reward.created_at,
        }
    }
}
