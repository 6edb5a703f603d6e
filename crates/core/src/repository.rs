//! Narrow repository interfaces, one per entity family.
//!
//! Every operation that read-modify-writes shared state (voucher claim,
//! campaign status transition, receipt validation flag, fraud sighting) is a
//! single conditional update at this boundary so that implementations can
//! map it onto a CAS or transactional primitive of the backing store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::campaign::{Campaign, CampaignStatus};
use crate::error::LoyaltyResult;
use crate::fraud::{FraudRecord, FraudSighting, SuspiciousActivity};
use crate::notification::OperatorNotification;
use crate::receipt::ReceiptRecord;
use crate::reward::{CampaignRewardIndex, GuestRewardIndex, Reward};
use crate::voucher::{PoolStats, Voucher, VoucherBinding, VoucherPool};

#[async_trait]
pub trait CampaignRepo: Send + Sync {
    /// Campaigns with `status == active`, in storage order. Date ranges are
    /// left to the caller.
    async fn active_campaigns(&self) -> LoyaltyResult<Vec<Campaign>>;

    async fn get_campaign(&self, campaign_id: &str) -> LoyaltyResult<Option<Campaign>>;

    /// Owning campaign of a reward type.
    async fn campaign_for_reward_type(
        &self,
        reward_type_id: &str,
    ) -> LoyaltyResult<Option<Campaign>>;

    /// Moves the campaign to `to` only if it is currently `from`.
    /// Returns `false` when the precondition did not hold.
    async fn transition_status(
        &self,
        campaign_id: &str,
        from: CampaignStatus,
        to: CampaignStatus,
        reason: Option<String>,
        at: DateTime<Utc>,
    ) -> LoyaltyResult<bool>;
}

#[async_trait]
pub trait VoucherPoolRepo: Send + Sync {
    async fn get_pool(&self, reward_type_id: &str) -> LoyaltyResult<Option<VoucherPool>>;

    /// Atomically moves voucher `code` from `available` to `assigned` if it
    /// is still claimable at `now`. `None` means another claimer won.
    async fn claim_voucher(
        &self,
        reward_type_id: &str,
        code: &str,
        binding: VoucherBinding,
        now: DateTime<Utc>,
    ) -> LoyaltyResult<Option<Voucher>>;

    /// Compensates an uncommitted claim: `assigned` back to `available`,
    /// only while still bound to `reward_id`.
    async fn release_voucher(
        &self,
        reward_type_id: &str,
        code: &str,
        reward_id: Uuid,
    ) -> LoyaltyResult<bool>;

    /// Atomically moves voucher `code` from `assigned` to `redeemed`.
    async fn redeem_voucher(
        &self,
        reward_type_id: &str,
        code: &str,
        now: DateTime<Utc>,
    ) -> LoyaltyResult<Option<Voucher>>;

    /// Marks every `available` voucher past expiry as `expired`.
    async fn expire_vouchers(&self, reward_type_id: &str, now: DateTime<Utc>)
        -> LoyaltyResult<u64>;

    /// Rebuilds pool stats from voucher states under the pool's write lock.
    async fn recompute_stats(
        &self,
        reward_type_id: &str,
        now: DateTime<Utc>,
    ) -> LoyaltyResult<Option<PoolStats>>;
}

#[async_trait]
pub trait RewardRepo: Send + Sync {
    async fn put_reward(&self, reward: &Reward) -> LoyaltyResult<()>;
    async fn get_reward(&self, reward_id: Uuid) -> LoyaltyResult<Option<Reward>>;
    async fn delete_reward(&self, reward_id: Uuid) -> LoyaltyResult<()>;

    async fn put_guest_index(&self, entry: &GuestRewardIndex) -> LoyaltyResult<()>;
    async fn delete_guest_index(&self, guest_id: &str, reward_id: Uuid) -> LoyaltyResult<()>;
    async fn guest_index(&self, guest_id: &str) -> LoyaltyResult<Vec<GuestRewardIndex>>;

    async fn put_campaign_index(&self, entry: &CampaignRewardIndex) -> LoyaltyResult<()>;
    async fn delete_campaign_index(&self, campaign_id: &str, reward_id: Uuid)
        -> LoyaltyResult<()>;
    async fn campaign_index(&self, campaign_id: &str) -> LoyaltyResult<Vec<CampaignRewardIndex>>;

    /// `pending` rewards of a reward type, oldest first.
    async fn pending_rewards(&self, reward_type_id: &str) -> LoyaltyResult<Vec<Reward>>;
}

#[async_trait]
pub trait ReceiptRepo: Send + Sync {
    async fn get_receipt(&self, receipt_id: &str) -> LoyaltyResult<Option<ReceiptRecord>>;

    /// Stores `record` as validated unless the receipt is already validated.
    /// Returns `false` when another invocation got there first.
    async fn try_mark_validated(&self, record: &ReceiptRecord) -> LoyaltyResult<bool>;

    /// Reverts a validation mark made by a rolled-back invocation.
    async fn reset_to_pending(&self, receipt_id: &str) -> LoyaltyResult<()>;
}

#[async_trait]
pub trait FraudRepo: Send + Sync {
    /// Inserts `candidate` if its fingerprint is unseen, otherwise records a
    /// collision by `guest_id` on the stored record. Atomic per fingerprint.
    async fn register_sighting(
        &self,
        candidate: FraudRecord,
        guest_id: &str,
        now: DateTime<Utc>,
    ) -> LoyaltyResult<FraudSighting>;

    async fn get_record(&self, fingerprint: &str) -> LoyaltyResult<Option<FraudRecord>>;

    async fn put_suspicious_activity(&self, activity: &SuspiciousActivity) -> LoyaltyResult<()>;
}

#[async_trait]
pub trait NotificationRepo: Send + Sync {
    async fn put_notification(&self, notification: &OperatorNotification) -> LoyaltyResult<()>;
    async fn list_notifications(&self, unread_only: bool)
        -> LoyaltyResult<Vec<OperatorNotification>>;
    async fn mark_read(&self, notification_id: Uuid) -> LoyaltyResult<bool>;
}
