//! In-memory store backed by DashMap, implementing every repository trait.
//!
//! Conditional updates run while holding the DashMap entry's write guard,
//! which makes each of them atomic with respect to concurrent callers.
//! A persistent backend maps the same calls onto conditional writes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use loyalty_core::campaign::{Campaign, CampaignStatus};
use loyalty_core::fraud::{FraudRecord, FraudSighting, SuspiciousActivity};
use loyalty_core::notification::OperatorNotification;
use loyalty_core::receipt::{ReceiptRecord, ReceiptStatus};
use loyalty_core::repository::*;
use loyalty_core::reward::{CampaignRewardIndex, GuestRewardIndex, Reward, RewardStatus};
use loyalty_core::voucher::{PoolStats, Voucher, VoucherBinding, VoucherPool, VoucherStatus};
use loyalty_core::{LoyaltyError, LoyaltyResult};
use parking_lot::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::faults::{FaultInjector, StoreOp};

/// Thread-safe in-memory store for campaigns, pools, rewards, receipts,
/// fraud records and operator notifications.
#[derive(Default)]
pub struct MemoryStore {
    campaigns: DashMap<String, Campaign>,
    /// Campaign ids in insertion order; DashMap iteration is unordered.
    campaign_order: Mutex<Vec<String>>,
    reward_type_owner: DashMap<String, String>,
    pools: DashMap<String, VoucherPool>,
    rewards: DashMap<Uuid, Reward>,
    guest_index: DashMap<String, Vec<GuestRewardIndex>>,
    campaign_index: DashMap<String, Vec<CampaignRewardIndex>>,
    receipts: DashMap<String, ReceiptRecord>,
    fraud: DashMap<String, FraudRecord>,
    suspicious: DashMap<Uuid, SuspiciousActivity>,
    notifications: DashMap<Uuid, OperatorNotification>,
    faults: FaultInjector,
}

impl MemoryStore {
    pub fn new() -> Self {
        debug!("Memory store initialized");
        Self::default()
    }

    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    // ─── Admin-side seeding ────────────────────────────────────────────────

    /// Inserts or replaces a campaign, keeping its original position.
    pub fn insert_campaign(&self, campaign: Campaign) {
        for rt in &campaign.reward_types {
            self.reward_type_owner
                .insert(rt.id.clone(), campaign.id.clone());
        }
        let id = campaign.id.clone();
        if self.campaigns.insert(id.clone(), campaign).is_none() {
            self.campaign_order.lock().push(id);
        }
    }

    pub fn insert_pool(&self, mut pool: VoucherPool) {
        pool.recompute_stats(Utc::now());
        self.pools.insert(pool.reward_type_id.clone(), pool);
    }

    /// Bulk upload: adds vouchers to a pool, creating it if needed.
    /// Existing codes are left untouched.
    pub fn upload_vouchers(&self, reward_type_id: &str, vouchers: Vec<Voucher>) -> PoolStats {
        let mut pool = self
            .pools
            .entry(reward_type_id.to_string())
            .or_insert_with(|| VoucherPool::new(reward_type_id, Vec::new()));
        let added = vouchers.len();
        for voucher in vouchers {
            pool.vouchers.entry(voucher.code.clone()).or_insert(voucher);
        }
        let stats = pool.recompute_stats(Utc::now());
        info!(
            reward_type_id = reward_type_id,
            added = added,
            available = stats.available,
            "Vouchers uploaded"
        );
        stats
    }

    // ─── Inspection ────────────────────────────────────────────────────────

    pub fn campaign(&self, campaign_id: &str) -> Option<Campaign> {
        self.campaigns.get(campaign_id).map(|r| r.value().clone())
    }

    pub fn pool(&self, reward_type_id: &str) -> Option<VoucherPool> {
        self.pools.get(reward_type_id).map(|r| r.value().clone())
    }

    pub fn rewards(&self) -> Vec<Reward> {
        let mut rewards: Vec<Reward> = self.rewards.iter().map(|r| r.value().clone()).collect();
        rewards.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        rewards
    }

    pub fn guest_index_len(&self) -> usize {
        self.guest_index.iter().map(|r| r.value().len()).sum()
    }

    pub fn campaign_index_len(&self) -> usize {
        self.campaign_index.iter().map(|r| r.value().len()).sum()
    }

    pub fn suspicious_activity(&self) -> Vec<SuspiciousActivity> {
        let mut entries: Vec<SuspiciousActivity> =
            self.suspicious.iter().map(|r| r.value().clone()).collect();
        entries.sort_by(|a, b| a.detected_at.cmp(&b.detected_at));
        entries
    }
}

#[async_trait]
impl CampaignRepo for MemoryStore {
    async fn active_campaigns(&self) -> LoyaltyResult<Vec<Campaign>> {
        self.faults.check(StoreOp::ActiveCampaigns).await?;
        let order = self.campaign_order.lock().clone();
        Ok(order
            .iter()
            .filter_map(|id| self.campaigns.get(id).map(|r| r.value().clone()))
            .filter(|c| c.status == CampaignStatus::Active)
            .collect())
    }

    async fn get_campaign(&self, campaign_id: &str) -> LoyaltyResult<Option<Campaign>> {
        Ok(self.campaign(campaign_id))
    }

    async fn campaign_for_reward_type(
        &self,
        reward_type_id: &str,
    ) -> LoyaltyResult<Option<Campaign>> {
        let owner = self
            .reward_type_owner
            .get(reward_type_id)
            .map(|r| r.value().clone());
        Ok(owner.and_then(|id| self.campaign(&id)))
    }

    async fn transition_status(
        &self,
        campaign_id: &str,
        from: CampaignStatus,
        to: CampaignStatus,
        reason: Option<String>,
        at: DateTime<Utc>,
    ) -> LoyaltyResult<bool> {
        self.faults.check(StoreOp::TransitionCampaign).await?;
        let mut entry = self
            .campaigns
            .get_mut(campaign_id)
            .ok_or_else(|| LoyaltyError::NotFound(format!("campaign {campaign_id}")))?;
        if entry.status != from {
            return Ok(false);
        }
        entry.status = to;
        if to == CampaignStatus::Paused {
            entry.paused_reason = reason;
            entry.paused_at = Some(at);
        }
        Ok(true)
    }
}

#[async_trait]
impl VoucherPoolRepo for MemoryStore {
    async fn get_pool(&self, reward_type_id: &str) -> LoyaltyResult<Option<VoucherPool>> {
        self.faults.check(StoreOp::GetPool).await?;
        Ok(self.pool(reward_type_id))
    }

    async fn claim_voucher(
        &self,
        reward_type_id: &str,
        code: &str,
        binding: VoucherBinding,
        now: DateTime<Utc>,
    ) -> LoyaltyResult<Option<Voucher>> {
        self.faults.check(StoreOp::ClaimVoucher).await?;
        let mut pool = self
            .pools
            .get_mut(reward_type_id)
            .ok_or_else(|| LoyaltyError::NotFound(format!("voucher pool {reward_type_id}")))?;
        let Some(voucher) = pool.vouchers.get_mut(code) else {
            return Ok(None);
        };
        if !voucher.is_claimable(now) {
            return Ok(None);
        }
        voucher.status = VoucherStatus::Assigned;
        voucher.assigned_to = Some(binding);
        voucher.assigned_at = Some(now);
        Ok(Some(voucher.clone()))
    }

    async fn release_voucher(
        &self,
        reward_type_id: &str,
        code: &str,
        reward_id: Uuid,
    ) -> LoyaltyResult<bool> {
        self.faults.check(StoreOp::ReleaseVoucher).await?;
        let Some(mut pool) = self.pools.get_mut(reward_type_id) else {
            return Ok(false);
        };
        let Some(voucher) = pool.vouchers.get_mut(code) else {
            return Ok(false);
        };
        let bound_here = voucher
            .assigned_to
            .as_ref()
            .map(|b| b.reward_id == reward_id)
            .unwrap_or(false);
        if voucher.status != VoucherStatus::Assigned || !bound_here {
            return Ok(false);
        }
        voucher.status = VoucherStatus::Available;
        voucher.assigned_to = None;
        voucher.assigned_at = None;
        Ok(true)
    }

    async fn redeem_voucher(
        &self,
        reward_type_id: &str,
        code: &str,
        now: DateTime<Utc>,
    ) -> LoyaltyResult<Option<Voucher>> {
        self.faults.check(StoreOp::RedeemVoucher).await?;
        let mut pool = self
            .pools
            .get_mut(reward_type_id)
            .ok_or_else(|| LoyaltyError::NotFound(format!("voucher pool {reward_type_id}")))?;
        let voucher = pool
            .vouchers
            .get_mut(code)
            .ok_or_else(|| LoyaltyError::NotFound(format!("voucher {code}")))?;
        if !voucher.status.can_transition_to(VoucherStatus::Redeemed) {
            return Ok(None);
        }
        voucher.status = VoucherStatus::Redeemed;
        voucher.redeemed_at = Some(now);
        Ok(Some(voucher.clone()))
    }

    async fn expire_vouchers(
        &self,
        reward_type_id: &str,
        now: DateTime<Utc>,
    ) -> LoyaltyResult<u64> {
        let Some(mut pool) = self.pools.get_mut(reward_type_id) else {
            return Ok(0);
        };
        let mut expired = 0;
        for voucher in pool.vouchers.values_mut() {
            if voucher.status == VoucherStatus::Available && voucher.expiry_date <= now {
                voucher.status = VoucherStatus::Expired;
                expired += 1;
            }
        }
        Ok(expired)
    }

    async fn recompute_stats(
        &self,
        reward_type_id: &str,
        now: DateTime<Utc>,
    ) -> LoyaltyResult<Option<PoolStats>> {
        self.faults.check(StoreOp::RecomputeStats).await?;
        Ok(self
            .pools
            .get_mut(reward_type_id)
            .map(|mut pool| pool.recompute_stats(now)))
    }
}

#[async_trait]
impl RewardRepo for MemoryStore {
    async fn put_reward(&self, reward: &Reward) -> LoyaltyResult<()> {
        self.faults.check(StoreOp::PutReward).await?;
        self.rewards.insert(reward.id, reward.clone());
        Ok(())
    }

    async fn get_reward(&self, reward_id: Uuid) -> LoyaltyResult<Option<Reward>> {
        Ok(self.rewards.get(&reward_id).map(|r| r.value().clone()))
    }

    async fn delete_reward(&self, reward_id: Uuid) -> LoyaltyResult<()> {
        self.faults.check(StoreOp::DeleteReward).await?;
        self.rewards.remove(&reward_id);
        Ok(())
    }

    async fn put_guest_index(&self, entry: &GuestRewardIndex) -> LoyaltyResult<()> {
        self.faults.check(StoreOp::PutGuestIndex).await?;
        let mut entries = self.guest_index.entry(entry.guest_id.clone()).or_default();
        entries.retain(|e| e.reward_id != entry.reward_id);
        entries.push(entry.clone());
        Ok(())
    }

    async fn delete_guest_index(&self, guest_id: &str, reward_id: Uuid) -> LoyaltyResult<()> {
        if let Some(mut entries) = self.guest_index.get_mut(guest_id) {
            entries.retain(|e| e.reward_id != reward_id);
        }
        Ok(())
    }

    async fn guest_index(&self, guest_id: &str) -> LoyaltyResult<Vec<GuestRewardIndex>> {
        self.faults.check(StoreOp::ReadIndex).await?;
        Ok(self
            .guest_index
            .get(guest_id)
            .map(|r| r.value().clone())
            .unwrap_or_default())
    }

    async fn put_campaign_index(&self, entry: &CampaignRewardIndex) -> LoyaltyResult<()> {
        self.faults.check(StoreOp::PutCampaignIndex).await?;
        let mut entries = self
            .campaign_index
            .entry(entry.campaign_id.clone())
            .or_default();
        entries.retain(|e| e.reward_id != entry.reward_id);
        entries.push(entry.clone());
        Ok(())
    }

    async fn delete_campaign_index(
        &self,
        campaign_id: &str,
        reward_id: Uuid,
    ) -> LoyaltyResult<()> {
        if let Some(mut entries) = self.campaign_index.get_mut(campaign_id) {
            entries.retain(|e| e.reward_id != reward_id);
        }
        Ok(())
    }

    async fn campaign_index(&self, campaign_id: &str) -> LoyaltyResult<Vec<CampaignRewardIndex>> {
        self.faults.check(StoreOp::ReadIndex).await?;
        Ok(self
            .campaign_index
            .get(campaign_id)
            .map(|r| r.value().clone())
            .unwrap_or_default())
    }

    async fn pending_rewards(&self, reward_type_id: &str) -> LoyaltyResult<Vec<Reward>> {
        let mut pending: Vec<Reward> = self
            .rewards
            .iter()
            .filter(|r| r.status == RewardStatus::Pending && r.reward_type_id == reward_type_id)
            .map(|r| r.value().clone())
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(pending)
    }
}

#[async_trait]
impl ReceiptRepo for MemoryStore {
    async fn get_receipt(&self, receipt_id: &str) -> LoyaltyResult<Option<ReceiptRecord>> {
        Ok(self.receipts.get(receipt_id).map(|r| r.value().clone()))
    }

    async fn try_mark_validated(&self, record: &ReceiptRecord) -> LoyaltyResult<bool> {
        self.faults.check(StoreOp::MarkValidated).await?;
        match self.receipts.entry(record.receipt_id.clone()) {
            Entry::Occupied(mut existing) => {
                if existing.get().status == ReceiptStatus::Validated {
                    return Ok(false);
                }
                existing.insert(record.clone());
                Ok(true)
            }
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(true)
            }
        }
    }

    async fn reset_to_pending(&self, receipt_id: &str) -> LoyaltyResult<()> {
        if let Some(mut record) = self.receipts.get_mut(receipt_id) {
            record.status = ReceiptStatus::Pending;
            record.campaign_id = None;
            record.validated_at = None;
        }
        Ok(())
    }
}

#[async_trait]
impl FraudRepo for MemoryStore {
    async fn register_sighting(
        &self,
        candidate: FraudRecord,
        guest_id: &str,
        now: DateTime<Utc>,
    ) -> LoyaltyResult<FraudSighting> {
        self.faults.check(StoreOp::RegisterSighting).await?;
        match self.fraud.entry(candidate.fingerprint.clone()) {
            Entry::Occupied(mut existing) => {
                existing.get_mut().record_collision(guest_id, now);
                Ok(FraudSighting {
                    record: existing.get().clone(),
                    first_sight: false,
                })
            }
            Entry::Vacant(slot) => {
                slot.insert(candidate.clone());
                Ok(FraudSighting {
                    record: candidate,
                    first_sight: true,
                })
            }
        }
    }

    async fn get_record(&self, fingerprint: &str) -> LoyaltyResult<Option<FraudRecord>> {
        Ok(self.fraud.get(fingerprint).map(|r| r.value().clone()))
    }

    async fn put_suspicious_activity(&self, activity: &SuspiciousActivity) -> LoyaltyResult<()> {
        self.faults.check(StoreOp::PutSuspicious).await?;
        self.suspicious.insert(activity.id, activity.clone());
        Ok(())
    }
}

#[async_trait]
impl NotificationRepo for MemoryStore {
    async fn put_notification(&self, notification: &OperatorNotification) -> LoyaltyResult<()> {
        self.faults.check(StoreOp::PutNotification).await?;
        self.notifications
            .insert(notification.id, notification.clone());
        Ok(())
    }

    async fn list_notifications(
        &self,
        unread_only: bool,
    ) -> LoyaltyResult<Vec<OperatorNotification>> {
        let mut list: Vec<OperatorNotification> = self
            .notifications
            .iter()
            .filter(|n| !unread_only || !n.read)
            .map(|n| n.value().clone())
            .collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(list)
    }

    async fn mark_read(&self, notification_id: Uuid) -> LoyaltyResult<bool> {
        match self.notifications.get_mut(&notification_id) {
            Some(mut entry) => {
                entry.read = true;
                entry.read_at = Some(Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
