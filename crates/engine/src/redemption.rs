//! Post-grant voucher lifecycle: point-of-sale redemption, expiry sweeps and
//! replenishment of rewards left pending by a depleted pool.

use chrono::Utc;
use loyalty_core::event_bus::{EngineEvent, EngineEventType, EventSink};
use loyalty_core::repository::{RewardRepo, VoucherPoolRepo};
use loyalty_core::reward::{Reward, RewardStatus};
use loyalty_core::voucher::{PoolStats, Voucher, VoucherBinding, VoucherStatus};
use loyalty_core::{LoyaltyError, LoyaltyResult};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::allocator::{AllocationOutcome, VoucherAllocator};

#[derive(Debug, Clone, Serialize)]
pub struct Redemption {
    pub voucher: Voucher,
    /// Bound reward, when it could be found.
    pub reward: Option<Reward>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExpirySweep {
    pub expired: u64,
    pub stats: PoolStats,
}

pub struct RedemptionService {
    pools: Arc<dyn VoucherPoolRepo>,
    rewards: Arc<dyn RewardRepo>,
    allocator: Arc<VoucherAllocator>,
    sink: Arc<dyn EventSink>,
}

impl RedemptionService {
    pub fn new(
        pools: Arc<dyn VoucherPoolRepo>,
        rewards: Arc<dyn RewardRepo>,
        allocator: Arc<VoucherAllocator>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            pools,
            rewards,
            allocator,
            sink,
        }
    }

    /// `assigned → redeemed` for the voucher and `available → redeemed` for
    /// its reward.
    ///
    /// The reward is written first. If the voucher transition then fails the
    /// reward is put back, so the two never disagree.
    pub async fn redeem(&self, voucher_code: &str, reward_type_id: &str) -> LoyaltyResult<Redemption> {
        let now = Utc::now();
        let pool = self
            .pools
            .get_pool(reward_type_id)
            .await?
            .ok_or_else(|| LoyaltyError::NotFound(format!("voucher pool {reward_type_id}")))?;
        let current = pool
            .vouchers
            .get(voucher_code)
            .ok_or_else(|| LoyaltyError::NotFound(format!("voucher {voucher_code}")))?;
        if !current.status.can_transition_to(VoucherStatus::Redeemed) {
            return Err(not_assigned(voucher_code));
        }

        let original = match &current.assigned_to {
            Some(binding) => {
                let found = self.rewards.get_reward(binding.reward_id).await?;
                if found.is_none() {
                    warn!(
                        code = voucher_code,
                        reward_id = %binding.reward_id,
                        "Redeemed voucher is bound to a missing reward"
                    );
                }
                found
            }
            None => None,
        };
        let reward = match &original {
            Some(original) => {
                let mut bound = original.clone();
                bound.status = RewardStatus::Redeemed;
                bound.redeemed_at = Some(now);
                self.rewards.put_reward(&bound).await?;
                Some(bound)
            }
            None => None,
        };

        let voucher = match self.pools.redeem_voucher(reward_type_id, voucher_code, now).await {
            Ok(Some(voucher)) => voucher,
            Ok(None) => {
                self.restore_reward(original.as_ref(), voucher_code, reward_type_id).await;
                return Err(not_assigned(voucher_code));
            }
            Err(e) => {
                self.restore_reward(original.as_ref(), voucher_code, reward_type_id).await;
                return Err(e);
            }
        };
        self.allocator.refresh_stats(reward_type_id, now).await;

        info!(code = voucher_code, reward_type_id = reward_type_id, "Voucher redeemed");
        metrics::counter!("redemption.vouchers_redeemed").increment(1);
        let mut event = EngineEvent::new(EngineEventType::VoucherRedeemed).reward_type(reward_type_id);
        if let Some(binding) = &voucher.assigned_to {
            event = event.guest(binding.guest_id.clone());
        }
        self.sink.emit(event);

        Ok(Redemption { voucher, reward })
    }

    async fn restore_reward(&self, original: Option<&Reward>, voucher_code: &str, reward_type_id: &str) {
        let Some(original) = original else {
            return;
        };
        if let Err(e) = self.rewards.put_reward(original).await {
            error!(
                code = voucher_code,
                reward_id = %original.id,
                error = %e,
                "Reward left redeemed after failed voucher redemption"
            );
            metrics::counter!("redemption.restore_failures").increment(1);
            self.sink.emit(
                EngineEvent::new(EngineEventType::RedemptionFailure)
                    .reward_type(reward_type_id)
                    .guest(original.guest_id.clone())
                    .detail(e.to_string()),
            );
        }
    }

    /// Moves unassigned vouchers past their expiry to `expired`.
    pub async fn expire_pool(&self, reward_type_id: &str) -> LoyaltyResult<ExpirySweep> {
        let now = Utc::now();
        let expired = self.pools.expire_vouchers(reward_type_id, now).await?;
        let stats = self
            .pools
            .recompute_stats(reward_type_id, now)
            .await?
            .unwrap_or_default();
        if expired > 0 {
            info!(reward_type_id = reward_type_id, expired = expired, "Expired vouchers swept");
            metrics::counter!("redemption.vouchers_expired").increment(expired);
        }
        Ok(ExpirySweep { expired, stats })
    }

    /// Binds freshly uploaded vouchers to pending rewards, oldest first.
    /// Stops at the first depletion. Returns the rewards that were filled.
    pub async fn replenish_pending(&self, reward_type_id: &str) -> LoyaltyResult<Vec<Reward>> {
        let now = Utc::now();
        let pending = self.rewards.pending_rewards(reward_type_id).await?;
        let mut filled = Vec::new();

        for mut reward in pending {
            if reward.is_expired(now) {
                debug!(reward_id = %reward.id, "Skipping expired pending reward");
                continue;
            }
            let binding = VoucherBinding {
                reward_id: reward.id,
                guest_id: reward.guest_id.clone(),
            };
            let voucher = match self.allocator.allocate(reward_type_id, binding.clone()).await? {
                AllocationOutcome::Assigned { voucher, .. } => voucher,
                AllocationOutcome::PoolDepleted | AllocationOutcome::NoPool { .. } => break,
            };

            reward.voucher_code = Some(voucher.code.clone());
            reward.status = RewardStatus::Available;
            reward.pool_depleted = false;
            if let Err(e) = self.rewards.put_reward(&reward).await {
                // The claim must not outlive the failed write.
                self.allocator
                    .release(reward_type_id, &voucher.code, &binding)
                    .await?;
                return Err(e);
            }
            filled.push(reward);
        }

        if !filled.is_empty() {
            info!(
                reward_type_id = reward_type_id,
                filled = filled.len(),
                "Pending rewards replenished"
            );
            metrics::counter!("redemption.rewards_replenished").increment(filled.len() as u64);
        }
        Ok(filled)
    }
}

fn not_assigned(voucher_code: &str) -> LoyaltyError {
    LoyaltyError::Conflict(format!("voucher {voucher_code} is not assigned"))
}
