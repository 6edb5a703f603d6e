//! Reward ledger: grants every eligible reward of the matched campaign for
//! one receipt, all or nothing.
//!
//! The receipt's `validated` flag is the idempotency key. It is set with a
//! conditional write before any reward is built and reverted together with
//! the rewards, their index entries and any claimed vouchers if a later step
//! fails.
//!
//! Calls for the same receipt id are serialized, so a concurrent duplicate
//! waits for the first call to commit or roll back before it looks at the
//! flag.

use chrono::{Duration, Utc};
use dashmap::DashMap;
use loyalty_core::campaign::{Campaign, RewardType};
use loyalty_core::config::EngineConfig;
use loyalty_core::event_bus::{EngineEvent, EngineEventType, EventSink};
use loyalty_core::receipt::{Guest, ReceiptRecord, ReceiptStatus, ValidatedReceipt};
use loyalty_core::reward::{Reward, RewardStatus};
use loyalty_core::voucher::VoucherBinding;
use loyalty_core::{LoyaltyError, LoyaltyResult};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::allocator::{AllocationOutcome, VoucherAllocator};
use crate::eligibility::EligibilityEvaluator;
use crate::pause::{PauseController, PauseDecision};
use crate::repos::Repositories;
use crate::unit_of_work::{LedgerOp, UnitOfWork};
use crate::valuation::value_reward;

#[derive(Debug, Clone, Default)]
pub struct LedgerResult {
    pub success: bool,
    pub rewards: Vec<Reward>,
    /// Receipt was validated by an earlier call; `rewards` are that call's.
    pub already_processed: bool,
    /// Reward types whose pool ran dry during this call.
    pub depleted_reward_types: Vec<String>,
    pub pause_decisions: Vec<PauseDecision>,
}

pub struct RewardLedger {
    repos: Repositories,
    evaluator: Arc<EligibilityEvaluator>,
    allocator: Arc<VoucherAllocator>,
    pause: Arc<PauseController>,
    default_validity_days: u32,
    sink: Arc<dyn EventSink>,
    in_flight: DashMap<String, Arc<Mutex<()>>>,
}

impl RewardLedger {
    pub fn new(
        repos: Repositories,
        evaluator: Arc<EligibilityEvaluator>,
        allocator: Arc<VoucherAllocator>,
        pause: Arc<PauseController>,
        config: &EngineConfig,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            repos,
            evaluator,
            allocator,
            pause,
            default_validity_days: config.default_validity_days,
            sink,
            in_flight: DashMap::new(),
        }
    }

    pub async fn process_reward(
        &self,
        guest: &Guest,
        campaign: &Campaign,
        receipt: &ValidatedReceipt,
    ) -> LoyaltyResult<LedgerResult> {
        let receipt_id = &receipt.receipt.receipt_id;
        let guard = self.lock_receipt(receipt_id).await;
        let result = self.process_locked(guest, campaign, receipt).await;
        self.unlock_receipt(receipt_id, guard);
        result
    }

    /// The first grant for `receipt_id` once it has committed, or `None` if
    /// the receipt has not been validated. Waits out an in-flight grant.
    pub async fn replay(&self, receipt_id: &str) -> LoyaltyResult<Option<LedgerResult>> {
        let guard = self.lock_receipt(receipt_id).await;
        let result = match self.repos.receipts.get_receipt(receipt_id).await {
            Ok(Some(record)) if record.status == ReceiptStatus::Validated => {
                self.already_processed(&record).await.map(Some)
            }
            Ok(_) => Ok(None),
            Err(e) => Err(e),
        };
        self.unlock_receipt(receipt_id, guard);
        result
    }

    async fn lock_receipt(&self, receipt_id: &str) -> OwnedMutexGuard<()> {
        let lock = self.in_flight.entry(receipt_id.to_string()).or_default().clone();
        lock.lock_owned().await
    }

    fn unlock_receipt(&self, receipt_id: &str, guard: OwnedMutexGuard<()>) {
        drop(guard);
        self.in_flight
            .remove_if(receipt_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    async fn process_locked(
        &self,
        guest: &Guest,
        campaign: &Campaign,
        receipt: &ValidatedReceipt,
    ) -> LoyaltyResult<LedgerResult> {
        let receipt_id = &receipt.receipt.receipt_id;

        if let Some(existing) = self.repos.receipts.get_receipt(receipt_id).await? {
            if existing.status == ReceiptStatus::Validated {
                return self.already_processed(&existing).await;
            }
        }

        let record = ReceiptRecord {
            receipt_id: receipt_id.clone(),
            guest_id: guest.id.clone(),
            status: ReceiptStatus::Validated,
            campaign_id: Some(campaign.id.clone()),
            total_amount: receipt.receipt.total_amount,
            validated_at: Some(Utc::now()),
        };
        if !self.repos.receipts.try_mark_validated(&record).await? {
            // Only a writer outside this ledger can get here.
            warn!(receipt_id = %receipt_id, "Receipt validated by another writer");
            metrics::counter!("ledger.mark_conflicts").increment(1);
            return Err(LoyaltyError::Conflict(format!(
                "receipt {receipt_id} is being processed elsewhere"
            )));
        }

        let mut uow = UnitOfWork::new(self.repos.clone());
        uow.record(LedgerOp::MarkReceiptValidated(record));

        let (rewards, depleted) = match self.grant(&mut uow, guest, campaign, receipt).await {
            Ok(granted) => granted,
            Err(e) => {
                let applied = uow.len();
                let undo_failures = uow.rollback().await;
                error!(
                    receipt_id = %receipt_id,
                    campaign_id = %campaign.id,
                    applied_ops = applied,
                    undo_failures = undo_failures,
                    error = %e,
                    "Reward grant failed, rolled back"
                );
                metrics::counter!("ledger.rollbacks").increment(1);
                self.sink.emit(
                    EngineEvent::new(EngineEventType::LedgerRollback)
                        .receipt(receipt_id.clone())
                        .guest(guest.id.clone())
                        .campaign(campaign.id.clone())
                        .detail(e.to_string()),
                );
                return Err(e);
            }
        };

        if rewards.is_empty() {
            // Eligibility changed between match and grant.
            uow.rollback().await;
            info!(receipt_id = %receipt_id, campaign_id = %campaign.id, "No reward type eligible at grant time");
            return Ok(LedgerResult::default());
        }

        let ops = uow.commit();
        info!(
            receipt_id = %receipt_id,
            guest_id = %guest.id,
            campaign_id = %campaign.id,
            rewards = rewards.len(),
            ops = ops,
            "Rewards granted"
        );
        for reward in &rewards {
            metrics::counter!("ledger.rewards_issued").increment(1);
            self.sink.emit(
                EngineEvent::new(EngineEventType::RewardIssued)
                    .receipt(receipt_id.clone())
                    .guest(guest.id.clone())
                    .campaign(campaign.id.clone())
                    .reward_type(reward.reward_type_id.clone()),
            );
        }

        let pause_decisions = self.check_pauses(&depleted).await;
        Ok(LedgerResult {
            success: true,
            rewards,
            already_processed: false,
            depleted_reward_types: depleted,
            pause_decisions,
        })
    }

    async fn grant(
        &self,
        uow: &mut UnitOfWork,
        guest: &Guest,
        campaign: &Campaign,
        receipt: &ValidatedReceipt,
    ) -> LoyaltyResult<(Vec<Reward>, Vec<String>)> {
        let report = self
            .evaluator
            .evaluate_campaign(campaign, receipt, &guest.id)
            .await?;

        let mut rewards = Vec::with_capacity(report.eligible.len());
        let mut depleted = Vec::new();
        for reward_type in &report.eligible {
            let mut reward = self.build_reward(reward_type, guest, campaign, receipt);
            let binding = VoucherBinding {
                reward_id: reward.id,
                guest_id: guest.id.clone(),
            };

            let outcome = self.allocator.allocate(&reward_type.id, binding).await?;
            if outcome.signals_depletion() {
                depleted.push(reward_type.id.clone());
            }
            match outcome {
                AllocationOutcome::Assigned { voucher, .. } => {
                    uow.record(LedgerOp::ClaimedVoucher {
                        reward_type_id: reward_type.id.clone(),
                        code: voucher.code.clone(),
                        reward_id: reward.id,
                    });
                    reward.voucher_code = Some(voucher.code);
                    reward.status = RewardStatus::Available;
                }
                AllocationOutcome::PoolDepleted => {
                    reward.pool_depleted = true;
                    reward.status = RewardStatus::Pending;
                }
                AllocationOutcome::NoPool { code } => {
                    reward.voucher_code = Some(code);
                    reward.uses_random_code = true;
                    reward.status = RewardStatus::Available;
                }
            }

            uow.apply(LedgerOp::PutReward(reward.clone())).await?;
            uow.apply(LedgerOp::PutGuestIndex((&reward).into())).await?;
            uow.apply(LedgerOp::PutCampaignIndex((&reward).into())).await?;
            rewards.push(reward);
        }
        Ok((rewards, depleted))
    }

    fn build_reward(
        &self,
        reward_type: &RewardType,
        guest: &Guest,
        campaign: &Campaign,
        receipt: &ValidatedReceipt,
    ) -> Reward {
        let now = Utc::now();
        let validity = reward_type.validity_days.unwrap_or(self.default_validity_days);
        let valuation = value_reward(reward_type, receipt.receipt.total_amount);
        Reward {
            id: Uuid::new_v4(),
            reward_type_id: reward_type.id.clone(),
            category: reward_type.category,
            guest_id: guest.id.clone(),
            guest_name: guest.display_name.clone(),
            campaign_id: campaign.id.clone(),
            receipt_id: receipt.receipt.receipt_id.clone(),
            receipt_amount: receipt.receipt.total_amount,
            value: valuation.value,
            description: valuation.description,
            status: RewardStatus::Pending,
            created_at: now,
            expires_at: now + Duration::days(i64::from(validity)),
            voucher_code: None,
            uses_random_code: false,
            pool_depleted: false,
            redeemed_at: None,
        }
    }

    /// Rewards the guest already holds for this receipt.
    pub async fn already_processed(&self, record: &ReceiptRecord) -> LoyaltyResult<LedgerResult> {
        let entries = self.repos.rewards.guest_index(&record.guest_id).await?;
        let mut rewards = Vec::new();
        for entry in entries.iter().filter(|e| e.receipt_id == record.receipt_id) {
            if let Some(reward) = self.repos.rewards.get_reward(entry.reward_id).await? {
                rewards.push(reward);
            }
        }
        rewards.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        debug!(
            receipt_id = %record.receipt_id,
            rewards = rewards.len(),
            "Receipt already processed, returning existing rewards"
        );
        metrics::counter!("ledger.idempotent_replays").increment(1);
        Ok(LedgerResult {
            success: true,
            rewards,
            already_processed: true,
            ..LedgerResult::default()
        })
    }

    /// Pause failures never undo granted rewards.
    async fn check_pauses(&self, depleted: &[String]) -> Vec<PauseDecision> {
        let mut decisions = Vec::new();
        let mut seen: Vec<&str> = Vec::new();
        for reward_type_id in depleted {
            if seen.contains(&reward_type_id.as_str()) {
                continue;
            }
            seen.push(reward_type_id);
            match self.pause.on_depletion(reward_type_id).await {
                Ok(decision) => decisions.push(decision),
                Err(e) => {
                    warn!(reward_type_id = %reward_type_id, error = %e, "Pause check failed");
                    metrics::counter!("pause.check_failures").increment(1);
                }
            }
        }
        decisions
    }
}
