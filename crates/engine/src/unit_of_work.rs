//! Ordered list of applied ledger writes, undone in reverse on failure.

use loyalty_core::receipt::ReceiptRecord;
use loyalty_core::reward::{CampaignRewardIndex, GuestRewardIndex, Reward};
use loyalty_core::LoyaltyResult;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::repos::Repositories;

#[derive(Debug, Clone)]
pub enum LedgerOp {
    MarkReceiptValidated(ReceiptRecord),
    ClaimedVoucher {
        reward_type_id: String,
        code: String,
        reward_id: Uuid,
    },
    PutReward(Reward),
    PutGuestIndex(GuestRewardIndex),
    PutCampaignIndex(CampaignRewardIndex),
}

impl LedgerOp {
    fn label(&self) -> &'static str {
        match self {
            LedgerOp::MarkReceiptValidated(_) => "mark_receipt_validated",
            LedgerOp::ClaimedVoucher { .. } => "claimed_voucher",
            LedgerOp::PutReward(_) => "put_reward",
            LedgerOp::PutGuestIndex(_) => "put_guest_index",
            LedgerOp::PutCampaignIndex(_) => "put_campaign_index",
        }
    }
}

pub struct UnitOfWork {
    repos: Repositories,
    applied: Vec<LedgerOp>,
}

impl UnitOfWork {
    pub fn new(repos: Repositories) -> Self {
        Self {
            repos,
            applied: Vec::new(),
        }
    }

    /// Executes the write and records it for undo. Not recorded on failure.
    /// `MarkReceiptValidated` and `ClaimedVoucher` are conditional and
    /// performed by the caller; use [`UnitOfWork::record`] for those.
    pub async fn apply(&mut self, op: LedgerOp) -> LoyaltyResult<()> {
        match &op {
            LedgerOp::PutReward(reward) => self.repos.rewards.put_reward(reward).await?,
            LedgerOp::PutGuestIndex(entry) => self.repos.rewards.put_guest_index(entry).await?,
            LedgerOp::PutCampaignIndex(entry) => {
                self.repos.rewards.put_campaign_index(entry).await?
            }
            LedgerOp::MarkReceiptValidated(_) | LedgerOp::ClaimedVoucher { .. } => {}
        }
        self.record(op);
        Ok(())
    }

    /// Records a write that already happened.
    pub fn record(&mut self, op: LedgerOp) {
        debug!(op = op.label(), "Unit of work recorded op");
        self.applied.push(op);
    }

    pub fn len(&self) -> usize {
        self.applied.len()
    }

    pub fn is_empty(&self) -> bool {
        self.applied.is_empty()
    }

    pub fn commit(self) -> usize {
        self.applied.len()
    }

    /// Undoes every recorded op in reverse order. Undo failures are logged
    /// and counted; the remaining undos still run. Returns how many failed.
    pub async fn rollback(mut self) -> usize {
        let mut failures = 0;
        while let Some(op) = self.applied.pop() {
            if let Err(e) = self.undo(&op).await {
                failures += 1;
                warn!(op = op.label(), error = %e, "Undo failed during rollback");
                metrics::counter!("ledger.undo_failures").increment(1);
            }
        }
        failures
    }

    async fn undo(&self, op: &LedgerOp) -> LoyaltyResult<()> {
        match op {
            LedgerOp::MarkReceiptValidated(record) => {
                self.repos.receipts.reset_to_pending(&record.receipt_id).await
            }
            LedgerOp::ClaimedVoucher {
                reward_type_id,
                code,
                reward_id,
            } => {
                self.repos
                    .pools
                    .release_voucher(reward_type_id, code, *reward_id)
                    .await?;
                self.repos
                    .pools
                    .recompute_stats(reward_type_id, chrono::Utc::now())
                    .await?;
                Ok(())
            }
            LedgerOp::PutReward(reward) => self.repos.rewards.delete_reward(reward.id).await,
            LedgerOp::PutGuestIndex(entry) => {
                self.repos
                    .rewards
                    .delete_guest_index(&entry.guest_id, entry.reward_id)
                    .await
            }
            LedgerOp::PutCampaignIndex(entry) => {
                self.repos
                    .rewards
                    .delete_campaign_index(&entry.campaign_id, entry.reward_id)
                    .await
            }
        }
    }
}
