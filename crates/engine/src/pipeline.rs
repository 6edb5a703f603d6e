//! Receipt pipeline: validation → fraud check → campaign match → ledger.
//!
//! One call per inbound receipt. Every negative result (malformed receipt,
//! fraud block, no match) is a [`ReceiptOutcome`] variant; only store
//! failures that survive the ledger rollback are returned as errors.

use chrono::Utc;
use loyalty_core::config::AppConfig;
use loyalty_core::event_bus::{EngineEvent, EngineEventType, EventSink};
use loyalty_core::notification::OperatorNotification;
use loyalty_core::receipt::{Guest, Receipt, ValidatedReceipt};
use loyalty_core::reward::Reward;
use loyalty_core::voucher::PoolAvailability;
use loyalty_core::{LoyaltyError, LoyaltyResult};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::allocator::VoucherAllocator;
use crate::eligibility::EligibilityEvaluator;
use crate::fraud::{FraudCheck, FraudDetector};
use crate::ledger::RewardLedger;
use crate::matcher::{CampaignMatcher, CampaignMismatch, MatchOutcome, NoMatchError};
use crate::pause::PauseController;
use crate::redemption::RedemptionService;
use crate::repos::Repositories;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReceiptOutcome {
    Rewarded {
        receipt_id: String,
        campaign_id: String,
        rewards: Vec<Reward>,
        depleted_reward_types: Vec<String>,
    },
    AlreadyProcessed {
        receipt_id: String,
        rewards: Vec<Reward>,
    },
    FraudBlocked {
        receipt_id: String,
        fraud: FraudCheck,
    },
    NoMatch {
        receipt_id: String,
        error: NoMatchError,
        failed_criteria: Vec<CampaignMismatch>,
    },
    Invalid {
        receipt_id: String,
        reason: String,
    },
}

impl ReceiptOutcome {
    pub fn rewards(&self) -> &[Reward] {
        match self {
            ReceiptOutcome::Rewarded { rewards, .. }
            | ReceiptOutcome::AlreadyProcessed { rewards, .. } => rewards,
            _ => &[],
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ReceiptOutcome::Rewarded { .. } => "rewarded",
            ReceiptOutcome::AlreadyProcessed { .. } => "already_processed",
            ReceiptOutcome::FraudBlocked { .. } => "fraud_blocked",
            ReceiptOutcome::NoMatch { .. } => "no_match",
            ReceiptOutcome::Invalid { .. } => "invalid",
        }
    }
}

pub struct ReceiptPipeline {
    repos: Repositories,
    fraud: FraudDetector,
    matcher: CampaignMatcher,
    ledger: RewardLedger,
    allocator: Arc<VoucherAllocator>,
    pause: Arc<PauseController>,
    redemption: RedemptionService,
    sink: Arc<dyn EventSink>,
}

impl ReceiptPipeline {
    pub fn new(config: &AppConfig, repos: Repositories, sink: Arc<dyn EventSink>) -> Self {
        let evaluator = Arc::new(EligibilityEvaluator::new(repos.rewards.clone()));
        let allocator = Arc::new(VoucherAllocator::new(
            repos.pools.clone(),
            &config.engine,
            sink.clone(),
        ));
        let pause = Arc::new(PauseController::new(
            repos.campaigns.clone(),
            repos.notifications.clone(),
            allocator.clone(),
            &config.notifications,
            sink.clone(),
        ));
        let fraud = FraudDetector::new(repos.fraud.clone(), &config.fraud, sink.clone());
        let matcher = CampaignMatcher::new(repos.campaigns.clone(), evaluator.clone(), sink.clone());
        let ledger = RewardLedger::new(
            repos.clone(),
            evaluator,
            allocator.clone(),
            pause.clone(),
            &config.engine,
            sink.clone(),
        );
        let redemption = RedemptionService::new(
            repos.pools.clone(),
            repos.rewards.clone(),
            allocator.clone(),
            sink.clone(),
        );

        info!(node_id = %config.node_id, "Receipt pipeline initialized");
        Self {
            repos,
            fraud,
            matcher,
            ledger,
            allocator,
            pause,
            redemption,
            sink,
        }
    }

    pub async fn process(&self, receipt: &Receipt, guest: &Guest) -> LoyaltyResult<ReceiptOutcome> {
        let receipt_id = receipt.receipt_id.clone();
        metrics::counter!("pipeline.receipts").increment(1);

        if receipt.guest_id != guest.id {
            return Ok(self.invalid(
                receipt,
                format!("receipt belongs to guest {}, not {}", receipt.guest_id, guest.id),
            ));
        }
        let validated = match receipt.validate(Utc::now().date_naive()) {
            Ok(v) => v,
            Err(LoyaltyError::Validation(reason)) => return Ok(self.invalid(receipt, reason)),
            Err(e) => return Err(e),
        };

        let fraud = self.fraud.check_receipt(&validated).await;
        if fraud.is_cross_guest() {
            info!(receipt_id = %receipt_id, guest_id = %guest.id, "Receipt blocked as reused");
            metrics::counter!("pipeline.fraud_blocked").increment(1);
            self.sink.emit(
                EngineEvent::new(EngineEventType::FraudBlocked)
                    .receipt(receipt_id.clone())
                    .guest(guest.id.clone()),
            );
            return Ok(ReceiptOutcome::FraudBlocked { receipt_id, fraud });
        }
        let validated = canonicalize(validated, &fraud);

        // A resubmission replays the first grant even if the campaign has
        // since been paused.
        let canonical_id = validated.receipt.receipt_id.clone();
        if let Some(replay) = self.ledger.replay(&canonical_id).await? {
            return Ok(ReceiptOutcome::AlreadyProcessed {
                receipt_id: canonical_id,
                rewards: replay.rewards,
            });
        }

        let campaign = match self.matcher.match_validated(&validated).await? {
            MatchOutcome::Matched { campaign, .. } => campaign,
            MatchOutcome::NoMatch {
                error,
                failed_criteria,
            } => {
                return Ok(ReceiptOutcome::NoMatch {
                    receipt_id,
                    error,
                    failed_criteria,
                })
            }
        };

        let result = self.ledger.process_reward(guest, &campaign, &validated).await?;
        if result.already_processed {
            return Ok(ReceiptOutcome::AlreadyProcessed {
                receipt_id: canonical_id,
                rewards: result.rewards,
            });
        }
        if !result.success {
            return Ok(ReceiptOutcome::NoMatch {
                receipt_id,
                error: NoMatchError::NoEligibleCampaign {
                    brand: validated.receipt.brand_name.clone(),
                },
                failed_criteria: Vec::new(),
            });
        }

        Ok(ReceiptOutcome::Rewarded {
            receipt_id: canonical_id,
            campaign_id: campaign.id,
            rewards: result.rewards,
            depleted_reward_types: result.depleted_reward_types,
        })
    }

    pub fn redemption(&self) -> &RedemptionService {
        &self.redemption
    }

    pub fn pause_controller(&self) -> &PauseController {
        &self.pause
    }

    pub async fn pool_availability(&self, reward_type_id: &str) -> LoyaltyResult<PoolAvailability> {
        self.allocator.pool_availability(reward_type_id).await
    }

    // ─── Operator notification inbox ──────────────────────────────────────

    pub async fn unread_notifications(&self) -> LoyaltyResult<Vec<OperatorNotification>> {
        self.repos.notifications.list_notifications(true).await
    }

    pub async fn all_notifications(&self) -> LoyaltyResult<Vec<OperatorNotification>> {
        self.repos.notifications.list_notifications(false).await
    }

    pub async fn mark_notification_read(&self, notification_id: Uuid) -> LoyaltyResult<bool> {
        let found = self.repos.notifications.mark_read(notification_id).await?;
        if !found {
            warn!(notification_id = %notification_id, "Unknown notification marked read");
        }
        Ok(found)
    }

    fn invalid(&self, receipt: &Receipt, reason: String) -> ReceiptOutcome {
        debug!(receipt_id = %receipt.receipt_id, reason = %reason, "Receipt rejected");
        metrics::counter!("pipeline.invalid").increment(1);
        self.sink.emit(
            EngineEvent::new(EngineEventType::ReceiptInvalid)
                .receipt(receipt.receipt_id.clone())
                .guest(receipt.guest_id.clone())
                .detail(reason.clone()),
        );
        ReceiptOutcome::Invalid {
            receipt_id: receipt.receipt_id.clone(),
            reason,
        }
    }
}

/// Same-guest resubmissions are processed under the first submission's id.
fn canonicalize(mut receipt: ValidatedReceipt, fraud: &FraudCheck) -> ValidatedReceipt {
    if let Some(original) = &fraud.original_receipt_id {
        if *original != receipt.receipt.receipt_id {
            debug!(
                receipt_id = %receipt.receipt.receipt_id,
                original_receipt_id = %original,
                "Resubmission mapped to original receipt"
            );
            receipt.receipt.receipt_id = original.clone();
        }
    }
    receipt
}
