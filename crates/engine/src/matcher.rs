//! Campaign matching: finds the first active campaign of the receipt's
//! brand under which at least one reward type is eligible.
//!
//! Selection is first-match in repository order, not best-match. When two
//! campaigns could both reward a receipt, the earlier one wins even if the
//! later one is more generous.

use chrono::Utc;
use loyalty_core::campaign::Campaign;
use loyalty_core::event_bus::{EngineEvent, EngineEventType, EventSink};
use loyalty_core::receipt::{Receipt, ValidatedReceipt};
use loyalty_core::repository::CampaignRepo;
use loyalty_core::LoyaltyResult;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::eligibility::{EligibilityEvaluator, RewardTypeRejection};

/// Why one brand-matching campaign did not match.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum CampaignMismatch {
    StoreMismatch {
        campaign_id: String,
        required_store: String,
        receipt_store: String,
    },
    OutsideDateWindow {
        campaign_id: String,
    },
    NoEligibleRewards {
        campaign_id: String,
        reward_types: Vec<RewardTypeRejection>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NoMatchError {
    NoActiveCampaignsForBrand { brand: String },
    NoEligibleCampaign { brand: String },
}

#[derive(Debug, Clone)]
pub enum MatchOutcome {
    Matched {
        campaign: Campaign,
        /// Ids of the reward types that passed evaluation.
        matched_criteria: Vec<String>,
    },
    NoMatch {
        error: NoMatchError,
        failed_criteria: Vec<CampaignMismatch>,
    },
}

impl MatchOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, MatchOutcome::Matched { .. })
    }
}

pub struct CampaignMatcher {
    campaigns: Arc<dyn CampaignRepo>,
    evaluator: Arc<EligibilityEvaluator>,
    sink: Arc<dyn EventSink>,
}

impl CampaignMatcher {
    pub fn new(
        campaigns: Arc<dyn CampaignRepo>,
        evaluator: Arc<EligibilityEvaluator>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            campaigns,
            evaluator,
            sink,
        }
    }

    /// Validates then matches. Malformed receipts return
    /// `LoyaltyError::Validation`, never a `NoMatch`.
    pub async fn match_receipt(&self, receipt: &Receipt) -> LoyaltyResult<MatchOutcome> {
        let validated = receipt.validate(Utc::now().date_naive())?;
        self.match_validated(&validated).await
    }

    pub async fn match_validated(&self, receipt: &ValidatedReceipt) -> LoyaltyResult<MatchOutcome> {
        let r = &receipt.receipt;
        let active = self.campaigns.active_campaigns().await?;
        let brand_campaigns: Vec<Campaign> = active
            .into_iter()
            .filter(|c| c.matches_brand(&r.brand_name))
            .collect();

        if !brand_campaigns.iter().any(|c| c.covers_date(receipt.date)) {
            debug!(brand = %r.brand_name, date = %receipt.date, "No active campaigns for brand");
            self.record_unmatched(r, "no active campaigns for brand");
            return Ok(MatchOutcome::NoMatch {
                error: NoMatchError::NoActiveCampaignsForBrand {
                    brand: r.brand_name.clone(),
                },
                failed_criteria: brand_campaigns
                    .iter()
                    .map(|c| CampaignMismatch::OutsideDateWindow {
                        campaign_id: c.id.clone(),
                    })
                    .collect(),
            });
        }

        let mut failed_criteria = Vec::new();
        for campaign in brand_campaigns {
            if !campaign.covers_date(receipt.date) {
                failed_criteria.push(CampaignMismatch::OutsideDateWindow {
                    campaign_id: campaign.id.clone(),
                });
                continue;
            }

            if !campaign.allows_store(&r.store_name) {
                failed_criteria.push(CampaignMismatch::StoreMismatch {
                    campaign_id: campaign.id.clone(),
                    required_store: campaign.store_name.clone().unwrap_or_default(),
                    receipt_store: r.store_name.clone(),
                });
                continue;
            }

            let report = self
                .evaluator
                .evaluate_campaign(&campaign, receipt, &r.guest_id)
                .await?;
            if report.any_eligible() {
                let matched_criteria: Vec<String> =
                    report.eligible.iter().map(|rt| rt.id.clone()).collect();
                info!(
                    receipt_id = %r.receipt_id,
                    campaign_id = %campaign.id,
                    eligible = matched_criteria.len(),
                    "Receipt matched campaign"
                );
                metrics::counter!("matcher.matched").increment(1);
                self.sink.emit(
                    EngineEvent::new(EngineEventType::ReceiptMatched)
                        .receipt(r.receipt_id.clone())
                        .guest(r.guest_id.clone())
                        .campaign(campaign.id.clone()),
                );
                return Ok(MatchOutcome::Matched {
                    campaign,
                    matched_criteria,
                });
            }

            failed_criteria.push(CampaignMismatch::NoEligibleRewards {
                campaign_id: campaign.id.clone(),
                reward_types: report.rejected,
            });
        }

        self.record_unmatched(r, "no eligible campaign");
        Ok(MatchOutcome::NoMatch {
            error: NoMatchError::NoEligibleCampaign {
                brand: r.brand_name.clone(),
            },
            failed_criteria,
        })
    }

    fn record_unmatched(&self, r: &Receipt, detail: &str) {
        metrics::counter!("matcher.unmatched").increment(1);
        self.sink.emit(
            EngineEvent::new(EngineEventType::ReceiptUnmatched)
                .receipt(r.receipt_id.clone())
                .guest(r.guest_id.clone())
                .detail(detail),
        );
    }
}
