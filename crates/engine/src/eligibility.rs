//! Reward eligibility: evaluates one reward type's criteria against a
//! receipt and the guest's existing rewards.

use chrono::{NaiveTime, Utc};
use loyalty_core::campaign::{names_match, Campaign, Criteria, RewardType};
use loyalty_core::receipt::ValidatedReceipt;
use loyalty_core::repository::RewardRepo;
use loyalty_core::LoyaltyResult;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Why a single criterion rejected the receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "criterion", rename_all = "snake_case")]
pub enum CriterionFailure {
    BelowMinimumPurchase { required: f64, actual: f64 },
    MaxRewardsReached { limit: u32, held: u32 },
    StoreNotAllowed { store: String, allowed: Vec<String> },
    MissingRequiredItem { item: String, required: u32, found: u32 },
    MissingReceiptTime,
    OutsideTimeWindow { start: NaiveTime, end: NaiveTime, actual: NaiveTime },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardTypeRejection {
    pub reward_type_id: String,
    pub failures: Vec<CriterionFailure>,
}

/// Per-campaign evaluation: eligible reward types in declaration order plus
/// the reasons every other type was rejected.
#[derive(Debug, Clone, Default)]
pub struct EligibilityReport {
    pub eligible: Vec<RewardType>,
    pub rejected: Vec<RewardTypeRejection>,
}

impl EligibilityReport {
    pub fn any_eligible(&self) -> bool {
        !self.eligible.is_empty()
    }
}

pub struct EligibilityEvaluator {
    rewards: Arc<dyn RewardRepo>,
}

impl EligibilityEvaluator {
    pub fn new(rewards: Arc<dyn RewardRepo>) -> Self {
        Self { rewards }
    }

    pub async fn evaluate(
        &self,
        reward_type: &RewardType,
        receipt: &ValidatedReceipt,
        guest_id: &str,
    ) -> LoyaltyResult<bool> {
        Ok(self.failures(reward_type, receipt, guest_id).await?.is_empty())
    }

    /// Every failing criterion for one reward type; empty means eligible.
    pub async fn failures(
        &self,
        reward_type: &RewardType,
        receipt: &ValidatedReceipt,
        guest_id: &str,
    ) -> LoyaltyResult<Vec<CriterionFailure>> {
        let mut failures = check_receipt_criteria(&reward_type.criteria, receipt);

        if let Some(limit) = reward_type.criteria.max_rewards {
            let held = self.held_rewards(guest_id, &reward_type.id).await?;
            if held >= limit {
                failures.push(CriterionFailure::MaxRewardsReached { limit, held });
            }
        }

        debug!(
            reward_type_id = %reward_type.id,
            receipt_id = %receipt.receipt.receipt_id,
            failures = failures.len(),
            "Reward type evaluated"
        );
        Ok(failures)
    }

    /// Evaluates every reward type of the campaign independently.
    pub async fn evaluate_campaign(
        &self,
        campaign: &Campaign,
        receipt: &ValidatedReceipt,
        guest_id: &str,
    ) -> LoyaltyResult<EligibilityReport> {
        let mut report = EligibilityReport::default();
        for reward_type in &campaign.reward_types {
            let failures = self.failures(reward_type, receipt, guest_id).await?;
            if failures.is_empty() {
                report.eligible.push(reward_type.clone());
            } else {
                report.rejected.push(RewardTypeRejection {
                    reward_type_id: reward_type.id.clone(),
                    failures,
                });
            }
        }
        Ok(report)
    }

    /// Unexpired rewards of this type the guest already holds.
    async fn held_rewards(&self, guest_id: &str, reward_type_id: &str) -> LoyaltyResult<u32> {
        let now = Utc::now();
        let held = self
            .rewards
            .guest_index(guest_id)
            .await?
            .iter()
            .filter(|e| e.reward_type_id == reward_type_id && e.expires_at > now)
            .count();
        Ok(held as u32)
    }
}

/// Criteria that depend on the receipt alone.
pub fn check_receipt_criteria(criteria: &Criteria, receipt: &ValidatedReceipt) -> Vec<CriterionFailure> {
    let r = &receipt.receipt;
    let mut failures = Vec::new();

    if let Some(min) = criteria.min_purchase_amount {
        if r.total_amount < min {
            failures.push(CriterionFailure::BelowMinimumPurchase {
                required: min,
                actual: r.total_amount,
            });
        }
    }

    if let Some(allowed) = criteria.store_restrictions.as_ref().filter(|s| !s.is_empty()) {
        if !allowed.iter().any(|s| names_match(s, &r.store_name)) {
            failures.push(CriterionFailure::StoreNotAllowed {
                store: r.store_name.clone(),
                allowed: allowed.clone(),
            });
        }
    }

    for required in &criteria.required_items {
        // Quantities add up across every matching line.
        let found: u32 = r
            .items
            .iter()
            .filter(|line| required.matches_line(&line.name))
            .map(|line| line.quantity)
            .sum();
        if found < required.quantity {
            failures.push(CriterionFailure::MissingRequiredItem {
                item: required.name.clone(),
                required: required.quantity,
                found,
            });
        }
    }

    if let Some(window) = criteria.time_window {
        match receipt.time {
            None => failures.push(CriterionFailure::MissingReceiptTime),
            Some(actual) if !window.contains(actual) => {
                failures.push(CriterionFailure::OutsideTimeWindow {
                    start: window.start_time,
                    end: window.end_time,
                    actual,
                })
            }
            Some(_) => {}
        }
    }

    failures
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};
    use loyalty_core::campaign::{RequiredItem, RewardCategory, TimeWindow};
    use loyalty_core::receipt::{LineItem, Receipt};
    use loyalty_core::reward::GuestRewardIndex;
    use loyalty_store::MemoryStore;
    use uuid::Uuid;

    fn receipt(total: f64, items: Vec<(&str, u32)>, time: Option<NaiveTime>) -> ValidatedReceipt {
        ValidatedReceipt {
            receipt: Receipt {
                receipt_id: "r1".into(),
                guest_id: "g1".into(),
                brand_name: "Ocean Basket".into(),
                store_name: "Menlyn".into(),
                invoice_number: "INV-1".into(),
                date: "2024-03-14".into(),
                time: None,
                total_amount: total,
                items: items
                    .into_iter()
                    .map(|(name, quantity)| LineItem {
                        name: name.into(),
                        quantity,
                    })
                    .collect(),
            },
            date: NaiveDate::from_ymd_opt(2024, 3, 14).unwrap(),
            time,
        }
    }

    fn reward_type(criteria: Criteria) -> RewardType {
        RewardType {
            id: "rt1".into(),
            name: "Free dessert".into(),
            category: RewardCategory::FreeItem,
            points_multiplier: None,
            fixed_amount: None,
            percentage: None,
            cap: None,
            description: None,
            criteria,
            validity_days: None,
        }
    }

    #[test]
    fn test_empty_criteria_unconstrained() {
        let failures = check_receipt_criteria(&Criteria::default(), &receipt(1.0, vec![("Tea", 1)], None));
        assert!(failures.is_empty());
    }

    #[test]
    fn test_min_purchase() {
        let criteria = Criteria {
            min_purchase_amount: Some(200.0),
            ..Criteria::default()
        };
        assert!(check_receipt_criteria(&criteria, &receipt(251.90, vec![("Hake", 1)], None)).is_empty());
        assert!(check_receipt_criteria(&criteria, &receipt(200.0, vec![("Hake", 1)], None)).is_empty());
        let failures = check_receipt_criteria(&criteria, &receipt(199.99, vec![("Hake", 1)], None));
        assert!(matches!(failures[0], CriterionFailure::BelowMinimumPurchase { .. }));
    }

    #[test]
    fn test_required_items_sum_across_lines() {
        let criteria = Criteria {
            required_items: vec![RequiredItem {
                name: "Prawn".into(),
                quantity: 2,
            }],
            ..Criteria::default()
        };
        let two_lines = receipt(100.0, vec![("Prawn Curry", 1), ("prawn curry", 1)], None);
        assert!(check_receipt_criteria(&criteria, &two_lines).is_empty());

        let one_line = receipt(100.0, vec![("Prawn Curry", 1), ("Hake", 3)], None);
        let failures = check_receipt_criteria(&criteria, &one_line);
        assert_eq!(
            failures,
            vec![CriterionFailure::MissingRequiredItem {
                item: "Prawn".into(),
                required: 2,
                found: 1
            }]
        );
    }

    #[test]
    fn test_store_restrictions_case_insensitive() {
        let criteria = Criteria {
            store_restrictions: Some(vec!["MENLYN".into(), "Sandton".into()]),
            ..Criteria::default()
        };
        assert!(check_receipt_criteria(&criteria, &receipt(10.0, vec![("Tea", 1)], None)).is_empty());

        let criteria = Criteria {
            store_restrictions: Some(vec!["Sandton".into()]),
            ..Criteria::default()
        };
        let failures = check_receipt_criteria(&criteria, &receipt(10.0, vec![("Tea", 1)], None));
        assert!(matches!(failures[0], CriterionFailure::StoreNotAllowed { .. }));
    }

    #[test]
    fn test_time_window() {
        let criteria = Criteria {
            time_window: Some(TimeWindow {
                start_time: NaiveTime::from_hms_opt(11, 0, 0).unwrap(),
                end_time: NaiveTime::from_hms_opt(15, 0, 0).unwrap(),
            }),
            ..Criteria::default()
        };
        let lunch = receipt(10.0, vec![("Tea", 1)], NaiveTime::from_hms_opt(15, 0, 0));
        assert!(check_receipt_criteria(&criteria, &lunch).is_empty());

        let dinner = receipt(10.0, vec![("Tea", 1)], NaiveTime::from_hms_opt(19, 30, 0));
        assert!(matches!(
            check_receipt_criteria(&criteria, &dinner)[0],
            CriterionFailure::OutsideTimeWindow { .. }
        ));

        let untimed = receipt(10.0, vec![("Tea", 1)], None);
        assert_eq!(
            check_receipt_criteria(&criteria, &untimed),
            vec![CriterionFailure::MissingReceiptTime]
        );
    }

    #[test]
    fn test_all_failures_reported() {
        let criteria = Criteria {
            min_purchase_amount: Some(500.0),
            store_restrictions: Some(vec!["Sandton".into()]),
            required_items: vec![RequiredItem {
                name: "Sushi".into(),
                quantity: 1,
            }],
            ..Criteria::default()
        };
        let failures = check_receipt_criteria(&criteria, &receipt(10.0, vec![("Tea", 1)], None));
        assert_eq!(failures.len(), 3);
    }

    #[tokio::test]
    async fn test_max_rewards_counts_unexpired_only() {
        let store = Arc::new(MemoryStore::new());
        let evaluator = EligibilityEvaluator::new(store.clone());
        let rt = reward_type(Criteria {
            max_rewards: Some(1),
            ..Criteria::default()
        });
        let validated = receipt(10.0, vec![("Tea", 1)], None);

        assert!(evaluator.evaluate(&rt, &validated, "g1").await.unwrap());

        store
            .put_guest_index(&GuestRewardIndex {
                guest_id: "g1".into(),
                reward_id: Uuid::new_v4(),
                reward_type_id: "rt1".into(),
                receipt_id: "old".into(),
                expires_at: Utc::now() - Duration::days(1),
            })
            .await
            .unwrap();
        assert!(evaluator.evaluate(&rt, &validated, "g1").await.unwrap());

        store
            .put_guest_index(&GuestRewardIndex {
                guest_id: "g1".into(),
                reward_id: Uuid::new_v4(),
                reward_type_id: "rt1".into(),
                receipt_id: "recent".into(),
                expires_at: Utc::now() + Duration::days(10),
            })
            .await
            .unwrap();
        let failures = evaluator.failures(&rt, &validated, "g1").await.unwrap();
        assert_eq!(
            failures,
            vec![CriterionFailure::MaxRewardsReached { limit: 1, held: 1 }]
        );
        // Other guests are unaffected
        assert!(evaluator.evaluate(&rt, &validated, "g2").await.unwrap());
    }
}
