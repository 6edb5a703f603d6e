//! Campaign pause controller.
//!
//! Runs when the allocator reports depletion. The owning campaign is paused
//! only when none of its reward types can issue anything; a reward type
//! without a pool issues fallback codes and so always counts as available.

use chrono::Utc;
use loyalty_core::campaign::CampaignStatus;
use loyalty_core::config::NotificationConfig;
use loyalty_core::event_bus::{EngineEvent, EngineEventType, EventSink};
use loyalty_core::notification::{NotificationKind, OperatorNotification};
use loyalty_core::repository::{CampaignRepo, NotificationRepo};
use loyalty_core::LoyaltyResult;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::allocator::VoucherAllocator;

pub const PAUSE_REASON: &str = "All voucher pools depleted";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum PauseDecision {
    UnknownRewardType,
    NotActive,
    /// At least one reward type can still issue.
    StillAvailable { reward_type_id: String },
    /// Another caller paused the campaign first.
    AlreadyPaused,
    /// `notification_id` is `None` when the notification write failed.
    Paused { notification_id: Option<Uuid> },
}

pub struct PauseController {
    campaigns: Arc<dyn CampaignRepo>,
    notifications: Arc<dyn NotificationRepo>,
    allocator: Arc<VoucherAllocator>,
    notification_timeout: Duration,
    sink: Arc<dyn EventSink>,
}

impl PauseController {
    pub fn new(
        campaigns: Arc<dyn CampaignRepo>,
        notifications: Arc<dyn NotificationRepo>,
        allocator: Arc<VoucherAllocator>,
        config: &NotificationConfig,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            campaigns,
            notifications,
            allocator,
            notification_timeout: Duration::from_millis(config.timeout_ms),
            sink,
        }
    }

    pub async fn on_depletion(&self, reward_type_id: &str) -> LoyaltyResult<PauseDecision> {
        let Some(campaign) = self.campaigns.campaign_for_reward_type(reward_type_id).await? else {
            warn!(reward_type_id = reward_type_id, "Depleted reward type has no owning campaign");
            return Ok(PauseDecision::UnknownRewardType);
        };

        match campaign.status {
            CampaignStatus::Active => {}
            CampaignStatus::Paused => return Ok(PauseDecision::AlreadyPaused),
            CampaignStatus::Inactive => return Ok(PauseDecision::NotActive),
        }

        for rt in &campaign.reward_types {
            let availability = self.allocator.pool_availability(&rt.id).await?;
            if availability.can_issue() {
                debug!(
                    campaign_id = %campaign.id,
                    reward_type_id = %rt.id,
                    has_pool = availability.has_pool,
                    available = availability.available,
                    "Campaign keeps an issuable reward type"
                );
                return Ok(PauseDecision::StillAvailable {
                    reward_type_id: rt.id.clone(),
                });
            }
        }

        let now = Utc::now();
        let transitioned = self
            .campaigns
            .transition_status(
                &campaign.id,
                CampaignStatus::Active,
                CampaignStatus::Paused,
                Some(PAUSE_REASON.to_string()),
                now,
            )
            .await?;
        if !transitioned {
            return Ok(PauseDecision::AlreadyPaused);
        }

        info!(campaign_id = %campaign.id, reason = PAUSE_REASON, "Campaign paused");
        metrics::counter!("pause.campaigns_paused").increment(1);
        self.sink.emit(
            EngineEvent::new(EngineEventType::CampaignPaused)
                .campaign(campaign.id.clone())
                .reward_type(reward_type_id)
                .detail(PAUSE_REASON),
        );

        let notification = OperatorNotification::new(
            NotificationKind::CampaignPaused,
            format!("Campaign paused: {}", campaign.name),
            format!(
                "Campaign '{}' ({}) was paused because every reward type has run out of vouchers. \
                 Upload more vouchers and reactivate it to resume rewards.",
                campaign.name, campaign.brand_name
            ),
            Some(campaign.id.clone()),
        );
        let notification_id = self.notify(&notification).await.then_some(notification.id);

        Ok(PauseDecision::Paused { notification_id })
    }

    /// Best effort: failures and timeouts are surfaced, never propagated.
    async fn notify(&self, notification: &OperatorNotification) -> bool {
        let write = self.notifications.put_notification(notification);
        let failure = match tokio::time::timeout(self.notification_timeout, write).await {
            Ok(Ok(())) => return true,
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("timed out after {:?}", self.notification_timeout),
        };

        warn!(
            campaign_id = ?notification.campaign_id,
            error = %failure,
            "Operator notification not delivered"
        );
        metrics::counter!("pause.notification_failures").increment(1);
        let mut event = EngineEvent::new(EngineEventType::NotificationFailure).detail(failure);
        if let Some(campaign_id) = &notification.campaign_id {
            event = event.campaign(campaign_id.clone());
        }
        self.sink.emit(event);
        false
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, NaiveDate};
    use loyalty_core::campaign::{Campaign, Criteria, RewardCategory, RewardType};
    use loyalty_core::config::EngineConfig;
    use loyalty_core::event_bus::{capture_sink, CaptureSink};
    use loyalty_core::voucher::{Voucher, VoucherPool};
    use loyalty_store::{MemoryStore, StoreOp};

    fn reward_type(id: &str) -> RewardType {
        RewardType {
            id: id.into(),
            name: format!("Reward {id}"),
            category: RewardCategory::FreeItem,
            points_multiplier: None,
            fixed_amount: None,
            percentage: None,
            cap: None,
            description: None,
            criteria: Criteria::default(),
            validity_days: None,
        }
    }

    fn setup(
        pools: &[(&str, usize)],
        extra_types: &[&str],
    ) -> (Arc<MemoryStore>, PauseController, Arc<CaptureSink>) {
        let store = Arc::new(MemoryStore::new());
        let mut types: Vec<RewardType> = pools.iter().map(|(id, _)| reward_type(id)).collect();
        types.extend(extra_types.iter().map(|id| reward_type(id)));
        store.insert_campaign(Campaign {
            id: "c1".into(),
            name: "Summer Seafood".into(),
            brand_name: "Ocean Basket".into(),
            store_name: None,
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2030, 12, 31).unwrap(),
            status: CampaignStatus::Active,
            reward_types: types,
            paused_reason: None,
            paused_at: None,
        });
        let expiry = Utc::now() + ChronoDuration::days(30);
        for (id, count) in pools {
            let vouchers = (0..*count).map(|i| Voucher::new(format!("{id}-{i}"), expiry)).collect();
            store.insert_pool(VoucherPool::new(*id, vouchers));
        }

        let sink = capture_sink();
        let allocator = Arc::new(VoucherAllocator::new(store.clone(), &EngineConfig::default(), sink.clone()));
        let controller = PauseController::new(
            store.clone(),
            store.clone(),
            allocator,
            &NotificationConfig { timeout_ms: 50 },
            sink.clone(),
        );
        (store, controller, sink)
    }

    #[tokio::test]
    async fn test_partial_depletion_keeps_campaign_active() {
        let (store, controller, _) = setup(&[("rt-a", 0), ("rt-b", 1)], &[]);
        let decision = controller.on_depletion("rt-a").await.unwrap();
        assert_eq!(
            decision,
            PauseDecision::StillAvailable {
                reward_type_id: "rt-b".into()
            }
        );
        assert_eq!(store.campaign("c1").unwrap().status, CampaignStatus::Active);
    }

    #[tokio::test]
    async fn test_reward_type_without_pool_keeps_campaign_active() {
        let (store, controller, _) = setup(&[("rt-a", 0)], &["rt-fallback"]);
        let decision = controller.on_depletion("rt-a").await.unwrap();
        assert!(matches!(decision, PauseDecision::StillAvailable { .. }));
        assert_eq!(store.campaign("c1").unwrap().status, CampaignStatus::Active);
    }

    #[tokio::test]
    async fn test_full_depletion_pauses_once_with_one_notification() {
        let (store, controller, sink) = setup(&[("rt-a", 0), ("rt-b", 0)], &[]);

        let first = controller.on_depletion("rt-a").await.unwrap();
        let second = controller.on_depletion("rt-b").await.unwrap();
        assert!(matches!(first, PauseDecision::Paused { notification_id: Some(_) }));
        assert_eq!(second, PauseDecision::AlreadyPaused);

        let campaign = store.campaign("c1").unwrap();
        assert_eq!(campaign.status, CampaignStatus::Paused);
        assert_eq!(campaign.paused_reason.as_deref(), Some(PAUSE_REASON));
        assert!(campaign.paused_at.is_some());
        assert_eq!(store.list_notifications(true).await.unwrap().len(), 1);
        assert_eq!(sink.count_type(EngineEventType::CampaignPaused), 1);
    }

    #[tokio::test]
    async fn test_concurrent_depletion_pauses_exactly_once() {
        let (store, controller, _) = setup(&[("rt-a", 0), ("rt-b", 0)], &[]);
        let controller = Arc::new(controller);

        let handles: Vec<_> = ["rt-a", "rt-b", "rt-a", "rt-b"]
            .into_iter()
            .map(|rt| {
                let controller = controller.clone();
                tokio::spawn(async move { controller.on_depletion(rt).await.unwrap() })
            })
            .collect();

        let mut paused = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), PauseDecision::Paused { .. }) {
                paused += 1;
            }
        }
        assert_eq!(paused, 1);
        assert_eq!(store.list_notifications(false).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_notification_failure_does_not_undo_pause() {
        let (store, controller, sink) = setup(&[("rt-a", 0)], &[]);
        store.faults().fail_always(StoreOp::PutNotification);

        let decision = controller.on_depletion("rt-a").await.unwrap();
        assert_eq!(decision, PauseDecision::Paused { notification_id: None });
        assert_eq!(store.campaign("c1").unwrap().status, CampaignStatus::Paused);
        assert_eq!(sink.count_type(EngineEventType::NotificationFailure), 1);
    }

    #[tokio::test]
    async fn test_notification_timeout_is_surfaced() {
        let (store, controller, sink) = setup(&[("rt-a", 0)], &[]);
        store
            .faults()
            .delay(StoreOp::PutNotification, Duration::from_millis(500));

        let decision = controller.on_depletion("rt-a").await.unwrap();
        assert_eq!(decision, PauseDecision::Paused { notification_id: None });
        assert_eq!(sink.count_type(EngineEventType::NotificationFailure), 1);
    }

    #[tokio::test]
    async fn test_inactive_and_unknown() {
        let (store, controller, _) = setup(&[("rt-a", 0)], &[]);
        assert_eq!(
            controller.on_depletion("rt-missing").await.unwrap(),
            PauseDecision::UnknownRewardType
        );

        let mut campaign = store.campaign("c1").unwrap();
        campaign.status = CampaignStatus::Inactive;
        store.insert_campaign(campaign);
        assert_eq!(controller.on_depletion("rt-a").await.unwrap(), PauseDecision::NotActive);
    }
}
