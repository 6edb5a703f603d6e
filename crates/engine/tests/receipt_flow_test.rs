//! End-to-end receipt flows through the pipeline against the in-memory store.

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{Duration, NaiveDate, Utc};
    use loyalty_core::campaign::{
        Campaign, CampaignStatus, Criteria, RequiredItem, RewardCategory, RewardType,
    };
    use loyalty_core::config::AppConfig;
    use loyalty_core::event_bus::{capture_sink, CaptureSink, EngineEventType};
    use loyalty_core::receipt::{Guest, LineItem, Receipt};
    use loyalty_core::repository::RewardRepo;
    use loyalty_core::reward::RewardStatus;
    use loyalty_core::voucher::{Voucher, VoucherPool, VoucherStatus};
    use loyalty_engine::eligibility::check_receipt_criteria;
    use loyalty_engine::{ReceiptOutcome, ReceiptPipeline, Repositories};
    use loyalty_store::{MemoryStore, StoreOp};
    use std::collections::HashSet;
    use std::sync::Arc;

    fn reward_type(id: &str, criteria: Criteria) -> RewardType {
        RewardType {
            id: id.to_string(),
            name: format!("Reward {id}"),
            category: RewardCategory::FreeItem,
            points_multiplier: None,
            fixed_amount: None,
            percentage: None,
            cap: None,
            description: Some("Calamari starter".to_string()),
            criteria,
            validity_days: None,
        }
    }

    fn campaign(id: &str, reward_types: Vec<RewardType>) -> Campaign {
        Campaign {
            id: id.to_string(),
            name: format!("Campaign {id}"),
            brand_name: "Ocean Basket".to_string(),
            store_name: None,
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            end_date: Utc::now().date_naive() + Duration::days(60),
            status: CampaignStatus::Active,
            reward_types,
            paused_reason: None,
            paused_at: None,
        }
    }

    fn pool(reward_type_id: &str, codes: &[&str]) -> VoucherPool {
        let expiry = Utc::now() + Duration::days(90);
        VoucherPool::new(
            reward_type_id,
            codes.iter().map(|c| Voucher::new(*c, expiry)).collect(),
        )
    }

    fn receipt(receipt_id: &str, guest_id: &str, invoice: &str, total: f64) -> Receipt {
        Receipt {
            receipt_id: receipt_id.to_string(),
            guest_id: guest_id.to_string(),
            brand_name: "Ocean Basket".to_string(),
            store_name: "Menlyn".to_string(),
            invoice_number: invoice.to_string(),
            date: Utc::now().date_naive().format("%Y-%m-%d").to_string(),
            time: Some("19:30".to_string()),
            total_amount: total,
            items: vec![LineItem {
                name: "Hake and chips".to_string(),
                quantity: 1,
            }],
        }
    }

    fn guest(id: &str) -> Guest {
        Guest {
            id: id.to_string(),
            display_name: format!("Guest {id}"),
        }
    }

    fn pipeline(store: &Arc<MemoryStore>) -> (Arc<ReceiptPipeline>, Arc<CaptureSink>) {
        let sink = capture_sink();
        let pipeline = ReceiptPipeline::new(
            &AppConfig::default(),
            Repositories::from_store(store.clone()),
            sink.clone(),
        );
        (Arc::new(pipeline), sink)
    }

    fn min_purchase(amount: f64) -> Criteria {
        Criteria {
            min_purchase_amount: Some(amount),
            ..Criteria::default()
        }
    }

    #[tokio::test]
    async fn test_scenario_a_min_purchase_match() {
        let store = Arc::new(MemoryStore::new());
        store.insert_campaign(campaign("c1", vec![reward_type("rt1", min_purchase(200.0))]));
        store.insert_pool(pool("rt1", &["OB-1"]));
        let (pipeline, _) = pipeline(&store);

        let outcome = pipeline
            .process(&receipt("r1", "g1", "INV-1001", 251.90), &guest("g1"))
            .await
            .unwrap();

        let ReceiptOutcome::Rewarded {
            campaign_id,
            rewards,
            ..
        } = outcome
        else {
            panic!("expected reward, got {outcome:?}");
        };
        assert_eq!(campaign_id, "c1");
        assert_eq!(rewards.len(), 1);
        assert_eq!(rewards[0].status, RewardStatus::Available);
        assert_eq!(rewards[0].voucher_code.as_deref(), Some("OB-1"));
        assert_eq!(rewards[0].receipt_amount, 251.90);
    }

    #[tokio::test]
    async fn test_scenario_a_depleted_pool_reward_pending() {
        let store = Arc::new(MemoryStore::new());
        store.insert_campaign(campaign("c1", vec![reward_type("rt1", min_purchase(200.0))]));
        store.insert_pool(pool("rt1", &[]));
        let (pipeline, _) = pipeline(&store);

        let outcome = pipeline
            .process(&receipt("r1", "g1", "INV-1001", 251.90), &guest("g1"))
            .await
            .unwrap();
        assert_eq!(outcome.rewards().len(), 1);
        assert_eq!(outcome.rewards()[0].status, RewardStatus::Pending);
        assert!(outcome.rewards()[0].pool_depleted);
        // Sole reward type exhausted.
        assert_eq!(store.campaign("c1").unwrap().status, CampaignStatus::Paused);
    }

    #[tokio::test]
    async fn test_scenario_b_cross_guest_reuse_blocked() {
        let store = Arc::new(MemoryStore::new());
        store.insert_campaign(campaign("c1", vec![reward_type("rt1", min_purchase(200.0))]));
        store.insert_pool(pool("rt1", &["OB-1", "OB-2"]));
        let (pipeline, sink) = pipeline(&store);

        pipeline
            .process(&receipt("r1", "g1", "INV-1001", 251.90), &guest("g1"))
            .await
            .unwrap();
        let outcome = pipeline
            .process(&receipt("r2", "g2", "#inv-1001", 251.90), &guest("g2"))
            .await
            .unwrap();

        let ReceiptOutcome::FraudBlocked { fraud, .. } = outcome else {
            panic!("expected fraud block, got {outcome:?}");
        };
        assert!(fraud.is_fraud);
        assert_eq!(fraud.duplicate_count, Some(2));
        assert!(fraud.original_date.is_some());
        assert_eq!(store.rewards().len(), 1);
        assert_eq!(store.suspicious_activity().len(), 1);
        assert_eq!(store.suspicious_activity()[0].attempted_guest_id, "g2");
        assert_eq!(sink.count_type(EngineEventType::FraudBlocked), 1);
    }

    #[tokio::test]
    async fn test_scenario_c_concurrent_allocations() {
        let store = Arc::new(MemoryStore::new());
        store.insert_campaign(campaign("c1", vec![reward_type("rt1", Criteria::default())]));
        store.insert_pool(pool("rt1", &["V1", "V2", "V3"]));
        let (pipeline, _) = pipeline(&store);
        let before = store.pool("rt1").unwrap().stats.available;

        let a = {
            let pipeline = pipeline.clone();
            tokio::spawn(async move {
                pipeline
                    .process(&receipt("r1", "g1", "INV-1", 80.0), &guest("g1"))
                    .await
            })
        };
        let b = {
            let pipeline = pipeline.clone();
            tokio::spawn(async move {
                pipeline
                    .process(&receipt("r2", "g2", "INV-2", 90.0), &guest("g2"))
                    .await
            })
        };

        let mut codes = HashSet::new();
        for handle in [a, b] {
            let outcome = handle.await.unwrap().unwrap();
            codes.insert(outcome.rewards()[0].voucher_code.clone().unwrap());
        }
        assert_eq!(codes.len(), 2);
        let stats = store.pool("rt1").unwrap().stats;
        assert_eq!(before - stats.available, 2);
        assert!(stats.is_consistent());
    }

    #[tokio::test]
    async fn test_scenario_d_pause_only_when_every_pool_is_empty() {
        let store = Arc::new(MemoryStore::new());
        store.insert_campaign(campaign(
            "c1",
            vec![
                reward_type("rt-empty", Criteria::default()),
                reward_type("rt-last", Criteria::default()),
            ],
        ));
        store.insert_pool(pool("rt-empty", &[]));
        store.insert_pool(pool("rt-last", &["LAST-1"]));
        let (pipeline, sink) = pipeline(&store);

        // rt-empty reports depletion, rt-last hands out its last voucher.
        let first = pipeline
            .process(&receipt("r1", "g1", "INV-1", 80.0), &guest("g1"))
            .await
            .unwrap();
        assert_eq!(first.rewards().len(), 2);
        assert_eq!(store.campaign("c1").unwrap().status, CampaignStatus::Paused);
        assert_eq!(sink.count_type(EngineEventType::CampaignPaused), 1);
        assert_eq!(pipeline.unread_notifications().await.unwrap().len(), 1);

        // Paused campaign no longer matches; no second notification.
        let second = pipeline
            .process(&receipt("r2", "g2", "INV-2", 80.0), &guest("g2"))
            .await
            .unwrap();
        assert_eq!(second.label(), "no_match");
        assert_eq!(pipeline.all_notifications().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_scenario_d_partial_depletion_stays_active() {
        let store = Arc::new(MemoryStore::new());
        store.insert_campaign(campaign(
            "c1",
            vec![
                reward_type("rt-empty", Criteria::default()),
                reward_type("rt-stock", Criteria::default()),
            ],
        ));
        store.insert_pool(pool("rt-empty", &[]));
        store.insert_pool(pool("rt-stock", &["S1", "S2"]));
        let (pipeline, _) = pipeline(&store);

        pipeline
            .process(&receipt("r1", "g1", "INV-1", 80.0), &guest("g1"))
            .await
            .unwrap();
        assert_eq!(store.campaign("c1").unwrap().status, CampaignStatus::Active);
        assert!(pipeline.all_notifications().await.unwrap().is_empty());
    }

    #[test]
    fn test_scenario_e_required_quantity_summed_across_lines() {
        let criteria = Criteria {
            required_items: vec![RequiredItem {
                name: "Prawn".to_string(),
                quantity: 2,
            }],
            ..Criteria::default()
        };
        let mut r = receipt("r1", "g1", "INV-1", 180.0);
        r.items = vec![
            LineItem {
                name: "Prawn Curry".to_string(),
                quantity: 1,
            },
            LineItem {
                name: "prawn curry".to_string(),
                quantity: 1,
            },
        ];
        let validated = r.validate(Utc::now().date_naive()).unwrap();
        assert!(check_receipt_criteria(&criteria, &validated).is_empty());
    }

    #[tokio::test]
    async fn test_idempotent_replay_creates_no_second_set() {
        let store = Arc::new(MemoryStore::new());
        store.insert_campaign(campaign("c1", vec![reward_type("rt1", Criteria::default())]));
        store.insert_pool(pool("rt1", &["V1", "V2"]));
        let (pipeline, _) = pipeline(&store);
        let r = receipt("r1", "g1", "INV-1", 120.0);

        let first = pipeline.process(&r, &guest("g1")).await.unwrap();
        let second = pipeline.process(&r, &guest("g1")).await.unwrap();

        assert_eq!(second.label(), "already_processed");
        assert_eq!(first.rewards()[0].id, second.rewards()[0].id);
        assert_eq!(store.rewards().len(), 1);
        assert_eq!(store.pool("rt1").unwrap().stats.assigned, 1);
    }

    #[tokio::test]
    async fn test_voucher_codes_never_shared_under_load() {
        let store = Arc::new(MemoryStore::new());
        store.insert_campaign(campaign("c1", vec![reward_type("rt1", Criteria::default())]));
        let codes: Vec<String> = (0..10).map(|i| format!("V{i:02}")).collect();
        let code_refs: Vec<&str> = codes.iter().map(String::as_str).collect();
        store.insert_pool(pool("rt1", &code_refs));
        let (pipeline, _) = pipeline(&store);

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let pipeline = pipeline.clone();
                tokio::spawn(async move {
                    let g = format!("g{i}");
                    pipeline
                        .process(&receipt(&format!("r{i}"), &g, &format!("INV-{i}"), 60.0), &guest(&g))
                        .await
                        .unwrap()
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let rewards = store.rewards();
        let bound: Vec<String> = rewards.iter().filter_map(|r| r.voucher_code.clone()).collect();
        let unique: HashSet<&String> = bound.iter().collect();
        assert_eq!(bound.len(), 10);
        assert_eq!(unique.len(), bound.len());
        assert_eq!(
            rewards.iter().filter(|r| r.status == RewardStatus::Pending).count(),
            rewards.len() - 10
        );

        let stats = store.pool("rt1").unwrap().stats;
        assert!(stats.is_consistent());
        assert_eq!(stats.available, 0);
        assert_eq!(stats.assigned, 10);
    }

    #[tokio::test]
    async fn test_persistence_failure_leaves_nothing_behind() {
        let store = Arc::new(MemoryStore::new());
        store.insert_campaign(campaign(
            "c1",
            vec![
                reward_type("rt-a", Criteria::default()),
                reward_type("rt-b", Criteria::default()),
                reward_type("rt-c", Criteria::default()),
            ],
        ));
        store.insert_pool(pool("rt-a", &["A1"]));
        store.insert_pool(pool("rt-b", &["B1"]));
        let (pipeline, sink) = pipeline(&store);
        // Third reward's record write fails.
        store.faults().fail_after(StoreOp::PutReward, 2);

        let result = pipeline
            .process(&receipt("r1", "g1", "INV-1", 120.0), &guest("g1"))
            .await;
        assert!(result.unwrap_err().is_persistence());

        assert!(store.rewards().is_empty());
        assert_eq!(store.guest_index_len(), 0);
        assert_eq!(store.campaign_index_len(), 0);
        assert_eq!(store.pool("rt-a").unwrap().stats.available, 1);
        assert_eq!(store.pool("rt-b").unwrap().stats.available, 1);
        assert_eq!(store.campaign("c1").unwrap().status, CampaignStatus::Active);
        assert_eq!(sink.count_type(EngineEventType::LedgerRollback), 1);
    }

    #[tokio::test]
    async fn test_pending_reward_filled_after_replenishment() {
        let store = Arc::new(MemoryStore::new());
        store.insert_campaign(campaign("c1", vec![reward_type("rt1", Criteria::default())]));
        store.insert_pool(pool("rt1", &[]));
        let (pipeline, _) = pipeline(&store);

        let outcome = pipeline
            .process(&receipt("r1", "g1", "INV-1", 120.0), &guest("g1"))
            .await
            .unwrap();
        assert_eq!(outcome.rewards()[0].status, RewardStatus::Pending);

        store.upload_vouchers("rt1", vec![Voucher::new("NEW-1", Utc::now() + Duration::days(10))]);
        let filled = pipeline.redemption().replenish_pending("rt1").await.unwrap();
        assert_eq!(filled.len(), 1);
        assert_eq!(filled[0].voucher_code.as_deref(), Some("NEW-1"));

        let redemption = pipeline.redemption().redeem("NEW-1", "rt1").await.unwrap();
        assert_eq!(redemption.reward.unwrap().status, RewardStatus::Redeemed);
        assert!(store.pool("rt1").unwrap().stats.is_consistent());
    }

    #[tokio::test]
    async fn test_stats_failure_after_claim_keeps_voucher_bound() {
        let store = Arc::new(MemoryStore::new());
        store.insert_campaign(campaign("c1", vec![reward_type("rt1", Criteria::default())]));
        store.insert_pool(pool("rt1", &["V1", "V2"]));
        let (pipeline, sink) = pipeline(&store);
        store.faults().fail_after(StoreOp::RecomputeStats, 0);

        let outcome = pipeline
            .process(&receipt("r1", "g1", "INV-1", 120.0), &guest("g1"))
            .await
            .unwrap();
        assert_eq!(outcome.label(), "rewarded");
        let reward = &outcome.rewards()[0];

        let voucher = store.pool("rt1").unwrap().vouchers["V1"].clone();
        assert_eq!(voucher.status, VoucherStatus::Assigned);
        assert_eq!(voucher.assigned_to.unwrap().reward_id, reward.id);
        assert_eq!(store.rewards().len(), 1);
        assert_eq!(sink.count_type(EngineEventType::StatsRecomputeFailure), 1);
    }

    #[tokio::test]
    async fn test_claimed_voucher_released_when_grant_aborts() {
        let store = Arc::new(MemoryStore::new());
        store.insert_campaign(campaign("c1", vec![reward_type("rt1", Criteria::default())]));
        store.insert_pool(pool("rt1", &["V1"]));
        let (pipeline, _) = pipeline(&store);
        store.faults().fail_after(StoreOp::RecomputeStats, 0);
        store.faults().fail_after(StoreOp::PutReward, 0);

        let result = pipeline
            .process(&receipt("r1", "g1", "INV-1", 120.0), &guest("g1"))
            .await;
        assert!(result.unwrap_err().is_persistence());

        let pool = store.pool("rt1").unwrap();
        assert_eq!(pool.vouchers["V1"].status, VoucherStatus::Available);
        assert!(pool.vouchers["V1"].assigned_to.is_none());
        assert!(pool.stats.is_consistent());
        assert!(store.rewards().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_duplicate_submission_returns_first_rewards() {
        let store = Arc::new(MemoryStore::new());
        store.insert_campaign(campaign("c1", vec![reward_type("rt1", Criteria::default())]));
        store.insert_pool(pool("rt1", &["V1", "V2"]));
        let (pipeline, _) = pipeline(&store);
        store
            .faults()
            .delay(StoreOp::PutReward, std::time::Duration::from_millis(100));
        let r = receipt("r1", "g1", "INV-1", 120.0);
        let g = guest("g1");

        let (a, b) = tokio::join!(pipeline.process(&r, &g), pipeline.process(&r, &g));
        let (a, b) = (a.unwrap(), b.unwrap());

        let labels: HashSet<&str> = [a.label(), b.label()].into_iter().collect();
        assert_eq!(labels, HashSet::from(["rewarded", "already_processed"]));
        assert_eq!(a.rewards().len(), 1);
        assert_eq!(a.rewards()[0].id, b.rewards()[0].id);
        assert_eq!(store.rewards().len(), 1);
        assert_eq!(store.pool("rt1").unwrap().stats.assigned, 1);
    }

    #[tokio::test]
    async fn test_redemption_write_failure_keeps_voucher_and_reward_in_step() {
        let store = Arc::new(MemoryStore::new());
        store.insert_campaign(campaign("c1", vec![reward_type("rt1", Criteria::default())]));
        store.insert_pool(pool("rt1", &["V1"]));
        let (pipeline, _) = pipeline(&store);
        let outcome = pipeline
            .process(&receipt("r1", "g1", "INV-1", 120.0), &guest("g1"))
            .await
            .unwrap();
        let reward_id = outcome.rewards()[0].id;

        store.faults().fail_after(StoreOp::PutReward, 0);
        assert!(pipeline.redemption().redeem("V1", "rt1").await.is_err());
        assert_eq!(store.pool("rt1").unwrap().vouchers["V1"].status, VoucherStatus::Assigned);
        let reward = store.get_reward(reward_id).await.unwrap().unwrap();
        assert_eq!(reward.status, RewardStatus::Available);

        let redemption = pipeline.redemption().redeem("V1", "rt1").await.unwrap();
        assert_eq!(redemption.voucher.status, VoucherStatus::Redeemed);
        assert_eq!(redemption.reward.unwrap().status, RewardStatus::Redeemed);
    }
}
