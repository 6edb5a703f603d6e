//! Bundle of repository handles shared by the engine components.

use loyalty_core::repository::*;
use std::sync::Arc;

#[derive(Clone)]
pub struct Repositories {
    pub campaigns: Arc<dyn CampaignRepo>,
    pub pools: Arc<dyn VoucherPoolRepo>,
    pub rewards: Arc<dyn RewardRepo>,
    pub receipts: Arc<dyn ReceiptRepo>,
    pub fraud: Arc<dyn FraudRepo>,
    pub notifications: Arc<dyn NotificationRepo>,
}

impl Repositories {
    /// Uses one store for every entity family.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: CampaignRepo
            + VoucherPoolRepo
            + RewardRepo
            + ReceiptRepo
            + FraudRepo
            + NotificationRepo
            + 'static,
    {
        Self {
            campaigns: store.clone(),
            pools: store.clone(),
            rewards: store.clone(),
            receipts: store.clone(),
            fraud: store.clone(),
            notifications: store,
        }
    }
}
