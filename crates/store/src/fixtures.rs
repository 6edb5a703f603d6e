//! JSON fixture loading: seeds a [`MemoryStore`] with the campaigns and
//! voucher pools the admin surface would normally provide.

use loyalty_core::campaign::Campaign;
use loyalty_core::voucher::Voucher;
use loyalty_core::LoyaltyResult;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::memory::MemoryStore;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreFixtures {
    #[serde(default)]
    pub campaigns: Vec<Campaign>,
    #[serde(default)]
    pub pools: Vec<PoolFixture>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolFixture {
    pub reward_type_id: String,
    pub vouchers: Vec<Voucher>,
}

impl StoreFixtures {
    pub fn from_json(raw: &str) -> LoyaltyResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn into_store(self) -> MemoryStore {
        let store = MemoryStore::new();
        let campaigns = self.campaigns.len();
        let pools = self.pools.len();
        for campaign in self.campaigns {
            store.insert_campaign(campaign);
        }
        for pool in self.pools {
            store.upload_vouchers(&pool.reward_type_id, pool.vouchers);
        }
        info!(campaigns = campaigns, pools = pools, "Store seeded from fixtures");
        store
    }
}
