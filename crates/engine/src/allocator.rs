//! Voucher allocation: claims one unexpired, available voucher from the
//! pool of a reward type.
//!
//! The claim is a conditional update on the voucher's `available` status.
//! When a concurrent claimer wins the same voucher the allocator re-reads the
//! pool and tries the next candidate, up to `max_claim_attempts` times.

use chrono::{DateTime, Utc};
use loyalty_core::config::EngineConfig;
use loyalty_core::event_bus::{EngineEvent, EngineEventType, EventSink};
use loyalty_core::repository::VoucherPoolRepo;
use loyalty_core::voucher::{PoolAvailability, PoolStats, Voucher, VoucherBinding};
use loyalty_core::{LoyaltyError, LoyaltyResult};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub enum AllocationOutcome {
    Assigned {
        voucher: Voucher,
        /// This claim took the last available voucher.
        pool_exhausted: bool,
    },
    /// Pool exists but has nothing claimable.
    PoolDepleted,
    /// No pool configured; a generated, non-unique code is issued instead.
    NoPool { code: String },
}

impl AllocationOutcome {
    /// The pause check should run for this reward type.
    pub fn signals_depletion(&self) -> bool {
        matches!(
            self,
            AllocationOutcome::PoolDepleted
                | AllocationOutcome::Assigned {
                    pool_exhausted: true,
                    ..
                }
        )
    }
}

pub struct VoucherAllocator {
    pools: Arc<dyn VoucherPoolRepo>,
    config: EngineConfig,
    sink: Arc<dyn EventSink>,
}

impl VoucherAllocator {
    pub fn new(pools: Arc<dyn VoucherPoolRepo>, config: &EngineConfig, sink: Arc<dyn EventSink>) -> Self {
        Self {
            pools,
            config: config.clone(),
            sink,
        }
    }

    pub async fn allocate(
        &self,
        reward_type_id: &str,
        binding: VoucherBinding,
    ) -> LoyaltyResult<AllocationOutcome> {
        for attempt in 0..self.config.max_claim_attempts.max(1) {
            let now = Utc::now();
            let Some(pool) = self.pools.get_pool(reward_type_id).await? else {
                return Ok(self.fallback(reward_type_id, &binding));
            };

            let Some(candidate) = pool.first_claimable(now).map(|v| v.code.clone()) else {
                self.pools.recompute_stats(reward_type_id, now).await?;
                info!(reward_type_id = reward_type_id, "Voucher pool depleted");
                metrics::counter!("allocator.pool_depleted").increment(1);
                self.sink.emit(
                    EngineEvent::new(EngineEventType::PoolDepleted)
                        .reward_type(reward_type_id)
                        .guest(binding.guest_id.clone()),
                );
                return Ok(AllocationOutcome::PoolDepleted);
            };

            let claimed = self
                .pools
                .claim_voucher(reward_type_id, &candidate, binding.clone(), now)
                .await?;
            let Some(voucher) = claimed else {
                debug!(
                    reward_type_id = reward_type_id,
                    code = %candidate,
                    attempt = attempt,
                    "Voucher claimed concurrently, retrying"
                );
                metrics::counter!("allocator.claim_conflicts").increment(1);
                continue;
            };

            // The claim stands even if the cached stats cannot be refreshed.
            let available = match self.refresh_stats(reward_type_id, now).await {
                Some(stats) => stats.available,
                None => pool
                    .vouchers
                    .values()
                    .filter(|v| v.code != candidate && v.is_claimable(now))
                    .count() as u64,
            };
            debug!(
                reward_type_id = reward_type_id,
                code = %voucher.code,
                reward_id = %binding.reward_id,
                available = available,
                "Voucher assigned"
            );
            metrics::counter!("allocator.vouchers_assigned").increment(1);
            self.sink.emit(
                EngineEvent::new(EngineEventType::VoucherAllocated)
                    .reward_type(reward_type_id)
                    .guest(binding.guest_id.clone()),
            );
            return Ok(AllocationOutcome::Assigned {
                voucher,
                pool_exhausted: available == 0,
            });
        }

        warn!(
            reward_type_id = reward_type_id,
            attempts = self.config.max_claim_attempts,
            "Gave up claiming voucher under contention"
        );
        Err(LoyaltyError::Conflict(format!(
            "voucher claim for {reward_type_id} lost {} times",
            self.config.max_claim_attempts
        )))
    }

    /// Scans the pool directly rather than trusting cached stats.
    pub async fn pool_availability(&self, reward_type_id: &str) -> LoyaltyResult<PoolAvailability> {
        let now = Utc::now();
        Ok(match self.pools.get_pool(reward_type_id).await? {
            Some(pool) => PoolAvailability {
                has_pool: true,
                available: pool.vouchers.values().filter(|v| v.is_claimable(now)).count() as u64,
                total: pool.vouchers.len() as u64,
            },
            None => PoolAvailability::no_pool(),
        })
    }

    /// Returns a claimed voucher to the pool after an aborted grant.
    pub async fn release(&self, reward_type_id: &str, code: &str, binding: &VoucherBinding) -> LoyaltyResult<bool> {
        let released = self
            .pools
            .release_voucher(reward_type_id, code, binding.reward_id)
            .await?;
        self.refresh_stats(reward_type_id, Utc::now()).await;
        Ok(released)
    }

    /// Stats are derived by scanning, so a failed refresh is reported and
    /// left for the next recompute.
    pub(crate) async fn refresh_stats(&self, reward_type_id: &str, now: DateTime<Utc>) -> Option<PoolStats> {
        match self.pools.recompute_stats(reward_type_id, now).await {
            Ok(stats) => stats,
            Err(e) => {
                warn!(reward_type_id = reward_type_id, error = %e, "Pool stats recompute failed");
                metrics::counter!("allocator.stats_recompute_failures").increment(1);
                self.sink.emit(
                    EngineEvent::new(EngineEventType::StatsRecomputeFailure)
                        .reward_type(reward_type_id)
                        .detail(e.to_string()),
                );
                None
            }
        }
    }

    fn fallback(&self, reward_type_id: &str, binding: &VoucherBinding) -> AllocationOutcome {
        let code = self.random_code();
        info!(
            reward_type_id = reward_type_id,
            code = %code,
            "No voucher pool configured, issuing generated code"
        );
        metrics::counter!("allocator.fallback_codes").increment(1);
        self.sink.emit(
            EngineEvent::new(EngineEventType::FallbackCodeIssued)
                .reward_type(reward_type_id)
                .guest(binding.guest_id.clone()),
        );
        AllocationOutcome::NoPool { code }
    }

    fn random_code(&self) -> String {
        let body: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(self.config.fallback_code_length)
            .map(char::from)
            .collect();
        format!("{}-{}", self.config.fallback_code_prefix, body.to_uppercase())
    }
}
