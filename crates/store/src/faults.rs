//! Deterministic fault and latency injection for store operations.
//!
//! Lets tests force a specific repository call to fail (after N successful
//! calls) or to stall, without a real backing store.

use dashmap::DashMap;
use loyalty_core::{LoyaltyError, LoyaltyResult};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    ActiveCampaigns,
    TransitionCampaign,
    GetPool,
    ClaimVoucher,
    ReleaseVoucher,
    RedeemVoucher,
    RecomputeStats,
    PutReward,
    DeleteReward,
    PutGuestIndex,
    PutCampaignIndex,
    ReadIndex,
    MarkValidated,
    RegisterSighting,
    PutSuspicious,
    PutNotification,
}

#[derive(Debug, Clone, Copy)]
struct FaultPlan {
    /// Calls to let through before failing.
    skip: u32,
    /// Failures still to inject; `None` fails forever.
    failures: Option<u32>,
}

#[derive(Default)]
pub struct FaultInjector {
    plans: DashMap<StoreOp, FaultPlan>,
    delays: DashMap<StoreOp, Duration>,
}

impl FaultInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the call that follows `skip` successful calls of `op`, once.
    pub fn fail_after(&self, op: StoreOp, skip: u32) {
        self.plans.insert(
            op,
            FaultPlan {
                skip,
                failures: Some(1),
            },
        );
    }

    /// Fail every call of `op` until cleared.
    pub fn fail_always(&self, op: StoreOp) {
        self.plans.insert(
            op,
            FaultPlan {
                skip: 0,
                failures: None,
            },
        );
    }

    pub fn delay(&self, op: StoreOp, delay: Duration) {
        self.delays.insert(op, delay);
    }

    pub fn clear(&self) {
        self.plans.clear();
        self.delays.clear();
    }

    /// Applies any configured delay, then any configured failure.
    pub async fn check(&self, op: StoreOp) -> LoyaltyResult<()> {
        let delay = self.delays.get(&op).map(|d| *d.value());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut exhausted = false;
        let fail = match self.plans.get_mut(&op) {
            Some(mut plan) => {
                if plan.skip > 0 {
                    plan.skip -= 1;
                    false
                } else {
                    if let Some(left) = plan.failures.as_mut() {
                        *left -= 1;
                        exhausted = *left == 0;
                    }
                    true
                }
            }
            None => false,
        };
        if exhausted {
            self.plans.remove(&op);
        }

        if fail {
            Err(LoyaltyError::Persistence(format!("injected failure on {op:?}")))
        } else {
            Ok(())
        }
    }
}
