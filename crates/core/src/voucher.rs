//! Voucher pools — finite inventories of redemption codes, one per reward type.
//!
//! Voucher lifecycle is forward-only:
//! `available → assigned → redeemed` or `available → expired`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum VoucherStatus {
    Available,
    Assigned,
    Redeemed,
    Expired,
}

impl Default for VoucherStatus {
    fn default() -> Self {
        VoucherStatus::Available
    }
}

impl VoucherStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, VoucherStatus::Redeemed | VoucherStatus::Expired)
    }

    /// Whether `next` is a legal forward transition from this state.
    pub fn can_transition_to(&self, next: VoucherStatus) -> bool {
        matches!(
            (self, next),
            (VoucherStatus::Available, VoucherStatus::Assigned)
                | (VoucherStatus::Available, VoucherStatus::Expired)
                | (VoucherStatus::Assigned, VoucherStatus::Redeemed)
        )
    }
}

/// Who a claimed voucher is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoucherBinding {
    pub reward_id: Uuid,
    pub guest_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Voucher {
    pub code: String,
    #[serde(default)]
    pub status: VoucherStatus,
    pub expiry_date: DateTime<Utc>,
    #[serde(default)]
    pub assigned_to: Option<VoucherBinding>,
    #[serde(default)]
    pub assigned_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub redeemed_at: Option<DateTime<Utc>>,
}

impl Voucher {
    pub fn new(code: impl Into<String>, expiry_date: DateTime<Utc>) -> Self {
        Self {
            code: code.into(),
            status: VoucherStatus::Available,
            expiry_date,
            assigned_to: None,
            assigned_at: None,
            redeemed_at: None,
        }
    }

    /// Available and not yet past its expiry at `now`.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.status == VoucherStatus::Available && self.expiry_date > now
    }
}

/// Aggregate counts for a pool. Always derived by scanning vouchers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub total: u64,
    pub available: u64,
    pub assigned: u64,
    pub redeemed: u64,
    pub expired: u64,
}

impl PoolStats {
    pub fn is_consistent(&self) -> bool {
        self.total == self.available + self.assigned + self.redeemed + self.expired
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoucherPool {
    pub reward_type_id: String,
    /// Ordered by code so that scans are deterministic.
    pub vouchers: BTreeMap<String, Voucher>,
    #[serde(default)]
    pub stats: PoolStats,
    #[serde(default)]
    pub stats_updated_at: Option<DateTime<Utc>>,
}

impl VoucherPool {
    pub fn new(reward_type_id: impl Into<String>, vouchers: Vec<Voucher>) -> Self {
        let mut pool = Self {
            reward_type_id: reward_type_id.into(),
            vouchers: vouchers.into_iter().map(|v| (v.code.clone(), v)).collect(),
            stats: PoolStats::default(),
            stats_updated_at: None,
        };
        pool.recompute_stats(Utc::now());
        pool
    }

    /// First claimable voucher in code order.
    pub fn first_claimable(&self, now: DateTime<Utc>) -> Option<&Voucher> {
        self.vouchers.values().find(|v| v.is_claimable(now))
    }

    /// Rebuild `stats` from voucher statuses. An `available` voucher past
    /// its expiry counts as expired even before a sweep persists that.
    pub fn recompute_stats(&mut self, now: DateTime<Utc>) -> PoolStats {
        let mut stats = PoolStats::default();
        for voucher in self.vouchers.values() {
            stats.total += 1;
            match voucher.status {
                VoucherStatus::Available if voucher.expiry_date > now => stats.available += 1,
                VoucherStatus::Available | VoucherStatus::Expired => stats.expired += 1,
                VoucherStatus::Assigned => stats.assigned += 1,
                VoucherStatus::Redeemed => stats.redeemed += 1,
            }
        }
        self.stats = stats;
        self.stats_updated_at = Some(now);
        stats
    }
}

/// Read-only availability summary used by the pause check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolAvailability {
    pub has_pool: bool,
    pub available: u64,
    pub total: u64,
}

impl PoolAvailability {
    pub fn no_pool() -> Self {
        Self {
            has_pool: false,
            available: 0,
            total: 0,
        }
    }

    /// A reward type without a pool falls back to generated codes and so
    /// never runs out.
    pub fn can_issue(&self) -> bool {
        !self.has_pool || self.available > 0
    }
}
