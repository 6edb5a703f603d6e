//! Receipt rewards engine: turns validated receipts into campaign rewards.
//!
//! # Modules
//!
//! - [`fraud`] — Platform-wide duplicate receipt detection
//! - [`matcher`] — First-match campaign selection by brand, store and date
//! - [`eligibility`] — Per reward type criteria evaluation
//! - [`allocator`] — Atomic voucher claims and no-pool fallback codes
//! - [`ledger`] — All-or-nothing reward grants per receipt
//! - [`pause`] — Pauses campaigns whose every pool is exhausted
//! - [`redemption`] — Redemption, expiry sweeps and replenishment
//! - [`pipeline`] — Chains the above for one inbound receipt

#![warn(clippy::unwrap_used)]

pub mod allocator;
pub mod eligibility;
pub mod fraud;
pub mod ledger;
pub mod matcher;
pub mod pause;
pub mod pipeline;
pub mod redemption;
pub mod repos;
pub mod unit_of_work;
pub mod valuation;

pub use allocator::{AllocationOutcome, VoucherAllocator};
pub use eligibility::{CriterionFailure, EligibilityEvaluator};
pub use fraud::{FraudCheck, FraudDetector};
pub use ledger::{LedgerResult, RewardLedger};
pub use matcher::{CampaignMatcher, MatchOutcome};
pub use pause::{PauseController, PauseDecision};
pub use pipeline::{ReceiptOutcome, ReceiptPipeline};
pub use redemption::RedemptionService;
pub use repos::Repositories;
