//! Points Ledger
//!
//! Categorized reward accounting per owner identity. Points are an internal
//! reputation score, not a transferable balance.

pub mod ledger;
pub mod record;

pub use ledger::{AwardOutcome, OwnerTotals, PointsLedger, PointsPolicy, UsageEvent};
pub use record::{
    CategoryTotals, PointsCategory, PointsRecord, PointsTransaction, TransactionKind,
};
