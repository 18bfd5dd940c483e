//! Upstream balance reconciliation

pub mod extract;
pub mod reconciler;

pub use extract::{BALANCE_SHAPES, BalanceExtractor, extract_balance, extract_with_shape};
pub use reconciler::{BalanceReconciler, BalanceSweep, BalanceUpdate, exceeds_epsilon};
