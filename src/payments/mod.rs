//! Payments Module
//!
//! External deposits: memo parsing, the provider client and the
//! reconciliation pass that credits the ledger.

pub mod memo;
pub mod provider;
pub mod reconcile;

pub use memo::{parse_memo, MemoError, PaymentIntent};
pub use provider::{PaymentProvider, ProviderTransaction, TonApiProvider};
pub use reconcile::{ReconcileConfig, ReconcileError, ReconcileReport, Reconciler};
