//! Error types shared across the billing core

use chrono::{DateTime, Utc};

use crate::purchases::PurchaseError;
use crate::storage::StorageError;

/// Errors surfaced by the reconciler and scan cache.
///
/// Expected conditions (no entitlement, no trial, a cancelled purchase) are
/// not represented here; they resolve into regular state values.
#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    /// Local persistence failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The purchase service failed in a way the reconciler cannot absorb.
    #[error(transparent)]
    Purchase(#[from] PurchaseError),

    /// The user already consumed their one trial.
    #[error("trial already used (ended {ends_at})")]
    TrialAlreadyUsed { ends_at: DateTime<Utc> },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl BillingError {
    /// Whether this error came from the purchase integration.
    #[inline]
    pub fn is_purchase_error(&self) -> bool {
        matches!(self, Self::Purchase(_))
    }
}
