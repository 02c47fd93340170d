//! Billing module for subscription entitlement
//!
//! This module handles:
//! - Reconciling remote entitlements with the local trial (Free/Trial/Premium)
//! - The one-time local trial and its owner scoping
//! - Purchases, restores and paywall offerings
//! - Caching the reconciled status for fast launches

mod reconciler;
mod trial;
mod types;

pub use reconciler::EntitlementReconciler;
pub use trial::TrialStore;
pub use types::{
    CachedStatus, PeriodType, PurchaseResult, RemoteEntitlement, SubscriptionState,
    SubscriptionStatus, TrialGrant, TrialRecord, TrialStarted,
};

use std::sync::Arc;
use tracing::info;

use crate::clock::{Clock, SystemClock};
use crate::config::BillingConfig;
use crate::error::BillingError;
use crate::purchases::{PurchaseService, RevenueCatClient, UnconfiguredPurchases};
use crate::services::ScanCache;
use crate::storage::{KeyValueStore, SqliteStore};

/// Billing state shared with the app shell
pub struct BillingState {
    pub reconciler: EntitlementReconciler,
    pub scan_cache: ScanCache,
}

impl BillingState {
    /// Wire up billing from configuration, persisting to SQLite
    pub fn open(config: BillingConfig) -> Result<Self, BillingError> {
        let db_path = config.db_path().map_err(BillingError::Config)?;
        let store: Arc<dyn KeyValueStore> = Arc::new(SqliteStore::open(&db_path)?);
        info!(path = %db_path.display(), "Opened billing store");
        Ok(Self::with_store(config, store, Arc::new(SystemClock)))
    }

    /// Wire up billing over an existing store and clock
    pub fn with_store(
        config: BillingConfig,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let purchases: Arc<dyn PurchaseService> = match &config.purchase_service_api_key {
            Some(key) => Arc::new(RevenueCatClient::new(
                key.clone(),
                config.purchase_service_url.clone(),
            )),
            None => {
                info!("No purchase service key configured, running on local trials only");
                Arc::new(UnconfiguredPurchases)
            }
        };
        Self::with_services(config, purchases, store, clock)
    }

    /// Wire up billing with an explicit purchase service
    pub fn with_services(
        config: BillingConfig,
        purchases: Arc<dyn PurchaseService>,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let scan_cache = ScanCache::new(store.clone(), clock.clone(), config.scan_cache_retention);
        let reconciler = EntitlementReconciler::new(purchases, store, clock, config);
        Self {
            reconciler,
            scan_cache,
        }
    }
}
