//! Entitlement reconciliation
//!
//! Combines the remote entitlement snapshot from the purchase service with the
//! local trial record into one `SubscriptionState`, persists the status for
//! fast launches, and publishes it to observers.
//!
//! Precedence: an active remote entitlement always wins; otherwise an active
//! local trial; otherwise free. A trial record is only ever applied to the
//! user that owns it.

use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::trial::TrialStore;
use super::types::{
    CachedStatus, PurchaseResult, SubscriptionState, TrialRecord, TrialStarted,
};
use crate::clock::Clock;
use crate::config::{BillingConfig, TRIAL_VERIFY_ATTEMPTS};
use crate::error::BillingError;
use crate::purchases::{
    CustomerInfo, Offerings, PackageRef, PurchaseError, PurchaseErrorKind, PurchaseService,
};
use crate::storage::{KeyValueStore, KEY_SUBSCRIPTION_STATUS};

/// The single writer of subscription state
pub struct EntitlementReconciler {
    purchases: Arc<dyn PurchaseService>,
    store: Arc<dyn KeyValueStore>,
    trials: TrialStore,
    clock: Arc<dyn Clock>,
    config: BillingConfig,
    /// User last identified with the purchase service
    active_user: Mutex<Option<String>>,
    state: watch::Sender<SubscriptionState>,
}

impl EntitlementReconciler {
    pub fn new(
        purchases: Arc<dyn PurchaseService>,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        config: BillingConfig,
    ) -> Self {
        let (state, _) = watch::channel(SubscriptionState::Loading);
        Self {
            purchases,
            trials: TrialStore::new(store.clone()),
            store,
            clock,
            config,
            active_user: Mutex::new(None),
            state,
        }
    }

    /// Last published state
    pub fn snapshot(&self) -> SubscriptionState {
        self.state.borrow().clone()
    }

    /// Observe state changes without being able to write them
    pub fn subscribe(&self) -> watch::Receiver<SubscriptionState> {
        self.state.subscribe()
    }

    /// Trial record for `user_id`, active or not
    pub async fn trial_record(&self, user_id: &str) -> Result<Option<TrialRecord>, BillingError> {
        Ok(self.trials.read(user_id).await?)
    }

    /// Whether `user_id` already consumed their trial
    pub async fn has_used_trial(&self, user_id: &str) -> Result<bool, BillingError> {
        Ok(self.trials.read(user_id).await?.is_some())
    }

    /// Status persisted by the last reconciliation for `user_id`
    pub async fn cached_status(&self, user_id: &str) -> Result<Option<CachedStatus>, BillingError> {
        let Some(raw) = self.store.get(KEY_SUBSCRIPTION_STATUS).await? else {
            return Ok(None);
        };

        match serde_json::from_str::<CachedStatus>(&raw) {
            Ok(cached) if cached.user_id == user_id => Ok(Some(cached)),
            Ok(_) => Ok(None),
            Err(e) => {
                warn!(error = %e, "Discarding unreadable cached status");
                self.store.remove(KEY_SUBSCRIPTION_STATUS).await?;
                Ok(None)
            }
        }
    }

    /// Recompute the subscription state for `user_id`
    pub async fn reconcile(&self, user_id: &str) -> Result<SubscriptionState, BillingError> {
        match self.resolve(user_id).await {
            Ok(state) => {
                self.persist_status(user_id, &state).await;
                self.publish(state.clone());
                Ok(state)
            }
            Err(err) => {
                self.publish_failure(user_id, &err);
                Err(err)
            }
        }
    }

    async fn resolve(&self, user_id: &str) -> Result<SubscriptionState, BillingError> {
        // Must complete before the trial is read for this user
        self.trials.clear_foreign(user_id).await?;

        let info = match self.fetch_customer_info(user_id).await {
            Ok(info) => Some(info),
            Err(e) if e.is_not_configured() => {
                debug!(user_id = user_id, "Purchase service not configured, using local trial");
                None
            }
            Err(e) => {
                warn!(
                    user_id = user_id,
                    error = %e,
                    "Failed to fetch entitlements, falling back to local trial"
                );
                return self.local_state(user_id).await;
            }
        };

        if let Some(entitlement) = info
            .as_ref()
            .and_then(|info| info.active_entitlement(&self.config.entitlement_id))
        {
            return Ok(SubscriptionState::from_remote(entitlement.clone()));
        }

        self.local_state(user_id).await
    }

    /// Logs in when the user changed, otherwise refreshes customer info
    async fn fetch_customer_info(&self, user_id: &str) -> Result<CustomerInfo, PurchaseError> {
        let switched = {
            let active = self.active_user.lock().unwrap_or_else(PoisonError::into_inner);
            active.as_deref() != Some(user_id)
        };

        if !switched {
            return self.purchases.customer_info(user_id).await;
        }

        let info = self.purchases.log_in(user_id).await?;
        *self.active_user.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(user_id.to_string());
        info!(user_id = user_id, "Identified user with purchase service");
        Ok(info)
    }

    /// State from the local trial alone
    async fn local_state(&self, user_id: &str) -> Result<SubscriptionState, BillingError> {
        let now = self.clock.now();
        match self.trials.read(user_id).await? {
            Some(record) if record.is_active(now) => Ok(SubscriptionState::local_trial(record)),
            Some(record) => {
                debug!(
                    user_id = user_id,
                    ended = %record.end_time,
                    "Trial expired"
                );
                Ok(SubscriptionState::Free)
            }
            None => Ok(SubscriptionState::Free),
        }
    }

    /// Grant the one-time local trial to `user_id`
    pub async fn start_trial(&self, user_id: &str) -> Result<TrialStarted, BillingError> {
        self.trials.clear_foreign(user_id).await?;

        if let Some(existing) = self.trials.read(user_id).await? {
            return Err(BillingError::TrialAlreadyUsed {
                ends_at: existing.end_time,
            });
        }

        let record = TrialRecord::start(user_id, self.clock.now(), self.config.trial_duration);
        let state = SubscriptionState::local_trial(record.clone());

        let persisted = match self.write_trial_and_status(&record, &state).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    user_id = user_id,
                    error = %e,
                    "Trial started but could not be persisted"
                );
                false
            }
        };

        self.publish(state);
        info!(user_id = user_id, ends_at = %record.end_time, "Started trial");

        Ok(TrialStarted { record, persisted })
    }

    /// Buy `package` for `user_id`
    pub async fn purchase(
        &self,
        user_id: &str,
        package: &PackageRef,
    ) -> Result<PurchaseResult, BillingError> {
        let info = match self.purchases.purchase_package(user_id, package).await {
            Ok(info) => {
                // The store purchases as the signed-in user
                *self.active_user.lock().unwrap_or_else(PoisonError::into_inner) =
                    Some(user_id.to_string());
                Some(info)
            }
            Err(e) => match e.kind {
                PurchaseErrorKind::Cancelled => {
                    info!(user_id = user_id, package = %package, "Purchase cancelled");
                    return Ok(PurchaseResult::Cancelled);
                }
                PurchaseErrorKind::SimulatedFailure => {
                    info!(user_id = user_id, package = %package, "Simulated purchase failure");
                    return Ok(PurchaseResult::SimulatedFailure);
                }
                PurchaseErrorKind::NotConfigured => {
                    debug!(user_id = user_id, "Purchase service not configured, using local trial");
                    None
                }
                _ => return Err(e.into()),
            },
        };

        if let Some(entitlement) = info
            .as_ref()
            .and_then(|info| info.active_entitlement(&self.config.entitlement_id))
        {
            let state = SubscriptionState::from_remote(entitlement.clone());
            self.persist_status(user_id, &state).await;
            self.publish(state.clone());
            info!(user_id = user_id, status = %state.status(), "Purchase completed");
            return Ok(PurchaseResult::Completed { state });
        }

        self.trials.clear_foreign(user_id).await?;
        if self.trials.read(user_id).await?.is_none() {
            info!(user_id = user_id, "Purchase returned no entitlement, granting trial");
            let started = self.start_trial(user_id).await?;
            self.verify_trial_write(&started.record).await;
            return Ok(PurchaseResult::Completed {
                state: self.snapshot(),
            });
        }

        let state = SubscriptionState::Free;
        self.persist_status(user_id, &state).await;
        self.publish(state.clone());
        Ok(PurchaseResult::Completed { state })
    }

    /// Re-sync purchases made on another device or install
    pub async fn restore_purchases(&self, user_id: &str) -> Result<SubscriptionState, BillingError> {
        self.trials.clear_foreign(user_id).await?;

        let info = match self.purchases.restore_purchases(user_id).await {
            Ok(info) => Some(info),
            Err(e) if e.is_not_configured() => None,
            Err(e) => return Err(e.into()),
        };

        let state = match info
            .as_ref()
            .and_then(|info| info.active_entitlement(&self.config.entitlement_id))
        {
            Some(entitlement) => SubscriptionState::from_remote(entitlement.clone()),
            None => self.local_state(user_id).await?,
        };

        self.persist_status(user_id, &state).await;
        self.publish(state.clone());
        info!(user_id = user_id, status = %state.status(), "Restored purchases");
        Ok(state)
    }

    /// Offerings to show on the paywall
    pub async fn offerings(&self, user_id: &str) -> Result<Offerings, BillingError> {
        match self.purchases.offerings(user_id).await {
            Ok(offerings) => Ok(offerings),
            Err(e) if e.is_not_configured() => Ok(Offerings::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Forget the active user and their cached status
    pub async fn sign_out(&self) -> Result<(), BillingError> {
        self.active_user
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.store.remove(KEY_SUBSCRIPTION_STATUS).await?;
        self.publish(SubscriptionState::Free);
        Ok(())
    }

    /// Re-read a freshly written trial and rewrite it if storage lags behind.
    /// Bounded to `TRIAL_VERIFY_ATTEMPTS` reads.
    async fn verify_trial_write(&self, record: &TrialRecord) {
        for attempt in 1..=TRIAL_VERIFY_ATTEMPTS {
            match self.trials.read(&record.owner_user_id).await {
                Ok(Some(stored)) if stored == *record => {
                    debug!(attempt = attempt, "Trial write verified");
                    return;
                }
                Ok(_) => warn!(attempt = attempt, "Trial write not visible yet"),
                Err(e) => warn!(attempt = attempt, error = %e, "Trial verification read failed"),
            }

            if attempt < TRIAL_VERIFY_ATTEMPTS {
                tokio::time::sleep(self.config.trial_verify_delay).await;
                if let Err(e) = self.trials.write(record).await {
                    warn!(error = %e, "Trial rewrite failed");
                }
            }
        }

        warn!(
            user_id = record.owner_user_id.as_str(),
            "Trial write could not be verified; state will be re-read on next launch"
        );
    }

    async fn write_trial_and_status(
        &self,
        record: &TrialRecord,
        state: &SubscriptionState,
    ) -> Result<(), BillingError> {
        let status = self.cached_status_json(&record.owner_user_id, state)?;
        let [start, end, owner] = TrialStore::entries(record);
        self.store
            .set_many(&[start, end, owner, (KEY_SUBSCRIPTION_STATUS, status)])
            .await?;
        Ok(())
    }

    fn cached_status_json(
        &self,
        user_id: &str,
        state: &SubscriptionState,
    ) -> Result<String, serde_json::Error> {
        serde_json::to_string(&CachedStatus {
            user_id: user_id.to_string(),
            status: state.status(),
            cached_at: self.clock.now().timestamp_millis(),
        })
    }

    /// Cache writes are best effort
    async fn persist_status(&self, user_id: &str, state: &SubscriptionState) {
        let result = match self.cached_status_json(user_id, state) {
            Ok(json) => self
                .store
                .set(KEY_SUBSCRIPTION_STATUS, &json)
                .await
                .map_err(BillingError::from),
            Err(e) => Err(e.into()),
        };

        if let Err(e) = result {
            warn!(user_id = user_id, error = %e, "Failed to cache subscription status");
        }
    }

    fn publish(&self, state: SubscriptionState) {
        debug!(status = %state.status(), "Publishing subscription state");
        self.state.send_replace(state);
    }

    /// Keep a still-valid local trial for the same user, otherwise surface
    /// the error as a non-entitled state
    fn publish_failure(&self, user_id: &str, err: &BillingError) {
        let now = self.clock.now();
        let keep_trial = self
            .state
            .borrow()
            .active_trial()
            .is_some_and(|record| record.owner_user_id == user_id && record.is_active(now));

        if keep_trial {
            warn!(user_id = user_id, error = %err, "Reconciliation failed, keeping active trial");
            return;
        }

        warn!(user_id = user_id, error = %err, "Reconciliation failed");
        self.publish(SubscriptionState::Error {
            cause: err.to_string(),
        });
    }
}
