//! Commands for subscription and trial management

use crate::billing::{
    BillingState, CachedStatus, PurchaseResult, SubscriptionState, TrialStarted,
};
use crate::purchases::{Offerings, PackageRef};

/// Get the last reconciled subscription state
pub fn get_subscription(billing: &BillingState) -> SubscriptionState {
    billing.reconciler.snapshot()
}

/// Get the status cached by the previous session, for a fast first paint
pub async fn get_cached_status(
    billing: &BillingState,
    user_id: String,
) -> Result<Option<CachedStatus>, String> {
    billing
        .reconciler
        .cached_status(&user_id)
        .await
        .map_err(|e| e.to_string())
}

/// Reconcile on launch or after the signed-in user changes
pub async fn initialize_subscription(
    billing: &BillingState,
    user_id: String,
) -> Result<SubscriptionState, String> {
    billing
        .reconciler
        .reconcile(&user_id)
        .await
        .map_err(|e| e.to_string())
}

/// Start the free trial
pub async fn start_trial(billing: &BillingState, user_id: String) -> Result<TrialStarted, String> {
    billing
        .reconciler
        .start_trial(&user_id)
        .await
        .map_err(|e| e.to_string())
}

/// Buy a package from the paywall
pub async fn purchase_package(
    billing: &BillingState,
    user_id: String,
    package_id: String,
) -> Result<PurchaseResult, String> {
    billing
        .reconciler
        .purchase(&user_id, &PackageRef::new(package_id))
        .await
        .map_err(|e| e.to_string())
}

/// Restore purchases made on another device
pub async fn restore_purchases(
    billing: &BillingState,
    user_id: String,
) -> Result<SubscriptionState, String> {
    billing
        .reconciler
        .restore_purchases(&user_id)
        .await
        .map_err(|e| e.to_string())
}

/// Paywall offerings
pub async fn get_offerings(billing: &BillingState, user_id: String) -> Result<Offerings, String> {
    billing
        .reconciler
        .offerings(&user_id)
        .await
        .map_err(|e| e.to_string())
}

/// Clear subscription state on logout
pub async fn sign_out(billing: &BillingState) -> Result<(), String> {
    billing.reconciler.sign_out().await.map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::SubscriptionStatus;
    use crate::clock::SystemClock;
    use crate::config::BillingConfig;
    use crate::storage::MemoryStore;
    use std::sync::Arc;

    fn billing() -> BillingState {
        BillingState::with_store(
            BillingConfig::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(SystemClock),
        )
    }

    #[tokio::test]
    async fn test_trial_flow_through_commands() {
        let billing = billing();
        assert_eq!(get_subscription(&billing).status(), SubscriptionStatus::Loading);

        let state = initialize_subscription(&billing, "user_a".to_string())
            .await
            .unwrap();
        assert_eq!(state.status(), SubscriptionStatus::Free);

        start_trial(&billing, "user_a".to_string()).await.unwrap();
        assert_eq!(get_subscription(&billing).status(), SubscriptionStatus::Trial);

        let err = start_trial(&billing, "user_a".to_string()).await.unwrap_err();
        assert!(err.contains("trial already used"));
    }

    #[tokio::test]
    async fn test_unconfigured_purchase_falls_back_to_trial() {
        let billing = billing();
        let first = purchase_package(&billing, "user_a".to_string(), "$rc_monthly".to_string())
            .await
            .unwrap();
        assert!(first.is_purchased());

        sign_out(&billing).await.unwrap();
        assert_eq!(get_subscription(&billing).status(), SubscriptionStatus::Free);

        let offerings = get_offerings(&billing, "user_a".to_string()).await.unwrap();
        assert!(offerings.is_empty());
    }
}
