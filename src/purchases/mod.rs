//! Purchase-management integration
//!
//! The reconciler talks to the store/purchase backend through
//! `PurchaseService`. Failures carry a structured `PurchaseErrorKind`, so
//! "user cancelled" and "simulated test failure" are recognised without
//! matching vendor error strings.

mod revenuecat;

pub use revenuecat::RevenueCatClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::billing::RemoteEntitlement;

/// Category of a purchase service failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseErrorKind {
    /// No API key or the SDK is unavailable in this runtime
    NotConfigured,
    /// The user backed out of the store sheet
    Cancelled,
    /// Deliberate failure from a sandbox/test store configuration
    SimulatedFailure,
    /// Transport failure or server-side outage
    Network,
    /// The backend cannot perform this operation
    Unsupported,
    Other,
}

/// Error returned by a `PurchaseService`
#[derive(Debug, Clone, thiserror::Error)]
#[error("purchase service error ({kind:?}): {message}")]
pub struct PurchaseError {
    pub kind: PurchaseErrorKind,
    pub message: String,
}

impl PurchaseError {
    pub fn new(kind: PurchaseErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_configured() -> Self {
        Self::new(
            PurchaseErrorKind::NotConfigured,
            "purchase service is not configured",
        )
    }

    #[inline]
    pub fn is_not_configured(&self) -> bool {
        self.kind == PurchaseErrorKind::NotConfigured
    }
}

/// Snapshot of a customer's entitlements, keyed by entitlement identifier
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerInfo {
    pub app_user_id: String,
    pub entitlements: HashMap<String, RemoteEntitlement>,
}

impl CustomerInfo {
    pub fn new(app_user_id: impl Into<String>) -> Self {
        Self {
            app_user_id: app_user_id.into(),
            entitlements: HashMap::new(),
        }
    }

    pub fn with_entitlement(mut self, entitlement: RemoteEntitlement) -> Self {
        self.entitlements
            .insert(entitlement.identifier.clone(), entitlement);
        self
    }

    /// The named entitlement, only if currently active
    pub fn active_entitlement(&self, identifier: &str) -> Option<&RemoteEntitlement> {
        self.entitlements
            .get(identifier)
            .filter(|entitlement| entitlement.is_active)
    }
}

/// Opaque reference to a store package
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageRef(pub String);

impl PackageRef {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self(identifier.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PackageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Package {
    pub identifier: PackageRef,
    pub product_identifier: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Offering {
    pub identifier: String,
    pub description: Option<String>,
    pub packages: Vec<Package>,
}

/// Catalogue of offerings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Offerings {
    pub current: Option<String>,
    pub all: Vec<Offering>,
}

impl Offerings {
    pub fn current_offering(&self) -> Option<&Offering> {
        let current = self.current.as_deref()?;
        self.all.iter().find(|o| o.identifier == current)
    }

    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }
}

/// Remote purchase-management service
#[async_trait]
pub trait PurchaseService: Send + Sync {
    /// Identify the active user with the service
    async fn log_in(&self, app_user_id: &str) -> Result<CustomerInfo, PurchaseError>;

    async fn customer_info(&self, app_user_id: &str) -> Result<CustomerInfo, PurchaseError>;

    async fn purchase_package(
        &self,
        app_user_id: &str,
        package: &PackageRef,
    ) -> Result<CustomerInfo, PurchaseError>;

    async fn restore_purchases(&self, app_user_id: &str) -> Result<CustomerInfo, PurchaseError>;

    async fn offerings(&self, app_user_id: &str) -> Result<Offerings, PurchaseError>;
}

#[async_trait]
impl<P: PurchaseService + ?Sized> PurchaseService for Arc<P> {
    #[inline]
    async fn log_in(&self, app_user_id: &str) -> Result<CustomerInfo, PurchaseError> {
        (**self).log_in(app_user_id).await
    }

    #[inline]
    async fn customer_info(&self, app_user_id: &str) -> Result<CustomerInfo, PurchaseError> {
        (**self).customer_info(app_user_id).await
    }

    #[inline]
    async fn purchase_package(
        &self,
        app_user_id: &str,
        package: &PackageRef,
    ) -> Result<CustomerInfo, PurchaseError> {
        (**self).purchase_package(app_user_id, package).await
    }

    #[inline]
    async fn restore_purchases(&self, app_user_id: &str) -> Result<CustomerInfo, PurchaseError> {
        (**self).restore_purchases(app_user_id).await
    }

    #[inline]
    async fn offerings(&self, app_user_id: &str) -> Result<Offerings, PurchaseError> {
        (**self).offerings(app_user_id).await
    }
}

/// Used when no purchase service key is configured. Every call reports
/// `NotConfigured`, which the reconciler absorbs.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredPurchases;

#[async_trait]
impl PurchaseService for UnconfiguredPurchases {
    async fn log_in(&self, _app_user_id: &str) -> Result<CustomerInfo, PurchaseError> {
        Err(PurchaseError::not_configured())
    }

    async fn customer_info(&self, _app_user_id: &str) -> Result<CustomerInfo, PurchaseError> {
        Err(PurchaseError::not_configured())
    }

    async fn purchase_package(
        &self,
        _app_user_id: &str,
        _package: &PackageRef,
    ) -> Result<CustomerInfo, PurchaseError> {
        Err(PurchaseError::not_configured())
    }

    async fn restore_purchases(&self, _app_user_id: &str) -> Result<CustomerInfo, PurchaseError> {
        Err(PurchaseError::not_configured())
    }

    async fn offerings(&self, _app_user_id: &str) -> Result<Offerings, PurchaseError> {
        Err(PurchaseError::not_configured())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::PeriodType;

    #[test]
    fn test_active_entitlement_filters_inactive() {
        let mut expired = RemoteEntitlement::new("premium", PeriodType::Normal);
        expired.is_active = false;
        let info = CustomerInfo::new("user_1").with_entitlement(expired);
        assert!(info.active_entitlement("premium").is_none());

        let info = CustomerInfo::new("user_1")
            .with_entitlement(RemoteEntitlement::new("premium", PeriodType::Normal));
        assert!(info.active_entitlement("premium").is_some());
        assert!(info.active_entitlement("pro").is_none());
    }

    #[test]
    fn test_current_offering_lookup() {
        let offerings = Offerings {
            current: Some("default".to_string()),
            all: vec![Offering {
                identifier: "default".to_string(),
                description: None,
                packages: vec![Package {
                    identifier: PackageRef::new("$rc_monthly"),
                    product_identifier: "nutrilog_monthly".to_string(),
                }],
            }],
        };
        let current = offerings.current_offering().unwrap();
        assert_eq!(current.packages[0].identifier.as_str(), "$rc_monthly");
    }

    #[tokio::test]
    async fn test_unconfigured_reports_not_configured() {
        let service = UnconfiguredPurchases;
        let err = service.customer_info("user_1").await.unwrap_err();
        assert!(err.is_not_configured());
        let err = service
            .purchase_package("user_1", &PackageRef::new("$rc_annual"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, PurchaseErrorKind::NotConfigured);
    }
}
