//! RevenueCat REST client
//!
//! Reads subscriber entitlements and offerings over the REST API. Store
//! transactions only happen inside the mobile SDK, so `purchase_package` is
//! not available here and restoring simply re-reads the subscriber record.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use super::{
    CustomerInfo, Offering, Offerings, Package, PackageRef, PurchaseError, PurchaseErrorKind,
    PurchaseService,
};
use crate::billing::{PeriodType, RemoteEntitlement};

/// Shared HTTP client for purchase service calls
static REVENUECAT_CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .timeout(Duration::from_secs(30))
        .pool_max_idle_per_host(5)
        .pool_idle_timeout(Duration::from_secs(90))
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!("Falling back to default HTTP client: {}", e);
            Client::new()
        })
});

/// Platform reported when fetching offerings
const DEFAULT_PLATFORM: &str = "ios";

pub struct RevenueCatClient {
    api_key: String,
    base_url: String,
    platform: String,
}

impl RevenueCatClient {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            platform: DEFAULT_PLATFORM.to_string(),
        }
    }

    fn subscriber_url(&self, app_user_id: &str, suffix: Option<&str>) -> Result<Url, PurchaseError> {
        let mut url = Url::parse(&self.base_url).map_err(|e| {
            PurchaseError::new(PurchaseErrorKind::NotConfigured, format!("invalid API URL: {}", e))
        })?;
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                PurchaseError::new(PurchaseErrorKind::NotConfigured, "API URL cannot be a base")
            })?;
            segments.pop_if_empty().extend(["v1", "subscribers", app_user_id]);
            if let Some(suffix) = suffix {
                segments.push(suffix);
            }
        }
        Ok(url)
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: Url) -> Result<T, PurchaseError> {
        debug!(url = %url, "Purchase service request");
        let response = REVENUECAT_CLIENT
            .get(url)
            .bearer_auth(&self.api_key)
            .header("X-Platform", &self.platform)
            .send()
            .await
            .map_err(|e| PurchaseError::new(PurchaseErrorKind::Network, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_status(status, body));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| PurchaseError::new(PurchaseErrorKind::Other, format!("invalid response: {}", e)))
    }

    async fn fetch_subscriber(&self, app_user_id: &str) -> Result<CustomerInfo, PurchaseError> {
        let url = self.subscriber_url(app_user_id, None)?;
        let payload: SubscriberResponse = self.get_json(url).await?;
        Ok(payload.into_customer_info(app_user_id, Utc::now()))
    }
}

fn map_status(status: StatusCode, body: String) -> PurchaseError {
    let kind = if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        PurchaseErrorKind::Network
    } else {
        PurchaseErrorKind::Other
    };
    PurchaseError::new(kind, format!("HTTP {}: {}", status, body))
}

#[async_trait]
impl PurchaseService for RevenueCatClient {
    /// GET on a subscriber creates it if missing, which is what logging in does
    async fn log_in(&self, app_user_id: &str) -> Result<CustomerInfo, PurchaseError> {
        self.fetch_subscriber(app_user_id).await
    }

    async fn customer_info(&self, app_user_id: &str) -> Result<CustomerInfo, PurchaseError> {
        self.fetch_subscriber(app_user_id).await
    }

    async fn purchase_package(
        &self,
        _app_user_id: &str,
        package: &PackageRef,
    ) -> Result<CustomerInfo, PurchaseError> {
        Err(PurchaseError::new(
            PurchaseErrorKind::Unsupported,
            format!("package {} must be purchased through the store SDK", package),
        ))
    }

    async fn restore_purchases(&self, app_user_id: &str) -> Result<CustomerInfo, PurchaseError> {
        self.fetch_subscriber(app_user_id).await
    }

    async fn offerings(&self, app_user_id: &str) -> Result<Offerings, PurchaseError> {
        let url = self.subscriber_url(app_user_id, Some("offerings"))?;
        let payload: OfferingsResponse = self.get_json(url).await?;
        Ok(payload.into())
    }
}

// === Wire types ===

#[derive(Debug, Deserialize)]
struct SubscriberResponse {
    subscriber: Subscriber,
}

#[derive(Debug, Default, Deserialize)]
struct Subscriber {
    #[serde(default)]
    entitlements: HashMap<String, EntitlementPayload>,
    #[serde(default)]
    subscriptions: HashMap<String, SubscriptionPayload>,
}

#[derive(Debug, Deserialize)]
struct EntitlementPayload {
    expires_date: Option<DateTime<Utc>>,
    product_identifier: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionPayload {
    period_type: Option<String>,
    #[serde(default)]
    is_sandbox: bool,
    unsubscribe_detected_at: Option<DateTime<Utc>>,
    billing_issues_detected_at: Option<DateTime<Utc>>,
}

impl SubscriberResponse {
    fn into_customer_info(self, app_user_id: &str, now: DateTime<Utc>) -> CustomerInfo {
        let Subscriber {
            entitlements,
            subscriptions,
        } = self.subscriber;

        let entitlements = entitlements
            .into_iter()
            .map(|(identifier, payload)| {
                let subscription = payload
                    .product_identifier
                    .as_deref()
                    .and_then(|product| subscriptions.get(product));

                // No expiry means a lifetime grant
                let is_active = payload.expires_date.map_or(true, |expires| expires > now);
                let will_renew = payload.expires_date.is_some()
                    && subscription.is_some_and(|s| {
                        s.unsubscribe_detected_at.is_none() && s.billing_issues_detected_at.is_none()
                    });

                let entitlement = RemoteEntitlement {
                    identifier: identifier.clone(),
                    is_active,
                    will_renew,
                    period_type: subscription
                        .and_then(|s| s.period_type.as_deref())
                        .and_then(PeriodType::parse),
                    expiration_date: payload.expires_date,
                    product_identifier: payload.product_identifier,
                    is_sandbox: subscription.is_some_and(|s| s.is_sandbox),
                };
                (identifier, entitlement)
            })
            .collect();

        CustomerInfo {
            app_user_id: app_user_id.to_string(),
            entitlements,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OfferingsResponse {
    current_offering_id: Option<String>,
    #[serde(default)]
    offerings: Vec<OfferingPayload>,
}

#[derive(Debug, Deserialize)]
struct OfferingPayload {
    identifier: String,
    description: Option<String>,
    #[serde(default)]
    packages: Vec<PackagePayload>,
}

#[derive(Debug, Deserialize)]
struct PackagePayload {
    identifier: String,
    platform_product_identifier: String,
}

impl From<OfferingsResponse> for Offerings {
    fn from(response: OfferingsResponse) -> Self {
        Self {
            current: response.current_offering_id,
            all: response
                .offerings
                .into_iter()
                .map(|o| Offering {
                    identifier: o.identifier,
                    description: o.description,
                    packages: o
                        .packages
                        .into_iter()
                        .map(|p| Package {
                            identifier: PackageRef(p.identifier),
                            product_identifier: p.platform_product_identifier,
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUBSCRIBER_JSON: &str = r#"{
        "request_date": "2026-03-01T12:00:00Z",
        "subscriber": {
            "original_app_user_id": "user_a",
            "entitlements": {
                "premium": {
                    "expires_date": "2026-04-01T12:00:00Z",
                    "product_identifier": "nutrilog_monthly",
                    "purchase_date": "2026-03-01T12:00:00Z"
                },
                "legacy": {
                    "expires_date": "2025-01-01T00:00:00Z",
                    "product_identifier": "old_plan",
                    "purchase_date": "2024-12-01T00:00:00Z"
                },
                "lifetime": {
                    "expires_date": null,
                    "product_identifier": "nutrilog_lifetime",
                    "purchase_date": "2026-01-01T00:00:00Z"
                }
            },
            "subscriptions": {
                "nutrilog_monthly": {
                    "period_type": "trial",
                    "is_sandbox": true,
                    "unsubscribe_detected_at": null,
                    "billing_issues_detected_at": null,
                    "expires_date": "2026-04-01T12:00:00Z"
                },
                "old_plan": {
                    "period_type": "normal",
                    "is_sandbox": false,
                    "unsubscribe_detected_at": "2024-12-15T00:00:00Z",
                    "billing_issues_detected_at": null,
                    "expires_date": "2025-01-01T00:00:00Z"
                }
            }
        }
    }"#;

    fn parse_at(now: &str) -> CustomerInfo {
        let payload: SubscriberResponse = serde_json::from_str(SUBSCRIBER_JSON).unwrap();
        let now = DateTime::parse_from_rfc3339(now).unwrap().with_timezone(&Utc);
        payload.into_customer_info("user_a", now)
    }

    #[test]
    fn test_parses_active_trial_entitlement() {
        let info = parse_at("2026-03-02T00:00:00Z");
        let premium = info.active_entitlement("premium").unwrap();
        assert_eq!(premium.period_type, Some(PeriodType::Trial));
        assert!(premium.is_sandbox);
        assert!(premium.will_renew);
        assert!(premium.is_trial_grant());
    }

    #[test]
    fn test_expired_and_cancelled_entitlement() {
        let info = parse_at("2026-03-02T00:00:00Z");
        let legacy = &info.entitlements["legacy"];
        assert!(!legacy.is_active);
        assert!(!legacy.will_renew);
        assert!(info.active_entitlement("legacy").is_none());
    }

    #[test]
    fn test_lifetime_entitlement_never_expires() {
        let info = parse_at("2040-01-01T00:00:00Z");
        let lifetime = info.active_entitlement("lifetime").unwrap();
        assert!(lifetime.expiration_date.is_none());
        assert!(!lifetime.will_renew);
        assert_eq!(lifetime.period_type, None);
        // premium lapsed by then
        assert!(info.active_entitlement("premium").is_none());
    }

    #[test]
    fn test_offerings_payload() {
        let payload: OfferingsResponse = serde_json::from_str(
            r#"{
                "current_offering_id": "default",
                "offerings": [{
                    "identifier": "default",
                    "description": "Standard paywall",
                    "packages": [
                        {"identifier": "$rc_monthly", "platform_product_identifier": "nutrilog_monthly"},
                        {"identifier": "$rc_annual", "platform_product_identifier": "nutrilog_annual"}
                    ]
                }]
            }"#,
        )
        .unwrap();
        let offerings = Offerings::from(payload);
        let current = offerings.current_offering().unwrap();
        assert_eq!(current.packages.len(), 2);
        assert_eq!(current.packages[1].identifier, PackageRef::new("$rc_annual"));
    }

    #[test]
    fn test_subscriber_url_escapes_user_id() {
        let client = RevenueCatClient::new("sk_test", "https://api.revenuecat.com");
        let url = client.subscriber_url("user/a b", Some("offerings")).unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.revenuecat.com/v1/subscribers/user%2Fa%20b/offerings"
        );
    }

    #[test]
    fn test_server_errors_map_to_network() {
        let err = map_status(StatusCode::BAD_GATEWAY, String::new());
        assert_eq!(err.kind, PurchaseErrorKind::Network);
        let err = map_status(StatusCode::UNAUTHORIZED, "bad key".to_string());
        assert_eq!(err.kind, PurchaseErrorKind::Other);
    }

    #[tokio::test]
    async fn test_purchase_is_unsupported() {
        let client = RevenueCatClient::new("sk_test", "https://api.revenuecat.com");
        let err = client
            .purchase_package("user_a", &PackageRef::new("$rc_monthly"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, PurchaseErrorKind::Unsupported);
    }
}
