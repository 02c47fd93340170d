//! Runtime configuration
//!
//! Values come from the environment (optionally seeded from a `.env` file via
//! dotenvy). Absence of a purchase service API key is a normal configuration:
//! the reconciler then runs on local trial logic only.

use chrono::Duration;
use std::path::PathBuf;
use std::time::Duration as StdDuration;

/// Length of the locally granted trial
pub const DEFAULT_TRIAL_DAYS: i64 = 3;

/// How long a scan result stays usable
pub const DEFAULT_SCAN_RETENTION_DAYS: i64 = 7;

/// Entitlement that unlocks premium features
pub const DEFAULT_ENTITLEMENT_ID: &str = "premium";

pub const DEFAULT_REVENUECAT_API_URL: &str = "https://api.revenuecat.com";

/// Write-then-read attempts when a purchase grants a trial
pub const TRIAL_VERIFY_ATTEMPTS: u32 = 2;

const DEFAULT_TRIAL_VERIFY_DELAY_MS: u64 = 250;

const DB_FILENAME: &str = "billing.db";

#[derive(Debug, Clone)]
pub struct BillingConfig {
    /// RevenueCat secret key; `None` disables the remote purchase service
    pub purchase_service_api_key: Option<String>,
    pub purchase_service_url: String,
    pub entitlement_id: String,
    pub trial_duration: Duration,
    pub scan_cache_retention: Duration,
    /// Pause between trial write verification attempts
    pub trial_verify_delay: StdDuration,
    pub data_dir: Option<PathBuf>,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            purchase_service_api_key: None,
            purchase_service_url: DEFAULT_REVENUECAT_API_URL.to_string(),
            entitlement_id: DEFAULT_ENTITLEMENT_ID.to_string(),
            trial_duration: Duration::days(DEFAULT_TRIAL_DAYS),
            scan_cache_retention: Duration::days(DEFAULT_SCAN_RETENTION_DAYS),
            trial_verify_delay: StdDuration::from_millis(DEFAULT_TRIAL_VERIFY_DELAY_MS),
            data_dir: None,
        }
    }
}

impl BillingConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Self {
        // During development the .env usually sits in the working directory
        if dotenvy::dotenv().is_err() {
            let _ = dotenvy::from_path("../.env");
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let purchase_service_api_key = non_empty("REVENUECAT_API_KEY")
            .or_else(|| non_empty("REVENUECAT_SECRET_KEY"));

        Self {
            purchase_service_api_key,
            purchase_service_url: non_empty("REVENUECAT_API_URL")
                .unwrap_or(defaults.purchase_service_url),
            entitlement_id: non_empty("NUTRILOG_ENTITLEMENT_ID")
                .unwrap_or(defaults.entitlement_id),
            data_dir: non_empty("NUTRILOG_DATA_DIR").map(PathBuf::from),
            ..defaults
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.purchase_service_api_key = Some(key.into());
        self
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    pub fn with_trial_verify_delay(mut self, delay: StdDuration) -> Self {
        self.trial_verify_delay = delay;
        self
    }

    /// Whether a remote purchase service is configured
    #[inline]
    pub fn has_purchase_service(&self) -> bool {
        self.purchase_service_api_key.is_some()
    }

    /// Path of the SQLite database, defaulting to ~/.config/nutrilog/billing.db
    pub fn db_path(&self) -> Result<PathBuf, String> {
        match &self.data_dir {
            Some(dir) => Ok(dir.join(DB_FILENAME)),
            None => dirs::config_dir()
                .map(|d| d.join("nutrilog").join(DB_FILENAME))
                .ok_or_else(|| "Could not determine config directory".to_string()),
        }
    }
}
