//! Billing data types

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Flattened subscription status, as shown to the UI and cached on disk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    #[default]
    Free,
    Trial,
    Premium,
    Loading,
    Error,
}

impl SubscriptionStatus {
    #[inline]
    pub fn is_entitled(self) -> bool {
        matches!(self, Self::Trial | Self::Premium)
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Free => write!(f, "free"),
            Self::Trial => write!(f, "trial"),
            Self::Premium => write!(f, "premium"),
            Self::Loading => write!(f, "loading"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Period of a remote entitlement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PeriodType {
    Normal,
    Trial,
    Intro,
}

impl PeriodType {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "normal" => Some(Self::Normal),
            "trial" => Some(Self::Trial),
            "intro" => Some(Self::Intro),
            _ => None,
        }
    }
}

/// Locally granted, time-boxed trial
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialRecord {
    pub owner_user_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl TrialRecord {
    /// Start a trial of `duration` at `now`
    pub fn start(owner_user_id: impl Into<String>, now: DateTime<Utc>, duration: Duration) -> Self {
        Self {
            owner_user_id: owner_user_id.into(),
            start_time: now,
            end_time: now + duration,
        }
    }

    #[inline]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now < self.end_time
    }

    /// Whole days left, rounded up; zero once expired
    pub fn days_remaining(&self, now: DateTime<Utc>) -> u32 {
        let remaining_ms = (self.end_time - now).num_milliseconds();
        if remaining_ms <= 0 {
            return 0;
        }
        ((remaining_ms + DAY_MS - 1) / DAY_MS) as u32
    }
}

/// Snapshot of a grant held by the purchase service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEntitlement {
    pub identifier: String,
    pub is_active: bool,
    pub will_renew: bool,
    pub period_type: Option<PeriodType>,
    pub expiration_date: Option<DateTime<Utc>>,
    pub product_identifier: Option<String>,
    /// Granted through a sandbox/test store
    #[serde(default)]
    pub is_sandbox: bool,
}

impl RemoteEntitlement {
    /// An active, renewing entitlement with no expiration
    pub fn new(identifier: impl Into<String>, period_type: PeriodType) -> Self {
        Self {
            identifier: identifier.into(),
            is_active: true,
            will_renew: true,
            period_type: Some(period_type),
            expiration_date: None,
            product_identifier: None,
            is_sandbox: false,
        }
    }

    /// Remote trials and sandbox grants count as a trial, not premium
    #[inline]
    pub fn is_trial_grant(&self) -> bool {
        self.period_type == Some(PeriodType::Trial) || self.is_sandbox
    }
}

/// Where an active trial comes from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "source")]
pub enum TrialGrant {
    Local(TrialRecord),
    Remote(RemoteEntitlement),
}

/// Reconciled subscription state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "status")]
pub enum SubscriptionState {
    #[default]
    Loading,
    Free,
    Trial { grant: TrialGrant },
    Premium { entitlement: RemoteEntitlement },
    Error { cause: String },
}

impl SubscriptionState {
    /// State derived from an active remote entitlement
    pub fn from_remote(entitlement: RemoteEntitlement) -> Self {
        if entitlement.is_trial_grant() {
            Self::Trial {
                grant: TrialGrant::Remote(entitlement),
            }
        } else {
            Self::Premium { entitlement }
        }
    }

    pub fn local_trial(record: TrialRecord) -> Self {
        Self::Trial {
            grant: TrialGrant::Local(record),
        }
    }

    pub fn status(&self) -> SubscriptionStatus {
        match self {
            Self::Loading => SubscriptionStatus::Loading,
            Self::Free => SubscriptionStatus::Free,
            Self::Trial { .. } => SubscriptionStatus::Trial,
            Self::Premium { .. } => SubscriptionStatus::Premium,
            Self::Error { .. } => SubscriptionStatus::Error,
        }
    }

    #[inline]
    pub fn is_premium_entitled(&self) -> bool {
        self.status().is_entitled()
    }

    /// The local trial backing this state, if any
    pub fn active_trial(&self) -> Option<&TrialRecord> {
        match self {
            Self::Trial {
                grant: TrialGrant::Local(record),
            } => Some(record),
            _ => None,
        }
    }

    pub fn days_remaining(&self, now: DateTime<Utc>) -> Option<u32> {
        self.active_trial().map(|record| record.days_remaining(now))
    }
}

/// Status cached on disk for fast reads at launch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedStatus {
    pub user_id: String,
    pub status: SubscriptionStatus,
    pub cached_at: i64, // Unix timestamp in ms
}

/// Result of a trial start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialStarted {
    pub record: TrialRecord,
    /// False when the record could not be written; the in-memory state still
    /// holds the trial until the next launch re-reads storage
    pub persisted: bool,
}

/// Outcome of a purchase attempt that did not raise an error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum PurchaseResult {
    /// The purchase call went through; `state` is the reconciled result
    Completed { state: SubscriptionState },
    /// The user backed out
    Cancelled,
    /// A test/sandbox configuration failed on purpose
    SimulatedFailure,
}

impl PurchaseResult {
    /// Whether the attempt left the user entitled
    pub fn is_purchased(&self) -> bool {
        match self {
            Self::Completed { state } => state.is_premium_entitled(),
            Self::Cancelled | Self::SimulatedFailure => false,
        }
    }
}
