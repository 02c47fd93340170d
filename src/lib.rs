pub mod billing;
pub mod clock;
pub mod commands;
pub mod config;
pub mod error;
pub mod purchases;
pub mod services;
pub mod storage;

#[cfg(test)]
mod testing;

pub use billing::{BillingState, EntitlementReconciler, SubscriptionState, SubscriptionStatus};
pub use config::BillingConfig;
pub use error::BillingError;

use tracing_subscriber::EnvFilter;

/// Initialize tracing with RUST_LOG env filter.
///
/// Default: warn for most crates, info for billing (state transitions visible).
/// Use RUST_LOG=debug for verbose per-operation logs. Safe to call twice.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,nutrilog_billing_lib=info")),
        )
        .try_init();
}
