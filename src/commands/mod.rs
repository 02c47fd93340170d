//! Command surface for the app shell
//!
//! Commands take the shared `BillingState` and return `Result<T, String>`,
//! which is what the UI layer renders.

pub mod billing;
pub mod scan;

pub use billing::*;
pub use scan::*;
