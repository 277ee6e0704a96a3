//! # Stillmind Core Library
//!
//! This library provides the entitlement core for the Stillmind wellness app.
//! It implements a CLI-first philosophy where all operations are available via
//! a standalone CLI binary, with any GUI shell being a thin layer over the
//! same core library.
//!
//! ## Architecture
//!
//! - **Entitlements**: A reconciliation service that merges the billing
//!   provider's remote view with a local install-anchored trial window into
//!   one authoritative subscription state
//! - **Storage**: File-backed key-value records, TOML-based configuration and
//!   OS-keychain secrets
//! - **Billing client**: An HTTP client for the billing provider, behind a
//!   trait so shells and tests can substitute their own
//!
//! ## Key Components
//!
//! - [`SubscriptionService`]: Reconciliation core and purchase/restore flows
//! - [`SubscriptionStore`]: Last known state, persisted and observable
//! - [`TrialPolicy`]: Pure local trial evaluation
//! - [`RemoteBillingClient`]: HTTP implementation of [`EntitlementClient`]
//! - [`Config`]: Application configuration management

pub mod entitlements;
pub mod error;
pub mod storage;

pub use entitlements::{
    EntitlementClient, EntitlementSnapshot, PlanId, ProviderStatus, PurchaseOutcome,
    ReconcileTrigger, RemoteBillingClient, RestoreOutcome, SubscriptionService,
    SubscriptionState, SubscriptionStore, TrialPolicy,
};
pub use error::{BillingError, ConfigError, CoreError, Result, StorageError};
pub use storage::{BillingConfig, Config, FileKvStore, KvStore, TrialConfig};
