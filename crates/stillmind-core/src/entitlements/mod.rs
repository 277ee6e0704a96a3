//! Subscription entitlement layer.
//!
//! Merges the remote billing provider's view of the user with the local
//! three-day trial into one authoritative `SubscriptionState`, persisted
//! locally and observable through the subscription store.

pub mod install;
pub mod provider;
pub mod reconciler;
pub mod remote;
pub mod state;
pub mod store;
pub mod trial;


pub use install::{ensure_app_user_id, ensure_install_date};
pub use provider::{
    Entitlement, EntitlementClient, EntitlementSnapshot, Offering, Package, PackageType,
    PeriodType, PlanId, PurchaseFlow,
};
pub use reconciler::{
    resolve_package, Clock, ProviderStatus, PurchaseOutcome, ReconcileTrigger, RestoreOutcome,
    SubscriptionService,
};
pub use remote::RemoteBillingClient;
pub use state::{SubscriptionState, TRIAL_PLAN_ID};
pub use store::{SubscriptionStore, SUBSCRIPTION_STATE_KEY};
pub use trial::TrialPolicy;
