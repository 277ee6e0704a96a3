//! Contract with the remote entitlement provider.
//!
//! The reconciler only ever sees this trait plus the snapshot types below;
//! the HTTP adapter in [`super::remote`] is one implementation, test doubles
//! are another. Snapshots are consumed, never owned: the provider is the
//! source of truth for everything in them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use tokio::sync::mpsc;

use crate::error::BillingError;

/// Billing period backing an entitlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodType {
    Trial,
    Intro,
    Normal,
}

/// A named grant of access as the provider reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entitlement {
    pub product_id: String,
    pub period_type: PeriodType,
    pub purchase_date: DateTime<Utc>,
    /// `None` means the grant does not expire (lifetime purchase).
    pub expires_date: Option<DateTime<Utc>>,
}

impl Entitlement {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        match self.expires_date {
            Some(expires) => expires > now,
            None => true,
        }
    }
}

/// Point-in-time view of the current user's entitlements.
///
/// Keyed by entitlement name in a `BTreeMap` so "first active" is
/// deterministic when the provider ever returns more than one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitlementSnapshot {
    #[serde(default)]
    pub entitlements: BTreeMap<String, Entitlement>,
}

impl EntitlementSnapshot {
    /// The named entitlement, if currently active.
    pub fn active(&self, name: &str, now: DateTime<Utc>) -> Option<&Entitlement> {
        self.entitlements.get(name).filter(|e| e.is_active(now))
    }

    /// First active entitlement in key order.
    pub fn first_active(&self, now: DateTime<Utc>) -> Option<(&str, &Entitlement)> {
        self.entitlements
            .iter()
            .find(|(_, e)| e.is_active(now))
            .map(|(name, e)| (name.as_str(), e))
    }

    pub fn has_any_active(&self, now: DateTime<Utc>) -> bool {
        self.first_active(now).is_some()
    }
}

/// Store-facing billing period of a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageType {
    Monthly,
    Annual,
    Lifetime,
    Custom,
}

/// One purchasable item inside an offering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub identifier: String,
    pub package_type: PackageType,
    pub product_id: String,
}

/// The set of packages currently on sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offering {
    pub identifier: String,
    #[serde(default)]
    pub packages: Vec<Package>,
}

/// The two logical plans the app sells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanId {
    Monthly,
    Yearly,
}

impl PlanId {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanId::Monthly => "monthly",
            PlanId::Yearly => "yearly",
        }
    }
}

impl std::fmt::Display for PlanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "monthly" => Ok(PlanId::Monthly),
            "yearly" => Ok(PlanId::Yearly),
            other => Err(format!("unknown plan '{other}', expected 'monthly' or 'yearly'")),
        }
    }
}

/// Result of a purchase attempt at the provider.
///
/// User cancellation is a normal outcome here, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurchaseFlow {
    Completed(EntitlementSnapshot),
    Cancelled,
}

/// Every entitlement provider adapter implements this trait.
///
/// Adapters are shared (`&self` everywhere) and internally synchronized;
/// the reconciler holds one behind `Arc<dyn EntitlementClient>`.
#[async_trait]
pub trait EntitlementClient: Send + Sync {
    /// One-time provider setup for the session.
    ///
    /// Failure disables the remote path; it must be reported, never panic.
    async fn configure(&self, api_key: &str) -> Result<(), BillingError>;

    /// Fetch the provider's current view of this user.
    async fn fetch_snapshot(&self) -> Result<EntitlementSnapshot, BillingError>;

    /// The packages currently on sale, if the provider has an offering.
    async fn current_offering(&self) -> Result<Option<Offering>, BillingError>;

    /// Run the store purchase flow for one package.
    async fn purchase(&self, package: &Package) -> Result<PurchaseFlow, BillingError>;

    /// Re-sync previously owned purchases.
    async fn restore(&self) -> Result<EntitlementSnapshot, BillingError>;

    /// Register for provider-initiated snapshot pushes.
    ///
    /// Implementations may send at arbitrary times or never at all.
    fn subscribe_updates(&self, _updates: mpsc::UnboundedSender<EntitlementSnapshot>) {
        // default no-op
    }
}
