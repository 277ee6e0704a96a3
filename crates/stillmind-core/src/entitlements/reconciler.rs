//! Entitlement reconciliation: one authoritative answer to "what does this
//! user currently have?", merged from the billing provider and the local
//! trial window.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use crate::error::{BillingError, Result};
use crate::storage::{BillingConfig, KvStore};

use super::install;
use super::provider::{
    Entitlement, EntitlementClient, EntitlementSnapshot, Offering, Package, PackageType,
    PeriodType, PlanId, PurchaseFlow,
};
use super::state::SubscriptionState;
use super::store::SubscriptionStore;
use super::trial::TrialPolicy;

/// Injectable clock so time-dependent decisions stay testable.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// Where the remote billing path is in its once-per-session lifecycle.
///
/// `Offline` is sticky for normal reconciliation; only the bounded
/// purchase/restore retry attempts configuration again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderStatus {
    Unconfigured,
    Configuring,
    Online,
    Offline,
}

impl std::fmt::Display for ProviderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProviderStatus::Unconfigured => "unconfigured",
            ProviderStatus::Configuring => "configuring",
            ProviderStatus::Online => "online",
            ProviderStatus::Offline => "offline",
        };
        write!(f, "{}", s)
    }
}

/// What prompted a reconciliation. Provider-driven triggers carry the
/// snapshot the event already delivered, saving a refetch.
#[derive(Debug, Clone)]
pub enum ReconcileTrigger {
    Startup,
    ForegroundResume,
    ExplicitRefresh,
    PurchaseCompleted(EntitlementSnapshot),
    RestoreCompleted(EntitlementSnapshot),
    PushUpdate(EntitlementSnapshot),
}

impl ReconcileTrigger {
    fn supplied_snapshot(&self) -> Option<&EntitlementSnapshot> {
        match self {
            ReconcileTrigger::PurchaseCompleted(snapshot)
            | ReconcileTrigger::RestoreCompleted(snapshot)
            | ReconcileTrigger::PushUpdate(snapshot) => Some(snapshot),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            ReconcileTrigger::Startup => "startup",
            ReconcileTrigger::ForegroundResume => "foreground-resume",
            ReconcileTrigger::ExplicitRefresh => "explicit-refresh",
            ReconcileTrigger::PurchaseCompleted(_) => "purchase-completed",
            ReconcileTrigger::RestoreCompleted(_) => "restore-completed",
            ReconcileTrigger::PushUpdate(_) => "push-update",
        }
    }
}

/// Caller-visible result of a purchase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurchaseOutcome {
    /// The entitlement is active and the new state has been reconciled.
    Completed(SubscriptionState),
    /// The store accepted the purchase but the entitlement is not active
    /// yet (deferred approval, delayed settlement). Nothing was mutated.
    Pending,
    /// The user backed out. Nothing was mutated.
    Cancelled,
}

/// Caller-visible result of a restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    Restored(SubscriptionState),
    /// The provider knows no prior purchases for this user. Not an error.
    NothingToRestore,
}

/// Resolution strategies for mapping a plan onto a purchasable package,
/// tried in order, first match wins:
///
/// 1. package whose product id equals the configured id for the plan
/// 2. package slot named after the plan ("monthly" / "yearly")
/// 3. package of the matching store type
pub fn resolve_package(
    offering: Option<&Offering>,
    plan: PlanId,
    billing: &BillingConfig,
) -> Option<Package> {
    let offering = offering?;
    let product_id = match plan {
        PlanId::Monthly => billing.monthly_product_id.as_str(),
        PlanId::Yearly => billing.yearly_product_id.as_str(),
    };
    let package_type = match plan {
        PlanId::Monthly => PackageType::Monthly,
        PlanId::Yearly => PackageType::Annual,
    };

    let strategies: [&dyn Fn(&Offering) -> Option<&Package>; 3] = [
        &|o: &Offering| o.packages.iter().find(|p| p.product_id == product_id),
        &|o: &Offering| o.packages.iter().find(|p| p.identifier == plan.as_str()),
        &|o: &Offering| o.packages.iter().find(|p| p.package_type == package_type),
    ];

    strategies
        .iter()
        .find_map(|strategy| strategy(offering))
        .cloned()
}

/// The reconciliation core, wired once at the app's composition root.
///
/// At most one reconciliation runs at a time; concurrent triggers queue on
/// the internal gate and each still produces a state.
pub struct SubscriptionService {
    kv: Arc<dyn KvStore>,
    client: Arc<dyn EntitlementClient>,
    store: SubscriptionStore,
    policy: TrialPolicy,
    billing: BillingConfig,
    api_key: Option<String>,
    status: Mutex<ProviderStatus>,
    reconcile_gate: tokio::sync::Mutex<()>,
    clock: Clock,
}

impl SubscriptionService {
    pub fn new(
        kv: Arc<dyn KvStore>,
        client: Arc<dyn EntitlementClient>,
        policy: TrialPolicy,
        billing: BillingConfig,
        api_key: Option<String>,
    ) -> Self {
        let store = SubscriptionStore::new(kv.clone());
        Self {
            kv,
            client,
            store,
            policy,
            billing,
            api_key,
            status: Mutex::new(ProviderStatus::Unconfigured),
            reconcile_gate: tokio::sync::Mutex::new(()),
            clock: system_clock(),
        }
    }

    /// Replace the system clock with an injected one.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// The store holding the last reconciled state.
    pub fn store(&self) -> &SubscriptionStore {
        &self.store
    }

    /// Last known state, synchronously.
    pub fn subscription(&self) -> SubscriptionState {
        self.store.get()
    }

    pub fn provider_status(&self) -> ProviderStatus {
        *self.status.lock().unwrap()
    }

    /// Run the provider configuration for this session.
    ///
    /// A missing key or a rejected one leaves the remote path `Offline`;
    /// reconciliation then relies on the local trial alone. Already-online
    /// sessions return immediately.
    pub async fn configure_remote(&self) -> ProviderStatus {
        {
            let mut status = self.status.lock().unwrap();
            match *status {
                ProviderStatus::Online | ProviderStatus::Configuring => return *status,
                ProviderStatus::Unconfigured | ProviderStatus::Offline => {
                    *status = ProviderStatus::Configuring;
                }
            }
        }

        let next = match &self.api_key {
            None => {
                tracing::warn!("no billing api key, remote entitlements stay off this session");
                ProviderStatus::Offline
            }
            Some(key) => match self.client.configure(key).await {
                Ok(()) => ProviderStatus::Online,
                Err(e) => {
                    tracing::warn!("billing configuration failed: {}", e);
                    ProviderStatus::Offline
                }
            },
        };

        *self.status.lock().unwrap() = next;
        next
    }

    /// Cold-start sequence: install bookkeeping, stale state for immediate
    /// reads, provider configuration, then the first reconciliation.
    pub async fn startup(&self) -> SubscriptionState {
        let now = (self.clock)();
        if let Err(e) = install::ensure_install_date(self.kv.as_ref(), now) {
            tracing::warn!("failed to record install date: {}", e);
        }
        self.store.load_initial();
        self.configure_remote().await;
        self.reconcile(ReconcileTrigger::Startup).await
    }

    /// App came back to the foreground.
    pub async fn on_foreground(&self) -> SubscriptionState {
        self.reconcile(ReconcileTrigger::ForegroundResume).await
    }

    /// Caller-requested refresh.
    pub async fn refresh(&self) -> SubscriptionState {
        self.reconcile(ReconcileTrigger::ExplicitRefresh).await
    }

    /// Merge the provider's view with the local trial into one state,
    /// persist it, notify, and return it.
    ///
    /// The remote side wins whenever it reports an active entitlement; any
    /// failure on the remote path lands on the local trial evaluation, so
    /// this never errors and never leaves the state undefined.
    pub async fn reconcile(&self, trigger: ReconcileTrigger) -> SubscriptionState {
        let _in_flight = self.reconcile_gate.lock().await;
        let now = (self.clock)();

        let snapshot = if self.provider_status() != ProviderStatus::Online {
            None
        } else {
            match trigger.supplied_snapshot() {
                Some(snapshot) => Some(snapshot.clone()),
                None => self.fetch_snapshot_or_warn().await,
            }
        };

        let state = match select_entitlement(snapshot.as_ref(), &self.billing.entitlement_id, now)
        {
            Some((name, entitlement)) => {
                tracing::debug!("reconcile({}): remote entitlement '{}' wins", trigger.name(), name);
                SubscriptionState::active(
                    entitlement.product_id.clone(),
                    entitlement.period_type == PeriodType::Trial,
                    Some(entitlement.purchase_date),
                    entitlement.expires_date,
                )
            }
            None => {
                let state = self.policy.evaluate(self.install_date(now), now);
                tracing::debug!(
                    "reconcile({}): local evaluation, subscribed={}",
                    trigger.name(),
                    state.is_subscribed
                );
                state
            }
        };

        self.store.set(state.clone());
        state
    }

    /// Run the purchase flow for one of the app's plans.
    ///
    /// An unconfigured session gets exactly one configuration attempt before
    /// failing. Cancellation and a store-accepted-but-not-yet-active
    /// purchase are outcomes, not errors; neither mutates the stored state.
    pub async fn purchase(&self, plan: PlanId) -> Result<PurchaseOutcome> {
        self.ensure_online_once().await?;

        let offering = self.client.current_offering().await?;
        let package = resolve_package(offering.as_ref(), plan, &self.billing)
            .ok_or_else(|| BillingError::PlanNotOffered(plan.as_str().to_string()))?;

        match self.client.purchase(&package).await? {
            PurchaseFlow::Cancelled => Ok(PurchaseOutcome::Cancelled),
            PurchaseFlow::Completed(snapshot) => {
                let now = (self.clock)();
                if snapshot.active(&self.billing.entitlement_id, now).is_some() {
                    let state = self
                        .reconcile(ReconcileTrigger::PurchaseCompleted(snapshot))
                        .await;
                    Ok(PurchaseOutcome::Completed(state))
                } else {
                    tracing::warn!(
                        "purchase accepted but entitlement '{}' not active yet",
                        self.billing.entitlement_id
                    );
                    Ok(PurchaseOutcome::Pending)
                }
            }
        }
    }

    /// Re-sync previously owned purchases from the provider.
    pub async fn restore(&self) -> Result<RestoreOutcome> {
        self.ensure_online_once().await?;

        let snapshot = self.client.restore().await?;
        let now = (self.clock)();
        if snapshot.has_any_active(now) {
            let state = self
                .reconcile(ReconcileTrigger::RestoreCompleted(snapshot))
                .await;
            Ok(RestoreOutcome::Restored(state))
        } else {
            Ok(RestoreOutcome::NothingToRestore)
        }
    }

    /// Wire provider-initiated updates into reconciliation.
    ///
    /// Pushes may arrive at arbitrary times or never; each one queues behind
    /// whatever reconciliation is in flight.
    pub fn spawn_push_listener(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        self.client.subscribe_updates(tx);
        let service = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(snapshot) = rx.recv().await {
                service.reconcile(ReconcileTrigger::PushUpdate(snapshot)).await;
            }
        })
    }

    /// The bounded retry: one configuration attempt, then fail.
    async fn ensure_online_once(&self) -> std::result::Result<(), BillingError> {
        if self.provider_status() == ProviderStatus::Online {
            return Ok(());
        }
        if self.configure_remote().await == ProviderStatus::Online {
            return Ok(());
        }
        Err(BillingError::NotConfigured)
    }

    async fn fetch_snapshot_or_warn(&self) -> Option<EntitlementSnapshot> {
        match self.client.fetch_snapshot().await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                tracing::warn!("entitlement fetch failed, using local evaluation: {}", e);
                None
            }
        }
    }

    fn install_date(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match install::ensure_install_date(self.kv.as_ref(), now) {
            Ok(date) => Some(date),
            Err(e) => {
                tracing::warn!("install date unavailable, no local trial: {}", e);
                None
            }
        }
    }
}

/// Pick the winning remote entitlement: the configured one when active,
/// otherwise the first active entitlement in key order.
fn select_entitlement<'a>(
    snapshot: Option<&'a EntitlementSnapshot>,
    entitlement_id: &str,
    now: DateTime<Utc>,
) -> Option<(&'a str, &'a Entitlement)> {
    let snapshot = snapshot?;
    if let Some((name, entitlement)) = snapshot.entitlements.get_key_value(entitlement_id) {
        if entitlement.is_active(now) {
            return Some((name.as_str(), entitlement));
        }
    }
    snapshot.first_active(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn billing() -> BillingConfig {
        BillingConfig::default()
    }

    fn package(identifier: &str, package_type: PackageType, product_id: &str) -> Package {
        Package {
            identifier: identifier.to_string(),
            package_type,
            product_id: product_id.to_string(),
        }
    }

    fn offering(packages: Vec<Package>) -> Offering {
        Offering {
            identifier: "default".to_string(),
            packages,
        }
    }

    #[test]
    fn resolves_by_exact_product_id_first() {
        let offering = offering(vec![
            package("yearly", PackageType::Annual, "stillmind.premium.yearly"),
            package("decoy", PackageType::Monthly, "stillmind.premium.monthly"),
        ]);

        let found = resolve_package(Some(&offering), PlanId::Monthly, &billing()).unwrap();
        assert_eq!(found.identifier, "decoy");
    }

    #[test]
    fn falls_back_to_plan_named_slot() {
        let offering = offering(vec![
            package("monthly", PackageType::Custom, "legacy.monthly.v1"),
            package("other", PackageType::Monthly, "legacy.monthly.v2"),
        ]);

        let found = resolve_package(Some(&offering), PlanId::Monthly, &billing()).unwrap();
        assert_eq!(found.product_id, "legacy.monthly.v1");
    }

    #[test]
    fn falls_back_to_package_type_last() {
        let offering = offering(vec![
            package("promo", PackageType::Annual, "legacy.yearly.v1"),
            package("extra", PackageType::Lifetime, "legacy.lifetime"),
        ]);

        let found = resolve_package(Some(&offering), PlanId::Yearly, &billing()).unwrap();
        assert_eq!(found.product_id, "legacy.yearly.v1");
    }

    #[test]
    fn unresolvable_plan_yields_none() {
        let offering = offering(vec![package("lifetime", PackageType::Lifetime, "legacy.lifetime")]);

        assert!(resolve_package(Some(&offering), PlanId::Yearly, &billing()).is_none());
        assert!(resolve_package(None, PlanId::Yearly, &billing()).is_none());
    }

    #[test]
    fn selects_configured_entitlement_over_key_order() {
        let now = chrono::Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let later = now + chrono::Duration::days(30);
        let mut snapshot = EntitlementSnapshot::default();
        snapshot.entitlements.insert(
            "aaa_bonus".to_string(),
            Entitlement {
                product_id: "bonus".to_string(),
                period_type: PeriodType::Normal,
                purchase_date: now,
                expires_date: Some(later),
            },
        );
        snapshot.entitlements.insert(
            "premium".to_string(),
            Entitlement {
                product_id: "stillmind.premium.yearly".to_string(),
                period_type: PeriodType::Normal,
                purchase_date: now,
                expires_date: Some(later),
            },
        );

        let (name, _) = select_entitlement(Some(&snapshot), "premium", now).unwrap();
        assert_eq!(name, "premium");
    }

    #[test]
    fn selects_first_active_when_configured_entitlement_expired() {
        let now = chrono::Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let mut snapshot = EntitlementSnapshot::default();
        snapshot.entitlements.insert(
            "premium".to_string(),
            Entitlement {
                product_id: "stillmind.premium.yearly".to_string(),
                period_type: PeriodType::Normal,
                purchase_date: now - chrono::Duration::days(400),
                expires_date: Some(now - chrono::Duration::days(35)),
            },
        );
        snapshot.entitlements.insert(
            "zz_grandfathered".to_string(),
            Entitlement {
                product_id: "legacy.unlock".to_string(),
                period_type: PeriodType::Normal,
                purchase_date: now - chrono::Duration::days(900),
                expires_date: None,
            },
        );

        let (name, entitlement) = select_entitlement(Some(&snapshot), "premium", now).unwrap();
        assert_eq!(name, "zz_grandfathered");
        assert_eq!(entitlement.product_id, "legacy.unlock");
    }
}
