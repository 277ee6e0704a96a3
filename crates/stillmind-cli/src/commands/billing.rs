//! Billing subcommand: subscription status, refresh, purchase, restore and
//! API key management.

use std::sync::Arc;

use clap::Subcommand;
use stillmind_core::entitlements::{
    ensure_app_user_id, PlanId, PurchaseOutcome, RemoteBillingClient, RestoreOutcome,
    SubscriptionService, SubscriptionStore, TrialPolicy,
};
use stillmind_core::storage::{secrets, Config, FileKvStore, KvStore};
use stillmind_core::SubscriptionState;

#[derive(Subcommand)]
pub enum BillingAction {
    /// Show the last known subscription state
    Status {
        /// Print the raw state as JSON
        #[arg(long)]
        json: bool,
    },
    /// Reconcile against the billing provider now
    Refresh,
    /// Purchase a subscription plan
    Purchase {
        /// Plan to purchase (monthly, yearly)
        #[arg(long)]
        plan: String,
    },
    /// Restore previously owned purchases
    Restore,
    /// Billing API key management
    Key {
        #[command(subcommand)]
        action: KeyAction,
    },
}

#[derive(Subcommand)]
pub enum KeyAction {
    /// Store the billing API key in the OS keychain
    Set {
        /// The API key
        key: String,
    },
    /// Remove the stored key
    Clear,
    /// Check whether a key is stored
    Status,
}

pub fn run(action: BillingAction) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        BillingAction::Status { json } => show_status(json),
        BillingAction::Refresh => refresh(),
        BillingAction::Purchase { plan } => purchase(&plan),
        BillingAction::Restore => restore(),
        BillingAction::Key { action } => manage_key(action),
    }
}

/// Reads only local storage, so it works offline and without a key.
fn show_status(json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let kv: Arc<dyn KvStore> = Arc::new(FileKvStore::open_default()?);
    let store = SubscriptionStore::new(kv);
    store.load_initial();
    let state = store.get();
    if json {
        println!("{}", serde_json::to_string_pretty(&state)?);
    } else {
        print_state(&state);
    }
    Ok(())
}

fn refresh() -> Result<(), Box<dyn std::error::Error>> {
    let service = build_service()?;
    let runtime = tokio::runtime::Runtime::new()?;
    let state = runtime.block_on(async {
        service.configure_remote().await;
        service.refresh().await
    });
    print_state(&state);
    Ok(())
}

fn purchase(plan: &str) -> Result<(), Box<dyn std::error::Error>> {
    let plan: PlanId = plan.parse()?;
    let service = build_service()?;
    let runtime = tokio::runtime::Runtime::new()?;
    match runtime.block_on(service.purchase(plan))? {
        PurchaseOutcome::Completed(state) => {
            println!("purchase complete");
            print_state(&state);
        }
        PurchaseOutcome::Pending => println!("purchase pending, entitlement not active yet"),
        PurchaseOutcome::Cancelled => println!("purchase cancelled"),
    }
    Ok(())
}

fn restore() -> Result<(), Box<dyn std::error::Error>> {
    let service = build_service()?;
    let runtime = tokio::runtime::Runtime::new()?;
    match runtime.block_on(service.restore())? {
        RestoreOutcome::Restored(state) => {
            println!("purchases restored");
            print_state(&state);
        }
        RestoreOutcome::NothingToRestore => println!("nothing to restore"),
    }
    Ok(())
}

fn manage_key(action: KeyAction) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        KeyAction::Set { key } => {
            let trimmed = key.trim();
            if trimmed.is_empty() {
                return Err("refusing to store an empty key".into());
            }
            secrets::set(secrets::BILLING_API_KEY, trimmed)?;
            println!("key stored");
        }
        KeyAction::Clear => {
            secrets::delete(secrets::BILLING_API_KEY)?;
            println!("key cleared");
        }
        KeyAction::Status => match secrets::get(secrets::BILLING_API_KEY)? {
            Some(_) => println!("key present"),
            None => println!("no key stored"),
        },
    }
    Ok(())
}

fn build_service() -> Result<SubscriptionService, Box<dyn std::error::Error>> {
    let config = Config::load_or_default();
    let kv: Arc<dyn KvStore> = Arc::new(FileKvStore::open_default()?);
    let app_user_id = ensure_app_user_id(kv.as_ref())?;
    let client = Arc::new(RemoteBillingClient::new(&config.billing, app_user_id)?);
    let api_key = secrets::get(secrets::BILLING_API_KEY)?;
    Ok(SubscriptionService::new(
        kv,
        client,
        TrialPolicy::from(&config.trial),
        config.billing,
        api_key,
    ))
}

fn print_state(state: &SubscriptionState) {
    if !state.is_subscribed {
        println!("no active subscription");
        return;
    }
    if state.is_free_trial {
        println!("free trial");
    } else {
        println!("subscribed");
    }
    if let Some(plan) = &state.plan_id {
        println!("plan: {plan}");
    }
    if let Some(expiry) = state.expiry_date {
        let left = expiry - chrono::Utc::now();
        if left > chrono::Duration::zero() {
            println!("expires: {} ({} days left)", expiry.to_rfc3339(), left.num_days());
        } else {
            println!("expired: {}", expiry.to_rfc3339());
        }
    }
}
