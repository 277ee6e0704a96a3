//! The subscription state exposed to the rest of the app.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Plan id recorded when access comes from the local fallback trial.
pub const TRIAL_PLAN_ID: &str = "trial";

/// The single access decision the app consumes.
///
/// The record is kept internally consistent by its constructors:
/// no access implies no trial flag and no plan id, and the expiry date never
/// precedes the original purchase date. Records read back from storage are
/// re-checked with [`SubscriptionState::is_valid`] before use.
///
/// Serialized with camelCase field names; the persisted record is shared
/// with the mobile shells.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionState {
    /// True if the user currently has any paid or trial access.
    pub is_subscribed: bool,
    /// True if the active access is a trial (remote trial period or local
    /// fallback trial); false for a fully paid entitlement.
    pub is_free_trial: bool,
    /// End of the current access window; `None` if indefinite or unknown.
    pub expiry_date: Option<DateTime<Utc>>,
    /// Plan or product granting access; `None` if no access.
    pub plan_id: Option<String>,
    /// Start of the current access window.
    pub original_purchase_date: Option<DateTime<Utc>>,
}

impl SubscriptionState {
    /// The "no access" state.
    pub fn none() -> Self {
        Self {
            is_subscribed: false,
            is_free_trial: false,
            expiry_date: None,
            plan_id: None,
            original_purchase_date: None,
        }
    }

    /// An active access window.
    ///
    /// An expiry earlier than the purchase date is dropped to `None`
    /// ("unknown end") rather than stored inverted.
    pub fn active(
        plan_id: impl Into<String>,
        is_free_trial: bool,
        original_purchase_date: Option<DateTime<Utc>>,
        expiry_date: Option<DateTime<Utc>>,
    ) -> Self {
        let expiry_date = match (original_purchase_date, expiry_date) {
            (Some(start), Some(end)) if end < start => None,
            (_, end) => end,
        };
        Self {
            is_subscribed: true,
            is_free_trial,
            expiry_date,
            plan_id: Some(plan_id.into()),
            original_purchase_date,
        }
    }

    /// The state granted by the device-local trial.
    pub fn local_trial(start: DateTime<Utc>, expiry: DateTime<Utc>) -> Self {
        Self::active(TRIAL_PLAN_ID, true, Some(start), Some(expiry))
    }

    /// Whether a record (typically one read back from storage) still honors
    /// the struct's invariants.
    pub fn is_valid(&self) -> bool {
        if !self.is_subscribed && (self.is_free_trial || self.plan_id.is_some()) {
            return false;
        }
        if let (Some(start), Some(end)) = (self.original_purchase_date, self.expiry_date) {
            if end < start {
                return false;
            }
        }
        true
    }
}

impl Default for SubscriptionState {
    fn default() -> Self {
        Self::none()
    }
}
