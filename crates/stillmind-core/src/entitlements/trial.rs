//! Local fallback trial evaluation.
//!
//! When no remote entitlement is present (or the provider is unreachable),
//! access is decided by a device-local trial window measured from the first
//! launch. Evaluation is a pure function of the install date and the caller's
//! clock, so every edge can be unit-tested by injecting `now`.

use chrono::{DateTime, Duration, Utc};

use crate::entitlements::state::SubscriptionState;
use crate::storage::TrialConfig;

/// Policy for the device-local trial window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrialPolicy {
    window: Duration,
}

impl TrialPolicy {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    pub fn from_days(days: i64) -> Self {
        Self::new(Duration::days(days))
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Derive the access granted by the local trial alone.
    ///
    /// An absent install date never grants a trial. The window closes at
    /// exactly `install + window`: one monotonic transition, after which the
    /// result is "no access" forever.
    pub fn evaluate(
        &self,
        install_date: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> SubscriptionState {
        let Some(install) = install_date else {
            return SubscriptionState::none();
        };

        if now - install < self.window {
            SubscriptionState::local_trial(install, install + self.window)
        } else {
            SubscriptionState::none()
        }
    }
}

impl Default for TrialPolicy {
    fn default() -> Self {
        Self::from_days(3)
    }
}

impl From<&TrialConfig> for TrialPolicy {
    fn from(cfg: &TrialConfig) -> Self {
        Self::from_days(cfg.window_days)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn install() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn active_one_second_before_window_closes() {
        let policy = TrialPolicy::from_days(3);
        let now = install() + Duration::days(3) - Duration::seconds(1);
        let state = policy.evaluate(Some(install()), now);
        assert!(state.is_subscribed);
        assert!(state.is_free_trial);
    }

    #[test]
    fn expired_one_second_after_window_closes() {
        let policy = TrialPolicy::from_days(3);
        let now = install() + Duration::days(3) + Duration::seconds(1);
        let state = policy.evaluate(Some(install()), now);
        assert_eq!(state, SubscriptionState::none());
    }

    #[test]
    fn expired_at_exactly_the_window() {
        let policy = TrialPolicy::from_days(3);
        let now = install() + Duration::days(3);
        assert_eq!(policy.evaluate(Some(install()), now), SubscriptionState::none());
    }

    #[test]
    fn no_install_date_never_grants_a_trial() {
        let policy = TrialPolicy::from_days(3);
        assert_eq!(policy.evaluate(None, install()), SubscriptionState::none());
        assert_eq!(
            policy.evaluate(None, install() + Duration::days(400)),
            SubscriptionState::none()
        );
    }

    #[test]
    fn trial_state_fields_reflect_the_window() {
        let policy = TrialPolicy::from_days(3);
        let now = install() + Duration::hours(1);
        let state = policy.evaluate(Some(install()), now);
        assert_eq!(state.plan_id.as_deref(), Some("trial"));
        assert_eq!(state.original_purchase_date, Some(install()));
        assert_eq!(state.expiry_date, Some(install() + Duration::days(3)));
    }

    #[test]
    fn window_length_comes_from_config() {
        let policy = TrialPolicy::from(&TrialConfig { window_days: 7 });
        let now = install() + Duration::days(5);
        assert!(policy.evaluate(Some(install()), now).is_subscribed);
        assert_eq!(policy.window(), Duration::days(7));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Once the trial has lapsed it never comes back: for any pair of
        /// instants, access at the later one implies access at the earlier.
        #[test]
        fn single_monotonic_transition(
            window_days in 1i64..30,
            earlier_secs in 0i64..5_000_000,
            later_delta_secs in 0i64..5_000_000,
        ) {
            let policy = TrialPolicy::from_days(window_days);
            let earlier = install() + Duration::seconds(earlier_secs);
            let later = earlier + Duration::seconds(later_delta_secs);

            let at_earlier = policy.evaluate(Some(install()), earlier).is_subscribed;
            let at_later = policy.evaluate(Some(install()), later).is_subscribed;

            prop_assert!(at_earlier || !at_later);
        }

        #[test]
        fn transition_happens_exactly_at_the_window(
            window_days in 1i64..30,
            offset_secs in 0i64..5_000_000,
        ) {
            let policy = TrialPolicy::from_days(window_days);
            let now = install() + Duration::seconds(offset_secs);
            let state = policy.evaluate(Some(install()), now);

            let inside = offset_secs < window_days * 86_400;
            prop_assert_eq!(state.is_subscribed, inside);
            prop_assert_eq!(state.is_free_trial, inside);
        }
    }
}
