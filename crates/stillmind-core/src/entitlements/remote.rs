//! HTTP adapter for the Stillmind billing gateway.
//!
//! The gateway proxies the store-side billing provider and exposes a small
//! subscriber API: current entitlements, the packages on sale, purchase and
//! restore. Every call is bounded by the configured request timeout; a timed
//! out or failed request surfaces as a [`BillingError`] and the reconciler
//! treats it as "remote unavailable".

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{BillingError, ConfigError};
use crate::storage::BillingConfig;

use super::provider::{
    EntitlementClient, EntitlementSnapshot, Offering, Package, PurchaseFlow,
};

/// Client for the billing gateway's subscriber API.
///
/// The API key arrives via [`EntitlementClient::configure`]; calls made
/// before a successful configuration fail with
/// [`BillingError::NotConfigured`].
pub struct RemoteBillingClient {
    http: reqwest::Client,
    base: String,
    app_user_id: String,
    api_key: Mutex<Option<String>>,
}

#[derive(Debug, Deserialize)]
struct SubscriberResponse {
    subscriber: EntitlementSnapshot,
}

#[derive(Debug, Deserialize)]
struct OfferingsResponse {
    current_offering: Option<Offering>,
}

#[derive(Debug, Deserialize)]
struct PurchaseResponse {
    status: String,
    subscriber: Option<EntitlementSnapshot>,
}

impl RemoteBillingClient {
    /// Build a client for one subscriber.
    ///
    /// # Errors
    /// Returns an error if the configured base URL does not parse or the
    /// HTTP client cannot be constructed.
    pub fn new(cfg: &BillingConfig, app_user_id: String) -> crate::error::Result<Self> {
        url::Url::parse(&cfg.base_url).map_err(|e| ConfigError::InvalidValue {
            key: "billing.base_url".to_string(),
            message: e.to_string(),
        })?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.fetch_timeout_secs))
            .build()
            .map_err(BillingError::from)?;

        Ok(Self {
            http,
            base: cfg.base_url.trim_end_matches('/').to_string(),
            app_user_id,
            api_key: Mutex::new(None),
        })
    }

    fn key(&self) -> Result<String, BillingError> {
        self.api_key
            .lock()
            .unwrap()
            .clone()
            .ok_or(BillingError::NotConfigured)
    }

    fn subscriber_url(&self) -> String {
        format!("{}/subscribers/{}", self.base, self.app_user_id)
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, BillingError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let message = resp.text().await.unwrap_or_default();
        Err(BillingError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl EntitlementClient for RemoteBillingClient {
    async fn configure(&self, api_key: &str) -> Result<(), BillingError> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(BillingError::MissingApiKey);
        }
        *self.api_key.lock().unwrap() = Some(api_key.to_string());
        Ok(())
    }

    async fn fetch_snapshot(&self) -> Result<EntitlementSnapshot, BillingError> {
        let key = self.key()?;
        let resp = self
            .http
            .get(self.subscriber_url())
            .bearer_auth(&key)
            .send()
            .await?;
        let body: SubscriberResponse = Self::check(resp).await?.json().await?;
        Ok(body.subscriber)
    }

    async fn current_offering(&self) -> Result<Option<Offering>, BillingError> {
        let key = self.key()?;
        let url = format!("{}/offerings", self.subscriber_url());
        let resp = self.http.get(&url).bearer_auth(&key).send().await?;
        let body: OfferingsResponse = Self::check(resp).await?.json().await?;
        Ok(body.current_offering)
    }

    async fn purchase(&self, package: &Package) -> Result<PurchaseFlow, BillingError> {
        let key = self.key()?;
        let url = format!("{}/purchases", self.subscriber_url());
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&key)
            .json(&serde_json::json!({
                "product_id": package.product_id,
                "package_identifier": package.identifier,
            }))
            .send()
            .await?;
        let body: PurchaseResponse = Self::check(resp).await?.json().await?;

        match body.status.as_str() {
            "cancelled" => Ok(PurchaseFlow::Cancelled),
            "completed" => {
                let subscriber = body.subscriber.ok_or_else(|| {
                    BillingError::MalformedResponse(
                        "purchase completed without a subscriber snapshot".to_string(),
                    )
                })?;
                Ok(PurchaseFlow::Completed(subscriber))
            }
            other => Err(BillingError::MalformedResponse(format!(
                "unknown purchase status '{other}'"
            ))),
        }
    }

    async fn restore(&self) -> Result<EntitlementSnapshot, BillingError> {
        let key = self.key()?;
        let url = format!("{}/restore", self.subscriber_url());
        let resp = self.http.post(&url).bearer_auth(&key).send().await?;
        let body: SubscriberResponse = Self::check(resp).await?.json().await?;
        Ok(body.subscriber)
    }
}
