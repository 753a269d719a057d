//! Billing Status Collaborator backed by the Stripe REST API.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::subscriber::{BillingStatus, SubscriptionStatus};

const STRIPE_API: &str = "https://api.stripe.com/v1";

#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    #[error("Stripe not configured")]
    NotConfigured,
    #[error("Stripe request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Stripe returned HTTP {status}: {message}")]
    Api { status: u16, message: String },
}

impl From<BillingError> for AppError {
    fn from(e: BillingError) -> Self {
        AppError::Upstream(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RedirectKind {
    Checkout,
    Portal,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BillingRedirect {
    pub url: String,
    pub kind: RedirectKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[async_trait]
pub trait BillingProvider: Send + Sync {
    /// Normalized status for the customer behind `email`.
    async fn check_status(&self, email: &str) -> Result<SubscriptionStatus, BillingError>;

    /// Billing portal when the customer has any subscription (even a
    /// delinquent or canceled one), otherwise a fresh monthly checkout.
    async fn checkout_or_portal(
        &self,
        email: &str,
        origin: &str,
    ) -> Result<BillingRedirect, BillingError>;
}

#[derive(Debug, Deserialize)]
struct List<T> {
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct Customer {
    id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct StripeSubscription {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub current_period_end: Option<i64>,
    #[serde(default)]
    pub latest_invoice: Option<InvoiceRef>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum InvoiceRef {
    Expanded(Invoice),
    Id(String),
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Invoice {
    #[allow(dead_code)]
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub hosted_invoice_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RedirectSession {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Highest-priority subscription; unrecognized statuses sort last.
pub(crate) fn select_subscription(mut subs: Vec<StripeSubscription>) -> Option<StripeSubscription> {
    subs.sort_by_key(|s| BillingStatus::from_stripe(&s.status).priority());
    subs.into_iter().next()
}

fn first_hosted_url(invoices: &[Invoice]) -> Option<String> {
    invoices.iter().find_map(|i| i.hosted_invoice_url.clone())
}

fn pending_hosted_url(invoices: &[Invoice]) -> Option<String> {
    invoices
        .iter()
        .filter(|i| matches!(i.status.as_deref(), Some("open") | Some("draft")))
        .find_map(|i| i.hosted_invoice_url.clone())
}

fn timestamp(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

pub struct StripeBilling {
    client: reqwest::Client,
    secret_key: String,
    monthly_cents: i64,
    currency: String,
}

impl StripeBilling {
    pub fn new(secret_key: impl Into<String>, monthly_cents: i64, currency: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            secret_key: secret_key.into(),
            monthly_cents,
            currency: currency.into(),
        }
    }

    fn ensure_configured(&self) -> Result<(), BillingError> {
        if self.secret_key.is_empty() {
            Err(BillingError::NotConfigured)
        } else {
            Ok(())
        }
    }

    async fn read<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, BillingError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorBody>(&body)
                .map(|b| b.error.message)
                .unwrap_or(body);
            return Err(BillingError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json().await?)
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, BillingError> {
        let response = self
            .client
            .get(format!("{}{}", STRIPE_API, path))
            .header("Authorization", format!("Bearer {}", self.secret_key))
            .query(query)
            .send()
            .await?;
        Self::read(response).await
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        form: &[(&str, &str)],
    ) -> Result<T, BillingError> {
        let response = self
            .client
            .post(format!("{}{}", STRIPE_API, path))
            .header("Authorization", format!("Bearer {}", self.secret_key))
            .form(form)
            .send()
            .await?;
        Self::read(response).await
    }

    async fn find_customer(&self, email: &str, limit: &str) -> Result<Option<String>, BillingError> {
        let customers: List<Customer> = self
            .get("/customers", &[("email", email), ("limit", limit)])
            .await?;
        Ok(customers.data.into_iter().next().map(|c| c.id))
    }

    async fn invoices(&self, query: &[(&str, &str)]) -> Vec<Invoice> {
        match self.get::<List<Invoice>>("/invoices", query).await {
            Ok(list) => list.data,
            Err(e) => {
                tracing::warn!(error = %e, "Invoice lookup failed");
                Vec::new()
            }
        }
    }

    /// latest invoice, then open, then draft invoices of the subscription,
    /// then any pending invoice of the customer.
    async fn resolve_invoice_url(
        &self,
        customer_id: &str,
        subscription: &StripeSubscription,
    ) -> Option<String> {
        match &subscription.latest_invoice {
            Some(InvoiceRef::Expanded(invoice)) => {
                if let Some(url) = &invoice.hosted_invoice_url {
                    return Some(url.clone());
                }
            }
            Some(InvoiceRef::Id(invoice_id)) => {
                tracing::debug!(
                    invoice_id = %invoice_id,
                    subscription_id = %subscription.id,
                    "Latest invoice not expanded, searching pending invoices"
                );
            }
            None => {}
        }

        for status in ["open", "draft"] {
            let invoices = self
                .invoices(&[
                    ("customer", customer_id),
                    ("subscription", subscription.id.as_str()),
                    ("status", status),
                    ("limit", "10"),
                ])
                .await;
            if let Some(url) = first_hosted_url(&invoices) {
                return Some(url);
            }
        }

        let any = self
            .invoices(&[("customer", customer_id), ("limit", "10")])
            .await;
        pending_hosted_url(&any)
    }
}

#[async_trait]
impl BillingProvider for StripeBilling {
    async fn check_status(&self, email: &str) -> Result<SubscriptionStatus, BillingError> {
        self.ensure_configured()?;

        let Some(customer_id) = self.find_customer(email, "100").await? else {
            tracing::debug!(email = %email, "No Stripe customer");
            return Ok(SubscriptionStatus::none());
        };

        let subs: List<StripeSubscription> = self
            .get(
                "/subscriptions",
                &[
                    ("customer", customer_id.as_str()),
                    ("status", "all"),
                    ("limit", "100"),
                    ("expand[]", "data.latest_invoice"),
                ],
            )
            .await?;

        let mut result = SubscriptionStatus {
            stripe_customer_id: Some(customer_id.clone()),
            ..SubscriptionStatus::none()
        };

        let Some(subscription) = select_subscription(subs.data) else {
            return Ok(result);
        };

        let status = BillingStatus::from_stripe(&subscription.status);
        result.status = Some(status);
        result.stripe_subscription_id = Some(subscription.id.clone());
        result.subscribed = status.is_paying();

        if status.is_paying() || status.has_payment_issue() {
            result.period_end = subscription.current_period_end.and_then(timestamp);
        }
        if status.has_payment_issue() {
            result.invoice_url = self.resolve_invoice_url(&customer_id, &subscription).await;
        }

        tracing::info!(
            email = %email,
            status = status.as_str(),
            has_invoice_url = result.invoice_url.is_some(),
            "Billing status resolved"
        );
        Ok(result)
    }

    async fn checkout_or_portal(
        &self,
        email: &str,
        origin: &str,
    ) -> Result<BillingRedirect, BillingError> {
        self.ensure_configured()?;

        let customer_id = self.find_customer(email, "1").await?;

        if let Some(customer_id) = &customer_id {
            let subs: List<StripeSubscription> = self
                .get(
                    "/subscriptions",
                    &[("customer", customer_id.as_str()), ("status", "all"), ("limit", "5")],
                )
                .await?;

            if !subs.data.is_empty() {
                let return_url = format!("{}/admin", origin);
                let session: RedirectSession = self
                    .post(
                        "/billing_portal/sessions",
                        &[("customer", customer_id.as_str()), ("return_url", return_url.as_str())],
                    )
                    .await?;
                return Ok(BillingRedirect {
                    url: session.url,
                    kind: RedirectKind::Portal,
                    message: Some("Redirecionando para gerenciar sua assinatura existente".into()),
                });
            }
        }

        let amount = self.monthly_cents.to_string();
        let success_url = format!("{}/admin?payment=success", origin);
        let cancel_url = format!("{}/admin?payment=cancelled", origin);

        let mut form: Vec<(&str, &str)> = vec![
            ("mode", "subscription"),
            ("line_items[0][quantity]", "1"),
            ("line_items[0][price_data][currency]", self.currency.as_str()),
            ("line_items[0][price_data][unit_amount]", amount.as_str()),
            ("line_items[0][price_data][recurring][interval]", "month"),
            ("line_items[0][price_data][product_data][name]", "Plano Mensal Premium"),
            (
                "line_items[0][price_data][product_data][description]",
                "Acesso completo ao painel administrativo e recursos premium",
            ),
            ("success_url", success_url.as_str()),
            ("cancel_url", cancel_url.as_str()),
            ("locale", "pt-BR"),
            (
                "custom_text[submit][message]",
                "Sua assinatura será renovada automaticamente todo mês. Você pode cancelar a qualquer momento.",
            ),
        ];
        match &customer_id {
            Some(id) => form.push(("customer", id.as_str())),
            None => form.push(("customer_email", email)),
        }

        let session: RedirectSession = self.post("/checkout/sessions", &form).await?;
        Ok(BillingRedirect {
            url: session.url,
            kind: RedirectKind::Checkout,
            message: None,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Scripted [`BillingProvider`]; pops one result per `check_status` call
    /// and repeats the last one when the script runs out.
    pub(crate) struct ScriptedBilling {
        pub results: Mutex<Vec<Result<SubscriptionStatus, String>>>,
        pub calls: Mutex<u32>,
    }

    impl ScriptedBilling {
        pub(crate) fn new(results: Vec<Result<SubscriptionStatus, String>>) -> Self {
            Self {
                results: Mutex::new(results),
                calls: Mutex::new(0),
            }
        }

        pub(crate) fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl BillingProvider for ScriptedBilling {
        async fn check_status(&self, _email: &str) -> Result<SubscriptionStatus, BillingError> {
            *self.calls.lock().unwrap() += 1;
            let mut results = self.results.lock().unwrap();
            let next = if results.len() > 1 {
                results.remove(0)
            } else {
                results
                    .first()
                    .cloned()
                    .unwrap_or_else(|| Ok(SubscriptionStatus::none()))
            };
            next.map_err(|message| BillingError::Api {
                status: 500,
                message,
            })
        }

        async fn checkout_or_portal(
            &self,
            _email: &str,
            origin: &str,
        ) -> Result<BillingRedirect, BillingError> {
            Ok(BillingRedirect {
                url: format!("{}/checkout", origin),
                kind: RedirectKind::Checkout,
                message: None,
            })
        }
    }

    pub(crate) fn status(billing: BillingStatus, invoice_url: Option<&str>) -> SubscriptionStatus {
        SubscriptionStatus {
            subscribed: billing.is_paying(),
            status: Some(billing),
            invoice_url: invoice_url.map(str::to_string),
            ..SubscriptionStatus::none()
        }
    }

    fn sub(id: &str, status: &str) -> StripeSubscription {
        StripeSubscription {
            id: id.into(),
            status: status.into(),
            current_period_end: None,
            latest_invoice: None,
        }
    }

    #[test]
    fn test_select_prefers_active_over_newer_canceled() {
        let picked = select_subscription(vec![
            sub("sub_old", "canceled"),
            sub("sub_weird", "paused"),
            sub("sub_due", "past_due"),
            sub("sub_live", "active"),
        ])
        .unwrap();
        assert_eq!(picked.id, "sub_live");

        let picked = select_subscription(vec![sub("a", "paused"), sub("b", "incomplete_expired")]).unwrap();
        assert_eq!(picked.id, "b");
        assert!(select_subscription(Vec::new()).is_none());
    }

    #[test]
    fn test_latest_invoice_parses_expanded_or_id() {
        let expanded: StripeSubscription = serde_json::from_str(
            r#"{"id":"sub_1","status":"past_due","latest_invoice":{"id":"in_1","status":"open","hosted_invoice_url":"https://pay/in_1"}}"#,
        )
        .unwrap();
        assert!(matches!(expanded.latest_invoice, Some(InvoiceRef::Expanded(ref i)) if i.hosted_invoice_url.as_deref() == Some("https://pay/in_1")));

        let bare: StripeSubscription =
            serde_json::from_str(r#"{"id":"sub_1","status":"unpaid","latest_invoice":"in_2"}"#).unwrap();
        assert!(matches!(bare.latest_invoice, Some(InvoiceRef::Id(ref id)) if id == "in_2"));
    }

    #[test]
    fn test_pending_url_skips_paid_invoices() {
        let invoices = vec![
            Invoice {
                id: "in_paid".into(),
                status: Some("paid".into()),
                hosted_invoice_url: Some("https://pay/paid".into()),
            },
            Invoice {
                id: "in_draft".into(),
                status: Some("draft".into()),
                hosted_invoice_url: Some("https://pay/draft".into()),
            },
        ];
        assert_eq!(pending_hosted_url(&invoices).as_deref(), Some("https://pay/draft"));
        assert_eq!(first_hosted_url(&invoices).as_deref(), Some("https://pay/paid"));
    }

    #[tokio::test]
    async fn test_unconfigured_stripe_is_an_error() {
        let billing = StripeBilling::new("", 25000, "brl");
        assert!(matches!(
            billing.check_status("owner@example.com").await,
            Err(BillingError::NotConfigured)
        ));
    }
}
