//! Subscription Gate: which admin surface a signed-in operator gets.
//!
//! `active` and `trialing` are entitled. Delinquent statuses are restricted
//! but keep a pay-now action when an invoice URL is known; everything else is
//! restricted with a start-subscription action.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use sqlx::PgPool;

use crate::error::AppResult;
use crate::events::{EventBus, RealtimeEvent};
use crate::models::subscriber::{BillingStatus, Subscriber, SubscriptionStatus};
use crate::services::billing::{BillingError, BillingProvider};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum BillingAction {
    PayInvoice { url: String },
    ManageSubscription,
    StartSubscription,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "view", rename_all = "snake_case")]
pub enum GateView {
    Checking,
    Entitled,
    /// Billing-only surface; no other admin feature is reachable.
    Restricted { actions: Vec<BillingAction> },
}

impl GateView {
    pub fn is_entitled(&self) -> bool {
        matches!(self, GateView::Entitled)
    }
}

pub fn evaluate(status: &SubscriptionStatus) -> GateView {
    match status.status {
        Some(s) if s.is_paying() => GateView::Entitled,
        Some(s) if s.has_payment_issue() => {
            let mut actions = Vec::new();
            if let Some(url) = status.invoice_url.as_ref().filter(|u| !u.is_empty()) {
                actions.push(BillingAction::PayInvoice { url: url.clone() });
            }
            actions.push(BillingAction::ManageSubscription);
            GateView::Restricted { actions }
        }
        // canceled, incomplete_expired, unknown, or no subscription at all
        _ => GateView::Restricted {
            actions: vec![BillingAction::StartSubscription],
        },
    }
}

/// Last-known view for one admin connection.
///
/// While a check is in flight the previous view stays on screen. A failed
/// check keeps it too; with no previous view the gate stays `Checking`.
#[derive(Debug, Default)]
pub struct GateMonitor {
    last: Option<GateView>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GateUpdate {
    pub view: GateView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GateMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn displayed(&self) -> GateView {
        self.last.clone().unwrap_or(GateView::Checking)
    }

    pub fn apply<E: std::fmt::Display>(&mut self, result: Result<GateView, E>) -> GateUpdate {
        match result {
            Ok(view) => {
                self.last = Some(view.clone());
                GateUpdate { view, error: None }
            }
            Err(e) => GateUpdate {
                view: self.displayed(),
                error: Some(e.to_string()),
            },
        }
    }
}

#[async_trait]
pub trait SubscriberStore: Send + Sync {
    async fn load(&self, email: &str) -> Result<Option<SubscriptionStatus>, sqlx::Error>;
    async fn save(&self, email: &str, status: &SubscriptionStatus) -> Result<(), sqlx::Error>;
    async fn email_for_customer(&self, customer_id: &str) -> Result<Option<String>, sqlx::Error>;
}

pub struct PgSubscriberStore {
    db: PgPool,
}

impl PgSubscriberStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SubscriberStore for PgSubscriberStore {
    async fn load(&self, email: &str) -> Result<Option<SubscriptionStatus>, sqlx::Error> {
        let row = sqlx::query_as::<_, Subscriber>("SELECT * FROM subscribers WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.db)
            .await?;
        Ok(row.map(SubscriptionStatus::from))
    }

    async fn save(&self, email: &str, status: &SubscriptionStatus) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO subscribers (
                email, stripe_customer_id, stripe_subscription_id, stripe_subscription_status,
                subscribed, subscription_end, hosted_invoice_url, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
            ON CONFLICT (email) DO UPDATE SET
                stripe_customer_id = EXCLUDED.stripe_customer_id,
                stripe_subscription_id = EXCLUDED.stripe_subscription_id,
                stripe_subscription_status = EXCLUDED.stripe_subscription_status,
                subscribed = EXCLUDED.subscribed,
                subscription_end = EXCLUDED.subscription_end,
                hosted_invoice_url = EXCLUDED.hosted_invoice_url,
                updated_at = NOW()
            "#,
        )
        .bind(email)
        .bind(&status.stripe_customer_id)
        .bind(&status.stripe_subscription_id)
        .bind(status.status.map(BillingStatus::as_str))
        .bind(status.subscribed)
        .bind(status.period_end)
        .bind(&status.invoice_url)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn email_for_customer(&self, customer_id: &str) -> Result<Option<String>, sqlx::Error> {
        sqlx::query_scalar::<_, String>(
            "SELECT email FROM subscribers WHERE stripe_customer_id = $1 LIMIT 1",
        )
        .bind(customer_id)
        .fetch_optional(&self.db)
        .await
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GateCheck {
    pub view: GateView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<SubscriptionStatus>,
    pub operator_bypass: bool,
}

#[derive(Clone)]
pub struct SubscriptionGate {
    billing: Arc<dyn BillingProvider>,
    subscribers: Arc<dyn SubscriberStore>,
    events: EventBus,
    operator_bypass_emails: Arc<Vec<String>>,
}

impl SubscriptionGate {
    pub fn new(
        billing: Arc<dyn BillingProvider>,
        subscribers: Arc<dyn SubscriberStore>,
        events: EventBus,
        operator_bypass_emails: Vec<String>,
    ) -> Self {
        Self {
            billing,
            subscribers,
            events,
            operator_bypass_emails: Arc::new(operator_bypass_emails),
        }
    }

    pub fn billing(&self) -> &dyn BillingProvider {
        self.billing.as_ref()
    }

    fn is_operator(&self, email: &str) -> bool {
        let email = email.trim().to_lowercase();
        self.operator_bypass_emails.iter().any(|e| *e == email)
    }

    fn bypass(&self, email: &str) -> GateCheck {
        tracing::warn!(email = %email, "Operator bypass: billing gate skipped");
        GateCheck {
            view: GateView::Entitled,
            status: None,
            operator_bypass: true,
        }
    }

    /// Ask the billing provider, persist the snapshot and announce it when it
    /// differs from the stored one.
    pub async fn refresh(&self, email: &str) -> Result<GateCheck, GateError> {
        if self.is_operator(email) {
            return Ok(self.bypass(email));
        }

        let status = self.billing.check_status(email).await?;
        let previous = self.subscribers.load(email).await?;
        self.subscribers.save(email, &status).await?;

        if previous.as_ref() != Some(&status) {
            tracing::info!(email = %email, "Subscription status changed");
            self.events.publish(RealtimeEvent::SubscriptionChanged {
                email: email.to_string(),
            });
        }

        Ok(GateCheck {
            view: evaluate(&status),
            status: Some(status),
            operator_bypass: false,
        })
    }

    /// Stored snapshot when there is one, otherwise a fresh check.
    pub async fn current(&self, email: &str) -> Result<GateCheck, GateError> {
        if self.is_operator(email) {
            return Ok(self.bypass(email));
        }
        match self.subscribers.load(email).await? {
            Some(status) => Ok(GateCheck {
                view: evaluate(&status),
                status: Some(status),
                operator_bypass: false,
            }),
            None => self.refresh(email).await,
        }
    }

    /// Webhook entry point: re-check whoever owns `customer_id`.
    pub async fn refresh_customer(&self, customer_id: &str) -> AppResult<Option<GateCheck>> {
        let Some(email) = self.subscribers.email_for_customer(customer_id).await? else {
            tracing::debug!(customer_id = %customer_id, "Webhook for unknown customer ignored");
            return Ok(None);
        };
        Ok(Some(self.refresh(&email).await?))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error(transparent)]
    Billing(#[from] BillingError),
    #[error("subscriber store: {0}")]
    Store(#[from] sqlx::Error),
}

impl From<GateError> for crate::error::AppError {
    fn from(e: GateError) -> Self {
        match e {
            GateError::Billing(e) => e.into(),
            GateError::Store(e) => e.into(),
        }
    }
}
