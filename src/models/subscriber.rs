use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Stripe subscription status, as reported by the billing collaborator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BillingStatus {
    Active,
    Trialing,
    PastDue,
    Incomplete,
    Unpaid,
    Canceled,
    IncompleteExpired,
    Unknown,
}

impl BillingStatus {
    pub fn from_stripe(s: &str) -> Self {
        match s {
            "active" => Self::Active,
            "trialing" => Self::Trialing,
            "past_due" => Self::PastDue,
            "incomplete" => Self::Incomplete,
            "unpaid" => Self::Unpaid,
            "canceled" => Self::Canceled,
            "incomplete_expired" => Self::IncompleteExpired,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Trialing => "trialing",
            Self::PastDue => "past_due",
            Self::Incomplete => "incomplete",
            Self::Unpaid => "unpaid",
            Self::Canceled => "canceled",
            Self::IncompleteExpired => "incomplete_expired",
            Self::Unknown => "unknown",
        }
    }

    /// Lower is better; used to pick one subscription out of many.
    pub fn priority(self) -> u8 {
        match self {
            Self::Active => 0,
            Self::Trialing => 1,
            Self::PastDue => 2,
            Self::Incomplete => 3,
            Self::Unpaid => 4,
            Self::Canceled => 5,
            Self::IncompleteExpired => 6,
            Self::Unknown => 7,
        }
    }

    pub fn is_paying(self) -> bool {
        matches!(self, Self::Active | Self::Trialing)
    }

    /// Delinquent but recoverable by paying an invoice.
    pub fn has_payment_issue(self) -> bool {
        matches!(self, Self::PastDue | Self::Incomplete | Self::Unpaid)
    }
}

/// Normalized billing snapshot for one admin identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubscriptionStatus {
    pub subscribed: bool,
    /// `None` when the customer has no subscription at all.
    pub status: Option<BillingStatus>,
    pub invoice_url: Option<String>,
    pub period_end: Option<DateTime<Utc>>,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
}

impl SubscriptionStatus {
    pub fn none() -> Self {
        Self {
            subscribed: false,
            status: None,
            invoice_url: None,
            period_end: None,
            stripe_customer_id: None,
            stripe_subscription_id: None,
        }
    }
}

/// Row in `subscribers`, the persisted copy of the last billing check.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Subscriber {
    pub id: Uuid,
    pub email: String,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub stripe_subscription_status: Option<String>,
    pub subscribed: bool,
    pub subscription_end: Option<DateTime<Utc>>,
    pub hosted_invoice_url: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl From<Subscriber> for SubscriptionStatus {
    fn from(s: Subscriber) -> Self {
        Self {
            subscribed: s.subscribed,
            status: s
                .stripe_subscription_status
                .as_deref()
                .map(BillingStatus::from_stripe),
            invoice_url: s.hosted_invoice_url,
            period_end: s.subscription_end,
            stripe_customer_id: s.stripe_customer_id,
            stripe_subscription_id: s.stripe_subscription_id,
        }
    }
}

/// Row in `authorized_emails`; the admin identity behind a session.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuthorizedEmail {
    pub id: Uuid,
    pub email: String,
    pub created_at: DateTime<Utc>,
}
