use std::env;

use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub frontend_url: String,

    /// Tenant whose site this deployment serves.
    pub company_id: Uuid,

    pub jwt_secret: String,
    pub jwt_access_ttl_secs: i64,
    pub magic_link_ttl_secs: i64,

    pub stripe_secret_key: String,
    pub stripe_webhook_secret: String,
    pub subscription_monthly_cents: i64,
    pub subscription_currency: String,

    pub resend_api_key: String,
    pub email_from: String,

    pub whatsapp_number: String,

    /// Operator identities that skip the billing gate entirely.
    /// Security-sensitive: anything listed here gets full admin access
    /// regardless of what Stripe says. Keep empty in production unless reviewed.
    pub operator_bypass_emails: Vec<String>,

    pub lead_cap: i64,
    pub chatbot_cooldown_secs: u64,
    pub contact_cooldown_secs: u64,
    pub lead_retention_days: i64,
    pub subscription_recheck_secs: u64,
    pub chat_session_idle_secs: u64,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            database_url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".into())
                .parse()
                .expect("PORT must be a number"),
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:3000".into()),

            company_id: env::var("COMPANY_ID")
                .expect("COMPANY_ID must be set")
                .parse()
                .expect("COMPANY_ID must be a UUID"),

            jwt_secret: env::var("JWT_SECRET").expect("JWT_SECRET must be set"),
            jwt_access_ttl_secs: env::var("JWT_ACCESS_TTL_SECS")
                .unwrap_or_else(|_| "86400".into())
                .parse()
                .expect("JWT_ACCESS_TTL_SECS must be a number"),
            magic_link_ttl_secs: env::var("MAGIC_LINK_TTL_SECS")
                .unwrap_or_else(|_| "900".into())
                .parse()
                .expect("MAGIC_LINK_TTL_SECS must be a number"),

            stripe_secret_key: env::var("STRIPE_SECRET_KEY").unwrap_or_else(|_| String::new()),
            stripe_webhook_secret: env::var("STRIPE_WEBHOOK_SECRET")
                .unwrap_or_else(|_| String::new()),
            subscription_monthly_cents: env::var("SUBSCRIPTION_MONTHLY_CENTS")
                .unwrap_or_else(|_| "25000".into()) // R$ 250
                .parse()
                .unwrap_or(25000),
            subscription_currency: env::var("SUBSCRIPTION_CURRENCY")
                .unwrap_or_else(|_| "brl".into()),

            resend_api_key: env::var("RESEND_API_KEY").unwrap_or_else(|_| String::new()),
            email_from: env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "Seu Negócio Online <contato@seunegocioonline.net>".into()),

            whatsapp_number: env::var("WHATSAPP_NUMBER")
                .unwrap_or_else(|_| "5511999999999".into()),

            operator_bypass_emails: parse_email_list(
                &env::var("OPERATOR_BYPASS_EMAILS").unwrap_or_default(),
            ),

            lead_cap: env::var("LEAD_CAP")
                .unwrap_or_else(|_| "25".into())
                .parse()
                .unwrap_or(25),
            chatbot_cooldown_secs: env::var("CHATBOT_COOLDOWN_SECS")
                .unwrap_or_else(|_| "300".into())
                .parse()
                .unwrap_or(300),
            contact_cooldown_secs: env::var("CONTACT_COOLDOWN_SECS")
                .unwrap_or_else(|_| "180".into())
                .parse()
                .unwrap_or(180),
            lead_retention_days: env::var("LEAD_RETENTION_DAYS")
                .unwrap_or_else(|_| "180".into()) // 6 months of 30 days
                .parse()
                .unwrap_or(180),
            subscription_recheck_secs: env::var("SUBSCRIPTION_RECHECK_SECS")
                .unwrap_or_else(|_| "30".into())
                .parse()
                .unwrap_or(30),
            chat_session_idle_secs: env::var("CHAT_SESSION_IDLE_SECS")
                .unwrap_or_else(|_| "1800".into())
                .parse()
                .unwrap_or(1800),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_email_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty())
        .collect()
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        database_url: "postgres://localhost/test".into(),
        host: "127.0.0.1".into(),
        port: 8080,
        frontend_url: "http://localhost:3000".into(),
        company_id: Uuid::nil(),
        jwt_secret: "test-secret".into(),
        jwt_access_ttl_secs: 3600,
        magic_link_ttl_secs: 900,
        stripe_secret_key: String::new(),
        stripe_webhook_secret: String::new(),
        subscription_monthly_cents: 25000,
        subscription_currency: "brl".into(),
        resend_api_key: String::new(),
        email_from: "test <test@example.com>".into(),
        whatsapp_number: "5511999999999".into(),
        operator_bypass_emails: vec!["owner@example.com".into()],
        lead_cap: 25,
        chatbot_cooldown_secs: 300,
        contact_cooldown_secs: 180,
        lead_retention_days: 180,
        subscription_recheck_secs: 30,
        chat_session_idle_secs: 1800,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_list_is_normalized() {
        let list = parse_email_list(" Owner@Example.com, ,second@example.com ");
        assert_eq!(list, vec!["owner@example.com", "second@example.com"]);
    }
}
