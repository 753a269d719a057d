//! Data access for leads, plans and company contact details.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::company::CompanyContact;
use crate::models::lead::{
    ChatbotLead, ContactLead, ConversionStatus, Lead, LeadKind, NewChatbotLead, NewContactLead,
};
use crate::models::plan::ServicePlan;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LeadFilter {
    pub kind: Option<LeadKind>,
    pub status: Option<ConversionStatus>,
    pub search: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LeadUpdate {
    pub status: Option<ConversionStatus>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub chatbot_leads: u64,
    pub contact_leads: u64,
}

impl PurgeReport {
    pub fn total(&self) -> u64 {
        self.chatbot_leads + self.contact_leads
    }
}

#[async_trait]
pub trait LeadStore: Send + Sync {
    async fn company_contact(&self, company_id: Uuid) -> Result<CompanyContact, sqlx::Error>;

    /// Active plans in display order.
    async fn active_plans(&self, company_id: Uuid) -> Result<Vec<ServicePlan>, sqlx::Error>;

    async fn plan(&self, company_id: Uuid, plan_id: Uuid)
        -> Result<Option<ServicePlan>, sqlx::Error>;

    async fn insert_chatbot_lead(&self, lead: &NewChatbotLead) -> Result<ChatbotLead, sqlx::Error>;

    async fn insert_contact_lead(&self, lead: &NewContactLead) -> Result<ContactLead, sqlx::Error>;

    /// Chatbot and contact-form leads together.
    async fn count_leads(&self, company_id: Uuid) -> Result<i64, sqlx::Error>;

    /// Newest first.
    async fn list_leads(&self, company_id: Uuid, filter: &LeadFilter)
        -> Result<Vec<Lead>, sqlx::Error>;

    async fn update_lead(
        &self,
        company_id: Uuid,
        kind: LeadKind,
        id: Uuid,
        update: &LeadUpdate,
    ) -> Result<Option<Lead>, sqlx::Error>;

    async fn delete_lead(&self, company_id: Uuid, kind: LeadKind, id: Uuid)
        -> Result<bool, sqlx::Error>;

    /// Delete leads created before `cutoff` that are not CONVERTED.
    async fn purge_stale_leads(
        &self,
        company_id: Uuid,
        cutoff: DateTime<Utc>,
    ) -> Result<PurgeReport, sqlx::Error>;
}

pub struct PgLeadStore {
    db: PgPool,
}

impl PgLeadStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl LeadStore for PgLeadStore {
    async fn company_contact(&self, company_id: Uuid) -> Result<CompanyContact, sqlx::Error> {
        let contact = sqlx::query_as::<_, CompanyContact>(
            "SELECT contact_email, about_name FROM landing_page_content WHERE company_id = $1 LIMIT 1",
        )
        .bind(company_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(contact.unwrap_or_default())
    }

    async fn active_plans(&self, company_id: Uuid) -> Result<Vec<ServicePlan>, sqlx::Error> {
        sqlx::query_as::<_, ServicePlan>(
            "SELECT * FROM service_plans WHERE company_id = $1 AND active = true ORDER BY order_index ASC",
        )
        .bind(company_id)
        .fetch_all(&self.db)
        .await
    }

    async fn plan(
        &self,
        company_id: Uuid,
        plan_id: Uuid,
    ) -> Result<Option<ServicePlan>, sqlx::Error> {
        sqlx::query_as::<_, ServicePlan>(
            "SELECT * FROM service_plans WHERE id = $1 AND company_id = $2",
        )
        .bind(plan_id)
        .bind(company_id)
        .fetch_optional(&self.db)
        .await
    }

    async fn insert_chatbot_lead(&self, lead: &NewChatbotLead) -> Result<ChatbotLead, sqlx::Error> {
        sqlx::query_as::<_, ChatbotLead>(
            r#"
            INSERT INTO chatbot_leads (
                company_id, name, contact_whatsapp, contact_email, age, height, weight, bmi,
                primary_goal, experience_level, workout_preference, selected_plan_id,
                steps_completed, total_steps, completion_rate, notes
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            RETURNING *
            "#,
        )
        .bind(lead.company_id)
        .bind(&lead.name)
        .bind(&lead.contact_whatsapp)
        .bind(&lead.contact_email)
        .bind(lead.age)
        .bind(lead.height)
        .bind(lead.weight)
        .bind(lead.bmi)
        .bind(&lead.primary_goal)
        .bind(&lead.experience_level)
        .bind(&lead.workout_preference)
        .bind(lead.selected_plan_id)
        .bind(lead.steps_completed)
        .bind(lead.total_steps)
        .bind(lead.completion_rate)
        .bind(&lead.notes)
        .fetch_one(&self.db)
        .await
    }

    async fn insert_contact_lead(&self, lead: &NewContactLead) -> Result<ContactLead, sqlx::Error> {
        sqlx::query_as::<_, ContactLead>(
            r#"
            INSERT INTO contact_form_leads (company_id, name, email, phone, message, notes)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(lead.company_id)
        .bind(&lead.name)
        .bind(&lead.email)
        .bind(&lead.phone)
        .bind(&lead.message)
        .bind(&lead.notes)
        .fetch_one(&self.db)
        .await
    }

    async fn count_leads(&self, company_id: Uuid) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT
                (SELECT COUNT(*) FROM chatbot_leads WHERE company_id = $1)
              + (SELECT COUNT(*) FROM contact_form_leads WHERE company_id = $1)
            "#,
        )
        .bind(company_id)
        .fetch_one(&self.db)
        .await
    }

    async fn list_leads(
        &self,
        company_id: Uuid,
        filter: &LeadFilter,
    ) -> Result<Vec<Lead>, sqlx::Error> {
        let mut leads = Vec::new();

        if filter.kind.map_or(true, |k| k == LeadKind::Chatbot) {
            let rows = sqlx::query_as::<_, ChatbotLead>(
                r#"
                SELECT * FROM chatbot_leads
                WHERE company_id = $1 AND ($2::lead_status IS NULL OR conversion_status = $2)
                ORDER BY created_at DESC
                "#,
            )
            .bind(company_id)
            .bind(filter.status)
            .fetch_all(&self.db)
            .await?;
            leads.extend(rows.into_iter().map(Lead::Chatbot));
        }

        if filter.kind.map_or(true, |k| k == LeadKind::Contact) {
            let rows = sqlx::query_as::<_, ContactLead>(
                r#"
                SELECT * FROM contact_form_leads
                WHERE company_id = $1 AND ($2::lead_status IS NULL OR status = $2)
                ORDER BY created_at DESC
                "#,
            )
            .bind(company_id)
            .bind(filter.status)
            .fetch_all(&self.db)
            .await?;
            leads.extend(rows.into_iter().map(Lead::Contact));
        }

        if let Some(term) = filter.search.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            leads.retain(|l| l.matches(term));
        }
        leads.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        Ok(leads)
    }

    async fn update_lead(
        &self,
        company_id: Uuid,
        kind: LeadKind,
        id: Uuid,
        update: &LeadUpdate,
    ) -> Result<Option<Lead>, sqlx::Error> {
        // Last write wins; there is no version check.
        let lead = match kind {
            LeadKind::Chatbot => sqlx::query_as::<_, ChatbotLead>(
                r#"
                UPDATE chatbot_leads SET
                    conversion_status = COALESCE($3, conversion_status),
                    notes = COALESCE($4, notes),
                    updated_at = NOW()
                WHERE id = $1 AND company_id = $2
                RETURNING *
                "#,
            )
            .bind(id)
            .bind(company_id)
            .bind(update.status)
            .bind(&update.notes)
            .fetch_optional(&self.db)
            .await?
            .map(Lead::Chatbot),
            LeadKind::Contact => sqlx::query_as::<_, ContactLead>(
                r#"
                UPDATE contact_form_leads SET
                    status = COALESCE($3, status),
                    contacted = COALESCE($3 <> 'NEW'::lead_status, contacted),
                    notes = COALESCE($4, notes),
                    updated_at = NOW()
                WHERE id = $1 AND company_id = $2
                RETURNING *
                "#,
            )
            .bind(id)
            .bind(company_id)
            .bind(update.status)
            .bind(&update.notes)
            .fetch_optional(&self.db)
            .await?
            .map(Lead::Contact),
        };
        Ok(lead)
    }

    async fn delete_lead(
        &self,
        company_id: Uuid,
        kind: LeadKind,
        id: Uuid,
    ) -> Result<bool, sqlx::Error> {
        let sql = format!("DELETE FROM {} WHERE id = $1 AND company_id = $2", kind.table());
        let result = sqlx::query(&sql)
            .bind(id)
            .bind(company_id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn purge_stale_leads(
        &self,
        company_id: Uuid,
        cutoff: DateTime<Utc>,
    ) -> Result<PurgeReport, sqlx::Error> {
        let mut tx = self.db.begin().await?;
        let mut report = PurgeReport::default();

        for kind in [LeadKind::Chatbot, LeadKind::Contact] {
            let sql = format!(
                "DELETE FROM {} WHERE company_id = $1 AND created_at < $2 AND {} <> 'CONVERTED'",
                kind.table(),
                kind.status_column()
            );
            let deleted = sqlx::query(&sql)
                .bind(company_id)
                .bind(cutoff)
                .execute(&mut *tx)
                .await?
                .rows_affected();
            match kind {
                LeadKind::Chatbot => report.chatbot_leads = deleted,
                LeadKind::Contact => report.contact_leads = deleted,
            }
        }

        tx.commit().await?;
        Ok(report)
    }
}
