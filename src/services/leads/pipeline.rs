//! Lead Submission Pipeline.
//!
//! Turns a completed chatbot conversation, a contact form or an operator's
//! manual entry into a stored lead, then notifies the company by email. The
//! email is best effort and never undoes a successful write.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::auth::rate_limit::{ceil_secs, Purpose, RateLimitState};
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::events::{ChangeAction, EventBus, RealtimeEvent};
use crate::models::lead::{
    compute_bmi, ChatbotLead, ContactLead, Lead, LeadKind, NewChatbotLead, NewContactLead,
    MANUAL_CHATBOT_TOTAL_STEPS,
};
use crate::models::plan::PlanSummary;
use crate::services::chat::format::sanitize;
use crate::services::chat::CompletedConversation;
use crate::services::mailer::{Mailer, OutgoingEmail};
use crate::services::templates::{self, Rendered};

use super::store::{LeadFilter, LeadStore, LeadUpdate, PurgeReport};

const NOT_INFORMED: &str = "Não informado";

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub company_id: Uuid,
    pub lead_cap: i64,
    pub chatbot_cooldown_secs: u64,
    pub contact_cooldown_secs: u64,
    pub retention_days: i64,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            company_id: config.company_id,
            lead_cap: config.lead_cap,
            chatbot_cooldown_secs: config.chatbot_cooldown_secs,
            contact_cooldown_secs: config.contact_cooldown_secs,
            retention_days: config.lead_retention_days,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatbotReceipt {
    pub lead_id: Uuid,
    pub email_sent: bool,
}

/// Contact form input, already shape-validated.
#[derive(Debug, Clone)]
pub struct ContactSubmission {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ContactReceipt {
    /// `false` when the company is at its lead cap or the write failed; the
    /// email may still have gone out.
    pub stored: bool,
    pub email_sent: bool,
    /// `None` when the store could not be read.
    pub lead_count: Option<i64>,
    pub lead_cap: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LeadUsage {
    pub count: i64,
    pub cap: i64,
    pub label: String,
    pub at_cap: bool,
}

impl LeadUsage {
    fn new(count: i64, cap: i64) -> Self {
        Self {
            count,
            cap,
            label: format!("{}/{} leads", count, cap),
            at_cap: count >= cap,
        }
    }
}

pub enum ManualLead {
    Chatbot(NewChatbotLead),
    Contact(NewContactLead),
}

#[derive(Clone)]
pub struct LeadPipeline {
    store: Arc<dyn LeadStore>,
    mailer: Arc<dyn Mailer>,
    limiter: RateLimitState,
    events: EventBus,
    settings: PipelineSettings,
}

/// `Dados coletados via chatbot. Tempo preferido: …. Orçamento: ….` plus the
/// selected and/or recommended plan.
pub fn chatbot_notes(
    time: Option<&str>,
    budget: Option<&str>,
    selected: Option<&PlanSummary>,
    recommended: Option<&PlanSummary>,
) -> String {
    let mut notes = format!(
        "Dados coletados via chatbot. Tempo preferido: {}. Orçamento: {}.",
        time.unwrap_or(NOT_INFORMED),
        budget.unwrap_or(NOT_INFORMED)
    );
    if let Some(plan) = selected {
        notes.push_str(&format!(" Plano selecionado: {}", plan.name));
    }
    if let Some(plan) = recommended {
        notes.push_str(&format!(" Plano recomendado: {} (R$ {})", plan.name, plan.price));
    }
    notes
}

impl LeadPipeline {
    pub fn new(
        store: Arc<dyn LeadStore>,
        mailer: Arc<dyn Mailer>,
        limiter: RateLimitState,
        events: EventBus,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            store,
            mailer,
            limiter,
            events,
            settings,
        }
    }

    pub fn store(&self) -> &dyn LeadStore {
        self.store.as_ref()
    }

    pub fn company_id(&self) -> Uuid {
        self.settings.company_id
    }

    fn window_secs(&self, purpose: Purpose) -> u64 {
        match purpose {
            Purpose::Chatbot => self.settings.chatbot_cooldown_secs,
            _ => self.settings.contact_cooldown_secs,
        }
    }

    /// Reject while a cooldown marker for `client` is live. Read only; used as
    /// a precheck before any work is done for the client.
    pub async fn ensure_cooldown_elapsed(&self, purpose: Purpose, client: &str) -> AppResult<()> {
        let key = purpose.key(client);
        match self.limiter.remaining_cooldown(&key).await {
            Some(remaining) => {
                let secs = ceil_secs(remaining);
                tracing::warn!(client = %client, ?purpose, remaining_secs = secs, "Lead submission rate limited");
                Err(AppError::RateLimited {
                    retry_after_secs: secs,
                })
            }
            None => Ok(()),
        }
    }

    /// Claim the client's cooldown for one submission. Concurrent requests
    /// from the same client get `RateLimited` until the claim is released.
    async fn reserve_cooldown(&self, purpose: Purpose, client: &str) -> AppResult<()> {
        self.limiter
            .try_reserve(&purpose.key(client), self.window_secs(purpose))
            .await
            .map_err(|remaining| {
                let secs = ceil_secs(remaining);
                tracing::warn!(client = %client, ?purpose, remaining_secs = secs, "Lead submission rate limited");
                AppError::RateLimited {
                    retry_after_secs: secs,
                }
            })
    }

    async fn release_cooldown(&self, purpose: Purpose, client: &str) {
        self.limiter.release(&purpose.key(client)).await;
    }

    /// Restart the window at the moment the submission succeeded.
    async fn start_cooldown(&self, purpose: Purpose, client: &str) {
        self.limiter
            .mark(&purpose.key(client), self.window_secs(purpose))
            .await;
    }

    fn publish(&self, kind: Option<LeadKind>, action: ChangeAction) {
        self.events.publish(RealtimeEvent::LeadsChanged {
            company_id: self.settings.company_id,
            kind,
            action,
        });
    }

    /// Send `rendered` to the company's contact address. Failures are logged
    /// and reported as `false`.
    async fn notify_company(&self, rendered: Rendered, reply_to: Option<String>) -> bool {
        let contact = match self.store.company_contact(self.settings.company_id).await {
            Ok(contact) => contact,
            Err(e) => {
                tracing::error!(error = %e, "Failed to load company contact for notification");
                return false;
            }
        };
        let Some(to) = contact.contact_email.filter(|e| !e.trim().is_empty()) else {
            tracing::warn!(company_id = %self.settings.company_id, "No contact email configured, notification skipped");
            return false;
        };

        let email = OutgoingEmail {
            to,
            subject: rendered.subject,
            html: rendered.html,
            reply_to,
        };
        match self.mailer.send(email).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(error = %e, "Lead notification email failed");
                false
            }
        }
    }

    /// Store a finished chatbot conversation.
    ///
    /// Rejected without touching the store while the client's cooldown is live.
    /// A failed write gives the cooldown back, so the client can retry right
    /// away.
    pub async fn submit_chatbot(
        &self,
        client: &str,
        conversation: &CompletedConversation,
        recommended: Option<&PlanSummary>,
    ) -> AppResult<ChatbotReceipt> {
        self.reserve_cooldown(Purpose::Chatbot, client).await?;

        let answers = &conversation.answers;
        let selected = conversation.selected_plan.as_ref();
        let total_steps = conversation.total_steps as i32;

        let name = sanitize(&answers.name);
        let email = sanitize(&answers.email);
        let whatsapp = sanitize(&answers.whatsapp);
        let bmi = compute_bmi(Some(answers.height), Some(answers.weight));

        let new_lead = NewChatbotLead {
            company_id: self.settings.company_id,
            name: Some(name.clone()),
            contact_whatsapp: Some(whatsapp.clone()),
            contact_email: Some(email.clone()),
            age: Some(i32::from(answers.age)),
            height: Some(answers.height),
            weight: Some(answers.weight),
            bmi,
            primary_goal: Some(answers.goal.clone()),
            experience_level: Some(answers.experience.clone()),
            workout_preference: Some(answers.preference.clone()),
            selected_plan_id: selected.or(recommended).map(|p| p.id),
            steps_completed: total_steps,
            total_steps,
            completion_rate: 100,
            notes: Some(chatbot_notes(
                Some(&answers.time),
                Some(answers.budget.label()),
                selected,
                recommended,
            )),
        };

        let lead = match self.store.insert_chatbot_lead(&new_lead).await {
            Ok(lead) => lead,
            Err(e) => {
                self.release_cooldown(Purpose::Chatbot, client).await;
                return Err(e.into());
            }
        };
        self.start_cooldown(Purpose::Chatbot, client).await;
        tracing::info!(lead_id = %lead.id, company_id = %lead.company_id, "Chatbot lead stored");
        self.publish(Some(LeadKind::Chatbot), ChangeAction::Insert);

        let rendered = templates::chatbot_lead(&templates::ChatbotLeadEmail {
            name: &name,
            email: Some(&email),
            whatsapp: Some(&whatsapp),
            age: lead.age,
            height: lead.height,
            weight: lead.weight,
            bmi: lead.bmi,
            goal: lead.primary_goal.as_deref(),
            experience: lead.experience_level.as_deref(),
            preference: lead.workout_preference.as_deref(),
            time: Some(&answers.time),
            budget: Some(answers.budget.label()),
            selected_plan: selected,
            recommended_plan: recommended,
            received_at: lead.created_at,
        });
        let email_sent = self.notify_company(rendered, Some(email)).await;

        Ok(ChatbotReceipt {
            lead_id: lead.id,
            email_sent,
        })
    }

    /// Public contact form. The row is written only below the lead cap; the
    /// email is attempted either way, including when the write fails. Only a
    /// submission that was neither stored nor emailed is an error.
    pub async fn submit_contact(
        &self,
        client: &str,
        form: ContactSubmission,
    ) -> AppResult<ContactReceipt> {
        self.reserve_cooldown(Purpose::ContactForm, client).await?;

        let new_lead = NewContactLead {
            company_id: self.settings.company_id,
            name: sanitize(&form.name),
            email: form.email.as_deref().map(sanitize).filter(|e| !e.is_empty()),
            phone: form.phone.as_deref().map(sanitize).filter(|p| !p.is_empty()),
            message: Some(sanitize(&form.message)),
            notes: None,
        };

        let (stored, lead_count) = match self.store_contact(&new_lead).await {
            Ok((stored, count)) => (stored, Some(count)),
            Err(e) => {
                tracing::error!(
                    company_id = %self.settings.company_id,
                    error = %e,
                    "Failed to store contact lead, sending email only"
                );
                (false, None)
            }
        };

        let message = new_lead.message.as_deref().unwrap_or_default();
        let rendered = templates::contact_lead(&templates::ContactLeadEmail {
            name: &new_lead.name,
            email: new_lead.email.as_deref(),
            phone: new_lead.phone.as_deref(),
            message,
            received_at: Utc::now(),
        });
        let email_sent = self.notify_company(rendered, new_lead.email.clone()).await;

        if !stored && !email_sent {
            self.release_cooldown(Purpose::ContactForm, client).await;
            return Err(AppError::Upstream(
                "contact lead was neither stored nor emailed".into(),
            ));
        }

        self.start_cooldown(Purpose::ContactForm, client).await;
        Ok(ContactReceipt {
            stored,
            email_sent,
            lead_count,
            lead_cap: self.settings.lead_cap,
        })
    }

    /// Write the contact row if the company is below its cap. Returns whether
    /// it was written and the lead count afterwards.
    async fn store_contact(&self, lead: &NewContactLead) -> Result<(bool, i64), sqlx::Error> {
        let count = self.store.count_leads(self.settings.company_id).await?;
        if count >= self.settings.lead_cap {
            tracing::warn!(
                company_id = %self.settings.company_id,
                lead_count = count,
                lead_cap = self.settings.lead_cap,
                "Lead cap reached, contact lead not stored"
            );
            return Ok((false, count));
        }

        let row = self.store.insert_contact_lead(lead).await?;
        tracing::info!(lead_id = %row.id, "Contact lead stored");
        self.publish(Some(LeadKind::Contact), ChangeAction::Insert);
        Ok((true, count + 1))
    }

    pub async fn usage(&self) -> AppResult<LeadUsage> {
        let count = self.store.count_leads(self.settings.company_id).await?;
        Ok(LeadUsage::new(count, self.settings.lead_cap))
    }

    pub async fn list(&self, filter: &LeadFilter) -> AppResult<Vec<Lead>> {
        Ok(self
            .store
            .list_leads(self.settings.company_id, filter)
            .await?)
    }

    /// Operator-entered lead. Chatbot-kind entries record an unstarted
    /// questionnaire and get BMI only when height and weight are both positive.
    pub async fn create_manual(&self, lead: ManualLead) -> AppResult<Lead> {
        let created = match lead {
            ManualLead::Chatbot(mut new) => {
                new.company_id = self.settings.company_id;
                new.name = new.name.as_deref().map(sanitize);
                new.notes = new.notes.as_deref().map(sanitize);
                new.bmi = compute_bmi(new.height, new.weight);
                new.steps_completed = 0;
                new.total_steps = MANUAL_CHATBOT_TOTAL_STEPS;
                new.completion_rate = 0;
                Lead::Chatbot(self.insert_chatbot(&new).await?)
            }
            ManualLead::Contact(mut new) => {
                new.company_id = self.settings.company_id;
                new.name = sanitize(&new.name);
                new.message = new.message.as_deref().map(sanitize);
                new.notes = new.notes.as_deref().map(sanitize);
                Lead::Contact(self.insert_contact(&new).await?)
            }
        };
        self.publish(Some(created.kind()), ChangeAction::Insert);
        Ok(created)
    }

    async fn insert_chatbot(&self, new: &NewChatbotLead) -> AppResult<ChatbotLead> {
        Ok(self.store.insert_chatbot_lead(new).await?)
    }

    async fn insert_contact(&self, new: &NewContactLead) -> AppResult<ContactLead> {
        Ok(self.store.insert_contact_lead(new).await?)
    }

    pub async fn update(&self, kind: LeadKind, id: Uuid, update: LeadUpdate) -> AppResult<Lead> {
        let update = LeadUpdate {
            status: update.status,
            notes: update.notes.as_deref().map(sanitize),
        };
        let lead = self
            .store
            .update_lead(self.settings.company_id, kind, id, &update)
            .await?
            .ok_or_else(|| AppError::NotFound("Lead não encontrado".into()))?;
        self.publish(Some(kind), ChangeAction::Update);
        Ok(lead)
    }

    pub async fn delete(&self, kind: LeadKind, id: Uuid) -> AppResult<()> {
        let deleted = self
            .store
            .delete_lead(self.settings.company_id, kind, id)
            .await?;
        if !deleted {
            return Err(AppError::NotFound("Lead não encontrado".into()));
        }
        self.publish(Some(kind), ChangeAction::Delete);
        Ok(())
    }

    /// Retention sweep: leads older than the retention window and not
    /// CONVERTED are deleted from both tables. Operator-triggered only.
    pub async fn cleanup(&self) -> AppResult<PurgeReport> {
        let cutoff = Utc::now() - Duration::days(self.settings.retention_days);
        let report = self
            .store
            .purge_stale_leads(self.settings.company_id, cutoff)
            .await?;

        tracing::info!(
            company_id = %self.settings.company_id,
            chatbot_leads = report.chatbot_leads,
            contact_leads = report.contact_leads,
            %cutoff,
            "Lead retention cleanup finished"
        );
        if report.total() > 0 {
            self.publish(None, ChangeAction::Delete);
        }
        Ok(report)
    }
}
