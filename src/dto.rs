//! # Request/Response DTOs
//!
//! API contract types for the HTTP handlers.
//!
//! Conventions:
//! - `*Request`  → deserialized from client JSON body or query params
//! - `*Response` → serialized to client JSON
//! - Field rules are expressed via `validator` derive macros; cross-field
//!   rules live in `validate_*` methods next to the type
//! - Validation messages are user-facing and in Portuguese

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

use crate::error::AppError;
use crate::models::lead::{ConversionStatus, NewChatbotLead, NewContactLead};
use crate::services::leads::pipeline::{ContactSubmission, ManualLead};
use crate::services::leads::store::LeadUpdate;
use crate::services::subscription::GateCheck;

lazy_static! {
    static ref CONTACT_EMAIL_RE: Regex =
        Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").unwrap();
    static ref LINK_RE: Regex =
        Regex::new(r"(?i)https?://|www\.|\[url=|\.com|\.net|\.org").unwrap();
    static ref SCRIPT_RE: Regex =
        Regex::new(r"(?i)<[^>]*>|javascript:|data:|vbscript:|onload=|onerror=").unwrap();
}

/// First failing field, as an [`AppError::Validation`].
pub fn validation_error(errors: ValidationErrors) -> AppError {
    let field_errors = errors.field_errors();
    let mut fields: Vec<&&str> = field_errors.keys().collect();
    fields.sort();

    match fields.first() {
        Some(field) => {
            let message = field_errors[**field]
                .first()
                .and_then(|e| e.message.as_ref())
                .map(|m| m.to_string())
                .unwrap_or_else(|| "Valor inválido".into());
            AppError::validation(**field, message)
        }
        None => AppError::validation("body", "Valor inválido"),
    }
}

fn trimmed_len(value: &str) -> usize {
    value.trim().chars().count()
}

// ============================================================================
// Common
// ============================================================================

/// Standard success message response
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Standard delete confirmation
#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub deleted: bool,
    pub id: Uuid,
}

// ============================================================================
// Auth
// ============================================================================

/// POST /api/auth/magic-link
#[derive(Debug, Deserialize, Validate)]
pub struct MagicLinkRequest {
    #[validate(
        email(message = "Email inválido"),
        length(max = 254, message = "Email muito longo")
    )]
    pub email: String,
}

/// POST /api/auth/verify
#[derive(Debug, Deserialize, Validate)]
pub struct VerifyMagicLinkRequest {
    #[validate(length(equal = 64, message = "Link de acesso inválido"))]
    pub token: String,
}

/// GET /api/me
#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub id: Uuid,
    pub email: String,
    pub gate: GateCheck,
}

// ============================================================================
// Contact form
// ============================================================================

/// POST /api/contact
#[derive(Debug, Deserialize, Validate)]
pub struct ContactRequest {
    pub name: String,

    #[validate(length(max = 254, message = "Email inválido"))]
    pub email: Option<String>,

    #[validate(length(max = 30, message = "Telefone inválido"))]
    pub phone: Option<String>,

    pub message: String,
}

impl ContactRequest {
    fn email(&self) -> Option<&str> {
        self.email.as_deref().map(str::trim).filter(|e| !e.is_empty())
    }

    fn phone(&self) -> Option<&str> {
        self.phone.as_deref().map(str::trim).filter(|p| !p.is_empty())
    }

    /// Length, contact channel, link and script rules.
    pub fn validate_contact_rules(&self) -> Result<(), AppError> {
        let name_len = trimmed_len(&self.name);
        if !(2..=100).contains(&name_len) {
            return Err(AppError::validation("name", "Nome deve ter entre 2 e 100 caracteres"));
        }

        if let Some(email) = self.email() {
            if !CONTACT_EMAIL_RE.is_match(email) {
                return Err(AppError::validation("email", "Email inválido"));
            }
        }

        if let Some(phone) = self.phone() {
            let digits = phone.chars().filter(|c| c.is_ascii_digit()).count();
            if !(10..=11).contains(&digits) {
                return Err(AppError::validation("phone", "Telefone inválido"));
            }
        }

        let message_len = trimmed_len(&self.message);
        if !(10..=1000).contains(&message_len) {
            return Err(AppError::validation(
                "message",
                "Mensagem deve ter entre 10 e 1000 caracteres",
            ));
        }

        if LINK_RE.is_match(&self.message) {
            return Err(AppError::validation("message", "Mensagem não pode conter links"));
        }

        if self.email().is_none() && self.phone().is_none() {
            return Err(AppError::validation(
                "email",
                "É necessário fornecer pelo menos email ou telefone",
            ));
        }

        let suspicious = [Some(self.name.as_str()), Some(self.message.as_str()), self.email(), self.phone()]
            .into_iter()
            .flatten()
            .any(|v| SCRIPT_RE.is_match(v));
        if suspicious {
            return Err(AppError::validation("body", "Conteúdo inválido detectado"));
        }

        Ok(())
    }

    pub fn into_submission(self) -> ContactSubmission {
        let email = self.email().map(str::to_string);
        let phone = self.phone().map(str::to_string);
        ContactSubmission {
            name: self.name.trim().to_string(),
            email,
            phone,
            message: self.message.trim().to_string(),
        }
    }
}

// ============================================================================
// Leads (admin)
// ============================================================================

/// POST /api/leads with `"type": "chatbot"`
#[derive(Debug, Deserialize, Validate)]
pub struct CreateChatbotLeadRequest {
    #[validate(length(min = 1, max = 100, message = "Nome deve ter entre 1 e 100 caracteres"))]
    pub name: String,
    #[validate(length(max = 30))]
    pub contact_whatsapp: Option<String>,
    #[validate(email(message = "Email inválido"))]
    pub contact_email: Option<String>,
    #[validate(range(min = 10, max = 120, message = "A idade deve estar entre 10 e 120 anos"))]
    pub age: Option<i32>,
    #[validate(range(min = 0.0, max = 3.0, message = "Altura inválida"))]
    pub height: Option<f64>,
    #[validate(range(min = 0.0, max = 400.0, message = "Peso inválido"))]
    pub weight: Option<f64>,
    pub primary_goal: Option<String>,
    pub experience_level: Option<String>,
    pub workout_preference: Option<String>,
    pub selected_plan_id: Option<Uuid>,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

/// POST /api/leads with `"type": "contact"`
#[derive(Debug, Deserialize, Validate)]
pub struct CreateContactLeadRequest {
    #[validate(length(min = 1, max = 100, message = "Nome deve ter entre 1 e 100 caracteres"))]
    pub name: String,
    #[validate(email(message = "Email inválido"))]
    pub email: Option<String>,
    #[validate(length(max = 30))]
    pub phone: Option<String>,
    #[validate(length(max = 1000))]
    pub message: Option<String>,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CreateLeadRequest {
    Chatbot(CreateChatbotLeadRequest),
    Contact(CreateContactLeadRequest),
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl CreateLeadRequest {
    pub fn validate_request(&self) -> Result<(), AppError> {
        match self {
            CreateLeadRequest::Chatbot(r) => r.validate(),
            CreateLeadRequest::Contact(r) => r.validate(),
        }
        .map_err(validation_error)
    }

    /// Company and questionnaire counters are filled in by the pipeline.
    pub fn into_manual_lead(self) -> ManualLead {
        match self {
            CreateLeadRequest::Chatbot(r) => ManualLead::Chatbot(NewChatbotLead {
                company_id: Uuid::nil(),
                name: Some(r.name.trim().to_string()),
                contact_whatsapp: non_empty(r.contact_whatsapp),
                contact_email: non_empty(r.contact_email),
                age: r.age,
                height: r.height,
                weight: r.weight,
                bmi: None,
                primary_goal: non_empty(r.primary_goal),
                experience_level: non_empty(r.experience_level),
                workout_preference: non_empty(r.workout_preference),
                selected_plan_id: r.selected_plan_id,
                steps_completed: 0,
                total_steps: 0,
                completion_rate: 0,
                notes: non_empty(r.notes),
            }),
            CreateLeadRequest::Contact(r) => ManualLead::Contact(NewContactLead {
                company_id: Uuid::nil(),
                name: r.name.trim().to_string(),
                email: non_empty(r.email),
                phone: non_empty(r.phone),
                message: non_empty(r.message),
                notes: non_empty(r.notes),
            }),
        }
    }
}

/// PUT /api/leads/{kind}/{id}
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateLeadRequest {
    pub status: Option<ConversionStatus>,
    #[validate(length(max = 2000, message = "Notas muito longas"))]
    pub notes: Option<String>,
}

impl UpdateLeadRequest {
    pub fn validate_at_least_one(&self) -> Result<(), AppError> {
        if self.status.is_none() && self.notes.is_none() {
            return Err(AppError::validation("status", "Nada para atualizar"));
        }
        Ok(())
    }
}

impl From<UpdateLeadRequest> for LeadUpdate {
    fn from(r: UpdateLeadRequest) -> Self {
        LeadUpdate {
            status: r.status,
            notes: r.notes,
        }
    }
}

/// PUT /api/leads/draft
#[derive(Debug, Deserialize)]
pub struct SaveDraftRequest {
    pub data: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(name: &str, email: Option<&str>, phone: Option<&str>, message: &str) -> ContactRequest {
        ContactRequest {
            name: name.into(),
            email: email.map(str::to_string),
            phone: phone.map(str::to_string),
            message: message.into(),
        }
    }

    fn field_of(err: AppError) -> String {
        match err {
            AppError::Validation { field, .. } => field,
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_valid_contact_passes() {
        let req = contact("Ana", Some("ana@example.com"), None, "Quero saber mais sobre os planos");
        assert!(req.validate_contact_rules().is_ok());

        let req = contact("Ana", None, Some("(11) 98765-4321"), "Quero saber mais sobre os planos");
        assert!(req.validate_contact_rules().is_ok());
    }

    #[test]
    fn test_contact_requires_email_or_phone() {
        let req = contact("Ana", Some("  "), None, "Quero saber mais sobre os planos");
        assert_eq!(field_of(req.validate_contact_rules().unwrap_err()), "email");
    }

    #[test]
    fn test_contact_rejects_links_and_scripts() {
        let req = contact("Ana", Some("ana@example.com"), None, "veja meu site www.exemplo.com.br");
        assert_eq!(field_of(req.validate_contact_rules().unwrap_err()), "message");

        let req = contact("<b>Ana</b>", Some("ana@example.com"), None, "mensagem comum aqui");
        assert_eq!(field_of(req.validate_contact_rules().unwrap_err()), "body");
    }

    #[test]
    fn test_contact_length_and_phone_rules() {
        let req = contact("A", Some("ana@example.com"), None, "mensagem comum aqui");
        assert_eq!(field_of(req.validate_contact_rules().unwrap_err()), "name");

        let req = contact("Ana", Some("ana@example.com"), None, "curta");
        assert_eq!(field_of(req.validate_contact_rules().unwrap_err()), "message");

        let req = contact("Ana", None, Some("12345"), "mensagem comum aqui");
        assert_eq!(field_of(req.validate_contact_rules().unwrap_err()), "phone");
    }

    #[test]
    fn test_create_lead_request_is_tagged() {
        let req: CreateLeadRequest = serde_json::from_str(
            r#"{"type":"contact","name":"Bruno","email":"bruno@example.com","notes":"  "}"#,
        )
        .unwrap();
        assert!(req.validate_request().is_ok());
        match req.into_manual_lead() {
            ManualLead::Contact(lead) => {
                assert_eq!(lead.name, "Bruno");
                assert_eq!(lead.notes, None);
            }
            ManualLead::Chatbot(_) => panic!("expected a contact lead"),
        }
    }

    #[test]
    fn test_invalid_manual_email_is_reported_by_field() {
        let req: CreateLeadRequest =
            serde_json::from_str(r#"{"type":"chatbot","name":"Bruno","contact_email":"nope"}"#).unwrap();
        assert_eq!(field_of(req.validate_request().unwrap_err()), "contact_email");
    }
}
