use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "lead_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConversionStatus {
    New,
    Contacted,
    Negotiating,
    Converted,
    Lost,
}

impl Default for ConversionStatus {
    fn default() -> Self {
        Self::New
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LeadKind {
    Chatbot,
    Contact,
}

impl LeadKind {
    pub fn table(self) -> &'static str {
        match self {
            LeadKind::Chatbot => "chatbot_leads",
            LeadKind::Contact => "contact_form_leads",
        }
    }

    pub fn status_column(self) -> &'static str {
        match self {
            LeadKind::Chatbot => "conversion_status",
            LeadKind::Contact => "status",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ChatbotLead {
    pub id: Uuid,
    pub company_id: Uuid,
    pub name: Option<String>,
    pub contact_whatsapp: Option<String>,
    pub contact_email: Option<String>,
    pub age: Option<i32>,
    pub height: Option<f64>,
    pub weight: Option<f64>,
    pub bmi: Option<f64>,
    pub primary_goal: Option<String>,
    pub experience_level: Option<String>,
    pub workout_preference: Option<String>,
    pub selected_plan_id: Option<Uuid>,
    pub steps_completed: i32,
    pub total_steps: i32,
    pub completion_rate: i32,
    pub conversion_status: ConversionStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ContactLead {
    pub id: Uuid,
    pub company_id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub message: Option<String>,
    pub contacted: bool,
    pub status: ConversionStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Questionnaire length recorded for chatbot-kind leads entered by hand.
pub const MANUAL_CHATBOT_TOTAL_STEPS: i32 = 8;

/// A row about to be written to `chatbot_leads`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewChatbotLead {
    pub company_id: Uuid,
    pub name: Option<String>,
    pub contact_whatsapp: Option<String>,
    pub contact_email: Option<String>,
    pub age: Option<i32>,
    pub height: Option<f64>,
    pub weight: Option<f64>,
    pub bmi: Option<f64>,
    pub primary_goal: Option<String>,
    pub experience_level: Option<String>,
    pub workout_preference: Option<String>,
    pub selected_plan_id: Option<Uuid>,
    pub steps_completed: i32,
    pub total_steps: i32,
    pub completion_rate: i32,
    pub notes: Option<String>,
}

/// A row about to be written to `contact_form_leads`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewContactLead {
    pub company_id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub message: Option<String>,
    pub notes: Option<String>,
}

/// Either kind of lead, tagged for the admin list.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Lead {
    Chatbot(ChatbotLead),
    Contact(ContactLead),
}

impl Lead {
    pub fn kind(&self) -> LeadKind {
        match self {
            Lead::Chatbot(_) => LeadKind::Chatbot,
            Lead::Contact(_) => LeadKind::Contact,
        }
    }

    pub fn status(&self) -> ConversionStatus {
        match self {
            Lead::Chatbot(l) => l.conversion_status,
            Lead::Contact(l) => l.status,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            Lead::Chatbot(l) => l.created_at,
            Lead::Contact(l) => l.created_at,
        }
    }

    /// Case-insensitive match on name, email or phone.
    pub fn matches(&self, term: &str) -> bool {
        let term = term.to_lowercase();
        let fields: [Option<&str>; 3] = match self {
            Lead::Chatbot(l) => [
                l.name.as_deref(),
                l.contact_email.as_deref(),
                l.contact_whatsapp.as_deref(),
            ],
            Lead::Contact(l) => [Some(l.name.as_str()), l.email.as_deref(), l.phone.as_deref()],
        };
        fields
            .iter()
            .flatten()
            .any(|f| f.to_lowercase().contains(&term))
    }
}

/// weight / height², only when both are positive. Never rounded here.
pub fn compute_bmi(height: Option<f64>, weight: Option<f64>) -> Option<f64> {
    match (height, weight) {
        (Some(h), Some(w)) if h > 0.0 && w > 0.0 => Some(w / (h * h)),
        _ => None,
    }
}
