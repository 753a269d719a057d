//! Frames exchanged with the chatbot widget over `/ws/chat`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::plan::PlanSummary;

use super::steps::{Field, StepDefinition};

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Open {
        #[serde(default)]
        plan_id: Option<Uuid>,
    },
    Answer {
        value: String,
    },
    Close,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Bot {
        content: String,
    },
    Typing {
        active: bool,
    },
    Question {
        index: usize,
        #[serde(flatten)]
        step: StepDefinition,
        placeholder: &'static str,
    },
    /// Echo of the accepted, normalized answer.
    Accepted {
        field: Field,
        value: String,
    },
    Invalid {
        field: Field,
        message: String,
    },
    Saving,
    RateLimited {
        remaining_secs: u64,
    },
    Completed {
        plan: Option<PlanSummary>,
        whatsapp_url: String,
    },
    Error {
        message: String,
    },
}

impl ServerFrame {
    pub fn bot(content: impl Into<String>) -> Self {
        ServerFrame::Bot {
            content: content.into(),
        }
    }

    pub fn question(index: usize, step: &StepDefinition) -> Self {
        ServerFrame::Question {
            index,
            step: *step,
            placeholder: step.placeholder(),
        }
    }
}
