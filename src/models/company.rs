use serde::Serialize;
use sqlx::FromRow;

pub const DEFAULT_TRAINER_NAME: &str = "João";

/// The slice of `landing_page_content` the lead flows need.
#[derive(Debug, Clone, Serialize, FromRow, Default)]
pub struct CompanyContact {
    pub contact_email: Option<String>,
    pub about_name: Option<String>,
}

impl CompanyContact {
    pub fn trainer_name(&self) -> &str {
        self.about_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(DEFAULT_TRAINER_NAME)
    }
}
