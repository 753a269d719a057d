//! Autosaved drafts of the admin "new lead" form, one per admin.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

pub const DRAFT_MAX_AGE_HOURS: i64 = 24;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Draft {
    pub data: serde_json::Value,
    pub saved_at: DateTime<Utc>,
}

#[derive(Clone, Default)]
pub struct DraftStore {
    drafts: Arc<RwLock<HashMap<String, Draft>>>,
}

impl DraftStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn save(&self, owner: &str, data: serde_json::Value) -> Draft {
        self.save_at(owner, data, Utc::now()).await
    }

    async fn save_at(&self, owner: &str, data: serde_json::Value, now: DateTime<Utc>) -> Draft {
        let draft = Draft {
            data,
            saved_at: now,
        };
        self.drafts
            .write()
            .await
            .insert(owner.to_string(), draft.clone());
        draft
    }

    /// The draft, unless it is older than 24 hours (then it is dropped).
    pub async fn load(&self, owner: &str) -> Option<Draft> {
        self.load_at(owner, Utc::now()).await
    }

    async fn load_at(&self, owner: &str, now: DateTime<Utc>) -> Option<Draft> {
        let mut drafts = self.drafts.write().await;
        let draft = drafts.get(owner)?;
        if now - draft.saved_at > Duration::hours(DRAFT_MAX_AGE_HOURS) {
            drafts.remove(owner);
            return None;
        }
        Some(draft.clone())
    }

    pub async fn discard(&self, owner: &str) -> bool {
        self.drafts.write().await.remove(owner).is_some()
    }
}
