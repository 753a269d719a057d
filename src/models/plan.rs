use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ServicePlan {
    pub id: Uuid,
    pub company_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub price: f64,
    pub features: serde_json::Value,
    pub highlight: bool,
    pub active: bool,
    pub order_index: i32,
    pub created_at: DateTime<Utc>,
}

impl ServicePlan {
    /// `features` is stored as JSON; anything that isn't an array of strings reads as empty.
    pub fn feature_list(&self) -> Vec<String> {
        self.features
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Name and price only; what lead notes and emails carry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanSummary {
    pub id: Uuid,
    pub name: String,
    pub price: f64,
}

impl From<&ServicePlan> for PlanSummary {
    fn from(p: &ServicePlan) -> Self {
        Self {
            id: p.id,
            name: p.name.clone(),
            price: p.price,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PublicPlan {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub price: f64,
    pub features: Vec<String>,
    pub highlight: bool,
}

impl From<ServicePlan> for PublicPlan {
    fn from(p: ServicePlan) -> Self {
        let features = p.feature_list();
        Self {
            id: p.id,
            name: p.name,
            description: p.description,
            price: p.price,
            features,
            highlight: p.highlight,
        }
    }
}
