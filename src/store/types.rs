use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::GenerationParams;

pub const DEFAULT_PAGE_SIZE: u64 = 10;
pub const MAX_PAGE_SIZE: u64 = 1000;

/// One persisted prompt/response exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub id: String,
    pub session_id: String,
    pub prompt: String,
    pub response: String,
    pub model: String,
    pub task: String,
    pub params: GenerationParams,
    pub latency_seconds: f64,
    pub created_at: DateTime<Utc>,
}

/// Insert payload. `created_at` is stamped by the store when absent.
#[derive(Debug, Clone, PartialEq)]
pub struct NewInteraction {
    pub session_id: String,
    pub prompt: String,
    pub response: String,
    pub model: String,
    pub task: String,
    pub params: GenerationParams,
    pub latency_seconds: f64,
    pub created_at: Option<DateTime<Utc>>,
}

impl NewInteraction {
    pub fn into_record(self, id: String, now: DateTime<Utc>) -> InteractionRecord {
        InteractionRecord {
            id,
            session_id: self.session_id,
            prompt: self.prompt,
            response: self.response,
            model: self.model,
            task: self.task,
            params: self.params,
            latency_seconds: self.latency_seconds,
            created_at: self.created_at.unwrap_or(now),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct InteractionFilter {
    pub session_id: Option<String>,
    pub model: Option<String>,
    /// Case-insensitive substring matched against prompt or response.
    pub q: Option<String>,
}

impl InteractionFilter {
    pub fn new(session_id: Option<String>, model: Option<String>, q: Option<String>) -> Self {
        Self {
            session_id: non_blank(session_id),
            model: non_blank(model),
            q: non_blank(q),
        }
    }

    /// Drops blank criteria so they behave as "no filter".
    pub fn normalized(self) -> Self {
        Self::new(self.session_id, self.model, self.q)
    }

    pub fn matches(&self, record: &InteractionRecord) -> bool {
        if let Some(session_id) = &self.session_id {
            if &record.session_id != session_id {
                return false;
            }
        }
        if let Some(model) = &self.model {
            if &record.model != model {
                return false;
            }
        }
        if let Some(q) = &self.q {
            let needle = q.to_lowercase();
            return record.prompt.to_lowercase().contains(&needle)
                || record.response.to_lowercase().contains(&needle);
        }
        true
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u64,
    pub page_size: u64,
}

impl PageRequest {
    pub fn new(page: Option<i64>, page_size: Option<i64>) -> Self {
        let page = page.unwrap_or(1).max(1) as u64;
        let page_size = page_size
            .unwrap_or(DEFAULT_PAGE_SIZE as i64)
            .clamp(1, MAX_PAGE_SIZE as i64) as u64;
        Self { page, page_size }
    }

    pub fn skip(&self) -> u64 {
        (self.page - 1).saturating_mul(self.page_size)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    CreatedAt,
    LatencySeconds,
    Model,
    SessionId,
}

impl SortField {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortField::CreatedAt => "created_at",
            SortField::LatencySeconds => "latency_seconds",
            SortField::Model => "model",
            SortField::SessionId => "session_id",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    pub fn as_i32(&self) -> i32 {
        match self {
            SortDirection::Asc => 1,
            SortDirection::Desc => -1,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SortSpec {
    pub field: SortField,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Serialize)]
pub struct InteractionPage {
    pub total: u64,
    pub page: u64,
    pub page_size: u64,
    pub items: Vec<InteractionRecord>,
}

impl InteractionPage {
    pub fn total_pages(&self) -> u64 {
        self.total.div_ceil(self.page_size.max(1))
    }

    pub fn has_next(&self) -> bool {
        self.page < self.total_pages()
    }
}
