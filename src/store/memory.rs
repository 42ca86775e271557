use std::cmp::Ordering;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::store::{
    InteractionFilter, InteractionPage, InteractionRecord, InteractionStore, NewInteraction,
    PageRequest, SortDirection, SortField, SortSpec, StoreError, validate_new,
};

/// Process-local store kept in insertion order. Used for tests and for
/// running the service without a database.
#[derive(Default)]
pub struct MemoryInteractionStore {
    records: RwLock<Vec<InteractionRecord>>,
}

impl MemoryInteractionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    fn matching(&self, filter: &InteractionFilter, sort: SortSpec) -> Vec<InteractionRecord> {
        let mut items: Vec<InteractionRecord> = self
            .records
            .read()
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        // Stable sort: ties keep insertion order.
        items.sort_by(|a, b| {
            let ord = compare(a, b, sort.field);
            match sort.direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            }
        });
        items
    }
}

fn compare(a: &InteractionRecord, b: &InteractionRecord, field: SortField) -> Ordering {
    match field {
        SortField::CreatedAt => a.created_at.cmp(&b.created_at),
        SortField::LatencySeconds => a.latency_seconds.total_cmp(&b.latency_seconds),
        SortField::Model => a.model.cmp(&b.model),
        SortField::SessionId => a.session_id.cmp(&b.session_id),
    }
}

#[async_trait]
impl InteractionStore for MemoryInteractionStore {
    async fn insert(&self, record: NewInteraction) -> Result<String, StoreError> {
        validate_new(&record)?;
        let id = Uuid::new_v4().simple().to_string();
        let record = record.into_record(id.clone(), Utc::now());
        self.records.write().push(record);
        Ok(id)
    }

    async fn list(
        &self,
        filter: &InteractionFilter,
        page: PageRequest,
        sort: SortSpec,
    ) -> Result<InteractionPage, StoreError> {
        let items = self.matching(filter, sort);
        let total = items.len() as u64;
        let items = items
            .into_iter()
            .skip(page.skip() as usize)
            .take(page.page_size as usize)
            .collect();

        Ok(InteractionPage {
            total,
            page: page.page,
            page_size: page.page_size,
            items,
        })
    }

    async fn export_all(
        &self,
        filter: &InteractionFilter,
        sort: SortSpec,
    ) -> Result<Vec<InteractionRecord>, StoreError> {
        Ok(self.matching(filter, sort))
    }
}
