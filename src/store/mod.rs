mod memory;
mod mongo;
mod types;

use async_trait::async_trait;

pub use crate::error::StoreError;
pub use memory::MemoryInteractionStore;
pub use mongo::{MongoInteractionStore, build_filter, build_sort};
pub use types::{
    DEFAULT_PAGE_SIZE, InteractionFilter, InteractionPage, InteractionRecord, MAX_PAGE_SIZE,
    NewInteraction, PageRequest, SortDirection, SortField, SortSpec,
};

/// Persistence for prompt/response history. Records are write-once.
#[async_trait]
pub trait InteractionStore: Send + Sync {
    /// Persists one interaction and returns its store-assigned id.
    async fn insert(&self, record: NewInteraction) -> Result<String, StoreError>;

    /// One page of matching records plus the total match count.
    async fn list(
        &self,
        filter: &InteractionFilter,
        page: PageRequest,
        sort: SortSpec,
    ) -> Result<InteractionPage, StoreError>;

    /// Every matching record, in sort order.
    async fn export_all(
        &self,
        filter: &InteractionFilter,
        sort: SortSpec,
    ) -> Result<Vec<InteractionRecord>, StoreError>;
}

pub(crate) fn validate_new(record: &NewInteraction) -> Result<(), StoreError> {
    if record.session_id.trim().is_empty() {
        return Err(StoreError::InvalidRecord("session_id must not be empty".into()));
    }
    Ok(())
}
