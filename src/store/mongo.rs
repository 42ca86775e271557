use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::{
    Client, Collection, IndexModel,
    bson::{self, Bson, Document, doc, oid::ObjectId},
    options::{FindOptions, IndexOptions},
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    model::GenerationParams,
    store::{
        InteractionFilter, InteractionPage, InteractionRecord, InteractionStore, NewInteraction,
        PageRequest, SortSpec, StoreError, validate_new,
    },
};

const INDEXED_FIELDS: [&str; 3] = ["session_id", "created_at", "model"];

/// Interactions stored in one MongoDB collection.
#[derive(Clone)]
pub struct MongoInteractionStore {
    collection: Collection<InteractionDocument>,
}

#[derive(Debug, Serialize, Deserialize)]
struct InteractionDocument {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    id: Option<ObjectId>,
    session_id: String,
    prompt: String,
    response: String,
    model: String,
    task: String,
    params: GenerationParams,
    latency_seconds: f64,
    created_at: bson::DateTime,
}

impl InteractionDocument {
    fn from_new(record: NewInteraction, now: DateTime<Utc>) -> Self {
        let created_at = record.created_at.unwrap_or(now);
        Self {
            id: None,
            session_id: record.session_id,
            prompt: record.prompt,
            response: record.response,
            model: record.model,
            task: record.task,
            params: record.params,
            latency_seconds: record.latency_seconds,
            created_at: bson::DateTime::from_millis(created_at.timestamp_millis()),
        }
    }

    fn into_record(self) -> Result<InteractionRecord, StoreError> {
        let id = self
            .id
            .ok_or_else(|| StoreError::Decode("document without _id".into()))?;
        let created_at = DateTime::<Utc>::from_timestamp_millis(self.created_at.timestamp_millis())
            .ok_or_else(|| StoreError::Decode(format!("created_at out of range for {id}")))?;

        Ok(InteractionRecord {
            id: id.to_hex(),
            session_id: self.session_id,
            prompt: self.prompt,
            response: self.response,
            model: self.model,
            task: self.task,
            params: self.params,
            latency_seconds: self.latency_seconds,
            created_at,
        })
    }
}

impl MongoInteractionStore {
    /// Connects and makes sure the query indexes exist. Connection and index
    /// setup are retried with exponential backoff, `retries` extra attempts.
    pub async fn connect(
        uri: &str,
        db_name: &str,
        collection: &str,
        retries: u32,
    ) -> Result<Self, StoreError> {
        let mut delay = Duration::from_millis(250);
        let mut attempt = 0;
        loop {
            match Self::try_connect(uri, db_name, collection).await {
                Ok(store) => return Ok(store),
                Err(err) if attempt < retries => {
                    attempt += 1;
                    warn!(
                        kind = "store_unavailable",
                        attempt,
                        error = %err,
                        "mongo setup failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(Duration::from_secs(5));
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn try_connect(uri: &str, db_name: &str, collection: &str) -> Result<Self, StoreError> {
        let client = Client::with_uri_str(uri).await?;
        let collection = client
            .database(db_name)
            .collection::<InteractionDocument>(collection);
        let store = Self { collection };
        store.ensure_indexes().await?;
        info!(db = db_name, collection = store.collection.name(), "interaction store ready");
        Ok(store)
    }

    /// Creating an index that already exists is a no-op in MongoDB, so this is
    /// safe on every startup.
    pub async fn ensure_indexes(&self) -> Result<(), StoreError> {
        for field in INDEXED_FIELDS {
            let mut keys = Document::new();
            keys.insert(field, -1);
            let model = IndexModel::builder()
                .keys(keys)
                .options(
                    IndexOptions::builder()
                        .name(format!("{field}_-1"))
                        .build(),
                )
                .build();
            self.collection.create_index(model, None).await?;
        }
        Ok(())
    }

    async fn find(
        &self,
        filter: &InteractionFilter,
        sort: SortSpec,
        window: Option<PageRequest>,
    ) -> Result<Vec<InteractionRecord>, StoreError> {
        let documents: Vec<InteractionDocument> = self
            .collection
            .find(build_filter(filter), find_options(sort, window))
            .await?
            .try_collect()
            .await?;

        documents
            .into_iter()
            .map(InteractionDocument::into_record)
            .collect()
    }
}

/// Query document for a filter: exact `session_id` / `model`, and a literal,
/// case-insensitive match on `prompt` or `response`.
pub fn build_filter(filter: &InteractionFilter) -> Document {
    let mut query = Document::new();
    if let Some(session_id) = &filter.session_id {
        query.insert("session_id", session_id.as_str());
    }
    if let Some(model) = &filter.model {
        query.insert("model", model.as_str());
    }
    if let Some(q) = &filter.q {
        let pattern = regex::escape(q);
        query.insert(
            "$or",
            vec![
                Bson::Document(doc! { "prompt": { "$regex": pattern.as_str(), "$options": "i" } }),
                Bson::Document(doc! { "response": { "$regex": pattern.as_str(), "$options": "i" } }),
            ],
        );
    }
    query
}

/// Sort document for a [`SortSpec`]. `_id` breaks ties so that `skip`/`limit`
/// windows over equal keys stay disjoint between queries.
pub fn build_sort(sort: SortSpec) -> Document {
    let mut spec = Document::new();
    spec.insert(sort.field.as_str(), sort.direction.as_i32());
    spec.insert("_id", sort.direction.as_i32());
    spec
}

/// Find options for one page, or for every match when `window` is `None`.
pub fn find_options(sort: SortSpec, window: Option<PageRequest>) -> FindOptions {
    let mut options = FindOptions::builder().sort(build_sort(sort)).build();
    if let Some(page) = window {
        options.skip = Some(page.skip());
        options.limit = Some(page.page_size as i64);
    }
    options
}

#[async_trait]
impl InteractionStore for MongoInteractionStore {
    async fn insert(&self, record: NewInteraction) -> Result<String, StoreError> {
        validate_new(&record)?;
        let document = InteractionDocument::from_new(record, Utc::now());
        let result = self.collection.insert_one(document, None).await?;
        match result.inserted_id {
            Bson::ObjectId(id) => Ok(id.to_hex()),
            other => Ok(other.to_string()),
        }
    }

    async fn list(
        &self,
        filter: &InteractionFilter,
        page: PageRequest,
        sort: SortSpec,
    ) -> Result<InteractionPage, StoreError> {
        let total = self
            .collection
            .count_documents(build_filter(filter), None)
            .await?;
        let items = self.find(filter, sort, Some(page)).await?;

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
        self.find(filter, sort, None).await
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::store::{SortDirection, SortField};

    #[test]
    fn empty_filter_matches_everything() {
        assert_eq!(build_filter(&InteractionFilter::default()), Document::new());
    }

    #[test]
    fn filter_combines_exact_fields_and_text_search() {
        let filter = InteractionFilter::new(
            Some("session-1".into()),
            Some("distilgpt2".into()),
            Some("a.b (c)".into()),
        );
        let query = build_filter(&filter);

        assert_eq!(query.get_str("session_id").unwrap(), "session-1");
        assert_eq!(query.get_str("model").unwrap(), "distilgpt2");

        let clauses = query.get_array("$or").unwrap();
        assert_eq!(clauses.len(), 2);
        let prompt = clauses[0].as_document().unwrap().get_document("prompt").unwrap();
        assert_eq!(prompt.get_str("$regex").unwrap(), r"a\.b \(c\)");
        assert_eq!(prompt.get_str("$options").unwrap(), "i");
        let response = clauses[1].as_document().unwrap();
        assert!(response.contains_key("response"));
    }

    #[test]
    fn sort_defaults_to_newest_first() {
        assert_eq!(
            build_sort(SortSpec::default()),
            doc! { "created_at": -1, "_id": -1 }
        );
        let sort = SortSpec {
            field: SortField::LatencySeconds,
            direction: SortDirection::Asc,
        };
        assert_eq!(build_sort(sort), doc! { "latency_seconds": 1, "_id": 1 });
    }

    #[test]
    fn page_window_maps_to_skip_and_limit() {
        let options = find_options(SortSpec::default(), Some(PageRequest::new(Some(3), Some(7))));
        assert_eq!(options.skip, Some(14));
        assert_eq!(options.limit, Some(7));
        assert_eq!(options.sort, Some(doc! { "created_at": -1, "_id": -1 }));

        let options = find_options(SortSpec::default(), Some(PageRequest::new(None, None)));
        assert_eq!(options.skip, Some(0));
        assert_eq!(options.limit, Some(10));

        let options = find_options(SortSpec::default(), None);
        assert_eq!(options.skip, None);
        assert_eq!(options.limit, None);
    }

    #[test]
    fn document_without_id_fails_to_decode() {
        let new = NewInteraction {
            session_id: "s".into(),
            prompt: "p".into(),
            response: "r".into(),
            model: "m".into(),
            task: "text-generation".into(),
            params: GenerationParams {
                max_new_tokens: 10,
                temperature: 0.5,
            },
            latency_seconds: 0.1,
            created_at: None,
        };
        let document = InteractionDocument::from_new(new, Utc::now());
        assert!(matches!(document.into_record(), Err(StoreError::Decode(_))));
    }

    async fn live_store() -> Option<MongoInteractionStore> {
        let uri = std::env::var("TEST_MONGO_URI").ok()?;
        let collection = format!("interactions_test_{}", Uuid::new_v4().simple());
        let store = MongoInteractionStore::connect(&uri, "prompt_history_test", &collection, 0)
            .await
            .expect("mongo should connect");
        Some(store)
    }

    #[tokio::test]
    async fn live_insert_list_and_export() {
        let store = match live_store().await {
            Some(s) => s,
            None => return,
        };
        // indexes are idempotent
        store.ensure_indexes().await.expect("second index pass");

        let session = Uuid::new_v4().to_string();
        // Shared timestamp so paging has to rely on the tie-breaker.
        let created_at = Utc::now();
        for prompt in ["Say HELLO", "unrelated", "third", "fourth", "fifth"] {
            store
                .insert(NewInteraction {
                    session_id: session.clone(),
                    prompt: prompt.into(),
                    response: "ok".into(),
                    model: "demo".into(),
                    task: "text-generation".into(),
                    params: GenerationParams {
                        max_new_tokens: 128,
                        temperature: 0.7,
                    },
                    latency_seconds: 0.5,
                    created_at: Some(created_at),
                })
                .await
                .expect("insert");
        }

        let filter = InteractionFilter::new(Some(session.clone()), None, None);
        let page = store
            .list(&filter, PageRequest::new(Some(1), Some(2)), SortSpec::default())
            .await
            .expect("list");
        assert_eq!(page.total, 5);
        assert_eq!(page.total_pages(), 3);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].params.max_new_tokens, 128);
        assert_eq!(page.items[0].session_id, session);

        let mut seen = Vec::new();
        for number in 1..=page.total_pages() {
            let page = store
                .list(
                    &filter,
                    PageRequest::new(Some(number as i64), Some(2)),
                    SortSpec::default(),
                )
                .await
                .expect("list page");
            seen.extend(page.items.into_iter().map(|r| r.id));
        }
        let mut unique = seen.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(seen.len(), 5);
        assert_eq!(unique.len(), 5);

        let filter = InteractionFilter::new(Some(session), None, Some("hello".into()));
        let found = store
            .export_all(&filter, SortSpec::default())
            .await
            .expect("export");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].prompt, "Say HELLO");

        store.collection.drop(None).await.expect("drop test collection");
    }
}
