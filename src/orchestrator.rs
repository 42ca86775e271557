use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info};

use crate::{
    error::ServiceError,
    model::{GenerationBackend, GenerationParams, ParamDefaults, RawGenerationParams, TaskKind},
    store::{InteractionStore, NewInteraction},
};

pub const MAX_PROMPT_CHARS: usize = 2000;

/// Whether the interaction made it into the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Persistence {
    Stored { id: String },
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct OrchestratedResult {
    pub response_text: String,
    pub elapsed_seconds: f64,
    pub model: String,
    pub task: TaskKind,
    pub params: GenerationParams,
    pub backend_failed: bool,
    pub persistence: Persistence,
}

impl OrchestratedResult {
    pub fn record_id(&self) -> Option<&str> {
        match &self.persistence {
            Persistence::Stored { id } => Some(id),
            Persistence::Failed { .. } => None,
        }
    }
}

/// Ties generation to history: validate, generate, record.
pub struct Orchestrator {
    backend: Arc<GenerationBackend>,
    store: Arc<dyn InteractionStore>,
    defaults: ParamDefaults,
}

impl Orchestrator {
    pub fn new(
        backend: Arc<GenerationBackend>,
        store: Arc<dyn InteractionStore>,
        defaults: ParamDefaults,
    ) -> Self {
        Self {
            backend,
            store,
            defaults,
        }
    }

    pub fn backend(&self) -> &GenerationBackend {
        &self.backend
    }

    pub fn store(&self) -> &Arc<dyn InteractionStore> {
        &self.store
    }

    /// Runs one prompt end to end. Store failures do not discard the
    /// generated text; they are logged and reported in `persistence`.
    pub async fn handle_generation_request(
        &self,
        session_id: &str,
        raw_prompt: &str,
        raw_params: RawGenerationParams,
    ) -> Result<OrchestratedResult, ServiceError> {
        let session_id = session_id.trim();
        if session_id.is_empty() {
            return Err(ServiceError::Validation("session id must not be empty".into()));
        }
        let prompt = validate_prompt(raw_prompt)?;
        let params = GenerationParams::resolve(raw_params, self.defaults);

        let result = self.backend.generate(prompt, params).await;

        let record = NewInteraction {
            session_id: session_id.to_string(),
            prompt: prompt.to_string(),
            response: result.response_text.clone(),
            model: result.model_id.clone(),
            task: result.task_kind.to_string(),
            params: result.used_params,
            latency_seconds: result.elapsed_seconds,
            created_at: None,
        };

        let persistence = match self.store.insert(record).await {
            Ok(id) => {
                info!(
                    session_id,
                    record_id = %id,
                    latency_seconds = result.elapsed_seconds,
                    backend_failed = result.is_backend_failure(),
                    "interaction recorded"
                );
                Persistence::Stored { id }
            }
            Err(err) => {
                error!(
                    kind = "store_unavailable",
                    session_id,
                    error = %err,
                    "failed to record interaction"
                );
                Persistence::Failed {
                    reason: err.to_string(),
                }
            }
        };

        Ok(OrchestratedResult {
            backend_failed: result.is_backend_failure(),
            response_text: result.response_text,
            elapsed_seconds: result.elapsed_seconds,
            model: result.model_id,
            task: result.task_kind,
            params: result.used_params,
            persistence,
        })
    }
}

fn validate_prompt(raw: &str) -> Result<&str, ServiceError> {
    let prompt = raw.trim();
    if prompt.is_empty() {
        return Err(ServiceError::Validation("prompt must not be empty".into()));
    }
    let chars = prompt.chars().count();
    if chars > MAX_PROMPT_CHARS {
        return Err(ServiceError::Validation(format!(
            "prompt is {chars} characters, the limit is {MAX_PROMPT_CHARS}"
        )));
    }
    Ok(prompt)
}
