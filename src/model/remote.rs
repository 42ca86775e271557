use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    error::BackendError,
    model::{GenerationParams, backend::Pipeline},
};

/// Pipeline served by an HTTP inference endpoint that accepts
/// `{"inputs", "parameters"}` and answers with a list of task-shaped
/// candidates.
pub struct RemotePipeline {
    client: reqwest::Client,
    endpoint: String,
    api_token: Option<String>,
}

#[derive(Serialize)]
struct InferenceRequest<'a> {
    inputs: &'a str,
    parameters: InferenceParameters,
}

#[derive(Serialize)]
struct InferenceParameters {
    max_new_tokens: u32,
    temperature: f64,
    do_sample: bool,
}

impl RemotePipeline {
    pub fn new(endpoint: String, api_token: Option<String>) -> Result<Self, BackendError> {
        if endpoint.trim().is_empty() {
            return Err(BackendError::Initialization(
                "inference endpoint is not configured".into(),
            ));
        }
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| BackendError::Initialization(e.to_string()))?;

        Ok(Self {
            client,
            endpoint,
            api_token,
        })
    }
}

#[async_trait]
impl Pipeline for RemotePipeline {
    // Dropping the request future aborts the HTTP call, so the token is unused.
    async fn run(
        &self,
        prompt: &str,
        params: GenerationParams,
        _cancel: CancellationToken,
    ) -> Result<Value, BackendError> {
        let body = InferenceRequest {
            inputs: prompt,
            parameters: InferenceParameters {
                max_new_tokens: params.max_new_tokens,
                temperature: params.temperature,
                // Zero temperature means greedy decoding.
                do_sample: params.temperature > 0.0,
            },
        };

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(token) = self.api_token.as_deref() {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| BackendError::Inference(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(BackendError::Inference(format!(
                "endpoint returned {status}: {}",
                detail.trim()
            )));
        }

        let payload = response
            .json::<Value>()
            .await
            .map_err(|e| BackendError::MalformedOutput(e.to_string()))?;
        debug!(endpoint = %self.endpoint, "inference endpoint answered");
        Ok(payload)
    }
}
