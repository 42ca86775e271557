use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    config::{AppConfig, GenerationBackendKind},
    error::BackendError,
    model::{
        backend::{Pipeline, PipelineFactory, PipelineSpec},
        remote::RemotePipeline,
    },
};

/// Picks the pipeline implementation named by the service configuration.
pub struct PipelineRegistry {
    config: Arc<AppConfig>,
}

impl PipelineRegistry {
    pub fn new(config: Arc<AppConfig>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl PipelineFactory for PipelineRegistry {
    async fn build(&self, spec: &PipelineSpec) -> Result<Arc<dyn Pipeline>, BackendError> {
        match self.config.generation_backend {
            GenerationBackendKind::Remote => {
                let pipeline = RemotePipeline::new(
                    self.config.inference_endpoint.clone(),
                    self.config.inference_api_token.clone(),
                )?;
                Ok(Arc::new(pipeline))
            }
            GenerationBackendKind::Torch => self.build_torch(spec).await,
        }
    }
}

impl PipelineRegistry {
    #[cfg(feature = "tch-backend")]
    async fn build_torch(&self, spec: &PipelineSpec) -> Result<Arc<dyn Pipeline>, BackendError> {
        use crate::model::loader::TorchPipeline;

        let task = spec.task;
        let module_path = self.config.module_path.clone();
        let tokenizer_path = self.config.tokenizer_path.clone();
        let device = self.config.device;

        let pipeline = tokio::task::spawn_blocking(move || {
            TorchPipeline::load(task, &module_path, &tokenizer_path, device)
        })
        .await
        .map_err(|err| BackendError::Initialization(format!("loader task failed: {err}")))??;
        Ok(Arc::new(pipeline))
    }

    #[cfg(not(feature = "tch-backend"))]
    async fn build_torch(&self, spec: &PipelineSpec) -> Result<Arc<dyn Pipeline>, BackendError> {
        Err(BackendError::Initialization(format!(
            "cannot load {} locally: built without the tch-backend feature",
            spec.model_id
        )))
    }
}
