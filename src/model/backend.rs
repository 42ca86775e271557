use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    error::BackendError,
    model::{
        output::TaskOutput,
        types::{GenerationParams, GenerationResult, TaskKind},
    },
};

/// A loaded generation runtime. Returns the task-shaped payload untouched;
/// interpretation happens in [`TaskOutput`].
///
/// `cancel` fires once nobody waits for the result any more, e.g. after a
/// timeout. Work running outside the async task should stop when it does.
#[async_trait]
pub trait Pipeline: Send + Sync {
    async fn run(
        &self,
        prompt: &str,
        params: GenerationParams,
        cancel: CancellationToken,
    ) -> Result<Value, BackendError>;
}

/// Builds the pipeline for a task/model pair. Called at most once per
/// successful [`GenerationBackend::initialize`].
#[async_trait]
pub trait PipelineFactory: Send + Sync {
    async fn build(&self, spec: &PipelineSpec) -> Result<Arc<dyn Pipeline>, BackendError>;
}

#[derive(Debug, Clone)]
pub struct PipelineSpec {
    pub task: TaskKind,
    pub model_id: String,
}

pub struct GenerationBackend {
    spec: PipelineSpec,
    timeout: Duration,
    factory: Arc<dyn PipelineFactory>,
    pipeline: OnceCell<Arc<dyn Pipeline>>,
}

impl GenerationBackend {
    pub fn new(spec: PipelineSpec, timeout: Duration, factory: Arc<dyn PipelineFactory>) -> Self {
        Self {
            spec,
            timeout,
            factory,
            pipeline: OnceCell::new(),
        }
    }

    pub fn spec(&self) -> &PipelineSpec {
        &self.spec
    }

    pub fn is_ready(&self) -> bool {
        self.pipeline.initialized()
    }

    /// Loads the pipeline once. Concurrent callers wait on the same build; a
    /// failed build leaves the slot empty so the next call retries.
    pub async fn initialize(&self) -> Result<Arc<dyn Pipeline>, BackendError> {
        let pipeline = self
            .pipeline
            .get_or_try_init(|| async {
                info!(
                    task = %self.spec.task,
                    model = %self.spec.model_id,
                    "loading generation pipeline"
                );
                let started = Instant::now();
                let pipeline = self.factory.build(&self.spec).await?;
                info!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "generation pipeline ready"
                );
                Ok::<_, BackendError>(pipeline)
            })
            .await?;
        Ok(pipeline.clone())
    }

    /// Runs one generation and surfaces backend failures as errors.
    pub async fn try_generate(
        &self,
        prompt: &str,
        params: GenerationParams,
    ) -> Result<GenerationResult, BackendError> {
        let start = Instant::now();
        let pipeline = self.initialize().await?;

        let cancel = CancellationToken::new();
        let _cancel_on_drop = cancel.clone().drop_guard();
        let raw = tokio::time::timeout(self.timeout, pipeline.run(prompt, params, cancel))
            .await
            .map_err(|_| BackendError::Timeout(self.timeout))??;
        let elapsed = start.elapsed();

        let response_text = TaskOutput::from_raw(self.spec.task, &raw)?.into_text(prompt);

        Ok(GenerationResult {
            response_text,
            elapsed_seconds: elapsed.as_secs_f64(),
            used_params: params,
            model_id: self.spec.model_id.clone(),
            task_kind: self.spec.task,
        })
    }

    /// Runs one generation. Backend failures come back as an error-shaped
    /// result so the interaction can still be recorded.
    pub async fn generate(&self, prompt: &str, params: GenerationParams) -> GenerationResult {
        let start = Instant::now();
        match self.try_generate(prompt, params).await {
            Ok(result) => result,
            Err(err) => {
                warn!(
                    kind = "backend_unavailable",
                    model = %self.spec.model_id,
                    error = %err,
                    "generation failed"
                );
                GenerationResult {
                    response_text: format!("Error generating response: {err}"),
                    elapsed_seconds: start.elapsed().as_secs_f64(),
                    used_params: params,
                    model_id: self.spec.model_id.clone(),
                    task_kind: TaskKind::Unknown,
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Pipeline answering every prompt with a fixed payload.
    pub struct StaticPipeline {
        pub payload: Value,
    }

    #[async_trait]
    impl Pipeline for StaticPipeline {
        async fn run(
            &self,
            _prompt: &str,
            _params: GenerationParams,
            _cancel: CancellationToken,
        ) -> Result<Value, BackendError> {
            Ok(self.payload.clone())
        }
    }

    /// Pipeline echoing the prompt followed by a fixed continuation, the way
    /// causal models answer.
    pub struct EchoPipeline {
        pub continuation: String,
    }

    #[async_trait]
    impl Pipeline for EchoPipeline {
        async fn run(
            &self,
            prompt: &str,
            _params: GenerationParams,
            _cancel: CancellationToken,
        ) -> Result<Value, BackendError> {
            Ok(serde_json::json!([{ "generated_text": format!("{prompt} {}", self.continuation) }]))
        }
    }

    /// Factory that counts builds and hands out a shared pipeline.
    pub struct CountingFactory {
        pub builds: AtomicUsize,
        pub failures_before_success: AtomicUsize,
        pub build_delay: Duration,
        pub pipeline: Arc<dyn Pipeline>,
    }

    impl CountingFactory {
        pub fn new(pipeline: Arc<dyn Pipeline>) -> Self {
            Self {
                builds: AtomicUsize::new(0),
                failures_before_success: AtomicUsize::new(0),
                build_delay: Duration::ZERO,
                pipeline,
            }
        }

        pub fn builds(&self) -> usize {
            self.builds.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PipelineFactory for CountingFactory {
        async fn build(&self, _spec: &PipelineSpec) -> Result<Arc<dyn Pipeline>, BackendError> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            if !self.build_delay.is_zero() {
                tokio::time::sleep(self.build_delay).await;
            }
            let remaining = self.failures_before_success.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures_before_success
                    .store(remaining - 1, Ordering::SeqCst);
                return Err(BackendError::Initialization("model files missing".into()));
            }
            Ok(self.pipeline.clone())
        }
    }

    pub fn backend_with(task: TaskKind, factory: Arc<dyn PipelineFactory>) -> GenerationBackend {
        GenerationBackend::new(
            PipelineSpec {
                task,
                model_id: "demo".into(),
            },
            Duration::from_secs(5),
            factory,
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use serde_json::json;

    use super::testing::*;
    use super::*;
    use crate::model::types::{EMPTY_RESPONSE_PLACEHOLDER, ParamDefaults, RawGenerationParams};

    fn params() -> GenerationParams {
        GenerationParams::resolve(RawGenerationParams::default(), ParamDefaults::default())
    }

    struct SlowPipeline;

    #[async_trait]
    impl Pipeline for SlowPipeline {
        async fn run(
            &self,
            _prompt: &str,
            _params: GenerationParams,
            _cancel: CancellationToken,
        ) -> Result<Value, BackendError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(json!([{ "generated_text": "late" }]))
        }
    }

    struct BrokenPipeline;

    #[async_trait]
    impl Pipeline for BrokenPipeline {
        async fn run(
            &self,
            _prompt: &str,
            _params: GenerationParams,
            _cancel: CancellationToken,
        ) -> Result<Value, BackendError> {
            Err(BackendError::Inference("CUDA out of memory".into()))
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_calls_build_pipeline_once() {
        let mut factory = CountingFactory::new(Arc::new(EchoPipeline {
            continuation: "done".into(),
        }));
        factory.build_delay = Duration::from_millis(50);
        let factory = Arc::new(factory);
        let backend = Arc::new(backend_with(TaskKind::TextGeneration, factory.clone()));

        let mut handles = Vec::new();
        for i in 0..16 {
            let backend = backend.clone();
            handles.push(tokio::spawn(async move {
                backend.generate(&format!("prompt {i}"), params()).await
            }));
        }
        for handle in handles {
            let result = handle.await.unwrap();
            assert_eq!(result.response_text, "done");
            assert_eq!(result.task_kind, TaskKind::TextGeneration);
        }

        assert_eq!(factory.builds(), 1);
        assert!(backend.is_ready());
    }

    #[tokio::test]
    async fn failed_initialization_can_be_retried() {
        let factory = CountingFactory::new(Arc::new(EchoPipeline {
            continuation: "ok".into(),
        }));
        factory.failures_before_success.store(1, Ordering::SeqCst);
        let factory = Arc::new(factory);
        let backend = backend_with(TaskKind::TextGeneration, factory.clone());

        let err = backend.initialize().await.err().expect("first build fails");
        assert!(matches!(err, BackendError::Initialization(_)));
        assert!(!backend.is_ready());

        backend.initialize().await.expect("second build succeeds");
        assert!(backend.is_ready());
        assert_eq!(factory.builds(), 2);
    }

    #[tokio::test]
    async fn initialization_failure_is_folded_into_result() {
        let factory = CountingFactory::new(Arc::new(EchoPipeline {
            continuation: "ok".into(),
        }));
        factory.failures_before_success.store(1, Ordering::SeqCst);
        let backend = backend_with(TaskKind::TextGeneration, Arc::new(factory));

        let result = backend.generate("Explain X", params()).await;
        assert!(result.is_backend_failure());
        assert_eq!(result.task_kind, TaskKind::Unknown);
        assert!(result.response_text.contains("model files missing"));
        assert_eq!(result.model_id, "demo");
        assert_eq!(result.used_params, params());
    }

    #[tokio::test]
    async fn inference_failure_is_folded_into_result() {
        let backend = backend_with(
            TaskKind::TextGeneration,
            Arc::new(CountingFactory::new(Arc::new(BrokenPipeline))),
        );

        assert!(backend.try_generate("hi", params()).await.is_err());

        let result = backend.generate("hi", params()).await;
        assert!(result.is_backend_failure());
        assert!(result.response_text.starts_with("Error generating response:"));
        assert!(result.response_text.contains("CUDA out of memory"));
    }

    #[tokio::test]
    async fn slow_pipeline_hits_timeout() {
        let backend = GenerationBackend::new(
            PipelineSpec {
                task: TaskKind::TextGeneration,
                model_id: "demo".into(),
            },
            Duration::from_millis(20),
            Arc::new(CountingFactory::new(Arc::new(SlowPipeline))),
        );

        let err = backend.try_generate("hi", params()).await.unwrap_err();
        assert!(matches!(err, BackendError::Timeout(_)));
    }

    /// Blocking worker that spins until its token fires, like the torch loop.
    struct BlockingPipeline {
        stopped: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Pipeline for BlockingPipeline {
        async fn run(
            &self,
            _prompt: &str,
            _params: GenerationParams,
            cancel: CancellationToken,
        ) -> Result<Value, BackendError> {
            let stopped = self.stopped.clone();
            tokio::task::spawn_blocking(move || {
                while !cancel.is_cancelled() {
                    std::thread::sleep(Duration::from_millis(5));
                }
                stopped.store(true, Ordering::SeqCst);
                Ok(json!([{ "generated_text": "late" }]))
            })
            .await
            .map_err(|err| BackendError::Inference(err.to_string()))?
        }
    }

    #[tokio::test]
    async fn timeout_cancels_blocking_generation() {
        let stopped = Arc::new(AtomicBool::new(false));
        let backend = GenerationBackend::new(
            PipelineSpec {
                task: TaskKind::TextGeneration,
                model_id: "demo".into(),
            },
            Duration::from_millis(20),
            Arc::new(CountingFactory::new(Arc::new(BlockingPipeline {
                stopped: stopped.clone(),
            }))),
        );

        let err = backend.try_generate("hi", params()).await.unwrap_err();
        assert!(matches!(err, BackendError::Timeout(_)));

        for _ in 0..200 {
            if stopped.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(stopped.load(Ordering::SeqCst), "worker kept running after timeout");
    }

    #[tokio::test]
    async fn echoed_prompt_only_yields_placeholder() {
        let backend = backend_with(
            TaskKind::TextGeneration,
            Arc::new(CountingFactory::new(Arc::new(StaticPipeline {
                payload: json!([{ "generated_text": "Explain X" }]),
            }))),
        );

        let result = backend.generate("Explain X", params()).await;
        assert!(!result.is_backend_failure());
        assert_eq!(result.response_text, EMPTY_RESPONSE_PLACEHOLDER);
        assert!(result.elapsed_seconds >= 0.0);
    }

    #[tokio::test]
    async fn summarization_task_reads_summary_shape() {
        let backend = backend_with(
            TaskKind::Summarization,
            Arc::new(CountingFactory::new(Arc::new(StaticPipeline {
                payload: json!([{ "summary_text": "A short summary." }]),
            }))),
        );

        let result = backend.generate("A very long article", params()).await;
        assert_eq!(result.response_text, "A short summary.");
        assert_eq!(result.task_kind, TaskKind::Summarization);
    }
}
