mod backend;
mod output;
mod registry;
mod remote;
mod types;

#[cfg(feature = "tch-backend")]
mod loader;

#[cfg(test)]
pub(crate) use backend::testing;

pub use crate::error::BackendError;
pub use backend::{GenerationBackend, Pipeline, PipelineFactory, PipelineSpec};
pub use output::TaskOutput;
pub use registry::PipelineRegistry;
pub use remote::RemotePipeline;
pub use types::{
    DEFAULT_MAX_NEW_TOKENS, DEFAULT_TEMPERATURE, EMPTY_RESPONSE_PLACEHOLDER, GenerationParams,
    GenerationResult, MAX_NEW_TOKENS_LIMIT, ParamDefaults, RawGenerationParams, TaskKind,
};

#[cfg(feature = "tch-backend")]
pub use loader::TorchPipeline;
