pub mod config;
pub mod error;
pub mod export;
pub mod model;
pub mod orchestrator;
pub mod pages;
pub mod server;
pub mod session;
pub mod store;

pub use config::AppConfig;
pub use error::{BackendError, ServiceError, StoreError};
pub use model::{GenerationBackend, GenerationParams, GenerationResult, PipelineRegistry};
pub use orchestrator::{OrchestratedResult, Orchestrator};
pub use server::{AppState, build_router};
pub use store::{InteractionStore, MemoryInteractionStore, MongoInteractionStore};
