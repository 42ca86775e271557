use std::sync::Arc;

use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use prompt_history_service::{
    AppConfig, AppState, GenerationBackend, InteractionStore, MemoryInteractionStore,
    MongoInteractionStore, Orchestrator, PipelineRegistry, build_router,
    config::StoreBackend,
    model::PipelineSpec,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Arc::new(AppConfig::from_env()?);
    tracing::info!(
        ?config.listen_addr,
        task = %config.task,
        model = %config.model_id,
        "starting prompt history service"
    );

    let store: Arc<dyn InteractionStore> = match config.store_backend {
        StoreBackend::Mongo => Arc::new(
            MongoInteractionStore::connect(
                &config.mongo_uri,
                &config.mongo_db_name,
                &config.mongo_collection,
                config.mongo_connect_retries,
            )
            .await?,
        ),
        StoreBackend::Memory => {
            tracing::warn!("using in-memory interaction store; history is lost on restart");
            Arc::new(MemoryInteractionStore::new())
        }
    };

    // The pipeline loads lazily on the first prompt.
    let backend = Arc::new(GenerationBackend::new(
        PipelineSpec {
            task: config.task,
            model_id: config.model_id.clone(),
        },
        config.generation_timeout,
        Arc::new(PipelineRegistry::new(config.clone())),
    ));

    let orchestrator = Arc::new(Orchestrator::new(backend, store, config.param_defaults()));
    let router = build_router(AppState {
        orchestrator,
        default_max_new_tokens: config.max_new_tokens,
    });

    let listener = TcpListener::bind(config.listen_addr).await?;
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "HTTP server ready");

    axum::serve(listener, router).await?;

    Ok(())
}

fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,hyper=warn,axum::rejection=trace".into());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
