use std::{str::FromStr, sync::Arc};

use axum::{
    Form, Json, Router,
    extract::{Query, State},
    http::{HeaderValue, Method, StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use serde::{
    Deserialize, Deserializer, Serialize,
    de::{DeserializeOwned, IntoDeserializer, value::StringDeserializer},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use crate::{
    error::ServiceError,
    export::ExportFormat,
    model::RawGenerationParams,
    orchestrator::{OrchestratedResult, Orchestrator},
    pages::{self, ChatFormValues, ChatOutcome},
    session::BrowserSession,
    store::{InteractionFilter, InteractionPage, PageRequest, SortDirection, SortField, SortSpec},
};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub default_max_new_tokens: u32,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    pipeline_ready: bool,
    model: String,
    task: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatForm {
    pub prompt: String,
    #[serde(default)]
    pub max_new_tokens: String,
    #[serde(default)]
    pub temperature: String,
}

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub prompt: String,
    pub max_new_tokens: Option<i64>,
    pub temperature: Option<f64>,
    pub session_id: Option<String>,
}

/// Paging and sort fields fall back to their defaults when blank or
/// unparseable, since the history form always submits them.
#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub session_id: Option<String>,
    pub model: Option<String>,
    pub q: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub page: Option<i64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub page_size: Option<i64>,
    #[serde(default, deserialize_with = "lenient_enum")]
    pub sort: Option<SortField>,
    #[serde(default, deserialize_with = "lenient_enum")]
    pub dir: Option<SortDirection>,
}

fn lenient_number<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|v| v.trim().parse().ok()))
}

fn lenient_enum<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|v| {
        let value: StringDeserializer<serde::de::value::Error> =
            v.trim().to_lowercase().into_deserializer();
        T::deserialize(value).ok()
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct ExportQuery {
    pub format: Option<String>,
    pub session_id: Option<String>,
    pub model: Option<String>,
    pub q: Option<String>,
}

/// HTML rendering of a [`ServiceError`] for browser-facing routes.
struct PageError {
    session: BrowserSession,
    error: ServiceError,
}

impl IntoResponse for PageError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.error {
            ServiceError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ServiceError::Store(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "History is temporarily unavailable. Please try again.".to_string(),
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Something went wrong. Please try again.".to_string(),
            ),
        };
        let html = pages::error_page(&self.session.id, &message);
        (status, self.session, Html(html)).into_response()
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    let api = Router::new()
        .route("/generate", post(api_generate))
        .route("/history", get(api_history))
        .layer(cors);

    Router::new()
        .route("/", get(chat_form).post(chat_submit))
        .route("/history/", get(history))
        .route("/export/", get(export))
        .route("/health", get(health))
        .nest("/api", api)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let backend = state.orchestrator.backend();
    Json(HealthResponse {
        status: "ok",
        pipeline_ready: backend.is_ready(),
        model: backend.spec().model_id.clone(),
        task: backend.spec().task.to_string(),
    })
}

async fn chat_form(State(state): State<AppState>, session: BrowserSession) -> impl IntoResponse {
    let html = pages::chat_page(
        &session.id,
        state.default_max_new_tokens,
        &ChatFormValues::default(),
        None,
    );
    (session, Html(html))
}

async fn chat_submit(
    State(state): State<AppState>,
    session: BrowserSession,
    Form(form): Form<ChatForm>,
) -> Response {
    let values = ChatFormValues {
        prompt: form.prompt.clone(),
        max_new_tokens: form.max_new_tokens.clone(),
        temperature: form.temperature.clone(),
    };

    let outcome = match parse_form_params(&form) {
        Ok(params) => {
            state
                .orchestrator
                .handle_generation_request(&session.id, &form.prompt, params)
                .await
        }
        Err(err) => Err(err),
    };

    match outcome {
        Ok(result) => {
            // Clear the form after a successful answer.
            let html = pages::chat_page(
                &session.id,
                state.default_max_new_tokens,
                &ChatFormValues::default(),
                Some(ChatOutcome::Answered(&result)),
            );
            (session, Html(html)).into_response()
        }
        Err(ServiceError::Validation(message)) => {
            let html = pages::chat_page(
                &session.id,
                state.default_max_new_tokens,
                &values,
                Some(ChatOutcome::Rejected(&format!("Please check the form: {message}"))),
            );
            (StatusCode::BAD_REQUEST, session, Html(html)).into_response()
        }
        Err(error) => PageError { session, error }.into_response(),
    }
}

fn parse_form_params(form: &ChatForm) -> Result<RawGenerationParams, ServiceError> {
    let max_new_tokens = match form.max_new_tokens.trim() {
        "" => None,
        raw => Some(raw.parse::<i64>().map_err(|_| {
            ServiceError::Validation(format!("max_new_tokens must be a whole number, got {raw:?}"))
        })?),
    };
    let temperature = match form.temperature.trim() {
        "" => None,
        raw => Some(raw.parse::<f64>().map_err(|_| {
            ServiceError::Validation(format!("temperature must be a number, got {raw:?}"))
        })?),
    };
    Ok(RawGenerationParams {
        max_new_tokens,
        temperature,
    })
}

fn history_filter(
    session: &BrowserSession,
    session_id: Option<String>,
    model: Option<String>,
    q: Option<String>,
) -> InteractionFilter {
    // Without an explicit session the caller sees their own history.
    let session_id = session_id
        .filter(|s| !s.trim().is_empty())
        .or_else(|| Some(session.id.clone()));
    InteractionFilter::new(session_id, model, q)
}

fn sort_spec(query: &HistoryQuery) -> SortSpec {
    SortSpec {
        field: query.sort.unwrap_or_default(),
        direction: query.dir.unwrap_or_default(),
    }
}

async fn load_history(
    state: &AppState,
    session: &BrowserSession,
    query: HistoryQuery,
) -> Result<(InteractionFilter, SortSpec, InteractionPage), ServiceError> {
    let sort = sort_spec(&query);
    let page = PageRequest::new(query.page, query.page_size);
    let filter = history_filter(session, query.session_id, query.model, query.q);
    let result = state
        .orchestrator
        .store()
        .list(&filter, page, sort)
        .await?;
    Ok((filter, sort, result))
}

async fn history(
    State(state): State<AppState>,
    session: BrowserSession,
    Query(query): Query<HistoryQuery>,
) -> Response {
    match load_history(&state, &session, query).await {
        Ok((filter, sort, page)) => {
            let html = pages::history_page(&session.id, &filter, sort, &page);
            (session, Html(html)).into_response()
        }
        Err(error) => PageError { session, error }.into_response(),
    }
}

async fn export(
    State(state): State<AppState>,
    session: BrowserSession,
    Query(query): Query<ExportQuery>,
) -> Result<Response, ServiceError> {
    let format = ExportFormat::parse_lenient(query.format.as_deref());
    let filter = history_filter(&session, query.session_id, query.model, query.q);

    let records = state
        .orchestrator
        .store()
        .export_all(&filter, SortSpec::default())
        .await?;
    info!(count = records.len(), ?format, "exporting interactions");

    let body = format.render(&records)?;
    let disposition = format!("attachment; filename=\"{}\"", format.file_name());

    Ok((
        session,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(format.content_type())),
            (
                header::CONTENT_DISPOSITION,
                HeaderValue::from_str(&disposition)
                    .map_err(|e| ServiceError::Other(e.to_string()))?,
            ),
        ],
        body,
    )
        .into_response())
}

async fn api_generate(
    State(state): State<AppState>,
    session: BrowserSession,
    Json(request): Json<GenerateRequest>,
) -> Result<(BrowserSession, Json<OrchestratedResult>), ServiceError> {
    let session_id = request
        .session_id
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| session.id.clone());
    let params = RawGenerationParams {
        max_new_tokens: request.max_new_tokens,
        temperature: request.temperature,
    };

    let result = state
        .orchestrator
        .handle_generation_request(&session_id, &request.prompt, params)
        .await?;
    Ok((session, Json(result)))
}

async fn api_history(
    State(state): State<AppState>,
    session: BrowserSession,
    Query(query): Query<HistoryQuery>,
) -> Result<(BrowserSession, Json<InteractionPage>), ServiceError> {
    let (_, _, page) = load_history(&state, &session, query).await?;
    Ok((session, Json(page)))
}
