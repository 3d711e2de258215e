//! HTTP functions server.
//!
//! Exposes the scoring, schema-checking and LLM generation helpers over a
//! small JSON HTTP API for the site's front end and editors, plus the
//! contact-form lead endpoint.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version and model) |
//! | `POST` | `/functions/score` | Quality report for a markdown document |
//! | `POST` | `/functions/validate-schema` | Missing JSON-LD keys |
//! | `POST` | `/functions/speakable` | Generate a speakable answer |
//! | `POST` | `/functions/alt-text` | Generate alt text for an image URL |
//! | `POST` | `/functions/link-suggestions` | Scored external-link suggestions |
//! | `POST` | `/functions/leads` | Store a contact lead |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "body must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `llm_disabled` (400),
//! `upstream` (502), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so the static front end
//! can call the functions from the browser.

use axum::{
    extract::{rejection::JsonRejection, FromRequest, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use regex::Regex;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::sync::{Arc, OnceLock};
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::db;
use crate::enrich::{self, GenerateError};
use crate::links::ScoredSuggestion;
use crate::llm::{self, ChatModel, LlmError};
use crate::models::{ContentKind, Lead};
use crate::quality::{self, QualityReport};
use crate::schema;
use crate::store;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    pool: SqlitePool,
    model: Arc<dyn ChatModel>,
}

impl AppState {
    pub fn new(config: Config, pool: SqlitePool, model: Arc<dyn ChatModel>) -> Self {
        Self {
            config: Arc::new(config),
            pool,
            model,
        }
    }
}

/// All routes with CORS applied.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/functions/score", post(handle_score))
        .route("/functions/validate-schema", post(handle_validate_schema))
        .route("/functions/speakable", post(handle_speakable))
        .route("/functions/alt-text", post(handle_alt_text))
        .route("/functions/link-suggestions", post(handle_link_suggestions))
        .route("/functions/leads", post(handle_leads))
        .fallback(handle_not_found)
        .layer(cors)
        .with_state(state)
}

/// Starts the functions server on `[server].bind`. Runs until the process
/// is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let pool = db::connect(config).await?;
    let model: Arc<dyn ChatModel> = Arc::from(llm::create_chat_model(&config.llm)?);

    tracing::info!(model = model.model_name(), "starting functions server");
    let app = router(AppState::new(config.clone(), pool, model));

    println!("Functions server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn internal(err: anyhow::Error) -> AppError {
    tracing::error!("internal error: {:#}", err);
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: format!("{:#}", err),
    }
}

impl From<GenerateError> for AppError {
    fn from(err: GenerateError) -> Self {
        match err {
            GenerateError::Llm(LlmError::Disabled) => AppError {
                status: StatusCode::BAD_REQUEST,
                code: "llm_disabled",
                message: LlmError::Disabled.to_string(),
            },
            GenerateError::Llm(LlmError::Io(e)) => bad_request(format!("image: {}", e)),
            other => {
                tracing::warn!("upstream failure: {}", other);
                AppError {
                    status: StatusCode::BAD_GATEWAY,
                    code: "upstream",
                    message: other.to_string(),
                }
            }
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        bad_request(rejection.body_text())
    }
}

/// `Json<T>` whose rejections (missing fields, wrong types, bad syntax,
/// missing content type) use the JSON error contract.
struct JsonBody<T>(T);

impl<T, S> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(JsonBody(value))
    }
}

fn require(value: &str, name: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(bad_request(format!("{} must not be empty", name)));
    }
    Ok(())
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    model: String,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        model: state.model.model_name().to_string(),
    })
}

async fn handle_not_found() -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: "no such function".to_string(),
    }
}

// ============ POST /functions/score ============

#[derive(Deserialize)]
struct ScoreRequest {
    /// `article`, `blog` or `faq`; defaults to `article`.
    #[serde(default)]
    kind: Option<String>,
    /// Markdown, optionally with YAML frontmatter.
    markdown: String,
}

async fn handle_score(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<ScoreRequest>,
) -> Result<Json<QualityReport>, AppError> {
    require(&req.markdown, "markdown")?;
    let kind = match req.kind.as_deref() {
        None => ContentKind::Article,
        Some(k) => ContentKind::parse(k).map_err(|e| bad_request(e.to_string()))?,
    };
    let item = quality::item_from_markdown(kind, &state.config.site.default_language, &req.markdown)
        .map_err(|e| bad_request(format!("{:#}", e)))?;
    Ok(Json(quality::score(
        &item,
        &state.config.quality,
        state.config.site.base(),
    )))
}

// ============ POST /functions/validate-schema ============

#[derive(Deserialize)]
struct ValidateSchemaRequest {
    /// A JSON-LD object, or a string containing one.
    schema: Value,
}

#[derive(Serialize)]
struct ValidateSchemaResponse {
    valid: bool,
    missing: Vec<String>,
}

async fn handle_validate_schema(
    JsonBody(req): JsonBody<ValidateSchemaRequest>,
) -> Result<Json<ValidateSchemaResponse>, AppError> {
    let value = match req.schema {
        Value::String(s) => serde_json::from_str(&s)
            .map_err(|e| bad_request(format!("schema is not valid JSON: {}", e)))?,
        other => other,
    };
    let missing = schema::missing_keys(&value);
    Ok(Json(ValidateSchemaResponse {
        valid: missing.is_empty(),
        missing,
    }))
}

// ============ POST /functions/speakable ============

#[derive(Deserialize)]
struct SpeakableRequest {
    title: String,
    body: String,
}

async fn handle_speakable(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<SpeakableRequest>,
) -> Result<Json<Value>, AppError> {
    require(&req.title, "title")?;
    require(&req.body, "body")?;
    let answer =
        enrich::generate_speakable(state.model.as_ref(), &req.title, &req.body, &state.config.quality)
            .await?;
    Ok(Json(json!({
        "speakable_answer": answer,
        "words": crate::models::word_count(&answer),
    })))
}

// ============ POST /functions/alt-text ============

#[derive(Deserialize)]
struct AltTextRequest {
    image_url: String,
    #[serde(default)]
    context: Option<String>,
}

async fn handle_alt_text(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<AltTextRequest>,
) -> Result<Json<Value>, AppError> {
    let url = req.image_url.trim();
    require(url, "image_url")?;
    // Never read server-local files on behalf of a client
    if !(url.starts_with("http://") || url.starts_with("https://") || url.starts_with("data:image/")) {
        return Err(bad_request("image_url must be an http(s) or data:image URL"));
    }
    let alt = enrich::generate_alt_text(
        state.model.as_ref(),
        url,
        req.context.as_deref().unwrap_or(""),
    )
    .await?;

    if !url.starts_with("data:") {
        store::upsert_image_metadata(&state.pool, None, url, Some(&alt))
            .await
            .map_err(internal)?;
    }
    Ok(Json(json!({ "alt_text": alt })))
}

// ============ POST /functions/link-suggestions ============

#[derive(Deserialize)]
struct LinkSuggestionsRequest {
    #[serde(default)]
    title: Option<String>,
    body: String,
}

#[derive(Serialize)]
struct LinkSuggestionsResponse {
    suggestions: Vec<ScoredSuggestion>,
}

async fn handle_link_suggestions(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<LinkSuggestionsRequest>,
) -> Result<Json<LinkSuggestionsResponse>, AppError> {
    require(&req.body, "body")?;
    let suggestions = enrich::suggest_links(
        state.model.as_ref(),
        req.title.as_deref().unwrap_or(""),
        &req.body,
        &state.config.links,
    )
    .await?;
    Ok(Json(LinkSuggestionsResponse { suggestions }))
}

// ============ POST /functions/leads ============

fn email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[^@\s]+@[^@\s]+\.[A-Za-z]{2,}$").expect("valid email regex")
    })
}

pub fn is_valid_email(email: &str) -> bool {
    email_re().is_match(email.trim())
}

async fn handle_leads(
    State(state): State<AppState>,
    JsonBody(mut lead): JsonBody<Lead>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    require(&lead.name, "name")?;
    if !is_valid_email(&lead.email) {
        return Err(bad_request("email is not a valid address"));
    }
    lead.name = lead.name.trim().to_string();
    lead.email = lead.email.trim().to_string();
    if let Some(ref lang) = lead.language {
        if !state.config.site.languages.contains(lang) {
            return Err(bad_request(format!("unsupported language '{}'", lang)));
        }
    }

    let id = store::insert_lead(&state.pool, &lead).await.map_err(internal)?;
    tracing::info!(lead = %id, "lead stored");
    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}
