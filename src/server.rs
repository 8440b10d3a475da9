//! HTTP control surface and WebSocket viewer transport.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Version, lock flag, viewer count, catalog size |
//! | `GET`  | `/state` | Current session snapshot |
//! | `POST` | `/transcribe` | Match a text fragment (`{"text": "..."}`) via the fragment worker |
//! | `POST` | `/audio` | Queue raw little-endian `f32` PCM for transcription |
//! | `GET`  | `/search` | Score a query without touching the session |
//! | `GET`  | `/verses` | Browse the catalog |
//! | `GET`  | `/verses/{id}` | One verse |
//! | `POST` | `/verses/manual` | Manually select a verse |
//! | `POST` | `/lock` | Lock or unlock automatic selection |
//! | `POST` | `/index/rebuild` | Reload the catalog and swap the matcher |
//! | `GET`  | `/events` | Recent transcription history |
//! | `GET`  | `/ws` | Viewer event stream |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "verse not found: id 42" } }
//! ```
//!
//! Codes: `bad_request` (400), `not_found` (404), `unavailable` (503),
//! `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser viewers on any
//! host can connect.

use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};

use crate::catalog::{self, VerseFilter};
use crate::config::Config;
use crate::db;
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::event_log::{self, SqliteEventLog, StoredEvent};
use crate::events::StateEvent;
use crate::migrate;
use crate::models::{CandidatePayload, SessionSnapshot, VersePayload};
use crate::pipeline::{Engine, Fragment, FragmentWorker, SelectionError, Submitted, VerseSelector};
use crate::session::{Admission, RejectReason};
use crate::transcription::{create_transcriber, AudioSegment, Transcriber};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub pool: SqlitePool,
    pub embedder: Option<Arc<dyn EmbeddingProvider>>,
    /// The single pipeline worker; text and audio fragments both go through it.
    pub worker: Arc<FragmentWorker>,
}

/// Builds the engine from the database and starts serving.
///
/// A failed semantic index build aborts startup; the server never serves
/// matches from a partial index.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let config = Arc::new(config.clone());
    let pool = db::connect(&config).await?;
    migrate::run_migrations(&pool).await?;

    let embedder = create_provider(&config.embedding)?;
    let matcher = catalog::build_matcher(&pool, &config, embedder.as_deref()).await?;
    if matcher.is_empty() {
        tracing::warn!("catalog is empty; run `scripture-sync init` or `import` first");
    }

    let engine = Arc::new(Engine::new(
        config.clone(),
        matcher,
        embedder.clone(),
        Arc::new(SqliteEventLog::new(pool.clone())),
    ));

    let transcriber: Option<Arc<dyn Transcriber>> =
        create_transcriber(&config.transcription)?.map(Arc::from);
    let worker = Arc::new(FragmentWorker::spawn(engine.clone(), transcriber));

    let state = AppState {
        engine,
        pool,
        embedder,
        worker,
    };

    let bind_addr = config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "server listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/state", get(handle_state))
        .route("/transcribe", post(handle_transcribe))
        .route("/audio", post(handle_audio))
        .route("/search", get(handle_search))
        .route("/verses", get(handle_list_verses))
        .route("/verses/manual", post(handle_manual))
        .route("/verses/{id}", get(handle_get_verse))
        .route("/lock", post(handle_lock))
        .route("/index/rebuild", post(handle_rebuild))
        .route("/events", get(handle_events))
        .route("/ws", get(handle_ws))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
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

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

fn unavailable(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::SERVICE_UNAVAILABLE,
        code: "unavailable",
        message: message.into(),
    }
}

fn internal(err: anyhow::Error) -> AppError {
    tracing::error!(error = %err, "request failed");
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: err.to_string(),
    }
}

impl From<SelectionError> for AppError {
    fn from(err: SelectionError) -> Self {
        not_found(err.to_string())
    }
}

// ============ GET /health, GET /state ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    locked: bool,
    subscribers: usize,
    verses: usize,
    semantic: bool,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let matcher = state.engine.matcher();
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        locked: state.engine.current_state().locked,
        subscribers: state.engine.subscriber_count(),
        verses: matcher.len(),
        semantic: matcher.has_vectors(),
    })
}

async fn handle_state(State(state): State<AppState>) -> Json<SessionSnapshot> {
    Json(state.engine.current_state())
}

// ============ POST /transcribe ============

#[derive(Deserialize)]
struct TranscribeRequest {
    text: String,
}

#[derive(Serialize)]
struct TranscribeResponse {
    text: String,
    #[serde(rename = "match")]
    matched: Option<CandidatePayload>,
    admitted: bool,
    /// Why nothing was admitted: `locked` or `stale` for a selected match,
    /// `superseded` when a newer fragment replaced this one before scoring.
    #[serde(skip_serializing_if = "Option::is_none")]
    rejected: Option<&'static str>,
    latency_ms: f64,
}

async fn handle_transcribe(
    State(state): State<AppState>,
    Json(req): Json<TranscribeRequest>,
) -> Result<Json<TranscribeResponse>, AppError> {
    if req.text.trim().is_empty() {
        return Err(bad_request("text must not be empty"));
    }
    let started = Instant::now();
    let Some(outcome) = state.worker.process(Fragment::Text(req.text.clone())).await else {
        return Ok(Json(TranscribeResponse {
            text: req.text.trim().to_string(),
            matched: None,
            admitted: false,
            rejected: Some("superseded"),
            latency_ms: started.elapsed().as_secs_f64() * 1000.0,
        }));
    };
    let (admitted, rejected) = match &outcome.admission {
        Some(Admission::Accepted(_)) => (true, None),
        Some(Admission::Rejected(RejectReason::Locked)) => (false, Some("locked")),
        Some(Admission::Rejected(RejectReason::Stale { .. })) => (false, Some("stale")),
        None => (false, None),
    };
    Ok(Json(TranscribeResponse {
        text: outcome.report.transcript.clone(),
        matched: outcome.report.best.as_ref().map(CandidatePayload::from),
        admitted,
        rejected,
        latency_ms: outcome.report.latency_ms,
    }))
}

// ============ POST /audio ============

#[derive(Deserialize)]
struct AudioParams {
    sample_rate: Option<u32>,
}

#[derive(Serialize)]
struct AudioResponse {
    status: &'static str,
    samples: usize,
}

async fn handle_audio(
    State(state): State<AppState>,
    Query(params): Query<AudioParams>,
    body: Bytes,
) -> Result<(StatusCode, Json<AudioResponse>), AppError> {
    let worker = &state.worker;
    if !worker.transcribes() {
        return Err(unavailable("no transcription service configured"));
    }
    let sample_rate = params.sample_rate.unwrap_or(AudioSegment::DEFAULT_SAMPLE_RATE);
    if sample_rate == 0 {
        return Err(bad_request("sample_rate must be > 0"));
    }
    let audio = AudioSegment::from_le_bytes(&body, sample_rate).map_err(|e| bad_request(e.to_string()))?;
    if audio.samples.is_empty() {
        return Err(bad_request("audio body must not be empty"));
    }
    let samples = audio.samples.len();
    let status = match worker.submit(Fragment::Audio(audio)) {
        Submitted::Queued => "queued",
        Submitted::Replaced => "replaced",
    };
    Ok((StatusCode::ACCEPTED, Json(AudioResponse { status, samples })))
}

// ============ GET /search ============

#[derive(Deserialize)]
struct SearchParams {
    q: String,
    limit: Option<usize>,
}

#[derive(Serialize)]
struct SearchResponse {
    query: String,
    result: Option<CandidatePayload>,
    candidates: Vec<CandidatePayload>,
    semantic: bool,
    latency_ms: f64,
}

async fn handle_search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, AppError> {
    if params.q.trim().is_empty() {
        return Err(bad_request("q must not be empty"));
    }
    let min_score = state.engine.config().matching.search_min_score;
    let report = state.engine.score_transcript(&params.q, min_score).await;
    let limit = params.limit.unwrap_or(5).min(50);
    Ok(Json(SearchResponse {
        query: params.q,
        result: report.best.as_ref().map(CandidatePayload::from),
        candidates: report
            .candidates
            .iter()
            .take(limit)
            .map(CandidatePayload::from)
            .collect(),
        semantic: report.semantic_used,
        latency_ms: report.latency_ms,
    }))
}

// ============ GET /verses, GET /verses/{id} ============

#[derive(Deserialize)]
struct ListParams {
    translation: Option<String>,
    book: Option<String>,
    skip: Option<i64>,
    limit: Option<i64>,
}

#[derive(Serialize)]
struct ListResponse {
    verses: Vec<VersePayload>,
}

async fn handle_list_verses(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<ListResponse>, AppError> {
    let filter = VerseFilter {
        translation: params.translation,
        book: params.book,
        skip: params.skip.unwrap_or(0).max(0),
        limit: params.limit.unwrap_or(100).clamp(1, 1000),
    };
    let verses = catalog::list_verses(&state.pool, &filter)
        .await
        .map_err(internal)?;
    Ok(Json(ListResponse { verses }))
}

async fn handle_get_verse(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<VersePayload>, AppError> {
    catalog::get_verse(&state.pool, id)
        .await
        .map_err(internal)?
        .map(Json)
        .ok_or_else(|| not_found(format!("verse not found: id {}", id)))
}

// ============ POST /verses/manual, POST /lock ============

#[derive(Serialize)]
struct StateResponse {
    status: &'static str,
    state: SessionSnapshot,
}

async fn handle_manual(
    State(state): State<AppState>,
    Json(selector): Json<VerseSelector>,
) -> Result<Json<StateResponse>, AppError> {
    let snapshot = state.engine.set_manual_selection(&selector)?;
    Ok(Json(StateResponse {
        status: "success",
        state: snapshot,
    }))
}

#[derive(Deserialize)]
struct LockRequest {
    locked: bool,
    verse_id: Option<i64>,
}

async fn handle_lock(
    State(state): State<AppState>,
    Json(req): Json<LockRequest>,
) -> Result<Json<StateResponse>, AppError> {
    let pin = req.verse_id.map(|verse_id| VerseSelector::Id { verse_id });
    let snapshot = state.engine.set_lock(req.locked, pin.as_ref())?;
    Ok(Json(StateResponse {
        status: "success",
        state: snapshot,
    }))
}

// ============ POST /index/rebuild ============

#[derive(Serialize)]
struct RebuildResponse {
    status: &'static str,
    verses: usize,
    dims: usize,
}

async fn handle_rebuild(State(state): State<AppState>) -> Result<Json<RebuildResponse>, AppError> {
    let matcher = catalog::build_matcher(&state.pool, state.engine.config(), state.embedder.as_deref())
        .await
        .map_err(internal)?;
    let (verses, dims) = (matcher.len(), matcher.index_dims());
    state.engine.install(matcher);
    Ok(Json(RebuildResponse {
        status: "success",
        verses,
        dims,
    }))
}

// ============ GET /events ============

#[derive(Deserialize)]
struct EventsParams {
    limit: Option<i64>,
}

#[derive(Serialize)]
struct EventsResponse {
    events: Vec<StoredEvent>,
}

async fn handle_events(
    State(state): State<AppState>,
    Query(params): Query<EventsParams>,
) -> Result<Json<EventsResponse>, AppError> {
    let limit = params.limit.unwrap_or(50).clamp(1, 1000);
    let events = event_log::recent_events(&state.pool, limit)
        .await
        .map_err(internal)?;
    Ok(Json(EventsResponse { events }))
}

// ============ GET /ws ============

async fn handle_ws(State(state): State<AppState>, upgrade: WebSocketUpgrade) -> impl IntoResponse {
    upgrade.on_upgrade(move |socket| viewer_session(state.engine, socket))
}

fn encode(event: &StateEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            tracing::error!(error = %e, kind = event.kind(), "failed to serialize viewer event");
            None
        }
    }
}

/// Pushes the current state, then every published event, until the viewer
/// disconnects.
async fn viewer_session(engine: Arc<Engine>, socket: WebSocket) {
    let mut subscription = engine.subscribe();
    let (mut sender, mut receiver) = socket.split();
    tracing::info!(viewer = subscription.id(), "viewer connected");

    if let Some(msg) = encode(&StateEvent::State(engine.current_state())) {
        if sender.send(msg).await.is_err() {
            subscription.unsubscribe();
            return;
        }
    }

    loop {
        tokio::select! {
            event = subscription.recv() => {
                let Some(event) = event else { break };
                let Some(msg) = encode(&event) else { continue };
                if sender.send(msg).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    let dropped = subscription.dropped();
    subscription.unsubscribe();
    tracing::info!(viewer = subscription.id(), dropped, "viewer disconnected");
}
