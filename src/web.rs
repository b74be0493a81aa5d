use crate::{
    config::Config,
    service::{
        AddDocument, BatchRequest, BatchResponse, Collection, DocumentSummary, ErrorKind,
        MatchService, Matches, Query, Removed, SearchRequest, ServiceError, SystemStats,
        UserResumes,
    },
};
use anyhow::Context;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::{collections::BTreeMap, sync::Arc};
use tokio::signal;

#[derive(Clone)]
struct SharedState {
    service: Arc<MatchService>,
}

fn router(service: Arc<MatchService>) -> Router {
    let shared_state = Arc::new(SharedState { service });

    Router::new()
        .route("/api/stats", get(stats))
        .route("/api/match/batch", post(batch))
        .route("/api/match/pair", post(pair))
        .route("/api/users", get(user_distribution))
        .route("/api/users/:user_id", get(user_resumes))
        .route("/api/:collection/add", post(add))
        .route("/api/:collection/remove", post(remove))
        .route("/api/:collection/search", post(search))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(shared_state)
}

async fn shutdown_signal(service: Arc<MatchService>) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                log::error!("failed to install signal handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    log::warn!("shutting down, saving embedding stores");
    let result = tokio::task::spawn_blocking(move || service.save_all()).await;
    match result {
        Ok(Ok(())) => {}
        Ok(Err(err)) => log::error!("final save failed: {err}"),
        Err(err) => log::error!("final save panicked: {err}"),
    }
}

async fn start_app(service: Arc<MatchService>, listen: &str) -> anyhow::Result<()> {
    let app = router(service.clone());

    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("failed to bind {listen}"))?;
    log::info!("listening on {listen}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(service))
        .await?;

    Ok(())
}

pub fn start_daemon(service: MatchService, config: &Config) -> anyhow::Result<()> {
    let service = Arc::new(service);
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(start_app(service, &config.listen))
}

#[derive(Debug)]
struct HttpError(ServiceError);

impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        let status = match self.0.kind() {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Invalid => StatusCode::BAD_REQUEST,
            ErrorKind::Internal => {
                log::error!("{self:?}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, Json(json!({"error": self.0.to_string()}))).into_response()
    }
}

/// Run a blocking service call without stalling the runtime.
fn blocking<T>(f: impl FnOnce() -> Result<T, ServiceError>) -> Result<Json<T>, HttpError> {
    tokio::task::block_in_place(f).map(Json).map_err(HttpError)
}

async fn add(
    State(state): State<Arc<SharedState>>,
    Path(collection): Path<Collection>,
    Json(payload): Json<AddDocument>,
) -> Result<Json<DocumentSummary>, HttpError> {
    log::debug!("add {}: {}", collection.as_str(), payload.id);
    let service = state.service.clone();
    blocking(move || service.add_document(collection, payload))
}

#[derive(Debug, Deserialize)]
struct RemoveRequest {
    id: String,
}

async fn remove(
    State(state): State<Arc<SharedState>>,
    Path(collection): Path<Collection>,
    Json(payload): Json<RemoveRequest>,
) -> Result<Json<Removed>, HttpError> {
    log::debug!("remove {}: {}", collection.as_str(), payload.id);
    let service = state.service.clone();
    // responds once the rebuild has finished
    blocking(move || service.remove_document(collection, &payload.id))
}

#[derive(Debug, Deserialize)]
struct SearchPayload {
    #[serde(flatten)]
    query: Query,
    #[serde(default)]
    k: Option<usize>,
    #[serde(default)]
    user_id: Option<String>,
}

async fn search(
    State(state): State<Arc<SharedState>>,
    Path(collection): Path<Collection>,
    Json(payload): Json<SearchPayload>,
) -> Result<Json<Matches>, HttpError> {
    log::debug!("payload: {payload:?}");
    let request = SearchRequest {
        from: collection,
        query: payload.query,
        k: payload.k,
        user_id: payload.user_id,
    };
    let service = state.service.clone();
    blocking(move || service.search(request))
}

async fn batch(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<BatchRequest>,
) -> Result<Json<BatchResponse>, HttpError> {
    log::debug!("payload: {payload:?}");
    let service = state.service.clone();
    blocking(move || service.batch_match(payload))
}

#[derive(Debug, Deserialize)]
struct PairRequest {
    job_id: String,
    resume_id: String,
}

async fn pair(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<PairRequest>,
) -> Result<impl IntoResponse, HttpError> {
    let service = state.service.clone();
    blocking(move || service.pair(&payload.job_id, &payload.resume_id))
}

async fn stats(State(state): State<Arc<SharedState>>) -> Result<Json<SystemStats>, HttpError> {
    let service = state.service.clone();
    blocking(move || service.stats())
}

async fn user_distribution(
    State(state): State<Arc<SharedState>>,
) -> Result<Json<BTreeMap<String, usize>>, HttpError> {
    let service = state.service.clone();
    blocking(move || Ok(service.resumes().user_distribution()?))
}

async fn user_resumes(
    State(state): State<Arc<SharedState>>,
    Path(user_id): Path<String>,
) -> Result<Json<UserResumes>, HttpError> {
    let service = state.service.clone();
    blocking(move || service.resumes_for_user(&user_id))
}
