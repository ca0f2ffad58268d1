use std::net::{IpAddr, SocketAddr};
use std::path::{Path as FsPath, PathBuf};

use anyhow::{Context, Result};
use axum::extract::{FromRequest, Path, Query, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Form, Json, Router};
use clap::Parser;
use serde::Serialize;
use serde_json::Value;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use zookeepr_api::{AnimalApi, API_CONTRACT_VERSION};
use zookeepr_core::{candidate_from_form_pairs, Animal, AnimalCriteria, KernelError};

const OPENAPI_YAML: &str = include_str!("../../../openapi/openapi.yaml");
const INVALID_ANIMAL_MESSAGE: &str = "The animal is not properly formatted.";
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

#[derive(Debug, Clone)]
struct ServiceState {
    api: AnimalApi,
}

#[derive(Debug)]
enum ServiceError {
    InvalidAnimal,
    Internal(anyhow::Error),
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
    api_contract_version: &'static str,
    animals: usize,
}

#[derive(Debug, Parser)]
#[command(name = "zookeepr-service")]
#[command(about = "HTTP service for the Zookeepr animal registry")]
struct Args {
    #[arg(long, env = "ZOOKEEPR_DATA", default_value = "./data/animals.json")]
    data: PathBuf,
    #[arg(long, env = "ZOOKEEPR_PUBLIC", default_value = "./public")]
    public: PathBuf,
    #[arg(long, env = "ZOOKEEPR_HOST", default_value = "0.0.0.0")]
    host: IpAddr,
    #[arg(long, env = "PORT", default_value_t = 3001)]
    port: u16,
}

impl From<anyhow::Error> for ServiceError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast_ref::<KernelError>() {
            Some(KernelError::Validation(reason)) => {
                tracing::debug!(%reason, "rejected animal candidate");
                Self::InvalidAnimal
            }
            _ => Self::Internal(err),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        match self {
            Self::InvalidAnimal => (StatusCode::BAD_REQUEST, INVALID_ANIMAL_MESSAGE).into_response(),
            Self::Internal(err) => {
                tracing::error!(error = %format!("{err:#}"), "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
            }
        }
    }
}

fn app(state: ServiceState, public_dir: &FsPath) -> Router {
    let index = public_dir.join("index.html");
    let static_files = ServeDir::new(public_dir).fallback(ServeFile::new(&index));

    Router::new()
        .route("/api/health", get(health))
        .route("/api/openapi", get(openapi))
        .route("/api/animals", get(list_animals).post(create_animal))
        .route("/api/animals/:id", get(get_animal))
        .route_service("/", ServeFile::new(&index))
        .route_service("/animals", ServeFile::new(public_dir.join("animals.html")))
        .route_service("/animals/", ServeFile::new(public_dir.join("animals.html")))
        .route_service("/zookeepers", ServeFile::new(public_dir.join("zookeepers.html")))
        .route_service("/zookeepers/", ServeFile::new(public_dir.join("zookeepers.html")))
        .fallback_service(static_files)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let api = AnimalApi::open(&args.data).with_context(|| {
        format!("refusing to serve without a readable animal document {}", args.data.display())
    })?;
    let state = ServiceState { api };

    let addr = SocketAddr::new(args.host, args.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, public = %args.public.display(), "API server listening");

    axum::serve(listener, app(state, &args.public))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(%err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

async fn health(State(state): State<ServiceState>) -> Result<Json<HealthResponse>, ServiceError> {
    let animals = state.api.animal_count()?;
    Ok(Json(HealthResponse { status: "ok", api_contract_version: API_CONTRACT_VERSION, animals }))
}

async fn openapi() -> impl IntoResponse {
    (StatusCode::OK, [("content-type", "application/yaml; charset=utf-8")], OPENAPI_YAML)
}

async fn list_animals(
    State(state): State<ServiceState>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Json<Vec<Animal>>, ServiceError> {
    let parsed = AnimalCriteria::from_query_pairs(pairs);
    if !parsed.ignored_keys.is_empty() {
        tracing::debug!(ignored = ?parsed.ignored_keys, "ignoring unrecognized filter keys");
    }
    let animals = state.api.list_animals(&parsed.criteria)?;
    Ok(Json(animals))
}

async fn get_animal(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
) -> Result<Response, ServiceError> {
    match state.api.get_animal(&id)? {
        Some(animal) => Ok(Json(animal).into_response()),
        None => Ok(StatusCode::NOT_FOUND.into_response()),
    }
}

async fn create_animal(
    State(state): State<ServiceState>,
    request: Request,
) -> Result<Json<Animal>, ServiceError> {
    let candidate = read_candidate(request).await?;

    let api = state.api.clone();
    let animal = tokio::task::spawn_blocking(move || api.create_animal(candidate))
        .await
        .context("animal append task failed")??;
    Ok(Json(animal))
}

/// Decode a POST body as JSON, or as URL-encoded form fields when the content type
/// says so.
async fn read_candidate(request: Request) -> Result<Value, ServiceError> {
    let is_form = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with(FORM_CONTENT_TYPE));

    if is_form {
        let Form(pairs) = Form::<Vec<(String, String)>>::from_request(request, &())
            .await
            .map_err(reject_body)?;
        return Ok(Value::Object(candidate_from_form_pairs(pairs)));
    }
    let Json(candidate) = Json::<Value>::from_request(request, &()).await.map_err(reject_body)?;
    Ok(candidate)
}

fn reject_body(rejection: impl std::fmt::Display) -> ServiceError {
    tracing::debug!(%rejection, "rejected animal body");
    ServiceError::InvalidAnimal
}
