use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rocket::fs::NamedFile;
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{get, post, routes, Build, Rocket, State};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use common::Config;

use crate::articles::Article;
use crate::broadcast::{self, BroadcastOutcome, BroadcastSettings};
use crate::{selection, storage};

/// Application state stored inside Rocket managed state.
#[derive(Clone)]
pub struct AppState {
    pub started_at: DateTime<Utc>,
    pub config: Arc<Config>,
    pub db: SqlitePool,
}

impl AppState {
    pub fn new(db: SqlitePool, config: Arc<Config>) -> Self {
        Self {
            started_at: Utc::now(),
            config,
            db,
        }
    }

    /// Key from the request, else from the configured environment variable.
    fn api_key(&self, from_request: Option<&str>) -> Option<String> {
        from_request
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(String::from)
            .or_else(|| self.config.api_key_from_env())
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    uptime_seconds: i64,
}

/// Body shared by the two pipeline endpoints.
#[derive(Serialize, Default)]
struct ApiResponse {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    articles: Option<Vec<Article>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bytes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parts: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    audio_url: Option<&'static str>,
}

type ApiResult = (Status, Json<ApiResponse>);

fn failure(status: Status, message: impl Into<String>) -> ApiResult {
    (
        status,
        Json(ApiResponse {
            success: false,
            message: message.into(),
            ..Default::default()
        }),
    )
}

#[derive(Deserialize)]
struct FetchArticlesRequest {
    #[serde(default)]
    topics: Vec<String>,
    api_key: Option<String>,
}

#[derive(Deserialize)]
struct GenerateBroadcastRequest {
    #[serde(default)]
    urls: Vec<String>,
    api_key: Option<String>,
    duration: Option<u32>,
}

#[get("/health")]
async fn health(state: &State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "Briefly AI API Server",
        uptime_seconds: (Utc::now() - state.started_at).num_seconds(),
    })
}

/// Run article selection for the requested topics and persist the result.
#[post("/api/fetch-articles", data = "<req>")]
async fn fetch_articles(state: &State<AppState>, req: Json<FetchArticlesRequest>) -> ApiResult {
    let Some(api_key) = state.api_key(req.api_key.as_deref()) else {
        return failure(Status::BadRequest, "API key is required");
    };
    let topics = if req.topics.is_empty() {
        state.config.default_topics()
    } else {
        req.topics.clone()
    };

    let limit = state.config.server.fetch_timeout_seconds.unwrap_or(1500);
    tracing::info!("api: fetching articles for {:?}", topics);

    let run = selection::find_articles(&state.db, &state.config, &api_key, &topics);
    match tokio::time::timeout(Duration::from_secs(limit), run).await {
        Ok(Ok(report)) => {
            let message = format!(
                "Found {} articles ({} topics empty, {} failed)",
                report.articles.len(),
                report.empty_topics.len(),
                report.failed_topics.len()
            );
            (
                Status::Ok,
                Json(ApiResponse {
                    success: true,
                    message,
                    articles: Some(report.articles),
                    ..Default::default()
                }),
            )
        }
        Ok(Err(e)) => {
            tracing::error!("api: article fetch failed: {:#}", e);
            failure(Status::InternalServerError, format!("Article fetch failed: {:#}", e))
        }
        Err(_) => {
            tracing::error!("api: article fetch timed out after {}s", limit);
            failure(Status::GatewayTimeout, format!("Article fetch timed out after {} seconds", limit))
        }
    }
}

/// Generate the broadcast WAV for the chosen article URLs.
#[post("/api/generate-broadcast", data = "<req>")]
async fn generate_broadcast(state: &State<AppState>, req: Json<GenerateBroadcastRequest>) -> ApiResult {
    if req.urls.is_empty() {
        return failure(Status::BadRequest, "No URLs provided");
    }
    let Some(api_key) = state.api_key(req.api_key.as_deref()) else {
        return failure(Status::BadRequest, "API key is required");
    };
    let duration = match broadcast::validate_duration(req.duration.unwrap_or(5)) {
        Ok(duration) => duration,
        Err(e) => return failure(Status::BadRequest, e.to_string()),
    };

    let limit = state.config.server.broadcast_timeout_seconds.unwrap_or(600);
    tracing::info!("api: generating broadcast from {} URLs", req.urls.len());

    let run = broadcast::generate_broadcast(&state.db, &state.config, &api_key, &req.urls, duration);
    match tokio::time::timeout(Duration::from_secs(limit), run).await {
        Ok(Ok(BroadcastOutcome::Produced(audio))) => (
            Status::Ok,
            Json(ApiResponse {
                success: true,
                message: "Broadcast generated successfully".to_string(),
                bytes: Some(audio.pcm.len()),
                parts: Some(audio.parts.len()),
                audio_url: Some("/Broadcast.wav"),
                ..Default::default()
            }),
        ),
        Ok(Ok(BroadcastOutcome::NoMatchingArticles)) => {
            failure(Status::NotFound, "No articles found matching the provided URLs")
        }
        Ok(Err(e)) => {
            tracing::error!("api: broadcast generation failed: {:#}", e);
            failure(Status::InternalServerError, format!("Broadcast generation failed: {:#}", e))
        }
        Err(_) => {
            tracing::error!("api: broadcast generation timed out after {}s", limit);
            failure(
                Status::GatewayTimeout,
                format!("Broadcast generation timed out after {} seconds", limit),
            )
        }
    }
}

/// Persisted articles from the last selection run.
#[get("/api/articles")]
async fn list_articles(state: &State<AppState>) -> Result<Json<Vec<Article>>, Status> {
    storage::load_articles(&state.db).await.map(Json).map_err(|e| {
        tracing::error!("failed to load articles: {:#}", e);
        Status::InternalServerError
    })
}

#[get("/Broadcast.wav")]
async fn broadcast_wav(state: &State<AppState>) -> Option<NamedFile> {
    let path: PathBuf = BroadcastSettings::from_config(&state.config).output_path;
    NamedFile::open(path).await.ok()
}

/// Rocket instance with routes and state mounted, not yet launched.
pub fn build_rocket(state: AppState) -> Rocket<Build> {
    let mut fig = rocket::Config::figment();
    if let Some(bind) = &state.config.server.bind {
        fig = fig.merge(("address", bind.clone()));
    }
    fig = fig.merge(("port", state.config.server.port.unwrap_or(5001)));

    rocket::custom(fig).manage(state).mount(
        "/",
        routes![
            health,
            fetch_articles,
            generate_broadcast,
            list_articles,
            broadcast_wav,
        ],
    )
}

pub async fn launch_rocket(db_pool: SqlitePool, config: Arc<Config>) -> Result<()> {
    let rocket = build_rocket(AppState::new(db_pool, config));

    // Runs until shutdown (SIGINT/SIGTERM etc.)
    tracing::info!("Starting Rocket HTTP server");
    rocket
        .launch()
        .await
        .map_err(|e| anyhow!("Rocket failed: {}", e))?;

    tracing::info!("Rocket HTTP server has shut down");
    Ok(())
}
