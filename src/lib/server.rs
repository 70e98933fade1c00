use std::{net::SocketAddr, sync::Arc};

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Redirect, Response},
    routing::{MethodRouter, delete, get, post},
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use super::{
    config::Config,
    error::{Result, TrackError},
    observability,
    service::{ServiceInfo, TrackService},
    ticker::Ticker,
    track::{Track, TrackField},
    webhook::{self, DeadLetter, Subscription},
};

#[derive(Clone)]
pub(crate) struct AppState {
    service: Arc<TrackService>,
}

impl AppState {
    /// Runs a storage-bound service call on the blocking pool.
    async fn blocking<F, T>(&self, call: F) -> Result<T>
    where
        F: FnOnce(&TrackService) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let service = Arc::clone(&self.service);
        tokio::task::spawn_blocking(move || call(&service))
            .await
            .map_err(|err| TrackError::Storage(format!("blocking task failed: {err}")))?
    }
}

pub async fn run(config: Config) -> Result<()> {
    config.validate()?;
    if let Err(err) = observability::init() {
        warn!("metrics disabled: {err}");
    }

    let (delivery, receiver) = webhook::channel(&config.delivery);
    let service = Arc::new(TrackService::open(&config, delivery)?);
    let workers = receiver.spawn_workers(&config.delivery)?;

    let app = router(service);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!(
        "Starting paragliding server on {addr} (storage={}, delivery workers={})",
        config.storage.as_str(),
        config.delivery.workers
    );

    let listener = TcpListener::bind(addr).await?;
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(TrackError::from);

    for handle in workers {
        handle.abort();
    }
    info!("paragliding server stopped");
    result
}

pub fn router(service: Arc<TrackService>) -> Router {
    let state = AppState { service };

    let mut api = Router::new();
    for (path, handler) in [
        ("/paragliding/", get(root_redirect)),
        ("/paragliding/api/", get(api_info)),
        ("/paragliding/api/track/", post(ingest_track).get(list_tracks)),
        ("/paragliding/api/track/{id}/", get(get_track)),
        ("/paragliding/api/track/{id}/{field}/", get(get_track_field)),
        ("/paragliding/api/ticker/", get(ticker)),
        ("/paragliding/api/ticker/latest", get(ticker_latest)),
        ("/paragliding/api/ticker/{marker}", get(ticker_after)),
        ("/paragliding/api/webhook/new_track/", post(create_webhook)),
        (
            "/paragliding/api/webhook/new_track/{id}",
            get(get_webhook).delete(delete_webhook),
        ),
        ("/admin/api/tracks_count", get(tracks_count)),
        ("/admin/api/tracks", delete(clear_tracks)),
        ("/admin/api/webhook_dead_letters", get(dead_letters)),
    ] {
        api = route_with_and_without_slash(api, path, handler);
    }

    api.route("/metrics", get(observability::metrics_handler))
        .route_layer(middleware::from_fn(observability::track_http_metrics))
        .fallback(not_found)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

fn route_with_and_without_slash(
    router: Router<AppState>,
    path: &str,
    handler: MethodRouter<AppState>,
) -> Router<AppState> {
    let trimmed = path.trim_end_matches('/');
    router
        .route(trimmed, handler.clone())
        .route(&format!("{trimmed}/"), handler)
}

async fn root_redirect() -> Redirect {
    Redirect::to("/paragliding/api/")
}

async fn api_info(State(state): State<AppState>) -> Json<ServiceInfo> {
    Json(state.service.metadata())
}

async fn ingest_track(State(state): State<AppState>, body: String) -> Result<Json<String>> {
    let id = state.blocking(move |service| service.ingest(&body)).await?;
    Ok(Json(id))
}

async fn list_tracks(State(state): State<AppState>) -> Result<Json<Vec<String>>> {
    let ids = state.blocking(|service| Ok(service.track_ids())).await?;
    Ok(Json(ids))
}

async fn get_track(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Track>> {
    let track = state.blocking(move |service| service.track(&id)).await?;
    Ok(Json(track))
}

async fn get_track_field(
    State(state): State<AppState>,
    Path((id, field)): Path<(String, String)>,
) -> Result<Response> {
    let field = match field.parse::<TrackField>() {
        Ok(field) => field,
        Err(message) => return Ok((StatusCode::NOT_FOUND, message).into_response()),
    };
    let value = state
        .blocking(move |service| service.track_field(&id, field))
        .await?;
    Ok(value.into_response())
}

async fn ticker_latest(State(state): State<AppState>) -> Result<String> {
    let marker = state.blocking(|service| service.latest_marker()).await?;
    Ok(marker.to_string())
}

async fn ticker(State(state): State<AppState>) -> Result<Json<Ticker>> {
    let ticker = state.blocking(|service| service.ticker()).await?;
    Ok(Json(ticker))
}

async fn ticker_after(
    State(state): State<AppState>,
    Path(marker): Path<String>,
) -> Result<Json<Ticker>> {
    let ticker = state
        .blocking(move |service| service.ticker_after(&marker))
        .await?;
    Ok(Json(ticker))
}

async fn create_webhook(State(state): State<AppState>, body: String) -> Result<String> {
    state.blocking(move |service| service.subscribe(&body)).await
}

async fn get_webhook(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Subscription>> {
    let subscription = state
        .blocking(move |service| service.subscription(&id))
        .await?;
    Ok(Json(subscription))
}

async fn delete_webhook(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Subscription>> {
    let subscription = state
        .blocking(move |service| service.unsubscribe(&id))
        .await?;
    Ok(Json(subscription))
}

async fn tracks_count(State(state): State<AppState>) -> Result<String> {
    let count = state.blocking(|service| service.track_count()).await?;
    Ok(count.to_string())
}

async fn clear_tracks(State(state): State<AppState>) -> Result<String> {
    let removed = state.blocking(|service| service.clear_tracks()).await?;
    Ok(removed.to_string())
}

async fn dead_letters(State(state): State<AppState>) -> Json<Vec<DeadLetter>> {
    Json(state.service.dead_letters())
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "not found")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("failed to install Ctrl+C handler: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!("failed to install SIGTERM handler: {err}");
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
}
