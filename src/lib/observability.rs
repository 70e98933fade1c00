use std::time::Instant;

use axum::{
    body::Body,
    extract::MatchedPath,
    http::{HeaderValue, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

use crate::error::{Result, TrackError};

static PROMETHEUS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();
static START_TIME: OnceCell<Instant> = OnceCell::new();

/// Installs the global Prometheus recorder. Safe to call more than once.
pub fn init() -> Result<()> {
    if PROMETHEUS_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("paragliding_http_request_duration_seconds".into()),
            &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
        )
        .map_err(|err| TrackError::Config(format!("failed to configure prometheus exporter: {err}")))?
        .install_recorder()
        .map_err(|err| TrackError::Config(format!("failed to initialise prometheus recorder: {err}")))?;

    describe_counter!(
        "paragliding_http_requests_total",
        "Total number of HTTP requests processed."
    );
    describe_histogram!(
        "paragliding_http_request_duration_seconds",
        "HTTP request latency."
    );
    describe_counter!(
        "paragliding_tracks_ingested_total",
        "Tracks decoded and stored."
    );
    describe_counter!(
        "paragliding_notifications_dispatched_total",
        "Webhook notifications produced by threshold crossings."
    );
    describe_counter!(
        "paragliding_webhook_enqueued_total",
        "Webhook notifications accepted by the delivery queue."
    );
    describe_counter!(
        "paragliding_webhook_deliveries_total",
        "Webhook delivery attempts by outcome."
    );
    describe_counter!(
        "paragliding_webhook_dead_letters_total",
        "Webhook notifications given up on."
    );

    let _ = PROMETHEUS_HANDLE.set(handle);
    let _ = START_TIME.set(Instant::now());
    Ok(())
}

pub async fn metrics_handler() -> Response {
    if PROMETHEUS_HANDLE.get().is_none() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics recorder not initialised",
        )
            .into_response();
    }

    let headers = [(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=0.0.4"),
    )];
    (StatusCode::OK, headers, render_metrics()).into_response()
}

pub async fn track_http_metrics(req: Request<Body>, next: Next) -> Response {
    let method = req.method().as_str().to_owned();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let start = Instant::now();
    let response = next.run(req).await;
    let latency = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    counter!(
        "paragliding_http_requests_total",
        1,
        "method" => method.clone(),
        "path" => path.clone(),
        "status" => status.clone()
    );
    histogram!(
        "paragliding_http_request_duration_seconds",
        latency,
        "method" => method,
        "path" => path,
        "status" => status
    );

    response
}

pub fn render_metrics() -> String {
    let Some(handle) = PROMETHEUS_HANDLE.get() else {
        return String::new();
    };
    let mut body = handle.render();
    if let Some(start) = START_TIME.get() {
        body.push_str(&format!(
            "paragliding_uptime_seconds {}\n",
            start.elapsed().as_secs_f64()
        ));
    }
    body
}
