use super::store::M3u8Entry;
use super::HlsPlugin;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

const CONTENT_TYPE_M3U8: &str = "application/vnd.apple.mpegurl";
const CONTENT_TYPE_TS: &str = "video/mp2t";

/// Default wait for on-demand mode when the client did not pass one
const ON_DEMAND_WAIT: Duration = Duration::from_secs(10);

/// Minimal hls.js player page served for non-media paths
const PLAYER_SHELL: &str = r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8">
  <title>hlsgate</title>
  <script src="https://cdn.jsdelivr.net/npm/hls.js@1"></script>
</head>
<body>
  <video id="video" controls autoplay muted style="width:100%;max-width:960px"></video>
  <script>
    const src = new URLSearchParams(location.search).get('src')
      || location.pathname.replace(/\/[^/]*$/, '') + '/live/test.m3u8';
    const video = document.getElementById('video');
    if (Hls.isSupported()) {
      const hls = new Hls();
      hls.loadSource(src);
      hls.attachMedia(video);
    } else if (video.canPlayType('application/vnd.apple.mpegurl')) {
      video.src = src;
    }
  </script>
</body>
</html>
"#;

/// Playback router: manifests, segments and the player shell.
///
/// Hosts nest this under their media prefix, e.g. `/hls`.
pub fn router(plugin: Arc<HlsPlugin>) -> Router {
    Router::new()
        .route("/{*path}", get(serve_media))
        .with_state(plugin)
}

/// Admin router: `/list`, `/pull` and `/save`, for nesting under
/// `/api/hls`
pub fn api_router(plugin: Arc<HlsPlugin>) -> Router {
    Router::new()
        .route("/list", get(api_list))
        .route("/pull", get(api_pull))
        .route("/save", get(api_save))
        .with_state(plugin)
}

/// Parses `?timeout=` values: plain seconds ("10", "2.5") or with a
/// trailing unit ("10s")
fn parse_timeout(value: &str) -> Option<f64> {
    value
        .parse::<f64>()
        .or_else(|_| value.trim_end_matches('s').parse::<f64>())
        .ok()
}

fn wait_timeout(plugin: &HlsPlugin, query: &HashMap<String, String>) -> Duration {
    match query.get("timeout").and_then(|t| parse_timeout(t)) {
        Some(secs) if secs > 0.0 => Duration::from_secs_f64(secs),
        _ if !plugin.config().preload => ON_DEMAND_WAIT,
        _ => Duration::ZERO,
    }
}

async fn serve_media(
    State(plugin): State<Arc<HlsPlugin>>,
    Path(path): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if let Some(key) = path.strip_suffix(".m3u8") {
        serve_m3u8(&plugin, key, &query).await
    } else if path.ends_with(".ts") {
        serve_ts(&plugin, &path, &query).await
    } else {
        Html(PLAYER_SHELL).into_response()
    }
}

/// Resolves a manifest, optionally waiting for it to appear.
///
/// While waiting in on-demand mode, the first poll kicks off the writer (or
/// invites the publisher); after the deadline the synthesized default
/// manifest keeps the player alive.
async fn serve_m3u8(
    plugin: &Arc<HlsPlugin>,
    key: &str,
    query: &HashMap<String, String>,
) -> Response {
    let deadline = Instant::now() + wait_timeout(plugin, query);
    let mut started = false;

    loop {
        match plugin.manifests().get(key) {
            Some(M3u8Entry::Live(live)) => {
                return m3u8_response(live.read());
            }
            Some(M3u8Entry::Static(text)) => {
                return m3u8_response(text.into_bytes());
            }
            None => {}
        }

        if Instant::now() >= deadline {
            break;
        }
        if !started {
            plugin.start_on_demand(key);
            started = true;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    let body = super::playlist::default_manifest(
        plugin.default_seq(),
        plugin.config().default_ts_duration,
    );
    m3u8_response(body.into_bytes())
}

/// Resolves a segment, falling back to the placeholder TS
async fn serve_ts(
    plugin: &Arc<HlsPlugin>,
    path: &str,
    query: &HashMap<String, String>,
) -> Response {
    let (stream_path, name) = match path.rsplit_once('/') {
        Some(split) => split,
        None => ("", path),
    };

    let deadline = Instant::now() + wait_timeout(plugin, query);
    loop {
        if let Some(segment) = plugin.segments().lookup(stream_path, name) {
            return ts_response(segment.assemble());
        }
        if Instant::now() >= deadline {
            break;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    ts_response(plugin.default_ts())
}

fn m3u8_response(body: impl Into<axum::body::Body>) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, CONTENT_TYPE_M3U8)],
        body.into(),
    )
        .into_response()
}

fn ts_response(body: impl Into<axum::body::Body>) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, CONTENT_TYPE_TS)],
        body.into(),
    )
        .into_response()
}

async fn api_list(State(plugin): State<Arc<HlsPlugin>>) -> Response {
    Json(plugin.pullers().list()).into_response()
}

#[derive(Debug, Deserialize)]
struct PullQuery {
    target: String,
    #[serde(rename = "streamPath")]
    stream_path: String,
    #[serde(default)]
    save: u8,
}

async fn api_pull(
    State(plugin): State<Arc<HlsPlugin>>,
    Query(query): Query<PullQuery>,
) -> Response {
    match plugin.pull(&query.stream_path, &query.target, query.save != 0) {
        Ok(()) => Json(serde_json::json!({ "code": 0 })).into_response(),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "code": 1, "msg": e.to_string() })),
        )
            .into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct SaveQuery {
    #[serde(rename = "streamPath")]
    stream_path: String,
}

/// Cancels the save when the request future is dropped (client hung up)
struct SaveGuard(CancellationToken);

impl Drop for SaveGuard {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

async fn api_save(
    State(plugin): State<Arc<HlsPlugin>>,
    Query(query): Query<SaveQuery>,
) -> Response {
    let Some(puller) = plugin.pullers().get(&query.stream_path) else {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "code": 1, "msg": "stream is not being pulled" })),
        )
            .into_response();
    };

    // Saving lasts as long as this request is held open
    let token = puller.begin_save();
    let _guard = SaveGuard(token.clone());
    token.cancelled().await;

    StatusCode::OK.into_response()
}
