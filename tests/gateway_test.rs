//! End-to-end gateway scenarios: live segmentation served over HTTP,
//! window eviction, and the puller against a mock HLS origin.

use axum::extract::{Path as AxumPath, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use hlsgate::av::{StreamHub, StreamOrigin, TrackParams, VideoFrame, VideoParams};
use hlsgate::config::{HlsConfig, RelayMode};
use hlsgate::format::hls::HlsPlugin;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::util::ServiceExt;

fn video_params() -> TrackParams {
    TrackParams::Video(VideoParams {
        codec: hlsgate::av::CodecId::H264,
        width: 1280,
        height: 720,
        sps: Bytes::from_static(&[0x67, 0x42, 0x00, 0x1f]),
        pps: Bytes::from_static(&[0x68, 0xce, 0x3c, 0x80]),
        vps: None,
    })
}

async fn get_response(app: &Router, uri: &str) -> (axum::http::StatusCode, Bytes) {
    let response = app
        .clone()
        .oneshot(
            axum::http::Request::get(uri)
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body)
}

/// Live segmentation and eviction observed through the HTTP surface
/// (scenarios: sliding window, evicted segment falls back to default TS)
#[tokio::test]
async fn test_live_segmentation_and_eviction_over_http() {
    let hub = StreamHub::new();
    let config = HlsConfig {
        fragment: 2.0,
        window: 3,
        ..HlsConfig::default()
    };
    let plugin = HlsPlugin::new(config, hub.clone()).unwrap();
    plugin.clone().start();
    let app = plugin.clone().router();

    let stream = hub.publish("live/test", StreamOrigin::Local).unwrap();
    let track = stream.set_video_track("video", video_params());

    // First keyframe, then let the writer latch onto the IDR
    track.push_video(VideoFrame::from_millis(
        0,
        vec![Bytes::from(vec![0x65; 200])],
        true,
    ));
    tokio::time::sleep(Duration::from_millis(800)).await;

    // 30 s of 25 fps video with a keyframe every 2 s, fed at a pace the
    // writer's ring can absorb
    for i in 1..=750u64 {
        let ms = i * 40;
        let keyframe = ms % 2000 == 0;
        track.push_video(VideoFrame::from_millis(
            ms,
            vec![Bytes::from(vec![if keyframe { 0x65 } else { 0x41 }; 200])],
            keyframe,
        ));
        if i % 25 == 24 {
            tokio::time::sleep(Duration::from_millis(12)).await;
        }
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    // The media playlist lists the last three of fifteen segments
    let (status, body) = get_response(&app, "/live/test/video.m3u8").await;
    assert_eq!(status, axum::http::StatusCode::OK);
    let manifest = String::from_utf8(body.to_vec()).unwrap();
    assert!(manifest.contains("#EXT-X-MEDIA-SEQUENCE:12"), "{}", manifest);
    assert!(manifest.contains("#EXT-X-TARGETDURATION:2"), "{}", manifest);
    assert_eq!(manifest.matches("#EXTINF").count(), 3, "{}", manifest);

    // The master playlist resolves at the stream path
    let (_, master) = get_response(&app, "/live/test.m3u8").await;
    let master = String::from_utf8(master.to_vec()).unwrap();
    assert!(master.contains("test/video.m3u8"), "{}", master);

    // Every listed segment resolves to real MPEG-TS
    let default_ts = plugin.default_ts();
    for line in manifest.lines().filter(|l| l.ends_with(".ts")) {
        let (status, data) = get_response(&app, &format!("/live/test/{}", line)).await;
        assert_eq!(status, axum::http::StatusCode::OK);
        assert_eq!(data[0], 0x47);
        assert_ne!(data, default_ts);
        assert_eq!(data.len() % 188, 0);
    }

    // An evicted segment answers with the placeholder
    let evicted = format!("/live/test/{}", manifest_filename_with_seq(&manifest, 12).replace("_12", "_0"));
    let (status, data) = get_response(&app, &evicted).await;
    assert_eq!(status, axum::http::StatusCode::OK);
    assert_eq!(data, default_ts);

    plugin.shutdown();
}

fn manifest_filename_with_seq(manifest: &str, seq: u64) -> String {
    manifest
        .lines()
        .find(|l| l.ends_with(&format!("_{}.ts", seq)))
        .expect("segment with sequence in manifest")
        .to_string()
}

/// A scripted HLS origin: manifests advance per fetch, every hit is counted
#[derive(Default)]
struct MockOrigin {
    hits: Mutex<HashMap<String, usize>>,
    manifests: Mutex<HashMap<String, VecDeque<String>>>,
}

impl MockOrigin {
    fn script(&self, path: &str, bodies: &[&str]) {
        self.manifests.lock().insert(
            path.to_string(),
            bodies.iter().map(|b| b.to_string()).collect(),
        );
    }

    fn hits(&self, path: &str) -> usize {
        self.hits.lock().get(path).copied().unwrap_or(0)
    }
}

async fn origin_handler(
    State(origin): State<Arc<MockOrigin>>,
    AxumPath(path): AxumPath<String>,
) -> axum::response::Response {
    *origin.hits.lock().entry(path.clone()).or_insert(0) += 1;

    if path.ends_with(".m3u8") {
        let mut manifests = origin.manifests.lock();
        let Some(queue) = manifests.get_mut(&path) else {
            return axum::http::StatusCode::NOT_FOUND.into_response();
        };
        let body = if queue.len() > 1 {
            queue.pop_front().unwrap_or_default()
        } else {
            queue.front().cloned().unwrap_or_default()
        };
        body.into_response()
    } else {
        // Any 188-byte-aligned payload will do for relay mode
        Bytes::from(vec![0x47u8; 188 * 2]).into_response()
    }
}

async fn spawn_origin(origin: Arc<MockOrigin>) -> SocketAddr {
    let app = Router::new()
        .route("/{*path}", get(origin_handler))
        .with_state(origin);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(axum::serve(listener, app).into_future());
    addr
}

/// Puller dedup: across two polls without discontinuity, only the new
/// segment downloads
#[tokio::test]
async fn test_puller_downloads_only_fresh_segments() {
    let origin = Arc::new(MockOrigin::default());
    origin.script(
        "index.m3u8",
        &[
            "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:2\n#EXT-X-MEDIA-SEQUENCE:100\n\
             #EXTINF:2.0,\na.ts\n#EXTINF:2.0,\nb.ts\n#EXTINF:2.0,\nc.ts\n",
            "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:2\n#EXT-X-MEDIA-SEQUENCE:101\n\
             #EXTINF:2.0,\nb.ts\n#EXTINF:2.0,\nc.ts\n#EXTINF:2.0,\nd.ts\n",
        ],
    );
    let addr = spawn_origin(origin.clone()).await;

    let hub = StreamHub::new();
    let config = HlsConfig {
        relay_mode: RelayMode::Relay,
        ..HlsConfig::default()
    };
    let plugin = HlsPlugin::new(config, hub).unwrap();
    plugin
        .pull("live/pull", &format!("http://{}/index.m3u8", addr), false)
        .unwrap();

    tokio::time::sleep(Duration::from_secs(2)).await;

    assert!(origin.hits("index.m3u8") >= 2);
    assert_eq!(origin.hits("a.ts"), 1);
    assert_eq!(origin.hits("b.ts"), 1);
    assert_eq!(origin.hits("c.ts"), 1);
    assert_eq!(origin.hits("d.ts"), 1);

    // The relayed manifest mirrors the remote sequence
    match plugin.manifests().get("live/pull") {
        Some(hlsgate::format::hls::M3u8Entry::Static(m3u8)) => {
            assert!(m3u8.contains("#EXT-X-MEDIA-SEQUENCE:101"), "{}", m3u8);
            assert!(m3u8.contains(".ts"), "{}", m3u8);
        }
        _ => panic!("relayed manifest published"),
    }

    plugin.shutdown();
}

/// A discontinuity tag resets dedup: previously-seen segments behind it
/// download again
#[tokio::test]
async fn test_puller_discontinuity_redownloads() {
    let origin = Arc::new(MockOrigin::default());
    origin.script(
        "index.m3u8",
        &[
            "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:2\n#EXT-X-MEDIA-SEQUENCE:100\n\
             #EXTINF:2.0,\na.ts\n#EXTINF:2.0,\nb.ts\n#EXTINF:2.0,\nc.ts\n",
            "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:2\n#EXT-X-MEDIA-SEQUENCE:101\n\
             #EXTINF:2.0,\nb.ts\n#EXT-X-DISCONTINUITY\n#EXTINF:2.0,\nc.ts\n#EXTINF:2.0,\nd.ts\n",
        ],
    );
    let addr = spawn_origin(origin.clone()).await;

    let hub = StreamHub::new();
    let config = HlsConfig {
        relay_mode: RelayMode::Relay,
        ..HlsConfig::default()
    };
    let plugin = HlsPlugin::new(config, hub).unwrap();
    plugin
        .pull("live/disc", &format!("http://{}/index.m3u8", addr), false)
        .unwrap();

    tokio::time::sleep(Duration::from_secs(2)).await;

    // c.ts was seen in the first poll but sits behind the discontinuity
    assert_eq!(origin.hits("c.ts"), 2);
    assert_eq!(origin.hits("d.ts"), 1);
    assert_eq!(origin.hits("b.ts"), 1);

    plugin.shutdown();
}

/// Master playlists route the puller to the highest-resolution variant
#[tokio::test]
async fn test_puller_selects_max_resolution_variant() {
    let origin = Arc::new(MockOrigin::default());
    origin.script(
        "master.m3u8",
        &["#EXTM3U\n#EXT-X-VERSION:3\n\
           #EXT-X-STREAM-INF:BANDWIDTH=3000000,RESOLUTION=1280x720\nmid.m3u8\n\
           #EXT-X-STREAM-INF:BANDWIDTH=1000000,RESOLUTION=1920x1080\nhigh.m3u8\n"],
    );
    origin.script(
        "high.m3u8",
        &["#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:2\n#EXT-X-MEDIA-SEQUENCE:1\n\
           #EXTINF:2.0,\nh1.ts\n"],
    );
    origin.script(
        "mid.m3u8",
        &["#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:2\n#EXT-X-MEDIA-SEQUENCE:1\n\
           #EXTINF:2.0,\nm1.ts\n"],
    );
    let addr = spawn_origin(origin.clone()).await;

    let hub = StreamHub::new();
    let config = HlsConfig {
        relay_mode: RelayMode::Relay,
        ..HlsConfig::default()
    };
    let plugin = HlsPlugin::new(config, hub).unwrap();
    plugin
        .pull("live/abr", &format!("http://{}/master.m3u8", addr), false)
        .unwrap();

    tokio::time::sleep(Duration::from_secs(2)).await;

    assert!(origin.hits("high.m3u8") >= 1);
    assert_eq!(origin.hits("mid.m3u8"), 0);
    assert_eq!(origin.hits("h1.ts"), 1);
    assert_eq!(origin.hits("m1.ts"), 0);

    plugin.shutdown();
}

/// The admin list reflects active pullers and their counters
#[tokio::test]
async fn test_puller_list_api() {
    let origin = Arc::new(MockOrigin::default());
    origin.script(
        "index.m3u8",
        &["#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:2\n#EXT-X-MEDIA-SEQUENCE:5\n\
           #EXTINF:2.0,\nx.ts\n"],
    );
    let addr = spawn_origin(origin.clone()).await;

    let hub = StreamHub::new();
    let config = HlsConfig {
        relay_mode: RelayMode::Relay,
        ..HlsConfig::default()
    };
    let plugin = HlsPlugin::new(config, hub).unwrap();
    let api = plugin.clone().api_router();
    plugin
        .pull("live/list", &format!("http://{}/index.m3u8", addr), false)
        .unwrap();

    tokio::time::sleep(Duration::from_millis(1500)).await;

    let (status, body) = get_response(&api, "/list").await;
    assert_eq!(status, axum::http::StatusCode::OK);
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    let list = parsed.as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["stream_path"], "live/list");
    assert_eq!(list[0]["video"]["last_sequence"], 5);
    assert!(list[0]["video"]["ts_count"].as_u64().unwrap() >= 1);

    plugin.shutdown();
}

/// On-demand mode: a writer started by an HTTP request winds down after
/// 15 s without manifest reads and unregisters its stream state.
///
/// Slow by construction (the idle window is fixed); run with `--ignored`.
#[tokio::test]
#[ignore]
async fn test_on_demand_idle_stop() {
    let hub = StreamHub::new();
    let config = HlsConfig {
        preload: false,
        fragment: 1.0,
        ..HlsConfig::default()
    };
    let plugin = HlsPlugin::new(config, hub.clone()).unwrap();
    plugin.clone().start();
    let app = plugin.clone().router();

    let stream = hub.publish("live/od", StreamOrigin::Local).unwrap();
    let track = stream.set_video_track("video", video_params());
    let feeder = tokio::spawn(async move {
        for i in 0..2000u64 {
            let ms = i * 40;
            let keyframe = ms % 1000 == 0;
            track.push_video(VideoFrame::from_millis(
                ms,
                vec![Bytes::from(vec![if keyframe { 0x65 } else { 0x41 }; 100])],
                keyframe,
            ));
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    });

    // The request starts the writer and waits for the first manifest
    let (status, body) = get_response(&app, "/live/od.m3u8?timeout=5").await;
    assert_eq!(status, axum::http::StatusCode::OK);
    assert!(String::from_utf8(body.to_vec()).unwrap().contains("video.m3u8"));

    // No further reads: the writer stops itself and unregisters
    tokio::time::sleep(Duration::from_secs(17)).await;
    assert!(plugin.manifests().get("live/od").is_none());
    assert!(plugin.manifests().get("live/od/video").is_none());

    feeder.abort();
    plugin.shutdown();
}
