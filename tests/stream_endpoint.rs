//! End-to-end tests: fake camera + fake detector + real router over TCP

use axum::{
    extract::State,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE},
        HeaderMap, StatusCode,
    },
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use cctv_detector::{
    ai_client::MoondreamClient,
    detection_cycle::{CycleConfig, DetectionCycle},
    models::{EventRecord, RecordBody},
    polling_orchestrator::{PollingOrchestrator, SchedulerState},
    realtime_hub::RealtimeHub,
    snapshot_service::{CameraCredentials, DigestChallenge, SnapshotService},
    state::{AppConfig, AppState},
    web_api,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const SECRET: &str = "stream-secret";
const JPEG: &[u8] = &[0xff, 0xd8, 0xff, 0xe0, 0x00, 0x10];
const CHALLENGE: &str = r#"Digest realm="cam", nonce="5f3c9a", qop="auth", algorithm=MD5"#;

async fn spawn(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .await
            .unwrap();
    });
    addr
}

fn digest_params(header: &str) -> HashMap<String, String> {
    header
        .trim_start_matches("Digest ")
        .split(", ")
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim_matches('"').to_string()))
        .collect()
}

/// Camera that only serves the still after a valid MD5 digest answer
async fn camera_snapshot(headers: HeaderMap) -> Response {
    let challenge = DigestChallenge::parse(CHALLENGE).unwrap();
    let authorized = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(digest_params)
        .map_or(false, |p| {
            let expected = challenge.response(
                "admin",
                "hunter2",
                "GET",
                &p["uri"],
                &p["nc"],
                &p["cnonce"],
            );
            p["username"] == "admin" && p["uri"] == "/snap.jpg" && p["response"] == expected
        });

    if authorized {
        ([(CONTENT_TYPE, "image/jpeg")], JPEG.to_vec()).into_response()
    } else {
        (StatusCode::UNAUTHORIZED, [(WWW_AUTHENTICATE, CHALLENGE)]).into_response()
    }
}

/// Detector answering no, yes, then failing once, then alternating
async fn detector_query(
    State(calls): State<Arc<AtomicUsize>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if headers.get("X-Moondream-Auth").and_then(|v| v.to_str().ok()) != Some("md-key") {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let image_url = body["image_url"].as_str().unwrap_or_default();
    assert!(image_url.starts_with("data:image/jpeg;base64,"));

    let n = calls.fetch_add(1, Ordering::SeqCst);
    if n == 2 {
        return (StatusCode::SERVICE_UNAVAILABLE, "model overloaded").into_response();
    }
    let answer = if n % 2 == 0 { "No" } else { "Yes" };
    Json(json!({ "request_id": format!("req-{}", n), "answer": answer })).into_response()
}

struct Harness {
    addr: SocketAddr,
    state: AppState,
}

impl Harness {
    async fn start() -> Self {
        let camera = spawn(Router::new().route("/snap.jpg", get(camera_snapshot))).await;
        let detector = spawn(
            Router::new()
                .route("/v1/query", post(detector_query))
                .with_state(Arc::new(AtomicUsize::new(0))),
        )
        .await;

        let vars: HashMap<&str, String> = HashMap::from([
            ("CAMERA_IMAGE_URL", format!("http://{}/snap.jpg", camera)),
            ("CAMERA_USERNAME", "admin".to_string()),
            ("CAMERA_PASSWORD", "hunter2".to_string()),
            ("CHECK_INTERVAL", "60".to_string()),
            ("AUTH_DIGEST", SECRET.to_string()),
            ("MOONDREAM_API_KEY", "md-key".to_string()),
            ("MOONDREAM_URL", format!("http://{}/v1/query", detector)),
            ("KEEP_ALIVE_SECS", "1".to_string()),
        ]);
        let config = AppConfig::from_lookup(|k| vars.get(k).cloned()).unwrap();

        let snapshot = SnapshotService::new(
            &config.camera_image_url,
            Some(CameraCredentials {
                username: config.camera_username.clone(),
                password: config.camera_password.clone(),
            }),
            config.fetch_timeout,
        )
        .unwrap();
        let moondream = MoondreamClient::new(
            config.moondream_url.clone(),
            config.moondream_api_key.clone(),
            config.detect_timeout,
        )
        .unwrap();
        let cycle = DetectionCycle::new(
            snapshot,
            moondream,
            CycleConfig {
                fetch_timeout: Duration::from_secs(2),
                detect_timeout: Duration::from_secs(2),
                include_image: true,
            },
        );

        let state = AppState {
            realtime: Arc::new(RealtimeHub::with_buffer(SECRET, config.subscriber_buffer)),
            polling: Arc::new(PollingOrchestrator::new(cycle)),
            started_at: Instant::now(),
            config,
        };
        let addr = spawn(web_api::create_router(state.clone())).await;

        Self { addr, state }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn start_polling(&self) {
        let hub = self.state.realtime.clone();
        self.state
            .polling
            .start(self.state.config.check_interval, move |event| {
                let hub = hub.clone();
                async move {
                    hub.publish(&event).await;
                }
            })
            .await;
    }

    async fn wait_for_subscribers(&self, count: u64) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while self.state.realtime.connection_count() != count {
            assert!(Instant::now() < deadline, "subscriber count never reached {}", count);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// Reads `data:` frames off an open event stream
struct EventReader {
    resp: reqwest::Response,
    buf: String,
}

impl EventReader {
    fn new(resp: reqwest::Response) -> Self {
        Self {
            resp,
            buf: String::new(),
        }
    }

    async fn next_record(&mut self) -> EventRecord {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                while let Some(end) = self.buf.find("\n\n") {
                    let frame: String = self.buf.drain(..end + 2).collect();
                    let data: Vec<&str> = frame
                        .lines()
                        .filter_map(|line| line.strip_prefix("data:"))
                        .map(str::trim_start)
                        .collect();
                    // keep-alive comments carry no data
                    if !data.is_empty() {
                        return serde_json::from_str(&data.join("\n")).unwrap();
                    }
                }
                let chunk = self.resp.chunk().await.unwrap().expect("stream ended");
                self.buf.push_str(std::str::from_utf8(&chunk).unwrap());
            }
        })
        .await
        .expect("record within timeout")
    }
}

async fn open_stream(harness: &Harness) -> EventReader {
    let resp = reqwest::Client::new()
        .get(harness.url("/sse"))
        .bearer_auth(SECRET)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers()[CONTENT_TYPE].to_str().unwrap(),
        "text/event-stream"
    );
    EventReader::new(resp)
}

#[tokio::test]
async fn test_wrong_credential_gets_401() {
    let harness = Harness::start().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(harness.url("/sse"))
        .bearer_auth("not-the-secret")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error_code"], "UNAUTHORIZED");

    let resp = client.get(harness.url("/sse")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    assert_eq!(harness.state.realtime.connection_count(), 0);
}

#[tokio::test]
async fn test_preflight() {
    let harness = Harness::start().await;

    let resp = reqwest::Client::new()
        .request(reqwest::Method::OPTIONS, harness.url("/sse"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let headers = resp.headers().clone();
    assert_eq!(headers["access-control-allow-origin"], "*");
    assert_eq!(headers["access-control-allow-methods"], "GET, OPTIONS");
    assert_eq!(headers["access-control-allow-headers"], "Authorization");
    assert!(resp.bytes().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_health_and_status() {
    let harness = Harness::start().await;
    let client = reqwest::Client::new();

    let health: Value = client
        .get(harness.url("/healthz"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["version"], env!("CARGO_PKG_VERSION"));

    let status: Value = client
        .get(harness.url("/api/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["ok"], true);
    assert_eq!(status["data"]["scheduler"]["state"], "idle");
    assert_eq!(status["data"]["subscribers"], 0);
}

#[tokio::test]
async fn test_two_subscribers_see_identical_sequence() {
    let harness = Harness::start().await;

    let mut header_client = open_stream(&harness).await;
    let resp = reqwest::get(harness.url(&format!("/sse?access_token={}", SECRET)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let mut query_client = EventReader::new(resp);
    harness.wait_for_subscribers(2).await;

    harness.start_polling().await;

    let mut seen_a = Vec::new();
    let mut seen_b = Vec::new();
    for _ in 0..3 {
        seen_a.push(header_client.next_record().await);
        seen_b.push(query_client.next_record().await);
    }
    harness.state.polling.stop().await;

    assert_eq!(seen_a, seen_b);
    let verdicts: Vec<Option<bool>> = seen_a
        .iter()
        .map(|record| match &record.body {
            RecordBody::Detected {
                has_humans,
                image_src,
            } => {
                assert!(image_src
                    .as_deref()
                    .unwrap()
                    .starts_with("data:image/jpeg;base64,"));
                Some(*has_humans)
            }
            RecordBody::Failed { error } => {
                assert!(error.contains("503"), "unexpected error: {}", error);
                None
            }
        })
        .collect();
    assert_eq!(verdicts, vec![Some(false), Some(true), None]);
    assert!(seen_a.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
}

#[tokio::test]
async fn test_disconnect_mid_stream_leaves_others_running() {
    let harness = Harness::start().await;

    let mut staying = open_stream(&harness).await;
    let leaving = open_stream(&harness).await;
    harness.wait_for_subscribers(2).await;

    harness.start_polling().await;
    staying.next_record().await;

    drop(leaving);
    harness.wait_for_subscribers(1).await;

    // the survivor keeps receiving
    staying.next_record().await;
    staying.next_record().await;

    let status = harness.state.polling.stats().await;
    assert_eq!(status.state, SchedulerState::Running);
    harness.state.polling.stop().await;
}

#[tokio::test]
async fn test_close_all_ends_open_streams() {
    let harness = Harness::start().await;
    let mut reader = open_stream(&harness).await;
    harness.wait_for_subscribers(1).await;

    harness.state.realtime.close_all().await;

    let ended = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match reader.resp.chunk().await {
                Ok(Some(_)) => continue,
                _ => break,
            }
        }
    })
    .await;
    assert!(ended.is_ok(), "stream should end after close_all");
}
