//! One image generation request: send it, time it, classify it and keep the image.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use base64::{Engine, engine::general_purpose::STANDARD};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use typed_builder::TypedBuilder;

use crate::{
    error::VolleyError,
    metric::{Dispatch, RequestOutcome},
};

/// Longest error detail kept from a failure body, in characters.
pub const MAX_ERROR_DETAIL: usize = 50;

const GENERATIONS_PATH: &str = "/v1/images/generations";
const HEALTH_PATHS: [&str; 2] = ["/health", "/v1/models"];
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Body of `POST /v1/images/generations`. The same payload is sent by every client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
pub struct GenerationRequest {
    #[builder(default = "a lighthouse on a rocky coast at dusk, oil painting".to_string(), setter(into))]
    pub prompt: String,
    #[builder(default = 1)]
    pub n: u32,
    /// `WxH`, e.g. `1024x1024`.
    #[builder(default = "1024x1024".to_string(), setter(into))]
    pub size: String,
    #[builder(default = "b64_json".to_string(), setter(skip))]
    pub response_format: String,
    #[builder(default = 20)]
    pub num_inference_steps: u32,
    #[builder(default = 7.0)]
    pub cfg_scale: f64,
    /// -1 lets the server pick a random seed.
    #[builder(default = -1)]
    pub seed: i64,
}

impl Default for GenerationRequest {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Deserialize)]
struct GenerationResponse {
    #[serde(default)]
    data: Vec<GeneratedImage>,
}

#[derive(Deserialize)]
struct GeneratedImage {
    b64_json: Option<String>,
}

/// Either `{"error": {"message": ..}}`, `{"error": ".."}` or `{"detail": ..}`.
#[derive(Deserialize)]
struct ErrorBody {
    error: Option<Value>,
    detail: Option<Value>,
}

/// Where decoded images go. Names encode level and request id, so concurrent
/// writers never collide.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn level_dir(&self, level: usize) -> PathBuf {
        self.root.join(format!("level_{level:02}"))
    }

    pub fn path_for(&self, dispatch: &Dispatch) -> PathBuf {
        self.level_dir(dispatch.level)
            .join(format!("c{}_r{}.png", dispatch.level, dispatch.request_id))
    }

    /// Creates the directory for `level`. Called by the driver before the level runs.
    pub async fn prepare_level(&self, level: usize) -> Result<PathBuf, VolleyError> {
        let dir = self.level_dir(level);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| VolleyError::OutputDir {
                path: dir.clone(),
                source,
            })?;
        Ok(dir)
    }

    async fn persist(&self, dispatch: &Dispatch, body: &[u8]) -> Result<PathBuf, String> {
        let response: GenerationResponse =
            serde_json::from_slice(body).map_err(|e| format!("unparseable body: {e}"))?;
        let encoded = response
            .data
            .into_iter()
            .next()
            .and_then(|image| image.b64_json)
            .ok_or_else(|| "no data[0].b64_json in response".to_string())?;
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| format!("invalid base64: {e}"))?;

        let path = self.path_for(dispatch);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| format!("cannot write {}: {e}", path.display()))?;
        Ok(path)
    }
}

/// Issues generation requests against one inference server.
///
/// Cheap to clone: the HTTP client and payload are shared.
#[derive(Debug, Clone)]
pub struct ImageRequester {
    client: Client,
    base_url: String,
    payload: Arc<GenerationRequest>,
    artifacts: Option<ArtifactStore>,
}

impl ImageRequester {
    /// Builds the HTTP client. `timeout` bounds each request end to end.
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        payload: GenerationRequest,
        artifacts: Option<ArtifactStore>,
    ) -> Result<Self, VolleyError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            payload: Arc::new(payload),
            artifacts,
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}{GENERATIONS_PATH}", self.base_url)
    }

    /// Sends one request and classifies it. Never fails: transport and parsing
    /// problems end up in the returned outcome.
    pub async fn execute(&self, dispatch: Dispatch) -> RequestOutcome {
        let id = dispatch.request_id;
        let start = Instant::now();
        let sent = self
            .client
            .post(self.endpoint())
            .json(self.payload.as_ref())
            .send()
            .await;

        let response = match sent {
            Ok(r) => r,
            Err(e) => {
                let elapsed = start.elapsed().as_secs_f64();
                tracing::debug!("Request {id} (level {}) got no response: {e}", dispatch.level);
                return RequestOutcome::timeout(id, elapsed, transport_detail(&e));
            }
        };

        let status = response.status();
        let body = response.bytes().await;
        let elapsed = start.elapsed().as_secs_f64();

        if status != StatusCode::OK {
            let detail = match &body {
                Ok(bytes) => error_detail(bytes),
                Err(_) => "unknown".to_string(),
            };
            tracing::debug!("Request {id} (level {}) failed with {status}: {detail}", dispatch.level);
            return RequestOutcome::failed(id, Some(status.as_u16()), elapsed, detail);
        }

        let artifact = match (&self.artifacts, body) {
            (Some(store), Ok(bytes)) => match store.persist(&dispatch, &bytes).await {
                Ok(path) => Some(path),
                Err(reason) => {
                    tracing::warn!("Request {id} (level {}) succeeded but no image was saved: {reason}", dispatch.level);
                    None
                }
            },
            (Some(_), Err(e)) => {
                tracing::warn!("Request {id} (level {}) succeeded but the body was lost: {e}", dispatch.level);
                None
            }
            (None, _) => None,
        };

        RequestOutcome::success(id, elapsed, artifact)
    }

    /// Best-effort reachability check: `GET /health`, then `GET /v1/models`.
    pub async fn probe_health(&self) -> bool {
        for path in HEALTH_PATHS {
            let url = format!("{}{path}", self.base_url);
            match self.client.get(&url).timeout(HEALTH_TIMEOUT).send().await {
                Ok(r) if r.status().is_success() => {
                    tracing::info!("Server healthy ({url} -> {})", r.status());
                    return true;
                }
                Ok(r) => tracing::debug!("Health probe {url} returned {}", r.status()),
                Err(e) => tracing::debug!("Health probe {url} failed: {e}"),
            }
        }
        false
    }
}

fn transport_detail(e: &reqwest::Error) -> String {
    let kind = if e.is_timeout() {
        "timed out"
    } else if e.is_connect() {
        "connection failed"
    } else {
        "transport error"
    };
    kind.to_string()
}

/// Pulls a short message out of a failure body; `"unknown"` when there is none.
pub fn error_detail(body: &[u8]) -> String {
    let message = serde_json::from_slice::<ErrorBody>(body).ok().and_then(|b| {
        let from_error = b.error.and_then(|e| match e {
            Value::String(s) => Some(s),
            Value::Object(mut o) => match o.remove("message") {
                Some(Value::String(s)) => Some(s),
                _ => None,
            },
            _ => None,
        });
        from_error.or_else(|| {
            b.detail.map(|d| match d {
                Value::String(s) => s,
                other => other.to_string(),
            })
        })
    });

    match message {
        Some(m) if !m.trim().is_empty() => truncate(m.trim(), MAX_ERROR_DETAIL),
        _ => "unknown".to_string(),
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::OutcomeStatus;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path},
    };

    const PNG_B64: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

    fn dispatch(request_id: usize) -> Dispatch {
        Dispatch {
            level: 1,
            request_id,
        }
    }

    mod error_detail {
        use super::*;

        #[test]
        fn nested_error_message() {
            assert_eq!(error_detail(br#"{"error":{"message":"boom"}}"#), "boom");
        }

        #[test]
        fn plain_error_string() {
            assert_eq!(error_detail(br#"{"error":"out of memory"}"#), "out of memory");
        }

        #[test]
        fn detail_field() {
            assert_eq!(error_detail(br#"{"detail":"model not loaded"}"#), "model not loaded");
        }

        #[test]
        fn structured_detail_is_stringified() {
            assert_eq!(error_detail(br#"{"detail":[1,2]}"#), "[1,2]");
        }

        #[test]
        fn missing_or_garbage_is_unknown() {
            assert_eq!(error_detail(b"{}"), "unknown");
            assert_eq!(error_detail(b"<html>502</html>"), "unknown");
            assert_eq!(error_detail(b""), "unknown");
        }

        #[test]
        fn long_messages_are_truncated() {
            let long = "x".repeat(200);
            let body = serde_json::json!({ "error": { "message": long } }).to_string();
            assert_eq!(error_detail(body.as_bytes()).chars().count(), MAX_ERROR_DETAIL);
        }

        #[test]
        fn truncation_respects_char_boundaries() {
            let long = "é".repeat(80);
            let body = serde_json::json!({ "detail": long }).to_string();
            assert_eq!(error_detail(body.as_bytes()), "é".repeat(MAX_ERROR_DETAIL));
        }
    }

    #[test]
    fn payload_matches_wire_format() {
        let json = serde_json::to_value(GenerationRequest::default()).unwrap();

        assert_eq!(json["response_format"], "b64_json");
        assert_eq!(json["seed"], -1);
        assert_eq!(json["n"], 1);
        assert!(json["size"].as_str().unwrap().contains('x'));
    }

    #[test]
    fn artifact_names_encode_level_and_id() {
        let store = ArtifactStore::new("/out");
        let a = store.path_for(&Dispatch {
            level: 2,
            request_id: 1,
        });
        let b = store.path_for(&Dispatch {
            level: 1,
            request_id: 2,
        });

        assert_ne!(a, b);
        assert_eq!(a, PathBuf::from("/out/level_02/c2_r1.png"));
    }

    #[tokio::test]
    async fn success_persists_the_image() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(GENERATIONS_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "data": [{ "b64_json": PNG_B64 }] })),
            )
            .mount(&server)
            .await;
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        store.prepare_level(1).await.unwrap();
        let requester = ImageRequester::new(
            server.uri(),
            Duration::from_secs(5),
            GenerationRequest::default(),
            Some(store),
        )
        .unwrap();

        let outcome = requester.execute(dispatch(1)).await;

        assert_eq!(outcome.status, OutcomeStatus::Success);
        assert_eq!(outcome.http_status, Some(200));
        let saved = outcome.artifact_path.expect("artifact");
        assert_eq!(std::fs::read(saved).unwrap(), STANDARD.decode(PNG_B64).unwrap());
    }

    #[tokio::test]
    async fn success_without_image_stays_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "data": [] })))
            .mount(&server)
            .await;
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        store.prepare_level(1).await.unwrap();
        let requester = ImageRequester::new(
            server.uri(),
            Duration::from_secs(5),
            GenerationRequest::default(),
            Some(store),
        )
        .unwrap();

        let outcome = requester.execute(dispatch(1)).await;

        assert_eq!(outcome.status, OutcomeStatus::Success);
        assert!(outcome.artifact_path.is_none());
    }

    #[tokio::test]
    async fn non_200_is_failed_with_detail() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(422).set_body_json(serde_json::json!({ "detail": "bad size" })),
            )
            .mount(&server)
            .await;
        let requester = ImageRequester::new(
            server.uri(),
            Duration::from_secs(5),
            GenerationRequest::default(),
            None,
        )
        .unwrap();

        let outcome = requester.execute(dispatch(1)).await;

        assert_eq!(outcome.status, OutcomeStatus::Failed);
        assert_eq!(outcome.http_status, Some(422));
        assert_eq!(outcome.error_detail.as_deref(), Some("bad size"));
    }

    #[tokio::test]
    async fn refused_connection_is_timeout() {
        // Bind then drop to get a port nobody listens on
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let requester = ImageRequester::new(
            format!("http://127.0.0.1:{port}"),
            Duration::from_secs(2),
            GenerationRequest::default(),
            None,
        )
        .unwrap();

        let outcome = requester.execute(dispatch(1)).await;

        assert_eq!(outcome.status, OutcomeStatus::Timeout);
        assert_eq!(outcome.http_status, None);
    }

    #[tokio::test]
    async fn health_falls_back_to_models() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "data": [] })))
            .mount(&server)
            .await;
        let requester = ImageRequester::new(
            server.uri(),
            Duration::from_secs(5),
            GenerationRequest::default(),
            None,
        )
        .unwrap();

        assert!(requester.probe_health().await);
    }

    #[tokio::test]
    async fn health_fails_when_nothing_answers() {
        let server = MockServer::start().await;
        let requester = ImageRequester::new(
            server.uri(),
            Duration::from_secs(5),
            GenerationRequest::default(),
            None,
        )
        .unwrap();

        assert!(!requester.probe_health().await);
    }
}
