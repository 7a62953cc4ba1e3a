use std::convert::Infallible;
use std::sync::{Arc, Mutex, MutexGuard};

use axum::body::{Body, Bytes};
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use sitegen::{GenerationClient, Session};
use tokio::sync::mpsc;

const INDEX_HTML: &str = include_str!("../assets/index.html");

/// Uploads carry whole images; axum's 2 MiB default is too small.
const MAX_BODY_BYTES: usize = 20 * 1024 * 1024;

/// Shared handler state: one session and the client that feeds it.
#[derive(Clone)]
pub struct AppState {
    session: Arc<Mutex<Session>>,
    client: GenerationClient,
}

impl AppState {
    pub fn new(client: GenerationClient) -> Self {
        Self {
            session: Arc::new(Mutex::new(Session::new())),
            client,
        }
    }

    /// Never held across an await.
    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Deserialize)]
struct GenerateBody {
    #[serde(default)]
    prompt: String,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
        .into_response()
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/session", get(session_snapshot))
        .route(
            "/api/attachment",
            post(upload_attachment).delete(remove_attachment),
        )
        .route("/api/generate", post(generate))
        .route("/api/document", get(document))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve on an already-bound listener until the process exits.
pub async fn run(listener: tokio::net::TcpListener, state: AppState) -> anyhow::Result<()> {
    tracing::info!("Listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn session_snapshot(State(state): State<AppState>) -> Response {
    let snapshot = state.session().snapshot();
    Json(snapshot).into_response()
}

async fn document(State(state): State<AppState>) -> Response {
    let document = state.session().document().to_string();
    Html(document).into_response()
}

async fn upload_attachment(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mime = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let result = {
        let mut session = state.session();
        session.attach(mime, &body).map(|()| session.snapshot())
    };
    match result {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => {
            tracing::debug!("Rejected attachment: {}", e);
            error_response(StatusCode::UNSUPPORTED_MEDIA_TYPE, e.to_string())
        }
    }
}

async fn remove_attachment(State(state): State<AppState>) -> Response {
    let snapshot = {
        let mut session = state.session();
        session.clear_attachment();
        session.snapshot()
    };
    Json(snapshot).into_response()
}

/// Finishes the turn when dropped, so a panicking generation task still
/// clears the busy flag.
struct TurnGuard(AppState);

impl Drop for TurnGuard {
    fn drop(&mut self) {
        self.0.session().finish_turn();
    }
}

/// Start a turn and stream its fragments back as a plain-text body.
async fn generate(State(state): State<AppState>, Json(body): Json<GenerateBody>) -> Response {
    let request = {
        let mut session = state.session();
        if session.is_busy() {
            return error_response(
                StatusCode::CONFLICT,
                "A generation is already in progress.",
            );
        }
        match session.begin_turn(&body.prompt) {
            Some(request) => request,
            None => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    "Describe the website or attach an image first.",
                );
            }
        }
    };

    let (tx, rx) = mpsc::unbounded_channel::<String>();
    let task_state = state.clone();
    tokio::spawn(async move {
        let turn = TurnGuard(task_state.clone());
        task_state
            .client
            .generate(&request, |fragment| {
                task_state.session().append_fragment(fragment);
                // The browser may have gone away; the document still fills in.
                let _ = tx.send(fragment.to_string());
            })
            .await;
        // Finish before closing the body so a client that refreshes on EOF
        // sees the settled session.
        drop(turn);
        drop(tx);
    });

    let stream = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|f| (Ok::<_, Infallible>(f), rx))
    });

    Response::builder()
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::X_CONTENT_TYPE_OPTIONS, "nosniff")
        .body(Body::from_stream(stream))
        .unwrap_or_else(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::StreamExt;
    use sitegen::{ContentBackend, FragmentStream, GenerateError, GenerationConfig, GenerationRequest};

    use super::*;

    /// Replays fixed fragments; optionally never ends the stream.
    struct FixedBackend {
        fragments: Vec<&'static str>,
        hang: bool,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ContentBackend for FixedBackend {
        async fn stream_generate(
            &self,
            _api_key: &str,
            _config: &GenerationConfig,
            _request: &GenerationRequest,
        ) -> Result<FragmentStream, GenerateError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let items = futures::stream::iter(
                self.fragments
                    .iter()
                    .map(|f| Ok::<_, GenerateError>(f.to_string()))
                    .collect::<Vec<_>>(),
            );
            if self.hang {
                Ok(Box::pin(items.chain(futures::stream::pending())))
            } else {
                Ok(Box::pin(items))
            }
        }
    }

    struct PanickingBackend;

    #[async_trait::async_trait]
    impl ContentBackend for PanickingBackend {
        async fn stream_generate(
            &self,
            _api_key: &str,
            _config: &GenerationConfig,
            _request: &GenerationRequest,
        ) -> Result<FragmentStream, GenerateError> {
            panic!("backend blew up");
        }
    }

    async fn spawn_app(backend: Arc<FixedBackend>, api_key: Option<&str>) -> SocketAddr {
        let config = GenerationConfig {
            api_key: api_key.map(str::to_string),
            ..Default::default()
        };
        let state = AppState::new(GenerationClient::new(config, backend));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(run(listener, state));
        addr
    }

    fn backend(fragments: Vec<&'static str>, hang: bool) -> Arc<FixedBackend> {
        Arc::new(FixedBackend {
            fragments,
            hang,
            calls: AtomicUsize::new(0),
        })
    }

    async fn snapshot(http: &reqwest::Client, addr: SocketAddr) -> serde_json::Value {
        http.get(format!("http://{addr}/api/session"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn serves_index() {
        let addr = spawn_app(backend(vec![], false), Some("k")).await;
        let resp = reqwest::get(format!("http://{addr}/")).await.unwrap();
        assert!(resp.status().is_success());
        let html = resp.text().await.unwrap();
        assert!(html.contains("<iframe"));
    }

    #[tokio::test]
    async fn full_turn_over_http() {
        let be = backend(vec!["<html>", "...", "</html>"], false);
        let addr = spawn_app(be.clone(), Some("k")).await;
        let http = reqwest::Client::new();

        let snap = snapshot(&http, addr).await;
        assert_eq!(snap["started"], false);

        let empty = http
            .post(format!("http://{addr}/api/generate"))
            .json(&serde_json::json!({"prompt": "  "}))
            .send()
            .await
            .unwrap();
        assert_eq!(empty.status(), reqwest::StatusCode::BAD_REQUEST);
        assert_eq!(snapshot(&http, addr).await["transcript"], serde_json::json!([]));

        let resp = http
            .post(format!("http://{addr}/api/generate"))
            .json(&serde_json::json!({"prompt": "Landing page for a coffee shop"}))
            .send()
            .await
            .unwrap();
        assert!(resp.status().is_success());
        assert_eq!(resp.text().await.unwrap(), "<html>...</html>");

        let snap = snapshot(&http, addr).await;
        assert_eq!(snap["document"], "<html>...</html>");
        assert_eq!(snap["busy"], false);
        assert_eq!(snap["started"], true);
        assert_eq!(snap["transcript"].as_array().unwrap().len(), 2);
        assert_eq!(snap["transcript"][1]["text"], sitegen::CONFIRMATION);

        let doc = http
            .get(format!("http://{addr}/api/document"))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(doc, "<html>...</html>");
        assert_eq!(be.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn attachment_upload_and_removal() {
        let addr = spawn_app(backend(vec!["<html></html>"], false), Some("k")).await;
        let http = reqwest::Client::new();

        let bad = http
            .post(format!("http://{addr}/api/attachment"))
            .header("content-type", "image/gif")
            .body(b"GIF89a".to_vec())
            .send()
            .await
            .unwrap();
        assert_eq!(bad.status(), reqwest::StatusCode::UNSUPPORTED_MEDIA_TYPE);
        let err: serde_json::Value = bad.json().await.unwrap();
        assert!(err["error"].as_str().unwrap().contains("PNG or JPEG"));
        assert!(snapshot(&http, addr).await["attachment"].is_null());

        let ok: serde_json::Value = http
            .post(format!("http://{addr}/api/attachment"))
            .header("content-type", "image/png")
            .body(b"\x89PNG".to_vec())
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(ok["attachment"]["media_type"], "image/png");

        let removed: serde_json::Value = http
            .delete(format!("http://{addr}/api/attachment"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(removed["attachment"].is_null());

        http.post(format!("http://{addr}/api/generate"))
            .json(&serde_json::json!({"prompt": "A portfolio"}))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        let snap = snapshot(&http, addr).await;
        assert_eq!(snap["transcript"][0]["text"], "A portfolio");
    }

    #[tokio::test]
    async fn concurrent_generate_is_rejected() {
        let be = backend(vec!["<html>"], true);
        let addr = spawn_app(be.clone(), Some("k")).await;
        let http = reqwest::Client::new();

        let mut first = http
            .post(format!("http://{addr}/api/generate"))
            .json(&serde_json::json!({"prompt": "first"}))
            .send()
            .await
            .unwrap();
        assert!(first.status().is_success());
        assert_eq!(first.chunk().await.unwrap().as_deref(), Some(&b"<html>"[..]));

        let second = http
            .post(format!("http://{addr}/api/generate"))
            .json(&serde_json::json!({"prompt": "second"}))
            .send()
            .await
            .unwrap();
        assert_eq!(second.status(), reqwest::StatusCode::CONFLICT);

        let snap = snapshot(&http, addr).await;
        assert_eq!(snap["busy"], true);
        assert_eq!(snap["document"], "<html>");
        assert_eq!(snap["transcript"].as_array().unwrap().len(), 1);
        assert_eq!(be.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_key_streams_diagnostic() {
        let be = backend(vec!["<html>"], false);
        let addr = spawn_app(be.clone(), None).await;
        let http = reqwest::Client::new();

        let body = http
            .post(format!("http://{addr}/api/generate"))
            .json(&serde_json::json!({"prompt": "Landing page"}))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(body.starts_with("<!-- Error:"));
        assert_eq!(be.calls.load(Ordering::SeqCst), 0);
        assert_eq!(snapshot(&http, addr).await["busy"], false);
    }

    #[tokio::test]
    async fn panicking_generation_clears_busy() {
        let config = GenerationConfig {
            api_key: Some("k".into()),
            ..Default::default()
        };
        let state = AppState::new(GenerationClient::new(config, Arc::new(PanickingBackend)));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(run(listener, state));
        let http = reqwest::Client::new();

        let resp = http
            .post(format!("http://{addr}/api/generate"))
            .json(&serde_json::json!({"prompt": "Landing page"}))
            .send()
            .await
            .unwrap();
        assert!(resp.status().is_success());
        let _ = resp.text().await;

        let mut snap = snapshot(&http, addr).await;
        for _ in 0..50 {
            if snap["busy"] == false {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            snap = snapshot(&http, addr).await;
        }
        assert_eq!(snap["busy"], false);
        assert_eq!(snap["transcript"].as_array().unwrap().len(), 2);

        let next = http
            .post(format!("http://{addr}/api/generate"))
            .json(&serde_json::json!({"prompt": "Try again"}))
            .send()
            .await
            .unwrap();
        assert_ne!(next.status(), reqwest::StatusCode::CONFLICT);
    }
}
