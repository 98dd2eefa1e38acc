//! HTTP front end.
//!
//! Serves the query API and a minimal web form with `tiny_http`.
//!
//! | Method | Path | Response |
//! |--------|------|----------|
//! | `GET` | `/` | HTML form |
//! | `GET` | `/health` | `ok` |
//! | `POST` | `/query` | `{"query": "<company>"}` -> [`QueryResult`](crate::models::QueryResult) JSON |
//! | `POST` | `/speech` | `{"text": "...", "language": "hi"}` -> `audio/mpeg` |
//!
//! Failures are answered with an [`ErrorBody`] and the status from
//! [`PipelineError::status_code`].
//!
//! `tiny_http::Server::recv` blocks, so it runs in `spawn_blocking`; each
//! request is then handled on its own local task (`spawn_local`), which is
//! why the server must run inside a `tokio::task::LocalSet`. Every request
//! gets a child of the shutdown token, so stopping the server cancels the
//! queries still in flight.

use crate::error::{ErrorBody, ErrorDetail, PipelineError};
use crate::pipeline::Pipeline;
use crate::speech::Speaker;
use serde::Deserialize;
use std::io::{Cursor, Read};
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

const INDEX_HTML: &str = include_str!("../static/index.html");

/// How long one blocking `recv` waits before checking for shutdown.
const RECV_POLL: Duration = Duration::from_millis(250);

/// Largest request body accepted.
const MAX_BODY_BYTES: u64 = 64 * 1024;

/// Request body accepted by `POST /query`.
#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub query: String,
}

/// Request body accepted by `POST /speech`.
#[derive(Debug, Deserialize)]
pub struct SpeechRequest {
    pub text: String,
    #[serde(default)]
    pub language: Option<String>,
}

/// Components shared by every request. Nothing in here is mutable.
pub struct AppState {
    pub pipeline: Pipeline,
    pub speaker: Speaker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Index,
    Health,
    Query,
    Speech,
    MethodNotAllowed,
    NotFound,
}

/// Map a method and request URL (query string allowed) to a [`Route`].
pub fn route(method: &tiny_http::Method, url: &str) -> Route {
    use tiny_http::Method::{Get, Head, Post};

    let path = url.split('?').next().unwrap_or_default();
    let (expected, matched) = match path {
        "/" | "/index.html" => (Get, Route::Index),
        "/health" => (Get, Route::Health),
        "/query" => (Post, Route::Query),
        "/speech" => (Post, Route::Speech),
        _ => return Route::NotFound,
    };
    if *method == expected || (expected == Get && *method == Head) {
        matched
    } else {
        Route::MethodNotAllowed
    }
}

/// A fully built response, independent of the connection it goes to.
#[derive(Debug)]
pub struct Reply {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl Reply {
    fn json<T: serde::Serialize>(status: u16, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Reply {
                status,
                content_type: "application/json",
                body,
            },
            Err(e) => Reply::error(&PipelineError::Config(format!("failed to encode response: {e}"))),
        }
    }

    pub fn error(e: &PipelineError) -> Self {
        let body = serde_json::to_vec(&ErrorBody::from(e)).unwrap_or_default();
        Reply {
            status: e.status_code(),
            content_type: "application/json",
            body,
        }
    }

    /// Error reply for requests that never reach the pipeline.
    fn routing(status: u16, kind: &'static str, message: &str) -> Self {
        let body = ErrorBody {
            error: ErrorDetail {
                kind,
                message: message.to_string(),
                retryable: false,
            },
        };
        Reply {
            status,
            content_type: "application/json",
            body: serde_json::to_vec(&body).unwrap_or_default(),
        }
    }

    fn into_response(self) -> tiny_http::Response<Cursor<Vec<u8>>> {
        let response = tiny_http::Response::from_data(self.body).with_status_code(self.status);
        match tiny_http::Header::from_bytes(&b"Content-Type"[..], self.content_type.as_bytes()) {
            Ok(header) => response.with_header(header),
            Err(()) => response,
        }
    }
}

fn parse_body<'a, T: Deserialize<'a>>(body: &'a str) -> Result<T, PipelineError> {
    serde_json::from_str(body).map_err(|e| PipelineError::InvalidRequest(format!("malformed JSON body: {e}")))
}

/// Produce the reply for a routed request.
pub async fn dispatch(state: &AppState, route: Route, body: &str, cancel: &CancellationToken) -> Reply {
    match route {
        Route::Index => Reply {
            status: 200,
            content_type: "text/html; charset=utf-8",
            body: INDEX_HTML.as_bytes().to_vec(),
        },
        Route::Health => Reply {
            status: 200,
            content_type: "text/plain; charset=utf-8",
            body: b"ok".to_vec(),
        },
        Route::Query => {
            let request: QueryRequest = match parse_body(body) {
                Ok(r) => r,
                Err(e) => return Reply::error(&e),
            };
            match state.pipeline.run(&request.query, cancel).await {
                Ok(result) => Reply::json(200, &result),
                Err(e) => Reply::error(&e),
            }
        }
        Route::Speech => {
            let request: SpeechRequest = match parse_body(body) {
                Ok(r) => r,
                Err(e) => return Reply::error(&e),
            };
            let speech = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(PipelineError::Cancelled("request was cancelled".to_string())),
                res = state.speaker.speak(&request.text, request.language.as_deref()) => res,
            };
            match speech {
                Ok(audio) => Reply {
                    status: 200,
                    content_type: "audio/mpeg",
                    body: audio,
                },
                Err(e) => Reply::error(&e),
            }
        }
        Route::MethodNotAllowed => Reply::routing(405, "method_not_allowed", "method not allowed"),
        Route::NotFound => Reply::routing(404, "not_found", "no such route"),
    }
}

/// Bind the listening socket.
pub fn bind(addr: &str) -> Result<Arc<tiny_http::Server>, PipelineError> {
    let server = tiny_http::Server::http(addr)
        .map_err(|e| PipelineError::Config(format!("failed to bind {addr}: {e}")))?;
    Ok(Arc::new(server))
}

/// Accept requests until `shutdown` fires. Must run inside a `LocalSet`.
#[instrument(level = "info", skip_all)]
pub async fn serve(
    server: Arc<tiny_http::Server>,
    state: Rc<AppState>,
    shutdown: CancellationToken,
) -> Result<(), PipelineError> {
    info!(addr = ?server.server_addr(), "Listening");
    loop {
        let http = Arc::clone(&server);
        let mut next = tokio::task::spawn_blocking(move || http.recv_timeout(RECV_POLL));
        let received = tokio::select! {
            _ = shutdown.cancelled() => None,
            received = &mut next => Some(received),
        };
        let Some(received) = received else {
            info!("Shutdown requested; no longer accepting requests");
            // The poll in flight may still hand over one last request.
            if let Ok(Ok(Some(request))) = next.await {
                turn_away(request).await;
            }
            break;
        };

        match received {
            Ok(Ok(Some(request))) => {
                let state = Rc::clone(&state);
                let cancel = shutdown.child_token();
                tokio::task::spawn_local(handle(request, state, cancel));
            }
            Ok(Ok(None)) => continue,
            Ok(Err(e)) => warn!(error = %e, "Failed to receive request"),
            Err(e) => {
                error!(error = %e, "Accept task failed");
                return Err(PipelineError::Config(format!("accept task failed: {e}")));
            }
        }
    }
    Ok(())
}

/// Read a UTF-8 body of at most [`MAX_BODY_BYTES`].
fn read_body(reader: impl Read) -> Result<String, PipelineError> {
    let mut body = String::new();
    reader
        .take(MAX_BODY_BYTES + 1)
        .read_to_string(&mut body)
        .map_err(|e| PipelineError::InvalidRequest(format!("unreadable body: {e}")))?;
    if body.len() as u64 > MAX_BODY_BYTES {
        return Err(PipelineError::InvalidRequest(format!(
            "request body exceeds {MAX_BODY_BYTES} bytes"
        )));
    }
    Ok(body)
}

/// Answer a request that arrived after shutdown began.
async fn turn_away(request: tiny_http::Request) {
    let reply = Reply::error(&PipelineError::Cancelled("server is shutting down".to_string()));
    match tokio::task::spawn_blocking(move || request.respond(reply.into_response())).await {
        Ok(Ok(())) => debug!("Turned away request during shutdown"),
        Ok(Err(e)) => warn!(error = %e, "Failed to turn away request"),
        Err(e) => error!(error = %e, "Responder task failed"),
    }
}

#[instrument(level = "info", skip_all, fields(method = %request.method(), url = %request.url()))]
async fn handle(request: tiny_http::Request, state: Rc<AppState>, cancel: CancellationToken) {
    let t0 = Instant::now();
    let route = route(request.method(), request.url());

    // Bodies are small, but reading still blocks on the client socket.
    let read = tokio::task::spawn_blocking(move || {
        let mut request = request;
        let res = read_body(request.as_reader());
        (request, res)
    })
    .await;
    let (request, body) = match read {
        Ok(pair) => pair,
        Err(e) => {
            error!(error = %e, "Body reader task failed");
            return;
        }
    };

    let reply = match body {
        Ok(body) => dispatch(&state, route, &body, &cancel).await,
        Err(e) => Reply::error(&e),
    };
    let status = reply.status;

    let sent = tokio::task::spawn_blocking(move || request.respond(reply.into_response())).await;
    let elapsed_ms = t0.elapsed().as_millis() as u64;
    match sent {
        Ok(Ok(())) => info!(?route, status, elapsed_ms, "Responded"),
        Ok(Err(e)) => warn!(?route, status, elapsed_ms, error = %e, "Client went away before the response was sent"),
        Err(e) => error!(error = %e, "Responder task failed"),
    }
    debug!("Request finished");
}
