//! Streamable-HTTP MCP endpoint.
//!
//! A single tenant endpoint routed by method: POST carries JSON-RPC
//! requests and notifications, GET opens a long-lived SSE notification
//! stream, DELETE terminates a session.
//!
//! POST sessions are ephemeral: registered before dispatch and
//! unregistered on every exit path by a drop guard, including client
//! disconnects mid-stream. If a notification reaches the session channel
//! before the dispatcher's reply, the response upgrades to SSE and the
//! reply becomes the final frame; otherwise a single JSON body goes out,
//! gzip-compressed past the size threshold when the client accepts it.

use crate::dispatch::RequestContext;
use crate::error::{Error, Result};
use crate::server::AppState;
use crate::session::{Session, SessionError, SessionStore};
use crate::spec::ParsedSpec;
use crate::transport::{accepts_gzip, gzip, sse_frame, GZIP_MIN_BYTES};
use crate::types::{error_codes, JsonRpcRequest, JsonRpcResponse, SESSION_ID_HEADER};
use axum::body::Body;
use bytes::Bytes;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Unregisters an ephemeral or subscribing session when dropped. Disarmed
/// guards cover the suppressed `SESSION_EXISTS` case, where a concurrent
/// subscriber owns the id and must keep it.
struct SessionGuard {
    store: Arc<SessionStore>,
    id: String,
    armed: bool,
}

impl SessionGuard {
    fn new(store: Arc<SessionStore>, id: String, armed: bool) -> Self {
        Self { store, id, armed }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.armed {
            self.store.unregister(&self.id);
        }
    }
}

/// Dispatch running on its own task so the handler can race it against the
/// notification channel. Dropping the handle aborts the dispatch, which
/// propagates request cancellation into the tool handler and its upstream
/// call.
struct DispatchTask {
    handle: tokio::task::JoinHandle<Result<Option<Vec<u8>>>>,
}

impl DispatchTask {
    fn spawn(state: &AppState, ctx: RequestContext, raw: Vec<u8>) -> Self {
        let dispatcher = state.dispatcher.clone();
        Self {
            handle: tokio::spawn(async move { dispatcher.handle(ctx, raw).await }),
        }
    }
}

impl Future for DispatchTask {
    type Output = Result<Option<Vec<u8>>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.handle).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(e)) => {
                Poll::Ready(Err(Error::Internal(format!("dispatch task failed: {}", e))))
            },
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for DispatchTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

enum Race {
    Done(Result<Option<Vec<u8>>>),
    Notified(Option<Value>),
}

enum StreamStep {
    Notification(Option<Value>),
    Ping,
}

/// POST: one JSON-RPC message in, one reply out, possibly as an SSE stream.
pub async fn handle_post(
    state: AppState,
    spec: Arc<ParsedSpec>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !content_type.contains("application/json") {
        return (
            StatusCode::BAD_REQUEST,
            "Content-Type must be application/json",
        )
            .into_response();
    }

    let envelope: Value = match serde_json::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(JsonRpcResponse::error(
                    None,
                    error_codes::PARSE_ERROR,
                    format!("Parse error: {}", e),
                )),
            )
                .into_response();
        },
    };
    let envelope_id = envelope.get("id").cloned();
    let is_init = envelope.get("method").and_then(Value::as_str) == Some("initialize");

    let supplied = header_value(&headers, SESSION_ID_HEADER);
    let ttl = state.config.mcp.session_ttl();

    let session_id = if is_init {
        // A supplied id is still subject to validation so stateless
        // deployments reject it.
        if !supplied.is_empty() {
            if let Err(e) = state.identity.validate(&supplied) {
                return session_rejection(envelope_id, e.to_string());
            }
        }
        state.identity.generate()
    } else {
        if let Err(e) = state.identity.validate(&supplied) {
            return session_rejection(envelope_id, e.to_string());
        }
        // A live subscriber with this id gets its expiry extended.
        let _ = state.sessions.touch(&supplied, ttl);
        supplied
    };

    let session = Session::new(session_id.clone(), ttl, preserved_headers(&headers));
    let registered = match state.sessions.register(session.clone()) {
        Ok(()) => true,
        Err(SessionError::Exists(_)) => {
            // A concurrent GET stream owns this id; proceed unregistered.
            debug!(session = %session_id, "Session already registered; proceeding ephemeral");
            false
        },
        Err(e) => {
            return Error::Internal(e.to_string()).into_response();
        },
    };
    let guard = SessionGuard::new(state.sessions.clone(), session_id.clone(), registered);

    let Some(mut rx) = session.take_receiver() else {
        return Error::Internal("session notification channel unavailable".to_string())
            .into_response();
    };

    let ctx = RequestContext {
        session: session.clone(),
        spec,
    };
    let mut task = DispatchTask::spawn(&state, ctx, body.to_vec());

    let race = tokio::select! {
        res = &mut task => Race::Done(res),
        maybe = rx.recv() => Race::Notified(maybe),
    };

    match race {
        Race::Notified(Some(first)) => {
            sse_upgrade_running(guard, is_init, &session_id, first, task, rx)
        },
        Race::Notified(None) => {
            let result = (&mut task).await;
            direct_response(guard, is_init, &session_id, &headers, result)
        },
        Race::Done(result) => {
            // Notifications that landed before the reply still force the
            // upgrade; drain whatever is buffered.
            let mut pending = Vec::new();
            while let Ok(n) = rx.try_recv() {
                pending.push(n);
            }
            if pending.is_empty() {
                direct_response(guard, is_init, &session_id, &headers, result)
            } else {
                sse_upgrade_finished(guard, is_init, &session_id, pending, result)
            }
        },
    }
}

/// GET: long-lived notification stream for a subscribing session.
pub async fn handle_get(state: AppState, _spec: Arc<ParsedSpec>, headers: HeaderMap) -> Response {
    let supplied = header_value(&headers, SESSION_ID_HEADER);
    if !supplied.is_empty() {
        if let Err(e) = state.identity.validate(&supplied) {
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    }

    let session_id = if supplied.is_empty() {
        state.identity.generate()
    } else {
        supplied
    };

    let ttl = state.config.mcp.session_ttl();
    let session = Session::new(session_id.clone(), ttl, preserved_headers(&headers));
    let (session, receiver) = match state.sessions.register(session.clone()) {
        Ok(()) => (session.clone(), session.take_receiver()),
        Err(SessionError::Exists(_)) => match state.sessions.get(&session_id) {
            Some(existing) => {
                let receiver = existing.take_receiver();
                (existing, receiver)
            },
            None => {
                return Error::Conflict(format!("session contended: {}", session_id))
                    .into_response();
            },
        },
        Err(e) => return Error::Internal(e.to_string()).into_response(),
    };
    let guard = SessionGuard::new(state.sessions.clone(), session_id.clone(), true);

    let Some(mut rx) = receiver else {
        return Error::Conflict(format!("session already streaming: {}", session_id))
            .into_response();
    };

    debug!(session = %session.id, "Subscriber stream opened");
    let heartbeat = state.config.mcp.heartbeat_interval();
    let endpoint_data = format!("?sessionId={}", session_id);

    let stream = async_stream::stream! {
        let _guard = guard;
        yield Ok::<_, Infallible>(Bytes::from(sse_frame("endpoint", &endpoint_data)));

        match heartbeat {
            Some(period) => {
                let mut ticker =
                    tokio::time::interval_at(tokio::time::Instant::now() + period, period);
                let mut ping_seq: u64 = 0;
                loop {
                    let step = tokio::select! {
                        maybe = rx.recv() => StreamStep::Notification(maybe),
                        _ = ticker.tick() => StreamStep::Ping,
                    };
                    match step {
                        StreamStep::Notification(Some(n)) => {
                            yield Ok(Bytes::from(sse_frame("message", &n.to_string())));
                        },
                        StreamStep::Notification(None) => break,
                        StreamStep::Ping => {
                            ping_seq += 1;
                            let ping = JsonRpcRequest::new(
                                "ping",
                                json!({}),
                                Some(json!(format!("ping-{}", ping_seq))),
                            );
                            if let Ok(data) = serde_json::to_string(&ping) {
                                yield Ok(Bytes::from(sse_frame("message", &data)));
                            }
                        },
                    }
                }
            },
            None => {
                while let Some(n) = rx.recv().await {
                    yield Ok(Bytes::from(sse_frame("message", &n.to_string())));
                }
            },
        }
    };

    sse_response(false, &session_id, Body::from_stream(stream))
}

/// DELETE: terminate the session named by the header.
pub async fn handle_delete(state: AppState, headers: HeaderMap) -> Response {
    let session_id = header_value(&headers, SESSION_ID_HEADER);

    match state.identity.terminate(&session_id) {
        Ok(()) => {
            if let Some(session) = state.sessions.get(&session_id) {
                session.clear_tools();
            }
            state.sessions.unregister(&session_id);
            debug!(session = %session_id, "Session terminated");
            StatusCode::OK.into_response()
        },
        Err(e) => {
            warn!(session = %session_id, error = %e, "Session termination refused");
            StatusCode::METHOD_NOT_ALLOWED.into_response()
        },
    }
}

/// SSE upgrade while the dispatcher is still running: forward notifications
/// as they arrive, then emit the reply as the final frame.
fn sse_upgrade_running(
    guard: SessionGuard,
    is_init: bool,
    session_id: &str,
    first: Value,
    mut task: DispatchTask,
    mut rx: mpsc::Receiver<Value>,
) -> Response {
    let stream = async_stream::stream! {
        let _guard = guard;
        yield Ok::<_, Infallible>(Bytes::from(sse_frame("message", &first.to_string())));

        let result = loop {
            let step = tokio::select! {
                res = &mut task => break res,
                maybe = rx.recv() => StreamStep::Notification(maybe),
            };
            match step {
                StreamStep::Notification(Some(n)) => {
                    yield Ok(Bytes::from(sse_frame("message", &n.to_string())));
                },
                StreamStep::Notification(None) => break (&mut task).await,
                StreamStep::Ping => {},
            }
        };

        // Anything buffered before the reply was produced goes out first.
        while let Ok(n) = rx.try_recv() {
            yield Ok(Bytes::from(sse_frame("message", &n.to_string())));
        }
        for frame in reply_frames(result) {
            yield Ok(Bytes::from(frame));
        }
    };

    sse_response(is_init, session_id, Body::from_stream(stream))
}

/// SSE upgrade after the dispatcher already returned with notifications
/// buffered: emit them, then the reply.
fn sse_upgrade_finished(
    guard: SessionGuard,
    is_init: bool,
    session_id: &str,
    pending: Vec<Value>,
    result: Result<Option<Vec<u8>>>,
) -> Response {
    let stream = async_stream::stream! {
        let _guard = guard;
        for n in pending {
            yield Ok::<_, Infallible>(Bytes::from(sse_frame("message", &n.to_string())));
        }
        for frame in reply_frames(result) {
            yield Ok(Bytes::from(frame));
        }
    };

    sse_response(is_init, session_id, Body::from_stream(stream))
}

/// Final SSE frames for a dispatch outcome.
fn reply_frames(result: Result<Option<Vec<u8>>>) -> Vec<String> {
    match result {
        Ok(Some(bytes)) => vec![sse_frame("message", &String::from_utf8_lossy(&bytes))],
        Ok(None) => Vec::new(),
        Err(e) => {
            let error =
                JsonRpcResponse::error(None, error_codes::INTERNAL_ERROR, e.to_string());
            match serde_json::to_string(&error) {
                Ok(data) => vec![sse_frame("message", &data)],
                Err(_) => Vec::new(),
            }
        },
    }
}

/// Plain JSON response path, with size-gated gzip.
fn direct_response(
    guard: SessionGuard,
    is_init: bool,
    session_id: &str,
    request_headers: &HeaderMap,
    result: Result<Option<Vec<u8>>>,
) -> Response {
    // The ephemeral session ends with this response.
    drop(guard);

    match result {
        Ok(Some(bytes)) => {
            let mut builder = Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "application/json");
            if is_init && !session_id.is_empty() {
                builder = builder.header(SESSION_ID_HEADER, session_id);
            }

            let body = if bytes.len() > GZIP_MIN_BYTES && accepts_gzip(request_headers) {
                match gzip(&bytes) {
                    Some(compressed) => {
                        builder = builder
                            .header(header::CONTENT_ENCODING, "gzip")
                            .header(header::VARY, "Accept-Encoding");
                        compressed
                    },
                    None => bytes,
                }
            } else {
                bytes
            };

            builder
                .body(Body::from(body))
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
        },
        // Notification: acknowledged with an empty 202.
        Ok(None) => StatusCode::ACCEPTED.into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(JsonRpcResponse::error(
                None,
                error_codes::INTERNAL_ERROR,
                e.to_string(),
            )),
        )
            .into_response(),
    }
}

fn sse_response(is_init: bool, session_id: &str, body: Body) -> Response {
    let mut builder = Response::builder()
        .status(StatusCode::ACCEPTED)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache");
    if is_init && !session_id.is_empty() {
        builder = builder.header(SESSION_ID_HEADER, session_id);
    }
    builder
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn session_rejection(id: Option<Value>, message: String) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(JsonRpcResponse::error(
            id,
            error_codes::INVALID_REQUEST,
            message,
        )),
    )
        .into_response()
}

fn header_value(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .trim()
        .to_string()
}

/// Incoming request headers preserved on the session for auth resolution,
/// names lowercased.
fn preserved_headers(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preserved_headers_lowercased() {
        let mut headers = HeaderMap::new();
        headers.insert("Authorization", "Bearer XYZ".parse().unwrap());
        headers.insert("X-RapidAPI-Key", "K1".parse().unwrap());

        let preserved = preserved_headers(&headers);
        assert_eq!(preserved.get("authorization").unwrap(), "Bearer XYZ");
        assert_eq!(preserved.get("x-rapidapi-key").unwrap(), "K1");
    }

    #[test]
    fn test_header_value_trims() {
        let mut headers = HeaderMap::new();
        headers.insert(SESSION_ID_HEADER, " mcp-session-x ".parse().unwrap());
        assert_eq!(header_value(&headers, SESSION_ID_HEADER), "mcp-session-x");
    }

    #[test]
    fn test_reply_frames_for_error() {
        let frames = reply_frames(Err(Error::Internal("boom".to_string())));
        assert_eq!(frames.len(), 1);
        assert!(frames[0].contains("-32603"));
    }
}
