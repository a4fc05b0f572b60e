//! Control-plane HTTP + WebSocket server
//!
//! One listener on `127.0.0.1:<wsPort>` carries the reload/ack HTTP
//! endpoints and the `/ws` upgrade used by in-page runtimes. Every response
//! is CORS-open so build tooling and injected page code can reach it from
//! any origin.

use crate::error::{Error, Result};
use crate::queue::HmrState;
use crate::runtime::runtime_source;
use crate::types::{to_reload_ack, to_reload_request};
use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Clone)]
struct AppState {
  hmr: Arc<HmrState>,
  shutdown: watch::Receiver<bool>,
}

/// Running control-plane server.
pub struct HmrServer {
  state: Arc<HmrState>,
  addr: SocketAddr,
  shutdown: watch::Sender<bool>,
  task: JoinHandle<()>,
}

impl HmrServer {
  /// Bind `127.0.0.1:<port>` and start serving. Port 0 picks an ephemeral
  /// port (tests); the bound address is available via [`local_addr`].
  ///
  /// [`local_addr`]: HmrServer::local_addr
  pub async fn start(state: Arc<HmrState>, port: u16) -> Result<Self> {
    let requested: SocketAddr = ([127, 0, 0, 1], port).into();
    let listener = TcpListener::bind(requested)
      .await
      .map_err(|e| Error::Bind {
        addr: requested.to_string(),
        source: e,
      })?;
    let addr = listener.local_addr()?;

    let (shutdown, shutdown_rx) = watch::channel(false);
    let app = router(AppState {
      hmr: Arc::clone(&state),
      shutdown: shutdown_rx.clone(),
    });

    let mut serve_shutdown = shutdown_rx;
    let task = tokio::spawn(async move {
      let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = serve_shutdown.changed().await;
      });
      if let Err(e) = serve.await {
        tracing::error!("control plane server error: {}", e);
      }
    });

    tracing::info!("hot-reload control plane on http://{}", addr);
    Ok(Self {
      state,
      addr,
      shutdown,
      task,
    })
  }

  /// The bound listener address.
  pub fn local_addr(&self) -> SocketAddr {
    self.addr
  }

  /// Shared queue state.
  pub fn state(&self) -> &Arc<HmrState> {
    &self.state
  }

  /// Orderly shutdown: abort outstanding timeouts, disconnect WebSocket
  /// clients, stop the listener. Resolves once the socket is released.
  pub async fn close(self) {
    self.state.close();
    let _ = self.shutdown.send(true);
    if let Err(e) = self.task.await {
      if !e.is_cancelled() {
        tracing::warn!("control plane task ended abnormally: {}", e);
      }
    }
  }
}

fn router(state: AppState) -> Router {
  // Per-route fallbacks: a wrong method on a known path gets the same JSON
  // 404 as an unknown path, never a bare 405.
  Router::new()
    .route("/health", get(health).fallback(not_found))
    .route("/runtime.js", get(runtime_js).fallback(not_found))
    .route("/last-ack", get(last_ack).fallback(not_found))
    .route("/reload", post(reload).fallback(not_found))
    .route("/ack", post(ack).fallback(not_found))
    .route("/ws", get(ws_upgrade).fallback(not_found))
    .fallback(not_found)
    .layer(middleware::from_fn(cors))
    .with_state(state)
}

async fn health() -> Response {
  Json(json!({"status": "ok", "type": "pcf-dev-proxy-hmr"})).into_response()
}

async fn runtime_js() -> Response {
  (
    [
      (header::CONTENT_TYPE, "application/javascript; charset=utf-8"),
      (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
    ],
    format!("{}\n", runtime_source()),
  )
    .into_response()
}

async fn last_ack(State(state): State<AppState>) -> Response {
  Json(state.hmr.last_acks()).into_response()
}

async fn reload(State(state): State<AppState>, body: Bytes) -> Response {
  let value: Value = match serde_json::from_slice(&body) {
    Ok(value) => value,
    Err(e) => {
      return (
        StatusCode::BAD_REQUEST,
        Json(json!({"error": format!("Invalid JSON body: {e}")})),
      )
        .into_response();
    }
  };
  let request = to_reload_request(&value, state.hmr.control_name());
  let id = state.hmr.enqueue_reload(request);
  Json(json!({"accepted": true, "id": id})).into_response()
}

async fn ack(State(state): State<AppState>, body: Bytes) -> Response {
  let value: Value = match serde_json::from_slice(&body) {
    Ok(value) => value,
    Err(e) => {
      return (
        StatusCode::BAD_REQUEST,
        Json(json!({"error": format!("Invalid JSON body: {e}")})),
      )
        .into_response();
    }
  };
  match to_reload_ack(&value) {
    Ok(reload_ack) => {
      state.hmr.complete_ack(reload_ack);
      Json(json!({"ok": true})).into_response()
    }
    Err(e) => (StatusCode::BAD_REQUEST, Json(json!({"error": e.to_string()}))).into_response(),
  }
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
  ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
  let (mut sender, mut receiver) = socket.split();
  let mut frames = state.hmr.subscribe();
  let mut shutdown = state.shutdown.clone();

  tracing::info!("runtime client connected ({} total)", state.hmr.client_count());

  loop {
    tokio::select! {
      frame = frames.recv() => match frame {
        Ok(text) => {
          if sender.send(Message::Text(text)).await.is_err() {
            break;
          }
        }
        // A lagged client just misses superseded dispatches.
        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
      },
      inbound = receiver.next() => match inbound {
        Some(Ok(Message::Text(text))) => state.hmr.handle_frame(&text),
        Some(Ok(Message::Close(_))) | None => break,
        Some(Ok(_)) => {}
        Some(Err(_)) => break,
      },
      _ = shutdown.changed() => break,
    }
  }

  tracing::info!("runtime client disconnected");
}

async fn not_found() -> Response {
  (StatusCode::NOT_FOUND, Json(json!({"error": "not found"}))).into_response()
}

/// CORS for every route; OPTIONS preflights short-circuit to 204.
async fn cors(request: Request, next: Next) -> Response {
  if request.method() == Method::OPTIONS {
    let mut response = StatusCode::NO_CONTENT.into_response();
    apply_cors(response.headers_mut());
    return response;
  }
  let mut response = next.run(request).await;
  apply_cors(response.headers_mut());
  response
}

fn apply_cors(headers: &mut HeaderMap) {
  headers.insert(
    header::ACCESS_CONTROL_ALLOW_ORIGIN,
    HeaderValue::from_static("*"),
  );
  headers.insert(
    header::ACCESS_CONTROL_ALLOW_METHODS,
    HeaderValue::from_static("GET, POST, OPTIONS"),
  );
  headers.insert(
    header::ACCESS_CONTROL_ALLOW_HEADERS,
    HeaderValue::from_static("Content-Type"),
  );
}
