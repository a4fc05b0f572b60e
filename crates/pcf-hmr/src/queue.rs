//! Per-control reload queue
//!
//! Latest-wins dispatch: each control has a single pending slot that is
//! overwritten on enqueue, and at most one message in flight. Unanswered
//! dispatches time out with a synthesized failed ACK so `/last-ack` always
//! reflects the outcome of the most recent attempt.
//!
//! All queue data lives behind one mutex; HTTP handlers, WebSocket frames
//! and timeout callbacks mutate it strictly one at a time.

use crate::types::{
  epoch_ms, to_reload_ack, AckStatus, ReloadAck, ReloadMessage, ReloadRequest, ACK_MESSAGE_TYPE,
  RELOAD_MESSAGE_TYPE,
};
use pcf_mitm::ControlName;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::AbortHandle;

/// How long a dispatched reload may go unanswered before it is failed.
pub const ACK_TIMEOUT: Duration = Duration::from_millis(15_000);

const BROADCAST_CAPACITY: usize = 64;

/// Control-plane configuration
#[derive(Debug, Clone)]
pub struct HmrConfig {
  /// Control used when a reload request names none
  pub control_name: ControlName,
  /// Timeout for unanswered dispatches (15 s unless a test shortens it)
  pub ack_timeout: Duration,
}

impl HmrConfig {
  /// Configuration with the default ACK timeout.
  pub fn new(control_name: impl Into<ControlName>) -> Self {
    Self {
      control_name: control_name.into(),
      ack_timeout: ACK_TIMEOUT,
    }
  }
}

#[derive(Default)]
struct ControlQueue {
  active: bool,
  current: Option<ReloadMessage>,
  pending: Option<ReloadMessage>,
  timeout: Option<AbortHandle>,
}

#[derive(Default)]
struct QueueInner {
  queues: HashMap<ControlName, ControlQueue>,
  last_acks: BTreeMap<ControlName, ReloadAck>,
  next_seq: u64,
}

/// Shared control-plane state: reload queues, last-ACK records, and the
/// broadcast channel feeding connected WebSocket clients.
pub struct HmrState {
  config: HmrConfig,
  tx: broadcast::Sender<String>,
  inner: Mutex<QueueInner>,
}

impl HmrState {
  /// Create the shared state.
  pub fn new(config: HmrConfig) -> Arc<Self> {
    let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
    Arc::new(Self {
      config,
      tx,
      inner: Mutex::new(QueueInner::default()),
    })
  }

  /// The configured fallback control name.
  pub fn control_name(&self) -> &ControlName {
    &self.config.control_name
  }

  /// Subscribe to outbound reload frames (one receiver per WebSocket client).
  pub fn subscribe(&self) -> broadcast::Receiver<String> {
    self.tx.subscribe()
  }

  /// Number of currently connected WebSocket clients.
  pub fn client_count(&self) -> usize {
    self.tx.receiver_count()
  }

  /// Enqueue a reload: assign an id, overwrite the control's pending slot,
  /// and dispatch if nothing is in flight. Returns the assigned id.
  pub fn enqueue_reload(self: &Arc<Self>, request: ReloadRequest) -> String {
    let mut inner = self.lock();
    inner.next_seq += 1;
    let id = format!("r-{}-{}", epoch_ms(), inner.next_seq);
    let message = ReloadMessage {
      id: id.clone(),
      request,
      timestamp: epoch_ms(),
    };
    let control = message.request.control_name.clone();
    tracing::debug!(
      "queued reload {} for {} (trigger: {})",
      message.id,
      control,
      message.request.trigger
    );
    inner.queues.entry(control.clone()).or_default().pending = Some(message);
    self.process_queue(&mut inner, &control);
    id
  }

  /// Record an ACK and, when it answers the in-flight dispatch, drain the
  /// queue. Stale ACKs still win the last-ACK record.
  pub fn complete_ack(self: &Arc<Self>, ack: ReloadAck) {
    let mut inner = self.lock();
    let control = ack.control_name.clone();
    inner.last_acks.insert(control.clone(), ack.clone());

    let Some(queue) = inner.queues.get_mut(&control) else {
      tracing::warn!("stale ACK {} for {} (no reload in flight)", ack.id, control);
      return;
    };
    if !queue.active {
      tracing::warn!("stale ACK {} for {} (no reload in flight)", ack.id, control);
      return;
    }
    let current_id = queue.current.as_ref().map(|m| m.id.clone()).unwrap_or_default();
    if current_id != ack.id {
      tracing::warn!(
        "stale ACK {} for {} (current is {})",
        ack.id,
        control,
        current_id
      );
      return;
    }

    if let Some(timeout) = queue.timeout.take() {
      timeout.abort();
    }
    queue.active = false;
    queue.current = None;

    tracing::info!(
      "reload {} for {}: {} ({}/{} instances in {} ms)",
      ack.id,
      control,
      ack.status.as_str(),
      ack.instances_reloaded,
      ack.instances_total,
      ack.duration_ms
    );
    self.process_queue(&mut inner, &control);
  }

  /// Handle an inbound WebSocket frame. Only `pcf-hmr:ack` frames have
  /// meaning; everything malformed is ignored.
  pub fn handle_frame(self: &Arc<Self>, text: &str) {
    let Ok(value) = serde_json::from_str::<Value>(text) else {
      return;
    };
    if value.get("type").and_then(Value::as_str) != Some(ACK_MESSAGE_TYPE) {
      return;
    }
    let Some(payload) = value.get("payload") else {
      return;
    };
    if let Ok(ack) = to_reload_ack(payload) {
      self.complete_ack(ack);
    }
  }

  /// Snapshot of the latest ACK per control.
  pub fn last_acks(&self) -> BTreeMap<ControlName, ReloadAck> {
    self.lock().last_acks.clone()
  }

  /// Abort every armed timeout and drop queued work. Idempotent.
  pub fn close(&self) {
    let mut inner = self.lock();
    for queue in inner.queues.values_mut() {
      if let Some(timeout) = queue.timeout.take() {
        timeout.abort();
      }
      queue.active = false;
      queue.current = None;
      queue.pending = None;
    }
  }

  /// Promote a pending message to current and dispatch it. No-op while a
  /// dispatch is in flight or when nothing is pending.
  fn process_queue(self: &Arc<Self>, inner: &mut QueueInner, control: &ControlName) {
    let queue = inner.queues.entry(control.clone()).or_default();
    if queue.active {
      return;
    }
    let Some(message) = queue.pending.take() else {
      return;
    };
    queue.active = true;
    queue.current = Some(message.clone());

    let frame = json!({"type": RELOAD_MESSAGE_TYPE, "payload": &message}).to_string();
    let receivers = self.tx.send(frame).unwrap_or(0);
    tracing::info!(
      "dispatched reload {} for {} (build {}) to {} client(s)",
      message.id,
      control,
      message.request.build_id,
      receivers
    );

    let state = Arc::clone(self);
    let timeout_control = control.clone();
    let timeout_id = message.id.clone();
    let ack_timeout = self.config.ack_timeout;
    let handle = tokio::spawn(async move {
      tokio::time::sleep(ack_timeout).await;
      state.on_timeout(&timeout_control, &timeout_id);
    });
    queue.timeout = Some(handle.abort_handle());
  }

  /// Timeout callback: only acts when the scheduled dispatch is still
  /// current (a late fire after cancellation is harmless).
  fn on_timeout(self: &Arc<Self>, control: &ControlName, id: &str) {
    let mut inner = self.lock();
    let Some(queue) = inner.queues.get_mut(control) else {
      return;
    };
    let Some(current) = queue.current.take_if(|m| m.id == id) else {
      return;
    };
    queue.active = false;
    queue.timeout = None;

    tracing::warn!("reload {} for {} timed out waiting for runtime ACK", id, control);
    let ack = ReloadAck {
      id: current.id,
      control_name: current.request.control_name,
      build_id: current.request.build_id,
      status: AckStatus::Failed,
      instances_total: 0,
      instances_reloaded: 0,
      duration_ms: self.config.ack_timeout.as_millis() as u64,
      error: Some("Timed out waiting for runtime ACK".to_string()),
      timestamp: epoch_ms(),
    };
    inner.last_acks.insert(control.clone(), ack);
    self.process_queue(&mut inner, control);
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, QueueInner> {
    match self.inner.lock() {
      Ok(guard) => guard,
      Err(poisoned) => poisoned.into_inner(),
    }
  }
}
