//! Bundle watcher
//!
//! Optional file-change trigger: watches the serving root (non-recursive)
//! and enqueues a reload whenever `bundle.js` settles after a 500 ms
//! debounce, so a build writing the bundle in several chunks produces a
//! single dispatch.

use crate::error::Result;
use crate::queue::HmrState;
use crate::types::{now_iso, ReloadRequest};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::{AbortHandle, JoinHandle};

/// Quiet period after the last `bundle.js` event before a reload fires.
pub const DEBOUNCE: Duration = Duration::from_millis(500);

/// Watches the serving root and enqueues debounced reloads.
pub struct BundleWatcher {
  _watcher: RecommendedWatcher,
  debounce: Arc<Mutex<Option<AbortHandle>>>,
  forward_task: JoinHandle<()>,
}

impl BundleWatcher {
  /// Start watching `dir` for `bundle.js` changes, enqueueing through the
  /// given control-plane state.
  pub fn watch(dir: &Path, state: Arc<HmrState>) -> Result<Self> {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
      if let Ok(event) = result {
        let _ = tx.send(event);
      }
    })?;
    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    tracing::info!("watching {} for bundle.js changes", dir.display());

    let debounce: Arc<Mutex<Option<AbortHandle>>> = Arc::new(Mutex::new(None));
    let debounce_slot = Arc::clone(&debounce);
    let forward_task = tokio::spawn(async move {
      while let Some(event) = rx.recv().await {
        if !is_bundle_event(&event) {
          continue;
        }
        if let Some(previous) = lock(&debounce_slot).take() {
          previous.abort();
        }
        let state = Arc::clone(&state);
        let fire = tokio::spawn(async move {
          tokio::time::sleep(DEBOUNCE).await;
          let request = ReloadRequest {
            control_name: state.control_name().clone(),
            build_id: now_iso(),
            trigger: "watch-bundle".to_string(),
            changed_files: None,
          };
          state.enqueue_reload(request);
        });
        *lock(&debounce_slot) = Some(fire.abort_handle());
      }
    });

    Ok(Self {
      _watcher: watcher,
      debounce,
      forward_task,
    })
  }

  /// Stop watching; cancels any pending debounce.
  pub fn close(self) {
    if let Some(pending) = lock(&self.debounce).take() {
      pending.abort();
    }
    self.forward_task.abort();
  }
}

fn is_bundle_event(event: &Event) -> bool {
  matches!(
    event.kind,
    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
  ) && event
    .paths
    .iter()
    .any(|path| path.file_name().map(|name| name == "bundle.js").unwrap_or(false))
}

fn lock(slot: &Mutex<Option<AbortHandle>>) -> MutexGuard<'_, Option<AbortHandle>> {
  match slot.lock() {
    Ok(guard) => guard,
    Err(poisoned) => poisoned.into_inner(),
  }
}
