//! Hot-reload control plane for pcf-dev-proxy
//!
//! A local HTTP + WebSocket endpoint that accepts reload requests from
//! external build tools, dispatches them to connected in-page runtimes,
//! tracks acknowledgements with a per-control latest-wins queue, and times
//! out unanswered dispatches. Also ships the in-page runtime source and an
//! optional `bundle.js` watcher.
//!
//! # Example
//!
//! ```no_run
//! use pcf_hmr::{HmrConfig, HmrServer, HmrState};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let state = HmrState::new(HmrConfig::new("cc_Contoso.MyControl"));
//!     let server = HmrServer::start(state, 8643).await?;
//!     // ... serve until shutdown ...
//!     server.close().await;
//!     Ok(())
//! }
//! ```

mod error;
mod queue;
mod runtime;
mod server;
mod types;
mod watcher;

pub use error::{Error, Result};
pub use pcf_mitm::ControlName;
pub use queue::{HmrConfig, HmrState, ACK_TIMEOUT};
pub use runtime::{injected_prefix, runtime_source, DEFAULT_WS_PORT};
pub use server::HmrServer;
pub use types::{
  to_reload_ack, to_reload_request, AckStatus, ReloadAck, ReloadMessage, ReloadRequest,
  ACK_MESSAGE_TYPE, RELOAD_MESSAGE_TYPE,
};
pub use watcher::{BundleWatcher, DEBOUNCE};
