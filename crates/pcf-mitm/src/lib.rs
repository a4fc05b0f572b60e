//! HTTPS interception engine for pcf-dev-proxy
//!
//! A local MITM proxy that terminates TLS with a supplied CA, serves one
//! control's bundle requests from a sandboxed serving root (optionally
//! rewriting `bundle.js` with an injected hot-reload runtime), and passes
//! everything else through to its original destination.
//!
//! # Example
//!
//! ```no_run
//! use pcf_mitm::{CertificateStore, ControlName, ProxyConfig, ProxyServer};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let certs = Arc::new(CertificateStore::load(".pcf-dev-proxy").await?);
//!     let config = ProxyConfig {
//!         listen: "127.0.0.1:8642".parse()?,
//!         control: ControlName::new("cc_Contoso.MyControl"),
//!         serve_dir: "out/controls/MyControl".into(),
//!         hot: false,
//!     };
//!     let server = Arc::new(ProxyServer::new(config, certs, None)?);
//!     let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//!     server.run(shutdown_rx).await?;
//!     Ok(())
//! }
//! ```

mod assets;
mod ca;
mod control;
mod error;
mod inject;
mod matcher;
mod server;

pub use assets::{AssetResolver, AssetStatus, ResolvedAsset, NO_STORE};
pub use ca::CertificateStore;
pub use control::ControlName;
pub use error::{Error, Result};
pub use inject::BundleInjector;
pub use matcher::BundleMatcher;
pub use server::{ProxyConfig, ProxyServer};
