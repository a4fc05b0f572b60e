//! Primary serve command: validate, wire everything together, run until a
//! shutdown signal.

use crate::cli::ServeArgs;
use anyhow::{bail, Context, Result};
use pcf_hmr::{injected_prefix, BundleWatcher, HmrConfig, HmrServer, HmrState};
use pcf_mitm::{BundleInjector, CertificateStore, ControlName, ProxyConfig, ProxyServer};
use std::io::Write;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Directory holding the externally generated proxy CA.
const CA_DIR: &str = ".pcf-dev-proxy";

static SHUTDOWN_STARTED: AtomicBool = AtomicBool::new(false);

pub async fn run(args: ServeArgs) -> Result<()> {
  let Some(control) = args.control.clone() else {
    // Manifest discovery lives in the packaging tooling; without it the
    // control must be named explicitly.
    bail!("no component manifest found; pass --control <prefix>_<namespace>.<name>");
  };
  let control = ControlName::new(control);
  if !args.dir.is_dir() {
    bail!("serving directory {} does not exist", args.dir.display());
  }
  if args.watch_bundle && !args.hot {
    bail!("--watch-bundle requires --hot");
  }
  if !args.yes && !confirm_ca_trust()? {
    bail!("aborted; re-run with --yes once the proxy CA is trusted");
  }

  let certs = Arc::new(
    CertificateStore::load(CA_DIR)
      .await
      .context("failed to load the proxy CA")?,
  );

  let state = HmrState::new(HmrConfig::new(control.clone()));
  let hmr_server = match HmrServer::start(Arc::clone(&state), args.ws_port).await {
    Ok(server) => server,
    Err(e) if e.is_addr_in_use() => {
      bail!(
        "port {} is already in use; is another pcf-dev-proxy running? (--ws-port selects another)",
        args.ws_port
      );
    }
    Err(e) => return Err(e).context("failed to start the hot-reload control plane"),
  };

  let watcher = if args.watch_bundle {
    Some(
      BundleWatcher::watch(&args.dir, Arc::clone(&state))
        .context("failed to start the bundle watcher")?,
    )
  } else {
    None
  };

  let injector = args
    .hot
    .then(|| BundleInjector::new(injected_prefix(args.ws_port)));
  let listen: SocketAddr = ([127, 0, 0, 1], args.port).into();
  let proxy = Arc::new(ProxyServer::new(
    ProxyConfig {
      listen,
      control: control.clone(),
      serve_dir: args.dir.clone(),
      hot: args.hot,
    },
    certs,
    injector,
  )?);

  let (shutdown_tx, shutdown_rx) = watch::channel(false);
  let mut proxy_task = tokio::spawn(Arc::clone(&proxy).run(shutdown_rx));

  tracing::info!("serving {} from {}", control, args.dir.display());
  if args.hot {
    tracing::info!("hot reload enabled on ws://127.0.0.1:{}/ws", args.ws_port);
  }
  if let Some(browser) = args.browser {
    tracing::info!(
      "point {} at the proxy with --proxy-server=127.0.0.1:{}",
      browser.as_str(),
      args.port
    );
  }

  tokio::select! {
    result = &mut proxy_task => {
      // The listener died on its own, usually a bind failure at startup.
      if let Some(watcher) = watcher {
        watcher.close();
      }
      hmr_server.close().await;
      return match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) if e.is_addr_in_use() => {
          bail!(
            "port {} is already in use; is another pcf-dev-proxy running? (--port selects another)",
            args.port
          )
        }
        Ok(Err(e)) => Err(e).context("proxy server failed"),
        Err(join) => bail!("proxy task failed: {join}"),
      };
    }
    _ = shutdown_signal() => {
      tracing::info!("shutdown signal received");
    }
  }

  shutdown(watcher, hmr_server, shutdown_tx, proxy_task).await;
  Ok(())
}

/// Orderly teardown: watcher first, then the control plane, then the proxy
/// listener. A second invocation is a no-op.
async fn shutdown(
  watcher: Option<BundleWatcher>,
  hmr_server: HmrServer,
  shutdown_tx: watch::Sender<bool>,
  proxy_task: JoinHandle<pcf_mitm::Result<()>>,
) {
  if SHUTDOWN_STARTED.swap(true, Ordering::SeqCst) {
    return;
  }
  if let Some(watcher) = watcher {
    watcher.close();
  }
  hmr_server.close().await;
  let _ = shutdown_tx.send(true);
  let _ = proxy_task.await;
  tracing::info!("shutdown complete");
}

async fn shutdown_signal() {
  let ctrl_c = async {
    let _ = tokio::signal::ctrl_c().await;
  };

  #[cfg(unix)]
  let terminate = async {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
      Ok(mut signal) => {
        signal.recv().await;
      }
      Err(_) => std::future::pending::<()>().await,
    }
  };

  #[cfg(not(unix))]
  let terminate = std::future::pending::<()>();

  tokio::select! {
    _ = ctrl_c => {}
    _ = terminate => {}
  }
}

fn confirm_ca_trust() -> Result<bool> {
  print!(
    "The proxy CA ({CA_DIR}/ca_cert.pem) must be trusted by your browser. Continue? [y/N] "
  );
  std::io::stdout().flush()?;
  let mut line = String::new();
  std::io::stdin().read_line(&mut line)?;
  let answer = line.trim().to_ascii_lowercase();
  Ok(answer == "y" || answer == "yes")
}
