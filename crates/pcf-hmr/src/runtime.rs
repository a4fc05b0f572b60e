//! In-page runtime source
//!
//! The runtime itself is JavaScript, embedded at compile time so the proxy
//! ships as a single binary. It is served verbatim from `/runtime.js` and
//! prepended to intercepted bundles in hot mode, prefixed with the one-line
//! configuration declaration that tells it which control-plane port to dial.

/// Control-plane port the runtime falls back to when the page carries no
/// configuration declaration.
pub const DEFAULT_WS_PORT: u16 = 8643;

/// The in-page runtime source.
pub fn runtime_source() -> &'static str {
  include_str!("runtime/hmr-runtime.js")
}

/// The full injection prefix for intercepted bundles: the runtime
/// configuration declaration on the first line, then the runtime source.
pub fn injected_prefix(ws_port: u16) -> String {
  format!("var __pcfHmrWsPort = {ws_port};\n{}", runtime_source())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn prefix_declares_port_on_first_line() {
    let prefix = injected_prefix(9999);
    assert!(prefix.starts_with("var __pcfHmrWsPort = 9999;\n"));
  }

  #[test]
  fn runtime_speaks_the_control_plane_protocol() {
    let source = runtime_source();
    assert!(source.contains("pcf-hmr:reload"));
    assert!(source.contains("pcf-hmr:ack"));
    assert!(source.contains("/ws"));
  }

  #[test]
  fn runtime_installs_once() {
    let source = runtime_source();
    assert!(source.contains("__pcfHmrInstalled"));
  }

  #[test]
  fn runtime_reads_configured_port_with_default() {
    let source = runtime_source();
    assert!(source.contains("__pcfHmrWsPort"));
    assert!(source.contains("8643"));
  }

  #[test]
  fn runtime_instruments_host_registry() {
    let source = runtime_source();
    assert!(source.contains("registerControl"));
    assert!(source.contains("getRegisteredControl"));
  }
}
