//! Hot-mode bundle rewriting across the two library crates: the rewritten
//! response must carry the configuration line, then the runtime, then the
//! original bundle bytes, in that order.

use pcf_hmr::injected_prefix;
use pcf_mitm::BundleInjector;

#[test]
fn rewritten_bundle_layout() {
  let injector = BundleInjector::new(injected_prefix(9999));
  let bundle = b"registerControl('cc_Acme.Widget');".to_vec();

  let rewritten = String::from_utf8(injector.inject(&bundle)).expect("utf8");

  assert!(rewritten.starts_with("var __pcfHmrWsPort = 9999;\n"));
  assert!(rewritten.contains("pcf-hmr:reload"), "runtime source is present");
  assert!(rewritten.ends_with("registerControl('cc_Acme.Widget');"));

  // The runtime sits strictly between the config line and the bundle.
  let runtime_at = rewritten.find("__pcfHmrInstalled").expect("runtime marker");
  let bundle_at = rewritten.find("registerControl('cc_Acme.Widget')").expect("bundle");
  assert!(runtime_at < bundle_at);
}

#[test]
fn default_port_prefix() {
  let prefix = injected_prefix(pcf_hmr::DEFAULT_WS_PORT);
  assert!(prefix.starts_with("var __pcfHmrWsPort = 8643;\n"));
}
