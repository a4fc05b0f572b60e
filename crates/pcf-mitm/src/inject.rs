//! Hot-reload runtime injection
//!
//! In hot mode the intercepted `bundle.js` response is rewritten so the
//! in-page runtime loads before the component registers itself: the injected
//! prefix (runtime configuration line plus runtime source) is prepended to
//! the original bundle bytes. Everything else passes through unchanged.

use bytes::{BufMut, Bytes, BytesMut};

/// Prepends the in-page runtime prefix to intercepted bundles.
#[derive(Debug, Clone)]
pub struct BundleInjector {
  prefix: Bytes,
}

impl BundleInjector {
  /// Create an injector from a pre-rendered prefix (the runtime
  /// configuration declaration followed by the runtime source).
  pub fn new(prefix: impl Into<Bytes>) -> Self {
    Self {
      prefix: prefix.into(),
    }
  }

  /// Rewrite a bundle: prefix first, original bytes after.
  pub fn inject(&self, bundle: &[u8]) -> Vec<u8> {
    let mut out = BytesMut::with_capacity(self.prefix.len() + bundle.len());
    out.put_slice(&self.prefix);
    out.put_slice(bundle);
    out.to_vec()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn prefix_comes_before_bundle() {
    let injector = BundleInjector::new("var __pcfHmrWsPort = 9999;\n// runtime\n".as_bytes().to_vec());
    let out = injector.inject(b"console.log('bundle');");
    let text = String::from_utf8(out).unwrap();
    assert!(text.starts_with("var __pcfHmrWsPort = 9999;\n"));
    assert!(text.ends_with("console.log('bundle');"));
  }

  #[test]
  fn empty_bundle_yields_prefix_only() {
    let injector = BundleInjector::new("p".as_bytes().to_vec());
    assert_eq!(injector.inject(b""), b"p");
  }
}
