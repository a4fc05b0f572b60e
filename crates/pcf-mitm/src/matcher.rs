//! Bundle request matching
//!
//! Recognizes requests that target a control's bundle URLs and extracts the
//! relative asset path. Everything the matcher rejects is passed through to
//! its original destination untouched.

use crate::control::ControlName;
use crate::error::{Error, Result};
use regex::Regex;

/// Matches request URLs against a control's bundle namespace.
///
/// The pattern is derived from the control identifier: literal dots are
/// escaped and `/([^?]+)` is appended, so any URL containing
/// `<control>/<relative-path>` matches regardless of host or query string.
#[derive(Debug, Clone)]
pub struct BundleMatcher {
  control: ControlName,
  pattern: Regex,
}

impl BundleMatcher {
  /// Build a matcher for the given control identifier
  /// (e.g. `cc_Contoso.MyControl`).
  pub fn new(control: &ControlName) -> Result<Self> {
    let pattern = Regex::new(&format!("{}/([^?]+)", regex::escape(control.as_str())))
      .map_err(|e| Error::Pattern(e.to_string()))?;
    Ok(Self {
      control: control.clone(),
      pattern,
    })
  }

  /// The control identifier this matcher was built from.
  pub fn control(&self) -> &ControlName {
    &self.control
  }

  /// Match a request URL. Returns the relative asset path on success.
  ///
  /// Case-sensitive; the first matching segment wins. Method, headers and
  /// body are not consulted.
  pub fn matches(&self, url: &str) -> Option<String> {
    self
      .pattern
      .captures(url)
      .and_then(|caps| caps.get(1))
      .map(|m| m.as_str().to_string())
  }
}
