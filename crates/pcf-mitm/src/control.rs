//! Control identity
//!
//! Controls are addressed by a dotted identifier of the form
//! `<prefix>_<namespace>.<constructor>` (e.g. `cc_Contoso.MyControl`). The
//! interception pattern is derived from the full identifier; the host page's
//! registry keys on the short name, the identifier with its prefix segment
//! stripped.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// A dotted control identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ControlName(String);

impl ControlName {
  /// Wrap a control identifier.
  pub fn new(name: impl Into<String>) -> Self {
    Self(name.into())
  }

  /// The full identifier.
  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// The host registry key: everything up to and including the first `_`
  /// is stripped.
  pub fn short_name(&self) -> &str {
    self.0.split_once('_').map(|(_, rest)| rest).unwrap_or(&self.0)
  }
}

impl fmt::Display for ControlName {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<String> for ControlName {
  fn from(name: String) -> Self {
    Self(name)
  }
}

impl From<&str> for ControlName {
  fn from(name: &str) -> Self {
    Self(name.to_string())
  }
}

impl Borrow<str> for ControlName {
  fn borrow(&self) -> &str {
    &self.0
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn short_name_strips_the_prefix_segment() {
    let control = ControlName::new("cc_Contoso.MyControl");
    assert_eq!(control.short_name(), "Contoso.MyControl");
  }

  #[test]
  fn only_the_first_underscore_delimits() {
    let control = ControlName::new("cc_My_Namespace.Control");
    assert_eq!(control.short_name(), "My_Namespace.Control");
  }

  #[test]
  fn name_without_prefix_is_its_own_short_name() {
    let control = ControlName::new("Contoso.MyControl");
    assert_eq!(control.short_name(), "Contoso.MyControl");
  }

  #[test]
  fn displays_as_the_full_identifier() {
    let control = ControlName::new("cc_Acme.Widget");
    assert_eq!(control.to_string(), "cc_Acme.Widget");
  }

  #[test]
  fn serializes_transparently() {
    let control = ControlName::new("cc_Acme.Widget");
    assert_eq!(serde_json::to_string(&control).unwrap(), "\"cc_Acme.Widget\"");
  }
}
