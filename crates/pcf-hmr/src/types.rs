//! Control-plane wire types
//!
//! Reload requests arrive from build tooling over HTTP, reload messages go
//! out to connected in-page runtimes over WebSocket, and ACKs come back over
//! either transport. Bodies are parsed leniently: missing or malformed
//! request fields fall back to defaults, while ACKs are validated strictly.

use crate::error::{Error, Result};
use pcf_mitm::ControlName;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Frame type for server-to-runtime reload dispatches.
pub const RELOAD_MESSAGE_TYPE: &str = "pcf-hmr:reload";
/// Frame type for runtime-to-server acknowledgements.
pub const ACK_MESSAGE_TYPE: &str = "pcf-hmr:ack";

/// Current wall clock in epoch milliseconds.
pub fn epoch_ms() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_millis() as u64)
    .unwrap_or(0)
}

/// Current wall clock as an ISO-8601 timestamp.
pub fn now_iso() -> String {
  OffsetDateTime::now_utc()
    .format(&Rfc3339)
    .unwrap_or_else(|_| epoch_ms().to_string())
}

/// A reload request as accepted from external build tooling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReloadRequest {
  /// Control the reload targets
  pub control_name: ControlName,
  /// Build identifier, defaulted to a wall-clock timestamp
  pub build_id: String,
  /// Free-form trigger label (`"manual"`, `"watch-bundle"`, ...)
  pub trigger: String,
  /// Optional changed-file metadata; carried through without semantic effect
  #[serde(skip_serializing_if = "Option::is_none")]
  pub changed_files: Option<Vec<String>>,
}

/// A reload message as enqueued and dispatched by the control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReloadMessage {
  /// Process-unique dispatch id, `r-<epochMs>-<seq>`
  pub id: String,
  /// The originating request fields
  #[serde(flatten)]
  pub request: ReloadRequest,
  /// Enqueue time, epoch milliseconds
  pub timestamp: u64,
}

/// Reload outcome reported by the in-page runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
  /// Every instance was reloaded
  Success,
  /// Some but not all instances were reloaded
  Partial,
  /// No instance was reloaded, or the cycle failed outright
  Failed,
}

impl AckStatus {
  /// Lowercase wire form, for log lines.
  pub fn as_str(&self) -> &'static str {
    match self {
      AckStatus::Success => "success",
      AckStatus::Partial => "partial",
      AckStatus::Failed => "failed",
    }
  }
}

/// An acknowledgement for a dispatched reload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReloadAck {
  /// Dispatch id this ACK answers
  pub id: String,
  /// Control the reload targeted
  pub control_name: ControlName,
  /// Build identifier echoed from the reload message
  pub build_id: String,
  /// Reload outcome
  pub status: AckStatus,
  /// Instances present before the reload
  #[serde(default)]
  pub instances_total: u64,
  /// Instances successfully re-initialized
  #[serde(default)]
  pub instances_reloaded: u64,
  /// Runtime-measured reload duration in milliseconds
  #[serde(default)]
  pub duration_ms: u64,
  /// Failure detail, present when `status` is `failed`
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
  /// Receipt time at the server, epoch milliseconds
  pub timestamp: u64,
}

/// Build a [`ReloadRequest`] from an arbitrary JSON body.
///
/// Non-object bodies are treated as empty. String fields are trimmed and
/// fall back to `fallback_control` / current ISO timestamp / `"manual"`
/// when empty or absent. `changedFiles` is present iff the input value is
/// an array, filtered to its string elements.
pub fn to_reload_request(body: &Value, fallback_control: &ControlName) -> ReloadRequest {
  let object = body.as_object();
  let trimmed = |key: &str| {
    object
      .and_then(|map| map.get(key))
      .and_then(Value::as_str)
      .map(str::trim)
      .filter(|s| !s.is_empty())
      .map(String::from)
  };

  ReloadRequest {
    control_name: trimmed("controlName")
      .map(ControlName::new)
      .unwrap_or_else(|| fallback_control.clone()),
    build_id: trimmed("buildId").unwrap_or_else(now_iso),
    trigger: trimmed("trigger").unwrap_or_else(|| "manual".to_string()),
    changed_files: object
      .and_then(|map| map.get("changedFiles"))
      .and_then(Value::as_array)
      .map(|files| {
        files
          .iter()
          .filter_map(Value::as_str)
          .map(String::from)
          .collect()
      }),
  }
}

/// Validate a [`ReloadAck`] from an arbitrary JSON body.
///
/// `id`, `controlName` and `buildId` must be strings and `status` must be a
/// known value; numeric fields default to 0, `error` is accepted only as a
/// string, and the timestamp is always the server's receipt time.
pub fn to_reload_ack(body: &Value) -> Result<ReloadAck> {
  let object = body
    .as_object()
    .ok_or(Error::InvalidAck("ACK missing required fields"))?;
  let required = |key: &str| {
    object
      .get(key)
      .and_then(Value::as_str)
      .map(String::from)
      .ok_or(Error::InvalidAck("ACK missing required fields"))
  };

  let id = required("id")?;
  let control_name = ControlName::new(required("controlName")?);
  let build_id = required("buildId")?;

  let status = match object.get("status").and_then(Value::as_str) {
    Some("success") => AckStatus::Success,
    Some("partial") => AckStatus::Partial,
    Some("failed") => AckStatus::Failed,
    _ => return Err(Error::InvalidAck("Invalid ACK status")),
  };

  let number = |key: &str| object.get(key).and_then(Value::as_u64).unwrap_or(0);

  Ok(ReloadAck {
    id,
    control_name,
    build_id,
    status,
    instances_total: number("instancesTotal"),
    instances_reloaded: number("instancesReloaded"),
    duration_ms: number("durationMs"),
    error: object.get("error").and_then(Value::as_str).map(String::from),
    timestamp: epoch_ms(),
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn fallback() -> ControlName {
    ControlName::new("cc_Acme.Widget")
  }

  #[test]
  fn request_defaults_apply_to_empty_body() {
    let request = to_reload_request(&json!({}), &fallback());
    assert_eq!(request.control_name.as_str(), "cc_Acme.Widget");
    assert_eq!(request.trigger, "manual");
    assert!(!request.build_id.is_empty());
    assert!(request.changed_files.is_none());
  }

  #[test]
  fn non_object_body_is_treated_as_empty() {
    let request = to_reload_request(&json!("not an object"), &fallback());
    assert_eq!(request.control_name.as_str(), "cc_Acme.Widget");
  }

  #[test]
  fn request_fields_are_trimmed() {
    let body = json!({"controlName": "  cc_X.Y  ", "buildId": " b1 ", "trigger": " save "});
    let request = to_reload_request(&body, &fallback());
    assert_eq!(request.control_name.as_str(), "cc_X.Y");
    assert_eq!(request.build_id, "b1");
    assert_eq!(request.trigger, "save");
  }

  #[test]
  fn whitespace_only_fields_fall_back() {
    let body = json!({"controlName": "   ", "trigger": ""});
    let request = to_reload_request(&body, &fallback());
    assert_eq!(request.control_name.as_str(), "cc_Acme.Widget");
    assert_eq!(request.trigger, "manual");
  }

  #[test]
  fn changed_files_keeps_only_strings() {
    let body = json!({"changedFiles": ["a.ts", 42, null, "b.ts"]});
    let request = to_reload_request(&body, &fallback());
    assert_eq!(request.changed_files, Some(vec!["a.ts".to_string(), "b.ts".to_string()]));
  }

  #[test]
  fn changed_files_absent_unless_sequence() {
    let body = json!({"changedFiles": "a.ts"});
    assert!(to_reload_request(&body, &fallback()).changed_files.is_none());
  }

  #[test]
  fn ack_requires_identity_fields() {
    let body = json!({"controlName": "c", "buildId": "b", "status": "success"});
    let err = to_reload_ack(&body).unwrap_err();
    assert_eq!(err.to_string(), "ACK missing required fields");
  }

  #[test]
  fn ack_rejects_unknown_status() {
    let body = json!({"id": "r-1-1", "controlName": "c", "buildId": "b", "status": "done"});
    let err = to_reload_ack(&body).unwrap_err();
    assert_eq!(err.to_string(), "Invalid ACK status");
  }

  #[test]
  fn ack_numeric_fields_default_to_zero() {
    let body = json!({
      "id": "r-1-1", "controlName": "c", "buildId": "b", "status": "partial",
      "instancesTotal": "three"
    });
    let ack = to_reload_ack(&body).unwrap();
    assert_eq!(ack.instances_total, 0);
    assert_eq!(ack.instances_reloaded, 0);
    assert_eq!(ack.duration_ms, 0);
  }

  #[test]
  fn ack_error_accepted_only_as_string() {
    let body = json!({
      "id": "r-1-1", "controlName": "c", "buildId": "b", "status": "failed",
      "error": {"nested": true}
    });
    let ack = to_reload_ack(&body).unwrap();
    assert!(ack.error.is_none());
  }

  #[test]
  fn ack_timestamp_is_server_side() {
    let before = epoch_ms();
    let body = json!({
      "id": "r-1-1", "controlName": "c", "buildId": "b", "status": "success",
      "timestamp": 7
    });
    let ack = to_reload_ack(&body).unwrap();
    assert!(ack.timestamp >= before, "client timestamps are ignored");
  }

  #[test]
  fn message_serializes_flat_and_camel_case() {
    let message = ReloadMessage {
      id: "r-5-1".to_string(),
      request: ReloadRequest {
        control_name: ControlName::new("cc_Acme.Widget"),
        build_id: "b1".to_string(),
        trigger: "manual".to_string(),
        changed_files: None,
      },
      timestamp: 5,
    };
    let value = serde_json::to_value(&message).unwrap();
    assert_eq!(value["id"], "r-5-1");
    assert_eq!(value["controlName"], "cc_Acme.Widget");
    assert_eq!(value["buildId"], "b1");
    assert!(value.get("changedFiles").is_none());
  }

  #[test]
  fn ack_status_round_trips_lowercase() {
    assert_eq!(serde_json::to_value(AckStatus::Failed).unwrap(), json!("failed"));
    assert_eq!(AckStatus::Success.as_str(), "success");
  }
}
