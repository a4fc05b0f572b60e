//! Reload subcommand: post a reload request to a running proxy's control
//! plane and print the accepted dispatch id.

use crate::cli::ReloadArgs;
use anyhow::{bail, Context, Result};
use serde_json::{json, Value};

pub async fn run(args: ReloadArgs) -> Result<()> {
  let mut body = serde_json::Map::new();
  body.insert("controlName".to_string(), json!(args.control));
  if let Some(build_id) = args.build_id {
    body.insert("buildId".to_string(), json!(build_id));
  }
  if let Some(trigger) = args.trigger {
    body.insert("trigger".to_string(), json!(trigger));
  }
  if let Some(csv) = args.changed_files {
    let files: Vec<&str> = csv
      .split(',')
      .map(str::trim)
      .filter(|name| !name.is_empty())
      .collect();
    body.insert("changedFiles".to_string(), json!(files));
  }

  let url = format!("http://127.0.0.1:{}/reload", args.ws_port);
  let response = reqwest::Client::new()
    .post(&url)
    .json(&body)
    .send()
    .await
    .with_context(|| format!("failed to reach the control plane at {url}; is the proxy running?"))?;

  let status = response.status();
  let payload: Value = response
    .json()
    .await
    .context("control plane returned a non-JSON body")?;

  if !status.is_success() {
    bail!(
      "reload rejected ({}): {}",
      status,
      payload
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
    );
  }

  println!(
    "{}",
    payload.get("id").and_then(Value::as_str).unwrap_or_default()
  );
  Ok(())
}
