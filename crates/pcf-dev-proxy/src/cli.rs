//! Command-line interface

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Local HTTPS proxy with hot reload for PCF-style custom components.
#[derive(Parser, Debug)]
#[command(name = "pcf-dev-proxy", version, about)]
pub struct Cli {
  #[command(subcommand)]
  pub command: Option<Command>,

  #[command(flatten)]
  pub serve: ServeArgs,
}

/// Arguments for the primary serve command.
#[derive(Args, Debug)]
pub struct ServeArgs {
  /// HTTPS proxy listener port
  #[arg(long, default_value_t = 8642)]
  pub port: u16,

  /// Hot-reload control-plane port
  #[arg(long = "ws-port", default_value_t = 8643)]
  pub ws_port: u16,

  /// Directory containing the built control assets
  #[arg(long, default_value = ".")]
  pub dir: PathBuf,

  /// Control identifier to intercept (e.g. cc_Contoso.MyControl)
  #[arg(long)]
  pub control: Option<String>,

  /// Browser to point at the proxy
  #[arg(long, value_enum)]
  pub browser: Option<Browser>,

  /// Enable hot reload: runtime injection plus control-plane dispatch
  #[arg(long)]
  pub hot: bool,

  /// Enqueue a reload whenever bundle.js changes (requires --hot)
  #[arg(long = "watch-bundle")]
  pub watch_bundle: bool,

  /// Skip the CA trust confirmation prompt
  #[arg(short = 'y', long = "yes")]
  pub yes: bool,
}

/// Supported browsers.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Browser {
  Chrome,
  Edge,
}

impl Browser {
  pub fn as_str(&self) -> &'static str {
    match self {
      Browser::Chrome => "chrome",
      Browser::Edge => "edge",
    }
  }
}

/// Subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
  /// Ask a running proxy to dispatch a reload
  Reload(ReloadArgs),
}

/// Arguments for the reload subcommand.
#[derive(Args, Debug)]
pub struct ReloadArgs {
  /// Control identifier to reload
  #[arg(long)]
  pub control: String,

  /// Control-plane port of the running proxy
  #[arg(long = "ws-port", default_value_t = 8643)]
  pub ws_port: u16,

  /// Build identifier to attach
  #[arg(long = "build-id")]
  pub build_id: Option<String>,

  /// Trigger label to attach
  #[arg(long)]
  pub trigger: Option<String>,

  /// Comma-separated list of changed files to attach
  #[arg(long = "changed-files")]
  pub changed_files: Option<String>,
}
