//! pcf-dev-proxy entry point

mod cli;
mod reload;
mod serve;

use clap::error::ErrorKind;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_target(false)
    .init();

  let parsed = match cli::Cli::try_parse() {
    Ok(parsed) => parsed,
    Err(e) => {
      let code = match e.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
        _ => 1,
      };
      let _ = e.print();
      std::process::exit(code);
    }
  };

  let result = match parsed.command {
    Some(cli::Command::Reload(args)) => reload::run(args).await,
    None => serve::run(parsed.serve).await,
  };

  if let Err(e) = result {
    tracing::error!("{e:#}");
    std::process::exit(1);
  }
}
