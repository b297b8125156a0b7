//! sketchbridge binary — serves the editor's language-intelligence bridge.

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use sketchbridge_server::BridgeConfig;
use sketchbridge_server::config::LAUNCH_COMMAND_ENV;

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::try_new("warn").expect("warn filter is valid"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = BridgeConfig::from_env()?;
    if config.launch_command.is_none() {
        // Not fatal at boot: each connection is rejected with an explicit
        // close code until the operator provides a command.
        tracing::warn!("{LAUNCH_COMMAND_ENV} is not set; lsp connections will be rejected");
    }

    sketchbridge_server::serve(config).await
}
