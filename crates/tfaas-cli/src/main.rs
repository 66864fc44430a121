// SPDX-License-Identifier: PolyForm-Shield-1.0

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

#[derive(Parser)]
#[command(name = "tfaas", version, about = "TensorFlow model-serving gateway")]
struct Cli {
    /// path to the startup JSON configuration document
    #[arg(long, default_value = "config.json")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = tfaas_config::load_from_file(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config))?;

    tfaas_util::logging::init_tracing(config.verbose);
    info!(config = %cli.config, "starting tfaas");

    tfaas_gateway::run(config).await?;

    Ok(())
}
