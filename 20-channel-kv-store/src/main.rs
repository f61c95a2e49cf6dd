use anyhow::Result;
use clap::Parser;

use channel_kv_store::{
    cli::{Cli, ServerConfig},
    server::Server,
};

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = ServerConfig::try_from(Cli::parse())?;
    let server = Server::bind(config).await?;
    server.run_until_ctrl_c().await
}
