//! `hitlflow`: start workflows on the remote engine and answer their checkpoints
//! from a terminal.
//!
//! # Environment Variables
//!
//! - `HITLFLOW_BASE_URL`, `HITLFLOW_AUTH_TOKEN`: see `ClientConfig`
//! - `LOG_LEVEL`, `LOG_FORMAT`: logging, written to stderr

mod cli;
mod session;

use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let conf = hitlflow_base::logging::load_tracing_config_from_env().unwrap_or_default();
    hitlflow_base::tracing_init(conf)?;

    cli::Cli::parse().run().await
}
