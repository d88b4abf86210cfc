use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

#[path = "../api/mod.rs"]
mod api;
#[path = "../browser/mod.rs"]
mod browser;
#[path = "../controller/mod.rs"]
mod controller;
#[path = "../sandbox/mod.rs"]
mod sandbox;
#[path = "../shared/mod.rs"]
mod shared;

#[derive(Parser)]
#[command(name = "diffbox-api")]
#[command(about = "Diffbox API - stateless gateway for ephemeral dev sandboxes")]
pub struct Args {
    /// Address to bind
    #[arg(long, env = "DIFFBOX_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to bind
    #[arg(long, env = "DIFFBOX_PORT", default_value_t = 9000)]
    pub port: u16,

    /// Directory for rolling log files
    #[arg(long, env = "DIFFBOX_LOG_DIR", default_value = "/app/logs")]
    pub log_dir: PathBuf,

    /// Gateway config file (JSON)
    #[arg(long, env = "DIFFBOX_CONFIG_PATH")]
    pub config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize service logging
    let _ = shared::logging::init_service_logging(&args.log_dir, "diffbox_api");

    // Run the API server
    api::rest::api::run_rest_server(args).await
}
