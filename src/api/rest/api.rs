use anyhow::{Context, Result};
use std::fs;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::api::rest::create_router;
use crate::browser::{BrowserbaseBackend, SystemResolver};
use crate::controller::connect_platform;
use crate::shared::config::GatewayConfig;
use crate::shared::models::AppState;
use crate::Args;

pub async fn run_rest_server(args: Args) -> Result<()> {
    // Write PID file for process management
    let pid = process::id();
    let pid_file = "/tmp/diffbox.pid";

    if let Err(e) = fs::write(pid_file, pid.to_string()) {
        warn!("Could not write PID file: {}", e);
    }

    // Set up cleanup on exit
    let pid_file_cleanup = pid_file.to_string();
    ctrlc::set_handler(move || {
        info!("Shutting down Diffbox API...");
        let _ = fs::remove_file(&pid_file_cleanup);
        std::process::exit(0);
    })?;

    info!("Starting Diffbox REST API service (PID {})", pid);

    let (config, loaded_from) = GatewayConfig::load(args.config.clone())?;
    match &loaded_from {
        Some(path) => info!("Loaded gateway config from {}", path.display()),
        None => info!("No config file found, using defaults"),
    }
    let config = Arc::new(config);
    if config.browser.api_key.is_none() || config.browser.project_id.is_none() {
        info!("Browserbase credentials not configured; browser calls must supply their own");
    }

    let platform = match connect_platform(Arc::new(config.platform.clone())) {
        Ok(platform) => platform,
        Err(e) => {
            error!("Failed to connect to sandbox platform: {}", e);
            error!("Please ensure Docker is running, or set platform.kind to \"local\"");
            return Err(anyhow::anyhow!(
                "Sandbox platform not available. Please check your configuration."
            ));
        }
    };

    let http = reqwest::Client::builder()
        .user_agent(concat!("diffbox/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_millis(config.browser.command_timeout_ms))
        .build()
        .context("Failed to build HTTP client")?;
    let browser_backend = Arc::new(BrowserbaseBackend::new(
        http.clone(),
        Arc::new(config.browser.clone()),
    ));
    let app_state = Arc::new(AppState::new(
        config,
        platform,
        browser_backend,
        Arc::new(SystemResolver),
        http,
    ));

    // Build REST router
    info!("Building REST API routes...");
    let app = create_router(app_state);

    // Start server
    let bind_addr = format!("{}:{}", args.host, args.port);
    info!("Binding to: {}", bind_addr);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {bind_addr}"))?;

    info!("API started successfully!");
    info!(
        "REST API Endpoint: http://{}:{}/api/v0",
        args.host, args.port
    );
    info!("Ready to accept requests...");

    let server_result = axum::serve(listener, app).await;

    // Clean up PID file on exit
    let _ = fs::remove_file(pid_file);

    server_result?;
    Ok(())
}
