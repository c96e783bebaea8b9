//! NYX gateway server binary.
//!
//! Loads an optional dotenv file, validates settings from the environment,
//! and serves the HTTP API.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use gateway_http_api::{GatewayState, build_router};
use gateway_runtime::evidence::LocalProofEngine;
use gateway_runtime::{Gateway, Paths, Settings};

#[derive(Parser, Debug)]
#[command(name = "nyx-gateway", about = "NYX testnet gateway")]
struct Args {
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    #[arg(long, default_value_t = 8091)]
    port: u16,

    /// Dotenv file loaded before settings validation.
    #[arg(long, default_value = "")]
    env_file: String,

    /// Data directory holding the database and run artifacts.
    #[arg(long, env = "NYX_GATEWAY_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,
}

fn setup_log() {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{EnvFilter, fmt};
    if tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .try_init()
        .is_err()
    {}
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    if !args.env_file.is_empty() {
        dotenv::from_path(&args.env_file)
            .map_err(|err| format!("env file {}: {err}", args.env_file))?;
    }
    setup_log();

    let settings = Settings::from_env()?;
    let paths = Paths::under(&args.data_dir);
    paths.ensure_dirs()?;
    tracing::info!(
        env = settings.env.as_str(),
        db = %paths.db_path.display(),
        runs = %paths.run_root.display(),
        "starting gateway"
    );

    let gateway = Gateway::new(Arc::new(LocalProofEngine), settings, paths);
    let state = Arc::new(GatewayState::new(gateway));
    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    tracing::info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await?;
    Ok(())
}
