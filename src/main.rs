// src/main.rs
// prism - multi-provider chat gateway

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use axum::http::HeaderValue;
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use prism::config::{Overlay, Settings};
use prism::{api, db, AppState};

#[derive(Parser, Debug)]
#[command(name = "prism", about = "Multi-provider chat gateway")]
struct Args {
    /// Path to the YAML overlay (model catalog, pricing, RAG parameters).
    #[arg(long, env = "PRISM_CONFIG", default_value = "config/settings.yaml")]
    config: PathBuf,

    /// Override the listening port from the environment/default.
    #[arg(long)]
    port: Option<u16>,
}

fn build_cors(settings: &Settings) -> CorsLayer {
    let mut origins: Vec<HeaderValue> = vec![
        HeaderValue::from_static("http://localhost:8501"),
        HeaderValue::from_static("http://127.0.0.1:8501"),
    ];
    for origin in &settings.allowed_origins {
        match HeaderValue::from_str(origin) {
            Ok(value) => origins.push(value),
            Err(_) => warn!("Ignoring invalid CORS origin: {origin}"),
        }
    }
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut settings = Settings::from_env();
    if let Some(port) = args.port {
        settings.port = port;
    }

    let level = Level::from_str(&settings.log_level).unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting prism gateway...");

    let overlay = Overlay::load(&args.config)?;
    info!(
        models = overlay.models.available.len(),
        "Loaded model catalog"
    );

    let pool = db::init_pool(&settings.database_path).await?;

    let cors = build_cors(&settings);
    let bind_address = settings.bind_address();
    let state = Arc::new(AppState::new(settings, overlay, pool));
    let app = api::http::http_router(state).layer(cors);

    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!("prism listening on {bind_address}");
    axum::serve(listener, app).await?;

    Ok(())
}
