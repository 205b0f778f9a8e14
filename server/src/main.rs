use anyhow::Result;
use axum::Router;
use clap::Parser;
use search_core::config::DEFAULT_LEARNING_RATE;
use search_core::{FeedbackConfig, SearchConfig};
use std::net::SocketAddr;
use tracing_subscriber::{fmt, EnvFilter};
use server::build_app;
use tokio::net::TcpListener;

#[derive(Parser)]
struct Args {
    /// Index database directory
    #[arg(long, default_value = "./searchindex")]
    index: String,
    /// Feedback network database directory
    #[arg(long, default_value = "./feedbacknet")]
    network: String,
    /// Optional JSON search config (result limit, fallback url, weights)
    #[arg(long)]
    config: Option<String>,
    /// Step size of click training
    #[arg(long, default_value_t = DEFAULT_LEARNING_RATE)]
    learning_rate: f64,
    /// Host to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    /// Port to bind
    #[arg(long, default_value_t = 8080)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => SearchConfig::from_json_file(path)?,
        None => SearchConfig::default(),
    };
    let feedback = FeedbackConfig { learning_rate: args.learning_rate };
    let app: Router = build_app(&args.index, &args.network, config, feedback)?;

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
