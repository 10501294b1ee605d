//! mnemo API server binary.
//!
//! Usage:
//!   mnemo-api --config mnemo.toml
//!   mnemo-api --port 8080 --bind 0.0.0.0
//!
//! # Environment Variables
//!
//! - `MNEMO_DATABASE_URL`, `MNEMO_REDIS_URL` - store locations
//! - `MNEMO_SESSION_TIMEOUT` - session lifetime in seconds
//! - `MNEMO_LLM_MODEL`, `MNEMO_LLM_API_URL` - completion service
//! - `GROQ_API_KEY` / `OPENAI_API_KEY` - completion service credentials
//! - `MNEMO_BIND_ADDR` - server bind address

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use mnemo_api::bootstrap::{build_coordinator, init_tracing, load_config, DEFAULT_LOG_FILTER};
use mnemo_api::{serve, AppState};

#[derive(Debug, Parser)]
#[command(name = "mnemo-api", version, about = "mnemo agent HTTP server")]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, default_value_t = 8000)]
    port: u16,

    /// Bind address
    #[arg(short, long, env = "MNEMO_BIND_ADDR", default_value = "127.0.0.1")]
    bind: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing(DEFAULT_LOG_FILTER);
    let args = Args::parse();

    if args.bind == "0.0.0.0" {
        tracing::warn!(
            "Server binding to 0.0.0.0; the API has no authentication and is now reachable \
             from every network interface"
        );
    }

    let config = load_config(args.config.as_deref())?;
    let coordinator = build_coordinator(config).await?;

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port).parse()?;
    serve(Arc::new(AppState::new(coordinator)), addr).await?;

    Ok(())
}
