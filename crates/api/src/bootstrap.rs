//! Process setup shared by the server and the terminal chat.

use std::path::Path;
use std::sync::Arc;

use mnemo_coordinator::{Coordinator, MnemoConfig};
use mnemo_llm::build_llm_client;
use mnemo_memory::{
    FallbackSessionStore, MemoryStore, SessionRepository, SqliteStore, UnavailableStore,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub const DEFAULT_LOG_FILTER: &str =
    "info,mnemo_api=debug,mnemo_coordinator=debug,tower_http=debug";

/// Install the global subscriber. `RUST_LOG` overrides `default_filter`.
pub fn init_tracing(default_filter: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// File (if given) then environment overrides.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<MnemoConfig> {
    let config = match path {
        Some(path) => {
            info!(path = %path.display(), "Loading configuration");
            MnemoConfig::from_file(path)?
        }
        None => {
            info!("Using default configuration");
            MnemoConfig::from_env()
        }
    };
    Ok(config)
}

/// Connect both store tiers and the completion client.
///
/// Neither store is allowed to stop startup: an unreachable cache runs
/// in-process and an unopenable database runs degraded.
pub async fn build_coordinator(config: MnemoConfig) -> anyhow::Result<Coordinator> {
    let timeout = config.store.connect_timeout();

    let sessions = Arc::new(
        FallbackSessionStore::connect(config.store.redis_url.as_deref(), timeout).await,
    );

    let (store, repo): (Arc<dyn MemoryStore>, Arc<dyn SessionRepository>) =
        match SqliteStore::connect(&config.store.database_url, config.store.max_connections, timeout)
            .await
        {
            Ok(sqlite) => {
                let sqlite = Arc::new(sqlite);
                (sqlite.clone(), sqlite)
            }
            Err(e) => {
                warn!(
                    error = %e,
                    database_url = %config.store.database_url,
                    "Durable store unavailable, sessions and memories will not persist"
                );
                (Arc::new(UnavailableStore), Arc::new(UnavailableStore))
            }
        };

    let llm = build_llm_client(&config.llm)?;
    if !config.llm.is_configured() {
        warn!(
            provider = %config.llm.provider,
            "No completion API key configured (set GROQ_API_KEY or OPENAI_API_KEY); replies will use the fallback text"
        );
    }

    Ok(Coordinator::new(config, sessions, store, repo, llm))
}
