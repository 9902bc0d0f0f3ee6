//! Costlens application binary - composition root.
//!
//! 1. Load configuration from TOML plus environment secrets
//! 2. Open the SQLite database and optionally seed sample data
//! 3. Build the read-only pool, LLM client and SQL agent
//! 4. Start the axum REST API server

mod cli;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use costlens_agent::{
    client_from_config, AgentSettings, ConversationStore, InMemoryConversationStore, LlmClient,
    QueryExecutor, SqlAgent,
};
use costlens_api::{start_server, AppState};
use costlens_core::{AppSchema, CostlensConfig};
use costlens_storage::{seed_sample_data, Database, ReadPool};

use cli::{expand_home, CliArgs};

/// Periodically forget conversations nobody has touched for `max_idle`.
async fn idle_sweeper(store: Arc<dyn ConversationStore>, max_idle: Duration) {
    tracing::info!(max_idle_secs = max_idle.as_secs(), "Idle conversation sweeper started");

    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        match store.evict_idle(max_idle) {
            Ok(0) => {}
            Ok(evicted) => tracing::debug!(evicted, "Idle conversations evicted"),
            Err(e) => tracing::warn!(error = %e, "Idle sweep failed"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config before tracing so `general.log_level` can feed the filter.
    let config_file = args.resolve_config_path();
    let (mut config, load_error) = match CostlensConfig::load(&config_file) {
        Ok(config) => (config, None),
        Err(e) => (CostlensConfig::default(), Some(e)),
    };
    config.apply_env_overrides();
    if let Some(dir) = args.resolve_data_dir() {
        config.general.data_dir = dir;
    }
    if let Some(level) = args.resolve_log_level() {
        config.general.log_level = level;
    }
    config.server.port = args.resolve_port(config.server.port);

    // Tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.general.log_level)),
        )
        .init();

    tracing::info!("Starting Costlens v{}", env!("CARGO_PKG_VERSION"));
    match load_error {
        None => tracing::info!(path = %config_file.display(), "Configuration loaded"),
        Some(e) => tracing::warn!(
            path = %config_file.display(),
            error = %e,
            "Failed to load config, using defaults"
        ),
    }

    // Storage.
    let home = std::env::var("HOME").ok();
    let data_dir = expand_home(&config.general.data_dir, home.as_deref());
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::error!(path = %data_dir.display(), error = %e, "Failed to create data directory");
        return Err(e.into());
    }

    let db_path = data_dir.join(&config.database.file_name);
    let db = Database::open(&db_path)?;
    tracing::info!(path = %db_path.display(), "SQLite database opened");

    if args.seed {
        match seed_sample_data(&db)? {
            Some(summary) => tracing::info!(?summary, "Sample data loaded"),
            None => tracing::info!("Database already has data, skipping seed"),
        }
    }

    let pool = ReadPool::for_database(&db, config.database.read_pool_size)?;
    tracing::info!(size = pool.size(), "Read-only query pool ready");

    // Agent.
    let llm = client_from_config(&config.llm);
    if !llm.is_configured() {
        tracing::warn!("No LLM endpoint configured; chat answers will report the assistant as unavailable");
    }

    let settings = AgentSettings::from_config(&config);
    let store: Arc<dyn ConversationStore> =
        Arc::new(InMemoryConversationStore::new(settings.history_turns));
    let executor = QueryExecutor::new(pool, settings.statement_timeout, settings.max_rows);
    let agent = SqlAgent::new(
        settings,
        AppSchema::cost_dashboard(),
        Arc::clone(&store),
        llm,
        executor,
    );

    if config.agent.idle_conversation_minutes > 0 {
        let max_idle = Duration::from_secs(config.agent.idle_conversation_minutes * 60);
        tokio::spawn(idle_sweeper(Arc::clone(&store), max_idle));
    }

    // === API server ===

    let state = AppState::new(Arc::new(agent), Arc::new(db), config.server.clone());
    if let Err(e) = start_server(state).await {
        tracing::error!(error = %e, "API server stopped");
        return Err(e.into());
    }

    Ok(())
}
