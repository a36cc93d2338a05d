//! Subcommand implementations.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use scout_agent::{
    anthropic::AnthropicProvider,
    openai::OpenAiProvider,
    prompt::PromptLoader,
    router::{ProviderRouter, ProviderSlot},
    LlmProvider, NullProvider, SearchExecutor, SEARCH_AGENT_KIND,
};
use scout_core::ScoutConfig;
use scout_scheduler::{
    seed::seed_configurations, shutdown_on_signal, EngineConfig, ExecutionState,
    ExecutorRegistry, ManagerConfig, SchedulerError, SchedulerManager, SchedulingEngine,
    SqliteJobStore,
};
use tracing::{info, warn};

/// Run the scheduler until Ctrl+C / SIGTERM, or until the store keeps failing.
pub async fn run(config: ScoutConfig) -> Result<()> {
    let store = Arc::new(open_store(&config)?);
    seed_configurations(&store, &config.seeds).context("failed to seed job configurations")?;

    let registry = build_registry(&config);
    info!(kinds = ?registry.kinds(), "executors registered");

    let engine = SchedulingEngine::new(
        store,
        Arc::new(registry),
        EngineConfig::from(&config.scheduler),
    );
    let manager = SchedulerManager::new(engine, ManagerConfig::from(&config.scheduler));
    let signals = shutdown_on_signal(manager.shutdown_handle());

    let result = manager.start().await;
    signals.abort();
    result.context("scheduler stopped")?;
    Ok(())
}

pub fn enqueue(config: &ScoutConfig, config_id: &str) -> Result<()> {
    let store = open_store(config)?;
    let execution = store.create_execution(config_id)?;
    println!("{}", execution.id);
    Ok(())
}

pub fn show(config: &ScoutConfig, execution_id: &str) -> Result<()> {
    let store = open_store(config)?;
    let execution = store
        .get_execution(execution_id)?
        .ok_or_else(|| SchedulerError::ExecutionNotFound {
            id: execution_id.to_string(),
        })?;
    println!("{}", serde_json::to_string_pretty(&execution)?);
    Ok(())
}

pub fn recent(
    config: &ScoutConfig,
    config_id: &str,
    state: Option<ExecutionState>,
    limit: u32,
) -> Result<()> {
    let store = open_store(config)?;
    let executions = store.recent_executions(config_id, state, limit)?;
    if executions.is_empty() {
        println!("no executions");
        return Ok(());
    }
    for e in executions {
        println!(
            "{}  {:<9}  attempts={}  updated={}",
            e.id,
            e.state,
            e.attempt_count,
            e.updated_at.to_rfc3339()
        );
    }
    Ok(())
}

pub fn configs(config: &ScoutConfig) -> Result<()> {
    let store = open_store(config)?;
    let configs = store.list_configurations()?;
    if configs.is_empty() {
        println!("no job configurations");
        return Ok(());
    }
    for c in configs {
        println!("{}  {}  {}", c.id, c.kind, c.payload);
    }
    Ok(())
}

fn open_store(config: &ScoutConfig) -> Result<SqliteJobStore> {
    let path = &config.database.path;
    ensure_parent_dir(path)?;
    info!(path = %path, "opening SQLite database");
    SqliteJobStore::open(path, config.database.busy_timeout())
        .with_context(|| format!("failed to open job store at {path}"))
}

/// Ensure the parent directory for a file path exists.
fn ensure_parent_dir(path: &str) -> Result<()> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    Ok(())
}

fn build_registry(config: &ScoutConfig) -> ExecutorRegistry {
    let search = SearchExecutor::new(
        build_provider(config),
        PromptLoader::new(config.agent.prompts_dir.as_deref()),
        config.agent.model.clone(),
        config.agent.max_tokens,
    )
    .with_temperature(config.agent.temperature);
    ExecutorRegistry::new().with(SEARCH_AGENT_KIND, Arc::new(search))
}

/// Build the LLM provider chain from config.
///
/// Priority order:
///   1. providers.openai
///   2. providers.anthropic
///   3. Env vars (OPENAI_API_KEY, ANTHROPIC_API_KEY), only when 1-2 are unset
fn build_provider(config: &ScoutConfig) -> Arc<dyn LlmProvider> {
    let mut slots: Vec<ProviderSlot> = Vec::new();

    if let Some(ref openai) = config.providers.openai {
        info!(
            "LLM provider slot[{}]: OpenAI ({})",
            slots.len(),
            openai.base_url
        );
        slots.push(ProviderSlot::new(
            Box::new(OpenAiProvider::new(
                openai.api_key.clone(),
                Some(openai.base_url.clone()),
            )),
            1,
        ));
    }

    if let Some(ref anthropic) = config.providers.anthropic {
        info!(
            "LLM provider slot[{}]: Anthropic ({})",
            slots.len(),
            anthropic.base_url
        );
        slots.push(ProviderSlot::new(
            Box::new(AnthropicProvider::new(
                anthropic.api_key.clone(),
                Some(anthropic.base_url.clone()),
            )),
            1,
        ));
    }

    if slots.is_empty() {
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            info!("LLM provider: OpenAI (from env)");
            let provider = OpenAiProvider::new(key, None);
            slots.push(ProviderSlot::new(Box::new(provider), 1));
        } else if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
            info!("LLM provider: Anthropic (from env)");
            let provider = AnthropicProvider::new(key, None);
            slots.push(ProviderSlot::new(Box::new(provider), 1));
        }
    }

    match slots.len() {
        0 => {
            warn!("No LLM provider configured; search_agent executions will keep retrying");
            Arc::new(NullProvider)
        }
        1 => Arc::from(slots.remove(0).provider),
        _ => {
            info!(
                "ProviderRouter: {} slots configured (automatic failover)",
                slots.len()
            );
            Arc::new(ProviderRouter::new(slots))
        }
    }
}
