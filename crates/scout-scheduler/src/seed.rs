use scout_core::config::SeedConfiguration;
use tracing::info;

use crate::{error::Result, store::SqliteJobStore};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SeedReport {
    pub upserted: usize,
    /// Execution IDs created for seeds with `enqueue = true`.
    pub enqueued: Vec<String>,
}

/// Upsert the configured job configurations before the loop starts.
///
/// Safe to run on every start: configurations are fully replaced, and a seed
/// with `enqueue` only gets a new execution while it has none pending.
pub fn seed_configurations(
    store: &SqliteJobStore,
    seeds: &[SeedConfiguration],
) -> Result<SeedReport> {
    let mut report = SeedReport::default();
    for seed in seeds {
        store.upsert_configuration(&seed.id, &seed.kind, &seed.payload)?;
        report.upserted += 1;

        if seed.enqueue && !store.has_pending_execution(&seed.id)? {
            let execution = store.create_execution(&seed.id)?;
            report.enqueued.push(execution.id);
        }
    }
    if !seeds.is_empty() {
        info!(
            upserted = report.upserted,
            enqueued = report.enqueued.len(),
            "seed configurations applied"
        );
    }
    Ok(report)
}
