//! Concurrent scanning of independent lineages
//!
//! Each lineage is walked on its own blocking task; a semaphore caps how
//! many run at once. Pacing against the ledger is the reader's business
//! (wrap it in `ledger::Throttled`).

use super::entry::LineageTrace;
use super::walker::{LineageWalker, TraceHalted};
use crate::annotation::ProtocolTag;
use crate::config::ScanConfig;
use crate::error::{OrganismError, Result};
use crate::ledger::LedgerReader;
use crate::storage::TraceStore;
use crate::transition::TransitionId;
use log::{info, warn};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Outcome of tracing one lineage
#[derive(Debug)]
pub struct ScanReport {
    pub origin: TransitionId,
    pub outcome: std::result::Result<LineageTrace, TraceHalted>,
}

impl ScanReport {
    pub fn is_complete(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Trace every lineage in `origins`, caching traces under
/// `config.trace_dir`. Repeated origins are traced once; reports come back
/// in first-seen order.
pub async fn scan_lineages<L>(
    ledger: Arc<L>,
    mut origins: Vec<TransitionId>,
    config: &ScanConfig,
    tag: ProtocolTag,
) -> Result<Vec<ScanReport>>
where
    L: LedgerReader + Send + Sync + 'static,
{
    let mut seen = HashSet::new();
    origins.retain(|origin| seen.insert(*origin));

    let store = Arc::new(TraceStore::open(&config.trace_dir)?);
    let permits = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
    info!(
        "Scanning {} lineages, up to {} at a time",
        origins.len(),
        config.max_concurrent
    );

    let tasks = origins.into_iter().map(|origin| {
        let ledger = Arc::clone(&ledger);
        let store = Arc::clone(&store);
        let permits = Arc::clone(&permits);
        async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|e| OrganismError::Interrupted(e.to_string()))?;
            let outcome = tokio::task::spawn_blocking(move || {
                LineageWalker::new(&*ledger, tag)
                    .with_store(&store)
                    .trace(origin)
            })
            .await
            .map_err(|e| OrganismError::Interrupted(format!("lineage {}: {}", origin.short(), e)))?;
            Ok::<_, OrganismError>(ScanReport { origin, outcome })
        }
    });

    let reports = futures::future::join_all(tasks)
        .await
        .into_iter()
        .collect::<Result<Vec<_>>>()?;

    let halted = reports.iter().filter(|r| !r.is_complete()).count();
    if halted > 0 {
        warn!("{} of {} lineages halted", halted, reports.len());
    }
    info!("Scan finished: {} lineages", reports.len());
    Ok(reports)
}
