//! Optional per-domain metadata from an external HTTP fingerprinting tool.

pub mod httpx;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::concurrent::BoundedExecutor;
use crate::model::{DomainInfo, DomainStatus};
use crate::store::Store;

pub use httpx::{parse_httpx_output, HttpxEnricher, HttpxRecord};

#[async_trait]
pub trait Enricher: Send + Sync {
    fn is_available(&self) -> bool;

    /// Metadata for one domain. Never fails: an unreachable domain comes back DOWN and
    /// unreadable tool output comes back UNKNOWN.
    async fn enrich(&self, domain: &str, program: &str) -> DomainInfo;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnrichReport {
    pub requested: usize,
    pub saved: usize,
    pub up: usize,
    pub failed_saves: usize,
    /// The tool was missing; nothing ran.
    pub unavailable: bool,
}

/// Enrich `domains` of `program` on a bounded pool and persist each result.
pub async fn enrich_many(
    enricher: Arc<dyn Enricher>,
    store: Arc<dyn Store>,
    program: &str,
    domains: Vec<String>,
    concurrency: usize,
    cancel: &CancellationToken,
) -> EnrichReport {
    let mut report = EnrichReport { requested: domains.len(), ..EnrichReport::default() };
    if domains.is_empty() {
        return report;
    }
    if !enricher.is_available() {
        tracing::warn!("enrichment tool unavailable; skipping domain metadata");
        report.unavailable = true;
        return report;
    }

    let tally = Arc::new(Mutex::new(report));
    let task_tally = tally.clone();
    let program = program.to_string();
    BoundedExecutor::new(concurrency)
        .execute(domains, cancel, move |domain: String| {
            let enricher = enricher.clone();
            let store = store.clone();
            let tally = task_tally.clone();
            let program = program.clone();
            async move {
                let info = enricher.enrich(&domain, &program).await;
                let up = info.status == DomainStatus::Up;
                match store.save_domain_info(&info).await {
                    Ok(()) => {
                        let mut t = tally.lock();
                        t.saved += 1;
                        if up {
                            t.up += 1;
                        }
                    }
                    Err(e) => {
                        tracing::error!(domain = %domain, error = %e, "failed to save domain info");
                        tally.lock().failed_saves += 1;
                    }
                }
            }
        })
        .await;

    let out = tally.lock().clone();
    out
}
