//! Subdomain expansion over an external, unreliable tool.
//!
//! `expand_all` never fails. A domain whose invocation errors or times out
//! contributes nothing, and a missing tool yields an empty set, which callers
//! read as "scan the base domains only".

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::concurrent::{deadline_token, with_grace, BoundedExecutor};
use crate::external::tools;

/// Expands one base domain into candidate subdomains.
#[async_trait]
pub trait Expander: Send + Sync {
    /// Whether the backing tool can be invoked at all.
    fn is_available(&self) -> bool;

    async fn expand(&self, domain: &str, timeout: Duration) -> anyhow::Result<Vec<String>>;
}

/// `subfinder`-backed expander.
#[derive(Debug, Default, Clone)]
pub struct SubfinderExpander;

impl SubfinderExpander {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Expander for SubfinderExpander {
    fn is_available(&self) -> bool {
        tools::tool_available(tools::SUBFINDER)
    }

    async fn expand(&self, domain: &str, timeout: Duration) -> anyhow::Result<Vec<String>> {
        let Some(out) = tools::try_run_subfinder(domain, timeout).await? else {
            anyhow::bail!("{} not found in PATH", tools::SUBFINDER);
        };
        let lines = out.lines();
        // A failed exit can still carry usable results.
        if !out.success && lines.is_empty() {
            anyhow::bail!("{} exited with an error for {}", tools::SUBFINDER, domain);
        }
        Ok(lines)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ExpansionSettings {
    pub concurrency: usize,
    pub per_domain_timeout: Duration,
    pub batch_timeout: Duration,
    pub grace: Duration,
}

/// Expand every base domain, bounded by `settings`. Returns the union of whatever
/// succeeded before the batch deadline.
pub async fn expand_all(
    expander: Arc<dyn Expander>,
    base_domains: &[String],
    settings: ExpansionSettings,
    cancel: &CancellationToken,
) -> BTreeSet<String> {
    if base_domains.is_empty() {
        return BTreeSet::new();
    }
    if !expander.is_available() {
        tracing::warn!("subdomain expansion tool unavailable; discovery limited to base domains");
        return BTreeSet::new();
    }

    let batch = deadline_token(cancel, settings.batch_timeout);
    let _timer = batch.clone().drop_guard();
    let found: Arc<Mutex<BTreeSet<String>>> = Arc::new(Mutex::new(BTreeSet::new()));
    let executor = BoundedExecutor::new(settings.concurrency);

    let task_found = found.clone();
    let task_batch = batch.clone();
    executor
        .execute(base_domains.to_vec(), &batch, move |domain: String| {
            let expander = expander.clone();
            let found = task_found.clone();
            let batch = task_batch.clone();
            async move {
                let run = expander.expand(&domain, settings.per_domain_timeout);
                match with_grace(run, &batch, settings.grace).await {
                    Some(Ok(names)) => {
                        tracing::debug!(domain = %domain, count = names.len(), "expansion finished");
                        found.lock().extend(names.into_iter().filter(|n| !n.is_empty()));
                    }
                    Some(Err(e)) => {
                        tracing::debug!(domain = %domain, error = %e, "expansion failed, skipping");
                    }
                    None => {
                        tracing::debug!(domain = %domain, "expansion abandoned at batch deadline");
                    }
                }
            }
        })
        .await;

    let stats = executor.stats();
    if stats.skipped > 0 {
        tracing::info!(skipped = stats.skipped, "expansion batch deadline reached; remaining domains skipped");
    }

    let out = found.lock().clone();
    out
}
