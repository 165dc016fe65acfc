//! Per-program pipeline: classify, persist, resolve scope, expand, probe, record.

use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::discover::{expand_all, ExpansionSettings, Expander};
use crate::model::{DomainStatus, Program, ProgramListing};
use crate::normalize::normalize_all;
use crate::outcome::{ProgramOutcome, ProgramSummary, Stage};
use crate::probe::{BatchProber, ProbeReport};
use crate::registry::{Registry, RegistryError};
use crate::store::Store;

pub struct ProgramProcessor {
    registry: Arc<dyn Registry>,
    expander: Arc<dyn Expander>,
    store: Arc<dyn Store>,
    prober: BatchProber,
    expansion: ExpansionSettings,
}

impl ProgramProcessor {
    pub fn new(
        registry: Arc<dyn Registry>,
        expander: Arc<dyn Expander>,
        store: Arc<dyn Store>,
        prober: BatchProber,
        expansion: ExpansionSettings,
    ) -> Self {
        Self { registry, expander, store, prober, expansion }
    }

    /// Process one program, best effort. Only the program upsert and an unusable scope
    /// stop the pipeline; every later stage tolerates partial failure.
    pub async fn process(&self, listing: &ProgramListing, cancel: &CancellationToken) -> ProgramOutcome {
        let program = Program::from_listing(listing, Utc::now());
        let handle = program.handle.as_str();
        tracing::info!(program = handle, name = %program.name, kind = %program.program_type, "processing program");

        if let Err(e) = self.store.upsert_program(&program).await {
            return ProgramOutcome::Failed(e.context(format!("saving program {}", handle)));
        }

        let mut summary = ProgramSummary::default();

        let scope = match self.resolve_scope(&program).await {
            Stage::Ok(scope) => scope,
            Stage::Degraded { value, reason } => {
                tracing::info!(program = handle, reason = %reason, "using fallback scope");
                summary.degraded.push(reason);
                value
            }
            Stage::Fatal(e) => {
                let auth = e.downcast_ref::<RegistryError>().is_some_and(RegistryError::is_auth);
                return if auth {
                    ProgramOutcome::Aborted(e)
                } else {
                    ProgramOutcome::Failed(e)
                };
            }
        };

        let mut base = normalize_all(scope.iter().map(String::as_str));
        if base.is_empty() {
            // Registry assets that normalize to nothing still leave the primary domain.
            if let Some(primary) = program.primary_domain.as_deref() {
                base = normalize_all([primary]);
                if !base.is_empty() {
                    let reason = "scope has no usable domains; using primary domain";
                    tracing::info!(program = handle, reason, "using fallback scope");
                    summary.degraded.push(reason.to_string());
                }
            }
        }
        if base.is_empty() {
            return ProgramOutcome::Skipped {
                reason: format!("{} has no usable scope and no primary domain", handle),
            };
        }
        summary.scope_domains = base.len();

        let expanded = expand_all(self.expander.clone(), &base, self.expansion, cancel).await;
        if expanded.is_empty() {
            tracing::debug!(program = handle, base = base.len(), "no subdomains discovered; using base domains");
        }
        summary.expanded_domains = expanded.len();

        let targets = normalize_all(base.iter().map(String::as_str).chain(expanded.iter().map(String::as_str)));
        tracing::info!(program = handle, domains = targets.len(), "probing domains");

        let report = self.prober.probe_batch(&targets, cancel).await;
        summary.probed = report.len();
        summary.up = report.count(DomainStatus::Up);
        summary.down = report.count(DomainStatus::Down);
        summary.unknown = report.count(DomainStatus::Unknown);

        self.record(handle, &report, &mut summary).await;

        tracing::info!(
            program = handle,
            up = summary.up,
            down = summary.down,
            unknown = summary.unknown,
            transitions = summary.transitions,
            "program complete"
        );
        ProgramOutcome::Completed(summary)
    }

    /// Registry scope, else the primary domain, else nothing.
    async fn resolve_scope(&self, program: &Program) -> Stage<Vec<String>> {
        let fallback = program.primary_domain.clone();
        match self.registry.get_scope(&program.handle).await {
            Ok(scope) if !scope.is_empty() => {
                tracing::debug!(program = %program.handle, assets = scope.len(), "scope fetched");
                Stage::Ok(scope)
            }
            Ok(_) => match fallback {
                Some(domain) => Stage::degraded(vec![domain], "no structured scope; using primary domain"),
                None => Stage::Ok(Vec::new()),
            },
            Err(e) if e.is_auth() => Stage::Fatal(anyhow::Error::new(e)),
            Err(e) => {
                tracing::warn!(program = %program.handle, error = %e, "scope fetch failed");
                match fallback {
                    Some(domain) => {
                        Stage::degraded(vec![domain], format!("scope fetch failed ({}); using primary domain", e))
                    }
                    None => {
                        let context = format!("fetching scope for {}", program.handle);
                        Stage::Fatal(anyhow::Error::new(e).context(context))
                    }
                }
            }
        }
    }

    /// Persist every probed result. UNKNOWN means "not observed" and is never recorded.
    async fn record(&self, handle: &str, report: &ProbeReport, summary: &mut ProgramSummary) {
        for (domain, status) in &report.results {
            if *status == DomainStatus::Unknown {
                continue;
            }
            match self.store.record_observation(domain, handle, *status, Utc::now()).await {
                Ok(observation) => {
                    summary.recorded += 1;
                    if let Some(change) = observation.transition {
                        summary.transitions += 1;
                        if change.is_recovery() {
                            summary.recoveries += 1;
                            tracing::warn!(domain = %domain, program = handle, "domain came back up (down -> up)");
                        } else {
                            tracing::info!(
                                domain = %domain,
                                program = handle,
                                from = %change.old_status,
                                to = %change.new_status,
                                "status changed"
                            );
                        }
                    }
                }
                Err(e) => {
                    summary.record_failures += 1;
                    tracing::error!(domain = %domain, program = handle, error = %e, "failed to record observation");
                }
            }
        }
    }
}
