//! Scan cycles: list programs, fan processors out under a cap, stop at the deadline.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::concurrent::{deadline_token, with_grace, BoundedExecutor};
use crate::outcome::ProgramOutcome;
use crate::processor::ProgramProcessor;
use crate::registry::{Registry, RegistryError};

#[derive(Debug, Error)]
pub enum ScanError {
    /// The program list could not be fetched; nothing was scanned.
    #[error("failed to list programs: {0}")]
    Listing(#[from] RegistryError),

    /// A program hit a failure that invalidates the whole cycle.
    #[error("scan aborted: {0:#}")]
    Aborted(anyhow::Error),
}

/// Time a program may spend persisting results it collected before the deadline.
pub const RECORD_BUDGET: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
pub struct ScanSettings {
    pub program_concurrency: usize,
    pub deadline: Duration,
    /// Grace given to in-flight expansions and probes after cancellation.
    pub grace: Duration,
}

impl ScanSettings {
    /// How long a running program may continue after the scan is cancelled.
    ///
    /// Expansion and probing each wind down within `grace`; the remainder lets the
    /// program record what it already collected.
    pub fn program_grace(&self) -> Duration {
        self.grace * 2 + RECORD_BUDGET
    }
}

/// Totals for one scan cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScanReport {
    pub programs_listed: usize,
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Still running at the deadline, or never started.
    pub abandoned: usize,
    pub domains_observed: usize,
    pub record_failures: usize,
    pub transitions: usize,
    pub recoveries: usize,
    pub timed_out: bool,
    pub cancelled: bool,
    pub elapsed_secs: f64,
}

impl ScanReport {
    fn absorb(&mut self, handle: &str, outcome: ProgramOutcome) -> Option<anyhow::Error> {
        match outcome {
            ProgramOutcome::Completed(summary) => {
                self.completed += 1;
                self.domains_observed += summary.recorded;
                self.record_failures += summary.record_failures;
                self.transitions += summary.transitions;
                self.recoveries += summary.recoveries;
                None
            }
            ProgramOutcome::Skipped { reason } => {
                tracing::info!(program = handle, reason = %reason, "program skipped");
                self.skipped += 1;
                None
            }
            ProgramOutcome::Failed(e) => {
                tracing::error!(program = handle, error = %format!("{:#}", e), "program failed");
                self.failed += 1;
                None
            }
            ProgramOutcome::Aborted(e) => {
                self.failed += 1;
                Some(e)
            }
        }
    }

    pub fn log(&self) {
        tracing::info!(
            listed = self.programs_listed,
            completed = self.completed,
            skipped = self.skipped,
            failed = self.failed,
            abandoned = self.abandoned,
            observed = self.domains_observed,
            record_failures = self.record_failures,
            transitions = self.transitions,
            recoveries = self.recoveries,
            timed_out = self.timed_out,
            elapsed_secs = self.elapsed_secs,
            "scan finished"
        );
    }
}

pub struct Orchestrator {
    registry: Arc<dyn Registry>,
    processor: Arc<ProgramProcessor>,
    settings: ScanSettings,
}

impl Orchestrator {
    pub fn new(registry: Arc<dyn Registry>, processor: Arc<ProgramProcessor>, settings: ScanSettings) -> Self {
        Self { registry, processor, settings }
    }

    pub async fn run_scan(&self) -> Result<ScanReport, ScanError> {
        self.run_scan_until(&CancellationToken::new()).await
    }

    /// One scan cycle. Fails only when the program list cannot be fetched or a program
    /// aborts the cycle; every other failure is counted in the report.
    pub async fn run_scan_until(&self, shutdown: &CancellationToken) -> Result<ScanReport, ScanError> {
        let started = Instant::now();
        let programs = self.registry.list_programs().await?;
        tracing::info!(programs = programs.len(), "starting scan");

        let scan = deadline_token(shutdown, self.settings.deadline);
        let _timer = scan.clone().drop_guard();
        let report = Arc::new(Mutex::new(ScanReport { programs_listed: programs.len(), ..ScanReport::default() }));
        let abort: Arc<Mutex<Option<anyhow::Error>>> = Arc::new(Mutex::new(None));
        let executor = BoundedExecutor::new(self.settings.program_concurrency);

        let processor = self.processor.clone();
        let task_report = report.clone();
        let task_abort = abort.clone();
        let task_scan = scan.clone();
        let grace = self.settings.program_grace();
        executor
            .execute(programs, &scan, move |listing| {
                let processor = processor.clone();
                let report = task_report.clone();
                let abort = task_abort.clone();
                let scan = task_scan.clone();
                async move {
                    match with_grace(processor.process(&listing, &scan), &scan, grace).await {
                        Some(outcome) => {
                            let fatal = report.lock().absorb(&listing.handle, outcome);
                            if let Some(e) = fatal {
                                tracing::error!(
                                    program = %listing.handle,
                                    error = %format!("{:#}", e),
                                    "aborting scan"
                                );
                                abort.lock().get_or_insert(e);
                                scan.cancel();
                            }
                        }
                        None => {
                            tracing::warn!(program = %listing.handle, "program abandoned at scan deadline");
                            report.lock().abandoned += 1;
                        }
                    }
                }
            })
            .await;

        let stats = executor.stats();
        let aborted = abort.lock().take();
        let mut out = report.lock().clone();
        out.abandoned += stats.skipped;
        out.failed += stats.errors;
        out.cancelled = shutdown.is_cancelled();
        out.timed_out = scan.is_cancelled() && !out.cancelled && aborted.is_none();
        out.elapsed_secs = started.elapsed().as_secs_f64();

        if let Some(e) = aborted {
            return Err(ScanError::Aborted(e));
        }
        if out.timed_out {
            tracing::warn!(deadline_secs = self.settings.deadline.as_secs(), "scan deadline reached");
        }
        out.log();
        Ok(out)
    }

    /// Run a scan every `interval` until `shutdown` fires. A failed cycle is logged and
    /// the next one runs on schedule.
    pub async fn run_periodic(&self, interval: Duration, run_immediately: bool, shutdown: &CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        if !run_immediately {
            // The first tick completes immediately.
            ticker.tick().await;
        }

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if let Err(e) = self.run_scan_until(shutdown).await {
                tracing::error!(error = %e, "scan cycle failed; previous data remains available");
            }
        }
        tracing::info!("scan scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn programs_outlast_the_reachability_grace() {
        let settings = ScanSettings {
            program_concurrency: 5,
            deadline: Duration::from_secs(60),
            grace: Duration::from_secs(10),
        };
        // Expansion and probing may each use a full grace period before recording starts.
        assert!(settings.program_grace() > settings.grace * 2);
    }
}
