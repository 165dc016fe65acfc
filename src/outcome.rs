use serde::Serialize;

/// Result of one processing stage.
///
/// `Degraded` carries a usable value produced by a fallback path. `Fatal` means the
/// stage produced nothing the next stage can use.
#[derive(Debug)]
pub enum Stage<T> {
    Ok(T),
    Degraded { value: T, reason: String },
    Fatal(anyhow::Error),
}

impl<T> Stage<T> {
    pub fn degraded(value: T, reason: impl Into<String>) -> Self {
        Stage::Degraded { value, reason: reason.into() }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Stage::Degraded { .. })
    }

    /// Value for the next stage, if any.
    pub fn value(self) -> Option<T> {
        match self {
            Stage::Ok(v) | Stage::Degraded { value: v, .. } => Some(v),
            Stage::Fatal(_) => None,
        }
    }
}

/// Per-program summary counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProgramSummary {
    pub scope_domains: usize,
    pub expanded_domains: usize,
    pub probed: usize,
    pub up: usize,
    pub down: usize,
    pub unknown: usize,
    pub recorded: usize,
    pub record_failures: usize,
    pub transitions: usize,
    pub recoveries: usize,
    /// Stages that fell back to a degraded path.
    pub degraded: Vec<String>,
}

#[derive(Debug)]
pub enum ProgramOutcome {
    Completed(ProgramSummary),
    /// Nothing to scan (no scope and no primary domain). Not an error.
    Skipped { reason: String },
    /// This program failed; sibling programs are unaffected.
    Failed(anyhow::Error),
    /// The failure invalidates the whole scan cycle (e.g. rejected credentials).
    Aborted(anyhow::Error),
}

impl ProgramOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ProgramOutcome::Completed(_) => "completed",
            ProgramOutcome::Skipped { .. } => "skipped",
            ProgramOutcome::Failed(_) => "failed",
            ProgramOutcome::Aborted(_) => "aborted",
        }
    }
}
