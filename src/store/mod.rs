//! Change-tracking store.
//!
//! The store is the only writer of programs, domains and status changes. Every
//! backend guarantees that `record_observation` is atomic per `(domain, program)`:
//! concurrent observations of one key never lose or double-record a transition.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::model::{Domain, DomainInfo, DomainStatus, Observation, Program, ProgramType, Stats, StatusChange};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Path value selecting the non-persistent backend.
pub const IN_MEMORY: &str = ":memory:";

#[async_trait]
pub trait Store: Send + Sync {
    /// Insert or update a program by handle.
    async fn upsert_program(&self, program: &Program) -> Result<()>;

    /// Record one probe result.
    ///
    /// Unseen keys are created with `is_new = true` and no transition. A known key
    /// always gets `last_checked = now` and `is_new = false`; when the status differs a
    /// `StatusChange` with `notified = false` is appended in the same atomic step.
    async fn record_observation(
        &self,
        domain: &str,
        program: &str,
        status: DomainStatus,
        now: DateTime<Utc>,
    ) -> Result<Observation>;

    /// Most recently scanned first.
    async fn list_programs(&self, limit: usize) -> Result<Vec<Program>>;
    async fn list_programs_by_type(&self, program_type: ProgramType, limit: usize) -> Result<Vec<Program>>;
    async fn list_bounty_programs(&self, limit: usize) -> Result<Vec<Program>>;

    /// Domains still flagged new, most recently discovered first.
    async fn list_new_domains(&self, limit: usize) -> Result<Vec<Domain>>;
    async fn list_domains_by_program(&self, program: &str, limit: usize) -> Result<Vec<Domain>>;

    /// Most recent first.
    async fn list_status_changes(&self, only_unnotified: bool, limit: usize) -> Result<Vec<StatusChange>>;

    /// Flag a status change as delivered. Idempotent; `false` only for unknown ids.
    async fn mark_notified(&self, id: i64) -> Result<bool>;

    async fn stats(&self) -> Result<Stats>;

    async fn save_domain_info(&self, info: &DomainInfo) -> Result<()>;
    async fn get_domain_info(&self, domain: &str, program: &str) -> Result<Option<DomainInfo>>;
}

/// Open the configured backend: `:memory:` selects [`MemoryStore`], anything else is a
/// SQLite database path.
pub async fn open(path: &str) -> Result<Arc<dyn Store>> {
    if path == IN_MEMORY {
        tracing::info!("using in-memory store; nothing will be persisted");
        return Ok(Arc::new(MemoryStore::new()));
    }
    let store = SqliteStore::open(std::path::Path::new(path)).await?;
    Ok(Arc::new(store))
}
