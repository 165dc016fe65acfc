use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::cmp::Reverse;
use std::sync::atomic::{AtomicI64, Ordering};

use super::Store;
use crate::model::{
    Domain, DomainInfo, DomainStatus, Observation, ObservationKind, Program, ProgramType, Stats, StatusChange,
};

type Key = (String, String);

/// Process-local store keyed by `(domain, program)`.
///
/// The DashMap entry guard serializes observations of one key; the status change is
/// appended while that guard is held.
#[derive(Debug, Default)]
pub struct MemoryStore {
    programs: DashMap<String, Program>,
    domains: DashMap<Key, Domain>,
    changes: RwLock<Vec<StatusChange>>,
    next_change_id: AtomicI64,
    info: DashMap<Key, DomainInfo>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn programs_where<F>(&self, limit: usize, keep: F) -> Vec<Program>
    where
        F: Fn(&Program) -> bool,
    {
        let mut out: Vec<Program> = self
            .programs
            .iter()
            .filter(|p| keep(p.value()))
            .map(|p| p.value().clone())
            .collect();
        out.sort_by(|a, b| b.last_scanned.cmp(&a.last_scanned).then_with(|| a.handle.cmp(&b.handle)));
        out.truncate(limit);
        out
    }

    fn domains_where<F>(&self, limit: usize, keep: F) -> Vec<Domain>
    where
        F: Fn(&Domain) -> bool,
    {
        let mut out: Vec<Domain> = self
            .domains
            .iter()
            .filter(|d| keep(d.value()))
            .map(|d| d.value().clone())
            .collect();
        out.sort_by(|a, b| b.discovered_at.cmp(&a.discovered_at).then_with(|| a.name.cmp(&b.name)));
        out.truncate(limit);
        out
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_program(&self, program: &Program) -> Result<()> {
        self.programs.insert(program.handle.clone(), program.clone());
        Ok(())
    }

    async fn record_observation(
        &self,
        domain: &str,
        program: &str,
        status: DomainStatus,
        now: DateTime<Utc>,
    ) -> Result<Observation> {
        match self.domains.entry((domain.to_string(), program.to_string())) {
            Entry::Vacant(slot) => {
                slot.insert(Domain {
                    name: domain.to_string(),
                    program: program.to_string(),
                    status,
                    discovered_at: now,
                    last_checked: now,
                    is_new: true,
                });
                Ok(Observation { kind: ObservationKind::Created, transition: None })
            }
            Entry::Occupied(mut slot) => {
                let current = slot.get_mut();
                let old_status = current.status;
                current.last_checked = now;
                current.is_new = false;
                if old_status == status {
                    return Ok(Observation { kind: ObservationKind::Updated, transition: None });
                }
                current.status = status;

                let change = StatusChange {
                    id: self.next_change_id.fetch_add(1, Ordering::SeqCst) + 1,
                    domain: domain.to_string(),
                    program: program.to_string(),
                    old_status,
                    new_status: status,
                    changed_at: now,
                    notified: false,
                };
                self.changes.write().push(change.clone());
                Ok(Observation { kind: ObservationKind::Updated, transition: Some(change) })
            }
        }
    }

    async fn list_programs(&self, limit: usize) -> Result<Vec<Program>> {
        Ok(self.programs_where(limit, |_| true))
    }

    async fn list_programs_by_type(&self, program_type: ProgramType, limit: usize) -> Result<Vec<Program>> {
        Ok(self.programs_where(limit, |p| p.program_type == program_type))
    }

    async fn list_bounty_programs(&self, limit: usize) -> Result<Vec<Program>> {
        Ok(self.programs_where(limit, |p| p.offers_bounties))
    }

    async fn list_new_domains(&self, limit: usize) -> Result<Vec<Domain>> {
        Ok(self.domains_where(limit, |d| d.is_new))
    }

    async fn list_domains_by_program(&self, program: &str, limit: usize) -> Result<Vec<Domain>> {
        Ok(self.domains_where(limit, |d| d.program == program))
    }

    async fn list_status_changes(&self, only_unnotified: bool, limit: usize) -> Result<Vec<StatusChange>> {
        let mut out: Vec<StatusChange> = self
            .changes
            .read()
            .iter()
            .filter(|c| !only_unnotified || !c.notified)
            .cloned()
            .collect();
        out.sort_by_key(|c| (Reverse(c.changed_at), Reverse(c.id)));
        out.truncate(limit);
        Ok(out)
    }

    async fn mark_notified(&self, id: i64) -> Result<bool> {
        let mut changes = self.changes.write();
        match changes.iter_mut().find(|c| c.id == id) {
            Some(change) => {
                change.notified = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn stats(&self) -> Result<Stats> {
        let mut stats = Stats { total_programs: self.programs.len() as u64, ..Stats::default() };
        for d in self.domains.iter() {
            stats.total_domains += 1;
            if d.is_new {
                stats.new_domains += 1;
            }
            match d.status {
                DomainStatus::Up => stats.up_domains += 1,
                DomainStatus::Down => stats.down_domains += 1,
                DomainStatus::Unknown => stats.unknown_domains += 1,
            }
        }
        Ok(stats)
    }

    async fn save_domain_info(&self, info: &DomainInfo) -> Result<()> {
        self.info.insert((info.domain.clone(), info.program.clone()), info.clone());
        Ok(())
    }

    async fn get_domain_info(&self, domain: &str, program: &str) -> Result<Option<DomainInfo>> {
        Ok(self
            .info
            .get(&(domain.to_string(), program.to_string()))
            .map(|i| i.value().clone()))
    }
}
