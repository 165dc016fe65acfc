#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bounty_watch::discover::{ExpansionSettings, Expander};
use bounty_watch::model::{
    Domain, DomainInfo, DomainStatus, Observation, Program, ProgramListing, ProgramType, Stats, StatusChange,
};
use bounty_watch::orchestrator::{Orchestrator, ScanSettings};
use bounty_watch::probe::{BatchProber, Prober};
use bounty_watch::processor::ProgramProcessor;
use bounty_watch::registry::{Registry, RegistryError};
use bounty_watch::store::{MemoryStore, Store};
use chrono::{DateTime, Utc};

pub fn listing(handle: &str, primary_domain: Option<&str>, offers_bounties: bool) -> ProgramListing {
    ProgramListing {
        handle: handle.to_string(),
        name: handle.to_uppercase(),
        url: format!("https://hackerone.com/{}", handle),
        primary_domain: primary_domain.map(str::to_string),
        offers_bounties,
        classification: "open".to_string(),
    }
}

#[derive(Clone)]
pub enum ScopeReply {
    Assets(Vec<String>),
    Fail,
    Unauthorized,
}

#[derive(Default)]
pub struct FakeRegistry {
    pub programs: Vec<ProgramListing>,
    pub scopes: HashMap<String, ScopeReply>,
    pub list_fails: bool,
    pub scope_delay: Duration,
    live: AtomicUsize,
    pub peak: AtomicUsize,
}

impl FakeRegistry {
    pub fn new(programs: Vec<ProgramListing>) -> Self {
        Self { programs, ..Self::default() }
    }

    pub fn scope(mut self, handle: &str, assets: &[&str]) -> Self {
        self.scopes
            .insert(handle.to_string(), ScopeReply::Assets(assets.iter().map(|a| a.to_string()).collect()));
        self
    }

    pub fn reply(mut self, handle: &str, reply: ScopeReply) -> Self {
        self.scopes.insert(handle.to_string(), reply);
        self
    }
}

#[async_trait]
impl Registry for FakeRegistry {
    async fn list_programs(&self) -> Result<Vec<ProgramListing>, RegistryError> {
        if self.list_fails {
            return Err(RegistryError::Status { status: 503, body: "maintenance".into() });
        }
        Ok(self.programs.clone())
    }

    async fn get_scope(&self, handle: &str) -> Result<Vec<String>, RegistryError> {
        let now = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.scope_delay.is_zero() {
            tokio::time::sleep(self.scope_delay).await;
        }
        self.live.fetch_sub(1, Ordering::SeqCst);

        match self.scopes.get(handle).cloned() {
            Some(ScopeReply::Assets(assets)) => Ok(assets),
            Some(ScopeReply::Fail) => Err(RegistryError::Status { status: 500, body: "boom".into() }),
            Some(ScopeReply::Unauthorized) => Err(RegistryError::Unauthorized { status: 401, body: "bad token".into() }),
            None => Ok(Vec::new()),
        }
    }
}

#[derive(Default)]
pub struct FakeExpander {
    pub unavailable: bool,
    pub subdomains: HashMap<String, Vec<String>>,
}

impl FakeExpander {
    pub fn with(mut self, base: &str, names: &[&str]) -> Self {
        self.subdomains
            .insert(base.to_string(), names.iter().map(|n| n.to_string()).collect());
        self
    }

    pub fn missing() -> Self {
        Self { unavailable: true, ..Self::default() }
    }
}

#[async_trait]
impl Expander for FakeExpander {
    fn is_available(&self) -> bool {
        !self.unavailable
    }

    async fn expand(&self, domain: &str, _timeout: Duration) -> anyhow::Result<Vec<String>> {
        Ok(self.subdomains.get(domain).cloned().unwrap_or_default())
    }
}

/// Prober answering from a mutable table; unknown hosts are UP.
#[derive(Default)]
pub struct FakeProber {
    statuses: Mutex<HashMap<String, DomainStatus>>,
    delays: Mutex<HashMap<String, Duration>>,
    pub delay: Duration,
}

impl FakeProber {
    pub fn slow(delay: Duration) -> Self {
        Self { delay, ..Self::default() }
    }

    pub fn set(&self, domain: &str, status: DomainStatus) {
        self.statuses.lock().insert(domain.to_string(), status);
    }

    /// Make one host answer after `delay` instead of the default.
    pub fn stall(&self, domain: &str, delay: Duration) {
        self.delays.lock().insert(domain.to_string(), delay);
    }
}

#[async_trait]
impl Prober for FakeProber {
    async fn probe(&self, domain: &str) -> DomainStatus {
        let delay = self.delays.lock().get(domain).copied().unwrap_or(self.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let status = self.statuses.lock().get(domain).copied();
        status.unwrap_or(DomainStatus::Up)
    }
}

/// Memory store whose writes fail for selected domains.
pub struct FlakyStore {
    pub inner: MemoryStore,
    failing: Vec<String>,
}

impl FlakyStore {
    pub fn failing(domains: &[&str]) -> Self {
        Self { inner: MemoryStore::new(), failing: domains.iter().map(|d| d.to_string()).collect() }
    }
}

#[async_trait]
impl Store for FlakyStore {
    async fn upsert_program(&self, program: &Program) -> anyhow::Result<()> {
        self.inner.upsert_program(program).await
    }

    async fn record_observation(
        &self,
        domain: &str,
        program: &str,
        status: DomainStatus,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Observation> {
        if self.failing.iter().any(|d| d == domain) {
            anyhow::bail!("disk full while writing {}", domain);
        }
        self.inner.record_observation(domain, program, status, now).await
    }

    async fn list_programs(&self, limit: usize) -> anyhow::Result<Vec<Program>> {
        self.inner.list_programs(limit).await
    }

    async fn list_programs_by_type(&self, program_type: ProgramType, limit: usize) -> anyhow::Result<Vec<Program>> {
        self.inner.list_programs_by_type(program_type, limit).await
    }

    async fn list_bounty_programs(&self, limit: usize) -> anyhow::Result<Vec<Program>> {
        self.inner.list_bounty_programs(limit).await
    }

    async fn list_new_domains(&self, limit: usize) -> anyhow::Result<Vec<Domain>> {
        self.inner.list_new_domains(limit).await
    }

    async fn list_domains_by_program(&self, program: &str, limit: usize) -> anyhow::Result<Vec<Domain>> {
        self.inner.list_domains_by_program(program, limit).await
    }

    async fn list_status_changes(&self, only_unnotified: bool, limit: usize) -> anyhow::Result<Vec<StatusChange>> {
        self.inner.list_status_changes(only_unnotified, limit).await
    }

    async fn mark_notified(&self, id: i64) -> anyhow::Result<bool> {
        self.inner.mark_notified(id).await
    }

    async fn stats(&self) -> anyhow::Result<Stats> {
        self.inner.stats().await
    }

    async fn save_domain_info(&self, info: &DomainInfo) -> anyhow::Result<()> {
        self.inner.save_domain_info(info).await
    }

    async fn get_domain_info(&self, domain: &str, program: &str) -> anyhow::Result<Option<DomainInfo>> {
        self.inner.get_domain_info(domain, program).await
    }
}

pub struct Harness {
    pub deadline: Duration,
    pub grace: Duration,
    pub program_concurrency: usize,
}

impl Default for Harness {
    fn default() -> Self {
        Self { deadline: Duration::from_secs(30), grace: Duration::from_millis(50), program_concurrency: 5 }
    }
}

impl Harness {
    pub fn build(
        &self,
        registry: Arc<dyn Registry>,
        expander: Arc<dyn Expander>,
        prober: Arc<dyn Prober>,
        store: Arc<dyn Store>,
    ) -> Orchestrator {
        let expansion = ExpansionSettings {
            concurrency: 3,
            per_domain_timeout: Duration::from_secs(5),
            batch_timeout: Duration::from_secs(10),
            grace: self.grace,
        };
        let processor = Arc::new(ProgramProcessor::new(
            registry.clone(),
            expander,
            store,
            BatchProber::new(prober, 8, self.grace),
            expansion,
        ));
        Orchestrator::new(
            registry,
            processor,
            ScanSettings {
                program_concurrency: self.program_concurrency,
                deadline: self.deadline,
                grace: self.grace,
            },
        )
    }
}
