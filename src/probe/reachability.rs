//! Reachability probing.
//!
//! A single probe tries HTTPS, then HTTP, against the bare host. Any response
//! below 500 means UP; redirects and client errors count because the server
//! answered. A batch runs a fixed pool of workers over a shared queue and always
//! reports every requested domain, with UNKNOWN standing in for domains that
//! were never probed.

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::concurrent::with_grace;
use crate::model::DomainStatus;

/// Determines whether one host is reachable. Returns `Up` or `Down`.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, domain: &str) -> DomainStatus;
}

/// Prober backed by a shared HTTP client.
pub struct HttpProber {
    client: Client,
    timeout: Duration,
}

impl HttpProber {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    async fn attempt(&self, url: &str) -> Option<u16> {
        let resp = tokio::time::timeout(self.timeout, self.client.get(url).send()).await;
        match resp {
            Ok(Ok(r)) => Some(r.status().as_u16()),
            Ok(Err(e)) => {
                tracing::trace!(url, error = %e, "probe request failed");
                None
            }
            Err(_) => {
                tracing::trace!(url, "probe request timed out");
                None
            }
        }
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, domain: &str) -> DomainStatus {
        for scheme in ["https", "http"] {
            let url = format!("{}://{}", scheme, domain);
            if let Some(code) = self.attempt(&url).await {
                if code < 500 {
                    return DomainStatus::Up;
                }
                tracing::trace!(url, code, "server error, trying next scheme");
            }
        }
        DomainStatus::Down
    }
}

/// Outcome of a batch, keyed by the requested domain.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProbeReport {
    pub results: BTreeMap<String, DomainStatus>,
}

impl ProbeReport {
    pub fn count(&self, status: DomainStatus) -> usize {
        self.results.values().filter(|s| **s == status).count()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// Worker pool over a `Prober`.
#[derive(Clone)]
pub struct BatchProber {
    prober: Arc<dyn Prober>,
    workers: usize,
    grace: Duration,
}

impl BatchProber {
    pub fn new(prober: Arc<dyn Prober>, workers: usize, grace: Duration) -> Self {
        Self { prober, workers: workers.max(1), grace }
    }

    /// Probe every domain once. Cancellation stops new probes; in-flight ones get
    /// the grace period, after which they are abandoned and stay UNKNOWN.
    pub async fn probe_batch(&self, domains: &[String], cancel: &CancellationToken) -> ProbeReport {
        let mut results: BTreeMap<String, DomainStatus> =
            domains.iter().map(|d| (d.clone(), DomainStatus::Unknown)).collect();
        if results.is_empty() {
            return ProbeReport { results };
        }

        let queue: Arc<Mutex<VecDeque<String>>> = Arc::new(Mutex::new(results.keys().cloned().collect()));
        let worker_count = self.workers.min(results.len());
        let (tx, mut rx) = mpsc::channel::<(String, DomainStatus)>(worker_count * 2);

        let mut workers = JoinSet::new();
        for _ in 0..worker_count {
            let queue = queue.clone();
            let tx = tx.clone();
            let prober = self.prober.clone();
            let cancel = cancel.clone();
            let grace = self.grace;
            workers.spawn(async move {
                loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let next = queue.lock().pop_front();
                    let Some(domain) = next else { break };
                    let outcome = with_grace(prober.probe(&domain), &cancel, grace).await;
                    match outcome {
                        Some(status) => {
                            if tx.send((domain, status)).await.is_err() {
                                break;
                            }
                        }
                        None => {
                            tracing::debug!(domain = %domain, "probe abandoned after cancellation");
                            break;
                        }
                    }
                }
            });
        }
        drop(tx);

        while let Some((domain, status)) = rx.recv().await {
            if let Some(slot) = results.get_mut(&domain) {
                *slot = status;
            }
        }
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "probe worker failed");
            }
        }

        let unprobed = queue.lock().len();
        if unprobed > 0 {
            tracing::info!(unprobed, "probe batch cancelled before finishing");
        }
        ProbeReport { results }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        delay: Duration,
        live: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Prober for Scripted {
        async fn probe(&self, domain: &str) -> DomainStatus {
            let now = self.live.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.live.fetch_sub(1, Ordering::SeqCst);
            if domain.starts_with("down") { DomainStatus::Down } else { DomainStatus::Up }
        }
    }

    fn scripted(delay: Duration) -> Arc<Scripted> {
        Arc::new(Scripted { delay, live: AtomicUsize::new(0), peak: AtomicUsize::new(0) })
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn covers_every_domain_under_the_worker_cap() {
        let prober = scripted(Duration::from_millis(2));
        let batch = BatchProber::new(prober.clone(), 4, Duration::from_secs(1));
        let domains: Vec<String> = (0..30)
            .map(|i| if i % 3 == 0 { format!("down{}.example.com", i) } else { format!("up{}.example.com", i) })
            .collect();

        let report = batch.probe_batch(&domains, &CancellationToken::new()).await;

        assert_eq!(report.len(), 30);
        assert_eq!(report.count(DomainStatus::Down), 10);
        assert_eq!(report.count(DomainStatus::Up), 20);
        assert_eq!(report.count(DomainStatus::Unknown), 0);
        assert!(prober.peak.load(Ordering::SeqCst) <= 4);
    }

    #[tokio::test]
    async fn cancelled_batch_reports_unknown_not_down() {
        let batch = BatchProber::new(scripted(Duration::from_millis(1)), 2, Duration::from_millis(10));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let domains = vec!["a.example.com".to_string(), "down.example.com".to_string()];

        let report = batch.probe_batch(&domains, &cancel).await;

        assert_eq!(report.len(), 2);
        assert!(report.results.values().all(|s| *s == DomainStatus::Unknown));
    }

    #[tokio::test]
    async fn slow_probes_are_abandoned_after_grace() {
        let batch = BatchProber::new(scripted(Duration::from_secs(30)), 2, Duration::from_millis(20));
        let cancel = CancellationToken::new();
        let domains: Vec<String> = (0..5).map(|i| format!("h{}.example.com", i)).collect();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let report = tokio::time::timeout(Duration::from_secs(5), batch.probe_batch(&domains, &cancel))
            .await
            .expect("batch must return within the grace period");

        assert_eq!(report.len(), 5);
        assert_eq!(report.count(DomainStatus::Unknown), 5);
    }

    #[tokio::test]
    async fn duplicates_collapse_to_one_result() {
        let batch = BatchProber::new(scripted(Duration::ZERO), 3, Duration::from_secs(1));
        let domains = vec!["a.example.com".to_string(), "a.example.com".to_string()];
        let report = batch.probe_batch(&domains, &CancellationToken::new()).await;
        assert_eq!(report.len(), 1);
    }
}
