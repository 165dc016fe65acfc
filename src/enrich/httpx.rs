use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::time::Duration;

use super::Enricher;
use crate::external::runner::CmdOutput;
use crate::external::tools;
use crate::model::{DomainInfo, DomainStatus};

/// Fields read from one `httpx -json` line. Older and newer httpx releases name some
/// fields differently.
#[derive(Debug, Default, Deserialize)]
pub struct HttpxRecord {
    #[serde(default, alias = "status-code")]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, alias = "technologies")]
    pub tech: Vec<String>,
    #[serde(default, alias = "server")]
    pub webserver: Option<String>,
    #[serde(default, alias = "content-type")]
    pub content_type: Option<String>,
    #[serde(default, alias = "content-length")]
    pub content_length: Option<u64>,
}

/// First line of `stdout` that decodes as an httpx record.
pub fn parse_httpx_output(stdout: &str) -> Option<HttpxRecord> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| l.starts_with('{'))
        .find_map(|l| serde_json::from_str(l).ok())
}

enum Attempt {
    Parsed(HttpxRecord),
    Unparseable,
    Failed,
}

#[derive(Debug, Clone)]
pub struct HttpxEnricher {
    timeout: Duration,
}

impl HttpxEnricher {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn attempt(&self, url: &str) -> Attempt {
        let out: CmdOutput = match tools::try_run_httpx(url, self.timeout).await {
            Ok(Some(out)) => out,
            Ok(None) => return Attempt::Failed,
            Err(e) => {
                tracing::debug!(url, error = %e, "httpx invocation failed");
                return Attempt::Failed;
            }
        };
        if !out.success || out.stdout.trim().is_empty() {
            return Attempt::Failed;
        }
        match parse_httpx_output(&out.stdout) {
            Some(record) => Attempt::Parsed(record),
            None => Attempt::Unparseable,
        }
    }
}

fn info_from(domain: &str, program: &str, status: DomainStatus, record: HttpxRecord) -> DomainInfo {
    DomainInfo {
        domain: domain.to_string(),
        program: program.to_string(),
        status,
        status_code: record.status_code,
        title: record.title.filter(|t| !t.is_empty()),
        technologies: record.tech,
        server: record.webserver.filter(|s| !s.is_empty()),
        content_type: record.content_type.filter(|c| !c.is_empty()),
        content_length: record.content_length,
        last_checked: Utc::now(),
    }
}

#[async_trait]
impl Enricher for HttpxEnricher {
    fn is_available(&self) -> bool {
        tools::tool_available(tools::HTTPX)
    }

    async fn enrich(&self, domain: &str, program: &str) -> DomainInfo {
        if let Attempt::Parsed(record) = self.attempt(&format!("https://{}", domain)).await {
            return info_from(domain, program, DomainStatus::Up, record);
        }
        match self.attempt(&format!("http://{}", domain)).await {
            Attempt::Parsed(record) => info_from(domain, program, DomainStatus::Up, record),
            Attempt::Unparseable => info_from(domain, program, DomainStatus::Unknown, HttpxRecord::default()),
            Attempt::Failed => info_from(domain, program, DomainStatus::Down, HttpxRecord::default()),
        }
    }
}
