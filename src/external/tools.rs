use crate::external::runner::{self, CmdOutput};
use anyhow::Result;
use std::time::Duration;
use which::which;

pub const SUBFINDER: &str = "subfinder";
pub const HTTPX: &str = "httpx";

pub fn tool_available(name: &str) -> bool {
    which(name).is_ok()
}

/// `Ok(None)` when subfinder is not installed.
pub async fn try_run_subfinder(domain: &str, timeout: Duration) -> Result<Option<CmdOutput>> {
    if which(SUBFINDER).is_err() { return Ok(None); }
    // Let subfinder give up on its sources a bit before we kill it.
    let inner = timeout.as_secs().saturating_sub(10).max(1).to_string();
    let args = ["-d", domain, "-silent", "-timeout", inner.as_str()];
    let out = runner::run_cmd(SUBFINDER, &args, timeout).await?;
    Ok(Some(out))
}

/// `Ok(None)` when httpx is not installed.
pub async fn try_run_httpx(url: &str, timeout: Duration) -> Result<Option<CmdOutput>> {
    if which(HTTPX).is_err() { return Ok(None); }
    let args = ["-u", url, "-json", "-title", "-tech-detect", "-status-code", "-silent", "-timeout", "10"];
    let out = runner::run_cmd(HTTPX, &args, timeout).await?;
    Ok(Some(out))
}
