use anyhow::{bail, Context, Result};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

/// Output of an external tool run.
#[derive(Debug, Clone)]
pub struct CmdOutput {
    pub success: bool,
    pub stdout: String,
}

impl CmdOutput {
    /// Non-blank stdout lines, trimmed.
    pub fn lines(&self) -> Vec<String> {
        self.stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Run a command to completion and capture stdout, bounded by `timeout`.
///
/// The child is killed if the timeout fires or the returned future is dropped.
pub async fn run_cmd(cmd: &str, args: &[&str], timeout: Duration) -> Result<CmdOutput> {
    let mut child = Command::new(cmd)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to spawn {}", cmd))?;

    let mut stdout = child.stdout.take().context("child stdout not captured")?;

    let run = async {
        let mut buf = String::new();
        stdout.read_to_string(&mut buf).await?;
        let status = child.wait().await?;
        Ok::<_, std::io::Error>(CmdOutput { success: status.success(), stdout: buf })
    };

    match tokio::time::timeout(timeout, run).await {
        Ok(Ok(out)) => Ok(out),
        Ok(Err(e)) => Err(e).with_context(|| format!("{} failed", cmd)),
        Err(_) => bail!("{} timed out after {:?}", cmd, timeout),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_non_blank_lines() {
        let out = run_cmd("sh", &["-c", "echo a.example.com; echo; echo '  b.example.com '"], Duration::from_secs(5))
            .await
            .unwrap();
        assert!(out.success);
        assert_eq!(out.lines(), vec!["a.example.com", "b.example.com"]);
    }

    #[tokio::test]
    async fn times_out_slow_tools() {
        let err = run_cmd("sh", &["-c", "sleep 5"], Duration::from_millis(100)).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn missing_binary_is_an_error() {
        assert!(run_cmd("definitely-not-a-real-tool-4242", &[], Duration::from_secs(1)).await.is_err());
    }
}
