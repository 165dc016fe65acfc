use reqwest::{Client, ClientBuilder};
use std::time::Duration;

pub const USER_AGENT: &str = concat!("bounty-watch/", env!("CARGO_PKG_VERSION"));

/// Client for reachability probes.
///
/// Redirects are not followed: any response at all means the host answered, so
/// the first status line is what gets classified. Certificates are not verified
/// because an expired or self-signed cert still means the host is up.
pub fn create_probe_client(timeout: Duration, max_idle_per_host: usize) -> anyhow::Result<Client> {
    let client = ClientBuilder::new()
        // Connection pooling - many hosts, few requests each
        .pool_max_idle_per_host(max_idle_per_host)
        .pool_idle_timeout(Some(Duration::from_secs(30)))
        .tcp_nodelay(true)

        // Timeouts
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(5)))

        .use_rustls_tls()
        .danger_accept_invalid_certs(true)
        .https_only(false)
        .redirect(reqwest::redirect::Policy::none())
        .user_agent(USER_AGENT)
        .build()?;
    Ok(client)
}

/// Client for the program registry API.
pub fn create_registry_client(timeout: Duration) -> anyhow::Result<Client> {
    let client = ClientBuilder::new()
        .pool_max_idle_per_host(10)
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .use_rustls_tls()
        .user_agent(USER_AGENT)
        .build()?;
    Ok(client)
}
