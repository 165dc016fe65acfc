use anyhow::{bail, Context};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::cli::{Cli, Commands};
use bounty_watch::api::{self, AppState};
use bounty_watch::config::Config;
use bounty_watch::discover::{ExpansionSettings, SubfinderExpander};
use bounty_watch::enrich::{enrich_many, HttpxEnricher};
use bounty_watch::http_client::{create_probe_client, create_registry_client};
use bounty_watch::model::{DomainStatus, StatusChange};
use bounty_watch::orchestrator::{Orchestrator, ScanSettings};
use bounty_watch::output::write_jsonl;
use bounty_watch::probe::{BatchProber, HttpProber};
use bounty_watch::processor::ProgramProcessor;
use bounty_watch::registry::HackerOneClient;
use bounty_watch::store::{self, Store};

const REGISTRY_TIMEOUT: Duration = Duration::from_secs(30);

pub async fn run_from_cli(cli: Cli) -> anyhow::Result<()> {
    // Our crate at the requested level; sqlx logs every statement at info, so keep it quiet.
    use tracing_subscriber::EnvFilter;
    let crate_level = if cli.debug { "debug" } else if cli.verbose { "info" } else { "warn" };
    let serving = matches!(cli.command, Commands::Serve { .. });
    let crate_level = if serving && crate_level == "warn" { "info" } else { crate_level };
    let filter_str = format!(
        "bounty_watch={crate},sqlx=warn,reqwest=info,hyper=info,h2=info",
        crate = crate_level
    );
    let env_filter = EnvFilter::try_new(&filter_str).unwrap_or_else(|_| EnvFilter::new(crate_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_ansi(true)
        .with_target(false)
        .init();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.database_path = db;
    }

    match cli.command {
        Commands::Serve { bind, no_initial_scan } => {
            if let Some(bind) = bind {
                config.bind = bind;
            }
            config.validate()?;
            serve(config, !no_initial_scan).await
        }
        Commands::Scan => {
            config.validate()?;
            scan_once(config).await
        }
        Commands::Stats => {
            let store = store::open(&config.database_path).await?;
            let stats = store.stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }
        Commands::Changes { unnotified, limit, jsonl } => {
            let store = store::open(&config.database_path).await?;
            let changes = store.list_status_changes(unnotified, limit).await?;
            for change in &changes {
                println!("{}", format_change(change));
            }
            if let Some(path) = jsonl {
                let written = write_jsonl(&path, &changes)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                tracing::info!(written, path = %path.display(), "exported status changes");
            }
            Ok(())
        }
        Commands::Ack { id } => {
            let store = store::open(&config.database_path).await?;
            if !store.mark_notified(id).await? {
                bail!("status change {} not found", id);
            }
            println!("status change {} marked notified", id);
            Ok(())
        }
        Commands::Enrich { program, limit } => {
            config.validate()?;
            enrich_program(config, &program, limit).await
        }
    }
}

fn format_change(change: &StatusChange) -> String {
    let marker = if change.is_recovery() { " [recovered]" } else { "" };
    let notified = if change.notified { " (notified)" } else { "" };
    format!(
        "#{} {} {} [{}] {} -> {}{}{}",
        change.id,
        change.changed_at.format("%Y-%m-%d %H:%M:%S"),
        change.domain,
        change.program,
        change.old_status,
        change.new_status,
        marker,
        notified
    )
}

async fn build(config: &Config) -> anyhow::Result<(Arc<dyn Store>, Orchestrator)> {
    if config.registry_token.is_empty() {
        bail!("no registry token: set HACKERONE_TOKEN or write it to .hackerone_token");
    }
    let store = store::open(&config.database_path).await?;

    let registry_client = create_registry_client(REGISTRY_TIMEOUT)?;
    let registry = Arc::new(HackerOneClient::new(
        registry_client,
        &config.registry_url,
        &config.registry_token,
        config.page_delay(),
    )?);

    let probe_client = create_probe_client(config.probe_timeout(), 2)?;
    let prober = BatchProber::new(
        Arc::new(HttpProber::new(probe_client, config.probe_timeout())),
        config.probe_workers,
        config.grace_period(),
    );
    let expansion = ExpansionSettings {
        concurrency: config.expansion_concurrency,
        per_domain_timeout: config.expansion_timeout(),
        batch_timeout: config.expansion_batch_timeout(),
        grace: config.grace_period(),
    };
    let processor = Arc::new(ProgramProcessor::new(
        registry.clone(),
        Arc::new(SubfinderExpander::new()),
        store.clone(),
        prober,
        expansion,
    ));
    let orchestrator = Orchestrator::new(
        registry,
        processor,
        ScanSettings {
            program_concurrency: config.program_concurrency,
            deadline: config.scan_deadline(),
            grace: config.grace_period(),
        },
    );
    Ok((store, orchestrator))
}

/// Token cancelled on Ctrl-C or SIGTERM.
fn shutdown_on_signal() -> CancellationToken {
    let token = CancellationToken::new();
    let signal = token.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("shutdown requested");
        signal.cancel();
    });
    token
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

async fn serve(config: Config, initial_scan: bool) -> anyhow::Result<()> {
    let (store, orchestrator) = build(&config).await?;
    let shutdown = shutdown_on_signal();

    let listener = TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    let mut api_task = tokio::spawn(api::serve(listener, AppState { store }, shutdown.clone()));

    tracing::info!(
        interval_secs = config.scan_interval_secs,
        initial_scan,
        "scheduler started"
    );
    tokio::select! {
        _ = orchestrator.run_periodic(config.scan_interval(), initial_scan, &shutdown) => {}
        res = &mut api_task => {
            shutdown.cancel();
            return res.context("API task panicked")?;
        }
    }

    shutdown.cancel();
    api_task.await.context("API task panicked")??;
    Ok(())
}

async fn scan_once(config: Config) -> anyhow::Result<()> {
    let (_store, orchestrator) = build(&config).await?;
    let shutdown = shutdown_on_signal();
    let report = orchestrator.run_scan_until(&shutdown).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn enrich_program(config: Config, program: &str, limit: usize) -> anyhow::Result<()> {
    let store = store::open(&config.database_path).await?;
    let domains: Vec<String> = store
        .list_domains_by_program(program, usize::MAX)
        .await?
        .into_iter()
        .filter(|d| d.status == DomainStatus::Up)
        .take(limit)
        .map(|d| d.name)
        .collect();
    if domains.is_empty() {
        bail!("no reachable domains known for program {}; run a scan first", program);
    }

    let shutdown = shutdown_on_signal();
    let enricher = Arc::new(HttpxEnricher::new(config.enrichment_timeout()));
    let report = enrich_many(enricher, store, program, domains, config.enrichment_concurrency, &shutdown).await;
    if report.unavailable {
        bail!("httpx not found in PATH");
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
