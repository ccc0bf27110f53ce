//! Entrypoint.

use std::{
    collections::HashSet,
    net::{Ipv4Addr, SocketAddr},
    path::Path,
    sync::Arc,
    time::Duration,
};

use alerting::AlertmanagerClient;
use chainio::{ExitBusOracle, ExitRequestOracle, LidoLocator, connect_http};
use clap::Parser;
use config::{KeysSourceKind, Opts, RequestTunables};
use dotenvy::dotenv;
use eyre::Context;
use keys_source::{FileSource, KeySource, KeysApiSource};
use metrics::{BuildInfo, Metrics};
use network::{ConsensusClient, KeysApiClient, RequestPolicy};
use runtime::{
    Heartbeat,
    pulse::{metrics_router, pulse_router, serve},
    shutdown::{ShutdownSignal, run_until_shutdown},
};
use tracing::{error, info, warn};
use tracing_subscriber::filter::EnvFilter;
use watcher::{
    Handler, Links, Watcher, WatcherContext, WatcherState,
    handlers::{
        ConsolidationHandler, ElWithdrawalHandler, ExitHandler, ForkHandler, SlashingHandler,
    },
};

fn policy(tunables: RequestTunables) -> RequestPolicy {
    RequestPolicy::new(tunables.timeout, tunables.retry_count, tunables.backoff)
}

fn spawn_server(name: &'static str, port: u16, router: runtime::pulse::Router) -> eyre::Result<()> {
    let shutdown = ShutdownSignal::new()?;
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    tokio::spawn(async move {
        if let Err(err) = serve(name, addr, router, shutdown).await {
            error!(server = name, %err, "Server stopped");
        }
    });
    Ok(())
}

/// Exit request oracle and valid withdrawal addresses, both resolved through the locator.
async fn lido_contracts(
    opts: &Opts,
) -> eyre::Result<(Option<Arc<dyn ExitRequestOracle>>, HashSet<String>)> {
    let mut valid_addresses: HashSet<String> = opts
        .keys
        .valid_withdrawal_addresses
        .iter()
        .map(|address| address.to_string().to_lowercase())
        .collect();

    let (Some(el_url), Some(locator_address)) =
        (opts.endpoints.execution_client_uri.clone(), opts.keys.lido_locator_address)
    else {
        warn!("No execution client or locator configured, exit requests are not tracked");
        return Ok((None, valid_addresses));
    };

    let provider = connect_http(el_url, Duration::from_secs(opts.exits.el_request_timeout))?;
    let locator = LidoLocator::new(locator_address, provider.clone());

    if valid_addresses.is_empty() {
        let vault = locator.withdrawal_vault().await.wrap_err("failed to get withdrawal vault")?;
        info!(%vault, "Using withdrawal vault as the valid withdrawal address");
        valid_addresses.insert(vault.to_string().to_lowercase());
    }

    let exit_bus = locator
        .validators_exit_bus_oracle()
        .await
        .wrap_err("failed to get validators exit bus oracle")?;
    let oracle: Arc<dyn ExitRequestOracle> =
        Arc::new(ExitBusOracle::new(exit_bus, provider, opts.exits.events_search_step));
    Ok((Some(oracle), valid_addresses))
}

async fn run(opts: Opts) -> eyre::Result<()> {
    let metrics = Arc::new(Metrics::new(&opts.server.prometheus_prefix)?);
    metrics.set_build_info(&BuildInfo::load(Path::new("./build-info.json")));

    let heartbeat = Heartbeat::default();
    let max_cycle_lifetime = Duration::from_secs(opts.server.max_cycle_lifetime_in_seconds);
    spawn_server("metrics", opts.server.prometheus_port, metrics_router(Arc::clone(&metrics)))?;
    spawn_server(
        "pulse",
        opts.server.pulse_server_port,
        pulse_router(heartbeat.clone(), max_cycle_lifetime),
    )?;

    let consensus = ConsensusClient::new(
        opts.endpoints.consensus_client_uri.clone(),
        policy(opts.consensus_requests.tunables()),
        Some(metrics.cl_requests_duration.clone()),
    )?;
    let alerts = AlertmanagerClient::new(
        opts.endpoints.alertmanager_uri.clone(),
        policy(opts.alertmanager_requests.tunables()),
        Some(metrics.alertmanager_requests_duration.clone()),
        opts.alerting.network_name.clone(),
        opts.alerting.dry_run,
    )?;
    let keys_source: Box<dyn KeySource> = match opts.keys.keys_source {
        KeysSourceKind::KeysApi => {
            let client = KeysApiClient::new(
                opts.endpoints.keys_api_uri.clone(),
                policy(opts.keys_api_requests.tunables()),
                Some(metrics.keys_api_requests_duration.clone()),
            )?;
            Box::new(KeysApiSource::new(client, Some(metrics.keys_api_block_number.clone())))
        }
        KeysSourceKind::File => Box::new(FileSource::new(opts.keys.keys_file_path.clone())),
    };

    let (oracle, valid_withdrawal_addresses) = lido_contracts(&opts).await?;
    let context = WatcherContext {
        state: Arc::new(WatcherState::default()),
        alerts: Arc::new(alerts),
        links: Links::new(opts.alerting.network_name.clone()),
        additional_labels: opts.alerting.additional_alertmanager_labels.0.clone(),
        valid_withdrawal_addresses,
    };
    let handlers: Vec<Box<dyn Handler>> = vec![
        Box::new(SlashingHandler::default()),
        Box::new(ForkHandler::default()),
        Box::new(
            ExitHandler::new(oracle, opts.exits.exit_requests_lookback_blocks)
                .with_disabled_modules(opts.exits.disable_unexpected_exit_alerts.iter().copied()),
        ),
        Box::new(ElWithdrawalHandler::default()),
        Box::new(ConsolidationHandler::default()),
    ];

    let watcher = Watcher::new(consensus, keys_source, handlers, context, Arc::clone(&metrics))
        .await?
        .with_cycle_sleep(opts.cycle_sleep())
        .with_heartbeat(heartbeat);

    let on_shutdown = || info!("👋 Head watcher shutting down...");
    match opts.slots_range {
        Some(range) => {
            info!(start = range.start, end = range.end, "Replaying slots range");
            run_until_shutdown(watcher.run_slots(range.slots()), ShutdownSignal::new()?, on_shutdown)
                .await
        }
        None => run_until_shutdown(watcher.run(), ShutdownSignal::new()?, on_shutdown).await,
    }
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    if let Ok(custom_env_file) = std::env::var("ENV_FILE") {
        dotenvy::from_filename(custom_env_file)?;
    } else {
        // Try the default .env file, and ignore if it doesn't exist.
        dotenv().ok();
    }

    let opts = Opts::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = opts.validate() {
        error!(%err, "Invalid configuration");
        std::process::exit(1);
    }
    info!(network = %opts.alerting.network_name, "🔭 Head watcher starting...");

    run(opts).await
}
