use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use berth_oci::{Client, RegistryAuth, Runtime};
use berth_state::Scheduler;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tracing::{error, info, trace};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

mod cli;
mod config;

use berth_state::SchedulerError;
use config::ConfigSource;

fn initialize_tracing() {
    // Initialize tracing subscriber for human-readable logs
    tracing_subscriber::registry()
        .with(
            // Use some log defaults. These can be overridden using RUST_LOG
            EnvFilter::try_from_default_env().unwrap_or(
                EnvFilter::default()
                    .add_directive("info".parse().unwrap())
                    .add_directive("hyper=error".parse().unwrap())
                    .add_directive("bollard=error".parse().unwrap()),
            ),
        )
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_span_events(FmtSpan::CLOSE)
                .event_format(fmt::format().compact().with_target(false)),
        )
        .init();
}

async fn connect(cli: &cli::Cli) -> Result<Client> {
    let client = match (&cli.docker_host, &cli.docker_cert_dir) {
        (None, _) => Client::connect().await?,
        (Some(host), None) => Client::connect_host(host).await?,
        (Some(host), Some(cert_dir)) => Client::connect_with_tls(host, cert_dir).await?,
    };
    Ok(client)
}

async fn reload_configuration(source: &ConfigSource, scheduler: &Scheduler) {
    match source.load().await {
        Ok(cfg) => {
            info!("configuration loaded, {} container specs", cfg.len());
            scheduler.update_configuration(cfg).await;
        }
        Err(e) => {
            // the previous snapshot stays active
            error!("configuration reload failed, keeping previous snapshot: {e}");
        }
    }
}

async fn run(cli: cli::Cli) -> Result<()> {
    let hostname = match &cli.hostname {
        Some(name) => name.clone(),
        None => hostname::get()
            .context("failed to determine hostname")?
            .to_string_lossy()
            .into_owned(),
    };
    info!("acting as host {hostname}");

    let client = connect(&cli).await?;

    let auth = match &cli.registry_auth {
        Some(path) => RegistryAuth::load(path)?,
        None => RegistryAuth::default(),
    };

    let source = ConfigSource::from_cli(&cli);
    let initial = source
        .load()
        .await
        .context("failed to load initial configuration")?;
    trace!(specs = initial.len(), "initial configuration loaded");

    let runtime: Arc<dyn Runtime> = Arc::new(client);
    let (scheduler, mut errors) = Scheduler::start(
        hostname,
        runtime,
        auth,
        initial,
        cli.refresh_interval,
    )
    .await?;

    if cli.manage_full_host {
        scheduler.enable_image_cleanup(cli.cleanup_min_age).await;
        info!("full-host management enabled");
    }

    main_loop(&source, &scheduler, &mut errors, cli.config_interval).await
}

async fn main_loop(
    source: &ConfigSource,
    scheduler: &Scheduler,
    errors: &mut mpsc::Receiver<SchedulerError>,
    config_interval: Duration,
) -> Result<()> {
    let mut reload = time::interval(config_interval);
    reload.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the initial configuration was just loaded
    reload.tick().await;

    let mut hangups = signal(SignalKind::hangup())?;

    loop {
        tokio::select! {
            _ = reload.tick() => {
                reload_configuration(source, scheduler).await;
            }

            _ = hangups.recv() => {
                info!("SIGHUP received, reloading configuration");
                reload_configuration(source, scheduler).await;
            }

            fault = errors.recv() => {
                return match fault {
                    Some(e) => Err(e.into()),
                    None => Err(anyhow!("scheduler terminated unexpectedly")),
                };
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    initialize_tracing();

    let cli = cli::parse();
    run(cli).await
}
