//! Main promsd binary.
//!
//! Scrapes every configured source on a fixed period until interrupted,
//! logging the outcome of each cycle.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use promsd::{
    config::{self, Config, SourceConfig, Telemetry},
    descriptor::DescriptorCache,
    fetch::{self, Fetcher},
    pipeline,
    transform::Transforms,
};
use tokio::{
    runtime::Builder,
    signal,
    sync::broadcast,
    task::JoinSet,
    time::{self, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, util::SubscriberInitExt};

#[derive(thiserror::Error, Debug)]
enum Error {
    #[error("Failed to load promsd config: {0}")]
    Config(#[from] config::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Failed to install prometheus recorder: {0}")]
    Prometheus(#[from] metrics_exporter_prometheus::BuildError),
}

fn default_config_path() -> String {
    "/etc/promsd/promsd.yaml".to_string()
}

#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
struct Cli {
    /// path on disk to the configuration file
    #[clap(long, default_value_t = default_config_path())]
    config_path: String,
}

/// Everything one source's scrape loop needs.
///
/// Without a shared `fetcher` every cycle builds its own client from
/// `ca_certs`, so a bad certificate file fails cycles rather than the process.
#[derive(Debug)]
struct Scraper {
    source: SourceConfig,
    fetcher: Option<Fetcher>,
    ca_certs: Arc<[PathBuf]>,
    transforms: Transforms,
    cache: Arc<DescriptorCache>,
}

impl Scraper {
    async fn run(self, period: Duration, mut shutdown: broadcast::Receiver<()>) {
        info!(
            "scraping {component} at {uri} every {period:?}",
            component = self.source.component,
            uri = self.source.uri()
        );
        let mut poll = time::interval(period);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = poll.tick() => self.cycle().await,
                _ = shutdown.recv() => {
                    debug!("{component} scraper shutting down", component = self.source.component);
                    return;
                }
            }
        }
    }

    async fn cycle(&self) {
        let component = &self.source.component;
        let result = match &self.fetcher {
            Some(fetcher) => {
                pipeline::run_cycle(fetcher, &self.source, self.transforms, &self.cache).await
            }
            None => {
                pipeline::run_cycle_with_certs(
                    &self.source,
                    &self.ca_certs,
                    self.transforms,
                    &self.cache,
                )
                .await
            }
        };
        match result {
            Ok(outcome) => {
                let pending: Vec<&str> = outcome.report.pending().collect();
                if !pending.is_empty() {
                    info!("{component}: metric descriptors to push: {pending:?}");
                }
                debug!(
                    "{component}: {exportable} of {total} metric families exportable",
                    exportable = outcome.exportable().count(),
                    total = outcome.families.len()
                );
            }
            Err(err @ pipeline::Error::Fetch(fetch::Error::CertLoad { .. })) => {
                error!("{component}: {stage} failed: {err}", stage = err.stage());
            }
            Err(err @ pipeline::Error::Fetch(_)) => {
                warn!("{component}: {stage} failed: {err}", stage = err.stage());
            }
            Err(err @ pipeline::Error::Parse(_)) => {
                error!("{component}: {stage} failed: {err}", stage = err.stage());
            }
        }
    }
}

fn install_telemetry(telemetry: Telemetry) -> Result<(), Error> {
    let Telemetry {
        addr,
        global_labels,
    } = telemetry;
    let mut builder = PrometheusBuilder::new().with_http_listener(addr);
    for (k, v) in global_labels {
        builder = builder.add_global_label(k, v);
    }
    builder.install()?;
    info!("serving telemetry on {addr}");
    Ok(())
}

async fn inner_main(config: Config) -> Result<(), Error> {
    if let Some(telemetry) = config.telemetry.clone() {
        install_telemetry(telemetry)?;
    }

    let period = config.sample_period();
    let fetcher = match Fetcher::new(&config.ca_certs) {
        Ok(fetcher) => Some(fetcher),
        Err(err) => {
            error!("{err}; loading certificates again on every scrape cycle");
            None
        }
    };
    let ca_certs: Arc<[PathBuf]> = config.ca_certs.into();
    let cache = Arc::new(DescriptorCache::new());
    let (shutdown_snd, _) = broadcast::channel(1);

    let mut scrapers = JoinSet::new();
    for source in config.sources {
        let scraper = Scraper {
            source,
            fetcher: fetcher.clone(),
            ca_certs: Arc::clone(&ca_certs),
            transforms: config.transforms,
            cache: Arc::clone(&cache),
        };
        scrapers.spawn(scraper.run(period, shutdown_snd.subscribe()));
    }

    signal::ctrl_c().await?;
    info!("received ctrl-c");
    let _ = shutdown_snd.send(());
    while let Some(res) = scrapers.join_next().await {
        if let Err(err) = res {
            error!("Could not join the spawned scraper task: {err}");
        }
    }
    info!(
        "{count} metric descriptors known at shutdown",
        count = cache.len()
    );
    Ok(())
}

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_ansi(false)
        .finish()
        .init();

    let version = env!("CARGO_PKG_VERSION");
    info!("Starting promsd {version} run.");

    let cli = Cli::parse();
    let config = Config::from_path(Path::new(&cli.config_path))?;

    let runtime = Builder::new_multi_thread()
        .enable_io()
        .enable_time()
        .build()?;
    let res = runtime.block_on(inner_main(config));
    info!("Bye. :)");
    res
}
