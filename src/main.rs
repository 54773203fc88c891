mod backends;
mod cli;
mod config;
mod config_persistence;
mod deadline;
mod fallback;
mod fetcher;
mod harvester;
mod http_client;
mod orchestrator;
mod pipeline;
mod progress_reporter;
mod protocol;
mod stock_photo;
mod summary;
#[cfg(test)]
mod test_support;
mod work_item;

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use clap::Parser;
use log::info;
use tokio::sync::broadcast;

use cli::{Cli, Command};
use config::Config;
use fallback::FallbackResolver;
use fetcher::{ImageDownloader, ImageFetcher};
use harvester::Harvester;
use orchestrator::{BatchOrchestrator, PoolSettings};
use pipeline::ItemPipeline;
use progress_reporter::ProgressReporter;
use protocol::{Message, ProgressBus};
use stock_photo::StockPhotoFetcher;
use summary::{render_summary, RunSummary};

const BUS_CAPACITY: usize = 4096;

fn spawn_progress_reporter(bus: &ProgressBus) -> thread::JoinHandle<()> {
    let mut reporter = ProgressReporter::new(bus.subscribe());
    thread::spawn(move || {
        let run_result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            reporter.run();
        }));
        if let Err(payload) = run_result {
            log::error!(
                "ProgressReporter thread terminated due to panic: {}",
                orchestrator::panic_payload_to_string(payload.as_ref())
            );
        }
    })
}

fn run_batch(config: &Config, bus: &ProgressBus) -> RunSummary {
    let http_client = http_client::build_agent();
    let output_folder = PathBuf::from(&config.output.folder);
    let downloader: Arc<dyn ImageDownloader> =
        Arc::new(ImageFetcher::new(http_client.clone(), config.fetch.clone()));
    let harvester = Arc::new(Harvester::new(
        backends::default_backends(&http_client),
        config.harvest.clone(),
        bus.clone(),
    ));
    let pipeline = Arc::new(ItemPipeline::new(
        harvester,
        Arc::clone(&downloader),
        config.pipeline.clone(),
        config.harvest.max_results,
        bus.clone(),
    ));
    let fallback = FallbackResolver::new(config.fallback.clone(), downloader, bus.clone());
    let orchestrator = BatchOrchestrator::new(
        pipeline,
        fallback,
        PoolSettings::from(&config.orchestrator),
        bus.clone(),
    );

    let items = work_item::work_items_for(&config.items, &output_folder);
    orchestrator.run(items, &output_folder)
}

fn run_simple(config: &Config, limit: usize, bus: &ProgressBus) -> RunSummary {
    let output_folder = PathBuf::from(format!("{}-simple", config.output.folder));
    let downloader = Arc::new(ImageFetcher::new(
        http_client::build_agent(),
        config.fetch.clone(),
    ));
    let fetcher =
        StockPhotoFetcher::new(downloader, config.orchestrator.per_item_timeout(), bus.clone());
    let items = work_item::work_items_for(&config.items, &output_folder);
    fetcher.run(&items, limit, &output_folder)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut clog = colog::default_builder();
    let level = if cli.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    clog.filter(None, level);
    clog.init();

    std::panic::set_hook(Box::new(|panic_info| {
        let current_thread = std::thread::current();
        let thread_name = current_thread.name().unwrap_or("unnamed");
        log::error!("panic in thread '{}': {}", thread_name, panic_info);
    }));

    let simple_limit = match cli.command() {
        Command::WriteConfig { path } => {
            config_persistence::write_config_file(&Config::default(), &path)?;
            info!("Wrote default config to {}", path.display());
            return Ok(());
        }
        Command::Run => None,
        Command::Simple { limit } => Some(limit),
    };

    let mut config = config_persistence::load_config(cli.config.as_deref())?;
    cli.apply_overrides(&mut config);
    config.validate()?;

    let (bus_sender, _) = broadcast::channel::<Message>(BUS_CAPACITY);
    let reporter_handle = spawn_progress_reporter(&bus_sender);

    let summary = match simple_limit {
        Some(limit) => run_simple(&config, limit, &bus_sender),
        None => run_batch(&config, &bus_sender),
    };

    drop(bus_sender);
    let _ = reporter_handle.join();

    println!("\n{}", render_summary(&summary));
    info!("Application exiting");
    Ok(())
}
