use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use bom_rainfall::config::Config;
use bom_rainfall::error::PipelineError;
use bom_rainfall::extent::Region;
use bom_rainfall::http::HttpClient;
use bom_rainfall::page_scrape::PageTableSource;
use bom_rainfall::pipeline::{Pipeline, RunOptions, RunSummary, StationSelection};

/// Fetch monthly rainfall for Bureau of Meteorology stations in selected
/// regions, writing rainfall.csv and stations.geojson.
#[derive(Parser, Debug)]
#[command(name = "bom-rainfall", version)]
struct Cli {
    /// Region code to include (repeatable): act nsw nt qld sa tas vic wa
    #[arg(
        long = "region",
        value_name = "CODE",
        conflicts_with_all = ["station_ids", "stations_file"]
    )]
    regions: Vec<String>,

    /// Station id to include (repeatable) instead of a region selection
    #[arg(long = "station-id", value_name = "ID")]
    station_ids: Vec<String>,

    /// File with one station id per line, instead of a region selection
    #[arg(long, value_name = "PATH")]
    stations_file: Option<PathBuf>,

    /// Buffer distance around region polygons, in working-CRS units
    #[arg(long, default_value_t = 0.0)]
    buffer: f64,

    /// Working CRS as an EPSG code
    #[arg(long, value_name = "EPSG")]
    crs: Option<u16>,

    /// Directory the artifacts are written into
    #[arg(long, default_value = "bom_output")]
    output_dir: PathBuf,

    /// Parallel rainfall fetches (overrides BOM_FETCH_CONCURRENCY)
    #[arg(long, value_name = "N")]
    parallel: Option<usize>,

    /// Scrape the rendered data page instead of the zip archive endpoint
    #[arg(long)]
    scrape: bool,
}

fn selection(cli: &Cli) -> Result<StationSelection, PipelineError> {
    let mut ids = cli.station_ids.clone();
    if let Some(path) = &cli.stations_file {
        let text = std::fs::read_to_string(path)?;
        ids.extend(
            text.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(String::from),
        );
    }
    if !ids.is_empty() {
        return Ok(StationSelection::Ids(ids));
    }
    if cli.regions.is_empty() {
        return Err(PipelineError::Configuration(
            "select stations with --region, --station-id or --stations-file".to_string(),
        ));
    }
    let regions = cli
        .regions
        .iter()
        .map(|code| code.parse())
        .collect::<Result<Vec<Region>, PipelineError>>()?;
    Ok(StationSelection::Regions(regions))
}

async fn run(cli: Cli) -> Result<RunSummary, PipelineError> {
    let mut config = Config::from_env();
    if let Some(parallel) = cli.parallel {
        config.fetch_concurrency = parallel;
    }

    let options = RunOptions {
        selection: selection(&cli)?,
        buffer: cli.buffer,
        target_epsg: cli.crs,
        output_dir: cli.output_dir,
    };

    if cli.scrape {
        let http = HttpClient::new(Duration::from_secs(config.request_timeout_secs));
        let source = PageTableSource::new(http, config.rainfall_url.clone());
        Pipeline::with_rainfall_source(config, source)
            .run(&options)
            .await
    } else {
        Pipeline::new(config).run(&options).await
    }
}

#[tokio::main]
async fn main() {
    // Initialize tracing with environment filter support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,bom_rainfall=debug")),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(summary) => {
            info!(
                stations_total = summary.stations_total,
                stations_retained = summary.stations_retained,
                stations_with_data = summary.stations_with_data,
                observations = summary.observations,
                rainfall = %summary.rainfall_path.display(),
                stations = %summary.stations_path.display(),
                "done"
            );
        }
        Err(e) => {
            error!("run failed: {e}");
            std::process::exit(1);
        }
    }
}
