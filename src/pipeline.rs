use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, instrument};

use crate::config::Config;
use crate::crs::{Reprojector, WGS84_EPSG};
use crate::error::PipelineError;
use crate::extent::{ExtentFetcher, Region};
use crate::http::HttpClient;
use crate::output;
use crate::rainfall::{ArchiveRainfallSource, RainfallObservation, RainfallSource};
use crate::spatial;
use crate::station_list::{StationListFetcher, StationSet};

/// How the run picks its stations: by region polygons or by explicit ids.
#[derive(Debug, Clone)]
pub enum StationSelection {
    Regions(Vec<Region>),
    Ids(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub selection: StationSelection,
    /// Buffer distance around region polygons, in working-CRS units.
    pub buffer: f64,
    /// Working CRS override; `None` uses the configured default.
    pub target_epsg: Option<u16>,
    pub output_dir: PathBuf,
}

#[derive(Debug)]
pub struct RunSummary {
    pub stations_total: usize,
    pub stations_retained: usize,
    pub stations_with_data: usize,
    pub observations: usize,
    pub rainfall_path: PathBuf,
    pub stations_path: PathBuf,
}

/// End-to-end retrieval run: resolve extent, load and filter the station
/// listing, collect per-station rainfall, write both artifacts.
pub struct Pipeline<S: RainfallSource> {
    config: Config,
    stations: StationListFetcher,
    extent: ExtentFetcher,
    rainfall: S,
}

impl Pipeline<ArchiveRainfallSource> {
    pub fn new(config: Config) -> Self {
        let http = HttpClient::new(Duration::from_secs(config.request_timeout_secs));
        let rainfall = ArchiveRainfallSource::new(http.clone(), config.rainfall_url.clone());
        Self::assemble(config, http, rainfall)
    }
}

impl<S: RainfallSource> Pipeline<S> {
    /// Same pipeline with a different rainfall acquisition strategy.
    pub fn with_rainfall_source(config: Config, rainfall: S) -> Self {
        let http = HttpClient::new(Duration::from_secs(config.request_timeout_secs));
        Self::assemble(config, http, rainfall)
    }

    fn assemble(config: Config, http: HttpClient, rainfall: S) -> Self {
        Self {
            stations: StationListFetcher::new(
                http.clone(),
                config.station_list_url.clone(),
                config.trailer_lines,
            ),
            extent: ExtentFetcher::new(http, config.extent_base_url.clone()),
            rainfall,
            config,
        }
    }

    #[instrument(skip(self, options), fields(output_dir = %options.output_dir.display()))]
    pub async fn run(&self, options: &RunOptions) -> Result<RunSummary, PipelineError> {
        // Fail on a stale output directory before spending any network time.
        output::ensure_absent(&options.output_dir)?;

        let target_epsg = options.target_epsg.unwrap_or(self.config.working_epsg);
        let reprojector = Reprojector::new(WGS84_EPSG, target_epsg)?;

        // Extent resolution precedes the (much larger) station listing fetch
        // so selection mistakes surface as early as possible.
        enum Resolved<'a> {
            Extent(crate::extent::RegionExtent),
            Ids(&'a [String]),
        }
        let resolved = match &options.selection {
            StationSelection::Regions(regions) => Resolved::Extent(
                self.extent
                    .resolve(regions, options.buffer, &reprojector)
                    .await?,
            ),
            StationSelection::Ids(ids) => {
                if ids.is_empty() {
                    return Err(PipelineError::Configuration(
                        "no station ids selected".to_string(),
                    ));
                }
                Resolved::Ids(ids)
            }
        };

        let listing = self.stations.fetch().await?;
        let stations_total = listing.len();
        let projected = listing.reproject(&reprojector)?;

        let retained = match resolved {
            Resolved::Extent(extent) => spatial::filter_stations(&projected, &extent)?,
            Resolved::Ids(ids) => spatial::filter_by_ids(&projected, ids),
        };
        if retained.is_empty() {
            return Err(PipelineError::DataUnavailable(
                "no stations matched the selection".to_string(),
            ));
        }
        info!(
            total = stations_total,
            retained = retained.len(),
            "station selection complete"
        );

        let observations = self.collect_rainfall(&retained).await;
        let stations_with_data = observations
            .iter()
            .map(|o| o.station_id.as_str())
            .collect::<HashSet<_>>()
            .len();

        let (rainfall_path, stations_path) =
            output::write_artifacts(&options.output_dir, &retained, &observations)?;
        info!(
            observations = observations.len(),
            stations_with_data, "run complete"
        );

        Ok(RunSummary {
            stations_total,
            stations_retained: retained.len(),
            stations_with_data,
            observations: observations.len(),
            rainfall_path,
            stations_path,
        })
    }

    /// Fetch each retained station's series with bounded parallelism.
    /// Output order follows station order regardless of completion order.
    async fn collect_rainfall(&self, stations: &StationSet) -> Vec<RainfallObservation> {
        let progress = ProgressBar::new(stations.len() as u64);
        if let Ok(style) = ProgressStyle::with_template("{bar:40} {pos}/{len} stations") {
            progress.set_style(style);
        }

        let concurrency = self.config.fetch_concurrency.max(1);
        let mut indexed: Vec<(usize, Vec<RainfallObservation>)> =
            stream::iter(stations.records.iter().enumerate().map(|(index, record)| {
                let progress = progress.clone();
                async move {
                    let series = self.rainfall.monthly_rainfall(&record.id).await;
                    progress.inc(1);
                    (index, series)
                }
            }))
            .buffer_unordered(concurrency)
            .collect()
            .await;
        progress.finish_and_clear();

        indexed.sort_by_key(|(index, _)| *index);
        indexed
            .into_iter()
            .flat_map(|(_, series)| series)
            .collect()
    }
}
