use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use geojson::{Feature, FeatureCollection};
use tempfile::NamedTempFile;
use tracing::{info, instrument};

use crate::error::PipelineError;
use crate::rainfall::RainfallObservation;
use crate::station_list::StationSet;

pub const RAINFALL_FILE: &str = "rainfall.csv";
pub const STATIONS_FILE: &str = "stations.geojson";

/// Refuse to run at all if either artifact already exists. Called before
/// any network work so a doomed run costs nothing.
pub fn ensure_absent(dir: &Path) -> Result<(), PipelineError> {
    for name in [RAINFALL_FILE, STATIONS_FILE] {
        let path = dir.join(name);
        if path.exists() {
            return Err(PipelineError::OutputExists(path));
        }
    }
    Ok(())
}

/// Write the rainfall CSV and the station GeoJSON.
///
/// Both artifacts are staged as temp files in the target directory and
/// promoted with no-clobber renames, so a run leaves either both artifacts
/// or neither.
#[instrument(skip(stations, observations), fields(dir = %dir.display()))]
pub fn write_artifacts(
    dir: &Path,
    stations: &StationSet,
    observations: &[RainfallObservation],
) -> Result<(PathBuf, PathBuf), PipelineError> {
    fs::create_dir_all(dir)?;

    let csv_bytes = rainfall_csv(observations)?;
    let geojson_bytes = stations_geojson(stations)?;

    let mut rainfall_tmp = NamedTempFile::new_in(dir)?;
    rainfall_tmp.write_all(&csv_bytes)?;
    let mut stations_tmp = NamedTempFile::new_in(dir)?;
    stations_tmp.write_all(&geojson_bytes)?;

    let rainfall_path = dir.join(RAINFALL_FILE);
    let stations_path = dir.join(STATIONS_FILE);

    rainfall_tmp
        .persist_noclobber(&rainfall_path)
        .map_err(|e| persist_error(e, &rainfall_path))?;
    if let Err(e) = stations_tmp.persist_noclobber(&stations_path) {
        // Keep the both-or-neither promise
        let _ = fs::remove_file(&rainfall_path);
        return Err(persist_error(e, &stations_path));
    }

    info!(
        observations = observations.len(),
        stations = stations.len(),
        "wrote output artifacts"
    );
    Ok((rainfall_path, stations_path))
}

fn persist_error(e: tempfile::PersistError, path: &Path) -> PipelineError {
    if e.error.kind() == std::io::ErrorKind::AlreadyExists {
        PipelineError::OutputExists(path.to_path_buf())
    } else {
        PipelineError::Io(e.error)
    }
}

fn rainfall_csv(observations: &[RainfallObservation]) -> Result<Vec<u8>, PipelineError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for obs in observations {
        writer.serialize(obs)?;
    }
    writer
        .into_inner()
        .map_err(|e| PipelineError::Csv(e.into_error().into()))
}

fn stations_geojson(stations: &StationSet) -> Result<Vec<u8>, PipelineError> {
    let mut features = Vec::with_capacity(stations.len());
    for record in &stations.records {
        let properties = match serde_json::to_value(record)? {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        features.push(Feature {
            bbox: None,
            geometry: Some(geojson::Geometry::new(geojson::Value::from(
                &record.geometry,
            ))),
            id: None,
            properties: Some(properties),
            foreign_members: None,
        });
    }
    let collection = FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    };
    Ok(serde_json::to_vec_pretty(&collection)?)
}
