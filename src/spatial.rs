use std::collections::HashSet;

use tracing::{info, warn};

use crate::error::PipelineError;
use crate::extent::RegionExtent;
use crate::station_list::StationSet;

/// Keep only stations whose point geometry falls within the extent,
/// boundary included. Input order is preserved.
pub fn filter_stations(
    stations: &StationSet,
    extent: &RegionExtent,
) -> Result<StationSet, PipelineError> {
    if stations.epsg != extent.epsg {
        return Err(PipelineError::Configuration(format!(
            "stations are in EPSG:{} but the extent is in EPSG:{}",
            stations.epsg, extent.epsg
        )));
    }

    let records: Vec<_> = stations
        .records
        .iter()
        .filter(|record| extent.contains(&record.geometry))
        .cloned()
        .collect();
    info!(
        total = stations.records.len(),
        retained = records.len(),
        "filtered stations against region extent"
    );
    Ok(StationSet {
        records,
        epsg: stations.epsg,
    })
}

/// Keep only the stations named by id. Ids that match nothing in the
/// listing are warned about and dropped; listing order is preserved.
pub fn filter_by_ids(stations: &StationSet, ids: &[String]) -> StationSet {
    let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
    let records: Vec<_> = stations
        .records
        .iter()
        .filter(|record| wanted.contains(record.id.as_str()))
        .cloned()
        .collect();

    let found: HashSet<&str> = records.iter().map(|r| r.id.as_str()).collect();
    for id in ids {
        if !found.contains(id.as_str()) {
            warn!(station_id = %id, "requested station id not present in the listing");
        }
    }
    info!(
        requested = ids.len(),
        retained = records.len(),
        "filtered stations by explicit id"
    );
    StationSet {
        records,
        epsg: stations.epsg,
    }
}
