use std::collections::HashMap;
use std::io::{Cursor, Read};

use serde::Serialize;
use tracing::{debug, instrument, warn};
use zip::ZipArchive;

use crate::http::{FetchOutcome, HttpClient, BROWSER_USER_AGENT};

/// One station-month of rainfall. `rainfall_mm` is `None` when the source
/// recorded no measurement; a missing month is never reported as zero.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RainfallObservation {
    pub station_id: String,
    pub year: i32,
    pub month: u32,
    pub rainfall_mm: Option<f64>,
    pub quality: Option<String>,
}

/// A strategy for acquiring the monthly rainfall series of one station.
///
/// Rainfall is optional data: implementations log and return an empty
/// series on failure instead of erroring, so one dead station cannot sink
/// a whole collection run.
pub trait RainfallSource {
    fn monthly_rainfall(
        &self,
        station_id: &str,
    ) -> impl std::future::Future<Output = Vec<RainfallObservation>> + Send;
}

/// Default acquisition strategy: the zipped monthly-data archive endpoint.
pub struct ArchiveRainfallSource {
    http: HttpClient,
    url: String,
}

impl ArchiveRainfallSource {
    pub fn new(http: HttpClient, url: String) -> Self {
        Self { http, url }
    }
}

impl RainfallSource for ArchiveRainfallSource {
    #[instrument(skip(self))]
    async fn monthly_rainfall(&self, station_id: &str) -> Vec<RainfallObservation> {
        let query = [
            ("p_stn_num", station_id),
            ("p_c", "-1487270503"),
            ("p_nccObsCode", "139"),
            ("p_display_type", "monthlyZippedDataFile"),
        ];
        match self
            .http
            .get_optional(&self.url, &query, Some(BROWSER_USER_AGENT))
            .await
        {
            FetchOutcome::Success(payload) => normalize(&payload, station_id),
            FetchOutcome::Unavailable(reason) => {
                warn!(station_id, %reason, "rainfall archive unavailable");
                Vec::new()
            }
        }
    }
}

/// Turn a rainfall payload into observations. The endpoint answers with a
/// zip archive whose `*Data1.csv` members hold the table, but has been seen
/// returning bare CSV; both forms are accepted. Anything else yields an
/// empty series.
pub fn normalize(payload: &[u8], station_id: &str) -> Vec<RainfallObservation> {
    let mut observations = match ZipArchive::new(Cursor::new(payload)) {
        Ok(mut archive) => {
            let mut all = Vec::new();
            let names: Vec<String> = archive.file_names().map(str::to_string).collect();
            for name in names {
                if !name.ends_with("Data1.csv") {
                    continue;
                }
                let mut text = String::new();
                match archive.by_name(&name) {
                    Ok(mut member) => {
                        if member.read_to_string(&mut text).is_err() {
                            warn!(station_id, member = %name, "archive member is not text, skipping");
                            continue;
                        }
                    }
                    Err(e) => {
                        warn!(station_id, member = %name, error = %e, "could not read archive member");
                        continue;
                    }
                }
                all.extend(parse_csv(&text, station_id));
            }
            all
        }
        Err(_) => {
            debug!(station_id, "payload is not a zip archive, trying bare CSV");
            parse_csv(&String::from_utf8_lossy(payload), station_id)
        }
    };
    dedup_last_wins(&mut observations);
    observations
}

/// Parse one monthly-data CSV table. Columns are positional:
/// product code, station id, year, month, rainfall, quality.
fn parse_csv(text: &str, station_id: &str) -> Vec<RainfallObservation> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(text.as_bytes());

    match reader.headers() {
        Ok(headers) if headers.len() >= 6 => {}
        Ok(_) | Err(_) => {
            warn!(station_id, "rainfall table is structurally invalid, discarding");
            return Vec::new();
        }
    }

    let mut observations = Vec::new();
    for row in reader.records() {
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                warn!(station_id, error = %e, "unreadable rainfall row, skipping");
                continue;
            }
        };
        if row.len() < 6 {
            warn!(station_id, fields = row.len(), "short rainfall row, skipping");
            continue;
        }

        let year = match row[2].trim().parse::<i32>() {
            Ok(year) => year,
            Err(_) => {
                warn!(station_id, year = &row[2], "unparsable year, skipping row");
                continue;
            }
        };
        let month = match row[3].trim().parse::<u32>() {
            Ok(month @ 1..=12) => month,
            _ => {
                warn!(station_id, month = &row[3], "month outside 1..=12, skipping row");
                continue;
            }
        };

        let raw_rainfall = row[4].trim();
        let rainfall_mm = if raw_rainfall.is_empty() {
            None
        } else {
            match raw_rainfall.parse::<f64>() {
                Ok(mm) => Some(mm),
                Err(_) => {
                    warn!(station_id, year, month, value = raw_rainfall, "unparsable rainfall amount");
                    None
                }
            }
        };
        let quality = match row[5].trim() {
            "" => None,
            q => Some(q.to_string()),
        };

        observations.push(RainfallObservation {
            station_id: station_id.to_string(),
            year,
            month,
            rainfall_mm,
            quality,
        });
    }
    observations
}

/// Collapse duplicate (year, month) entries, keeping the latest value at
/// the position of the first occurrence.
fn dedup_last_wins(observations: &mut Vec<RainfallObservation>) {
    let mut index: HashMap<(i32, u32), usize> = HashMap::new();
    let mut kept: Vec<RainfallObservation> = Vec::with_capacity(observations.len());
    for obs in observations.drain(..) {
        match index.get(&(obs.year, obs.month)) {
            Some(&slot) => kept[slot] = obs,
            None => {
                index.insert((obs.year, obs.month), kept.len());
                kept.push(obs);
            }
        }
    }
    *observations = kept;
}
