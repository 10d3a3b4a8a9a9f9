use std::collections::HashSet;

use geo_types::Point;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::crs::{Reprojector, WGS84_EPSG};
use crate::error::PipelineError;
use crate::http::HttpClient;

/// One row of the BoM station listing.
///
/// `latitude`/`longitude` keep the listed decimal degrees as plain
/// attributes; `geometry` starts out as the same lon/lat pair and is the
/// only part that changes when the containing set is reprojected.
#[derive(Debug, Clone, Serialize)]
pub struct StationRecord {
    pub id: String,
    pub name: Option<String>,
    pub district: Option<String>,
    pub state: Option<String>,
    pub opened: Option<i32>,
    pub closed: Option<i32>,
    pub latitude: f64,
    pub longitude: f64,
    pub elevation_m: Option<f64>,
    pub barometer_height_m: Option<f64>,
    #[serde(skip)]
    pub geometry: Point<f64>,
}

/// A station set tagged with the EPSG code its geometry is expressed in.
#[derive(Debug, Clone)]
pub struct StationSet {
    pub records: Vec<StationRecord>,
    pub epsg: u16,
}

impl StationSet {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Vertex-wise reprojection of every station point. The set's declared
    /// CRS must match the reprojector's source CRS.
    pub fn reproject(&self, reprojector: &Reprojector) -> Result<StationSet, PipelineError> {
        if self.epsg != reprojector.from_epsg() {
            return Err(PipelineError::Configuration(format!(
                "station set is in EPSG:{} but the reprojector expects EPSG:{}",
                self.epsg,
                reprojector.from_epsg()
            )));
        }
        let mut records = Vec::with_capacity(self.records.len());
        for record in &self.records {
            let mut reprojected = record.clone();
            reprojected.geometry = reprojector.transform_point(record.geometry)?;
            records.push(reprojected);
        }
        Ok(StationSet {
            records,
            epsg: reprojector.to_epsg(),
        })
    }
}

/// Derive `(start, end)` byte spans from the runs of dashes in the listing's
/// separator line. Column discovery is positional on purpose: if the
/// upstream realigns its columns, the spans move with it instead of
/// silently misreading fields.
pub fn column_spans(separator: &str) -> Vec<(usize, usize)> {
    let dash_run = Regex::new(r"-+").unwrap();
    dash_run
        .find_iter(separator)
        .map(|m| (m.start(), m.end()))
        .collect()
}

fn is_separator_line(line: &str) -> bool {
    let trimmed = line.trim();
    !trimmed.is_empty() && trimmed.chars().all(|c| c == '-' || c.is_whitespace())
}

/// Slice one column out of a line, clamped to the line length, trimmed.
/// Returns `None` for blank fields and for the listing's all-dots
/// placeholders (`..`, `.....`).
fn field(line: &str, span: (usize, usize)) -> Option<&str> {
    let start = span.0.min(line.len());
    let end = span.1.min(line.len());
    let value = line.get(start..end).unwrap_or("").trim();
    if value.is_empty() || value.chars().all(|c| c == '.') {
        None
    } else {
        Some(value)
    }
}

struct Columns {
    id: usize,
    lat: usize,
    lon: usize,
    name: Option<usize>,
    district: Option<usize>,
    state: Option<usize>,
    opened: Option<usize>,
    closed: Option<usize>,
    elevation: Option<usize>,
    barometer: Option<usize>,
}

fn find_column(headers: &[String], matches: impl Fn(&str) -> bool) -> Option<usize> {
    headers.iter().position(|h| matches(h))
}

fn resolve_columns(headers: &[String]) -> Result<Columns, PipelineError> {
    let require = |name: &str, idx: Option<usize>| {
        idx.ok_or_else(|| {
            PipelineError::Format(format!(
                "station listing header is missing the '{name}' column"
            ))
        })
    };
    Ok(Columns {
        id: require("site", find_column(headers, |h| h == "site"))?,
        lat: require("lat", find_column(headers, |h| h == "lat"))?,
        lon: require("lon", find_column(headers, |h| h == "lon"))?,
        name: find_column(headers, |h| h.contains("name")),
        district: find_column(headers, |h| h.starts_with("dist")),
        state: find_column(headers, |h| h == "sta" || h == "state"),
        opened: find_column(headers, |h| h == "start"),
        closed: find_column(headers, |h| h == "end"),
        elevation: find_column(headers, |h| h.starts_with("height")),
        barometer: find_column(headers, |h| h.starts_with("bar")),
    })
}

/// Parse the fixed-width station listing into records.
///
/// The listing is: preamble, a header line, a separator line of dash runs,
/// one line per station, then `trailer_lines` of summary/copyright
/// postamble that carry no data. Rows with unparsable coordinates, blank
/// ids or duplicate ids are dropped with a warning; a listing with no
/// separator line or without the required header columns is a format error.
pub fn parse_station_listing(
    text: &str,
    trailer_lines: usize,
) -> Result<Vec<StationRecord>, PipelineError> {
    let lines: Vec<&str> = text.lines().collect();

    let separator_idx = lines
        .iter()
        .position(|line| is_separator_line(line))
        .ok_or_else(|| {
            PipelineError::Format("no column separator line found in station listing".to_string())
        })?;
    if separator_idx == 0 {
        return Err(PipelineError::Format(
            "station listing separator line has no header line before it".to_string(),
        ));
    }

    let spans = column_spans(lines[separator_idx]);
    let header_line = lines[separator_idx - 1];
    let headers: Vec<String> = spans
        .iter()
        .map(|&span| {
            field(header_line, span)
                .unwrap_or_default()
                .to_lowercase()
        })
        .collect();
    debug!(?headers, columns = spans.len(), "discovered listing columns");
    let columns = resolve_columns(&headers)?;

    // Trailer is counted from the end of the file, never into the header.
    let data_end = lines.len().saturating_sub(trailer_lines).max(separator_idx + 1);

    let mut records = Vec::new();
    let mut seen_ids: HashSet<String> = HashSet::new();
    let mut skipped = 0usize;

    for line in &lines[separator_idx + 1..data_end] {
        if line.trim().is_empty() {
            continue;
        }

        let id = match field(line, spans[columns.id]) {
            Some(id) => id.to_string(),
            None => {
                warn!(line, "station row has no id, skipping");
                skipped += 1;
                continue;
            }
        };
        if !seen_ids.insert(id.clone()) {
            warn!(station = %id, "duplicate station id in listing, keeping first");
            skipped += 1;
            continue;
        }

        let latitude = field(line, spans[columns.lat]).and_then(|v| v.parse::<f64>().ok());
        let longitude = field(line, spans[columns.lon]).and_then(|v| v.parse::<f64>().ok());
        let (latitude, longitude) = match (latitude, longitude) {
            (Some(lat), Some(lon)) => (lat, lon),
            _ => {
                warn!(station = %id, "unparsable coordinates, skipping station");
                skipped += 1;
                continue;
            }
        };

        let text_field =
            |idx: Option<usize>| idx.and_then(|i| field(line, spans[i])).map(str::to_string);
        let int_field =
            |idx: Option<usize>| idx.and_then(|i| field(line, spans[i])).and_then(|v| v.parse().ok());
        let float_field =
            |idx: Option<usize>| idx.and_then(|i| field(line, spans[i])).and_then(|v| v.parse().ok());

        records.push(StationRecord {
            name: text_field(columns.name),
            district: text_field(columns.district),
            state: text_field(columns.state),
            opened: int_field(columns.opened),
            closed: int_field(columns.closed),
            elevation_m: float_field(columns.elevation),
            barometer_height_m: float_field(columns.barometer),
            geometry: Point::new(longitude, latitude),
            latitude,
            longitude,
            id,
        });
    }

    if skipped > 0 {
        warn!(skipped, "dropped unusable station rows");
    }
    Ok(records)
}

/// Fetches and parses the full station listing. This fetch is essential:
/// failure or timeout aborts the run.
pub struct StationListFetcher {
    http: HttpClient,
    url: String,
    trailer_lines: usize,
}

impl StationListFetcher {
    pub fn new(http: HttpClient, url: String, trailer_lines: usize) -> Self {
        Self {
            http,
            url,
            trailer_lines,
        }
    }

    #[instrument(skip(self), fields(url = %self.url))]
    pub async fn fetch(&self) -> Result<StationSet, PipelineError> {
        let bytes = self.http.get_essential(&self.url, &[]).await?;
        let text = String::from_utf8_lossy(&bytes);
        let records = parse_station_listing(&text, self.trailer_lines)?;
        info!(stations = records.len(), "parsed station listing");
        Ok(StationSet {
            records,
            epsg: WGS84_EPSG,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "\
Bureau of Meteorology product IDCJMC0014.
Australian weather stations, sorted by site number.

Site    Dist  Site name            Start  End    Lat       Lon       Source  STA Height (m) Bar_ht  WMO
------- ----- -------------------- ------ ------ --------- --------- ------- --- ---------- ------- -----
001000  01    KARUNJIE             1940   1983   -16.2919  127.1956  .....   WA  320.0      ..      ..
009999  66    TEST PLAINS          1998   ..     -35.5000  149.2000  GPS     NSW ..         45.2    95111

2 stations

(c) Copyright Commonwealth of Australia, Bureau of Meteorology
Please note Copyright, Disclaimer and Privacy Notice
Users of these data are deemed to have read this notice
";

    #[test]
    fn parses_one_record_per_data_line() {
        let records = parse_station_listing(LISTING, 6).unwrap();
        assert_eq!(records.len(), 2);

        let first = &records[0];
        assert_eq!(first.id, "001000");
        assert_eq!(first.name.as_deref(), Some("KARUNJIE"));
        assert_eq!(first.district.as_deref(), Some("01"));
        assert_eq!(first.state.as_deref(), Some("WA"));
        assert_eq!(first.opened, Some(1940));
        assert_eq!(first.closed, Some(1983));
        assert_eq!(first.latitude, -16.2919);
        assert_eq!(first.longitude, 127.1956);
        assert_eq!(first.elevation_m, Some(320.0));
        assert_eq!(first.geometry, Point::new(127.1956, -16.2919));
    }

    #[test]
    fn dot_sentinels_map_to_none() {
        let records = parse_station_listing(LISTING, 6).unwrap();
        // ".." end year and "....." source on row 1, ".." height on row 2
        assert_eq!(records[0].barometer_height_m, None);
        assert_eq!(records[1].closed, None);
        assert_eq!(records[1].elevation_m, None);
        assert_eq!(records[1].barometer_height_m, Some(45.2));
    }

    #[test]
    fn missing_separator_is_a_format_error() {
        let result = parse_station_listing("just some text\nwith no table\n", 6);
        assert!(matches!(result, Err(PipelineError::Format(_))));
    }

    #[test]
    fn missing_required_column_is_a_format_error() {
        let text = "\
Site    Name
------- ----
001000  KARUNJIE
";
        let result = parse_station_listing(text, 0);
        assert!(matches!(result, Err(PipelineError::Format(_))));
    }

    #[test]
    fn unparsable_coordinates_drop_the_row_only() {
        let text = "\
Site    Lat       Lon
------- --------- ---------
001000  -16.2919  127.1956
002000  bad       127.0000
";
        let records = parse_station_listing(text, 0).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "001000");
    }

    #[test]
    fn duplicate_ids_keep_the_first_row() {
        let text = "\
Site    Lat       Lon
------- --------- ---------
001000  -16.0000  127.0000
001000  -17.0000  128.0000
";
        let records = parse_station_listing(text, 0).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].latitude, -16.0);
    }

    #[test]
    fn trailer_lines_are_not_parsed_as_stations() {
        // Same fixture with a shorter declared trailer still parses, it just
        // tries (and fails) to read postamble lines as rows.
        let records = parse_station_listing(LISTING, 6).unwrap();
        assert!(records.iter().all(|r| r.id.chars().all(|c| c.is_ascii_digit())));
    }

    #[test]
    fn column_spans_follow_dash_runs() {
        let spans = column_spans("----   ----   ---   ---");
        assert_eq!(spans, vec![(0, 4), (7, 11), (14, 17), (20, 23)]);
    }
}
