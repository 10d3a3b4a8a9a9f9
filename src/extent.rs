use std::fmt;
use std::str::FromStr;

use geo::Intersects;
use geo_types::{MultiPolygon, Point, Polygon};
use geojson::GeoJson;
use tracing::{info, instrument, warn};

use crate::crs::{Reprojector, WGS84_EPSG};
use crate::error::PipelineError;
use crate::http::{FetchOutcome, HttpClient};

/// Australian state/territory codes recognised by the extent resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    Act,
    Nsw,
    Nt,
    Qld,
    Sa,
    Tas,
    Vic,
    Wa,
}

impl Region {
    pub const ALL: [Region; 8] = [
        Region::Act,
        Region::Nsw,
        Region::Nt,
        Region::Qld,
        Region::Sa,
        Region::Tas,
        Region::Vic,
        Region::Wa,
    ];

    pub fn code(self) -> &'static str {
        match self {
            Region::Act => "act",
            Region::Nsw => "nsw",
            Region::Nt => "nt",
            Region::Qld => "qld",
            Region::Sa => "sa",
            Region::Tas => "tas",
            Region::Vic => "vic",
            Region::Wa => "wa",
        }
    }

    /// Feature id of this region in the ASGS Edition 3 STE collection.
    pub fn feature_id(self) -> u32 {
        match self {
            Region::Nsw => 1,
            Region::Vic => 2,
            Region::Qld => 3,
            Region::Sa => 4,
            Region::Wa => 5,
            Region::Tas => 6,
            Region::Nt => 7,
            Region::Act => 8,
        }
    }
}

impl FromStr for Region {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "act" => Ok(Region::Act),
            "nsw" => Ok(Region::Nsw),
            "nt" => Ok(Region::Nt),
            "qld" => Ok(Region::Qld),
            "sa" => Ok(Region::Sa),
            "tas" => Ok(Region::Tas),
            "vic" => Ok(Region::Vic),
            "wa" => Ok(Region::Wa),
            other => Err(PipelineError::Configuration(format!(
                "unknown region code '{other}' (expected one of act nsw nt qld sa tas vic wa)"
            ))),
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Resolved region geometry in the working CRS, with any buffer applied.
/// Regions act as a set union for filtering; their order is not meaningful.
#[derive(Debug, Clone)]
pub struct RegionExtent {
    pub regions: Vec<Region>,
    pub geometries: Vec<MultiPolygon<f64>>,
    pub epsg: u16,
    pub buffer: f64,
}

impl RegionExtent {
    /// Within predicate including the boundary.
    pub fn contains(&self, point: &Point<f64>) -> bool {
        self.geometries.iter().any(|g| g.intersects(point))
    }
}

const GEOJSON_QUERY: &[(&str, &str)] = &[
    ("_profile", "oai"),
    ("_mediatype", "application/geo+json"),
];

/// Fetches authoritative region polygons from the ASGS STE collection.
pub struct ExtentFetcher {
    http: HttpClient,
    base_url: String,
}

impl ExtentFetcher {
    pub fn new(http: HttpClient, base_url: String) -> Self {
        Self { http, base_url }
    }

    /// Resolve the requested regions into buffered working-CRS geometry.
    ///
    /// Caller input is validated before any fetch. A single region failing
    /// to fetch or parse is skipped with a warning; only all of them
    /// failing is fatal.
    #[instrument(skip(self, reprojector), fields(regions = regions.len(), buffer))]
    pub async fn resolve(
        &self,
        regions: &[Region],
        buffer: f64,
        reprojector: &Reprojector,
    ) -> Result<RegionExtent, PipelineError> {
        if regions.is_empty() {
            return Err(PipelineError::Configuration(
                "no region codes selected".to_string(),
            ));
        }
        if buffer < 0.0 {
            return Err(PipelineError::Configuration(format!(
                "buffer distance must be non-negative, got {buffer}"
            )));
        }
        if reprojector.from_epsg() != WGS84_EPSG {
            return Err(PipelineError::Configuration(format!(
                "region polygons are served in EPSG:{WGS84_EPSG}; reprojector starts at EPSG:{}",
                reprojector.from_epsg()
            )));
        }

        let mut resolved = Vec::new();
        let mut geometries = Vec::new();
        for &region in regions {
            let url = format!(
                "{}/{}",
                self.base_url.trim_end_matches('/'),
                region.feature_id()
            );
            let bytes = match self.http.get_optional(&url, GEOJSON_QUERY, None).await {
                FetchOutcome::Success(bytes) => bytes,
                FetchOutcome::Unavailable(reason) => {
                    warn!(region = %region, %reason, "region extent fetch failed, skipping");
                    continue;
                }
            };
            let geometry = match parse_region_geometry(&bytes) {
                Some(geometry) => geometry,
                None => {
                    warn!(region = %region, "region payload was not polygon GeoJSON, skipping");
                    continue;
                }
            };

            let mut projected = reprojector.transform_multi_polygon(&geometry)?;
            if buffer > 0.0 {
                projected = geo_buffer::buffer_multi_polygon(&projected, buffer);
            }
            info!(region = %region, polygons = projected.0.len(), "resolved region extent");
            resolved.push(region);
            geometries.push(projected);
        }

        if geometries.is_empty() {
            return Err(PipelineError::DataUnavailable(
                "none of the requested region extents could be resolved".to_string(),
            ));
        }
        Ok(RegionExtent {
            regions: resolved,
            geometries,
            epsg: reprojector.to_epsg(),
            buffer,
        })
    }
}

/// Pull a multipolygon out of whichever GeoJSON container the source used.
/// Anything else (or unparsable bytes) is `None`; the caller treats that
/// like a failed fetch.
fn parse_region_geometry(bytes: &[u8]) -> Option<MultiPolygon<f64>> {
    let text = std::str::from_utf8(bytes).ok()?;
    let geojson = text.parse::<GeoJson>().ok()?;
    let value = match geojson {
        GeoJson::Feature(feature) => feature.geometry?.value,
        GeoJson::Geometry(geometry) => geometry.value,
        GeoJson::FeatureCollection(collection) => {
            collection.features.into_iter().next()?.geometry?.value
        }
    };
    match value {
        value @ geojson::Value::MultiPolygon(_) => MultiPolygon::try_from(value).ok(),
        value @ geojson::Value::Polygon(_) => {
            Polygon::try_from(value).ok().map(|p| MultiPolygon(vec![p]))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::Area;
    use std::time::Duration;

    const UNIT_SQUARE: &str =
        r#"{"type": "MultiPolygon", "coordinates": [[[[0, 0], [1, 0], [1, 1], [0, 1], [0, 0]]]]}"#;

    fn identity() -> Reprojector {
        Reprojector::new(WGS84_EPSG, WGS84_EPSG).unwrap()
    }

    fn fetcher(base_url: String) -> ExtentFetcher {
        ExtentFetcher::new(HttpClient::new(Duration::from_secs(10)), base_url)
    }

    #[test]
    fn unknown_region_code_is_a_configuration_error() {
        let result = Region::from_str("xx");
        assert!(matches!(result, Err(PipelineError::Configuration(_))));
    }

    #[test]
    fn region_codes_map_to_asgs_feature_ids() {
        assert_eq!(Region::Nsw.feature_id(), 1);
        assert_eq!(Region::Vic.feature_id(), 2);
        assert_eq!(Region::Tas.feature_id(), 6);
        assert_eq!(Region::Act.feature_id(), 8);
        for region in Region::ALL {
            assert_eq!(region, Region::from_str(region.code()).unwrap());
        }
    }

    #[test]
    fn parses_bare_and_feature_wrapped_geometry() {
        assert!(parse_region_geometry(UNIT_SQUARE.as_bytes()).is_some());

        let feature = format!(
            r#"{{"type": "Feature", "properties": {{}}, "geometry": {UNIT_SQUARE}}}"#
        );
        assert!(parse_region_geometry(feature.as_bytes()).is_some());

        assert!(parse_region_geometry(b"<html>error</html>").is_none());
        assert!(
            parse_region_geometry(br#"{"type": "Point", "coordinates": [0, 0]}"#).is_none()
        );
    }

    #[tokio::test]
    async fn empty_selection_fails_before_any_fetch() {
        // Unroutable base URL: validation must reject before a request is built.
        let fetcher = fetcher("http://127.0.0.1:1".to_string());
        let result = fetcher.resolve(&[], 0.0, &identity()).await;
        assert!(matches!(result, Err(PipelineError::Configuration(_))));
    }

    #[tokio::test]
    async fn negative_buffer_fails_before_any_fetch() {
        let fetcher = fetcher("http://127.0.0.1:1".to_string());
        let result = fetcher.resolve(&[Region::Tas], -1.0, &identity()).await;
        assert!(matches!(result, Err(PipelineError::Configuration(_))));
    }

    #[tokio::test]
    async fn one_failed_region_is_skipped() {
        let mut server = mockito::Server::new_async().await;
        let ok = server
            .mock("GET", "/items/6")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(UNIT_SQUARE)
            .create_async()
            .await;
        let missing = server
            .mock("GET", "/items/2")
            .match_query(mockito::Matcher::Any)
            .with_status(404)
            .create_async()
            .await;

        let fetcher = fetcher(server.url() + "/items");
        let extent = fetcher
            .resolve(&[Region::Tas, Region::Vic], 0.0, &identity())
            .await
            .unwrap();

        assert_eq!(extent.regions, vec![Region::Tas]);
        assert_eq!(extent.geometries.len(), 1);
        ok.assert_async().await;
        missing.assert_async().await;
    }

    #[tokio::test]
    async fn all_regions_failing_is_data_unavailable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/items/6")
            .match_query(mockito::Matcher::Any)
            .with_status(500)
            .create_async()
            .await;

        let fetcher = fetcher(server.url() + "/items");
        let result = fetcher.resolve(&[Region::Tas], 0.0, &identity()).await;
        assert!(matches!(result, Err(PipelineError::DataUnavailable(_))));
    }

    #[tokio::test]
    async fn buffer_grows_the_extent() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/items/6")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(UNIT_SQUARE)
            .expect(2)
            .create_async()
            .await;

        let fetcher = fetcher(server.url() + "/items");
        let plain = fetcher
            .resolve(&[Region::Tas], 0.0, &identity())
            .await
            .unwrap();
        let buffered = fetcher
            .resolve(&[Region::Tas], 0.1, &identity())
            .await
            .unwrap();

        let plain_area: f64 = plain.geometries[0].unsigned_area();
        let buffered_area: f64 = buffered.geometries[0].unsigned_area();
        assert!(buffered_area > plain_area);
        // A buffered extent contains points just outside the original.
        assert!(buffered.contains(&Point::new(-0.05, 0.5)));
        assert!(!plain.contains(&Point::new(-0.05, 0.5)));
    }

    #[test]
    fn contains_includes_the_boundary() {
        let geometry = parse_region_geometry(UNIT_SQUARE.as_bytes()).unwrap();
        let extent = RegionExtent {
            regions: vec![Region::Tas],
            geometries: vec![geometry],
            epsg: WGS84_EPSG,
            buffer: 0.0,
        };
        assert!(extent.contains(&Point::new(0.5, 0.5)));
        assert!(extent.contains(&Point::new(0.0, 0.5)));
        assert!(!extent.contains(&Point::new(1.5, 0.5)));
    }
}
