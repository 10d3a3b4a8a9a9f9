use std::env;

/// Pipeline configuration with hard defaults, overridable from the
/// environment. Caller-facing run parameters (region selection, buffer,
/// output directory) live in `pipeline::RunOptions` instead.
#[derive(Debug, Clone)]
pub struct Config {
    /// Fixed-width station listing endpoint.
    pub station_list_url: String,
    /// ASGS STE collection base; the feature id is appended per region.
    pub extent_base_url: String,
    /// Monthly weather-data endpoint, parameterized per station.
    pub rainfall_url: String,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
    /// EPSG code of the working (projected) CRS. Buffer distances are in
    /// this CRS's units.
    pub working_epsg: u16,
    /// Number of non-data trailer lines at the end of the station listing.
    /// The upstream postamble has changed length before; keep it tunable.
    pub trailer_lines: usize,
    /// Parallel per-station rainfall fetches (1 = sequential).
    pub fetch_concurrency: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            station_list_url: "https://reg.bom.gov.au/climate/data/lists_by_element/stations.txt"
                .to_string(),
            extent_base_url: "https://asgs.linked.fsdf.org.au/dataset/asgsed3/collections/STE/items"
                .to_string(),
            rainfall_url: "http://www.bom.gov.au/jsp/ncc/cdio/weatherData/av".to_string(),
            request_timeout_secs: 10,
            // GDA2020 / MGA zone 55, metres
            working_epsg: 7855,
            trailer_lines: 6,
            fetch_concurrency: 1,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Config::default();
        Config {
            station_list_url: env::var("BOM_STATION_LIST_URL")
                .unwrap_or(defaults.station_list_url),
            extent_base_url: env::var("BOM_EXTENT_BASE_URL").unwrap_or(defaults.extent_base_url),
            rainfall_url: env::var("BOM_RAINFALL_URL").unwrap_or(defaults.rainfall_url),
            request_timeout_secs: env_parsed("BOM_REQUEST_TIMEOUT_SECS")
                .unwrap_or(defaults.request_timeout_secs),
            working_epsg: env_parsed("BOM_WORKING_EPSG").unwrap_or(defaults.working_epsg),
            trailer_lines: env_parsed("BOM_TRAILER_LINES").unwrap_or(defaults.trailer_lines),
            fetch_concurrency: env_parsed("BOM_FETCH_CONCURRENCY")
                .unwrap_or(defaults.fetch_concurrency),
        }
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.request_timeout_secs, 10);
        assert_eq!(config.trailer_lines, 6);
        assert_eq!(config.fetch_concurrency, 1);
        assert!(config.station_list_url.ends_with("stations.txt"));
    }
}
