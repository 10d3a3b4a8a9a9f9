use scraper::{Html, Selector};
use tracing::{instrument, warn};

use crate::http::{FetchOutcome, HttpClient, BROWSER_USER_AGENT};
use crate::rainfall::{RainfallObservation, RainfallSource};

/// Alternate acquisition strategy: scrape the rendered monthly-data table.
///
/// Useful when the zipped-archive endpoint is refusing downloads; the HTML
/// table carries the same year-by-month matrix without quality flags.
pub struct PageTableSource {
    http: HttpClient,
    url: String,
}

impl PageTableSource {
    pub fn new(http: HttpClient, url: String) -> Self {
        Self { http, url }
    }
}

impl RainfallSource for PageTableSource {
    #[instrument(skip(self))]
    async fn monthly_rainfall(&self, station_id: &str) -> Vec<RainfallObservation> {
        let query = [
            ("p_stn_num", station_id),
            ("p_c", "-1487270503"),
            ("p_nccObsCode", "139"),
            ("p_display_type", "dataFile"),
        ];
        match self
            .http
            .get_optional(&self.url, &query, Some(BROWSER_USER_AGENT))
            .await
        {
            FetchOutcome::Success(payload) => {
                parse_data_table(&String::from_utf8_lossy(&payload), station_id)
            }
            FetchOutcome::Unavailable(reason) => {
                warn!(station_id, %reason, "rainfall data page unavailable");
                Vec::new()
            }
        }
    }
}

/// Parse `table#dataTable` from the monthly-data page. Each plain row is a
/// year: a `th` with the year number, then one `td` per month. Rows carrying
/// a class attribute are summary rows (annual totals, graph controls) and
/// are skipped.
pub fn parse_data_table(html: &str, station_id: &str) -> Vec<RainfallObservation> {
    let table_selector = Selector::parse("table#dataTable").unwrap();
    let row_selector = Selector::parse("tr").unwrap();
    let year_selector = Selector::parse("th").unwrap();
    let cell_selector = Selector::parse("td").unwrap();

    let document = Html::parse_document(html);
    let table = match document.select(&table_selector).next() {
        Some(table) => table,
        None => {
            warn!(station_id, "no data table in rainfall page");
            return Vec::new();
        }
    };

    let mut observations = Vec::new();
    for row in table.select(&row_selector) {
        let class = row.value().attr("class").unwrap_or("");
        if !class.trim().is_empty() {
            continue;
        }

        let year_text = match row.select(&year_selector).next() {
            Some(th) => th.text().collect::<String>(),
            None => continue,
        };
        let year = match year_text.trim().parse::<i32>() {
            Ok(year) => year,
            Err(_) => continue,
        };

        for (index, cell) in row.select(&cell_selector).take(12).enumerate() {
            let text = cell.text().collect::<String>();
            let rainfall_mm = text.trim().parse::<f64>().ok();
            observations.push(RainfallObservation {
                station_id: station_id.to_string(),
                year,
                month: index as u32 + 1,
                rainfall_mm,
                quality: None,
            });
        }
    }
    observations
}
