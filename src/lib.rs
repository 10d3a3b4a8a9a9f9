pub mod config;
pub mod crs;
pub mod error;
pub mod extent;
pub mod http;
pub mod output;
pub mod page_scrape;
pub mod pipeline;
pub mod rainfall;
pub mod spatial;
pub mod station_list;
