pub mod interval_queries;

pub use interval_queries::fetch_site_readings;
