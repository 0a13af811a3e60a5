pub mod aggregate;
pub mod audit;
pub mod config;
pub mod file_name;
pub mod metrics_server;
pub mod nem12;
pub mod observability;
pub mod pipeline;
pub mod scheduler;
pub mod sinks;
pub mod store;
pub mod window;

pub use pipeline::{ExportJob, ExportSettings, RunReport};
pub use scheduler::{DailyScheduler, SystemClock};
