//! Reporting engine statistics.
pub mod http_server;
pub mod logger;
pub mod open_metric;
pub mod registry;
pub mod workers;

pub use logger::Logger;
pub use open_metric::{Measurement, MeasurementType, Metric, OpenMetric};
pub use registry::Registry;
pub use workers::Workers;
