pub mod metrics_collector;

pub use metrics_collector::FleetMetrics;
