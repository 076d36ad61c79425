//! Background jobs.

pub mod pool_metrics;
pub mod scheduler;
pub mod stale_trips;

pub use pool_metrics::PoolMetricsJob;
pub use scheduler::{Job, JobFrequency, JobScheduler};
pub use stale_trips::StaleTripsJob;
