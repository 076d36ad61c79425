//! Domain services.

pub mod dispatch_events;
pub mod fare;

pub use dispatch_events::{AcceptOutcome, DispatchEventError, DispatchEvents};
pub use fare::{to_cents, FareBreakdown, FareSchedule};
