//! Application services.

pub mod dispatch;
pub mod events;
pub mod lifecycle;
pub mod notify;
pub mod offer;
pub mod presence;
pub mod spatial;
