//! Domain model definitions.

pub mod driver;
pub mod driver_pickup;
pub mod notification;
pub mod trip;
pub mod vehicle;

pub use driver::DriverProfile;
pub use driver_pickup::{DriverPickup, PickupStatus};
pub use notification::{Notification, NotificationCategory};
pub use trip::{Trip, TripKind, TripStatus};
pub use vehicle::Vehicle;
