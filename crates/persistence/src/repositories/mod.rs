//! Repository implementations.

pub mod driver_pickup;
pub mod driver_profile;
pub mod notification;
pub mod trip;
pub mod user;
pub mod vehicle;

pub use driver_pickup::{DriverPickupRepository, NewDriverPickup};
pub use driver_profile::{DriverProfilePatch, DriverProfileRepository};
pub use notification::NotificationRepository;
pub use trip::{AssignOutcome, CompletionInput, NewTrip, TripAggregatesRow, TripRepository};
pub use user::UserRepository;
pub use vehicle::VehicleRepository;
