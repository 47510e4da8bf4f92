pub mod booking;
pub mod bus;
pub mod user;

pub use booking::{Booking, BookingDetails};
pub use bus::{Bus, BusStatus, OccupancyLevel, RouteStop};
pub use user::{User, UserSummary};
