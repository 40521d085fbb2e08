//! Shared identifier types for the ticket reservation system.

mod types;

pub use types::{ReservationId, ShowtimeId, Version};
