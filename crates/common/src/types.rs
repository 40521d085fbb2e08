use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a showtime.
///
/// Showtimes are owned by the catalog; the reservation core only ever
/// references them by this id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShowtimeId(Uuid);

impl ShowtimeId {
    /// Creates a new random showtime ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a showtime ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ShowtimeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ShowtimeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for ShowtimeId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<ShowtimeId> for Uuid {
    fn from(id: ShowtimeId) -> Self {
        id.0
    }
}

/// Unique identifier for a reservation.
///
/// Doubles as the idempotency key for the whole purchase saga: the payment
/// intent, every confirm call, and client retries are all keyed by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReservationId(Uuid);

impl ReservationId {
    /// Creates a new random reservation ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a reservation ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ReservationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ReservationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for ReservationId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<ReservationId> for Uuid {
    fn from(id: ReservationId) -> Self {
        id.0
    }
}

/// Record version used for optimistic concurrency on state transitions.
///
/// A freshly created record is at version 1; every successful
/// compare-and-transition bumps it by one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Creates a new version from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the version of a newly created record.
    pub fn first() -> Self {
        Self(1)
    }

    /// Returns the next version.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw version value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<Version> for i64 {
    fn from(version: Version) -> Self {
        version.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        assert_ne!(ShowtimeId::new(), ShowtimeId::new());
        assert_ne!(ReservationId::new(), ReservationId::new());
    }

    #[test]
    fn reservation_id_from_uuid_preserves_value() {
        let uuid = Uuid::new_v4();
        let id = ReservationId::from_uuid(uuid);
        assert_eq!(id.as_uuid(), uuid);
        assert_eq!(id.to_string(), uuid.to_string());
    }

    #[test]
    fn showtime_id_serializes_as_bare_uuid() {
        let uuid = Uuid::new_v4();
        let json = serde_json::to_string(&ShowtimeId::from_uuid(uuid)).unwrap();
        assert_eq!(json, format!("\"{uuid}\""));
    }

    #[test]
    fn version_starts_at_one_and_increments() {
        assert_eq!(Version::first().as_i64(), 1);
        assert_eq!(Version::first().next(), Version::new(2));
        assert!(Version::new(1) < Version::new(2));
    }
}
