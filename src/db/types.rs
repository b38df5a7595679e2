//! Domain entities as seen by the core. The storage schema may carry more
//! attributes; only the ones the core reads or writes are modelled.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Live status of a trip. Canonical casing is SCREAMING_SNAKE_CASE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LiveStatus {
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
}

impl LiveStatus {
    pub const CANONICAL: &'static [&'static str] =
        &["SCHEDULED", "IN_PROGRESS", "COMPLETED", "CANCELLED"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "SCHEDULED",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match crate::normalize::canonical_enum(s, Self::CANONICAL)? {
            "SCHEDULED" => Some(Self::Scheduled),
            "IN_PROGRESS" => Some(Self::InProgress),
            "COMPLETED" => Some(Self::Completed),
            "CANCELLED" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VehicleType {
    Bus,
    Cab,
}

impl VehicleType {
    pub const CANONICAL: &'static [&'static str] = &["Bus", "Cab"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bus => "Bus",
            Self::Cab => "Cab",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match crate::normalize::canonical_enum(s, Self::CANONICAL)? {
            "Bus" => Some(Self::Bus),
            "Cab" => Some(Self::Cab),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleStatus {
    Available,
    Deployed,
    Maintenance,
}

impl VehicleStatus {
    pub const CANONICAL: &'static [&'static str] = &["available", "deployed", "maintenance"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Deployed => "deployed",
            Self::Maintenance => "maintenance",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match crate::normalize::canonical_enum(s, Self::CANONICAL)? {
            "available" => Some(Self::Available),
            "deployed" => Some(Self::Deployed),
            "maintenance" => Some(Self::Maintenance),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverStatus {
    Available,
    OnTrip,
    OffDuty,
}

impl DriverStatus {
    pub const CANONICAL: &'static [&'static str] = &["available", "on_trip", "off_duty"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::OnTrip => "on_trip",
            Self::OffDuty => "off_duty",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match crate::normalize::canonical_enum(s, Self::CANONICAL)? {
            "available" => Some(Self::Available),
            "on_trip" => Some(Self::OnTrip),
            "off_duty" => Some(Self::OffDuty),
            _ => None,
        }
    }
}

/// Route direction along its path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub const CANONICAL: &'static [&'static str] = &["up", "down"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match crate::normalize::canonical_enum(s, Self::CANONICAL)? {
            "up" => Some(Self::Up),
            "down" => Some(Self::Down),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Confirmed => "CONFIRMED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match crate::normalize::canonical_enum(s, &["CONFIRMED", "CANCELLED"])? {
            "CONFIRMED" => Some(Self::Confirmed),
            "CANCELLED" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// A scheduled instance of a route on a date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trip {
    pub trip_id: i64,
    pub display_name: String,
    pub trip_date: NaiveDate,
    pub scheduled_time: NaiveTime,
    pub route_id: i64,
    pub live_status: LiveStatus,
}

/// The binding of a vehicle and/or driver to a trip. At most one per trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    pub deployment_id: i64,
    pub trip_id: i64,
    pub vehicle_id: Option<i64>,
    pub driver_id: Option<i64>,
    pub deployed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub booking_id: i64,
    pub trip_id: i64,
    pub status: BookingStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    pub vehicle_id: i64,
    pub registration_number: String,
    pub vehicle_type: VehicleType,
    pub capacity: i64,
    pub status: VehicleStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Driver {
    pub driver_id: i64,
    pub name: String,
    pub status: DriverStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stop {
    pub stop_id: i64,
    pub name: String,
    pub code: Option<String>,
    pub landmark: Option<String>,
    pub zone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Path {
    pub path_id: i64,
    pub name: String,
}

/// Ordered membership of a stop on a path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathStop {
    pub path_id: i64,
    pub stop_id: i64,
    pub position: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub route_id: i64,
    pub name: String,
    pub path_id: i64,
    pub direction: Direction,
    pub shift_time: NaiveTime,
}

/// Append-only record of a mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub audit_id: i64,
    pub user_id: i64,
    pub action: String,
    pub entity_type: String,
    pub entity_id: i64,
    pub before: Option<Value>,
    pub after: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

/// A trip with its deployment summary and booking count, as returned by
/// `get_trip_status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripStatus {
    pub trip: Trip,
    pub deployment: Option<Deployment>,
    pub vehicle: Option<Vehicle>,
    pub driver: Option<Driver>,
    pub booking_count: i64,
}

/// A compact verified entity summary used in ambiguity lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripCandidate {
    pub trip_id: i64,
    pub display_name: String,
    pub trip_date: NaiveDate,
    pub scheduled_time: NaiveTime,
}

impl TripCandidate {
    pub fn label(&self) -> String {
        format!(
            "{} ({} {})",
            self.display_name,
            self.trip_date.format("%Y-%m-%d"),
            self.scheduled_time.format("%H:%M")
        )
    }
}

/// Typed parameters for trip creation (wizard completion and duplication).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTrip {
    pub display_name: String,
    pub trip_date: NaiveDate,
    pub scheduled_time: NaiveTime,
    pub route_id: i64,
    pub vehicle_id: Option<i64>,
    pub driver_id: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_status_parse_normalises_casing() {
        assert_eq!(LiveStatus::parse("scheduled"), Some(LiveStatus::Scheduled));
        assert_eq!(LiveStatus::parse("in progress"), Some(LiveStatus::InProgress));
        assert_eq!(LiveStatus::parse("IN_PROGRESS"), Some(LiveStatus::InProgress));
        assert_eq!(LiveStatus::parse("paused"), None);
    }

    #[test]
    fn test_vehicle_type_canonical_casing() {
        assert_eq!(VehicleType::parse("bus").map(|v| v.as_str()), Some("Bus"));
        assert_eq!(VehicleType::parse("CAB").map(|v| v.as_str()), Some("Cab"));
    }

    #[test]
    fn test_direction_parse() {
        assert_eq!(Direction::parse("UP"), Some(Direction::Up));
        assert_eq!(Direction::parse("sideways"), None);
    }

    #[test]
    fn test_candidate_label() {
        let candidate = TripCandidate {
            trip_id: 5,
            display_name: "Path-3 - 07:30".into(),
            trip_date: NaiveDate::from_ymd_opt(2026, 8, 1).unwrap(),
            scheduled_time: NaiveTime::from_hms_opt(7, 30, 0).unwrap(),
        };
        assert_eq!(candidate.label(), "Path-3 - 07:30 (2026-08-01 07:30)");
    }
}
