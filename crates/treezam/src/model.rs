//! Core domain types for treezam.
//!
//! These records are shared by storage, the gamification engine and the HTTP
//! API. Their JSON form uses camelCase field names, which is what the mobile
//! client reads and writes.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A WGS84 coordinate.
///
/// Serialized as a GeoJSON point, `{"type":"Point","coordinates":[lon,lat]}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(into = "GeoJsonPoint", try_from = "GeoJsonPoint")]
pub struct GeoPoint {
    /// Degrees north, in `[-90, 90]`.
    pub latitude: f64,
    /// Degrees east, in `[-180, 180]`.
    pub longitude: f64,
}

impl GeoPoint {
    /// Create a validated point.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Invalid`] if either coordinate is out of range.
    pub fn new(latitude: f64, longitude: f64) -> Result<Self> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(Error::invalid(format!("latitude out of range: {latitude}")));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(Error::invalid(format!(
                "longitude out of range: {longitude}"
            )));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    /// Build a point from GeoJSON `[longitude, latitude]` order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Invalid`] if either coordinate is out of range.
    pub fn from_lon_lat(coordinates: [f64; 2]) -> Result<Self> {
        Self::new(coordinates[1], coordinates[0])
    }

    /// The point in GeoJSON `[longitude, latitude]` order.
    #[must_use]
    pub fn lon_lat(&self) -> [f64; 2] {
        [self.longitude, self.latitude]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeoJsonPoint {
    #[serde(rename = "type", default = "point_type")]
    kind: String,
    coordinates: [f64; 2],
}

fn point_type() -> String {
    "Point".to_string()
}

impl From<GeoPoint> for GeoJsonPoint {
    fn from(point: GeoPoint) -> Self {
        Self {
            kind: point_type(),
            coordinates: point.lon_lat(),
        }
    }
}

impl TryFrom<GeoJsonPoint> for GeoPoint {
    type Error = Error;

    fn try_from(value: GeoJsonPoint) -> Result<Self> {
        if value.kind != "Point" {
            return Err(Error::invalid(format!(
                "unsupported geometry type: {}",
                value.kind
            )));
        }
        Self::from_lon_lat(value.coordinates)
    }
}

/// A registered user.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Row id.
    pub id: i64,
    /// Unique display name.
    pub username: String,
    /// Unique, lowercased email address.
    pub email: String,
    /// Argon2 PHC string. Never serialized.
    #[serde(skip)]
    pub password_hash: String,
    /// Number of identifications recorded.
    pub total_trees_identified: i64,
    /// Number of distinct species identified.
    pub unique_species_count: i64,
    /// Accumulated experience points.
    pub experience: i64,
    /// Level derived from experience.
    pub level: i64,
    /// Achievement names earned from challenges.
    pub achievements: Vec<String>,
    /// Registration time.
    pub created_at: DateTime<Utc>,
}

impl User {
    /// The counters shown to the client after an identification.
    #[must_use]
    pub fn stats(&self) -> UserStats {
        UserStats {
            total_trees_identified: self.total_trees_identified,
            unique_species_count: self.unique_species_count,
            experience: self.experience,
            level: self.level,
        }
    }
}

/// Gamification counters of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
    /// Number of identifications recorded.
    pub total_trees_identified: i64,
    /// Number of distinct species identified.
    pub unique_species_count: i64,
    /// Accumulated experience points.
    pub experience: i64,
    /// Level derived from experience.
    pub level: i64,
}

/// A stored tree identification.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Identification {
    /// Row id.
    pub id: i64,
    /// Owner.
    pub user_id: i64,
    /// Public path of the uploaded photo.
    pub image_url: String,
    /// Predicted common name.
    pub species: String,
    /// Predicted scientific name.
    pub scientific_name: Option<String>,
    /// Prediction confidence in `[0, 1]`.
    pub confidence: Option<f64>,
    /// Where the photo was taken.
    pub location: GeoPoint,
    /// Street address reported by the client.
    pub address: Option<String>,
    /// City reported by the client.
    pub city: Option<String>,
    /// Country reported by the client.
    pub country: Option<String>,
    /// When the identification was recorded.
    pub identified_at: DateTime<Utc>,
    /// Free-form user notes.
    pub notes: Option<String>,
}

/// An identification that has not been stored yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewIdentification {
    /// Owner.
    pub user_id: i64,
    /// Public path of the uploaded photo.
    pub image_url: String,
    /// Predicted common name.
    pub species: String,
    /// Predicted scientific name.
    pub scientific_name: Option<String>,
    /// Prediction confidence in `[0, 1]`.
    pub confidence: Option<f64>,
    /// Where the photo was taken.
    pub location: GeoPoint,
    /// Street address reported by the client.
    pub address: Option<String>,
    /// City reported by the client.
    pub city: Option<String>,
    /// Country reported by the client.
    pub country: Option<String>,
    /// Free-form user notes.
    pub notes: Option<String>,
}

/// What a challenge measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeKind {
    /// Identifications within a radius of a point.
    Location,
    /// Distinct species identified today.
    Daily,
    /// Distinct species identified overall.
    SpeciesCount,
    /// Consecutive days with at least one identification, ending today.
    Streak,
}

impl fmt::Display for ChallengeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Location => write!(f, "location"),
            Self::Daily => write!(f, "daily"),
            Self::SpeciesCount => write!(f, "species_count"),
            Self::Streak => write!(f, "streak"),
        }
    }
}

impl FromStr for ChallengeKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "location" => Ok(Self::Location),
            "daily" => Ok(Self::Daily),
            "species_count" => Ok(Self::SpeciesCount),
            "streak" => Ok(Self::Streak),
            other => Err(Error::invalid(format!("unknown challenge type: {other}"))),
        }
    }
}

/// Target area of a location challenge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeLocation {
    /// City label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    /// Country label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    /// Center in `[longitude, latitude]` order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<[f64; 2]>,
    /// Radius in meters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius: Option<f64>,
}

impl ChallengeLocation {
    /// The center point, if coordinates are present and valid.
    #[must_use]
    pub fn center(&self) -> Option<GeoPoint> {
        self.coordinates
            .and_then(|coords| GeoPoint::from_lon_lat(coords).ok())
    }

    /// The radius, falling back to `default_radius`.
    #[must_use]
    pub fn radius_or(&self, default_radius: f64) -> f64 {
        self.radius
            .filter(|r| r.is_finite() && *r > 0.0)
            .unwrap_or(default_radius)
    }

    fn is_empty(&self) -> bool {
        self.city.is_none()
            && self.country.is_none()
            && self.coordinates.is_none()
            && self.radius.is_none()
    }
}

/// What completing a challenge grants.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reward {
    /// Experience points.
    #[serde(default)]
    pub experience: i64,
    /// Achievement name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub achievement: Option<String>,
}

/// A user's standing in a challenge.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    /// Participating user.
    pub user_id: i64,
    /// Username of the participant.
    pub username: String,
    /// Last computed progress.
    pub progress: i64,
    /// Whether the target was reached.
    pub completed: bool,
    /// When the target was reached.
    pub completed_at: Option<DateTime<Utc>>,
    /// Last progress refresh of a streak challenge.
    pub last_activity_date: Option<DateTime<Utc>>,
    /// When the user joined.
    pub joined_at: DateTime<Utc>,
}

/// A gamification goal.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    /// Row id.
    pub id: i64,
    /// Title.
    pub name: String,
    /// Description shown to users.
    pub description: String,
    /// What is measured.
    #[serde(rename = "type")]
    pub kind: ChallengeKind,
    /// Progress needed to complete.
    pub target_value: i64,
    /// Target area of location challenges.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<ChallengeLocation>,
    /// Start of the window.
    pub start_date: Option<DateTime<Utc>>,
    /// End of the window.
    pub end_date: Option<DateTime<Utc>>,
    /// Inactive challenges are hidden and frozen.
    pub is_active: bool,
    /// Completion reward.
    pub reward: Reward,
    /// Joined users.
    pub participants: Vec<Participant>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Challenge {
    /// Whether progress may change at `now`.
    #[must_use]
    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active
            && self.start_date.is_none_or(|start| start <= now)
            && !self.has_ended_at(now)
    }

    /// Whether the end date lies before `now`.
    #[must_use]
    pub fn has_ended_at(&self, now: DateTime<Utc>) -> bool {
        self.end_date.is_some_and(|end| end < now)
    }

    /// The entry for `user_id`, if they joined.
    #[must_use]
    pub fn participant(&self, user_id: i64) -> Option<&Participant> {
        self.participants.iter().find(|p| p.user_id == user_id)
    }
}

/// A challenge as submitted by a client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewChallenge {
    /// Title.
    pub name: String,
    /// Description shown to users.
    pub description: String,
    /// What is measured.
    #[serde(rename = "type")]
    pub kind: ChallengeKind,
    /// Progress needed to complete.
    pub target_value: i64,
    /// Target area of location challenges.
    #[serde(default)]
    pub location: Option<ChallengeLocation>,
    /// Start of the window.
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    /// End of the window.
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    /// Completion reward. Defaulted by the game rules when absent.
    #[serde(default)]
    pub reward: Option<Reward>,
}

impl NewChallenge {
    /// Check the challenge for consistency.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Invalid`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::invalid("Challenge name is required"));
        }
        if self.description.trim().is_empty() {
            return Err(Error::invalid("Challenge description is required"));
        }
        if self.target_value < 1 {
            return Err(Error::invalid("targetValue must be at least 1"));
        }
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if end < start {
                return Err(Error::invalid("endDate cannot be before startDate"));
            }
        }
        if let Some(reward) = &self.reward {
            if reward.experience < 0 {
                return Err(Error::invalid("reward experience cannot be negative"));
            }
        }

        let location = self.location.as_ref().filter(|l| !l.is_empty());
        if let Some(location) = location {
            if let Some(coords) = location.coordinates {
                GeoPoint::from_lon_lat(coords)?;
            }
            if let Some(radius) = location.radius {
                if !(radius.is_finite() && radius > 0.0) {
                    return Err(Error::invalid("location radius must be positive"));
                }
            }
        }

        if self.kind == ChallengeKind::Location
            && location.and_then(|l| l.coordinates).is_none()
        {
            return Err(Error::invalid(
                "Location challenges require location coordinates",
            ));
        }

        Ok(())
    }
}
