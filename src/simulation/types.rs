//! Core types for the yard simulation
//!
//! Tracks, their statuses and the change records produced when a track moves
//! from one status to another.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::TrackError;

/// A unique identifier for a track in the yard
/// This is a simple wrapper around a u32 for type safety
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(pub u32);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Occupancy status of a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackStatus {
    /// No train on the track
    Free,
    /// A train is standing on the track
    Occupied,
    /// Something abnormal was reported on the track
    Anomaly,
}

impl TrackStatus {
    /// Every status, in the order the simulator samples them
    pub const ALL: [TrackStatus; 3] = [TrackStatus::Free, TrackStatus::Occupied, TrackStatus::Anomaly];

    pub fn as_str(&self) -> &'static str {
        match self {
            TrackStatus::Free => "free",
            TrackStatus::Occupied => "occupied",
            TrackStatus::Anomaly => "anomaly",
        }
    }

    pub fn is_free(&self) -> bool {
        matches!(self, TrackStatus::Free)
    }
}

impl fmt::Display for TrackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for TrackStatus {
    type Err = TrackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TrackStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| TrackError::InvalidStatus(s.to_string()))
    }
}

/// A modeled rail segment and whatever currently occupies it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub id: TrackId,
    pub status: TrackStatus,
    /// Train standing on the track, absent when the track is free
    pub train_id: Option<String>,
    /// When the current status began, absent when the track is free
    pub timestamp: Option<DateTime<Utc>>,
}

impl Track {
    /// Create a free track
    pub fn free(id: TrackId) -> Self {
        Self {
            id,
            status: TrackStatus::Free,
            train_id: None,
            timestamp: None,
        }
    }

    /// Check that train id and timestamp are present exactly when the track is not free
    pub fn is_consistent(&self) -> bool {
        let expect_present = !self.status.is_free();
        self.train_id.is_some() == expect_present && self.timestamp.is_some() == expect_present
    }
}

/// A train movement reported for a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Movement {
    /// A train entered the track
    Arrival,
    /// The train left the track
    Departure,
    /// An abnormal condition was detected
    Anomaly,
}

impl Movement {
    /// Status a track ends up in after this movement
    pub fn resulting_status(&self) -> TrackStatus {
        match self {
            Movement::Arrival => TrackStatus::Occupied,
            Movement::Departure => TrackStatus::Free,
            Movement::Anomaly => TrackStatus::Anomaly,
        }
    }
}

impl FromStr for Movement {
    type Err = TrackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "arrival" => Ok(Movement::Arrival),
            "departure" => Ok(Movement::Departure),
            "anomaly" => Ok(Movement::Anomaly),
            other => Err(TrackError::InvalidMovement(other.to_string())),
        }
    }
}

/// What caused a track change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeSource {
    /// Random step of the periodic simulation
    Tick,
    /// Direct override through `set_track_state`
    Manual,
    /// Reported arrival, departure or anomaly
    Movement,
}

/// One recorded change of a track's status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackChange {
    pub track_id: TrackId,
    pub from: TrackStatus,
    pub to: TrackStatus,
    pub train_id: Option<String>,
    pub at: DateTime<Utc>,
    pub source: ChangeSource,
}

/// Status counts across the yard
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct YardSummary {
    pub free: usize,
    pub occupied: usize,
    pub anomaly: usize,
    pub total: usize,
}

impl YardSummary {
    pub fn from_tracks<'a>(tracks: impl IntoIterator<Item = &'a Track>) -> Self {
        let mut summary = YardSummary::default();
        for track in tracks {
            summary.total += 1;
            match track.status {
                TrackStatus::Free => summary.free += 1,
                TrackStatus::Occupied => summary.occupied += 1,
                TrackStatus::Anomaly => summary.anomaly += 1,
            }
        }
        summary
    }
}

impl fmt::Display for YardSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tracks: {} | Free: {} | Occupied: {} | Anomaly: {}",
            self.total, self.free, self.occupied, self.anomaly
        )
    }
}
