//! Tunables for the track simulator
//!
//! The defaults reproduce the reference yard: six tracks, a nine-entry train
//! catalog and one random change every three seconds.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::clock::shift;
use super::error::TrackError;
use super::types::{Track, TrackId, TrackStatus};

/// Default period between two random changes
pub const DEFAULT_TICK_PERIOD: Duration = Duration::from_secs(3);

/// Default number of changes kept in the history
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Trains the simulator picks from when a track becomes occupied
pub const DEFAULT_TRAIN_CATALOG: [&str; 9] = [
    "Rame-A", "Rame-B", "Rame-C", "Rame-D", "Rame-E", "Rame-F", "TGV-2841", "IC-1523", "TER-9247",
];

/// Initial state of one track
///
/// The seeded timestamp is `now - age`, so a reset reproduces the same
/// relative ages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackSeed {
    pub id: TrackId,
    pub status: TrackStatus,
    pub train_id: Option<String>,
    pub age: Option<Duration>,
}

impl TrackSeed {
    pub fn free(id: u32) -> Self {
        Self {
            id: TrackId(id),
            status: TrackStatus::Free,
            train_id: None,
            age: None,
        }
    }

    pub fn with_train(id: u32, status: TrackStatus, train_id: &str, age: Duration) -> Self {
        Self {
            id: TrackId(id),
            status,
            train_id: Some(train_id.to_string()),
            age: Some(age),
        }
    }

    fn to_track(&self, now: DateTime<Utc>) -> Track {
        Track {
            id: self.id,
            status: self.status,
            train_id: self.train_id.clone(),
            timestamp: self.age.map(|age| shift(now, age, false)),
        }
    }
}

/// The reference six-track yard
pub fn default_seed() -> Vec<TrackSeed> {
    vec![
        TrackSeed::with_train(1, TrackStatus::Occupied, "Rame-A", Duration::ZERO),
        TrackSeed::free(2),
        TrackSeed::with_train(3, TrackStatus::Occupied, "Rame-B", Duration::from_secs(3600)),
        TrackSeed::free(4),
        TrackSeed::with_train(5, TrackStatus::Anomaly, "Rame-C", Duration::from_secs(7200)),
        TrackSeed::with_train(6, TrackStatus::Occupied, "Rame-D", Duration::from_secs(1800)),
    ]
}

/// Configuration of a `TrackSimulator`
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Period between two random changes while someone is subscribed
    pub tick_period: Duration,
    pub seed_tracks: Vec<TrackSeed>,
    pub train_catalog: Vec<String>,
    /// Maximum number of changes kept in the history
    pub history_capacity: usize,
    /// Seed for reproducible runs; the thread RNG is used when absent
    pub rng_seed: Option<u64>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            tick_period: DEFAULT_TICK_PERIOD,
            seed_tracks: default_seed(),
            train_catalog: DEFAULT_TRAIN_CATALOG.iter().map(|s| s.to_string()).collect(),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            rng_seed: None,
        }
    }
}

impl SimulatorConfig {
    pub fn with_tick_period(mut self, period: Duration) -> Self {
        self.tick_period = period;
        self
    }

    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Check the seed and catalog before a simulator is built from them
    ///
    /// Track ids must be exactly `1..=n` for `n` seeded tracks, in any order.
    pub fn validate(&self) -> Result<(), TrackError> {
        if self.tick_period.is_zero() {
            return Err(TrackError::InvalidConfig("tick period must be positive".into()));
        }
        if self.seed_tracks.is_empty() {
            return Err(TrackError::InvalidConfig("at least one track is required".into()));
        }
        if self.train_catalog.is_empty() {
            return Err(TrackError::InvalidConfig("train catalog is empty".into()));
        }

        let count = self.seed_tracks.len();
        let mut seen = HashSet::new();
        for seed in &self.seed_tracks {
            if seed.id.0 == 0 || seed.id.0 as usize > count {
                return Err(TrackError::InvalidConfig(format!(
                    "track id {} is outside 1..={}",
                    seed.id, count
                )));
            }
            if !seen.insert(seed.id) {
                return Err(TrackError::InvalidConfig(format!("duplicate track id {}", seed.id)));
            }
            let expect_present = !seed.status.is_free();
            if seed.train_id.is_some() != expect_present || seed.age.is_some() != expect_present {
                return Err(TrackError::InvalidConfig(format!(
                    "track {} is {} but train/timestamp presence does not match",
                    seed.id, seed.status
                )));
            }
        }
        Ok(())
    }

    /// Build the live track list from the seed, relative to `now`, ordered by id
    pub fn seed_tracks_at(&self, now: DateTime<Utc>) -> Vec<Track> {
        let mut tracks: Vec<Track> = self.seed_tracks.iter().map(|seed| seed.to_track(now)).collect();
        tracks.sort_by_key(|track| track.id);
        tracks
    }
}
