//! Railway yard track simulation
//!
//! This module holds the track simulator: the canonical list of tracks, the
//! random state changes applied to it on a timer and the observers that
//! receive a snapshot after every change. It has no display code and can be
//! driven from tests or the console.

mod clock;
mod config;
mod error;
mod history;
mod observers;
mod simulator;
mod ticker;
mod types;

// Re-export public types for external use
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    default_seed, SimulatorConfig, TrackSeed, DEFAULT_HISTORY_CAPACITY, DEFAULT_TICK_PERIOD,
    DEFAULT_TRAIN_CATALOG,
};
pub use error::TrackError;
pub use observers::{Observer, ObserverId};
pub use simulator::{Subscription, TrackSimulator};
pub use types::{ChangeSource, Movement, Track, TrackChange, TrackId, TrackStatus, YardSummary};
