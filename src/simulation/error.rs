//! Errors reported by the track simulator
//!
//! All of them are local and recoverable: the simulator state is left as it
//! was when one is returned.

use thiserror::Error;

use super::types::TrackId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackError {
    #[error("track {0} not found")]
    NotFound(TrackId),

    #[error("invalid status: {0}")]
    InvalidStatus(String),

    #[error("invalid movement: {0}")]
    InvalidMovement(String),

    #[error("track {0}: movement requires a train number")]
    MissingTrain(TrackId),

    #[error("invalid simulator configuration: {0}")]
    InvalidConfig(String),
}
