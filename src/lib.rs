//! Railway Yard Simulation Library
//!
//! Mock track telemetry for a railway yard dashboard: tracks change state at
//! random on a timer and subscribers receive snapshots of the whole yard.

pub mod simulation;
