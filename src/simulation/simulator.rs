//! The track simulator
//!
//! Owns the live track list, changes one track at random on every tick and
//! pushes a snapshot of the whole yard to its observers. Readers only ever
//! get copies of the tracks.

use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, ThreadId};

use chrono::{DateTime, Utc};
use log::{debug, error, info};
use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;

use super::clock::{Clock, SystemClock};
use super::config::SimulatorConfig;
use super::error::TrackError;
use super::history::ChangeHistory;
use super::observers::{lock_registry, notify_all, ObserverId, ObserverRegistry};
use super::ticker::Ticker;
use super::types::{ChangeSource, Movement, Track, TrackChange, TrackId, TrackStatus, YardSummary};

/// Mutable part of the simulator, guarded by a single lock
struct YardState {
    /// Ordered by ascending id
    tracks: Vec<Track>,
    /// Optional seeded RNG for reproducible simulations
    rng: Option<StdRng>,
    history: ChangeHistory,
}

impl YardState {
    /// Uniform index in `0..len`, using seeded RNG if available
    fn random_index(&mut self, len: usize) -> usize {
        match &mut self.rng {
            Some(rng) => rng.random_range(0..len),
            None => rand::rng().random_range(0..len),
        }
    }

    fn position(&self, id: TrackId) -> Result<usize, TrackError> {
        self.tracks
            .iter()
            .position(|track| track.id == id)
            .ok_or(TrackError::NotFound(id))
    }

    fn snapshot(&self) -> Vec<Track> {
        self.tracks.clone()
    }

    /// Set a track's status, train and timestamp and record the change
    fn apply(
        &mut self,
        index: usize,
        status: TrackStatus,
        train_id: Option<String>,
        now: DateTime<Utc>,
        source: ChangeSource,
    ) -> TrackChange {
        let track = &mut self.tracks[index];
        let from = track.status;
        track.status = status;
        track.train_id = train_id;
        track.timestamp = if status.is_free() { None } else { Some(now) };

        let change = TrackChange {
            track_id: track.id,
            from,
            to: status,
            train_id: track.train_id.clone(),
            at: now,
            source,
        };
        self.history.record(change.clone());
        change
    }
}

struct Shared {
    config: SimulatorConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<YardState>,
    observers: Mutex<ObserverRegistry>,
    ticker: Mutex<Option<Ticker>>,
    /// Serializes change + fan-out so observers see snapshots in order
    publish_gate: Mutex<()>,
    /// Thread currently delivering snapshots, if any
    fan_out_thread: Mutex<Option<ThreadId>>,
}

/// Clears the fan-out marker even if an observer unwinds past us
struct FanOutGuard<'a>(&'a Mutex<Option<ThreadId>>);

impl<'a> FanOutGuard<'a> {
    fn enter(slot: &'a Mutex<Option<ThreadId>>) -> Self {
        *lock(slot) = Some(thread::current().id());
        FanOutGuard(slot)
    }
}

impl Drop for FanOutGuard<'_> {
    fn drop(&mut self) {
        *lock(self.0) = None;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, YardState> {
        lock(&self.state)
    }

    fn in_fan_out(&self) -> bool {
        *lock(&self.fan_out_thread) == Some(thread::current().id())
    }

    /// Apply a change and push the resulting snapshot to every observer
    ///
    /// A change requested by an observer while it is being notified is applied
    /// but not pushed; observers see it with the next snapshot.
    fn publish<T, E>(
        &self,
        mutate: impl FnOnce(&mut YardState, DateTime<Utc>) -> Result<T, E>,
    ) -> Result<T, E> {
        if self.in_fan_out() {
            let result = mutate(&mut *self.lock_state(), self.clock.now());
            debug!("Change requested from inside an observer, not pushed");
            return result;
        }

        let _gate = lock(&self.publish_gate);
        self.publish_gated(mutate)
    }

    /// Body of `publish`; the caller holds `publish_gate`
    fn publish_gated<T, E>(
        &self,
        mutate: impl FnOnce(&mut YardState, DateTime<Utc>) -> Result<T, E>,
    ) -> Result<T, E> {
        let (result, snapshot) = {
            let mut state = self.lock_state();
            let result = mutate(&mut *state, self.clock.now())?;
            (result, state.snapshot())
        };

        let observers = lock_registry(&self.observers).handles();
        let _fan_out = FanOutGuard::enter(&self.fan_out_thread);
        notify_all(&observers, &snapshot);
        Ok(result)
    }

    fn random_change(
        &self,
        state: &mut YardState,
        now: DateTime<Utc>,
    ) -> Result<TrackChange, Infallible> {
        let catalog = &self.config.train_catalog;
        let index = state.random_index(state.tracks.len());
        let status = TrackStatus::ALL[state.random_index(TrackStatus::ALL.len())];
        let train_id = if status.is_free() {
            None
        } else {
            Some(catalog[state.random_index(catalog.len())].clone())
        };

        let change = state.apply(index, status, train_id, now, ChangeSource::Tick);
        info!(
            "Track {} state changed: {} -> {}",
            change.track_id, change.from, change.to
        );
        Ok(change)
    }

    fn tick(&self) -> TrackChange {
        match self.publish(|state, now| self.random_change(state, now)) {
            Ok(change) => change,
            Err(never) => match never {},
        }
    }

    /// Tick driven by the ticker thread; returns false once the ticker is cancelled
    fn scheduled_tick(&self, cancelled: &AtomicBool) -> bool {
        let _gate = lock(&self.publish_gate);
        if cancelled.load(Ordering::SeqCst) {
            return false;
        }
        match self.publish_gated(|state, now| self.random_change(state, now)) {
            Ok(_) => true,
            Err(never) => match never {},
        }
    }

    /// Drop an observer; removing the last one stops the ticker
    ///
    /// The ticker is cancelled rather than joined: this may run inside a
    /// fan-out that the ticker thread is waiting on.
    fn remove_observer(&self, id: ObserverId) {
        if !lock_registry(&self.observers).remove(id) {
            return;
        }

        let stopped = {
            let mut ticker = lock(&self.ticker);
            if lock_registry(&self.observers).is_empty() {
                ticker.take()
            } else {
                None
            }
        };
        if let Some(mut ticker) = stopped {
            ticker.cancel();
        }
    }
}

/// Handle returned by `TrackSimulator::subscribe`
///
/// Dropping the handle does not unsubscribe.
pub struct Subscription {
    id: ObserverId,
    shared: Weak<Shared>,
    active: AtomicBool,
}

impl Subscription {
    /// Stop delivering snapshots to this observer. Only the first call has an effect.
    ///
    /// Once this returns the observer is not called again, even by a fan-out
    /// already running on another thread. A call in progress is left to finish.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(shared) = self.shared.upgrade() {
            shared.remove_observer(self.id);
        }
    }

    pub fn id(&self) -> ObserverId {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

/// Simulated railway yard
///
/// Each instance is independent; several can run side by side.
pub struct TrackSimulator {
    shared: Arc<Shared>,
}

impl Default for TrackSimulator {
    fn default() -> Self {
        Self::from_parts(SimulatorConfig::default(), Arc::new(SystemClock))
    }
}

impl TrackSimulator {
    /// Create a simulator using wall-clock time
    pub fn new(config: SimulatorConfig) -> Result<Self, TrackError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a simulator reading "now" from `clock`
    pub fn with_clock(config: SimulatorConfig, clock: Arc<dyn Clock>) -> Result<Self, TrackError> {
        config.validate()?;
        Ok(Self::from_parts(config, clock))
    }

    fn from_parts(config: SimulatorConfig, clock: Arc<dyn Clock>) -> Self {
        let tracks = config.seed_tracks_at(clock.now());
        let state = YardState {
            tracks,
            rng: config.rng_seed.map(StdRng::seed_from_u64),
            history: ChangeHistory::new(config.history_capacity),
        };

        Self {
            shared: Arc::new(Shared {
                config,
                clock,
                state: Mutex::new(state),
                observers: Mutex::new(ObserverRegistry::default()),
                ticker: Mutex::new(None),
                publish_gate: Mutex::new(()),
                fan_out_thread: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.shared.config
    }

    /// Copy of every track, ordered by ascending id
    pub fn snapshot(&self) -> Vec<Track> {
        self.shared.lock_state().snapshot()
    }

    /// Change one random track to a random status and notify observers
    ///
    /// The chosen status may equal the current one; observers are notified
    /// all the same. Called from inside an observer callback, the change is
    /// applied but not pushed: observers see it in the next snapshot they
    /// receive.
    pub fn tick(&self) -> TrackChange {
        self.shared.tick()
    }

    /// Register `observer` to receive a snapshot after every change
    ///
    /// The first subscription starts the periodic ticker.
    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: FnMut(&[Track]) + Send + 'static,
    {
        let id = lock_registry(&self.shared.observers).add(Box::new(observer));
        self.start_ticker_if_needed();
        Subscription {
            id,
            shared: Arc::downgrade(&self.shared),
            active: AtomicBool::new(true),
        }
    }

    fn start_ticker_if_needed(&self) {
        let mut ticker = lock(&self.shared.ticker);
        if ticker.as_ref().is_some_and(Ticker::is_running) {
            return;
        }
        if lock_registry(&self.shared.observers).is_empty() {
            return;
        }

        let target = Arc::downgrade(&self.shared);
        let started = Ticker::start(self.shared.config.tick_period, move |cancelled| {
            match target.upgrade() {
                Some(shared) => shared.scheduled_tick(cancelled),
                None => false,
            }
        });
        match started {
            Ok(started) => *ticker = Some(started),
            Err(err) => error!("Failed to start simulation ticker: {}", err),
        }
    }

    /// Whether the periodic ticker is currently active
    pub fn is_running(&self) -> bool {
        lock(&self.shared.ticker)
            .as_ref()
            .is_some_and(Ticker::is_running)
    }

    pub fn observer_count(&self) -> usize {
        lock_registry(&self.shared.observers).len()
    }

    /// Manually set a track's state
    ///
    /// The train id is stored exactly as given, whatever the status. Observers
    /// are not notified.
    pub fn set_track_state(
        &self,
        id: TrackId,
        status: &str,
        train_id: Option<&str>,
    ) -> Result<Track, TrackError> {
        let result = {
            let state = self.shared.lock_state();
            state.position(id).and_then(|_| status.parse::<TrackStatus>())
        };
        match result {
            Ok(status) => self.set_track_status(id, status, train_id),
            Err(err) => {
                error!("Rejected manual override of track {}: {}", id, err);
                Err(err)
            }
        }
    }

    /// Typed form of `set_track_state`
    pub fn set_track_status(
        &self,
        id: TrackId,
        status: TrackStatus,
        train_id: Option<&str>,
    ) -> Result<Track, TrackError> {
        let now = self.shared.clock.now();
        let mut state = self.shared.lock_state();
        let index = match state.position(id) {
            Ok(index) => index,
            Err(err) => {
                error!("Rejected manual override of track {}: {}", id, err);
                return Err(err);
            }
        };

        state.apply(index, status, train_id.map(str::to_string), now, ChangeSource::Manual);
        let track = state.tracks[index].clone();
        info!("Track {} manually set to {}", id, status);
        Ok(track)
    }

    /// Record a reported arrival, departure or anomaly and notify observers
    ///
    /// A departure always clears the train; the other movements need one.
    /// Called from inside an observer callback, the movement is applied but not
    /// pushed: observers see it in the next snapshot they receive.
    pub fn apply_movement(
        &self,
        id: TrackId,
        movement: Movement,
        train_number: Option<&str>,
    ) -> Result<Track, TrackError> {
        let result = self.shared.publish(|state, now| {
            let index = state.position(id)?;
            let status = movement.resulting_status();
            let train_id = if status.is_free() {
                None
            } else {
                Some(train_number.ok_or(TrackError::MissingTrain(id))?.to_string())
            };

            state.apply(index, status, train_id, now, ChangeSource::Movement);
            Ok::<_, TrackError>(state.tracks[index].clone())
        });

        match &result {
            Ok(track) => info!("Track {} {:?} recorded, now {}", id, movement, track.status),
            Err(err) => error!("Rejected movement on track {}: {}", id, err),
        }
        result
    }

    /// Put every track back to its seeded state and clear the history
    ///
    /// Observers are not notified.
    pub fn reset(&self) {
        let now = self.shared.clock.now();
        let mut state = self.shared.lock_state();
        state.tracks = self.shared.config.seed_tracks_at(now);
        state.history.clear();
        info!("Tracks state reset to initial values");
    }

    /// Recorded changes, oldest first
    pub fn history(&self) -> Vec<TrackChange> {
        self.shared.lock_state().history.entries()
    }

    pub fn summary(&self) -> YardSummary {
        YardSummary::from_tracks(self.shared.lock_state().tracks.iter())
    }
}

impl Drop for TrackSimulator {
    fn drop(&mut self) {
        let ticker = lock(&self.shared.ticker).take();
        if let Some(mut ticker) = ticker {
            ticker.stop();
        }
    }
}
