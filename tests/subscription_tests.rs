//! Observer delivery, unsubscription and the periodic ticker

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use yard_sim::simulation::{
    Movement, SimulatorConfig, Subscription, Track, TrackId, TrackSimulator,
};

const WAIT: Duration = Duration::from_secs(5);

/// Simulator whose ticker never fires during a test
fn quiet_simulator(seed: u64) -> TrackSimulator {
    let config = SimulatorConfig::default()
        .with_rng_seed(seed)
        .with_tick_period(Duration::from_secs(3600));
    TrackSimulator::new(config).unwrap()
}

fn fast_simulator(seed: u64) -> TrackSimulator {
    let config = SimulatorConfig::default()
        .with_rng_seed(seed)
        .with_tick_period(Duration::from_millis(10));
    TrackSimulator::new(config).unwrap()
}

fn counter() -> (Arc<AtomicUsize>, impl FnMut(&[Track]) + Send + 'static) {
    let count = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&count);
    (count, move |_: &[Track]| {
        seen.fetch_add(1, Ordering::SeqCst);
    })
}

#[test]
fn test_forced_tick_delivers_one_valid_snapshot() {
    let simulator = quiet_simulator(1);
    let (tx, rx) = mpsc::channel();
    let subscription = simulator.subscribe(move |tracks| {
        let _ = tx.send(tracks.to_vec());
    });

    simulator.tick();

    let snapshot = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(snapshot, simulator.snapshot());
    assert_eq!(snapshot.len(), 6);
    assert!(snapshot.iter().all(Track::is_consistent));
    assert!(matches!(rx.try_recv(), Err(mpsc::TryRecvError::Empty)));

    subscription.unsubscribe();
    simulator.tick();
    assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
}

#[test]
fn test_every_tick_notifies_even_without_a_real_change() {
    let simulator = quiet_simulator(2);
    let (count, observer) = counter();
    let _subscription = simulator.subscribe(observer);

    for _ in 0..100 {
        simulator.tick();
    }
    assert_eq!(count.load(Ordering::SeqCst), 100);
}

#[test]
fn test_observers_notified_in_subscription_order() {
    let simulator = quiet_simulator(3);
    let order = Arc::new(Mutex::new(Vec::new()));

    let subscriptions: Vec<Subscription> = (0..3)
        .map(|index| {
            let order = Arc::clone(&order);
            simulator.subscribe(move |_| order.lock().unwrap().push(index))
        })
        .collect();
    assert_eq!(simulator.observer_count(), 3);

    simulator.tick();
    simulator.tick();
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 0, 1, 2]);

    for subscription in &subscriptions {
        subscription.unsubscribe();
    }
    assert_eq!(simulator.observer_count(), 0);
}

#[test]
fn test_panicking_observer_does_not_block_others() {
    let simulator = quiet_simulator(4);
    let _failing = simulator.subscribe(|_| panic!("observer failure"));
    let (count, observer) = counter();
    let _counting = simulator.subscribe(observer);

    simulator.tick();
    simulator.tick();

    assert_eq!(count.load(Ordering::SeqCst), 2);
    assert_eq!(simulator.history().len(), 2);
}

#[test]
fn test_unsubscribe_twice_is_noop() {
    let simulator = quiet_simulator(5);
    let (first_count, first) = counter();
    let (second_count, second) = counter();
    let first = simulator.subscribe(first);
    let _second = simulator.subscribe(second);

    first.unsubscribe();
    first.unsubscribe();
    assert!(!first.is_active());
    assert_eq!(simulator.observer_count(), 1);

    simulator.tick();
    assert_eq!(first_count.load(Ordering::SeqCst), 0);
    assert_eq!(second_count.load(Ordering::SeqCst), 1);
}

#[test]
fn test_manual_override_and_reset_do_not_notify() {
    let simulator = quiet_simulator(6);
    let (count, observer) = counter();
    let _subscription = simulator.subscribe(observer);

    simulator.set_track_state(TrackId(2), "occupied", Some("X1")).unwrap();
    simulator.reset();
    assert_eq!(count.load(Ordering::SeqCst), 0);

    simulator
        .apply_movement(TrackId(2), Movement::Arrival, Some("IC-1523"))
        .unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn test_observer_can_read_and_unsubscribe_during_notification() {
    let simulator = Arc::new(quiet_simulator(7));
    let handle: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
    let (tx, rx) = mpsc::channel();

    let weak = Arc::downgrade(&simulator);
    let own_handle = Arc::clone(&handle);
    let subscription = simulator.subscribe(move |tracks| {
        if let Some(simulator) = weak.upgrade() {
            let _ = tx.send(simulator.snapshot() == tracks);
        }
        if let Some(subscription) = own_handle.lock().unwrap().as_ref() {
            subscription.unsubscribe();
        }
    });
    *handle.lock().unwrap() = Some(subscription);

    simulator.tick();
    assert!(rx.recv_timeout(WAIT).unwrap());
    assert_eq!(simulator.observer_count(), 0);
    assert!(!simulator.is_running());

    simulator.tick();
    assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
}

#[test]
fn test_tick_from_observer_is_applied_without_push() {
    let simulator = Arc::new(quiet_simulator(8));
    let (count, mut observer) = counter();
    let weak = Arc::downgrade(&simulator);
    let _subscription = simulator.subscribe(move |tracks| {
        observer(tracks);
        if let Some(simulator) = weak.upgrade() {
            simulator.tick();
        }
    });

    simulator.tick();
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(simulator.history().len(), 2);
}

#[test]
fn test_ticker_runs_while_subscribed() {
    let simulator = fast_simulator(9);
    assert!(!simulator.is_running());

    let (tx, rx) = mpsc::channel();
    let subscription = simulator.subscribe(move |tracks| {
        let _ = tx.send(tracks.to_vec());
    });
    assert!(simulator.is_running());

    for _ in 0..3 {
        let snapshot = rx.recv_timeout(WAIT).unwrap();
        assert!(snapshot.iter().all(Track::is_consistent));
    }

    subscription.unsubscribe();
    assert!(!simulator.is_running());

    // The observer is dropped once unsubscribed, closing the channel
    loop {
        match rx.recv_timeout(WAIT) {
            Ok(_) => continue,
            Err(err) => {
                assert_eq!(err, RecvTimeoutError::Disconnected);
                break;
            }
        }
    }
}

#[test]
fn test_ticker_restarts_on_new_subscription() {
    let simulator = fast_simulator(10);

    let (first_count, first) = counter();
    let first = simulator.subscribe(first);
    first.unsubscribe();
    assert!(!simulator.is_running());

    let (tx, rx) = mpsc::channel();
    let second = simulator.subscribe(move |tracks| {
        let _ = tx.send(tracks.len());
    });
    assert!(simulator.is_running());
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), 6);
    let delivered = first_count.load(Ordering::SeqCst);
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), 6);

    second.unsubscribe();
    assert_eq!(first_count.load(Ordering::SeqCst), delivered);
}

#[test]
fn test_ticker_keeps_running_until_last_unsubscribe() {
    let simulator = quiet_simulator(11);
    let (_, first) = counter();
    let (_, second) = counter();
    let first = simulator.subscribe(first);
    let second = simulator.subscribe(second);

    first.unsubscribe();
    assert!(simulator.is_running());
    second.unsubscribe();
    assert!(!simulator.is_running());
}

#[test]
fn test_dropping_simulator_stops_ticker() {
    let simulator = fast_simulator(12);
    let (tx, rx) = mpsc::channel();
    let subscription = simulator.subscribe(move |tracks| {
        let _ = tx.send(tracks.len());
    });
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), 6);

    drop(simulator);
    loop {
        match rx.recv_timeout(WAIT) {
            Ok(_) => continue,
            Err(err) => {
                assert_eq!(err, RecvTimeoutError::Disconnected);
                break;
            }
        }
    }

    subscription.unsubscribe();
    assert!(!subscription.is_active());
}

#[test]
fn test_forced_ticks_and_ticker_deliver_one_at_a_time() {
    let simulator = Arc::new(fast_simulator(13));
    let busy = Arc::new(AtomicBool::new(false));
    let overlapped = Arc::new(AtomicBool::new(false));
    let (count, mut observer) = counter();

    let in_observer = Arc::clone(&busy);
    let overlap_seen = Arc::clone(&overlapped);
    let subscription = simulator.subscribe(move |tracks| {
        if in_observer.swap(true, Ordering::SeqCst) {
            overlap_seen.store(true, Ordering::SeqCst);
        }
        assert!(tracks.iter().all(Track::is_consistent));
        observer(tracks);
        thread::sleep(Duration::from_millis(1));
        in_observer.store(false, Ordering::SeqCst);
    });

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let simulator = Arc::clone(&simulator);
            thread::spawn(move || {
                for _ in 0..25 {
                    simulator.tick();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    subscription.unsubscribe();
    assert!(!simulator.is_running());
    assert!(count.load(Ordering::SeqCst) >= 100);
    assert!(!overlapped.load(Ordering::SeqCst));
    assert!(simulator.snapshot().iter().all(Track::is_consistent));
}

#[test]
fn test_last_unsubscribe_inside_forced_tick_while_ticker_is_due() {
    let simulator = Arc::new(fast_simulator(14));
    let handle: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

    let own_handle = Arc::clone(&handle);
    let subscription = simulator.subscribe(move |_| {
        if thread::current().name() == Some("yard-ticker") {
            return;
        }
        // Give the ticker time to fire and queue up behind this delivery
        thread::sleep(Duration::from_millis(100));
        if let Some(subscription) = own_handle.lock().unwrap().as_ref() {
            subscription.unsubscribe();
        }
    });
    *handle.lock().unwrap() = Some(subscription);

    let (done_tx, done_rx) = mpsc::channel();
    let forced = Arc::clone(&simulator);
    let worker = thread::spawn(move || {
        forced.tick();
        let _ = done_tx.send(());
    });

    done_rx
        .recv_timeout(WAIT)
        .expect("forced tick should finish after the observer unsubscribes");
    worker.join().unwrap();
    assert_eq!(simulator.observer_count(), 0);
    assert!(!simulator.is_running());

    let settled = simulator.history().len();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(simulator.history().len(), settled);
}

#[test]
fn test_unsubscribe_during_fan_out_on_another_thread() {
    let simulator = Arc::new(quiet_simulator(15));
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let _blocking = simulator.subscribe(move |_| {
        let _ = entered_tx.send(());
        let _ = release_rx.recv_timeout(WAIT);
    });
    let (late_count, late) = counter();
    let late = simulator.subscribe(late);

    let forced = Arc::clone(&simulator);
    let worker = thread::spawn(move || forced.tick());
    entered_rx.recv_timeout(WAIT).unwrap();

    // The fan-out already holds a handle to `late`, but it must not be called
    late.unsubscribe();
    drop(release_tx);
    worker.join().unwrap();

    assert_eq!(late_count.load(Ordering::SeqCst), 0);
    assert_eq!(simulator.observer_count(), 1);
}
