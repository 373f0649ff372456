//! End-to-end coordination cycle tests
//!
//! Exercises the full store lifecycle across component boundaries:
//! 1. Watch registration and change notification over the event bus
//! 2. TTL expiry with lazy eviction
//! 3. Clear by source
//! 4. Persistence snapshot, process "restart", and restore
//! 5. Strategy module driven from the bus end to end
//!
//! # Running the tests
//! ```bash
//! cargo test --test state_cycle
//! ```

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tempfile::tempdir;
use tokio::time::timeout;

use modular_bot::config::StrategyConfig;
use modular_bot::core::{ChangeNotifier, Event, EventBus, NotifyError, PriceTick, Side, StateStore};
use modular_bot::modules::{Module, MovingAverageCross, ACCOUNT_VALUE_KEY};

// =============================================================================
// Test notifiers
// =============================================================================

/// Records every event published through it
#[derive(Default)]
struct RecordingNotifier {
    events: Mutex<Vec<Event>>,
}

impl RecordingNotifier {
    fn take(&self) -> Vec<Event> {
        std::mem::take(&mut self.events.lock().unwrap())
    }
}

impl ChangeNotifier for RecordingNotifier {
    fn publish(&self, event: Event) -> Result<(), NotifyError> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

/// Transport that always fails
struct FailingNotifier;

impl ChangeNotifier for FailingNotifier {
    fn publish(&self, _event: Event) -> Result<(), NotifyError> {
        Err(NotifyError::Transport("bus unavailable".to_string()))
    }
}

// =============================================================================
// Store + bus cycle
// =============================================================================

#[tokio::test]
async fn test_watch_cycle_over_the_bus() {
    let bus = Arc::new(EventBus::default());
    let store = StateStore::new(bus.clone());
    let mut rx = bus.subscribe();

    store.watch_state("risk.limit", "strategy_a");
    store.set_state("risk.limit", json!(0.02), "risk_manager", None, true);

    // First event: the general state change
    let event = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
    match event {
        Event::StateChanged(change) => {
            assert_eq!(change.key, "risk.limit");
            assert_eq!(change.old_value, None);
            assert_eq!(change.new_value, json!(0.02));
            assert_eq!(change.source, "risk_manager");
        }
        other => panic!("expected StateChanged, got {:?}", other),
    }

    // Second event: the watch notification addressed to the watcher
    let event = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
    match event {
        Event::StateWatch(notification) => {
            assert_eq!(notification.key, "risk.limit");
            assert_eq!(notification.module_id, "strategy_a");
            assert_eq!(notification.value, json!(0.02));
        }
        other => panic!("expected StateWatch, got {:?}", other),
    }

    // After unwatch, a write produces only the state change
    store.unwatch_state("risk.limit", "strategy_a");
    store.set_state("risk.limit", json!(0.03), "risk_manager", None, true);

    let event = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
    assert!(matches!(event, Event::StateChanged(_)));
    assert!(rx.try_recv().is_err());

    let stats = bus.statistics();
    assert_eq!(stats.event_counts.get("STATE_CHANGED"), Some(&2));
    assert_eq!(stats.event_counts.get("STATE_WATCH_NOTIFICATION"), Some(&1));
}

#[test]
fn test_ttl_expiry_evicts_across_the_api() {
    let notifier = Arc::new(RecordingNotifier::default());
    let store = StateStore::new(notifier.clone());

    store.set_state("quote", json!(101.5), "feed", Some(0), false);
    store.set_state("stable", json!(1), "feed", None, false);

    assert_eq!(store.get_state("quote"), Some(json!(101.5)));

    std::thread::sleep(Duration::from_millis(30));

    assert_eq!(store.get_state("quote"), None);
    let info = store.get_state_info();
    assert!(!info.keys.contains(&"quote".to_string()));
    assert!(info.keys.contains(&"stable".to_string()));

    // only the two writes published events; lazy eviction is silent
    let events = notifier.take();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| matches!(e, Event::StateChanged(_))));
}

#[test]
fn test_clear_by_source_then_clear_all() {
    let store = StateStore::new(Arc::new(RecordingNotifier::default()));

    store.set_state("a", json!(1), "mod_a", None, true);
    store.set_state("b", json!(2), "mod_b", None, true);
    store.set_state("c", json!(3), "mod_b", None, true);

    store.clear_state(Some("mod_b"));
    assert_eq!(store.get_state("a"), Some(json!(1)));
    assert_eq!(store.get_state("b"), None);
    assert_eq!(store.get_state("c"), None);

    store.clear_state(None);
    assert_eq!(store.get_state_info().total_keys, 0);
}

#[test]
fn test_failed_notification_reports_false_but_write_survives() {
    let store = StateStore::new(Arc::new(FailingNotifier));

    assert!(!store.set_state("position", json!({"size": 1.0}), "trader", None, true));
    assert_eq!(store.get_state("position"), Some(json!({"size": 1.0})));
}

#[test]
fn test_concurrent_same_key_writes_are_serialized() {
    let store = Arc::new(StateStore::new(Arc::new(RecordingNotifier::default())));

    let writers: Vec<_> = (0..4)
        .map(|writer| {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for seq in 0..250 {
                    store.set_state(
                        "hot",
                        json!({"writer": writer, "seq": seq}),
                        &format!("w{writer}"),
                        None,
                        false,
                    );
                }
            })
        })
        .collect();

    let readers: Vec<_> = (0..2)
        .map(|_| {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for _ in 0..500 {
                    if let Some(value) = store.get_state("hot") {
                        // a torn write would lose one of the fields
                        assert!(value["writer"].is_u64());
                        assert!(value["seq"].is_u64());
                    }
                }
            })
        })
        .collect();

    for handle in writers.into_iter().chain(readers) {
        handle.join().unwrap();
    }
}

// =============================================================================
// Persistence across a restart
// =============================================================================

#[test]
fn test_snapshot_restore_cycle() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("state.json");

    // First "run": persistent and transient entries
    {
        let store = StateStore::new(Arc::new(RecordingNotifier::default()));
        store.set_state("account.value", json!(12_500.0), "account", None, true);
        store.set_state("position.BTC-USD", json!({"size": 0.25}), "trader", Some(86_400), true);
        store.set_state("tick.BTC-USD", json!(50_000.0), "feed", Some(5), false);
        assert!(store.save_state(&path));
    }

    // Second "run": restore and verify only the persistent subset survived
    let store = StateStore::new(Arc::new(RecordingNotifier::default()));
    assert!(store.load_state(&path));

    assert_eq!(store.get_state("account.value"), Some(json!(12_500.0)));
    assert_eq!(store.get_state("position.BTC-USD"), Some(json!({"size": 0.25})));
    assert_eq!(store.get_state("tick.BTC-USD"), None);

    let info = store.get_state_info();
    assert_eq!(info.total_keys, 2);
    assert_eq!(info.sources, vec!["account".to_string(), "trader".to_string()]);
}

#[test]
fn test_restore_merges_over_live_entries() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("state.json");

    {
        let store = StateStore::new(Arc::new(RecordingNotifier::default()));
        store.set_state("account.value", json!(9_000.0), "account", None, true);
        assert!(store.save_state(&path));
    }

    let store = StateStore::new(Arc::new(RecordingNotifier::default()));
    store.set_state("account.value", json!(1.0), "boot", None, true);
    store.set_state("session.id", json!("abc"), "boot", None, false);

    assert!(store.load_state(&path));

    // loaded key overwrote the live one, unrelated live key untouched
    assert_eq!(store.get_state("account.value"), Some(json!(9_000.0)));
    assert_eq!(store.get_state("session.id"), Some(json!("abc")));
}

// =============================================================================
// Strategy module driven end to end
// =============================================================================

fn strategy_config() -> StrategyConfig {
    StrategyConfig {
        id: "ma_cross".to_string(),
        pairs: vec!["BTC-USD".to_string()],
        fast_ma: 2,
        slow_ma: 3,
        min_volume: 0.0,
        entry_threshold: 0.001,
        exit_threshold: 0.0005,
        risk_per_trade: 0.01,
        signal_ttl_secs: 300,
    }
}

fn price_update(price: f64) -> Event {
    Event::PriceUpdate(PriceTick {
        pair: "BTC-USD".to_string(),
        price,
        volume: 10.0,
        timestamp_ms: 0,
    })
}

#[tokio::test]
async fn test_strategy_cycle_over_bus_and_store() {
    let bus = Arc::new(EventBus::default());
    let store = Arc::new(StateStore::new(bus.clone()));
    let mut rx = bus.subscribe();

    store.set_state(ACCOUNT_VALUE_KEY, json!(20_000.0), "account", None, true);

    let mut strategy = MovingAverageCross::new(strategy_config(), store.clone(), bus.clone());
    strategy.initialize().await.unwrap();

    // feed a flat tape then a breakout through the module, as the event pump
    // in main would
    for price in [100.0, 100.0, 100.0, 110.0] {
        strategy.handle_event(&price_update(price)).await.unwrap();
    }

    // drain the bus and pick out the strategy output
    let mut signals = Vec::new();
    let mut orders = Vec::new();
    while let Ok(event) = rx.try_recv() {
        match event {
            Event::SignalGenerated(signal) => signals.push(signal),
            Event::OrderRequest(order) => orders.push(order),
            _ => {}
        }
    }

    // flat tape settles a sell cross first, the breakout flips it to a buy
    let buy = signals
        .iter()
        .find(|s| s.direction == Side::Buy)
        .expect("breakout must produce a buy signal");
    assert!(buy.strength > 0.001);

    assert_eq!(orders.len(), 1);
    let order = &orders[0];
    assert_eq!(order.side, Side::Buy);
    // sized from the account value read through the store
    assert!((order.risk_amount - 200.0).abs() < 1e-9);
    assert!((order.size - 200.0 / 110.0).abs() < 1e-9);

    // the last signal is mirrored into the store for polling modules
    let published = store.get_state("signal.BTC-USD").expect("signal state");
    assert_eq!(published["direction"], "buy");

    strategy.shutdown().await.unwrap();
    assert!(store
        .get_state_info()
        .watchers
        .get(ACCOUNT_VALUE_KEY)
        .is_none());
}
