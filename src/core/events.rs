//! Event system for inter-module communication
//!
//! Modules never hold references to each other; they communicate through
//! events published on the [`EventBus`]. The state store publishes through
//! the narrower [`ChangeNotifier`] trait so tests can substitute a recording
//! or failing transport.
//!
//! # Event Kinds
//!
//! - **StateChanged**: a state key was written (old and new value carried)
//! - **StateWatch**: a watched key changed, addressed to one watcher module
//! - **PriceUpdate**: market tick from a data feed
//! - **SignalGenerated**: a strategy produced a trading signal
//! - **OrderRequest**: a strategy asks for an order to be placed

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

/// Default capacity of the broadcast channel behind the bus
pub const DEFAULT_BUS_CAPACITY: usize = 256;

/// Error publishing an event to the notification boundary
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("event transport closed")]
    Closed,

    #[error("event transport failure: {0}")]
    Transport(String),
}

/// Order side for signals and order requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

/// Payload of a state change event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChange {
    pub key: String,
    /// Value replaced by this write, `None` for a fresh key
    pub old_value: Option<Value>,
    pub new_value: Value,
    /// Module id that performed the write
    pub source: String,
}

/// Payload of a watch notification, addressed to a single watcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchNotification {
    pub key: String,
    pub value: Value,
    /// Module id that performed the write
    pub source: String,
    /// Timestamp of the entry that triggered the notification
    pub timestamp: DateTime<Utc>,
    /// Watcher module this notification is addressed to
    pub module_id: String,
}

/// Market tick published by a data feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTick {
    pub pair: String,
    pub price: f64,
    pub volume: f64,
    pub timestamp_ms: u64,
}

/// Trading signal produced by a strategy module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub pair: String,
    pub direction: Side,
    /// Relative distance between the moving averages
    pub strength: f64,
    pub price: f64,
}

/// Order request produced from a validated signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderTicket {
    pub pair: String,
    pub side: Side,
    pub size: f64,
    pub price: f64,
    /// Account value at risk for this order
    pub risk_amount: f64,
}

/// Event published on the bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Event {
    StateChanged(StateChange),
    StateWatch(WatchNotification),
    PriceUpdate(PriceTick),
    SignalGenerated(Signal),
    OrderRequest(OrderTicket),
}

impl Event {
    /// Stable event kind name used in structured logs and statistics
    pub fn kind(&self) -> &'static str {
        match self {
            Event::StateChanged(_) => "STATE_CHANGED",
            Event::StateWatch(_) => "STATE_WATCH_NOTIFICATION",
            Event::PriceUpdate(_) => "PRICE_UPDATE",
            Event::SignalGenerated(_) => "SIGNAL_GENERATED",
            Event::OrderRequest(_) => "ORDER_REQUEST",
        }
    }
}

/// Boundary the state store publishes change events through.
///
/// Production code wires an [`EventBus`]; tests substitute recording or
/// failing implementations to pin down the store's error contract.
pub trait ChangeNotifier: Send + Sync {
    fn publish(&self, event: Event) -> Result<(), NotifyError>;
}

/// Per-kind publish statistics for the bus
#[derive(Debug, Clone, Default, Serialize)]
pub struct BusStats {
    pub event_counts: HashMap<String, u64>,
    pub last_event_times: HashMap<String, DateTime<Utc>>,
    pub receiver_count: usize,
}

#[derive(Default)]
struct StatsInner {
    counts: HashMap<&'static str, u64>,
    last_event: HashMap<&'static str, DateTime<Utc>>,
}

/// Broadcast event bus shared by all modules.
///
/// Publishing is synchronous and never blocks; subscribers that fall behind
/// the channel capacity observe a lag error on their receiver rather than
/// slowing down publishers. Publishing with no subscribers attached succeeds
/// and drops the event.
pub struct EventBus {
    tx: broadcast::Sender<Event>,
    stats: Mutex<StatsInner>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            stats: Mutex::new(StatsInner::default()),
        }
    }

    /// Subscribe to every event published after this call
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Snapshot of publish statistics
    pub fn statistics(&self) -> BusStats {
        let stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        BusStats {
            event_counts: stats
                .counts
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
            last_event_times: stats
                .last_event
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
            receiver_count: self.tx.receiver_count(),
        }
    }

    /// Reset publish counters and last-event times
    pub fn clear_statistics(&self) {
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        stats.counts.clear();
        stats.last_event.clear();
    }

    fn record(&self, kind: &'static str) {
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        *stats.counts.entry(kind).or_insert(0) += 1;
        stats.last_event.insert(kind, Utc::now());
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

impl ChangeNotifier for EventBus {
    fn publish(&self, event: Event) -> Result<(), NotifyError> {
        self.record(event.kind());

        // send only fails when no receiver exists; an idle bus is not an error
        if self.tx.send(event).is_err() {
            debug!("event published with no subscribers, dropped");
        }
        Ok(())
    }
}
