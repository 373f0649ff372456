//! Core module - shared state store, event bus, persistence, logging
//!
//! This module uses explicit re-exports instead of glob exports
//! (`pub use module::*`) to keep the public API surface visible.
//!
//! Prefer importing from `crate::core`:
//! ```ignore
//! use crate::core::{StateStore, EventBus, Event};
//! ```

pub mod events;
pub mod logging;
pub mod persistence;
pub mod state;

// Explicit re-exports for the event system
pub use events::{
    BusStats, ChangeNotifier, Event, EventBus, NotifyError, OrderTicket, PriceTick, Side, Signal,
    StateChange, WatchNotification, DEFAULT_BUS_CAPACITY,
};

// Explicit re-exports for the state store
pub use state::{StateEntry, StateInfo, StateStore};

// Explicit re-exports for logging
pub use logging::{init_logging, init_logging_with_config, LoggingConfig, DEFAULT_LOG_LEVEL};
