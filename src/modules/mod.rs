//! Strategy and collaborator modules
//!
//! A module is an independent logical component identified by a string id.
//! Modules hold no references to each other: they read and write shared
//! values through the [`StateStore`](crate::core::StateStore) and react to
//! [`Event`]s delivered from the bus.

use async_trait::async_trait;

use crate::core::Event;
use crate::error::Result;

pub mod ma_cross;

pub use ma_cross::{MovingAverageCross, ACCOUNT_VALUE_KEY};

/// Lifecycle and event interface shared by all modules
#[async_trait]
pub trait Module: Send {
    /// Stable identifier used as state source and watcher id
    fn module_id(&self) -> &str;

    /// Register watchers, seed internal state. Called once before any event
    /// is delivered.
    async fn initialize(&mut self) -> Result<()>;

    /// React to one event from the bus
    async fn handle_event(&mut self, event: &Event) -> Result<()>;

    /// Release registrations and stop producing events
    async fn shutdown(&mut self) -> Result<()>;
}
