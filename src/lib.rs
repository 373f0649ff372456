//! Modular trading bot
//!
//! The heart of the crate is the shared state coordination store
//! (`core::state`): modules publish and observe named values without direct
//! references to one another, with change notification over an event bus
//! (`core::events`) and a persistence round-trip (`core::persistence`).
//! Strategy modules (`modules`) are collaborators layered on top.

pub mod config;
pub mod core;
pub mod error;
pub mod modules;

pub use error::AppError;
