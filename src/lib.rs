//! Connectivity and notification core for buddybar, a menu-bar companion
//! client for a local chat backend. Turns a push-event stream plus periodic
//! polling into a deduplicated per-contact unread ledger and drives a capped
//! pool of indicator bubbles from it.

pub mod bubbles;
pub mod client;
pub mod consts;
pub mod core;
pub mod error;
pub mod events;
pub mod model;
pub mod settings;
pub mod stream;
pub mod tracker;

pub use bubbles::{BubbleHost, BubblePool, BubblePosition, BubbleView};
pub use client::BackendClient;
pub use error::{PersistenceError, TransportError};
pub use events::EventBus;
pub use model::{ContactEntry, Message};
pub use settings::{BubbleEdge, Settings, SettingsStore};
pub use stream::ConnectionSupervisor;
pub use tracker::{TrackerEvent, UnreadTracker};
