//! navargus: glue between NAV's event engine and Argus.
//!
//! Reads the concatenated JSON alert stream the event engine writes to its
//! export script, filters it, and mirrors every alert as an Argus incident.
//! Argus is the only state store; a periodic resync against NAV's active
//! alerts repairs anything the live stream missed.

pub mod argus;
pub mod config;
pub mod decode;
pub mod error;
pub mod filter;
pub mod frame;
pub mod http;
pub mod incident;
pub mod nav;
pub mod pipeline;
pub mod reconcile;
pub mod resync;
pub mod store;
pub mod types;

pub use argus::ArgusClient;
pub use config::{Config, Policy};
pub use error::{ConfigError, DecodeError, FrameError, ResyncError, StoreError};
pub use frame::FrameReader;
pub use nav::NavClient;
pub use pipeline::{Exit, Message, Pipeline};
pub use reconcile::{Outcome, Reconciler};
pub use store::{AlertSource, IncidentStore};
pub use types::{Alert, AlertId, AlertRecord, AlertState, Incident, NewIncident};
