//! Offline-first core of the Nabha Shiksha-AI tutor.
//!
//! Lessons, conversations and progress are kept in a local store so the
//! tutor keeps working without connectivity. Writes made offline wait in a
//! sync queue and are replayed when the backend becomes reachable again, and
//! outbound requests go through a gateway that serves cached or synthesized
//! responses when the network is down.

pub mod config;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod net;
pub mod offline;
pub mod reachability;
pub mod runtime;
pub mod services;
pub mod store;
pub mod sync;
pub mod tutor;

pub use error::{Error, Result};
