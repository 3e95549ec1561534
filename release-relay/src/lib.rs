//! release-relay library crate.
//!
//! Polls tracked upstream repositories for new releases, records them once,
//! and relays them to matching subscriptions through delivery channels.

pub mod config;
pub mod database;
pub mod domain;
pub mod error;
pub mod logging;
pub mod notification;
pub mod scheduler;
pub mod source;
pub mod utils;

pub use error::{Error, Result};
