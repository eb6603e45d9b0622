//! notify-relay library crate.
//!
//! Operator notifications for an approval queue and a publishing pipeline: rate
//! limited, batched, retried and fanned out to live observers.

pub mod config;
pub mod error;
pub mod logging;
pub mod notification;
pub mod scheduler;
pub mod store;
pub mod time;
pub mod utils;

pub use error::{Error, Result};
