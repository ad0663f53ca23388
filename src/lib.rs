//! # GNSS Locator Library
//!
//! Acquire a GNSS position fix through a cellular modem's AT-command
//! interface, validate it against quality thresholds and report the result
//! synchronously or through a completion callback.
//!
//! This library provides the acquisition engine: a single background worker
//! task sequences the GNSS AT commands, parses position and accuracy replies
//! and decides when a stream of raw fixes has settled into a trustworthy
//! answer. Hardware is consumed behind capability traits; a tokio-serial
//! modem transport is included for real devices.

pub mod acquire;
pub mod config;
pub mod error;
pub mod locator;
pub mod modem;
pub mod point;
pub mod report;
pub mod response;

pub use acquire::{AcquireCallback, AcquireOutcome};
pub use config::{Constellation, LocationConfig};
pub use error::{LocateError, Result};
pub use locator::Locator;
pub use point::LocationPoint;
