//! Testing utilities for lookout-apm.
//!
//! # Components
//!
//! - [`fixtures`]: Pre-built tracked errors and alerts
//! - [`doubles`]: Recording notification channels, metrics sink and
//!   misbehaving stores

pub mod doubles;
pub mod fixtures;

pub use doubles::{FailingStore, RecordingEmail, RecordingSink, RecordingWebhook, SlowStore};
