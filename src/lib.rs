//! smsflow: SMS message lifecycle tracking.
//!
//! Consumes delivery events (sending, sent, delivered, failed, expired,
//! received, notification) that arrive out of order and more than once, and
//! keeps each message's status and each conversation thread's summary
//! consistent with the latest event. Messages whose notification is never
//! acknowledged are expired by a deferred check that re-enters the pipeline
//! over HTTP.
//!
//! See `DESIGN.md` for the architecture.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod logging;
pub mod types;

pub mod events;
pub mod router;
pub mod store;

pub mod messages;
pub mod threads;

pub mod expiration;
pub mod scheduler;

pub mod app;
pub mod listeners;
pub mod server;
