//! Domain core of the notification service.
//!
//! The notification service drains the `large-transfers` log into a
//! document store for audit. This crate contains:
//!
//! - [`consumer`] - the partitioned fetch loop, worker pool, and offset
//!   commit policy
//! - [`batch`] - batch assembly by size and time
//! - [`sink`] - the MongoDB document sink with indexed audit queries
//! - [`config`] - environment-driven service configuration
//!
//! Delivery is at-least-once: a batch is acknowledged on the log only
//! after the document store accepted it, and replays after a crash
//! produce duplicate documents rather than gaps.

pub mod batch;
pub mod config;
pub mod consumer;
pub mod sink;
