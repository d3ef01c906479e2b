//! A reusable transaction execution framework.
//!
//! [`application::executor::TransactionExecutor`] wraps an arbitrary unit of
//! business logic with an authorization gate, bounded retries with backoff,
//! per-attempt timeouts, audit logging, notification dispatch and metrics.
//! Contexts are assembled with [`domain::builder::TransactionContextBuilder`].

pub mod application;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod interfaces;
