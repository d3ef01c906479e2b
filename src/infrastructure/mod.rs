//! Adapters implementing the domain ports: in-memory collaborators for
//! tests and the demo runner, and log-backed metrics and dead letters.

pub mod in_memory;
pub mod logging;
