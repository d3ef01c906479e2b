//! Outer surfaces driving the executor.

pub mod cli;
