//! Application layer containing the transaction orchestration.
//!
//! `TransactionExecutor` is the entry point. It composes the retry delay
//! evaluator and the per-attempt timeout guard, and drives the collaborator
//! ports declared in the domain layer.

pub mod executor;
pub mod retry;
pub mod timeout;
