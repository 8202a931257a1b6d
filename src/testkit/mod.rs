//! Test doubles and fixture builders.
//!
//! Compiled for unit tests and for integration tests via the `testkit`
//! feature. Everything here is deterministic and instrumented with call
//! counters so tests can assert on interaction counts, not just outcomes.

pub mod domain;
pub mod estimator;
pub mod gateway;
pub mod notify;
pub mod stream;
