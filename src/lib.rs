//! Polywatch - Real-time position monitoring for a multi-strategy trading agent.
//!
//! This crate watches open positions across venues, re-checks the thesis each
//! was opened on, and closes or alerts when the thesis stops holding. It is
//! event-driven: market data streams push ticks, and every decision hangs off
//! a tick rather than a polling loop.
//!
//! # Architecture
//!
//! Two levels of evaluation keep the hot path cheap:
//!
//! - **Level 1** runs on every tick: exit-policy breaches (stop-loss,
//!   take-profit, spread convergence, max age), prediction edge inversion,
//!   and price drift against the last checked reference.
//! - **Level 2** is a throttled re-estimation of the thesis probability via
//!   an LLM, gated per position by a cooldown and a compare-and-swap claim.
//!
//! Position state lives in [`store::PositionStore`], journaled to disk before
//! any change becomes visible. All lifecycle transitions are compare-and-swap,
//! so concurrent ticks for the same position resolve to exactly one action.
//!
//! # Modules
//!
//! - [`config`] - TOML configuration with per-strategy policies
//! - [`domain`] - Positions, legs, ticks, strategy and venue types
//! - [`store`] - Journaled position store with CAS transitions
//! - [`stream`] - Market data feeds and the reconnecting wrapper
//! - [`monitor`] - Watchers, coordinator, evaluator, throttle, reconciler
//! - [`estimator`] - Level-2 thesis re-estimation (Claude-backed)
//! - [`exec`] - Execution gateway port and the paper gateway
//! - [`risk`] - Kelly-based stake sizing with category caps
//! - [`notify`] - Log and Telegram notification sinks
//! - [`app`] - Wires everything together from a [`config::Config`]
//!
//! # Features
//!
//! - `telegram` (default) - Telegram notification sink
//! - `testkit` - Export scripted doubles for integration tests

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod estimator;
pub mod exec;
pub mod monitor;
pub mod notify;
pub mod risk;
pub mod store;
pub mod stream;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;
