//! Strata: a shared HTTP response cache for fleets of application servers.
//!
//! The [`cache`] module holds the storage engine and the axum kernel that
//! drives it; [`infra`] wires them to Redis, an origin server and the
//! process's telemetry.

pub mod cache;
pub mod config;
pub mod error;
pub mod infra;
