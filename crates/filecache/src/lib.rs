//! A bounded cache of expensive, closeable resources such as open data files.
//!
//! See the [`caching`] module for an overview of how resources are acquired, shared, released
//! and evicted.

#[macro_use]
pub mod metrics;

pub mod caching;
pub mod config;
pub mod files;
