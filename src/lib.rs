//! Cache-first gateway in front of a rate-limited sports-data API.
//!
//! Reads are answered from a TTL cache with stale-while-revalidate semantics;
//! misses and stale entries queue background fetches that a single worker
//! drains at a bounded rate. A separate pass-through path coalesces
//! concurrent identical upstream calls behind an admission counter.

pub mod app;
pub mod cache;
pub mod catalog;
pub mod cli;
pub mod clock;
pub mod config;
pub mod data;
pub mod fetch;
pub mod freshness;
pub mod logging;
pub mod queue;
pub mod refresh;
pub mod services;
pub mod state;
pub mod upstream;
pub mod utils;
pub mod web;
