//! HTTP API over the orchestrator and the direct pass-through path.

pub mod error;
pub mod resources;
pub mod routes;
pub mod status;

pub use routes::*;
