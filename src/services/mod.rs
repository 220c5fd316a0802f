//! Long-running services and their lifecycle.

pub mod manager;
pub mod signals;
pub mod web;

use async_trait::async_trait;
use tokio::sync::broadcast;

/// A long-running component owned by the [`manager::ServiceManager`].
#[async_trait]
pub trait Service: Send {
    fn name(&self) -> &'static str;

    /// Run until the service finishes on its own or `shutdown` fires.
    async fn run(self: Box<Self>, shutdown: broadcast::Receiver<()>) -> anyhow::Result<()>;
}

/// How a service task ended.
#[derive(Debug)]
pub enum ServiceResult {
    /// Stopped after a shutdown signal.
    GracefulShutdown,
    /// Returned without being asked to stop.
    NormalCompletion,
    Error(anyhow::Error),
}
