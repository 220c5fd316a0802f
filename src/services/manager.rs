use super::{Service, ServiceResult};
use crate::state::{ServiceStatus, ServiceStatusRegistry};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Spawns registered services and coordinates their shutdown.
pub struct ServiceManager {
    registered: Vec<(String, Box<dyn Service>)>,
    running: HashMap<String, JoinHandle<()>>,
    completion_tx: mpsc::UnboundedSender<(String, ServiceResult)>,
    completion_rx: mpsc::UnboundedReceiver<(String, ServiceResult)>,
    shutdown_tx: broadcast::Sender<()>,
    statuses: ServiceStatusRegistry,
}

impl ServiceManager {
    pub fn new(statuses: ServiceStatusRegistry) -> Self {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            registered: Vec::new(),
            running: HashMap::new(),
            completion_tx,
            completion_rx,
            shutdown_tx,
            statuses,
        }
    }

    pub fn register_service(&mut self, name: &str, service: Box<dyn Service>) {
        self.statuses.set(name, ServiceStatus::Starting);
        self.registered.push((name.to_owned(), service));
    }

    pub fn has_services(&self) -> bool {
        !self.registered.is_empty() || !self.running.is_empty()
    }

    /// Spawn every registered service on its own task.
    pub fn spawn_all(&mut self) {
        for (name, service) in self.registered.drain(..) {
            let shutdown_rx = self.shutdown_tx.subscribe();
            let completion_tx = self.completion_tx.clone();
            let statuses = self.statuses.clone();
            let task_name = name.clone();

            let handle = tokio::spawn(async move {
                statuses.set(&task_name, ServiceStatus::Active);
                let result = run_service(service, shutdown_rx).await;
                statuses.set(
                    &task_name,
                    match result {
                        ServiceResult::Error(_) => ServiceStatus::Error,
                        _ => ServiceStatus::Disabled,
                    },
                );
                // The receiver is gone only once the manager itself is dropped
                let _ = completion_tx.send((task_name, result));
            });

            debug!(service = %name, "service spawned");
            self.running.insert(name, handle);
        }
        info!(services = self.running.len(), "all services spawned");
    }

    /// Wait for the first service to exit on its own.
    pub async fn run(&mut self) -> (String, ServiceResult) {
        match self.completion_rx.recv().await {
            Some((name, result)) => {
                self.running.remove(&name);
                (name, result)
            }
            None => (
                "manager".to_owned(),
                ServiceResult::Error(anyhow::anyhow!("completion channel closed")),
            ),
        }
    }

    /// Signal every running service to stop and wait up to `timeout` for them.
    ///
    /// Returns the elapsed time, or the names of services still running when
    /// the timeout expired (those tasks are aborted).
    pub async fn shutdown(mut self, timeout: Duration) -> Result<Duration, Vec<String>> {
        let start = Instant::now();
        let expected = self.running.len();
        info!(services = expected, timeout = ?timeout, "shutting down services");

        // No receivers means nothing is running
        let _ = self.shutdown_tx.send(());

        let mut pending = self.running;
        let collect = async {
            while !pending.is_empty() {
                match self.completion_rx.recv().await {
                    Some((name, result)) => {
                        pending.remove(&name);
                        match result {
                            ServiceResult::Error(e) => {
                                error!(service = %name, error = ?e, "service failed during shutdown")
                            }
                            _ => debug!(service = %name, "service stopped"),
                        }
                    }
                    None => break,
                }
            }
        };

        if tokio::time::timeout(timeout, collect).await.is_err() {
            let names: Vec<String> = pending.keys().cloned().collect();
            warn!(pending = ?names, "shutdown timed out, aborting remaining services");
            for handle in pending.into_values() {
                handle.abort();
            }
            return Err(names);
        }

        Ok(start.elapsed())
    }
}

async fn run_service(
    service: Box<dyn Service>,
    shutdown_rx: broadcast::Receiver<()>,
) -> ServiceResult {
    let name = service.name();
    info!(service = name, "service started");
    // A pre-fired signal is still observed by the service's receiver
    let mut probe = shutdown_rx.resubscribe();

    match service.run(shutdown_rx).await {
        Ok(()) => {
            if probe.try_recv().is_ok() {
                info!(service = name, "service shut down gracefully");
                ServiceResult::GracefulShutdown
            } else {
                warn!(service = name, "service completed unexpectedly");
                ServiceResult::NormalCompletion
            }
        }
        Err(e) => {
            error!(service = name, error = ?e, "service failed");
            ServiceResult::Error(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct UntilShutdown;

    #[async_trait]
    impl Service for UntilShutdown {
        fn name(&self) -> &'static str {
            "until-shutdown"
        }

        async fn run(self: Box<Self>, mut shutdown: broadcast::Receiver<()>) -> anyhow::Result<()> {
            let _ = shutdown.recv().await;
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl Service for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn run(self: Box<Self>, _shutdown: broadcast::Receiver<()>) -> anyhow::Result<()> {
            anyhow::bail!("boom")
        }
    }

    #[tokio::test]
    async fn failing_service_is_reported_first() {
        let statuses = ServiceStatusRegistry::new();
        let mut manager = ServiceManager::new(statuses.clone());
        manager.register_service("idle", Box::new(UntilShutdown));
        manager.register_service("failing", Box::new(Failing));
        manager.spawn_all();

        let (name, result) = manager.run().await;
        assert_eq!(name, "failing");
        assert!(matches!(result, ServiceResult::Error(_)));
        assert_eq!(statuses.get("failing"), Some(ServiceStatus::Error));

        let elapsed = manager.shutdown(Duration::from_secs(1)).await;
        assert!(elapsed.is_ok());
        assert_eq!(statuses.get("idle"), Some(ServiceStatus::Disabled));
    }
}
