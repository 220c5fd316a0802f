use crate::cache::{CacheStore, MemoryCacheStore};
use crate::catalog::Catalog;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::data::{self, PgCacheStore, PgJobQueue};
use crate::fetch::{DirectFetcher, FetchCoalescer, RateCounter};
use crate::freshness::orchestrator::CacheOrchestrator;
use crate::queue::{JobQueue, MemoryJobQueue};
use crate::refresh::{RefreshService, Scheduler, Worker};
use crate::services::manager::ServiceManager;
use crate::services::web::WebService;
use crate::state::AppState;
use crate::upstream::{Upstream, UpstreamClient};
use anyhow::Context;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Main application struct containing all necessary components
pub struct App {
    config: Config,
    app_state: AppState,
    upstream: Arc<dyn Upstream>,
    cache: Arc<dyn CacheStore>,
    queue: Arc<dyn JobQueue>,
    catalog: Arc<Catalog>,
    clock: Arc<dyn Clock>,
    service_manager: ServiceManager,
}

impl App {
    /// Create a new App instance with all necessary components initialized
    pub async fn new(config: Config) -> Result<Self, anyhow::Error> {
        let catalog = Catalog::with_overrides(&config.freshness)
            .context("Invalid freshness configuration")?;
        let catalog = Arc::new(catalog);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let (cache, queue): (Arc<dyn CacheStore>, Arc<dyn JobQueue>) = match &config.database_url
        {
            Some(url) => {
                let pool = data::connect(url).await?;
                (
                    Arc::new(PgCacheStore::new(pool.clone())),
                    Arc::new(PgJobQueue::new(pool)),
                )
            }
            None => {
                warn!("DATABASE_URL not set, cache and job queue will not survive restarts");
                (
                    Arc::new(MemoryCacheStore::new(clock.clone())),
                    Arc::new(MemoryJobQueue::new()),
                )
            }
        };

        if config.upstream.token.is_empty() {
            warn!("UPSTREAM__TOKEN not set, upstream calls will be anonymous");
        }
        let upstream: Arc<dyn Upstream> = Arc::new(
            UpstreamClient::new(&config.upstream).context("Failed to create upstream client")?,
        );

        let orchestrator = CacheOrchestrator::new(
            cache.clone(),
            queue.clone(),
            catalog.clone(),
            clock.clone(),
            config.pending_retry_after,
        );
        let direct = DirectFetcher::new(
            upstream.clone(),
            FetchCoalescer::new(config.coalescer.clone()),
            Arc::new(RateCounter::new(config.admission.clone())),
        );

        let app_state = AppState::new(
            orchestrator,
            direct,
            queue.clone(),
            clock.clone(),
            config.timezone,
        );

        info!(
            persistent = config.database_url.is_some(),
            base_url = %config.upstream.base_url,
            timezone = %config.timezone,
            "application components initialized"
        );

        let service_manager = ServiceManager::new(app_state.service_statuses.clone());
        Ok(App {
            config,
            app_state,
            upstream,
            cache,
            queue,
            catalog,
            clock,
            service_manager,
        })
    }

    /// Register the web and refresh services.
    pub fn setup_services(&mut self) -> Result<(), anyhow::Error> {
        let web_service = Box::new(WebService::new(self.config.port, self.app_state.clone()));
        self.service_manager.register_service("web", web_service);

        let worker = Worker::new(
            self.upstream.clone(),
            self.cache.clone(),
            self.queue.clone(),
            self.catalog.clone(),
            self.clock.clone(),
            self.config.queue.clone(),
        );
        let scheduler = Scheduler::new(
            self.queue.clone(),
            self.cache.clone(),
            self.clock.clone(),
            self.config.timezone,
            Scheduler::default_triggers(&self.config.scheduler, &self.config.popular_competitions),
        );
        let refresh_service = Box::new(RefreshService::new(worker, scheduler, self.queue.clone()));
        self.service_manager.register_service("refresh", refresh_service);

        if !self.service_manager.has_services() {
            error!("No services enabled. Cannot start application.");
            return Err(anyhow::anyhow!("No services enabled"));
        }

        Ok(())
    }

    /// Start all registered services
    pub fn start_services(&mut self) {
        self.service_manager.spawn_all();
    }

    /// Run the application and handle shutdown signals
    pub async fn run(self) -> ExitCode {
        use crate::services::signals::handle_shutdown_signals;
        handle_shutdown_signals(self.service_manager, self.config.shutdown_timeout).await
    }
}
