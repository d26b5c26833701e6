//! Daemon assembly: every subsystem built from one `DockyardConfig`, then
//! run until a shutdown future resolves.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use dockyard_api::ApiState;
use dockyard_core::{DockyardConfig, PlatformMode, QueueBackendKind, SharedClock, SystemClock};
use dockyard_health::{NodeAdmin, Thresholds, WorkerHealthMonitor};
use dockyard_lifecycle::{
    LifecycleServices, LifecycleTimings, LogNotificationSink, NotificationSink, PodCoordinator,
    SubscriptionCoordinator, schedule_recurring,
};
use dockyard_orchestrator::{OrchestratorSettings, ResourceOrchestrator};
use dockyard_orphan::OrphanDetector;
use dockyard_platform::{KubePlatform, Platform, PlatformClient, SimulatedPlatform};
use dockyard_queue::{JobQueue, LanePolicies, MemoryBackend, QueueBackend, StoreBackend};
use dockyard_reconciler::{StatusReconciler, UsageCollector};
use dockyard_state::StateStore;

const DB_FILE: &str = "dockyard.redb";

/// All wired subsystems. Cheap handles; clone what you need before `run`.
pub struct Daemon {
    pub config: DockyardConfig,
    pub state: StateStore,
    pub platform: Platform,
    pub queue: JobQueue,
    pub monitor: WorkerHealthMonitor,
    pub reconciler: StatusReconciler,
    pub usage: UsageCollector,
    pub services: LifecycleServices,
    pub api: ApiState,
    timings: LifecycleTimings,
    shutdown_tx: watch::Sender<bool>,
}

fn open_state(config: &DockyardConfig) -> anyhow::Result<StateStore> {
    if config.state.in_memory {
        warn!("state kept in memory; nothing survives a restart");
        return Ok(StateStore::open_in_memory()?);
    }
    let dir = &config.state.data_dir;
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create data dir {}", dir.display()))?;
    let path = dir.join(DB_FILE);
    let state = StateStore::open(&path)?;
    info!(path = ?path, "state store opened");
    Ok(state)
}

async fn platform_client(config: &DockyardConfig) -> anyhow::Result<Arc<dyn PlatformClient>> {
    Ok(match config.platform.mode {
        PlatformMode::Kubernetes => Arc::new(
            KubePlatform::try_default()
                .await
                .context("build kubernetes client")?,
        ),
        PlatformMode::Simulated => {
            warn!("using the simulated platform");
            Arc::new(SimulatedPlatform::new())
        }
    })
}

impl Daemon {
    /// Build from config, choosing the platform client by `platform.mode`.
    pub async fn build(config: DockyardConfig) -> anyhow::Result<Self> {
        let client = platform_client(&config).await?;
        Self::build_with(config, client, Arc::new(LogNotificationSink)).await
    }

    /// Build with an explicit platform client and notification sink.
    pub async fn build_with(
        config: DockyardConfig,
        client: Arc<dyn PlatformClient>,
        sink: Arc<dyn NotificationSink>,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let clock: SharedClock = Arc::new(SystemClock);
        let state = open_state(&config)?;
        let platform = Platform::connect(client).await;

        let backend: Arc<dyn QueueBackend> = match config.queue.backend {
            QueueBackendKind::Durable => Arc::new(StoreBackend::new(state.clone())),
            QueueBackendKind::Memory => Arc::new(MemoryBackend::new()),
        };
        let queue = JobQueue::with_policies(
            backend,
            clock.clone(),
            LanePolicies::from_settings(&config.queue),
        )
        .with_poll_interval(config.queue.poll_interval()?)
        .with_dead_letter_retention(config.queue.dead_letter_retention()?);

        let settings = OrchestratorSettings::from(&config.platform);
        let orchestrator =
            ResourceOrchestrator::new(state.clone(), platform.clone(), clock.clone(), settings.clone());
        let reconciler =
            StatusReconciler::new(state.clone(), platform.clone(), queue.clone(), clock.clone());
        let usage = UsageCollector::new(
            state.clone(),
            platform.clone(),
            clock.clone(),
            config.reconciler.usage_retention()?,
        );
        let thresholds = Thresholds::from_settings(&config.health);
        let monitor = WorkerHealthMonitor::new(state.clone(), clock.clone(), thresholds);
        let admin = NodeAdmin::new(state.clone(), platform.clone(), clock.clone(), thresholds);
        let orphans = OrphanDetector::new(state.clone(), platform.clone(), &settings);

        let timings = LifecycleTimings::from_settings(&config.lifecycle)?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let subscriptions = SubscriptionCoordinator::new(
            state.clone(),
            orchestrator.clone(),
            queue.clone(),
            clock.clone(),
            &timings,
        );
        let pods = PodCoordinator::new(
            state.clone(),
            orchestrator,
            reconciler.clone(),
            queue.clone(),
            clock,
            timings.clone(),
        )
        .with_shutdown(shutdown_rx);
        let services = LifecycleServices {
            subscriptions: subscriptions.clone(),
            pods,
            orphans: orphans.clone(),
            sink,
        };
        services.register(&queue);

        let api = ApiState {
            store: state.clone(),
            platform: platform.clone(),
            queue: queue.clone(),
            monitor: monitor.clone(),
            admin,
            reconciler: reconciler.clone(),
            orphans,
            subscriptions,
        };

        Ok(Self {
            config,
            state,
            platform,
            queue,
            monitor,
            reconciler,
            usage,
            services,
            api,
            timings,
            shutdown_tx,
        })
    }

    pub fn router(&self) -> Router {
        dockyard_api::build_router(self.api.clone())
    }

    /// Start queue workers and periodic loops, serve the API on `listener`,
    /// and stop everything once `shutdown` resolves.
    pub async fn run<F>(self, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let health_every = self.config.health.sweep_interval()?;
        let reconcile_every = self.config.reconciler.interval()?;
        let usage_every = self.config.reconciler.metrics_interval()?;

        self.queue.start();
        let scheduled = schedule_recurring(&self.queue, &self.timings);
        info!(jobs = scheduled.len(), "recurring lifecycle jobs scheduled");

        let rx = self.shutdown_tx.subscribe();
        let loops = vec![
            {
                let monitor = self.monitor.clone();
                let rx = rx.clone();
                tokio::spawn(async move { monitor.run(health_every, rx).await })
            },
            {
                let reconciler = self.reconciler.clone();
                let rx = rx.clone();
                tokio::spawn(async move { reconciler.run(reconcile_every, rx).await })
            },
            {
                let usage = self.usage.clone();
                tokio::spawn(async move { usage.run(usage_every, rx).await })
            },
        ];

        let addr = listener.local_addr()?;
        info!(%addr, "API server starting");
        let shutdown_tx = self.shutdown_tx.clone();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                shutdown.await;
                info!("shutdown signal received");
                let _ = shutdown_tx.send(true);
            })
            .await?;

        // The server may also stop on its own; make sure the loops see it.
        let _ = self.shutdown_tx.send(true);
        for result in futures::future::join_all(loops).await {
            if let Err(e) = result {
                warn!(error = %e, "background loop ended abnormally");
            }
        }
        self.queue.stop().await;
        info!("dockyard daemon stopped");
        Ok(())
    }
}

/// Load and validate a config file; a missing path yields the defaults.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<DockyardConfig> {
    match path {
        Some(p) => DockyardConfig::from_file(p)
            .with_context(|| format!("load config {}", p.display())),
        None => {
            let config = DockyardConfig::default();
            config.validate()?;
            Ok(config)
        }
    }
}
