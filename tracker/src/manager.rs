//! Per-server control loops and the aggregate view over all of them.
//!
//! Each tracked server runs four workers: log ingestion, a dump tick, an
//! expiry sweep and a consumer for routed events. Servers share nothing but
//! the reputation source.

use crate::config::{ServerConfig, SourceConfig, TrackerSettings};
use crate::enrichment::{run_enrichment, ReputationSource};
use crate::error::RconError;
use crate::fetcher::DumpFetcher;
use crate::rcon::RconClient;
use crate::recorder::{spawn_recorder, EventRecorder};
use crate::router::Router;
use crate::shutdown::Shutdown;
use crate::state::{PlayerUpdate, ServerSnapshot, ServerState};
use crate::transport::{LogSource, RemoteSource, ReplaySource, TailSource};
use log::{debug, error, info, warn};
use shared::{Event, EventKind, Payload};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, sleep, MissedTickBehavior};

/// Buffer between a log source and its router.
pub const INGRESS_QUEUE: usize = 1024;
/// Buffer for the roster's own event subscription.
pub const EVENT_QUEUE: usize = 256;
const REOPEN_DELAY: Duration = Duration::from_secs(5);

/// One backing server: its RCON connection, router, fetcher, log source and
/// roster.
pub struct TrackedServer {
    config: ServerConfig,
    rcon: Arc<RconClient>,
    router: Arc<Router>,
    state: Arc<ServerState>,
    fetcher: Mutex<DumpFetcher>,
    source: Mutex<Option<LogSource>>,
}

impl TrackedServer {
    pub fn new(config: ServerConfig, settings: &TrackerSettings) -> Self {
        let rcon = Arc::new(RconClient::new(
            config.rcon_address.clone(),
            config.rcon_password.clone(),
            settings.rcon_timeout,
        ));
        let source = match &config.source {
            SourceConfig::Tail { path } => Some(LogSource::Tail(TailSource::new(path))),
            SourceConfig::Remote { listen, public_address } => Some(LogSource::Remote(RemoteSource::new(
                listen.to_string(),
                public_address.clone(),
                config.log_secret,
                Arc::clone(&rcon),
            ))),
            SourceConfig::Replay { path, interval } => Some(LogSource::Replay(ReplaySource::new(path, *interval))),
            SourceConfig::None => None,
        };

        Self {
            fetcher: Mutex::new(DumpFetcher::new(Arc::clone(&rcon), config.mode)),
            state: Arc::new(ServerState::new(config.rcon_address.clone(), config.log_secret)),
            router: Arc::new(Router::new()),
            source: Mutex::new(source),
            rcon,
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.rcon_address
    }

    pub fn state(&self) -> Arc<ServerState> {
        Arc::clone(&self.state)
    }

    pub fn router(&self) -> Arc<Router> {
        Arc::clone(&self.router)
    }

    /// One dump tick: the dump fetch and the enrichment pass run side by
    /// side and each merges on its own.
    pub async fn tick(&self, reputation: &dyn ReputationSource, settings: &TrackerSettings) {
        let dump = async {
            let fetched = self.fetcher.lock().await.fetch().await;
            match fetched {
                Ok(result) => {
                    self.state
                        .set_players(PlayerUpdate::Dump {
                            result: Box::new(result),
                            at: Instant::now(),
                        })
                        .await;
                }
                Err(e) => warn!("Dump fetch from {} failed: {}", self.name(), e),
            }
        };
        let enrichment = run_enrichment(&self.state, reputation, settings);
        tokio::join!(dump, enrichment);
    }

    /// Applies one routed event to the roster.
    pub async fn handle_event(&self, event: Event) {
        match event.payload {
            Payload::StatusLine(line) => {
                self.state
                    .set_players(PlayerUpdate::Status {
                        line,
                        at: Instant::now(),
                    })
                    .await;
            }
            Payload::Disconnect(disconnect) => {
                debug!(
                    "{} left {} ({}); keeping the row until it expires",
                    disconnect.name,
                    self.name(),
                    disconnect.reason
                );
            }
            _ => {}
        }
    }

    async fn run_ingest(self: Arc<Self>, mut shutdown: Shutdown) {
        let mut guard = self.source.lock().await;
        let Some(source) = guard.as_mut() else {
            return;
        };

        loop {
            match source.open().await {
                Ok(()) => break,
                Err(e) => {
                    error!("Failed to open {} log source for {}: {}", source.name(), self.name(), e);
                    tokio::select! {
                        _ = shutdown.wait() => return,
                        _ = sleep(REOPEN_DELAY) => {}
                    }
                }
            }
        }

        let (tx, rx) = mpsc::channel(INGRESS_QUEUE);
        let router = Arc::clone(&self.router);
        let router_shutdown = shutdown.clone();
        let router_task = tokio::spawn(async move { router.run(rx, router_shutdown).await });

        if let Err(e) = source.start(shutdown, tx).await {
            error!("{} log source for {} stopped: {}", source.name(), self.name(), e);
        }
        if let Err(e) = router_task.await {
            error!("Router task for {} panicked: {}", self.name(), e);
        }
    }

    async fn run_dumps(self: Arc<Self>, reputation: Arc<dyn ReputationSource>, settings: TrackerSettings, mut shutdown: Shutdown) {
        let mut ticker = interval(settings.dump_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut ticks = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = ticker.tick() => {
                    let server = Arc::clone(&self);
                    let reputation = Arc::clone(&reputation);
                    ticks.spawn(async move { server.tick(reputation.as_ref(), &settings).await });
                }
                Some(done) = ticks.join_next(), if !ticks.is_empty() => {
                    if let Err(e) = done {
                        error!("Dump tick for {} panicked: {}", self.name(), e);
                    }
                }
            }
        }
        ticks.shutdown().await;
    }

    async fn run_expiry(self: Arc<Self>, settings: TrackerSettings, mut shutdown: Shutdown) {
        let mut ticker = interval(settings.expire_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = ticker.tick() => {
                    self.state.remove_expired(Instant::now(), settings.player_timeout).await;
                }
            }
        }
    }

    async fn run_events(self: Arc<Self>, mut events: mpsc::Receiver<Event>, mut shutdown: Shutdown) {
        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => break,
                },
            }
        }
    }

    /// Registers subscriptions, then spawns every worker for this server.
    pub async fn start(
        self: &Arc<Self>,
        reputation: Arc<dyn ReputationSource>,
        settings: TrackerSettings,
        shutdown: Shutdown,
    ) -> Vec<JoinHandle<()>> {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE);
        self.router.listen_for(EventKind::StatusLine, tx.clone()).await;
        self.router.listen_for(EventKind::Disconnect, tx).await;

        vec![
            tokio::spawn(Arc::clone(self).run_events(rx, shutdown.clone())),
            tokio::spawn(Arc::clone(self).run_ingest(shutdown.clone())),
            tokio::spawn(Arc::clone(self).run_dumps(reputation, settings, shutdown.clone())),
            tokio::spawn(Arc::clone(self).run_expiry(settings, shutdown)),
        ]
    }

    /// Deregisters the log source and drops the RCON connection.
    ///
    /// Ingestion holds the source for as long as it runs, so this waits
    /// until the shutdown signal passed to [`start`](Self::start) has fired
    /// and ingestion has returned.
    pub async fn close(&self) {
        if let Some(source) = self.source.lock().await.as_mut() {
            source.close().await;
        }
        self.rcon.close().await;
    }
}

/// Owns every tracked server.
pub struct Manager {
    servers: Vec<Arc<TrackedServer>>,
    settings: TrackerSettings,
    reputation: Arc<dyn ReputationSource>,
    recorder: Option<Arc<dyn EventRecorder>>,
}

impl Manager {
    pub fn new(servers: Vec<ServerConfig>, settings: TrackerSettings, reputation: Arc<dyn ReputationSource>) -> Self {
        let servers = servers
            .into_iter()
            .map(|config| Arc::new(TrackedServer::new(config, &settings)))
            .collect();
        Self {
            servers,
            settings,
            reputation,
            recorder: None,
        }
    }

    /// Feeds chat and kills from every server to `recorder`.
    pub fn with_recorder(mut self, recorder: Arc<dyn EventRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Spawns all workers for all servers and returns their handles.
    pub async fn start(&self, shutdown: Shutdown) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        for server in &self.servers {
            info!(
                "Tracking {} ({:?} mode, {:?} log source)",
                server.name(),
                server.config.mode,
                server.config.source
            );
            handles.extend(
                server
                    .start(Arc::clone(&self.reputation), self.settings, shutdown.clone())
                    .await,
            );
            if let Some(recorder) = &self.recorder {
                handles.push(
                    spawn_recorder(
                        server.name().to_string(),
                        server.router(),
                        Arc::clone(recorder),
                        shutdown.clone(),
                    )
                    .await,
                );
            }
        }
        handles
    }

    /// One snapshot per server, in configuration order.
    pub async fn snapshot(&self) -> Vec<ServerSnapshot> {
        let mut snapshots = Vec::with_capacity(self.servers.len());
        for server in &self.servers {
            snapshots.push(server.state.snapshot().await);
        }
        snapshots
    }

    /// Passes an operator command through to server `index`.
    pub async fn exec(&self, index: usize, command: &str) -> Result<String, RconError> {
        let server = self.servers.get(index).ok_or(RconError::UnknownServer(index))?;
        server.rcon.exec(command, true).await
    }

    pub fn router(&self, index: usize) -> Option<Arc<Router>> {
        self.servers.get(index).map(|s| s.router())
    }

    pub fn server(&self, index: usize) -> Option<&Arc<TrackedServer>> {
        self.servers.get(index)
    }

    /// Closes every server. Fire the shutdown trigger first; see
    /// [`TrackedServer::close`].
    pub async fn close(&self) {
        for server in &self.servers {
            server.close().await;
        }
    }
}
