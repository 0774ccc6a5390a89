//! Persistence sink for chat and kill events.
//!
//! Durable storage lives outside this crate; [`EventRecorder`] is the seam.
//! A failing sink is logged and never stops ingestion.

use crate::error::RecordError;
use crate::router::Router;
use crate::shutdown::Shutdown;
use async_trait::async_trait;
use log::{info, warn};
use shared::{Event, EventKind, Payload};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Queue depth for the recorder subscription.
pub const RECORDER_QUEUE: usize = 256;

#[async_trait]
pub trait EventRecorder: Send + Sync {
    async fn record(&self, server: &str, event: &Event) -> Result<(), RecordError>;
}

/// Writes chat and kills to the process log.
pub struct LogRecorder;

#[async_trait]
impl EventRecorder for LogRecorder {
    async fn record(&self, server: &str, event: &Event) -> Result<(), RecordError> {
        match &event.payload {
            Payload::Msg(msg) => {
                let scope = if msg.team_only { "team" } else { "all" };
                let dead = if msg.dead { " (dead)" } else { "" };
                info!("[{}] {}{} ({}): {}", server, msg.name, dead, scope, msg.message);
            }
            Payload::Kill(kill) => {
                let crit = if kill.crit { " (crit)" } else { "" };
                info!("[{}] {} killed {} with {}{}", server, kill.attacker, kill.victim, kill.weapon, crit);
            }
            _ => {}
        }
        Ok(())
    }
}

/// Subscribes `recorder` to chat and kill events on `router` and feeds it
/// until shutdown or until the router goes away.
pub async fn spawn_recorder(
    server: String,
    router: Arc<Router>,
    recorder: Arc<dyn EventRecorder>,
    mut shutdown: Shutdown,
) -> JoinHandle<()> {
    let (tx, mut rx) = mpsc::channel::<Event>(RECORDER_QUEUE);
    router.listen_for(EventKind::Msg, tx.clone()).await;
    router.listen_for(EventKind::Kill, tx).await;

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    if let Err(e) = recorder.record(&server, &event).await {
                        warn!("Failed to record event from {}: {}", server, e);
                    }
                }
            }
        }
    })
}
