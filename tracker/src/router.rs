//! In-process publish/subscribe hub between log sources and consumers.
//!
//! Raw lines go in through [`Router::send`], get classified, and are handed
//! to every queue registered for the event's kind plus every queue
//! registered for [`EventKind::Any`]. Sends block on full queues, so a slow
//! subscriber holds up ingestion; subscribers that must never do that should
//! register a generously buffered queue.

use crate::shutdown::Shutdown;
use log::{debug, info};
use shared::{parse, Event, EventKind, ParseError};
use std::collections::HashMap;
use tokio::sync::{mpsc, RwLock};

#[derive(Default)]
pub struct Router {
    subscribers: RwLock<HashMap<EventKind, Vec<mpsc::Sender<Event>>>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `queue` for events of `kind`; `EventKind::Any` receives all.
    pub async fn listen_for(&self, kind: EventKind, queue: mpsc::Sender<Event>) {
        self.subscribers.write().await.entry(kind).or_default().push(queue);
    }

    /// Classifies a raw line and delivers it. Malformed lines are dropped;
    /// unrecognised ones are delivered as `Any` events.
    pub async fn send(&self, line: &str) {
        let event = match parse(line) {
            Ok(event) => event,
            Err(ParseError::NoMatch) => Event::unclassified(line),
            Err(e) => {
                debug!("Dropping malformed log line ({}): {}", e, line);
                return;
            }
        };
        self.publish(event).await;
    }

    /// Delivers an already built event.
    pub async fn publish(&self, event: Event) {
        let kind = event.kind();
        let targets: Vec<mpsc::Sender<Event>> = {
            let subscribers = self.subscribers.read().await;
            let specific = subscribers.get(&kind).into_iter().flatten();
            let any = match kind {
                EventKind::Any => None,
                _ => subscribers.get(&EventKind::Any),
            };
            specific.chain(any.into_iter().flatten()).cloned().collect()
        };

        let mut closed = false;
        for target in targets {
            if target.send(event.clone()).await.is_err() {
                closed = true;
            }
        }

        if closed {
            self.prune().await;
        }
    }

    /// Drops queues whose receivers are gone.
    async fn prune(&self) {
        let mut subscribers = self.subscribers.write().await;
        for queues in subscribers.values_mut() {
            queues.retain(|q| !q.is_closed());
        }
        subscribers.retain(|_, queues| !queues.is_empty());
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.values().map(Vec::len).sum()
    }

    /// Drains the single ingress queue fed by the log sources.
    pub async fn run(&self, mut ingress: mpsc::Receiver<String>, mut shutdown: Shutdown) {
        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                line = ingress.recv() => match line {
                    Some(line) => self.send(&line).await,
                    None => break,
                },
            }
        }
        info!("Router stopped");
    }
}
