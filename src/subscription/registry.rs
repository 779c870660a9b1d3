//! Subscription registry.
//!
//! # Responsibilities
//! - Multiplex many subscriptions over one event connection
//! - Share one transport-level subscription between identical queries
//! - Reconnect and re-subscribe transparently when the connection drops
//! - Report every subscription lost once reconnection is exhausted
//!
//! Only the driver task touches the connection. The public API edits the
//! subscription table under a short lock and talks to the driver over a
//! command channel.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::SubscriptionConfig;
use crate::ledger::{
    EventConnection, EventQuery, LedgerError, LedgerResult, QueryEvent, SubscriptionId, Transport,
    TransportError,
};
use crate::lifecycle::{CancelHandle, CancelToken};
use crate::observability::metrics;
use crate::resilience::RetryPolicy;
use crate::subscription::stream::{self, Delivery, Subscription};

struct Entry {
    query: EventQuery,
    /// Never blocks; the subscription's forwarder applies backpressure.
    tx: mpsc::UnboundedSender<Delivery>,
    cancel: CancelHandle,
    /// Highest height delivered so far.
    last_height: Option<u64>,
}

type Table = Arc<Mutex<HashMap<SubscriptionId, Entry>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn is_referenced(table: &Table, query: &EventQuery) -> bool {
    lock(table).values().any(|entry| &entry.query == query)
}

enum Command {
    Subscribe {
        query: EventQuery,
        ack: oneshot::Sender<Result<(), TransportError>>,
    },
    Unsubscribe {
        query: EventQuery,
    },
}

struct DriverHandle {
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

/// Owner of every live subscription of one client.
pub struct SubscriptionRegistry {
    transport: Arc<dyn Transport>,
    capacity: usize,
    reconnect: RetryPolicy,
    table: Table,
    next_id: AtomicU64,
    driver: Mutex<Option<DriverHandle>>,
    shutdown: CancelHandle,
    closed: AtomicBool,
}

impl SubscriptionRegistry {
    /// The event connection is opened lazily by the first subscription.
    pub fn new(transport: Arc<dyn Transport>, config: &SubscriptionConfig) -> Self {
        Self {
            transport,
            capacity: config.channel_capacity.max(1),
            reconnect: RetryPolicy::from(config),
            table: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            driver: Mutex::new(None),
            shutdown: CancelHandle::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Number of live subscriptions.
    pub fn active_count(&self) -> usize {
        lock(&self.table).len()
    }

    pub fn is_active(&self, id: SubscriptionId) -> bool {
        lock(&self.table).contains_key(&id)
    }

    /// Subscribe to `query`. Returns once the node acknowledged it.
    pub async fn subscribe(&self, query: EventQuery) -> LedgerResult<Subscription> {
        // A driver that gave up after exhausting reconnection is replaced once.
        for _ in 0..2 {
            if self.closed.load(Ordering::Acquire) {
                return Err(LedgerError::RegistryClosed);
            }
            if let Some(subscription) = self.try_subscribe(&query).await? {
                return Ok(subscription);
            }
        }
        Err(LedgerError::RegistryClosed)
    }

    async fn try_subscribe(&self, query: &EventQuery) -> LedgerResult<Option<Subscription>> {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let cancel = CancelHandle::new();
        let (tx, subscription) = stream::open(id, query.clone(), self.capacity, cancel.token());

        {
            let mut table = lock(&self.table);
            table.insert(
                id,
                Entry {
                    query: query.clone(),
                    tx,
                    cancel,
                    last_height: None,
                },
            );
            metrics::record_active_subscriptions(table.len());
        }

        let (ack, acked) = oneshot::channel();
        let command = Command::Subscribe {
            query: query.clone(),
            ack,
        };
        if self.commands().send(command).is_err() {
            self.forget(id);
            return Ok(None);
        }

        match acked.await {
            Ok(Ok(())) => {
                tracing::debug!(subscription = %id, query = %query, "Subscribed");
                Ok(Some(subscription))
            }
            Ok(Err(e)) => {
                self.forget(id);
                tracing::warn!(query = %query, error = %e, "Subscription rejected");
                Err(LedgerError::Transport(e))
            }
            Err(_) => {
                self.forget(id);
                Ok(None)
            }
        }
    }

    /// Cancel a subscription. Returns `false` if it was not active.
    ///
    /// The entry is gone when this returns: reconnection never restores it
    /// and its receiver yields nothing further.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let (query, orphaned) = {
            let mut table = lock(&self.table);
            let Some(entry) = table.remove(&id) else {
                return false;
            };
            entry.cancel.cancel();
            let orphaned = !table.values().any(|e| e.query == entry.query);
            metrics::record_active_subscriptions(table.len());
            (entry.query, orphaned)
        };

        if orphaned {
            if let Some(driver) = lock(&self.driver).as_ref() {
                let _ = driver.commands.send(Command::Unsubscribe {
                    query: query.clone(),
                });
            }
        }
        tracing::debug!(subscription = %id, query = %query, "Unsubscribed");
        true
    }

    /// Stop the driver and close every subscription. Later subscribes fail
    /// with [`LedgerError::RegistryClosed`].
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        self.shutdown.cancel();

        let closed: Vec<Entry> = lock(&self.table).drain().map(|(_, entry)| entry).collect();
        for entry in &closed {
            entry.cancel.cancel();
        }
        metrics::record_active_subscriptions(0);

        let driver = lock(&self.driver).take();
        if let Some(driver) = driver {
            drop(driver.commands);
            if let Err(e) = driver.task.await {
                tracing::error!(error = %e, "Subscription driver panicked");
            }
        }
        tracing::info!(closed = closed.len(), "Subscription registry shut down");
    }

    fn forget(&self, id: SubscriptionId) {
        let mut table = lock(&self.table);
        table.remove(&id);
        metrics::record_active_subscriptions(table.len());
    }

    /// Command channel of the running driver, spawning one if needed.
    fn commands(&self) -> mpsc::UnboundedSender<Command> {
        let mut driver = lock(&self.driver);
        if let Some(running) = driver.as_ref() {
            if !running.commands.is_closed() {
                return running.commands.clone();
            }
        }

        let (commands, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(
            Driver {
                transport: self.transport.clone(),
                table: self.table.clone(),
                reconnect: self.reconnect,
                commands: rx,
                shutdown: self.shutdown.token(),
            }
            .run(),
        );
        *driver = Some(DriverHandle {
            commands: commands.clone(),
            task,
        });
        commands
    }
}

impl Drop for SubscriptionRegistry {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("active", &self.active_count())
            .field("capacity", &self.capacity)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

/// Connect and subscribe every query still referenced at that moment.
async fn establish(
    transport: &Arc<dyn Transport>,
    table: &Table,
    policy: &RetryPolicy,
) -> Result<(Box<dyn EventConnection>, HashSet<EventQuery>), TransportError> {
    policy
        .retry("event connection", |attempt| async move {
            let mut conn = transport.connect_events().await?;
            let queries: HashSet<EventQuery> =
                lock(table).values().map(|entry| entry.query.clone()).collect();
            for query in &queries {
                conn.subscribe(query).await?;
            }
            tracing::debug!(attempt, queries = queries.len(), "Event connection ready");
            Ok::<_, TransportError>((conn, queries))
        })
        .await
}

enum Step {
    Command(Command),
    Event(Result<Option<QueryEvent>, TransportError>),
}

/// Task owning the event connection.
struct Driver {
    transport: Arc<dyn Transport>,
    table: Table,
    reconnect: RetryPolicy,
    commands: mpsc::UnboundedReceiver<Command>,
    shutdown: CancelToken,
}

impl Driver {
    async fn run(mut self) {
        let mut reconnecting = false;
        loop {
            let established = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return,
                result = establish(&self.transport, &self.table, &self.reconnect) => result,
            };

            let (mut conn, mut subscribed) = match established {
                Ok(established) => {
                    if reconnecting {
                        metrics::record_reconnect("success");
                        tracing::info!(queries = established.1.len(), "Event connection restored");
                    }
                    established
                }
                Err(e) => {
                    if reconnecting {
                        metrics::record_reconnect("exhausted");
                    }
                    tracing::error!(error = %e, "Event connection could not be established");
                    self.fail_all(&e);
                    return;
                }
            };

            match self.serve(&mut conn, &mut subscribed).await {
                None => return,
                Some(reason) => {
                    tracing::warn!(reason = %reason, "Event connection lost, reconnecting");
                    reconnecting = true;
                }
            }
        }
    }

    /// Pump commands and events until shutdown (`None`) or connection loss.
    async fn serve(
        &mut self,
        conn: &mut Box<dyn EventConnection>,
        subscribed: &mut HashSet<EventQuery>,
    ) -> Option<String> {
        loop {
            let step = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return None,
                command = self.commands.recv() => match command {
                    Some(command) => Step::Command(command),
                    None => return None,
                },
                event = conn.next_event() => Step::Event(event),
            };

            match step {
                Step::Command(Command::Subscribe { query, ack }) => {
                    if subscribed.contains(&query) {
                        let _ = ack.send(Ok(()));
                        continue;
                    }
                    match conn.subscribe(&query).await {
                        Ok(()) => {
                            subscribed.insert(query);
                            let _ = ack.send(Ok(()));
                        }
                        Err(e) => {
                            let _ = ack.send(Err(e.clone()));
                            if matches!(e, TransportError::ConnectionClosed(_)) {
                                return Some(e.to_string());
                            }
                        }
                    }
                }
                Step::Command(Command::Unsubscribe { query }) => {
                    if let Err(e) = self.release(conn, subscribed, &query).await {
                        return Some(e.to_string());
                    }
                }
                Step::Event(Ok(Some(event))) => {
                    for query in self.dispatch(event) {
                        if let Err(e) = self.release(conn, subscribed, &query).await {
                            return Some(e.to_string());
                        }
                    }
                }
                Step::Event(Ok(None)) => return Some("connection closed by peer".to_string()),
                Step::Event(Err(e)) => return Some(e.to_string()),
            }
        }
    }

    /// Drop the transport-level subscription once no entry references it.
    async fn release(
        &self,
        conn: &mut Box<dyn EventConnection>,
        subscribed: &mut HashSet<EventQuery>,
        query: &EventQuery,
    ) -> Result<(), TransportError> {
        if is_referenced(&self.table, query) || !subscribed.remove(query) {
            return Ok(());
        }
        match conn.unsubscribe(query).await {
            Ok(()) => {
                tracing::debug!(query = %query, "Released transport subscription");
                Ok(())
            }
            Err(e @ TransportError::ConnectionClosed(_)) => Err(e),
            Err(e) => {
                tracing::warn!(query = %query, error = %e, "Failed to release transport subscription");
                Ok(())
            }
        }
    }

    /// Deliver an event to every matching entry. Returns queries left
    /// without subscribers because their receivers were dropped.
    ///
    /// Never waits on a consumer: a full subscription only delays its own
    /// forwarder.
    fn dispatch(&self, event: QueryEvent) -> Vec<EventQuery> {
        let height = event.block.height;
        let mut table = lock(&self.table);

        let mut dropped = Vec::new();
        for (id, entry) in table.iter_mut().filter(|(_, entry)| entry.query == event.query) {
            if entry.last_height.is_some_and(|last| height <= last) {
                tracing::debug!(subscription = %id, height, "Skipping replayed event");
                continue;
            }
            entry.last_height = Some(height);
            if entry.tx.send(Ok(event.block.clone())).is_err() {
                dropped.push(*id);
            }
        }

        if dropped.is_empty() {
            return Vec::new();
        }
        for id in &dropped {
            table.remove(id);
            tracing::debug!(subscription = %id, "Receiver dropped, pruning subscription");
        }
        metrics::record_active_subscriptions(table.len());
        if table.values().any(|entry| entry.query == event.query) {
            Vec::new()
        } else {
            vec![event.query]
        }
    }

    /// Reconnection is exhausted: report every subscription lost, forget
    /// them and reject queued commands.
    fn fail_all(&mut self, error: &TransportError) {
        let lost: Vec<(SubscriptionId, Entry)> = lock(&self.table).drain().collect();
        metrics::record_subscriptions_lost(lost.len());
        metrics::record_active_subscriptions(0);

        for (id, entry) in lost {
            tracing::warn!(subscription = %id, query = %entry.query, "Subscription lost");
            let notice = LedgerError::SubscriptionLost {
                id,
                reason: error.to_string(),
            };
            let _ = entry.tx.send(Err(notice));
        }

        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            if let Command::Subscribe { ack, .. } = command {
                let _ = ack.send(Err(error.clone()));
            }
        }
    }
}
