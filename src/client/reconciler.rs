use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::{
    sync::{broadcast::{self, error::{RecvError, TryRecvError}}, watch},
    task::JoinHandle,
    time::{Instant, Interval, MissedTickBehavior},
};

use crate::realtime::{ChangeKind, RealtimeEvent, Table};

use super::BackendError;

/// Something that can produce a full snapshot of remote state.
#[async_trait]
pub trait Source: Send + Sync + 'static {
    type Snapshot: Clone + Send + Sync + 'static;

    async fn fetch(&self) -> Result<Self::Snapshot, BackendError>;
}

/// Change notifications for one table.
pub struct ChangeReceiver {
    rx: broadcast::Receiver<RealtimeEvent>,
    table: Table,
}

impl ChangeReceiver {
    pub fn new(rx: broadcast::Receiver<RealtimeEvent>, table: Table) -> ChangeReceiver {
        ChangeReceiver { rx, table }
    }

    /// `None` once the notification transport is gone.
    pub async fn recv(&mut self) -> Option<ChangeKind> {
        loop {
            match self.rx.recv().await {
                Ok(RealtimeEvent::Change(change)) if change.table == self.table => return Some(change.kind),
                Ok(_) => continue,
                // something changed, we just don't know what
                Err(RecvError::Lagged(_)) => return Some(ChangeKind::Update),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Drops notifications already queued; one re-fetch covers them all.
    fn drain(&mut self) -> usize {
        let mut drained = 0;
        loop {
            match self.rx.try_recv() {
                Ok(RealtimeEvent::Change(change)) if change.table == self.table => drained += 1,
                Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty | TryRecvError::Closed) => return drained,
            }
        }
    }
}

/// Aborts the owned task on drop, so a response arriving after teardown is discarded.
pub struct Subscription {
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn spawn<F>(future: F) -> Subscription
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        Subscription { task: tokio::spawn(future) }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Local copy of remote state, replaced wholesale on every successful fetch.
///
/// Fetches are triggered by change notifications and, as a fallback for a
/// silently dropped notification channel, by a poll that only fires when no
/// fetch succeeded within the poll period.
pub struct Reconciler<T> {
    state: watch::Sender<T>,
    synced_at: Mutex<Option<Instant>>,
}

impl<T: Clone + Send + Sync + 'static> Reconciler<T> {
    pub fn new(initial: T) -> Arc<Reconciler<T>> {
        Arc::new(Reconciler {
            state: watch::Sender::new(initial),
            synced_at: Mutex::new(None),
        })
    }

    pub fn current(&self) -> T {
        self.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<T> {
        self.state.subscribe()
    }

    pub fn replace(&self, value: T) {
        self.state.send_replace(value);
        *self.synced_at.lock() = Some(Instant::now());
    }

    /// Local patch that does not count as a sync.
    pub fn modify(&self, patch: impl FnOnce(&mut T)) {
        self.state.send_modify(patch);
    }

    pub fn synced_at(&self) -> Option<Instant> {
        *self.synced_at.lock()
    }

    pub fn is_stale(&self, now: Instant, max_age: Duration) -> bool {
        match self.synced_at() {
            Some(at) => now.saturating_duration_since(at) >= max_age,
            None => true,
        }
    }

    /// On failure the previous state stays in place.
    pub async fn refresh<S>(&self, source: &S) -> bool
    where
        S: Source<Snapshot = T> + ?Sized,
    {
        match source.fetch().await {
            Ok(snapshot) => {
                self.replace(snapshot);
                true
            }
            Err(err) => {
                tracing::warn!("fetch failed, keeping previous state: {err}");
                false
            }
        }
    }

    pub fn spawn<S>(self: &Arc<Self>, source: Arc<S>, mut changes: ChangeReceiver, poll: Option<Duration>) -> Subscription
    where
        S: Source<Snapshot = T>,
    {
        let this = self.clone();
        Subscription::spawn(async move {
            this.refresh(&*source).await;

            let mut ticker = poll.map(|period| {
                let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                (ticker, period)
            });
            let mut subscribed = true;

            loop {
                tokio::select! {
                    change = changes.recv(), if subscribed => match change {
                        Some(kind) => {
                            let coalesced = changes.drain();
                            tracing::debug!(table = ?changes.table, ?kind, coalesced, "change notification");
                        }
                        None => {
                            tracing::warn!(table = ?changes.table, "change notifications closed");
                            subscribed = false;
                            if ticker.is_none() {
                                break;
                            }
                            continue;
                        }
                    },
                    () = tick(&mut ticker) => {
                        let Some((_, period)) = &ticker else { continue };
                        if !this.is_stale(Instant::now(), *period) {
                            continue;
                        }
                        tracing::trace!(table = ?changes.table, "poll fallback");
                    }
                }
                this.refresh(&*source).await;
            }
        })
    }
}

async fn tick(ticker: &mut Option<(Interval, Duration)>) {
    match ticker {
        Some((interval, _)) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
