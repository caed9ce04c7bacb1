use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::{
    runtime::Handle,
    sync::{oneshot, watch},
    task::JoinHandle,
    time::MissedTickBehavior,
};

use crate::{
    identity::{Identity, Role},
    model::{CountryCode, Presence},
    realtime::Table,
};

use super::{
    reconciler::{ChangeReceiver, Reconciler, Source, Subscription},
    BackendError, ChatBackend, ClientConfig,
};

/// Why a client stops advertising itself. None of these is guaranteed to be
/// observed, so each one independently deletes the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveTrigger {
    Unmount,
    /// The view went to the background; [`Heartbeat::resume`] brings it back.
    PageHide,
    Unload,
    SignOut,
}

impl LeaveTrigger {
    fn is_terminal(self) -> bool {
        self != LeaveTrigger::PageHide
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Beat {
    Running,
    Paused,
    Left,
}

/// A running refresh loop and the signal that ends it.
struct Beating {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl Beating {
    /// Lets an upsert already in flight complete, then ends the loop. No
    /// upsert issued by this loop can land after this returns.
    async fn finish(self) {
        let _ = self.stop.send(());
        if let Err(err) = self.task.await {
            tracing::warn!("presence heartbeat ended abnormally: {err}");
        }
    }
}

/// Keeps this client's presence record fresh while it lives.
pub struct Heartbeat {
    backend: Arc<dyn ChatBackend>,
    record: Presence,
    every: Duration,
    beating: Option<Beating>,
    beat: Beat,
}

impl Heartbeat {
    /// `None` when the identity has no usable display name; such a client
    /// never shows up in anyone's roster.
    pub fn start(
        backend: Arc<dyn ChatBackend>,
        identity: &Identity,
        country: Option<CountryCode>,
        every: Duration,
    ) -> Option<Heartbeat> {
        let username = identity.display_name()?;
        let record = Presence {
            user_id: identity.user_id.clone(),
            username,
            country,
            role: identity.role,
            last_active: OffsetDateTime::now_utc(),
        };

        let mut heartbeat = Heartbeat { backend, record, every, beating: None, beat: Beat::Paused };
        heartbeat.run();
        Some(heartbeat)
    }

    fn run(&mut self) {
        let backend = self.backend.clone();
        let mut record = self.record.clone();
        let every = self.every;
        let (stop, mut stopped) = oneshot::channel();

        tracing::info!(user_id = %record.user_id, "presence heartbeat started");
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                // first tick completes immediately
                tokio::select! {
                    biased;
                    _ = &mut stopped => break,
                    _ = ticker.tick() => {}
                }
                // not raced against the stop signal: an upsert that has been
                // issued is awaited to the end
                record.last_active = OffsetDateTime::now_utc();
                if let Err(err) = backend.upsert_presence(record.clone()).await {
                    tracing::warn!("presence upsert failed: {err}");
                }
            }
        });
        self.beating = Some(Beating { stop, task });
        self.beat = Beat::Running;
    }

    pub fn is_running(&self) -> bool {
        self.beat == Beat::Running
    }

    /// Stops refreshing and deletes the record. Repeating a trigger is a no-op;
    /// after a terminal trigger every later call is.
    pub async fn leave(&mut self, trigger: LeaveTrigger) {
        match (self.beat, trigger.is_terminal()) {
            (Beat::Left, _) | (Beat::Paused, false) => return,
            _ => {}
        }

        self.beat = if trigger.is_terminal() { Beat::Left } else { Beat::Paused };
        tracing::info!(user_id = %self.record.user_id, ?trigger, "leaving presence");
        if let Some(beating) = self.beating.take() {
            beating.finish().await;
        }

        if let Err(err) = self.backend.delete_presence(&self.record.user_id).await {
            tracing::warn!("presence delete failed: {err}");
        }
    }

    /// Restarts after a page-hide. Has no effect once the heartbeat has left.
    pub fn resume(&mut self) {
        if self.beat == Beat::Paused {
            self.run();
        }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        let beating = self.beating.take();
        if self.beat == Beat::Left {
            return;
        }

        let Ok(runtime) = Handle::try_current() else {
            tracing::warn!(user_id = %self.record.user_id, "no runtime to delete presence on drop");
            if let Some(beating) = beating {
                beating.task.abort();
            }
            return;
        };
        let backend = self.backend.clone();
        let user_id = self.record.user_id.clone();
        runtime.spawn(async move {
            if let Some(beating) = beating {
                beating.finish().await;
            }
            if let Err(err) = backend.delete_presence(&user_id).await {
                tracing::warn!("presence delete on drop failed: {err}");
            }
        });
    }
}

/// Active users, moderators listed separately, each group sorted by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roster {
    pub moderators: Vec<Presence>,
    pub members: Vec<Presence>,
}

impl Roster {
    pub fn build(records: Vec<Presence>, now: OffsetDateTime, window: Duration) -> Roster {
        let (mut moderators, mut members): (Vec<_>, Vec<_>) = records
            .into_iter()
            .filter(|p| p.is_active(now, window))
            .partition(|p| p.role == Role::Admin);

        moderators.sort_by_cached_key(|p| p.username.to_lowercase());
        members.sort_by_cached_key(|p| p.username.to_lowercase());
        Roster { moderators, members }
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.iter().any(|p| p.user_id == user_id)
    }

    pub fn len(&self) -> usize {
        self.moderators.len() + self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &Presence> {
        self.moderators.iter().chain(&self.members)
    }
}

struct ActivePresence {
    backend: Arc<dyn ChatBackend>,
    window: Duration,
}

#[async_trait]
impl Source for ActivePresence {
    type Snapshot = Roster;

    async fn fetch(&self) -> Result<Roster, BackendError> {
        let records = self.backend.active_presence(self.window).await?;
        // the query already applies the window; filtering again drops
        // records that aged out while the response was in flight
        Ok(Roster::build(records, OffsetDateTime::now_utc(), self.window))
    }
}

/// The roster, re-queried on every presence change and polled as a fallback.
pub struct PresenceRoster {
    state: Arc<Reconciler<Roster>>,
    _sync: Subscription,
}

impl PresenceRoster {
    pub fn start(backend: Arc<dyn ChatBackend>, config: &ClientConfig) -> PresenceRoster {
        let state = Reconciler::new(Roster::default());
        let changes = ChangeReceiver::new(backend.events(), Table::Presence);
        let source = Arc::new(ActivePresence { backend, window: config.active_window });
        let sync = state.spawn(source, changes, Some(config.presence_poll));
        PresenceRoster { state, _sync: sync }
    }

    pub fn roster(&self) -> Roster {
        self.state.current()
    }

    pub fn watch(&self) -> watch::Receiver<Roster> {
        self.state.watch()
    }
}
