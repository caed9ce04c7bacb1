use std::{collections::HashMap, sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::{sync::watch, task::JoinHandle, time::Instant};

use crate::realtime::Signal;

use super::{channel::ChannelHandle, reconciler::Subscription};

/// Who else is typing right now, by username.
#[derive(Debug)]
pub struct TypingSet {
    me: String,
    timeout: Duration,
    deadlines: HashMap<String, Instant>,
}

impl TypingSet {
    pub fn new(me: impl Into<String>, timeout: Duration) -> TypingSet {
        TypingSet { me: me.into(), timeout, deadlines: HashMap::new() }
    }

    /// Returns whether the visible set changed.
    pub fn apply(&mut self, signal: &Signal, now: Instant) -> bool {
        match signal {
            Signal::Typing { username } if *username != self.me => {
                self.deadlines.insert(username.clone(), now + self.timeout).is_none()
            }
            Signal::StoppedTyping { username } => self.deadlines.remove(username).is_some(),
            _ => false,
        }
    }

    pub fn expire(&mut self, now: Instant) -> bool {
        let before = self.deadlines.len();
        self.deadlines.retain(|_, deadline| *deadline > now);
        self.deadlines.len() != before
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    pub fn usernames(&self) -> Vec<String> {
        let mut names: Vec<_> = self.deadlines.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Decides which signals this client's own input produces.
#[derive(Debug)]
pub struct TypingEmitter {
    username: String,
    timeout: Duration,
    last_key: Option<Instant>,
}

impl TypingEmitter {
    pub fn new(username: impl Into<String>, timeout: Duration) -> TypingEmitter {
        TypingEmitter { username: username.into(), timeout, last_key: None }
    }

    pub fn keystroke(&mut self, now: Instant) -> Signal {
        self.last_key = Some(now);
        Signal::Typing { username: self.username.clone() }
    }

    /// `stopped_typing` once the keyboard has been quiet for the timeout.
    pub fn tick(&mut self, now: Instant) -> Option<Signal> {
        match self.deadline() {
            Some(deadline) if now >= deadline => self.stop(),
            _ => None,
        }
    }

    pub fn blur(&mut self) -> Option<Signal> {
        self.stop()
    }

    pub fn sent(&mut self) -> Option<Signal> {
        self.stop()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.last_key.map(|at| at + self.timeout)
    }

    fn stop(&mut self) -> Option<Signal> {
        self.last_key.take().map(|_| Signal::StoppedTyping { username: self.username.clone() })
    }
}

/// Publishes this client's typing state on the chat channel.
pub struct TypingNotifier {
    channel: ChannelHandle,
    emitter: Arc<Mutex<TypingEmitter>>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl TypingNotifier {
    pub fn new(channel: ChannelHandle, username: impl Into<String>, timeout: Duration) -> TypingNotifier {
        TypingNotifier {
            channel,
            emitter: Arc::new(Mutex::new(TypingEmitter::new(username, timeout))),
            timer: Mutex::new(None),
        }
    }

    pub async fn keystroke(&self) {
        let (signal, deadline) = {
            let mut emitter = self.emitter.lock();
            let signal = emitter.keystroke(Instant::now());
            (signal, emitter.deadline())
        };
        self.arm(deadline);
        send(&self.channel, signal).await;
    }

    pub async fn blur(&self) {
        self.disarm();
        let signal = self.emitter.lock().blur();
        if let Some(signal) = signal {
            send(&self.channel, signal).await;
        }
    }

    pub async fn sent(&self) {
        self.disarm();
        let signal = self.emitter.lock().sent();
        if let Some(signal) = signal {
            send(&self.channel, signal).await;
        }
    }

    fn arm(&self, deadline: Option<Instant>) {
        let Some(deadline) = deadline else { return };
        let channel = self.channel.clone();
        let emitter = self.emitter.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let signal = emitter.lock().tick(Instant::now());
            if let Some(signal) = signal {
                send(&channel, signal).await;
            }
        });
        if let Some(old) = self.timer.lock().replace(timer) {
            old.abort();
        }
    }

    fn disarm(&self) {
        if let Some(timer) = self.timer.lock().take() {
            timer.abort();
        }
    }
}

impl Drop for TypingNotifier {
    fn drop(&mut self) {
        self.disarm();
    }
}

async fn send(channel: &ChannelHandle, signal: Signal) {
    if let Err(err) = channel.send(signal).await {
        tracing::debug!("typing signal dropped: {err}");
    }
}

/// Usernames currently typing, kept up to date from the chat channel.
pub struct TypingIndicator {
    typing: watch::Receiver<Vec<String>>,
    _driver: Subscription,
}

impl TypingIndicator {
    pub fn start(channel: &ChannelHandle, me: impl Into<String>, timeout: Duration) -> TypingIndicator {
        let (tx, typing) = watch::channel(Vec::new());
        let mut signals = channel.subscribe();
        let mut set = TypingSet::new(me, timeout);

        let driver = Subscription::spawn(async move {
            loop {
                let next = set.next_deadline();
                let changed = tokio::select! {
                    signal = signals.recv() => match signal {
                        Some(signal) => set.apply(&signal, Instant::now()),
                        None => break,
                    },
                    () = sleep_until(next) => set.expire(Instant::now()),
                };
                if changed {
                    tx.send_replace(set.usernames());
                }
            }
        });

        TypingIndicator { typing, _driver: driver }
    }

    pub fn usernames(&self) -> Vec<String> {
        self.typing.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Vec<String>> {
        self.typing.clone()
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
