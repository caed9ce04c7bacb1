//! Several clients against one in-process service backed by in-memory SQLite.
//! Real time with short intervals; every wait is bounded.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use globalchat::{
    client::{BackendError, ChatBackend, ChatSession, ClientConfig, LeaveTrigger, LocalBackend, SubmitError},
    db,
    identity::{Identity, Role},
    model::{NewMessage, Presence, UNKNOWN_FLAG},
    realtime::Signal,
    service::AccountAdmin,
    ChatService, Hub,
};
use time::OffsetDateTime;
use tokio::sync::watch;

struct NoAccounts;

#[async_trait]
impl AccountAdmin for NoAccounts {
    async fn disable_account(&self, _user_id: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

async fn service() -> ChatService {
    let pool = db::connect_memory().await.unwrap();
    db::migrate(&pool).await.unwrap();
    ChatService::new(pool, Hub::default(), Arc::new(NoAccounts))
}

fn config() -> ClientConfig {
    ClientConfig {
        heartbeat_every: Duration::from_millis(100),
        presence_poll: Duration::from_millis(150),
        active_window: Duration::from_secs(1),
        typing_timeout: Duration::from_millis(300),
        ..ClientConfig::default()
    }
}

fn member(id: &str) -> Identity {
    Identity::new(id).with_handle(id)
}

fn admin(id: &str) -> Identity {
    member(id).with_role(Role::Admin)
}

fn join(service: &ChatService, identity: Identity) -> ChatSession {
    let backend = Arc::new(LocalBackend::new(service.clone(), identity.clone()));
    ChatSession::start(backend, identity, None, config())
}

async fn wait_for<T>(rx: &mut watch::Receiver<T>, what: &str, done: impl FnMut(&T) -> bool) {
    tokio::time::timeout(Duration::from_secs(3), rx.wait_for(done))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
        .unwrap_or_else(|_| panic!("{what}: sender dropped"));
}

#[tokio::test]
async fn feed_holds_the_latest_hundred_in_order() {
    let service = service().await;
    let ada = member("ada");
    for i in 0..130 {
        let new = NewMessage { username: "ada".into(), country: None, message: format!("message {i}") };
        service.insert_message(&ada, new).await.unwrap();
    }

    let session = join(&service, member("bob"));
    let mut feed = session.feed().watch();
    wait_for(&mut feed, "initial feed", |m| m.len() == 100).await;

    let messages = session.feed().messages();
    assert_eq!(messages[0].message, "message 30");
    assert_eq!(messages[99].message, "message 129");
    assert!(messages.windows(2).all(|w| w[0].created_at <= w[1].created_at));
}

#[tokio::test]
async fn sent_message_reaches_other_feeds_with_unknown_flag() {
    let service = service().await;
    let alice = join(&service, member("alice"));
    let bob = join(&service, member("bob"));

    let sent = alice.composer().submit("hello from nowhere").await.unwrap();
    assert_eq!(sent.country, None);

    let mut feed = bob.feed().watch();
    wait_for(&mut feed, "bob sees alice", |m| m.iter().any(|m| m.id == sent.id)).await;
    let seen = bob.feed().messages().into_iter().find(|m| m.id == sent.id).unwrap();
    assert_eq!(seen.country, None);
    assert_eq!(seen.flag(), UNKNOWN_FLAG);
}

#[tokio::test]
async fn local_rejections_never_reach_storage() {
    let service = service().await;
    let alice = join(&service, member("alice"));

    assert_eq!(alice.composer().submit("what the fuck").await, Err(SubmitError::Profane));
    assert_eq!(alice.composer().submit("   ").await, Err(SubmitError::Empty));
    assert!(service.recent_messages(100).await.unwrap().is_empty());

    alice.composer().submit("first").await.unwrap();
    assert_eq!(alice.composer().submit("second").await, Err(SubmitError::RateLimited));
    assert_eq!(service.recent_messages(100).await.unwrap().len(), 1);
}

#[tokio::test]
async fn roster_follows_join_and_leave() {
    let service = service().await;
    let bob = join(&service, member("bob"));
    let mut roster = bob.roster().watch();

    let mut alice = join(&service, member("alice"));
    wait_for(&mut roster, "alice online", |r| r.contains("alice")).await;

    alice.leave(LeaveTrigger::Unload).await;
    wait_for(&mut roster, "alice gone", |r| !r.contains("alice")).await;
    assert!(bob.roster().roster().contains("bob"));
}

#[tokio::test]
async fn stale_presence_drops_out_of_the_roster() {
    let service = service().await;
    // a crashed tab: one upsert, never refreshed, never deleted
    let ghost = member("ghost");
    let record = Presence {
        user_id: "ghost".into(),
        username: "ghost".into(),
        country: None,
        role: Role::Member,
        last_active: OffsetDateTime::now_utc(),
    };
    service.upsert_presence(&ghost, record).await.unwrap();

    let bob = join(&service, member("bob"));
    let mut roster = bob.roster().watch();
    wait_for(&mut roster, "ghost listed", |r| r.contains("ghost")).await;
    wait_for(&mut roster, "ghost expired", |r| !r.contains("ghost")).await;
}

#[tokio::test]
async fn moderators_listed_separately() {
    let service = service().await;
    let root = join(&service, admin("root"));
    let _bob = join(&service, member("bob"));

    let mut roster = root.roster().watch();
    wait_for(&mut roster, "both online", |r| r.len() == 2).await;
    let roster = root.roster().roster();
    assert_eq!(roster.moderators[0].user_id, "root");
    assert_eq!(roster.members[0].user_id, "bob");
}

#[tokio::test]
async fn clear_all_empties_every_feed() {
    let service = service().await;
    let root = join(&service, admin("root"));
    let bob = join(&service, member("bob"));

    bob.composer().submit("soon gone").await.unwrap();
    let mut feed = bob.feed().watch();
    wait_for(&mut feed, "message visible", |m| m.len() == 1).await;

    root.moderator().clear_all().await.unwrap();
    wait_for(&mut feed, "feed cleared", Vec::is_empty).await;
    assert!(root.feed().messages().is_empty());
    assert!(service.recent_messages(100).await.unwrap().is_empty());
}

#[tokio::test]
async fn members_cannot_moderate_even_bypassing_the_client() {
    let service = service().await;
    let bob = join(&service, member("bob"));
    let sent = bob.composer().submit("mine").await.unwrap();

    let forbidden = bob.chat().send(Signal::Clear).await;
    assert!(matches!(forbidden, Err(BackendError::Forbidden(_))));

    let backend = LocalBackend::new(service.clone(), member("bob"));
    assert!(matches!(backend.delete_message(sent.id).await, Err(BackendError::Forbidden(_))));
    assert_eq!(service.recent_messages(100).await.unwrap().len(), 1);
}

#[tokio::test]
async fn messages_and_typing_carry_the_sender_name() {
    let service = service().await;
    let mallory = LocalBackend::new(service.clone(), member("mallory"));

    let forged = NewMessage { username: "root".into(), country: None, message: "trust me".into() };
    let stored = mallory.insert_message(forged).await.unwrap();
    assert_eq!(stored.username, "mallory");

    let spoofed = mallory.broadcast("chat", Signal::Typing { username: "root".into() }).await;
    assert!(matches!(spoofed, Err(BackendError::Forbidden(_))));
}

#[tokio::test]
async fn typing_shows_on_other_clients_then_expires() {
    let service = service().await;
    let alice = join(&service, member("alice"));
    let bob = join(&service, member("bob"));

    let mut mine = alice.typing().watch();
    let mut theirs = bob.typing().watch();
    alice.composer().keystroke().await;

    wait_for(&mut theirs, "alice typing", |t| t.iter().any(|n| n == "alice")).await;
    wait_for(&mut theirs, "alice stopped", Vec::is_empty).await;
    assert!(mine.borrow_and_update().is_empty());
}
