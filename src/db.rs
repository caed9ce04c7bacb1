use std::time::Duration;

use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    identity::Role,
    model::{CountryCode, Message, NewMessage, Presence},
};

// messages: seq is insertion order, only used to break created_at ties
// presence: one row per user_id, last_active set by the client
const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS messages (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        username TEXT NOT NULL,
        country TEXT,
        message TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS messages_created_at ON messages (created_at, seq)",
    "CREATE TABLE IF NOT EXISTS presence (
        user_id TEXT PRIMARY KEY,
        username TEXT NOT NULL,
        country TEXT,
        role TEXT NOT NULL DEFAULT 'member',
        last_active INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS presence_last_active ON presence (last_active)",
];

pub async fn connect(url: &str) -> Result<SqlitePool, sqlx::Error> {
    SqlitePoolOptions::new()
        .max_connections(16)
        .connect(url)
        .await
}

/// Single pinned connection, since every `:memory:` connection is its own database.
pub async fn connect_memory() -> Result<SqlitePool, sqlx::Error> {
    SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
}

pub async fn migrate(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

fn to_nanos(at: OffsetDateTime) -> i64 {
    at.unix_timestamp_nanos() as i64
}

fn from_nanos(nanos: i64) -> Result<OffsetDateTime, sqlx::Error> {
    OffsetDateTime::from_unix_timestamp_nanos(nanos.into()).map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

fn country(column: Option<String>) -> Option<CountryCode> {
    column.as_deref().and_then(CountryCode::parse)
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: String,
    username: String,
    country: Option<String>,
    message: String,
    created_at: i64,
}

impl TryFrom<MessageRow> for Message {
    type Error = sqlx::Error;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        Ok(Message {
            id: Uuid::parse_str(&row.id).map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
            username: row.username,
            country: country(row.country),
            message: row.message,
            created_at: from_nanos(row.created_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PresenceRow {
    user_id: String,
    username: String,
    country: Option<String>,
    role: String,
    last_active: i64,
}

impl TryFrom<PresenceRow> for Presence {
    type Error = sqlx::Error;

    fn try_from(row: PresenceRow) -> Result<Self, Self::Error> {
        Ok(Presence {
            user_id: row.user_id,
            username: row.username,
            country: country(row.country),
            role: row.role.parse().unwrap_or(Role::Member),
            last_active: from_nanos(row.last_active)?,
        })
    }
}

/// The newest `limit` messages, oldest first.
#[tracing::instrument(skip(pool), err)]
pub async fn recent_messages(pool: &SqlitePool, limit: u32) -> Result<Vec<Message>, sqlx::Error> {
    let rows: Vec<MessageRow> = sqlx::query_as(
        "SELECT id,username,country,message,created_at FROM (
            SELECT * FROM messages ORDER BY created_at DESC, seq DESC LIMIT ?
        ) ORDER BY created_at ASC, seq ASC",
    )
    .bind(i64::from(limit))
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(Message::try_from).collect()
}

#[tracing::instrument(skip(pool, new), err)]
pub async fn insert_message(pool: &SqlitePool, new: &NewMessage) -> Result<Message, sqlx::Error> {
    let message = Message {
        id: Uuid::now_v7(),
        username: new.username.clone(),
        country: new.country,
        message: new.message.clone(),
        created_at: OffsetDateTime::now_utc(),
    };

    sqlx::query("INSERT INTO messages (id,username,country,message,created_at) VALUES (?,?,?,?,?)")
        .bind(message.id.to_string())
        .bind(&message.username)
        .bind(message.country.map(String::from))
        .bind(&message.message)
        .bind(to_nanos(message.created_at))
        .execute(pool)
        .await?;

    Ok(message)
}

#[tracing::instrument(skip(pool), err)]
pub async fn delete_message(pool: &SqlitePool, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM messages WHERE id=?")
        .bind(id.to_string())
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

#[tracing::instrument(skip(pool), err)]
pub async fn clear_messages(pool: &SqlitePool) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM messages").execute(pool).await?;
    Ok(result.rows_affected())
}

#[tracing::instrument(skip(pool, presence), fields(user_id = %presence.user_id), err)]
pub async fn upsert_presence(pool: &SqlitePool, presence: &Presence) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO presence (user_id,username,country,role,last_active) VALUES (?,?,?,?,?)
        ON CONFLICT(user_id) DO UPDATE SET
            username=excluded.username,
            country=excluded.country,
            role=excluded.role,
            last_active=excluded.last_active",
    )
    .bind(&presence.user_id)
    .bind(&presence.username)
    .bind(presence.country.map(String::from))
    .bind(presence.role.as_str())
    .bind(to_nanos(presence.last_active))
    .execute(pool)
    .await?;
    Ok(())
}

#[tracing::instrument(skip(pool), err)]
pub async fn delete_presence(pool: &SqlitePool, user_id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM presence WHERE user_id=?")
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Records refreshed within `window` of `now`, by username.
#[tracing::instrument(skip(pool), err)]
pub async fn active_presence(
    pool: &SqlitePool,
    now: OffsetDateTime,
    window: Duration,
) -> Result<Vec<Presence>, sqlx::Error> {
    let cutoff = to_nanos(now) - window.as_nanos() as i64;
    let rows: Vec<PresenceRow> = sqlx::query_as(
        "SELECT user_id,username,country,role,last_active FROM presence
        WHERE last_active >= ? ORDER BY username COLLATE NOCASE",
    )
    .bind(cutoff)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(Presence::try_from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn pool() -> SqlitePool {
        let pool = connect_memory().await.unwrap();
        migrate(&pool).await.unwrap();
        pool
    }

    fn new_message(i: usize) -> NewMessage {
        NewMessage {
            username: "ada".into(),
            country: CountryCode::parse("GB"),
            message: format!("message {i}"),
        }
    }

    fn presence(user_id: &str, last_active: OffsetDateTime) -> Presence {
        Presence {
            user_id: user_id.into(),
            username: user_id.to_uppercase(),
            country: None,
            role: Role::Member,
            last_active,
        }
    }

    #[tokio::test]
    async fn migrate_is_idempotent() {
        let pool = pool().await;
        migrate(&pool).await.unwrap();
    }

    #[tokio::test]
    async fn recent_messages_keeps_newest_window_ascending() {
        let pool = pool().await;
        for i in 0..130 {
            insert_message(&pool, &new_message(i)).await.unwrap();
        }

        let window = recent_messages(&pool, 100).await.unwrap();
        assert_eq!(window.len(), 100);
        assert_eq!(window.first().unwrap().message, "message 30");
        assert_eq!(window.last().unwrap().message, "message 129");
        assert!(window.windows(2).all(|w| w[0].created_at <= w[1].created_at));
    }

    #[tokio::test]
    async fn message_round_trips_optional_country() {
        let pool = pool().await;
        let stored = insert_message(
            &pool,
            &NewMessage { username: "bob".into(), country: None, message: "no flag".into() },
        )
        .await
        .unwrap();

        let fetched = recent_messages(&pool, 100).await.unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].id, stored.id);
        assert_eq!(fetched[0].country, None);
    }

    #[tokio::test]
    async fn delete_and_clear() {
        let pool = pool().await;
        let first = insert_message(&pool, &new_message(0)).await.unwrap();
        insert_message(&pool, &new_message(1)).await.unwrap();
        insert_message(&pool, &new_message(2)).await.unwrap();

        assert!(delete_message(&pool, first.id).await.unwrap());
        assert!(!delete_message(&pool, first.id).await.unwrap());
        assert_eq!(recent_messages(&pool, 100).await.unwrap().len(), 2);

        assert_eq!(clear_messages(&pool).await.unwrap(), 2);
        assert!(recent_messages(&pool, 100).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn presence_upsert_replaces_row() {
        let pool = pool().await;
        let now = OffsetDateTime::now_utc();
        upsert_presence(&pool, &presence("ada", now - time::Duration::seconds(30))).await.unwrap();
        upsert_presence(&pool, &Presence { role: Role::Admin, ..presence("ada", now) }).await.unwrap();

        let active = active_presence(&pool, now, Duration::from_secs(10)).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].role, Role::Admin);
    }

    #[tokio::test]
    async fn active_presence_excludes_stale_rows() {
        let pool = pool().await;
        let t = OffsetDateTime::now_utc();
        upsert_presence(&pool, &presence("ada", t)).await.unwrap();
        upsert_presence(&pool, &presence("bob", t + time::Duration::seconds(5))).await.unwrap();

        let window = Duration::from_secs(10);
        let at_ten = active_presence(&pool, t + time::Duration::seconds(10), window).await.unwrap();
        assert_eq!(at_ten.len(), 2);

        let later = active_presence(&pool, t + time::Duration::milliseconds(10_001), window).await.unwrap();
        assert_eq!(later.iter().map(|p| p.user_id.as_str()).collect::<Vec<_>>(), ["bob"]);

        assert!(delete_presence(&pool, "bob").await.unwrap());
        assert!(!delete_presence(&pool, "bob").await.unwrap());
    }
}
