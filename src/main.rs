use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use globalchat::{auth, db, routes, AppState, ChatService, Config, Hub};
use tower_http::trace::TraceLayer;
use tower_sessions::{cookie::SameSite, Expiry, MemoryStore, SessionManagerLayer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "globalchat=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    let session_store = MemoryStore::default();
    let session_layer = SessionManagerLayer::new(session_store)
        .with_secure(config.public_url.starts_with("https://"))
        .with_same_site(SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(time::Duration::days(7)));

    let db_pool = db::connect(&config.database_url).await?;
    db::migrate(&db_pool).await?;

    let secrets = std::fs::read_to_string(&config.client_secrets)
        .with_context(|| format!("reading {}", config.client_secrets.display()))?;
    let clients = auth::Clients::from_json(serde_json::from_str(&secrets)?, &config.public_url)
        .map_err(|e| e.0)?;

    let hub = Hub::default();
    let accounts = Arc::new(auth::FirebaseAccounts::new(config.firebase_admin_token.clone()));
    let app_state = AppState {
        service: ChatService::new(db_pool, hub, accounts),
        clients,
        config: Arc::new(config.clone()),
    };

    let app = Router::new()
        .merge(auth::router())
        .nest("/api", routes::router())

        .with_state(app_state)
        .layer(session_layer)
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    tracing::info!("listening on {}", config.listen_addr);
    axum::serve(listener, app).await?;
    Ok(())
}
