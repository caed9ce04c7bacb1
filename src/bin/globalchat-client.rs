use std::{collections::HashSet, sync::Arc};

use globalchat::{
    client::{country::CountryResolver, ChatSession, ClientConfig, Endpoint, HttpBackend, LeaveTrigger},
    model::Message,
};
use time::UtcOffset;
use tokio::io::{AsyncBufReadExt, BufReader};
use uuid::Uuid;

const HELP: &str = "commands: /delete <id>, /clear, /kick <user_id>, /ban <user_id>, /quit";

fn print_message(message: &Message, offset: UtcOffset) {
    println!(
        "{} {} {}: {}  [{}]",
        message.time_label(offset),
        message.flag(),
        message.username,
        message.message,
        message.id
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "globalchat=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    let endpoint = Endpoint::from_env()?;
    let backend = Arc::new(HttpBackend::connect(endpoint.base_url.clone(), &endpoint.session).await?);
    let resolver = CountryResolver::new(reqwest::Client::new(), endpoint.ipinfo_token.clone());
    let mut session = ChatSession::connect(backend, Some(&resolver), ClientConfig::default()).await?;

    println!("signed in as {}", session.identity().display_name().unwrap_or_default());
    println!("{HELP}");

    let mut feed = session.feed().watch();
    tokio::spawn(async move {
        let mut shown = HashSet::<Uuid>::new();
        loop {
            let messages = feed.borrow_and_update().clone();
            if messages.is_empty() && !shown.is_empty() {
                println!("-- chat cleared --");
                shown.clear();
            }
            for message in messages.iter().filter(|m| !shown.contains(&m.id)) {
                print_message(message, offset);
            }
            shown = messages.iter().map(|m| m.id).collect();
            if feed.changed().await.is_err() {
                break;
            }
        }
    });

    let mut roster = session.roster().watch();
    tokio::spawn(async move {
        while roster.changed().await.is_ok() {
            let roster = roster.borrow_and_update().clone();
            let names = |group: &[globalchat::model::Presence]| {
                group.iter().map(|p| format!("{} ({})", p.username, p.initials())).collect::<Vec<_>>().join(", ")
            };
            println!("-- online {}: mods [{}] users [{}]", roster.len(), names(&roster.moderators), names(&roster.members));
        }
    });

    let mut typing = session.typing().watch();
    tokio::spawn(async move {
        while typing.changed().await.is_ok() {
            let names = typing.borrow_and_update().clone();
            if !names.is_empty() {
                println!("-- {} typing...", names.join(", "));
            }
        }
    });

    let mut notice = session.composer().notice().watch();
    tokio::spawn(async move {
        while notice.changed().await.is_ok() {
            if let Some(text) = notice.borrow_and_update().clone() {
                println!("!! {text}");
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let mut words = line.split_whitespace();
        let moderator = session.moderator();
        let outcome = match (words.next(), words.next()) {
            (Some("/quit"), _) => break,
            (Some("/help"), _) => {
                println!("{HELP}");
                Ok(())
            }
            (Some("/clear"), _) => moderator.clear_all().await,
            (Some("/delete"), Some(id)) => match Uuid::parse_str(id) {
                Ok(id) => moderator.delete_message(id).await,
                Err(err) => {
                    println!("!! bad message id: {err}");
                    continue;
                }
            },
            (Some("/kick"), Some(user_id)) => moderator.kick(user_id).await,
            (Some("/ban"), Some(user_id)) => moderator.ban(user_id).await,
            (Some(command), _) if command.starts_with('/') => {
                println!("{HELP}");
                Ok(())
            }
            _ => {
                session.composer().keystroke().await;
                // rejections are reported through the notice
                let _ = session.composer().submit(&line).await;
                Ok(())
            }
        };
        if let Err(err) = outcome {
            println!("!! {err}");
        }
    }

    session.leave(LeaveTrigger::Unmount).await;
    Ok(())
}
