use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;

use remed_core::{
    BackendApi, CredentialProvider, FriendRequestKind, HttpBackend, VersionedResponse,
};

#[derive(Debug, Parser)]
#[command(name = "remed-cli")]
#[command(about = "Remed sync backend CLI for testing and scripting")]
struct Cli {
    /// Backend base URL
    #[arg(long, env = "REMED_API_URL", default_value = "https://api.remed.app")]
    base_url: String,

    /// Bearer token; unauthenticated calls fail with `authentication required`
    #[arg(long, env = "REMED_TOKEN")]
    token: Option<String>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List conversations (the chat list)
    Conversations,

    /// Fetch a page of messages with a peer, newest first
    History {
        /// Peer user id
        #[arg(long)]
        with: String,

        /// Max messages to return
        #[arg(long, default_value_t = 30)]
        limit: usize,

        /// Only messages strictly older than this Unix-millis timestamp
        #[arg(long)]
        before: Option<i64>,
    },

    /// Send a message
    Send {
        /// Receiver user id
        #[arg(long)]
        to: String,

        /// Message content
        #[arg(long)]
        content: String,
    },

    /// Fetch the friends list, optionally as a delta
    Friends {
        /// Version token from a previous fetch
        #[arg(long)]
        since_version: Option<String>,
    },

    /// Fetch friend ids only
    FriendIds {
        #[arg(long)]
        since_version: Option<String>,
    },

    /// Fetch friend requests
    Requests {
        #[arg(long, value_enum, default_value_t = RequestKind::Incoming)]
        kind: RequestKind,

        #[arg(long)]
        since_version: Option<String>,
    },

    /// Send a friend request
    SendRequest {
        /// Target user id
        #[arg(long)]
        to: String,
    },

    /// Accept or reject a friend request
    Respond {
        #[arg(long)]
        request_id: String,

        #[arg(long, conflicts_with = "reject")]
        accept: bool,

        #[arg(long)]
        reject: bool,
    },

    /// Remove a friend
    RemoveFriend {
        #[arg(long)]
        user: String,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum RequestKind {
    Incoming,
    Outgoing,
}

impl From<RequestKind> for FriendRequestKind {
    fn from(kind: RequestKind) -> Self {
        match kind {
            RequestKind::Incoming => FriendRequestKind::Incoming,
            RequestKind::Outgoing => FriendRequestKind::Outgoing,
        }
    }
}

struct StaticToken(Option<String>);

impl CredentialProvider for StaticToken {
    fn bearer_token(&self) -> Option<String> {
        self.0.clone()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let backend = HttpBackend::new(cli.base_url.clone(), Arc::new(StaticToken(cli.token.clone())));

    match &cli.cmd {
        Command::Conversations => {
            let conversations = backend.fetch_conversations().await?;
            print(serde_json::to_value(conversations)?);
        }
        Command::History {
            with,
            limit,
            before,
        } => {
            let messages = backend.fetch_messages(with, *limit, *before).await?;
            print(serde_json::to_value(messages)?);
        }
        Command::Send { to, content } => {
            let message = backend.send_message(to, content).await?;
            print(serde_json::to_value(message)?);
        }
        Command::Friends { since_version } => {
            let resp = backend.fetch_friends(since_version.as_deref()).await?;
            print(versioned_json(resp)?);
        }
        Command::FriendIds { since_version } => {
            let resp = backend.fetch_friend_ids(since_version.as_deref()).await?;
            print(versioned_json(resp)?);
        }
        Command::Requests {
            kind,
            since_version,
        } => {
            let resp = backend
                .fetch_friend_requests((*kind).into(), since_version.as_deref())
                .await?;
            print(versioned_json(resp)?);
        }
        Command::SendRequest { to } => {
            let request = backend.send_friend_request(to).await?;
            print(serde_json::to_value(request)?);
        }
        Command::Respond {
            request_id,
            accept,
            reject,
        } => {
            let accept = *accept && !*reject;
            backend.respond_friend_request(request_id, accept).await?;
            print(json!({ "ok": true, "accepted": accept }));
        }
        Command::RemoveFriend { user } => {
            backend.remove_friend(user).await?;
            print(json!({ "ok": true }));
        }
    }
    Ok(())
}

fn versioned_json<T: serde::Serialize>(
    resp: VersionedResponse<T>,
) -> anyhow::Result<serde_json::Value> {
    Ok(match resp {
        VersionedResponse::Unchanged => json!({ "unchanged": true }),
        VersionedResponse::Changed {
            items,
            version,
            delta_update,
        } => json!({
            "version": version,
            "deltaUpdate": delta_update,
            "items": serde_json::to_value(items)?,
        }),
    })
}

fn print(v: serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(&v).expect("json encode"));
}
