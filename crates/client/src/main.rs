//! kinderlink-watch
//!
//! Follows one entity collection over the realtime connection and prints it
//! as JSON after every change. Also manages the stored access token.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kinderlink_client::{
    ClientConfig, Collection, ConnectionState, CredentialStore, FileCredentialStore,
    RealtimeClient, RealtimeData, StaticCredentials,
};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "kinderlink-watch")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Watch kindergarten entities change in real time")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bind an entity type and print every revision
    Watch {
        /// Entity type, e.g. attendance, child, group
        entity_type: String,
        /// WebSocket endpoint (default: KINDERLINK_WS_URL or ws://localhost:5000/ws)
        #[arg(long)]
        url: Option<String>,
        /// Use this token instead of the stored one
        #[arg(long, env = "KINDERLINK_TOKEN")]
        token: Option<String>,
        /// Treat the collection as a single entity
        #[arg(long)]
        single: bool,
        /// Print each revision on one line
        #[arg(long)]
        compact: bool,
    },

    /// Manage the stored access token
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },
}

#[derive(Subcommand)]
enum TokenAction {
    /// Store a token for later connections
    Set { token: String },
    /// Remove the stored token
    Clear,
    /// Show whether a token is stored
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    use tracing_subscriber::EnvFilter;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("kinderlink_client=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Watch {
            entity_type,
            url,
            token,
            single,
            compact,
        } => watch(entity_type, url, token, single, compact).await,
        Commands::Token { action } => manage_token(action),
    }
}

fn token_store() -> Result<FileCredentialStore> {
    FileCredentialStore::from_platform_dir().context("no config directory on this platform")
}

fn manage_token(action: TokenAction) -> Result<()> {
    let store = token_store()?;
    match action {
        TokenAction::Set { token } => {
            store.save_token(&token)?;
            println!("token stored in {}", store.dir().display());
        }
        TokenAction::Clear => {
            store.clear_token()?;
            println!("token removed");
        }
        TokenAction::Show => match store.access_token()? {
            Some(_) => println!("a token is stored in {}", store.dir().display()),
            None => println!("no token stored"),
        },
    }
    Ok(())
}

async fn watch(
    entity_type: String,
    url: Option<String>,
    token: Option<String>,
    single: bool,
    compact: bool,
) -> Result<()> {
    let mut config = ClientConfig::from_env();
    if let Some(url) = url {
        config = config.with_ws_url(url);
    }

    let client = match token {
        Some(token) => RealtimeClient::new(config, StaticCredentials::new(token)),
        None => RealtimeClient::new(config, token_store()?),
    };
    client.connect();

    let initial = if single {
        Collection::single()
    } else {
        Collection::many()
    };
    let data = RealtimeData::<Value>::bind(client.clone(), &entity_type, initial);
    let mut revisions = data.watch();
    let mut states = client.watch_state();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = revisions.changed() => {
                if changed.is_err() {
                    break;
                }
                let tracked = revisions.borrow_and_update().clone();
                let json = if compact {
                    serde_json::to_string(&tracked.items)?
                } else {
                    serde_json::to_string_pretty(&tracked.items)?
                };
                println!("# {} revision {}", entity_type, tracked.revision);
                println!("{}", json);
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = states.borrow_and_update().clone();
                match state {
                    ConnectionState::Error { message } => {
                        tracing::warn!(%message, "connection degraded, retrying");
                    }
                    other => tracing::info!(state = ?other, "connection state"),
                }
            }
        }
    }

    drop(data);
    client.disconnect();
    Ok(())
}
