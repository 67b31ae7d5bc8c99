use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;

use pony_client::{ClientConfig, Navigation, PonyClient, chat_slots, filter_chats};
use pony_client::{ChatSlot, MessageList};
use pony_types::Chat;

#[derive(Parser)]
#[command(name = "pony")]
#[command(about = "Pony Express chat client", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and persist the session
    Login {
        username: String,
        #[arg(long, env = "PONY_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// End the persisted session
    Logout,
    /// Show the logged-in user
    Whoami,
    /// List chats, optionally fuzzy-filtered by name
    Chats {
        #[arg(long)]
        search: Option<String>,
    },
    /// List a chat's messages
    Messages { chat_id: String },
    /// Send a message to a chat
    Send { chat_id: String, text: String },
    /// Replace a message's text
    Edit {
        chat_id: String,
        message_id: String,
        text: String,
    },
    /// Delete a message
    Delete { chat_id: String, message_id: String },
    /// Show where navigating to a path would land
    Route { path: String },
}

/// The binary is named `pony`, so its own events log under the `pony` target.
const DEFAULT_LOG_FILTER: &str = "pony=info,pony_client=info";

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = ClientConfig::from_env().context("invalid configuration")?;
    debug!(
        api_url = %config.api_url,
        token_path = %config.token_path.display(),
        "client configured"
    );
    let client = PonyClient::from_config(&config)?;

    match cli.command {
        Commands::Login { username, password } => {
            client.login(&username, &password).await?;
            println!("Logged in as {}", username);
        }
        Commands::Logout => {
            client.logout();
            println!("Logged out");
        }
        Commands::Whoami => {
            let user = client.users().current_user().await?;
            println!("{} ({}) <{}>", user.username, user.id, user.email);
        }
        Commands::Chats { search } => {
            let (chats, status) = client.chats().chats().await?;
            debug!(?status, count = chats.len(), "chats loaded");

            let shown: Vec<Chat> = match search.as_deref() {
                Some(query) => filter_chats(&chats, query).into_iter().cloned().collect(),
                None => chats,
            };
            if shown.is_empty() {
                println!("No chats");
            }
            for slot in chat_slots(Some(&shown)) {
                if let ChatSlot::Loaded(chat) = slot {
                    println!("{:>6}  {}  ({} members)", chat.id, chat.name, chat.user_ids.len());
                }
            }
        }
        Commands::Messages { chat_id } => {
            let (list, _) = client.chats().messages(&chat_id).await?;
            print_messages(&list);
        }
        Commands::Send { chat_id, text } => {
            match client.mutations().create_message(&chat_id, &text).await? {
                Some(message) => println!("Sent message {}", message.id),
                None => println!("Sent"),
            }
        }
        Commands::Edit {
            chat_id,
            message_id,
            text,
        } => {
            client
                .mutations()
                .edit_message(&chat_id, &message_id, &text)
                .await?;
            println!("Edited message {}", message_id);
        }
        Commands::Delete {
            chat_id,
            message_id,
        } => {
            client.mutations().delete_message(&chat_id, &message_id).await?;
            println!("Deleted message {}", message_id);
        }
        Commands::Route { path } => match client.route_guard().resolve(&path) {
            Navigation::Allow(route) => println!("allow {}", route.path()),
            Navigation::Redirect(route) => println!("redirect {}", route.path()),
        },
    }

    Ok(())
}

fn print_messages(list: &MessageList) {
    if list.is_empty() {
        println!("No messages");
        return;
    }
    for message in &list.messages {
        let edited = if message.edited { " (edited)" } else { "" };
        println!(
            "[{}] {} {}: {}{}",
            message.created_at.format("%Y-%m-%d %H:%M"),
            message.id,
            message.user_id,
            message.text,
            edited
        );
    }
    for pending in &list.pending {
        println!("[sending] {}", pending.text);
    }
}
