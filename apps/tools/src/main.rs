use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use shared::domain::{ContactId, Direction};
use storage::{ConversationStore, DEFAULT_DATA_FILE};
use sync_engine::{hub, DedupPolicy, DistributionHub, SyncContext};

/// Inspect or repair a conversation store file while the server is stopped.
#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = DEFAULT_DATA_FILE)]
    data_file: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// One line per conversation, optionally filtered by name or number.
    List {
        query: Option<String>,
    },
    /// Print the newest messages of one conversation.
    Show {
        contact_id: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Reset a conversation's unread counter.
    MarkRead {
        contact_id: String,
    },
    /// Dump the whole store as JSON.
    Export,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("warn").init();
    let cli = Cli::parse();
    let store = ConversationStore::open(&cli.data_file).await;
    let ctx = SyncContext::new(store, DistributionHub::new(1), DedupPolicy::default());

    match cli.command {
        Command::List { query } => {
            let conversations = hub::search(&ctx, query.as_deref().unwrap_or_default()).await;
            for conversation in conversations {
                let preview = conversation
                    .last_message
                    .as_ref()
                    .map(|m| match m.direction {
                        Direction::Outbound => format!("you: {}", m.body),
                        Direction::Inbound => m.body.clone(),
                    })
                    .unwrap_or_default();
                println!(
                    "{}\t{}\tunread={}\t{}",
                    conversation.contact_id,
                    conversation.display_name,
                    conversation.unread_count,
                    preview
                );
            }
        }
        Command::Show { contact_id, limit } => {
            let contact_id = parse_contact(&contact_id)?;
            let conversation = hub::conversation(&ctx, &contact_id)
                .await
                .ok_or_else(|| anyhow!("no conversation for {contact_id}"))?;
            println!(
                "{} ({}) unread={}",
                conversation.display_name, conversation.contact_id, conversation.unread_count
            );
            let skip = conversation.messages.len().saturating_sub(limit);
            for message in conversation.messages.iter().skip(skip) {
                let when = DateTime::<Utc>::from_timestamp_millis(message.timestamp)
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| message.timestamp.to_string());
                let arrow = match message.direction {
                    Direction::Inbound => "<",
                    Direction::Outbound => ">",
                };
                println!("{when} {arrow} {}", message.body);
            }
        }
        Command::MarkRead { contact_id } => {
            let contact_id = parse_contact(&contact_id)?;
            let conversation = hub::mark_read(&ctx, &contact_id).await?;
            println!("marked {} read", conversation.contact_id);
        }
        Command::Export => {
            let snapshot = hub::snapshot(&ctx).await;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
    }

    Ok(())
}

fn parse_contact(raw: &str) -> Result<ContactId> {
    ContactId::parse(raw).ok_or_else(|| anyhow!("invalid contact id '{raw}'"))
}
