use std::io::{self, Write};
use std::path::PathBuf;

use chatstream_core::{
    config::Config,
    error::{ChatStreamError, ErrorKind},
    http_client::HttpClient,
    model::{Message, Role, Snapshot},
    session::{ChatClient, ChatOutcome},
};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    author,
    version,
    about = "chatstream CLI: stream replies from a chat backend",
    long_about = None
)]
struct Cli {
    /// Config file (JSON or TOML). Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a message and stream the reply (Ctrl-C stops it)
    Send {
        #[arg(short, long, help = "Message from the user")]
        message: String,
        #[arg(long, help = "Continue an existing chat")]
        chat_id: Option<String>,
        #[arg(long, help = "Print the reasoning channel to stderr")]
        show_reasoning: bool,
    },
    /// List saved chats
    List,
    /// Print the messages of one chat
    History { id: String },
    /// Delete a chat
    Delete { id: String },
}

const BASE_URL_ENV: &str = "CHATSTREAM_BASE_URL";

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<Config> {
    let mut cfg = match path {
        Some(p) => Config::from_path(p)?,
        None => Config::default(),
    };
    if let Ok(url) = std::env::var(BASE_URL_ENV)
        && !url.trim().is_empty()
    {
        cfg.base_url = url.trim().to_string();
    }
    cfg.validate()?;
    Ok(cfg)
}

/// Prints only what a snapshot adds to what is already on screen.
#[derive(Default)]
struct Renderer {
    show_reasoning: bool,
    content_shown: usize,
    reasoning_shown: usize,
}

impl Renderer {
    fn render(&mut self, snap: &Snapshot) {
        if self.show_reasoning && snap.reasoning.len() > self.reasoning_shown {
            eprint!("{}", &snap.reasoning[self.reasoning_shown..]);
            self.reasoning_shown = snap.reasoning.len();
            io::stderr().flush().ok();
        }
        if snap.content.len() > self.content_shown {
            if self.show_reasoning && self.content_shown == 0 && self.reasoning_shown > 0 {
                eprintln!();
            }
            print!("{}", &snap.content[self.content_shown..]);
            self.content_shown = snap.content.len();
            io::stdout().flush().ok();
        }
    }
}

fn failure_notice(err: &ChatStreamError) -> &'static str {
    match err.kind() {
        ErrorKind::Network | ErrorKind::RateLimited => "send failed, please retry",
        ErrorKind::Validation => "nothing to send",
        _ => "something went wrong, please try again later",
    }
}

async fn send(
    cfg: &Config,
    message: String,
    chat_id: Option<String>,
    show_reasoning: bool,
) -> anyhow::Result<()> {
    let client = ChatClient::from_config(cfg)?;
    let mut handle = client.spawn_chat(vec![Message::user(message)], chat_id);
    let mut renderer = Renderer {
        show_reasoning,
        ..Default::default()
    };

    loop {
        tokio::select! {
            update = handle.next_update() => match update {
                Some(snap) => renderer.render(&snap),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                handle.cancel();
                break;
            }
        }
    }
    if renderer.content_shown > 0 {
        println!();
    }

    match handle.outcome().await {
        ChatOutcome::Completed(_) => Ok(()),
        ChatOutcome::Cancelled => {
            eprintln!("[stopped by user]");
            Ok(())
        }
        ChatOutcome::Failed(err) => {
            tracing::error!(error = %err, kind = err.kind().as_str(), "send failed");
            eprintln!("[{}]", failure_notice(&err));
            Err(err.into())
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Send {
            message,
            chat_id,
            show_reasoning,
        } => send(&cfg, message, chat_id, show_reasoning).await?,
        Commands::List => {
            let http = HttpClient::from_config(&cfg)?;
            for chat in http.list_chats().await? {
                let when = chat.updated_at.or(chat.created_at).unwrap_or_default();
                println!("{}\t{}\t{}", chat.id, when, chat.title);
            }
        }
        Commands::History { id } => {
            let http = HttpClient::from_config(&cfg)?;
            let history = http.chat_history(&id).await?;
            if let Some(title) = history.title {
                println!("# {title}");
            }
            for m in history.messages {
                let who = match m.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                };
                if let Some(r) = m.reasoning {
                    println!("[{who} reasoning] {r}");
                }
                println!("[{who}] {}", m.content);
            }
        }
        Commands::Delete { id } => {
            let http = HttpClient::from_config(&cfg)?;
            let ack = http.delete_chat(&id).await?;
            println!("{ack}");
        }
    }

    Ok(())
}
