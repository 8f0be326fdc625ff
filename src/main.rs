use std::env;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use docchat_core::{
    drive_stream, ChatMessage, ChatRole, ChatSession, Config, FileStorage, MessageCache,
    RagClient, StreamEnvelope, StreamUpdate,
};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

mod app;
mod handler;
mod tui;
mod ui;

use app::App;
use tui::EventHandler;

#[derive(Parser)]
#[command(name = "docchat", version)]
#[command(about = "Chat with your PDF documents through a RAG service")]
struct Cli {
    /// Base URL of the document chat service
    #[arg(long, global = true, value_name = "URL")]
    api_url: Option<String>,

    #[arg(long, global = true, env = "DOCCHAT_LOG", value_name = "LEVEL")]
    log_level: Option<String>,

    /// Also log to stderr (ignored by the interactive UI)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive chat (default)
    Tui,
    /// Ask a question and stream the answer to stdout
    Ask {
        /// Your question
        question: String,
    },
    /// Upload and index a PDF
    Upload {
        /// Path to the PDF file
        path: PathBuf,
    },
    /// Show the currently indexed document
    Status,
    /// Print the server's chat history
    History,
    /// Check that the service is reachable
    Health,
    /// Start a new chat, discarding the document and history
    Reset,
    /// Clear the chat history but keep the document
    Clear,
    /// Show the effective configuration
    Config {
        /// Write it to the user config file
        #[arg(long)]
        save: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load()?;
    config.apply_env(cli.api_url.clone());
    let storage_dir = config.storage_dir()?;

    let command = cli.command.unwrap_or(Commands::Tui);
    let interactive = matches!(command, Commands::Tui);
    init_logging(
        &storage_dir,
        cli.log_level.as_deref(),
        cli.verbose && !interactive,
    )?;
    info!(api_url = config.base_url(), "starting docchat");

    let client = RagClient::from_config(&config);
    let cache = MessageCache::new(FileStorage::new(&storage_dir), config.cache_limit);
    let mut session = ChatSession::new(cache, config.line_mode);

    match command {
        Commands::Tui => run_tui(session, client, &config).await,
        Commands::Ask { question } => ask(&client, &mut session, &question).await,
        Commands::Upload { path } => upload(&client, &mut session, &path).await,
        Commands::Status => show_status(&client, &mut session).await,
        Commands::History => show_history(&client, &mut session).await,
        Commands::Health => show_health(&client).await,
        Commands::Reset => {
            let response = session.new_chat(&client).await?;
            println!("{}", response.status.green());
            Ok(())
        }
        Commands::Clear => {
            let response = session.clear_chat(&client).await?;
            println!("{}", response.status.green());
            Ok(())
        }
        Commands::Config { save } => show_config(&config, &storage_dir, save),
    }
}

fn show_config(config: &Config, storage_dir: &Path, save: bool) -> Result<()> {
    println!("{} {}", "api_url:".bold(), config.base_url());
    println!(
        "{} {}s / {}s / {}s",
        "timeouts (request/health/upload):".bold(),
        config.request_timeout_secs,
        config.health_timeout_secs,
        config.upload_timeout_secs
    );
    println!("{} {}s", "health poll:".bold(), config.health_poll_secs);
    println!("{} {}", "cache limit:".bold(), config.cache_limit);
    println!("{} {}MB", "max upload:".bold(), config.max_upload_mb);
    println!("{} {:?}", "line mode:".bold(), config.line_mode);
    println!("{} {}", "storage:".bold(), storage_dir.display());

    if save {
        let path = config.save()?;
        println!("{} {}", "Saved to".green(), path.display());
    }
    Ok(())
}

fn init_logging(dir: &Path, log_level: Option<&str>, enable_stderr_logging: bool) -> Result<()> {
    let dir_ok = fs::create_dir_all(dir).is_ok();

    let level = log_level
        .map(str::to_owned)
        .or_else(|| env::var("RUST_LOG").ok())
        .unwrap_or_else(|| "info".to_owned());

    let filter = EnvFilter::try_new(level).context("parse log level")?;

    let file_layer = if dir_ok {
        tracing_appender::rolling::RollingFileAppender::builder()
            .rotation(tracing_appender::rolling::Rotation::NEVER)
            .filename_prefix("docchat")
            .filename_suffix("log")
            .build(dir)
            .ok()
            .map(|file_appender| {
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(file_appender)
            })
    } else {
        None
    };

    let stderr_layer = enable_stderr_logging.then(|| {
        tracing_subscriber::fmt::layer()
            .with_ansi(true)
            .with_writer(io::stderr)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .init();

    Ok(())
}

async fn run_tui(session: ChatSession, client: RagClient, config: &Config) -> Result<()> {
    tui::install_panic_hook();
    let mut terminal = tui::init()?;

    let mut events = EventHandler::new(config.health_poll_interval());
    let mut app = App::new(session, client, events.sender(), events.session_sender());
    app.start_sync();

    let result = async {
        while !app.should_quit {
            terminal.draw(|frame| ui::render(&mut app, frame))?;
            match events.next().await {
                Some(event) => handler::handle_event(&mut app, event).await?,
                None => break,
            }
        }
        Ok::<_, anyhow::Error>(())
    }
    .await;

    app.abort();
    tui::restore()?;
    result
}

async fn ask(client: &RagClient, session: &mut ChatSession, question: &str) -> Result<()> {
    let Some(ticket) = session.begin_send(question) else {
        bail!("question is empty");
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    let driver = tokio::spawn(drive_stream(client.clone(), ticket, session.line_mode(), tx));

    let mut stdout = io::stdout();
    let mut failure = None;
    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                match &event.update {
                    StreamUpdate::Envelope(StreamEnvelope::Token(token)) => {
                        print!("{}", token);
                        stdout.flush()?;
                    }
                    StreamUpdate::Envelope(StreamEnvelope::Error(message)) => {
                        print!("\n\n{} {}", "Error:".red().bold(), message);
                        stdout.flush()?;
                    }
                    StreamUpdate::Failed(err) if !err.is_abort() => failure = Some(err.clone()),
                    _ => {}
                }
                session.apply(event);
            }
            _ = tokio::signal::ctrl_c(), if session.is_loading() => {
                session.abort();
                eprintln!("\n{}", "Stopped.".yellow());
            }
        }
    }
    driver.await?;
    println!();

    if let Some(err) = failure {
        eprintln!("{}", "Failed to get response. Please try again.".red());
        return Err(err.into());
    }

    let sources = &session.state().sources;
    if !sources.is_empty() {
        println!("\n{}", "Sources:".magenta().bold());
        for source in sources {
            println!("  {} {}", format!("p.{}", source.page).magenta(), source.preview.dimmed());
        }
    }
    Ok(())
}

async fn upload(client: &RagClient, session: &mut ChatSession, path: &Path) -> Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    println!("{} {}", "Indexing".yellow(), file_name);
    session.begin_upload();
    let result = client.upload_path(path).await;

    if let Ok(response) = &result {
        println!(
            "{} {} ({} chunks)",
            response.filename.bold(),
            response.status.green(),
            response.chunks
        );
    }
    let failed = result.as_ref().err().cloned();
    session.finish_upload(&file_name, result, Instant::now());

    match failed {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

async fn show_status(client: &RagClient, session: &mut ChatSession) -> Result<()> {
    let status = client.fetch_status().await?;
    match &status.filename {
        Some(name) => println!("{} {}", "Document:".bold(), name.green()),
        None => println!("{}", "No document indexed".dimmed()),
    }
    session.apply_status(status);
    Ok(())
}

async fn show_history(client: &RagClient, session: &mut ChatSession) -> Result<()> {
    let history = client.fetch_history().await?;
    if history.is_empty() {
        println!("{}", "No messages yet".dimmed());
    }
    for message in &history {
        print_message(message);
    }
    session.reconcile_history(history);
    Ok(())
}

fn print_message(message: &ChatMessage) {
    match message.role {
        ChatRole::User => println!("{}", "You:".cyan().bold()),
        ChatRole::Assistant => println!("{}", "AI:".yellow().bold()),
    }
    println!("{}\n", message.content);
}

async fn show_health(client: &RagClient) -> Result<()> {
    match client.check_health().await {
        Ok(health) => {
            let version = health
                .version
                .map(|v| format!(" (v{})", v))
                .unwrap_or_default();
            println!("{} {}{}", "●".green(), "Connected", version.dimmed());
            Ok(())
        }
        Err(err) => {
            println!("{} {}", "●".red(), "Offline");
            Err(err.into())
        }
    }
}
