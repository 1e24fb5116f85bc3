mod cli;
mod config;
mod error;
mod groq_client;

use std::io;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use dotenv::dotenv;
use eyre::Result;
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::cli::chat::conversation_state::{ContextWindow, ModelId};
use crate::cli::chat::ChatContext;
use crate::config::{ClientSettings, DEFAULT_BASE_URL, DEFAULT_TIMEOUT_SECS};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    chat: ChatArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a chat session
    Chat {
        #[command(flatten)]
        args: ChatArgs,
    },
    /// List the supported models
    Models,
}

#[derive(Args, Clone)]
struct ChatArgs {
    /// Model to start with, by alias (model-small) or API name (llama3-8b-8192)
    #[arg(short, long, default_value = "model-small")]
    model: ModelId,

    /// Input to send to the chat
    #[arg(short, long)]
    input: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Base URL of the OpenAI-compatible API
    #[arg(long, default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Request timeout in seconds
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    timeout: u64,

    /// Sampling temperature
    #[arg(long)]
    temperature: Option<f32>,

    /// System prompt sent ahead of the conversation
    #[arg(long)]
    system: Option<String>,

    /// Only send the last N turns as context instead of the whole history
    #[arg(long, value_name = "N")]
    max_context_turns: Option<usize>,
}

impl ChatArgs {
    fn settings(&self) -> ClientSettings {
        ClientSettings {
            base_url: self.base_url.clone(),
            timeout: Duration::from_secs(self.timeout),
            temperature: self.temperature,
            system_prompt: self.system.clone(),
        }
    }

    fn context_window(&self) -> ContextWindow {
        match self.max_context_turns {
            Some(n) => ContextWindow::Recent(n),
            None => ContextWindow::Full,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load environment variables from .env file
    dotenv().ok();

    let cli = Cli::parse();

    let args = match cli.command {
        Some(Commands::Chat { args }) => args,
        Some(Commands::Models) => {
            for model in ModelId::ALL {
                println!("{:<14} {:<20} {}", model.alias(), model.api_name(), model.description());
            }
            return Ok(ExitCode::SUCCESS);
        }
        None => cli.chat,
    };

    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting Groq Chat CLI");
    debug!("Using model {} against {}", args.model, args.base_url);

    let mut chat_context = ChatContext::new(
        Box::new(io::stdout()),
        args.input.clone(),
        true,
        args.model,
        args.context_window(),
        args.settings(),
    );
    chat_context.run().await
}
