use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use coursechat_client::{ChatClient, ConsumerUpdate, TurnOutcome};
use coursechat_common::{ChatContext, ChatRequest, ContextType};
use coursechat_config::{AppConfig, ConfigLoader};
use coursechat_gateway::GatewayServer;
use coursechat_security::{RedactingWriter, mask_key};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "coursechat")]
#[command(about = "Streaming course assistant gateway")]
#[command(version)]
struct Cli {
    /// Path to a YAML or TOML configuration file
    #[arg(long, short, global = true, env = "COURSECHAT_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the chat gateway
    Serve,
    /// Send one message to a running gateway and print the reply as it streams
    Ask {
        message: String,

        #[arg(long, default_value = "http://127.0.0.1:3100")]
        url: String,

        /// course-advising, technical-support, general-inquiry or learning-assistance
        #[arg(long, default_value = "general-inquiry")]
        context_type: ContextType,
    },
    /// Load and validate configuration, then print the effective values
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Commands::Serve => serve(load_config(cli.config)?).await,
        Commands::Ask {
            message,
            url,
            context_type,
        } => ask(&url, message, context_type).await,
        Commands::CheckConfig => check_config(load_config(cli.config)?),
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(RedactingWriter::stderr()))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(RedactingWriter::stderr()))
            .init();
    }
}

fn load_config(path: Option<PathBuf>) -> Result<AppConfig> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = path {
        loader = loader.with_path(path);
    }
    loader.load().context("failed to load configuration")
}

async fn serve(config: AppConfig) -> Result<()> {
    info!(
        provider = %config.llm.provider,
        model = %config.llm.model,
        content_dir = %config.content.dir.display(),
        "starting coursechat gateway"
    );
    let server = GatewayServer::new(config).context("failed to build gateway")?;
    server.run().await?;
    Ok(())
}

async fn ask(url: &str, message: String, context_type: ContextType) -> Result<()> {
    let client = ChatClient::new(url)?;
    let request = ChatRequest::new(message).with_context(ChatContext::new(context_type));

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.cancel();
        }
    });

    let mut printed = 0;
    let mut stdout = std::io::stdout();
    let outcome = client
        .send(&request, &cancel, |update| match update {
            ConsumerUpdate::Streaming(reply) => {
                if let Some(delta) = reply.get(printed..) {
                    let _ = write!(stdout, "{delta}");
                    let _ = stdout.flush();
                }
                printed = reply.len();
            }
            ConsumerUpdate::ToolCall { name, arguments } => {
                eprintln!("[tool call] {name} {arguments}");
            }
            _ => {}
        })
        .await;

    match outcome {
        TurnOutcome::Completed(_) => {
            println!();
            Ok(())
        }
        TurnOutcome::Cancelled => {
            println!();
            eprintln!("cancelled");
            Ok(())
        }
        TurnOutcome::Failed(error) => {
            println!();
            eprintln!("{}", error.suggested_action);
            if error.retryable {
                eprintln!("(this error is retryable)");
            }
            bail!(error)
        }
    }
}

fn check_config(mut config: AppConfig) -> Result<()> {
    let key = config.llm.api_key.take();
    let rendered = serde_yaml::to_string(&config).context("failed to render configuration")?;
    print!("{rendered}");
    match key {
        Some(key) => println!("# api key: {}", mask_key(&key)),
        None => println!(
            "# api key: not set (export {} or set llm.api_key)",
            config.llm.api_key_env
        ),
    }
    Ok(())
}
