mod chat;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use confab_agent::build_orchestrator;
use confab_config::{config_file_path, load_and_prepare, redacted, ConfabConfig};
use confab_logging::{init_logger, ConsoleOutput};

#[derive(Parser)]
#[command(name = "confab")]
#[command(about = "Confab: streaming chat with confirmed tool calls")]
#[command(version)]
struct Cli {
    /// Path to the YAML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway
    Serve {
        /// Port to bind the HTTP server to
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Chat with the engine in this terminal
    Chat {
        /// Resume an existing session
        #[arg(short, long)]
        session: Option<String>,
    },
    /// List the registered tools
    Tools,
    /// Query a running gateway's health
    Status {
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Print the effective configuration with secrets redacted
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let path = config_file_path(cli.config.as_deref());
    let mut config = load_and_prepare(&path).await?;

    let console = match cli.command {
        Commands::Serve { .. } => ConsoleOutput::Stdout,
        Commands::Chat { .. } => ConsoleOutput::Off,
        _ => ConsoleOutput::Stderr,
    };
    let _guard = init_logger(&config.logging.dir, &config.logging.level, console);

    match cli.command {
        Commands::Serve { port } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            run_server(config).await?;
        }
        Commands::Chat { session } => {
            let orchestrator = build_orchestrator(&config)?;
            chat::run(orchestrator, session).await?;
        }
        Commands::Tools => {
            let orchestrator = build_orchestrator(&config)?;
            for tool in orchestrator.tools() {
                println!("{:<10} {}", tool.name, tool.description);
                println!("           {}", serde_json::to_string(&tool.parameters)?);
            }
        }
        Commands::Status { port } => {
            let port = port.unwrap_or(config.server.port);
            let client = reqwest::Client::new();
            match client
                .get(format!("http://localhost:{port}/health"))
                .send()
                .await
            {
                Ok(resp) => {
                    let body: serde_json::Value = resp.json().await?;
                    println!("{}", serde_json::to_string_pretty(&body)?);
                }
                Err(_) => {
                    println!("Confab is not running on port {port}");
                }
            }
        }
        Commands::Config => {
            println!("# {}", path.display());
            print!("{}", serde_yaml::to_string(&redacted(&config))?);
        }
    }

    Ok(())
}

async fn run_server(config: ConfabConfig) -> Result<()> {
    let orchestrator = build_orchestrator(&config)?;
    info!(
        addr = %config.server.socket_addr(),
        provider = orchestrator.provider_name(),
        db = %config.storage.db_path,
        "Starting Confab gateway"
    );
    confab_gateway::start_server(&config.server, orchestrator).await
}
