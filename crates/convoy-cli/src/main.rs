mod config;

use clap::{Parser, Subcommand};
use config::ConvoyConfig;
use convoy_agent::{AgentRuntime, EchoExecutor, ToolManagerClient};
use convoy_bus::AmqpBus;
use convoy_gateway::GatewayServer;
use convoy_orchestrator::{HttpPlanner, Orchestrator};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "convoy", about = "Convoy: goal decomposition and task dispatch over AMQP")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "convoy.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the orchestrator with its HTTP gateway
    Orchestrator {
        /// Address to bind to (overrides config)
        #[arg(long)]
        bind: Option<String>,
    },
    /// Run an echo worker
    Worker {
        /// Agent id (overrides config)
        #[arg(long)]
        agent_id: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let cli = Cli::parse();
    let config = ConvoyConfig::load(&cli.config).await?;

    match cli.command {
        Commands::Orchestrator { bind } => run_orchestrator(config, bind).await,
        Commands::Worker { agent_id } => run_worker(config, agent_id).await,
    }
}

async fn run_orchestrator(config: ConvoyConfig, bind: Option<String>) -> anyhow::Result<()> {
    let bus = Arc::new(AmqpBus::new(config.bus));
    let planner = Arc::new(HttpPlanner::new(config.planner)?);
    let orchestrator = Arc::new(Orchestrator::new(bus, planner));
    orchestrator.connect().await?;

    let consumer = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move {
            if let Err(e) = orchestrator.run_status_consumer().await {
                error!(error = %e, "Status consumer stopped");
            }
        }
    });

    let addr = bind.unwrap_or_else(|| config.server.bind.clone());
    let app = GatewayServer::build_with_config(orchestrator.clone(), &config.server);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Convoy gateway listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    orchestrator.shutdown().await?;
    if let Err(e) = consumer.await {
        warn!(error = %e, "Status consumer task panicked");
    }
    info!("Orchestrator stopped");
    Ok(())
}

async fn run_worker(mut config: ConvoyConfig, agent_id: Option<String>) -> anyhow::Result<()> {
    if let Some(agent_id) = agent_id {
        config.worker.agent_id = agent_id;
    }
    let dead_letter_exchange = config.bus.dead_letter_exchange.clone();
    let bus = Arc::new(AmqpBus::new(config.bus));

    let mut runtime = AgentRuntime::new(config.worker, bus, Arc::new(EchoExecutor))
        .with_dead_letter_exchange(dead_letter_exchange);
    if let Some(tools) = config.tool_manager {
        info!(base_url = %tools.base_url, "Tool manager enabled");
        runtime = runtime.with_tool_client(Arc::new(ToolManagerClient::new(tools)?));
    }
    let runtime = Arc::new(runtime);
    runtime.initialize().await?;
    info!(agent_id = runtime.agent_id(), "Worker started");

    tokio::select! {
        result = runtime.run() => result?,
        _ = shutdown_signal() => info!("Shutdown requested"),
    }

    runtime.shutdown().await?;
    info!(agent_id = runtime.agent_id(), "Worker stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
