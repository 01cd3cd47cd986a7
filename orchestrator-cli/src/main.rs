use std::io::{self, Write};

use anyhow::Result;
use clap::{Arg, Command};
use orchestrator::AgentOrchestrationCore;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let matches = Command::new("Agent Orchestration Core")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Host process for the agent orchestration core: message coordination, recovery, and workflow tracking")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Path to a TOML config file layered over built-in defaults"),
        )
        .arg(
            Arg::new("interactive")
                .short('i')
                .long("interactive")
                .help("Run an interactive status shell instead of waiting for a shutdown signal")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config").map(String::as_str);
    let config = ao_config::CoreConfig::load(config_path)?;
    info!("loaded configuration: key_prefix={} redis={}", config.key_prefix, config.redis_url.is_some());

    let core = AgentOrchestrationCore::new(config).await?;
    core.start().await;
    info!("agent orchestration core started");

    if matches.get_flag("interactive") {
        run_interactive_mode(&core).await?;
    } else {
        run_with_shutdown(&core).await?;
    }

    core.stop().await;
    Ok(())
}

async fn run_interactive_mode(core: &AgentOrchestrationCore) -> Result<()> {
    println!("Type 'help' for commands.");
    loop {
        print!("orchestrator> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        match handle_interactive_command(core, input) {
            ShouldExit::Yes => break,
            ShouldExit::No => {}
        }
    }
    Ok(())
}

enum ShouldExit {
    Yes,
    No,
}

fn handle_interactive_command(core: &AgentOrchestrationCore, input: &str) -> ShouldExit {
    let parts: Vec<&str> = input.split_whitespace().collect();
    match parts[0] {
        "help" | "h" => {
            println!("Available commands:");
            println!("  resources   - Show resource pool utilization");
            println!("  workflows   - List actively tracked workflows");
            println!("  quit, exit  - Exit");
        }
        "resources" | "r" => {
            for pool in core.resources.pool_snapshot() {
                println!(
                    "  {:?}: {:.1}/{:.1} ({:.0}% used)",
                    pool.resource_type,
                    pool.total - pool.available,
                    pool.total,
                    pool.utilization() * 100.0
                );
            }
        }
        "workflows" | "w" => {
            let active = core.tracker.get_active_workflows(None);
            if active.is_empty() {
                println!("No active workflows.");
            } else {
                for workflow in active {
                    println!(
                        "  {} - {:?} ({:.1}% complete)",
                        workflow.workflow_id, workflow.status, workflow.progress_percentage
                    );
                }
            }
        }
        "quit" | "exit" | "q" => return ShouldExit::Yes,
        other => println!("Unknown command: {}. Type 'help' for available commands.", other),
    }
    ShouldExit::No
}

async fn run_with_shutdown(_core: &AgentOrchestrationCore) -> Result<()> {
    info!("running. Press Ctrl+C to shut down.");
    match signal::ctrl_c().await {
        Ok(()) => info!("received shutdown signal, shutting down gracefully..."),
        Err(err) => error!("unable to listen for shutdown signal: {}", err),
    }
    Ok(())
}
