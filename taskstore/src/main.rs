//! `taskstore` - small operator CLI for inspecting a JSON task store
//! without running the `loopwork` daemon.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use colored::Colorize;
use taskstore::{Filter, JsonTaskAdapter, Store};

/// Inspect a loopwork JSON task store.
#[derive(Parser)]
#[command(name = "taskstore", about = "Inspect a loopwork JSON task store", version)]
struct Cli {
    /// Path to the store's JSON document.
    #[arg(short, long, default_value = "tasks.json", global = true)]
    store: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show a single task by id.
    Show {
        id: String,
    },
    /// List tasks, optionally filtered by feature.
    List {
        #[arg(short, long)]
        feature: Option<String>,
    },
    /// Check that the store is reachable.
    Ping,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let adapter = JsonTaskAdapter::new(&cli.store);

    match cli.command {
        Command::Show { id } => {
            let task = adapter.get_task(&id).await?;
            println!("{}", serde_json::to_string_pretty(&task)?);
        }
        Command::List { feature } => {
            let filter = Filter { feature, ..Default::default() };
            let tasks = adapter.list_tasks(&filter).await?;
            for task in tasks {
                println!("{:<12} {:<7} {:<8} {}", task.id, task.priority, task.status, task.title);
            }
        }
        Command::Ping => match adapter.ping().await {
            Ok(result) => println!("{} store reachable ({}ms)", "ok".green(), result.latency_ms),
            Err(e) => {
                println!("{} {}", "unreachable".red(), e);
                std::process::exit(1);
            }
        },
    }

    Ok(())
}
