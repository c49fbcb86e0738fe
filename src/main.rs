use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use url::Url;

use dcrflow_event::Relation;
use dcrflow_rpc::{EventRpc, HttpEventRpc};

/// dcrflow - a distributed DCR workflow engine client
#[derive(Parser)]
#[command(name = "dcrflow")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.dcrflow)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  /// Base URI of the event node to talk to (default: the uri stored in
  /// <data-dir>/node.json)
  #[arg(long, global = true)]
  uri: Option<Url>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Show an event node's state
  State {
    #[arg(long)]
    workflow: String,
    #[arg(long)]
    event: String,
    /// Sender id to present to the node (default: a fresh id)
    #[arg(long)]
    sender: Option<String>,
  },

  /// Execute an event node with a role claim
  Execute {
    #[arg(long)]
    workflow: String,
    #[arg(long)]
    event: String,
    /// Role to claim; repeat for multiple roles
    #[arg(long = "role", required = true)]
    roles: Vec<String>,
  },

  /// Show an event node's causal history graph
  History {
    #[arg(long)]
    workflow: String,
    #[arg(long)]
    event: String,
  },

  /// Acquire an event node's lock
  Lock {
    #[arg(long)]
    workflow: String,
    #[arg(long)]
    event: String,
    #[arg(long)]
    owner: String,
  },

  /// Release an event node's lock
  Unlock {
    #[arg(long)]
    workflow: String,
    #[arg(long)]
    event: String,
    #[arg(long)]
    owner: String,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let data_dir = cli.data_dir.clone().unwrap_or_else(|| {
    dirs::home_dir()
      .expect("could not determine home directory")
      .join(".dcrflow")
  });

  match cli.command {
    Some(command) => {
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(async { run_command(command, cli.uri, data_dir).await })
    }
    None => {
      println!("dcrflow - use --help to see available commands");
      Ok(())
    }
  }
}

async fn run_command(command: Commands, uri: Option<Url>, data_dir: PathBuf) -> Result<()> {
  let base = match uri {
    Some(uri) => uri,
    None => default_node_uri(&data_dir).await?,
  };
  let rpc = HttpEventRpc::new();

  match command {
    Commands::State {
      workflow,
      event,
      sender,
    } => {
      let sender = sender.unwrap_or_else(|| format!("cli-{}", uuid::Uuid::new_v4()));
      let state = rpc
        .state(&base, &workflow, &event, &sender)
        .await
        .context("failed to fetch event state")?;
      println!("{}", serde_json::to_string_pretty(&state)?);
    }

    Commands::Execute {
      workflow,
      event,
      roles,
    } => {
      rpc
        .execute(&base, &workflow, &event, roles)
        .await
        .context("execute failed")?;
      eprintln!("executed {workflow}/{event}");
    }

    Commands::History { workflow, event } => {
      let history = rpc
        .history(&base, &workflow, &event)
        .await
        .context("failed to fetch event history")?;
      println!("{}", serde_json::to_string_pretty(&history)?);
    }

    Commands::Lock {
      workflow,
      event,
      owner,
    } => {
      let target = target_relation(&base, &workflow, &event);
      rpc.lock(&target, &owner).await.context("lock failed")?;
      eprintln!("locked {workflow}/{event} for {owner}");
    }

    Commands::Unlock {
      workflow,
      event,
      owner,
    } => {
      let target = target_relation(&base, &workflow, &event);
      rpc.unlock(&target, &owner).await.context("unlock failed")?;
      eprintln!("unlocked {workflow}/{event}");
    }
  }

  Ok(())
}

fn target_relation(base: &Url, workflow_id: &str, event_id: &str) -> Relation {
  Relation {
    workflow_id: workflow_id.to_string(),
    event_id: event_id.to_string(),
    uri: base.clone(),
  }
}

/// Read the default node address from `<data-dir>/node.json`.
async fn default_node_uri(data_dir: &PathBuf) -> Result<Url> {
  let path = data_dir.join("node.json");
  let content = tokio::fs::read_to_string(&path).await.with_context(|| {
    format!(
      "no --uri given and no default node at {} (expected {})",
      path.display(),
      json!({ "uri": "http://localhost:8080/" })
    )
  })?;

  let value: serde_json::Value =
    serde_json::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))?;
  let uri = value
    .get("uri")
    .and_then(|v| v.as_str())
    .with_context(|| format!("{} has no \"uri\" field", path.display()))?;

  uri
    .parse()
    .with_context(|| format!("invalid uri in {}: {uri}", path.display()))
}
