use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;
use tracing::info;

use cpsync::config::Config;
use cpsync::sync::{JobKind, Priority};
use cpsync::{logging, persist, Engine};

#[derive(Parser, Debug)]
#[command(name = "cpsync")]
#[command(about = "Keeps a local mirror of competitive-programming progress data in sync")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/cpsync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Run the scheduler and background syncs until Ctrl-C
  Run,
  /// Print a health report as JSON
  Health,
  /// Queue one sync job and drain the queue once
  Enqueue {
    #[command(subcommand)]
    target: Target,

    #[arg(short, long, global = true, default_value = "high")]
    priority: Priority,
  },
  /// Print the persisted queue snapshot
  Queue,
}

#[derive(Subcommand, Debug)]
enum Target {
  /// Profile and rating of a handle
  User { handle: String },
  /// Recent submissions of a handle
  Submissions {
    handle: String,
    #[arg(long, default_value_t = 100)]
    count: u32,
  },
  /// Contest list
  Contests {
    #[arg(long)]
    gym: bool,
  },
  /// Problem set, optionally filtered by comma-separated tags
  Problemset {
    #[arg(long, value_delimiter = ',')]
    tags: Vec<String>,
  },
}

impl From<Target> for JobKind {
  fn from(target: Target) -> Self {
    match target {
      Target::User { handle } => JobKind::UserSync { handle },
      Target::Submissions { handle, count } => JobKind::SubmissionSync { handle, count },
      Target::Contests { gym } => JobKind::ContestSync { include_gym: gym },
      Target::Problemset { tags } => JobKind::ProblemsetSync { tags },
    }
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let mut config = Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&config.logging);

  match args.command {
    Command::Run => {
      let engine = Engine::from_config(config).await?;
      engine.start();
      for handle in engine.config().sync.tracked_handles.clone() {
        engine.start_background_sync(&handle).await;
      }

      tokio::signal::ctrl_c().await?;
      info!("Interrupted, shutting down");
      engine.shutdown();
    }
    Command::Health => {
      let engine = Engine::from_config(config).await?;
      let report = engine.get_health().await;
      println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Command::Enqueue { target, priority } => {
      // Drain in the foreground so the process does not exit mid-job
      config.sync.auto_drain = false;
      let engine = Engine::from_config(config).await?;
      let id = engine.enqueue_sync(target.into(), priority).await;
      info!(job_id = %id, "Queued");
      engine.sync().drain().await;
      println!("{}", serde_json::to_string_pretty(&engine.status())?);
    }
    Command::Queue => {
      let store = persist::open(&config.persistence)?;
      let jobs = store.load_queue().await?;
      println!("{}", serde_json::to_string_pretty(&jobs)?);
    }
  }

  Ok(())
}
