use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use serde::Deserialize;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use task_assigner::config::AssignerConfig;
use task_assigner::directory::{Identity, InMemoryDirectory};
use task_assigner::service::TaskAssigningService;
use task_assigner::solver::GreedyEngine;
use task_assigner::store::{AssignmentStore, LibSqlAssignmentStore};
use task_assigner::tracker::{InMemoryTaskTracker, TaskSnapshot};

/// Initial tracker contents, read from `TASK_ASSIGNER_SEED`.
#[derive(Debug, Default, Deserialize)]
struct Seed {
    #[serde(default)]
    tasks: Vec<TaskSnapshot>,
    #[serde(default)]
    users: Vec<Identity>,
}

fn load_seed() -> anyhow::Result<Seed> {
    let Ok(path) = std::env::var("TASK_ASSIGNER_SEED") else {
        return Ok(Seed::default());
    };
    let raw = std::fs::read_to_string(&path).with_context(|| format!("reading seed {path}"))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing seed {path}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Optional daily-rolling file log next to stderr.
    let (file_layer, _guard) = match std::env::var("TASK_ASSIGNER_LOG_DIR") {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "task-assigner.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        Err(_) => (None, None),
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    let config = AssignerConfig::from_env()?;

    eprintln!("Task assigner v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Sync interval: {:?}", config.sync_interval);
    eprintln!("   Publish window: {}", config.publish_window_size);
    eprintln!("   Target user: {}", config.target_user);

    let seed = load_seed()?;
    let tracker = Arc::new(InMemoryTaskTracker::with_tasks(seed.tasks));
    let directory = Arc::new(InMemoryDirectory::new(seed.users));

    // ── Assignment store ────────────────────────────────────────────────
    let store: Option<Arc<dyn AssignmentStore>> = match std::env::var("TASK_ASSIGNER_DB_PATH") {
        Ok(db_path) => {
            let store = LibSqlAssignmentStore::new_local(Path::new(&db_path))
                .await
                .with_context(|| format!("opening assignment store at {db_path}"))?;
            eprintln!("   Database: {}", db_path);
            let store: Arc<dyn AssignmentStore> = Arc::new(store);
            Some(store)
        }
        Err(_) => None,
    };

    let service = TaskAssigningService::new(
        config,
        Arc::new(GreedyEngine::new()),
        tracker,
        directory,
        store,
    )?;
    service.start()?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");
    service.destroy().await;
    Ok(())
}
