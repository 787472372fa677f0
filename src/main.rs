use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use relay::agent::RemoteAgent;
use relay::agent::vertex::{VertexAgent, VertexConfig};
use relay::banner::{BannerInfo, RowCounts, job_summary, print_banner};
use relay::config::{BatchConfig, EngineRegistry};
use relay::consts::{
    BATCH_USER_ID, CHAT_USER_ID, DEFAULT_LOCATION, DEFAULT_MAX_CONCURRENCY, DEFAULT_POLL_INTERVAL,
    default_db_path, default_results_dir,
};
use relay::controller::BatchController;
use relay::events::Event;
use relay::job::JobStatus;
use relay::spinner::Spinner;
use relay::store::JobStore;
use relay::store::sqlite::SqliteJobStore;

#[derive(Parser)]
#[command(
    name = "relay",
    version,
    about = "Fan a CSV of prompts out to a Vertex AI agent engine."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// SQLite database for job records
    #[arg(long, global = true, env = "RELAY_DB")]
    db: Option<PathBuf>,

    /// Directory result CSVs are written to
    #[arg(long, global = true, env = "RELAY_RESULTS_DIR")]
    results_dir: Option<PathBuf>,

    /// Google Cloud project hosting the agent engine
    #[arg(long, global = true, env = "GOOGLE_CLOUD_PROJECT", default_value = "")]
    project: String,

    /// Google Cloud region of the agent engine
    #[arg(long, global = true, env = "GOOGLE_CLOUD_LOCATION", default_value = DEFAULT_LOCATION)]
    location: String,

    /// OAuth access token (e.g. from `gcloud auth print-access-token`)
    #[arg(
        long,
        global = true,
        env = "GOOGLE_ACCESS_TOKEN",
        hide_env_values = true,
        default_value = ""
    )]
    access_token: String,

    /// Engine key, resolved through <KEY>_AGENT_ENGINE_ID
    #[arg(short, long, global = true, default_value = "doc")]
    engine: String,

    /// Engine id or resource name; bypasses the engine key
    #[arg(long, global = true)]
    engine_id: Option<String>,

    /// Maximum remote calls in flight per job
    #[arg(short = 'j', long, global = true, env = "RELAY_MAX_CONCURRENCY", default_value_t = DEFAULT_MAX_CONCURRENCY)]
    concurrency: usize,

    /// Per-call timeout in seconds
    #[arg(short, long, global = true, env = "RELAY_TIMEOUT", default_value_t = 300)]
    timeout: u64,
}

#[derive(Subcommand)]
enum Command {
    /// Submit a CSV (first column = prompt) and wait for the job to finish
    Submit {
        file: PathBuf,
        /// Print the job handle and final status as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a job's status
    Status {
        job_id: String,
        #[arg(long)]
        json: bool,
    },
    /// Locate (or copy out) a completed job's result CSV
    Result {
        job_id: String,
        /// Copy the artifact here instead of printing its path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Send a single message and print the reply
    Ask {
        message: String,
        /// Continue an existing remote session
        #[arg(long)]
        session: Option<String>,
    },
    /// Mark jobs stuck in pending/running as failed
    Recover {
        /// Only jobs untouched for this many seconds
        #[arg(long, default_value_t = 3600)]
        older_than: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("relay=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Command::Submit { file, json } => handle_submit(&cli, file, *json).await,
        Command::Status { job_id, json } => {
            let controller = build_controller(&cli)?;
            let record = controller.status(job_id).await?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&record)?);
            } else {
                println!("{}", job_summary(job_id, &record, RowCounts::default()));
            }
            Ok(())
        }
        Command::Result { job_id, output } => {
            let controller = build_controller(&cli)?;
            let path = controller.result(job_id).await?;
            match output {
                Some(dest) => {
                    tokio::fs::copy(&path, dest)
                        .await
                        .with_context(|| format!("failed to copy result to {}", dest.display()))?;
                    println!("{}", dest.display());
                }
                None => println!("{}", path.display()),
            }
            Ok(())
        }
        Command::Ask { message, session } => {
            let agent = VertexAgent::new(vertex_config(&cli)?)?.with_user_id(CHAT_USER_ID);
            let reply = agent.chat(message, session.clone()).await?;
            println!("{}", reply.text);
            eprintln!("session: {}", reply.session_id);
            Ok(())
        }
        Command::Recover { older_than } => {
            let controller = build_controller(&cli)?;
            let recovered = controller
                .recover_stale(Duration::from_secs(*older_than))
                .await?;
            for job_id in &recovered {
                println!("{job_id}");
            }
            eprintln!("recovered {} job(s)", recovered.len());
            Ok(())
        }
    }
}

async fn handle_submit(cli: &Cli, file: &Path, json: bool) -> anyhow::Result<()> {
    let content = tokio::fs::read(file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;

    let config = vertex_config(cli)?;
    let engine = config.engine_id.clone();
    let agent: Arc<dyn RemoteAgent> = Arc::new(VertexAgent::new(config)?.with_user_id(BATCH_USER_ID));

    let batch = batch_config(cli);
    let db = db_path(cli);
    print_banner(&BannerInfo {
        engine: &engine,
        concurrency: batch.max_concurrency,
        store: &db.display().to_string(),
        results_dir: &batch.results_dir,
    });

    let controller = build_controller(cli)?;
    let mut events = controller.events().subscribe();
    let handle = controller.submit_csv(agent, &content).await?;
    let job_id = handle.job_id.to_string();
    if json {
        println!("{}", serde_json::to_string(&handle)?);
    } else {
        eprintln!("submitted {} ({})", job_id, handle.status_url);
    }

    let spinner = Spinner::start(JobStatus::Pending.as_str());
    let mut counts = RowCounts::default();
    let mut ticker = tokio::time::interval(DEFAULT_POLL_INTERVAL);

    let record = loop {
        tokio::select! {
            event = events.recv() => {
                if let Ok(Event::RowFinished { job_id: id, done, total, failed }) = event
                    && id == handle.job_id
                {
                    counts.total = total as u64;
                    if failed {
                        counts.failed += 1;
                    }
                    spinner.set_message(format!("{done}/{total} rows"));
                }
            }
            _ = ticker.tick() => {
                let record = controller.status(&job_id).await?;
                if record.status.is_terminal() {
                    break record;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                spinner.stop().await;
                bail!("interrupted; job {job_id} will stay unfinished until `relay recover`");
            }
        }
    };
    spinner.stop().await;

    if json {
        println!("{}", serde_json::to_string(&record)?);
    } else {
        println!("{}", job_summary(&job_id, &record, counts));
    }
    if record.status == JobStatus::Failed {
        bail!("job {job_id} failed");
    }
    Ok(())
}

fn db_path(cli: &Cli) -> PathBuf {
    cli.db.clone().unwrap_or_else(default_db_path)
}

fn batch_config(cli: &Cli) -> BatchConfig {
    BatchConfig {
        max_concurrency: cli.concurrency,
        invoke_timeout: Duration::from_secs(cli.timeout),
        results_dir: cli.results_dir.clone().unwrap_or_else(default_results_dir),
    }
}

fn build_controller(cli: &Cli) -> anyhow::Result<BatchController> {
    let db = db_path(cli);
    if let Some(parent) = db.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let db = db.to_str().context("database path is not valid UTF-8")?;
    let store: Arc<dyn JobStore> = Arc::new(SqliteJobStore::open(db)?);
    Ok(BatchController::new(store, batch_config(cli)))
}

fn vertex_config(cli: &Cli) -> anyhow::Result<VertexConfig> {
    let engine_id = match &cli.engine_id {
        Some(id) => id.clone(),
        None => EngineRegistry::from_env().resolve(&cli.engine)?.to_string(),
    };
    Ok(VertexConfig {
        project: cli.project.clone(),
        location: cli.location.clone(),
        engine_id,
        access_token: cli.access_token.clone(),
    })
}
