use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use analysis_client::api::{AnalysisBackend, ChatBackend};
use analysis_client::tasks::{status_label_cn, TaskStatus};
use analysis_client::{chat, ClientConfig, HttpBackend, PollerConfig, TaskRegistry};
use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "analysis-client", about = "Watch analysis jobs and chat about their results")]
struct Args {
    /// Backend base URL, e.g. http://localhost:8000/api/v1
    #[arg(long, global = true)]
    base_url: Option<String>,
    /// Bearer token sent with every request
    #[arg(long, global = true, env = "ANALYSIS_API_TOKEN", hide_env_values = true)]
    token: Option<String>,
    /// TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List every known analysis task
    List,
    /// Start analysing a dataset and follow it to the end
    Watch { data_id: String },
    /// Print the results of a finished task
    Results { task_id: String },
    /// Ask a question in a chat and stream the answer
    Chat {
        chat_id: String,
        question: String,
        #[arg(long)]
        kb_id: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut config = ClientConfig::load(args.config.as_deref()).context("loading configuration")?;
    if let Some(url) = args.base_url {
        config.base_url = url;
    }
    if let Some(token) = args.token {
        config.token = Some(token);
    }
    config.validate()?;

    let backend = Arc::new(HttpBackend::new(&config).context("building HTTP client")?);
    tracing::debug!("Using backend at {}", backend.base_url());

    match args.command {
        Command::List => list(backend.as_ref()).await,
        Command::Watch { data_id } => watch(backend, &config, &data_id).await,
        Command::Results { task_id } => {
            let results = backend.task_results(&task_id).await?;
            println!("{}", serde_json::to_string_pretty(&results)?);
            Ok(())
        }
        Command::Chat {
            chat_id,
            question,
            kb_id,
        } => ask(backend.as_ref(), &chat_id, kb_id.as_deref(), &question).await,
    }
}

async fn list(backend: &dyn AnalysisBackend) -> anyhow::Result<()> {
    let mut tasks = backend.list_tasks().await.context("fetching task list")?;
    tasks.sort_by(|a, b| a.data_id.cmp(&b.data_id));
    for task in tasks {
        println!(
            "{}\t{}\t{}\t{}%",
            task.data_id,
            task.task_id,
            status_label_cn(Some(task.status)),
            task.status.baseline_progress()
        );
    }
    Ok(())
}

async fn watch(
    backend: Arc<HttpBackend>,
    config: &ClientConfig,
    data_id: &str,
) -> anyhow::Result<()> {
    let registry = TaskRegistry::new(backend, PollerConfig::from(config));
    let mut events = registry.subscribe();

    let task_id = registry
        .start(data_id)
        .await
        .with_context(|| format!("starting analysis for data {}", data_id))?;
    println!("task {} started for data {}", task_id, data_id);

    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!("Skipped {} progress update(s)", n);
                continue;
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        };
        if event.data_id != data_id {
            continue;
        }
        println!("{} {:>3}%", event.label, event.progress);
        if event.status.is_terminal() {
            if event.status == TaskStatus::Failed {
                bail!("analysis for data {} failed", data_id);
            }
            break;
        }
    }
    Ok(())
}

async fn ask(
    backend: &dyn ChatBackend,
    chat_id: &str,
    kb_id: Option<&str>,
    question: &str,
) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout();
    let finished = chat::send_streamed(backend, chat_id, kb_id, question, |token, done| {
        if done {
            let _ = writeln!(stdout);
        } else {
            let _ = write!(stdout, "{}", token);
            let _ = stdout.flush();
        }
    })
    .await
    .context("streaming answer")?;
    if !finished {
        tracing::warn!("Answer ended without an end marker");
    }
    Ok(())
}
