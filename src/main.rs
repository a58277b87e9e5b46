use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};

use conductor::client::{RetryPolicy, RetryingClient};
use conductor::config::Config;
use conductor::core::{DependencyParser, TaskId};
use conductor::model::OpenAiCompatibleModel;
use conductor::orchestration::progress::render;
use conductor::orchestration::{
    report_publish_failure, Coordinator, DecomposeOutcome, GitCliPusher, GuardVerdict, Pipeline,
    ProgressUpdate, Publisher, ResolveReport, Resolver, RunContext, Stage,
};
use conductor::tracker::{GitHubTracker, IssueTracker};
use conductor::{clog, clog_error, Error, Result};

/// Conductor - dependency-aware task routing and run coordination on an issue tracker
#[derive(Parser, Debug)]
#[command(name = "conductor")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    CONDUCTOR_DEBUG=1    Enable debug logging (alternative to --debug)\n    GITHUB_REPOSITORY    owner/repo of the tracker\n    GITHUB_TOKEN         Tracker API token")]
pub struct Cli {
    /// Enable debug logging (writes to ~/.conductor/conductor.log)
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    /// Mirror log lines to stderr
    #[arg(long, global = true)]
    pub stderr: bool,

    /// Config file (default: ~/.conductor/conductor.toml)
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Classify a task; complex tasks are decomposed and their first subtasks started
    Classify {
        #[arg(long)]
        issue: u64,
    },

    /// Decompose a complex task into subtasks and start the ready ones
    Decompose {
        #[arg(long)]
        issue: u64,
    },

    /// React to a closed task by starting every task it unblocked
    Resolve {
        #[arg(long)]
        closed: u64,
    },

    /// Start the ready subtasks of a decomposed task
    ResolveBatch {
        #[arg(long)]
        parent: u64,
    },

    /// Run lifecycle hooks called from inside an automation run
    Run {
        #[command(subcommand)]
        action: RunAction,
    },

    /// Push a branch with retries, reporting whether anything was new
    Publish {
        #[arg(long)]
        branch: String,

        /// Trunk branch used as the comparison point
        #[arg(long)]
        base: String,

        /// Repository path
        #[arg(long, default_value = ".")]
        repo: PathBuf,

        #[arg(long, default_value = "origin")]
        remote: String,

        /// Task to comment on when every push attempt fails
        #[arg(long)]
        issue: Option<u64>,
    },

    /// Print a rendered progress comment
    RenderProgress {
        #[arg(long)]
        stage: String,

        #[arg(long)]
        status: String,

        #[arg(long)]
        percent: Option<u8>,

        #[arg(long)]
        details: Option<String>,
    },
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct RunArgs {
    #[arg(long)]
    pub issue: u64,

    /// Workflow file of this run
    #[arg(long)]
    pub workflow: String,

    /// Id of this run (default: $GITHUB_RUN_ID)
    #[arg(long)]
    pub run_id: Option<u64>,

    #[arg(long)]
    pub run_url: Option<String>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum RunAction {
    /// Duplicate check, then mark the task as processing
    Start {
        #[command(flatten)]
        run: RunArgs,
    },

    /// Update the progress comment
    Progress {
        #[command(flatten)]
        run: RunArgs,

        #[arg(long)]
        stage: String,

        #[arg(long)]
        status: String,

        #[arg(long)]
        percent: Option<u8>,

        #[arg(long)]
        details: Option<String>,
    },

    /// Mark the task completed and close it
    Complete {
        #[command(flatten)]
        run: RunArgs,

        /// Pull request reference to show in the progress comment
        #[arg(long)]
        pr: Option<String>,
    },

    /// Classify the run output and report the failure
    Fail {
        #[command(flatten)]
        run: RunArgs,

        /// File with the raw run output ("-" for stdin)
        #[arg(long, default_value = "-")]
        output: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    conductor::log::init(cli.debug, cli.stderr);

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = rt.block_on(run(cli)) {
        clog_error!("{}", e);
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    if let Command::RenderProgress {
        stage,
        status,
        percent,
        details,
    } = &cli.command
    {
        let update = progress_update(stage, status, *percent, details.as_deref())?;
        println!("{}", render(&update));
        return Ok(());
    }

    let config = Config::load(cli.config.as_deref())?;

    if let Command::Publish {
        branch,
        base,
        repo,
        remote,
        issue,
    } = &cli.command
    {
        return run_publish(&config, branch, base, repo, remote, *issue).await;
    }

    let tracker = github_tracker(&config)?;

    match cli.command {
        Command::Classify { issue } => {
            let pipeline = pipeline(&config, tracker)?;
            let report = pipeline.route(TaskId(issue)).await?;
            println!("complexity={}", report.classification.tier);
            if let Some(resolve) = &report.resolve {
                print_report(resolve);
            }
        }
        Command::Decompose { issue } => {
            let pipeline = pipeline(&config, tracker)?;
            match pipeline.decomposer.run(TaskId(issue)).await? {
                DecomposeOutcome::Created(batch) => {
                    println!("created={}", join_ids(&batch.children));
                    print_report(&pipeline.resolver.resolve_batch(batch.parent).await?);
                }
                DecomposeOutcome::AlreadyDecomposed => println!("created="),
                DecomposeOutcome::Fallback { reason } => {
                    clog!("decomposition fell back: {}", reason);
                    println!("created=");
                }
            }
        }
        Command::Resolve { closed } => {
            let resolver = resolver(&config, tracker)?;
            print_report(&resolver.on_task_closed(TaskId(closed)).await?);
        }
        Command::ResolveBatch { parent } => {
            let resolver = resolver(&config, tracker)?;
            print_report(&resolver.resolve_batch(TaskId(parent)).await?);
        }
        Command::Run { action } => {
            let coordinator =
                Coordinator::new(tracker, config.labels.clone(), config.coordinator.clone());
            run_action(&coordinator, action).await?;
        }
        Command::Publish { .. } | Command::RenderProgress { .. } => {}
    }
    Ok(())
}

fn github_tracker(config: &Config) -> Result<Arc<dyn IssueTracker>> {
    config.validate()?;
    Ok(Arc::new(GitHubTracker::new(
        &config.tracker,
        RetryingClient::new(RetryPolicy::from(&config.retry))?.with_bearer(config.tracker_token()?),
    )))
}

fn pipeline(config: &Config, tracker: Arc<dyn IssueTracker>) -> Result<Pipeline> {
    let model = OpenAiCompatibleModel::new(
        &config.model,
        RetryingClient::new(RetryPolicy::from(&config.retry))?.with_bearer(config.model_api_key()?),
    );
    Pipeline::new(tracker, Arc::new(model), config)
}

fn resolver(config: &Config, tracker: Arc<dyn IssueTracker>) -> Result<Resolver> {
    let parser = DependencyParser::new(&config.dependencies)?;
    Ok(Resolver::new(tracker, parser, config))
}

fn context(run: RunArgs) -> RunContext {
    let run_id = run.run_id.or_else(|| {
        std::env::var("GITHUB_RUN_ID")
            .ok()
            .and_then(|v| v.parse().ok())
    });
    RunContext::new(TaskId(run.issue), &run.workflow).with_run(run_id, run.run_url)
}

async fn run_action(coordinator: &Coordinator, action: RunAction) -> Result<()> {
    match action {
        RunAction::Start { run } => {
            let verdict = coordinator.start(&context(run)).await?;
            // Duplicates are an expected outcome; the workflow reads this flag.
            println!("proceed={}", verdict == GuardVerdict::Proceed);
        }
        RunAction::Progress {
            run,
            stage,
            status,
            percent,
            details,
        } => {
            let update = progress_update(&stage, &status, percent, details.as_deref())?;
            coordinator.report(&context(run), update).await?;
        }
        RunAction::Complete { run, pr } => {
            coordinator.complete(&context(run), pr).await?;
        }
        RunAction::Fail { run, output } => {
            let text = read_output(&output)?;
            let kind = coordinator.fail(&context(run), &text).await?;
            println!("failure={}", kind);
        }
    }
    Ok(())
}

async fn run_publish(
    config: &Config,
    branch: &str,
    base: &str,
    repo: &std::path::Path,
    remote: &str,
    issue: Option<u64>,
) -> Result<()> {
    let pusher = GitCliPusher::new(remote)?;
    let publisher = Publisher::from_config(&config.coordinator);
    let outcome = match publisher.publish(repo, branch, base, &pusher).await {
        Ok(outcome) => outcome,
        Err(e) => {
            write_step_output("success=false\nnew_commits=0\n")?;
            if let Some(issue) = issue {
                let reported = match github_tracker(config) {
                    Ok(tracker) => {
                        report_publish_failure(tracker.as_ref(), TaskId(issue), branch, &e).await
                    }
                    Err(setup) => Err(setup),
                };
                if let Err(report_err) = reported {
                    clog_error!("could not report publish failure on #{}: {}", issue, report_err);
                }
            }
            return Err(e);
        }
    };
    print!("{}", outcome.output_lines());
    write_step_output(&outcome.output_lines())
}

/// Append to the file named by `GITHUB_OUTPUT`, when set.
fn write_step_output(lines: &str) -> Result<()> {
    let Ok(path) = std::env::var("GITHUB_OUTPUT") else {
        return Ok(());
    };
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    file.write_all(lines.as_bytes())?;
    Ok(())
}

fn read_output(path: &std::path::Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut text = String::new();
        std::io::stdin().read_to_string(&mut text)?;
        return Ok(text);
    }
    Ok(std::fs::read_to_string(path)?)
}

fn progress_update(
    stage: &str,
    status: &str,
    percent: Option<u8>,
    details: Option<&str>,
) -> Result<ProgressUpdate> {
    let stage = Stage::parse(stage)
        .ok_or_else(|| Error::Validation(format!("unknown stage '{}'", stage)))?;
    let mut update = ProgressUpdate::new(stage, status);
    if let Some(p) = percent {
        update = update.percent(p);
    }
    if let Some(d) = details {
        update = update.details(d);
    }
    Ok(update)
}

fn join_ids(ids: &[TaskId]) -> String {
    ids.iter()
        .map(|id| id.0.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn print_report(report: &ResolveReport) {
    println!("triggered={}", join_ids(&report.triggered_tasks()));
    let blocked: Vec<TaskId> = report.blocked.iter().map(|(id, _)| *id).collect();
    println!("blocked={}", join_ids(&blocked));
    if let Some(parent) = report.parent_closed {
        println!("parent_closed={}", parent.0);
    }
    for (task, error) in &report.failed {
        eprintln!("failed to trigger {}: {}", task, error);
    }
}
