//! talent CLI: operator interface to the candidate pipeline.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use chrono::Utc;
use clap::{Parser, Subcommand};
use talent_pipeline::config::Config;
use talent_pipeline::config::secrets::ExposeSecret;
use talent_pipeline::db::Db;
use talent_pipeline::engine::ControlPlane;
use talent_pipeline::model::*;
use talent_pipeline::pipeline::{Pipeline, StageGraph};
use talent_pipeline::telemetry::{TelemetryConfig, init_telemetry};
use talent_pipeline::workflow::{HttpEffects, WorkflowEngine, loader};
use tokio::sync::broadcast::Receiver;

#[derive(Parser)]
#[command(name = "talent", about = "Candidate pipeline and workflow automation")]
struct Cli {
    /// User id recorded as the actor of every change
    #[arg(long, global = true, default_value = "cli")]
    actor: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control plane daemon
    Serve {
        /// Directory of workflow TOML files to install before starting
        #[arg(long)]
        workflows: Option<PathBuf>,
    },
    /// Candidate operations
    Candidate {
        #[command(subcommand)]
        action: CandidateAction,
    },
    /// Hiring process operations
    Process {
        #[command(subcommand)]
        action: ProcessAction,
    },
    /// Workflow rule operations
    Workflow {
        #[command(subcommand)]
        action: WorkflowAction,
    },
}

#[derive(Subcommand)]
enum CandidateAction {
    /// Create a candidate in NEW
    Create {
        first_name: String,
        last_name: String,
        email: String,
        #[arg(long)]
        phone: Option<String>,
        /// manual | import | public_application | referral | sourcing
        #[arg(long, default_value = "manual")]
        source: String,
        /// junior | mid | senior | lead | executive
        #[arg(long)]
        level: Option<String>,
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// Show a candidate with memberships and activity feed
    Show { id: CandidateId },
    /// Move a candidate to another status
    Transition { id: CandidateId, to: String },
    /// Add (or with --remove, remove) a tag
    Tag {
        id: CandidateId,
        tag: String,
        #[arg(long)]
        remove: bool,
    },
}

#[derive(Subcommand)]
enum ProcessAction {
    /// Create a draft process
    Create {
        name: String,
        /// Stage as `id:name[:sla_hours]`, in pipeline order
        #[arg(long = "stage", required = true)]
        stages: Vec<String>,
        /// Allowed stage move as `from:to`. Without any, every move is allowed.
        #[arg(long = "allow")]
        allow: Vec<String>,
        #[arg(long)]
        description: Option<String>,
    },
    /// Open a draft process for candidates
    Activate { id: ProcessId },
    /// Add a candidate to a process at a stage
    Add {
        process: ProcessId,
        candidate: CandidateId,
        stage: String,
    },
    /// Move a member to another stage
    Move {
        process: ProcessId,
        candidate: CandidateId,
        stage: String,
    },
    /// Per-stage candidate counts and allowed next stages
    Metrics { id: ProcessId },
    /// SLA status of every member
    Sla { id: ProcessId },
}

#[derive(Subcommand)]
enum WorkflowAction {
    /// Install every workflow TOML file in a directory
    Load { dir: PathBuf },
    /// List installed workflows
    List,
    /// Executions of one workflow
    Executions { id: WorkflowId },
    /// Cancel a pending execution
    Revoke { id: ExecutionId },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let db = Db::connect(config.database_url.expose_secret()).await?;
    db.migrate().await?;
    let pipeline = Pipeline::new(Arc::new(db));
    let effects = HttpEffects::new(config.engine.webhook_timeout)?;
    let engine = WorkflowEngine::new(pipeline.clone(), Arc::new(effects), config.engine.clone());
    let actor = Actor::user(cli.actor);

    match cli.command {
        Command::Serve { workflows } => cmd_serve(&config, engine, workflows).await,
        Command::Candidate { action } => {
            let events = pipeline.activity_log().subscribe();
            cmd_candidate(&pipeline, action, actor).await?;
            settle(&engine, events).await
        }
        Command::Process { action } => {
            let events = pipeline.activity_log().subscribe();
            cmd_process(&pipeline, action, actor).await?;
            settle(&engine, events).await
        }
        Command::Workflow { action } => cmd_workflow(&engine, action, actor).await,
    }
}

/// Evaluate workflows for everything this invocation appended, cascades
/// included, so one-shot commands behave like the daemon would.
async fn settle(engine: &WorkflowEngine, mut events: Receiver<Activity>) -> anyhow::Result<()> {
    while let Ok(activity) = events.try_recv() {
        for execution in engine.evaluate_event(&activity).await? {
            println!(
                "workflow {} fired: execution {} ({})",
                execution.workflow_id, execution.id, execution.state
            );
        }
    }
    Ok(())
}

async fn cmd_serve(
    config: &Config,
    engine: WorkflowEngine,
    workflows: Option<PathBuf>,
) -> anyhow::Result<()> {
    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "talent-pipeline".to_string(),
        log_level: config.log_level.clone(),
    })?;

    if let Some(dir) = workflows {
        let definitions = loader::load_from_dir(&dir)?;
        loader::install(&engine, definitions).await?;
    }

    let control = ControlPlane::new(engine);
    let ctrl = control.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        ctrl.shutdown();
    });

    control.run().await?;
    Ok(())
}

async fn cmd_candidate(
    pipeline: &Pipeline,
    action: CandidateAction,
    actor: Actor,
) -> anyhow::Result<()> {
    match action {
        CandidateAction::Create {
            first_name,
            last_name,
            email,
            phone,
            source,
            level,
            tags,
        } => {
            let mut new = NewCandidate::new(first_name, last_name, email).source(source.parse()?);
            if let Some(phone) = phone {
                new = new.phone(phone);
            }
            if let Some(level) = level {
                new = new.experience_level(level.parse()?);
            }
            for tag in tags {
                new = new.tag(tag);
            }
            let candidate = pipeline.create_candidate(new, actor).await?;
            println!("Created: {} ({})", candidate.id, candidate.full_name());
        }
        CandidateAction::Show { id } => {
            let candidate = pipeline.get_candidate(id).await?;
            println!("ID:         {}", candidate.id);
            println!("Name:       {}", candidate.full_name());
            println!("Email:      {}", candidate.email);
            println!("Phone:      {}", candidate.phone.as_deref().unwrap_or("-"));
            println!("Source:     {}", candidate.source.as_str());
            println!("Status:     {}", candidate.status);
            println!("Tags:       {}", candidate.tags.join(", "));
            println!(
                "Assignee:   {}",
                candidate
                    .assignee
                    .as_ref()
                    .map_or_else(|| "-".to_string(), ToString::to_string)
            );
            for (criterion, score) in &candidate.scores {
                println!("Score:      {criterion} = {score}");
            }
            for membership in pipeline.memberships(id).await? {
                println!(
                    "Process:    {} @ {} since {}",
                    membership.process_id,
                    membership.stage_id,
                    membership.entered_stage_at.format("%Y-%m-%d %H:%M")
                );
            }
            println!("---");
            for activity in pipeline.activities(id).await? {
                println!(
                    "{}  {:<20}  {:<12}  {}",
                    activity.timestamp.format("%Y-%m-%d %H:%M"),
                    activity.kind.name(),
                    activity.actor,
                    serde_json::to_string(&activity.kind)?
                );
            }
        }
        CandidateAction::Transition { id, to } => {
            let to: CandidateStatus = to.parse()?;
            let result = pipeline.request_transition(id, to, actor).await?;
            if result.is_applied() {
                println!("{id} -> {to}");
            } else {
                println!("{id} already {to}");
            }
        }
        CandidateAction::Tag { id, tag, remove } => {
            let changed = if remove {
                pipeline.remove_tag(id, &tag, actor).await?
            } else {
                pipeline.add_tag(id, &tag, actor).await?
            };
            if changed.is_none() {
                println!("No change.");
            }
        }
    }
    Ok(())
}

async fn cmd_process(
    pipeline: &Pipeline,
    action: ProcessAction,
    actor: Actor,
) -> anyhow::Result<()> {
    match action {
        ProcessAction::Create {
            name,
            stages,
            allow,
            description,
        } => {
            let mut new = NewProcess::new(name);
            if let Some(description) = description {
                new = new.description(description);
            }
            for (order, raw) in stages.iter().enumerate() {
                new = new.stage(parse_stage(raw, order)?);
            }
            for edge in &allow {
                let (from, to) = edge
                    .split_once(':')
                    .with_context(|| format!("--allow expects from:to, got {edge}"))?;
                new = new.allow(from, to);
            }
            let process = pipeline.create_process(new).await?;
            println!("Created: {} ({}, {})", process.id, process.name, process.state);
        }
        ProcessAction::Activate { id } => {
            let process = pipeline.activate_process(id).await?;
            println!("{} is {}", process.id, process.state);
        }
        ProcessAction::Add {
            process,
            candidate,
            stage,
        } => {
            let m = pipeline
                .add_candidate_to_process(process, candidate, StageId::new(stage), actor)
                .await?;
            println!("{} added to {} at {}", m.candidate_id, m.process_id, m.stage_id);
        }
        ProcessAction::Move {
            process,
            candidate,
            stage,
        } => {
            let m = pipeline
                .move_stage(process, candidate, StageId::new(stage), actor)
                .await?;
            println!("{} now at {}", m.candidate_id, m.stage_id);
        }
        ProcessAction::Metrics { id } => {
            let process = pipeline.get_process(id).await?;
            let metrics = pipeline.metrics(id).await?;
            let graph = StageGraph::new(&process);
            println!("{:<20}  {:<24}  {:<6}  NEXT", "STAGE", "NAME", "COUNT");
            println!("{}", "-".repeat(80));
            for stage in graph.stages() {
                let next = if graph.is_open() {
                    "any".to_string()
                } else {
                    graph
                        .targets(&stage.id)
                        .iter()
                        .map(|target| target.id.to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                };
                println!(
                    "{:<20}  {:<24}  {:<6}  {}",
                    stage.id,
                    stage.name,
                    metrics.count(&stage.id),
                    next
                );
            }
            println!("\n{} candidate(s)", metrics.total);
        }
        ProcessAction::Sla { id } => {
            let report = pipeline.sla_report(id, Utc::now()).await?;
            if report.is_empty() {
                println!("No members.");
                return Ok(());
            }
            println!("{:<36}  {:<20}  {:<10}  SINCE", "CANDIDATE", "STAGE", "STATUS");
            println!("{}", "-".repeat(90));
            for entry in &report {
                println!(
                    "{:<36}  {:<20}  {:<10}  {}",
                    entry.candidate_id,
                    entry.stage_id,
                    entry.status,
                    entry.entered_stage_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
    }
    Ok(())
}

async fn cmd_workflow(
    engine: &WorkflowEngine,
    action: WorkflowAction,
    actor: Actor,
) -> anyhow::Result<()> {
    match action {
        WorkflowAction::Load { dir } => {
            let definitions = loader::load_from_dir(&dir)?;
            let ids = loader::install(engine, definitions).await?;
            println!("Installed {} workflow(s).", ids.len());
        }
        WorkflowAction::List => {
            let workflows = engine.list_workflows().await?;
            if workflows.is_empty() {
                println!("No workflows installed.");
                return Ok(());
            }
            println!(
                "{:<36}  {:<24}  {:<20}  {:<6}  VERSION",
                "ID", "NAME", "TRIGGER", "ACTIVE"
            );
            println!("{}", "-".repeat(100));
            for w in &workflows {
                println!(
                    "{:<36}  {:<24}  {:<20}  {:<6}  {}",
                    w.id,
                    w.name,
                    w.trigger.name(),
                    w.active,
                    w.version
                );
            }
        }
        WorkflowAction::Executions { id } => {
            let executions = engine.executions_for_workflow(id).await?;
            if executions.is_empty() {
                println!("No executions.");
                return Ok(());
            }
            println!(
                "{:<36}  {:<36}  {:<10}  {:<6}  {:<16}  RESUMES",
                "ID", "CANDIDATE", "STATE", "STEPS", "CREATED"
            );
            println!("{}", "-".repeat(130));
            for e in &executions {
                let resumes = match e.resume_at {
                    _ if e.state.is_terminal() => "-".to_string(),
                    Some(at) => at.format("%Y-%m-%d %H:%M").to_string(),
                    None => "now".to_string(),
                };
                println!(
                    "{:<36}  {:<36}  {:<10}  {:<6}  {:<16}  {}",
                    e.id,
                    e.candidate_id,
                    e.state,
                    format!("{}/{}", e.next_step, e.steps.len()),
                    e.created_at.format("%Y-%m-%d %H:%M"),
                    resumes
                );
            }
        }
        WorkflowAction::Revoke { id } => {
            let execution = engine.revoke(id, actor).await?;
            println!("{} is {}", execution.id, execution.state);
        }
    }
    Ok(())
}

/// `id:name[:sla_hours]`
fn parse_stage(raw: &str, order: usize) -> anyhow::Result<Stage> {
    let mut parts = raw.splitn(3, ':');
    let id = parts.next().filter(|s| !s.is_empty());
    let name = parts.next().filter(|s| !s.is_empty());
    let (Some(id), Some(name)) = (id, name) else {
        anyhow::bail!("--stage expects id:name[:sla_hours], got {raw}");
    };
    let mut stage = Stage::new(id, name, u32::try_from(order)?);
    if let Some(hours) = parts.next() {
        stage = stage.sla_hours(
            hours
                .parse()
                .with_context(|| format!("bad sla hours in {raw}"))?,
        );
    }
    Ok(stage)
}
