use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use post_structural::atlas;
use post_structural::config::{ConfigLoader, RunRequest};
use post_structural::error::PipelineError;
use post_structural::layout::Library;
use post_structural::orchestrator::{
    Orchestrator, PlanResult, PlannedState, ProgressSink, RunReport, StepAction,
};
use post_structural::output::{AtlasList, JsonOutput, LogSink, OutputMode};
use post_structural::signal::{CancelToken, install_shutdown_handler};
use post_structural::status::StageStatus;
use post_structural::tools::SystemToolRunner;

const EXIT_INCOMPLETE: u8 = 4;

#[derive(Parser)]
#[command(name = "post-structural")]
#[command(about = "Post-structural stage: registration, parcellations, fsLR-32k surfaces and morphology maps")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true, help = "Print machine-readable JSON on stdout")]
    json: bool,

    #[arg(short, long, global = true, help = "Enable debug logging")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Run the stage for one subject/session")]
    Run(SubjectArgs),
    #[command(about = "Show which steps would run, without running anything")]
    Plan(SubjectArgs),
    #[command(about = "List parcellations available in the bundled library")]
    Atlases(AtlasesArgs),
}

#[derive(Args, Clone)]
struct SubjectArgs {
    #[arg(long, help = "BIDS dataset root")]
    bids: String,

    #[arg(long, help = "Derivatives root")]
    out: String,

    #[arg(long = "sub", help = "Participant id, with or without the sub- prefix")]
    participant: String,

    #[arg(long = "ses", help = "Session id, with or without the ses- prefix; SINGLE for none")]
    session: Option<String>,

    #[arg(long, default_value = "DEFAULT", help = "DEFAULT or a comma-separated list of atlases")]
    atlas: String,

    #[arg(long, help = "Prefer FastSurfer outputs when both reconstructions exist")]
    fastsurfer: bool,

    #[arg(long)]
    threads: Option<usize>,

    #[arg(long, help = "Root for the per-run scratch directory")]
    tmp: Option<String>,

    #[arg(long, help = "Keep the scratch directory after the run")]
    no_cleanup: bool,

    #[arg(long = "proc", help = "Processing mode recorded in the completion record")]
    proc_mode: Option<String>,

    #[arg(long, env = "POST_STRUCTURAL_LIBRARY")]
    library: Option<String>,

    #[arg(long)]
    config: Option<String>,

    #[arg(long, help = "Redo every step even when outputs exist")]
    force: bool,
}

#[derive(Args, Clone)]
struct AtlasesArgs {
    #[arg(long, env = "POST_STRUCTURAL_LIBRARY")]
    library: Option<String>,

    #[arg(long)]
    config: Option<String>,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => ExitCode::from(code),
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(error) = report.downcast_ref::<PipelineError>() {
                return ExitCode::from(map_exit_code(error));
            }
            ExitCode::from(1)
        }
    }
}

fn map_exit_code(error: &PipelineError) -> u8 {
    match error {
        PipelineError::Interrupted => 130,
        PipelineError::MissingTool(_) => 3,
        error if error.is_precondition() => 2,
        _ => 1,
    }
}

fn run() -> miette::Result<u8> {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };

    match cli.command {
        Commands::Run(args) => run_stage(args, output_mode),
        Commands::Plan(args) => run_plan(args, output_mode),
        Commands::Atlases(args) => run_atlases(args, output_mode),
    }
}

fn orchestrator(
    args: SubjectArgs,
    cancel: CancelToken,
) -> miette::Result<Orchestrator<SystemToolRunner>> {
    let file = ConfigLoader::load(args.config.as_deref())?;
    let request = RunRequest {
        bids: args.bids,
        out: args.out,
        participant: args.participant,
        session: args.session,
        atlas: args.atlas,
        prefer_fastsurfer: args.fastsurfer,
        threads: args.threads,
        tmp: args.tmp,
        no_cleanup: args.no_cleanup,
        proc_mode: args.proc_mode,
        library: args.library,
        force: args.force,
    };
    let config = ConfigLoader::resolve(request, file)?;
    let runner = SystemToolRunner::new(&config.tools);
    Ok(Orchestrator::new(config, runner, cancel))
}

fn sink(output_mode: OutputMode) -> Box<dyn ProgressSink> {
    match output_mode {
        OutputMode::Json => Box::new(JsonOutput),
        OutputMode::Human => Box::new(LogSink),
    }
}

fn run_stage(args: SubjectArgs, output_mode: OutputMode) -> miette::Result<u8> {
    let cancel = CancelToken::new();
    if let Err(err) = install_shutdown_handler(cancel.clone()) {
        warn!("failed to install signal handler: {err}");
    }
    let orchestrator = orchestrator(args, cancel)?;
    let report = orchestrator.run(sink(output_mode).as_ref())?;
    match output_mode {
        OutputMode::Json => JsonOutput::print_run(&report).into_diagnostic()?,
        OutputMode::Human => print_run_summary(&report),
    }
    Ok(match report.status {
        StageStatus::Completed => 0,
        StageStatus::Incomplete => EXIT_INCOMPLETE,
    })
}

fn run_plan(args: SubjectArgs, output_mode: OutputMode) -> miette::Result<u8> {
    let orchestrator = orchestrator(args, CancelToken::new())?;
    let plan = orchestrator.plan(sink(output_mode).as_ref())?;
    match output_mode {
        OutputMode::Json => JsonOutput::print_plan(&plan).into_diagnostic()?,
        OutputMode::Human => print_plan(&plan),
    }
    Ok(0)
}

fn run_atlases(args: AtlasesArgs, output_mode: OutputMode) -> miette::Result<u8> {
    let file = ConfigLoader::load(args.config.as_deref())?;
    let library = Library::new(&ConfigLoader::resolve_library(args.library, &file)?);
    let atlases = atlas::available_atlases(&library)?;
    let list = AtlasList {
        library: library.root().to_string(),
        atlases,
    };
    match output_mode {
        OutputMode::Json => JsonOutput::print_atlases(&list).into_diagnostic()?,
        OutputMode::Human => {
            for atlas in &list.atlases {
                println!("{atlas}");
            }
        }
    }
    Ok(0)
}

fn print_run_summary(report: &RunReport) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let red = "\x1b[31m";
    let reset = "\x1b[0m";

    println!(
        "{cyan}post-structural {} ({}){reset}",
        report.subject, report.surface_recon
    );
    let status_color = match report.status {
        StageStatus::Completed => green,
        StageStatus::Incomplete => yellow,
    };
    println!(
        "{status_color}{}: {}/{} steps{reset}",
        report.status, report.completed_steps, report.total_steps
    );

    for step in &report.steps {
        let (label, color) = match step.action {
            StepAction::Skipped => ("skipped", green),
            StepAction::Ran if step.counts() => ("done", cyan),
            StepAction::Ran => ("failed", red),
            StepAction::Blocked => ("blocked", red),
        };
        println!("{color}  {:<28} {label}{reset}", step.id);
        if let Some(detail) = &step.detail {
            println!("{color}      {detail}{reset}");
        }
    }
    println!("  record: {}", report.completion_record);
    println!("  elapsed: {:.1} min", report.elapsed_seconds / 60.0);
}

fn print_plan(plan: &PlanResult) {
    println!("{} ({})", plan.subject, plan.surface_recon);
    for step in &plan.steps {
        let state = match step.state {
            PlannedState::Satisfied => "satisfied",
            PlannedState::Pending => "pending",
            PlannedState::Redo => "redo",
            PlannedState::Blocked => "blocked",
        };
        println!("  {:<28} {state} ({})", step.id, step.manifest_status);
        for missing in &step.missing_inputs {
            println!("      missing: {missing}");
        }
        for output in &step.outputs {
            println!("      -> {output}");
        }
    }
}
