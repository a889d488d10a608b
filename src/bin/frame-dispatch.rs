use std::{
    io::Write as _,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};
use frame_dispatch::{
    DiagnosticClosure, FramePlanner, FrameRate, JobClosure, JobPriority, Offset, RealClock,
    Scheduler, SchedulerConfig, Segment, SegmentSpec, TicketId, Timings,
};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt as _, util::SubscriberInitExt as _};

#[derive(Parser, Debug)]
#[command(name = "frame-dispatch", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the job sequence of each frame as JSON lines.
    Plan(PlanArgs),
    /// Plan and execute frames against recording closures, then print scheduler statistics.
    Run(RunArgs),
}

#[derive(Parser, Debug)]
struct SegmentArgs {
    /// Segment description JSON.
    #[arg(long)]
    segment: PathBuf,

    /// Number of frames, starting at frame 0.
    #[arg(long)]
    frames: u32,

    /// Channel of the exit node to plan.
    #[arg(long, default_value_t = 0)]
    channel: u32,

    /// Frame grid as `num/den` or a plain integer.
    #[arg(long, default_value = "25")]
    fps: String,
}

#[derive(Parser, Debug)]
struct PlanArgs {
    #[command(flatten)]
    segment: SegmentArgs,
}

#[derive(Parser, Debug)]
struct RunArgs {
    #[command(flatten)]
    segment: SegmentArgs,

    /// Scheduler config JSON.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Dispatch class of every job.
    #[arg(long, value_enum, default_value_t = PriorityArg::Asap)]
    priority: PriorityArg,

    /// Lead time before the first deadline, in milliseconds.
    #[arg(long, default_value_t = 100)]
    lead_ms: i64,

    /// Print the dispatch trace as JSON lines before the statistics.
    #[arg(long, default_value_t = false)]
    trace: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PriorityArg {
    TimeBound,
    Asap,
    Background,
}

impl From<PriorityArg> for JobPriority {
    fn from(p: PriorityArg) -> Self {
        match p {
            PriorityArg::TimeBound => JobPriority::TimeBound,
            PriorityArg::Asap => JobPriority::Asap,
            PriorityArg::Background => JobPriority::Background,
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Plan(args) => cmd_plan(args),
        Command::Run(args) => cmd_run(args),
    }
}

fn load_segment(path: &Path) -> anyhow::Result<(Segment, TicketId)> {
    let spec = SegmentSpec::from_path(path)?;
    spec.build_with(|node, channel, ch| {
        DiagnosticClosure::new(format!("{node}.{channel}"), ch.kind)
            .with_work(Duration::from_micros(ch.work_us))
            .into_shared() as Arc<dyn JobClosure>
    })
    .with_context(|| format!("build segment from '{}'", path.display()))
}

fn cmd_plan(args: PlanArgs) -> anyhow::Result<()> {
    let args = args.segment;
    let (segment, root) = load_segment(&args.segment)?;
    let grid = FrameRate::parse(&args.fps)?;
    let planner = FramePlanner::new(&segment, root, args.channel, Timings::new(grid))?;

    let mut out = std::io::stdout().lock();
    for plan in planner.plans(0..i64::from(args.frames)) {
        serde_json::to_writer(&mut out, &plan).context("write frame plan")?;
        writeln!(out)?;
    }
    Ok(())
}

fn cmd_run(args: RunArgs) -> anyhow::Result<()> {
    let config = match &args.config {
        Some(path) => SchedulerConfig::from_path(path)?,
        None => SchedulerConfig::default(),
    };
    let seg_args = &args.segment;
    let (segment, root) = load_segment(&seg_args.segment)?;
    let grid = FrameRate::parse(&seg_args.fps)?;

    let scheduler = Scheduler::new(config, Arc::new(RealClock::new()))?;
    let timings = Timings::new(grid)
        .with_anchor(scheduler.now() + Offset::from_millis(args.lead_ms))
        .with_priority(args.priority.into());
    let planner = FramePlanner::new(&segment, root, seg_args.channel, timings)?;

    if args.trace {
        scheduler.activate_tracing();
    }
    let mains = planner.dispatch_range(&scheduler, 0..i64::from(seg_args.frames))?;
    scheduler.run_until_idle()?;
    eprintln!("dispatched {} frames", mains.len());

    let mut out = std::io::stdout().lock();
    if args.trace {
        for entry in scheduler.trace() {
            serde_json::to_writer(&mut out, &entry).context("write trace entry")?;
            writeln!(out)?;
        }
    }
    serde_json::to_writer(&mut out, &scheduler.stats()).context("write stats")?;
    writeln!(out)?;
    Ok(())
}
