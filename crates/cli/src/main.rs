use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use keel_core::{RefParseError, ResourceRef};
use keel_health::StrategyRegistry;
use keel_kubehub::KubeControlPlane;
use keel_wait::{
    config::{DEFAULT_INTERVAL, DEFAULT_TIMEOUT},
    parse_duration, parse_ignore_list, parse_profile, render_report, render_run, ConfigError, ConsoleReporter, NullSink,
    Plan, PlanError, PollConfig, Poller, ProgressSink, RetryPolicy, Sequencer, Stage,
};
use tracing::{error, info, warn};

const DEFAULT_PLAN: &str = include_str!("../plans/bootstrap.yaml");

#[derive(Parser, Debug)]
#[command(name = "keelctl", version, about = "Wait for platform resources to converge and run staged bootstraps")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Namespace for refs given as kind/name
    #[arg(long = "ns", global = true)]
    namespace: Option<String>,

    /// Path to a kubeconfig (default: inferred from the environment)
    #[arg(long, global = true, env = "KEEL_KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Args, Debug, Clone)]
struct PollArgs {
    /// Total wait budget, e.g. 90, 90s, 5m, 1h [default: 5m]; for bootstrap it
    /// replaces every stage's own timeout
    #[arg(long, env = "KEEL_TIMEOUT")]
    timeout: Option<String>,
    /// Time between polls [default: 5s]
    #[arg(long, env = "KEEL_INTERVAL")]
    interval: Option<String>,
    /// Comma-separated names (or namespace/name) that may not block success
    #[arg(long, env = "KEEL_IGNORE")]
    ignore: Option<String>,
    /// production, preview or dev; non-production profiles apply the plan's lenient list
    #[arg(long, env = "KEEL_PROFILE", default_value = "production")]
    profile: String,
    /// Fetch attempts per resource per poll
    #[arg(long, default_value_t = 3)]
    retries: u32,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Wait until every required resource is healthy or the timeout elapses
    Wait {
        /// Resources as kind/namespace/name or kind/name (`_` namespace for cluster-scoped); a trailing `?` marks one optional
        #[arg(required = true)]
        refs: Vec<String>,
        #[command(flatten)]
        poll: PollArgs,
    },
    /// Classify and diagnose resources once, without waiting
    Status {
        #[arg(required = true)]
        refs: Vec<String>,
        #[command(flatten)]
        poll: PollArgs,
    },
    /// Run the staged bootstrap plan
    Bootstrap {
        /// Plan file (default: built-in platform plan)
        #[arg(long, env = "KEEL_PLAN")]
        plan: Option<PathBuf>,
        /// Resume at this stage; earlier stages are skipped
        #[arg(long = "start-at")]
        start_at: Option<String>,
        #[command(flatten)]
        poll: PollArgs,
    },
    /// Print the resolved stage plan
    Plan {
        #[arg(long, env = "KEEL_PLAN")]
        plan: Option<PathBuf>,
    },
}

fn init_tracing() {
    let env = std::env::var("KEEL_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("KEEL_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid KEEL_METRICS_ADDR; expected host:port");
        }
    }
}

fn load_plan(path: Option<&PathBuf>) -> Result<Plan> {
    match path {
        Some(p) => Ok(Plan::load(p)?),
        None => Ok(Plan::from_yaml(DEFAULT_PLAN).context("built-in plan")?),
    }
}

/// Plan stages, with an explicit `--timeout` replacing every per-stage value.
fn resolve_stages(plan: &Plan, timeout: Option<&str>) -> Result<Vec<Stage>> {
    let explicit = timeout.map(parse_duration).transpose()?;
    let mut stages = plan.stages(explicit.unwrap_or(DEFAULT_TIMEOUT))?;
    if let Some(t) = explicit {
        info!(timeout_s = t.as_secs(), "timeout flag overrides per-stage timeouts");
        for s in &mut stages {
            s.timeout = t;
        }
    }
    Ok(stages)
}

fn parse_refs(refs: &[String], namespace: Option<&str>) -> Result<Vec<ResourceRef>, RefParseError> {
    refs.iter().map(|r| ResourceRef::parse(r, namespace)).collect()
}

/// Flags and env first, then plan defaults, then built-ins.
fn poll_config(args: &PollArgs, plan: Option<&Plan>) -> Result<PollConfig> {
    let timeout = args.timeout.as_deref().map(parse_duration).transpose()?.unwrap_or(DEFAULT_TIMEOUT);
    let interval = match args.interval.as_deref() {
        Some(s) => parse_duration(s)?,
        None => plan.map(Plan::interval).transpose()?.flatten().unwrap_or(DEFAULT_INTERVAL),
    };
    let ignore = args.ignore.as_deref().map(parse_ignore_list).transpose()?.unwrap_or_default();
    let lenient = plan.map(Plan::lenient_rules).transpose()?.unwrap_or_default();
    let config = PollConfig::new(timeout, interval)
        .with_ignore(ignore)
        .with_lenient(lenient)
        .with_profile(parse_profile(&args.profile)?)
        .with_retry(RetryPolicy { max_attempts: args.retries, ..RetryPolicy::default() });
    config.validate()?;
    Ok(config)
}

fn sink_for(output: Output) -> Box<dyn ProgressSink> {
    match output {
        Output::Human => Box::new(ConsoleReporter::stdout()),
        Output::Json => Box::new(NullSink),
    }
}

fn print_plan(stages: &[Stage], output: Output) -> Result<()> {
    match output {
        Output::Json => println!("{}", serde_json::to_string_pretty(stages)?),
        Output::Human => {
            for (i, s) in stages.iter().enumerate() {
                println!("{}. {} (timeout {}s, on failure {})", i + 1, s.name, s.timeout.as_secs(), s.on_failure);
                for r in &s.required {
                    println!("     {}", r);
                }
                for r in &s.optional {
                    println!("     {} (optional)", r);
                }
            }
        }
    }
    Ok(())
}

async fn connect(kubeconfig: Option<&PathBuf>) -> Result<KubeControlPlane> {
    KubeControlPlane::connect(kubeconfig.map(PathBuf::as_path)).await.context("connecting to the cluster")
}

/// `Ok(true)` when the command succeeded, `Ok(false)` on a readiness failure.
async fn run(cli: Cli) -> Result<bool> {
    let registry = StrategyRegistry::with_defaults();
    let ns = cli.namespace.as_deref();
    match &cli.command {
        Commands::Wait { refs, poll } => {
            let refs = parse_refs(refs, ns)?;
            let config = poll_config(poll, None)?;
            let plane = connect(cli.kubeconfig.as_ref()).await?;
            let mut sink = sink_for(cli.output);
            let outcome = Poller::new(&plane, &registry).wait_for(&refs, &config, sink.as_mut()).await;
            if cli.output == Output::Json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            }
            Ok(outcome.is_success())
        }
        Commands::Status { refs, poll } => {
            let refs = parse_refs(refs, ns)?;
            let config = poll_config(poll, None)?;
            let plane = connect(cli.kubeconfig.as_ref()).await?;
            let outcome = Poller::new(&plane, &registry).status(&refs, &config).await;
            match cli.output {
                Output::Json => println!("{}", serde_json::to_string_pretty(&outcome)?),
                Output::Human => print!("{}", render_report(&outcome)),
            }
            Ok(outcome.is_success())
        }
        Commands::Bootstrap { plan, start_at, poll } => {
            let plan = load_plan(plan.as_ref())?;
            let config = poll_config(poll, Some(&plan))?;
            let stages = resolve_stages(&plan, poll.timeout.as_deref())?;
            if let Some(name) = start_at.as_deref() {
                keel_wait::plan::stage_index(&stages, name)?;
            }
            let plane = connect(cli.kubeconfig.as_ref()).await?;
            let mut sink = sink_for(cli.output);
            let seq = Sequencer::new(Poller::new(&plane, &registry), config);
            let report = seq.run(&stages, start_at.as_deref(), sink.as_mut()).await?;
            match cli.output {
                Output::Json => println!("{}", serde_json::to_string_pretty(&report)?),
                Output::Human => print!("\n{}", render_run(&report)),
            }
            if let Some(failed) = report.failed_stage() {
                error!(stage = %failed.name, "bootstrap failed");
            }
            Ok(report.is_success())
        }
        Commands::Plan { plan } => {
            let plan = load_plan(plan.as_ref())?;
            print_plan(&plan.stages(DEFAULT_TIMEOUT)?, cli.output)?;
            Ok(true)
        }
    }
}

/// 2 for bad input detected before polling, 1 for everything else.
fn exit_code_for(e: &anyhow::Error) -> u8 {
    let config_error = e.chain().any(|c| c.is::<ConfigError>() || c.is::<PlanError>() || c.is::<RefParseError>());
    if config_error { 2 } else { 1 }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    tokio::select! {
        res = run(cli) => match res {
            Ok(true) => ExitCode::SUCCESS,
            Ok(false) => ExitCode::from(1),
            Err(e) => {
                error!(error = ?e, "keelctl failed");
                eprintln!("error: {:#}", e);
                ExitCode::from(exit_code_for(&e))
            }
        },
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted");
            ExitCode::from(130)
        }
    }
}
