use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

pub mod config;
pub mod engine;
pub mod facets;
pub mod matcher;
pub mod report;
pub mod stacks;
pub mod targets;

use engine::{Engine, FailurePolicy, RunReport, DEFAULT_CONCURRENCY};
use facets::{FacetExtractor, OutputsExtractor, ParametersExtractor, ResourcesExtractor};
use report::{AllViews, FacetRow, Format};
use stacks::AwsConnector;
use targets::Target;

#[derive(Parser, Debug)]
#[command(
    name = "cfn-global-views",
    version,
    about = "List CloudFormation parameters, resources and outputs across accounts and regions"
)]
struct Cli {
    #[arg(short, long, global = true, help = "Log debug messages to stderr")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List cfn parameters
    Parameters(RunArgs),
    /// List cfn resources
    Resources(RunArgs),
    /// List cfn outputs
    Outputs(RunArgs),
    /// List cfn parameters, resources and outputs
    All(RunArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    #[arg(short, long, help = "Path to config yaml file")]
    config: PathBuf,

    #[arg(
        short,
        long,
        help = "Output file path, stdout when omitted (a directory for `all --format csv`, required for excel)"
    )]
    out: Option<PathBuf>,

    #[arg(short, long, value_enum, default_value_t = Format::Csv)]
    format: Format,

    #[arg(long, default_value_t = DEFAULT_CONCURRENCY, help = "Targets scanned at the same time")]
    concurrency: usize,

    #[arg(long, value_enum, default_value_t = FailurePolicy::AllTargets)]
    fail_on: FailurePolicy,
}

#[derive(thiserror::Error, Debug)]
enum Error {
    #[error(transparent)]
    Config(#[from] config::Error),

    #[error(transparent)]
    Report(#[from] report::Error),
}

fn init_tracing(verbose: bool) {
    let default_directives = if verbose {
        "cfn_global_views=debug,warn"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_targets(args: &RunArgs) -> Result<Vec<Target>, Error> {
    let config = config::parse(&args.config)?;
    let targets = targets::resolve(&config)?;
    return Ok(targets);
}

fn summarize<F>(report: &RunReport<F>, facet: &str, policy: FailurePolicy) -> bool {
    let succeeded = report.succeeded(policy);
    if succeeded {
        tracing::info!(
            facet,
            records = report.records.len(),
            failed_targets = report.failed_targets,
            failed_stacks = report.failed_stacks,
            "run finished"
        );
    } else {
        tracing::warn!(
            facet,
            targets = report.targets,
            failed_targets = report.failed_targets,
            failed_stacks = report.failed_stacks,
            policy = ?policy,
            "run failed"
        );
    }
    succeeded
}

async fn collect<E: FacetExtractor>(
    engine: &Engine,
    targets: Vec<Target>,
    extractor: E,
) -> RunReport<E::Facet> {
    engine
        .run(targets, Arc::new(AwsConnector), Arc::new(extractor))
        .await
}

async fn run_facet<E>(extractor: E, args: &RunArgs) -> Result<bool, Error>
where
    E: FacetExtractor,
    E::Facet: FacetRow + Serialize,
{
    let facet = extractor.kind().name();
    report::check_destination(args.format, args.out.as_deref())?;
    let targets = load_targets(args)?;
    let engine = Engine::new(args.concurrency);

    let report = collect(&engine, targets, extractor).await;
    report::write(&report.records, args.format, facet, args.out.as_deref())?;

    return Ok(summarize(&report, facet, args.fail_on));
}

async fn run_all(args: &RunArgs) -> Result<bool, Error> {
    report::check_destination(args.format, args.out.as_deref())?;
    let targets = load_targets(args)?;
    let engine = Engine::new(args.concurrency);

    let parameters = collect(&engine, targets.clone(), ParametersExtractor).await;
    let resources = collect(&engine, targets.clone(), ResourcesExtractor).await;
    let outputs = collect(&engine, targets, OutputsExtractor).await;

    let succeeded = [
        summarize(&parameters, "parameters", args.fail_on),
        summarize(&resources, "resources", args.fail_on),
        summarize(&outputs, "outputs", args.fail_on),
    ]
    .iter()
    .all(|succeeded| *succeeded);

    let views = AllViews {
        parameters: parameters.records,
        resources: resources.records,
        outputs: outputs.records,
    };
    report::write_all(&views, args.format, args.out.as_deref())?;

    return Ok(succeeded);
}

async fn run(command: Commands) -> Result<bool, Error> {
    match command {
        Commands::Parameters(args) => run_facet(ParametersExtractor, &args).await,
        Commands::Resources(args) => run_facet(ResourcesExtractor, &args).await,
        Commands::Outputs(args) => run_facet(OutputsExtractor, &args).await,
        Commands::All(args) => run_all(&args).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli.command).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(error) => {
            eprintln!("{}", error);
            ExitCode::FAILURE
        }
    }
}
