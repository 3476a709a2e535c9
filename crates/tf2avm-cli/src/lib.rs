//! tf2avm command line
//!
//! `tf2avm convert` runs the pipeline over a repository; `tf2avm stages`
//! lists what a previous run persisted.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

use anyhow::{bail, Context};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tf2avm_artifact::RunArtifacts;
use tf2avm_core::{keys, read_sources, Capabilities, Pipeline, PipelineConfig, RunOutcome, RunStatus};
use tf2avm_gateway::{
    CachedKnowledgeSource, CommandProposer, FileKnowledgeSource, HclScanner, KnowledgeSource,
    ProposalEngine, RuleBasedProposer, TerraformChecker,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Options of `tf2avm convert`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertArgs {
    pub repo_path: PathBuf,
    pub output_dir: PathBuf,
    pub config: Option<PathBuf>,
    pub json_logs: bool,
    pub no_cache: bool,
}

pub fn build_cli() -> Command {
    Command::new("tf2avm")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Convert azurerm resources into Azure Verified Module calls")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("convert")
                .about("Run the conversion pipeline over a Terraform repository")
                .arg(
                    Arg::new("repo-path")
                        .long("repo-path")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Directory holding the Terraform sources"),
                )
                .arg(
                    Arg::new("output-dir")
                        .long("output-dir")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Root directory for run artifacts"),
                )
                .arg(
                    Arg::new("config")
                        .long("config")
                        .value_parser(value_parser!(PathBuf))
                        .help("TOML pipeline configuration"),
                )
                .arg(
                    Arg::new("json-logs")
                        .long("json-logs")
                        .action(ArgAction::SetTrue)
                        .help("Emit logs as JSON lines"),
                )
                .arg(
                    Arg::new("no-cache")
                        .long("no-cache")
                        .action(ArgAction::SetTrue)
                        .help("Bypass the knowledge cache"),
                ),
        )
        .subcommand(
            Command::new("stages")
                .about("List the stage artifacts of a run")
                .arg(
                    Arg::new("run-dir")
                        .long("run-dir")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Run directory (<output-dir>/<run id>)"),
                ),
        )
}

impl ConvertArgs {
    pub fn from_matches(args: &ArgMatches) -> anyhow::Result<Self> {
        let path = |name: &str| {
            args.get_one::<PathBuf>(name)
                .cloned()
                .with_context(|| format!("--{name} is required"))
        };
        Ok(Self {
            repo_path: path("repo-path")?,
            output_dir: path("output-dir")?,
            config: args.get_one::<PathBuf>("config").cloned(),
            json_logs: args.get_flag("json-logs"),
            no_cache: args.get_flag("no-cache"),
        })
    }
}

/// Config file (or defaults) with command line overrides applied
pub fn load_config(args: &ConvertArgs) -> anyhow::Result<PipelineConfig> {
    let config = match &args.config {
        Some(path) => PipelineConfig::from_toml_file(path)?,
        None => PipelineConfig::new(),
    };
    let use_cache = config.knowledge.use_cache && !args.no_cache;
    Ok(config
        .with_artifact_root(&args.output_dir)
        .with_knowledge_cache(use_cache))
}

/// Production collaborators described by `config`
pub fn build_capabilities(config: &PipelineConfig) -> anyhow::Result<Capabilities> {
    let files: Arc<dyn KnowledgeSource> = Arc::new(FileKnowledgeSource::new(
        &config.knowledge.index_path,
        &config.knowledge.details_dir,
    ));
    let knowledge: Arc<dyn KnowledgeSource> = if config.knowledge.use_cache {
        Arc::new(CachedKnowledgeSource::new(
            files,
            config.knowledge.cache_capacity,
            Duration::from_secs(config.knowledge.cache_ttl_secs),
        ))
    } else {
        files
    };

    let proposer: Arc<dyn ProposalEngine> = match config.proposer_command.split_first() {
        None => Arc::new(RuleBasedProposer::new(&config.source_provider)),
        Some((program, args)) if program.trim().is_empty() => {
            bail!("proposer_command must start with a program, got {args:?}")
        }
        Some((program, args)) => Arc::new(
            CommandProposer::new(program)
                .with_args(args.to_vec())
                .with_timeout(Duration::from_secs(config.call_timeout_secs)),
        ),
    };

    let checker = TerraformChecker::new(&config.checker.terraform_bin)
        .with_init_timeout(Duration::from_secs(config.checker.init_timeout_secs))
        .with_validate_timeout(Duration::from_secs(config.checker.validate_timeout_secs))
        .with_skip_init(config.checker.skip_init);

    Ok(Capabilities {
        scanner: Arc::new(HclScanner::new()),
        knowledge,
        proposer,
        checker: Arc::new(checker),
    })
}

/// Install the global subscriber; `RUST_LOG` wins over `default_filter`
pub fn init_tracing(default_filter: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

/// Process exit code for a finished run
#[must_use]
pub fn exit_code(status: RunStatus) -> i32 {
    match status {
        RunStatus::Succeeded => 0,
        RunStatus::PartiallySucceeded => 2,
        RunStatus::Failed | RunStatus::Running => 1,
    }
}

/// Run the pipeline; Ctrl-C cancels the run cooperatively
pub async fn convert(args: &ConvertArgs, config: PipelineConfig) -> anyhow::Result<RunOutcome> {
    if !args.repo_path.is_dir() {
        bail!("repository path {} is not a directory", args.repo_path.display());
    }
    let files = read_sources(&args.repo_path).await?;
    if files.is_empty() {
        tracing::warn!(repo = %args.repo_path.display(), "no .tf files found");
    }

    let caps = build_capabilities(&config)?;
    let pipeline = Pipeline::new(config, caps)?;
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted; stopping after the current step");
            on_interrupt.cancel();
        }
    });
    let outcome = pipeline.run_with_cancel(files, cancel).await;
    interrupt.abort();
    Ok(outcome?)
}

/// Persisted stage entries of a run directory
pub async fn list_stages(run_dir: &Path) -> anyhow::Result<Vec<String>> {
    let run = RunArtifacts::from_dir(run_dir)?;
    Ok(run.list().await?)
}

/// Parse `argv`, dispatch, and return the process exit code
pub async fn run<I, T>(argv: I) -> anyhow::Result<i32>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let matches = build_cli().try_get_matches_from(argv)?;
    match matches.subcommand() {
        Some(("convert", sub)) => {
            let args = ConvertArgs::from_matches(sub)?;
            let config = load_config(&args)?;
            init_tracing(&config.log_filter, args.json_logs);

            let outcome = convert(&args, config).await?;
            println!("run:    {}", outcome.run_id);
            println!("status: {}", outcome.status);
            println!("report: {}", outcome.run_dir.join(keys::report()?.to_string()).display());
            if let Some(dir) = &outcome.migrated_dir {
                println!("output: {}", dir.display());
            }
            Ok(exit_code(outcome.status))
        }
        Some(("stages", sub)) => {
            let run_dir = sub
                .get_one::<PathBuf>("run-dir")
                .context("--run-dir is required")?;
            for stage in list_stages(run_dir).await? {
                println!("{stage}");
            }
            Ok(0)
        }
        Some((other, _)) => bail!("unknown command {other}"),
        None => bail!("no command given"),
    }
}
