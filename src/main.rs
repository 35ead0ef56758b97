//! LVM Conformance
//!
//! Runs the end-to-end scenario catalogue against a cluster with an
//! LVM-backed CSI driver, or against the in-memory backend for a dry run.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use lvm_conformance::{
    ClusterCli, FakeCluster, Harness, HarnessConfig, HostShell, Kubectl, ProcessShell, Scenario,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// LVM Conformance - end-to-end checks for LVM-backed CSI volume provisioning
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Harness configuration file (YAML); defaults describe the kind e2e cluster
    #[arg(long, env = "LVM_CONFORMANCE_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Pin every scenario to this node, whose lvmd runs as a DaemonSet
    #[arg(long, env = "TOPOLVM_DAEMONSET_NODE", global = true)]
    daemonset_node: Option<String>,

    /// kubeconfig passed to kubectl
    #[arg(long, env = "KUBECONFIG", global = true)]
    kubeconfig: Option<PathBuf>,

    /// kubectl context
    #[arg(long, env = "KUBE_CONTEXT", global = true)]
    context: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON", global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run scenarios
    Run {
        /// Scenario to run (repeatable); all scenarios when omitted
        #[arg(long = "scenario", short = 's')]
        scenarios: Vec<String>,

        /// Scenarios running at once
        #[arg(long, env = "CONCURRENCY", default_value = "4")]
        concurrency: usize,

        /// Run against the in-memory backend instead of a cluster
        #[arg(long)]
        fake: bool,

        /// Write the run report as JSON
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// List the scenario catalogue
    List,

    /// Validate and print the effective configuration
    CheckConfig,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    init_logging(&args);

    let config = load_config(&args)?;

    match args.command {
        Command::List => {
            for scenario in Scenario::ALL {
                println!("{:<34} {}", scenario.name(), scenario.description());
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::CheckConfig => {
            print!("{}", serde_yaml::to_string(&config)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Run {
            scenarios,
            concurrency,
            fake,
            report,
        } => {
            let selected = select_scenarios(&scenarios)?;

            // One node carries every capacity-sensitive scenario
            let concurrency = if args.daemonset_node.is_some() && concurrency > 1 {
                warn!("Daemonset node shared by all scenarios; running them one at a time");
                1
            } else {
                concurrency
            };

            info!("Starting LVM conformance run");
            info!("  Version: {}", lvm_conformance::VERSION);
            info!("  Scenarios: {}", selected.len());
            info!("  Concurrency: {}", concurrency);
            info!("  Backend: {}", if fake { "in-memory" } else { "kubectl" });

            let (cluster, shell): (Arc<dyn ClusterCli>, Arc<dyn HostShell>) = if fake {
                let fake = FakeCluster::new(&config);
                let shell = fake.host_shell();
                (Arc::new(fake), Arc::new(shell))
            } else {
                (
                    Arc::new(Kubectl::new(config.kubectl.clone())),
                    Arc::new(ProcessShell::new(config.lvm.command_prefix.clone())),
                )
            };

            let harness = Harness::new(config, cluster, shell)?;
            let run = harness.run_all(&selected, concurrency).await;

            println!("{}", run);

            if let Some(path) = report {
                let json = serde_json::to_string_pretty(&run)?;
                std::fs::write(&path, json)
                    .with_context(|| format!("writing report to {}", path.display()))?;
                info!(path = %path.display(), "Run report written");
            }

            if run.is_success() {
                info!("All scenarios passed");
                Ok(ExitCode::SUCCESS)
            } else {
                for failed in run.failed() {
                    error!(
                        scenario = %failed.scenario,
                        namespace = %failed.namespace,
                        "Scenario failed; namespace retained"
                    );
                }
                Ok(ExitCode::FAILURE)
            }
        }
    }
}

fn load_config(args: &Args) -> anyhow::Result<HarnessConfig> {
    let mut config = match &args.config {
        Some(path) => HarnessConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => HarnessConfig::default(),
    };

    if let Some(node) = &args.daemonset_node {
        config = config.with_daemonset_node(node);
    }
    if let Some(kubeconfig) = &args.kubeconfig {
        config.kubectl.kubeconfig = Some(kubeconfig.clone());
    }
    if let Some(context) = &args.context {
        config.kubectl.context = Some(context.clone());
    }

    config.validate()?;
    Ok(config)
}

fn select_scenarios(names: &[String]) -> anyhow::Result<Vec<Scenario>> {
    if names.is_empty() {
        return Ok(Scenario::ALL.to_vec());
    }
    let mut selected = Vec::new();
    for name in names {
        let scenario: Scenario = name.parse()?;
        if !selected.contains(&scenario) {
            selected.push(scenario);
        }
    }
    Ok(selected)
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
