use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use deployment_gate::{compare_production, rollback_to, DeploymentGate, GateError, GateSettings};
use modelops_registry::ArtifactRef;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

const EXIT_REJECTED: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "deployment-gate", about = "Promote trained model versions based on their metrics")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register a finished run and promote it if it beats Production.
    Promote {
        #[arg(long, conflicts_with = "version", requires = "artifact_ref")]
        run_id: Option<String>,
        #[arg(long)]
        artifact_ref: Option<String>,
        /// Re-run the gate for a version already in Staging.
        #[arg(long)]
        version: Option<u64>,
        /// Write the candidate version number here (CI output).
        #[arg(long)]
        version_file: Option<PathBuf>,
    },
    /// Re-deploy an earlier version's artifact as the new Production version.
    Rollback {
        #[arg(long)]
        version: u64,
        #[arg(long)]
        confirm: bool,
    },
    /// Compare Production with the previous version.
    Compare,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    modelops_core::init_tracing("deployment-gate")?;
    let cli = Cli::parse();
    let settings: GateSettings = modelops_core::load_config("deployment-gate")?;
    let registry = Arc::new(settings.registry.mlflow().context("building registry client")?);

    match cli.command {
        Command::Promote { run_id, artifact_ref, version, version_file } => {
            let gate = DeploymentGate::new(registry.clone(), registry, settings.gate);
            let result = match (run_id, version) {
                (Some(run_id), _) => {
                    let artifact_ref = ArtifactRef::new(artifact_ref.unwrap_or_default());
                    gate.run(&run_id, artifact_ref).await
                }
                (None, Some(v)) => gate.run_version(v).await,
                (None, None) => anyhow::bail!("either --run-id or --version is required"),
            };
            match result {
                Ok(outcome) => {
                    println!("{}", serde_json::to_string_pretty(&outcome)?);
                    if let Some(path) = version_file {
                        std::fs::write(&path, outcome.report.candidate.version.to_string()).with_context(|| format!("writing {}", path.display()))?;
                    }
                    if outcome.promoted { Ok(ExitCode::SUCCESS) } else { Ok(ExitCode::from(EXIT_REJECTED)) }
                }
                Err(e @ GateError::RaceLost { .. }) => {
                    warn!(error=%e, "candidate left in Staging");
                    Ok(ExitCode::from(EXIT_REJECTED))
                }
                Err(e) => {
                    error!(error=%e, validation = e.is_validation(), "gate failed");
                    Err(e.into())
                }
            }
        }
        Command::Rollback { version, confirm } => {
            if !confirm {
                warn!(version, "refusing rollback without --confirm");
                return Ok(ExitCode::FAILURE);
            }
            let outcome = rollback_to(registry.as_ref(), registry.as_ref(), version).await?;
            info!(new_version = outcome.new_version.version, "rollback complete");
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Compare => {
            match compare_production(registry.as_ref(), &settings.gate).await? {
                Some(cmp) => println!("{}", serde_json::to_string_pretty(&cmp)?),
                None => println!("{}", serde_json::json!({"has_comparison": false, "error": "no Production model found"})),
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
