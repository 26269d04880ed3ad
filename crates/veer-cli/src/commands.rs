use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result};
use veer_network::ReconcileOutcome;

use crate::bootstrap::{build_profile_runtime, build_reconciler};
use crate::cli_args::{Cli, Command, NetworkArgs};

pub(crate) async fn run_cli(cli: Cli) -> Result<()> {
    let mut stdout = std::io::stdout();
    run_command(&cli, &mut stdout).await
}

pub(crate) async fn run_command(cli: &Cli, out: &mut impl Write) -> Result<()> {
    let runtime = build_profile_runtime(cli);
    match &cli.command {
        Command::Resolve => {
            let materialized = runtime.pipeline.resolve_and_materialize().await?;
            writeln!(out, "{}", materialized.report.config_path.display())?;
        }
        Command::Show { profile } => {
            let resolved = runtime
                .pipeline
                .resolver()
                .resolve(profile.as_deref())
                .await?;
            write!(out, "{}", resolved.serialized)?;
        }
        Command::CheckSsid(args) => {
            let reconciler = build_reconciler(&runtime, args)?;
            let outcome = reconciler.reconcile_once().await?;
            writeln!(out, "{}", describe_outcome(&outcome))?;
        }
        Command::Watch(args) => watch(&runtime, args).await?,
    }
    Ok(())
}

async fn watch(runtime: &crate::bootstrap::ProfileRuntime, args: &NetworkArgs) -> Result<()> {
    let reconciler = build_reconciler(runtime, args)?;
    reconciler.start_loop(Duration::from_secs(args.poll_interval_seconds))?;
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    tracing::info!("interrupt received; shutting down");
    reconciler.shutdown().await;
    Ok(())
}

pub(crate) fn describe_outcome(outcome: &ReconcileOutcome) -> String {
    match outcome {
        ReconcileOutcome::PauseListEmpty => "pause list is empty; nothing to do".to_string(),
        ReconcileOutcome::Unchanged => "network unchanged".to_string(),
        ReconcileOutcome::Transitioned { mode, identity } => format!(
            "switched to {} (ssid: {})",
            mode.as_str(),
            identity.as_deref().unwrap_or("none")
        ),
    }
}
