use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;
use veer_network::{
    BroadcastNotificationSink, CommandHook, CommandSystemProxy, CommandWirelessProbe,
    EngineApiClient, EngineTimeouts, ManagedEngine, NetworkReconciler, NoopSystemProxy,
    SystemProxyControl, DEFAULT_ENGINE_API_TIMEOUT_MS,
};
use veer_profile::{
    DirectoryConfigStore, OverrideSandbox, ProfilePipeline, ProfileResolver, RuntimeConfigCache,
    ScriptSandboxLimits, WorkspaceMaterializer,
};

use crate::cli_args::{Cli, NetworkArgs};

pub(crate) fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

pub(crate) fn script_limits(cli: &Cli) -> ScriptSandboxLimits {
    ScriptSandboxLimits {
        fuel_limit: cli.script_fuel_limit,
        memory_limit_bytes: cli.script_memory_limit_bytes,
        timeout_ms: cli.script_timeout_ms,
        ..ScriptSandboxLimits::default()
    }
}

pub(crate) fn work_root(cli: &Cli) -> PathBuf {
    cli.work_dir
        .clone()
        .unwrap_or_else(|| cli.state_dir.join("work"))
}

pub(crate) fn resources_dir(cli: &Cli) -> PathBuf {
    cli.resources_dir
        .clone()
        .unwrap_or_else(|| cli.state_dir.join("resources"))
}

pub(crate) struct ProfileRuntime {
    pub(crate) store: Arc<DirectoryConfigStore>,
    pub(crate) pipeline: Arc<ProfilePipeline>,
}

pub(crate) fn build_profile_runtime(cli: &Cli) -> ProfileRuntime {
    let store = Arc::new(DirectoryConfigStore::new(&cli.state_dir));
    let resolver = ProfileResolver::new(
        store.clone(),
        store.clone(),
        store.clone(),
        OverrideSandbox::new(script_limits(cli)),
    );
    let pipeline = Arc::new(ProfilePipeline::new(
        resolver,
        WorkspaceMaterializer::new(work_root(cli), resources_dir(cli)),
        Arc::new(RuntimeConfigCache::new()),
    ));
    ProfileRuntime { store, pipeline }
}

fn hook(command_line: &str, timeout: Duration) -> Result<CommandHook> {
    Ok(CommandHook::parse(command_line)?.with_timeout(timeout))
}

pub(crate) fn build_reconciler(
    runtime: &ProfileRuntime,
    args: &NetworkArgs,
) -> Result<Arc<NetworkReconciler>> {
    let timeout = Duration::from_millis(args.command_timeout_ms);
    let api = args
        .controller_url
        .as_deref()
        .map(|url| {
            EngineApiClient::new(
                url,
                args.controller_secret.clone(),
                DEFAULT_ENGINE_API_TIMEOUT_MS,
            )
        })
        .transpose()?;
    let engine = ManagedEngine::new(
        runtime.pipeline.clone(),
        CommandHook::parse(&args.engine_start_command).context("invalid --engine-start-command")?,
        api,
        EngineTimeouts::default(),
    );
    let system_proxy: Arc<dyn SystemProxyControl> = match (
        args.system_proxy_enable_command.as_deref(),
        args.system_proxy_disable_command.as_deref(),
    ) {
        (Some(enable), Some(disable)) => Arc::new(CommandSystemProxy::new(
            hook(enable, timeout).context("invalid --system-proxy-enable-command")?,
            hook(disable, timeout).context("invalid --system-proxy-disable-command")?,
            args.restore_dns_command
                .as_deref()
                .map(|command| hook(command, timeout))
                .transpose()
                .context("invalid --restore-dns-command")?,
        )),
        _ => Arc::new(NoopSystemProxy),
    };
    let probe = CommandWirelessProbe::new(
        hook(&args.ssid_command, timeout).context("invalid --ssid-command")?,
    );

    Ok(Arc::new(NetworkReconciler::new(
        runtime.store.clone(),
        runtime.store.clone(),
        Arc::new(engine),
        system_proxy,
        Arc::new(probe),
        Arc::new(BroadcastNotificationSink::new()),
    )))
}
