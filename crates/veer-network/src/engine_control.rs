//! Engine process supervision.
//!
//! `start` resolves and materializes the current profile, then launches the
//! engine binary against the profile's working directory:
//! `<program> <args..> -d <work_dir> -f <config.yaml>`.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use veer_profile::ProfilePipeline;

use crate::collaborators::EngineControl;
use crate::command_adapters::CommandHook;
use crate::engine_api::EngineApiClient;

pub const DEFAULT_ENGINE_STOP_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_ENGINE_READY_TIMEOUT: Duration = Duration::from_secs(10);
const ENGINE_READY_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct EngineTimeouts {
    pub stop: Duration,
    pub ready: Duration,
}

impl Default for EngineTimeouts {
    fn default() -> Self {
        Self {
            stop: DEFAULT_ENGINE_STOP_TIMEOUT,
            ready: DEFAULT_ENGINE_READY_TIMEOUT,
        }
    }
}

pub struct ManagedEngine {
    pipeline: Arc<ProfilePipeline>,
    launch: CommandHook,
    api: Option<EngineApiClient>,
    timeouts: EngineTimeouts,
    child: Mutex<Option<Child>>,
}

impl ManagedEngine {
    pub fn new(
        pipeline: Arc<ProfilePipeline>,
        launch: CommandHook,
        api: Option<EngineApiClient>,
        timeouts: EngineTimeouts,
    ) -> Self {
        Self {
            pipeline,
            launch,
            api,
            timeouts,
            child: Mutex::new(None),
        }
    }

    pub async fn is_running(&self) -> bool {
        match self.child.lock().await.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    pub async fn pid(&self) -> Option<u32> {
        self.child.lock().await.as_ref().and_then(Child::id)
    }

    async fn wait_until_ready(&self, api: &EngineApiClient) -> Result<()> {
        let deadline = tokio::time::Instant::now() + self.timeouts.ready;
        loop {
            match api.version().await {
                Ok(version) => {
                    tracing::debug!(version = version.version.as_str(), "engine controller ready");
                    return Ok(());
                }
                Err(error) if tokio::time::Instant::now() >= deadline => {
                    return Err(error).with_context(|| {
                        format!(
                            "engine controller not ready after {} ms",
                            self.timeouts.ready.as_millis()
                        )
                    });
                }
                Err(_) => tokio::time::sleep(ENGINE_READY_POLL_INTERVAL).await,
            }
        }
    }
}

async fn terminate(child: &mut Child, graceful: bool, stop_timeout: Duration) -> Result<()> {
    if child.try_wait()?.is_some() {
        return Ok(());
    }
    if graceful && request_exit(child) {
        match tokio::time::timeout(stop_timeout, child.wait()).await {
            Ok(status) => {
                let status = status.context("failed to wait for engine exit")?;
                tracing::debug!(%status, "engine exited");
                return Ok(());
            }
            Err(_) => tracing::warn!(
                timeout_ms = stop_timeout.as_millis() as u64,
                "engine ignored termination request; killing"
            ),
        }
    }
    child.kill().await.context("failed to kill engine process")
}

#[cfg(unix)]
fn request_exit(child: &Child) -> bool {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) else {
        return false;
    };
    match signal::kill(Pid::from_raw(pid), Signal::SIGTERM) {
        Ok(()) => true,
        Err(error) => {
            tracing::warn!(%error, pid, "failed to send SIGTERM to engine");
            false
        }
    }
}

#[cfg(not(unix))]
fn request_exit(_child: &Child) -> bool {
    false
}

#[async_trait]
impl EngineControl for ManagedEngine {
    async fn stop(&self, graceful: bool) -> Result<()> {
        let mut slot = self.child.lock().await;
        if let Some(mut child) = slot.take() {
            terminate(&mut child, graceful, self.timeouts.stop).await?;
            tracing::info!(graceful, "engine stopped");
        }
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        let mut slot = self.child.lock().await;
        if let Some(mut previous) = slot.take() {
            terminate(&mut previous, true, self.timeouts.stop).await?;
        }

        let materialized = self
            .pipeline
            .resolve_and_materialize()
            .await
            .context("failed to generate runtime config")?;
        let report = &materialized.report;

        let mut command = Command::new(self.launch.program());
        command
            .args(self.launch.args())
            .arg("-d")
            .arg(&report.work_dir)
            .arg("-f")
            .arg(&report.config_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        let child = command
            .spawn()
            .with_context(|| format!("failed to spawn engine '{}'", self.launch.program()))?;
        tracing::info!(
            pid = child.id().unwrap_or_default(),
            profile = materialized.resolved.selector.as_str(),
            config_path = %report.config_path.display(),
            "engine started"
        );
        *slot = Some(child);
        drop(slot);

        if let Some(api) = &self.api {
            self.wait_until_ready(api).await?;
        }
        Ok(())
    }

    async fn push_config(&self, partial: &Value) -> Result<()> {
        match &self.api {
            Some(api) => api.patch_configs(partial).await,
            None => {
                tracing::debug!("engine controller not configured; config push skipped");
                Ok(())
            }
        }
    }
}
