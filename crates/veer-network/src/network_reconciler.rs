//! Keeps the proxy mode in step with the attached wireless network.
//!
//! A pass samples the wireless identity and, when it changed, drives the
//! engine through stop → reconfigure → start. Pause-listed networks switch
//! the engine to `direct` and turn the OS system proxy off; every other
//! network (or none) switches it back to `rule`.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use veer_core::current_unix_timestamp_ms;
use veer_profile::{AppConfigStore, OperatorConfigStore, StoreError};

use crate::collaborators::{
    EngineControl, NotificationEvent, NotificationSink, SystemProxyControl, WirelessIdentityProbe,
};
use crate::network_state::{NetworkState, ProxyMode, ReconcileOutcome};

pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("failed to read app config: {0}")]
    AppConfig(#[source] StoreError),
    #[error("failed to patch operator config: {0}")]
    OperatorConfig(#[source] StoreError),
    #[error("engine {step} failed: {message}")]
    Engine { step: &'static str, message: String },
}

impl ReconcileError {
    fn engine(step: &'static str, error: anyhow::Error) -> Self {
        Self::Engine {
            step,
            message: format!("{error:#}"),
        }
    }
}

/// Operator patch applied when entering `mode`.
pub fn operator_patch_for(mode: ProxyMode) -> Value {
    let enabled = mode == ProxyMode::Rule;
    json!({
        "mode": mode.as_str(),
        "dns": { "enable": enabled },
        "tun": { "enable": enabled },
    })
}

/// Partial config pushed to the running engine after entering `mode`.
pub fn engine_push_for(mode: ProxyMode) -> Value {
    json!({
        "mode": mode.as_str(),
        "dns": { "enable": mode == ProxyMode::Rule },
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStart {
    Started,
    AlreadyRunning,
}

struct ReconcileLoop {
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

pub struct NetworkReconciler {
    app_config: Arc<dyn AppConfigStore>,
    operator: Arc<dyn OperatorConfigStore>,
    engine: Arc<dyn EngineControl>,
    system_proxy: Arc<dyn SystemProxyControl>,
    probe: Arc<dyn WirelessIdentityProbe>,
    notifier: Arc<dyn NotificationSink>,
    state: Mutex<NetworkState>,
    reconcile_loop: std::sync::Mutex<Option<ReconcileLoop>>,
}

impl NetworkReconciler {
    pub fn new(
        app_config: Arc<dyn AppConfigStore>,
        operator: Arc<dyn OperatorConfigStore>,
        engine: Arc<dyn EngineControl>,
        system_proxy: Arc<dyn SystemProxyControl>,
        probe: Arc<dyn WirelessIdentityProbe>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            app_config,
            operator,
            engine,
            system_proxy,
            probe,
            notifier,
            state: Mutex::new(NetworkState::default()),
            reconcile_loop: std::sync::Mutex::new(None),
        }
    }

    pub async fn state(&self) -> NetworkState {
        self.state.lock().await.clone()
    }

    /// Runs one reconciliation pass. Passes never overlap.
    ///
    /// The identity is recorded before the transition runs, so a failed
    /// transition is not retried until the identity changes again.
    pub async fn reconcile_once(&self) -> Result<ReconcileOutcome, ReconcileError> {
        let mut state = self.state.lock().await;
        let app = self
            .app_config
            .app_config()
            .await
            .map_err(ReconcileError::AppConfig)?;
        state.pause_list = app.pause_ssid;
        if state.pause_list.is_empty() {
            return Ok(ReconcileOutcome::PauseListEmpty);
        }

        let identity = self.probe.current_identity().await;
        if !state.observe(identity.clone()) {
            return Ok(ReconcileOutcome::Unchanged);
        }

        let mode = ProxyMode::for_identity(identity.as_deref(), &state.pause_list);
        tracing::info!(
            ssid = identity.as_deref().unwrap_or("<none>"),
            mode = mode.as_str(),
            "network attachment changed"
        );
        match mode {
            ProxyMode::Direct => self.enter_paused().await?,
            ProxyMode::Rule => self.enter_active().await?,
        }
        state.mode = Some(mode);
        state.last_transition_unix_ms = Some(current_unix_timestamp_ms());
        Ok(ReconcileOutcome::Transitioned { mode, identity })
    }

    async fn enter_paused(&self) -> Result<(), ReconcileError> {
        let mode = ProxyMode::Direct;
        self.engine
            .stop(true)
            .await
            .map_err(|error| ReconcileError::engine("stop", error))?;
        self.operator
            .patch_operator_config(&operator_patch_for(mode))
            .await
            .map_err(ReconcileError::OperatorConfig)?;
        self.apply_system_proxy(false).await;
        if let Err(error) = self.system_proxy.restore_dns().await {
            tracing::warn!(error = %format!("{error:#}"), "dns restore failed");
        }
        self.restart_with(mode).await?;
        self.notify_all();
        Ok(())
    }

    async fn enter_active(&self) -> Result<(), ReconcileError> {
        let mode = ProxyMode::Rule;
        self.engine
            .stop(true)
            .await
            .map_err(|error| ReconcileError::engine("stop", error))?;
        self.operator
            .patch_operator_config(&operator_patch_for(mode))
            .await
            .map_err(ReconcileError::OperatorConfig)?;
        self.restart_with(mode).await?;
        self.apply_system_proxy(true).await;
        self.notify_all();
        Ok(())
    }

    async fn restart_with(&self, mode: ProxyMode) -> Result<(), ReconcileError> {
        self.engine
            .start()
            .await
            .map_err(|error| ReconcileError::engine("start", error))?;
        self.engine
            .push_config(&engine_push_for(mode))
            .await
            .map_err(|error| ReconcileError::engine("config push", error))
    }

    /// Toggles the OS proxy and persists the intent; each step is best-effort.
    async fn apply_system_proxy(&self, enabled: bool) {
        if let Err(error) = self.system_proxy.set_system_proxy(enabled).await {
            tracing::warn!(enabled, error = %format!("{error:#}"), "system proxy toggle failed");
        }
        let patch = json!({ "sys_proxy": { "enable": enabled } });
        if let Err(error) = self.app_config.patch_app_config(&patch).await {
            tracing::warn!(enabled, %error, "failed to persist system proxy setting");
        }
    }

    fn notify_all(&self) {
        for event in NotificationEvent::RECONCILE_SEQUENCE {
            self.notifier.notify(event);
        }
    }

    /// Starts the periodic loop: one pass immediately, then one per `interval`.
    ///
    /// Calling it while a loop is running leaves that loop in place.
    pub fn start_loop(self: &Arc<Self>, interval: Duration) -> anyhow::Result<LoopStart> {
        if interval.is_zero() {
            anyhow::bail!("reconcile interval must be greater than zero");
        }
        let mut slot = self
            .reconcile_loop
            .lock()
            .map_err(|_| anyhow::anyhow!("reconcile loop state is poisoned"))?;
        if slot.as_ref().is_some_and(|running| !running.task.is_finished()) {
            return Ok(LoopStart::AlreadyRunning);
        }

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let reconciler = Arc::clone(self);
        let task = tokio::spawn(async move {
            reconciler.run_loop(interval, shutdown_rx).await;
        });
        *slot = Some(ReconcileLoop { shutdown_tx, task });
        tracing::info!(interval_ms = interval.as_millis() as u64, "reconcile loop started");
        Ok(LoopStart::Started)
    }

    pub fn is_loop_running(&self) -> bool {
        self.reconcile_loop
            .lock()
            .map(|slot| slot.as_ref().is_some_and(|running| !running.task.is_finished()))
            .unwrap_or(false)
    }

    /// Stops the loop and waits for an in-flight pass to finish.
    pub async fn shutdown(&self) {
        let running = match self.reconcile_loop.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        if let Some(running) = running {
            let _ = running.shutdown_tx.send(());
            let _ = running.task.await;
            tracing::info!("reconcile loop stopped");
        }
    }

    async fn run_loop(&self, interval: Duration, mut shutdown_rx: oneshot::Receiver<()>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.reconcile_once().await {
                        Ok(ReconcileOutcome::Transitioned { mode, identity }) => tracing::debug!(
                            mode = mode.as_str(),
                            ssid = identity.as_deref().unwrap_or("<none>"),
                            "reconcile pass transitioned"
                        ),
                        Ok(_) => {}
                        Err(error) => tracing::error!(%error, "reconcile pass failed"),
                    }
                }
                _ = &mut shutdown_rx => break,
            }
        }
    }
}
