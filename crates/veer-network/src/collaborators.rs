//! Contracts for the side effects the reconciler drives.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

/// Lifecycle control of the proxy engine process.
#[async_trait]
pub trait EngineControl: Send + Sync {
    /// Stops the engine. `graceful` asks it to exit on its own before forcing.
    async fn stop(&self, graceful: bool) -> Result<()>;
    /// Regenerates the runtime config and starts the engine with it.
    async fn start(&self) -> Result<()>;
    /// Sends a partial config to the running engine.
    async fn push_config(&self, partial: &Value) -> Result<()>;
}

#[async_trait]
pub trait SystemProxyControl: Send + Sync {
    async fn set_system_proxy(&self, enabled: bool) -> Result<()>;
    async fn restore_dns(&self) -> Result<()>;
}

/// Reports the identity (SSID) of the attached wireless network.
#[async_trait]
pub trait WirelessIdentityProbe: Send + Sync {
    /// `None` when not attached or the identity cannot be determined.
    async fn current_identity(&self) -> Option<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationEvent {
    OperatorConfigUpdated,
    AppConfigUpdated,
    TrayMenuUpdated,
}

impl NotificationEvent {
    pub const RECONCILE_SEQUENCE: [NotificationEvent; 3] = [
        NotificationEvent::OperatorConfigUpdated,
        NotificationEvent::AppConfigUpdated,
        NotificationEvent::TrayMenuUpdated,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::OperatorConfigUpdated => "operator-config-updated",
            Self::AppConfigUpdated => "app-config-updated",
            Self::TrayMenuUpdated => "tray-menu-updated",
        }
    }
}

/// Fire-and-forget UI refresh notifications.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, event: NotificationEvent);
}
