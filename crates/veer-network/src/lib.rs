//! Network-attachment reconciliation for Veer.
//!
//! [`NetworkReconciler`] polls the wireless identity and flips the engine
//! between `direct` (pause-listed networks) and `rule` mode. Side effects go
//! through the traits in [`collaborators`]; command, process and HTTP backed
//! implementations are provided alongside.

pub mod collaborators;
pub mod command_adapters;
pub mod engine_api;
pub mod engine_control;
pub mod network_reconciler;
pub mod network_state;
pub mod notification;

pub use collaborators::{
    EngineControl, NotificationEvent, NotificationSink, SystemProxyControl, WirelessIdentityProbe,
};
pub use command_adapters::{
    identity_from_output, CommandHook, CommandSystemProxy, CommandWirelessProbe, NoopSystemProxy,
    DEFAULT_COMMAND_TIMEOUT,
};
pub use engine_api::{EngineApiClient, EngineVersion, DEFAULT_ENGINE_API_TIMEOUT_MS};
pub use engine_control::{EngineTimeouts, ManagedEngine};
pub use network_reconciler::{
    engine_push_for, operator_patch_for, LoopStart, NetworkReconciler, ReconcileError,
    DEFAULT_RECONCILE_INTERVAL,
};
pub use network_state::{NetworkState, ProxyMode, ReconcileOutcome};
pub use notification::BroadcastNotificationSink;
