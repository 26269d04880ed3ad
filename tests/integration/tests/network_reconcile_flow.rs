use std::{path::Path, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::tempdir;
use tokio::sync::Mutex as AsyncMutex;
use veer_network::{
    BroadcastNotificationSink, EngineControl, NetworkReconciler, NotificationEvent, ProxyMode,
    ReconcileOutcome, SystemProxyControl, WirelessIdentityProbe,
};
use veer_profile::{AppConfigStore, DirectoryConfigStore, OperatorConfigStore};

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Stop { graceful: bool },
    Start,
    Push(Value),
    SystemProxy(bool),
    RestoreDns,
}

#[derive(Default)]
struct ScriptedCollaborators {
    calls: AsyncMutex<Vec<Call>>,
    identities: AsyncMutex<Vec<Option<String>>>,
}

impl ScriptedCollaborators {
    async fn queue_identity(&self, identity: Option<&str>) {
        self.identities
            .lock()
            .await
            .push(identity.map(str::to_string));
    }

    async fn take_calls(&self) -> Vec<Call> {
        std::mem::take(&mut *self.calls.lock().await)
    }
}

#[async_trait]
impl EngineControl for ScriptedCollaborators {
    async fn stop(&self, graceful: bool) -> Result<()> {
        self.calls.lock().await.push(Call::Stop { graceful });
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        self.calls.lock().await.push(Call::Start);
        Ok(())
    }

    async fn push_config(&self, partial: &Value) -> Result<()> {
        self.calls.lock().await.push(Call::Push(partial.clone()));
        Ok(())
    }
}

#[async_trait]
impl SystemProxyControl for ScriptedCollaborators {
    async fn set_system_proxy(&self, enabled: bool) -> Result<()> {
        self.calls.lock().await.push(Call::SystemProxy(enabled));
        Ok(())
    }

    async fn restore_dns(&self) -> Result<()> {
        self.calls.lock().await.push(Call::RestoreDns);
        Ok(())
    }
}

#[async_trait]
impl WirelessIdentityProbe for ScriptedCollaborators {
    /// Pops the next queued identity; the last one repeats.
    async fn current_identity(&self) -> Option<String> {
        let mut identities = self.identities.lock().await;
        if identities.len() > 1 {
            identities.remove(0)
        } else {
            identities.first().cloned().flatten()
        }
    }
}

fn write(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    std::fs::write(path, content).expect("write fixture");
}

struct Harness {
    reconciler: Arc<NetworkReconciler>,
    collaborators: Arc<ScriptedCollaborators>,
    store: Arc<DirectoryConfigStore>,
    notifications: tokio::sync::broadcast::Receiver<NotificationEvent>,
}

fn harness(state: &Path) -> Harness {
    write(
        state,
        "app.yaml",
        "pause_ssid: [HomeWiFi]\nsys_proxy:\n  enable: true\n",
    );
    write(
        state,
        "operator.yaml",
        "mode: rule\nmixed-port: 7890\ndns:\n  enable: true\n  ipv6: false\ntun:\n  enable: true\n",
    );
    let store = Arc::new(DirectoryConfigStore::new(state));
    let collaborators = Arc::new(ScriptedCollaborators::default());
    let sink = Arc::new(BroadcastNotificationSink::new());
    let notifications = sink.subscribe();
    let reconciler = Arc::new(NetworkReconciler::new(
        store.clone(),
        store.clone(),
        collaborators.clone(),
        collaborators.clone(),
        collaborators.clone(),
        sink,
    ));
    Harness {
        reconciler,
        collaborators,
        store,
        notifications,
    }
}

#[tokio::test]
async fn integration_moving_onto_pause_listed_network_pauses_proxy() {
    let temp = tempdir().expect("tempdir");
    let mut harness = harness(temp.path());
    harness
        .collaborators
        .queue_identity(Some("OfficeWiFi"))
        .await;
    harness.collaborators.queue_identity(Some("HomeWiFi")).await;

    harness.reconciler.reconcile_once().await.expect("office");
    harness.collaborators.take_calls().await;
    while harness.notifications.try_recv().is_ok() {}

    let outcome = harness.reconciler.reconcile_once().await.expect("home");

    assert_eq!(
        outcome,
        ReconcileOutcome::Transitioned {
            mode: ProxyMode::Direct,
            identity: Some("HomeWiFi".to_string()),
        }
    );
    assert_eq!(
        harness.collaborators.take_calls().await,
        vec![
            Call::Stop { graceful: true },
            Call::SystemProxy(false),
            Call::RestoreDns,
            Call::Start,
            Call::Push(json!({"mode": "direct", "dns": {"enable": false}})),
        ]
    );
    let operator = harness.store.operator_config().await.expect("operator");
    assert_eq!(operator["mode"], "direct");
    assert_eq!(operator["dns"], json!({"enable": false, "ipv6": false}));
    assert_eq!(operator["tun"], json!({"enable": false}));
    assert_eq!(operator["mixed-port"], 7890);
    assert!(!harness.store.app_config().await.expect("app").sys_proxy.enable);
    for expected in NotificationEvent::RECONCILE_SEQUENCE {
        assert_eq!(harness.notifications.try_recv().expect("event"), expected);
    }
}

#[tokio::test]
async fn integration_leaving_pause_list_reenables_dns_tun_and_system_proxy() {
    let temp = tempdir().expect("tempdir");
    let harness = harness(temp.path());
    harness.collaborators.queue_identity(Some("HomeWiFi")).await;
    harness
        .collaborators
        .queue_identity(Some("OfficeWiFi"))
        .await;

    harness.reconciler.reconcile_once().await.expect("home");
    harness.collaborators.take_calls().await;
    harness.reconciler.reconcile_once().await.expect("office");

    let calls = harness.collaborators.take_calls().await;
    assert_eq!(
        calls,
        vec![
            Call::Stop { graceful: true },
            Call::Start,
            Call::Push(json!({"mode": "rule", "dns": {"enable": true}})),
            Call::SystemProxy(true),
        ]
    );
    let operator = harness.store.operator_config().await.expect("operator");
    assert_eq!(operator["mode"], "rule");
    assert_eq!(operator["dns"]["enable"], true);
    assert_eq!(operator["tun"], json!({"enable": true}));
    assert!(harness.store.app_config().await.expect("app").sys_proxy.enable);
}

#[tokio::test]
async fn integration_repeated_identity_samples_trigger_one_transition() {
    let temp = tempdir().expect("tempdir");
    let harness = harness(temp.path());
    harness.collaborators.queue_identity(Some("HomeWiFi")).await;

    for _ in 0..4 {
        harness.reconciler.reconcile_once().await.expect("pass");
    }

    let calls = harness.collaborators.take_calls().await;
    assert_eq!(calls.iter().filter(|call| **call == Call::Start).count(), 1);
    assert_eq!(
        calls
            .iter()
            .filter(|call| matches!(call, Call::Stop { .. }))
            .count(),
        1
    );
}
