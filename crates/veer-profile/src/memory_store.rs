//! In-memory implementation of every store contract, for tests and embedding.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::{StoreError, StoreResult};
use crate::override_log::override_log_path;
use crate::profile_merge::merge_profile;
use crate::profile_types::{
    AppConfig, OverrideConfig, OverrideItem, OverrideKind, Profile, ProfileBinding,
};
use crate::stores::{AppConfigStore, OperatorConfigStore, OverrideStore, ProfileStore};

#[derive(Debug)]
pub struct InMemoryConfigStore {
    inner: RwLock<StoreInner>,
    log_dir: PathBuf,
}

static NEXT_DEFAULT_LOG_DIR: AtomicU64 = AtomicU64::new(0);

/// Each default store logs under its own `$TMPDIR/veer-override-logs-<pid>-<n>`;
/// use [`InMemoryConfigStore::with_log_dir`] to choose the location.
impl Default for InMemoryConfigStore {
    fn default() -> Self {
        let instance = NEXT_DEFAULT_LOG_DIR.fetch_add(1, Ordering::Relaxed);
        Self::with_log_dir(std::env::temp_dir().join(format!(
            "veer-override-logs-{}-{instance}",
            std::process::id()
        )))
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    current: Option<String>,
    profiles: HashMap<String, Profile>,
    bindings: HashMap<String, ProfileBinding>,
    overrides: Vec<OverrideItem>,
    override_contents: HashMap<String, String>,
    operator: Profile,
    app: Profile,
    operator_patches: Vec<Value>,
    app_patches: Vec<Value>,
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose override log artifacts are written under `log_dir`.
    pub fn with_log_dir(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
            log_dir: log_dir.into(),
        }
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    pub async fn set_current(&self, selector: impl Into<String>) {
        self.inner.write().await.current = Some(selector.into());
    }

    pub async fn insert_profile(&self, selector: impl Into<String>, profile: Profile) {
        self.inner
            .write()
            .await
            .profiles
            .insert(selector.into(), profile);
    }

    pub async fn bind_overrides(&self, selector: impl Into<String>, ids: &[&str]) {
        let binding = ProfileBinding {
            overrides: ids.iter().map(|id| id.to_string()).collect(),
        };
        self.inner
            .write()
            .await
            .bindings
            .insert(selector.into(), binding);
    }

    /// Registers an override; re-inserting an id replaces the item and its content.
    pub async fn insert_override(&self, item: OverrideItem, content: impl Into<String>) {
        let mut inner = self.inner.write().await;
        inner.overrides.retain(|existing| existing.id != item.id);
        inner
            .override_contents
            .insert(item.id.clone(), content.into());
        inner.overrides.push(item);
    }

    pub async fn set_operator_config(&self, operator: Profile) {
        self.inner.write().await.operator = operator;
    }

    pub async fn set_app_config(&self, app: AppConfig) -> StoreResult<()> {
        let document = app_document_from_config(&app)?;
        self.inner.write().await.app = document;
        Ok(())
    }

    /// Replaces the raw app settings document, keys `AppConfig` does not model included.
    pub async fn set_app_document(&self, document: Profile) {
        self.inner.write().await.app = document;
    }

    pub async fn app_document(&self) -> Profile {
        self.inner.read().await.app.clone()
    }

    /// Every operator patch received so far, oldest first.
    pub async fn operator_patches(&self) -> Vec<Value> {
        self.inner.read().await.operator_patches.clone()
    }

    /// Every app config patch received so far, oldest first.
    pub async fn app_patches(&self) -> Vec<Value> {
        self.inner.read().await.app_patches.clone()
    }
}

#[async_trait]
impl ProfileStore for InMemoryConfigStore {
    async fn current_profile_selector(&self) -> StoreResult<Option<String>> {
        Ok(self.inner.read().await.current.clone())
    }

    async fn profile(&self, selector: &str) -> StoreResult<Profile> {
        self.inner
            .read()
            .await
            .profiles
            .get(selector)
            .cloned()
            .ok_or_else(|| StoreError::not_found("profile", selector))
    }

    async fn profile_binding(&self, selector: &str) -> StoreResult<ProfileBinding> {
        Ok(self
            .inner
            .read()
            .await
            .bindings
            .get(selector)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl OverrideStore for InMemoryConfigStore {
    async fn override_config(&self) -> StoreResult<OverrideConfig> {
        Ok(OverrideConfig {
            items: self.inner.read().await.overrides.clone(),
        })
    }

    async fn override_item(&self, id: &str) -> StoreResult<Option<OverrideItem>> {
        Ok(self
            .inner
            .read()
            .await
            .overrides
            .iter()
            .find(|item| item.id == id)
            .cloned())
    }

    async fn override_content(&self, id: &str, _kind: OverrideKind) -> StoreResult<String> {
        self.inner
            .read()
            .await
            .override_contents
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("override content", id))
    }

    fn override_log_path(&self, id: &str) -> StoreResult<PathBuf> {
        override_log_path(&self.log_dir, id)
    }
}

#[async_trait]
impl OperatorConfigStore for InMemoryConfigStore {
    async fn operator_config(&self) -> StoreResult<Profile> {
        Ok(self.inner.read().await.operator.clone())
    }

    async fn patch_operator_config(&self, patch: &Value) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.operator = merge_profile(&inner.operator, patch);
        inner.operator_patches.push(patch.clone());
        Ok(())
    }
}

#[async_trait]
impl AppConfigStore for InMemoryConfigStore {
    async fn app_config(&self) -> StoreResult<AppConfig> {
        app_config_from_document(&self.inner.read().await.app)
    }

    async fn patch_app_config(&self, patch: &Value) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.app = patch_app_document(&inner.app, patch)?;
        inner.app_patches.push(patch.clone());
        Ok(())
    }
}

/// Typed view over the raw app settings document.
pub(crate) fn app_config_from_document(document: &Profile) -> StoreResult<AppConfig> {
    Ok(serde_json::from_value(Value::Object(document.clone()))?)
}

fn app_document_from_config(app: &AppConfig) -> StoreResult<Profile> {
    match serde_json::to_value(app)? {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::Other(format!(
            "app config serialized to non-object value: {other}"
        ))),
    }
}

/// Deep-merges `patch` into the raw app settings document.
///
/// Keys unknown to [`AppConfig`] are kept; the merged document must still
/// read back as an `AppConfig`.
pub(crate) fn patch_app_document(current: &Profile, patch: &Value) -> StoreResult<Profile> {
    let merged = merge_profile(current, patch);
    app_config_from_document(&merged)?;
    Ok(merged)
}
