//! Directory-backed implementation of the store contracts.
//!
//! Layout under the store root:
//!
//! ```text
//! profile.yaml            current selector + per-profile override bindings
//! profiles/<id>.yaml      base profile documents
//! override.yaml           override item list
//! override/<id>.<ext>     override content (`wat` or `yaml`); logs land here too
//! operator.yaml           operator-controlled config
//! app.yaml                application settings
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use veer_core::write_text_atomic;

use crate::error::{StoreError, StoreResult};
use crate::memory_store::{app_config_from_document, patch_app_document};
use crate::override_log::override_log_path;
use crate::profile_merge::merge_profile;
use crate::profile_types::{
    AppConfig, OverrideConfig, OverrideItem, OverrideKind, Profile, ProfileBinding,
};
use crate::stores::{AppConfigStore, OperatorConfigStore, OverrideStore, ProfileStore};

const PROFILE_INDEX_FILE: &str = "profile.yaml";
const PROFILES_DIR: &str = "profiles";
const OVERRIDE_INDEX_FILE: &str = "override.yaml";
const OVERRIDE_DIR: &str = "override";
const OPERATOR_CONFIG_FILE: &str = "operator.yaml";
const APP_CONFIG_FILE: &str = "app.yaml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ProfileIndex {
    #[serde(default)]
    current: Option<String>,
    #[serde(default)]
    items: Vec<ProfileIndexItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProfileIndexItem {
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(flatten)]
    binding: ProfileBinding,
}

#[derive(Debug)]
pub struct DirectoryConfigStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl DirectoryConfigStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding override content and their log artifacts.
    pub fn override_dir(&self) -> PathBuf {
        self.root.join(OVERRIDE_DIR)
    }

    pub fn profile_path(&self, selector: &str) -> StoreResult<PathBuf> {
        StoreError::check_id("profile", selector)?;
        Ok(self.root.join(PROFILES_DIR).join(format!("{selector}.yaml")))
    }

    pub fn override_content_path(&self, id: &str, kind: OverrideKind) -> StoreResult<PathBuf> {
        StoreError::check_id("override", id)?;
        Ok(self
            .override_dir()
            .join(format!("{id}.{}", kind.file_extension())))
    }

    async fn read_mapping_or_empty(&self, file: &str) -> StoreResult<Profile> {
        let path = self.root.join(file);
        match read_optional_text(&path).await? {
            Some(raw) => parse_yaml_mapping(&path, &raw),
            None => Ok(Profile::new()),
        }
    }

    async fn profile_index(&self) -> StoreResult<ProfileIndex> {
        read_yaml_or_default(&self.root.join(PROFILE_INDEX_FILE)).await
    }
}

async fn read_optional_text(path: &Path) -> StoreResult<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(raw) => Ok(Some(raw)),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(error) => Err(error.into()),
    }
}

async fn read_yaml_or_default<T: DeserializeOwned + Default>(path: &Path) -> StoreResult<T> {
    match read_optional_text(path).await? {
        Some(raw) if !raw.trim().is_empty() => Ok(serde_yaml::from_str(&raw)?),
        _ => Ok(T::default()),
    }
}

/// Parses a YAML document that must be a mapping; an empty document is an empty mapping.
fn parse_yaml_mapping(path: &Path, raw: &str) -> StoreResult<Profile> {
    if raw.trim().is_empty() {
        return Ok(Profile::new());
    }
    let mut document: serde_yaml::Value = serde_yaml::from_str(raw)?;
    document.apply_merge()?;
    match serde_json::to_value(document)? {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Profile::new()),
        _ => Err(StoreError::InvalidDocument {
            path: path.to_path_buf(),
            reason: "top-level value must be a mapping".to_string(),
        }),
    }
}

fn write_yaml<T: Serialize>(path: &Path, value: &T) -> StoreResult<()> {
    let rendered = serde_yaml::to_string(value)?;
    write_text_atomic(path, &rendered).map_err(|error| StoreError::Other(format!("{error:#}")))
}

#[async_trait]
impl ProfileStore for DirectoryConfigStore {
    async fn current_profile_selector(&self) -> StoreResult<Option<String>> {
        Ok(self
            .profile_index()
            .await?
            .current
            .filter(|selector| !selector.trim().is_empty()))
    }

    async fn profile(&self, selector: &str) -> StoreResult<Profile> {
        let path = self.profile_path(selector)?;
        let raw = read_optional_text(&path)
            .await?
            .ok_or_else(|| StoreError::not_found("profile", selector))?;
        parse_yaml_mapping(&path, &raw)
    }

    async fn profile_binding(&self, selector: &str) -> StoreResult<ProfileBinding> {
        Ok(self
            .profile_index()
            .await?
            .items
            .into_iter()
            .find(|item| item.id == selector)
            .map(|item| item.binding)
            .unwrap_or_default())
    }
}

#[async_trait]
impl OverrideStore for DirectoryConfigStore {
    async fn override_config(&self) -> StoreResult<OverrideConfig> {
        read_yaml_or_default(&self.root.join(OVERRIDE_INDEX_FILE)).await
    }

    async fn override_item(&self, id: &str) -> StoreResult<Option<OverrideItem>> {
        Ok(self
            .override_config()
            .await?
            .items
            .into_iter()
            .find(|item| item.id == id))
    }

    async fn override_content(&self, id: &str, kind: OverrideKind) -> StoreResult<String> {
        read_optional_text(&self.override_content_path(id, kind)?)
            .await?
            .ok_or_else(|| StoreError::not_found("override content", id))
    }

    fn override_log_path(&self, id: &str) -> StoreResult<PathBuf> {
        override_log_path(&self.override_dir(), id)
    }
}

#[async_trait]
impl OperatorConfigStore for DirectoryConfigStore {
    async fn operator_config(&self) -> StoreResult<Profile> {
        self.read_mapping_or_empty(OPERATOR_CONFIG_FILE).await
    }

    async fn patch_operator_config(&self, patch: &Value) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        let merged = merge_profile(&self.operator_config().await?, patch);
        write_yaml(&self.root.join(OPERATOR_CONFIG_FILE), &merged)
    }
}

#[async_trait]
impl AppConfigStore for DirectoryConfigStore {
    async fn app_config(&self) -> StoreResult<AppConfig> {
        app_config_from_document(&self.read_mapping_or_empty(APP_CONFIG_FILE).await?)
    }

    async fn patch_app_config(&self, patch: &Value) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        let current = self.read_mapping_or_empty(APP_CONFIG_FILE).await?;
        let next = patch_app_document(&current, patch)?;
        write_yaml(&self.root.join(APP_CONFIG_FILE), &next)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::tempdir;

    use super::*;

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(path, content).expect("write fixture");
    }

    #[tokio::test]
    async fn functional_reads_profile_index_bindings_and_documents() {
        let temp = tempdir().expect("tempdir");
        write(
            temp.path(),
            "profile.yaml",
            "current: work\nitems:\n  - id: work\n    override: [ov-a, ov-b]\n  - id: home\n",
        );
        write(temp.path(), "profiles/work.yaml", "mode: rule\nmixed-port: 7890\n");
        let store = DirectoryConfigStore::new(temp.path());

        assert_eq!(
            store.current_profile_selector().await.expect("current"),
            Some("work".to_string())
        );
        assert_eq!(
            store.profile_binding("work").await.expect("binding").overrides,
            vec!["ov-a".to_string(), "ov-b".to_string()]
        );
        assert!(store
            .profile_binding("home")
            .await
            .expect("binding")
            .overrides
            .is_empty());
        let profile = store.profile("work").await.expect("profile");
        assert_eq!(profile["mixed-port"], 7890);
        assert!(store
            .profile("home")
            .await
            .expect_err("no document")
            .is_not_found());
    }

    #[tokio::test]
    async fn functional_reads_override_items_and_content_by_kind() {
        let temp = tempdir().expect("tempdir");
        write(
            temp.path(),
            "override.yaml",
            "items:\n  - id: dns-off\n    kind: patch\n    global: true\n  - id: direct\n    kind: script\n",
        );
        write(temp.path(), "override/dns-off.yaml", "dns: {enable: false}\n");
        let store = DirectoryConfigStore::new(temp.path());

        let config = store.override_config().await.expect("override config");
        assert_eq!(
            config.global_override_ids().collect::<Vec<_>>(),
            vec!["dns-off"]
        );
        let item = store
            .override_item("direct")
            .await
            .expect("item")
            .expect("present");
        assert_eq!(item.kind, OverrideKind::Script);
        assert_eq!(
            store
                .override_content("dns-off", OverrideKind::Patch)
                .await
                .expect("content"),
            "dns: {enable: false}\n"
        );
        assert!(store
            .override_content("direct", OverrideKind::Script)
            .await
            .is_err());
        assert_eq!(
            store.override_log_path("direct").expect("log path"),
            temp.path().join("override/direct.log")
        );
    }

    #[tokio::test]
    async fn functional_operator_and_app_patches_persist_to_disk() {
        let temp = tempdir().expect("tempdir");
        write(temp.path(), "operator.yaml", "mixed-port: 7890\ntun:\n  stack: mixed\n");
        let store = DirectoryConfigStore::new(temp.path());

        store
            .patch_operator_config(&json!({"mode": "direct", "tun": {"enable": false}}))
            .await
            .expect("patch operator");
        store
            .patch_app_config(&json!({"sys_proxy": {"enable": true}}))
            .await
            .expect("patch app");

        let reopened = DirectoryConfigStore::new(temp.path());
        let operator = reopened.operator_config().await.expect("operator");
        assert_eq!(operator["mode"], "direct");
        assert_eq!(operator["tun"], json!({"stack": "mixed", "enable": false}));
        assert!(reopened.app_config().await.expect("app").sys_proxy.enable);
    }

    #[tokio::test]
    async fn regression_app_patch_preserves_unmodeled_settings() {
        let temp = tempdir().expect("tempdir");
        write(
            temp.path(),
            "app.yaml",
            "pause_ssid: [HomeWiFi]\ntheme: dark\nsys_proxy: {enable: false, host: 127.0.0.1}\n",
        );
        let store = DirectoryConfigStore::new(temp.path());

        store
            .patch_app_config(&json!({"sys_proxy": {"enable": true}}))
            .await
            .expect("patch app");

        let raw = std::fs::read_to_string(temp.path().join("app.yaml")).expect("app.yaml");
        let document: Value = serde_yaml::from_str(&raw).expect("yaml");
        assert_eq!(
            document,
            json!({
                "pause_ssid": ["HomeWiFi"],
                "theme": "dark",
                "sys_proxy": {"enable": true, "host": "127.0.0.1"}
            })
        );
        let app = store.app_config().await.expect("app");
        assert!(app.sys_proxy.enable);
        assert_eq!(app.pause_ssid, vec!["HomeWiFi".to_string()]);
    }

    #[tokio::test]
    async fn regression_ids_that_escape_the_store_root_are_rejected() {
        let temp = tempdir().expect("tempdir");
        write(temp.path(), "secret.yaml", "mode: rule\n");
        let store = DirectoryConfigStore::new(temp.path().join("state"));

        let error = store.profile("../../secret").await.expect_err("traversal");
        assert!(matches!(error, StoreError::InvalidId { .. }));
        let error = store
            .override_content("../secret", OverrideKind::Patch)
            .await
            .expect_err("traversal");
        assert!(matches!(error, StoreError::InvalidId { .. }));
        assert!(store.override_log_path("a/b").is_err());
    }

    #[tokio::test]
    async fn regression_non_mapping_profile_document_is_rejected() {
        let temp = tempdir().expect("tempdir");
        write(temp.path(), "profiles/bad.yaml", "- just\n- a list\n");
        let store = DirectoryConfigStore::new(temp.path());
        let error = store.profile("bad").await.expect_err("list document");
        assert!(matches!(error, StoreError::InvalidDocument { .. }));
    }

    #[tokio::test]
    async fn unit_missing_files_fall_back_to_defaults() {
        let temp = tempdir().expect("tempdir");
        let store = DirectoryConfigStore::new(temp.path());
        assert_eq!(store.current_profile_selector().await.expect("current"), None);
        assert!(store.override_config().await.expect("overrides").items.is_empty());
        assert!(store.operator_config().await.expect("operator").is_empty());
        assert_eq!(store.app_config().await.expect("app"), AppConfig::default());
    }
}
