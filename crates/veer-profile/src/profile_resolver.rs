//! Layered resolution of a base profile with overrides and operator config.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;

use crate::error::ProfileError;
use crate::override_log::OverrideLog;
use crate::override_sandbox::OverrideSandbox;
use crate::profile_merge::merge_profile;
use crate::profile_types::{
    OverrideConfig, Profile, ProfileBinding, ResolvedConfig, LOG_LEVEL_FLOOR, LOG_LEVEL_KEY,
};
use crate::stores::{OperatorConfigStore, OverrideStore, ProfileStore};

/// Global override ids first, then profile-bound ids, each id kept once at its
/// first position.
pub fn applied_override_ids(config: &OverrideConfig, binding: &ProfileBinding) -> Vec<String> {
    let mut seen = HashSet::new();
    config
        .global_override_ids()
        .chain(binding.overrides.iter().map(String::as_str))
        .filter(|id| seen.insert(*id))
        .map(str::to_string)
        .collect()
}

/// Serializes a profile in the engine's YAML configuration format.
pub fn serialize_profile(profile: &Profile) -> Result<String, serde_yaml::Error> {
    serde_yaml::to_string(profile)
}

pub struct ProfileResolver {
    profiles: Arc<dyn ProfileStore>,
    overrides: Arc<dyn OverrideStore>,
    operator: Arc<dyn OperatorConfigStore>,
    sandbox: OverrideSandbox,
}

impl ProfileResolver {
    pub fn new(
        profiles: Arc<dyn ProfileStore>,
        overrides: Arc<dyn OverrideStore>,
        operator: Arc<dyn OperatorConfigStore>,
        sandbox: OverrideSandbox,
    ) -> Self {
        Self {
            profiles,
            overrides,
            operator,
            sandbox,
        }
    }

    pub fn sandbox(&self) -> &OverrideSandbox {
        &self.sandbox
    }

    /// Resolves `selector`, or the store's current profile when `None`.
    pub async fn resolve(&self, selector: Option<&str>) -> Result<ResolvedConfig, ProfileError> {
        let selector = match selector {
            Some(selector) => selector.to_string(),
            None => self
                .profiles
                .current_profile_selector()
                .await
                .map_err(|source| ProfileError::ProfileLoad {
                    selector: "<current>".to_string(),
                    source,
                })?
                .ok_or(ProfileError::NoCurrentProfile)?,
        };

        let base = self.profiles.profile(&selector).await.map_err(|source| {
            if source.is_not_found() {
                ProfileError::ProfileNotFound(selector.clone())
            } else {
                ProfileError::ProfileLoad {
                    selector: selector.clone(),
                    source,
                }
            }
        })?;
        let binding = self
            .profiles
            .profile_binding(&selector)
            .await
            .map_err(|source| ProfileError::ProfileLoad {
                selector: selector.clone(),
                source,
            })?;

        let overridden = self.apply_overrides(&selector, base, &binding).await?;

        let operator = self
            .operator
            .operator_config()
            .await
            .map_err(ProfileError::OperatorConfig)?;
        let mut profile = merge_profile(&overridden, &Value::Object(operator));
        profile.insert(
            LOG_LEVEL_KEY.to_string(),
            Value::String(LOG_LEVEL_FLOOR.to_string()),
        );

        let serialized = serialize_profile(&profile)?;
        Ok(ResolvedConfig {
            selector,
            profile,
            serialized,
        })
    }

    async fn apply_overrides(
        &self,
        selector: &str,
        base: Profile,
        binding: &ProfileBinding,
    ) -> Result<Profile, ProfileError> {
        let config = self
            .overrides
            .override_config()
            .await
            .map_err(ProfileError::OverrideConfig)?;
        let mut profile = base;
        for id in applied_override_ids(&config, binding) {
            let item = match self.overrides.override_item(&id).await {
                Ok(Some(item)) => item,
                Ok(None) => {
                    tracing::warn!(profile = selector, override_id = %id, "bound override not found; skipping");
                    continue;
                }
                Err(error) => {
                    tracing::warn!(profile = selector, override_id = %id, %error, "override item unreadable; skipping");
                    continue;
                }
            };
            let content = match self.overrides.override_content(&id, item.kind).await {
                Ok(content) => content,
                Err(error) => {
                    tracing::warn!(profile = selector, override_id = %id, %error, "override content unreadable; skipping");
                    continue;
                }
            };
            tracing::debug!(profile = selector, override_id = %id, kind = item.kind.as_str(), "applying override");
            let log = match self.overrides.override_log_path(&id) {
                Ok(path) => OverrideLog::new(path),
                Err(error) => {
                    tracing::warn!(profile = selector, override_id = %id, %error, "override log path rejected; skipping");
                    continue;
                }
            };
            profile = self.sandbox.apply(&profile, &item, &content, &log).await;
        }
        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::tempdir;

    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::error::StoreResult;
    use crate::memory_store::InMemoryConfigStore;
    use crate::override_sandbox::ScriptSandboxLimits;
    use crate::profile_types::{profile_from_value, OverrideItem, OverrideKind};

    const THROWING_SCRIPT: &str = r#"(module
  (memory (export "memory") 1)
  (func (export "alloc") (param i32) (result i32) i32.const 1024)
  (func (export "main") (param i32 i32) (result i64) unreachable)
)"#;

    struct CountingOverrides {
        inner: Arc<InMemoryConfigStore>,
        content_reads: AtomicUsize,
    }

    #[async_trait]
    impl OverrideStore for CountingOverrides {
        async fn override_config(&self) -> StoreResult<OverrideConfig> {
            self.inner.override_config().await
        }

        async fn override_item(&self, id: &str) -> StoreResult<Option<OverrideItem>> {
            self.inner.override_item(id).await
        }

        async fn override_content(&self, id: &str, kind: OverrideKind) -> StoreResult<String> {
            self.content_reads.fetch_add(1, Ordering::SeqCst);
            self.inner.override_content(id, kind).await
        }

        fn override_log_path(&self, id: &str) -> StoreResult<PathBuf> {
            self.inner.override_log_path(id)
        }
    }

    fn resolver(store: &Arc<InMemoryConfigStore>) -> ProfileResolver {
        ProfileResolver::new(
            store.clone(),
            store.clone(),
            store.clone(),
            OverrideSandbox::new(ScriptSandboxLimits::default()),
        )
    }

    fn store_in(log_dir: &std::path::Path) -> Arc<InMemoryConfigStore> {
        Arc::new(InMemoryConfigStore::with_log_dir(log_dir))
    }

    #[test]
    fn unit_applied_ids_dedupe_global_before_bound() {
        let config = OverrideConfig {
            items: vec![
                OverrideItem::new("b", OverrideKind::Patch).global(),
                OverrideItem::new("x", OverrideKind::Patch),
                OverrideItem::new("a", OverrideKind::Script).global(),
            ],
        };
        let binding = ProfileBinding {
            overrides: vec!["c".to_string(), "a".to_string(), "c".to_string()],
        };
        assert_eq!(applied_override_ids(&config, &binding), vec!["b", "a", "c"]);
    }

    #[tokio::test]
    async fn functional_override_bound_globally_and_per_profile_applies_once() {
        let temp = tempdir().expect("tempdir");
        let store = store_in(temp.path());
        store.set_current("work").await;
        store
            .insert_profile("work", profile_from_value(json!({"rules": ["MATCH,PROXY"]})))
            .await;
        store
            .insert_override(
                OverrideItem::new("prepend", OverrideKind::Patch).global(),
                "rules: [\"DOMAIN,example.com,DIRECT\", \"MATCH,PROXY\"]\n",
            )
            .await;
        store.bind_overrides("work", &["prepend"]).await;
        let overrides = Arc::new(CountingOverrides {
            inner: store.clone(),
            content_reads: AtomicUsize::new(0),
        });

        let resolved = ProfileResolver::new(
            store.clone(),
            overrides.clone(),
            store.clone(),
            OverrideSandbox::new(ScriptSandboxLimits::default()),
        )
        .resolve(None)
        .await
        .expect("resolve");

        assert_eq!(
            resolved.profile["rules"],
            json!(["DOMAIN,example.com,DIRECT", "MATCH,PROXY"])
        );
        assert_eq!(overrides.content_reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn functional_log_level_floor_beats_overrides_and_operator() {
        let temp = tempdir().expect("tempdir");
        let store = store_in(temp.path());
        store
            .insert_profile("p", profile_from_value(json!({"log-level": "debug"})))
            .await;
        store
            .insert_override(
                OverrideItem::new("quiet", OverrideKind::Patch).global(),
                "log-level: silent\n",
            )
            .await;
        store
            .set_operator_config(profile_from_value(json!({"log-level": "error"})))
            .await;

        let resolved = resolver(&store)
            .resolve(Some("p"))
            .await
            .expect("resolve");

        assert_eq!(resolved.log_level(), Some("info"));
        assert!(resolved.serialized.contains("log-level: info"));
    }

    #[tokio::test]
    async fn functional_operator_config_has_highest_precedence() {
        let temp = tempdir().expect("tempdir");
        let store = store_in(temp.path());
        store
            .insert_profile("p", profile_from_value(json!({"mode": "global", "port": 1})))
            .await;
        store
            .insert_override(
                OverrideItem::new("mode", OverrideKind::Patch).global(),
                "mode: rule\nport: 2\n",
            )
            .await;
        store
            .set_operator_config(profile_from_value(json!({"mode": "direct"})))
            .await;

        let resolved = resolver(&store)
            .resolve(Some("p"))
            .await
            .expect("resolve");

        assert_eq!(resolved.mode(), Some("direct"));
        assert_eq!(resolved.profile["port"], 2);
    }

    #[tokio::test]
    async fn regression_throwing_script_resolves_to_base_plus_operator() {
        let temp = tempdir().expect("tempdir");
        let store = store_in(temp.path());
        let base = profile_from_value(json!({"mode": "rule", "dns": {"enable": true}}));
        let operator = profile_from_value(json!({"mixed-port": 7890}));
        store.insert_profile("p", base.clone()).await;
        store.set_operator_config(operator.clone()).await;
        store
            .insert_override(
                OverrideItem::new("boom", OverrideKind::Script),
                THROWING_SCRIPT,
            )
            .await;
        store.bind_overrides("p", &["boom"]).await;

        let resolved = resolver(&store)
            .resolve(Some("p"))
            .await
            .expect("resolve");

        let mut expected = merge_profile(&base, &Value::Object(operator));
        expected.insert("log-level".to_string(), json!("info"));
        assert_eq!(resolved.profile, expected);
        let log = std::fs::read_to_string(temp.path().join("boom.log")).expect("log");
        assert!(log.contains("[exception]"));
    }

    #[tokio::test]
    async fn regression_missing_override_item_or_content_is_skipped() {
        let temp = tempdir().expect("tempdir");
        let store = store_in(temp.path());
        store
            .insert_profile("p", profile_from_value(json!({"mode": "rule"})))
            .await;
        store.bind_overrides("p", &["ghost"]).await;

        let resolved = resolver(&store)
            .resolve(Some("p"))
            .await
            .expect("resolve");

        assert_eq!(resolved.mode(), Some("rule"));
    }

    #[tokio::test]
    async fn regression_override_id_with_traversal_is_skipped() {
        let temp = tempdir().expect("tempdir");
        let store = store_in(&temp.path().join("logs"));
        store
            .insert_profile("p", profile_from_value(json!({"mode": "rule"})))
            .await;
        store
            .insert_override(
                OverrideItem::new("../escape", OverrideKind::Patch).global(),
                "mode: direct\n",
            )
            .await;

        let resolved = resolver(&store)
            .resolve(Some("p"))
            .await
            .expect("resolve");

        assert_eq!(resolved.mode(), Some("rule"));
        assert!(!temp.path().join("escape.log").exists());
    }

    #[tokio::test]
    async fn regression_missing_profile_is_fatal() {
        let temp = tempdir().expect("tempdir");
        let store = store_in(temp.path());
        let error = resolver(&store)
            .resolve(Some("absent"))
            .await
            .expect_err("missing profile");
        assert!(matches!(error, ProfileError::ProfileNotFound(selector) if selector == "absent"));

        let error = resolver(&store)
            .resolve(None)
            .await
            .expect_err("no current profile");
        assert!(matches!(error, ProfileError::NoCurrentProfile));
    }
}
