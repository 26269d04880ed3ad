//! Contracts for the collaborators that persist profiles and overrides.

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StoreResult;
use crate::profile_types::{
    AppConfig, OverrideConfig, OverrideItem, OverrideKind, Profile, ProfileBinding,
};

#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Selector of the profile currently marked active, if any.
    async fn current_profile_selector(&self) -> StoreResult<Option<String>>;
    async fn profile(&self, selector: &str) -> StoreResult<Profile>;
    async fn profile_binding(&self, selector: &str) -> StoreResult<ProfileBinding>;
}

#[async_trait]
pub trait OverrideStore: Send + Sync {
    async fn override_config(&self) -> StoreResult<OverrideConfig>;
    async fn override_item(&self, id: &str) -> StoreResult<Option<OverrideItem>>;
    async fn override_content(&self, id: &str, kind: OverrideKind) -> StoreResult<String>;
    /// Where the log artifact for override `id` is written; ids that are not
    /// a plain file name are rejected.
    fn override_log_path(&self, id: &str) -> StoreResult<PathBuf>;
}

/// Highest-precedence configuration owned by the application itself.
#[async_trait]
pub trait OperatorConfigStore: Send + Sync {
    async fn operator_config(&self) -> StoreResult<Profile>;
    /// Deep-merges `patch` into the stored operator config.
    async fn patch_operator_config(&self, patch: &Value) -> StoreResult<()>;
}

#[async_trait]
pub trait AppConfigStore: Send + Sync {
    async fn app_config(&self) -> StoreResult<AppConfig>;
    /// Deep-merges `patch` into the stored app config.
    async fn patch_app_config(&self, patch: &Value) -> StoreResult<()>;
}
