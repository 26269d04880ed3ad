//! Profile resolution pipeline for Veer.
//!
//! Merges a base profile with global and profile-bound overrides (sandboxed
//! WebAssembly scripts or YAML patches) and the operator config, writes the
//! per-profile workspace, and publishes the result in a process-wide cache.

pub mod error;
pub mod fs_store;
pub mod memory_store;
pub mod override_log;
pub mod override_sandbox;
pub mod profile_merge;
pub mod profile_pipeline;
pub mod profile_resolver;
pub mod profile_types;
pub mod runtime_config_cache;
pub mod stores;
pub mod workspace_materializer;

pub use error::{PatchParseError, ProfileError, StoreError, StoreResult};
pub use fs_store::DirectoryConfigStore;
pub use memory_store::InMemoryConfigStore;
pub use override_log::{override_log_path, OverrideLog};
pub use override_sandbox::{
    apply_patch_override, parse_patch_document, run_override_script, OverrideSandbox,
    ScriptSandboxError, ScriptSandboxLimits, SCRIPT_SANDBOX_FUEL_LIMIT_DEFAULT,
    SCRIPT_SANDBOX_MAX_RESPONSE_BYTES_DEFAULT, SCRIPT_SANDBOX_MEMORY_LIMIT_BYTES_DEFAULT,
    SCRIPT_SANDBOX_TIMEOUT_MS_DEFAULT,
};
pub use profile_merge::{merge_profile, merge_profile_layers};
pub use profile_pipeline::{MaterializedProfile, ProfilePipeline};
pub use profile_resolver::{applied_override_ids, serialize_profile, ProfileResolver};
pub use profile_types::*;
pub use runtime_config_cache::RuntimeConfigCache;
pub use stores::{AppConfigStore, OperatorConfigStore, OverrideStore, ProfileStore};
pub use workspace_materializer::{
    LinkOutcome, MaterializeReport, WorkspaceMaterializer, AUXILIARY_DATA_FILES,
};
