//! Profile, override, and resolved-config data types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Top-level key pinned to [`LOG_LEVEL_FLOOR`] after every resolution.
pub const LOG_LEVEL_KEY: &str = "log-level";
/// Minimum log verbosity the engine always runs with.
pub const LOG_LEVEL_FLOOR: &str = "info";
pub const MODE_KEY: &str = "mode";
pub const DNS_KEY: &str = "dns";
pub const TUN_KEY: &str = "tun";

/// Nested engine configuration tree keyed by top-level option name.
pub type Profile = Map<String, Value>;

/// Execution kind of an override unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideKind {
    /// WebAssembly text module evaluated in the script sandbox.
    Script,
    /// YAML document deep-merged into the profile.
    Patch,
}

impl OverrideKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Script => "script",
            Self::Patch => "patch",
        }
    }

    /// File extension used when override content is stored on disk.
    pub fn file_extension(self) -> &'static str {
        match self {
            Self::Script => "wat",
            Self::Patch => "yaml",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideItem {
    pub id: String,
    pub kind: OverrideKind,
    #[serde(default)]
    pub global: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl OverrideItem {
    pub fn new(id: impl Into<String>, kind: OverrideKind) -> Self {
        Self {
            id: id.into(),
            kind,
            global: false,
            name: None,
        }
    }

    pub fn global(mut self) -> Self {
        self.global = true;
        self
    }
}

/// Enumerates known overrides; item order is not evaluation order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideConfig {
    #[serde(default)]
    pub items: Vec<OverrideItem>,
}

impl OverrideConfig {
    pub fn global_override_ids(&self) -> impl Iterator<Item = &str> {
        self.items
            .iter()
            .filter(|item| item.global)
            .map(|item| item.id.as_str())
    }
}

/// Overrides explicitly attached to a single profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileBinding {
    #[serde(default, rename = "override")]
    pub overrides: Vec<String>,
}

/// Output of one successful resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub selector: String,
    pub profile: Profile,
    pub serialized: String,
}

impl ResolvedConfig {
    pub fn mode(&self) -> Option<&str> {
        self.profile.get(MODE_KEY).and_then(Value::as_str)
    }

    pub fn log_level(&self) -> Option<&str> {
        self.profile.get(LOG_LEVEL_KEY).and_then(Value::as_str)
    }
}

/// Application settings read by the network reconciler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub pause_ssid: Vec<String>,
    #[serde(default)]
    pub sys_proxy: SysProxyConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SysProxyConfig {
    #[serde(default)]
    pub enable: bool,
}

/// Interprets a JSON value as a profile, treating anything but a mapping as empty.
pub fn profile_from_value(value: Value) -> Profile {
    match value {
        Value::Object(map) => map,
        _ => Profile::new(),
    }
}
