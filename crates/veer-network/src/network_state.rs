use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyMode {
    /// Paused: traffic bypasses the proxy rules.
    Direct,
    Rule,
}

impl ProxyMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Rule => "rule",
        }
    }

    pub fn for_identity(identity: Option<&str>, pause_list: &[String]) -> Self {
        match identity {
            Some(identity) if pause_list.iter().any(|paused| paused == identity) => Self::Direct,
            _ => Self::Rule,
        }
    }
}

/// Reconciler-owned view of the network attachment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkState {
    pub last_identity: Option<String>,
    pub pause_list: Vec<String>,
    /// `None` until the first transition.
    pub mode: Option<ProxyMode>,
    pub last_transition_unix_ms: Option<u64>,
}

impl NetworkState {
    /// Records `identity` and reports whether it differs from the last one seen.
    pub fn observe(&mut self, identity: Option<String>) -> bool {
        if self.last_identity == identity {
            return false;
        }
        self.last_identity = identity;
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    PauseListEmpty,
    Unchanged,
    Transitioned {
        mode: ProxyMode,
        identity: Option<String>,
    },
}
