//! Process-wide holder of the last resolved configuration.
//!
//! Writers replace the whole `ResolvedConfig` atomically; readers get a
//! cheap `Arc` snapshot and never observe a half-built value.

use std::sync::Arc;

use arc_swap::ArcSwapOption;

use crate::profile_types::ResolvedConfig;

#[derive(Debug, Default)]
pub struct RuntimeConfigCache {
    current: ArcSwapOption<ResolvedConfig>,
}

impl RuntimeConfigCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the last stored config; `None` before the first resolution.
    pub fn load(&self) -> Option<Arc<ResolvedConfig>> {
        self.current.load_full()
    }

    pub fn serialized(&self) -> Option<String> {
        self.load().map(|resolved| resolved.serialized.clone())
    }

    pub(crate) fn replace(&self, resolved: Arc<ResolvedConfig>) {
        self.current.store(Some(resolved));
    }
}
