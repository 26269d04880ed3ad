use std::{path::Path, sync::Arc};

use serde_json::{json, Value};
use tempfile::tempdir;
use veer_profile::{
    merge_profile, DirectoryConfigStore, OperatorConfigStore, OverrideSandbox, ProfilePipeline,
    ProfileResolver, ProfileStore, RuntimeConfigCache, ScriptSandboxLimits, WorkspaceMaterializer,
};

const ALLOC: &str = r#"
  (global $heap (mut i32) (i32.const 4096))
  (func (export "alloc") (param $len i32) (result i32)
    (local $ptr i32)
    (local.set $ptr (global.get $heap))
    (global.set $heap (i32.add (global.get $heap) (local.get $len)))
    (local.get $ptr))"#;

fn write(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    std::fs::write(path, content).expect("write fixture");
}

fn throwing_script() -> String {
    format!(
        r#"(module
  (import "console" "log" (func $log (param i32 i32)))
  (memory (export "memory") 1)
  (data (i32.const 0) "about to fail")
  {ALLOC}
  (func (export "main") (param $ptr i32) (param $len i32) (result i64)
    (call $log (i32.const 0) (i32.const 13))
    (if (i32.gt_u (local.get $len) (i32.const 0))
      (then unreachable))
    (i64.const 0))
)"#
    )
}

fn direct_mode_script() -> String {
    // Returns the 17-byte document at offset 0.
    format!(
        r#"(module
  (memory (export "memory") 1)
  (data (i32.const 0) "{{\"mode\":\"direct\"}}")
  {ALLOC}
  (func (export "main") (param i32 i32) (result i64)
    (i64.const 17))
)"#
    )
}

fn pipeline(state: &Path, store: Arc<DirectoryConfigStore>) -> ProfilePipeline {
    ProfilePipeline::new(
        ProfileResolver::new(
            store.clone(),
            store.clone(),
            store,
            OverrideSandbox::new(ScriptSandboxLimits::default()),
        ),
        WorkspaceMaterializer::new(state.join("work"), state.join("resources")),
        Arc::new(RuntimeConfigCache::new()),
    )
}

#[tokio::test]
async fn integration_throwing_script_resolves_to_base_merged_with_operator_config() {
    let temp = tempdir().expect("tempdir");
    let state = temp.path();
    write(
        state,
        "profile.yaml",
        "current: work\nitems:\n  - id: work\n    override: [explode]\n",
    );
    write(
        state,
        "profiles/work.yaml",
        "mode: rule\nlog-level: debug\ndns:\n  enable: true\nrules:\n  - MATCH,PROXY\n",
    );
    write(state, "operator.yaml", "mixed-port: 7890\ndns:\n  ipv6: false\n");
    write(state, "override.yaml", "items:\n  - id: explode\n    kind: script\n");
    write(state, "override/explode.wat", &throwing_script());
    let store = Arc::new(DirectoryConfigStore::new(state));
    let pipeline = pipeline(state, store.clone());

    let materialized = pipeline
        .resolve_and_materialize()
        .await
        .expect("resolution survives a throwing script");

    let base = store.profile("work").await.expect("base");
    let operator = store.operator_config().await.expect("operator");
    let mut expected = merge_profile(&base, &Value::Object(operator));
    expected.insert("log-level".to_string(), json!("info"));
    assert_eq!(materialized.resolved.profile, expected);

    let log = std::fs::read_to_string(state.join("override/explode.log")).expect("log");
    assert!(log.starts_with("[info] script execution started"));
    assert!(log.contains("[log] \"about to fail\""));
    assert!(log.contains("[exception] script execution failed"));

    let on_disk = std::fs::read_to_string(state.join("work/work/config.yaml")).expect("config");
    assert_eq!(on_disk, materialized.resolved.serialized);
    assert_eq!(
        pipeline.cached_config().expect("cached").profile,
        expected
    );
}

#[tokio::test]
async fn integration_global_and_bound_overrides_fold_in_order_once() {
    let temp = tempdir().expect("tempdir");
    let state = temp.path();
    write(
        state,
        "profile.yaml",
        "current: home\nitems:\n  - id: home\n    override: [direct, dns-off, direct]\n",
    );
    write(
        state,
        "profiles/home.yaml",
        "mode: rule\ndns:\n  enable: true\n  nameserver: [1.1.1.1]\n",
    );
    write(
        state,
        "override.yaml",
        "items:\n  - id: dns-off\n    kind: patch\n    global: true\n  - id: direct\n    kind: script\n",
    );
    write(
        state,
        "override/dns-off.yaml",
        "base: &base\n  enable: false\ndns:\n  <<: *base\n",
    );
    write(state, "override/direct.wat", &direct_mode_script());
    write(state, "operator.yaml", "log-level: silent\n");
    let store = Arc::new(DirectoryConfigStore::new(state));

    let resolved = pipeline(state, store)
        .resolve_and_materialize()
        .await
        .expect("resolve")
        .resolved;

    // The script replaces the whole profile after the global patch ran.
    assert_eq!(resolved.mode(), Some("direct"));
    assert!(resolved.profile.get("dns").is_none());
    assert_eq!(resolved.log_level(), Some("info"));
    assert!(std::fs::read_to_string(state.join("override/direct.log"))
        .expect("log")
        .contains("[info] script execution succeeded"));
}

#[tokio::test]
async fn integration_patch_override_turns_dns_off_and_keeps_mode() {
    let temp = tempdir().expect("tempdir");
    let state = temp.path();
    write(
        state,
        "profile.yaml",
        "current: p\nitems:\n  - id: p\n    override: [dns-off]\n",
    );
    write(state, "profiles/p.yaml", "dns:\n  enable: true\nmode: rule\n");
    write(state, "override.yaml", "items:\n  - id: dns-off\n    kind: patch\n");
    write(state, "override/dns-off.yaml", "dns:\n  enable: false\n");
    let store = Arc::new(DirectoryConfigStore::new(state));

    let resolved = pipeline(state, store)
        .resolve_and_materialize()
        .await
        .expect("resolve")
        .resolved;

    assert_eq!(resolved.profile["dns"], json!({"enable": false}));
    assert_eq!(resolved.mode(), Some("rule"));
}
