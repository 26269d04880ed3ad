#![no_main]

use libfuzzer_sys::fuzz_target;
use serde_json::{json, Value};
use veer_profile::{merge_profile, parse_patch_document, profile_from_value};

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    let Ok(patch) = parse_patch_document(&raw) else {
        return;
    };
    let base = profile_from_value(json!({
        "mode": "rule",
        "dns": {"enable": true, "nameserver": ["1.1.1.1"]},
        "tun": {"enable": false},
    }));
    let merged = merge_profile(&base, &patch);
    match &patch {
        Value::Object(entries) => {
            for (key, value) in entries {
                if !value.is_object() {
                    assert_eq!(merged.get(key), Some(value));
                }
            }
        }
        _ => assert_eq!(merged, base),
    }
    assert_eq!(merge_profile(&merged, &json!({})), merged);
});
