//! Deep merge of configuration trees.
//!
//! - Mappings: merged key by key, recursively
//! - Sequences: replaced wholesale
//! - Scalars and null: patch wins

use serde_json::Value;

use crate::profile_types::Profile;

/// Merges `patch` over `base` and returns a freshly allocated profile.
///
/// Neither input is modified and the output shares no structure with them.
/// A non-mapping `patch` is treated as an empty patch.
pub fn merge_profile(base: &Profile, patch: &Value) -> Profile {
    match patch {
        Value::Object(patch_map) => merge_maps(base, patch_map),
        _ => base.clone(),
    }
}

fn merge_maps(base: &Profile, patch: &Profile) -> Profile {
    let mut merged = base.clone();
    for (key, patch_value) in patch {
        let value = match (base.get(key), patch_value) {
            (Some(Value::Object(base_child)), Value::Object(patch_child)) => {
                Value::Object(merge_maps(base_child, patch_child))
            }
            _ => patch_value.clone(),
        };
        merged.insert(key.clone(), value);
    }
    merged
}

/// Folds patches left to right over `base`; later patches take precedence.
pub fn merge_profile_layers<'a>(
    base: &Profile,
    patches: impl IntoIterator<Item = &'a Value>,
) -> Profile {
    patches
        .into_iter()
        .fold(base.clone(), |current, patch| merge_profile(&current, patch))
}
