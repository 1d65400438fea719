//! Tag context extraction from a raw resource record, and the mapped-output
//! shape produced by resolution.

use std::collections::BTreeMap;

use serde_json::Value;

pub type TagContext = BTreeMap<String, String>;
pub type DimensionContext = BTreeMap<String, String>;

const NO_TAG_SENTINEL: &str = "no tag";
const TAG_COLUMN_PREFIX: &str = "Tag: ";

/// The result of chaining every compiled dimension against one resource.
#[derive(Debug, Clone)]
pub struct MappedResource {
    pub resource_id: String,
    pub linked_account: String,
    pub payer_account: String,
    pub dimension_context: DimensionContext,
    pub tag_context: TagContext,
    pub any_matched: bool,
}

/// Left-pads a purely-numeric AWS account id shorter than 12 digits with
/// leading zeros; anything else passes through unchanged.
#[must_use]
pub fn pad_account_id(account_id: &str) -> String {
    if !account_id.is_empty() && account_id.chars().all(|c| c.is_ascii_digit()) && account_id.len() < 12
    {
        format!("{account_id:0>12}")
    } else {
        account_id.to_string()
    }
}

/// Merges the three tag channels into one context: an array of
/// `{key, value}` objects under `customTags`; ordinal `customTagValue_N`
/// columns named via `column_map`; and `Tag: <key>` prefixed columns. Earlier
/// channels take precedence when the same key appears in more than one.
#[must_use]
pub fn extract_tag_context(resource: &Value, column_map: &BTreeMap<usize, String>) -> TagContext {
    let mut ctx = TagContext::new();

    if let Some(custom_tags) = resource.get("customTags").and_then(Value::as_array) {
        for tag in custom_tags {
            let (Some(key), Some(value)) = (
                tag.get("key").and_then(Value::as_str),
                tag.get("value").and_then(Value::as_str),
            ) else {
                continue;
            };
            insert_if_present(&mut ctx, key, value);
        }
    }

    if let Some(obj) = resource.as_object() {
        for (index, key_name) in column_map {
            let column = format!("customTagValue_{index}");
            if let Some(value) = obj.get(&column).and_then(Value::as_str) {
                insert_if_present(&mut ctx, key_name, value);
            }
        }

        for (column, value) in obj {
            if let Some(key) = column.strip_prefix(TAG_COLUMN_PREFIX) {
                if let Some(value_str) = value.as_str() {
                    insert_if_present(&mut ctx, key, value_str);
                }
            }
        }
    }

    ctx
}

fn insert_if_present(ctx: &mut TagContext, key: &str, value: &str) {
    if value.trim().is_empty() || value.eq_ignore_ascii_case(NO_TAG_SENTINEL) {
        return;
    }
    ctx.entry(key.to_string()).or_insert_with(|| value.to_string());
}

/// Builds the `customTagValue_{N+4} -> key` map for the sorted tag keys a
/// set of compiled dimensions reference. The `+4` offset reflects the wire
/// contract: the first four upstream columns are reserved.
#[must_use]
pub fn column_index_map(sorted_tag_keys: &[String]) -> BTreeMap<usize, String> {
    sorted_tag_keys
        .iter()
        .enumerate()
        .map(|(i, key)| (i + 4, key.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn pads_short_numeric_account_ids() {
        assert_eq!(pad_account_id("123"), "000000000123");
        assert_eq!(pad_account_id("123456789012"), "123456789012");
        assert_eq!(pad_account_id("abc"), "abc");
    }

    #[test]
    fn extracts_custom_tags_array() {
        let resource = json!({
            "customTags": [{"key": "env", "value": "prod"}]
        });
        let ctx = extract_tag_context(&resource, &BTreeMap::new());
        assert_eq!(ctx.get("env"), Some(&"prod".to_string()));
    }

    #[test]
    fn extracts_positional_columns_via_map() {
        let resource = json!({"customTagValue_4": "prod"});
        let mut map = BTreeMap::new();
        map.insert(4, "env".to_string());
        let ctx = extract_tag_context(&resource, &map);
        assert_eq!(ctx.get("env"), Some(&"prod".to_string()));
    }

    #[test]
    fn extracts_prefixed_columns() {
        let resource = json!({"Tag: env": "prod"});
        let ctx = extract_tag_context(&resource, &BTreeMap::new());
        assert_eq!(ctx.get("env"), Some(&"prod".to_string()));
    }

    #[test]
    fn no_tag_sentinel_is_excluded() {
        let resource = json!({
            "customTags": [{"key": "env", "value": "no tag"}]
        });
        let ctx = extract_tag_context(&resource, &BTreeMap::new());
        assert!(!ctx.contains_key("env"));
    }

    #[test]
    fn first_channel_wins_on_key_collision() {
        let resource = json!({
            "customTags": [{"key": "env", "value": "from_custom_tags"}],
            "Tag: env": "from_prefixed",
        });
        let ctx = extract_tag_context(&resource, &BTreeMap::new());
        assert_eq!(ctx.get("env"), Some(&"from_custom_tags".to_string()));
    }
}
