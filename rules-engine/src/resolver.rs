//! Single-dimension and chained resolution — the system's core evaluator.
//! Total functions: every resource always receives a value for every
//! dimension, because compiled dimensions always carry a default.

use crate::context::{DimensionContext, MappedResource, TagContext};
use crate::index::CompiledDimension;

/// Resolves one dimension against a tag context and the dimension context
/// accumulated so far: TAG exact -> DIM exact -> TAG contains -> DIM
/// contains -> default, first hit wins.
#[must_use]
pub fn resolve(dim: &CompiledDimension, tag_ctx: &TagContext, dim_ctx: &DimensionContext) -> String {
    for (key, value) in tag_ctx {
        if value.is_empty() {
            continue;
        }
        if let Some(hit) = dim.tag_exact.get(&(key.clone(), value.to_lowercase())) {
            return hit.clone();
        }
    }
    for (key, value) in dim_ctx {
        if value.is_empty() {
            continue;
        }
        if let Some(hit) = dim.dim_exact.get(&(key.clone(), value.to_lowercase())) {
            return hit.clone();
        }
    }
    for (key, value) in tag_ctx {
        let lower = value.to_lowercase();
        for (ckey, substr, result) in &dim.tag_contains {
            if ckey == key && lower.contains(substr.as_str()) {
                return result.clone();
            }
        }
    }
    for (key, value) in dim_ctx {
        let lower = value.to_lowercase();
        for (ckey, substr, result) in &dim.dim_contains {
            if ckey == key && lower.contains(substr.as_str()) {
                return result.clone();
            }
        }
    }
    dim.default_value.clone()
}

/// Chains every compiled dimension in ascending `order_index` order,
/// threading the partial dimension context into each subsequent resolution.
#[must_use]
pub fn map_resource(
    dimensions: &[CompiledDimension],
    resource_id: String,
    linked_account: String,
    payer_account: String,
    tag_context: TagContext,
) -> MappedResource {
    let mut dimension_context = DimensionContext::new();
    let mut any_matched = false;

    for dim in dimensions {
        let value = resolve(dim, &tag_context, &dimension_context);
        if value != dim.default_value {
            any_matched = true;
        }
        dimension_context.insert(dim.name.clone(), value);
    }

    MappedResource {
        resource_id,
        linked_account,
        payer_account,
        dimension_context,
        tag_context,
        any_matched,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::types::dimension::{DimensionContent, DimensionStatement};

    fn dim(name: &str, order: i64, statements: Vec<(&str, &str)>) -> CompiledDimension {
        let content = DimensionContent {
            vtag_name: name.to_string(),
            order_index: order,
            kind: "TAG_MAPPING".to_string(),
            default_value: "Unallocated".to_string(),
            source: "TAGS".to_string(),
            statements: statements
                .into_iter()
                .map(|(m, v)| DimensionStatement {
                    match_expression: m.to_string(),
                    value_expression: v.to_string(),
                })
                .collect(),
        };
        CompiledDimension::compile(&content).unwrap()
    }

    #[test]
    fn exact_tag_match_beats_contains() {
        let d = dim(
            "env",
            0,
            vec![
                ("TAG['env'] CONTAINS 'pro'", "'Wrong'"),
                ("TAG['env'] == 'prod'", "'Production'"),
            ],
        );
        let mut tag_ctx = TagContext::new();
        tag_ctx.insert("env".to_string(), "prod".to_string());
        let value = resolve(&d, &tag_ctx, &DimensionContext::new());
        assert_eq!(value, "Production");
    }

    #[test]
    fn falls_back_to_default_when_nothing_matches() {
        let d = dim("env", 0, vec![("TAG['env'] == 'prod'", "'Production'")]);
        let tag_ctx = TagContext::new();
        let value = resolve(&d, &tag_ctx, &DimensionContext::new());
        assert_eq!(value, "Unallocated");
    }

    #[test]
    fn later_dimension_can_reference_earlier_dimension_context() {
        let billing = dim("team", 0, vec![("TAG['team'] == 'platform'", "'Platform'")]);
        let tier = dim(
            "tier",
            1,
            vec![("DIMENSION['team'] == 'Platform'", "'Tier1'")],
        );
        let mut tag_ctx = TagContext::new();
        tag_ctx.insert("team".to_string(), "platform".to_string());

        let mapped = map_resource(
            &[billing, tier],
            "r-1".to_string(),
            "acct".to_string(),
            "payer".to_string(),
            tag_ctx,
        );
        assert_eq!(mapped.dimension_context.get("team").unwrap(), "Platform");
        assert_eq!(mapped.dimension_context.get("tier").unwrap(), "Tier1");
        assert!(mapped.any_matched);
    }

    #[test]
    fn any_matched_false_when_all_defaults() {
        let d = dim("env", 0, vec![("TAG['env'] == 'prod'", "'Production'")]);
        let mapped = map_resource(
            &[d],
            "r-1".to_string(),
            "acct".to_string(),
            "payer".to_string(),
            TagContext::new(),
        );
        assert!(!mapped.any_matched);
    }
}
