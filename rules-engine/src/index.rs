//! Compiles a persisted dimension into exact-match hash tables and ordered
//! substring lists, as described by the resolution precedence: TAG exact →
//! DIM exact → TAG contains → DIM contains → default.

use std::collections::{HashMap, HashSet};

use common::storage::types::dimension::DimensionContent;

use crate::dsl::{self, DslError, Op, Source};

#[derive(Debug, Clone)]
pub struct CompiledDimension {
    pub name: String,
    pub order_index: i64,
    pub default_value: String,
    pub tag_exact: HashMap<(String, String), String>,
    pub dim_exact: HashMap<(String, String), String>,
    pub tag_contains: Vec<(String, String, String)>,
    pub dim_contains: Vec<(String, String, String)>,
    pub tag_keys_used: HashSet<String>,
    pub dim_keys_used: HashSet<String>,
}

impl CompiledDimension {
    pub fn compile(content: &DimensionContent) -> Result<Self, DslError> {
        let mut compiled = CompiledDimension {
            name: content.vtag_name.clone(),
            order_index: content.order_index,
            default_value: content.default_value.clone(),
            tag_exact: HashMap::new(),
            dim_exact: HashMap::new(),
            tag_contains: Vec::new(),
            dim_contains: Vec::new(),
            tag_keys_used: HashSet::new(),
            dim_keys_used: HashSet::new(),
        };

        for statement in &content.statements {
            let value = dsl::parse_value_expression(&statement.value_expression)?;
            let atoms = dsl::parse_match_expression(&statement.match_expression)?;
            for atom in atoms {
                compiled.insert_atom(&atom.source, &atom.key, atom.op, &value);
            }
        }

        Ok(compiled)
    }

    fn insert_atom(&mut self, source: &Source, key: &str, op: Op, value: &str) {
        let lower_key = key.to_string();
        match (source, op) {
            (Source::Tag, Op::Eq) => {
                self.tag_keys_used.insert(lower_key.clone());
                self.tag_exact
                    .entry((lower_key, value.to_lowercase()))
                    .or_insert_with(|| value.to_string());
            }
            (Source::Dimension, Op::Eq) => {
                self.dim_keys_used.insert(lower_key.clone());
                self.dim_exact
                    .entry((lower_key, value.to_lowercase()))
                    .or_insert_with(|| value.to_string());
            }
            (Source::Tag, Op::Contains) => {
                self.tag_keys_used.insert(lower_key.clone());
                self.tag_contains
                    .push((lower_key, value.to_lowercase(), value.to_string()));
            }
            (Source::Dimension, Op::Contains) => {
                self.dim_keys_used.insert(lower_key.clone());
                self.dim_contains
                    .push((lower_key, value.to_lowercase(), value.to_string()));
            }
        }
    }
}

/// Compiles an ordered set of dimensions, returning them sorted ascending by
/// `order_index` as required by the chained-resolution invariant.
pub fn build_indexes(
    dimensions: &[DimensionContent],
) -> Result<Vec<CompiledDimension>, DslError> {
    let mut compiled: Vec<CompiledDimension> = dimensions
        .iter()
        .map(CompiledDimension::compile)
        .collect::<Result<_, _>>()?;
    compiled.sort_by_key(|d| d.order_index);
    Ok(compiled)
}

/// Every tag key referenced across all dimensions, sorted — used to build
/// the upstream column-selection list.
#[must_use]
pub fn all_tag_keys(dimensions: &[CompiledDimension]) -> Vec<String> {
    let mut keys: HashSet<String> = HashSet::new();
    for dim in dimensions {
        keys.extend(dim.tag_keys_used.iter().cloned());
    }
    let mut sorted: Vec<String> = keys.into_iter().collect();
    sorted.sort();
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::types::dimension::DimensionStatement;

    fn content(statements: Vec<(&str, &str)>) -> DimensionContent {
        DimensionContent {
            vtag_name: "environment".to_string(),
            order_index: 0,
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
        }
    }

    #[test]
    fn first_statement_wins_on_exact_collision() {
        let c = content(vec![
            ("TAG['env'] == 'prod'", "'First'"),
            ("TAG['env'] == 'prod'", "'Second'"),
        ]);
        let compiled = CompiledDimension::compile(&c).unwrap();
        let value = compiled
            .tag_exact
            .get(&("env".to_string(), "prod".to_string()))
            .unwrap();
        assert_eq!(value, "First");
    }

    #[test]
    fn contains_entries_preserve_statement_order() {
        let c = content(vec![
            ("TAG['name'] CONTAINS 'web'", "'Web'"),
            ("TAG['name'] CONTAINS 'db'", "'Database'"),
        ]);
        let compiled = CompiledDimension::compile(&c).unwrap();
        assert_eq!(compiled.tag_contains[0].2, "Web");
        assert_eq!(compiled.tag_contains[1].2, "Database");
    }

    #[test]
    fn all_tag_keys_sorted_and_deduped() {
        let c = content(vec![
            ("TAG['zeta'] == 'a'", "'A'"),
            ("TAG['alpha'] == 'b'", "'B'"),
            ("TAG['alpha'] CONTAINS 'c'", "'C'"),
        ]);
        let compiled = vec![CompiledDimension::compile(&c).unwrap()];
        assert_eq!(all_tag_keys(&compiled), vec!["alpha", "zeta"]);
    }
}
