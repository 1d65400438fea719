use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::dimension_history::DimensionHistory;

/// One `match_expression` / `value_expression` pair within a dimension.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DimensionStatement {
    pub match_expression: String,
    pub value_expression: String,
}

/// The canonical, serializable body of a dimension — what gets checksummed
/// and diffed in history rows. Kept separate from the stored record so the
/// checksum can be computed before the record's id/timestamps exist.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DimensionContent {
    pub vtag_name: String,
    pub order_index: i64,
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default = "default_value")]
    pub default_value: String,
    #[serde(default = "default_source")]
    pub source: String,
    pub statements: Vec<DimensionStatement>,
}

fn default_kind() -> String {
    "TAG_MAPPING".to_string()
}
fn default_value() -> String {
    "Unallocated".to_string()
}
fn default_source() -> String {
    "TAGS".to_string()
}

impl DimensionContent {
    /// MD5 hex digest of the canonical (sorted-key, compact-separator) JSON
    /// representation, used to detect content drift between the persisted
    /// dimension and the compiled index cache.
    pub fn checksum(&self) -> Result<String, AppError> {
        let canonical = self.canonical_json()?;
        let mut hasher = Md5::new();
        hasher.update(canonical.as_bytes());
        Ok(format!("{:x}", hasher.finalize()))
    }

    fn canonical_json(&self) -> Result<String, AppError> {
        let value = serde_json::to_value(self)?;
        let sorted = sort_json_keys(value);
        serde_json::to_string(&sorted).map_err(AppError::from)
    }
}

fn sort_json_keys(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut sorted = serde_json::Map::new();
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            for key in keys {
                if let Some(v) = map.get(&key) {
                    sorted.insert(key, sort_json_keys(v.clone()));
                }
            }
            serde_json::Value::Object(sorted)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.into_iter().map(sort_json_keys).collect())
        }
        other => other,
    }
}

stored_object!(DimensionRecord, "dimension", {
    vtag_name: String,
    order_index: i64,
    kind: String,
    default_value: String,
    source: String,
    content: DimensionContent,
    statement_count: usize,
    checksum: String
});

impl DimensionRecord {
    pub fn from_content(id: String, content: DimensionContent) -> Result<Self, AppError> {
        let now = chrono::Utc::now();
        let checksum = content.checksum()?;
        Ok(DimensionRecord {
            id,
            created_at: now,
            updated_at: now,
            vtag_name: content.vtag_name.clone(),
            order_index: content.order_index,
            kind: content.kind.clone(),
            default_value: content.default_value.clone(),
            source: content.source.clone(),
            statement_count: content.statements.len(),
            checksum,
            content,
        })
    }

    /// Validates a dimension's structural shape per the DSL grammar rules:
    /// non-empty name, list of statements, each with both sub-expressions
    /// present. Parseability of the expressions themselves is checked by
    /// the rules-engine crate at compile time, not here.
    pub fn validate(content: &DimensionContent) -> Vec<String> {
        let mut errors = Vec::new();
        if content.vtag_name.trim().is_empty() {
            errors.push("vtag_name must not be empty".to_string());
        }
        if content.statements.is_empty() {
            errors.push("statements must be a non-empty list".to_string());
        }
        for (i, stmt) in content.statements.iter().enumerate() {
            if stmt.match_expression.trim().is_empty() {
                errors.push(format!("statement {i}: match_expression is empty"));
            }
            if stmt.value_expression.trim().is_empty() {
                errors.push(format!("statement {i}: value_expression is empty"));
            }
        }
        errors
    }

    /// Create, persisting a history row with `previous_content = None`.
    pub async fn create(db: &SurrealDbClient, content: DimensionContent) -> Result<Self, AppError> {
        let errors = Self::validate(&content);
        if !errors.is_empty() {
            return Err(AppError::Validation(errors.join("; ")));
        }
        let id = uuid::Uuid::new_v4().to_string();
        let record = Self::from_content(id, content)?;
        db.store_item(record.clone()).await?;
        DimensionHistory::record(db, &record.vtag_name, "create", None, &record.content).await?;
        Ok(record)
    }

    /// Update in place, appending a history row with both snapshots.
    pub async fn update(
        db: &SurrealDbClient,
        id: &str,
        content: DimensionContent,
    ) -> Result<Self, AppError> {
        let errors = Self::validate(&content);
        if !errors.is_empty() {
            return Err(AppError::Validation(errors.join("; ")));
        }
        let existing = db
            .get_item::<DimensionRecord>(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("dimension {id}")))?;
        let checksum = content.checksum()?;
        let updated = DimensionRecord {
            updated_at: chrono::Utc::now(),
            vtag_name: content.vtag_name.clone(),
            order_index: content.order_index,
            kind: content.kind.clone(),
            default_value: content.default_value.clone(),
            source: content.source.clone(),
            statement_count: content.statements.len(),
            checksum,
            content: content.clone(),
            ..existing.clone()
        };
        db.store_item(updated.clone()).await?;
        DimensionHistory::record(
            db,
            &updated.vtag_name,
            "update",
            Some(&existing.content),
            &content,
        )
        .await?;
        Ok(updated)
    }

    pub async fn delete(db: &SurrealDbClient, id: &str) -> Result<(), AppError> {
        if let Some(existing) = db.delete_item::<DimensionRecord>(id).await? {
            DimensionHistory::record(db, &existing.vtag_name, "delete", Some(&existing.content), &existing.content)
                .await?;
        }
        Ok(())
    }

    pub async fn list_ordered(db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        let mut all = db.get_all_stored_items::<DimensionRecord>().await?;
        all.sort_by_key(|d| d.order_index);
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_content() -> DimensionContent {
        DimensionContent {
            vtag_name: "environment".to_string(),
            order_index: 0,
            kind: default_kind(),
            default_value: default_value(),
            source: default_source(),
            statements: vec![DimensionStatement {
                match_expression: "TAG['env'] == 'prod'".to_string(),
                value_expression: "'Production'".to_string(),
            }],
        }
    }

    #[test]
    fn checksum_is_stable_across_reserialization() {
        let content = sample_content();
        let a = content.checksum().unwrap();
        let b = content.checksum().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn checksum_changes_with_content() {
        let mut content = sample_content();
        let a = content.checksum().unwrap();
        content.default_value = "Other".to_string();
        let b = content.checksum().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn validate_rejects_empty_statements() {
        let mut content = sample_content();
        content.statements.clear();
        let errors = DimensionRecord::validate(&content);
        assert!(errors.iter().any(|e| e.contains("non-empty")));
    }

    #[tokio::test]
    async fn create_persists_and_records_history() {
        let db = SurrealDbClient::memory("test_ns", &uuid::Uuid::new_v4().to_string())
            .await
            .unwrap();
        db.ensure_initialized().await.unwrap();

        let record = DimensionRecord::create(&db, sample_content()).await.unwrap();
        assert_eq!(record.vtag_name, "environment");

        let history = db
            .get_all_stored_items::<DimensionHistory>()
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].action, "create");
    }
}
