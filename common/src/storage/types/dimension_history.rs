use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::dimension::DimensionContent;

stored_object!(DimensionHistory, "dimension_history", {
    vtag_name: String,
    action: String,
    previous_content: Option<DimensionContent>,
    new_content: DimensionContent,
    source: String
});

impl DimensionHistory {
    pub async fn record(
        db: &SurrealDbClient,
        vtag_name: &str,
        action: &str,
        previous_content: Option<&DimensionContent>,
        new_content: &DimensionContent,
    ) -> Result<Self, AppError> {
        let now = chrono::Utc::now();
        let entry = DimensionHistory {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            vtag_name: vtag_name.to_string(),
            action: action.to_string(),
            previous_content: previous_content.cloned(),
            new_content: new_content.clone(),
            source: "engine".to_string(),
        };
        db.store_item(entry.clone()).await?;
        Ok(entry)
    }
}
