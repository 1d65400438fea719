use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(DailyRollup, "daily_rollup", {
    stat_date: String,
    total_statements: i64,
    tagged_statements: i64,
    dimension_matches: i64,
    unmatched_statements: i64,
    match_rate: f64,
    api_calls: i64,
    errors: i64
});

/// Per-run increment applied to a day's rollup row.
#[derive(Debug, Clone, Default)]
pub struct RollupDelta {
    pub total_statements: i64,
    pub tagged_statements: i64,
    pub dimension_matches: i64,
    pub unmatched_statements: i64,
    pub had_error: bool,
}

impl DailyRollup {
    /// Upsert the rollup row for `stat_date`: additive accumulation on an
    /// existing row, or a fresh insert, mirroring the source project's
    /// `_update_daily_stats` SELECT-then-UPDATE-or-INSERT pattern.
    pub async fn upsert(
        db: &SurrealDbClient,
        stat_date: &str,
        delta: &RollupDelta,
    ) -> Result<Self, AppError> {
        let existing: Vec<DailyRollup> = db
            .client
            .query("SELECT * FROM daily_rollup WHERE stat_date = $date")
            .bind(("date", stat_date.to_string()))
            .await?
            .take(0)?;

        let now = chrono::Utc::now();
        let record = if let Some(prev) = existing.into_iter().next() {
            let total = prev.total_statements + delta.total_statements;
            let tagged = prev.tagged_statements + delta.tagged_statements;
            let match_rate = if total > 0 {
                f64::from(u32::try_from(tagged).unwrap_or(0))
                    / f64::from(u32::try_from(total).unwrap_or(1))
            } else {
                0.0
            };
            DailyRollup {
                updated_at: now,
                total_statements: total,
                tagged_statements: tagged,
                dimension_matches: prev.dimension_matches + delta.dimension_matches,
                unmatched_statements: prev.unmatched_statements + delta.unmatched_statements,
                match_rate,
                api_calls: prev.api_calls + 1,
                errors: prev.errors + i64::from(delta.had_error),
                ..prev
            }
        } else {
            let match_rate = if delta.total_statements > 0 {
                f64::from(u32::try_from(delta.tagged_statements).unwrap_or(0))
                    / f64::from(u32::try_from(delta.total_statements).unwrap_or(1))
            } else {
                0.0
            };
            DailyRollup {
                id: uuid::Uuid::new_v4().to_string(),
                created_at: now,
                updated_at: now,
                stat_date: stat_date.to_string(),
                total_statements: delta.total_statements,
                tagged_statements: delta.tagged_statements,
                dimension_matches: delta.dimension_matches,
                unmatched_statements: delta.unmatched_statements,
                match_rate,
                api_calls: 1,
                errors: i64::from(delta.had_error),
            }
        };

        db.store_item(record.clone()).await?;
        Ok(record)
    }
}
