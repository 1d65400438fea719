//! Single-flight orchestration of one sync run: resolve the requested
//! window into weekly chunks, run the tagging pipeline over each, upload
//! matched records per payer, persist the run's result, and upsert the
//! daily rollup — mirroring the source project's `sync_service` at the
//! level of one coordinator instead of three near-duplicate services.

use std::{
    collections::HashSet,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex as StdMutex,
    },
};

use chrono::{NaiveDate, Utc};
use common::{
    error::AppError,
    progress::{Broadcaster, RunState},
    storage::{
        db::SurrealDbClient,
        types::{
            daily_rollup::{DailyRollup, RollupDelta},
            dimension::DimensionRecord,
        },
    },
};
use rules_engine::build_indexes;
use tagging_pipeline::{
    pipeline::{RunCounters, TaggingConfig, TaggingRunRequest},
    TaggingPipeline,
};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use upstream_client::{FilterMode, UmbrellaClient};

use crate::{
    dates::{format_date, month_range, slice_into_weeks, week_range},
    persistence::{append_upload_history, read_last_result, write_last_result, LastSyncResult},
    upload::run_upload_phase,
};

/// The four sync kinds the control plane can request. `Range` and `Month`
/// both chunk into weekly windows via `slice_into_weeks`; `Week` resolves to
/// a single such window already, so the same chunking path covers all three
/// non-simulation modes uniformly. `Simulation` runs the identical pipeline
/// but skips the upload phase — a dry run.
#[derive(Debug, Clone)]
pub enum SyncMode {
    Week { year: i32, week: u32 },
    Month { year: i32, month: u32 },
    Range { start: NaiveDate, end: NaiveDate },
    Simulation { start: NaiveDate, end: NaiveDate },
}

impl SyncMode {
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            SyncMode::Week { .. } => "week",
            SyncMode::Month { .. } => "month",
            SyncMode::Range { .. } => "range",
            SyncMode::Simulation { .. } => "simulation",
        }
    }

    fn resolve(&self) -> Result<(NaiveDate, NaiveDate), AppError> {
        match *self {
            SyncMode::Week { year, week } => week_range(year, week),
            SyncMode::Month { year, month } => month_range(year, month),
            SyncMode::Range { start, end } | SyncMode::Simulation { start, end } => Ok((start, end)),
        }
    }

    #[must_use]
    pub fn is_simulation(&self) -> bool {
        matches!(self, SyncMode::Simulation { .. })
    }
}

/// Caller-supplied knobs for a single run, independent of which `SyncMode`
/// resolved the date window.
#[derive(Debug, Clone, Default)]
pub struct SyncRequest {
    pub account_keys: Vec<String>,
    pub dimension_subset: Option<HashSet<String>>,
    pub filter_mode: FilterMode,
    /// Bypasses `account_keys` and runs against every configured account
    /// (aggregate and individual) instead.
    pub force_all: bool,
}

pub type SyncOutcome = LastSyncResult;

/// Owns the process-wide single-flight lock plus the cancellation token for
/// whichever run currently holds it. One `SyncCoordinator` per process.
pub struct SyncCoordinator {
    running: AtomicBool,
    cancel: StdMutex<Option<CancellationToken>>,
    broadcaster: Arc<Broadcaster>,
    client: Arc<UmbrellaClient>,
    db: Arc<SurrealDbClient>,
    output_dir: PathBuf,
}

impl SyncCoordinator {
    #[must_use]
    pub fn new(
        client: Arc<UmbrellaClient>,
        db: Arc<SurrealDbClient>,
        broadcaster: Arc<Broadcaster>,
        output_dir: PathBuf,
    ) -> Arc<Self> {
        Arc::new(SyncCoordinator {
            running: AtomicBool::new(false),
            cancel: StdMutex::new(None),
            broadcaster,
            client,
            db,
            output_dir,
        })
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Synchronously flips the single-flight flag before any `await` point,
    /// so a second caller arriving while a run is active gets
    /// `AppError::Conflict` immediately rather than queueing behind it.
    fn mark_starting(&self) -> Result<CancellationToken, AppError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(AppError::Conflict);
        }
        let token = CancellationToken::new();
        if let Ok(mut guard) = self.cancel.lock() {
            *guard = Some(token.clone());
        }
        Ok(token)
    }

    fn clear_running(&self) {
        if let Ok(mut guard) = self.cancel.lock() {
            *guard = None;
        }
        self.running.store(false, Ordering::SeqCst);
    }

    /// Cancels the current run, if any. A no-op when idle — cancelling
    /// nothing is not an error.
    pub fn cancel(&self) {
        if let Ok(guard) = self.cancel.lock() {
            if let Some(token) = guard.as_ref() {
                token.cancel();
            }
        }
    }

    /// The merged progress view: the live broadcaster snapshot if a run is
    /// active, otherwise the persisted result of the last completed run.
    pub async fn last_result(&self) -> Option<LastSyncResult> {
        read_last_result(&self.output_dir).await.ok().flatten()
    }

    /// Runs a sync to completion, awaiting the result in-process.
    pub async fn run(&self, mode: SyncMode, request: SyncRequest) -> Result<SyncOutcome, AppError> {
        let cancel = self.mark_starting()?;
        self.run_claimed(mode, request, cancel).await
    }

    /// Claims the single-flight slot synchronously, then runs the sync on a
    /// detached task. The `AppError::Conflict` check happens before this
    /// method returns, so a caller on the control plane can surface 409
    /// immediately without waiting on the run itself.
    pub fn spawn(self: &Arc<Self>, mode: SyncMode, request: SyncRequest) -> Result<(), AppError> {
        let cancel = self.mark_starting()?;
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            let _ = coordinator.run_claimed(mode, request, cancel).await;
        });
        Ok(())
    }

    async fn run_claimed(
        &self,
        mode: SyncMode,
        request: SyncRequest,
        cancel: CancellationToken,
    ) -> Result<SyncOutcome, AppError> {
        self.broadcaster.set_state(RunState::Starting).await;
        let started_at = Utc::now();

        let outcome = self.run_inner(&mode, &request, cancel).await;
        self.clear_running();

        match outcome {
            Ok(result) => {
                let state = if result.status == "cancelled" {
                    RunState::Cancelled
                } else {
                    RunState::Complete
                };
                self.broadcaster.set_state(state).await;
                Ok(result)
            }
            Err(err) => {
                self.broadcaster.set_error(err.to_string()).await;
                let (start, end) = mode.resolve().unwrap_or((started_at.date_naive(), started_at.date_naive()));
                let error_result = LastSyncResult {
                    status: "error".to_string(),
                    sync_type: mode.label().to_string(),
                    start_date: format_date(start),
                    end_date: format_date(end),
                    total_resources: 0,
                    matched_resources: 0,
                    unmatched_resources: 0,
                    account_errors: 0,
                    uploads: Vec::new(),
                    error_message: Some(err.to_string()),
                    started_at,
                    completed_at: Utc::now(),
                };
                let _ = write_last_result(&self.output_dir, &error_result).await;
                Err(err)
            }
        }
    }

    async fn run_inner(
        &self,
        mode: &SyncMode,
        request: &SyncRequest,
        cancel: CancellationToken,
    ) -> Result<SyncOutcome, AppError> {
        let started_at = Utc::now();
        let (start, end) = mode.resolve()?;
        let chunks = slice_into_weeks(start, end);

        self.broadcaster.set_state(RunState::Authenticating).await;
        self.broadcaster.set_state(RunState::FetchingAccounts).await;
        let accounts = self.client.list_accounts().await?;

        let account_keys: Vec<String> = if request.force_all || request.account_keys.is_empty() {
            accounts
                .individual
                .iter()
                .chain(accounts.aggregate.iter())
                .map(|a| a.account_key.clone())
                .filter(|k| !k.is_empty())
                .collect()
        } else {
            request.account_keys.clone()
        };

        let dimension_records = DimensionRecord::list_ordered(&self.db).await?;
        let contents: Vec<_> = dimension_records.iter().map(|d| d.content.clone()).collect();
        let compiled = build_indexes(&contents)
            .map_err(|e| AppError::Validation(format!("dimension compilation failed: {e}")))?;

        self.broadcaster.set_total_steps(u32::try_from(chunks.len()).unwrap_or(u32::MAX)).await;
        self.broadcaster.set_state(RunState::Mapping).await;

        let run_root = self.output_dir.join("runs").join(uuid::Uuid::new_v4().to_string());
        tokio::fs::create_dir_all(&run_root).await?;
        let combined_jsonl = run_root.join("combined.jsonl");

        let pipeline = TaggingPipeline::new(self.client.clone(), TaggingConfig::default());
        let mut total_counters = RunCounters::default();
        let mut cancelled = false;

        {
            let mut combined_writer = tokio::fs::File::create(&combined_jsonl).await?;

            for (chunk_start, chunk_end) in &chunks {
                if cancel.is_cancelled() {
                    cancelled = true;
                    break;
                }

                let run_request = TaggingRunRequest {
                    account_keys: account_keys.clone(),
                    start_date: format_date(*chunk_start),
                    end_date: format_date(*chunk_end),
                    filter_mode: request.filter_mode,
                    dimension_subset: request.dimension_subset.clone(),
                    output_dir: run_root.to_string_lossy().into_owned(),
                };

                let chunk_outcome = pipeline
                    .run(&run_request, &compiled, cancel.clone(), Some(self.broadcaster.clone()))
                    .await?;

                merge_counters(&mut total_counters, &chunk_outcome.counters);

                let chunk_bytes = tokio::fs::read(&chunk_outcome.jsonl_path).await?;
                combined_writer.write_all(&chunk_bytes).await?;
                tokio::fs::remove_file(&chunk_outcome.jsonl_path).await.ok();
                if let Some(csv_path) = &chunk_outcome.csv_path {
                    tokio::fs::remove_file(csv_path).await.ok();
                }

                self.broadcaster.increment_step().await;

                if chunk_outcome.cancelled {
                    cancelled = true;
                    break;
                }
            }

            combined_writer.flush().await?;
        }

        if cancelled {
            tokio::fs::remove_dir_all(&run_root).await.ok();
            return Ok(LastSyncResult {
                status: "cancelled".to_string(),
                sync_type: mode.label().to_string(),
                start_date: format_date(start),
                end_date: format_date(end),
                total_resources: total_counters.total_resources,
                matched_resources: total_counters.matched_resources,
                unmatched_resources: total_counters.unmatched_resources,
                account_errors: total_counters.account_errors,
                uploads: Vec::new(),
                error_message: None,
                started_at,
                completed_at: Utc::now(),
            });
        }

        let uploads = if mode.is_simulation() {
            Vec::new()
        } else {
            self.broadcaster.set_state(RunState::Writing).await;
            run_upload_phase(&self.db, &self.client, &accounts, &combined_jsonl).await?
        };

        tokio::fs::remove_dir_all(&run_root).await.ok();

        let result = LastSyncResult {
            status: "complete".to_string(),
            sync_type: mode.label().to_string(),
            start_date: format_date(start),
            end_date: format_date(end),
            total_resources: total_counters.total_resources,
            matched_resources: total_counters.matched_resources,
            unmatched_resources: total_counters.unmatched_resources,
            account_errors: total_counters.account_errors,
            uploads,
            error_message: None,
            started_at,
            completed_at: Utc::now(),
        };

        write_last_result(&self.output_dir, &result).await?;
        append_upload_history(&self.output_dir, &result.uploads).await?;

        let delta = RollupDelta {
            total_statements: i64::try_from(total_counters.total_resources).unwrap_or(i64::MAX),
            tagged_statements: i64::try_from(total_counters.matched_resources).unwrap_or(i64::MAX),
            dimension_matches: i64::try_from(total_counters.per_dimension_matches.values().sum::<u64>())
                .unwrap_or(i64::MAX),
            unmatched_statements: i64::try_from(total_counters.unmatched_resources).unwrap_or(i64::MAX),
            had_error: total_counters.account_errors > 0,
        };
        let stat_date = Utc::now().date_naive().to_string();
        if let Err(err) = DailyRollup::upsert(&self.db, &stat_date, &delta).await {
            warn!(error = %err, "failed to upsert daily rollup");
        }

        Ok(result)
    }
}

fn merge_counters(total: &mut RunCounters, part: &RunCounters) {
    total.total_resources = total.total_resources.saturating_add(part.total_resources);
    total.matched_resources = total.matched_resources.saturating_add(part.matched_resources);
    total.unmatched_resources = total.unmatched_resources.saturating_add(part.unmatched_resources);
    total.account_errors = total.account_errors.saturating_add(part.account_errors);
    for (key, value) in &part.per_dimension_matches {
        let entry = total.per_dimension_matches.entry(key.clone()).or_insert(0);
        *entry = entry.saturating_add(*value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_labels_match_control_plane_vocabulary() {
        assert_eq!(SyncMode::Week { year: 2026, week: 1 }.label(), "week");
        assert_eq!(SyncMode::Month { year: 2026, month: 1 }.label(), "month");
        let day = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        assert_eq!(SyncMode::Range { start: day, end: day }.label(), "range");
        assert_eq!(SyncMode::Simulation { start: day, end: day }.label(), "simulation");
    }

    #[test]
    fn only_simulation_reports_is_simulation() {
        let day = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        assert!(SyncMode::Simulation { start: day, end: day }.is_simulation());
        assert!(!SyncMode::Range { start: day, end: day }.is_simulation());
    }

    #[test]
    fn merge_counters_sums_every_field() {
        let mut total = RunCounters::default();
        total.total_resources = 5;
        total.per_dimension_matches.insert("environment".to_string(), 2);

        let mut part = RunCounters::default();
        part.total_resources = 3;
        part.matched_resources = 1;
        part.per_dimension_matches.insert("environment".to_string(), 1);
        part.per_dimension_matches.insert("team".to_string(), 4);

        merge_counters(&mut total, &part);

        assert_eq!(total.total_resources, 8);
        assert_eq!(total.matched_resources, 1);
        assert_eq!(total.per_dimension_matches["environment"], 3);
        assert_eq!(total.per_dimension_matches["team"], 4);
    }
}
