use std::{collections::HashMap, path::PathBuf, sync::Arc};

use common::{error::AppError, progress::Broadcaster};
use rules_engine::{context::TagContext, index::CompiledDimension};
use serde::{Deserialize, Serialize};
use tokio::{
    fs::File,
    io::{AsyncWriteExt, BufWriter},
};
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::reservoir::ReservoirSampler;

use super::config::{TaggingConfig, TaggingRunRequest, SAMPLE_SIZE};

/// One line of the JSONL spill — the durable record of every matched
/// resource for this run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonlRecord {
    pub resourceid: String,
    pub linkedaccid: String,
    pub payeraccount: String,
    pub dimensions: HashMap<String, String>,
    pub tags: TagContext,
}

#[derive(Debug, Clone, Default)]
pub struct RunCounters {
    pub total_resources: u64,
    pub matched_resources: u64,
    pub unmatched_resources: u64,
    pub per_dimension_matches: HashMap<String, u64>,
    pub account_errors: u64,
}

pub struct PipelineContext<'a> {
    pub request: &'a TaggingRunRequest,
    pub dimensions: &'a [CompiledDimension],
    pub config: &'a TaggingConfig,
    pub cancel: CancellationToken,
    pub broadcaster: Option<Arc<Broadcaster>>,
    pub counters: RunCounters,
    pub reservoir: ReservoirSampler<JsonlRecord>,
    pub jsonl_path: PathBuf,
    writer: Option<BufWriter<File>>,
    records_emitted: usize,
}

impl<'a> PipelineContext<'a> {
    pub fn new(
        request: &'a TaggingRunRequest,
        dimensions: &'a [CompiledDimension],
        config: &'a TaggingConfig,
        cancel: CancellationToken,
        broadcaster: Option<Arc<Broadcaster>>,
    ) -> Self {
        let jsonl_path = PathBuf::from(&request.output_dir).join(jsonl_file_name());
        PipelineContext {
            request,
            dimensions,
            config,
            cancel,
            broadcaster,
            counters: RunCounters::default(),
            reservoir: ReservoirSampler::new(SAMPLE_SIZE),
            jsonl_path,
            writer: None,
            records_emitted: 0,
        }
    }

    pub async fn open_writer(&mut self) -> Result<(), AppError> {
        let file = File::create(&self.jsonl_path).await?;
        self.writer = Some(BufWriter::new(file));
        Ok(())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn reached_ceiling(&self) -> bool {
        self.request_max_records()
            .is_some_and(|max| self.counters.total_resources >= max as u64)
    }

    fn request_max_records(&self) -> Option<usize> {
        self.config.tuning.max_records
    }

    /// Writes one matched record to the JSONL spill and feeds the reservoir.
    pub async fn emit_matched(&mut self, record: JsonlRecord) -> Result<(), AppError> {
        let line = serde_json::to_string(&record)?;
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| AppError::InternalError("jsonl writer not opened".into()))?;
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        self.reservoir.offer(record);
        self.records_emitted = self.records_emitted.saturating_add(1);
        Ok(())
    }

    pub async fn flush_writer(&mut self) -> Result<(), AppError> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush().await?;
        }
        Ok(())
    }

    /// Pushes an account-level progress update, if a broadcaster is wired.
    pub async fn report_account_progress(&self, accounts_done: usize, accounts_total: usize) {
        let Some(broadcaster) = &self.broadcaster else {
            return;
        };
        let pct = if accounts_total == 0 {
            100.0
        } else {
            100.0 * accounts_done as f64 / accounts_total as f64
        };
        broadcaster
            .set_sub_progress(pct, format!("{accounts_done}/{accounts_total} accounts processed"))
            .await;
        broadcaster
            .set_stat("total_resources", self.counters.total_resources)
            .await;
        broadcaster
            .set_stat("matched_resources", self.counters.matched_resources)
            .await;
        broadcaster
            .set_stat("unmatched_resources", self.counters.unmatched_resources)
            .await;
    }

    pub fn abort(&mut self, err: AppError) -> AppError {
        error!(
            account_keys = ?self.request.account_keys,
            error = %err,
            "tagging pipeline aborted"
        );
        err
    }
}

fn jsonl_file_name() -> String {
    format!("tagging-run-{}.jsonl", uuid::Uuid::new_v4())
}
