mod config;
mod context;
mod state;
mod stages;

pub use config::{TaggingConfig, TaggingRunRequest, TaggingTuning, SAMPLE_SIZE};
pub use context::{JsonlRecord, RunCounters};

use std::sync::Arc;

use common::{error::AppError, progress::Broadcaster};
use rules_engine::CompiledDimension;
use state_machines::core::GuardError;
use tokio_util::sync::CancellationToken;
use tracing::info;
use upstream_client::UmbrellaClient;

use self::{context::PipelineContext, state::ready};

/// A single run's output: the JSONL spill path, the generated CSV path (if
/// the run reached that stage), the final counters, and the reservoir
/// preview sample.
pub struct TaggingRunOutcome {
    pub jsonl_path: std::path::PathBuf,
    pub csv_path: Option<std::path::PathBuf>,
    pub counters: RunCounters,
    pub sample: Vec<JsonlRecord>,
    pub cancelled: bool,
}

#[allow(clippy::module_name_repetitions)]
pub struct TaggingPipeline {
    client: Arc<UmbrellaClient>,
    config: TaggingConfig,
}

impl TaggingPipeline {
    #[must_use]
    pub fn new(client: Arc<UmbrellaClient>, config: TaggingConfig) -> Self {
        Self { client, config }
    }

    /// Runs one tagging pass: fetch+map every requested account, spill
    /// matches to JSONL, then generate the pipeline CSV — unless cancelled
    /// first, in which case CSV generation is skipped.
    pub async fn run(
        &self,
        request: &TaggingRunRequest,
        dimensions: &[CompiledDimension],
        cancel: CancellationToken,
        broadcaster: Option<Arc<Broadcaster>>,
    ) -> Result<TaggingRunOutcome, AppError> {
        let mut ctx = PipelineContext::new(request, dimensions, &self.config, cancel, broadcaster);
        let machine = ready();

        ctx.open_writer().await.map_err(|err| ctx.abort(err))?;

        let machine = machine
            .begin()
            .map_err(|(_, guard)| map_guard_error("begin", &guard))?;

        stages::process_accounts(&mut ctx, &self.client)
            .await
            .map_err(|err| ctx.abort(err))?;

        ctx.flush_writer().await.map_err(|err| ctx.abort(err))?;

        info!(
            total = ctx.counters.total_resources,
            matched = ctx.counters.matched_resources,
            unmatched = ctx.counters.unmatched_resources,
            account_errors = ctx.counters.account_errors,
            cancelled = ctx.is_cancelled(),
            "tagging pipeline finished account processing"
        );

        if ctx.is_cancelled() {
            let _ = machine
                .cancel()
                .map_err(|(_, guard)| map_guard_error("cancel", &guard))?;
            return Ok(TaggingRunOutcome {
                jsonl_path: ctx.jsonl_path.clone(),
                csv_path: None,
                counters: ctx.counters,
                sample: ctx.reservoir.into_items(),
                cancelled: true,
            });
        }

        let machine = machine
            .generate_csv()
            .map_err(|(_, guard)| map_guard_error("generate_csv", &guard))?;

        let csv_path = stages::generate_csv(&ctx).await.map_err(|err| ctx.abort(err))?;

        let _ = machine
            .finish()
            .map_err(|(_, guard)| map_guard_error("finish", &guard))?;

        Ok(TaggingRunOutcome {
            jsonl_path: ctx.jsonl_path.clone(),
            csv_path: Some(csv_path),
            counters: ctx.counters,
            sample: ctx.reservoir.into_items(),
            cancelled: false,
        })
    }
}

fn map_guard_error(event: &str, guard: &GuardError) -> AppError {
    AppError::InternalError(format!(
        "invalid tagging pipeline transition during {event}: {guard:?}"
    ))
}
