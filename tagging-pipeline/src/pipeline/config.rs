use std::collections::HashSet;

use upstream_client::FilterMode;

/// Reservoir sample size used for the preview stream. Grounded in
/// `original_source`'s `tagging_engine.py` `SAMPLE_SIZE` constant.
pub const SAMPLE_SIZE: usize = 50;

#[derive(Debug, Clone)]
pub struct TaggingTuning {
    pub batch_size: usize,
    pub max_records: Option<usize>,
}

impl Default for TaggingTuning {
    fn default() -> Self {
        Self {
            batch_size: 1_000,
            max_records: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TaggingRunRequest {
    pub account_keys: Vec<String>,
    pub start_date: String,
    pub end_date: String,
    pub filter_mode: FilterMode,
    /// Restrict output and counters to this subset of dimension names, if set.
    pub dimension_subset: Option<HashSet<String>>,
    pub output_dir: String,
}

#[derive(Debug, Clone, Default)]
pub struct TaggingConfig {
    pub tuning: TaggingTuning,
}
