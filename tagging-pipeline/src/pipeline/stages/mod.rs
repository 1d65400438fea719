use std::collections::{BTreeMap, HashSet};

use common::error::AppError;
use futures::StreamExt;
use rules_engine::{context::column_index_map, index::all_tag_keys, map_resource, pad_account_id};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tracing::warn;
use upstream_client::{AssetQuery, UmbrellaClient};

use super::context::{JsonlRecord, PipelineContext};

fn dimension_subset_or_all(ctx: &PipelineContext<'_>) -> HashSet<String> {
    ctx.request.dimension_subset.clone().unwrap_or_else(|| {
        ctx.dimensions.iter().map(|d| d.name.clone()).collect()
    })
}

/// Streams each account's assets, maps every resource, spills matched
/// records to JSONL, and feeds the reservoir sampler. Per-account failures
/// are logged and counted; the run itself does not fail because of them.
pub async fn process_accounts(
    ctx: &mut PipelineContext<'_>,
    client: &UmbrellaClient,
) -> Result<(), AppError> {
    let tag_keys = all_tag_keys(ctx.dimensions);
    let column_map = column_index_map(&tag_keys);
    let subset = dimension_subset_or_all(ctx);
    let total_accounts = ctx.request.account_keys.len();

    for (index, account_key) in ctx.request.account_keys.clone().into_iter().enumerate() {
        if ctx.is_cancelled() || ctx.reached_ceiling() {
            break;
        }

        let query = AssetQuery {
            start_date: ctx.request.start_date.clone(),
            end_date: ctx.request.end_date.clone(),
            tag_keys: tag_keys.clone(),
            filter_mode: ctx.request.filter_mode,
            filter_dimensions: subset.iter().cloned().collect(),
            max_pages: None,
        };

        if let Err(err) =
            process_one_account(ctx, client, &account_key, query, &column_map, &subset).await
        {
            warn!(account_key, error = %err, "tagging pipeline account failed, continuing with next account");
            ctx.counters.account_errors = ctx.counters.account_errors.saturating_add(1);
        }

        ctx.report_account_progress(index + 1, total_accounts).await;
    }

    Ok(())
}

async fn process_one_account(
    ctx: &mut PipelineContext<'_>,
    client: &UmbrellaClient,
    account_key: &str,
    query: AssetQuery,
    column_map: &BTreeMap<usize, String>,
    subset: &HashSet<String>,
) -> Result<(), AppError> {
    let batch_size = ctx.config.tuning.batch_size;
    let stream = client.fetch_assets_stream(account_key, query, batch_size);
    futures::pin_mut!(stream);

    while let Some(batch) = stream.next().await {
        if ctx.is_cancelled() {
            break;
        }
        let batch = batch?;
        for resource in batch {
            if ctx.is_cancelled() || ctx.reached_ceiling() {
                return Ok(());
            }
            process_one_resource(ctx, &resource, column_map, subset).await?;
        }
    }

    Ok(())
}

async fn process_one_resource(
    ctx: &mut PipelineContext<'_>,
    resource: &Value,
    column_map: &BTreeMap<usize, String>,
    subset: &HashSet<String>,
) -> Result<(), AppError> {
    let resource_id = resource
        .get("resourceid")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let linked_account = pad_account_id(
        resource
            .get("linkedaccid")
            .and_then(Value::as_str)
            .unwrap_or_default(),
    );
    let payer_account = pad_account_id(
        resource
            .get("payeraccount")
            .and_then(Value::as_str)
            .unwrap_or_default(),
    );

    let tag_context = rules_engine::context::extract_tag_context(resource, column_map);
    let mapped = map_resource(
        ctx.dimensions,
        resource_id.clone(),
        linked_account.clone(),
        payer_account.clone(),
        tag_context,
    );

    ctx.counters.total_resources = ctx.counters.total_resources.saturating_add(1);

    let mut dimensions_out = BTreeMap::new();
    let mut restricted_matched = false;
    for dim in ctx.dimensions {
        if !subset.contains(&dim.name) {
            continue;
        }
        let value = mapped
            .dimension_context
            .get(&dim.name)
            .cloned()
            .unwrap_or_else(|| dim.default_value.clone());
        if value != dim.default_value {
            restricted_matched = true;
            let count = ctx
                .counters
                .per_dimension_matches
                .entry(dim.name.clone())
                .or_insert(0);
            *count = count.saturating_add(1);
        }
        dimensions_out.insert(dim.name.clone(), value);
    }

    if restricted_matched {
        ctx.counters.matched_resources = ctx.counters.matched_resources.saturating_add(1);
        ctx.emit_matched(JsonlRecord {
            resourceid: mapped.resource_id,
            linkedaccid: mapped.linked_account,
            payeraccount: mapped.payer_account,
            dimensions: dimensions_out.into_iter().collect(),
            tags: mapped.tag_context,
        })
        .await?;
    } else {
        ctx.counters.unmatched_resources = ctx.counters.unmatched_resources.saturating_add(1);
    }

    Ok(())
}

/// Reads the JSONL spill back and writes the deterministic-column pipeline
/// CSV: `resourceid,linkedaccid,payeraccount,vtags:<d1>,vtags:<d2>,…`.
pub async fn generate_csv(
    ctx: &PipelineContext<'_>,
) -> Result<std::path::PathBuf, AppError> {
    let mut ordered_dims: Vec<_> = ctx.dimensions.to_vec();
    ordered_dims.sort_by_key(|d| d.order_index);
    let subset = dimension_subset_or_all(ctx);
    let ordered_dims: Vec<_> = ordered_dims
        .into_iter()
        .filter(|d| subset.contains(&d.name))
        .collect();

    let csv_path = ctx.jsonl_path.with_extension("csv");
    let input = tokio::fs::File::open(&ctx.jsonl_path).await?;
    let mut lines = BufReader::new(input).lines();

    let output = tokio::fs::File::create(&csv_path).await?;
    let mut writer = BufWriter::new(output);

    let mut header = vec!["resourceid".to_string(), "linkedaccid".to_string(), "payeraccount".to_string()];
    header.extend(ordered_dims.iter().map(|d| format!("vtags:{}", d.name)));
    writer.write_all(csv_row(&header).as_bytes()).await?;

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let record: JsonlRecord = serde_json::from_str(&line)?;
        let mut row = vec![
            record.resourceid.clone(),
            record.linkedaccid.clone(),
            record.payeraccount.clone(),
        ];
        for dim in &ordered_dims {
            let value = record
                .dimensions
                .get(&dim.name)
                .cloned()
                .unwrap_or_else(|| "Unallocated".to_string());
            row.push(value);
        }
        writer.write_all(csv_row(&row).as_bytes()).await?;
    }

    writer.flush().await?;
    Ok(csv_path)
}

fn csv_row(fields: &[String]) -> String {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    let _ = writer.write_record(fields);
    let bytes = writer.into_inner().unwrap_or_default();
    String::from_utf8_lossy(&bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_row_quotes_fields_containing_commas() {
        let row = csv_row(&["a,b".to_string(), "c".to_string()]);
        assert_eq!(row, "\"a,b\",c\n");
    }

    #[test]
    fn csv_row_joins_plain_fields_with_commas() {
        let row = csv_row(&["x".to_string(), "y".to_string(), "z".to_string()]);
        assert_eq!(row, "x,y,z\n");
    }
}
