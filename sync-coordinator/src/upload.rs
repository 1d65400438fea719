//! Per-payer grouping, CSV/gzip generation, and the presigned upload
//! handshake — the second half of a sync run, consuming the JSONL spill the
//! tagging pipeline produced.

use std::{
    collections::{HashMap, HashSet},
    io::Write,
    path::Path,
};

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::upload_record::{UploadRecord, UploadStatus},
    },
};
use flate2::{write::GzEncoder, Compression};
use serde::{Deserialize, Serialize};
use tagging_pipeline::pipeline::JsonlRecord;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use upstream_client::{AccountListing, UmbrellaClient, UploadMode};

const MAX_RESOURCE_ID_LEN: usize = 255;
const NOT_AVAILABLE: &str = "Not Available";
const UNALLOCATED: &str = "Unallocated";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSummary {
    pub payer_account: String,
    pub upload_id: String,
    pub row_count: usize,
}

struct UploadRow {
    resource_id: String,
    linked_account: String,
    vtags: String,
}

/// Reads the JSONL spill and produces one upload row per matched record,
/// grouped by payer account, dropping records whose virtual-tag string is
/// empty and applying the resource-id validity rules (non-empty, not the
/// upstream sentinel, at most 255 characters), then de-duplicating by
/// resource id within each payer group.
async fn read_upload_rows(jsonl_path: &Path) -> Result<HashMap<String, Vec<UploadRow>>, AppError> {
    let file = tokio::fs::File::open(jsonl_path).await?;
    let mut lines = BufReader::new(file).lines();
    let mut by_payer: HashMap<String, Vec<UploadRow>> = HashMap::new();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let record: JsonlRecord = serde_json::from_str(&line)?;

        if record.resourceid.is_empty()
            || record.resourceid == NOT_AVAILABLE
            || record.resourceid.len() > MAX_RESOURCE_ID_LEN
        {
            continue;
        }

        let mut names: Vec<_> = record.dimensions.keys().cloned().collect();
        names.sort();
        let vtags = names
            .into_iter()
            .filter_map(|name| {
                let value = record.dimensions.get(&name)?;
                (value != UNALLOCATED).then(|| format!("{name}:{value}"))
            })
            .collect::<Vec<_>>()
            .join(";");

        if vtags.is_empty() {
            continue;
        }

        let payer = if record.payeraccount.is_empty() {
            record.linkedaccid.clone()
        } else {
            record.payeraccount.clone()
        };

        by_payer.entry(payer).or_default().push(UploadRow {
            resource_id: record.resourceid,
            linked_account: record.linkedaccid,
            vtags,
        });
    }

    for rows in by_payer.values_mut() {
        let mut seen = HashSet::new();
        rows.retain(|row| seen.insert(row.resource_id.clone()));
    }

    Ok(by_payer)
}

fn render_csv(rows: &[UploadRow]) -> Result<Vec<u8>, AppError> {
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(Vec::new());
    writer.write_record([
        "Resource Cost",
        "Resource Name",
        "Resource ID",
        "Service",
        "Region",
        "Linked Account",
        "Virtual Tags",
        "Tags",
    ])?;
    for row in rows {
        writer.write_record(["", "", &row.resource_id, "", "", &row.linked_account, &row.vtags, ""])?;
    }
    writer
        .into_inner()
        .map_err(|e| AppError::InternalError(format!("csv writer flush failed: {e}")))
}

fn gzip_bytes(bytes: &[u8]) -> Result<Vec<u8>, AppError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    Ok(encoder.finish()?)
}

/// Writes the CSV and its gzip to unique, payer-scoped temp files. The
/// returned handle keeps the gzip file alive (and therefore on disk) only
/// until the caller drops it; `tempfile` removes it automatically then,
/// which is what guarantees intermediate-file cleanup on every exit path,
/// including early returns via `?`.
fn materialize_csv_and_gzip(
    payer: &str,
    rows: &[UploadRow],
) -> Result<(tempfile::NamedTempFile, Vec<u8>), AppError> {
    let csv_bytes = render_csv(rows)?;

    let mut csv_file = tempfile::Builder::new()
        .prefix(&format!("vtags-{payer}-{}-", rows.len()))
        .suffix(".csv")
        .tempfile()?;
    csv_file.write_all(&csv_bytes)?;
    csv_file.flush()?;
    drop(csv_file);

    let gzipped = gzip_bytes(&csv_bytes)?;
    let mut gz_file = tempfile::Builder::new()
        .prefix(&format!("vtags-{payer}-{}-", rows.len()))
        .suffix(".csv.gz")
        .tempfile()?;
    gz_file.write_all(&gzipped)?;
    gz_file.flush()?;

    Ok((gz_file, gzipped))
}

/// Runs the per-payer upload phase: group matched records by payer account,
/// materialize a temp CSV+gzip per group, upload via the presigned
/// two-step handshake in upsert mode, and record one `UploadRecord` row per
/// successful upload. A single payer's upload failure is logged and
/// skipped; the run continues with the remaining payers.
pub async fn run_upload_phase(
    db: &SurrealDbClient,
    client: &UmbrellaClient,
    accounts: &AccountListing,
    jsonl_path: &Path,
) -> Result<Vec<UploadSummary>, AppError> {
    let by_payer = read_upload_rows(jsonl_path).await?;
    let mut summaries = Vec::new();

    for (payer, rows) in by_payer {
        if rows.is_empty() {
            continue;
        }
        match upload_one_payer(db, client, accounts, &payer, &rows).await {
            Ok(summary) => summaries.push(summary),
            Err(err) => {
                warn!(payer_account = %payer, error = %err, "payer upload failed, continuing with next payer");
            }
        }
    }

    Ok(summaries)
}

async fn upload_one_payer(
    db: &SurrealDbClient,
    client: &UmbrellaClient,
    accounts: &AccountListing,
    payer: &str,
    rows: &[UploadRow],
) -> Result<UploadSummary, AppError> {
    let account_key = accounts
        .find(payer)
        .map(|a| a.account_key.clone())
        .unwrap_or_else(|| payer.to_string());

    let (_gz_file, gzipped) = materialize_csv_and_gzip(payer, rows)?;

    let presigned = client
        .upload_virtual_tags(&account_key, UploadMode::Upsert, true, gzipped)
        .await?;

    let mut record = UploadRecord::new(presigned.upload_id.clone(), payer.to_string(), rows.len());
    record.status = UploadStatus::Completed;
    db.store_item(record).await?;

    info!(payer_account = payer, upload_id = %presigned.upload_id, rows = rows.len(), "uploaded virtual tags");

    Ok(UploadSummary {
        payer_account: payer.to_string(),
        upload_id: presigned.upload_id,
        row_count: rows.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(resource_id: &str, linked: &str, vtags: &str) -> UploadRow {
        UploadRow {
            resource_id: resource_id.to_string(),
            linked_account: linked.to_string(),
            vtags: vtags.to_string(),
        }
    }

    #[test]
    fn render_csv_includes_header_and_rows() {
        let rows = vec![row("res-1", "000000000001", "environment:prod")];
        let bytes = render_csv(&rows).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("Resource Cost,Resource Name,Resource ID"));
        assert!(text.contains("res-1"));
        assert!(text.contains("environment:prod"));
    }

    #[test]
    fn gzip_round_trips_through_flate2_decoder() {
        let bytes = render_csv(&[row("res-1", "000000000001", "environment:prod")]).unwrap();
        let gzipped = gzip_bytes(&bytes).unwrap();
        let mut decoder = flate2::read::GzDecoder::new(&gzipped[..]);
        let mut decoded = Vec::new();
        std::io::Read::read_to_end(&mut decoder, &mut decoded).unwrap();
        assert_eq!(decoded, bytes);
    }

    #[tokio::test]
    async fn read_upload_rows_drops_unallocated_and_invalid_resource_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spill.jsonl");

        let mut dims_all_unallocated = HashMap::new();
        dims_all_unallocated.insert("environment".to_string(), UNALLOCATED.to_string());

        let mut dims_matched = HashMap::new();
        dims_matched.insert("environment".to_string(), "prod".to_string());

        let records = vec![
            JsonlRecord {
                resourceid: String::new(),
                linkedaccid: "000000000001".to_string(),
                payeraccount: "000000000001".to_string(),
                dimensions: dims_matched.clone(),
                tags: rules_engine::context::TagContext::default(),
            },
            JsonlRecord {
                resourceid: NOT_AVAILABLE.to_string(),
                linkedaccid: "000000000001".to_string(),
                payeraccount: "000000000001".to_string(),
                dimensions: dims_matched.clone(),
                tags: rules_engine::context::TagContext::default(),
            },
            JsonlRecord {
                resourceid: "res-unallocated".to_string(),
                linkedaccid: "000000000001".to_string(),
                payeraccount: "000000000001".to_string(),
                dimensions: dims_all_unallocated,
                tags: rules_engine::context::TagContext::default(),
            },
            JsonlRecord {
                resourceid: "res-good".to_string(),
                linkedaccid: "000000000001".to_string(),
                payeraccount: "000000000001".to_string(),
                dimensions: dims_matched,
                tags: rules_engine::context::TagContext::default(),
            },
        ];

        let mut file_contents = String::new();
        for record in &records {
            file_contents.push_str(&serde_json::to_string(record).unwrap());
            file_contents.push('\n');
        }
        tokio::fs::write(&path, file_contents).await.unwrap();

        let by_payer = read_upload_rows(&path).await.unwrap();
        let rows = by_payer.get("000000000001").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].resource_id, "res-good");
    }

    #[tokio::test]
    async fn read_upload_rows_dedups_by_resource_id_within_payer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spill.jsonl");

        let mut dims = HashMap::new();
        dims.insert("environment".to_string(), "prod".to_string());

        let record = JsonlRecord {
            resourceid: "res-dup".to_string(),
            linkedaccid: "000000000001".to_string(),
            payeraccount: "000000000001".to_string(),
            dimensions: dims,
            tags: rules_engine::context::TagContext::default(),
        };

        let line = serde_json::to_string(&record).unwrap();
        let contents = format!("{line}\n{line}\n");
        tokio::fs::write(&path, contents).await.unwrap();

        let by_payer = read_upload_rows(&path).await.unwrap();
        assert_eq!(by_payer.get("000000000001").unwrap().len(), 1);
    }
}
