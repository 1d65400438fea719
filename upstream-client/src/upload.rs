use common::error::AppError;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadMode {
    Upsert,
    ReplaceAll,
}

impl UploadMode {
    fn as_wire_str(self) -> &'static str {
        match self {
            UploadMode::Upsert => "upsert",
            UploadMode::ReplaceAll => "replaceAll",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PresignedUpload {
    pub upload_url: String,
    pub upload_id: String,
}

fn extract_field<'a>(value: &'a Value, candidates: &[&str]) -> Option<&'a str> {
    candidates.iter().find_map(|key| value.get(key).and_then(Value::as_str))
}

/// Requests a presigned upload handshake, then PUTs the (optionally
/// gzip-compressed) CSV bytes to the returned URL.
pub async fn upload_virtual_tags(
    client: &reqwest::Client,
    base_url: &str,
    headers: reqwest::header::HeaderMap,
    mode: UploadMode,
    compressed: bool,
    body: Vec<u8>,
) -> Result<PresignedUpload, AppError> {
    let generate_response = client
        .post(format!(
            "{base_url}/v2/governance-tags/resources/import/generate-upload-url"
        ))
        .headers(headers.clone())
        .json(&serde_json::json!({
            "compressed": compressed,
            "mode": mode.as_wire_str(),
        }))
        .send()
        .await?;

    if !generate_response.status().is_success() {
        return Err(AppError::UpstreamFatal(format!(
            "generate-upload-url failed with status {}",
            generate_response.status()
        )));
    }

    let parsed: Value = generate_response.json().await?;
    let upload_url = extract_field(&parsed, &["url", "uploadUrl", "presignedUrl"])
        .ok_or_else(|| AppError::UpstreamFatal("presigned response missing upload url".into()))?
        .to_string();
    let upload_id = extract_field(&parsed, &["uploadId", "id"])
        .ok_or_else(|| AppError::UpstreamFatal("presigned response missing upload id".into()))?
        .to_string();

    let mut put = client.put(&upload_url).header("Content-Type", "text/csv");
    if compressed {
        put = put.header("Content-Encoding", "gzip");
    }
    let put_response = put.body(body).send().await?;

    if !matches!(
        put_response.status(),
        reqwest::StatusCode::OK | reqwest::StatusCode::CREATED | reqwest::StatusCode::NO_CONTENT
    ) {
        return Err(AppError::UpstreamFatal(format!(
            "presigned PUT failed with status {}",
            put_response.status()
        )));
    }

    Ok(PresignedUpload {
        upload_url,
        upload_id,
    })
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImportOperations {
    #[serde(default)]
    pub inserted: u64,
    #[serde(default)]
    pub updated: u64,
    #[serde(default)]
    pub deleted: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImportStatus {
    pub phase: String,
    #[serde(rename = "phaseDescription", default)]
    pub phase_description: Option<String>,
    pub status: Option<String>,
    #[serde(rename = "totalRows", default)]
    pub total_rows: Option<u64>,
    #[serde(rename = "processedRows", default)]
    pub processed_rows: Option<u64>,
    #[serde(default)]
    pub errors: Option<Vec<String>>,
    #[serde(rename = "importMode", default)]
    pub import_mode: Option<String>,
    #[serde(default)]
    pub operations: Option<ImportOperations>,
}

impl ImportStatus {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self.phase.as_str(), "completed" | "failed")
    }
}

pub async fn poll_import_status(
    client: &reqwest::Client,
    base_url: &str,
    headers: reqwest::header::HeaderMap,
    upload_id: &str,
) -> Result<ImportStatus, AppError> {
    let response = client
        .get(format!(
            "{base_url}/v2/governance-tags/resources/import/status/{upload_id}"
        ))
        .headers(headers)
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(AppError::UpstreamTransient(format!(
            "import status poll failed with status {}",
            response.status()
        )));
    }

    Ok(response.json().await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_mode_wire_strings() {
        assert_eq!(UploadMode::Upsert.as_wire_str(), "upsert");
        assert_eq!(UploadMode::ReplaceAll.as_wire_str(), "replaceAll");
    }

    #[test]
    fn terminal_phases_are_completed_or_failed() {
        let completed = ImportStatus {
            phase: "completed".to_string(),
            phase_description: None,
            status: None,
            total_rows: None,
            processed_rows: None,
            errors: None,
            import_mode: None,
            operations: None,
        };
        assert!(completed.is_terminal());

        let in_progress = ImportStatus {
            phase: "processing".to_string(),
            ..completed.clone()
        };
        assert!(!in_progress.is_terminal());
    }

    #[test]
    fn extract_field_tries_candidates_in_order() {
        let value = serde_json::json!({"uploadId": "abc"});
        assert_eq!(extract_field(&value, &["id", "uploadId"]), Some("abc"));
    }
}
