use common::error::AppError;
use futures::Stream;
use serde_json::Value;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterMode {
    /// No upstream-side filtering; every resource in range is returned.
    #[default]
    All,
    /// Append `filters[governance_tags_keys]=<dim>: no_tag` per dimension so
    /// only resources missing a governance tag for that dimension come back.
    NotVtagged,
}

#[derive(Debug, Clone)]
pub struct AssetQuery {
    pub start_date: String,
    pub end_date: String,
    pub tag_keys: Vec<String>,
    pub filter_mode: FilterMode,
    pub filter_dimensions: Vec<String>,
    pub max_pages: Option<usize>,
}

fn build_query_params(query: &AssetQuery, token: Option<&str>) -> Vec<(String, String)> {
    let mut params = vec![
        ("startDate".to_string(), query.start_date.clone()),
        ("endDate".to_string(), query.end_date.clone()),
        ("isK8S".to_string(), "0".to_string()),
        ("granLevel".to_string(), "week".to_string()),
    ];
    for column in ["resourceid", "linkedaccid", "payeraccount"] {
        params.push(("columns".to_string(), column.to_string()));
    }
    for key in &query.tag_keys {
        params.push(("columns".to_string(), format!("customtags:{key}")));
    }
    params.push(("costType".to_string(), "cost".to_string()));
    params.push(("isUnblended".to_string(), "false".to_string()));
    if let Some(token) = token {
        params.push(("token".to_string(), token.to_string()));
    }
    params
}

fn governance_filter_suffix(query: &AssetQuery) -> String {
    if query.filter_mode != FilterMode::NotVtagged {
        return String::new();
    }
    query
        .filter_dimensions
        .iter()
        .map(|dim| {
            format!(
                "&filters%5Bgovernance_tags_keys%5D={}",
                urlencode_value(&format!("{dim}: no_tag"))
            )
        })
        .collect()
}

fn urlencode_value(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

#[derive(Debug, serde::Deserialize)]
struct AssetsResponse {
    data: Vec<Value>,
    #[serde(rename = "nextToken")]
    next_token: Option<String>,
}

/// Streams pages from `/v2/usage/assets`, accumulating resources into
/// batches of `batch_size` before yielding, honoring `max_pages` as a hard
/// stop and the 401-retry-once policy via `refresh_headers`.
pub fn fetch_assets_stream<'a, F, Fut>(
    client: &'a reqwest::Client,
    base_url: &'a str,
    headers: reqwest::header::HeaderMap,
    query: AssetQuery,
    batch_size: usize,
    refresh_headers: F,
) -> impl Stream<Item = Result<Vec<Value>, AppError>> + 'a
where
    F: Fn() -> Fut + 'a,
    Fut: std::future::Future<Output = Result<reqwest::header::HeaderMap, AppError>> + 'a,
{
    async_stream::try_stream! {
        let mut headers = headers;
        let mut token: Option<String> = None;
        let mut batch: Vec<Value> = Vec::new();
        let mut page_count = 0usize;

        loop {
            if let Some(max) = query.max_pages {
                if page_count >= max {
                    break;
                }
            }

            let params = build_query_params(&query, token.as_deref());
            let mut url = reqwest::Url::parse_with_params(
                &format!("{base_url}/v2/usage/assets"),
                &params,
            )
            .map_err(|e| AppError::UpstreamFatal(format!("invalid asset query url: {e}")))?;
            let suffix = governance_filter_suffix(&query);
            if !suffix.is_empty() {
                let combined = format!("{}{}", url.query().unwrap_or_default(), suffix);
                url.set_query(Some(&combined));
            }

            let mut response = client.get(url.clone()).headers(headers.clone()).send().await?;

            if response.status() == reqwest::StatusCode::UNAUTHORIZED {
                debug!("asset page fetch got 401, refreshing credentials and retrying once");
                headers = refresh_headers().await?;
                response = client.get(url).headers(headers.clone()).send().await?;
                if response.status() == reqwest::StatusCode::UNAUTHORIZED {
                    Err(AppError::UpstreamFatal("asset fetch unauthorized after retry".into()))?;
                }
            }

            if !response.status().is_success() {
                Err(AppError::UpstreamTransient(format!(
                    "asset page fetch failed with status {}",
                    response.status()
                )))?;
            }

            let parsed: AssetsResponse = response.json().await?;
            page_count += 1;
            batch.extend(parsed.data);

            if batch.len() >= batch_size {
                yield std::mem::take(&mut batch);
            }

            match parsed.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        if !batch.is_empty() {
            yield batch;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn governance_filter_appends_one_param_per_dimension() {
        let query = AssetQuery {
            start_date: "2026-01-01".to_string(),
            end_date: "2026-01-07".to_string(),
            tag_keys: vec![],
            filter_mode: FilterMode::NotVtagged,
            filter_dimensions: vec!["environment".to_string(), "team".to_string()],
            max_pages: None,
        };
        let suffix = governance_filter_suffix(&query);
        assert_eq!(suffix.matches("filters%5Bgovernance_tags_keys%5D").count(), 2);
    }

    #[test]
    fn all_filter_mode_has_no_suffix() {
        let query = AssetQuery {
            start_date: "2026-01-01".to_string(),
            end_date: "2026-01-07".to_string(),
            tag_keys: vec![],
            filter_mode: FilterMode::All,
            filter_dimensions: vec!["environment".to_string()],
            max_pages: None,
        };
        assert!(governance_filter_suffix(&query).is_empty());
    }

    #[test]
    fn query_params_include_sorted_dynamic_columns() {
        let query = AssetQuery {
            start_date: "2026-01-01".to_string(),
            end_date: "2026-01-07".to_string(),
            tag_keys: vec!["alpha".to_string(), "beta".to_string()],
            filter_mode: FilterMode::All,
            filter_dimensions: vec![],
            max_pages: None,
        };
        let params = build_query_params(&query, None);
        let columns: Vec<_> = params
            .iter()
            .filter(|(k, _)| k == "columns")
            .map(|(_, v)| v.clone())
            .collect();
        assert!(columns.contains(&"customtags:alpha".to_string()));
        assert!(columns.contains(&"customtags:beta".to_string()));
    }
}
