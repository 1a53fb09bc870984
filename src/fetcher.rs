//! Pull-mode HTTP fetching: auth injection, request shaping, pagination.
//!
//! Pages are fetched sequentially (cursor and offset pagination are
//! inherently ordered). A non-2xx response aborts the whole fetch, which
//! fails the run; per-record semantics only begin after fetching.
//!
//! URL construction, record extraction, and the pagination state machine
//! are pure functions over the pipeline config so they can be tested
//! without a live source.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::models::{PaginationConfig, Pipeline, SourceAuthConfig};
use crate::paths::extract_value_by_path;

/// Position within a paginated fetch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageState {
    pub page: usize,
    pub cursor: Option<String>,
}

/// Fetch all records from a pull pipeline's source, following pagination.
pub async fn fetch_records(pipeline: &Pipeline) -> Result<Vec<Value>> {
    let client = reqwest::Client::new();
    let headers = build_headers(pipeline)?;
    let method = pipeline.source_http_method.as_deref().unwrap_or("GET");

    let mut all_records = Vec::new();
    let mut state = PageState::default();

    loop {
        let url = build_page_url(pipeline, &state, Utc::now())?;
        debug!(pipeline_id = %pipeline.id, page = state.page, %url, "fetching source page");

        let mut request = match method {
            "POST" => client.post(url),
            _ => client.get(url),
        };
        request = request.headers(headers.clone());

        if method == "POST" {
            if let Some(body) = pipeline
                .source_request_config
                .as_ref()
                .and_then(|c| c.body.as_ref())
            {
                request = request.json(body);
            }
        }

        let response = request.send().await.context("source request failed")?;
        let status = response.status();
        if !status.is_success() {
            bail!(
                "Source API returned {}: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown")
            );
        }

        let body: Value = response
            .json()
            .await
            .context("source response was not valid JSON")?;

        let records = extract_records(&body, pipeline.response_records_path.as_deref());
        let fetched = records.len();
        all_records.extend(records);

        match next_page_state(
            pipeline.pagination_config.as_ref(),
            fetched,
            &body,
            &state,
        ) {
            Some(next) => state = next,
            None => break,
        }
    }

    Ok(all_records)
}

/// Build the request URL for one page: static query params, auth query
/// param, computed date-range params, and pagination params.
pub fn build_page_url(pipeline: &Pipeline, state: &PageState, now: DateTime<Utc>) -> Result<Url> {
    let source_url = pipeline
        .source_url
        .as_deref()
        .context("pipeline has no source URL")?;
    let mut url = Url::parse(source_url).with_context(|| format!("invalid source URL: {source_url}"))?;

    if let Some(config) = &pipeline.source_request_config {
        if let Some(params) = &config.query_params {
            for (key, value) in params {
                url.query_pairs_mut().append_pair(key, value);
            }
        }

        if let Some(range) = &config.date_range_params {
            let tz: Tz = range
                .timezone
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid timezone: {}", range.timezone))?;
            let since = now - Duration::minutes(range.lookback_minutes);
            let format = |dt: DateTime<Utc>| {
                dt.with_timezone(&tz).format("%Y-%m-%dT%H:%M:%S").to_string()
            };
            url.query_pairs_mut()
                .append_pair(&range.start_param, &format(since));
            url.query_pairs_mut()
                .append_pair(&range.end_param, &format(now));
        }
    }

    if let Some(SourceAuthConfig::QueryParam {
        param_name,
        value,
        env_var,
    }) = &pipeline.source_auth_config
    {
        let token = match env_var {
            Some(var) => std::env::var(var).ok(),
            None => value.clone(),
        };
        if let Some(token) = token {
            url.query_pairs_mut().append_pair(param_name, &token);
        }
    }

    if let Some(pagination) = &pipeline.pagination_config {
        apply_pagination(&mut url, pagination, state);
    }

    Ok(url)
}

fn apply_pagination(url: &mut Url, config: &PaginationConfig, state: &PageState) {
    match config {
        PaginationConfig::Offset {
            param_name,
            page_size,
            ..
        } => {
            url.query_pairs_mut()
                .append_pair(param_name, &(state.page * page_size).to_string());
        }
        PaginationConfig::Page { param_name, .. } => {
            url.query_pairs_mut()
                .append_pair(param_name, &(state.page + 1).to_string());
        }
        PaginationConfig::Cursor { param_name, .. } => {
            if let Some(cursor) = &state.cursor {
                url.query_pairs_mut().append_pair(param_name, cursor);
            }
        }
    }
}

/// Headers for every page: JSON content type, static config headers, and
/// header-based auth.
pub fn build_headers(pipeline: &Pipeline) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    if let Some(config) = &pipeline.source_request_config {
        if let Some(static_headers) = &config.headers {
            for (name, value) in static_headers {
                let name: HeaderName = name
                    .parse()
                    .with_context(|| format!("invalid header name: {name}"))?;
                let value = HeaderValue::from_str(value)
                    .with_context(|| format!("invalid value for header {name}"))?;
                headers.insert(name, value);
            }
        }
    }

    match &pipeline.source_auth_config {
        Some(SourceAuthConfig::Bearer { token }) => {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {token}"))
                    .context("invalid bearer token")?,
            );
        }
        Some(SourceAuthConfig::ApiKey { header_name, key }) => {
            let name: HeaderName = header_name
                .parse()
                .with_context(|| format!("invalid auth header name: {header_name}"))?;
            headers.insert(name, HeaderValue::from_str(key).context("invalid api key")?);
        }
        Some(SourceAuthConfig::Basic { username, password }) => {
            use base64::Engine as _;
            let encoded =
                base64::engine::general_purpose::STANDARD.encode(format!("{username}:{password}"));
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Basic {encoded}"))
                    .context("invalid basic credentials")?,
            );
        }
        Some(SourceAuthConfig::QueryParam { .. }) | None => {}
    }

    Ok(headers)
}

/// Extract the record batch from one response body.
///
/// A configured records path must yield an array (anything else counts as
/// zero records); otherwise a top-level array is used directly and a
/// single object is wrapped as a one-element batch.
pub fn extract_records(body: &Value, records_path: Option<&str>) -> Vec<Value> {
    match records_path {
        Some(path) => match extract_value_by_path(body, path) {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        None => match body {
            Value::Array(items) => items.clone(),
            other => vec![other.clone()],
        },
    }
}

/// Decide whether to fetch another page, and from where.
///
/// Terminates on: no pagination configured, an empty page, a short page,
/// a missing next cursor (cursor mode), or the optional `max_pages` bound.
pub fn next_page_state(
    pagination: Option<&PaginationConfig>,
    fetched: usize,
    body: &Value,
    state: &PageState,
) -> Option<PageState> {
    let config = pagination?;

    if fetched == 0 || fetched < config.page_size() {
        return None;
    }
    if let Some(max_pages) = config.max_pages() {
        if state.page + 1 >= max_pages {
            return None;
        }
    }

    match config {
        PaginationConfig::Cursor { cursor_path, .. } => {
            let next_cursor = extract_value_by_path(body, cursor_path)?;
            let cursor = match next_cursor {
                Value::String(s) => s,
                other => other.to_string(),
            };
            Some(PageState {
                page: state.page + 1,
                cursor: Some(cursor),
            })
        }
        _ => Some(PageState {
            page: state.page + 1,
            cursor: None,
        }),
    }
}
