use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::error::PipeError;
use crate::normalize::normalize;
use crate::table::{Cell, Record, Table};

const NOTION_VERSION: &str = "2022-06-28";

#[derive(Debug, Deserialize)]
pub struct QueryPage {
    #[serde(default)]
    pub results: Vec<PageObject>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PageObject {
    #[serde(default)]
    pub properties: Map<String, Value>,
}

pub trait NotionClient: Send + Sync {
    fn query_database(
        &self,
        database_id: &str,
        start_cursor: Option<&str>,
    ) -> Result<QueryPage, PipeError>;
}

pub struct NotionHttpClient {
    client: Client,
    base_url: String,
}

impl NotionHttpClient {
    pub fn new(api_key: &str) -> Result<Self, PipeError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("pinpon-dp/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| PipeError::NotionHttp(err.to_string()))?,
        );
        let mut auth = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|err| PipeError::Authentication(err.to_string()))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert("Notion-Version", HeaderValue::from_static(NOTION_VERSION));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| PipeError::NotionHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: "https://api.notion.com/v1".to_string(),
        })
    }

    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, PipeError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            let response = make_req().send();
            match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(PipeError::NotionHttp(err.to_string()));
                }
            }
        }
    }
}

impl NotionClient for NotionHttpClient {
    fn query_database(
        &self,
        database_id: &str,
        start_cursor: Option<&str>,
    ) -> Result<QueryPage, PipeError> {
        let url = format!("{}/databases/{}/query", self.base_url, database_id);
        let body = match start_cursor {
            Some(cursor) => json!({ "start_cursor": cursor }),
            None => json!({}),
        };
        let response = self.send_with_retries(|| self.client.post(&url).json(&body))?;
        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .unwrap_or_else(|_| "Notion request failed".to_string());
            return Err(PipeError::NotionStatus {
                status: status.as_u16(),
                message,
            });
        }
        response
            .json()
            .map_err(|err| PipeError::NotionHttp(err.to_string()))
    }
}

/// Queries every page of the database, projecting each property bag to
/// scalar cells, and returns the normalized table. A failed page fails
/// the whole load; already-fetched pages are discarded.
pub fn load_database(client: &dyn NotionClient, database_id: &str) -> Result<Table, PipeError> {
    let mut records = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = client.query_database(database_id, cursor.as_deref())?;
        for object in page.results {
            let mut record = Record::new();
            for (name, property) in &object.properties {
                record.push(name.clone(), prop_to_cell(property));
            }
            records.push(record);
        }
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    let table = Table::from_records(records);
    tracing::info!(database_id, rows = table.len(), "database loaded");
    Ok(normalize(&table))
}

/// Projects a typed Notion property onto a scalar cell. Text-like
/// properties concatenate their runs; select takes the label;
/// multi-select joins labels with commas; date takes the start value.
fn prop_to_cell(property: &Value) -> Cell {
    let Some(kind) = property.get("type").and_then(|v| v.as_str()) else {
        return Cell::Missing;
    };
    let inner = property.get(kind).unwrap_or(&Value::Null);
    match kind {
        "title" | "rich_text" => match inner.as_array() {
            Some(runs) => {
                let text = runs
                    .iter()
                    .filter_map(|run| run.get("plain_text").and_then(|v| v.as_str()))
                    .collect::<Vec<_>>()
                    .join(" ");
                Cell::Text(text)
            }
            None => Cell::text(""),
        },
        "number" => inner.as_f64().map(Cell::Number).unwrap_or(Cell::Missing),
        "select" => inner
            .get("name")
            .and_then(|v| v.as_str())
            .map(Cell::text)
            .unwrap_or(Cell::Missing),
        "multi_select" => {
            let labels = inner
                .as_array()
                .map(|options| {
                    options
                        .iter()
                        .filter_map(|option| option.get("name").and_then(|v| v.as_str()))
                        .collect::<Vec<_>>()
                        .join(",")
                })
                .unwrap_or_default();
            Cell::Text(labels)
        }
        "date" => inner
            .get("start")
            .and_then(|v| v.as_str())
            .map(Cell::text)
            .unwrap_or(Cell::Missing),
        "checkbox" => inner.as_bool().map(Cell::Bool).unwrap_or(Cell::Missing),
        "url" => inner
            .as_str()
            .map(Cell::text)
            .unwrap_or(Cell::Missing),
        _ => match inner {
            Value::String(text) => Cell::Text(text.clone()),
            Value::Number(number) => number
                .as_f64()
                .map(Cell::Number)
                .unwrap_or(Cell::Missing),
            Value::Bool(flag) => Cell::Bool(*flag),
            _ => Cell::Missing,
        },
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
