use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::PipeError;

const OAUTH_SCOPE: &str =
    "https://www.googleapis.com/auth/spreadsheets https://www.googleapis.com/auth/drive";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// The relevant subset of a Google service-account key file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

/// Supplies bearer tokens for the Sheets API. Production wiring mints
/// them from the service-account key; tests substitute a static token.
pub trait TokenProvider: Send + Sync {
    fn access_token(&self) -> Result<String, PipeError>;
}

pub struct StaticTokenProvider(pub String);

impl TokenProvider for StaticTokenProvider {
    fn access_token(&self) -> Result<String, PipeError> {
        Ok(self.0.clone())
    }
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Mints access tokens via the JWT-bearer assertion grant and caches
/// them until shortly before expiry.
pub struct ServiceAccountTokenProvider {
    key: ServiceAccountKey,
    client: Client,
    cached: Mutex<Option<CachedToken>>,
}

impl ServiceAccountTokenProvider {
    pub fn new(key: ServiceAccountKey) -> Result<Self, PipeError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| PipeError::SheetsHttp(err.to_string()))?;
        Ok(Self {
            key,
            client,
            cached: Mutex::new(None),
        })
    }

    fn mint(&self) -> Result<CachedToken, PipeError> {
        let now = chrono::Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: &self.key.client_email,
            scope: OAUTH_SCOPE,
            aud: &self.key.token_uri,
            iat: now,
            exp: now + 3600,
        };
        let encoding_key = EncodingKey::from_rsa_pem(self.key.private_key.as_bytes())
            .map_err(|err| PipeError::Authentication(format!("invalid private key: {err}")))?;
        let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &encoding_key)
            .map_err(|err| PipeError::Authentication(err.to_string()))?;

        let response = self
            .client
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", &assertion)])
            .send()
            .map_err(|err| PipeError::SheetsHttp(err.to_string()))?;
        if !response.status().is_success() {
            let message = response
                .text()
                .unwrap_or_else(|_| "token request failed".to_string());
            return Err(PipeError::Authentication(message));
        }
        let token: TokenResponse = response
            .json()
            .map_err(|err| PipeError::Authentication(err.to_string()))?;
        Ok(CachedToken {
            token: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in.saturating_sub(60)),
        })
    }
}

impl TokenProvider for ServiceAccountTokenProvider {
    fn access_token(&self) -> Result<String, PipeError> {
        let mut guard = self
            .cached
            .lock()
            .map_err(|_| PipeError::Authentication("token cache poisoned".to_string()))?;
        if let Some(cached) = guard.as_ref() {
            if cached.expires_at > Instant::now() {
                return Ok(cached.token.clone());
            }
        }
        let minted = self.mint()?;
        let token = minted.token.clone();
        *guard = Some(minted);
        Ok(token)
    }
}

/// Whole-sheet access to one spreadsheet document. Reads return the
/// raw cell grid; writes replace the named sheet's contents entirely.
pub trait SheetsApi: Send + Sync {
    fn sheet_titles(&self, spreadsheet_id: &str) -> Result<Vec<String>, PipeError>;
    fn values(&self, spreadsheet_id: &str, sheet: &str) -> Result<Vec<Vec<String>>, PipeError>;
    fn overwrite(
        &self,
        spreadsheet_id: &str,
        sheet: &str,
        values: &[Vec<String>],
    ) -> Result<(), PipeError>;
    fn add_sheet(&self, spreadsheet_id: &str, title: &str) -> Result<(), PipeError>;
}

pub struct SheetsHttpClient {
    client: Client,
    tokens: Box<dyn TokenProvider>,
    base_url: String,
}

impl SheetsHttpClient {
    pub fn new(key: ServiceAccountKey) -> Result<Self, PipeError> {
        let tokens = ServiceAccountTokenProvider::new(key)?;
        Self::with_token_provider(Box::new(tokens))
    }

    pub fn with_token_provider(tokens: Box<dyn TokenProvider>) -> Result<Self, PipeError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("pinpon-dp/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| PipeError::SheetsHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| PipeError::SheetsHttp(err.to_string()))?;
        Ok(Self {
            client,
            tokens,
            base_url: "https://sheets.googleapis.com/v4".to_string(),
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
                    return Err(PipeError::SheetsHttp(err.to_string()));
                }
            }
        }
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, PipeError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let code = status.as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "Sheets request failed".to_string());
        match code {
            401 | 403 => Err(PipeError::Authentication(message)),
            404 => Err(PipeError::NotFound(message)),
            _ => Err(PipeError::SheetsStatus {
                status: code,
                message,
            }),
        }
    }

    fn bearer(&self) -> Result<String, PipeError> {
        self.tokens.access_token()
    }

    fn values_url(&self, spreadsheet_id: &str, sheet: &str) -> String {
        format!(
            "{}/spreadsheets/{}/values/{}",
            self.base_url,
            spreadsheet_id,
            encode_title(sheet)
        )
    }
}

impl SheetsApi for SheetsHttpClient {
    fn sheet_titles(&self, spreadsheet_id: &str) -> Result<Vec<String>, PipeError> {
        let url = format!(
            "{}/spreadsheets/{}?fields=sheets.properties.title",
            self.base_url, spreadsheet_id
        );
        let token = self.bearer()?;
        let response = self.send_with_retries(|| self.client.get(&url).bearer_auth(&token))?;
        let response = Self::handle_status(response)?;
        let body: Value = response
            .json()
            .map_err(|err| PipeError::SheetsHttp(err.to_string()))?;
        let titles = body
            .get("sheets")
            .and_then(|v| v.as_array())
            .map(|sheets| {
                sheets
                    .iter()
                    .filter_map(|sheet| {
                        sheet
                            .get("properties")
                            .and_then(|v| v.get("title"))
                            .and_then(|v| v.as_str())
                            .map(|v| v.to_string())
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(titles)
    }

    fn values(&self, spreadsheet_id: &str, sheet: &str) -> Result<Vec<Vec<String>>, PipeError> {
        let url = self.values_url(spreadsheet_id, sheet);
        let token = self.bearer()?;
        let response = self.send_with_retries(|| self.client.get(&url).bearer_auth(&token))?;
        let response = Self::handle_status(response)?;
        let body: Value = response
            .json()
            .map_err(|err| PipeError::SheetsHttp(err.to_string()))?;
        let rows = body
            .get("values")
            .and_then(|v| v.as_array())
            .map(|rows| rows.iter().map(parse_value_row).collect())
            .unwrap_or_default();
        Ok(rows)
    }

    fn overwrite(
        &self,
        spreadsheet_id: &str,
        sheet: &str,
        values: &[Vec<String>],
    ) -> Result<(), PipeError> {
        let token = self.bearer()?;

        let clear_url = format!("{}:clear", self.values_url(spreadsheet_id, sheet));
        let response = self.send_with_retries(|| self.client.post(&clear_url).bearer_auth(&token))?;
        Self::handle_status(response)?;

        let update_url = format!(
            "{}?valueInputOption=RAW",
            self.values_url(spreadsheet_id, sheet)
        );
        let body = json!({
            "range": sheet,
            "majorDimension": "ROWS",
            "values": values,
        });
        let response = self.send_with_retries(|| {
            self.client.put(&update_url).bearer_auth(&token).json(&body)
        })?;
        Self::handle_status(response)?;
        tracing::debug!(sheet, rows = values.len(), "sheet overwritten");
        Ok(())
    }

    fn add_sheet(&self, spreadsheet_id: &str, title: &str) -> Result<(), PipeError> {
        let url = format!("{}/spreadsheets/{}:batchUpdate", self.base_url, spreadsheet_id);
        let body = json!({
            "requests": [{ "addSheet": { "properties": { "title": title } } }],
        });
        let token = self.bearer()?;
        let response =
            self.send_with_retries(|| self.client.post(&url).bearer_auth(&token).json(&body))?;
        Self::handle_status(response)?;
        tracing::info!(title, "worksheet created");
        Ok(())
    }
}

fn parse_value_row(row: &Value) -> Vec<String> {
    row.as_array()
        .map(|cells| {
            cells
                .iter()
                .map(|cell| match cell {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn encode_title(title: &str) -> String {
    title.replace(' ', "%20")
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
