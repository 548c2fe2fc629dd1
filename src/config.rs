use std::env;
use std::fs;
use std::path::PathBuf;

use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::error::PipeError;
use crate::sheets::ServiceAccountKey;

pub const DEFAULT_FACT_SHEET: &str = "FACTURAS";
pub const DEFAULT_CONT_SHEET: &str = "FACTURAS_PARA_CONTADOR";

/// On-disk configuration shape. Every value is optional; requirements
/// are enforced by the operation that needs them.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub sheet_id: Option<String>,
    #[serde(default)]
    pub fact_sheet: Option<String>,
    #[serde(default)]
    pub cont_sheet: Option<String>,
    #[serde(default)]
    pub notion_api_key: Option<String>,
    #[serde(default)]
    pub notion_db_id: Option<String>,
    #[serde(default)]
    pub pin_token: Option<String>,
    #[serde(default)]
    pub service_account: Option<ServiceAccountKey>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub sheet_id: Option<String>,
    pub fact_sheet: String,
    pub cont_sheet: String,
    pub notion_api_key: Option<String>,
    pub notion_db_id: Option<String>,
    pub pin_token: Option<String>,
    pub service_account: Option<ServiceAccountKey>,
}

impl ResolvedConfig {
    pub fn require_sheet_id(&self) -> Result<&str, PipeError> {
        self.sheet_id
            .as_deref()
            .ok_or_else(|| PipeError::Configuration("sheet_id".to_string()))
    }

    pub fn require_service_account(&self) -> Result<&ServiceAccountKey, PipeError> {
        self.service_account
            .as_ref()
            .ok_or_else(|| PipeError::Configuration("service_account".to_string()))
    }

    pub fn require_notion(&self) -> Result<(&str, &str), PipeError> {
        let api_key = self
            .notion_api_key
            .as_deref()
            .ok_or_else(|| PipeError::Configuration("notion_api_key".to_string()))?;
        let db_id = self
            .notion_db_id
            .as_deref()
            .ok_or_else(|| PipeError::Configuration("notion_db_id".to_string()))?;
        Ok((api_key, db_id))
    }
}

/// Resolves configuration once at startup. Environment variables
/// override file values; the file is `pinpon.json` in the working
/// directory, falling back to `~/.config/pinpon-datapipe/pinpon.json`.
/// Components receive the resolved struct and never read the
/// environment themselves.
pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, PipeError> {
        let config = match path {
            Some(path) => Self::read_file(&PathBuf::from(path))?,
            None => match Self::find_default_file() {
                Some(path) => Self::read_file(&path)?,
                None => Config::default(),
            },
        };
        let config = Self::apply_env(config)?;
        Ok(Self::resolve_config(config))
    }

    pub fn resolve_config(config: Config) -> ResolvedConfig {
        ResolvedConfig {
            sheet_id: config.sheet_id,
            fact_sheet: config
                .fact_sheet
                .unwrap_or_else(|| DEFAULT_FACT_SHEET.to_string()),
            cont_sheet: config
                .cont_sheet
                .unwrap_or_else(|| DEFAULT_CONT_SHEET.to_string()),
            notion_api_key: config.notion_api_key,
            notion_db_id: config.notion_db_id,
            pin_token: config.pin_token,
            service_account: config.service_account,
        }
    }

    fn read_file(path: &PathBuf) -> Result<Config, PipeError> {
        let content =
            fs::read_to_string(path).map_err(|_| PipeError::ConfigRead(path.clone()))?;
        serde_json::from_str(&content).map_err(|err| PipeError::ConfigParse(err.to_string()))
    }

    fn find_default_file() -> Option<PathBuf> {
        let local = PathBuf::from("pinpon.json");
        if local.exists() {
            return Some(local);
        }
        let user = BaseDirs::new()?
            .home_dir()
            .join(".config")
            .join("pinpon-datapipe")
            .join("pinpon.json");
        user.exists().then_some(user)
    }

    fn apply_env(mut config: Config) -> Result<Config, PipeError> {
        if let Some(value) = env_value("PINPON_SHEET_ID") {
            config.sheet_id = Some(value);
        }
        if let Some(value) = env_value("PINPON_FACT_SHEET") {
            config.fact_sheet = Some(value);
        }
        if let Some(value) = env_value("PINPON_CONT_SHEET") {
            config.cont_sheet = Some(value);
        }
        if let Some(value) = env_value("NOTION_API_KEY") {
            config.notion_api_key = Some(value);
        }
        if let Some(value) = env_value("NOTION_DB_ID") {
            config.notion_db_id = Some(value);
        }
        if let Some(value) = env_value("PIN_TOKEN") {
            config.pin_token = Some(value);
        }
        if let Some(value) = env_value("GOOGLE_SERVICE_ACCOUNT_JSON") {
            let key: ServiceAccountKey = serde_json::from_str(&value)
                .map_err(|err| PipeError::ConfigParse(err.to_string()))?;
            config.service_account = Some(key);
        }
        Ok(config)
    }
}

fn env_value(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}
