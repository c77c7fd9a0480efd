use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::domain::{KeyColumn, NaturalKey};
use crate::error::PipelineError;
use crate::extract::DEFAULT_BASE_URL;
use crate::notify::NotifySettings;
use crate::table::{DEFAULT_TABLE_NAME, TableSettings, validate_identifier};

pub const DEFAULT_CONFIG_FILE: &str = "agridata.json";
pub const DEFAULT_BUCKET: &str = "agridata_project_bucket";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_SENDER: &str = "agridata@localhost";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub raw_store: RawStoreSection,
    #[serde(default)]
    pub table: TableSection,
    #[serde(default)]
    pub natural_key: Option<Vec<KeyColumn>>,
    #[serde(default)]
    pub extract: ExtractSection,
    #[serde(default)]
    pub notify: NotifySection,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RawStoreSection {
    #[serde(default)]
    pub root: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct TableSection {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub unique_key: Option<bool>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ExtractSection {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub member_state_codes: Option<Vec<String>>,
    #[serde(default)]
    pub categories: Option<Vec<String>>,
    #[serde(default)]
    pub bucket: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct NotifySection {
    #[serde(default)]
    pub recipient: Option<String>,
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub outbox: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ExtractConfig {
    pub base_url: String,
    pub member_state_codes: Vec<String>,
    pub categories: Vec<String>,
    pub bucket: String,
}

#[derive(Debug, Clone)]
pub struct NotifyConfig {
    pub recipient: Option<String>,
    pub sender: String,
    pub country: String,
    pub category: String,
    pub outbox: Utf8PathBuf,
}

impl NotifyConfig {
    pub fn settings(&self) -> Result<NotifySettings, PipelineError> {
        let recipient = self.recipient.clone().ok_or_else(|| {
            PipelineError::InvalidConfig("notify.recipient is not set".to_string())
        })?;
        Ok(NotifySettings {
            recipient,
            sender: self.sender.clone(),
            country: self.country.clone(),
            category: self.category.clone(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub raw_store_root: Utf8PathBuf,
    pub table_path: Utf8PathBuf,
    pub table: TableSettings,
    pub extract: ExtractConfig,
    pub notify: NotifyConfig,
    pub request_timeout: Duration,
}

impl ResolvedConfig {
    /// Table settings with the natural key replaced by `columns`, so the
    /// unique index and the duplicate checks use the same key. An empty list
    /// keeps the configured key.
    pub fn table_with_key(&self, columns: Vec<KeyColumn>) -> Result<TableSettings, PipelineError> {
        let mut table = self.table.clone();
        if !columns.is_empty() {
            let natural_key = NaturalKey::new(columns)?;
            check_natural_key(&natural_key, &self.extract.categories)?;
            table.natural_key = natural_key;
        }
        Ok(table)
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, PipelineError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| PipelineError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| PipelineError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, PipelineError> {
        let categories = non_empty("extract.categories", config.extract.categories, || {
            vec!["Bull".to_string(), "Bullock".to_string()]
        })?;
        let natural_key = match config.natural_key {
            Some(columns) => NaturalKey::new(columns)?,
            None if categories.len() > 1 => NaturalKey::new(vec![
                KeyColumn::Country,
                KeyColumn::YearMonth,
                KeyColumn::Category,
            ])?,
            None => NaturalKey::default(),
        };
        check_natural_key(&natural_key, &categories)?;

        let timeout_secs = config.request_timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);
        if timeout_secs == 0 {
            return Err(PipelineError::InvalidConfig(
                "request_timeout_secs must be positive".to_string(),
            ));
        }
        let request_timeout = Duration::from_secs(timeout_secs);

        let table_name = config
            .table
            .name
            .unwrap_or_else(|| DEFAULT_TABLE_NAME.to_string());
        validate_identifier(&table_name)?;
        let table = TableSettings {
            name: table_name,
            natural_key,
            unique_key: config.table.unique_key.unwrap_or(false),
            busy_timeout: request_timeout,
        };

        let raw_store_root = match config.raw_store.root {
            Some(root) => Utf8PathBuf::from(root),
            None => data_dir()?.join("raw"),
        };
        let table_path = match config.table.path {
            Some(path) => Utf8PathBuf::from(path),
            None => data_dir()?.join("agridata.sqlite"),
        };

        let extract = ExtractConfig {
            base_url: config
                .extract
                .base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            member_state_codes: non_empty(
                "extract.member_state_codes",
                config.extract.member_state_codes,
                || vec!["LU".to_string()],
            )?,
            categories,
            bucket: config
                .extract
                .bucket
                .unwrap_or_else(|| DEFAULT_BUCKET.to_string()),
        };

        let notify = NotifyConfig {
            recipient: config.notify.recipient,
            sender: config
                .notify
                .sender
                .unwrap_or_else(|| DEFAULT_SENDER.to_string()),
            country: config
                .notify
                .country
                .unwrap_or_else(|| "Luxembourg".to_string()),
            category: config
                .notify
                .category
                .unwrap_or_else(|| "Bull".to_string()),
            outbox: match config.notify.outbox {
                Some(outbox) => Utf8PathBuf::from(outbox),
                None => data_dir()?.join("outbox"),
            },
        };

        Ok(ResolvedConfig {
            raw_store_root,
            table_path,
            table,
            extract,
            notify,
            request_timeout,
        })
    }
}

/// Rejects a key that would collapse rows of different categories when more
/// than one category is extracted.
pub fn check_natural_key(key: &NaturalKey, categories: &[String]) -> Result<(), PipelineError> {
    if categories.len() > 1 && !key.columns().contains(&KeyColumn::Category) {
        return Err(PipelineError::InvalidConfig(format!(
            "natural key must include `category` when extracting {} categories",
            categories.len()
        )));
    }
    Ok(())
}

fn non_empty(
    field: &str,
    values: Option<Vec<String>>,
    default: impl FnOnce() -> Vec<String>,
) -> Result<Vec<String>, PipelineError> {
    let values = values.unwrap_or_else(default);
    if values.is_empty() || values.iter().any(|value| value.trim().is_empty()) {
        return Err(PipelineError::InvalidConfig(format!(
            "{field} must list at least one non-empty value"
        )));
    }
    Ok(values)
}

/// `<local data dir>/agridata`
pub fn data_dir() -> Result<Utf8PathBuf, PipelineError> {
    BaseDirs::new()
        .and_then(|dirs| Utf8PathBuf::from_path_buf(dirs.data_local_dir().join("agridata")).ok())
        .ok_or_else(|| PipelineError::Filesystem("unable to resolve data directory".to_string()))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn defaults_apply() {
        let resolved = ConfigLoader::resolve_config(Config::default()).unwrap();
        assert_eq!(resolved.table.name, "tbl_production");
        assert!(!resolved.table.unique_key);
        assert_eq!(
            resolved.table.natural_key.columns(),
            &[KeyColumn::Country, KeyColumn::YearMonth, KeyColumn::Category]
        );
        assert_eq!(resolved.extract.member_state_codes, vec!["LU".to_string()]);
        assert_eq!(resolved.extract.bucket, DEFAULT_BUCKET);
        assert_eq!(resolved.notify.country, "Luxembourg");
        assert_eq!(resolved.notify.category, "Bull");
        assert_eq!(resolved.request_timeout, Duration::from_secs(30));
        assert!(resolved.raw_store_root.ends_with("agridata/raw"));
    }

    #[test]
    fn recipient_required_for_notify() {
        let resolved = ConfigLoader::resolve_config(Config::default()).unwrap();
        assert_matches!(
            resolved.notify.settings(),
            Err(PipelineError::InvalidConfig(_))
        );
    }
}
