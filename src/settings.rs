use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;

use crate::sites::browser::BrowserSettings;

const CONFIG_FILE: &str = "reg_scraper";
const ENV_PREFIX: &str = "REG_SCRAPER";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub ledger_path: PathBuf,
    pub jobs_path: PathBuf,
    pub webdriver_url: String,
    pub headless: bool,
    pub wait_secs: u64,
    pub settle_millis: u64,
    #[serde(default)]
    pub azure: AzureSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AzureSettings {
    pub account_url: Option<String>,
    pub sas_token: Option<String>,
}

fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Config::builder()
        .set_default("data_dir", "data")?
        .set_default("ledger_path", "executed_scripts.txt")?
        .set_default("jobs_path", "scripts.txt")?
        .set_default("webdriver_url", "http://localhost:9515")?
        .set_default("headless", true)?
        .set_default("wait_secs", 20i64)?
        .set_default("settle_millis", 3000i64)
}

impl Settings {
    /// Defaults, then `reg_scraper.toml` if present, then `REG_SCRAPER_*`
    /// environment variables (`__` separates nested keys).
    pub fn load() -> Result<Self> {
        let settings = defaults()?
            .add_source(File::with_name(CONFIG_FILE).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration")?;
        settings
            .try_deserialize()
            .context("Invalid configuration")
    }

    pub fn raw_root(&self) -> PathBuf {
        self.data_dir.join("raw")
    }

    pub fn processed_root(&self) -> PathBuf {
        self.data_dir.join("processed")
    }

    pub fn browser(&self) -> BrowserSettings {
        BrowserSettings {
            webdriver_url: self.webdriver_url.clone(),
            headless: self.headless,
            wait: Duration::from_secs(self.wait_secs),
            settle: Duration::from_millis(self.settle_millis),
        }
    }

    /// Account URL and SAS token, when both are configured.
    pub fn azure_credentials(&self) -> Option<(&str, &str)> {
        let url = self.azure.account_url.as_deref().filter(|s| !s.is_empty())?;
        let token = self.azure.sas_token.as_deref().filter(|s| !s.is_empty())?;
        Some((url, token))
    }
}
