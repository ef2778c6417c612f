//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.dealboard.toml` files.

use crate::analysis::CategoryOrders;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the configuration file looked up by default.
pub const CONFIG_FILE_NAME: &str = ".dealboard.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Dataset settings.
    #[serde(default)]
    pub data: DataConfig,

    /// Fixed category orders per dimension.
    #[serde(default = "default_ordering")]
    pub ordering: CategoryOrders,

    /// Report settings.
    #[serde(default)]
    pub report: ReportConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            data: DataConfig::default(),
            ordering: default_ordering(),
            report: ReportConfig::default(),
        }
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Default output file path.
    #[serde(default = "default_output")]
    pub output: String,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,

    /// Default report format ("markdown" or "json").
    #[serde(default = "default_format")]
    pub format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            verbose: false,
            format: default_format(),
        }
    }
}

fn default_output() -> String {
    "dashboard_report.md".to_string()
}

fn default_format() -> String {
    "markdown".to_string()
}

/// Dataset loading settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Dataset used when `--data` is not given.
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Replacement for empty categorical cells.
    #[serde(default = "default_missing_label")]
    pub missing_label: String,

    /// Accepted date formats, tried in order.
    #[serde(default = "default_date_formats")]
    pub date_formats: Vec<String>,

    /// CSV header names.
    #[serde(default)]
    pub columns: ColumnsConfig,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            path: None,
            missing_label: default_missing_label(),
            date_formats: default_date_formats(),
            columns: ColumnsConfig::default(),
        }
    }
}

fn default_missing_label() -> String {
    "Unknown".to_string()
}

fn default_date_formats() -> Vec<String> {
    vec![
        "%Y-%m-%d",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%d/%m/%Y",
        "%m/%d/%Y",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// CSV header name of every field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnsConfig {
    pub account_type: String,
    pub country: String,
    pub segment: String,
    pub business_type: String,
    pub lead_source: String,
    pub close_reason: String,
    pub stage: String,
    pub value: String,
    pub created_date: String,
    pub close_date: String,
}

impl Default for ColumnsConfig {
    fn default() -> Self {
        Self {
            account_type: "Account Type".to_string(),
            country: "Country".to_string(),
            segment: "Segment".to_string(),
            business_type: "Type".to_string(),
            lead_source: "Lead Source".to_string(),
            close_reason: "Close Reason".to_string(),
            stage: "Stage".to_string(),
            value: "Opp Value (EUR)".to_string(),
            created_date: "Created Date".to_string(),
            close_date: "Close Date".to_string(),
        }
    }
}

fn default_ordering() -> CategoryOrders {
    let mut orders = CategoryOrders::new();
    orders.insert(
        "outcome".to_string(),
        vec!["lost".to_string(), "won".to_string()],
    );
    orders.insert(
        "segment".to_string(),
        ["Segment 1", "Segment 2", "Segment 3", "Segment 4", "Unknow"]
            .into_iter()
            .map(String::from)
            .collect(),
    );
    orders
}

/// Report generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Decimal places for percentages and statistics.
    #[serde(default = "default_decimals")]
    pub decimals: usize,

    /// Print diagnostics below each table.
    #[serde(default = "default_true")]
    pub show_diagnostics: bool,

    /// Pages to render, in order.
    #[serde(default = "default_pages")]
    pub pages: Vec<String>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            decimals: default_decimals(),
            show_diagnostics: true,
            pages: default_pages(),
        }
    }
}

fn default_decimals() -> usize {
    2
}

fn default_true() -> bool {
    true
}

fn default_pages() -> Vec<String> {
    vec!["overview", "profile", "ticket", "time"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE_NAME);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Try to load configuration stored next to a dataset file.
    pub fn load_beside(dataset_path: &Path) -> Result<Option<Self>> {
        let dir = match dataset_path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => return Ok(None),
        };
        let config_path = dir.join(CONFIG_FILE_NAME);

        if config_path.exists() {
            Ok(Some(Self::load(&config_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings.
    /// This method only overrides config when CLI provides explicit values.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref data) = args.data {
            self.data.path = Some(data.clone());
        }

        if let Some(ref output) = args.output {
            self.general.output = output.display().to_string();
        }

        if let Some(format) = args.format {
            self.general.format = format.as_str().to_string();
        }

        if !args.pages.is_empty() {
            self.report.pages = args.pages.iter().map(|p| p.as_str().to_string()).collect();
        }

        // Flags always override
        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
