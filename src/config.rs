use anyhow::{anyhow, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;

pub const DEFAULT_DB_PORT: u16 = 5432;
pub const DEFAULT_TEST_YEAR: i32 = 2025;
pub const DEFAULT_MODEL_REL_PATH: &str = "models/lightgbm_model.txt";

const DB_ENV_KEYS: [&str; 5] = ["DB_HOST", "DB_PORT", "DB_USER", "DB_PASS", "DB_NAME"];

/// Connection settings for the JRA-VAN PostgreSQL mirror.
#[derive(Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub dbname: String,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("dbname", &self.dbname)
            .finish()
    }
}

impl DatabaseConfig {
    /// Reads `DB_*` variables, loading `.env` first when present.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let settings: HashMap<String, String> = DB_ENV_KEYS
            .iter()
            .filter_map(|key| env::var(key).ok().map(|value| (key.to_string(), value)))
            .collect();
        Self::from_settings_map(&settings)
    }

    pub fn from_settings_map(settings: &HashMap<String, String>) -> Result<Self> {
        let host = require_setting(settings, "DB_HOST")?.to_string();
        let user = require_setting(settings, "DB_USER")?.to_string();
        let dbname = require_setting(settings, "DB_NAME")?.to_string();
        let port = optional_setting(settings, "DB_PORT")
            .map(|raw| {
                raw.parse::<u16>()
                    .map_err(|_| anyhow!("Setting DB_PORT must be a port number (value: {})", raw))
            })
            .transpose()?
            .unwrap_or(DEFAULT_DB_PORT);
        let password = settings.get("DB_PASS").map(|value| value.to_string());

        Ok(Self {
            host,
            port,
            user,
            password,
            dbname,
        })
    }

    pub fn to_pg_config(&self) -> tokio_postgres::Config {
        let mut config = tokio_postgres::Config::new();
        config
            .host(&self.host)
            .port(self.port)
            .user(&self.user)
            .dbname(&self.dbname);
        if let Some(password) = &self.password {
            config.password(password);
        }
        config
    }

    pub fn describe(&self) -> String {
        format!("{}@{}:{}/{}", self.user, self.host, self.port, self.dbname)
    }
}

/// Inclusive range of `kaisai_nen` values to extract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YearRange {
    pub start: i32,
    pub end: i32,
}

impl YearRange {
    pub fn new(start: i32, end: i32) -> Result<Self> {
        if start > end {
            return Err(anyhow!(
                "Start year {} occurs after end year {}",
                start,
                end
            ));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, year: i32) -> bool {
        (self.start..=self.end).contains(&year)
    }
}

impl fmt::Display for YearRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// LightGBM hyperparameters. Defaults match LightGBM's scikit-learn classifier.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LightgbmParams {
    pub num_iterations: u32,
    pub learning_rate: f64,
    pub num_leaves: u32,
    pub max_depth: i32,
    pub min_data_in_leaf: u32,
    pub lambda_l1: f64,
    pub lambda_l2: f64,
    pub feature_fraction: f64,
    pub bagging_fraction: f64,
    pub bagging_freq: u32,
    pub seed: u64,
}

impl Default for LightgbmParams {
    fn default() -> Self {
        Self {
            num_iterations: 100,
            learning_rate: 0.1,
            num_leaves: 31,
            max_depth: -1,
            min_data_in_leaf: 20,
            lambda_l1: 0.0,
            lambda_l2: 0.0,
            feature_fraction: 1.0,
            bagging_fraction: 1.0,
            bagging_freq: 0,
            seed: 42,
        }
    }
}

impl LightgbmParams {
    pub fn validate(&self) -> Result<()> {
        if self.num_iterations == 0 {
            return Err(anyhow!("num_iterations must be >= 1"));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(anyhow!(
                "learning_rate must be a positive number (value: {})",
                self.learning_rate
            ));
        }
        if self.num_leaves < 2 {
            return Err(anyhow!("num_leaves must be >= 2 (value: {})", self.num_leaves));
        }
        for (name, value) in [
            ("feature_fraction", self.feature_fraction),
            ("bagging_fraction", self.bagging_fraction),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(anyhow!("{} must be in (0, 1] (value: {})", name, value));
            }
        }
        for (name, value) in [("lambda_l1", self.lambda_l1), ("lambda_l2", self.lambda_l2)] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(anyhow!("{} must be >= 0 (value: {})", name, value));
            }
        }
        Ok(())
    }

    pub fn to_cli_args(&self) -> Vec<String> {
        vec![
            format!("num_iterations={}", self.num_iterations),
            format!("learning_rate={}", self.learning_rate),
            format!("num_leaves={}", self.num_leaves),
            format!("max_depth={}", self.max_depth),
            format!("min_data_in_leaf={}", self.min_data_in_leaf),
            format!("lambda_l1={}", self.lambda_l1),
            format!("lambda_l2={}", self.lambda_l2),
            format!("feature_fraction={}", self.feature_fraction),
            format!("bagging_fraction={}", self.bagging_fraction),
            format!("bagging_freq={}", self.bagging_freq),
            format!("seed={}", self.seed),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct TrainingSettings {
    pub test_year: i32,
    pub model_path: PathBuf,
    pub params: LightgbmParams,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            test_year: DEFAULT_TEST_YEAR,
            model_path: default_model_path(),
            params: LightgbmParams::default(),
        }
    }
}

fn default_model_path() -> PathBuf {
    resolve_crate_path(PathBuf::from(DEFAULT_MODEL_REL_PATH))
}

/// Relative paths are anchored at the crate directory.
pub fn resolve_crate_path(path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join(path)
    }
}

fn optional_setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    settings
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

fn require_setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> Result<&'a str> {
    optional_setting(settings, key).ok_or_else(|| anyhow!("Missing required setting {}", key))
}
