//! Fuzzer configuration.
//!
//! Settings are read from a TOML file (all fields optional) and then
//! overridden by command-line flags. Every field has a default so an empty
//! file is a valid configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::FuzzError;

/// Runtime configuration for one fuzzing run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FuzzConfig {
    // ── Generation ─────────────────────────────────────────────────────
    /// Ceiling for the per-session expression depth.
    pub max_expression_depth: u32,
    /// Upper bound on rejection-sampling rounds before falling back.
    pub max_rejection_rounds: u32,
    /// Generate expressions without type targeting once feedback allows it.
    pub untyped_expressions: bool,
    /// Use the dialect extensions (types, functions, operators) from the stores.
    pub enable_extra_features: bool,
    pub test_indexes: bool,
    pub test_random_commands: bool,
    pub max_inserts: u32,
    pub max_updates: u32,
    pub max_views: u32,
    pub max_tables: u32,
    /// CREATE TABLE attempts per table before giving up on it.
    pub table_retry_budget: u32,

    // ── Feedback ───────────────────────────────────────────────────────
    pub enable_feedback: bool,
    /// Route failures through the deduplicator and skip repeats.
    pub enable_error_handling: bool,
    pub use_deduplicator: bool,
    pub node_warmup: u64,
    pub composite_warmup: u64,
    pub fragment_warmup: u64,
    pub node_quick_start: bool,
    pub composite_quick_start: bool,
    pub fragment_quick_start: bool,

    // ── Learning ───────────────────────────────────────────────────────
    pub enable_learning: bool,
    /// Execute validation statements for newly learned fragments.
    pub enable_direct_validation: bool,
    /// External program that answers learn requests on stdin/stdout.
    pub learner_command: Option<String>,
    pub learner_timeout_secs: u64,

    // ── Oracles ────────────────────────────────────────────────────────
    pub num_queries: u32,
    /// Execute oracle SELECTs through an indexed view.
    pub auto_index_selects: bool,
    /// Drop all views once the cross join of all tables exceeds this.
    pub join_row_limit: u64,
    /// Regex patterns of errors that do not count as findings.
    pub expected_errors: Vec<String>,

    // ── Driver ─────────────────────────────────────────────────────────
    pub num_databases: u32,
    pub num_threads: u32,
    pub seed: Option<u64>,
    pub dialect_name: String,
    /// Dialect whose grammar fragments seed this one, if any.
    pub compatible_with: Option<String>,
    pub config_dir: Option<PathBuf>,
    pub log_dir: PathBuf,
    pub table_delimiter: String,
    pub create_database_per_session: bool,
}

impl Default for FuzzConfig {
    fn default() -> Self {
        Self {
            max_expression_depth: 3,
            max_rejection_rounds: 10_000,
            untyped_expressions: false,
            enable_extra_features: true,
            test_indexes: true,
            test_random_commands: true,
            max_inserts: 30,
            max_updates: 5,
            max_views: 1,
            max_tables: 2,
            table_retry_budget: 500,

            enable_feedback: true,
            enable_error_handling: true,
            use_deduplicator: true,
            node_warmup: 100,
            composite_warmup: 200,
            fragment_warmup: 10,
            node_quick_start: true,
            composite_quick_start: false,
            fragment_quick_start: true,

            enable_learning: false,
            enable_direct_validation: false,
            learner_command: None,
            learner_timeout_secs: 120,

            num_queries: 1000,
            auto_index_selects: false,
            join_row_limit: 5000,
            expected_errors: vec![".*".to_string()],

            num_databases: 100,
            num_threads: 1,
            seed: None,
            dialect_name: "postgres".to_string(),
            compatible_with: None,
            config_dir: None,
            log_dir: PathBuf::from("logs"),
            table_delimiter: "_".to_string(),
            create_database_per_session: true,
        }
    }
}

impl FuzzConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, FuzzError> {
        let config: FuzzConfig =
            toml::from_str(text).map_err(|e| FuzzError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self, FuzzError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Directory holding the fragment files and `disabled_options.csv`.
    pub fn dialect_dir(&self) -> PathBuf {
        self.config_dir
            .clone()
            .unwrap_or_else(|| Path::new("dbconfigs").join(&self.dialect_name))
    }

    /// Directory of the dialect this one inherits fragments from.
    pub fn compatible_dir(&self) -> Option<PathBuf> {
        self.compatible_with
            .as_ref()
            .map(|name| Path::new("dbconfigs").join(name))
    }

    pub fn validate(&self) -> Result<(), FuzzError> {
        if self.max_expression_depth == 0 {
            return Err(FuzzError::InvalidArgument(
                "max_expression_depth must be at least 1".into(),
            ));
        }
        if self.max_rejection_rounds == 0 {
            return Err(FuzzError::InvalidArgument(
                "max_rejection_rounds must be at least 1".into(),
            ));
        }
        if self.table_retry_budget == 0 || self.max_tables == 0 {
            return Err(FuzzError::InvalidArgument(
                "table_retry_budget and max_tables must be at least 1".into(),
            ));
        }
        if self.num_threads == 0 {
            return Err(FuzzError::InvalidArgument(
                "num_threads must be at least 1".into(),
            ));
        }
        if self.dialect_name.trim().is_empty() {
            return Err(FuzzError::InvalidArgument(
                "dialect_name must not be empty".into(),
            ));
        }
        for pattern in &self.expected_errors {
            regex_lite::Regex::new(pattern).map_err(|e| {
                FuzzError::InvalidArgument(format!("invalid expected error pattern '{pattern}': {e}"))
            })?;
        }
        Ok(())
    }
}
