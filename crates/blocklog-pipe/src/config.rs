// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::{env, path::PathBuf, str::FromStr};

use blocklog::ConfigError;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_LEVEL: &str = "info";

/// Record format written to the output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for OutputFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" | "line" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            other => Err(ConfigError::InvalidConfig(format!(
                "Unknown output format '{other}', expected 'text' or 'json'"
            ))),
        }
    }
}

/// Where records go
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Output {
    #[default]
    Stdout,
    File(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipeConfig {
    pub format: OutputFormat,
    pub output: Output,
    /// `EnvFilter` directive for the process's own diagnostics
    pub log_level: String,
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::default(),
            output: Output::default(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl PipeConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let format = match env::var("BLOCKLOG_FORMAT") {
            Ok(val) => val.parse()?,
            Err(_) => OutputFormat::default(),
        };

        let output = match env::var("BLOCKLOG_OUTPUT") {
            Ok(val) if val.trim().is_empty() || val.trim() == "-" || val.trim() == "stdout" => {
                Output::Stdout
            }
            Ok(val) => Output::File(PathBuf::from(val.trim())),
            Err(_) => Output::Stdout,
        };

        let log_level = env::var("BLOCKLOG_LOG_LEVEL")
            .map(|val| val.to_lowercase())
            .unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string());

        let config = Self {
            format,
            output,
            log_level,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.log_level.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "Log level must not be empty".to_string(),
            ));
        }

        if let Err(e) = EnvFilter::try_new(&self.log_level) {
            return Err(ConfigError::InvalidConfig(format!(
                "Invalid log level '{}': {e}",
                self.log_level
            )));
        }

        if let Output::File(path) = &self.output {
            if path.is_dir() {
                return Err(ConfigError::InvalidConfig(format!(
                    "Output path {} is a directory",
                    path.display()
                )));
            }
        }

        Ok(())
    }
}
