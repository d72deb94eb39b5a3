// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::error::ConfigError;
use std::env;
use tracing::warn;

/// Default number of formatted-or-pending records queued for the write task.
pub const DEFAULT_DELIVERY_CAPACITY: usize = 8;

/// Configuration for a log [`crate::Pipeline`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Maximum number of delivery handles waiting for the write task. Bounds
    /// the number of formatting tasks in flight; the dispatch task waits when
    /// it is reached.
    pub delivery_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            delivery_capacity: DEFAULT_DELIVERY_CAPACITY,
        }
    }
}

impl PipelineConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let delivery_capacity = match env::var("BLOCKLOG_DELIVERY_CAPACITY") {
            Ok(val) => val.trim().parse::<usize>().unwrap_or_else(|_| {
                warn!(
                    "BLOCKLOG_DELIVERY_CAPACITY must be a positive integer, got: '{}'. Using {}.",
                    val, DEFAULT_DELIVERY_CAPACITY
                );
                DEFAULT_DELIVERY_CAPACITY
            }),
            Err(_) => DEFAULT_DELIVERY_CAPACITY,
        };

        let config = Self { delivery_capacity };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.delivery_capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "Delivery capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
