// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Coordinator Configuration Types
//
// Defines the configuration schema for the coordination engine, including:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Scheduler batch sizing
// - Sync point timeout defaults
// - Lock sweep cadence
// - Event bus sizing

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level Kubernetes-style coordinator configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// API version (must be "100monkeys.ai/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "CoordinatorConfig")
    pub kind: String,

    /// Manifest metadata (name, version)
    pub metadata: ConfigMetadata,

    /// Coordinator specification
    #[serde(default)]
    pub spec: CoordinatorSpec,
}

/// Manifest metadata (Kubernetes-style)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigMetadata {
    /// Human-readable configuration name
    pub name: String,

    /// Optional: Configuration version for tracking
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Coordinator specification (content under spec:)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoordinatorSpec {
    /// Scheduler settings
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Coordination settings
    #[serde(default)]
    pub coordination: CoordinationConfig,

    /// Lock manager settings
    #[serde(default)]
    pub locks: LockSweepConfig,

    /// Event bus settings
    #[serde(default)]
    pub events: EventBusConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Upper bound on a ready-task batch when the query does not pass
    /// its own limit
    #[serde(default = "default_ready_batch_limit")]
    pub ready_batch_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationConfig {
    /// Timeout applied to sync points created without one ("30s", "10m").
    /// Absent means such sync points wait indefinitely.
    #[serde(default = "default_sync_timeout")]
    #[serde(with = "humantime_serde")]
    pub default_sync_timeout: Option<Duration>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockSweepConfig {
    /// How often the maintenance loop sweeps expired locks and overdue
    /// sync points
    #[serde(default = "default_sweep_interval")]
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBusConfig {
    /// Broadcast channel capacity; slow subscribers past this lag
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,
}

// Default value functions
fn default_ready_batch_limit() -> usize {
    32
}

fn default_sync_timeout() -> Option<Duration> {
    Some(Duration::from_secs(600))
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_bus_capacity() -> usize {
    1024
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            ready_batch_limit: default_ready_batch_limit(),
        }
    }
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            default_sync_timeout: default_sync_timeout(),
        }
    }
}

impl Default for LockSweepConfig {
    fn default() -> Self {
        Self {
            sweep_interval: default_sweep_interval(),
        }
    }
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            bus_capacity: default_bus_capacity(),
        }
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            api_version: "100monkeys.ai/v1".to_string(),
            kind: "CoordinatorConfig".to_string(),
            metadata: ConfigMetadata {
                name: "coordinator".to_string(),
                version: Some("1.0.0".to_string()),
            },
            spec: CoordinatorSpec::default(),
        }
    }
}

impl CoordinatorConfig {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::from_yaml_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        // Validate apiVersion
        if self.api_version != "100monkeys.ai/v1" {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '100monkeys.ai/v1'",
                self.api_version
            );
        }

        // Validate kind
        if self.kind != "CoordinatorConfig" {
            anyhow::bail!("Invalid kind: '{}'. Must be 'CoordinatorConfig'", self.kind);
        }

        // Validate metadata.name
        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        if self.spec.events.bus_capacity == 0 {
            anyhow::bail!("spec.events.bus_capacity must be at least 1");
        }

        if self.spec.locks.sweep_interval.is_zero() {
            anyhow::bail!("spec.locks.sweep_interval must be positive");
        }

        Ok(())
    }
}
