// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Coordination Pattern YAML Parser and Registry
//!
//! This module provides infrastructure for parsing coordination pattern
//! manifests into domain templates and holding them for lookup by name.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Parse external YAML → Domain objects
//! - **Anti-Corruption:** Translates YAML schema to domain model
//!
//! # Manifest Format
//!
//! ```yaml
//! apiVersion: 100monkeys.ai/v1
//! kind: CoordinationPattern
//! metadata:
//!   name: fan-out-review
//!   version: "1.0.0"
//! spec:
//!   initial_task:
//!     task_type: prepare-${target}
//!   fan_out:
//!     - name: security
//!       task_type: review
//!       required_capabilities: [security]
//!     - name: performance
//!       task_type: review
//!       required_capabilities: [performance]
//!   sync_points:
//!     - tasks: [security, performance]
//!       timeout: 30m
//!   join:
//!     sources: [security, performance]
//!     gate: all
//!     continuation:
//!       task_type: summarize-${target}
//!   merge:
//!     sources: [security, performance]
//!     strategy: combine
//! ```

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::domain::coordination::{ContinuationSpec, JoinGate, MergeKind};
use crate::domain::pattern::{
    JoinShape, MergeShape, PatternTemplate, SyncPointShape, TaskShape,
};
use crate::domain::task::TaskPriority;

// ============================================================================
// YAML Schema (External Representation)
// ============================================================================

/// External YAML representation of a coordination pattern manifest
///
/// This struct matches the YAML schema exactly. It is then converted
/// to the domain PatternTemplate with validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternManifest {
    pub api_version: String,
    pub kind: String,
    pub metadata: PatternMetadataYaml,
    pub spec: PatternSpecYaml,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternMetadataYaml {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternSpecYaml {
    pub initial_task: TaskShapeYaml,
    #[serde(default)]
    pub fan_out: Vec<TaskShapeYaml>,
    #[serde(default)]
    pub sync_points: Vec<SyncPointShapeYaml>,
    #[serde(default)]
    pub join: Option<JoinShapeYaml>,
    #[serde(default)]
    pub merge: Option<MergeShapeYaml>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskShapeYaml {
    /// Template-local handle. Optional for the initial task only, which
    /// defaults to `initial`.
    #[serde(default)]
    pub name: Option<String>,
    pub task_type: String,
    #[serde(default)]
    pub phase: Option<String>,
    #[serde(default)]
    pub priority: Option<TaskPriority>,
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    #[serde(default)]
    pub input: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncPointShapeYaml {
    pub tasks: Vec<String>,
    #[serde(default)]
    pub required_count: Option<usize>,
    #[serde(default)]
    #[serde(with = "humantime_serde")]
    pub timeout: Option<std::time::Duration>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinShapeYaml {
    pub sources: Vec<String>,
    pub gate: JoinGate,
    pub continuation: ContinuationYaml,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContinuationYaml {
    pub task_type: String,
    #[serde(default)]
    pub phase: Option<String>,
    #[serde(default)]
    pub priority: Option<TaskPriority>,
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    #[serde(default)]
    pub input: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeShapeYaml {
    pub sources: Vec<String>,
    pub strategy: MergeKind,
}

// ============================================================================
// Parser
// ============================================================================

/// Pattern parser (Infrastructure service)
pub struct PatternParser;

impl PatternParser {
    /// Parse a pattern manifest from YAML file
    pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<PatternTemplate, PatternParseError> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| PatternParseError::IoError {
            path: path.as_ref().display().to_string(),
            error: e.to_string(),
        })?;

        Self::parse_yaml(&content)
    }

    /// Parse a pattern manifest from YAML string
    pub fn parse_yaml(yaml: &str) -> Result<PatternTemplate, PatternParseError> {
        let manifest: PatternManifest =
            serde_yaml::from_str(yaml).map_err(|e| PatternParseError::YamlError(e.to_string()))?;

        Self::validate_and_convert(manifest)
    }

    /// Validate manifest and convert to domain object
    fn validate_and_convert(manifest: PatternManifest) -> Result<PatternTemplate, PatternParseError> {
        // Validate apiVersion
        if manifest.api_version != "100monkeys.ai/v1" {
            return Err(PatternParseError::InvalidApiVersion {
                expected: "100monkeys.ai/v1".to_string(),
                got: manifest.api_version,
            });
        }

        // Validate kind
        if manifest.kind != "CoordinationPattern" {
            return Err(PatternParseError::InvalidKind {
                expected: "CoordinationPattern".to_string(),
                got: manifest.kind,
            });
        }

        let initial_task = Self::convert_task_shape(manifest.spec.initial_task, Some("initial"))?;

        let fan_out = manifest
            .spec
            .fan_out
            .into_iter()
            .map(|shape| Self::convert_task_shape(shape, None))
            .collect::<Result<Vec<_>, _>>()?;

        let sync_points = manifest
            .spec
            .sync_points
            .into_iter()
            .map(|sync| SyncPointShape {
                tasks: sync.tasks,
                required_count: sync.required_count,
                timeout: sync.timeout,
            })
            .collect();

        let join = manifest.spec.join.map(|join| JoinShape {
            sources: join.sources,
            gate: join.gate,
            continuation: ContinuationSpec {
                task_type: join.continuation.task_type,
                phase: join.continuation.phase,
                priority: join.continuation.priority,
                required_capabilities: join.continuation.required_capabilities,
                input: join.continuation.input,
            },
        });

        let merge = manifest.spec.merge.map(|merge| MergeShape {
            sources: merge.sources,
            strategy: merge.strategy,
        });

        let template = PatternTemplate {
            name: manifest.metadata.name,
            version: manifest.metadata.version.unwrap_or_else(|| "1.0.0".to_string()),
            description: manifest.metadata.description,
            initial_task,
            fan_out,
            sync_points,
            join,
            merge,
        };

        template
            .validate()
            .map_err(|e| PatternParseError::ValidationError(e.to_string()))?;

        Ok(template)
    }

    fn convert_task_shape(
        yaml: TaskShapeYaml,
        default_name: Option<&str>,
    ) -> Result<TaskShape, PatternParseError> {
        let name = match yaml.name {
            Some(name) => name,
            None => default_name
                .map(str::to_string)
                .ok_or_else(|| {
                    PatternParseError::ValidationError(
                        "fan-out task shape needs a name".to_string(),
                    )
                })?,
        };
        Ok(TaskShape {
            name,
            task_type: yaml.task_type,
            phase: yaml.phase,
            priority: yaml.priority,
            required_capabilities: yaml.required_capabilities,
            input: yaml.input,
        })
    }

    fn task_shape_to_yaml(shape: &TaskShape) -> TaskShapeYaml {
        TaskShapeYaml {
            name: Some(shape.name.clone()),
            task_type: shape.task_type.clone(),
            phase: shape.phase.clone(),
            priority: shape.priority,
            required_capabilities: shape.required_capabilities.clone(),
            input: shape.input.clone(),
        }
    }

    /// Serialize a pattern template back to YAML
    pub fn to_yaml(template: &PatternTemplate) -> Result<String, PatternParseError> {
        let manifest = Self::template_to_manifest(template);
        serde_yaml::to_string(&manifest).map_err(|e| PatternParseError::YamlError(e.to_string()))
    }

    fn template_to_manifest(template: &PatternTemplate) -> PatternManifest {
        PatternManifest {
            api_version: "100monkeys.ai/v1".to_string(),
            kind: "CoordinationPattern".to_string(),
            metadata: PatternMetadataYaml {
                name: template.name.clone(),
                version: Some(template.version.clone()),
                description: template.description.clone(),
            },
            spec: PatternSpecYaml {
                initial_task: Self::task_shape_to_yaml(&template.initial_task),
                fan_out: template.fan_out.iter().map(Self::task_shape_to_yaml).collect(),
                sync_points: template
                    .sync_points
                    .iter()
                    .map(|sync| SyncPointShapeYaml {
                        tasks: sync.tasks.clone(),
                        required_count: sync.required_count,
                        timeout: sync.timeout,
                    })
                    .collect(),
                join: template.join.as_ref().map(|join| JoinShapeYaml {
                    sources: join.sources.clone(),
                    gate: join.gate,
                    continuation: ContinuationYaml {
                        task_type: join.continuation.task_type.clone(),
                        phase: join.continuation.phase.clone(),
                        priority: join.continuation.priority,
                        required_capabilities: join.continuation.required_capabilities.clone(),
                        input: join.continuation.input.clone(),
                    },
                }),
                merge: template.merge.as_ref().map(|merge| MergeShapeYaml {
                    sources: merge.sources.clone(),
                    strategy: merge.strategy,
                }),
            },
        }
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Named pattern templates, shared across services. Templates are validated
/// on registration; re-registering a name replaces the previous version.
#[derive(Clone)]
pub struct PatternRegistry {
    patterns: Arc<RwLock<HashMap<String, PatternTemplate>>>,
}

impl PatternRegistry {
    pub fn new() -> Self {
        Self {
            patterns: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a template built in code
    pub fn register(&self, template: PatternTemplate) -> Result<(), PatternParseError> {
        template
            .validate()
            .map_err(|e| PatternParseError::ValidationError(e.to_string()))?;
        self.patterns
            .write()
            .insert(template.name.clone(), template);
        Ok(())
    }

    /// Parse and register a YAML manifest; returns the pattern name
    pub fn register_yaml(&self, yaml: &str) -> Result<String, PatternParseError> {
        let template = PatternParser::parse_yaml(yaml)?;
        let name = template.name.clone();
        self.patterns.write().insert(name.clone(), template);
        Ok(name)
    }

    /// Parse and register a YAML manifest file; returns the pattern name
    pub fn register_file<P: AsRef<Path>>(&self, path: P) -> Result<String, PatternParseError> {
        let template = PatternParser::parse_file(path)?;
        let name = template.name.clone();
        self.patterns.write().insert(name.clone(), template);
        Ok(name)
    }

    pub fn get(&self, name: &str) -> Option<PatternTemplate> {
        self.patterns.read().get(name).cloned()
    }

    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.patterns.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn remove(&self, name: &str) -> Option<PatternTemplate> {
        self.patterns.write().remove(name)
    }
}

impl Default for PatternRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum PatternParseError {
    #[error("IO error reading {path}: {error}")]
    IoError { path: String, error: String },

    #[error("YAML parse error: {0}")]
    YamlError(String),

    #[error("Invalid API version: expected '{expected}', got '{got}'")]
    InvalidApiVersion { expected: String, got: String },

    #[error("Invalid kind: expected '{expected}', got '{got}'")]
    InvalidKind { expected: String, got: String },

    #[error("Validation error: {0}")]
    ValidationError(String),
}
