// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Declarative coordination pattern templates.
//!
//! A pattern describes a recurring workflow shape: an initial task, optional
//! fan-out subtasks, sync points, an optional join, an optional merge.
//! `${var}` placeholders are resolved against a runtime context by walking
//! the typed template and substituting only string-typed leaf fields;
//! structural fields (shape names and the references to them) are never
//! substituted, so resolution cannot corrupt the template's wiring.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use thiserror::Error;

use crate::domain::coordination::{ContinuationSpec, JoinGate, MergeKind};
use crate::domain::task::TaskPriority;

#[derive(Debug, Error)]
pub enum PatternError {
    #[error("unresolved placeholder '${{{key}}}' (no such context key)")]
    UnresolvedPlaceholder { key: String },
    #[error("duplicate task shape name '{name}'")]
    DuplicateShapeName { name: String },
    #[error("empty task shape name in pattern")]
    EmptyShapeName,
    #[error("'{reference}' in {section} does not name a declared task shape")]
    UnknownTaskRef { section: String, reference: String },
}

/// A task to create when the pattern is applied. `name` is the
/// template-local handle sync points, joins and merges refer to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskShape {
    pub name: String,
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
pub struct SyncPointShape {
    /// Names of watched task shapes.
    pub tasks: Vec<String>,
    #[serde(default)]
    pub required_count: Option<usize>,
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinShape {
    /// Names of source task shapes.
    pub sources: Vec<String>,
    pub gate: JoinGate,
    pub continuation: ContinuationSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeShape {
    /// Names of source task shapes.
    pub sources: Vec<String>,
    pub strategy: MergeKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternTemplate {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    pub initial_task: TaskShape,
    #[serde(default)]
    pub fan_out: Vec<TaskShape>,
    #[serde(default)]
    pub sync_points: Vec<SyncPointShape>,
    #[serde(default)]
    pub join: Option<JoinShape>,
    #[serde(default)]
    pub merge: Option<MergeShape>,
}

impl PatternTemplate {
    /// Structural checks: shape names unique and non-empty, every sync,
    /// join, and merge reference resolves to a declared shape.
    pub fn validate(&self) -> Result<(), PatternError> {
        let mut names = HashSet::new();
        for shape in std::iter::once(&self.initial_task).chain(self.fan_out.iter()) {
            if shape.name.is_empty() {
                return Err(PatternError::EmptyShapeName);
            }
            if !names.insert(shape.name.as_str()) {
                return Err(PatternError::DuplicateShapeName {
                    name: shape.name.clone(),
                });
            }
        }
        let check = |section: &str, references: &[String]| -> Result<(), PatternError> {
            for reference in references {
                if !names.contains(reference.as_str()) {
                    return Err(PatternError::UnknownTaskRef {
                        section: section.to_string(),
                        reference: reference.clone(),
                    });
                }
            }
            Ok(())
        };
        for (index, sync) in self.sync_points.iter().enumerate() {
            check(&format!("sync_points[{index}]"), &sync.tasks)?;
        }
        if let Some(join) = &self.join {
            check("join", &join.sources)?;
        }
        if let Some(merge) = &self.merge {
            check("merge", &merge.sources)?;
        }
        Ok(())
    }

    /// Substitute `${key}` placeholders from `context` into every
    /// substitutable string leaf. Fails on the first placeholder with no
    /// context entry.
    pub fn resolve(&self, context: &HashMap<String, String>) -> Result<PatternTemplate, PatternError> {
        let mut resolved = self.clone();
        resolved.description = self
            .description
            .as_deref()
            .map(|text| substitute_str(text, context))
            .transpose()?;
        resolved.initial_task = resolve_task_shape(&self.initial_task, context)?;
        resolved.fan_out = self
            .fan_out
            .iter()
            .map(|shape| resolve_task_shape(shape, context))
            .collect::<Result<_, _>>()?;
        if let Some(join) = &mut resolved.join {
            join.continuation = resolve_continuation(&join.continuation, context)?;
        }
        Ok(resolved)
    }
}

fn resolve_task_shape(
    shape: &TaskShape,
    context: &HashMap<String, String>,
) -> Result<TaskShape, PatternError> {
    Ok(TaskShape {
        name: shape.name.clone(),
        task_type: substitute_str(&shape.task_type, context)?,
        phase: shape
            .phase
            .as_deref()
            .map(|phase| substitute_str(phase, context))
            .transpose()?,
        priority: shape.priority,
        required_capabilities: shape
            .required_capabilities
            .iter()
            .map(|capability| substitute_str(capability, context))
            .collect::<Result<_, _>>()?,
        input: shape
            .input
            .as_ref()
            .map(|input| substitute_value(input, context))
            .transpose()?,
    })
}

fn resolve_continuation(
    continuation: &ContinuationSpec,
    context: &HashMap<String, String>,
) -> Result<ContinuationSpec, PatternError> {
    Ok(ContinuationSpec {
        task_type: substitute_str(&continuation.task_type, context)?,
        phase: continuation
            .phase
            .as_deref()
            .map(|phase| substitute_str(phase, context))
            .transpose()?,
        priority: continuation.priority,
        required_capabilities: continuation
            .required_capabilities
            .iter()
            .map(|capability| substitute_str(capability, context))
            .collect::<Result<_, _>>()?,
        input: continuation
            .input
            .as_ref()
            .map(|input| substitute_value(input, context))
            .transpose()?,
    })
}

/// String values substitute; object keys, numbers, and booleans are
/// structural and pass through untouched.
fn substitute_value(
    value: &serde_json::Value,
    context: &HashMap<String, String>,
) -> Result<serde_json::Value, PatternError> {
    Ok(match value {
        serde_json::Value::String(text) => {
            serde_json::Value::String(substitute_str(text, context)?)
        }
        serde_json::Value::Array(items) => serde_json::Value::Array(
            items
                .iter()
                .map(|item| substitute_value(item, context))
                .collect::<Result<_, _>>()?,
        ),
        serde_json::Value::Object(map) => {
            let mut substituted = serde_json::Map::new();
            for (key, item) in map {
                substituted.insert(key.clone(), substitute_value(item, context)?);
            }
            serde_json::Value::Object(substituted)
        }
        other => other.clone(),
    })
}

/// Placeholder keys are `[A-Za-z0-9_.-]+`. Anything else between `${` and
/// `}` is left as literal text rather than treated as a placeholder.
fn is_placeholder_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

fn substitute_str(
    input: &str,
    context: &HashMap<String, String>,
) -> Result<String, PatternError> {
    let mut output = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            output.push_str(&rest[start..]);
            return Ok(output);
        };
        let key = &after[..end];
        if is_placeholder_key(key) {
            match context.get(key) {
                Some(value) => output.push_str(value),
                None => {
                    return Err(PatternError::UnresolvedPlaceholder {
                        key: key.to_string(),
                    })
                }
            }
        } else {
            output.push_str(&rest[start..start + 2 + end + 1]);
        }
        rest = &after[end + 1..];
    }
    output.push_str(rest);
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn template() -> PatternTemplate {
        PatternTemplate {
            name: "fan-out-review".to_string(),
            version: "1.0.0".to_string(),
            description: Some("review ${target} with specialists".to_string()),
            initial_task: TaskShape {
                name: "initial".to_string(),
                task_type: "prepare-${target}".to_string(),
                phase: Some("${phase}".to_string()),
                priority: Some(TaskPriority::High),
                required_capabilities: vec![],
                input: Some(serde_json::json!({"target": "${target}", "depth": 3})),
            },
            fan_out: vec![TaskShape {
                name: "specialist-a".to_string(),
                task_type: "review".to_string(),
                phase: None,
                priority: None,
                required_capabilities: vec!["${skill}".to_string()],
                input: None,
            }],
            sync_points: vec![SyncPointShape {
                tasks: vec!["specialist-a".to_string()],
                required_count: None,
                timeout: None,
            }],
            join: Some(JoinShape {
                sources: vec!["specialist-a".to_string()],
                gate: JoinGate::All,
                continuation: ContinuationSpec::new("summarize-${target}"),
            }),
            merge: Some(MergeShape {
                sources: vec!["specialist-a".to_string()],
                strategy: MergeKind::Combine,
            }),
        }
    }

    #[test]
    fn test_validate_accepts_wellformed_template() {
        template().validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_duplicate_names() {
        let mut bad = template();
        bad.fan_out.push(TaskShape {
            name: "initial".to_string(),
            task_type: "x".to_string(),
            phase: None,
            priority: None,
            required_capabilities: vec![],
            input: None,
        });
        assert!(matches!(
            bad.validate(),
            Err(PatternError::DuplicateShapeName { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_unknown_reference() {
        let mut bad = template();
        bad.sync_points[0].tasks.push("ghost".to_string());
        let err = bad.validate().unwrap_err();
        assert!(matches!(err, PatternError::UnknownTaskRef { reference, .. } if reference == "ghost"));
    }

    #[test]
    fn test_resolve_substitutes_string_leaves() {
        let resolved = template()
            .resolve(&context(&[
                ("target", "auth-service"),
                ("phase", "review"),
                ("skill", "security"),
            ]))
            .unwrap();
        assert_eq!(resolved.initial_task.task_type, "prepare-auth-service");
        assert_eq!(resolved.initial_task.phase.as_deref(), Some("review"));
        assert_eq!(
            resolved.initial_task.input,
            Some(serde_json::json!({"target": "auth-service", "depth": 3}))
        );
        assert_eq!(resolved.fan_out[0].required_capabilities, vec!["security"]);
        assert_eq!(
            resolved.join.unwrap().continuation.task_type,
            "summarize-auth-service"
        );
    }

    #[test]
    fn test_resolve_leaves_structural_names_alone() {
        let resolved = template()
            .resolve(&context(&[
                ("target", "x"),
                ("phase", "p"),
                ("skill", "s"),
            ]))
            .unwrap();
        assert_eq!(resolved.initial_task.name, "initial");
        assert_eq!(resolved.sync_points[0].tasks, vec!["specialist-a"]);
        assert_eq!(resolved.merge.unwrap().sources, vec!["specialist-a"]);
    }

    #[test]
    fn test_resolve_fails_on_missing_key() {
        let err = template().resolve(&context(&[("phase", "p")])).unwrap_err();
        assert!(matches!(err, PatternError::UnresolvedPlaceholder { key } if key == "target"));
    }

    #[test]
    fn test_substitute_str_handles_partial_and_multiple() {
        let ctx = context(&[("a", "1"), ("b", "2")]);
        assert_eq!(substitute_str("${a} and ${b}!", &ctx).unwrap(), "1 and 2!");
        assert_eq!(substitute_str("no placeholders", &ctx).unwrap(), "no placeholders");
    }

    #[test]
    fn test_substitute_str_ignores_non_placeholder_braces() {
        let ctx = context(&[]);
        // Space makes the key unrecognized; the text passes through.
        assert_eq!(
            substitute_str("${not a key}", &ctx).unwrap(),
            "${not a key}"
        );
        // Unterminated placeholder is literal.
        assert_eq!(substitute_str("${dangling", &ctx).unwrap(), "${dangling");
    }
}
