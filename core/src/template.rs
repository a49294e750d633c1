//! Benchmark templates: tool, command patterns and typed parameters
//!
//! Command patterns use `{name}` placeholders. [`render`] substitutes them from a
//! variable map, quoting values so the rendered line splits back into the same
//! arguments (see [`crate::process::split_command_line`]).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Database engines a template can target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    /// MySQL and wire-compatible servers
    Mysql,
    /// PostgreSQL and wire-compatible servers
    Postgresql,
}

impl DatabaseKind {
    /// Identifier used in templates and configs
    pub fn id(&self) -> &'static str {
        match self {
            DatabaseKind::Mysql => "mysql",
            DatabaseKind::Postgresql => "postgresql",
        }
    }
}

impl std::fmt::Display for DatabaseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Per-phase command patterns; a missing phase falls back to the adapter's default
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandTemplates {
    /// Prepare phase
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prepare: Option<String>,
    /// Run phase
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run: Option<String>,
    /// Cleanup phase
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleanup: Option<String>,
}

/// Declared type of a template parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    /// Whole number
    Integer,
    /// Floating point number
    Float,
    /// Free text
    String,
    /// true/false
    Boolean,
}

/// One declared template parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDef {
    /// Parameter name, also its placeholder
    pub name: String,
    /// Declared type
    #[serde(rename = "type")]
    pub kind: ParameterType,
    /// Value used when the task does not override it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    /// Inclusive lower bound for numbers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    /// Inclusive upper bound for numbers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Allowed values
    #[serde(default, skip_serializing_if = "Vec::is_empty", rename = "enum")]
    pub allowed: Vec<serde_json::Value>,
    /// Whether a value must be present after merging defaults
    #[serde(default)]
    pub required: bool,
}

impl ParameterDef {
    /// Integer parameter with a default
    pub fn integer(name: &str, default: i64) -> Self {
        Self {
            name: name.to_string(),
            kind: ParameterType::Integer,
            default: Some(default.into()),
            min: None,
            max: None,
            allowed: Vec::new(),
            required: false,
        }
    }

    /// String parameter with a default
    pub fn string(name: &str, default: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: ParameterType::String,
            default: Some(default.into()),
            min: None,
            max: None,
            allowed: Vec::new(),
            required: false,
        }
    }

    /// Set numeric bounds
    pub fn with_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    /// Restrict to a set of values
    pub fn with_allowed(mut self, allowed: Vec<serde_json::Value>) -> Self {
        self.allowed = allowed;
        self
    }

    /// Check a value against the declaration
    pub fn check(&self, value: &serde_json::Value) -> Result<(), TemplateError> {
        let type_ok = match self.kind {
            ParameterType::Integer => value.is_i64() || value.is_u64(),
            ParameterType::Float => value.is_number(),
            ParameterType::String => value.is_string(),
            ParameterType::Boolean => value.is_boolean(),
        };
        if !type_ok {
            return Err(TemplateError::InvalidParameter {
                name: self.name.clone(),
                reason: format!("expected {:?}, got {value}", self.kind),
            });
        }

        if let Some(number) = value.as_f64() {
            if let Some(min) = self.min {
                if number < min {
                    return Err(TemplateError::InvalidParameter {
                        name: self.name.clone(),
                        reason: format!("{number} is below the minimum {min}"),
                    });
                }
            }
            if let Some(max) = self.max {
                if number > max {
                    return Err(TemplateError::InvalidParameter {
                        name: self.name.clone(),
                        reason: format!("{number} is above the maximum {max}"),
                    });
                }
            }
        }

        if !self.allowed.is_empty() && !self.allowed.contains(value) {
            return Err(TemplateError::InvalidParameter {
                name: self.name.clone(),
                reason: format!("{value} is not one of the allowed values"),
            });
        }

        Ok(())
    }
}

/// Output parsing strategy declared by a template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// sysbench progress lines and summary block
    #[default]
    Sysbench,
}

/// Declarative description of a benchmark tool invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    /// Template identity
    pub id: String,
    /// Human-readable name
    #[serde(default)]
    pub name: String,
    /// Tool name, used to resolve the adapter
    pub tool: String,
    /// Supported database engines
    #[serde(default)]
    pub database_kinds: Vec<DatabaseKind>,
    /// Per-phase command patterns
    #[serde(default)]
    pub commands: CommandTemplates,
    /// Declared parameters
    #[serde(default)]
    pub parameters: Vec<ParameterDef>,
    /// Output parsing strategy
    #[serde(default)]
    pub output_format: OutputFormat,
}

impl Template {
    /// Template with no commands or parameters
    pub fn new(id: &str, tool: &str) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            tool: tool.to_string(),
            database_kinds: Vec::new(),
            commands: CommandTemplates::default(),
            parameters: Vec::new(),
            output_format: OutputFormat::default(),
        }
    }

    /// Add a parameter declaration
    pub fn with_parameter(mut self, param: ParameterDef) -> Self {
        self.parameters.push(param);
        self
    }

    /// Whether the template declares support for `kind` (no declaration means any)
    pub fn supports(&self, kind: DatabaseKind) -> bool {
        self.database_kinds.is_empty() || self.database_kinds.contains(&kind)
    }

    /// Merge defaults with overrides and check every value
    ///
    /// Overrides for undeclared parameters pass through unchecked, so tools can
    /// receive extra switches and internal markers.
    pub fn resolve_parameters(
        &self,
        overrides: &BTreeMap<String, serde_json::Value>,
    ) -> Result<BTreeMap<String, serde_json::Value>, TemplateError> {
        let mut resolved = BTreeMap::new();

        for param in &self.parameters {
            match overrides.get(&param.name).or(param.default.as_ref()) {
                Some(value) => {
                    param.check(value)?;
                    resolved.insert(param.name.clone(), value.clone());
                }
                None if param.required => {
                    return Err(TemplateError::MissingParameter(param.name.clone()));
                }
                None => {}
            }
        }

        for (name, value) in overrides {
            resolved
                .entry(name.clone())
                .or_insert_with(|| value.clone());
        }

        Ok(resolved)
    }
}

/// Template errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    /// Required parameter has no value
    #[error("missing required parameter: {0}")]
    MissingParameter(String),

    /// Value violates the declaration
    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter {
        /// Parameter name
        name: String,
        /// What is wrong
        reason: String,
    },

    /// Placeholder with no value
    #[error("unknown placeholder {{{0}}} in command template")]
    UnknownPlaceholder(String),

    /// `{` without a matching `}`
    #[error("unclosed placeholder in command template: {0}")]
    UnclosedPlaceholder(String),
}

impl From<TemplateError> for crate::error::BenchError {
    fn from(err: TemplateError) -> Self {
        crate::error::BenchError::validation(err.to_string())
    }
}

/// Render a JSON parameter value as plain text
pub fn value_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Quote a value so it survives command-line splitting as one argument
pub fn quote_arg(value: &str) -> String {
    let needs_quoting = value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '\'' | '"' | '`' | '\\'));
    if !needs_quoting {
        return value.to_string();
    }
    if !value.contains('\'') {
        return format!("'{value}'");
    }
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if matches!(c, '"' | '\\' | '`') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// Substitute `{name}` placeholders, quoting each value
pub fn render(pattern: &str, vars: &BTreeMap<String, String>) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(pattern.len());
    let mut rest = pattern;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after
            .find('}')
            .ok_or_else(|| TemplateError::UnclosedPlaceholder(pattern.to_string()))?;
        let name = after[..close].trim();
        let value = vars
            .get(name)
            .ok_or_else(|| TemplateError::UnknownPlaceholder(name.to_string()))?;
        out.push_str(&quote_arg(value));
        rest = &after[close + 1..];
    }
    out.push_str(rest);

    Ok(out)
}
