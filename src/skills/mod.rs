//! Capability system
//!
//! A skill package is a directory under the skills root holding a `doc.md`
//! (documentation, optional) and/or a `logic.yaml` (logic manifest, optional).
//! The manifest's entry point yields a table of short name -> capability.
//! The registry scans packages and swaps in a fresh capability set on rescan.

pub mod builtin;
mod manifest;
mod registry;

pub use manifest::{CommandCapability, CommandSpec, LogicManifest};
pub use registry::{
    extract_preferred_model, CapabilityEntry, SkillPackage, SkillRegistry, DOC_FILE, LOGIC_FILE,
};

use crate::directive::Arguments;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Failure of a single capability invocation. Always recoverable: the
/// execution engine turns it into an observation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CapabilityError {
    #[error("unknown capability '{0}'")]
    Unknown(String),
    #[error("invalid arguments for '{action}': {reason}")]
    InvalidArguments { action: String, reason: String },
    #[error("{0}")]
    Execution(String),
    #[error("capability '{name}' did not respond within {}", format_timeout(.after))]
    Timeout { name: String, after: Duration },
    #[error("capability '{name}' panicked: {message}")]
    Panicked { name: String, message: String },
}

/// `2s`, `1.5s`, `250ms`
fn format_timeout(after: &Duration) -> String {
    if after.subsec_millis() == 0 && after.as_secs() > 0 {
        format!("{}s", after.as_secs())
    } else if after.as_secs() == 0 {
        format!("{}ms", after.as_millis())
    } else {
        format!("{:.1}s", after.as_secs_f64())
    }
}

impl CapabilityError {
    pub fn execution(message: impl Into<String>) -> Self {
        CapabilityError::Execution(message.into())
    }
}

/// A package whose logic could not be loaded. The scan logs it and moves on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("failed to load skill package '{package}': {reason}")]
pub struct CapabilityLoadError {
    pub package: String,
    pub reason: String,
}

/// Expected shape of an argument value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ArgKind {
    String,
    Number,
    Integer,
    Bool,
    List,
    Map,
    #[default]
    Any,
}

impl ArgKind {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ArgKind::String => value.is_string(),
            ArgKind::Number => value.is_number(),
            ArgKind::Integer => value.is_i64() || value.is_u64(),
            ArgKind::Bool => value.is_boolean(),
            ArgKind::List => value.is_array(),
            ArgKind::Map => value.is_object(),
            ArgKind::Any => true,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ArgKind::String => "string",
            ArgKind::Number => "number",
            ArgKind::Integer => "integer",
            ArgKind::Bool => "bool",
            ArgKind::List => "list",
            ArgKind::Map => "map",
            ArgKind::Any => "any",
        }
    }
}

/// A declared parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(default)]
    pub kind: ArgKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl ParamSpec {
    pub fn required(name: impl Into<String>, kind: ArgKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
            description: String::new(),
        }
    }

    pub fn optional(name: impl Into<String>, kind: ArgKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            description: String::new(),
        }
    }
}

/// Check arguments against declared parameters.
///
/// Required params must be present and non-null; present params must match
/// their kind (null counts as absent for optional ones). Undeclared keys are
/// tolerated.
pub fn validate_arguments(params: &[ParamSpec], args: &Arguments) -> Result<(), String> {
    for param in params {
        match args.get(&param.name) {
            None | Some(Value::Null) if param.required => {
                return Err(format!("missing required argument '{}'", param.name));
            }
            None | Some(Value::Null) => {}
            Some(value) if !param.kind.matches(value) => {
                return Err(format!(
                    "argument '{}' must be a {}",
                    param.name,
                    param.kind.as_str()
                ));
            }
            Some(_) => {}
        }
    }
    Ok(())
}

/// A callable capability: `invoke(named arguments) -> text`
#[async_trait]
pub trait Capability: Send + Sync {
    /// One-line summary first; shown in the system prompt tool list
    fn description(&self) -> &str;

    /// Declared parameters, validated before `invoke`
    fn params(&self) -> &[ParamSpec] {
        &[]
    }

    async fn invoke(&self, args: Arguments) -> Result<String, CapabilityError>;
}

/// Short name -> capability, as returned by an entry point
pub type CapabilityTable = BTreeMap<String, Arc<dyn Capability>>;

/// What an entry point gets to know about where it is loaded
#[derive(Debug, Clone)]
pub struct LoadContext {
    pub package: String,
    pub package_dir: PathBuf,
    pub skills_root: PathBuf,
}

/// Read a string argument (already validated when declared)
pub(crate) fn str_arg<'a>(args: &'a Arguments, name: &str) -> Option<&'a str> {
    args.get(name).and_then(Value::as_str)
}
