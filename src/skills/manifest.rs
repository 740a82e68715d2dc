//! Logic manifest (`logic.yaml`)
//!
//! ```yaml
//! entry: local_files          # optional, compiled-in entry point
//! capabilities:               # optional, command-backed capabilities
//!   weather:
//!     description: Current weather for a city
//!     command: [python3, weather.py]
//!     params:
//!       - {name: city, kind: string, required: true}
//! ```

use super::builtin;
use super::{Capability, CapabilityError, CapabilityTable, LoadContext, ParamSpec};
use crate::directive::Arguments;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    #[serde(default)]
    pub description: String,
    /// argv; the first element is the program
    pub command: Vec<String>,
    #[serde(default)]
    pub params: Vec<ParamSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogicManifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub capabilities: BTreeMap<String, CommandSpec>,
}

impl LogicManifest {
    /// Parse and check a manifest without loading anything
    pub fn parse(content: &str) -> Result<Self, String> {
        let manifest: LogicManifest =
            serde_yaml::from_str(content).map_err(|e| format!("malformed logic manifest: {}", e))?;

        if let Some(entry) = &manifest.entry {
            if builtin::lookup(entry).is_none() {
                return Err(format!(
                    "unknown entry point '{}' (available: {})",
                    entry,
                    builtin::names().join(", ")
                ));
            }
        }
        for (name, spec) in &manifest.capabilities {
            if spec.command.is_empty() || spec.command[0].trim().is_empty() {
                return Err(format!("capability '{}' has an empty command", name));
            }
        }
        if manifest.entry.is_none() && manifest.capabilities.is_empty() {
            return Err("logic manifest declares no entry and no capabilities".to_string());
        }
        Ok(manifest)
    }

    pub fn load(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
        Self::parse(&content)
    }

    /// Build the capability table. Declared commands override entry-point
    /// capabilities of the same short name.
    pub fn instantiate(&self, ctx: &LoadContext) -> Result<CapabilityTable, String> {
        let mut table = match &self.entry {
            Some(entry) => {
                let build = builtin::lookup(entry)
                    .ok_or_else(|| format!("unknown entry point '{}'", entry))?;
                build(ctx)
            }
            None => CapabilityTable::new(),
        };

        for (name, spec) in &self.capabilities {
            let capability = CommandCapability::new(name, spec.clone(), &ctx.package_dir);
            table.insert(name.clone(), Arc::new(capability));
        }
        Ok(table)
    }
}

/// A capability backed by an external program.
///
/// Arguments go to stdin as one JSON object; stdout is the result. The child
/// is killed if the invocation future is dropped (engine timeout).
pub struct CommandCapability {
    name: String,
    spec: CommandSpec,
    working_dir: PathBuf,
}

impl CommandCapability {
    pub fn new(name: impl Into<String>, spec: CommandSpec, working_dir: &Path) -> Self {
        Self {
            name: name.into(),
            spec,
            working_dir: working_dir.to_path_buf(),
        }
    }
}

#[async_trait]
impl Capability for CommandCapability {
    fn description(&self) -> &str {
        &self.spec.description
    }

    fn params(&self) -> &[ParamSpec] {
        &self.spec.params
    }

    async fn invoke(&self, args: Arguments) -> Result<String, CapabilityError> {
        let (program, rest) = self
            .spec
            .command
            .split_first()
            .ok_or_else(|| CapabilityError::execution("empty command"))?;

        debug!(capability = %self.name, program = %program, "spawning command capability");

        let mut child = Command::new(program)
            .args(rest)
            .current_dir(&self.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CapabilityError::execution(format!("failed to spawn '{}': {}", program, e)))?;

        let input = serde_json::to_vec(&args)
            .map_err(|e| CapabilityError::execution(format!("failed to encode arguments: {}", e)))?;
        // Feed stdin while draining stdout/stderr so a filter that writes as
        // it reads cannot fill both pipes
        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                // A program that never reads stdin closes the pipe early; not an error
                let _ = stdin.write_all(&input).await;
                let _ = stdin.shutdown().await;
            }
        };
        let ((), output) = tokio::join!(feed, child.wait_with_output());
        let output = output
            .map_err(|e| CapabilityError::execution(format!("failed to run '{}': {}", program, e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            let code = output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            let detail = if stderr.trim().is_empty() {
                stdout.trim()
            } else {
                stderr.trim()
            };
            return Err(CapabilityError::execution(format!(
                "command exited with {}: {}",
                code, detail
            )));
        }

        Ok(stdout.trim_end().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn ctx(dir: &Path) -> LoadContext {
        LoadContext {
            package: "pkg".to_string(),
            package_dir: dir.to_path_buf(),
            skills_root: dir.parent().unwrap_or(dir).to_path_buf(),
        }
    }

    #[test]
    fn test_parse_entry_and_commands() {
        let manifest = LogicManifest::parse(
            r#"
entry: local_files
capabilities:
  shout:
    description: Upper-case text
    command: [tr, a-z, A-Z]
    params:
      - {name: text, kind: string, required: true}
"#,
        )
        .unwrap();
        assert_eq!(manifest.entry.as_deref(), Some("local_files"));
        assert_eq!(manifest.capabilities["shout"].command, vec!["tr", "a-z", "A-Z"]);
        assert!(manifest.capabilities["shout"].params[0].required);
    }

    #[test]
    fn test_parse_rejects_bad_manifests() {
        let unknown = LogicManifest::parse("entry: nope").unwrap_err();
        assert!(unknown.contains("unknown entry point 'nope'"));

        let empty_cmd =
            LogicManifest::parse("capabilities:\n  x:\n    command: []\n").unwrap_err();
        assert!(empty_cmd.contains("empty command"));

        let nothing = LogicManifest::parse("{}").unwrap_err();
        assert!(nothing.contains("no entry"));

        let malformed = LogicManifest::parse("entry: [unclosed").unwrap_err();
        assert!(malformed.starts_with("malformed logic manifest"));

        let stray = LogicManifest::parse("entry: local_files\nhandler: x\n").unwrap_err();
        assert!(stray.starts_with("malformed"));
    }

    #[test]
    fn test_command_overrides_entry_capability() {
        let temp = TempDir::new().unwrap();
        let manifest = LogicManifest::parse(
            "entry: local_files\ncapabilities:\n  getdate:\n    description: fixed date\n    command: [echo, '1999-12-31']\n",
        )
        .unwrap();
        let table = manifest.instantiate(&ctx(temp.path())).unwrap();
        assert!(table.contains_key("read_local_file"));
        assert_eq!(table["getdate"].description(), "fixed date");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_capability_reads_stdin_json() {
        let temp = TempDir::new().unwrap();
        let cap = CommandCapability::new(
            "cat",
            CommandSpec {
                description: "echo arguments".to_string(),
                command: vec!["cat".to_string()],
                params: vec![],
            },
            temp.path(),
        );

        let mut args = Arguments::new();
        args.insert("city".to_string(), json!("Oslo"));
        let out = cap.invoke(args).await.unwrap();
        let decoded: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(decoded, json!({"city": "Oslo"}));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_capability_streams_large_payload() {
        let temp = TempDir::new().unwrap();
        let cap = CommandCapability::new(
            "cat",
            CommandSpec {
                description: "echo arguments".to_string(),
                command: vec!["cat".to_string()],
                params: vec![],
            },
            temp.path(),
        );

        // Far larger than a pipe buffer; cat writes while it is still reading
        let content = "x".repeat(1 << 20);
        let mut args = Arguments::new();
        args.insert("content".to_string(), json!(content));

        let out = tokio::time::timeout(std::time::Duration::from_secs(30), cap.invoke(args))
            .await
            .expect("command capability stalled")
            .unwrap();
        let decoded: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(decoded["content"].as_str().map(str::len), Some(1 << 20));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_capability_failure_carries_stderr() {
        let temp = TempDir::new().unwrap();
        let cap = CommandCapability::new(
            "fail",
            CommandSpec {
                description: String::new(),
                command: vec![
                    "sh".to_string(),
                    "-c".to_string(),
                    "echo boom >&2; exit 3".to_string(),
                ],
                params: vec![],
            },
            temp.path(),
        );

        let err = cap.invoke(Arguments::new()).await.unwrap_err();
        assert_eq!(
            err,
            CapabilityError::Execution("command exited with 3: boom".to_string())
        );
    }

    #[tokio::test]
    async fn test_command_capability_missing_program() {
        let temp = TempDir::new().unwrap();
        let cap = CommandCapability::new(
            "ghost",
            CommandSpec {
                description: String::new(),
                command: vec!["definitely-not-a-real-program-xyz".to_string()],
                params: vec![],
            },
            temp.path(),
        );
        let err = cap.invoke(Arguments::new()).await.unwrap_err();
        assert!(err.to_string().contains("failed to spawn"));
    }
}
