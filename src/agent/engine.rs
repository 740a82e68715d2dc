//! Execution engine
//!
//! Resolves a directive to a capability, validates its arguments, invokes it
//! under a timeout with panics caught, and turns whatever happened into an
//! observation. Self-modifying capabilities trigger a registry rescan.

use crate::directive::{Arguments, Directive, DirectiveParseError, PAYLOAD_END, PAYLOAD_START};
use crate::skills::{
    str_arg, validate_arguments, ArgKind, Capability, CapabilityError, CapabilityTable,
    ParamSpec, SkillRegistry,
};
use async_trait::async_trait;
use futures::FutureExt;
use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const SKILL_DETAIL_ACTION: &str = "get_skill_detail";

const RESULT_PREFIX: &str = "Execution result: ";
const FAILURE_PREFIX: &str = "Execution failed: ";

/// Outcome of dispatching one directive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    /// Name as the model wrote it
    pub action: String,
    pub observation: String,
    pub is_error: bool,
    /// Package whose capability ran, or the package a manual was requested for
    pub package: Option<String>,
    /// Documented packages after a rescan, when one happened
    pub reloaded: Option<BTreeSet<String>>,
    pub duration_ms: u64,
}

/// `get_skill_detail`: owned by the engine, not by any package
struct SkillDetail {
    registry: SkillRegistry,
    params: Vec<ParamSpec>,
}

impl SkillDetail {
    fn new(registry: SkillRegistry) -> Self {
        Self {
            registry,
            params: vec![ParamSpec::required("skill_name", ArgKind::String)],
        }
    }
}

#[async_trait]
impl Capability for SkillDetail {
    fn description(&self) -> &str {
        "Read the detailed manual of a skill package before using it (args: skill_name)"
    }

    fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    async fn invoke(&self, args: Arguments) -> Result<String, CapabilityError> {
        let name = str_arg(&args, "skill_name").unwrap_or_default();
        Ok(self.registry.get_detail(name))
    }
}

pub struct ExecutionEngine {
    registry: SkillRegistry,
    base: CapabilityTable,
    self_modifying: BTreeSet<String>,
    timeout: Duration,
}

impl ExecutionEngine {
    pub fn new(registry: SkillRegistry, self_modifying: BTreeSet<String>, timeout: Duration) -> Self {
        let mut base = CapabilityTable::new();
        base.insert(
            SKILL_DETAIL_ACTION.to_string(),
            Arc::new(SkillDetail::new(registry.clone())),
        );
        Self {
            registry,
            base,
            self_modifying,
            timeout,
        }
    }

    pub fn registry(&self) -> &SkillRegistry {
        &self.registry
    }

    /// Engine-owned capabilities as `(name, description)`
    pub fn base_capabilities(&self) -> Vec<(String, String)> {
        self.base
            .iter()
            .map(|(name, cap)| (name.clone(), cap.description().to_string()))
            .collect()
    }

    /// Base capabilities first, then qualified name, then short name
    fn resolve(&self, directive: &Directive) -> Option<(Arc<dyn Capability>, Option<String>)> {
        if directive.qualifier.is_none() {
            if let Some(cap) = self.base.get(&directive.action) {
                return Some((cap.clone(), None));
            }
        }
        directive
            .qualified_name()
            .and_then(|name| self.registry.lookup_qualified(&name))
            .or_else(|| self.registry.lookup(&directive.action))
            .map(|entry| (entry.handler, Some(entry.package)))
    }

    /// Run a directive. Never fails: every error becomes an observation.
    pub async fn dispatch(&self, directive: &Directive) -> Dispatch {
        let label = directive
            .qualified_name()
            .unwrap_or_else(|| directive.action.clone());
        let start = Instant::now();

        let Some((handler, mut package)) = self.resolve(directive) else {
            warn!(action = %label, "unknown capability");
            return Dispatch {
                observation: failure(&CapabilityError::Unknown(label.clone())),
                action: label,
                is_error: true,
                package: None,
                reloaded: None,
                duration_ms: elapsed_ms(start),
            };
        };

        if package.is_none() && directive.action == SKILL_DETAIL_ACTION {
            package = str_arg(&directive.arguments, "skill_name")
                .map(str::trim)
                .filter(|name| self.registry.package(name).is_some())
                .map(String::from);
        }

        info!(action = %label, package = ?package, "dispatching capability");
        let result = self.invoke(&label, handler, directive.arguments.clone()).await;

        let reloaded = if self.self_modifying.contains(&directive.action) {
            self.rescan(&label).await
        } else {
            None
        };

        let duration_ms = elapsed_ms(start);
        let (observation, is_error) = match result {
            Ok(output) => {
                debug!(action = %label, duration_ms, "capability succeeded");
                (format!("{}{}", RESULT_PREFIX, output), false)
            }
            Err(e) => {
                warn!(action = %label, duration_ms, error = %e, "capability failed");
                (failure(&e), true)
            }
        };

        Dispatch {
            action: label,
            observation,
            is_error,
            package,
            reloaded,
            duration_ms,
        }
    }

    /// Rescan the skills root off the async workers
    async fn rescan(&self, label: &str) -> Option<BTreeSet<String>> {
        let registry = self.registry.clone();
        match tokio::task::spawn_blocking(move || registry.scan()).await {
            Ok(packages) => {
                info!(action = %label, packages = packages.len(), "registry rescanned after self-modifying call");
                Some(packages)
            }
            Err(e) => {
                warn!(action = %label, error = %e, "registry rescan aborted");
                None
            }
        }
    }

    async fn invoke(
        &self,
        name: &str,
        handler: Arc<dyn Capability>,
        args: Arguments,
    ) -> Result<String, CapabilityError> {
        validate_arguments(handler.params(), &args).map_err(|reason| {
            CapabilityError::InvalidArguments {
                action: name.to_string(),
                reason,
            }
        })?;

        let call = AssertUnwindSafe(handler.invoke(args)).catch_unwind();
        match tokio::time::timeout(self.timeout, call).await {
            Err(_) => Err(CapabilityError::Timeout {
                name: name.to_string(),
                after: self.timeout,
            }),
            Ok(Err(panic)) => Err(CapabilityError::Panicked {
                name: name.to_string(),
                message: panic_message(panic.as_ref()),
            }),
            Ok(Ok(result)) => result,
        }
    }
}

/// Observation fed back when the model's directive could not be parsed
pub fn parse_failure_observation(err: &DirectiveParseError) -> String {
    format!(
        "{}could not parse directive ({}). Keep Action Input as simple JSON and put long text between {} and {}.",
        FAILURE_PREFIX, err, PAYLOAD_START, PAYLOAD_END
    )
}

fn failure(err: &CapabilityError) -> String {
    format!("{}{}", FAILURE_PREFIX, err)
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn args(v: serde_json::Value) -> Arguments {
        match v {
            serde_json::Value::Object(m) => m,
            _ => unreachable!(),
        }
    }

    fn directive(action: &str, a: serde_json::Value) -> Directive {
        Directive::new(action, args(a))
    }

    fn setup(root: &std::path::Path) -> ExecutionEngine {
        let until = root.join("until");
        std::fs::create_dir_all(&until).unwrap();
        std::fs::write(until.join("logic.yaml"), "entry: local_files").unwrap();
        std::fs::write(until.join("doc.md"), "Local file tools\nPreferred Brain: coder\n").unwrap();

        let learn = root.join("self_learning");
        std::fs::create_dir_all(&learn).unwrap();
        std::fs::write(learn.join("logic.yaml"), "entry: self_learning").unwrap();

        let registry = SkillRegistry::new(root);
        registry.scan();
        ExecutionEngine::new(
            registry,
            ["deploy_new_skill".to_string(), "write_skill_doc".to_string()].into(),
            Duration::from_secs(5),
        )
    }

    struct Sleepy;

    #[async_trait]
    impl Capability for Sleepy {
        fn description(&self) -> &str {
            "sleeps"
        }
        async fn invoke(&self, _args: Arguments) -> Result<String, CapabilityError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("late".to_string())
        }
    }

    struct Panicky;

    #[async_trait]
    impl Capability for Panicky {
        fn description(&self) -> &str {
            "panics"
        }
        async fn invoke(&self, _args: Arguments) -> Result<String, CapabilityError> {
            panic!("kaboom")
        }
    }

    #[tokio::test]
    async fn test_success_observation() {
        let temp = TempDir::new().unwrap();
        let engine = setup(temp.path());

        let d = engine.dispatch(&directive("getdate", json!({}))).await;
        assert!(!d.is_error);
        assert!(d.observation.starts_with("Execution result: "));
        assert_eq!(d.package.as_deref(), Some("until"));
        assert!(d.reloaded.is_none());
    }

    #[tokio::test]
    async fn test_unknown_capability() {
        let temp = TempDir::new().unwrap();
        let engine = setup(temp.path());

        let d = engine.dispatch(&directive("fly_to_moon", json!({}))).await;
        assert!(d.is_error);
        assert_eq!(d.observation, "Execution failed: unknown capability 'fly_to_moon'");
    }

    #[tokio::test]
    async fn test_invalid_arguments() {
        let temp = TempDir::new().unwrap();
        let engine = setup(temp.path());

        let d = engine.dispatch(&directive("read_local_file", json!({"path": "x"}))).await;
        assert!(d.is_error);
        assert!(d.observation.contains("invalid arguments for 'read_local_file'"));
        assert!(d.observation.contains("file_path"));
    }

    #[tokio::test]
    async fn test_qualified_lookup_then_short_fallback() {
        let temp = TempDir::new().unwrap();
        let engine = setup(temp.path());

        let mut d = directive("getdate", json!({}));
        d.qualifier = Some("until".to_string());
        let out = engine.dispatch(&d).await;
        assert_eq!(out.action, "until.getdate");
        assert!(!out.is_error);

        // Stale package prefix still reaches the short name
        d.qualifier = Some("old_pkg".to_string());
        let out = engine.dispatch(&d).await;
        assert!(!out.is_error);
        assert_eq!(out.package.as_deref(), Some("until"));
    }

    #[tokio::test]
    async fn test_skill_detail_is_base_capability() {
        let temp = TempDir::new().unwrap();
        let engine = setup(temp.path());

        let d = engine
            .dispatch(&directive(SKILL_DETAIL_ACTION, json!({"skill_name": "until"})))
            .await;
        assert!(!d.is_error);
        assert!(d.observation.contains("Local file tools"));
        assert_eq!(d.package.as_deref(), Some("until"));

        let missing = engine
            .dispatch(&directive(SKILL_DETAIL_ACTION, json!({"skill_name": "nope"})))
            .await;
        assert!(!missing.is_error);
        assert!(missing.observation.contains("no detailed manual found for skill 'nope'"));
        assert!(missing.package.is_none());
    }

    #[tokio::test]
    async fn test_self_modifying_call_rescans() {
        let temp = TempDir::new().unwrap();
        let engine = setup(temp.path());
        assert!(engine.registry().lookup("shout").is_none());

        let logic = "capabilities:\n  shout:\n    description: echo\n    command: [echo, HI]\n";
        let d = engine
            .dispatch(&directive(
                "deploy_new_skill",
                json!({"skill_name": "loud", "logic_content": logic}),
            ))
            .await;
        assert!(!d.is_error, "{}", d.observation);
        assert!(d.reloaded.is_some());
        assert!(engine.registry().lookup("shout").is_some());

        // Failure still rescans
        let bad = engine
            .dispatch(&directive(
                "deploy_new_skill",
                json!({"skill_name": "bad", "logic_content": "entry: nope"}),
            ))
            .await;
        assert!(bad.is_error);
        assert!(bad.reloaded.is_some());
    }

    #[tokio::test]
    async fn test_timeout_and_panic_become_observations() {
        let temp = TempDir::new().unwrap();
        let mut engine = setup(temp.path());
        engine.timeout = Duration::from_millis(50);
        engine.base.insert("sleepy".to_string(), Arc::new(Sleepy));
        engine.base.insert("panicky".to_string(), Arc::new(Panicky));

        let slow = engine.dispatch(&directive("sleepy", json!({}))).await;
        assert!(slow.is_error);
        assert_eq!(
            slow.observation,
            "Execution failed: capability 'sleepy' did not respond within 50ms"
        );

        let boom = engine.dispatch(&directive("panicky", json!({}))).await;
        assert!(boom.is_error);
        assert!(boom.observation.contains("kaboom"));
    }

    #[test]
    fn test_parse_failure_observation() {
        let err = DirectiveParseError {
            action: "write_local_file".to_string(),
            fragment: "{oops".to_string(),
            reason: "unterminated JSON object".to_string(),
        };
        let text = parse_failure_observation(&err);
        assert!(text.starts_with("Execution failed: could not parse directive ("));
        assert!(text.ends_with("put long text between [CONTENT_START] and [CONTENT_END]."));
    }
}
