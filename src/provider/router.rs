//! Model router
//!
//! Holds the configured profiles, resolves which one a turn should use,
//! caches one client per profile and sanitizes history for the target model.

use super::{ClientFactory, ModelClient, ModelError, ModelProfile};
use crate::config::ConfigurationError;
use crate::directive::strip_reasoning;
use crate::message::{Message, Role};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("unknown model '{0}'")]
    UnknownModel(String),
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("failed to construct client for '{id}': {source}")]
    ClientConstruction {
        id: String,
        #[source]
        source: ModelError,
    },
}

pub struct ModelRouter {
    profiles: IndexMap<String, ModelProfile>,
    factory: Arc<dyn ClientFactory>,
    clients: Mutex<HashMap<String, Arc<dyn ModelClient>>>,
}

impl ModelRouter {
    /// Validate the profile set and build a router.
    ///
    /// Fails when no profiles are configured, ids repeat, or more than one
    /// profile is marked default.
    pub fn new(
        profiles: Vec<ModelProfile>,
        factory: Arc<dyn ClientFactory>,
    ) -> Result<Self, ConfigurationError> {
        if profiles.is_empty() {
            return Err(ConfigurationError::NoModels);
        }

        let defaults: Vec<&str> = profiles
            .iter()
            .filter(|p| p.is_default)
            .map(|p| p.id.as_str())
            .collect();
        if defaults.len() > 1 {
            return Err(ConfigurationError::MultipleDefaults(
                defaults.iter().map(|s| s.to_string()).collect(),
            ));
        }

        let mut map = IndexMap::new();
        for profile in profiles {
            if map.contains_key(&profile.id) {
                return Err(ConfigurationError::DuplicateModel(profile.id));
            }
            map.insert(profile.id.clone(), profile);
        }

        Ok(Self {
            profiles: map,
            factory,
            clients: Mutex::new(HashMap::new()),
        })
    }

    /// Resolve a requested id to a profile. Empty/unset means the default.
    pub fn resolve(&self, requested_id: Option<&str>) -> Result<&ModelProfile, RouterError> {
        match requested_id.map(str::trim).filter(|s| !s.is_empty()) {
            None => self
                .profiles
                .values()
                .find(|p| p.is_default)
                .ok_or(RouterError::Configuration(ConfigurationError::NoDefaultModel)),
            Some(id) => {
                if let Some(profile) = self.profiles.get(id) {
                    return Ok(profile);
                }
                self.profiles
                    .values()
                    .find(|p| p.id.eq_ignore_ascii_case(id))
                    .ok_or_else(|| RouterError::UnknownModel(id.to_string()))
            }
        }
    }

    /// Get the client for a profile, constructing it on first use.
    ///
    /// One client per id for the life of the router.
    pub fn get_client(&self, id: &str) -> Result<Arc<dyn ModelClient>, RouterError> {
        let profile = self.resolve(Some(id))?;

        let mut clients = self.clients.lock();
        if let Some(client) = clients.get(&profile.id) {
            return Ok(client.clone());
        }

        let client = self
            .factory
            .build(profile)
            .map_err(|source| RouterError::ClientConstruction {
                id: profile.id.clone(),
                source,
            })?;
        clients.insert(profile.id.clone(), client.clone());
        Ok(client)
    }

    /// Prepare history for presentation to `target_model_id`.
    ///
    /// A model that does not produce reasoning traces never sees the
    /// `<think>` spans written by another model. System, user and observation
    /// messages pass through unmodified.
    pub fn sanitize(
        &self,
        messages: &[Message],
        target_model_id: &str,
    ) -> Result<Vec<Message>, RouterError> {
        let target = self.resolve(Some(target_model_id))?;
        if target.reasoning {
            return Ok(messages.to_vec());
        }

        Ok(messages
            .iter()
            .map(|m| {
                let foreign = m.model_id.as_deref() != Some(target.id.as_str());
                if m.role == Role::Assistant && foreign {
                    m.with_content(strip_reasoning(&m.content).trim())
                } else {
                    m.clone()
                }
            })
            .collect())
    }

    pub fn profiles(&self) -> impl Iterator<Item = &ModelProfile> {
        self.profiles.values()
    }

    pub fn ids(&self) -> Vec<String> {
        self.profiles.keys().cloned().collect()
    }

    /// Menu of available models, default marked
    pub fn menu(&self) -> String {
        let mut menu = String::from("--- Available models ---\n");
        for p in self.profiles.values() {
            let default = if p.is_default { " [default]" } else { "" };
            let reasoning = if p.reasoning { " (reasoning)" } else { "" };
            menu.push_str(&format!(
                "- {}: {} ({}, {}){}{}\n",
                p.id,
                p.description,
                p.backend_name,
                p.provider.as_str(),
                reasoning,
                default
            ));
        }
        menu.push_str("------------------------\nUse /use <id> to switch models\n");
        menu
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EchoClient(String);

    #[async_trait]
    impl ModelClient for EchoClient {
        async fn invoke(&self, _messages: &[Message]) -> Result<Message, ModelError> {
            Ok(Message::assistant("echo", self.0.clone()))
        }
    }

    #[derive(Default)]
    struct CountingFactory {
        built: AtomicUsize,
    }

    impl ClientFactory for CountingFactory {
        fn build(&self, profile: &ModelProfile) -> Result<Arc<dyn ModelClient>, ModelError> {
            self.built.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(EchoClient(profile.id.clone())))
        }
    }

    fn profiles() -> Vec<ModelProfile> {
        vec![
            ModelProfile::local("r1", "deepseek-r1:14b")
                .with_reasoning(true)
                .as_default(),
            ModelProfile::remote("coder", "deepseek-chat", "https://api.deepseek.com/v1", None),
        ]
    }

    fn router() -> ModelRouter {
        ModelRouter::new(profiles(), Arc::new(CountingFactory::default())).unwrap()
    }

    #[test]
    fn test_resolve_default_and_named() {
        let router = router();
        assert_eq!(router.resolve(None).unwrap().id, "r1");
        assert_eq!(router.resolve(Some("")).unwrap().id, "r1");
        assert_eq!(router.resolve(Some("coder")).unwrap().id, "coder");
        assert_eq!(router.resolve(Some("CODER")).unwrap().id, "coder");
    }

    #[test]
    fn test_resolve_unknown() {
        let router = router();
        assert!(matches!(
            router.resolve(Some("gpt-9")),
            Err(RouterError::UnknownModel(id)) if id == "gpt-9"
        ));
    }

    #[test]
    fn test_no_default_is_configuration_error() {
        let router = ModelRouter::new(
            vec![ModelProfile::local("a", "a")],
            Arc::new(CountingFactory::default()),
        )
        .unwrap();
        assert!(matches!(
            router.resolve(None),
            Err(RouterError::Configuration(ConfigurationError::NoDefaultModel))
        ));
        // Named lookup still works
        assert!(router.resolve(Some("a")).is_ok());
    }

    #[test]
    fn test_validation() {
        let factory: Arc<dyn ClientFactory> = Arc::new(CountingFactory::default());
        assert!(matches!(
            ModelRouter::new(vec![], factory.clone()),
            Err(ConfigurationError::NoModels)
        ));
        assert!(matches!(
            ModelRouter::new(
                vec![ModelProfile::local("a", "x"), ModelProfile::local("a", "y")],
                factory.clone()
            ),
            Err(ConfigurationError::DuplicateModel(_))
        ));
        assert!(matches!(
            ModelRouter::new(
                vec![
                    ModelProfile::local("a", "x").as_default(),
                    ModelProfile::local("b", "y").as_default()
                ],
                factory
            ),
            Err(ConfigurationError::MultipleDefaults(_))
        ));
    }

    #[test]
    fn test_client_is_cached_per_id() {
        let factory = Arc::new(CountingFactory::default());
        let router = ModelRouter::new(profiles(), factory.clone()).unwrap();

        let a = router.get_client("r1").unwrap();
        let b = router.get_client("r1").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(factory.built.load(Ordering::SeqCst), 1);

        router.get_client("coder").unwrap();
        assert_eq!(factory.built.load(Ordering::SeqCst), 2);

        assert!(matches!(
            router.get_client("missing"),
            Err(RouterError::UnknownModel(_))
        ));
    }

    #[test]
    fn test_sanitize_strips_foreign_reasoning() {
        let router = router();
        let history = vec![
            Message::system("<think>system text is untouched</think>"),
            Message::user("hi <think>user text too</think>"),
            Message::assistant("<think>secret plan</think>Action: getdate", "r1"),
            Message::observation("Execution result: 2026-10-17"),
        ];

        let clean = router.sanitize(&history, "coder").unwrap();
        assert_eq!(clean.len(), 4);
        assert_eq!(clean[0].content, history[0].content);
        assert_eq!(clean[1].content, history[1].content);
        assert!(!clean[2].content.contains("secret plan"));
        assert_eq!(clean[2].content, "Action: getdate");
        assert_eq!(clean[3].content, history[3].content);

        // Reasoning target keeps everything
        let kept = router.sanitize(&history, "r1").unwrap();
        assert!(kept[2].content.contains("secret plan"));
    }

    #[test]
    fn test_menu_marks_default() {
        let menu = router().menu();
        assert!(menu.contains("- r1:"));
        assert!(menu.contains("[default]"));
        assert!(menu.contains("/use"));
    }
}
