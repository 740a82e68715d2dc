//! Turn state machine
//!
//! One external request runs AGENT_TURN -> (TOOL_TURN -> AGENT_TURN)* -> DONE.
//! Each step appends exactly one message to the conversation, and only after
//! its await completed, so dropping the request future never leaves a
//! half-written step behind.

use super::engine::{parse_failure_observation, ExecutionEngine};
use super::prompt::PromptBuilder;
use crate::config::AgentSettings;
use crate::directive::{strip_reasoning, Directive, DirectiveParseError, DirectiveParser};
use crate::events::{emit, EventSender, TurnEvent};
use crate::message::{ConversationState, Message};
use crate::provider::{ModelError, ModelRouter, RouterError};
use crate::skills::SkillRegistry;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What the tool step will act on
#[derive(Debug, Clone, PartialEq)]
pub enum ToolRequest {
    Directive(Directive),
    ParseError(DirectiveParseError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TurnState {
    AgentTurn,
    ToolTurn(ToolRequest),
    Done,
}

/// How a request ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Final answer with reasoning removed
    Answer { text: String, iterations: usize },
    /// The model kept issuing directives past the configured bound
    IterationLimitExceeded { iterations: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error(transparent)]
    Router(#[from] RouterError),
    #[error("model '{model}' failed: {source}")]
    Model {
        model: String,
        #[source]
        source: ModelError,
    },
    #[error("failed to render system prompt: {0}")]
    Prompt(#[from] handlebars::RenderError),
}

#[derive(Debug, Clone)]
pub struct TurnSettings {
    pub max_iterations: usize,
    pub model_timeout: Duration,
    pub follow_skill_preferences: bool,
}

impl From<&AgentSettings> for TurnSettings {
    fn from(settings: &AgentSettings) -> Self {
        Self {
            max_iterations: settings.max_iterations,
            model_timeout: settings.model_timeout(),
            follow_skill_preferences: settings.follow_skill_preferences,
        }
    }
}

pub struct TurnMachine {
    router: Arc<ModelRouter>,
    engine: ExecutionEngine,
    parser: DirectiveParser,
    prompt: PromptBuilder,
    settings: TurnSettings,
}

impl TurnMachine {
    pub fn new(
        router: Arc<ModelRouter>,
        engine: ExecutionEngine,
        parser: DirectiveParser,
        prompt: PromptBuilder,
        settings: TurnSettings,
    ) -> Self {
        Self {
            router,
            engine,
            parser,
            prompt,
            settings,
        }
    }

    /// Wire up a machine from the agent settings and run the initial scan
    pub fn from_settings(
        router: Arc<ModelRouter>,
        settings: &AgentSettings,
    ) -> Result<Self, handlebars::TemplateError> {
        let registry = SkillRegistry::new(&settings.skills_dir);
        let packages = registry.scan();
        info!(root = %settings.skills_dir.display(), documented = ?packages, "skills discovered");

        let engine = ExecutionEngine::new(
            registry,
            settings.self_modifying.clone(),
            settings.capability_timeout(),
        );
        let parser = DirectiveParser::new(settings.payload_keys.clone());
        let prompt = PromptBuilder::new(settings.base_prompt.clone(), settings.manifest.clone())?;

        Ok(Self::new(router, engine, parser, prompt, settings.into()))
    }

    pub fn router(&self) -> &ModelRouter {
        &self.router
    }

    pub fn registry(&self) -> &SkillRegistry {
        self.engine.registry()
    }

    /// Change the session's active model. Unknown ids leave it unchanged.
    pub fn switch_model(
        &self,
        state: &mut ConversationState,
        model_id: &str,
    ) -> Result<String, RouterError> {
        let profile = self.router.resolve(Some(model_id))?;
        info!(session = %state.session_id, model = %profile.id, "active model switched");
        state.active_model_id = Some(profile.id.clone());
        Ok(profile.id.clone())
    }

    /// Process one external request to completion
    pub async fn run(
        &self,
        state: &mut ConversationState,
        input: &str,
        events: Option<&EventSender>,
    ) -> Result<TurnOutcome, TurnError> {
        // Nothing is appended when no model can serve this session
        self.select_model(state, None)?;
        state.push(Message::user(input));

        // Routing hint from the last used package; lives for this request only
        let mut preferred: Option<String> = None;
        let mut iterations = 0;
        let mut last_reply = String::new();
        let mut turn = TurnState::AgentTurn;

        loop {
            turn = match turn {
                TurnState::AgentTurn => {
                    if iterations >= self.settings.max_iterations {
                        warn!(session = %state.session_id, iterations, "iteration limit reached");
                        emit(events, TurnEvent::Done);
                        return Ok(TurnOutcome::IterationLimitExceeded { iterations });
                    }
                    iterations += 1;

                    last_reply = self.agent_turn(state, preferred.as_deref(), events).await?;
                    match self.parser.parse(&last_reply) {
                        Ok(Some(directive)) => TurnState::ToolTurn(ToolRequest::Directive(directive)),
                        Ok(None) => TurnState::Done,
                        Err(e) => TurnState::ToolTurn(ToolRequest::ParseError(e)),
                    }
                }
                TurnState::ToolTurn(ToolRequest::Directive(directive)) => {
                    let observation = self.tool_turn(&directive, &mut preferred, events).await;
                    state.push(Message::observation(observation));
                    TurnState::AgentTurn
                }
                TurnState::ToolTurn(ToolRequest::ParseError(e)) => {
                    debug!(error = %e, "directive did not parse");
                    state.push(Message::observation(parse_failure_observation(&e)));
                    TurnState::AgentTurn
                }
                TurnState::Done => {
                    emit(events, TurnEvent::Done);
                    let text = strip_reasoning(&last_reply).trim().to_string();
                    return Ok(TurnOutcome::Answer { text, iterations });
                }
            };
        }
    }

    /// Model for this turn: the package preference when it resolves,
    /// otherwise the session's active model (or the default)
    fn select_model(
        &self,
        state: &ConversationState,
        preferred: Option<&str>,
    ) -> Result<String, RouterError> {
        if let Some(id) = preferred {
            match self.router.resolve(Some(id)) {
                Ok(profile) => return Ok(profile.id.clone()),
                Err(e) => warn!(preferred = %id, error = %e, "skill preference ignored"),
            }
        }

        match self.router.resolve(state.active_model_id.as_deref()) {
            Ok(profile) => Ok(profile.id.clone()),
            Err(RouterError::UnknownModel(stale)) => {
                warn!(model = %stale, "active model no longer configured, using default");
                Ok(self.router.resolve(None)?.id.clone())
            }
            Err(e) => Err(e),
        }
    }

    async fn agent_turn(
        &self,
        state: &mut ConversationState,
        preferred: Option<&str>,
        events: Option<&EventSender>,
    ) -> Result<String, TurnError> {
        let model_id = self.select_model(state, preferred)?;
        let client = self.router.get_client(&model_id)?;
        emit(events, TurnEvent::AgentTurnStart { model: model_id.clone() });

        let mut tools = self.engine.base_capabilities();
        tools.extend(self.engine.registry().capabilities());
        let system = self.prompt.render(&tools)?;

        let mut request = Vec::with_capacity(state.len() + 1);
        request.push(Message::system(system));
        request.extend(self.router.sanitize(state.messages(), &model_id)?);

        info!(session = %state.session_id, model = %model_id, messages = request.len(), "invoking model");
        let timeout = self.settings.model_timeout;
        let reply = tokio::time::timeout(timeout, client.invoke(&request))
            .await
            .map_err(|_| TurnError::Model {
                model: model_id.clone(),
                source: ModelError::Timeout(model_id.clone(), timeout.as_secs()),
            })?
            .map_err(|source| TurnError::Model {
                model: model_id.clone(),
                source,
            })?;

        let content = reply.content;
        state.push(Message::assistant(content.clone(), model_id));
        emit(events, TurnEvent::AssistantMessage { text: content.clone() });
        Ok(content)
    }

    async fn tool_turn(
        &self,
        directive: &Directive,
        preferred: &mut Option<String>,
        events: Option<&EventSender>,
    ) -> String {
        let action = directive
            .qualified_name()
            .unwrap_or_else(|| directive.action.clone());
        emit(events, TurnEvent::CapabilityStart { action: action.clone() });

        let dispatch = self.engine.dispatch(directive).await;

        emit(
            events,
            TurnEvent::CapabilityEnd {
                action,
                is_error: dispatch.is_error,
                duration_ms: dispatch.duration_ms,
            },
        );
        if let Some(packages) = dispatch.reloaded {
            emit(events, TurnEvent::RegistryReloaded { packages });
        }

        if self.settings.follow_skill_preferences {
            *preferred = dispatch
                .package
                .as_deref()
                .and_then(|package| self.engine.registry().preferred_model_for(package));
            if let Some(id) = preferred.as_deref() {
                debug!(model = %id, package = ?dispatch.package, "next turn follows skill preference");
            }
        }

        dispatch.observation
    }
}
