//! The request pipeline.

use std::pin::Pin;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use mnemo_common::{AgentRequest, AgentResponse, Result, StreamChunk};
use mnemo_llm::LlmClient;
use mnemo_memory::{MemoryStore, SessionRepository, SessionStore};
use tracing::{debug, info, warn};

use crate::config::MnemoConfig;
use crate::deletion::DeletionCheck;
use crate::detector::CommandDetector;
use crate::executor::{CommandExecutor, CommandReply};
use crate::memory_io::MemoryManager;
use crate::responder::{ContextProvider, ResponseGenerator};
use crate::session::SessionAuthenticator;
use crate::state::AgentState;

pub type ChunkStream = Pin<Box<dyn Stream<Item = StreamChunk> + Send>>;

/// Runs one request through authenticate, load, detect, execute,
/// respond and save, in that order.
///
/// Store and completion failures are absorbed by the stages; the only error
/// a run can return is request validation.
pub struct Coordinator {
    config: MnemoConfig,
    authenticator: SessionAuthenticator,
    memory: Arc<MemoryManager>,
    detector: CommandDetector,
    executor: CommandExecutor,
    responder: ResponseGenerator,
    llm: Arc<dyn LlmClient>,
}

impl Coordinator {
    pub fn new(
        config: MnemoConfig,
        sessions: Arc<dyn SessionStore>,
        store: Arc<dyn MemoryStore>,
        repo: Arc<dyn SessionRepository>,
        llm: Arc<dyn LlmClient>,
    ) -> Self {
        info!(
            model = %llm.model_name(),
            session_fallback = sessions.is_fallback(),
            "Initializing coordinator"
        );

        let memory = Arc::new(MemoryManager::new(sessions, store, &config.session, &config.agent));
        let deletion = DeletionCheck::new(llm.clone(), config.agent.deletion_preview_chars);
        let executor = CommandExecutor::new(
            memory.clone(),
            deletion,
            config.agent.clone(),
            config.session.default_user_id,
        );

        Self {
            authenticator: SessionAuthenticator::new(repo, config.session.clone()),
            detector: CommandDetector::new(config.agent.command_prefix),
            responder: ResponseGenerator::new(llm.clone(), &config.llm, config.agent.clone()),
            memory,
            executor,
            llm,
            config,
        }
    }

    pub fn with_context_provider(mut self, provider: Arc<dyn ContextProvider>) -> Self {
        self.responder = self.responder.with_context_provider(provider);
        self
    }

    pub fn config(&self) -> &MnemoConfig {
        &self.config
    }

    pub fn memory(&self) -> &MemoryManager {
        &self.memory
    }

    pub fn authenticator(&self) -> &SessionAuthenticator {
        &self.authenticator
    }

    pub fn model_name(&self) -> &str {
        self.llm.model_name()
    }

    /// Detect stage.
    pub fn detect(&self, state: AgentState) -> AgentState {
        let detection = self.detector.detect(state.current_message());
        if !detection.is_empty() {
            debug!(
                tags = ?detection.tags,
                explicit = ?detection.explicit.as_ref().map(|c| c.name.as_str()),
                "Commands detected"
            );
        }
        state.with_detection(detection)
    }

    pub async fn execute(&self, state: AgentState) -> (AgentState, Option<CommandReply>) {
        self.executor.execute(state).await
    }

    /// Everything up to (not including) response generation.
    async fn prepare(&self, request: &AgentRequest) -> AgentState {
        let mut state = AgentState::new(request.message.clone());
        state.allow_external_search = request.allow_external_search;

        let state = self
            .authenticator
            .bind(state, request.session_id.as_deref())
            .await;
        let state = self.memory.load(state).await;
        let state = self.detect(state);
        let (state, _reply) = self.execute(state).await;
        self.responder.gather_context(state).await
    }

    pub async fn run(&self, request: AgentRequest) -> Result<AgentResponse> {
        let request = request.validate()?;
        let state = self.prepare(&request).await;
        let state = if state.is_handled() {
            state
        } else {
            self.responder.respond(state).await
        };
        let state = self.memory.save(state).await;
        Ok(into_response(state))
    }

    /// Streaming variant of [`run`](Self::run).
    ///
    /// The turn is saved before the terminating chunk is yielded. Dropping the
    /// stream early stops consumption and nothing is saved.
    pub fn run_stream(self: Arc<Self>, request: AgentRequest) -> Result<ChunkStream> {
        let request = request.validate()?;

        let stream = async_stream::stream! {
            let state = self.prepare(&request).await;
            let session_id = state.session_id.clone().unwrap_or_default();

            if state.is_handled() {
                let reply = state.reply().unwrap_or_default().to_string();
                self.memory.save(state).await;
                if !reply.is_empty() {
                    yield StreamChunk::token(session_id.clone(), reply.clone());
                }
                yield StreamChunk::complete(session_id, reply);
            } else {
                let mut full = String::new();
                match self.responder.open_stream(&state).await {
                    Ok(mut tokens) => {
                        while let Some(item) = tokens.next().await {
                            match item {
                                Ok(token) => {
                                    if token.is_empty() {
                                        continue;
                                    }
                                    full.push_str(&token);
                                    yield StreamChunk::token(session_id.clone(), token);
                                }
                                Err(e) => {
                                    warn!(error = %e, session_id = %session_id, "Stream interrupted");
                                    let note = format!("\n\n(Note: the response was interrupted: {e})");
                                    full.push_str(&note);
                                    yield StreamChunk::token(session_id.clone(), note);
                                    break;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, session_id = %session_id, "Failed to open stream, using fallback reply");
                        let text = self.responder.fallback_text(state.current_message(), &e);
                        full.push_str(&text);
                        yield StreamChunk::token(session_id.clone(), text);
                    }
                }

                self.memory.save(state.with_reply(full.clone())).await;
                yield StreamChunk::complete(session_id, full);
            }
        };

        Ok(Box::pin(stream))
    }
}

fn into_response(state: AgentState) -> AgentResponse {
    AgentResponse {
        response: state.reply().unwrap_or_default().to_string(),
        session_id: state.session_id.clone().unwrap_or_default(),
        user_id: state.user_id,
        context: state.visible_context(),
    }
}
