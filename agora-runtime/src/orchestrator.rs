//! Conversation Orchestrator
//!
//! Fans user messages out to persona agents and merges their streamed replies:
//! - One worker task per agent runs that agent's jobs in submission order
//! - Different agents stream fully in parallel
//! - Every history mutation for an agent goes through its worker
//! - Progress is reported on one event channel, tagged by agent

use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use agora_agents::{AgentProfile, AgentRegistry, AgentSummary, LlmError, SharedBackend};
use agora_core::{ConversationStore, Message, Role, SearchHit, DEFAULT_SEARCH_ACKNOWLEDGEMENT};
use agora_search::{SearchAcquirer, SearchError};

use crate::ChatEvent;

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Stored messages replayed per request (`None` = full history)
    pub max_history_messages: Option<usize>,
    /// Assistant reply recorded after injected search results
    pub search_acknowledgement: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_history_messages: None,
            search_acknowledgement: DEFAULT_SEARCH_ACKNOWLEDGEMENT.to_string(),
        }
    }
}

/// Errors reported synchronously to the caller
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Message is empty")]
    EmptyMessage,

    #[error("Please select at least one agent")]
    NoAgentSelected,

    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    #[error("Web search is not configured")]
    SearchUnavailable,

    #[error(transparent)]
    Search(#[from] SearchError),
}

/// Work queued for one agent
enum AgentJob {
    /// Answer a user message
    Exchange { exchange_id: Uuid, text: String },
    /// Record a synthetic user/assistant pair without calling the backend
    Inject {
        user: Message,
        assistant: Message,
        done: oneshot::Sender<bool>,
    },
}

/// State shared with background search tasks
struct Shared {
    registry: Arc<AgentRegistry>,
    queues: HashMap<String, mpsc::UnboundedSender<AgentJob>>,
    events: mpsc::UnboundedSender<ChatEvent>,
    acknowledgement: String,
}

impl Shared {
    fn emit(&self, event: ChatEvent) {
        // A closed receiver means the boundary is gone
        let _ = self.events.send(event);
    }

    async fn broadcast(&self, result: &Result<SearchHit, SearchError>) -> usize {
        let hit = match result {
            Ok(hit) => hit,
            Err(e) => {
                warn!("Search failed: {}", e);
                self.emit(ChatEvent::SearchFailed {
                    message: e.to_string(),
                });
                return 0;
            }
        };

        let context = hit.context_message();
        let mut pending = Vec::with_capacity(self.queues.len());

        for profile in self.registry.profiles() {
            let Some(queue) = self.queues.get(&profile.id) else {
                continue;
            };
            let (done, applied) = oneshot::channel();
            let job = AgentJob::Inject {
                user: context.clone(),
                assistant: Message::assistant(self.acknowledgement.as_str()),
                done,
            };
            if queue.send(job).is_ok() {
                pending.push(applied);
            } else {
                warn!("Worker for {} has stopped, skipping search context", profile.id);
            }
        }

        let mut agents_updated = 0;
        for applied in pending {
            if let Ok(true) = applied.await {
                agents_updated += 1;
            }
        }

        info!(
            "Search results for '{}' added to {} conversations",
            hit.query, agents_updated
        );

        self.emit(ChatEvent::SearchCompleted {
            query: hit.query.clone(),
            snippet_text: hit.snippet_text.clone(),
            agents_updated,
        });

        agents_updated
    }
}

/// Processes one agent's jobs, one at a time
struct AgentWorker {
    profile: AgentProfile,
    store: Arc<ConversationStore>,
    backend: SharedBackend,
    events: mpsc::UnboundedSender<ChatEvent>,
    max_history: Option<usize>,
}

impl AgentWorker {
    async fn run(self, mut jobs: mpsc::UnboundedReceiver<AgentJob>) {
        while let Some(job) = jobs.recv().await {
            match job {
                AgentJob::Exchange { exchange_id, text } => self.exchange(exchange_id, text).await,
                AgentJob::Inject {
                    user,
                    assistant,
                    done,
                } => {
                    let applied = match self.store.append_pair(&self.profile.id, user, assistant) {
                        Ok(()) => true,
                        Err(e) => {
                            error!("Failed to add search context for {}: {}", self.profile.id, e);
                            false
                        }
                    };
                    let _ = done.send(applied);
                }
            }
        }

        debug!("Worker for {} stopped", self.profile.id);
    }

    fn emit(&self, event: ChatEvent) {
        let _ = self.events.send(event);
    }

    fn fail(&self, exchange_id: Uuid, error: String) {
        warn!("Agent {} failed: {}", self.profile.id, error);
        self.emit(ChatEvent::Failed {
            agent_id: self.profile.id.clone(),
            exchange_id,
            error,
        });
    }

    async fn exchange(&self, exchange_id: Uuid, text: String) {
        let agent_id = &self.profile.id;

        // The user message is kept even if the reply fails
        if let Err(e) = self.store.append(agent_id, Message::user(text)) {
            self.fail(exchange_id, e.to_string());
            return;
        }

        self.emit(ChatEvent::Started {
            agent_id: agent_id.clone(),
            display_name: self.profile.display_name.clone(),
            exchange_id,
        });

        let full_text = match self.stream_reply(exchange_id).await {
            Ok(full_text) => full_text,
            Err(e) => {
                self.fail(exchange_id, e.to_string());
                return;
            }
        };

        if let Err(e) = self.store.append(agent_id, Message::assistant(full_text.as_str())) {
            self.fail(exchange_id, e.to_string());
            return;
        }

        debug!("Agent {} replied with {} characters", agent_id, full_text.len());

        self.emit(ChatEvent::Completed {
            agent_id: agent_id.clone(),
            exchange_id,
            full_text,
        });
    }

    /// Stream one reply, forwarding every delta; the stream is dropped on every exit path
    async fn stream_reply(&self, exchange_id: Uuid) -> Result<String, LlmError> {
        let history = self.store.history(&self.profile.id).unwrap_or_default();
        let context = build_context(&self.profile.system_prompt, &history, self.max_history);

        let mut stream = self.backend.stream_chat(&context).await?;
        let mut full_text = String::new();

        while let Some(delta) = stream.next().await {
            let delta = delta?;
            full_text.push_str(&delta);
            self.emit(ChatEvent::Chunk {
                agent_id: self.profile.id.clone(),
                exchange_id,
                text: delta,
            });
        }

        if full_text.trim().is_empty() {
            return Err(LlmError::EmptyResponse);
        }

        Ok(full_text)
    }
}

/// Request context: the system prompt followed by the replayed history
///
/// With a limit, only the last `limit` stored messages (at least one) are
/// replayed, and the window never opens on an assistant reply.
pub fn build_context(
    system_prompt: &str,
    history: &[Message],
    max_history: Option<usize>,
) -> Vec<Message> {
    let mut window = history;

    if let Some(limit) = max_history {
        let limit = limit.max(1);
        if window.len() > limit {
            window = &window[window.len() - limit..];
            while window.len() > 1 && window[0].role == Role::Assistant {
                window = &window[1..];
            }
        }
    }

    let mut context = Vec::with_capacity(window.len() + 1);
    context.push(Message::system(system_prompt));
    context.extend_from_slice(window);
    context
}

/// The multi-agent conversation orchestrator
///
/// Must be created inside a Tokio runtime. Dropping it aborts every worker
/// and search task, releasing in-flight backend streams and browsers.
pub struct ConversationOrchestrator {
    shared: Arc<Shared>,
    store: Arc<ConversationStore>,
    search: Option<Arc<SearchAcquirer>>,
    tasks: Mutex<JoinSet<()>>,
}

impl ConversationOrchestrator {
    /// Create the orchestrator and the receiver for its events
    pub fn new(
        registry: Arc<AgentRegistry>,
        backend: SharedBackend,
        config: OrchestratorConfig,
    ) -> (Self, mpsc::UnboundedReceiver<ChatEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let store = Arc::new(ConversationStore::new());
        let mut tasks = JoinSet::new();
        let mut queues = HashMap::new();

        for profile in registry.profiles() {
            store.register(&profile.id);

            let (queue, jobs) = mpsc::unbounded_channel();
            let worker = AgentWorker {
                profile: profile.clone(),
                store: store.clone(),
                backend: backend.clone(),
                events: events.clone(),
                max_history: config.max_history_messages,
            };
            tasks.spawn(worker.run(jobs));
            queues.insert(profile.id.clone(), queue);
        }

        info!(
            "Orchestrating {} agents with model {}",
            registry.len(),
            backend.model_name()
        );

        let shared = Arc::new(Shared {
            registry,
            queues,
            events,
            acknowledgement: config.search_acknowledgement,
        });

        let orchestrator = Self {
            shared,
            store,
            search: None,
            tasks: Mutex::new(tasks),
        };

        (orchestrator, receiver)
    }

    /// Attach a search acquirer for [`Self::perform_search`]
    pub fn with_search(mut self, acquirer: Arc<SearchAcquirer>) -> Self {
        self.search = Some(acquirer);
        self
    }

    /// Ids and display names of all agents, in registry order
    pub fn list_agents(&self) -> Vec<AgentSummary> {
        self.shared.registry.list()
    }

    /// The agent registry
    pub fn registry(&self) -> &AgentRegistry {
        &self.shared.registry
    }

    /// Snapshot of an agent's history
    pub fn history(&self, agent_id: &str) -> Option<Vec<Message>> {
        self.store.history(agent_id)
    }

    /// Send a user message to the selected agents
    ///
    /// Input is validated before anything is queued. Returns one exchange id
    /// per distinct selected agent; replies arrive as [`ChatEvent`]s.
    pub fn send_user_message<S: AsRef<str>>(
        &self,
        text: &str,
        agent_ids: &[S],
    ) -> Result<Vec<Uuid>, OrchestratorError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(OrchestratorError::EmptyMessage);
        }
        if agent_ids.is_empty() {
            return Err(OrchestratorError::NoAgentSelected);
        }

        let mut targets: Vec<(&str, &mpsc::UnboundedSender<AgentJob>)> = Vec::new();
        for id in agent_ids {
            let id = id.as_ref();
            let queue = self
                .shared
                .queues
                .get(id)
                .ok_or_else(|| OrchestratorError::UnknownAgent(id.to_string()))?;
            if !targets.iter().any(|(seen, _)| *seen == id) {
                targets.push((id, queue));
            }
        }

        info!("Sending message to {} agents", targets.len());

        let mut exchanges = Vec::with_capacity(targets.len());
        for (id, queue) in targets {
            let exchange_id = Uuid::new_v4();
            let job = AgentJob::Exchange {
                exchange_id,
                text: text.to_string(),
            };
            if queue.send(job).is_err() {
                warn!("Worker for {} has stopped", id);
                continue;
            }
            exchanges.push(exchange_id);
        }

        Ok(exchanges)
    }

    /// Inject a search result into every agent's conversation
    ///
    /// Each agent records the pair after any exchange already queued for it.
    /// Errors mutate nothing and are reported as [`ChatEvent::SearchFailed`].
    /// Returns the number of conversations updated.
    pub async fn broadcast_search_result(&self, result: &Result<SearchHit, SearchError>) -> usize {
        self.shared.broadcast(result).await
    }

    /// Search the web in the background and broadcast the outcome
    pub fn perform_search(&self, query: &str) -> Result<(), OrchestratorError> {
        let query = query.trim().to_string();
        if query.is_empty() {
            return Err(SearchError::EmptyQuery.into());
        }

        let acquirer = self
            .search
            .clone()
            .ok_or(OrchestratorError::SearchUnavailable)?;

        let shared = self.shared.clone();
        let mut tasks = self.tasks.lock();
        while tasks.try_join_next().is_some() {}

        tasks.spawn(async move {
            shared.emit(ChatEvent::SearchStarted {
                query: query.clone(),
            });
            let result = acquirer.acquire(&query).await;
            shared.broadcast(&result).await;
        });

        Ok(())
    }

    /// Let queued work finish, then stop all workers
    pub async fn shutdown(self) {
        let ConversationOrchestrator { shared, tasks, .. } = self;

        // Workers exit once every queue sender is gone
        drop(shared);

        let mut tasks = tasks.into_inner();
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!("Task ended abnormally: {}", e);
            }
        }

        info!("Orchestrator stopped");
    }
}
