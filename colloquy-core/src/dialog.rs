//! Dialog engine
//!
//! A [`Dialog`] ties one session to its stores, model providers, tools,
//! observers and callbacks. Each [`Dialog::invoke`] call is one turn:
//!
//! 1. Restore session fields (once per object)
//! 2. Load stored history
//! 3. New session: send the initial instruction set. Continuing session:
//!    check the stop condition, run pre-checks, then the validator-gated
//!    agent loop
//! 4. Append the turn's messages to history and persist session fields
//! 5. Fire callbacks and hand the reply to the opponent, if any
//!
//! # Example
//!
//! ```rust,ignore
//! use colloquy_core::prelude::*;
//!
//! let mut dialog = Dialog::builder(DialogConfig::new("support"))
//!     .session_id("user-42")
//!     .llm_provider(provider)
//!     .build()
//!     .await?;
//!
//! let reply = dialog.invoke("Hello").await?;
//! ```

use chrono::{DateTime, Local, Utc};
use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::agent::{self, TurnContext, TurnOutcome};
use crate::callbacks::{Callbacks, DialogCallback};
use crate::compaction::{self, CompactionOutcome, CompactionRequest};
use crate::config::{DialogConfig, ProviderKind};
use crate::error::{ColloquyError, Result};
use crate::llm::{InvokeContext, LLMProvider, LLMProviderFactory};
use crate::message::{
    Message, TranscriptAliases, exclude_instructions, metadata_block, wrap_instruction,
};
use crate::observer::{Observer, SessionHandle};
use crate::session::Session;
use crate::store::{
    BlobStore, HistoryStore, InMemoryBlobStore, InMemoryHistoryStore, SessionBlob,
    SessionHistory,
};
use crate::tools::Tool;
use crate::tools::ToolRegistry;

/// Instruction message for the model.
///
/// A System message, or a Human message in the instruction envelope when
/// `as_human` is set (for models that only accept a leading system message).
pub fn instruction_message(text: &str, as_human: bool) -> Message {
    if as_human {
        Message::human(wrap_instruction(text))
    } else {
        Message::system(text)
    }
}

/// Record of the last turn
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DialogResponse {
    /// Reply text returned to the caller
    pub message: String,
    pub attempts: usize,
    /// False when validators rejected every attempt
    pub accepted: bool,
    pub tools_ran: bool,
    /// True when the turn ended with the interruption message
    pub interrupted: bool,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Result of [`Dialog::gen_message`]
#[derive(Debug, Clone)]
pub enum Generation {
    Completed(TurnOutcome),
    /// The stop condition held after pre-checks
    Stopped(String),
}

/// Conversational session engine
pub struct Dialog {
    config: DialogConfig,
    session: Session,
    llm: Arc<dyn LLMProvider>,
    summary_llm: Arc<dyn LLMProvider>,
    tools: ToolRegistry,
    history_store: Arc<dyn HistoryStore>,
    blob_store: Arc<dyn BlobStore>,
    callbacks: Callbacks,
    opponent: Option<Arc<Mutex<Dialog>>>,
    response: DialogResponse,
    aliases: TranscriptAliases,
}

impl std::fmt::Debug for Dialog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dialog")
            .field("session", &self.session)
            .field("alias", &self.config.alias)
            .field("tools", &self.tools.names())
            .field("has_opponent", &self.opponent.is_some())
            .finish()
    }
}

impl std::fmt::Display for Dialog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let opponent = match &self.opponent {
            Some(opponent) => match opponent.try_lock() {
                Ok(dialog) => dialog.alias().to_string(),
                Err(_) => "busy".to_string(),
            },
            None => "None".to_string(),
        };
        let summary = serde_json::json!({
            "session_id": self.session.id(),
            "is_over": self.session.persisted.is_over,
            "opponent": opponent,
            "session_history": self.session.runtime.transcript,
            "data": self.session.data(),
        });
        write!(f, "{}", summary)
    }
}

impl Dialog {
    pub fn builder(config: DialogConfig) -> DialogBuilder {
        DialogBuilder::new(config)
    }

    pub fn config(&self) -> &DialogConfig {
        &self.config
    }

    pub fn alias(&self) -> &str {
        &self.config.alias
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_id(&self) -> &str {
        self.session.id()
    }

    /// Re-key the session; the dialog code prefix is re-applied
    pub fn set_session_id(&mut self, external_id: &str) {
        self.session.set_id(external_id);
    }

    pub fn get_initial_session_id(&self) -> &str {
        self.session.initial_id()
    }

    pub fn handle(&self) -> SessionHandle {
        self.session.handle(&self.config.alias)
    }

    /// History view bound to the current session key
    pub fn history(&self) -> SessionHistory {
        SessionHistory::new(self.history_store.clone(), self.session.id())
            .with_read_only(self.config.read_only_history)
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Register a tool.
    ///
    /// # Errors
    ///
    /// Fails when a tool with the same name is already registered.
    pub fn add_tool(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        self.tools
            .register(tool)
            .map_err(|e| ColloquyError::Configuration(e.to_string()))
    }

    pub fn set_llm(&mut self, provider: Arc<dyn LLMProvider>) {
        self.llm = provider;
    }

    pub fn set_summary_llm(&mut self, provider: Arc<dyn LLMProvider>) {
        self.summary_llm = provider;
    }

    pub fn set_opponent(&mut self, opponent: Arc<Mutex<Dialog>>) {
        self.opponent = Some(opponent);
    }

    pub fn opponent(&self) -> Option<&Arc<Mutex<Dialog>>> {
        self.opponent.as_ref()
    }

    pub fn add_callback(&mut self, callback: Arc<dyn DialogCallback>) {
        self.callbacks.add(callback);
    }

    /// Attach an observer to the session
    pub fn reg_observer(&mut self, observer: Box<dyn Observer>, label: &str) {
        let host = self.handle();
        self.session.register_observer(observer, host, label);
    }

    pub fn observer(&self, name: &str) -> Option<&dyn Observer> {
        self.session.observer(name)
    }

    /// Observer by name, downcast to its concrete type
    pub fn observer_as<T: 'static>(&self, name: &str) -> Option<&T> {
        self.observer(name)
            .and_then(|o| o.as_any().downcast_ref::<T>())
    }

    pub fn data(&self) -> SessionBlob {
        self.session.data()
    }

    /// Write one session field; `false` when no owner declares `key`.
    ///
    /// # Errors
    ///
    /// Fails if a core field receives a value of the wrong type.
    pub fn set_data(&mut self, key: &str, value: Value) -> Result<bool> {
        self.session.set_data(key, value)
    }

    /// Last turn's record
    pub fn response(&self) -> &DialogResponse {
        &self.response
    }

    /// Instruction message suited to the configured provider
    pub fn get_instruction(&self, text: &str, as_human: bool) -> Message {
        let system_only_at_start = self.config.llm.provider == Some(ProviderKind::Anthropic);
        instruction_message(text, as_human || system_only_at_start)
    }

    /// Queue an instruction for the next model call of this turn
    pub fn push_temp_instruction(&mut self, message: Message) {
        self.session.runtime.temp_instructions.push(message);
    }

    /// Load stored fields into the session, once per object.
    ///
    /// # Errors
    ///
    /// Store failures and callback errors are surfaced.
    pub async fn restore(&mut self) -> Result<bool> {
        let applied = self.session.restore(self.blob_store.as_ref()).await?;
        if applied {
            let data = self.session.data();
            self.callbacks.restore_end(&self.handle(), &data).await?;
        }
        Ok(applied)
    }

    /// Persist session fields.
    ///
    /// # Errors
    ///
    /// Store failures are surfaced.
    pub async fn store(&self) -> Result<()> {
        self.session.store(self.blob_store.as_ref()).await
    }

    /// Drop the stored history of this session.
    ///
    /// # Errors
    ///
    /// Store failures are surfaced.
    pub async fn clear_session(&mut self) -> Result<()> {
        self.history().clear().await?;
        self.session.set_messages(Vec::new(), &self.aliases);
        tracing::info!(session_id = %self.session.id(), "Session history cleared");
        Ok(())
    }

    /// Reload the message buffer from history, followed by `extra`.
    ///
    /// # Errors
    ///
    /// Store failures are surfaced.
    pub async fn update_history(&mut self, extra: Vec<Message>) -> Result<()> {
        let mut messages = self.history().get_messages().await?;
        messages.extend(extra);
        self.session.set_messages(messages, &self.aliases);
        Ok(())
    }

    /// Compact history when the message buffer reached the threshold.
    ///
    /// # Errors
    ///
    /// See [`Dialog::summarize_chat`].
    pub async fn check_for_summary_invocation(&mut self) -> Result<bool> {
        let threshold = self.config.summary.threshold;
        let buffered = self.session.runtime.messages.len();
        if !self.config.summary.is_enabled() || buffered < threshold {
            tracing::debug!(
                session_id = %self.session.id(),
                buffered = buffered,
                threshold = threshold,
                "Summary threshold not reached"
            );
            return Ok(false);
        }
        self.summarize_chat().await?;
        Ok(true)
    }

    /// Condense older history into the running summary.
    ///
    /// # Errors
    ///
    /// Summary model and store failures are surfaced.
    pub async fn summarize_chat(&mut self) -> Result<CompactionOutcome> {
        let history = self.history();
        let request = CompactionRequest {
            provider: self.summary_llm.as_ref(),
            retry: &self.config.retry,
            context: InvokeContext::from(&self.handle()),
            limit: self.config.summary.limit,
            previous_summary: self.session.persisted.session_summary.as_deref(),
            system_prefix: join_instructions(&[
                self.config.start_system_msg.as_str(),
                self.config.format_instructions.as_str(),
            ]),
        };

        let (outcome, messages) = compaction::compact(request, &history).await?;
        if let CompactionOutcome::Compacted { summary, .. } = &outcome {
            self.session.persisted.session_summary = Some(summary.clone());
        }
        self.session.set_messages(messages, &self.aliases);
        Ok(outcome)
    }

    /// Mark the dialog over and return the interruption message.
    ///
    /// # Errors
    ///
    /// Store failures are surfaced when `save` is set.
    pub async fn stop(&mut self, save: bool) -> Result<String> {
        self.session.persisted.is_over = true;
        if save {
            self.store().await?;
        }
        tracing::info!(session_id = %self.session.id(), saved = save, "Dialog stopped");
        self.response = DialogResponse {
            message: self.config.interruption_message.clone(),
            interrupted: true,
            finished_at: Some(Utc::now()),
            ..Default::default()
        };
        Ok(self.config.interruption_message.clone())
    }

    /// Force the stop condition for following turns
    pub fn interrupt(&mut self) {
        self.session.interrupt();
    }

    pub fn reset(&mut self) {
        self.session.reset();
    }

    /// Log session data and stored history.
    ///
    /// # Errors
    ///
    /// Store failures are surfaced.
    pub async fn self_test(&self) -> Result<()> {
        let messages = self.history().get_messages().await?;
        let messages = serde_json::to_string(&messages)?;
        let data = Value::Object(self.session.data());
        tracing::info!(
            session_id = %self.session.id(),
            data = %data,
            messages = %messages,
            "Self test"
        );
        Ok(())
    }

    /// Run a turn with `text` wrapped as a human-side instruction.
    ///
    /// # Errors
    ///
    /// See [`Dialog::invoke`].
    pub async fn invoke_with_instruction(&mut self, text: &str) -> Result<String> {
        self.invoke(&wrap_instruction(text)).await
    }

    /// Pre-check observers, then the validator-gated loop over the stored
    /// history plus `messages`.
    ///
    /// # Errors
    ///
    /// Model, store and post-check failures are surfaced.
    pub async fn gen_message(&mut self, human_text: &str, messages: Vec<Message>) -> Result<Generation> {
        let stored = self.history().get_messages().await?;
        self.generate(human_text, &stored, &messages).await
    }

    async fn generate(
        &mut self,
        human_text: &str,
        stored: &[Message],
        messages: &[Message],
    ) -> Result<Generation> {
        agent::pre_check(&mut self.session, human_text, messages).await;
        if self.session.stop_dialog_condition() {
            return Ok(Generation::Stopped(self.stop(true).await?));
        }

        let history = self.history();
        let ctx = turn_context(&self.config, self.llm.as_ref(), &self.tools, &history, &self.session);
        let outcome = agent::run_turn(&ctx, &mut self.session, stored, messages).await?;
        Ok(Generation::Completed(outcome))
    }

    /// Initial instruction set of a new session
    fn initial_messages(&self, human_text: &str) -> Vec<Message> {
        let initials = join_instructions(&[
            self.config.start_system_msg.as_str(),
            self.config.additional_starting_instructions.as_str(),
            self.config.format_instructions.as_str(),
        ]);

        let mut messages = vec![Message::system(initials)];
        if !self.config.ignore_starting_message && !human_text.is_empty() {
            messages.push(Message::human(human_text));
        }
        messages
    }

    /// Run one turn and return the reply text.
    ///
    /// Returns the interruption message instead when the stop condition
    /// holds before or after the loop.
    ///
    /// # Errors
    ///
    /// Model failures (after retries), store failures, post-check errors
    /// and callback errors are surfaced.
    pub async fn invoke(&mut self, human_text: &str) -> Result<String> {
        let mut human = human_text.to_string();
        if !human.is_empty() && self.config.set_messages_dates {
            human.push_str(&metadata_block(&Local::now()));
        }

        self.restore().await?;

        tracing::info!(
            session_id = %self.session.id(),
            alias = %self.config.alias,
            chars = human.chars().count(),
            "Turn started"
        );

        self.session.runtime.is_tool_activated = false;
        self.session.persisted.last_human_message = human.clone();

        let history = self.history();
        let stored = history.get_messages().await?;

        let outcome = if stored.is_empty() {
            let initials = self.initial_messages(&human);
            self.session.persisted.is_started = true;
            self.session.set_messages(initials.clone(), &self.aliases);

            let ctx = turn_context(&self.config, self.llm.as_ref(), &self.tools, &history, &self.session);
            let attempt = agent::run_attempt(&ctx, &[], initials).await?;
            if attempt.tools_ran() {
                self.session.runtime.is_tool_activated = true;
            }
            history.add_messages(&attempt.unsaved).await?;
            TurnOutcome {
                tools_ran: attempt.tools_ran(),
                reply: attempt.reply,
                unsaved: attempt.unsaved,
                attempts: 1,
                accepted: true,
            }
        } else {
            if self.session.stop_dialog_condition() {
                return self.stop(false).await;
            }

            let new_messages = vec![Message::human(human.as_str())];
            let mut buffer = stored.clone();
            buffer.extend(new_messages.iter().cloned());
            self.session.set_messages(buffer, &self.aliases);

            let outcome = match self.generate(&human, &stored, &new_messages).await? {
                Generation::Completed(outcome) => outcome,
                Generation::Stopped(message) => return Ok(message),
            };

            history.add_messages(&outcome.unsaved).await?;
            if self.session.stop_dialog_condition() {
                return self.stop(true).await;
            }
            outcome
        };

        // Instructions are consumed by the turn that sent them
        self.session.runtime.temp_instructions.clear();
        self.update_history(Vec::new()).await?;

        let reply = outcome.reply.content().to_string();
        self.store().await?;

        self.response = DialogResponse {
            message: reply.clone(),
            attempts: outcome.attempts,
            accepted: outcome.accepted,
            tools_ran: outcome.tools_ran,
            interrupted: false,
            finished_at: Some(Utc::now()),
        };

        tracing::info!(
            session_id = %self.session.id(),
            attempts = outcome.attempts,
            accepted = outcome.accepted,
            tools_ran = outcome.tools_ran,
            chars = reply.chars().count(),
            "Turn finished"
        );

        if let Some(opponent) = &self.opponent {
            spawn_opponent(
                opponent.clone(),
                reply.clone(),
                self.config.opponent_delay,
                self.session.id().to_string(),
            );
        }

        self.callbacks.invoke_end(&self.handle(), &reply).await?;
        Ok(reply)
    }

    /// Messages of the buffer that are visible conversation
    pub fn visible_messages(&self) -> Vec<&Message> {
        exclude_instructions(&self.session.runtime.messages)
    }

    /// Rendered transcript of the visible conversation
    pub fn transcript(&self) -> &str {
        &self.session.runtime.transcript
    }
}

/// Non-empty instruction blocks separated by blank lines
fn join_instructions(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|part| part.trim())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn turn_context<'a>(
    config: &'a DialogConfig,
    llm: &'a dyn LLMProvider,
    tools: &'a ToolRegistry,
    history: &'a SessionHistory,
    session: &Session,
) -> TurnContext<'a> {
    TurnContext {
        provider: llm,
        tools,
        history,
        retry: &config.retry,
        invoke: InvokeContext::from(&session.handle(&config.alias)),
        temperature: Some(config.llm.temperature),
        max_tool_rounds: config.max_tool_rounds,
        max_validation_attempts: config.max_validation_attempts,
    }
}

/// Hand `reply` to the opponent after `delay` on a detached task
fn spawn_opponent(
    opponent: Arc<Mutex<Dialog>>,
    reply: String,
    delay: std::time::Duration,
    origin: String,
) {
    tokio::spawn(opponent_turn(opponent, reply, delay, origin));
}

fn opponent_turn(
    opponent: Arc<Mutex<Dialog>>,
    reply: String,
    delay: std::time::Duration,
    origin: String,
) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        tokio::time::sleep(delay).await;
        let mut dialog = opponent.lock().await;
        match dialog.invoke(&reply).await {
            Ok(answer) => tracing::debug!(
                origin = %origin,
                opponent = %dialog.alias(),
                chars = answer.chars().count(),
                "Opponent replied"
            ),
            Err(e) => tracing::error!(
                origin = %origin,
                opponent = %dialog.alias(),
                error = %e,
                "Opponent turn failed"
            ),
        }
    })
}

/// Builder for [`Dialog`]
///
/// Providers not set explicitly are created from the config through
/// [`LLMProviderFactory`]. Stores default to in-memory ones.
pub struct DialogBuilder {
    config: DialogConfig,
    session_id: String,
    llm: Option<Arc<dyn LLMProvider>>,
    summary_llm: Option<Arc<dyn LLMProvider>>,
    history_store: Option<Arc<dyn HistoryStore>>,
    blob_store: Option<Arc<dyn BlobStore>>,
    tools: Vec<Arc<dyn Tool>>,
    observers: Vec<(Box<dyn Observer>, String)>,
    callbacks: Callbacks,
    opponent: Option<Arc<Mutex<Dialog>>>,
}

impl DialogBuilder {
    pub fn new(config: DialogConfig) -> Self {
        Self {
            config,
            session_id: String::new(),
            llm: None,
            summary_llm: None,
            history_store: None,
            blob_store: None,
            tools: Vec::new(),
            observers: Vec::new(),
            callbacks: Callbacks::new(),
            opponent: None,
        }
    }

    /// External session id, usually the user id
    pub fn session_id(mut self, id: impl Into<String>) -> Self {
        self.session_id = id.into();
        self
    }

    pub fn llm_provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.llm = Some(provider);
        self
    }

    pub fn summary_provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.summary_llm = Some(provider);
        self
    }

    pub fn history_store(mut self, store: Arc<dyn HistoryStore>) -> Self {
        self.history_store = Some(store);
        self
    }

    pub fn blob_store(mut self, store: Arc<dyn BlobStore>) -> Self {
        self.blob_store = Some(store);
        self
    }

    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn tools(mut self, tools: Vec<Arc<dyn Tool>>) -> Self {
        self.tools.extend(tools);
        self
    }

    pub fn observer(mut self, observer: Box<dyn Observer>, label: impl Into<String>) -> Self {
        self.observers.push((observer, label.into()));
        self
    }

    pub fn callback(mut self, callback: Arc<dyn DialogCallback>) -> Self {
        self.callbacks.add(callback);
        self
    }

    pub fn opponent(mut self, opponent: Arc<Mutex<Dialog>>) -> Self {
        self.opponent = Some(opponent);
        self
    }

    /// Build the dialog
    ///
    /// # Errors
    ///
    /// Invalid configuration, duplicate tool names and provider creation
    /// failures are surfaced.
    pub async fn build(self) -> Result<Dialog> {
        self.config.validate()?;

        let explicit_llm = self.llm.is_some();
        let llm = match self.llm {
            Some(llm) => llm,
            None => LLMProviderFactory::create(&self.config.llm).await?,
        };

        // An injected main provider also serves summaries unless told otherwise
        let summary_llm = match (self.summary_llm, &self.config.summary_llm) {
            (Some(summary), _) => summary,
            (None, Some(cfg)) => LLMProviderFactory::create_summary(cfg).await?,
            (None, None) if explicit_llm => llm.clone(),
            (None, None) => {
                let mut cfg = self.config.llm.clone();
                cfg.model = None;
                LLMProviderFactory::create_summary(&cfg).await?
            }
        };

        let mut tools = ToolRegistry::new();
        tools
            .register_all(self.tools)
            .map_err(|e| ColloquyError::Configuration(e.to_string()))?;

        let session = Session::new(&self.config.dialog_code, &self.session_id)
            .with_storables(self.config.storables.iter().cloned())
            .with_restore_exceptions(self.config.restore_exceptions.iter().cloned());

        let aliases = TranscriptAliases::default().with_ai(self.config.alias.clone());

        let mut dialog = Dialog {
            session,
            llm,
            summary_llm,
            tools,
            history_store: self
                .history_store
                .unwrap_or_else(|| Arc::new(InMemoryHistoryStore::new())),
            blob_store: self
                .blob_store
                .unwrap_or_else(|| Arc::new(InMemoryBlobStore::new())),
            callbacks: self.callbacks,
            opponent: self.opponent,
            response: DialogResponse::default(),
            aliases,
            config: self.config,
        };

        for (observer, label) in self.observers {
            dialog.reg_observer(observer, &label);
        }

        tracing::debug!(
            session_id = %dialog.session_id(),
            tools = dialog.tools.len(),
            observers = dialog.session.observers().len(),
            "Dialog built"
        );

        Ok(dialog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SummaryConfig;
    use crate::llm::{ScriptedProvider, ScriptedReply};
    use crate::message::remove_metadata_blocks;
    use crate::store::StoreOp;
    use serde_json::json;

    async fn dialog_with(
        provider: ScriptedProvider,
        history: Arc<InMemoryHistoryStore>,
        blobs: Arc<InMemoryBlobStore>,
    ) -> Dialog {
        let provider = Arc::new(provider);
        Dialog::builder(
            DialogConfig::new("demo")
                .with_alias("Bot")
                .with_start_system_msg("You are helpful")
                .with_messages_dates(false)
                .with_storables(["is_finished"]),
        )
        .session_id("1")
        .llm_provider(provider.clone())
        .summary_provider(provider)
        .history_store(history)
        .blob_store(blobs)
        .build()
        .await
        .unwrap()
    }

    #[test]
    fn test_instruction_message() {
        assert_eq!(instruction_message("be brief", false), Message::system("be brief"));
        let human = instruction_message("be brief", true);
        assert!(human.is_human());
        assert!(human.content().starts_with("Instruction: be brief."));
    }

    #[tokio::test]
    async fn test_human_messages_stamped_by_default() {
        let history = Arc::new(InMemoryHistoryStore::new());
        let mut dialog = Dialog::builder(DialogConfig::new("demo"))
            .session_id("1")
            .llm_provider(Arc::new(ScriptedProvider::new(vec![ScriptedReply::text("ok")])))
            .history_store(history.clone())
            .build()
            .await
            .unwrap();

        dialog.invoke("hi").await.unwrap();

        let stored = history.get_messages("demo::1").await.unwrap();
        assert!(stored[1].content().starts_with("hi\n\n[Meta-Data]\nDate: "));
        assert_eq!(remove_metadata_blocks(stored[1].content()), "hi");
    }

    #[tokio::test]
    async fn test_new_session_turn() {
        let history = Arc::new(InMemoryHistoryStore::new());
        let blobs = Arc::new(InMemoryBlobStore::new());
        let provider = ScriptedProvider::new(vec![ScriptedReply::text("Hello there")]);
        let mut dialog = dialog_with(provider, history.clone(), blobs.clone()).await;

        let reply = dialog.invoke("hi").await.unwrap();
        assert_eq!(reply, "Hello there");

        let stored = history.get_messages("demo::1").await.unwrap();
        assert_eq!(stored.len(), 3);
        assert!(stored[0].is_system());
        assert_eq!(stored[1], Message::human("hi"));
        assert_eq!(stored[2].content(), reply);

        let blob = blobs.get("demo::1").await.unwrap().unwrap();
        assert_eq!(blob["is_started"], json!(true));
        assert_eq!(blob["last_human_message"], json!("hi"));
        assert_eq!(dialog.response().message, "Hello there");
        assert_eq!(dialog.transcript(), "Respondent: -- hi\nBot: -- Hello there");
    }

    #[tokio::test]
    async fn test_interrupted_session_returns_interruption_message() {
        let history = Arc::new(InMemoryHistoryStore::new());
        history
            .add_messages("demo::1", &[Message::system("S"), Message::human("hi"), Message::ai("yo")])
            .await
            .unwrap();
        let blobs = Arc::new(InMemoryBlobStore::new());
        let provider = ScriptedProvider::new(vec![]);
        let mut dialog = dialog_with(provider.clone(), history, blobs).await;

        dialog.interrupt();
        let reply = dialog.invoke("still there?").await.unwrap();
        assert_eq!(reply, "Dialog is over");
        assert!(dialog.session().persisted.is_over);
        assert!(dialog.response().interrupted);
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_finished_flag_stops_before_model_call() {
        let history = Arc::new(InMemoryHistoryStore::new());
        history
            .add_messages("demo::1", &[Message::system("S"), Message::human("hi"), Message::ai("yo")])
            .await
            .unwrap();
        let blobs = Arc::new(InMemoryBlobStore::new());
        let mut stored = SessionBlob::new();
        stored.insert("is_finished".into(), json!(true));
        blobs.insert("demo::1", stored);

        let provider = ScriptedProvider::new(vec![]);
        let mut dialog = dialog_with(provider.clone(), history, blobs).await;

        assert_eq!(dialog.invoke("more").await.unwrap(), "Dialog is over");
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_summarize_chat_updates_summary() {
        let history = Arc::new(InMemoryHistoryStore::new());
        history
            .add_messages(
                "demo::1",
                &[
                    Message::system("S"),
                    Message::human("H1"),
                    Message::ai("A1"),
                    Message::human("H2"),
                    Message::ai("A2"),
                    Message::human("H3"),
                ],
            )
            .await
            .unwrap();
        let blobs = Arc::new(InMemoryBlobStore::new());
        let provider = ScriptedProvider::new(vec![ScriptedReply::text("digest")]);
        let mut dialog = dialog_with(provider, history.clone(), blobs).await;
        dialog.config.summary = SummaryConfig {
            threshold: 6,
            limit: 3,
        };

        dialog.update_history(Vec::new()).await.unwrap();
        assert!(dialog.check_for_summary_invocation().await.unwrap());
        assert_eq!(
            dialog.session().persisted.session_summary.as_deref(),
            Some("digest")
        );
        assert_eq!(dialog.session().runtime.messages.len(), 4);
        assert!(matches!(history.operations()[1], StoreOp::Backup { .. }));

        // Below threshold now
        assert!(!dialog.check_for_summary_invocation().await.unwrap());
    }

    #[tokio::test]
    async fn test_set_session_id_and_initial_id() {
        let provider = ScriptedProvider::new(vec![]);
        let mut dialog = dialog_with(
            provider,
            Arc::new(InMemoryHistoryStore::new()),
            Arc::new(InMemoryBlobStore::new()),
        )
        .await;

        assert_eq!(dialog.session_id(), "demo::1");
        dialog.set_session_id("77");
        assert_eq!(dialog.session_id(), "demo::77");
        assert_eq!(dialog.get_initial_session_id(), "77");
        assert_eq!(dialog.history().session_id(), "demo::77");
    }

    #[tokio::test]
    async fn test_display_contains_session_fields() {
        let provider = ScriptedProvider::new(vec![]);
        let dialog = dialog_with(
            provider,
            Arc::new(InMemoryHistoryStore::new()),
            Arc::new(InMemoryBlobStore::new()),
        )
        .await;

        let rendered: Value = serde_json::from_str(&dialog.to_string()).unwrap();
        assert_eq!(rendered["session_id"], json!("demo::1"));
        assert_eq!(rendered["opponent"], json!("None"));
        assert_eq!(rendered["data"]["is_finished"], json!(null));
    }
}
