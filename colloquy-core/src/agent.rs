//! Agent invocation loop
//!
//! One attempt alternates model calls and tool execution:
//!
//! ```text
//! CallModel -> Route -> ExecTools -> CallModel -> ... -> Done
//! ```
//!
//! A turn wraps attempts in a validator gate: post-check observers may
//! reject the reply and push corrective instructions, which triggers a new
//! attempt, up to a fixed number of attempts. Tool results are flushed to
//! durable history as soon as a batch completes, so a turn that ran tools is
//! never retried.

use crate::error::Result;
use crate::llm::{ChatRequest, InvokeContext, LLMProvider, RetryConfig, invoke_with_diagnostics};
use crate::message::Message;
use crate::session::Session;
use crate::store::SessionHistory;
use crate::tools::ToolRegistry;

/// State of one attempt
#[derive(Debug, Clone, PartialEq)]
pub enum LoopState {
    CallModel,
    Route(Message),
    ExecTools(Message),
    Done(Message),
}

impl LoopState {
    fn label(&self) -> &'static str {
        match self {
            LoopState::CallModel => "call_model",
            LoopState::Route(_) => "route",
            LoopState::ExecTools(_) => "exec_tools",
            LoopState::Done(_) => "done",
        }
    }
}

/// Collaborators of the loop for one turn
pub struct TurnContext<'a> {
    pub provider: &'a dyn LLMProvider,
    pub tools: &'a ToolRegistry,
    pub history: &'a SessionHistory,
    pub retry: &'a RetryConfig,
    pub invoke: InvokeContext,
    pub temperature: Option<f32>,
    /// Model/tool cycles allowed per attempt
    pub max_tool_rounds: usize,
    /// Total attempts while validators reject the reply
    pub max_validation_attempts: usize,
}

/// Result of one attempt
#[derive(Debug, Clone)]
pub struct AttemptOutcome {
    /// Final reply of the attempt
    pub reply: Message,
    /// Messages of the attempt not yet written to history, reply last
    pub unsaved: Vec<Message>,
    /// Completed tool batches
    pub tool_rounds: usize,
}

impl AttemptOutcome {
    pub fn tools_ran(&self) -> bool {
        self.tool_rounds > 0
    }
}

/// Result of a turn
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub reply: Message,
    pub unsaved: Vec<Message>,
    pub attempts: usize,
    /// False when validators still rejected the last attempt
    pub accepted: bool,
    pub tools_ran: bool,
}

/// Run one model/tool cycle over `stored` history plus `pending` messages.
///
/// # Errors
///
/// Model failures after retries and history write failures are surfaced.
/// Tool failures are not errors; they become error-flagged tool messages.
pub async fn run_attempt(
    ctx: &TurnContext<'_>,
    stored: &[Message],
    pending: Vec<Message>,
) -> Result<AttemptOutcome> {
    let mut base = stored.to_vec();
    let mut unsaved = pending;
    let mut tool_rounds = 0;
    let descriptors = ctx.tools.descriptors();
    let mut state = LoopState::CallModel;

    loop {
        tracing::debug!(
            session_id = %ctx.invoke.session_id,
            state = state.label(),
            round = tool_rounds,
            "Agent loop"
        );

        state = match state {
            LoopState::CallModel => {
                let mut messages = Vec::with_capacity(base.len() + unsaved.len());
                messages.extend(base.iter().cloned());
                messages.extend(unsaved.iter().cloned());

                let mut request = ChatRequest::new(messages).with_tools(descriptors.clone());
                request.temperature = ctx.temperature;

                let reply =
                    invoke_with_diagnostics(&ctx.invoke, ctx.provider, &request, ctx.retry)
                        .await?;
                LoopState::Route(reply)
            }
            LoopState::Route(reply) => {
                if !reply.has_tool_calls() {
                    LoopState::Done(reply)
                } else if tool_rounds >= ctx.max_tool_rounds {
                    tracing::warn!(
                        session_id = %ctx.invoke.session_id,
                        rounds = tool_rounds,
                        dropped_calls = reply.tool_calls().len(),
                        "Tool round limit reached"
                    );
                    LoopState::Done(Message::ai(reply.content()))
                } else {
                    LoopState::ExecTools(reply)
                }
            }
            LoopState::ExecTools(reply) => {
                let results = ctx.tools.dispatch_all(reply.tool_calls()).await;
                let failed = results.iter().filter(|m| m.is_error()).count();
                tracing::debug!(
                    session_id = %ctx.invoke.session_id,
                    calls = results.len(),
                    failed = failed,
                    "Tool batch finished"
                );

                unsaved.push(reply);
                unsaved.extend(results);
                ctx.history.add_messages(&unsaved).await?;
                base.append(&mut unsaved);
                tool_rounds += 1;
                LoopState::CallModel
            }
            LoopState::Done(reply) => {
                unsaved.push(reply.clone());
                return Ok(AttemptOutcome {
                    reply,
                    unsaved,
                    tool_rounds,
                });
            }
        };
    }
}

/// Run pre-check observers; failures are logged only.
pub async fn pre_check(session: &mut Session, human_text: &str, pending: &[Message]) {
    let session_id = session.id().to_string();
    for observer in session.observers_mut() {
        if let Err(e) = observer.pre_check(human_text, pending).await {
            tracing::warn!(
                session_id = %session_id,
                observer = %observer.name(),
                error = %e,
                "Pre-check failed"
            );
        }
    }
}

/// Run post-check observers over a candidate reply.
///
/// Always accepts when no observer is registered or a tool ran this turn.
/// Otherwise the temporary instructions are replaced by whatever the
/// observers push.
///
/// # Errors
///
/// Observer errors are surfaced.
pub async fn post_check(session: &mut Session, ai_text: &str) -> Result<bool> {
    if session.observers().is_empty() || session.runtime.is_tool_activated {
        return Ok(true);
    }

    let mut temp = std::mem::take(&mut session.runtime.temp_instructions);
    temp.clear();

    let mut accepted = true;
    let mut failure = None;
    for observer in session.observers_mut() {
        match observer.post_check(ai_text, &mut temp).await {
            Ok(true) => {}
            Ok(false) => accepted = false,
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }

    session.runtime.temp_instructions = temp;
    match failure {
        Some(e) => Err(e),
        None => Ok(accepted),
    }
}

/// Run attempts until validators accept the reply or attempts run out.
///
/// Each attempt sends the current temporary instructions followed by
/// `new_messages`. On exhaustion the last reply is returned unchanged.
///
/// # Errors
///
/// See [`run_attempt`] and [`post_check`].
pub async fn run_turn(
    ctx: &TurnContext<'_>,
    session: &mut Session,
    stored: &[Message],
    new_messages: &[Message],
) -> Result<TurnOutcome> {
    let max_attempts = ctx.max_validation_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let mut pending = session.runtime.temp_instructions.clone();
        pending.extend(new_messages.iter().cloned());

        tracing::debug!(
            session_id = %session.id(),
            attempt = attempt,
            temp_instructions = session.runtime.temp_instructions.len(),
            "Turn attempt"
        );

        let outcome = run_attempt(ctx, stored, pending).await?;
        if outcome.tools_ran() {
            session.runtime.is_tool_activated = true;
        }

        let accepted = post_check(session, outcome.reply.content()).await?;
        if accepted || attempt >= max_attempts {
            if !accepted {
                tracing::warn!(
                    session_id = %session.id(),
                    attempts = attempt,
                    "Validators rejected every attempt, returning last reply"
                );
            }
            return Ok(TurnOutcome {
                tools_ran: session.runtime.is_tool_activated,
                reply: outcome.reply,
                unsaved: outcome.unsaved,
                attempts: attempt,
                accepted,
            });
        }
    }
}
