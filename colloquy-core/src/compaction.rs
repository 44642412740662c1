//! History compaction
//!
//! Once a session's history grows past the configured threshold, older
//! messages are condensed into a running summary. The new history is a
//! single System message carrying the summary followed by the most recent
//! messages, starting at a Human message so no tool result is separated from
//! the AI message that requested it.

use crate::error::Result;
use crate::llm::{ChatRequest, InvokeContext, LLMProvider, RetryConfig, invoke_with_diagnostics};
use crate::message::Message;
use crate::store::SessionHistory;

/// The boundary search never moves below this index
pub const BOUNDARY_FLOOR: usize = 5;

const NEW_SUMMARY_PROMPT: &str = "Form a summary of our dialog";

/// Split of a history into summarized and kept parts
#[derive(Debug, Clone, PartialEq)]
pub struct CompactionPlan {
    /// Leading system message
    pub head: Message,
    /// Messages condensed into the summary
    pub middle: Vec<Message>,
    /// Messages kept verbatim, starting with a Human message
    pub tail: Vec<Message>,
    /// Index of the first kept message in the original history
    pub index: usize,
}

/// Why compaction did not run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// `limit` is zero
    Disabled,
    /// Fewer messages than the limit
    TooShort { len: usize, limit: usize },
    /// No Human message between the cut and the floor
    NoHumanBoundary { index: usize },
    /// Compaction only rewrites writable histories
    ReadOnly,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::Disabled => write!(f, "compaction disabled"),
            SkipReason::TooShort { len, limit } => {
                write!(f, "history has {} messages, limit is {}", len, limit)
            }
            SkipReason::NoHumanBoundary { index } => {
                write!(f, "no human message at or above index {}", index)
            }
            SkipReason::ReadOnly => write!(f, "history is read-only"),
        }
    }
}

/// Result of a compaction attempt
#[derive(Debug, Clone, PartialEq)]
pub enum CompactionOutcome {
    Skipped(SkipReason),
    Compacted {
        /// Messages folded into the summary
        summarized: usize,
        /// Messages kept after the new system message
        kept: usize,
        summary: String,
    },
}

impl CompactionOutcome {
    pub fn is_compacted(&self) -> bool {
        matches!(self, CompactionOutcome::Compacted { .. })
    }
}

/// Decide where to split `history` so that about `limit` messages are kept.
///
/// Starting `limit` messages from the end, the boundary walks back to the
/// nearest Human message but never below [`BOUNDARY_FLOOR`].
pub fn plan_compaction(
    history: &[Message],
    limit: usize,
) -> std::result::Result<CompactionPlan, SkipReason> {
    if limit == 0 {
        return Err(SkipReason::Disabled);
    }
    if history.len() < limit {
        return Err(SkipReason::TooShort {
            len: history.len(),
            limit,
        });
    }

    let mut index = history.len() - limit;
    while !history[index].is_human() && index > BOUNDARY_FLOOR {
        index -= 1;
    }

    // Index 0 is the head; a boundary there leaves nothing to summarize.
    if index == 0 || !history[index].is_human() {
        return Err(SkipReason::NoHumanBoundary { index });
    }

    Ok(CompactionPlan {
        head: history[0].clone(),
        middle: history[1..index].to_vec(),
        tail: history[index..].to_vec(),
        index,
    })
}

/// Closing instruction of the summary request
pub fn summary_prompt(previous_summary: Option<&str>) -> String {
    match previous_summary.filter(|s| !s.is_empty()) {
        Some(summary) => format!(
            "Here is the summary of our conversation so far:\n{}\n\nExtend this summary based on the messages above",
            summary
        ),
        None => NEW_SUMMARY_PROMPT.to_string(),
    }
}

/// Text appended to the system message to carry the summary
pub fn summary_add_on(summary: &str) -> String {
    format!(
        "\nTake into account the summary below of what we discussed earlier\n============\n{}",
        summary
    )
}

/// Inputs for [`compact`]
pub struct CompactionRequest<'a> {
    pub provider: &'a dyn LLMProvider,
    pub retry: &'a RetryConfig,
    pub context: InvokeContext,
    /// Number of trailing messages to keep
    pub limit: usize,
    pub previous_summary: Option<&'a str>,
    /// Start and format instructions of the dialog
    pub system_prefix: String,
}

/// Summarize and rewrite the stored history.
///
/// The old log is backed up, cleared and rewritten in that order, each
/// step completing before the next starts.
///
/// # Errors
///
/// Summary model failures and store failures are surfaced; the stored
/// history is untouched if the summary call fails.
pub async fn compact(
    request: CompactionRequest<'_>,
    history: &SessionHistory,
) -> Result<(CompactionOutcome, Vec<Message>)> {
    let messages = history.get_messages().await?;

    if history.is_read_only() {
        return Ok((CompactionOutcome::Skipped(SkipReason::ReadOnly), messages));
    }

    let plan = match plan_compaction(&messages, request.limit) {
        Ok(plan) => plan,
        Err(reason) => {
            tracing::debug!(
                session_id = %history.session_id(),
                reason = %reason,
                "Compaction skipped"
            );
            return Ok((CompactionOutcome::Skipped(reason), messages));
        }
    };

    let mut summary_messages = plan.middle.clone();
    summary_messages.push(Message::human(summary_prompt(request.previous_summary)));
    let chat = ChatRequest::new(summary_messages).with_temperature(0.0);

    let reply =
        invoke_with_diagnostics(&request.context, request.provider, &chat, request.retry).await?;
    let summary = reply.content().to_string();

    let mut new_history = Vec::with_capacity(plan.tail.len() + 1);
    new_history.push(Message::system(format!(
        "{}{}",
        request.system_prefix,
        summary_add_on(&summary)
    )));
    new_history.extend(plan.tail.iter().cloned());

    let backup_id = history.backup().await?;
    history.clear().await?;
    history.add_messages(&new_history).await?;

    tracing::info!(
        session_id = %history.session_id(),
        summarized = plan.middle.len(),
        kept = plan.tail.len(),
        boundary = plan.index,
        backup = ?backup_id,
        "History compacted"
    );

    Ok((
        CompactionOutcome::Compacted {
            summarized: plan.middle.len(),
            kept: plan.tail.len(),
            summary,
        },
        new_history,
    ))
}
