//! Message model shared by the history store, the agent loop and providers
//!
//! Messages are a tagged variant over system, human, AI and tool-result
//! entries. Serialized form carries a `type` tag so stored logs are
//! self-describing.
//!
//! The module also holds the pure text helpers the engine needs around
//! messages: instruction detection, transcript rendering, metadata-block
//! stripping and size statistics.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned call id, echoed back in the tool result
    pub id: String,
    /// Tool name
    pub name: String,
    /// JSON argument payload
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// Message kind without payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    System,
    Human,
    Ai,
    Tool,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::System => "system",
            MessageKind::Human => "human",
            MessageKind::Ai => "ai",
            MessageKind::Tool => "tool",
        }
    }
}

/// A message in a dialog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    System {
        content: String,
    },
    Human {
        content: String,
    },
    Ai {
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
    Tool {
        content: String,
        tool_call_id: String,
        name: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message::System {
            content: content.into(),
        }
    }

    pub fn human(content: impl Into<String>) -> Self {
        Message::Human {
            content: content.into(),
        }
    }

    pub fn ai(content: impl Into<String>) -> Self {
        Message::Ai {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn ai_with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Message::Ai {
            content: content.into(),
            tool_calls,
        }
    }

    /// Successful tool result answering `call`.
    pub fn tool_result(call: &ToolCall, content: impl Into<String>) -> Self {
        Message::Tool {
            content: content.into(),
            tool_call_id: call.id.clone(),
            name: call.name.clone(),
            is_error: false,
        }
    }

    /// Error-flagged tool result answering `call`.
    pub fn tool_error(call: &ToolCall, error: impl Into<String>) -> Self {
        Message::Tool {
            content: error.into(),
            tool_call_id: call.id.clone(),
            name: call.name.clone(),
            is_error: true,
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Message::System { .. } => MessageKind::System,
            Message::Human { .. } => MessageKind::Human,
            Message::Ai { .. } => MessageKind::Ai,
            Message::Tool { .. } => MessageKind::Tool,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Message::System { content }
            | Message::Human { content }
            | Message::Ai { content, .. }
            | Message::Tool { content, .. } => content,
        }
    }

    pub fn is_human(&self) -> bool {
        matches!(self, Message::Human { .. })
    }

    pub fn is_system(&self) -> bool {
        matches!(self, Message::System { .. })
    }

    /// Tool calls requested by an AI message (empty for other kinds)
    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            Message::Ai { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls().is_empty()
    }

    /// True for error-flagged tool results
    pub fn is_error(&self) -> bool {
        matches!(self, Message::Tool { is_error: true, .. })
    }
}

/// Strip a single leading newline.
pub fn no_break(text: &str) -> &str {
    text.strip_prefix('\n').unwrap_or(text)
}

/// One classification rule for instruction detection
#[derive(Debug, Clone)]
pub enum InstructionRule {
    /// Text starts with this literal
    Prefix(String),
    /// Text matches this pattern
    Pattern(Regex),
}

impl InstructionRule {
    fn matches(&self, text: &str) -> bool {
        match self {
            InstructionRule::Prefix(prefix) => text.starts_with(prefix.as_str()),
            InstructionRule::Pattern(re) => re.is_match(text),
        }
    }
}

/// Declarative table deciding whether a message is an instruction rather
/// than conversational content.
///
/// System messages are always instructions. Tool results are instructions
/// when `include_tools` is set. Any other message is an instruction when its
/// text (minus one leading newline) matches one of the rules.
#[derive(Debug, Clone)]
pub struct InstructionRules {
    rules: Vec<InstructionRule>,
    include_tools: bool,
}

const DEFAULT_INSTRUCTION_PATTERNS: &[&str] = &[
    r"(?i)^\[Meta-Data\]",
    r"(?i)^Uncertainty Level:",
    r"(?i)^What I Know:",
    r"(?i)^What I Need:",
    r"(?i)^Phase:",
    r"(?i)^Action:",
    r"(?i)^\[/Meta-Data\]",
];

static DEFAULT_RULES: Lazy<InstructionRules> = Lazy::new(InstructionRules::default);

static METADATA_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)\[Meta-Data\].*?\[/Meta-Data\]").expect("metadata block pattern is valid")
});

impl Default for InstructionRules {
    fn default() -> Self {
        let mut rules = vec![InstructionRule::Prefix(INSTRUCTION_PREFIX.to_string())];
        rules.extend(
            DEFAULT_INSTRUCTION_PATTERNS
                .iter()
                .filter_map(|p| Regex::new(p).ok())
                .map(InstructionRule::Pattern),
        );
        Self {
            rules,
            include_tools: true,
        }
    }
}

impl InstructionRules {
    /// Empty table (only system messages count as instructions)
    pub fn empty() -> Self {
        Self {
            rules: Vec::new(),
            include_tools: true,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.rules.push(InstructionRule::Prefix(prefix.into()));
        self
    }

    /// Add a regex rule. Invalid patterns are rejected.
    pub fn with_pattern(mut self, pattern: &str) -> Result<Self, regex::Error> {
        self.rules.push(InstructionRule::Pattern(Regex::new(pattern)?));
        Ok(self)
    }

    pub fn with_tools(mut self, include_tools: bool) -> Self {
        self.include_tools = include_tools;
        self
    }

    pub fn rules(&self) -> &[InstructionRule] {
        &self.rules
    }

    pub fn is_instruction_text(&self, text: &str) -> bool {
        let text = no_break(text);
        !text.is_empty() && self.rules.iter().any(|r| r.matches(text))
    }

    pub fn is_instruction(&self, message: &Message) -> bool {
        match message.kind() {
            MessageKind::System => true,
            MessageKind::Tool if self.include_tools => true,
            _ => self.is_instruction_text(message.content()),
        }
    }
}

/// Instruction check against the default rule table.
pub fn is_instruction(message: &Message) -> bool {
    DEFAULT_RULES.is_instruction(message)
}

/// Text-only instruction check against the default rule table.
pub fn is_instruction_text(text: &str) -> bool {
    DEFAULT_RULES.is_instruction_text(text)
}

/// Messages that are part of the visible conversation.
pub fn exclude_instructions(messages: &[Message]) -> Vec<&Message> {
    messages.iter().filter(|m| !is_instruction(m)).collect()
}

const INSTRUCTION_PREFIX: &str = "Instruction: ";

/// Wrap text in the instruction envelope used for models that only accept
/// a leading system message.
pub fn wrap_instruction(instruction: &str) -> String {
    format!(
        "{}{}.\nDo not comment on this message.",
        INSTRUCTION_PREFIX, instruction
    )
}

/// Speaker labels used when rendering a transcript
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptAliases {
    pub ai: String,
    pub human: String,
    pub system: String,
    pub tool: String,
}

impl Default for TranscriptAliases {
    fn default() -> Self {
        Self {
            ai: "ai".to_string(),
            human: "Respondent".to_string(),
            system: "System".to_string(),
            tool: "tool".to_string(),
        }
    }
}

impl TranscriptAliases {
    pub fn with_ai(mut self, alias: impl Into<String>) -> Self {
        self.ai = alias.into();
        self
    }

    fn label(&self, kind: MessageKind) -> &str {
        match kind {
            MessageKind::System => &self.system,
            MessageKind::Human => &self.human,
            MessageKind::Ai => &self.ai,
            MessageKind::Tool => &self.tool,
        }
    }
}

/// Render messages as `"<alias>: -- <text>"` lines.
pub fn stringify_messages<'a, I>(messages: I, aliases: &TranscriptAliases) -> String
where
    I: IntoIterator<Item = &'a Message>,
{
    messages
        .into_iter()
        .map(|m| format!("{}: -- {}", aliases.label(m.kind()), no_break(m.content())))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Remove every `[Meta-Data]...[/Meta-Data]` block and trim the result.
pub fn remove_metadata_blocks(text: &str) -> String {
    METADATA_BLOCK.replace_all(text, "").trim().to_string()
}

/// Date/time block appended to human input.
pub fn metadata_block<Tz>(now: &chrono::DateTime<Tz>) -> String
where
    Tz: chrono::TimeZone,
    Tz::Offset: std::fmt::Display,
{
    format!(
        "\n\n[Meta-Data]\nDate: {}\nTime: {}\n[/Meta-Data]",
        now.format("%Y-%m-%d"),
        now.format("%H:%M:%S")
    )
}

/// Size statistics over a message batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MessagesSize {
    pub total_chars: usize,
    pub human_readable: String,
    pub messages_count: usize,
    /// Characters per message kind
    pub breakdown: BTreeMap<MessageKind, usize>,
}

impl MessagesSize {
    pub fn of(messages: &[Message]) -> Self {
        let mut breakdown = BTreeMap::new();
        let mut total_chars = 0;
        for message in messages {
            let chars = message.content().chars().count();
            total_chars += chars;
            *breakdown.entry(message.kind()).or_insert(0) += chars;
        }
        Self {
            total_chars,
            human_readable: format_size(total_chars),
            messages_count: messages.len(),
            breakdown,
        }
    }
}

/// Human-readable size of a character count.
pub fn format_size(chars: usize) -> String {
    if chars < 1024 {
        format!("{} chars", chars)
    } else if chars < 1024 * 1024 {
        format!("{:.2} KB", chars as f64 / 1024.0)
    } else {
        format!("{:.2} MB", chars as f64 / (1024.0 * 1024.0))
    }
}
