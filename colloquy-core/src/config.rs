//! Configuration types for Colloquy dialogs

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{ColloquyError, Result};
use crate::llm::RetryConfig;

/// Supported LLM provider families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[serde(alias = "open_ai")]
    OpenAI,
    Anthropic,
    /// Yandex Cloud through its OpenAI-compatible endpoint
    Yandex,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAI => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Yandex => "yandex",
        }
    }

    /// Suffix of the per-provider `DEFAULT_*_MODEL_<SUFFIX>` variables
    pub fn env_suffix(&self) -> &'static str {
        match self {
            ProviderKind::OpenAI => "OPENAI",
            ProviderKind::Anthropic => "ANTHROPIC",
            ProviderKind::Yandex => "YANDEX",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::OpenAI => "gpt-5",
            ProviderKind::Anthropic => "claude-sonnet-4-5",
            ProviderKind::Yandex => "gpt-oss-120b",
        }
    }

    /// Lighter model used for summaries
    pub fn default_summary_model(&self) -> &'static str {
        match self {
            ProviderKind::OpenAI => "gpt-5-mini",
            ProviderKind::Anthropic => "claude-haiku-4-5",
            ProviderKind::Yandex => "gpt-oss-20b",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = ColloquyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAI),
            "anthropic" => Ok(ProviderKind::Anthropic),
            "yandex" => Ok(ProviderKind::Yandex),
            other => Err(ColloquyError::Configuration(format!(
                "Unsupported LLM provider: {}. Supported providers: openai, anthropic, yandex",
                other
            ))),
        }
    }
}

/// LLM provider section
///
/// Unset provider and model fall back to the `DEFAULT_LLM_*` environment
/// variables, see [`crate::llm::LLMProviderFactory`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LLMProviderConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderKind>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    pub temperature: f32,

    /// API key (usually read from provider-specific env vars instead)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl LLMProviderConfig {
    pub fn new(provider: ProviderKind) -> Self {
        Self {
            provider: Some(provider),
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// When and how far history is compacted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryConfig {
    /// Buffer length that triggers compaction; 0 disables it
    pub threshold: usize,

    /// Number of trailing messages kept verbatim
    pub limit: usize,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            threshold: 10,
            limit: 5,
        }
    }
}

impl SummaryConfig {
    pub fn disabled() -> Self {
        Self {
            threshold: 0,
            ..Default::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.threshold > 0
    }
}

pub const DEFAULT_START_SYSTEM_MSG: &str = "You are a helpful assistant.";

pub const DEFAULT_FORMAT_INSTRUCTIONS: &str =
    "Format replies as plain text with ordinary line breaks. Do not use HTML, Markdown or any other markup.";

/// Main configuration of a dialog
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DialogConfig {
    /// Name of the AI side in transcripts and logs
    pub alias: String,

    /// Prefix of the session key, usually the dialog type
    pub dialog_code: String,

    pub start_system_msg: String,
    pub additional_starting_instructions: String,
    pub format_instructions: String,

    /// Reply returned when the dialog is stopped
    pub interruption_message: String,

    /// Start new sessions without the first human message
    pub ignore_starting_message: bool,

    /// Append a `[Meta-Data]` date block to human messages
    pub set_messages_dates: bool,

    /// Custom fields persisted with the session
    pub storables: Vec<String>,

    /// Keys never overwritten on restore
    pub restore_exceptions: Vec<String>,

    pub summary: SummaryConfig,

    pub llm: LLMProviderConfig,

    /// Summary model; defaults to the lighter model of the main provider
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_llm: Option<LLMProviderConfig>,

    pub retry: RetryConfig,

    /// Total attempts allowed while post-checks reject the reply
    pub max_validation_attempts: usize,

    /// Model/tool cycles allowed within one attempt
    pub max_tool_rounds: usize,

    #[serde(with = "humantime_serde")]
    pub opponent_delay: Duration,

    /// Never write to the history store
    pub read_only_history: bool,
}

impl Default for DialogConfig {
    fn default() -> Self {
        Self {
            alias: "ai".to_string(),
            dialog_code: String::new(),
            start_system_msg: DEFAULT_START_SYSTEM_MSG.to_string(),
            additional_starting_instructions: String::new(),
            format_instructions: DEFAULT_FORMAT_INSTRUCTIONS.to_string(),
            interruption_message: "Dialog is over".to_string(),
            ignore_starting_message: false,
            set_messages_dates: true,
            storables: Vec::new(),
            restore_exceptions: vec!["user_wants_to_speak".to_string()],
            summary: SummaryConfig::default(),
            llm: LLMProviderConfig::default(),
            summary_llm: None,
            retry: RetryConfig::default(),
            max_validation_attempts: 10,
            max_tool_rounds: 25,
            opponent_delay: Duration::from_millis(1000),
            read_only_history: false,
        }
    }
}

impl DialogConfig {
    pub fn new(dialog_code: impl Into<String>) -> Self {
        Self {
            dialog_code: dialog_code.into(),
            ..Default::default()
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = alias.into();
        self
    }

    pub fn with_start_system_msg(mut self, msg: impl Into<String>) -> Self {
        self.start_system_msg = msg.into();
        self
    }

    pub fn with_format_instructions(mut self, msg: impl Into<String>) -> Self {
        self.format_instructions = msg.into();
        self
    }

    pub fn with_messages_dates(mut self, enabled: bool) -> Self {
        self.set_messages_dates = enabled;
        self
    }

    pub fn with_storables<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.storables = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_summary(mut self, summary: SummaryConfig) -> Self {
        self.summary = summary;
        self
    }

    pub fn with_llm(mut self, llm: LLMProviderConfig) -> Self {
        self.llm = llm;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Load configuration from file and environment variables.
    ///
    /// Loads in this order:
    /// 1. Default configuration
    /// 2. `colloquy.toml` in the working directory
    /// 3. Environment variable overrides (`COLLOQUY_`, nested keys split on `__`)
    /// 4. The file named by `COLLOQUY_CONFIG_PATH`
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration source is invalid or fails validation.
    pub fn load() -> Result<Self> {
        use figment::{
            Figment,
            providers::{Env, Format, Serialized, Toml},
        };

        let mut figment = Figment::from(Serialized::defaults(DialogConfig::default()))
            .merge(Toml::file("colloquy.toml"))
            .merge(
                Env::prefixed("COLLOQUY_")
                    .ignore(&["config_path"])
                    .split("__"),
            );

        if let Ok(path) = std::env::var("COLLOQUY_CONFIG_PATH") {
            figment = figment.merge(Toml::file(path));
        }

        let config: DialogConfig = figment.extract().map_err(|e| {
            ColloquyError::Configuration(format!("Failed to load configuration: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        use figment::{
            Figment,
            providers::{Format, Serialized, Toml},
        };

        let config: DialogConfig = Figment::from(Serialized::defaults(DialogConfig::default()))
            .merge(Toml::file(path))
            .extract()
            .map_err(|e| {
                ColloquyError::Configuration(format!("Failed to load configuration file: {}", e))
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.summary.is_enabled() && self.summary.limit == 0 {
            return Err(ColloquyError::Configuration(
                "summary.limit must be non-zero when summary.threshold is set".to_string(),
            ));
        }

        for (section, llm) in std::iter::once(("llm", &self.llm))
            .chain(self.summary_llm.iter().map(|s| ("summary_llm", s)))
        {
            if !(0.0..=2.0).contains(&llm.temperature) {
                return Err(ColloquyError::Configuration(format!(
                    "{}.temperature must be within 0..=2, got {}",
                    section, llm.temperature
                )));
            }
        }

        if self.max_validation_attempts == 0 {
            return Err(ColloquyError::Configuration(
                "max_validation_attempts must be at least 1".to_string(),
            ));
        }
        if self.max_tool_rounds == 0 {
            return Err(ColloquyError::Configuration(
                "max_tool_rounds must be at least 1".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ColloquyError::Configuration(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
