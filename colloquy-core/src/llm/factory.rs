//! Factory for creating LLM providers from configuration
//!
//! Model resolution order for the conversational model: explicit config,
//! `DEFAULT_LLM_MODEL_<PROVIDER>`, `DEFAULT_LLM_MODEL`, then the built-in
//! default of the provider family. The summary model is resolved from
//! `DEFAULT_SUMMARY_MODEL`, `DEFAULT_SUMMARY_MODEL_<PROVIDER>`, then the
//! family's lighter built-in default.

use crate::config::LLMProviderConfig;
use crate::error::{ColloquyError, Result};
use crate::llm::LLMProvider;
use std::sync::Arc;

pub use crate::config::ProviderKind;

#[cfg(feature = "llm-openai")]
use crate::llm::providers::openai::OpenAIProvider;

#[cfg(feature = "llm-anthropic")]
use crate::llm::providers::anthropic::AnthropicProvider;

pub const DEFAULT_YANDEX_BASE_URL: &str = "https://llm.api.cloud.yandex.net/v1";

/// Variable lookup used by the factory; the process environment by default
type Env<'a> = &'a dyn Fn(&str) -> Option<String>;

fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn env_non_empty(env: Env<'_>, key: &str) -> Option<String> {
    env(key).filter(|v| !v.trim().is_empty())
}

/// Factory for creating LLM providers
pub struct LLMProviderFactory;

impl LLMProviderFactory {
    /// Provider from config, else `DEFAULT_LLM_PROVIDER`, else OpenAI.
    ///
    /// # Errors
    ///
    /// Returns an error if `DEFAULT_LLM_PROVIDER` names an unsupported provider.
    pub fn resolve_provider(requested: Option<ProviderKind>) -> Result<ProviderKind> {
        Self::resolve_provider_in(requested, &process_env)
    }

    fn resolve_provider_in(requested: Option<ProviderKind>, env: Env<'_>) -> Result<ProviderKind> {
        match requested {
            Some(kind) => Ok(kind),
            None => match env_non_empty(env, "DEFAULT_LLM_PROVIDER") {
                Some(name) => name.parse(),
                None => Ok(ProviderKind::OpenAI),
            },
        }
    }

    /// Conversational model name for `kind`.
    pub fn resolve_model(kind: ProviderKind, explicit: Option<&str>) -> String {
        Self::resolve_model_in(kind, explicit, &process_env)
    }

    fn resolve_model_in(kind: ProviderKind, explicit: Option<&str>, env: Env<'_>) -> String {
        explicit
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .or_else(|| env_non_empty(env, &format!("DEFAULT_LLM_MODEL_{}", kind.env_suffix())))
            .or_else(|| env_non_empty(env, "DEFAULT_LLM_MODEL"))
            .unwrap_or_else(|| kind.default_model().to_string())
    }

    /// Summary model name for `kind`.
    pub fn summary_model(kind: ProviderKind) -> String {
        Self::summary_model_in(kind, &process_env)
    }

    fn summary_model_in(kind: ProviderKind, env: Env<'_>) -> String {
        env_non_empty(env, "DEFAULT_SUMMARY_MODEL")
            .or_else(|| env_non_empty(env, &format!("DEFAULT_SUMMARY_MODEL_{}", kind.env_suffix())))
            .unwrap_or_else(|| kind.default_summary_model().to_string())
    }

    /// Create an LLM provider from configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the provider cannot be created (e.g., missing API key)
    pub async fn create(config: &LLMProviderConfig) -> Result<Arc<dyn LLMProvider>> {
        Self::create_in(config, &process_env)
    }

    fn create_in(config: &LLMProviderConfig, env: Env<'_>) -> Result<Arc<dyn LLMProvider>> {
        let kind = Self::resolve_provider_in(config.provider, env)?;
        let model = Self::resolve_model_in(kind, config.model.as_deref(), env);
        Self::build(kind, model, config, env)
    }

    /// Create the summarization provider.
    ///
    /// An explicit `model` in `config` wins; otherwise the family's summary
    /// model is used.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider cannot be created.
    pub async fn create_summary(config: &LLMProviderConfig) -> Result<Arc<dyn LLMProvider>> {
        Self::create_summary_in(config, &process_env)
    }

    fn create_summary_in(
        config: &LLMProviderConfig,
        env: Env<'_>,
    ) -> Result<Arc<dyn LLMProvider>> {
        let kind = Self::resolve_provider_in(config.provider, env)?;
        let model = config
            .model
            .clone()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| Self::summary_model_in(kind, env));
        Self::build(kind, model, config, env)
    }

    /// Create from an optional config section
    pub async fn from_config(
        config: Option<&LLMProviderConfig>,
    ) -> Result<Option<Arc<dyn LLMProvider>>> {
        match config {
            Some(cfg) => Ok(Some(Self::create(cfg).await?)),
            None => Ok(None),
        }
    }

    fn build(
        kind: ProviderKind,
        model: String,
        config: &LLMProviderConfig,
        env: Env<'_>,
    ) -> Result<Arc<dyn LLMProvider>> {
        tracing::debug!(provider = %kind, model = %model, "Creating LLM provider");
        match kind {
            #[cfg(feature = "llm-openai")]
            ProviderKind::OpenAI => {
                let provider = match (&config.api_key, &config.base_url) {
                    (None, None) => OpenAIProvider::from_env(model)?,
                    (api_key, base_url) => {
                        let api_key = api_key
                            .clone()
                            .or_else(|| env_non_empty(env, "OPENAI_API_KEY"))
                            .ok_or_else(|| {
                                ColloquyError::Configuration(
                                    "OPENAI_API_KEY environment variable not set".to_string(),
                                )
                            })?;
                        let base_url = base_url
                            .clone()
                            .or_else(|| env_non_empty(env, "OPENAI_BASE_URL"))
                            .or_else(|| env_non_empty(env, "PROXY_URL"))
                            .unwrap_or_else(|| {
                                crate::llm::providers::openai::DEFAULT_OPENAI_BASE_URL.to_string()
                            });
                        OpenAIProvider::with_base_url(api_key, model, base_url)
                    }
                };
                Ok(Arc::new(provider))
            }

            #[cfg(feature = "llm-openai")]
            ProviderKind::Yandex => {
                let folder_id = env_non_empty(env, "YC_FOLDER_ID").ok_or_else(|| {
                    ColloquyError::Configuration(
                        "YC_FOLDER_ID environment variable is required for YandexGPT provider"
                            .to_string(),
                    )
                })?;
                let api_key = config
                    .api_key
                    .clone()
                    .or_else(|| env_non_empty(env, "YC_API_KEY"))
                    .ok_or_else(|| {
                        ColloquyError::Configuration(
                            "YC_API_KEY environment variable is required for YandexGPT provider"
                                .to_string(),
                        )
                    })?;
                let yc_model = env_non_empty(env, "YC_MODEL").unwrap_or(model);
                let base_url = config
                    .base_url
                    .clone()
                    .or_else(|| env_non_empty(env, "YC_BASE_URL"))
                    .or_else(|| env_non_empty(env, "YC_API_BASE_URL"))
                    .or_else(|| env_non_empty(env, "PROXY_URL"))
                    .unwrap_or_else(|| DEFAULT_YANDEX_BASE_URL.to_string());

                let provider = OpenAIProvider::with_base_url(
                    api_key,
                    yandex_model_uri(&folder_id, &yc_model),
                    base_url,
                )
                .with_provider_name("yandex");
                Ok(Arc::new(provider))
            }

            #[cfg(not(feature = "llm-openai"))]
            ProviderKind::OpenAI | ProviderKind::Yandex => Err(ColloquyError::Configuration(
                format!("{} provider requires 'llm-openai' feature", kind),
            )),

            #[cfg(feature = "llm-anthropic")]
            ProviderKind::Anthropic => {
                let provider = match &config.api_key {
                    Some(api_key) => {
                        let base_url = config
                            .base_url
                            .clone()
                            .or_else(|| env_non_empty(env, "ANTHROPIC_BASE_URL"))
                            .or_else(|| env_non_empty(env, "PROXY_URL"))
                            .unwrap_or_else(|| {
                                crate::llm::providers::anthropic::DEFAULT_ANTHROPIC_BASE_URL
                                    .to_string()
                            });
                        AnthropicProvider::with_base_url(api_key.clone(), model, base_url)
                    }
                    None => AnthropicProvider::from_env(model)?,
                };
                Ok(Arc::new(provider))
            }

            #[cfg(not(feature = "llm-anthropic"))]
            ProviderKind::Anthropic => Err(ColloquyError::Configuration(
                "Anthropic provider requires 'llm-anthropic' feature".to_string(),
            )),
        }
    }
}

/// Model URI in the `gpt://{folder}/{model}/latest` form used by Yandex Cloud.
pub fn yandex_model_uri(folder_id: &str, model: &str) -> String {
    format!("gpt://{}/{}/latest", folder_id, model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_yandex_model_uri() {
        assert_eq!(
            yandex_model_uri("b1g123", "gpt-oss-120b"),
            "gpt://b1g123/gpt-oss-120b/latest"
        );
    }

    #[test]
    fn test_explicit_model_wins() {
        assert_eq!(
            LLMProviderFactory::resolve_model(ProviderKind::Anthropic, Some("claude-opus-4-1")),
            "claude-opus-4-1"
        );
    }

    fn fixed_env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_builtin_defaults() {
        let env = fixed_env(&[]);
        assert_eq!(
            LLMProviderFactory::resolve_provider_in(None, &env).unwrap(),
            ProviderKind::OpenAI
        );
        assert_eq!(
            LLMProviderFactory::resolve_model_in(ProviderKind::OpenAI, None, &env),
            "gpt-5"
        );
        assert_eq!(
            LLMProviderFactory::summary_model_in(ProviderKind::Anthropic, &env),
            "claude-haiku-4-5"
        );
    }

    #[test]
    fn test_env_defaults() {
        let env = fixed_env(&[
            ("DEFAULT_LLM_PROVIDER", "Anthropic"),
            ("DEFAULT_LLM_MODEL", "generic-model"),
            ("DEFAULT_LLM_MODEL_OPENAI", "gpt-special"),
            ("DEFAULT_SUMMARY_MODEL_ANTHROPIC", "claude-tiny"),
            ("DEFAULT_SUMMARY_MODEL_OPENAI", "  "),
        ]);

        assert_eq!(
            LLMProviderFactory::resolve_provider_in(None, &env).unwrap(),
            ProviderKind::Anthropic
        );
        assert_eq!(
            LLMProviderFactory::resolve_model_in(ProviderKind::OpenAI, None, &env),
            "gpt-special"
        );
        assert_eq!(
            LLMProviderFactory::resolve_model_in(ProviderKind::Yandex, None, &env),
            "generic-model"
        );
        assert_eq!(
            LLMProviderFactory::summary_model_in(ProviderKind::Anthropic, &env),
            "claude-tiny"
        );
        // Blank values fall through to the built-in default
        assert_eq!(
            LLMProviderFactory::summary_model_in(ProviderKind::OpenAI, &env),
            ProviderKind::OpenAI.default_summary_model()
        );
    }

    #[test]
    fn test_unsupported_provider_name() {
        let env = fixed_env(&[("DEFAULT_LLM_PROVIDER", "gemini")]);
        let err = LLMProviderFactory::resolve_provider_in(None, &env).unwrap_err();
        assert!(err.to_string().contains("Unsupported LLM provider: gemini"));
    }

    #[test]
    fn test_yandex_requires_folder_id() {
        let config = LLMProviderConfig {
            provider: Some(ProviderKind::Yandex),
            api_key: Some("key".to_string()),
            ..Default::default()
        };

        let result = LLMProviderFactory::create_in(&config, &fixed_env(&[]));
        assert!(matches!(result, Err(ColloquyError::Configuration(_))));

        let env = fixed_env(&[
            ("YC_FOLDER_ID", "folder"),
            ("DEFAULT_LLM_MODEL", "generic-model"),
        ]);
        let provider = LLMProviderFactory::create_in(&config, &env).unwrap();
        let info = provider.model_info();
        assert_eq!(info.provider, "yandex");
        assert_eq!(info.model_name, "gpt://folder/generic-model/latest");
    }

    #[tokio::test]
    async fn test_create_with_explicit_key() {
        let config = LLMProviderConfig {
            provider: Some(ProviderKind::Anthropic),
            model: Some("claude-sonnet-4-5".to_string()),
            api_key: Some("key".to_string()),
            base_url: Some("https://proxy.local/v1".to_string()),
            ..Default::default()
        };
        let provider = LLMProviderFactory::create(&config).await.unwrap();
        assert_eq!(provider.model_info().model_name, "claude-sonnet-4-5");

        let summary = LLMProviderFactory::create_summary(&LLMProviderConfig {
            model: None,
            ..config
        })
        .await
        .unwrap();
        assert_eq!(summary.model_info().provider, "anthropic");
    }
}
