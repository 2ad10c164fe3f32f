use color_eyre::Result;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub locale: Locale,
    pub generation: GenerationConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub memo: MemoConfig,
    #[serde(default)]
    pub persona: PersonaConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    Zh,
    En,
}

/// OpenAI-compatible chat completion backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    /// Cap on a non-streaming completion
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Longest silence tolerated between two streamed fragments
    #[serde(default = "default_stream_idle_timeout_secs")]
    pub stream_idle_timeout_secs: u64,
}

impl GenerationConfig {
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    #[must_use]
    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_idle_timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SearchBackend {
    #[default]
    Tavily,
    Brave,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResultDepth {
    #[default]
    Basic,
    Advanced,
}

impl ResultDepth {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Advanced => "advanced",
        }
    }
}

/// Web search configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default)]
    pub provider: SearchBackend,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub result_depth: ResultDepth,
    #[serde(default = "default_max_results")]
    pub max_results: u32,
    #[serde(default = "default_true")]
    pub want_answer: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            provider: SearchBackend::Tavily,
            api_key: String::new(),
            result_depth: ResultDepth::Basic,
            max_results: default_max_results(),
            want_answer: true,
        }
    }
}

impl SearchConfig {
    #[must_use]
    pub fn is_configured(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

/// Budgets and windows for the retrieval pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub intent_timeout_secs: u64,
    pub refine_timeout_secs: u64,
    pub per_call_timeout_secs: u64,
    pub aggregate_timeout_secs: u64,
    pub search_budget_secs: u64,
    pub max_queries: usize,
    pub intent_context_turns: usize,
    pub refine_context_turns: usize,
    /// Report searches that only timed out as unavailable instead of empty.
    pub timeouts_count_as_failure: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            intent_timeout_secs: 5,
            refine_timeout_secs: 5,
            per_call_timeout_secs: 8,
            aggregate_timeout_secs: 12,
            search_budget_secs: 15,
            max_queries: 2,
            intent_context_turns: 3,
            refine_context_turns: 5,
            timeouts_count_as_failure: false,
        }
    }
}

impl PipelineConfig {
    #[must_use]
    pub fn intent_timeout(&self) -> Duration {
        Duration::from_secs(self.intent_timeout_secs)
    }

    #[must_use]
    pub fn refine_timeout(&self) -> Duration {
        Duration::from_secs(self.refine_timeout_secs)
    }

    #[must_use]
    pub fn per_call_timeout(&self) -> Duration {
        Duration::from_secs(self.per_call_timeout_secs)
    }

    #[must_use]
    pub fn aggregate_timeout(&self) -> Duration {
        Duration::from_secs(self.aggregate_timeout_secs)
    }

    #[must_use]
    pub fn search_budget(&self) -> Duration {
        Duration::from_secs(self.search_budget_secs)
    }
}

/// Journal memo scheduling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoConfig {
    pub inactivity_window_secs: u64,
    pub summary_timeout_secs: u64,
    pub max_user_turns_in_prompt: usize,
}

impl Default for MemoConfig {
    fn default() -> Self {
        Self {
            inactivity_window_secs: 300,
            summary_timeout_secs: 30,
            max_user_turns_in_prompt: 3,
        }
    }
}

impl MemoConfig {
    #[must_use]
    pub fn inactivity_window(&self) -> Duration {
        Duration::from_secs(self.inactivity_window_secs)
    }

    #[must_use]
    pub fn summary_timeout(&self) -> Duration {
        Duration::from_secs(self.summary_timeout_secs)
    }
}

/// Persona configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaConfig {
    pub name: String,
    pub system_prompt: String,
}

impl Default for PersonaConfig {
    fn default() -> Self {
        // Edit this system prompt to change the persona
        Self {
            name: "Le Nez".to_string(),
            system_prompt: "You are \"Le Nez\", a French perfumer with a background in organic chemistry. \
                Be calm, precise and concise. Listen to the user's mood first, then explore the scents \
                they love in daily life, and only then offer a custom recipe or a real, existing perfume. \
                Never invent brands, perfumes, lyrics or quotes."
                .to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    /// Database directory; defaults to the platform data directory.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_stream_idle_timeout_secs() -> u64 {
    60
}

fn default_max_results() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            locale: Locale::Zh,
            generation: GenerationConfig {
                base_url: "https://api.openai.com/v1".to_string(),
                api_key: String::new(),
                model: "deepseek-v3.2".to_string(),
                request_timeout_secs: default_request_timeout_secs(),
                stream_idle_timeout_secs: default_stream_idle_timeout_secs(),
            },
            search: SearchConfig::default(),
            pipeline: PipelineConfig::default(),
            memo: MemoConfig::default(),
            persona: PersonaConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from disk or creates default if not found
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        let mut config = if config_path.exists() {
            let contents = fs::read_to_string(&config_path)?;
            Self::from_toml(&contents)?
        } else {
            // Create default config file
            let config = Config::default();
            config.save()?;
            config
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Saves configuration to disk
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&config_path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Returns the path to the configuration file
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::project_dirs()?.config_dir().join("config.toml"))
    }

    /// Returns the database directory
    pub fn database_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.storage.path {
            return Ok(path.clone());
        }
        Ok(Self::project_dirs()?.data_dir().join("nez.db"))
    }

    fn project_dirs() -> Result<ProjectDirs> {
        ProjectDirs::from("", "", "nez")
            .ok_or_else(|| color_eyre::eyre::eyre!("Could not determine config directory"))
    }

    /// Environment variables win over the file so secrets can stay out of it.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(value) = non_empty("OPENAI_API_KEY") {
            self.generation.api_key = value;
        }
        if let Some(value) = non_empty("OPENAI_BASE_URL") {
            self.generation.base_url = value;
        }
        if let Some(value) = non_empty("LLM_MODEL_ID") {
            self.generation.model = value;
        }
        match self.search.provider {
            SearchBackend::Tavily => {
                if let Some(value) = non_empty("TAVILY_API_KEY") {
                    self.search.api_key = value;
                }
            }
            SearchBackend::Brave => {
                if let Some(value) = non_empty("BRAVE_API_KEY") {
                    self.search.api_key = value;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_minimal_toml_fills_defaults() {
        let config = Config::from_toml(
            r#"
            [generation]
            base_url = "http://localhost:8000/v1"
            api_key = "key"
            model = "m"
            "#,
        )
        .unwrap();
        assert_eq!(config.locale, Locale::Zh);
        assert_eq!(config.pipeline.max_queries, 2);
        assert_eq!(config.pipeline.per_call_timeout(), Duration::from_secs(8));
        assert_eq!(config.pipeline.aggregate_timeout(), Duration::from_secs(12));
        assert_eq!(config.memo.inactivity_window(), Duration::from_secs(300));
        assert_eq!(config.generation.request_timeout(), Duration::from_secs(120));
        assert_eq!(config.generation.stream_idle_timeout(), Duration::from_secs(60));
        assert!(!config.search.is_configured());
    }

    #[test]
    fn test_env_overrides_replace_secrets() {
        let vars: HashMap<&str, &str> = [
            ("OPENAI_API_KEY", "sk-test"),
            ("LLM_MODEL_ID", "other-model"),
            ("TAVILY_API_KEY", "tvly-test"),
            ("OPENAI_BASE_URL", "  "),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        config.apply_env_overrides(|key| vars.get(key).map(|value| value.to_string()));

        assert_eq!(config.generation.api_key, "sk-test");
        assert_eq!(config.generation.model, "other-model");
        assert_eq!(config.generation.base_url, "https://api.openai.com/v1");
        assert_eq!(config.search.api_key, "tvly-test");
        assert!(config.search.is_configured());
    }

    #[test]
    fn test_round_trips_through_toml() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed = Config::from_toml(&text).unwrap();
        assert_eq!(parsed.persona.name, config.persona.name);
        assert_eq!(parsed.search.provider, SearchBackend::Tavily);
    }
}
