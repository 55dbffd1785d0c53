use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::compliance::MappingStrategy;
use crate::models::ComplianceStandard;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    #[serde(default)]
    pub model: String,
    #[serde(default = "default_provider")]
    pub provider: String,
    pub base_url: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_provider() -> String {
    "none".to_string()
}

fn default_timeout() -> u64 {
    60
}

fn default_max_tokens() -> u32 {
    4000
}

fn default_temperature() -> f32 {
    0.1
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: std::env::var("HEALTHCASE_API_KEY").ok(),
            model: "".to_string(),
            provider: default_provider(),
            base_url: None,
            timeout: default_timeout(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub default_standards: Vec<ComplianceStandard>,
    pub extraction: ExtractionConfig,
    pub compliance: ComplianceConfig,
    pub generation: GenerationConfig,
    pub quality: QualityConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_standards: vec![
                ComplianceStandard::Fda,
                ComplianceStandard::Hipaa,
                ComplianceStandard::Iec62304,
                ComplianceStandard::Iso27001,
            ],
            extraction: ExtractionConfig::default(),
            compliance: ComplianceConfig::default(),
            generation: GenerationConfig::default(),
            quality: QualityConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Characters of document text sent to the completion service.
    pub max_input_length: usize,
    pub similarity_threshold: f64,
    pub base_effort_hours: f64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_input_length: 1_000_000,
            similarity_threshold: 0.8,
            base_effort_hours: 4.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComplianceConfig {
    pub strategy: MappingStrategy,
    pub confidence_threshold: f64,
}

impl Default for ComplianceConfig {
    fn default() -> Self {
        Self {
            strategy: MappingStrategy::Confidence,
            confidence_threshold: 0.7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub include_boundary_tests: bool,
    pub include_security_tests: bool,
    pub include_performance_tests: bool,
    pub max_test_cases_per_requirement: usize,
    pub similarity_threshold: f64,
    pub base_duration_minutes: f64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            include_boundary_tests: true,
            include_security_tests: true,
            include_performance_tests: true,
            max_test_cases_per_requirement: 10,
            similarity_threshold: 0.8,
            base_duration_minutes: 15.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    pub min_completeness: f64,
    pub min_accuracy: f64,
    pub min_traceability: f64,
    pub min_compliance: f64,
    pub max_recommendations: usize,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_completeness: 0.8,
            min_accuracy: 0.85,
            min_traceability: 0.9,
            min_compliance: 0.8,
            max_recommendations: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub timeout_minutes: i64,
    pub persist: bool,
    pub store_path: Option<PathBuf>,
    /// Conversation entries kept per session, oldest dropped first.
    pub max_history: usize,
}

pub const DEFAULT_SESSION_TIMEOUT_MINUTES: i64 = 60;

/// Idle timeout for `minutes`, or `None` when it is not positive or too large
/// for a `chrono::Duration`.
pub fn idle_timeout(minutes: i64) -> Option<chrono::Duration> {
    chrono::Duration::try_minutes(minutes).filter(|timeout| *timeout > chrono::Duration::zero())
}

impl SessionConfig {
    pub fn idle_timeout(&self) -> Option<chrono::Duration> {
        idle_timeout(self.timeout_minutes)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_minutes: DEFAULT_SESSION_TIMEOUT_MINUTES,
            persist: true,
            store_path: None,
            max_history: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "warn".to_string() }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            pipeline: PipelineConfig::default(),
            session: SessionConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    pub fn config_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Could not find home directory"))?;
        Ok(home.join(".healthcase"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.yml"))
    }

    pub async fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?).await
    }

    /// Reads the YAML file at `path` (writing defaults first if it does not
    /// exist) and applies `HEALTHCASE__SECTION__KEY` environment overrides.
    pub async fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            Config::default().save_to(path).await?;
        }

        let settings = ::config::Config::builder()
            .add_source(::config::File::from(path.to_path_buf()).format(::config::FileFormat::Yaml))
            .add_source(
                ::config::Environment::with_prefix("HEALTHCASE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: Config = settings.try_deserialize()?;
        if config.llm.api_key.is_none() {
            config.llm.api_key = std::env::var("HEALTHCASE_API_KEY").ok();
        }
        Ok(config)
    }

    pub async fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?).await
    }

    pub async fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let content = serde_yaml::to_string(self)?;
        fs::write(path, content).await?;

        Ok(())
    }

    pub fn session_store_path(&self) -> Result<PathBuf> {
        match &self.session.store_path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::config_dir()?.join("sessions.json")),
        }
    }

    pub fn set_api_key(&mut self, api_key: String) {
        self.llm.api_key = Some(api_key);
    }

    pub fn set_model(&mut self, model: String) {
        self.llm.model = model;
    }

    pub fn set_provider(&mut self, provider: &str) {
        self.llm.provider = provider.to_string();

        match provider {
            "openai" => {
                self.llm.base_url = Some("https://api.openai.com/v1/chat/completions".to_string());
                if self.llm.model.is_empty() {
                    self.llm.model = "gpt-4o".to_string();
                }
            }
            "gemini" => {
                self.llm.base_url = Some("https://generativelanguage.googleapis.com/v1beta/models".to_string());
                if self.llm.model.is_empty() {
                    self.llm.model = "gemini-1.5-pro".to_string();
                }
            }
            "azure" => {
                // Azure deployments need a user supplied endpoint
                if self.llm.model.is_empty() {
                    self.llm.model = "gpt-4".to_string();
                }
            }
            "claude" => {
                self.llm.base_url = Some("https://api.anthropic.com/v1/messages".to_string());
                if self.llm.model.is_empty() {
                    self.llm.model = "claude-3-5-sonnet-20240620".to_string();
                }
            }
            "ollama" => {
                self.llm.base_url = Some("http://localhost:11434/api/generate".to_string());
                if self.llm.model.is_empty() {
                    self.llm.model = "llama3.1:latest".to_string();
                }
            }
            _ => {
                self.llm.base_url = None;
            }
        }
    }

    pub fn is_ai_configured(&self) -> bool {
        let key_ok = self.llm.provider == "ollama" || self.llm.api_key.is_some();
        key_ok && !self.llm.model.is_empty() && self.llm.provider != "none"
    }

    pub fn provider_name(&self) -> &'static str {
        match self.llm.provider.as_str() {
            "openai" => "OpenAI",
            "gemini" => "Google Gemini",
            "azure" => "Azure OpenAI",
            "claude" => "Anthropic Claude",
            "ollama" => "Local Ollama",
            _ => "None",
        }
    }

    pub fn validate(&self) -> ValidationResult {
        let mut issues = Vec::new();
        let mut warnings = Vec::new();

        if let Some(ref api_key) = self.llm.api_key {
            if api_key.is_empty() {
                issues.push("API key is empty".to_string());
            } else if api_key.len() < 10 {
                warnings.push("API key seems too short".to_string());
            }
        } else if self.llm.provider != "ollama" && self.llm.provider != "none" {
            issues.push("API key is required for the selected provider".to_string());
        }

        match self.llm.provider.as_str() {
            "openai" | "gemini" | "claude" | "ollama" => {
                if self.llm.model.is_empty() {
                    issues.push(format!("Model name is required for {}", self.provider_name()));
                }
            }
            "azure" => {
                if self.llm.base_url.is_none() {
                    issues.push("Base URL is required for Azure OpenAI".to_string());
                }
            }
            "none" => {
                warnings.push("AI features are disabled. Every stage will use its built-in fallback".to_string());
            }
            _ => {
                issues.push(format!("Unknown provider: {}", self.llm.provider));
            }
        }

        if self.llm.timeout == 0 {
            warnings.push("Timeout is set to 0, which may cause immediate timeouts".to_string());
        } else if self.llm.timeout > 300 {
            warnings.push("Timeout is very high (>5 minutes), consider reducing it".to_string());
        }

        let unit_ranges = [
            ("extraction.similarity_threshold", self.pipeline.extraction.similarity_threshold),
            ("generation.similarity_threshold", self.pipeline.generation.similarity_threshold),
            ("compliance.confidence_threshold", self.pipeline.compliance.confidence_threshold),
            ("quality.min_completeness", self.pipeline.quality.min_completeness),
            ("quality.min_accuracy", self.pipeline.quality.min_accuracy),
            ("quality.min_traceability", self.pipeline.quality.min_traceability),
            ("quality.min_compliance", self.pipeline.quality.min_compliance),
        ];
        for (name, value) in unit_ranges {
            if !(0.0..=1.0).contains(&value) {
                issues.push(format!("{} must be between 0.0 and 1.0", name));
            }
        }

        if self.pipeline.default_standards.is_empty() {
            warnings.push("No default compliance standards configured".to_string());
        }
        if self.pipeline.generation.max_test_cases_per_requirement == 0 {
            issues.push("generation.max_test_cases_per_requirement must be at least 1".to_string());
        }
        if self.session.idle_timeout().is_none() {
            issues.push("session.timeout_minutes must be a positive number of minutes within range".to_string());
        }

        ValidationResult {
            is_valid: issues.is_empty(),
            issues,
            warnings,
        }
    }
}

#[derive(Debug)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub issues: Vec<String>,
    pub warnings: Vec<String>,
}
