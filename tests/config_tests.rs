use healthcase::compliance::MappingStrategy;
use healthcase::config::*;
use healthcase::models::ComplianceStandard;
use tempfile::TempDir;

#[tokio::test]
async fn test_default_config() {
    let config = Config::default();

    assert_eq!(config.llm.provider, "none");
    assert_eq!(config.llm.timeout, 60);
    assert_eq!(config.pipeline.compliance.strategy, MappingStrategy::Confidence);
    assert_eq!(config.pipeline.compliance.confidence_threshold, 0.7);
    assert_eq!(config.pipeline.generation.max_test_cases_per_requirement, 10);
    assert_eq!(config.session.timeout_minutes, 60);
    assert!(config.pipeline.default_standards.contains(&ComplianceStandard::Hipaa));
}

#[tokio::test]
async fn test_config_modification() {
    let mut config = Config::default();

    config.set_provider("claude");
    config.set_api_key("new-api-key-123".to_string());
    config.set_model("claude-3-haiku".to_string());

    assert_eq!(config.llm.api_key, Some("new-api-key-123".to_string()));
    assert_eq!(config.llm.model, "claude-3-haiku");
    assert_eq!(config.provider_name(), "Anthropic Claude");
    assert!(config.is_ai_configured());
}

#[tokio::test]
async fn test_missing_file_is_created_with_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("config.yml");

    let config = Config::load_from(&path).await.unwrap();
    assert!(path.exists());
    assert_eq!(config.pipeline.quality.min_traceability, 0.9);
}

#[tokio::test]
async fn test_save_and_reload() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.yml");

    let mut config = Config::default();
    config.set_provider("ollama");
    config.pipeline.compliance.strategy = MappingStrategy::RuleBased;
    config.pipeline.default_standards = vec![ComplianceStandard::Gdpr, ComplianceStandard::Iso13485];
    config.session.max_history = 5;
    config.save_to(&path).await.unwrap();

    let reloaded = Config::load_from(&path).await.unwrap();
    assert_eq!(reloaded.llm.provider, "ollama");
    assert_eq!(reloaded.llm.model, "llama3.1:latest");
    assert_eq!(reloaded.pipeline.compliance.strategy, MappingStrategy::RuleBased);
    assert_eq!(
        reloaded.pipeline.default_standards,
        vec![ComplianceStandard::Gdpr, ComplianceStandard::Iso13485]
    );
    assert_eq!(reloaded.session.max_history, 5);
}

#[test]
fn test_validation_flags_out_of_range_thresholds() {
    let mut config = Config::default();
    config.set_provider("ollama");
    config.pipeline.compliance.confidence_threshold = 1.5;
    config.pipeline.generation.max_test_cases_per_requirement = 0;

    let result = config.validate();
    assert!(!result.is_valid);
    assert!(result
        .issues
        .contains(&"compliance.confidence_threshold must be between 0.0 and 1.0".to_string()));
    assert!(result
        .issues
        .contains(&"generation.max_test_cases_per_requirement must be at least 1".to_string()));
}

#[test]
fn test_azure_requires_base_url() {
    let mut config = Config::default();
    config.set_provider("azure");
    config.set_api_key("azure-key-1234567".to_string());

    let result = config.validate();
    assert!(result.issues.contains(&"Base URL is required for Azure OpenAI".to_string()));
}

#[test]
fn test_config_path() {
    let path = Config::config_path().unwrap();
    assert!(path.to_string_lossy().contains(".healthcase"));
    assert!(path.to_string_lossy().contains("config.yml"));
}

#[test]
fn test_session_timeout_out_of_range() {
    let mut config = Config::default();
    config.set_provider("ollama");
    assert_eq!(config.session.idle_timeout(), Some(chrono::Duration::minutes(60)));

    config.session.timeout_minutes = i64::MAX;
    assert!(config.session.idle_timeout().is_none());
    let result = config.validate();
    assert!(!result.is_valid);
    assert!(result
        .issues
        .contains(&"session.timeout_minutes must be a positive number of minutes within range".to_string()));

    assert!(idle_timeout(0).is_none());
    assert!(idle_timeout(-5).is_none());
}
