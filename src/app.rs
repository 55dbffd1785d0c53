use anyhow::{anyhow, bail, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::info;
use walkdir::WalkDir;

use crate::catalog::ReferenceData;
use crate::cli::{AiProvider, Commands, OutputFormat, SessionCommand};
use crate::config::{idle_timeout, Config};
use crate::document_processor::DocumentProcessor;
use crate::error_handler::{ErrorHandler, ProcessingError};
use crate::llm::{CompletionService, LlmClient};
use crate::models::{ComplianceStandard, DocumentInput, WorkflowStep};
use crate::progress::{ProgressIndicator, Spinner};
use crate::session::{FileSessionStore, SessionMemory};
use crate::template_engine::{TemplateContext, TemplateEngine};
use crate::workflow::{Orchestrator, RunOutput, StageObserver};

pub struct App {
    pub config: Config,
    config_path: PathBuf,
    document_processor: DocumentProcessor,
}

struct RunOptions {
    text: Option<String>,
    files: Vec<PathBuf>,
    dir: Option<PathBuf>,
    standards: Vec<ComplianceStandard>,
    session: Option<String>,
    user: Option<String>,
    format: OutputFormat,
    output: Option<PathBuf>,
    offline: bool,
    template_dir: Option<PathBuf>,
    template: String,
    branding: Option<String>,
    continue_on_error: bool,
    skip_invalid: bool,
}

impl App {
    pub async fn new(config_path: Option<PathBuf>) -> Result<Self> {
        let config_path = match config_path {
            Some(path) => path,
            None => Config::config_path()?,
        };
        let config = Config::load_from(&config_path).await?;
        Ok(Self {
            config,
            config_path,
            document_processor: DocumentProcessor::new(),
        })
    }

    fn print_branded_header(&self) {
        println!("🏥 healthcase - Healthcare Requirements Pipeline");
        println!("================================================");
    }

    pub async fn run_command(&mut self, command: Commands) -> Result<()> {
        match command {
            Commands::Run {
                text,
                file,
                dir,
                standard,
                session,
                user,
                format,
                output,
                offline,
                template_dir,
                template,
                branding,
                continue_on_error,
                skip_invalid,
            } => {
                self.run_pipeline(RunOptions {
                    text,
                    files: file,
                    dir,
                    standards: standard,
                    session,
                    user,
                    format,
                    output,
                    offline,
                    template_dir,
                    template,
                    branding,
                    continue_on_error,
                    skip_invalid,
                })
                .await
            }
            Commands::Sessions { action } => self.run_sessions(action).await,
            Commands::Config {
                api_key,
                model,
                provider,
                base_url,
                show,
                validate,
                debug,
            } => self.run_config(api_key, model, provider, base_url, show, validate, debug).await,
        }
    }

    async fn run_pipeline(&self, options: RunOptions) -> Result<()> {
        let chatty = options.output.is_some() || options.format == OutputFormat::Markdown;
        if chatty {
            self.print_branded_header();
        }

        let mut handler = ErrorHandler::new(options.continue_on_error, options.skip_invalid);
        let inputs = match self.collect_inputs(&options, &mut handler, chatty) {
            Ok(inputs) => inputs,
            Err(e) => {
                handler.print_summary();
                return Err(e);
            }
        };

        let completion = if options.offline {
            None
        } else {
            match self.completion_service() {
                Ok(completion) => completion,
                Err(e) => {
                    handler.handle_error(ProcessingError::config_error(e.to_string()));
                    handler.print_summary();
                    return Err(e);
                }
            }
        };
        if chatty {
            match &completion {
                Some(_) => println!(
                    "🤖 Processing {} document(s) with {} ({})...",
                    inputs.len(),
                    self.config.provider_name(),
                    self.config.llm.model
                ),
                None => println!("📋 Processing {} document(s) with built-in rules...", inputs.len()),
            }
        }

        let indicator = Arc::new(ProgressIndicator::new(chatty));
        let observer_indicator = indicator.clone();
        let observer: StageObserver = Arc::new(move |step: &WorkflowStep, progress: f64| observer_indicator.stage(step, progress));

        let memory = self.session_memory().await?;
        let session = match (&options.session, &options.user) {
            (None, Some(user)) => Some(memory.create_for_user(user).await?),
            (session, _) => session.clone(),
        };
        let orchestrator = Orchestrator::new(&self.config, Arc::new(ReferenceData::healthcare()), completion, memory)
            .with_observer(observer);

        let standards = if options.standards.is_empty() { None } else { Some(options.standards.clone()) };
        let result = orchestrator
            .process_documents(inputs, session.as_deref(), standards)
            .await;

        if result.success {
            indicator.finish("Pipeline");
        } else {
            indicator.error("Pipeline failed");
        }

        let rendered = self.render(&result, &options).await?;
        match &options.output {
            Some(path) => {
                fs::write(path, &rendered).await?;
                let absolute_path = std::fs::canonicalize(path).unwrap_or_else(|_| path.clone());
                println!("📁 Report saved: {}", absolute_path.display());
            }
            None => println!("{}", rendered),
        }

        if chatty {
            self.print_run_summary(&result);
            handler.print_summary();
        }

        if !result.success {
            bail!("Pipeline failed: {}", result.error_log.last().cloned().unwrap_or_default());
        }
        Ok(())
    }

    fn collect_inputs(&self, options: &RunOptions, handler: &mut ErrorHandler, chatty: bool) -> Result<Vec<DocumentInput>> {
        let mut inputs = Vec::new();

        if let Some(text) = &options.text {
            inputs.push(DocumentInput::inline("input.txt", text.clone()));
        }

        for path in &options.files {
            if let Some(input) = self.check_file(path, handler)? {
                if chatty {
                    println!("📖 Reading requirements from: {}", path.display());
                }
                inputs.push(input);
            }
        }

        if let Some(dir) = &options.dir {
            if !dir.is_dir() {
                bail!("Directory does not exist: {}", dir.display());
            }
            if chatty {
                println!("📁 Scanning directory: {}", dir.display());
            }
            let before = inputs.len();
            for entry in WalkDir::new(dir).sort_by_file_name().into_iter().filter_map(|e| e.ok()) {
                let path = entry.path();
                if path.is_file() && self.document_processor.is_supported_format(path) {
                    if let Some(input) = self.check_file(path, handler)? {
                        if chatty {
                            println!("  📖 Found: {}", path.display());
                        }
                        inputs.push(input);
                    }
                }
            }
            if inputs.len() == before {
                handler.add_warning(format!("⚠️  No supported documents found in {}", dir.display()));
            }
        }

        if inputs.is_empty() {
            bail!("No input provided. Use TEXT, --file, or --dir");
        }
        Ok(inputs)
    }

    /// `Ok(None)` when the file is skipped, `Err` when loading must stop.
    fn check_file(&self, path: &Path, handler: &mut ErrorHandler) -> Result<Option<DocumentInput>> {
        let problem = if !path.exists() {
            Some(ProcessingError::file_not_found(path.to_path_buf()))
        } else if !self.document_processor.is_supported_format(path) {
            Some(ProcessingError::unsupported_format(path.to_path_buf()))
        } else {
            match std::fs::metadata(path) {
                Ok(meta) if meta.len() == 0 => Some(ProcessingError::empty_document(path.to_path_buf())),
                Ok(_) => None,
                Err(e) => Some(ProcessingError::file_unreadable(path.to_path_buf(), e.to_string())),
            }
        };

        match problem {
            None => Ok(Some(DocumentInput::file(path))),
            Some(error) => {
                let message = error.message.clone();
                if handler.handle_error(error) {
                    Ok(None)
                } else {
                    Err(anyhow!("{}: {}", path.display(), message))
                }
            }
        }
    }

    fn completion_service(&self) -> Result<Option<Arc<dyn CompletionService>>> {
        let client = LlmClient::from_config(&self.config.llm)?;
        Ok(client.map(|c| Arc::new(c) as Arc<dyn CompletionService>))
    }

    async fn session_memory(&self) -> Result<SessionMemory> {
        let memory = if self.config.session.persist {
            let path = self.config.session_store_path()?;
            SessionMemory::new(Arc::new(FileSessionStore::open(path).await?))
        } else {
            SessionMemory::in_memory()
        };
        Ok(memory.with_max_history(self.config.session.max_history))
    }

    async fn render(&self, result: &RunOutput, options: &RunOptions) -> Result<String> {
        match options.format {
            OutputFormat::Json => Ok(serde_json::to_string_pretty(result)?),
            OutputFormat::Markdown => {
                let mut engine = TemplateEngine::new()?;
                if let Some(dir) = &options.template_dir {
                    let loaded = engine.load_custom_templates(dir).await?;
                    info!(loaded, dir = %dir.display(), "custom templates loaded");
                }
                if !engine.has_template(&options.template) {
                    bail!("Unknown template: {}", options.template);
                }
                let context = TemplateContext {
                    branding: options.branding.clone(),
                    ..TemplateContext::default()
                };
                engine.render_run(&options.template, &context, result)
            }
        }
    }

    fn print_run_summary(&self, result: &RunOutput) {
        println!();
        if result.success {
            println!(
                "✅ {} requirements, {} compliance mappings, {} test cases",
                result.requirements.len(),
                result.compliance_mappings.len(),
                result.test_cases.len()
            );
        } else {
            println!("❌ Pipeline stopped:");
            for error in &result.error_log {
                println!("   • {}", error);
            }
        }
        if let Some(metrics) = &result.quality_metrics {
            println!(
                "📊 Completeness {:.0}% | Traceability {:.0}% | Coverage {:.0}%",
                metrics.completeness_score * 100.0,
                metrics.traceability_score * 100.0,
                metrics.coverage_percentage
            );
        }
        if !result.warnings.is_empty() {
            println!("⚠️  {} warning(s) recorded", result.warnings.len());
        }
        println!("🗂️  Session: {}", result.session_id);
    }

    async fn run_sessions(&self, action: SessionCommand) -> Result<()> {
        let memory = self.session_memory().await?;
        match action {
            SessionCommand::List => {
                let sessions = memory.list_active().await?;
                if sessions.is_empty() {
                    println!("📭 No active sessions");
                }
                for summary in sessions {
                    println!(
                        "🗂️  {}{}  created {}  last used {}  {} entr{}{}",
                        summary.session_id,
                        summary.user_id.as_deref().map(|user| format!(" ({})", user)).unwrap_or_default(),
                        summary.created_at.format("%Y-%m-%d %H:%M"),
                        summary.last_accessed.format("%Y-%m-%d %H:%M"),
                        summary.conversation_count,
                        if summary.conversation_count == 1 { "y" } else { "ies" },
                        if summary.has_workflow_state { "  [run state]" } else { "" }
                    );
                }
            }
            SessionCommand::Show { id, state } => match memory.summary(&id).await? {
                Some(summary) => {
                    println!("{}", serde_json::to_string_pretty(&summary)?);
                    if state {
                        match memory.load_run_state::<serde_json::Value>(&id).await? {
                            Some(snapshot) => println!("{}", serde_json::to_string_pretty(&snapshot)?),
                            None => println!("⚠️  No run state stored for this session"),
                        }
                    }
                }
                None => bail!("Unknown session: {}", id),
            },
            SessionCommand::Delete { id } => {
                if memory.delete(&id).await? {
                    println!("✅ Session {} deleted", id);
                } else {
                    bail!("Unknown session: {}", id);
                }
            }
            SessionCommand::Close { id } => {
                if memory.deactivate(&id).await? {
                    println!("✅ Session {} closed", id);
                } else {
                    bail!("Unknown session: {}", id);
                }
            }
            SessionCommand::Prefs { id, set } => {
                if set.is_empty() {
                    match memory.summary(&id).await? {
                        Some(summary) => println!("{}", serde_json::to_string_pretty(&summary.preferences)?),
                        None => bail!("Unknown session: {}", id),
                    }
                } else if memory.update_preferences(&id, set.into_iter().collect()).await? {
                    println!("✅ Preferences updated for session {}", id);
                } else {
                    bail!("Unknown session: {}", id);
                }
            }
            SessionCommand::Cleanup { idle_minutes } => {
                let minutes = idle_minutes.unwrap_or(self.config.session.timeout_minutes);
                let timeout = idle_timeout(minutes)
                    .ok_or_else(|| anyhow!("Idle timeout must be a positive number of minutes within range, got {}", minutes))?;
                let spinner = Spinner::new(true, "Removing expired sessions");
                match memory.expire(timeout).await {
                    Ok(purged) => spinner.succeed(Some(format!("Removed {} expired session(s)", purged).as_str())),
                    Err(e) => {
                        spinner.fail(None);
                        return Err(e.into());
                    }
                }
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_config(
        &mut self,
        api_key: Option<String>,
        model: Option<String>,
        provider: Option<AiProvider>,
        base_url: Option<String>,
        show: bool,
        validate: bool,
        debug: bool,
    ) -> Result<()> {
        if debug {
            println!("Configuration file path: {:?}", self.config_path);
            println!("Config file exists: {}", self.config_path.exists());
            match fs::read_to_string(&self.config_path).await {
                Ok(content) => {
                    println!("Config file size: {} bytes", content.len());
                    println!("Config file content:");
                    println!("{}", content);
                }
                Err(e) => println!("Error reading config file: {}", e),
            }
            return Ok(());
        }

        if show {
            self.show_config_status();
            return Ok(());
        }

        if validate {
            println!("🔍 Validating configuration...");
            let result = self.config.validate();
            if result.is_valid {
                println!("✅ Configuration is valid!");
            } else {
                println!("❌ Configuration issues found:");
                for issue in &result.issues {
                    println!("   • {}", issue);
                }
            }
            if !result.warnings.is_empty() {
                println!("⚠️  Warnings:");
                for warning in &result.warnings {
                    println!("   • {}", warning);
                }
            }
            return Ok(());
        }

        let mut updated = false;
        if let Some(provider) = provider {
            self.config.set_provider(provider.as_str());
            updated = true;
        }
        if let Some(key) = api_key {
            self.config.set_api_key(key);
            updated = true;
        }
        if let Some(model_name) = model {
            self.config.set_model(model_name);
            updated = true;
        }
        if let Some(url) = base_url {
            self.config.llm.base_url = Some(url);
            updated = true;
        }

        if updated {
            self.config.save_to(&self.config_path).await?;
            println!("✅ Configuration updated successfully!");
            self.show_config_status();
        } else {
            println!("🔧 No configuration changes specified. Use --help for options.");
        }
        Ok(())
    }

    fn show_config_status(&self) {
        println!("🔧 Current healthcase Configuration");
        println!("==================================");

        println!("📡 AI Provider: {}", self.config.provider_name());
        if self.config.is_ai_configured() {
            println!("🔑 API Key: {}", if self.config.llm.api_key.is_some() { "Configured ✅" } else { "Not needed" });
            println!("🤖 Model: {}", self.config.llm.model);
            if let Some(url) = &self.config.llm.base_url {
                println!("🌐 Base URL: {}", url);
            }
            println!("⏱️  Timeout: {}s", self.config.llm.timeout);
            println!("\n✅ AI-assisted stages are enabled");
        } else {
            println!(
                "🤖 Model: {}",
                if self.config.llm.model.is_empty() { "Not set" } else { self.config.llm.model.as_str() }
            );
            println!("\n⚠️  AI is not configured. Every stage uses its rule-based path.");
        }

        let pipeline = &self.config.pipeline;
        let standards: Vec<&str> = pipeline.default_standards.iter().map(|s| s.as_str()).collect();
        println!("\n📝 Pipeline Settings:");
        println!("  • Default standards: {}", standards.join(", "));
        println!("  • Mapping strategy: {:?}", pipeline.compliance.strategy);
        println!("  • Confidence threshold: {}", pipeline.compliance.confidence_threshold);
        println!("  • Max test cases per requirement: {}", pipeline.generation.max_test_cases_per_requirement);
        println!(
            "  • Quality gate: completeness {} / accuracy {} / traceability {} / compliance {}",
            pipeline.quality.min_completeness,
            pipeline.quality.min_accuracy,
            pipeline.quality.min_traceability,
            pipeline.quality.min_compliance
        );

        println!("\n🗂️  Sessions:");
        println!("  • Timeout: {} minutes", self.config.session.timeout_minutes);
        println!("  • Persisted: {}", self.config.session.persist);
        if let Ok(path) = self.config.session_store_path() {
            println!("  • Store: {}", path.display());
        }
    }
}
