use anyhow::{bail, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::catalog::ReferenceData;
use crate::compliance::ComplianceMapper;
use crate::config::{Config, DEFAULT_SESSION_TIMEOUT_MINUTES};
use crate::document_processor::{ContentExtractor, DocumentProcessor};
use crate::extractor::RequirementExtractor;
use crate::llm::CompletionService;
use crate::models::{
    ComplianceMapping, ComplianceStandard, Document, DocumentInput, QualityMetrics, Requirement, RunStatus, StepStatus,
    TestCase, WorkflowStep,
};
use crate::session::{Session, SessionError, SessionMemory, SessionSummary};
use crate::test_generator::TestCaseGenerator;
use crate::validator::QualityValidator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    DocumentParser,
    RequirementExtractor,
    ComplianceMapper,
    TestGenerator,
    QualityValidator,
    Finalizer,
    ErrorHandler,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::DocumentParser => "document_parser",
            Stage::RequirementExtractor => "requirement_extractor",
            Stage::ComplianceMapper => "compliance_mapper",
            Stage::TestGenerator => "test_generator",
            Stage::QualityValidator => "quality_validator",
            Stage::Finalizer => "finalizer",
            Stage::ErrorHandler => "error_handler",
        }
    }

    /// Checkpoint recorded when the stage completes.
    pub fn checkpoint(&self) -> Option<&'static str> {
        match self {
            Stage::DocumentParser => Some("document_parsed"),
            Stage::RequirementExtractor => Some("requirements_extracted"),
            Stage::ComplianceMapper => Some("compliance_mapped"),
            Stage::TestGenerator => Some("tests_generated"),
            Stage::QualityValidator => Some("quality_validated"),
            Stage::Finalizer => Some("finalized"),
            Stage::ErrorHandler => None,
        }
    }

    pub fn progress(&self) -> Option<f64> {
        match self {
            Stage::DocumentParser => Some(10.0),
            Stage::RequirementExtractor => Some(30.0),
            Stage::ComplianceMapper => Some(50.0),
            Stage::TestGenerator => Some(70.0),
            Stage::QualityValidator => Some(90.0),
            Stage::Finalizer => Some(100.0),
            Stage::ErrorHandler => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Finalizer | Stage::ErrorHandler)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a run produces, mutated by one stage at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    pub session_id: String,
    pub inputs: Vec<DocumentInput>,
    pub documents: Vec<Document>,
    pub requirements: Vec<Requirement>,
    pub compliance_mappings: Vec<ComplianceMapping>,
    pub test_cases: Vec<TestCase>,
    pub quality_metrics: Option<QualityMetrics>,
    pub workflow_steps: Vec<WorkflowStep>,
    pub standards_in_scope: Vec<ComplianceStandard>,
    /// Copied from the session preferences when the run starts.
    #[serde(default)]
    pub output_preferences: BTreeMap<String, serde_json::Value>,
    pub overall_status: RunStatus,
    pub progress_percentage: f64,
    pub current_step: Option<Stage>,
    pub checkpoints: Vec<String>,
    pub error_log: Vec<String>,
    pub warnings: Vec<String>,
    pub improvement_suggestions: Vec<String>,
    pub final_report: Option<FinalReport>,
    pub started_at: DateTime<Utc>,
}

impl RunState {
    pub fn new(session_id: String, inputs: Vec<DocumentInput>, standards_in_scope: Vec<ComplianceStandard>) -> Self {
        Self {
            session_id,
            inputs,
            documents: Vec::new(),
            requirements: Vec::new(),
            compliance_mappings: Vec::new(),
            test_cases: Vec::new(),
            quality_metrics: None,
            workflow_steps: Vec::new(),
            standards_in_scope,
            output_preferences: BTreeMap::new(),
            overall_status: RunStatus::Pending,
            progress_percentage: 0.0,
            current_step: None,
            checkpoints: Vec::new(),
            error_log: Vec::new(),
            warnings: Vec::new(),
            improvement_suggestions: Vec::new(),
            final_report: None,
            started_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreSummary {
    pub completeness_score: f64,
    pub accuracy_score: f64,
    pub traceability_score: f64,
    pub compliance_score: f64,
    pub coverage_percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingSummary {
    pub documents_processed: usize,
    pub requirements_extracted: usize,
    pub compliance_mappings: usize,
    pub test_cases_generated: usize,
    pub quality_metrics: Option<ScoreSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    pub step_name: String,
    pub status: StepStatus,
    pub duration_seconds: f64,
}

impl From<&WorkflowStep> for StepReport {
    fn from(step: &WorkflowStep) -> Self {
        Self {
            step_name: step.step_name.clone(),
            status: step.status,
            duration_seconds: step.duration_seconds,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FinalReport {
    Completed {
        timestamp: DateTime<Utc>,
        processing_summary: ProcessingSummary,
        workflow_steps: Vec<StepReport>,
        error_log: Vec<String>,
        improvement_suggestions: Vec<String>,
    },
    Failed {
        error_summary: Vec<String>,
        completed_steps: Vec<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutput {
    pub success: bool,
    pub session_id: String,
    pub requirements: Vec<Requirement>,
    pub test_cases: Vec<TestCase>,
    pub compliance_mappings: Vec<ComplianceMapping>,
    pub quality_metrics: Option<QualityMetrics>,
    pub final_report: Option<FinalReport>,
    pub error_log: Vec<String>,
    pub warnings: Vec<String>,
    pub workflow_steps: Vec<WorkflowStep>,
}

impl From<RunState> for RunOutput {
    fn from(state: RunState) -> Self {
        Self {
            success: state.overall_status == RunStatus::Completed,
            session_id: state.session_id,
            requirements: state.requirements,
            test_cases: state.test_cases,
            compliance_mappings: state.compliance_mappings,
            quality_metrics: state.quality_metrics,
            final_report: state.final_report,
            error_log: state.error_log,
            warnings: state.warnings,
            workflow_steps: state.workflow_steps,
        }
    }
}

pub type Guard = fn(&RunState) -> bool;

pub fn extraction_failed(state: &RunState) -> bool {
    state.overall_status == RunStatus::Failed || state.requirements.is_empty()
}

pub fn mapping_failed(state: &RunState) -> bool {
    state.overall_status == RunStatus::Failed
}

pub fn generation_failed(state: &RunState) -> bool {
    state.overall_status == RunStatus::Failed || state.test_cases.is_empty()
}

pub fn always(_: &RunState) -> bool {
    true
}

/// `(from, guard, to)`; the first row for `from` whose guard holds wins.
pub static TRANSITIONS: &[(Stage, Guard, Stage)] = &[
    (Stage::DocumentParser, always as Guard, Stage::RequirementExtractor),
    (Stage::RequirementExtractor, extraction_failed as Guard, Stage::ErrorHandler),
    (Stage::RequirementExtractor, always as Guard, Stage::ComplianceMapper),
    (Stage::ComplianceMapper, mapping_failed as Guard, Stage::ErrorHandler),
    (Stage::ComplianceMapper, always as Guard, Stage::TestGenerator),
    (Stage::TestGenerator, generation_failed as Guard, Stage::ErrorHandler),
    (Stage::TestGenerator, always as Guard, Stage::QualityValidator),
    (Stage::QualityValidator, always as Guard, Stage::Finalizer),
];

pub fn next_stage(from: Stage, state: &RunState) -> Option<Stage> {
    TRANSITIONS
        .iter()
        .find(|(stage, guard, _)| *stage == from && guard(state))
        .map(|(_, _, to)| *to)
}

/// Called after every stage with the recorded step and the run progress.
pub type StageObserver = Arc<dyn Fn(&WorkflowStep, f64) + Send + Sync>;

type StageSummary = BTreeMap<String, serde_json::Value>;

pub struct Orchestrator {
    content: Arc<dyn ContentExtractor>,
    extractor: RequirementExtractor,
    mapper: ComplianceMapper,
    generator: TestCaseGenerator,
    validator: QualityValidator,
    sessions: SessionMemory,
    default_standards: Vec<ComplianceStandard>,
    session_timeout: Duration,
    observer: Option<StageObserver>,
}

impl Orchestrator {
    pub fn new(
        config: &Config,
        reference: Arc<ReferenceData>,
        completion: Option<Arc<dyn CompletionService>>,
        sessions: SessionMemory,
    ) -> Self {
        let pipeline = &config.pipeline;
        let mut extractor = RequirementExtractor::new(pipeline.extraction.clone(), reference.clone());
        let mut mapper = ComplianceMapper::new(pipeline.compliance.clone(), reference.clone());
        let mut generator = TestCaseGenerator::new(pipeline.generation.clone(), reference);
        let mut validator = QualityValidator::new(pipeline.quality.clone());

        if let Some(service) = completion {
            extractor = extractor.with_completion(service.clone());
            mapper = mapper.with_completion(service.clone());
            generator = generator.with_completion(service.clone());
            validator = validator.with_completion(service);
        }

        Self {
            content: Arc::new(DocumentProcessor::new()),
            extractor,
            mapper,
            generator,
            validator,
            sessions,
            default_standards: pipeline.default_standards.clone(),
            session_timeout: config.session.idle_timeout().unwrap_or_else(|| {
                warn!(
                    minutes = config.session.timeout_minutes,
                    "invalid session timeout, using {} minutes", DEFAULT_SESSION_TIMEOUT_MINUTES
                );
                Duration::minutes(DEFAULT_SESSION_TIMEOUT_MINUTES)
            }),
            observer: None,
        }
    }

    pub fn with_content_extractor(mut self, content: Arc<dyn ContentExtractor>) -> Self {
        self.content = content;
        self
    }

    pub fn with_observer(mut self, observer: StageObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn sessions(&self) -> &SessionMemory {
        &self.sessions
    }

    pub async fn process_documents(
        &self,
        inputs: Vec<DocumentInput>,
        session_id: Option<&str>,
        standards: Option<Vec<ComplianceStandard>>,
    ) -> RunOutput {
        let (session, session_warning) = self.ensure_session(session_id).await;
        let standards = standards
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| self.default_standards.clone());

        let mut state = RunState::new(session.session_id, inputs, standards);
        state.output_preferences = session.preferences;
        state.warnings.extend(session_warning);
        self.snapshot(&mut state).await;

        info!(session_id = %state.session_id, documents = state.inputs.len(), "workflow started");
        state.overall_status = RunStatus::InProgress;
        self.drive(&mut state).await;
        info!(session_id = %state.session_id, status = %state.overall_status, "workflow finished");

        self.snapshot(&mut state).await;
        let entry = format!(
            "Processed {} document(s): {} requirements, {} compliance mappings, {} test cases ({})",
            state.documents.len(),
            state.requirements.len(),
            state.compliance_mappings.len(),
            state.test_cases.len(),
            state.overall_status
        );
        if let Err(e) = self.sessions.add_conversation_entry(&state.session_id, "system", &entry).await {
            warn!(error = %e, "could not record conversation entry");
        }

        state.into()
    }

    pub async fn session_status(&self, session_id: &str) -> Result<Option<SessionSummary>, SessionError> {
        self.sessions.summary(session_id).await
    }

    pub async fn cleanup_expired_sessions(&self) -> Result<usize, SessionError> {
        self.sessions.expire(self.session_timeout).await
    }

    /// The requested session when it exists and is active, otherwise a new one.
    async fn ensure_session(&self, requested: Option<&str>) -> (Session, Option<String>) {
        if let Some(id) = requested {
            match self.sessions.get(id).await {
                Ok(Some(session)) if session.is_active => return (session, None),
                Ok(Some(_)) => info!(session_id = %id, "session is inactive, creating a new one"),
                Ok(None) => info!(session_id = %id, "unknown session, creating a new one"),
                Err(e) => warn!(error = %e, "session lookup failed"),
            }
        }
        match self.sessions.create().await {
            Ok(id) => (Session::new(id), None),
            Err(e) => {
                warn!(error = %e, "session could not be created, continuing without persistence");
                (
                    Session::new(Uuid::new_v4().to_string()),
                    Some(format!("Session could not be persisted: {}", e)),
                )
            }
        }
    }

    async fn snapshot(&self, state: &mut RunState) {
        let stored = self.sessions.store_run_state(&state.session_id, &*state).await;
        match stored {
            Ok(true) => {}
            Ok(false) => debug!(session_id = %state.session_id, "no stored session for snapshot"),
            Err(e) => {
                warn!(error = %e, "run state snapshot failed");
                state.warnings.push(format!("Run state snapshot failed: {}", e));
            }
        }
    }

    async fn drive(&self, state: &mut RunState) {
        let mut stage = Stage::DocumentParser;
        loop {
            self.execute(stage, state).await;
            if stage.is_terminal() {
                break;
            }
            match next_stage(stage, state) {
                Some(next) => {
                    debug!(from = %stage, to = %next, "transition");
                    stage = next;
                }
                None => break,
            }
        }
    }

    async fn execute(&self, stage: Stage, state: &mut RunState) {
        state.current_step = Some(stage);
        let start_time = Utc::now();
        let timer = Instant::now();
        info!(stage = %stage, "stage started");

        let result = match stage {
            Stage::DocumentParser => self.parse_documents(state).await,
            Stage::RequirementExtractor => self.extract_requirements(state).await,
            Stage::ComplianceMapper => self.map_compliance(state).await,
            Stage::TestGenerator => self.generate_tests(state).await,
            Stage::QualityValidator => self.validate_quality(state).await,
            Stage::Finalizer => Ok(finalize(state)),
            Stage::ErrorHandler => Ok(handle_failure(state)),
        };

        let (status, output_summary, error_message) = match result {
            Ok(summary) => {
                if let Some(checkpoint) = stage.checkpoint() {
                    state.checkpoints.push(checkpoint.to_string());
                }
                if let Some(progress) = stage.progress() {
                    state.progress_percentage = progress;
                }
                (StepStatus::Completed, summary, None)
            }
            Err(e) => {
                let message = e.to_string();
                error!(stage = %stage, error = %message, "stage failed");
                state.overall_status = RunStatus::Failed;
                state.error_log.push(message.clone());
                (StepStatus::Failed, StageSummary::new(), Some(message))
            }
        };

        let step = WorkflowStep {
            step_name: stage.as_str().to_string(),
            status,
            start_time,
            end_time: Some(Utc::now()),
            duration_seconds: timer.elapsed().as_secs_f64(),
            output_summary,
            error_message,
            retry_count: 0,
        };
        info!(stage = %stage, status = %step.status, seconds = step.duration_seconds, "stage finished");
        if let Some(observer) = &self.observer {
            observer(&step, state.progress_percentage);
        }
        // The completed report is built inside the step it describes.
        if let Some(FinalReport::Completed { workflow_steps, .. }) = &mut state.final_report {
            if stage == Stage::Finalizer {
                workflow_steps.push(StepReport::from(&step));
            }
        }
        state.workflow_steps.push(step);
    }

    async fn parse_documents(&self, state: &mut RunState) -> Result<StageSummary> {
        let mut failed = 0;
        for input in &state.inputs {
            match self.content.extract(input).await {
                Ok(document) => state.documents.push(document),
                Err(e) => {
                    failed += 1;
                    let message = format!("Failed to parse document {}: {}", input.filename, e);
                    warn!("{}", message);
                    state.error_log.push(message);
                }
            }
        }
        if state.documents.is_empty() {
            let message = "No documents could be parsed".to_string();
            warn!("{}", message);
            state.warnings.push(message);
        }
        Ok(summary(&[("documents_parsed", state.documents.len()), ("documents_failed", failed)]))
    }

    async fn extract_requirements(&self, state: &mut RunState) -> Result<StageSummary> {
        if state.documents.is_empty() {
            bail!("No documents available for requirement extraction");
        }
        let outcome = self.extractor.extract(&state.documents).await;
        state.warnings.extend(outcome.warnings);
        state.requirements = outcome.requirements;
        if state.requirements.is_empty() {
            bail!("No requirements extracted from documents");
        }
        Ok(summary(&[
            ("documents", state.documents.len()),
            ("requirements", state.requirements.len()),
        ]))
    }

    async fn map_compliance(&self, state: &mut RunState) -> Result<StageSummary> {
        let outcome = self.mapper.map(&state.requirements, &state.standards_in_scope).await;
        state.warnings.extend(outcome.warnings);
        state.compliance_mappings = outcome.mappings;
        if state.compliance_mappings.is_empty() {
            warn!("no compliance mappings, continuing with test generation");
        }
        Ok(summary(&[
            ("requirements", state.requirements.len()),
            ("mappings", state.compliance_mappings.len()),
        ]))
    }

    async fn generate_tests(&self, state: &mut RunState) -> Result<StageSummary> {
        let outcome = self.generator.generate(&state.requirements, &state.compliance_mappings).await;
        state.warnings.extend(outcome.warnings);
        state.test_cases = outcome.test_cases;
        if state.test_cases.is_empty() {
            bail!("No test cases generated");
        }
        Ok(summary(&[
            ("requirements", state.requirements.len()),
            ("test_cases", state.test_cases.len()),
        ]))
    }

    async fn validate_quality(&self, state: &mut RunState) -> Result<StageSummary> {
        let metrics = self
            .validator
            .assess(&state.requirements, &state.test_cases, &state.compliance_mappings)
            .await;
        state.improvement_suggestions.extend(self.validator.quality_gate(&metrics));
        let mut output = summary(&[("total_issues", metrics.total_issues), ("critical_issues", metrics.critical_issues)]);
        output.insert("coverage_percentage".to_string(), serde_json::json!(metrics.coverage_percentage));
        state.quality_metrics = Some(metrics);
        Ok(output)
    }
}

fn finalize(state: &mut RunState) -> StageSummary {
    state.overall_status = RunStatus::Completed;
    let quality_metrics = state.quality_metrics.as_ref().map(|m| ScoreSummary {
        completeness_score: m.completeness_score,
        accuracy_score: m.accuracy_score,
        traceability_score: m.traceability_score,
        compliance_score: m.compliance_score,
        coverage_percentage: m.coverage_percentage,
    });
    state.final_report = Some(FinalReport::Completed {
        timestamp: Utc::now(),
        processing_summary: ProcessingSummary {
            documents_processed: state.documents.len(),
            requirements_extracted: state.requirements.len(),
            compliance_mappings: state.compliance_mappings.len(),
            test_cases_generated: state.test_cases.len(),
            quality_metrics,
        },
        workflow_steps: state.workflow_steps.iter().map(StepReport::from).collect(),
        error_log: state.error_log.clone(),
        improvement_suggestions: state.improvement_suggestions.clone(),
    });
    summary(&[("test_cases", state.test_cases.len())])
}

fn handle_failure(state: &mut RunState) -> StageSummary {
    state.overall_status = RunStatus::Failed;
    let completed_steps = state
        .workflow_steps
        .iter()
        .filter(|step| step.status == StepStatus::Completed)
        .map(|step| step.step_name.clone())
        .collect();
    state.final_report = Some(FinalReport::Failed {
        error_summary: state.error_log.clone(),
        completed_steps,
    });
    summary(&[("errors", state.error_log.len())])
}

fn summary(counts: &[(&str, usize)]) -> StageSummary {
    counts
        .iter()
        .map(|(key, count)| (key.to_string(), serde_json::json!(count)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_stages_have_no_transitions() {
        let state = RunState::new("s".to_string(), Vec::new(), Vec::new());
        assert_eq!(next_stage(Stage::Finalizer, &state), None);
        assert_eq!(next_stage(Stage::ErrorHandler, &state), None);
    }

    #[test]
    fn test_stage_names_match_serde() {
        for stage in [Stage::DocumentParser, Stage::QualityValidator, Stage::ErrorHandler] {
            let json = serde_json::to_value(stage).unwrap();
            assert_eq!(json, serde_json::json!(stage.as_str()));
        }
    }

    #[test]
    fn test_failed_report_serializes_with_status_tag() {
        let report = FinalReport::Failed {
            error_summary: vec!["boom".to_string()],
            completed_steps: vec!["document_parser".to_string()],
        };
        let value = serde_json::to_value(report).unwrap();
        assert_eq!(value["status"], "failed");
        assert_eq!(value["completed_steps"][0], "document_parser");
    }
}
