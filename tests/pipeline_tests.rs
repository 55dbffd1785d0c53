use async_trait::async_trait;
use healthcase::catalog::ReferenceData;
use healthcase::compliance::{ComplianceMapper, MappingStrategy, GAP_NO_ACCEPTANCE_CRITERIA, GAP_NO_STAKEHOLDERS};
use healthcase::config::{ComplianceConfig, Config, ExtractionConfig};
use healthcase::extractor::RequirementExtractor;
use healthcase::llm::{CompletionError, CompletionRequest, CompletionService};
use healthcase::models::{
    ComplianceStandard, DocumentInput, MappingAssessment, Priority, RequirementType, StepStatus,
};
use healthcase::session::SessionMemory;
use healthcase::workflow::{FinalReport, Orchestrator, RunOutput};
use std::collections::HashSet;
use std::sync::Arc;

const SRS: &str = "Clinical Portal SRS
The system shall encrypt patient data in transit.
The application must authenticate users before access to medical records.
Response time should be under 2 seconds for 100 concurrent users.
Background and scope notes";

fn reference() -> Arc<ReferenceData> {
    Arc::new(ReferenceData::healthcare())
}

fn orchestrator(completion: Option<Arc<dyn CompletionService>>) -> Orchestrator {
    Orchestrator::new(&Config::default(), reference(), completion, SessionMemory::in_memory())
}

async fn run_offline(text: &str) -> RunOutput {
    orchestrator(None)
        .process_documents(vec![DocumentInput::inline("srs.txt", text)], None, None)
        .await
}

#[test]
fn test_encryption_line_becomes_one_security_requirement() {
    let extractor = RequirementExtractor::new(ExtractionConfig::default(), reference());
    let requirements = extractor.extract_from_text(0, "srs.txt", "The system shall encrypt patient data in transit.");

    assert_eq!(requirements.len(), 1);
    let requirement = &requirements[0];
    assert_eq!(requirement.requirement_type, RequirementType::Security);
    assert_eq!(requirement.priority, Priority::Medium);
    assert!(requirement.compliance_standards.contains(&ComplianceStandard::Hipaa));
    assert_eq!(requirement.source_line, Some(1));
}

#[tokio::test]
async fn test_no_gdpr_mapping_without_gdpr_keywords() {
    let extractor = RequirementExtractor::new(ExtractionConfig::default(), reference());
    let requirements = extractor.extract_from_text(0, "srs.txt", "The system shall display the dosage schedule.");
    let mapper = ComplianceMapper::new(
        ComplianceConfig {
            strategy: MappingStrategy::Confidence,
            confidence_threshold: 0.0,
        },
        reference(),
    );

    let outcome = mapper.map(&requirements, ComplianceStandard::ALL).await;
    assert!(outcome.mappings.iter().all(|m| m.standard != ComplianceStandard::Gdpr));
}

#[tokio::test]
async fn test_missing_criteria_and_stakeholders_are_reported_as_gaps() {
    let extractor = RequirementExtractor::new(ExtractionConfig::default(), reference());
    let mut requirements = extractor.extract_from_text(0, "srs.txt", "The system must keep PHI private under HIPAA.");
    assert!(requirements[0].acceptance_criteria.is_empty());
    assert!(requirements[0].stakeholders.is_empty());
    requirements[0].compliance_standards = vec![ComplianceStandard::Hipaa];

    let mapper = ComplianceMapper::new(
        ComplianceConfig {
            strategy: MappingStrategy::RuleBased,
            ..ComplianceConfig::default()
        },
        reference(),
    );
    let outcome = mapper.map(&requirements, &[ComplianceStandard::Hipaa]).await;

    assert_eq!(outcome.mappings.len(), 1);
    let mapping = &outcome.mappings[0];
    assert!(mapping.gaps.contains(&GAP_NO_ACCEPTANCE_CRITERIA.to_string()));
    assert!(mapping.gaps.contains(&GAP_NO_STAKEHOLDERS.to_string()));
    assert!(!mapping.recommendations.is_empty());
}

#[tokio::test]
async fn test_near_duplicate_requirements_keep_first_seen() {
    let text = "The system shall record patient vital signs every five minutes.
The system shall record patient vital signs every five minutes daily.";
    let extractor = RequirementExtractor::new(ExtractionConfig::default(), reference());
    let documents = vec![healthcase::document_processor::DocumentProcessor::new().from_content("srs.txt", text)];

    let outcome = extractor.extract(&documents).await;
    assert_eq!(outcome.requirements.len(), 1);
    assert_eq!(outcome.requirements[0].id, "REQ_1_001");
}

#[tokio::test]
async fn test_offline_run_completes_with_traceable_tests() {
    let result = run_offline(SRS).await;

    assert!(result.success, "errors: {:?}", result.error_log);
    assert_eq!(result.requirements.len(), 3);

    let known: HashSet<&str> = result.requirements.iter().map(|r| r.id.as_str()).collect();
    assert!(!result.test_cases.is_empty());
    for case in &result.test_cases {
        assert!(!case.requirement_ids.is_empty());
        assert!(case.requirement_ids.iter().all(|id| known.contains(id.as_str())));
        assert!(!case.test_steps.is_empty());
        assert!(!case.expected_results.is_empty());
    }

    let metrics = result.quality_metrics.as_ref().expect("quality metrics");
    for score in [
        metrics.completeness_score,
        metrics.accuracy_score,
        metrics.traceability_score,
        metrics.compliance_score,
    ] {
        assert!((0.0..=1.0).contains(&score));
    }
    assert_eq!(metrics.coverage_percentage, 100.0);

    let names: Vec<&str> = result.workflow_steps.iter().map(|s| s.step_name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "document_parser",
            "requirement_extractor",
            "compliance_mapper",
            "test_generator",
            "quality_validator",
            "finalizer"
        ]
    );
    assert!(result.workflow_steps.iter().all(|s| s.status == StepStatus::Completed));
    match &result.final_report {
        Some(FinalReport::Completed { workflow_steps, .. }) => {
            let reported: Vec<&str> = workflow_steps.iter().map(|s| s.step_name.as_str()).collect();
            assert_eq!(reported, names);
        }
        other => panic!("expected completed report, got {:?}", other),
    }
}

#[tokio::test]
async fn test_offline_runs_are_deterministic() {
    let first = run_offline(SRS).await;
    let second = run_offline(SRS).await;

    assert_eq!(first.requirements, second.requirements);
    assert_eq!(first.compliance_mappings, second.compliance_mappings);
    assert_eq!(first.test_cases, second.test_cases);
    assert_eq!(first.quality_metrics, second.quality_metrics);
}

#[tokio::test]
async fn test_empty_input_fails_through_error_handler() {
    let result = orchestrator(None).process_documents(Vec::new(), None, None).await;

    assert!(!result.success);
    assert!(result
        .error_log
        .contains(&"No documents available for requirement extraction".to_string()));
    assert!(result.warnings.contains(&"No documents could be parsed".to_string()));

    let last = result.workflow_steps.last().expect("steps recorded");
    assert_eq!(last.step_name, "error_handler");
    match result.final_report {
        Some(FinalReport::Failed { completed_steps, .. }) => {
            assert_eq!(completed_steps, vec!["document_parser".to_string()])
        }
        other => panic!("expected failed report, got {:?}", other),
    }
}

#[tokio::test]
async fn test_text_without_requirements_fails() {
    let result = run_offline("Meeting notes\nNothing to see here").await;

    assert!(!result.success);
    assert!(result.error_log.contains(&"No requirements extracted from documents".to_string()));
    assert!(result.test_cases.is_empty());
}

#[tokio::test]
async fn test_unreadable_file_is_logged_and_others_continue() {
    let inputs = vec![
        DocumentInput::file("/definitely/missing/srs.txt"),
        DocumentInput::inline("inline.txt", "The system shall log every access to medical records."),
    ];
    let result = orchestrator(None).process_documents(inputs, None, None).await;

    assert!(result.success);
    assert!(result.error_log.iter().any(|e| e.contains("srs.txt")));
    assert_eq!(result.requirements.len(), 1);
}

#[tokio::test]
async fn test_runs_share_a_session() {
    let orchestrator = orchestrator(None);
    let first = orchestrator
        .process_documents(vec![DocumentInput::inline("a.txt", SRS)], None, None)
        .await;
    let second = orchestrator
        .process_documents(vec![DocumentInput::inline("b.txt", SRS)], Some(&first.session_id), None)
        .await;
    assert_eq!(first.session_id, second.session_id);

    let summary = orchestrator
        .session_status(&first.session_id)
        .await
        .unwrap()
        .expect("session exists");
    assert_eq!(summary.conversation_count, 2);
    assert!(summary.has_workflow_state);

    let fresh = orchestrator
        .process_documents(vec![DocumentInput::inline("c.txt", SRS)], Some("no-such-session"), None)
        .await;
    assert_ne!(fresh.session_id, "no-such-session");
}

/// Answers each stage with a canned response chosen by its system prompt.
struct StubCompletion;

#[async_trait]
impl CompletionService for StubCompletion {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        let prompt = request.system_instructions.as_str();
        let body = if prompt.contains("requirements analyst") {
            serde_json::json!({
                "requirements": [
                    {
                        "id": "REQ-A",
                        "title": "Encrypt PHI",
                        "description": "The system shall encrypt PHI at rest",
                        "type": "security",
                        "priority": "high",
                        "risk_level": "high",
                        "complexity": "simple",
                        "compliance_standards": ["hipaa", "sox"]
                    },
                    {
                        "id": "REQ-B",
                        "title": "Audit",
                        "description": "The system shall keep an audit log",
                        "priority": "urgent"
                    }
                ]
            })
        } else if prompt.contains("compliance analyst") {
            serde_json::json!({
                "compliance_mappings": [
                    {"requirement_id": "REQ-A", "standard": "hipaa", "applicable_sections": ["164.312"], "mapping_confidence": 1.4},
                    {"requirement_id": "REQ-A", "standard": "gdpr", "mapping_confidence": 0.9}
                ]
            })
        } else if prompt.contains("test engineer") {
            serde_json::json!({
                "test_cases": [
                    {
                        "id": "TC-1",
                        "title": "Verify PHI encryption at rest",
                        "type": "security",
                        "priority": "high",
                        "requirement_ids": ["REQ-A", "REQ-X"],
                        "test_steps": ["Store a record", "Inspect the database files", "Confirm ciphertext"],
                        "expected_results": ["Stored PHI must be encrypted"]
                    }
                ]
            })
        } else {
            serde_json::json!({
                "quality_metrics": {
                    "completeness_score": 1.5,
                    "accuracy_score": 0.9,
                    "traceability_score": 1.0,
                    "compliance_score": 0.8,
                    "coverage_percentage": 120.0,
                    "total_issues": 0,
                    "critical_issues": 0,
                    "recommendations": []
                }
            })
        };
        Ok(format!("Here you go:\n```json\n{}\n```", body))
    }
}

struct GarbageCompletion;

#[async_trait]
impl CompletionService for GarbageCompletion {
    async fn complete(&self, _request: &CompletionRequest) -> Result<String, CompletionError> {
        Ok("I am not able to produce JSON today.".to_string())
    }
}

#[tokio::test]
async fn test_ai_answers_are_validated_item_by_item() {
    let orchestrator = orchestrator(Some(Arc::new(StubCompletion)));
    let result = orchestrator
        .process_documents(
            vec![DocumentInput::inline("srs.txt", "ignored by the stub")],
            None,
            Some(vec![ComplianceStandard::Hipaa]),
        )
        .await;

    assert!(result.success, "errors: {:?}", result.error_log);

    assert_eq!(result.requirements.len(), 1);
    assert_eq!(result.requirements[0].id, "REQ-A");
    assert_eq!(result.requirements[0].compliance_standards, vec![ComplianceStandard::Hipaa]);
    assert!(result.warnings.iter().any(|w| w.starts_with("Skipped requirement 2")));

    assert_eq!(result.compliance_mappings.len(), 1);
    assert_eq!(result.compliance_mappings[0].assessment, MappingAssessment::Confidence(1.0));
    assert!(result.warnings.iter().any(|w| w.starts_with("Skipped compliance mapping 2")));

    assert_eq!(result.test_cases.len(), 1);
    assert_eq!(result.test_cases[0].requirement_ids, vec!["REQ-A".to_string()]);
    assert!(result.test_cases[0].estimated_duration.is_some());

    let metrics = result.quality_metrics.expect("quality metrics");
    assert_eq!(metrics.completeness_score, 1.0);
    assert_eq!(metrics.coverage_percentage, 100.0);
}

#[tokio::test]
async fn test_unusable_ai_output_falls_back_to_rules() {
    let offline = run_offline(SRS).await;
    let degraded = orchestrator(Some(Arc::new(GarbageCompletion)))
        .process_documents(vec![DocumentInput::inline("srs.txt", SRS)], None, None)
        .await;

    assert!(degraded.success);
    assert_eq!(degraded.requirements, offline.requirements);
    assert_eq!(degraded.compliance_mappings, offline.compliance_mappings);
    assert_eq!(degraded.test_cases, offline.test_cases);
    assert_eq!(degraded.quality_metrics, offline.quality_metrics);
}

/// Extraction answers with a parent and a child requirement; every other
/// stage fails and falls back to rules.
struct NestedRequirementsCompletion;

#[async_trait]
impl CompletionService for NestedRequirementsCompletion {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        if !request.system_instructions.contains("requirements analyst") {
            return Err(CompletionError::NotConfigured("extraction only".to_string()));
        }
        Ok(serde_json::json!({
            "requirements": [
                {
                    "id": "REQ-001",
                    "title": "Record vital signs",
                    "description": "The system shall record patient vital signs",
                    "type": "functional"
                },
                {
                    "id": "REQ-001.1",
                    "title": "Record blood pressure",
                    "description": "The system shall record systolic and diastolic blood pressure",
                    "type": "functional"
                }
            ]
        })
        .to_string())
    }
}

#[tokio::test]
async fn test_child_requirement_ids_keep_their_test_cases() {
    let result = orchestrator(Some(Arc::new(NestedRequirementsCompletion)))
        .process_documents(vec![DocumentInput::inline("srs.txt", "ignored by the stub")], None, None)
        .await;

    assert!(result.success, "errors: {:?}", result.error_log);
    assert_eq!(result.requirements.len(), 2);
    for id in ["REQ-001", "REQ-001.1"] {
        for kind in ["POS", "NEG", "BND"] {
            let expected = format!("TC_{}_{}_001", id, kind);
            assert!(
                result.test_cases.iter().any(|c| c.id == expected),
                "missing {} in {:?}",
                expected,
                result.test_cases.iter().map(|c| &c.id).collect::<Vec<_>>()
            );
        }
    }
    assert_eq!(result.quality_metrics.expect("quality metrics").coverage_percentage, 100.0);
}

#[tokio::test]
async fn test_requirement_dedup_threshold_is_inclusive() {
    let extractor = RequirementExtractor::new(ExtractionConfig::default(), reference());
    let processor = healthcase::document_processor::DocumentProcessor::new();

    // 8 shared words out of 10: exactly at the 0.8 threshold.
    let at_threshold = "The system shall log every patient record access
The system shall log every patient record access each day";
    let outcome = extractor.extract(&[processor.from_content("srs.txt", at_threshold)]).await;
    assert_eq!(outcome.requirements.len(), 1);

    // 8 shared words out of 11.
    let below_threshold = "The system shall log every patient record access
The system shall log every patient record access each working day";
    let outcome = extractor.extract(&[processor.from_content("srs.txt", below_threshold)]).await;
    assert_eq!(outcome.requirements.len(), 2);
}

#[tokio::test]
async fn test_session_preferences_reach_the_run_state() {
    let orchestrator = orchestrator(None);
    let sessions = orchestrator.sessions();
    let id = sessions.create_for_user("qa-team").await.unwrap();
    let mut preferences = std::collections::BTreeMap::new();
    preferences.insert("format".to_string(), serde_json::json!("markdown"));
    sessions.update_preferences(&id, preferences).await.unwrap();

    let result = orchestrator
        .process_documents(vec![DocumentInput::inline("srs.txt", SRS)], Some(&id), None)
        .await;
    assert_eq!(result.session_id, id);

    let snapshot: serde_json::Value = sessions.load_run_state(&id).await.unwrap().expect("snapshot stored");
    assert_eq!(snapshot["output_preferences"]["format"], "markdown");
}

#[tokio::test]
async fn test_inactive_session_is_not_resumed() {
    let orchestrator = orchestrator(None);
    let closed = orchestrator.sessions().create().await.unwrap();
    orchestrator.sessions().deactivate(&closed).await.unwrap();

    let result = orchestrator
        .process_documents(vec![DocumentInput::inline("srs.txt", SRS)], Some(&closed), None)
        .await;
    assert!(result.success);
    assert_ne!(result.session_id, closed);
}
