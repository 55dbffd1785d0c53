use serde::Deserialize;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::QualityConfig;
use crate::llm::{complete_json, CompletionRequest, CompletionService};
use crate::models::{
    AutomationStatus, ComplianceMapping, Priority, QualityMetrics, Requirement, RiskLevel, TestCase, TestCaseType,
};

const SYSTEM_INSTRUCTIONS: &str = "You are a quality assurance lead for regulated healthcare software. \
Score requirement and test artefacts objectively. Answer with a single JSON object and nothing else.";

const TASK_INSTRUCTIONS: &str = "Assess the requirements, test cases and compliance mappings below. Respond with \
{\"quality_metrics\": {\"completeness_score\" (0-1), \"accuracy_score\" (0-1), \"traceability_score\" (0-1), \
\"compliance_score\" (0-1), \"coverage_percentage\" (0-100), \"total_issues\", \"critical_issues\", \"recommendations\": []}}";

const HEDGING_WORDS: [&str; 4] = ["maybe", "perhaps", "might", "could"];
const VERIFICATION_VERBS: [&str; 4] = ["verify", "check", "validate", "confirm"];
const OBLIGATION_WORDS: [&str; 3] = ["should", "must", "will"];

#[derive(Deserialize)]
struct AiQuality {
    quality_metrics: QualityMetrics,
}

pub struct QualityValidator {
    config: QualityConfig,
    completion: Option<Arc<dyn CompletionService>>,
}

impl QualityValidator {
    pub fn new(config: QualityConfig) -> Self {
        Self { config, completion: None }
    }

    pub fn with_completion(mut self, completion: Arc<dyn CompletionService>) -> Self {
        self.completion = Some(completion);
        self
    }

    /// AI-assisted scoring when a completion service is configured, otherwise
    /// (or when its answer is unusable) the formula-based [`Self::validate`].
    pub async fn assess(
        &self,
        requirements: &[Requirement],
        test_cases: &[TestCase],
        mappings: &[ComplianceMapping],
    ) -> QualityMetrics {
        if let Some(service) = &self.completion {
            let payload = serde_json::json!({
                "requirements": requirements,
                "test_cases": test_cases,
                "compliance_mappings": mappings,
            });
            let request = CompletionRequest::new(SYSTEM_INSTRUCTIONS, TASK_INSTRUCTIONS, payload.to_string());
            match complete_json::<AiQuality>(service.as_ref(), &request).await {
                Ok(response) => {
                    let mut metrics = response.quality_metrics.clamped();
                    metrics.recommendations.truncate(self.config.max_recommendations);
                    return metrics;
                }
                Err(e) => warn!(error = %e, "AI quality assessment failed, using formula scoring"),
            }
        }
        self.validate(requirements, test_cases, mappings)
    }

    pub fn validate(&self, requirements: &[Requirement], test_cases: &[TestCase], mappings: &[ComplianceMapping]) -> QualityMetrics {
        let (total_issues, critical_issues) = count_issues(requirements, test_cases);
        let metrics = QualityMetrics {
            completeness_score: completeness_score(requirements, test_cases),
            accuracy_score: accuracy_score(requirements, test_cases),
            traceability_score: traceability_score(requirements, test_cases),
            compliance_score: compliance_score(requirements, test_cases, mappings),
            coverage_percentage: coverage_percentage(requirements, test_cases),
            total_issues,
            critical_issues,
            recommendations: self.recommendations(requirements, test_cases),
        };
        info!(
            completeness = metrics.completeness_score,
            traceability = metrics.traceability_score,
            coverage = metrics.coverage_percentage,
            "quality metrics computed"
        );
        metrics
    }

    /// Thresholds the metrics fail to meet, phrased as suggestions.
    pub fn quality_gate(&self, metrics: &QualityMetrics) -> Vec<String> {
        let checks = [
            ("Completeness", metrics.completeness_score, self.config.min_completeness),
            ("Accuracy", metrics.accuracy_score, self.config.min_accuracy),
            ("Traceability", metrics.traceability_score, self.config.min_traceability),
            ("Compliance", metrics.compliance_score, self.config.min_compliance),
        ];
        checks
            .iter()
            .filter(|(_, score, minimum)| score < minimum)
            .map(|(name, score, minimum)| format!("{} score {:.2} is below the target of {:.2}", name, score, minimum))
            .collect()
    }

    fn recommendations(&self, requirements: &[Requirement], test_cases: &[TestCase]) -> Vec<String> {
        let mut recommendations = Vec::new();

        let covered = covered_ids(requirements, test_cases);
        let uncovered: Vec<&str> = requirements
            .iter()
            .filter(|r| !covered.contains(r.id.as_str()))
            .map(|r| r.id.as_str())
            .collect();
        if !uncovered.is_empty() {
            let listed: Vec<&str> = uncovered.iter().take(3).copied().collect();
            recommendations.push(format!("Add test cases for uncovered requirements: {}", listed.join(", ")));
        }

        for requirement in requirements {
            if requirement.acceptance_criteria.is_empty() {
                recommendations.push(format!("Add acceptance criteria to {}", requirement.id));
            }
            if requirement.stakeholders.is_empty() {
                recommendations.push(format!("Identify stakeholders for {}", requirement.id));
            }
            if requirement.risk_level == RiskLevel::Critical && requirement.priority != Priority::Critical {
                recommendations.push(format!("Review priority for critical risk requirement {}", requirement.id));
            }
        }

        for case in test_cases {
            if case.requirement_ids.is_empty() {
                recommendations.push(format!("Add requirement traceability to {}", case.id));
            }
            if case.test_steps.len() < 3 {
                recommendations.push(format!("Add more detailed test steps to {}", case.id));
            }
            if case.automation_status == AutomationStatus::Manual
                && matches!(case.test_type, TestCaseType::Functional | TestCaseType::Performance)
            {
                recommendations.push(format!("Consider automation for {}", case.id));
            }
        }

        recommendations.truncate(self.config.max_recommendations);
        recommendations
    }
}

fn requirement_completeness(requirement: &Requirement) -> f64 {
    let mut score = 0.0;
    if requirement.title.chars().count() >= 10 {
        score += 0.2;
    }
    if requirement.description.chars().count() >= 50 {
        score += 0.3;
    }
    // type and priority are always present on a typed requirement
    score += 0.1 + 0.1;
    if !requirement.acceptance_criteria.is_empty() {
        score += 0.2;
    }
    if !requirement.stakeholders.is_empty() {
        score += 0.1;
    }
    score
}

fn test_case_completeness(case: &TestCase) -> f64 {
    let mut score = 0.0;
    if case.title.chars().count() >= 10 {
        score += 0.2;
    }
    if case.description.chars().count() >= 30 {
        score += 0.2;
    }
    if case.test_steps.len() >= 3 {
        score += 0.3;
    }
    if case.expected_results.len() >= 2 {
        score += 0.2;
    }
    if !case.preconditions.is_empty() {
        score += 0.1;
    }
    score
}

pub fn completeness_score(requirements: &[Requirement], test_cases: &[TestCase]) -> f64 {
    let scores: Vec<f64> = requirements
        .iter()
        .map(requirement_completeness)
        .chain(test_cases.iter().map(test_case_completeness))
        .collect();
    mean(&scores).min(1.0)
}

fn requirement_accuracy(requirement: &Requirement) -> f64 {
    let description = requirement.description.trim();
    let lowered = description.to_lowercase();
    let mut score: f64 = 1.0;
    if crate::scoring::word_set(&lowered).iter().any(|w| HEDGING_WORDS.contains(&w.as_str())) {
        score -= 0.1;
    }
    if lowered.ends_with("...") || lowered.ends_with("etc") || lowered.ends_with("etc.") {
        score -= 0.1;
    }
    if !description.chars().next().map_or(false, char::is_uppercase) {
        score -= 0.05;
    }
    score.max(0.0)
}

fn test_case_accuracy(case: &TestCase) -> f64 {
    let mut score: f64 = 1.0;
    if case.test_steps.iter().any(|step| starts_with_any(step, &VERIFICATION_VERBS)) {
        score += 0.1;
    }
    if case.expected_results.iter().any(|result| mentions_obligation(result)) {
        score += 0.1;
    }
    score.min(1.0)
}

fn starts_with_any(text: &str, words: &[&str]) -> bool {
    let lowered = text.trim().to_lowercase();
    words.iter().any(|w| lowered.starts_with(w))
}

fn mentions_obligation(text: &str) -> bool {
    let words = crate::scoring::word_set(text);
    OBLIGATION_WORDS.iter().any(|w| words.contains(*w))
}

pub fn accuracy_score(requirements: &[Requirement], test_cases: &[TestCase]) -> f64 {
    let scores: Vec<f64> = requirements
        .iter()
        .map(requirement_accuracy)
        .chain(test_cases.iter().map(test_case_accuracy))
        .collect();
    mean(&scores)
}

fn covered_ids<'a>(requirements: &'a [Requirement], test_cases: &[TestCase]) -> HashSet<&'a str> {
    let referenced: HashSet<&str> = test_cases
        .iter()
        .flat_map(|c| c.requirement_ids.iter().map(String::as_str))
        .collect();
    requirements
        .iter()
        .map(|r| r.id.as_str())
        .filter(|id| referenced.contains(id))
        .collect()
}

pub fn traceability_score(requirements: &[Requirement], test_cases: &[TestCase]) -> f64 {
    if requirements.is_empty() || test_cases.is_empty() {
        return 0.0;
    }
    let known: HashSet<&str> = requirements.iter().map(|r| r.id.as_str()).collect();
    let requirement_coverage = covered_ids(requirements, test_cases).len() as f64 / requirements.len() as f64;
    let linked_cases = test_cases
        .iter()
        .filter(|c| c.requirement_ids.iter().any(|id| known.contains(id.as_str())))
        .count();
    let case_coverage = linked_cases as f64 / test_cases.len() as f64;
    (requirement_coverage + case_coverage) / 2.0
}

pub fn compliance_score(requirements: &[Requirement], test_cases: &[TestCase], mappings: &[ComplianceMapping]) -> f64 {
    if requirements.is_empty() {
        return 0.0;
    }
    let mapped: BTreeSet<&str> = mappings.iter().map(|m| m.requirement_id.as_str()).collect();
    let mapped_requirements = requirements.iter().filter(|r| mapped.contains(r.id.as_str())).count();
    let requirement_part = mapped_requirements as f64 / requirements.len() as f64;
    let case_part = if test_cases.is_empty() {
        0.0
    } else {
        test_cases.iter().filter(|c| !c.compliance_standards.is_empty()).count() as f64 / test_cases.len() as f64
    };
    (requirement_part + case_part) / 2.0
}

pub fn coverage_percentage(requirements: &[Requirement], test_cases: &[TestCase]) -> f64 {
    if requirements.is_empty() {
        return 0.0;
    }
    covered_ids(requirements, test_cases).len() as f64 / requirements.len() as f64 * 100.0
}

/// Presence violations, split into all issues and those on critical items.
pub fn count_issues(requirements: &[Requirement], test_cases: &[TestCase]) -> (usize, usize) {
    let mut total = 0;
    let mut critical = 0;

    for requirement in requirements {
        let violations = [
            requirement.title.chars().count() < 10,
            requirement.description.chars().count() < 50,
            requirement.acceptance_criteria.is_empty(),
        ]
        .iter()
        .filter(|v| **v)
        .count();
        total += violations;
        if requirement.priority == Priority::Critical || requirement.risk_level == RiskLevel::Critical {
            critical += violations;
        }
    }

    for case in test_cases {
        let violations = [
            case.test_steps.len() < 3,
            case.expected_results.len() < 2,
            case.requirement_ids.is_empty(),
        ]
        .iter()
        .filter(|v| **v)
        .count();
        total += violations;
        if case.priority == Priority::Critical || case.risk_level == RiskLevel::Critical {
            critical += violations;
        }
    }

    (total, critical)
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Complexity, RequirementType};
    use std::collections::BTreeMap;

    fn requirement(id: &str, description: &str) -> Requirement {
        Requirement {
            id: id.to_string(),
            title: "Encrypt patient data".to_string(),
            description: description.to_string(),
            requirement_type: RequirementType::Security,
            priority: Priority::Medium,
            risk_level: RiskLevel::Medium,
            complexity: Complexity::Simple,
            source_document: "srs.txt".to_string(),
            source_section: None,
            source_line: None,
            acceptance_criteria: Vec::new(),
            stakeholders: Vec::new(),
            dependencies: Vec::new(),
            compliance_standards: Vec::new(),
            tags: Vec::new(),
            estimated_effort: None,
        }
    }

    fn test_case(id: &str, requirement_ids: &[&str]) -> TestCase {
        TestCase {
            id: id.to_string(),
            title: "Verify encryption in transit".to_string(),
            description: "Checks transport encryption".to_string(),
            test_type: TestCaseType::Security,
            priority: Priority::High,
            requirement_ids: requirement_ids.iter().map(|s| s.to_string()).collect(),
            preconditions: Vec::new(),
            test_steps: vec!["Verify TLS".to_string(), "Inspect traffic".to_string(), "Check certificates".to_string()],
            expected_results: vec!["Traffic must be encrypted".to_string(), "No plain text".to_string()],
            test_data: BTreeMap::new(),
            automation_status: AutomationStatus::Automated,
            estimated_duration: None,
            risk_level: RiskLevel::Medium,
            compliance_standards: Vec::new(),
            traceability_matrix: BTreeMap::new(),
        }
    }

    #[test]
    fn test_empty_inputs_score_zero() {
        let validator = QualityValidator::new(QualityConfig::default());
        let metrics = validator.validate(&[], &[], &[]);
        assert_eq!(metrics.completeness_score, 0.0);
        assert_eq!(metrics.traceability_score, 0.0);
        assert_eq!(metrics.coverage_percentage, 0.0);
        assert_eq!(metrics.total_issues, 0);
    }

    #[test]
    fn test_traceability_and_coverage() {
        let requirements = vec![requirement("REQ_1_001", "The system shall log."), requirement("REQ_1_002", "The system shall audit.")];
        let cases = vec![test_case("TC_1", &["REQ_1_001"]), test_case("TC_2", &["REQ_UNKNOWN"])];
        assert!((traceability_score(&requirements, &cases) - 0.5).abs() < 1e-9);
        assert!((coverage_percentage(&requirements, &cases) - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_accuracy_penalises_hedging() {
        let vague = requirement("REQ_1_001", "the system might encrypt data etc");
        let clear = requirement("REQ_1_002", "The system shall encrypt data.");
        assert!((requirement_accuracy(&vague) - 0.75).abs() < 1e-9);
        assert_eq!(requirement_accuracy(&clear), 1.0);
    }

    #[test]
    fn test_critical_issues_follow_priority() {
        let mut critical = requirement("REQ_1_001", "short");
        critical.priority = Priority::Critical;
        let (total, critical_count) = count_issues(&[critical, requirement("REQ_1_002", "short")], &[]);
        assert_eq!(total, 4);
        assert_eq!(critical_count, 2);
    }

    #[test]
    fn test_recommendations_are_capped() {
        let config = QualityConfig {
            max_recommendations: 3,
            ..QualityConfig::default()
        };
        let validator = QualityValidator::new(config);
        let requirements: Vec<Requirement> = (1..=5)
            .map(|i| requirement(&format!("REQ_1_{:03}", i), "The system shall log."))
            .collect();
        let metrics = validator.validate(&requirements, &[], &[]);
        assert_eq!(metrics.recommendations.len(), 3);
        assert!(metrics.recommendations[0].starts_with("Add test cases for uncovered requirements: REQ_1_001"));
    }

    #[test]
    fn test_quality_gate_lists_failures() {
        let validator = QualityValidator::new(QualityConfig::default());
        let metrics = QualityMetrics {
            completeness_score: 0.5,
            accuracy_score: 1.0,
            traceability_score: 1.0,
            compliance_score: 1.0,
            ..QualityMetrics::default()
        };
        let failures = validator.quality_gate(&metrics);
        assert_eq!(failures.len(), 1);
        assert!(failures[0].starts_with("Completeness"));
    }
}
