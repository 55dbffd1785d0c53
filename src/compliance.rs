use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

use crate::catalog::{ReferenceData, StandardProfile};
use crate::config::ComplianceConfig;
use crate::llm::{complete_json, CompletionRequest, CompletionService};
use crate::models::{
    ComplianceLevel, ComplianceMapping, ComplianceStandard, MappingAssessment, Priority, Requirement, RiskLevel,
    UnknownVariant,
};
use crate::scoring::{matched_terms, word_set};

const SYSTEM_INSTRUCTIONS: &str = "You are an expert healthcare compliance analyst familiar with FDA 21 CFR \
Part 820, IEC 62304, ISO 9001, ISO 13485, ISO 27001, HIPAA and GDPR. Answer with a single JSON object and nothing else.";

const TASK_INSTRUCTIONS: &str = "Map each requirement to the applicable standards listed in the input. Only use \
standards from the input. Respond with {\"compliance_mappings\": [{\"requirement_id\", \"standard\", \
\"applicable_sections\": [], \"mapping_confidence\" (0.0-1.0) or \"compliance_level\" \
(fully_compliant|partially_compliant|non_compliant), \"evidence\": [], \"gaps\": [], \"recommendations\": []}]}";

pub const GAP_NO_ACCEPTANCE_CRITERIA: &str = "No acceptance criteria defined";
pub const GAP_NO_STAKEHOLDERS: &str = "No stakeholders identified";
pub const GAP_RISK_PRIORITY_MISMATCH: &str = "Critical risk level but non-critical priority";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingStrategy {
    /// Keyword ratio against a threshold.
    Confidence,
    /// Explicit, keyword and type-default standards with a heuristic level.
    RuleBased,
}

#[derive(Debug, Clone, Default)]
pub struct MappingOutcome {
    pub mappings: Vec<ComplianceMapping>,
    pub warnings: Vec<String>,
}

pub struct ComplianceMapper {
    config: ComplianceConfig,
    reference: Arc<ReferenceData>,
    completion: Option<Arc<dyn CompletionService>>,
}

#[derive(Deserialize)]
struct AiMappings {
    compliance_mappings: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct AiMapping {
    requirement_id: String,
    standard: String,
    #[serde(default)]
    applicable_sections: Vec<String>,
    #[serde(default)]
    mapping_confidence: Option<f64>,
    #[serde(default)]
    compliance_level: Option<String>,
    #[serde(default)]
    evidence: Vec<String>,
    #[serde(default)]
    gaps: Vec<String>,
    #[serde(default)]
    recommendations: Vec<String>,
}

impl ComplianceMapper {
    pub fn new(config: ComplianceConfig, reference: Arc<ReferenceData>) -> Self {
        Self {
            config,
            reference,
            completion: None,
        }
    }

    pub fn with_completion(mut self, completion: Arc<dyn CompletionService>) -> Self {
        self.completion = Some(completion);
        self
    }

    pub async fn map(&self, requirements: &[Requirement], standards: &[ComplianceStandard]) -> MappingOutcome {
        let mut outcome = MappingOutcome::default();

        if let Some(service) = &self.completion {
            if let Some(mappings) = self
                .map_with_ai(service.as_ref(), requirements, standards, &mut outcome.warnings)
                .await
            {
                outcome.mappings = mappings;
                info!(count = outcome.mappings.len(), "compliance mapping finished");
                return outcome;
            }
        }

        outcome.mappings = match self.config.strategy {
            MappingStrategy::Confidence => self.map_by_confidence(requirements, standards),
            MappingStrategy::RuleBased => self.map_by_rules(requirements, standards),
        };
        if outcome.mappings.is_empty() {
            outcome.warnings.push("No compliance mappings produced".to_string());
        }
        info!(count = outcome.mappings.len(), strategy = ?self.config.strategy, "compliance mapping finished");
        outcome
    }

    async fn map_with_ai(
        &self,
        service: &dyn CompletionService,
        requirements: &[Requirement],
        standards: &[ComplianceStandard],
        warnings: &mut Vec<String>,
    ) -> Option<Vec<ComplianceMapping>> {
        let catalog: Vec<serde_json::Value> = standards
            .iter()
            .filter_map(|s| self.reference.profile(*s))
            .map(|p| {
                serde_json::json!({
                    "code": p.standard,
                    "name": p.name,
                    "description": p.description,
                    "sections": p.key_sections,
                })
            })
            .collect();
        let payload = serde_json::json!({ "requirements": requirements, "standards": catalog });
        let request = CompletionRequest::new(SYSTEM_INSTRUCTIONS, TASK_INSTRUCTIONS, payload.to_string());

        let response: AiMappings = match complete_json(service, &request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "AI compliance mapping failed, using keyword mapping");
                return None;
            }
        };

        let known_ids: HashSet<&str> = requirements.iter().map(|r| r.id.as_str()).collect();
        let mut mappings = Vec::new();
        for (index, value) in response.compliance_mappings.into_iter().enumerate() {
            match self.convert_ai_item(value, &known_ids, standards) {
                Ok(mapping) => mappings.push(mapping),
                Err(reason) => {
                    let message = format!("Skipped compliance mapping {}: {}", index + 1, reason);
                    warn!("{}", message);
                    warnings.push(message);
                }
            }
        }
        Some(mappings)
    }

    fn convert_ai_item(
        &self,
        value: serde_json::Value,
        known_ids: &HashSet<&str>,
        standards: &[ComplianceStandard],
    ) -> Result<ComplianceMapping, String> {
        let raw: AiMapping = serde_json::from_value(value).map_err(|e| e.to_string())?;
        let standard: ComplianceStandard = raw.standard.parse().map_err(|e: UnknownVariant| e.to_string())?;
        if !standards.contains(&standard) {
            return Err(format!("standard {} is not in scope", standard));
        }
        if !known_ids.contains(raw.requirement_id.as_str()) {
            return Err(format!("unknown requirement id {}", raw.requirement_id));
        }
        let assessment = match (raw.mapping_confidence, raw.compliance_level) {
            (Some(confidence), _) => MappingAssessment::Confidence(confidence.clamp(0.0, 1.0)),
            (None, Some(level)) => MappingAssessment::Level(level.parse().map_err(|e: UnknownVariant| e.to_string())?),
            (None, None) => return Err("missing mapping_confidence or compliance_level".to_string()),
        };

        Ok(ComplianceMapping {
            requirement_id: raw.requirement_id,
            standard,
            applicable_sections: raw.applicable_sections,
            assessment,
            evidence: raw.evidence,
            gaps: raw.gaps,
            recommendations: raw.recommendations,
        })
    }

    /// Fraction of the standard's scoring keywords present in the requirement
    /// title and description, with the keywords that matched.
    pub fn confidence<'a>(&self, requirement: &Requirement, profile: &'a StandardProfile) -> (f64, Vec<&'a str>) {
        if profile.scoring_keywords.is_empty() {
            return (0.0, Vec::new());
        }
        let text = format!("{} {}", requirement.title, requirement.description);
        let matched = matched_terms(&text, &profile.scoring_keywords);
        let confidence = matched.len() as f64 / profile.scoring_keywords.len() as f64;
        (confidence, matched)
    }

    pub fn map_by_confidence(&self, requirements: &[Requirement], standards: &[ComplianceStandard]) -> Vec<ComplianceMapping> {
        let mut mappings = Vec::new();
        for requirement in requirements {
            for standard in standards {
                let Some(profile) = self.reference.profile(*standard) else {
                    continue;
                };
                let (confidence, matched) = self.confidence(requirement, profile);
                if confidence <= 0.0 || confidence < self.config.confidence_threshold {
                    continue;
                }

                let gaps = gaps_for(requirement);
                mappings.push(ComplianceMapping {
                    requirement_id: requirement.id.clone(),
                    standard: *standard,
                    applicable_sections: profile.reference_sections.clone(),
                    assessment: MappingAssessment::Confidence(confidence),
                    evidence: vec![
                        format!("Requirement {} addresses {} compliance", requirement.id, standard),
                        format!("Matched keywords: {}", matched.join(", ")),
                        format!("Mapping confidence: {:.2}", confidence),
                    ],
                    recommendations: recommendations_for(requirement, profile, &gaps),
                    gaps,
                });
            }
        }
        mappings
    }

    pub fn map_by_rules(&self, requirements: &[Requirement], standards: &[ComplianceStandard]) -> Vec<ComplianceMapping> {
        let mut mappings = Vec::new();
        for requirement in requirements {
            for standard in self.applicable_standards(requirement) {
                if !standards.contains(&standard) {
                    continue;
                }
                let Some(profile) = self.reference.profile(standard) else {
                    continue;
                };

                let mut evidence = vec![
                    format!("Requirement {} addresses {} compliance", requirement.id, standard),
                    format!("Risk level: {}", requirement.risk_level),
                    format!("Priority: {}", requirement.priority),
                ];
                if !requirement.acceptance_criteria.is_empty() {
                    evidence.push(format!(
                        "Acceptance criteria defined: {} criteria",
                        requirement.acceptance_criteria.len()
                    ));
                }

                let gaps = gaps_for(requirement);
                mappings.push(ComplianceMapping {
                    requirement_id: requirement.id.clone(),
                    standard,
                    applicable_sections: sections_for(requirement, profile),
                    assessment: MappingAssessment::Level(compliance_level(requirement)),
                    evidence,
                    recommendations: recommendations_for(requirement, profile, &gaps),
                    gaps,
                });
            }
        }
        mappings
    }

    /// Explicit standards, then detection keyword hits, then type defaults when
    /// nothing else applies.
    pub fn applicable_standards(&self, requirement: &Requirement) -> Vec<ComplianceStandard> {
        let mut standards = requirement.compliance_standards.clone();
        for profile in &self.reference.standards {
            if !standards.contains(&profile.standard)
                && !matched_terms(&requirement.description, &profile.detection_keywords).is_empty()
            {
                standards.push(profile.standard);
            }
        }
        if standards.is_empty() {
            standards.extend_from_slice(self.reference.default_standards_for(requirement.requirement_type));
        }
        standards
    }
}

pub fn compliance_level(requirement: &Requirement) -> ComplianceLevel {
    match (requirement.priority, requirement.risk_level) {
        (Priority::Critical, RiskLevel::Low) => ComplianceLevel::FullyCompliant,
        (Priority::Critical, _) | (Priority::High, _) => ComplianceLevel::PartiallyCompliant,
        _ => ComplianceLevel::NonCompliant,
    }
}

pub fn gaps_for(requirement: &Requirement) -> Vec<String> {
    let mut gaps = Vec::new();
    if requirement.acceptance_criteria.is_empty() {
        gaps.push(GAP_NO_ACCEPTANCE_CRITERIA.to_string());
    }
    if requirement.stakeholders.is_empty() {
        gaps.push(GAP_NO_STAKEHOLDERS.to_string());
    }
    if requirement.risk_level == RiskLevel::Critical && requirement.priority != Priority::Critical {
        gaps.push(GAP_RISK_PRIORITY_MISMATCH.to_string());
    }
    gaps
}

fn recommendations_for(requirement: &Requirement, profile: &StandardProfile, gaps: &[String]) -> Vec<String> {
    let mut recommendations = Vec::new();
    for gap in gaps {
        match gap.as_str() {
            GAP_NO_ACCEPTANCE_CRITERIA => recommendations.push("Define clear acceptance criteria".to_string()),
            GAP_NO_STAKEHOLDERS => recommendations.push("Identify relevant stakeholders".to_string()),
            _ => {}
        }
    }
    if requirement.risk_level == RiskLevel::Critical {
        recommendations.push("Implement additional risk mitigation measures".to_string());
    }
    recommendations.push(format!("Ensure documentation meets {} requirements", profile.name));
    for obligation in &profile.obligations {
        let line = format!("Ensure compliance with: {}", obligation);
        if !recommendations.contains(&line) {
            recommendations.push(line);
        }
    }
    recommendations
}

fn sections_for(requirement: &Requirement, profile: &StandardProfile) -> Vec<String> {
    let significant: HashSet<String> = word_set(&requirement.description)
        .into_iter()
        .filter(|w| w.chars().count() >= 4)
        .collect();

    let matched: Vec<String> = profile
        .key_sections
        .iter()
        .filter(|section| word_set(section).iter().any(|w| significant.contains(w)))
        .cloned()
        .collect();

    if matched.is_empty() {
        profile.key_sections.iter().take(3).cloned().collect()
    } else {
        matched
    }
}
