use serde::Deserialize;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::catalog::ReferenceData;
use crate::config::ExtractionConfig;
use crate::document_processor::SectionSplitter;
use crate::llm::{complete_json, CompletionRequest, CompletionService};
use crate::models::{
    ComplianceStandard, Complexity, Document, Priority, Requirement, RequirementType, RiskLevel,
    UnknownVariant,
};
use crate::scoring::{classify, dedup_by_similarity, matched_terms, risk_multiplier};

const SYSTEM_INSTRUCTIONS: &str = "You are an expert healthcare software requirements analyst. \
Extract discrete, testable requirements from regulated medical software documentation. \
Answer with a single JSON object and nothing else.";

const TASK_INSTRUCTIONS: &str = "Extract every requirement from the document below. Respond with \
{\"requirements\": [{\"id\", \"title\", \"description\", \"type\" (functional|non_functional|performance|security|compliance|usability), \
\"priority\" (critical|high|medium|low), \"risk_level\" (low|medium|high|critical), \"complexity\" (simple|moderate|complex), \
\"source_section\", \"acceptance_criteria\": [], \"stakeholders\": [], \"dependencies\": [], \
\"compliance_standards\": [fda|iec_62304|iso_9001|iso_13485|iso_27001|hipaa|gdpr], \"estimated_effort\" (hours)}]}";

const TITLE_LENGTH: usize = 50;

#[derive(Debug, Clone, Default)]
pub struct ExtractionOutcome {
    pub requirements: Vec<Requirement>,
    pub warnings: Vec<String>,
}

pub struct RequirementExtractor {
    config: ExtractionConfig,
    reference: Arc<ReferenceData>,
    sections: SectionSplitter,
    completion: Option<Arc<dyn CompletionService>>,
}

#[derive(Deserialize)]
struct AiRequirements {
    requirements: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct AiRequirement {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(rename = "type", default)]
    requirement_type: Option<String>,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default)]
    risk_level: Option<String>,
    #[serde(default)]
    complexity: Option<String>,
    #[serde(default)]
    source_section: Option<String>,
    #[serde(default)]
    acceptance_criteria: Vec<String>,
    #[serde(default)]
    stakeholders: Vec<String>,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    compliance_standards: Vec<String>,
    #[serde(default)]
    estimated_effort: Option<f64>,
}

impl RequirementExtractor {
    pub fn new(config: ExtractionConfig, reference: Arc<ReferenceData>) -> Self {
        Self {
            config,
            reference,
            sections: SectionSplitter::new(),
            completion: None,
        }
    }

    pub fn with_completion(mut self, completion: Arc<dyn CompletionService>) -> Self {
        self.completion = Some(completion);
        self
    }

    pub async fn extract(&self, documents: &[Document]) -> ExtractionOutcome {
        let mut outcome = ExtractionOutcome::default();
        let mut candidates = Vec::new();

        for (index, document) in documents.iter().enumerate() {
            if document.extracted_text.trim().is_empty() {
                let message = format!("Document {} contains no text", document.filename);
                warn!("{}", message);
                outcome.warnings.push(message);
                continue;
            }

            let extracted = match &self.completion {
                Some(service) => match self.extract_with_ai(service.as_ref(), index, document, &mut outcome.warnings).await {
                    Some(items) => items,
                    None => self.extract_from_text(index, &document.filename, &document.extracted_text),
                },
                None => self.extract_from_text(index, &document.filename, &document.extracted_text),
            };

            debug!(document = %document.filename, count = extracted.len(), "requirements found");
            candidates.extend(extracted);
        }

        outcome.requirements = self.post_process(candidates, &mut outcome.warnings);
        info!(count = outcome.requirements.len(), "requirement extraction finished");
        outcome
    }

    async fn extract_with_ai(
        &self,
        service: &dyn CompletionService,
        index: usize,
        document: &Document,
        warnings: &mut Vec<String>,
    ) -> Option<Vec<Requirement>> {
        let text = truncate_chars(&document.extracted_text, self.config.max_input_length);
        let payload = serde_json::json!({
            "filename": document.filename,
            "document_type": document.document_type,
            "text": text,
        });
        let request = CompletionRequest::new(SYSTEM_INSTRUCTIONS, TASK_INSTRUCTIONS, payload.to_string());

        let response: AiRequirements = match complete_json(service, &request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(document = %document.filename, error = %e, "AI extraction failed, using pattern extraction");
                return None;
            }
        };

        let mut requirements = Vec::new();
        for (item_index, value) in response.requirements.into_iter().enumerate() {
            let converted = serde_json::from_value::<AiRequirement>(value)
                .map_err(|e| e.to_string())
                .and_then(|raw| self.convert_ai_item(index, item_index, document, raw).map_err(|e| e.to_string()));
            match converted {
                Ok(requirement) => requirements.push(requirement),
                Err(e) => {
                    let message = format!("Skipped requirement {} from {}: {}", item_index + 1, document.filename, e);
                    warn!("{}", message);
                    warnings.push(message);
                }
            }
        }

        if requirements.is_empty() {
            warn!(document = %document.filename, "AI returned no usable requirements, using pattern extraction");
            return None;
        }
        Some(requirements)
    }

    fn convert_ai_item(
        &self,
        doc_index: usize,
        item_index: usize,
        document: &Document,
        raw: AiRequirement,
    ) -> Result<Requirement, UnknownVariant> {
        let text = format!("{} {}", raw.title, raw.description);
        let requirement_type = match raw.requirement_type {
            Some(value) => value.parse()?,
            None => classify(&text, &self.reference.type_keywords, RequirementType::Functional),
        };
        let priority = match raw.priority {
            Some(value) => value.parse()?,
            None => classify(&text, &self.reference.priority_keywords, Priority::Medium),
        };
        let risk_level = match raw.risk_level {
            Some(value) => value.parse()?,
            None => classify(&text, &self.reference.risk_keywords, RiskLevel::Medium),
        };
        let complexity = match raw.complexity {
            Some(value) => value.parse()?,
            None => complexity_for(&raw.description),
        };

        let mut compliance_standards = Vec::new();
        for code in raw.compliance_standards {
            match code.parse::<ComplianceStandard>() {
                Ok(standard) if !compliance_standards.contains(&standard) => compliance_standards.push(standard),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "dropping unknown compliance standard"),
            }
        }

        let id = raw
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| format!("REQ_{}_AI_{:03}", doc_index + 1, item_index + 1));

        Ok(Requirement {
            id,
            title: raw.title.trim().to_string(),
            description: raw.description.trim().to_string(),
            requirement_type,
            priority,
            risk_level,
            complexity,
            source_document: document.filename.clone(),
            source_section: raw.source_section,
            source_line: None,
            acceptance_criteria: raw.acceptance_criteria,
            stakeholders: raw.stakeholders,
            dependencies: raw.dependencies,
            compliance_standards,
            tags: Vec::new(),
            estimated_effort: raw.estimated_effort.filter(|h| *h > 0.0).map(|h| h.round().max(1.0) as u32),
        })
    }

    /// Line-oriented pattern extraction used when no completion service is
    /// available or its answer is unusable. A line without type keywords
    /// takes the type of the requirements section it sits in.
    pub fn extract_from_text(&self, doc_index: usize, filename: &str, text: &str) -> Vec<Requirement> {
        let sections = self.sections.split(text);
        text.lines()
            .enumerate()
            .filter_map(|(line_index, line)| {
                let line = line.trim();
                if line.is_empty()
                    || self.sections.heading_type(line).is_some()
                    || matched_terms(line, &self.reference.requirement_markers).is_empty()
                {
                    return None;
                }
                let section_type = sections
                    .iter()
                    .find(|section| section.lines.contains(&line_index))
                    .map(|section| section.requirement_type);
                Some(self.requirement_from_line(doc_index, line_index, filename, line, section_type))
            })
            .collect()
    }

    fn requirement_from_line(
        &self,
        doc_index: usize,
        line_index: usize,
        filename: &str,
        line: &str,
        section_type: Option<RequirementType>,
    ) -> Requirement {
        let title = if line.chars().count() > TITLE_LENGTH {
            format!("{}...", line.chars().take(TITLE_LENGTH).collect::<String>().trim_end())
        } else {
            line.to_string()
        };

        let compliance_standards = self
            .reference
            .standards
            .iter()
            .filter(|profile| !matched_terms(line, &profile.detection_keywords).is_empty())
            .map(|profile| profile.standard)
            .collect();

        Requirement {
            id: format!("REQ_{}_{:03}", doc_index + 1, line_index + 1),
            title,
            description: line.to_string(),
            requirement_type: classify(
                line,
                &self.reference.type_keywords,
                section_type.unwrap_or(RequirementType::Functional),
            ),
            priority: classify(line, &self.reference.priority_keywords, Priority::Medium),
            risk_level: classify(line, &self.reference.risk_keywords, RiskLevel::Medium),
            complexity: complexity_for(line),
            source_document: filename.to_string(),
            source_section: Some(format!("line_{}", line_index + 1)),
            source_line: Some(line_index + 1),
            acceptance_criteria: Vec::new(),
            stakeholders: Vec::new(),
            dependencies: Vec::new(),
            compliance_standards,
            tags: Vec::new(),
            estimated_effort: None,
        }
    }

    fn post_process(&self, candidates: Vec<Requirement>, warnings: &mut Vec<String>) -> Vec<Requirement> {
        let mut seen_ids = HashSet::new();
        let mut valid = Vec::with_capacity(candidates.len());

        for mut requirement in candidates {
            if requirement.title.trim().is_empty() || requirement.description.trim().is_empty() {
                warnings.push(format!("Dropped requirement {} with empty title or description", requirement.id));
                continue;
            }
            if !seen_ids.insert(requirement.id.clone()) {
                let message = format!("Dropped requirement with duplicate id {}", requirement.id);
                warn!("{}", message);
                warnings.push(message);
                continue;
            }
            self.enhance(&mut requirement);
            valid.push(requirement);
        }

        let (kept, dropped) = dedup_by_similarity(valid, self.config.similarity_threshold, |r| r.description.as_str());
        if dropped > 0 {
            info!(dropped, "removed near-duplicate requirements");
        }
        kept
    }

    fn enhance(&self, requirement: &mut Requirement) {
        let mut tags: BTreeSet<String> = matched_terms(&requirement.description, &self.reference.medical_terms)
            .into_iter()
            .map(|term| term.to_lowercase())
            .collect();
        tags.extend(requirement.compliance_standards.iter().map(|s| s.as_str().to_string()));
        tags.extend(requirement.tags.drain(..));
        requirement.tags = tags.into_iter().collect();

        if requirement.estimated_effort.is_none() {
            requirement.estimated_effort = Some(self.estimate_effort(requirement));
        }
    }

    /// Effort in hours: base x complexity x type x risk, at least one hour.
    pub fn estimate_effort(&self, requirement: &Requirement) -> u32 {
        let complexity = match requirement.complexity {
            Complexity::Simple => 0.5,
            Complexity::Moderate => 1.0,
            Complexity::Complex => 2.0,
        };
        let type_factor = match requirement.requirement_type {
            RequirementType::Functional => 1.0,
            RequirementType::NonFunctional => 1.2,
            RequirementType::Performance => 1.5,
            RequirementType::Security => 2.0,
            RequirementType::Compliance => 1.8,
            RequirementType::Usability => 1.3,
        };
        let hours = self.config.base_effort_hours * complexity * type_factor * risk_multiplier(requirement.risk_level);
        (hours.floor() as u32).max(1)
    }
}

pub fn complexity_for(description: &str) -> Complexity {
    match description.chars().count() {
        n if n < 50 => Complexity::Simple,
        n if n < 200 => Complexity::Moderate,
        _ => Complexity::Complex,
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> RequirementExtractor {
        RequirementExtractor::new(ExtractionConfig::default(), Arc::new(ReferenceData::healthcare()))
    }

    #[test]
    fn test_fallback_ids_and_titles() {
        let text = "Intro paragraph\n\nThe system shall record every medication administration event together with the nurse id.";
        let found = extractor().extract_from_text(0, "srs.txt", text);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "REQ_1_003");
        assert!(found[0].title.ends_with("..."));
        assert_eq!(found[0].title.chars().count(), TITLE_LENGTH + 3);
        assert_eq!(found[0].source_line, Some(3));
    }

    #[test]
    fn test_title_prefix_is_trimmed() {
        // The 50th character is the space after "nurses".
        let line = "The system shall record each dose given by nurses and the time of administration.";
        assert_eq!(line.chars().nth(TITLE_LENGTH - 1), Some(' '));
        let found = extractor().extract_from_text(0, "srs.txt", line);
        assert_eq!(found[0].title, "The system shall record each dose given by nurses...");
    }

    #[test]
    fn test_section_heading_sets_default_type() {
        let text = "Usability Requirements
The application shall show the dosage schedule on one screen.
Clinicians will see allergy warnings.
Security Requirements
The system shall lock the screen after inactivity.";
        let found = extractor().extract_from_text(0, "srs.txt", text);

        let types: Vec<RequirementType> = found.iter().map(|r| r.requirement_type).collect();
        assert_eq!(
            types,
            vec![RequirementType::Usability, RequirementType::Usability, RequirementType::Security]
        );
        assert_eq!(found[0].source_line, Some(2));
    }

    #[test]
    fn test_priority_table_order() {
        let found = extractor().extract_from_text(0, "a.txt", "The system shall provide an optional but important export.");
        assert_eq!(found[0].priority, Priority::High);
    }

    #[test]
    fn test_complexity_by_length() {
        assert_eq!(complexity_for("short"), Complexity::Simple);
        assert_eq!(complexity_for(&"x".repeat(120)), Complexity::Moderate);
        assert_eq!(complexity_for(&"x".repeat(200)), Complexity::Complex);
    }

    #[test]
    fn test_effort_floor() {
        let ex = extractor();
        let mut requirement = ex.extract_from_text(0, "a.txt", "The app will show help text.").remove(0);
        requirement.risk_level = RiskLevel::Low;
        // 4 x 0.5 x 1.0 x 0.8 = 1.6
        assert_eq!(ex.estimate_effort(&requirement), 1);
        requirement.complexity = Complexity::Complex;
        requirement.requirement_type = RequirementType::Security;
        requirement.risk_level = RiskLevel::Critical;
        assert_eq!(ex.estimate_effort(&requirement), 32);
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }
}
