use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Raised when a textual enum value (from an AI response, a CLI flag or a
/// stored session) does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let normalized = s.trim().to_lowercase().replace([' ', '-'], "_");
                match normalized.as_str() {
                    $($text => Ok($name::$variant),)+
                    _ => Err(UnknownVariant {
                        kind: stringify!($name),
                        value: s.to_string(),
                    }),
                }
            }
        }
    };
}

string_enum!(DocumentType {
    Pdf => "pdf",
    Docx => "docx",
    Xml => "xml",
    Markdown => "md",
    Text => "txt",
    Xlsx => "xlsx",
});

string_enum!(RequirementType {
    Functional => "functional",
    NonFunctional => "non_functional",
    Performance => "performance",
    Security => "security",
    Compliance => "compliance",
    Usability => "usability",
});

// Declared most to least urgent so the derived ordering sorts critical first.
string_enum!(Priority {
    Critical => "critical",
    High => "high",
    Medium => "medium",
    Low => "low",
});

string_enum!(RiskLevel {
    Low => "low",
    Medium => "medium",
    High => "high",
    Critical => "critical",
});

string_enum!(Complexity {
    Simple => "simple",
    Moderate => "moderate",
    Complex => "complex",
});

string_enum!(ComplianceStandard {
    Fda => "fda",
    Iec62304 => "iec_62304",
    Iso9001 => "iso_9001",
    Iso13485 => "iso_13485",
    Iso27001 => "iso_27001",
    Hipaa => "hipaa",
    Gdpr => "gdpr",
});

string_enum!(ComplianceLevel {
    FullyCompliant => "fully_compliant",
    PartiallyCompliant => "partially_compliant",
    NonCompliant => "non_compliant",
});

string_enum!(TestCaseType {
    Functional => "functional",
    Integration => "integration",
    System => "system",
    Acceptance => "acceptance",
    Performance => "performance",
    Security => "security",
    Usability => "usability",
    Compliance => "compliance",
});

string_enum!(AutomationStatus {
    Manual => "manual",
    SemiAutomated => "semi_automated",
    Automated => "automated",
});

string_enum!(StepStatus {
    Pending => "pending",
    InProgress => "in_progress",
    Completed => "completed",
    Failed => "failed",
    Skipped => "skipped",
});

string_enum!(RunStatus {
    Pending => "pending",
    InProgress => "in_progress",
    Completed => "completed",
    Failed => "failed",
});

impl ComplianceStandard {
    /// Uppercase code used inside generated test case ids.
    pub fn id_fragment(&self) -> String {
        self.as_str().replace('_', "").to_uppercase()
    }
}

/// A document handed to a run: inline `content`, or a `file_path` to read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentInput {
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,
}

impl DocumentInput {
    pub fn inline(filename: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            content: Some(content.into()),
            file_path: None,
        }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            filename,
            content: None,
            file_path: Some(path),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub filename: String,
    pub document_type: DocumentType,
    pub size: usize,
    pub checksum: String,
    pub extracted_text: String,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Requirement {
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(rename = "type")]
    pub requirement_type: RequirementType,
    pub priority: Priority,
    pub risk_level: RiskLevel,
    pub complexity: Complexity,
    pub source_document: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_section: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_line: Option<usize>,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub stakeholders: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub compliance_standards: Vec<ComplianceStandard>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub estimated_effort: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum MappingAssessment {
    Confidence(f64),
    Level(ComplianceLevel),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceMapping {
    pub requirement_id: String,
    pub standard: ComplianceStandard,
    pub applicable_sections: Vec<String>,
    pub assessment: MappingAssessment,
    #[serde(default)]
    pub evidence: Vec<String>,
    #[serde(default)]
    pub gaps: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(rename = "type")]
    pub test_type: TestCaseType,
    pub priority: Priority,
    pub requirement_ids: Vec<String>,
    #[serde(default)]
    pub preconditions: Vec<String>,
    pub test_steps: Vec<String>,
    pub expected_results: Vec<String>,
    #[serde(default)]
    pub test_data: BTreeMap<String, serde_json::Value>,
    pub automation_status: AutomationStatus,
    #[serde(default)]
    pub estimated_duration: Option<u32>,
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub compliance_standards: Vec<ComplianceStandard>,
    #[serde(default)]
    pub traceability_matrix: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub completeness_score: f64,
    pub accuracy_score: f64,
    pub traceability_score: f64,
    pub compliance_score: f64,
    pub coverage_percentage: f64,
    pub total_issues: usize,
    pub critical_issues: usize,
    pub recommendations: Vec<String>,
}

impl QualityMetrics {
    pub fn clamped(mut self) -> Self {
        self.completeness_score = self.completeness_score.clamp(0.0, 1.0);
        self.accuracy_score = self.accuracy_score.clamp(0.0, 1.0);
        self.traceability_score = self.traceability_score.clamp(0.0, 1.0);
        self.compliance_score = self.compliance_score.clamp(0.0, 1.0);
        self.coverage_percentage = self.coverage_percentage.clamp(0.0, 100.0);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub step_name: String,
    pub status: StepStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_seconds: f64,
    #[serde(default)]
    pub output_summary: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_parsing_accepts_spacing_variants() {
        assert_eq!("IEC 62304".parse::<ComplianceStandard>(), Ok(ComplianceStandard::Iec62304));
        assert_eq!("non-functional".parse::<RequirementType>(), Ok(RequirementType::NonFunctional));
        assert_eq!(" Semi_Automated ".parse::<AutomationStatus>(), Ok(AutomationStatus::SemiAutomated));
    }

    #[test]
    fn test_enum_parsing_rejects_unknown() {
        let err = "urgent".parse::<Priority>().unwrap_err();
        assert_eq!(err.kind, "Priority");
        assert_eq!(err.value, "urgent");
    }

    #[test]
    fn test_serde_names_are_snake_case() {
        let json = serde_json::to_string(&ComplianceStandard::Iso27001).unwrap();
        assert_eq!(json, "\"iso_27001\"");
        let assessment = MappingAssessment::Confidence(0.75);
        let value = serde_json::to_value(assessment).unwrap();
        assert_eq!(value["kind"], "confidence");
    }

    #[test]
    fn test_id_fragment() {
        assert_eq!(ComplianceStandard::Iec62304.id_fragment(), "IEC62304");
        assert_eq!(ComplianceStandard::Hipaa.id_fragment(), "HIPAA");
    }
}
