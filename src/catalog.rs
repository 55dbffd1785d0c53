use crate::models::{ComplianceStandard, Priority, RequirementType, RiskLevel};

/// Static description of one regulatory standard.
#[derive(Debug, Clone)]
pub struct StandardProfile {
    pub standard: ComplianceStandard,
    pub name: String,
    pub description: String,
    /// Full section list used by the rule-based mapper.
    pub key_sections: Vec<String>,
    /// Short section list attached to confidence-scored mappings.
    pub reference_sections: Vec<String>,
    pub obligations: Vec<String>,
    /// Phrases that tag a requirement line with this standard during extraction.
    pub detection_keywords: Vec<String>,
    /// Terms counted when scoring mapping confidence.
    pub scoring_keywords: Vec<String>,
}

/// Shared keyword and standards tables. One instance is built per process and
/// handed to every pipeline component behind an `Arc`.
#[derive(Debug, Clone)]
pub struct ReferenceData {
    pub standards: Vec<StandardProfile>,
    pub requirement_markers: Vec<String>,
    pub type_keywords: Vec<(RequirementType, Vec<String>)>,
    pub priority_keywords: Vec<(Priority, Vec<String>)>,
    pub risk_keywords: Vec<(RiskLevel, Vec<String>)>,
    pub medical_terms: Vec<String>,
    pub security_test_keywords: Vec<String>,
    pub performance_keywords: Vec<String>,
    pub type_default_standards: Vec<(RequirementType, Vec<ComplianceStandard>)>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for ReferenceData {
    fn default() -> Self {
        Self::healthcare()
    }
}

impl ReferenceData {
    pub fn healthcare() -> Self {
        Self {
            standards: standard_profiles(),
            requirement_markers: strings(&[
                "shall", "must", "should", "will", "the system", "the software",
                "the application", "the platform", "the service",
            ]),
            // Checked in order; the first table with a hit wins.
            type_keywords: vec![
                (RequirementType::Security, strings(&[
                    "security", "encrypt", "authenticate", "authorize", "access control",
                    "privacy", "hipaa", "gdpr",
                ])),
                (RequirementType::Performance, strings(&[
                    "performance", "speed", "response time", "throughput", "scalability", "load",
                ])),
                (RequirementType::Compliance, strings(&[
                    "compliance", "fda", "iec", "iso", "standard", "regulation", "audit",
                ])),
                (RequirementType::Usability, strings(&[
                    "user interface", "ui", "ux", "usability", "user experience", "ergonomic",
                ])),
            ],
            priority_keywords: vec![
                (Priority::Critical, strings(&["critical", "essential", "mandatory"])),
                (Priority::High, strings(&["important", "high", "priority"])),
                (Priority::Low, strings(&["low", "optional", "nice to have"])),
            ],
            risk_keywords: vec![
                (RiskLevel::Critical, strings(&[
                    "patient safety", "life-threatening", "medical device failure",
                    "data breach", "unauthorized access", "system downtime",
                ])),
                (RiskLevel::High, strings(&[
                    "data integrity", "regulatory compliance", "audit trail",
                    "user authentication", "data backup", "error handling",
                ])),
                (RiskLevel::Medium, strings(&[
                    "performance", "usability", "integration", "reporting", "configuration", "logging",
                ])),
                (RiskLevel::Low, strings(&[
                    "cosmetic", "minor features", "optional functionality", "documentation", "help text",
                ])),
            ],
            medical_terms: strings(&[
                "patient", "diagnosis", "treatment", "medication", "vital signs", "symptoms",
                "medical history", "allergies", "contraindications", "dosage", "administration",
                "side effects", "adverse events", "clinical trial", "protocol", "informed consent",
                "privacy", "confidentiality", "hipaa", "phi", "medical device", "software",
                "validation", "verification", "risk management", "quality assurance",
            ]),
            security_test_keywords: strings(&[
                "security", "authentication", "authorization", "access", "login", "password",
                "encrypt", "data protection", "privacy", "audit",
            ]),
            performance_keywords: strings(&[
                "performance", "response time", "throughput", "latency", "concurrent", "load",
            ]),
            type_default_standards: vec![
                (RequirementType::Functional, vec![ComplianceStandard::Fda, ComplianceStandard::Iec62304]),
                (RequirementType::NonFunctional, vec![ComplianceStandard::Fda, ComplianceStandard::Iec62304]),
                (RequirementType::Security, vec![ComplianceStandard::Iso27001, ComplianceStandard::Hipaa]),
                (RequirementType::Compliance, vec![ComplianceStandard::Iso13485, ComplianceStandard::Fda]),
            ],
        }
    }

    pub fn profile(&self, standard: ComplianceStandard) -> Option<&StandardProfile> {
        self.standards.iter().find(|p| p.standard == standard)
    }

    pub fn default_standards_for(&self, requirement_type: RequirementType) -> &[ComplianceStandard] {
        self.type_default_standards
            .iter()
            .find(|(t, _)| *t == requirement_type)
            .map(|(_, standards)| standards.as_slice())
            .unwrap_or(&[])
    }
}

fn standard_profiles() -> Vec<StandardProfile> {
    vec![
        StandardProfile {
            standard: ComplianceStandard::Fda,
            name: "FDA 21 CFR Part 820".to_string(),
            description: "Quality System Regulation for Medical Devices".to_string(),
            key_sections: strings(&[
                "820.30 - Design Controls",
                "820.50 - Purchasing Controls",
                "820.70 - Production and Process Controls",
                "820.80 - Acceptance Activities",
                "820.90 - Nonconforming Product",
                "820.100 - Corrective and Preventive Action",
                "820.120 - Device Labeling",
                "820.180 - General Requirements",
                "820.184 - Device History Record",
                "820.198 - Complaint Files",
            ]),
            reference_sections: strings(&["21 CFR Part 820", "21 CFR Part 11"]),
            obligations: strings(&[
                "Design validation must ensure devices conform to defined user needs",
                "Risk management must be implemented throughout device lifecycle",
                "Software must be validated for its intended use",
                "Change control procedures must be established",
                "Documentation must be maintained and controlled",
            ]),
            detection_keywords: strings(&["fda", "medical device", "regulation"]),
            scoring_keywords: strings(&["medical device", "fda", "regulation", "safety", "effectiveness"]),
        },
        StandardProfile {
            standard: ComplianceStandard::Iec62304,
            name: "IEC 62304 - Medical Device Software Lifecycle".to_string(),
            description: "International standard for medical device software lifecycle processes".to_string(),
            key_sections: strings(&[
                "5.1 - Software Development Process",
                "5.2 - Software Maintenance Process",
                "5.3 - Software Risk Management Process",
                "5.4 - Software Configuration Management Process",
                "5.5 - Software Problem Resolution Process",
                "5.6 - Software Safety Classification",
                "5.8 - Software Requirements Analysis",
                "5.9 - Software Architectural Design",
                "5.12 - Software Integration",
                "5.13 - Software System Testing",
                "5.14 - Software Release",
            ]),
            reference_sections: strings(&[
                "5.1 - Software Development Process",
                "5.2 - Software Maintenance Process",
            ]),
            obligations: strings(&[
                "Software must be classified according to risk (Class A, B, or C)",
                "Software development lifecycle must be established",
                "Risk management must be integrated with software development",
                "Software must be validated and verified",
                "Configuration management must be implemented",
            ]),
            detection_keywords: strings(&["software", "development"]),
            scoring_keywords: strings(&["software", "medical device", "lifecycle", "development"]),
        },
        StandardProfile {
            standard: ComplianceStandard::Iso9001,
            name: "ISO 9001 - Quality Management Systems".to_string(),
            description: "General quality management system requirements".to_string(),
            key_sections: strings(&[
                "4.4 - Process Management",
                "7.5 - Documented Information",
                "8.3 - Design and Development",
                "8.5 - Production and Service Provision",
                "9.1 - Monitoring and Measurement",
                "10.2 - Nonconformity and Corrective Action",
            ]),
            reference_sections: strings(&["4.4 - Process Management", "8.3 - Design and Development"]),
            obligations: strings(&[
                "Quality processes must be defined and controlled",
                "Customer requirements must be determined and reviewed",
                "Nonconformities must be corrected and analysed",
            ]),
            detection_keywords: strings(&["iso 9001", "quality process", "continual improvement"]),
            scoring_keywords: strings(&["quality", "management", "process"]),
        },
        StandardProfile {
            standard: ComplianceStandard::Iso13485,
            name: "ISO 13485 - Medical Device Quality Management".to_string(),
            description: "Quality management system requirements for medical devices".to_string(),
            key_sections: strings(&[
                "4.1 - General Requirements",
                "4.2 - Documentation Requirements",
                "5.1 - Management Responsibility",
                "6.1 - Resource Management",
                "7.1 - Product Realization",
                "7.3 - Design and Development",
                "7.5 - Production and Service Provision",
                "8.2 - Monitoring and Measurement",
                "8.3 - Control of Nonconforming Product",
                "8.5 - Improvement",
            ]),
            reference_sections: strings(&["4.1 - Quality Management System", "7.3 - Design and Development"]),
            obligations: strings(&[
                "Quality management system must be established and maintained",
                "Management responsibility must be defined",
                "Resource management must be implemented",
                "Product realization processes must be controlled",
                "Measurement and monitoring must be performed",
            ]),
            detection_keywords: strings(&["iso 13485", "quality management", "quality system"]),
            scoring_keywords: strings(&["quality", "management", "medical device"]),
        },
        StandardProfile {
            standard: ComplianceStandard::Iso27001,
            name: "ISO 27001 - Information Security Management".to_string(),
            description: "Information security management system requirements".to_string(),
            key_sections: strings(&[
                "4.4 - Information Security Management System",
                "5.2 - Policy",
                "6.1 - Actions to Address Risks and Opportunities",
                "7.5 - Documented Information",
                "8.2 - Information Security Risk Assessment",
                "8.3 - Information Security Risk Treatment",
                "9.1 - Monitoring, Measurement, Analysis and Evaluation",
                "9.2 - Internal Audit",
                "10.1 - Nonconformity and Corrective Action",
            ]),
            reference_sections: strings(&["A.9 - Access Control", "A.12 - Operations Security"]),
            obligations: strings(&[
                "Information security management system must be established",
                "Risk assessment and treatment must be performed",
                "Security controls must be implemented",
                "Monitoring and measurement must be performed",
                "Continual improvement must be ensured",
            ]),
            detection_keywords: strings(&["security", "access control"]),
            scoring_keywords: strings(&["security", "information", "risk", "management"]),
        },
        StandardProfile {
            standard: ComplianceStandard::Hipaa,
            name: "HIPAA - Health Insurance Portability and Accountability Act".to_string(),
            description: "US federal law for protecting health information".to_string(),
            key_sections: strings(&[
                "Administrative Safeguards",
                "Physical Safeguards",
                "Technical Safeguards",
                "Organizational Requirements",
                "Policies and Procedures",
                "Workforce Training",
                "Access Management",
                "Audit Controls",
                "Integrity",
                "Transmission Security",
            ]),
            reference_sections: strings(&[
                "164.312 - Technical Safeguards",
                "164.314 - Organizational Requirements",
            ]),
            obligations: strings(&[
                "Protected Health Information (PHI) must be safeguarded",
                "Access controls must be implemented",
                "Audit trails must be maintained",
                "Data integrity must be ensured",
                "Transmission security must be implemented",
            ]),
            detection_keywords: strings(&["hipaa", "privacy", "patient data"]),
            scoring_keywords: strings(&["patient", "health", "privacy", "security", "data", "phi"]),
        },
        StandardProfile {
            standard: ComplianceStandard::Gdpr,
            name: "GDPR - General Data Protection Regulation".to_string(),
            description: "EU regulation for data protection and privacy".to_string(),
            key_sections: strings(&[
                "Article 5 - Principles of Processing",
                "Article 6 - Lawfulness of Processing",
                "Article 7 - Conditions for Consent",
                "Article 9 - Processing of Special Categories",
                "Article 15 - Right of Access",
                "Article 17 - Right to Erasure",
                "Article 20 - Right to Data Portability",
                "Article 25 - Data Protection by Design",
                "Article 32 - Security of Processing",
                "Article 33 - Breach Notification",
                "Article 35 - Data Protection Impact Assessment",
            ]),
            reference_sections: strings(&[
                "Article 32 - Security of Processing",
                "Article 25 - Data Protection by Design",
            ]),
            obligations: strings(&[
                "Personal data must be processed lawfully and transparently",
                "Data minimization principle must be applied",
                "Data subject rights must be respected",
                "Data protection by design must be implemented",
                "Security measures must be appropriate",
            ]),
            detection_keywords: strings(&["gdpr", "data protection"]),
            scoring_keywords: strings(&["data", "privacy", "personal", "protection", "consent"]),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_standard_has_a_profile() {
        let data = ReferenceData::healthcare();
        for standard in ComplianceStandard::ALL {
            let profile = data.profile(*standard).unwrap();
            assert!(!profile.scoring_keywords.is_empty());
            assert_eq!(profile.reference_sections.len(), 2);
        }
    }

    #[test]
    fn test_type_defaults() {
        let data = ReferenceData::healthcare();
        assert_eq!(
            data.default_standards_for(RequirementType::Security),
            &[ComplianceStandard::Iso27001, ComplianceStandard::Hipaa]
        );
        assert!(data.default_standards_for(RequirementType::Usability).is_empty());
    }
}
