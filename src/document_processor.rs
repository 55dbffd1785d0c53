use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::ops::Range;
use std::path::Path;
use tokio::fs;
use tracing::debug;

use crate::models::{Document, DocumentInput, DocumentType, RequirementType};

/// Turns a raw document descriptor into a [`Document`] with plain text.
#[async_trait]
pub trait ContentExtractor: Send + Sync {
    async fn extract(&self, input: &DocumentInput) -> Result<Document>;
}

pub struct DocumentProcessor {
    markup: Regex,
}

impl Default for DocumentProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentExtractor for DocumentProcessor {
    async fn extract(&self, input: &DocumentInput) -> Result<Document> {
        match (&input.content, &input.file_path) {
            (Some(content), _) => Ok(self.from_content(&input.filename, content)),
            (None, Some(path)) => self.from_file(&input.filename, path).await,
            (None, None) => Err(anyhow!("Document {} has neither content nor a file path", input.filename)),
        }
    }
}

impl DocumentProcessor {
    pub fn new() -> Self {
        Self {
            markup: Regex::new(r"<[^>]*>").expect("markup pattern is a valid regex"),
        }
    }

    /// Builds a document from text supplied inline.
    pub fn from_content(&self, filename: &str, content: &str) -> Document {
        let document_type = detect_document_type(filename, content);
        let text = match document_type {
            DocumentType::Xml => self.strip_markup(content),
            _ => self.clean_extracted_text(content),
        };
        build_document(filename, document_type, content.as_bytes(), text)
    }

    pub async fn from_file(&self, filename: &str, path: &Path) -> Result<Document> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .ok_or_else(|| anyhow!("Unable to determine file extension"))?
            .to_lowercase();

        let bytes = fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;

        let (document_type, text) = match extension.as_str() {
            "pdf" => (DocumentType::Pdf, self.extract_pdf_text(&bytes)?),
            "docx" => (DocumentType::Docx, self.extract_docx_text(&bytes)?),
            "xlsx" => (DocumentType::Xlsx, self.extract_xlsx_text(path)?),
            "xml" => (DocumentType::Xml, self.strip_markup(&String::from_utf8_lossy(&bytes))),
            "txt" | "md" | "rst" => {
                let raw = String::from_utf8_lossy(&bytes);
                (detect_document_type(filename, &raw), self.clean_extracted_text(&raw))
            }
            _ => return Err(anyhow!("Unsupported file format: {}", extension)),
        };

        debug!(file = %path.display(), chars = text.len(), "text extracted");
        Ok(build_document(filename, document_type, &bytes, text))
    }

    fn extract_pdf_text(&self, bytes: &[u8]) -> Result<String> {
        let text = pdf_extract::extract_text_from_mem(bytes).map_err(|e| anyhow!("Failed to extract PDF text: {}", e))?;
        Ok(self.clean_extracted_text(&text))
    }

    fn extract_docx_text(&self, bytes: &[u8]) -> Result<String> {
        let docx = docx_rs::read_docx(bytes).map_err(|e| anyhow!("Failed to read DOCX file: {}", e))?;

        let mut text = String::new();
        for child in docx.document.children {
            if let docx_rs::DocumentChild::Paragraph(para) = child {
                for run in para.children {
                    if let docx_rs::ParagraphChild::Run(run_content) = run {
                        for run_child in run_content.children {
                            if let docx_rs::RunChild::Text(text_content) = run_child {
                                text.push_str(&text_content.text);
                            }
                        }
                    }
                }
                text.push('\n');
            }
        }

        Ok(self.clean_extracted_text(&text))
    }

    fn extract_xlsx_text(&self, path: &Path) -> Result<String> {
        use calamine::{open_workbook, Reader, Xlsx};

        let mut workbook: Xlsx<_> = open_workbook(path).map_err(|e| anyhow!("Failed to open XLSX file: {}", e))?;

        // One line per row.
        let mut text = String::new();
        for sheet_name in workbook.sheet_names() {
            if let Ok(range) = workbook.worksheet_range(&sheet_name) {
                for row in range.rows() {
                    let cells: Vec<String> = row
                        .iter()
                        .map(|cell| match cell {
                            calamine::Data::String(s) => s.clone(),
                            calamine::Data::Float(f) => f.to_string(),
                            calamine::Data::Int(i) => i.to_string(),
                            calamine::Data::Bool(b) => b.to_string(),
                            calamine::Data::DateTimeIso(dt) => dt.clone(),
                            calamine::Data::DurationIso(dur) => dur.clone(),
                            _ => String::new(),
                        })
                        .filter(|cell| !cell.trim().is_empty())
                        .collect();
                    if !cells.is_empty() {
                        text.push_str(&cells.join(" "));
                        text.push('\n');
                    }
                }
            }
        }

        Ok(self.clean_extracted_text(&text))
    }

    fn strip_markup(&self, text: &str) -> String {
        let stripped = self.markup.replace_all(text, "\n");
        self.clean_extracted_text(&stripped)
    }

    fn clean_extracted_text(&self, text: &str) -> String {
        text.lines()
            .map(|line| line.trim())
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn is_supported_format<P: AsRef<Path>>(&self, file_path: P) -> bool {
        file_path
            .as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| matches!(ext.to_lowercase().as_str(), "pdf" | "docx" | "xlsx" | "xml" | "txt" | "md" | "rst"))
            .unwrap_or(false)
    }
}

/// Heading phrases that open a requirements section, by the requirement type
/// they imply.
const SECTION_HEADINGS: [(RequirementType, &str); 6] = [
    (
        RequirementType::NonFunctional,
        r"non[- ]?functional\s+requirements?|technical\s+requirements?|system\s+requirements?",
    ),
    (
        RequirementType::Functional,
        r"functional\s+requirements?|business\s+requirements?|system\s+functionality|features?\s+and\s+capabilities",
    ),
    (
        RequirementType::Compliance,
        r"compliance\s+requirements?|regulatory\s+requirements?|standards?\s+compliance|fda\s+requirements?|iec\s+62304|iso\s+\d+",
    ),
    (
        RequirementType::Security,
        r"security\s+requirements?|data\s+protection|privacy\s+requirements?|hipaa\s+compliance|access\s+control",
    ),
    (
        RequirementType::Performance,
        r"performance\s+requirements?|scalability\s+requirements?|response\s+time|throughput\s+requirements?",
    ),
    (
        RequirementType::Usability,
        r"usability\s+requirements?|user\s+interface\s+requirements?|user\s+experience|ergonomics",
    ),
];

/// A block of lines under a recognised requirements heading.
#[derive(Debug, Clone, PartialEq)]
pub struct RequirementSection {
    pub requirement_type: RequirementType,
    pub heading: String,
    /// Zero-based line indexes of the body, heading excluded.
    pub lines: Range<usize>,
    pub content: String,
}

/// Splits document text at requirements headings such as "3.2 Security
/// Requirements" or "## Performance requirements:".
pub struct SectionSplitter {
    headings: Vec<(RequirementType, Regex)>,
}

impl Default for SectionSplitter {
    fn default() -> Self {
        Self::new()
    }
}

impl SectionSplitter {
    pub fn new() -> Self {
        let headings = SECTION_HEADINGS
            .iter()
            .map(|(requirement_type, phrases)| {
                let pattern = format!(r"(?i)^(?:#+\s*)?(?:\d+(?:\.\d+)*\.?\s+)?(?:{})\s*:?$", phrases);
                let regex = Regex::new(&pattern).expect("section heading patterns are valid regexes");
                (*requirement_type, regex)
            })
            .collect();
        Self { headings }
    }

    /// The requirement type a heading line announces, if it is one.
    pub fn heading_type(&self, line: &str) -> Option<RequirementType> {
        let line = line.trim();
        self.headings
            .iter()
            .find(|(_, regex)| regex.is_match(line))
            .map(|(requirement_type, _)| *requirement_type)
    }

    /// Sections in document order. Text before the first heading belongs to
    /// no section.
    pub fn split(&self, text: &str) -> Vec<RequirementSection> {
        let lines: Vec<&str> = text.lines().collect();
        let mut sections = Vec::new();
        let mut open: Option<(RequirementType, &str, usize)> = None;

        for (index, line) in lines.iter().enumerate() {
            if let Some(requirement_type) = self.heading_type(line) {
                if let Some((previous, heading, start)) = open.take() {
                    sections.push(section(previous, heading, start..index, &lines));
                }
                open = Some((requirement_type, line.trim(), index + 1));
            }
        }
        if let Some((requirement_type, heading, start)) = open {
            sections.push(section(requirement_type, heading, start..lines.len(), &lines));
        }
        sections
    }
}

fn section(requirement_type: RequirementType, heading: &str, lines: Range<usize>, all: &[&str]) -> RequirementSection {
    RequirementSection {
        requirement_type,
        heading: heading.to_string(),
        content: all[lines.clone()].join("\n").trim().to_string(),
        lines,
    }
}

/// Extension first, then a look at the content, then plain text.
pub fn detect_document_type(filename: &str, content: &str) -> DocumentType {
    let extension = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase());
    if let Some(ext) = extension {
        match ext.as_str() {
            "pdf" => return DocumentType::Pdf,
            "docx" => return DocumentType::Docx,
            "xlsx" => return DocumentType::Xlsx,
            "xml" => return DocumentType::Xml,
            "md" => return DocumentType::Markdown,
            "txt" | "rst" => return DocumentType::Text,
            _ => {}
        }
    }

    let head = content.trim_start();
    if head.starts_with("<?xml") {
        DocumentType::Xml
    } else if head.starts_with('#') {
        DocumentType::Markdown
    } else {
        DocumentType::Text
    }
}

pub fn checksum(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn build_document(filename: &str, document_type: DocumentType, raw: &[u8], extracted_text: String) -> Document {
    Document {
        filename: filename.to_string(),
        document_type,
        size: raw.len(),
        checksum: checksum(raw),
        extracted_text,
        uploaded_at: Utc::now(),
    }
}
