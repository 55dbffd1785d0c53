use std::collections::BTreeMap;
use std::path::PathBuf;

/// A problem found while collecting documents for a run.
#[derive(Debug, Clone)]
pub struct ProcessingError {
    pub file_path: Option<PathBuf>,
    pub error_type: ErrorType,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorType {
    FileNotFound,
    FileUnreadable,
    UnsupportedFormat,
    EmptyDocument,
    ConfigurationError,
}

/// Decides whether document loading goes on after a bad input.
pub struct ErrorHandler {
    continue_on_error: bool,
    skip_invalid: bool,
    errors: Vec<ProcessingError>,
    warnings: Vec<String>,
}

impl ErrorHandler {
    pub fn new(continue_on_error: bool, skip_invalid: bool) -> Self {
        Self {
            continue_on_error,
            skip_invalid,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Records `error` and returns whether loading should continue.
    pub fn handle_error(&mut self, error: ProcessingError) -> bool {
        match error.error_type {
            ErrorType::ConfigurationError => {
                self.errors.push(error);
                false
            }
            _ if self.skip_invalid => {
                self.warnings.push(format!("⚠️  Skipped invalid file: {} - {}", display_path(&error), error.message));
                true
            }
            _ if self.continue_on_error => {
                eprintln!("❌ Error loading {}: {}", display_path(&error), error.message);
                self.errors.push(error);
                true
            }
            _ => {
                self.errors.push(error);
                false
            }
        }
    }

    pub fn add_warning(&mut self, message: String) {
        self.warnings.push(message);
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    pub fn errors(&self) -> &[ProcessingError] {
        &self.errors
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn error_counts(&self) -> BTreeMap<ErrorType, usize> {
        let mut counts = BTreeMap::new();
        for error in &self.errors {
            *counts.entry(error.error_type).or_insert(0) += 1;
        }
        counts
    }

    pub fn print_summary(&self) {
        if !self.has_errors() && !self.has_warnings() {
            return;
        }

        println!("\n📊 Loading Summary");
        println!("==================");

        if self.has_warnings() {
            println!("⚠️  Warnings: {}", self.warnings.len());
            for warning in &self.warnings {
                println!("   {}", warning);
            }
        }

        if self.has_errors() {
            println!("❌ Errors: {}", self.errors.len());
            for (error_type, count) in self.error_counts() {
                println!("   {:?}: {}", error_type, count);
            }
        }
    }
}

fn display_path(error: &ProcessingError) -> String {
    error
        .file_path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

impl ProcessingError {
    pub fn file_not_found(path: PathBuf) -> Self {
        Self {
            file_path: Some(path),
            error_type: ErrorType::FileNotFound,
            message: "File not found".to_string(),
        }
    }

    pub fn file_unreadable(path: PathBuf, details: String) -> Self {
        Self {
            file_path: Some(path),
            error_type: ErrorType::FileUnreadable,
            message: format!("File could not be read: {}", details),
        }
    }

    pub fn unsupported_format(path: PathBuf) -> Self {
        let format = path
            .extension()
            .map(|ext| ext.to_string_lossy().into_owned())
            .unwrap_or_else(|| "none".to_string());
        Self {
            file_path: Some(path),
            error_type: ErrorType::UnsupportedFormat,
            message: format!("Unsupported format: {}", format),
        }
    }

    pub fn empty_document(path: PathBuf) -> Self {
        Self {
            file_path: Some(path),
            error_type: ErrorType::EmptyDocument,
            message: "File is empty".to_string(),
        }
    }

    pub fn config_error(message: String) -> Self {
        Self {
            file_path: None,
            error_type: ErrorType::ConfigurationError,
            message: format!("Configuration error: {}", message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strict_handler_stops_on_first_bad_file() {
        let mut handler = ErrorHandler::new(false, false);
        assert!(!handler.handle_error(ProcessingError::file_not_found(PathBuf::from("missing.txt"))));
        assert!(handler.has_errors());
    }

    #[test]
    fn test_skip_invalid_turns_errors_into_warnings() {
        let mut handler = ErrorHandler::new(false, true);
        assert!(handler.handle_error(ProcessingError::unsupported_format(PathBuf::from("notes.pptx"))));
        assert!(!handler.has_errors());
        assert_eq!(handler.warnings().len(), 1);
        assert!(handler.warnings()[0].contains("pptx"));
    }

    #[test]
    fn test_configuration_errors_always_stop() {
        let mut handler = ErrorHandler::new(true, true);
        assert!(!handler.handle_error(ProcessingError::config_error("bad provider".to_string())));
    }

    #[test]
    fn test_continue_on_error_counts_by_type() {
        let mut handler = ErrorHandler::new(true, false);
        assert!(handler.handle_error(ProcessingError::empty_document(PathBuf::from("a.txt"))));
        assert!(handler.handle_error(ProcessingError::empty_document(PathBuf::from("b.txt"))));
        assert_eq!(handler.error_counts().get(&ErrorType::EmptyDocument), Some(&2));
    }
}
