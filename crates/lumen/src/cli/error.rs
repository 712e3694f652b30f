//! Helpful error types for CLI commands
//!
//! Every error includes:
//! - What went wrong
//! - Context about the situation
//! - Suggestions for how to fix it

use std::fmt;
use std::path::Path;

/// An error with helpful context and suggestions
#[derive(Debug)]
pub struct HelpfulError {
    pub message: String,
    pub context: Option<String>,
    pub suggestions: Vec<String>,
}

impl HelpfulError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            context: None,
            suggestions: Vec::new(),
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn with_suggestions(
        mut self,
        suggestions: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.suggestions.extend(suggestions.into_iter().map(|s| s.into()));
        self
    }

    // === Common error constructors ===

    pub fn path_not_found(path: &Path) -> Self {
        Self::new(format!("Path not found: {}", path.display()))
            .with_context("The specified path does not exist on the filesystem")
            .with_suggestions([
                format!("TRY: Check that the path exists: ls -la {}", path.display()),
                "TRY: Check for typos in the path".to_string(),
            ])
    }

    pub fn not_a_directory(path: &Path) -> Self {
        Self::new(format!("Not a directory: {}", path.display()))
            .with_context("The scan command registers a directory as a storage")
            .with_suggestion(format!(
                "TRY: Scan the parent directory: lumen scan {}",
                path.parent()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| ".".to_string())
            ))
    }

    /// Path is not below any scanned directory
    pub fn not_in_storage(path: &Path) -> Self {
        Self::new(format!("Not inside a scanned directory: {}", path.display()))
            .with_context("Events can only be delivered for files of a registered storage")
            .with_suggestions([
                "TRY: Register the directory first: lumen scan <dir>".to_string(),
                "TRY: List registered storages: lumen status".to_string(),
            ])
    }

    pub fn unknown_model(name: &str) -> Self {
        Self::new(format!("Unknown model: '{}'", name))
            .with_context("Models are selected by name with --model")
            .with_suggestion("TRY: Known models: imagenet, landmarks, faces, musicnn, movinet")
    }

    pub fn runtime_not_found(runtime: &Path) -> Self {
        Self::new(format!("Model runtime not found: {}", runtime.display()))
            .with_context("Classifier scripts are run with the configured runtime binary")
            .with_suggestions([
                "TRY: Install the runtime or put it on PATH".to_string(),
                "TRY: Point 'runtime' in lumen.toml at an existing interpreter".to_string(),
            ])
    }

    pub fn invalid_config(path: &Path, details: &str) -> Self {
        Self::new(format!("Invalid configuration: {}", details))
            .with_context(format!("While loading {}", path.display()))
            .with_suggestions([
                "TRY: Print the effective defaults: lumen config".to_string(),
                "TRY: Sizes use units like 512KB, 50MB, 1GB".to_string(),
            ])
    }
}

impl fmt::Display for HelpfulError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ERROR: {}", self.message)?;

        if let Some(ctx) = &self.context {
            writeln!(f, "CONTEXT: {}", ctx)?;
        }

        if !self.suggestions.is_empty() {
            writeln!(f)?;
            for suggestion in &self.suggestions {
                writeln!(f, "  {}", suggestion)?;
            }
        }

        Ok(())
    }
}

impl std::error::Error for HelpfulError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_helpful_error_display() {
        let err = HelpfulError::new("Something went wrong")
            .with_context("While processing data")
            .with_suggestion("Try again");

        let display = format!("{}", err);
        assert!(display.contains("ERROR: Something went wrong"));
        assert!(display.contains("CONTEXT: While processing data"));
        assert!(display.contains("Try again"));
    }

    #[test]
    fn test_not_in_storage() {
        let err = HelpfulError::not_in_storage(&PathBuf::from("/tmp/elsewhere/a.jpg"));
        let display = format!("{}", err);
        assert!(display.contains("/tmp/elsewhere/a.jpg"));
        assert!(display.contains("lumen scan"));
    }
}
