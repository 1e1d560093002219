//! Error types for template resolution and rendering.
//!
//! [`TplError`] is returned by every fallible operation of the pipeline.
//! Configuration-time mistakes are grouped in [`RegistrationError`] so that
//! startup code can tell them apart from per-render failures.

use std::io;
use std::path::PathBuf;

/// Errors raised while configuring the registries.
///
/// These are fatal to startup: a pipeline is never finalized from a builder
/// that produced one.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistrationError {
    /// Extension strings are stored without the leading period.
    #[error("invalid extension '{extension}': {reason}")]
    InvalidExtension { extension: String, reason: String },

    /// An engine was registered twice for the same extension.
    #[error("an engine is already registered for extension '{0}'")]
    DuplicateEngine(String),

    /// A global variable was registered twice for the same file type.
    #[error("global '{name}' is already registered for file type '{mimetype}'")]
    DuplicateGlobal { mimetype: String, name: String },

    /// Two file types claim the same extension.
    #[error("extension '{extension}' is claimed by both '{first}' and '{second}'")]
    ConflictingExtension {
        extension: String,
        first: String,
        second: String,
    },

    /// The configured default file type was never registered.
    #[error("default file type '{0}' is not registered")]
    UnknownDefaultFileType(String),

    /// The configuration names an engine that is not built in.
    #[error("unknown engine '{name}' for extension '{extension}'")]
    UnknownEngine { extension: String, name: String },

    /// Engines are registered but no file type exists to render into.
    #[error("engine '{0}' is registered but no file types are")]
    EngineWithoutFileTypes(String),
}

/// Errors that can occur while resolving or rendering a template.
#[derive(Debug, thiserror::Error)]
pub enum TplError {
    /// No loader, file type or applicable default could be resolved.
    #[error("template not found: {0}")]
    TemplateNotFound(String),

    /// Invalid registration during the configuration phase.
    #[error(transparent)]
    Registration(#[from] RegistrationError),

    /// A renderer or post-processor failed.
    #[error("failed to render '{path}': {message}")]
    Render { path: String, message: String },

    /// A loader could not read template content.
    #[error("failed to read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The configuration is unusable.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl TplError {
    /// Creates a render error for the given template path.
    pub fn render(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Render {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates an I/O error for the given filesystem path.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this is a [`TplError::TemplateNotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::TemplateNotFound(_))
    }
}

// Engine errors happen after the template was found, so a missing include is
// a render failure of the including template.
impl From<minijinja::Error> for TplError {
    fn from(err: minijinja::Error) -> Self {
        TplError::Render {
            path: err.name().unwrap_or("<string>").to_string(),
            message: err.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for TplError {
    fn from(err: serde_yaml::Error) -> Self {
        TplError::Config(err.to_string())
    }
}

/// Result type for template operations.
pub type Result<T> = std::result::Result<T, TplError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TplError::TemplateNotFound("foo.css".to_string());
        assert!(err.to_string().contains("template not found"));
        assert!(err.to_string().contains("foo.css"));
        assert!(err.is_not_found());
    }

    #[test]
    fn test_registration_error_is_transparent() {
        let err: TplError = RegistrationError::DuplicateEngine("jinja2".into()).into();
        assert_eq!(
            err.to_string(),
            "an engine is already registered for extension 'jinja2'"
        );
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_from_minijinja_missing_include_is_render_error() {
        let mj_err = minijinja::Error::new(
            minijinja::ErrorKind::TemplateNotFound,
            "template 'foo' not found",
        );
        let err: TplError = mj_err.into();
        assert!(matches!(err, TplError::Render { .. }));
        assert!(!err.is_not_found());
        assert!(err.to_string().contains("foo"));
    }

    #[test]
    fn test_from_minijinja_syntax_error() {
        let mj_err = minijinja::Error::new(minijinja::ErrorKind::SyntaxError, "unexpected end");
        let err: TplError = mj_err.into();
        assert!(matches!(err, TplError::Render { .. }));
        assert!(err.to_string().contains("unexpected end"));
    }

    #[test]
    fn test_io_error_source() {
        use std::error::Error as _;

        let err = TplError::io(
            "/tmp/a.tpl",
            io::Error::new(io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.to_string().contains("/tmp/a.tpl"));
        assert!(err.source().is_some());
    }
}
