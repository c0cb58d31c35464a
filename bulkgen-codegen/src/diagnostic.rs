use std::fmt;
use std::path::{Path, PathBuf};

use bulkgen_core::Dialect;
use proc_macro2::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Warning => "warning",
            Severity::Error => "error",
        })
    }
}

/// Everything the generator can complain about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticKind {
    /// Capability on a type generated code cannot read or construct.
    NotExtensible,
    MissingProfile,
    DuplicateProfile,
    /// Ambiguous property lacking dialect type, size, precision or scale.
    MissingConfiguration,
    /// Configuration present but wrong for the property or dialect.
    InvalidConfiguration,
    NonConstantArg,
    InvalidArgument,
    UnknownMethod,
    UnknownProperty,
    UnsupportedType,
    MissingKey,
    UpsertInfeasible,
}

impl DiagnosticKind {
    pub fn code(self) -> &'static str {
        match self {
            DiagnosticKind::NotExtensible => "BG0001",
            DiagnosticKind::MissingProfile => "BG0002",
            DiagnosticKind::DuplicateProfile => "BG0003",
            DiagnosticKind::MissingConfiguration => "BG0004",
            DiagnosticKind::InvalidConfiguration => "BG0005",
            DiagnosticKind::NonConstantArg => "BG0006",
            DiagnosticKind::InvalidArgument => "BG0007",
            DiagnosticKind::UnknownMethod => "BG0008",
            DiagnosticKind::UnknownProperty => "BG0009",
            DiagnosticKind::UnsupportedType => "BG0010",
            DiagnosticKind::MissingKey => "BG0011",
            DiagnosticKind::UpsertInfeasible => "BG0012",
        }
    }

    pub fn severity(self) -> Severity {
        match self {
            DiagnosticKind::UnknownMethod | DiagnosticKind::UpsertInfeasible => Severity::Warning,
            _ => Severity::Error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Location {
    pub file: PathBuf,
    /// 1-based.
    pub line: usize,
    /// 1-based.
    pub column: usize,
}

impl Location {
    pub fn new(file: &Path, span: Span) -> Self {
        let start = span.start();
        Self {
            file: file.to_path_buf(),
            line: start.line,
            column: start.column + 1,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file.display(), self.line, self.column)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub severity: Severity,
    pub model: String,
    pub property: Option<String>,
    /// `None` when the problem affects every dialect of the model.
    pub dialect: Option<Dialect>,
    pub message: String,
    pub location: Location,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, model: &str, location: Location, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: kind.severity(),
            model: model.to_owned(),
            property: None,
            dialect: None,
            message: message.into(),
            location,
        }
    }

    pub fn with_property(mut self, property: &str) -> Self {
        self.property = Some(property.to_owned());
        self
    }

    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = Some(dialect);
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    /// Whether this diagnostic blocks emission for `model` in `dialect`.
    pub fn blocks(&self, model: &str, dialect: Dialect) -> bool {
        self.is_error() && self.model == model && self.dialect.is_none_or(|d| d == dialect)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]: {}", self.severity, self.kind.code(), self.message)?;
        write!(f, "\n --> {}", self.location)
    }
}

/// Sorts diagnostics by file, position and code.
pub fn sort(diagnostics: &mut [Diagnostic]) {
    diagnostics.sort_by(|a, b| {
        a.location
            .cmp(&b.location)
            .then_with(|| a.kind.code().cmp(b.kind.code()))
    });
}
