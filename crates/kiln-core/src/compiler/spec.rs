//! Transpile options and output types.
//!
//! A [`TranspileSpec`] captures every option that affects the emitted code,
//! so two calls with equal specs and equal sources produce equal output.

use std::path::PathBuf;

/// JSX runtime mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum JsxRuntime {
    /// `jsx()` calls imported from `<import_source>/jsx-runtime`.
    #[default]
    Automatic,
    /// `React.createElement` calls against a `React` binding in scope.
    Classic,
}

impl JsxRuntime {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Automatic => "automatic",
            Self::Classic => "classic",
        }
    }
}

/// How JSX should be lowered for one compile.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JsxOptions {
    pub runtime: JsxRuntime,
    /// Package the automatic runtime is imported from (`react`, `preact`, ...).
    pub import_source: String,
}

impl JsxOptions {
    #[must_use]
    pub fn automatic(import_source: impl Into<String>) -> Self {
        Self {
            runtime: JsxRuntime::Automatic,
            import_source: import_source.into(),
        }
    }

    #[must_use]
    pub fn classic() -> Self {
        Self {
            runtime: JsxRuntime::Classic,
            import_source: "react".to_string(),
        }
    }

    /// Module specifier the emitted code imports its helpers from, if any.
    #[must_use]
    pub fn runtime_module(&self) -> Option<String> {
        match self.runtime {
            JsxRuntime::Automatic => Some(format!("{}/jsx-runtime", self.import_source)),
            JsxRuntime::Classic => None,
        }
    }
}

/// Source map output mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SourceMapKind {
    #[default]
    None,
    /// Produce a map; the caller decides where it goes.
    Inline,
}

/// Diagnostic severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticSeverity {
    Error,
    Warning,
}

impl DiagnosticSeverity {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
        }
    }
}

/// A compiler diagnostic with an optional source position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: DiagnosticSeverity,
    pub message: String,
    pub file: Option<PathBuf>,
    /// 1-based line.
    pub line: Option<u32>,
    /// 1-based column.
    pub column: Option<u32>,
}

impl Diagnostic {
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: DiagnosticSeverity::Error,
            message: message.into(),
            file: None,
            line: None,
            column: None,
        }
    }

    #[must_use]
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: DiagnosticSeverity::Warning,
            ..Self::error(message)
        }
    }

    #[must_use]
    pub fn with_location(mut self, file: PathBuf, line: u32, column: u32) -> Self {
        self.file = Some(file);
        self.line = Some(line);
        self.column = Some(column);
        self
    }
}

/// Options for a single transpile call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranspileSpec {
    /// File being compiled; its extension selects the syntax.
    pub input_path: PathBuf,
    /// JSX lowering, or `None` to parse JSX files with the classic defaults.
    pub jsx: Option<JsxOptions>,
    pub sourcemaps: SourceMapKind,
    /// Accept decorator syntax.
    pub decorators: bool,
}

impl TranspileSpec {
    #[must_use]
    pub fn new(input_path: impl Into<PathBuf>) -> Self {
        Self {
            input_path: input_path.into(),
            jsx: None,
            sourcemaps: SourceMapKind::None,
            decorators: false,
        }
    }

    #[must_use]
    pub fn with_jsx(mut self, jsx: JsxOptions) -> Self {
        self.jsx = Some(jsx);
        self
    }

    #[must_use]
    pub fn with_sourcemaps(mut self, sourcemaps: SourceMapKind) -> Self {
        self.sourcemaps = sourcemaps;
        self
    }

    #[must_use]
    pub fn with_decorators(mut self, decorators: bool) -> Self {
        self.decorators = decorators;
        self
    }

    /// JSX options in effect, defaulting to classic.
    #[must_use]
    pub fn jsx_options(&self) -> JsxOptions {
        self.jsx.clone().unwrap_or_else(JsxOptions::classic)
    }
}

/// Output of a transpile call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranspileOutput {
    pub code: String,
    /// Source map JSON, when requested.
    pub source_map: Option<String>,
}

impl TranspileOutput {
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            source_map: None,
        }
    }

    #[must_use]
    pub fn with_source_map(mut self, source_map: impl Into<String>) -> Self {
        self.source_map = Some(source_map.into());
        self
    }
}
