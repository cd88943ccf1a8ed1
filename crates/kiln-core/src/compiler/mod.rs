//! Compiler backend abstraction.
//!
//! The rest of kiln never calls SWC directly: adapters build a
//! [`TranspileSpec`] and hand it to a [`CompilerBackend`]. Whether the native
//! backend was compiled in is reported by [`Capabilities::probe`], so missing
//! compilers are a reduced-capability state rather than a request failure.

pub mod spec;
pub mod swc;

pub use spec::{
    Diagnostic, DiagnosticSeverity, JsxOptions, JsxRuntime, SourceMapKind, TranspileOutput,
    TranspileSpec,
};
pub use swc::SwcBackend;

use std::fmt;

/// A JavaScript/TypeScript compiler.
pub trait CompilerBackend: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &'static str;

    /// Compile one source file.
    fn transpile(&self, spec: &TranspileSpec, source: &str)
        -> Result<TranspileOutput, CompilerError>;

    /// Whether this backend handles files with the given extension.
    fn supports_extension(&self, ext: &str) -> bool {
        matches!(
            ext.to_ascii_lowercase().as_str(),
            "js" | "jsx" | "ts" | "tsx" | "mjs" | "cjs" | "mts" | "cts"
        )
    }
}

/// Availability of an optional compiler backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Available,
    Unavailable,
}

impl Capability {
    #[must_use]
    pub fn is_available(self) -> bool {
        matches!(self, Self::Available)
    }
}

/// Backends available to this build, probed once per transformer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Native JSX/TypeScript compilation.
    pub swc: Capability,
}

impl Capabilities {
    #[must_use]
    pub fn probe() -> Self {
        let swc = if cfg!(feature = "swc") {
            Capability::Available
        } else {
            Capability::Unavailable
        };
        Self { swc }
    }

    /// Every backend present. Used by tests that exercise routing.
    #[must_use]
    pub fn all() -> Self {
        Self {
            swc: Capability::Available,
        }
    }

    /// No optional backend present.
    #[must_use]
    pub fn none() -> Self {
        Self {
            swc: Capability::Unavailable,
        }
    }
}

/// Compiler error with diagnostics.
#[derive(Debug, Clone)]
pub struct CompilerError {
    /// Error code.
    pub code: &'static str,
    /// Human-readable error message.
    pub message: String,
    /// Positional diagnostics, when the compiler reported any.
    pub diagnostics: Vec<Diagnostic>,
}

impl CompilerError {
    #[must_use]
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            diagnostics: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_diagnostics(mut self, diagnostics: Vec<Diagnostic>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    #[must_use]
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new("COMPILER_PARSE_ERROR", message)
    }

    #[must_use]
    pub fn transform_error(message: impl Into<String>) -> Self {
        Self::new("COMPILER_TRANSFORM_ERROR", message)
    }

    /// First diagnostic that carries a line number.
    #[must_use]
    pub fn primary_location(&self) -> Option<&Diagnostic> {
        self.diagnostics.iter().find(|d| d.line.is_some())
    }
}

impl fmt::Display for CompilerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)?;
        for diag in &self.diagnostics {
            write!(f, "\n  - {}: {}", diag.severity.as_str(), diag.message)?;
            if let (Some(file), Some(line), Some(col)) = (&diag.file, diag.line, diag.column) {
                write!(f, " at {}:{}:{}", file.display(), line, col)?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for CompilerError {}

/// Render a source excerpt around `line` (1-based) with a caret under `column`.
///
/// Shows up to two lines of context on each side, gutter-numbered.
#[must_use]
pub fn code_frame(source: &str, line: u32, column: u32) -> String {
    let lines: Vec<&str> = source.lines().collect();
    if lines.is_empty() || line == 0 {
        return String::new();
    }
    let target = (line as usize).min(lines.len());
    let start = target.saturating_sub(2).max(1);
    let end = (target + 2).min(lines.len());
    let width = end.to_string().len();

    let mut out = String::new();
    for n in start..=end {
        let marker = if n == target { '>' } else { ' ' };
        out.push_str(&format!("{marker} {n:>width$} | {}\n", lines[n - 1]));
        if n == target {
            let pad = " ".repeat(column.saturating_sub(1) as usize);
            out.push_str(&format!("  {} | {pad}^\n", " ".repeat(width)));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compiler_error_display() {
        let error = CompilerError::parse_error("Parse failed").with_diagnostics(vec![
            Diagnostic::error("Unexpected token").with_location("app.ts".into(), 10, 5),
        ]);
        let display = error.to_string();
        assert!(display.contains("COMPILER_PARSE_ERROR"));
        assert!(display.contains("app.ts:10:5"));
        assert_eq!(error.primary_location().and_then(|d| d.line), Some(10));
    }

    #[test]
    fn test_capabilities_probe_matches_feature() {
        assert_eq!(
            Capabilities::probe().swc.is_available(),
            cfg!(feature = "swc")
        );
    }

    #[test]
    fn test_code_frame_points_at_column() {
        let source = "const a = 1;\nconst b = ;\nconst c = 3;\n";
        let frame = code_frame(source, 2, 11);
        assert!(frame.contains("> 2 | const b = ;"), "frame was:\n{frame}");
        let caret_line = frame
            .lines()
            .find(|l| l.trim_end().ends_with('^'))
            .expect("caret line");
        assert_eq!(caret_line.find('^'), Some("    | ".len() + 10));
    }

    #[test]
    fn test_code_frame_out_of_range_line() {
        assert_eq!(code_frame("", 3, 1), "");
        let frame = code_frame("one\ntwo", 9, 1);
        assert!(frame.contains("> 2 | two"));
    }
}
