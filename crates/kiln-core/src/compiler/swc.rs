//! SWC compiler backend.
//!
//! With the `swc` feature this parses with `swc_ecma_parser`, strips
//! TypeScript, lowers JSX and emits code plus a source map. Without it, a
//! regex-based stripper handles the common type annotation forms so plain
//! TypeScript still loads in a browser; JSX is left untouched.

#![allow(clippy::default_trait_access)]
#![allow(clippy::map_unwrap_or)]

use super::{CompilerBackend, CompilerError, TranspileOutput, TranspileSpec};
use std::path::Path;

/// SWC-based compiler backend.
///
/// `Send + Sync`; every call builds its own source map and globals, so one
/// value can serve concurrent compiles on the blocking pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct SwcBackend;

impl SwcBackend {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    pub(crate) fn is_typescript(path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| matches!(ext.to_lowercase().as_str(), "ts" | "tsx" | "mts" | "cts"))
            .unwrap_or(false)
    }

    pub(crate) fn is_jsx(path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| matches!(ext.to_lowercase().as_str(), "jsx" | "tsx"))
            .unwrap_or(false)
    }
}

impl CompilerBackend for SwcBackend {
    fn name(&self) -> &'static str {
        "swc"
    }

    fn transpile(
        &self,
        spec: &TranspileSpec,
        source: &str,
    ) -> Result<TranspileOutput, CompilerError> {
        if source.is_empty() {
            return Ok(TranspileOutput::new(""));
        }

        let is_ts = Self::is_typescript(&spec.input_path);
        let is_jsx = Self::is_jsx(&spec.input_path);

        #[cfg(not(feature = "swc"))]
        {
            let _ = is_jsx;
            let code = if is_ts {
                strip_simple_types(source)
            } else {
                source.to_string()
            };
            Ok(TranspileOutput::new(code))
        }

        #[cfg(feature = "swc")]
        {
            compile_with_swc(spec, source, is_ts, is_jsx)
        }
    }
}

/// Strip the common TypeScript annotation forms without a parser.
///
/// Handles interfaces, type aliases, `import type`, parameter, return and
/// variable annotations, and `as` casts. Anything fancier needs the `swc`
/// feature.
#[cfg(not(feature = "swc"))]
fn strip_simple_types(source: &str) -> String {
    // Annotations are only recognized for primitives and capitalized names,
    // which keeps object literals and ternaries like `a ? b : c` intact.
    const TYPE: &str = r"(?:string|number|boolean|any|unknown|void|never|object|[A-Z][\w.]*)(?:\[\])?";
    let rules: [(String, &str); 8] = [
        (r"(?m)^\s*import\s+type\s+[^;]+;[ \t]*\n?".to_string(), ""),
        (
            r"(?m)^(export\s+)?interface\s+\w+(\s+extends\s+[\w, ]+)?\s*\{[^}]*\}[ \t]*\n?"
                .to_string(),
            "",
        ),
        (r"(?m)^(export\s+)?type\s+\w+\s*=\s*[^;]+;[ \t]*\n?".to_string(), ""),
        (format!(r"\)\s*:\s*{TYPE}\s*\{{"), ") {"),
        (format!(r"\)\s*:\s*{TYPE}\s*=>"), ") =>"),
        (format!(r"(const|let|var)\s+(\w+)\s*:\s*{TYPE}\s*="), "$1 $2 ="),
        (format!(r"(\w+)\??\s*:\s*{TYPE}\s*([,)=])"), "$1$2"),
        (
            r"\s+as\s+(?:string|number|boolean|any|unknown|const)\b".to_string(),
            "",
        ),
    ];

    let mut result = source.to_string();
    for (pattern, replacement) in &rules {
        if let Ok(re) = regex_lite::Regex::new(pattern) {
            result = re.replace_all(&result, *replacement).to_string();
        }
    }
    result
}

#[cfg(feature = "swc")]
fn compile_with_swc(
    spec: &TranspileSpec,
    source: &str,
    is_ts: bool,
    is_jsx: bool,
) -> Result<TranspileOutput, CompilerError> {
    use super::spec::{Diagnostic, JsxRuntime, SourceMapKind};
    use swc_common::{
        comments::SingleThreadedComments, sync::Lrc, FileName, Globals, Mark, SourceMap, Span,
        Spanned,
        GLOBALS,
    };
    use swc_ecma_ast::{EsVersion, Program};
    use swc_ecma_codegen::{text_writer::JsWriter, Emitter};
    use swc_ecma_parser::{lexer::Lexer, EsSyntax, Parser, StringInput, Syntax, TsSyntax};
    use swc_ecma_transforms_base::{fixer::fixer, hygiene::hygiene, resolver};
    use swc_ecma_transforms_react::{react, Options as ReactOptions, Runtime};
    use swc_ecma_transforms_typescript::strip;
    use swc_ecma_visit::FoldWith;

    let cm: Lrc<SourceMap> = Default::default();
    let fm = cm.new_source_file(
        Lrc::new(FileName::Custom(spec.input_path.display().to_string())),
        source.to_string(),
    );

    let syntax = if is_ts {
        Syntax::Typescript(TsSyntax {
            tsx: is_jsx,
            decorators: spec.decorators,
            ..Default::default()
        })
    } else {
        Syntax::Es(EsSyntax {
            jsx: is_jsx,
            decorators: spec.decorators,
            ..Default::default()
        })
    };

    let located = |span: Span, message: String| {
        let loc = cm.lookup_char_pos(span.lo);
        Diagnostic::error(message).with_location(
            spec.input_path.clone(),
            loc.line as u32,
            loc.col_display as u32 + 1,
        )
    };

    let comments = SingleThreadedComments::default();
    let lexer = Lexer::new(
        syntax,
        EsVersion::EsNext,
        StringInput::from(&*fm),
        Some(&comments),
    );
    let mut parser = Parser::new_from(lexer);

    let module = parser.parse_module().map_err(|e| {
        let message = format!("{:?}", e.kind());
        let diagnostic = located(e.span(), message.clone());
        CompilerError::parse_error(message).with_diagnostics(vec![diagnostic])
    })?;

    let recovered: Vec<Diagnostic> = parser
        .take_errors()
        .into_iter()
        .map(|e| located(e.span(), format!("{:?}", e.kind())))
        .collect();
    if !recovered.is_empty() {
        let message = recovered
            .iter()
            .map(|d| d.message.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        return Err(CompilerError::parse_error(message).with_diagnostics(recovered));
    }

    let output = GLOBALS.set(&Globals::default(), || {
        let unresolved_mark = Mark::new();
        let top_level_mark = Mark::new();

        let mut program = Program::Module(module);
        program = program.fold_with(&mut resolver(unresolved_mark, top_level_mark, is_ts));

        if is_ts {
            program = program.fold_with(&mut strip(unresolved_mark, top_level_mark));
        }

        let mut module = match program {
            Program::Module(m) => m,
            Program::Script(s) => swc_ecma_ast::Module {
                span: s.span,
                body: s
                    .body
                    .into_iter()
                    .map(swc_ecma_ast::ModuleItem::Stmt)
                    .collect(),
                shebang: s.shebang,
            },
        };

        if is_jsx {
            let jsx = spec.jsx_options();
            let runtime = match jsx.runtime {
                JsxRuntime::Automatic => Runtime::Automatic,
                JsxRuntime::Classic => Runtime::Classic,
            };
            let react_options = ReactOptions {
                runtime: Some(runtime),
                import_source: Some(jsx.import_source),
                ..Default::default()
            };
            module = module.fold_with(&mut react(
                cm.clone(),
                Some(&comments),
                react_options,
                top_level_mark,
                unresolved_mark,
            ));
        }

        module = module.fold_with(&mut hygiene());
        module = module.fold_with(&mut fixer(Some(&comments)));
        module
    });

    let mut buf = Vec::new();
    let mut src_map_buf = Vec::new();
    {
        let writer = JsWriter::new(cm.clone(), "\n", &mut buf, Some(&mut src_map_buf));
        let mut emitter = Emitter {
            cfg: swc_ecma_codegen::Config::default().with_target(EsVersion::Es2022),
            cm: cm.clone(),
            comments: Some(&comments),
            wr: writer,
        };
        emitter
            .emit_module(&output)
            .map_err(|e| CompilerError::transform_error(format!("Failed to emit: {e}")))?;
    }

    let code = String::from_utf8(buf)
        .map_err(|e| CompilerError::transform_error(format!("Invalid UTF-8 output: {e}")))?;

    let mut output = TranspileOutput::new(code);
    if spec.sourcemaps == SourceMapKind::Inline {
        let srcmap = cm.build_source_map(&src_map_buf);
        let mut map_buf = Vec::new();
        srcmap.to_writer(&mut map_buf).map_err(|e| {
            CompilerError::transform_error(format!("Failed to write source map: {e}"))
        })?;
        let map = String::from_utf8(map_buf).map_err(|e| {
            CompilerError::transform_error(format!("Invalid UTF-8 source map: {e}"))
        })?;
        output = output.with_source_map(map);
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_is_typescript() {
        assert!(SwcBackend::is_typescript(&PathBuf::from("app.ts")));
        assert!(SwcBackend::is_typescript(&PathBuf::from("app.tsx")));
        assert!(SwcBackend::is_typescript(&PathBuf::from("app.mts")));
        assert!(!SwcBackend::is_typescript(&PathBuf::from("app.js")));
        assert!(!SwcBackend::is_typescript(&PathBuf::from("App.vue")));
    }

    #[test]
    fn test_is_jsx() {
        assert!(SwcBackend::is_jsx(&PathBuf::from("app.jsx")));
        assert!(SwcBackend::is_jsx(&PathBuf::from("app.tsx")));
        assert!(!SwcBackend::is_jsx(&PathBuf::from("app.ts")));
    }

    #[test]
    fn test_transpile_empty_source() {
        let output = SwcBackend::new()
            .transpile(&TranspileSpec::new("src/app.ts"), "")
            .unwrap();
        assert_eq!(output.code, "");
    }

    #[test]
    fn test_transpile_plain_js() {
        let output = SwcBackend::new()
            .transpile(&TranspileSpec::new("src/app.js"), "const x = 1;")
            .unwrap();
        assert!(output.code.contains("const x = 1;"));
    }

    #[test]
    fn test_extension_support() {
        let backend = SwcBackend::new();
        assert!(backend.supports_extension("tsx"));
        assert!(backend.supports_extension("MTS"));
        assert!(!backend.supports_extension("css"));
        assert!(!backend.supports_extension("vue"));
    }

    #[test]
    #[cfg(not(feature = "swc"))]
    fn test_stub_strips_common_annotations() {
        let source = "interface User {\n  name: string;\n}\nfunction greet(name: string, n: number): string {\n  const x: number = 1;\n  return name as string;\n}\n";
        let output = SwcBackend::new()
            .transpile(&TranspileSpec::new("src/app.ts"), source)
            .unwrap();
        assert!(!output.code.contains("interface"), "{}", output.code);
        assert!(output.code.contains("function greet(name, n) {"), "{}", output.code);
        assert!(output.code.contains("const x ="), "{}", output.code);
        assert!(!output.code.contains(" as "), "{}", output.code);
    }

    #[test]
    #[cfg(feature = "swc")]
    fn test_swc_strips_typescript() {
        let source = r#"
            interface User { name: string; }
            const user: User = { name: "Alice" };
            console.log(user.name);
        "#;
        let output = SwcBackend::new()
            .transpile(&TranspileSpec::new("src/app.ts"), source)
            .unwrap();
        assert!(!output.code.contains("interface"));
        assert!(!output.code.contains(": User"));
        assert!(output.code.contains("console.log"));
    }

    #[test]
    #[cfg(feature = "swc")]
    fn test_swc_jsx_automatic_import_source() {
        use crate::compiler::JsxOptions;
        let spec = TranspileSpec::new("src/App.jsx").with_jsx(JsxOptions::automatic("preact"));
        let output = SwcBackend::new()
            .transpile(&spec, "export const App = () => <div>hi</div>;")
            .unwrap();
        assert!(output.code.contains("preact/jsx-runtime"), "{}", output.code);
        assert!(!output.code.contains("<div"));
    }

    #[test]
    #[cfg(feature = "swc")]
    fn test_swc_jsx_classic() {
        let output = SwcBackend::new()
            .transpile(
                &TranspileSpec::new("src/App.jsx"),
                "export const App = () => <div>hi</div>;",
            )
            .unwrap();
        assert!(output.code.contains("React.createElement"), "{}", output.code);
    }

    #[test]
    #[cfg(feature = "swc")]
    fn test_swc_parse_error_has_location() {
        let err = SwcBackend::new()
            .transpile(&TranspileSpec::new("src/app.ts"), "const a = 1;\nconst x = {")
            .unwrap_err();
        assert_eq!(err.code, "COMPILER_PARSE_ERROR");
        let diag = err.primary_location().expect("located diagnostic");
        assert_eq!(diag.line, Some(2));
    }

    #[test]
    #[cfg(feature = "swc")]
    fn test_swc_decorators_require_flag() {
        let source = "@Component({})\nexport class A {}\n";
        let backend = SwcBackend::new();
        assert!(backend
            .transpile(&TranspileSpec::new("src/a.ts"), source)
            .is_err());
        assert!(backend
            .transpile(&TranspileSpec::new("src/a.ts").with_decorators(true), source)
            .is_ok());
    }

    #[test]
    #[cfg(feature = "swc")]
    fn test_swc_source_map() {
        use crate::compiler::SourceMapKind;
        let spec = TranspileSpec::new("src/app.ts").with_sourcemaps(SourceMapKind::Inline);
        let output = SwcBackend::new()
            .transpile(&spec, "const x: number = 42;")
            .unwrap();
        let map = output.source_map.expect("map");
        assert!(map.contains("\"version\":3"));
    }
}
