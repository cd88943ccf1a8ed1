//! The vanilla adapter: type stripping and passthrough.
//!
//! Also hosts the helpers every other adapter compiles through.

use super::adapter::{AdapterContext, AdapterError, AdapterInput, FrameworkAdapter};
use super::TransformResult;
use crate::compiler::{
    CompilerBackend, CompilerError, SourceMapKind, SwcBackend, TranspileOutput, TranspileSpec,
};
use async_trait::async_trait;
use base64::Engine;
use std::path::Path;

/// Extensions the compiler must see; everything else passes through.
const COMPILED_EXTENSIONS: &[&str] = &["ts", "tsx", "mts", "cts", "jsx"];

pub(crate) fn needs_compile(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| COMPILED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

pub(crate) fn sourcemaps_for(dev: bool) -> SourceMapKind {
    if dev {
        SourceMapKind::Inline
    } else {
        SourceMapKind::None
    }
}

/// Run the compiler on the blocking pool.
pub(crate) async fn compile(
    spec: TranspileSpec,
    source: &str,
) -> Result<TranspileOutput, CompilerError> {
    let source = source.to_string();
    tokio::task::spawn_blocking(move || SwcBackend::new().transpile(&spec, &source))
        .await
        .map_err(|e| CompilerError::transform_error(format!("compiler task failed: {e}")))?
}

/// Trailer that carries an inlined source map.
pub const INLINE_MAP_PREFIX: &str = "//# sourceMappingURL=data:application/json;base64,";

/// Turn compiler output into a transform result, inlining the source map.
pub(crate) fn finish(
    output: TranspileOutput,
    dev: bool,
    dependencies: Vec<String>,
) -> TransformResult {
    let mut code = output.code;
    if dev {
        if let Some(map) = &output.source_map {
            let encoded = base64::engine::general_purpose::STANDARD.encode(map);
            if !code.ends_with('\n') {
                code.push('\n');
            }
            code.push_str(INLINE_MAP_PREFIX);
            code.push_str(&encoded);
            code.push('\n');
        }
    }
    TransformResult {
        code,
        source_map: output.source_map,
        dependencies,
    }
}

fn passthrough(input: &AdapterInput<'_>) -> TransformResult {
    TransformResult {
        code: input.source.to_string(),
        source_map: None,
        dependencies: Vec::new(),
    }
}

/// Strips types from TypeScript and lowers JSX with the classic runtime;
/// passes every other file through untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VanillaAdapter;

#[async_trait]
impl FrameworkAdapter for VanillaAdapter {
    fn name(&self) -> &'static str {
        "vanilla"
    }

    async fn transform(
        &self,
        _cx: &AdapterContext<'_>,
        input: &AdapterInput<'_>,
    ) -> Result<TransformResult, AdapterError> {
        if !needs_compile(input.path) {
            return Ok(passthrough(input));
        }
        let spec = TranspileSpec::new(input.path).with_sourcemaps(sourcemaps_for(input.dev));
        let output = compile(spec, input.source).await?;
        Ok(finish(output, input.dev, Vec::new()))
    }
}

/// Vanilla with decorator syntax enabled, for class-decorator frameworks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoratorAdapter;

#[async_trait]
impl FrameworkAdapter for DecoratorAdapter {
    fn name(&self) -> &'static str {
        "decorators"
    }

    async fn transform(
        &self,
        _cx: &AdapterContext<'_>,
        input: &AdapterInput<'_>,
    ) -> Result<TransformResult, AdapterError> {
        if !needs_compile(input.path) {
            return Ok(passthrough(input));
        }
        let spec = TranspileSpec::new(input.path)
            .with_decorators(true)
            .with_sourcemaps(sourcemaps_for(input.dev));
        let output = compile(spec, input.source).await?;
        Ok(finish(output, input.dev, Vec::new()))
    }
}
